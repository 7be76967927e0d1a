use async_trait::async_trait;
use barge::ship::transport::{SendReport, Transport};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("mock transport refused the batch")]
pub struct MockSendError;

#[derive(Default)]
struct MockState {
    attempts: Mutex<Vec<Vec<String>>>,
    delivered: Mutex<Vec<Vec<String>>>,
    reject_next: AtomicUsize,
    error_next: AtomicUsize,
    delay: Mutex<Duration>,
}

/// In-memory backend for exercising the shipper: records every submission,
/// can be told to reject or error the next N batches, and can slow sends
/// down to widen scheduling windows.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

// Each test binary uses a different subset of the harness.
#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_next(&self, batches: usize) {
        self.state.reject_next.store(batches, Ordering::SeqCst);
    }

    pub fn error_next(&self, batches: usize) {
        self.state.error_next.store(batches, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    /// Every batch handed to `send_batch`, in order, including failed ones.
    pub fn attempts(&self) -> Vec<Vec<String>> {
        self.state.attempts.lock().unwrap().clone()
    }

    /// Batches that were accepted.
    pub fn delivered(&self) -> Vec<Vec<String>> {
        self.state.delivered.lock().unwrap().clone()
    }

    /// Accepted records, flattened in delivery order.
    pub fn delivered_records(&self) -> Vec<String> {
        self.delivered().into_iter().flatten().collect()
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Transport for MockTransport {
    type Record = String;
    type Response = usize;
    type Error = MockSendError;

    fn prepare_record(&self, payload: Vec<u8>) -> String {
        String::from_utf8_lossy(&payload).into_owned()
    }

    async fn send_batch(
        &self,
        records: Vec<String>,
    ) -> Result<SendReport<usize>, MockSendError> {
        let delay = *self.state.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.state.attempts.lock().unwrap().push(records.clone());

        if take_one(&self.state.error_next) {
            return Err(MockSendError);
        }
        if take_one(&self.state.reject_next) {
            return Ok(SendReport {
                response: records.len(),
                failed_count: records.len(),
            });
        }

        self.state.delivered.lock().unwrap().push(records);
        Ok(SendReport {
            response: 0,
            failed_count: 0,
        })
    }

    fn describe_failure(&self, response: &usize, sent: usize) -> String {
        format!("{response} of {sent} records failed")
    }
}
