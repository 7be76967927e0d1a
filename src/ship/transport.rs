use async_trait::async_trait;

/// Outcome of submitting one batch to the remote endpoint.
///
/// `failed_count` of zero is the only success signal; any partial failure
/// means the whole batch is resubmitted later, so duplicates must be
/// tolerated downstream.
#[derive(Debug)]
pub struct SendReport<R> {
    pub response: R,
    pub failed_count: usize,
}

impl<R> SendReport<R> {
    pub fn is_success(&self) -> bool {
        self.failed_count == 0
    }
}

/// The capability set a remote backend has to provide.
///
/// The shipping cycle itself is backend-agnostic; a backend only decides how
/// a raw payload becomes a wire record, how a batch is submitted, and how a
/// rejection is described to the error handler.
#[async_trait]
pub trait Transport: Send + Sync {
    type Record: Send;
    type Response: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Wrap one framed spool payload into a wire record.
    fn prepare_record(&self, payload: Vec<u8>) -> Self::Record;

    /// Submit an ordered batch. Transport-level failures (connect, timeout,
    /// non-success status) are errors; per-record rejections come back in
    /// the report.
    async fn send_batch(
        &self,
        records: Vec<Self::Record>,
    ) -> Result<SendReport<Self::Response>, Self::Error>;

    /// Human-readable description of a rejected batch, given the backend
    /// response and how many records were sent.
    fn describe_failure(&self, response: &Self::Response, sent: usize) -> String;
}
