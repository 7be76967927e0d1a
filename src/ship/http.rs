use crate::config::EndpointConfig;
use crate::ship::transport::{SendReport, Transport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum HttpTransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ingestion endpoint returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("ingestion endpoint returned an unreadable body: {0}")]
    Body(#[from] serde_json::Error),
}

/// One record on the wire. The key is a fresh v4 UUID used by the endpoint
/// for partitioning and deduplication hints.
#[derive(Debug, Clone, Serialize)]
pub struct IngestRecord {
    pub key: Uuid,
    pub data: String,
}

#[derive(Debug, Serialize)]
struct IngestRequest<'a> {
    stream: &'a str,
    source: &'a str,
    records: &'a [IngestRecord],
}

#[derive(Debug, Deserialize)]
pub struct IngestResponse {
    pub failed_count: usize,
    #[serde(default)]
    pub records: Vec<RecordOutcome>,
}

#[derive(Debug, Deserialize)]
pub struct RecordOutcome {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Ships batches to an HTTP ingestion endpoint as JSON.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    stream: String,
    source: String,
}

impl HttpTransport {
    pub fn new(endpoint: &EndpointConfig, source: String) -> Result<Self, HttpTransportError> {
        let client = reqwest::Client::builder()
            .timeout(endpoint.timeout)
            .build()?;

        Ok(Self {
            client,
            url: endpoint.url.clone(),
            stream: endpoint.stream.clone(),
            source,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    type Record = IngestRecord;
    type Response = IngestResponse;
    type Error = HttpTransportError;

    fn prepare_record(&self, payload: Vec<u8>) -> IngestRecord {
        IngestRecord {
            key: Uuid::new_v4(),
            data: String::from_utf8_lossy(&payload).into_owned(),
        }
    }

    async fn send_batch(
        &self,
        records: Vec<IngestRecord>,
    ) -> Result<SendReport<IngestResponse>, HttpTransportError> {
        let body = IngestRequest {
            stream: &self.stream,
            source: &self.source,
            records: &records,
        };
        let response = self.client.post(&self.url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpTransportError::Status {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        // Read the body as text first so a malformed response surfaces as a
        // parse error instead of a connection-level one.
        let text = response.text().await?;
        let parsed: IngestResponse = serde_json::from_str(&text)?;
        Ok(SendReport {
            failed_count: parsed.failed_count,
            response: parsed,
        })
    }

    fn describe_failure(&self, response: &IngestResponse, sent: usize) -> String {
        let detail = response
            .records
            .iter()
            .find_map(|r| match (&r.error_code, &r.error_message) {
                (Some(code), Some(message)) => Some(format!("; first error {code}: {message}")),
                (Some(code), None) => Some(format!("; first error {code}")),
                (None, Some(message)) => Some(format!("; first error: {message}")),
                (None, None) => None,
            })
            .unwrap_or_default();
        format!(
            "error writing records to stream '{}' ({} of {} records failed{})",
            self.stream, response.failed_count, sent, detail
        )
    }
}
