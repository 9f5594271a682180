//! HTTP transport for the ingestion service REST API.
//!
//! ```text
//! POST /v1/submit_job          {"payload": "<job json>", "task_queue": "<queue>"}
//!   200  → body is the remote job id (optionally JSON-quoted)
//!   404  → unknown queue
//! GET  /v1/fetch_job/{id}
//!   200  → result document
//!   202  → still processing
//! ```

use super::transport::{PollStatus, Transport};
use crate::config::ClientConfig;
use crate::error::{IngestError, TransportError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const TRACE_HEADER: &str = "x-trace-id";

/// [`Transport`] over HTTP, backed by one pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct RestTransport {
    http: reqwest::Client,
    base_url: String,
}

impl RestTransport {
    /// Transport for `config.base_url()` with `config.request_timeout()` per
    /// request.
    pub fn new(config: &ClientConfig) -> Result<Self, IngestError> {
        Self::with_base_url(config.base_url(), config.request_timeout())
    }

    /// Transport for an explicit base URL such as `http://127.0.0.1:7670`.
    pub fn with_base_url(
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, IngestError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IngestError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for RestTransport {
    async fn submit(&self, queue: &str, job: &Value) -> Result<String, TransportError> {
        let payload =
            serde_json::to_string(job).map_err(|e| TransportError::Encode(e.to_string()))?;
        let url = format!("{}/v1/submit_job", self.base_url);

        let resp = self
            .http
            .post(&url)
            .json(&json!({ "payload": payload, "task_queue": queue }))
            .send()
            .await
            .map_err(connection)?;

        let status = resp.status();
        if let Some(trace) = resp
            .headers()
            .get(TRACE_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            debug!("Submit trace id: {}", trace);
        }

        match status {
            StatusCode::OK => {
                let body = resp.text().await.map_err(connection)?;
                let remote_id = body.trim().trim_matches('"').to_string();
                if remote_id.is_empty() {
                    return Err(TransportError::Decode(
                        "submit response did not contain a job id".into(),
                    ));
                }
                Ok(remote_id)
            }
            StatusCode::NOT_FOUND => Err(TransportError::QueueNotFound(queue.to_string())),
            other => Err(TransportError::Status {
                code: other.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn poll(&self, remote_id: &str) -> Result<PollStatus, TransportError> {
        let url = format!("{}/v1/fetch_job/{}", self.base_url, remote_id);
        let resp = self.http.get(&url).send().await.map_err(connection)?;

        match resp.status() {
            StatusCode::OK => {
                let bytes = resp.bytes().await.map_err(connection)?;
                let doc: Value = serde_json::from_slice(&bytes)
                    .map_err(|e| TransportError::Decode(e.to_string()))?;
                Ok(PollStatus::Ready(doc))
            }
            StatusCode::ACCEPTED => Ok(PollStatus::Pending),
            other => Err(TransportError::Status {
                code: other.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }
}

fn connection(e: reqwest::Error) -> TransportError {
    TransportError::Connection(e.to_string())
}
