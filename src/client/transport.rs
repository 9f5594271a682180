//! The request/response boundary to the ingestion service.
//!
//! [`JobClient`](super::JobClient) only ever talks to a [`Transport`]; the
//! REST implementation lives in [`super::rest`]. Tests inject in-memory fakes
//! through [`JobClient::with_transport`](super::JobClient::with_transport).

use crate::error::TransportError;
use async_trait::async_trait;
use serde_json::Value;

/// Outcome of a single result poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// The service has not finished the job yet.
    Pending,
    /// The raw result document.
    Ready(Value),
}

/// A channel that can hand a job to the service and ask for its result.
///
/// Implementations must be `Send + Sync`: a single transport is shared by
/// every job in a client, and calls for different jobs may be in flight at
/// the same time. A failed call must not affect any other job.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit the encoded job to `queue` and return the service's identifier
    /// for it. Must not wait for processing.
    async fn submit(&self, queue: &str, job: &Value) -> Result<String, TransportError>;

    /// Ask once whether the job with `remote_id` has finished.
    async fn poll(&self, remote_id: &str) -> Result<PollStatus, TransportError>;
}
