//! Error types for the edgequake-ingest library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`IngestError`]: **Fatal for the call**: the operation cannot proceed
//!   (invalid task parameters, empty payload, submission refused, deadline
//!   exceeded). Returned as `Err(IngestError)` from the public API.
//!
//! * [`TransportError`]: what went wrong on the wire. Always wrapped inside
//!   [`IngestError::Submission`] or [`IngestError::Fetch`] so callers can tell
//!   *which* step of the protocol failed.
//!
//! * [`RecordError`]: **Non-fatal**: a single result record could not be
//!   decoded, but every other record of the same job is fine. Stored in
//!   [`crate::result::JobResult::rejected`] instead of being propagated.
//!
//! Timeouts and transport failures are separate variants:
//! a transport failure means "retry with backoff", a timeout means "the job
//! may still be running remotely". See [`IngestError::is_timeout`] and
//! [`IngestError::is_transport`].

use crate::client::{JobId, JobStatus};
use crate::job_spec::DocumentType;
use crate::task::TaskKind;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-ingest library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Construction errors ───────────────────────────────────────────────
    /// A task parameter is missing, unknown, or outside its valid range.
    #[error("Invalid parameter for {kind} task: {detail}")]
    InvalidParameter { kind: TaskKind, detail: String },

    /// A job spec was built around an empty document.
    #[error("Job spec for '{source_id}' has an empty payload")]
    EmptyPayload { source_id: String },

    /// A text document type was given bytes that are not UTF-8.
    #[error("Job spec for '{source_id}' declares {document_type} but the payload is not UTF-8: {detail}")]
    InvalidText {
        source_id: String,
        document_type: DocumentType,
        detail: String,
    },

    /// An encoded job spec could not be decoded.
    #[error("Malformed job spec: {0}")]
    MalformedSpec(String),

    // ── Job table errors ──────────────────────────────────────────────────
    /// The same shared spec was registered twice.
    #[error("Spec '{source_id}' is already registered as job {existing}")]
    DuplicateSpec { source_id: String, existing: JobId },

    /// The job has no tasks, so the service would have nothing to run.
    #[error("Job {0} has no tasks")]
    EmptyPipeline(JobId),

    /// No job with this identifier exists in the client.
    #[error("Unknown job {0}")]
    UnknownJob(JobId),

    /// The job is not in a state that allows the requested operation.
    #[error("Cannot {operation} job {job_id} while it is {status}")]
    InvalidState {
        job_id: JobId,
        status: JobStatus,
        operation: &'static str,
    },

    /// The job's result was already fetched; fetch is consuming.
    #[error("Result of job {0} was already fetched; resubmit to fetch again")]
    AlreadyFetched(JobId),

    // ── Protocol errors ───────────────────────────────────────────────────
    /// The transport refused or failed the submission.
    #[error("Submission of job {job_id} failed: {source}")]
    Submission {
        job_id: JobId,
        #[source]
        source: TransportError,
    },

    /// The transport failed while polling for the result.
    #[error("Fetching job {job_id} failed: {source}")]
    Fetch {
        job_id: JobId,
        #[source]
        source: TransportError,
    },

    /// The deadline passed before the remote engine reported completion.
    #[error("Job {job_id} did not complete within {waited_ms}ms; it may still be running remotely")]
    Timeout { job_id: JobId, waited_ms: u64 },

    /// The remote engine reported that the job itself failed.
    #[error("Job {job_id} failed remotely: {reason}")]
    RemoteJobFailed { job_id: JobId, reason: String },

    /// The result document did not have the expected shape.
    #[error("Malformed result document: {0}")]
    MalformedResult(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The document source could not supply the document.
    #[error("Document source error for '{input}': {reason}")]
    Source { input: String, reason: String },

    /// Reading or writing a persisted artifact failed.
    #[error("Artifact store error at '{path}': {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// `true` when the fetch deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, IngestError::Timeout { .. })
    }

    /// `true` when the failure happened on the transport (submit or fetch).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            IngestError::Submission { .. } | IngestError::Fetch { .. }
        )
    }

    pub(crate) fn invalid(kind: TaskKind, detail: impl Into<String>) -> Self {
        IngestError::InvalidParameter {
            kind,
            detail: detail.into(),
        }
    }
}

/// Failures on the request/response channel to the ingestion service.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection refused, reset, DNS failure, or request timeout.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The service does not know the target queue or endpoint.
    #[error("queue or endpoint not found: {0}")]
    QueueNotFound(String),

    /// The service answered with an unexpected status.
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    /// The response body could not be decoded.
    #[error("could not decode response: {0}")]
    Decode(String),

    /// The job could not be encoded for the wire.
    #[error("could not encode job: {0}")]
    Encode(String),
}

/// A non-fatal error for a single result record.
///
/// Stored in [`crate::result::JobResult::rejected`] or returned from
/// [`crate::analysis::extract_binary`]. Never aborts processing of the
/// other records in the same result.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum RecordError {
    /// The record is missing required fields or has the wrong shape.
    #[error("Record {index}: malformed: {detail}")]
    Malformed { index: usize, detail: String },

    /// Binary extraction was requested from a non-binary record.
    #[error("Record of type '{content_type}' does not carry binary content")]
    NotBinary { content_type: String },

    /// The record's content is not valid base64.
    #[error("Record content is not valid base64: {detail}")]
    InvalidBase64 { detail: String },

    /// The decoded bytes are not an image this crate can re-encode.
    #[error("Could not decode image: {detail}")]
    Image { detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_transport_are_distinguishable() {
        let id = JobId::new();
        let timeout = IngestError::Timeout {
            job_id: id,
            waited_ms: 10_000,
        };
        let transport = IngestError::Submission {
            job_id: id,
            source: TransportError::Connection("refused".into()),
        };

        assert!(timeout.is_timeout());
        assert!(!timeout.is_transport());
        assert!(transport.is_transport());
        assert!(!transport.is_timeout());
    }

    #[test]
    fn timeout_display_mentions_duration() {
        let e = IngestError::Timeout {
            job_id: JobId::new(),
            waited_ms: 5000,
        };
        assert!(e.to_string().contains("5000ms"), "got: {e}");
    }

    #[test]
    fn invalid_parameter_display_names_kind() {
        let e = IngestError::invalid(TaskKind::Filter, "min_size must be >= 1");
        let msg = e.to_string();
        assert!(msg.contains("filter"), "got: {msg}");
        assert!(msg.contains("min_size"), "got: {msg}");
    }

    #[test]
    fn submission_error_keeps_source() {
        use std::error::Error as _;
        let e = IngestError::Submission {
            job_id: JobId::new(),
            source: TransportError::Status {
                code: 500,
                body: "boom".into(),
            },
        };
        let source = e.source().expect("source should be set");
        assert!(source.to_string().contains("500"));
    }

    #[test]
    fn record_error_round_trips_through_json() {
        let e = RecordError::NotBinary {
            content_type: "text".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: RecordError = serde_json::from_str(&json).unwrap();
        assert!(back.to_string().contains("text"));
    }
}
