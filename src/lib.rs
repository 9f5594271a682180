//! # edgequake-ingest
//!
//! Client-side orchestration for a remote document-ingestion service.
//!
//! Documents (PDF, DOCX, PPTX, images, text) are packaged together with an
//! ordered pipeline of tasks (extract, dedup, filter, split, embed), handed
//! to the service over REST, and their results fetched back with a deadline.
//! The returned records are then grouped by content type, summarised, and
//! their binary payloads (images, tables) decoded.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document
//!  │
//!  ├─ 1. Source   local file, URL, or arXiv ID → bytes + DocumentType
//!  ├─ 2. Spec     JobSpec = payload + [Task]   (validated, immutable)
//!  ├─ 3. Submit   JobClient::submit_job        POST /v1/submit_job
//!  ├─ 4. Fetch    JobClient::fetch_job_result  GET /v1/fetch_job/{id}, bounded wait
//!  └─ 5. Analyse  classify / extract_binary / Summary
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ingest::{
//!     analysis, ingest, ClientConfig, IngestOptions, JobClient, SourceDocument,
//! };
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = JobClient::new(ClientConfig::from_env()?)?;
//!     let doc = SourceDocument::from_path(Path::new("paper.pdf")).await?;
//!     let tasks = edgequake_ingest::default_tasks(doc.document_type, true);
//!
//!     let outcome = ingest(&client, doc, &tasks, &IngestOptions::default()).await?;
//!     let summary = analysis::Summary::from_records(&outcome.result.records);
//!     for (content_type, n) in &summary.counts {
//!         println!("{content_type}: {n}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `eq-ingest` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-ingest = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analysis;
pub mod client;
pub mod config;
pub mod error;
pub mod ingest;
pub mod job_spec;
pub mod progress;
pub mod result;
pub mod source;
pub mod store;
pub mod stream;
pub mod task;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analysis::{classify, extract_all, extract_binary, unique_descriptions, Classification, Summary};
pub use client::{JobClient, JobId, JobStatus, PollStatus, RestTransport, Transport};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{IngestError, RecordError, TransportError};
pub use ingest::{default_tasks, ingest, ingest_many, IngestOptions, IngestOutcome};
pub use job_spec::{DocumentType, JobSpec, TracingOptions};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use result::{decode_response, ContentType, JobResult, ResultRecord};
pub use source::{
    resolve_input, ArxivSource, DocumentSource, InputSource, LocalFileSource, SourceDocument,
};
pub use store::{ArtifactStore, FsStore};
pub use stream::{fetch_stream, ingest_stream};
pub use task::{
    DedupParams, EmbedParams, ExtractParams, FilterParams, SplitBy, SplitParams, TableMethod,
    Task, TaskKind, TaskParams, TextDepth,
};
