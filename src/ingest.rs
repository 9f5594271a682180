//! End-to-end ingestion: document → spec → submit → fetch.
//!
//! [`ingest`] runs one document through the service and returns its result.
//! [`ingest_many`] does the same for a batch, keeping up to
//! `config.concurrency` documents in flight. Failures are per document: one
//! document timing out never stops the others. Use [`crate::stream`] instead
//! when results should be handled as they arrive.

use crate::client::{JobClient, JobId};
use crate::error::IngestError;
use crate::job_spec::{DocumentType, TracingOptions};
use crate::progress::ProgressCallback;
use crate::result::JobResult;
use crate::source::SourceDocument;
use crate::task::{FilterParams, Task};
use futures::stream::{self, StreamExt};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Per-run settings that are not part of the client configuration.
#[derive(Clone, Default)]
pub struct IngestOptions {
    /// Queue to submit to. Default: `config.task_queue`.
    pub queue: Option<String>,
    /// Bound on each result fetch. Default: `config.job_timeout()`.
    pub timeout: Option<Duration>,
    pub tracing: TracingOptions,
    pub progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for IngestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestOptions")
            .field("queue", &self.queue)
            .field("timeout", &self.timeout)
            .field("tracing", &self.tracing)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// A document that made it through the service.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub job_id: JobId,
    pub source_id: String,
    pub source_name: String,
    pub result: JobResult,
    pub duration_ms: u64,
}

/// Extract everything, drop duplicate images and, when `filter` is set,
/// drop tiny or extreme-ratio images.
pub fn default_tasks(document_type: DocumentType, filter: bool) -> Vec<Task> {
    let mut tasks = vec![
        Task::extract_defaults(document_type),
        Task::dedup_defaults(),
    ];
    if filter {
        // Defaults are always within the validated ranges.
        if let Ok(t) = Task::filter(FilterParams::default()) {
            tasks.push(t);
        }
    }
    tasks
}

/// Run one document through the service.
///
/// The job is removed from the client's table once its result is in; on
/// failure it stays there so the caller can inspect its status or
/// [`JobClient::resubmit`] it.
pub async fn ingest(
    client: &JobClient,
    document: SourceDocument,
    tasks: &[Task],
    options: &IngestOptions,
) -> Result<IngestOutcome, IngestError> {
    run_one(client, 0, 1, document, tasks, options).await
}

/// Run many documents, up to `client.config().concurrency` at a time.
///
/// Results come back in input order.
pub async fn ingest_many(
    client: &JobClient,
    documents: Vec<SourceDocument>,
    tasks: &[Task],
    options: &IngestOptions,
) -> Vec<Result<IngestOutcome, IngestError>> {
    let total = documents.len();
    let concurrency = client.config().concurrency.max(1);
    info!(
        "Ingesting {} documents ({} at a time, {} tasks each)",
        total,
        concurrency,
        tasks.len()
    );
    if let Some(ref cb) = options.progress {
        cb.on_batch_start(total);
    }

    let mut indexed: Vec<(usize, Result<IngestOutcome, IngestError>)> =
        stream::iter(documents.into_iter().enumerate().map(|(index, doc)| async move {
            (index, run_one(client, index, total, doc, tasks, options).await)
        }))
        .buffer_unordered(concurrency)
        .collect()
        .await;
    indexed.sort_by_key(|(i, _)| *i);

    let succeeded = indexed.iter().filter(|(_, r)| r.is_ok()).count();
    info!("Ingestion complete: {}/{} documents", succeeded, total);
    if let Some(ref cb) = options.progress {
        cb.on_batch_complete(total, succeeded);
    }

    indexed.into_iter().map(|(_, r)| r).collect()
}

pub(crate) async fn run_one(
    client: &JobClient,
    index: usize,
    total: usize,
    document: SourceDocument,
    tasks: &[Task],
    options: &IngestOptions,
) -> Result<IngestOutcome, IngestError> {
    let started = Instant::now();
    let source_id = document.source_id.clone();
    let source_name = document.source_name.clone();

    let outcome = async {
        let mut spec = document.into_spec(options.tracing)?;
        for task in tasks {
            spec.add_task(task.clone());
        }

        let id = client.add_job(spec);
        let queue = options
            .queue
            .as_deref()
            .unwrap_or(&client.config().task_queue);
        client.submit_job(id, queue).await?;
        if let Some(ref cb) = options.progress {
            cb.on_document_submitted(index, total, &source_id);
        }

        let timeout = options.timeout.unwrap_or_else(|| client.config().job_timeout());
        let result = client.fetch_job_result(id, timeout).await?;
        client.remove_job(id)?;
        Ok::<_, IngestError>((id, result))
    }
    .await;

    match outcome {
        Ok((job_id, result)) => {
            if let Some(ref cb) = options.progress {
                cb.on_document_complete(index, total, &source_id, result.records.len());
            }
            Ok(IngestOutcome {
                job_id,
                source_id,
                source_name,
                result,
                duration_ms: started.elapsed().as_millis() as u64,
            })
        }
        Err(e) => {
            warn!("Document '{}' failed: {}", source_id, e);
            if let Some(ref cb) = options.progress {
                cb.on_document_error(index, total, &source_id, &e.to_string());
            }
            Err(e)
        }
    }
}
