//! Streaming API: yield results as jobs complete.
//!
//! [`fetch_stream`] waits on many already-submitted jobs at once and emits
//! each result as soon as it is in, so a slow document does not hold back
//! the fast ones. [`ingest_stream`] is the streaming counterpart of
//! [`crate::ingest::ingest_many`]. Both emit in completion order; carry the
//! [`JobId`] or `source_id` along if order matters.

use crate::client::{JobClient, JobId};
use crate::error::IngestError;
use crate::ingest::{run_one, IngestOptions, IngestOutcome};
use crate::result::JobResult;
use crate::source::SourceDocument;
use crate::task::Task;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::Stream;

/// A boxed stream of `(job, result)` pairs.
pub type ResultStream =
    Pin<Box<dyn Stream<Item = (JobId, Result<JobResult, IngestError>)> + Send>>;

/// A boxed stream of per-document ingestion outcomes.
pub type IngestStream = Pin<Box<dyn Stream<Item = Result<IngestOutcome, IngestError>> + Send>>;

/// Fetch the results of submitted jobs, at most `config.concurrency` waits
/// in flight, each bounded by `timeout`.
///
/// # Example
/// ```rust,no_run
/// use edgequake_ingest::{fetch_stream, JobClient};
/// use futures::StreamExt;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn demo(client: Arc<JobClient>, ids: Vec<edgequake_ingest::JobId>) {
/// let mut results = fetch_stream(client, ids, Duration::from_secs(30));
/// while let Some((id, result)) = results.next().await {
///     match result {
///         Ok(r) => println!("{id}: {} records", r.records.len()),
///         Err(e) => eprintln!("{id}: {e}"),
///     }
/// }
/// # }
/// ```
pub fn fetch_stream(client: Arc<JobClient>, ids: Vec<JobId>, timeout: Duration) -> ResultStream {
    let concurrency = client.config().concurrency.max(1);
    let s = stream::iter(ids.into_iter().map(move |id| {
        let client = Arc::clone(&client);
        async move {
            let result = client.fetch_job_result(id, timeout).await;
            (id, result)
        }
    }))
    .buffer_unordered(concurrency);
    Box::pin(s)
}

/// Ingest documents, emitting each outcome as soon as it is ready.
pub fn ingest_stream(
    client: Arc<JobClient>,
    documents: Vec<SourceDocument>,
    tasks: Vec<Task>,
    options: IngestOptions,
) -> IngestStream {
    let total = documents.len();
    let concurrency = client.config().concurrency.max(1);
    let tasks: Arc<[Task]> = tasks.into();
    let options = Arc::new(options);

    let s = stream::iter(documents.into_iter().enumerate().map(move |(index, doc)| {
        let client = Arc::clone(&client);
        let tasks = Arc::clone(&tasks);
        let options = Arc::clone(&options);
        async move { run_one(&client, index, total, doc, &tasks, &options).await }
    }))
    .buffer_unordered(concurrency);
    Box::pin(s)
}
