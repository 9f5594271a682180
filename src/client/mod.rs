//! Job bookkeeping and the submit/fetch protocol.
//!
//! A [`JobClient`] owns a table of jobs keyed by [`JobId`]. Each job walks
//! this state machine:
//!
//! ```text
//!            submit ok               fetch ok
//! Pending ──────────────▶ Submitted ──────────▶ Completed
//!    │                       │  ▲
//!    │ submit err            │  │ fetch dropped
//!    ▼                       ▼  │
//!  Failed ◀── fetch err ── Fetching ──deadline──▶ TimedOut
//! ```
//!
//! `Failed` and `TimedOut` are terminal for that id; use
//! [`JobClient::resubmit`] to get a fresh job with the same spec.
//!
//! The table lock is a plain `std::sync::Mutex` that is only held to read or
//! flip a single entry and never across an `.await`, so jobs with different
//! ids never wait on each other.

mod rest;
mod transport;

pub use rest::RestTransport;
pub use transport::{PollStatus, Transport};

use crate::config::ClientConfig;
use crate::error::IngestError;
use crate::job_spec::{unix_now_ns, JobSpec};
use crate::result::{decode_response, JobResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Opaque handle for a job registered with a [`JobClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// A fresh random (v4) id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Registered, not yet handed to the service.
    Pending,
    /// A submission request is in flight.
    Submitting,
    /// Accepted by the service.
    Submitted,
    /// A result fetch is in flight.
    Fetching,
    /// The result was delivered to the caller.
    Completed,
    /// The fetch deadline passed. The job may still be running remotely.
    TimedOut,
    /// A transport error or a remote failure. Terminal.
    Failed,
}

impl JobStatus {
    /// No further transitions are possible for this id.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::TimedOut | JobStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Submitting => "submitting",
            JobStatus::Submitted => "submitted",
            JobStatus::Fetching => "fetching",
            JobStatus::Completed => "completed",
            JobStatus::TimedOut => "timed out",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct JobEntry {
    spec: Arc<JobSpec>,
    status: JobStatus,
    remote_id: Option<String>,
    created_at: Instant,
    submitted_at: Option<Instant>,
}

impl JobEntry {
    fn new(spec: Arc<JobSpec>) -> Self {
        Self {
            spec,
            status: JobStatus::Pending,
            remote_id: None,
            created_at: Instant::now(),
            submitted_at: None,
        }
    }
}

/// Client for the ingestion service.
///
/// Cheap to share: wrap it in an `Arc` and call it from many tasks. All
/// methods take `&self`.
///
/// # Example
/// ```rust,no_run
/// use edgequake_ingest::{ClientConfig, DocumentType, JobClient, JobSpec, Task, TracingOptions};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ClientConfig::default();
/// let client = JobClient::new(config.clone())?;
///
/// let spec = JobSpec::new(
///     DocumentType::Pdf,
///     std::fs::read("paper.pdf")?,
///     "paper.pdf",
///     "paper.pdf",
///     TracingOptions::enabled(),
/// )?
/// .with_task(Task::extract_defaults(DocumentType::Pdf))
/// .with_task(Task::dedup_defaults());
///
/// let id = client.add_job(spec);
/// client.submit_job(id, &config.task_queue).await?;
/// let result = client.fetch_job_result_default(id).await?;
/// println!("{} records", result.records.len());
/// # Ok(())
/// # }
/// ```
pub struct JobClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
}

impl fmt::Debug for JobClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobClient")
            .field("base_url", &self.config.base_url())
            .field("jobs", &self.job_count())
            .finish()
    }
}

impl JobClient {
    /// Client talking REST to `config.base_url()`.
    pub fn new(config: ClientConfig) -> Result<Self, IngestError> {
        let transport = RestTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Client over an arbitrary transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Register a job. No network traffic.
    pub fn add_job(&self, spec: JobSpec) -> JobId {
        let spec = Arc::new(spec);
        let id = JobId::new();
        debug!(
            "Job {} registered for '{}' ({} tasks)",
            id,
            spec.source_id(),
            spec.tasks().len()
        );
        self.jobs().insert(id, JobEntry::new(spec));
        id
    }

    /// Register a spec the caller keeps a handle to.
    ///
    /// # Errors
    /// [`IngestError::DuplicateSpec`] if this very allocation is already
    /// registered.
    pub fn add_shared_job(&self, spec: Arc<JobSpec>) -> Result<JobId, IngestError> {
        let mut jobs = self.jobs();
        if let Some((existing, _)) = jobs.iter().find(|(_, e)| Arc::ptr_eq(&e.spec, &spec)) {
            return Err(IngestError::DuplicateSpec {
                source_id: spec.source_id().to_string(),
                existing: *existing,
            });
        }
        let id = JobId::new();
        jobs.insert(id, JobEntry::new(spec));
        Ok(id)
    }

    /// Hand a Pending job to the service on `queue`.
    ///
    /// Returns as soon as the service acknowledges the job. On a transport
    /// error the job becomes [`JobStatus::Failed`]. A spec without tasks is
    /// refused with [`IngestError::EmptyPipeline`] and stays Pending.
    pub async fn submit_job(&self, id: JobId, queue: &str) -> Result<(), IngestError> {
        if self.spec(id).ok_or(IngestError::UnknownJob(id))?.tasks().is_empty() {
            return Err(IngestError::EmptyPipeline(id));
        }
        let spec = self.transition(id, "submit", JobStatus::Pending, JobStatus::Submitting)?;
        let mut guard = RestoreOnDrop::new(self, id, JobStatus::Submitting, JobStatus::Pending);

        let id_str = id.to_string();
        let wire = spec.to_wire(Some(&id_str), unix_now_ns());
        let outcome = self.transport.submit(queue, &wire).await;
        guard.disarm();

        let mut jobs = self.jobs();
        let entry = jobs.get_mut(&id).ok_or(IngestError::UnknownJob(id))?;
        match outcome {
            Ok(remote_id) => {
                info!(
                    "Job {} submitted to '{}' as {} ({})",
                    id,
                    queue,
                    remote_id,
                    spec.source_name()
                );
                entry.status = JobStatus::Submitted;
                entry.remote_id = Some(remote_id);
                entry.submitted_at = Some(Instant::now());
                Ok(())
            }
            Err(source) => {
                warn!("Job {} submission failed: {}", id, source);
                entry.status = JobStatus::Failed;
                Err(IngestError::Submission { job_id: id, source })
            }
        }
    }

    /// Wait up to `timeout` for the result of a Submitted job.
    ///
    /// Fetching consumes the result: a second call on the same id returns
    /// [`IngestError::AlreadyFetched`]. Dropping the returned future before
    /// it resolves puts the job back to Submitted.
    pub async fn fetch_job_result(
        &self,
        id: JobId,
        timeout: Duration,
    ) -> Result<JobResult, IngestError> {
        let remote_id = {
            let mut jobs = self.jobs();
            let entry = jobs.get_mut(&id).ok_or(IngestError::UnknownJob(id))?;
            match entry.status {
                JobStatus::Submitted => {}
                JobStatus::Completed => return Err(IngestError::AlreadyFetched(id)),
                status => {
                    return Err(IngestError::InvalidState {
                        job_id: id,
                        status,
                        operation: "fetch",
                    })
                }
            }
            let remote_id = entry.remote_id.clone().ok_or_else(|| {
                IngestError::Internal(format!("job {id} is submitted without a remote id"))
            })?;
            entry.status = JobStatus::Fetching;
            remote_id
        };
        let mut guard = RestoreOnDrop::new(self, id, JobStatus::Fetching, JobStatus::Submitted);

        debug!("Fetching job {} (remote {}), timeout {:?}", id, remote_id, timeout);
        let outcome = tokio::time::timeout(timeout, self.poll_until_ready(&remote_id)).await;
        guard.disarm();

        let (status, result) = match outcome {
            Err(_) => {
                warn!("Job {} timed out after {:?}", id, timeout);
                (
                    JobStatus::TimedOut,
                    Err(IngestError::Timeout {
                        job_id: id,
                        waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    }),
                )
            }
            Ok(Err(source)) => {
                warn!("Job {} fetch failed: {}", id, source);
                (JobStatus::Failed, Err(IngestError::Fetch { job_id: id, source }))
            }
            Ok(Ok(document)) => match decode_response(id, document) {
                Ok(result) => (JobStatus::Completed, Ok(result)),
                Err(e) => {
                    warn!("Job {} failed: {}", id, e);
                    (JobStatus::Failed, Err(e))
                }
            },
        };

        if let Some(entry) = self.jobs().get_mut(&id) {
            entry.status = status;
            if let (Ok(r), Some(submitted)) = (&result, entry.submitted_at) {
                info!(
                    "Job {} completed: {} records, {} rejected, {:?} after submit",
                    id,
                    r.records.len(),
                    r.rejected.len(),
                    submitted.elapsed()
                );
            }
        }
        result
    }

    /// [`Self::fetch_job_result`] with the configured job timeout.
    pub async fn fetch_job_result_default(&self, id: JobId) -> Result<JobResult, IngestError> {
        self.fetch_job_result(id, self.config.job_timeout()).await
    }

    /// Register a fresh Pending job with a copy of a finished job's spec.
    ///
    /// Allowed once the old job is Completed, TimedOut or Failed. The old
    /// entry is left untouched.
    pub fn resubmit(&self, id: JobId) -> Result<JobId, IngestError> {
        let mut jobs = self.jobs();
        let entry = jobs.get(&id).ok_or(IngestError::UnknownJob(id))?;
        if !entry.status.is_terminal() {
            return Err(IngestError::InvalidState {
                job_id: id,
                status: entry.status,
                operation: "resubmit",
            });
        }
        let spec = Arc::new(JobSpec::clone(&entry.spec));
        let new_id = JobId::new();
        info!("Job {} re-added as {}", id, new_id);
        jobs.insert(new_id, JobEntry::new(spec));
        Ok(new_id)
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs().get(&id).map(|e| e.status)
    }

    /// The frozen spec of a job.
    pub fn spec(&self, id: JobId) -> Option<Arc<JobSpec>> {
        self.jobs().get(&id).map(|e| Arc::clone(&e.spec))
    }

    /// Forget a job. Refused while a submit or fetch is in flight.
    pub fn remove_job(&self, id: JobId) -> Result<Arc<JobSpec>, IngestError> {
        let mut jobs = self.jobs();
        let status = jobs.get(&id).ok_or(IngestError::UnknownJob(id))?.status;
        if matches!(status, JobStatus::Submitting | JobStatus::Fetching) {
            return Err(IngestError::InvalidState {
                job_id: id,
                status,
                operation: "remove",
            });
        }
        let entry = jobs.remove(&id).ok_or(IngestError::UnknownJob(id))?;
        debug!("Job {} removed after {:?}", id, entry.created_at.elapsed());
        Ok(entry.spec)
    }

    pub fn job_count(&self) -> usize {
        self.jobs().len()
    }

    async fn poll_until_ready(
        &self,
        remote_id: &str,
    ) -> Result<serde_json::Value, crate::error::TransportError> {
        let interval = self.config.poll_interval();
        let mut polls = 0u32;
        loop {
            polls += 1;
            match self.transport.poll(remote_id).await? {
                PollStatus::Ready(doc) => {
                    debug!("Remote job {} ready after {} polls", remote_id, polls);
                    return Ok(doc);
                }
                PollStatus::Pending => tokio::time::sleep(interval).await,
            }
        }
    }

    fn transition(
        &self,
        id: JobId,
        operation: &'static str,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<Arc<JobSpec>, IngestError> {
        let mut jobs = self.jobs();
        let entry = jobs.get_mut(&id).ok_or(IngestError::UnknownJob(id))?;
        if entry.status != from {
            return Err(IngestError::InvalidState {
                job_id: id,
                status: entry.status,
                operation,
            });
        }
        entry.status = to;
        Ok(Arc::clone(&entry.spec))
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        // Entries are only ever replaced whole, so a poisoned table is still
        // consistent.
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Puts a job back into `restore` if the in-flight operation is dropped
/// while the job is still in `during`.
struct RestoreOnDrop<'a> {
    client: &'a JobClient,
    id: JobId,
    during: JobStatus,
    restore: JobStatus,
    armed: bool,
}

impl<'a> RestoreOnDrop<'a> {
    fn new(client: &'a JobClient, id: JobId, during: JobStatus, restore: JobStatus) -> Self {
        Self {
            client,
            id,
            during,
            restore,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RestoreOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(entry) = self.client.jobs().get_mut(&self.id) {
            if entry.status == self.during {
                debug!("Job {} cancelled while {}", self.id, self.during);
                entry.status = self.restore;
            }
        }
    }
}
