//! Job lifecycle tests against an in-memory ingestion service.
//!
//! `FakeService` implements [`Transport`] and answers every poll with a
//! result that echoes the submitted document's `source_id`, so a result that
//! lands on the wrong job is immediately visible.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_ingest::{
    analysis, fetch_stream, ingest_many, ClientConfig, ContentType, DocumentType, IngestError,
    IngestOptions, IngestProgressCallback, JobClient, JobSpec, JobStatus, PollStatus,
    SourceDocument, Task, TracingOptions, Transport, TransportError,
};
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ── Test helpers ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeService {
    submitted: Mutex<HashMap<String, (String, Value)>>,
    counter: AtomicUsize,
    fail_submit: AtomicBool,
    hang: AtomicBool,
    /// Served instead of the echo document when set.
    canned: Mutex<Option<Value>>,
    /// Per-remote-id delay before the result is ready.
    delay_ms: Mutex<HashMap<String, u64>>,
}

impl FakeService {
    fn submitted_job(&self, remote_id: &str) -> Option<(String, Value)> {
        self.submitted.lock().unwrap().get(remote_id).cloned()
    }

    fn only_job(&self) -> (String, Value) {
        let jobs = self.submitted.lock().unwrap();
        assert_eq!(jobs.len(), 1, "expected exactly one submitted job");
        jobs.values().next().cloned().unwrap()
    }
}

fn text_record(content: &str) -> Value {
    json!({"metadata": {
        "content": content,
        "content_metadata": {"type": "text", "description": "Unstructured text from PDF document."}
    }})
}

fn binary_record(kind: &str, bytes: &[u8]) -> Value {
    json!({"metadata": {
        "content": STANDARD.encode(bytes),
        "content_metadata": {"type": kind, "description": format!("{kind} extracted from PDF document.")}
    }})
}

#[async_trait]
impl Transport for FakeService {
    async fn submit(&self, queue: &str, job: &Value) -> Result<String, TransportError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("connection refused".into()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let remote_id = format!("remote-{n}");
        let source_id = job["job_payload"]["source_id"][0]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if let Some(ms) = source_id.strip_prefix("slow-").and_then(|s| s.parse().ok()) {
            self.delay_ms.lock().unwrap().insert(remote_id.clone(), ms);
        }
        self.submitted
            .lock()
            .unwrap()
            .insert(remote_id.clone(), (queue.to_string(), job.clone()));
        Ok(remote_id)
    }

    async fn poll(&self, remote_id: &str) -> Result<PollStatus, TransportError> {
        if self.hang.load(Ordering::SeqCst) {
            return Ok(PollStatus::Pending);
        }
        let delay = self.delay_ms.lock().unwrap().get(remote_id).copied();
        if let Some(ms) = delay {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if let Some(doc) = self.canned.lock().unwrap().clone() {
            return Ok(PollStatus::Ready(doc));
        }
        let (_, job) = self
            .submitted_job(remote_id)
            .ok_or_else(|| TransportError::Status {
                code: 404,
                body: format!("no job {remote_id}"),
            })?;
        let source_id = job["job_payload"]["source_id"][0].as_str().unwrap_or_default();
        Ok(PollStatus::Ready(json!({
            "status": "success",
            "data": [text_record(source_id)]
        })))
    }
}

fn config() -> ClientConfig {
    ClientConfig::builder()
        .poll_interval_ms(5)
        .concurrency(4)
        .build()
        .unwrap()
}

fn client_with(service: Arc<FakeService>) -> JobClient {
    JobClient::with_transport(config(), service)
}

fn spec(source_id: &str) -> JobSpec {
    JobSpec::new(
        DocumentType::Pdf,
        b"%PDF-1.7 fake".to_vec(),
        source_id,
        source_id,
        TracingOptions::default(),
    )
    .unwrap()
    .with_task(Task::extract_defaults(DocumentType::Pdf))
    .with_task(Task::dedup_defaults())
}

fn source_doc(source_id: &str) -> SourceDocument {
    SourceDocument {
        bytes: b"%PDF-1.7 fake".to_vec(),
        document_type: DocumentType::Pdf,
        source_id: source_id.to_string(),
        source_name: format!("{source_id}.pdf"),
    }
}

// ── Submission ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn submit_sends_ordered_tasks_and_payload() {
    let service = Arc::new(FakeService::default());
    let client = client_with(service.clone());

    let id = client.add_job(spec("paper-1"));
    client.submit_job(id, "morpheus_task_queue").await.unwrap();
    assert_eq!(client.status(id), Some(JobStatus::Submitted));

    let (queue, wire) = service.only_job();
    assert_eq!(queue, "morpheus_task_queue");
    assert_eq!(wire["job_id"], id.to_string());
    assert_eq!(wire["tasks"][0]["type"], "extract");
    assert_eq!(wire["tasks"][1]["type"], "dedup");
    assert_eq!(wire["job_payload"]["document_type"][0], "pdf");
    let content = wire["job_payload"]["content"][0].as_str().unwrap();
    assert_eq!(STANDARD.decode(content).unwrap(), b"%PDF-1.7 fake");
}

#[tokio::test]
async fn submit_unknown_job() {
    let client = client_with(Arc::new(FakeService::default()));
    let stranger = edgequake_ingest::JobId::new();
    assert!(matches!(
        client.submit_job(stranger, "q").await,
        Err(IngestError::UnknownJob(id)) if id == stranger
    ));
}

#[tokio::test]
async fn spec_without_tasks_is_not_sent() {
    let service = Arc::new(FakeService::default());
    let client = client_with(service.clone());

    let bare = JobSpec::new(
        DocumentType::Pdf,
        b"%PDF-1".to_vec(),
        "bare",
        "bare.pdf",
        TracingOptions::default(),
    )
    .unwrap();
    let id = client.add_job(bare);

    assert!(matches!(
        client.submit_job(id, "q").await,
        Err(IngestError::EmptyPipeline(job)) if job == id
    ));
    assert_eq!(client.status(id), Some(JobStatus::Pending));
    assert!(service.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn submit_twice_is_invalid_state() {
    let client = client_with(Arc::new(FakeService::default()));
    let id = client.add_job(spec("a"));
    client.submit_job(id, "q").await.unwrap();
    match client.submit_job(id, "q").await {
        Err(IngestError::InvalidState {
            status: JobStatus::Submitted,
            operation: "submit",
            ..
        }) => {}
        other => panic!("expected InvalidState, got {other:?}"),
    }
}

#[tokio::test]
async fn submit_transport_failure_marks_job_failed() {
    let service = Arc::new(FakeService::default());
    service.fail_submit.store(true, Ordering::SeqCst);
    let client = client_with(service);

    let id = client.add_job(spec("a"));
    let err = client.submit_job(id, "q").await.unwrap_err();
    assert!(err.is_transport(), "got {err:?}");
    assert_eq!(client.status(id), Some(JobStatus::Failed));

    assert!(matches!(
        client.fetch_job_result(id, Duration::from_millis(50)).await,
        Err(IngestError::InvalidState {
            status: JobStatus::Failed,
            ..
        })
    ));
}

// ── Fetching ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fetch_returns_result_and_is_consuming() {
    let client = client_with(Arc::new(FakeService::default()));
    let id = client.add_job(spec("paper-1"));
    client.submit_job(id, "q").await.unwrap();

    let result = client.fetch_job_result_default(id).await.unwrap();
    assert_eq!(result.job_id, id);
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].content, "paper-1");
    assert_eq!(client.status(id), Some(JobStatus::Completed));

    assert!(matches!(
        client.fetch_job_result_default(id).await,
        Err(IngestError::AlreadyFetched(_))
    ));
}

#[tokio::test]
async fn concurrent_jobs_do_not_swap_results() {
    let service = Arc::new(FakeService::default());
    let client = Arc::new(client_with(service));

    // The first job is slower, so completion order differs from submit order.
    let a = client.add_job(spec("slow-80"));
    let b = client.add_job(spec("fast"));
    let (ra, rb) = tokio::join!(client.submit_job(a, "q"), client.submit_job(b, "q"));
    ra.unwrap();
    rb.unwrap();

    let (res_a, res_b) = tokio::join!(
        client.fetch_job_result(a, Duration::from_secs(2)),
        client.fetch_job_result(b, Duration::from_secs(2)),
    );
    assert_eq!(res_a.unwrap().records[0].content, "slow-80");
    assert_eq!(res_b.unwrap().records[0].content, "fast");
}

#[tokio::test]
async fn fetch_times_out_within_deadline() {
    let service = Arc::new(FakeService::default());
    service.hang.store(true, Ordering::SeqCst);
    let client = client_with(service);

    let id = client.add_job(spec("stuck"));
    client.submit_job(id, "q").await.unwrap();

    let started = Instant::now();
    let err = client
        .fetch_job_result(id, Duration::from_millis(200))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout(), "got {err:?}");
    assert!(matches!(err, IngestError::Timeout { waited_ms: 200, .. }));
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(1200), "took {elapsed:?}");
    assert_eq!(client.status(id), Some(JobStatus::TimedOut));
}

#[tokio::test]
async fn timed_out_job_can_be_resubmitted() {
    let service = Arc::new(FakeService::default());
    service.hang.store(true, Ordering::SeqCst);
    let client = client_with(service.clone());

    let id = client.add_job(spec("retry-me"));
    client.submit_job(id, "q").await.unwrap();
    let _ = client.fetch_job_result(id, Duration::from_millis(30)).await;

    assert!(matches!(
        client.fetch_job_result(id, Duration::from_millis(30)).await,
        Err(IngestError::InvalidState {
            status: JobStatus::TimedOut,
            ..
        })
    ));

    service.hang.store(false, Ordering::SeqCst);
    let retry = client.resubmit(id).unwrap();
    client.submit_job(retry, "q").await.unwrap();
    let result = client.fetch_job_result_default(retry).await.unwrap();
    assert_eq!(result.records[0].content, "retry-me");
}

#[tokio::test]
async fn dropped_fetch_leaves_job_fetchable() {
    let service = Arc::new(FakeService::default());
    service.hang.store(true, Ordering::SeqCst);
    let client = client_with(service.clone());

    let id = client.add_job(spec("cancel-me"));
    client.submit_job(id, "q").await.unwrap();

    // Outer deadline fires first and drops the inner fetch future.
    let cancelled = tokio::time::timeout(
        Duration::from_millis(30),
        client.fetch_job_result(id, Duration::from_secs(10)),
    )
    .await;
    assert!(cancelled.is_err());
    assert_eq!(client.status(id), Some(JobStatus::Submitted));

    service.hang.store(false, Ordering::SeqCst);
    let result = client.fetch_job_result_default(id).await.unwrap();
    assert_eq!(result.records[0].content, "cancel-me");
}

#[tokio::test]
async fn second_concurrent_fetch_is_rejected() {
    let service = Arc::new(FakeService::default());
    service.hang.store(true, Ordering::SeqCst);
    let client = client_with(service);

    let id = client.add_job(spec("busy"));
    client.submit_job(id, "q").await.unwrap();

    let (first, second) = tokio::join!(
        client.fetch_job_result(id, Duration::from_millis(100)),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            client.fetch_job_result(id, Duration::from_millis(100)).await
        }
    );
    assert!(first.unwrap_err().is_timeout());
    assert!(matches!(
        second,
        Err(IngestError::InvalidState {
            status: JobStatus::Fetching,
            ..
        })
    ));
}

#[tokio::test]
async fn remote_failure_marks_job_failed() {
    let service = Arc::new(FakeService::default());
    *service.canned.lock().unwrap() =
        Some(json!({"status": "failed", "description": "unsupported encryption"}));
    let client = client_with(service);

    let id = client.add_job(spec("locked"));
    client.submit_job(id, "q").await.unwrap();
    match client.fetch_job_result_default(id).await {
        Err(IngestError::RemoteJobFailed { reason, .. }) => {
            assert_eq!(reason, "unsupported encryption")
        }
        other => panic!("expected RemoteJobFailed, got {other:?}"),
    }
    assert_eq!(client.status(id), Some(JobStatus::Failed));
}

// ── Analysis of fetched results ──────────────────────────────────────────────

#[tokio::test]
async fn classify_and_extract_fetched_records() {
    let png = {
        use image::{DynamicImage, Rgba, RgbaImage};
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    };

    let mut data = Vec::new();
    for i in 0..4 {
        data.push(text_record(&format!("paragraph {i}")));
    }
    for _ in 0..3 {
        data.push(binary_record("image", &png));
    }
    for _ in 0..3 {
        data.push(binary_record("structured", &png));
    }
    data.push(json!({"metadata": {"content": "orphan"}}));

    let service = Arc::new(FakeService::default());
    *service.canned.lock().unwrap() = Some(json!({"data": data}));
    let client = client_with(service);

    let id = client.add_job(spec("mixed"));
    client.submit_job(id, "q").await.unwrap();
    let result = client.fetch_job_result_default(id).await.unwrap();

    assert_eq!(result.records.len(), 10);
    assert_eq!(result.rejected.len(), 1);

    let groups = analysis::classify(&result.records);
    assert_eq!(groups.count(&ContentType::Text), 4);
    assert_eq!(groups.count(&ContentType::Image), 3);
    assert_eq!(groups.count(&ContentType::Structured), 3);
    assert_eq!(groups.indices(&ContentType::Image), &[4, 5, 6]);

    let image = &result.records[groups.indices(&ContentType::Image)[0]];
    assert_eq!(analysis::extract_binary(image).unwrap(), png);

    let text = &result.records[0];
    assert!(analysis::extract_binary(text).is_err());

    let pngs: Vec<_> = analysis::extract_all(&result.records)
        .into_iter()
        .map(|(_, r)| analysis::media::to_png(&r.unwrap()).unwrap())
        .collect();
    assert_eq!(pngs.len(), 6);

    let summary = analysis::Summary::from_records(&result.records);
    assert_eq!(summary.total, 10);
    assert_eq!(summary.descriptions.len(), 3);
}

// ── Batch and streaming helpers ──────────────────────────────────────────────

#[derive(Default)]
struct Counting {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    batch_success: AtomicUsize,
}

impl IngestProgressCallback for Counting {
    fn on_document_submitted(&self, _index: usize, _total: usize, _source_id: &str) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
    }

    fn on_document_complete(&self, _index: usize, _total: usize, _s: &str, _records: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_batch_complete(&self, _total: usize, success_count: usize) {
        self.batch_success.store(success_count, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn ingest_many_keeps_input_order() {
    let client = client_with(Arc::new(FakeService::default()));
    let docs = vec![source_doc("slow-60"), source_doc("b"), source_doc("slow-20")];
    let tasks = vec![Task::extract_defaults(DocumentType::Pdf)];
    let counter = Arc::new(Counting::default());
    let options = IngestOptions {
        progress: Some(counter.clone()),
        ..IngestOptions::default()
    };

    let outcomes = ingest_many(&client, docs, &tasks, &options).await;
    let contents: Vec<_> = outcomes
        .into_iter()
        .map(|o| o.unwrap().result.records[0].content.clone())
        .collect();
    assert_eq!(contents, vec!["slow-60", "b", "slow-20"]);

    assert_eq!(counter.submitted.load(Ordering::SeqCst), 3);
    assert_eq!(counter.completed.load(Ordering::SeqCst), 3);
    assert_eq!(counter.batch_success.load(Ordering::SeqCst), 3);
    // Finished jobs are dropped from the table.
    assert_eq!(client.job_count(), 0);
}

#[tokio::test]
async fn fetch_stream_yields_in_completion_order() {
    let client = Arc::new(client_with(Arc::new(FakeService::default())));
    let slow = client.add_job(spec("slow-100"));
    let fast = client.add_job(spec("fast"));
    client.submit_job(slow, "q").await.unwrap();
    client.submit_job(fast, "q").await.unwrap();

    let results: Vec<_> = fetch_stream(client.clone(), vec![slow, fast], Duration::from_secs(2))
        .collect()
        .await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, fast);
    assert_eq!(results[1].0, slow);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
}
