//! Job descriptors: a document payload plus an ordered pipeline of tasks.
//!
//! A [`JobSpec`] is a pure data-transfer object. It performs no I/O, and once
//! handed to [`crate::client::JobClient::add_job`] it is frozen behind an
//! `Arc` for the rest of its life.
//!
//! ## Wire format
//!
//! ```text
//! {
//!   "job_payload": {
//!     "source_name":   ["paper.pdf"],
//!     "source_id":     ["sources/pdfs/paper.pdf"],
//!     "content":       ["JVBERi0xLjQK…"],        base64, or UTF-8 text for text types
//!     "document_type": ["pdf"]
//!   },
//!   "job_id": "6f0c…",
//!   "tasks": [ {"type": "extract", "task_properties": {…}}, … ],
//!   "tracing_options": {"trace": true, "ts_send": 1718000000000000000}
//! }
//! ```
//!
//! The payload fields are single-element arrays because the service accepts
//! batched payloads; this client always sends one document per job. Tasks
//! are emitted in insertion order, which is the execution order.

use crate::error::IngestError;
use crate::task::Task;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Encoding of the document carried by a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Pdf,
    Docx,
    Pptx,
    Html,
    Txt,
    Md,
    Json,
    Jpeg,
    Png,
    Bmp,
    Tiff,
    Svg,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Pdf => "pdf",
            DocumentType::Docx => "docx",
            DocumentType::Pptx => "pptx",
            DocumentType::Html => "html",
            DocumentType::Txt => "txt",
            DocumentType::Md => "md",
            DocumentType::Json => "json",
            DocumentType::Jpeg => "jpeg",
            DocumentType::Png => "png",
            DocumentType::Bmp => "bmp",
            DocumentType::Tiff => "tiff",
            DocumentType::Svg => "svg",
        }
    }

    /// Map a file extension (without the dot, any case) to a document type.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let t = match ext.to_ascii_lowercase().as_str() {
            "pdf" => DocumentType::Pdf,
            "docx" => DocumentType::Docx,
            "pptx" => DocumentType::Pptx,
            "html" | "htm" => DocumentType::Html,
            "txt" | "text" => DocumentType::Txt,
            "md" | "markdown" => DocumentType::Md,
            "json" => DocumentType::Json,
            "jpg" | "jpeg" => DocumentType::Jpeg,
            "png" => DocumentType::Png,
            "bmp" => DocumentType::Bmp,
            "tif" | "tiff" => DocumentType::Tiff,
            "svg" => DocumentType::Svg,
            _ => return None,
        };
        Some(t)
    }

    /// Infer the document type from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Text types travel as raw UTF-8 on the wire; everything else as base64.
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            DocumentType::Html
                | DocumentType::Txt
                | DocumentType::Md
                | DocumentType::Json
                | DocumentType::Svg
        )
    }

    /// Extraction method the service uses for this type when none is named.
    pub fn default_extract_method(&self) -> &'static str {
        match self {
            DocumentType::Pdf => "pdfium",
            DocumentType::Docx => "python_docx",
            DocumentType::Pptx => "python_pptx",
            DocumentType::Jpeg
            | DocumentType::Png
            | DocumentType::Bmp
            | DocumentType::Tiff
            | DocumentType::Svg => "image",
            DocumentType::Html | DocumentType::Txt | DocumentType::Md | DocumentType::Json => "txt",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s.trim()).ok_or_else(|| format!("unsupported document type '{s}'"))
    }
}

/// Diagnostic flags sent with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TracingOptions {
    /// Ask the service to record per-stage timings.
    pub trace: bool,
    /// Send timestamp in nanoseconds since the Unix epoch. When `trace` is
    /// set and this is `None`, the client stamps it at submission time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_send: Option<u64>,
}

impl TracingOptions {
    /// Tracing on, timestamp stamped at submission.
    pub fn enabled() -> Self {
        Self {
            trace: true,
            ts_send: None,
        }
    }
}

/// Nanoseconds since the Unix epoch.
pub fn unix_now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// A document plus the ordered pipeline of tasks to run over it.
///
/// # Example
/// ```rust
/// use edgequake_ingest::{DocumentType, JobSpec, Task, TracingOptions};
///
/// let spec = JobSpec::new(
///     DocumentType::Pdf,
///     b"%PDF-1.7 ...".to_vec(),
///     "sources/pdfs/paper.pdf",
///     "paper.pdf",
///     TracingOptions::enabled(),
/// )
/// .unwrap()
/// .with_task(Task::extract_defaults(DocumentType::Pdf))
/// .with_task(Task::dedup_defaults());
///
/// assert_eq!(spec.tasks().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    document_type: DocumentType,
    payload: Vec<u8>,
    source_id: String,
    source_name: String,
    tasks: Vec<Task>,
    tracing_options: TracingOptions,
}

impl JobSpec {
    /// Build a spec with no tasks.
    ///
    /// # Errors
    /// [`IngestError::EmptyPayload`] when `payload` is empty. Because the
    /// check happens here, [`JobSpec::add_task`] never has to fail.
    ///
    /// [`IngestError::InvalidText`] when a text document type carries bytes
    /// that are not UTF-8. Text payloads travel unencoded.
    pub fn new(
        document_type: DocumentType,
        payload: Vec<u8>,
        source_id: impl Into<String>,
        source_name: impl Into<String>,
        tracing_options: TracingOptions,
    ) -> Result<Self, IngestError> {
        let source_id = source_id.into();
        if payload.is_empty() {
            return Err(IngestError::EmptyPayload { source_id });
        }
        if document_type.is_text() {
            if let Err(e) = std::str::from_utf8(&payload) {
                return Err(IngestError::InvalidText {
                    source_id,
                    document_type,
                    detail: e.to_string(),
                });
            }
        }
        Ok(Self {
            document_type,
            payload,
            source_id,
            source_name: source_name.into(),
            tasks: Vec::new(),
            tracing_options,
        })
    }

    /// Append a task. Tasks run in insertion order.
    pub fn add_task(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Chaining form of [`JobSpec::add_task`].
    pub fn with_task(mut self, task: Task) -> Self {
        self.add_task(task);
        self
    }

    pub fn document_type(&self) -> DocumentType {
        self.document_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn tracing_options(&self) -> TracingOptions {
        self.tracing_options
    }

    /// Encode for submission.
    ///
    /// `job_id` is embedded when given. `now_ns` stamps `ts_send` when
    /// tracing is on and the caller did not set a timestamp.
    pub fn to_wire(&self, job_id: Option<&str>, now_ns: u64) -> Value {
        let mut tracing = self.tracing_options;
        if tracing.trace && tracing.ts_send.is_none() {
            tracing.ts_send = Some(now_ns);
        }

        let mut wire = json!({
            "job_payload": {
                "source_name": [self.source_name],
                "source_id": [self.source_id],
                "content": [self.encode_payload()],
                "document_type": [self.document_type],
            },
            "tasks": self.tasks,
            "tracing_options": tracing,
        });
        if let (Some(id), Some(obj)) = (job_id, wire.as_object_mut()) {
            obj.insert("job_id".into(), Value::String(id.to_string()));
        }
        wire
    }

    /// Decode a value produced by [`JobSpec::to_wire`].
    ///
    /// Returns the spec and the embedded job id, if any. Tasks are
    /// re-validated on the way in.
    pub fn from_wire(value: &Value) -> Result<(Self, Option<String>), IngestError> {
        let wire: WireJob = serde_json::from_value(value.clone())
            .map_err(|e| IngestError::MalformedSpec(e.to_string()))?;

        let p = wire.job_payload;
        let document_type = single(p.document_type, "document_type")?;
        let content = single(p.content, "content")?;
        let payload = decode_payload(document_type, &content)?;

        let mut spec = JobSpec::new(
            document_type,
            payload,
            single(p.source_id, "source_id")?,
            single(p.source_name, "source_name")?,
            wire.tracing_options.unwrap_or_default(),
        )?;
        spec.tasks = wire.tasks;
        Ok((spec, wire.job_id))
    }

    fn encode_payload(&self) -> String {
        match std::str::from_utf8(&self.payload) {
            // `new` only admits UTF-8 for text types.
            Ok(text) if self.document_type.is_text() => text.to_owned(),
            _ => STANDARD.encode(&self.payload),
        }
    }
}

/// Inverse of the payload encoding. Text types are taken verbatim.
fn decode_payload(document_type: DocumentType, content: &str) -> Result<Vec<u8>, IngestError> {
    if document_type.is_text() {
        return Ok(content.as_bytes().to_vec());
    }
    STANDARD
        .decode(content)
        .map_err(|e| IngestError::MalformedSpec(format!("payload is not base64: {e}")))
}

fn single<T>(mut values: Vec<T>, field: &str) -> Result<T, IngestError> {
    if values.len() != 1 {
        return Err(IngestError::MalformedSpec(format!(
            "job_payload.{field} must hold exactly one element, found {}",
            values.len()
        )));
    }
    Ok(values.remove(0))
}

#[derive(Deserialize)]
struct WireJob {
    job_payload: WirePayload,
    #[serde(default)]
    job_id: Option<String>,
    tasks: Vec<Task>,
    #[serde(default)]
    tracing_options: Option<TracingOptions>,
}

#[derive(Deserialize)]
struct WirePayload {
    source_name: Vec<String>,
    source_id: Vec<String>,
    content: Vec<String>,
    document_type: Vec<DocumentType>,
}
