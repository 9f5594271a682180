//! Pipeline tasks: named, parameterised operations run by the remote engine.
//!
//! Every task kind has its own parameter record. A [`Task`] can only be
//! obtained through [`Task::new`] (or one of its shorthands), which validates
//! the record, so an invalid task never reaches the wire. The dynamic entry
//! point [`Task::from_parameters`] accepts a free-form JSON object, rejects
//! unknown keys, and then runs the same validation.
//!
//! ## Wire format
//!
//! ```text
//! {"type": "extract", "task_properties": {"method": "pdfium", "document_type": "pdf",
//!                                         "params": {"extract_text": true, …}}}
//! {"type": "dedup",   "task_properties": {"content_type": "image", "params": {"filter": true}}}
//! {"type": "filter",  "task_properties": {"content_type": "image", "params": {"min_size": 128, …}}}
//! {"type": "split",   "task_properties": {"split_by": "word", "split_length": 300, …}}
//! {"type": "embed",   "task_properties": {"text": true, "tables": true}}
//! ```

use crate::error::IngestError;
use crate::job_spec::DocumentType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::fmt;

/// The closed set of task kinds the service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Extract,
    Dedup,
    Filter,
    Split,
    Embed,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Extract => "extract",
            TaskKind::Dedup => "dedup",
            TaskKind::Filter => "filter",
            TaskKind::Split => "split",
            TaskKind::Embed => "embed",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Parameter records ────────────────────────────────────────────────────

/// Granularity at which extracted text is grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDepth {
    #[default]
    Document,
    Page,
    Block,
    Line,
    Span,
}

/// Table-detection backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableMethod {
    #[default]
    Yolox,
    Pdfium,
}

/// Unit used when splitting text into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitBy {
    #[default]
    Word,
    Sentence,
    Passage,
}

fn yes() -> bool {
    true
}

fn image() -> String {
    "image".to_string()
}

/// Parameters of an `extract` task.
///
/// `document_type` is the only required key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractParams {
    pub document_type: DocumentType,
    /// Extraction backend. `None` resolves to
    /// [`DocumentType::default_extract_method`] when the task is built.
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default = "yes")]
    pub extract_text: bool,
    #[serde(default = "yes")]
    pub extract_images: bool,
    #[serde(default = "yes")]
    pub extract_tables: bool,
    #[serde(default = "yes")]
    pub extract_charts: bool,
    #[serde(default)]
    pub text_depth: TextDepth,
    #[serde(default)]
    pub extract_tables_method: TableMethod,
}

impl ExtractParams {
    /// Extract everything, document-level text, YOLOX tables.
    pub fn new(document_type: DocumentType) -> Self {
        Self {
            document_type,
            method: None,
            extract_text: true,
            extract_images: true,
            extract_tables: true,
            extract_charts: true,
            text_depth: TextDepth::default(),
            extract_tables_method: TableMethod::default(),
        }
    }
}

/// Parameters of a `dedup` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DedupParams {
    #[serde(default = "image")]
    pub content_type: String,
    #[serde(default = "yes")]
    pub filter: bool,
}

impl Default for DedupParams {
    fn default() -> Self {
        Self {
            content_type: image(),
            filter: true,
        }
    }
}

fn default_min_size() -> u32 {
    128
}

fn default_max_aspect_ratio() -> f64 {
    5.0
}

fn default_min_aspect_ratio() -> f64 {
    0.2
}

/// Parameters of a `filter` task (drop small or extreme-ratio images).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterParams {
    #[serde(default = "image")]
    pub content_type: String,
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    #[serde(default = "default_max_aspect_ratio")]
    pub max_aspect_ratio: f64,
    #[serde(default = "default_min_aspect_ratio")]
    pub min_aspect_ratio: f64,
    #[serde(default = "yes")]
    pub filter: bool,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            content_type: image(),
            min_size: default_min_size(),
            max_aspect_ratio: default_max_aspect_ratio(),
            min_aspect_ratio: default_min_aspect_ratio(),
            filter: true,
        }
    }
}

fn default_split_length() -> u32 {
    300
}

fn default_split_overlap() -> u32 {
    10
}

fn default_max_character_length() -> u32 {
    5000
}

/// Parameters of a `split` task (chunk extracted text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitParams {
    #[serde(default)]
    pub split_by: SplitBy,
    #[serde(default = "default_split_length")]
    pub split_length: u32,
    #[serde(default = "default_split_overlap")]
    pub split_overlap: u32,
    #[serde(default = "default_max_character_length")]
    pub max_character_length: u32,
    #[serde(default)]
    pub sentence_window_size: u32,
}

impl Default for SplitParams {
    fn default() -> Self {
        Self {
            split_by: SplitBy::default(),
            split_length: default_split_length(),
            split_overlap: default_split_overlap(),
            max_character_length: default_max_character_length(),
            sentence_window_size: 0,
        }
    }
}

/// Parameters of an `embed` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbedParams {
    #[serde(default = "yes")]
    pub text: bool,
    #[serde(default = "yes")]
    pub tables: bool,
}

impl Default for EmbedParams {
    fn default() -> Self {
        Self {
            text: true,
            tables: true,
        }
    }
}

/// A parameter record tagged with its task kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskParams {
    Extract(ExtractParams),
    Dedup(DedupParams),
    Filter(FilterParams),
    Split(SplitParams),
    Embed(EmbedParams),
}

impl TaskParams {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskParams::Extract(_) => TaskKind::Extract,
            TaskParams::Dedup(_) => TaskKind::Dedup,
            TaskParams::Filter(_) => TaskKind::Filter,
            TaskParams::Split(_) => TaskKind::Split,
            TaskParams::Embed(_) => TaskKind::Embed,
        }
    }
}

// ── Task ─────────────────────────────────────────────────────────────────

/// A validated, immutable pipeline operation.
///
/// # Example
/// ```rust
/// use edgequake_ingest::{Task, TaskKind};
/// use serde_json::json;
///
/// let dedup = Task::from_parameters(TaskKind::Dedup, json!({"filter": true})).unwrap();
/// assert_eq!(dedup.kind(), TaskKind::Dedup);
///
/// let err = Task::from_parameters(TaskKind::Dedup, json!({"threshold": 0.9}));
/// assert!(err.is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    params: TaskParams,
}

impl Task {
    /// Validate `params` and wrap them in a task.
    ///
    /// # Errors
    /// [`IngestError::InvalidParameter`] naming the offending field.
    pub fn new(params: TaskParams) -> Result<Self, IngestError> {
        let params = validate(params)?;
        Ok(Self { params })
    }

    /// Build a task from a free-form parameter object.
    ///
    /// Unknown keys, wrong value types and missing required keys are all
    /// rejected here. `null` is treated as an empty object.
    pub fn from_parameters(kind: TaskKind, parameters: Value) -> Result<Self, IngestError> {
        let parameters = match parameters {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let params = match kind {
            TaskKind::Extract => TaskParams::Extract(parse(kind, parameters)?),
            TaskKind::Dedup => TaskParams::Dedup(parse(kind, parameters)?),
            TaskKind::Filter => TaskParams::Filter(parse(kind, parameters)?),
            TaskKind::Split => TaskParams::Split(parse(kind, parameters)?),
            TaskKind::Embed => TaskParams::Embed(parse(kind, parameters)?),
        };
        Self::new(params)
    }

    pub fn extract(params: ExtractParams) -> Result<Self, IngestError> {
        Self::new(TaskParams::Extract(params))
    }

    pub fn dedup(params: DedupParams) -> Result<Self, IngestError> {
        Self::new(TaskParams::Dedup(params))
    }

    pub fn filter(params: FilterParams) -> Result<Self, IngestError> {
        Self::new(TaskParams::Filter(params))
    }

    pub fn split(params: SplitParams) -> Result<Self, IngestError> {
        Self::new(TaskParams::Split(params))
    }

    pub fn embed(params: EmbedParams) -> Result<Self, IngestError> {
        Self::new(TaskParams::Embed(params))
    }

    /// Extract text, images, tables and charts from `document_type`.
    pub fn extract_defaults(document_type: DocumentType) -> Self {
        Self {
            params: resolve_extract(ExtractParams::new(document_type)),
        }
    }

    /// Image dedup with filtering on.
    pub fn dedup_defaults() -> Self {
        Self {
            params: TaskParams::Dedup(DedupParams::default()),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.params.kind()
    }

    pub fn params(&self) -> &TaskParams {
        &self.params
    }

    /// The `task_properties` object sent on the wire.
    fn properties(&self) -> Value {
        match &self.params {
            TaskParams::Extract(p) => json!({
                "method": p.method,
                "document_type": p.document_type,
                "params": {
                    "extract_text": p.extract_text,
                    "extract_images": p.extract_images,
                    "extract_tables": p.extract_tables,
                    "extract_charts": p.extract_charts,
                    "text_depth": p.text_depth,
                    "extract_tables_method": p.extract_tables_method,
                }
            }),
            TaskParams::Dedup(p) => json!({
                "content_type": p.content_type,
                "params": { "filter": p.filter }
            }),
            TaskParams::Filter(p) => json!({
                "content_type": p.content_type,
                "params": {
                    "min_size": p.min_size,
                    "max_aspect_ratio": p.max_aspect_ratio,
                    "min_aspect_ratio": p.min_aspect_ratio,
                    "filter": p.filter,
                }
            }),
            TaskParams::Split(p) => json!(p),
            TaskParams::Embed(p) => json!(p),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireTask {
    #[serde(rename = "type")]
    kind: TaskKind,
    #[serde(default)]
    task_properties: Value,
}

impl Serialize for Task {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireTask {
            kind: self.kind(),
            task_properties: self.properties(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireTask::deserialize(deserializer)?;
        let flat = flatten_properties(wire.task_properties);
        Task::from_parameters(wire.kind, flat).map_err(serde::de::Error::custom)
    }
}

/// Lift the nested `params` object into the top level so the wire shape
/// matches the flat parameter records.
fn flatten_properties(properties: Value) -> Value {
    let Value::Object(mut top) = properties else {
        return properties;
    };
    if let Some(Value::Object(nested)) = top.remove("params") {
        for (k, v) in nested {
            top.insert(k, v);
        }
    }
    Value::Object(top)
}

fn parse<T: DeserializeOwned>(kind: TaskKind, value: Value) -> Result<T, IngestError> {
    serde_json::from_value(value).map_err(|e| IngestError::invalid(kind, e.to_string()))
}

fn resolve_extract(mut p: ExtractParams) -> TaskParams {
    if p.method.is_none() {
        p.method = Some(p.document_type.default_extract_method().to_string());
    }
    TaskParams::Extract(p)
}

fn validate(params: TaskParams) -> Result<TaskParams, IngestError> {
    let kind = params.kind();
    match params {
        TaskParams::Extract(p) => {
            if matches!(p.method.as_deref(), Some(m) if m.trim().is_empty()) {
                return Err(IngestError::invalid(kind, "method must not be empty"));
            }
            if !(p.extract_text || p.extract_images || p.extract_tables || p.extract_charts) {
                return Err(IngestError::invalid(
                    kind,
                    "at least one of extract_text, extract_images, extract_tables, extract_charts must be true",
                ));
            }
            Ok(resolve_extract(p))
        }
        TaskParams::Dedup(p) => {
            if p.content_type != "image" {
                return Err(IngestError::invalid(
                    kind,
                    format!("content_type must be 'image', got '{}'", p.content_type),
                ));
            }
            Ok(TaskParams::Dedup(p))
        }
        TaskParams::Filter(p) => {
            if p.content_type != "image" {
                return Err(IngestError::invalid(
                    kind,
                    format!("content_type must be 'image', got '{}'", p.content_type),
                ));
            }
            if p.min_size == 0 {
                return Err(IngestError::invalid(kind, "min_size must be >= 1"));
            }
            for (name, ratio) in [
                ("min_aspect_ratio", p.min_aspect_ratio),
                ("max_aspect_ratio", p.max_aspect_ratio),
            ] {
                if !ratio.is_finite() || ratio <= 0.0 {
                    return Err(IngestError::invalid(
                        kind,
                        format!("{name} must be a positive number, got {ratio}"),
                    ));
                }
            }
            if p.min_aspect_ratio > p.max_aspect_ratio {
                return Err(IngestError::invalid(
                    kind,
                    format!(
                        "min_aspect_ratio ({}) exceeds max_aspect_ratio ({})",
                        p.min_aspect_ratio, p.max_aspect_ratio
                    ),
                ));
            }
            Ok(TaskParams::Filter(p))
        }
        TaskParams::Split(p) => {
            if p.split_length == 0 {
                return Err(IngestError::invalid(kind, "split_length must be >= 1"));
            }
            if p.split_overlap >= p.split_length {
                return Err(IngestError::invalid(
                    kind,
                    format!(
                        "split_overlap ({}) must be smaller than split_length ({})",
                        p.split_overlap, p.split_length
                    ),
                ));
            }
            Ok(TaskParams::Split(p))
        }
        TaskParams::Embed(p) => {
            if !(p.text || p.tables) {
                return Err(IngestError::invalid(
                    kind,
                    "at least one of text, tables must be true",
                ));
            }
            Ok(TaskParams::Embed(p))
        }
    }
}
