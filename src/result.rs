//! Result documents returned by the ingestion service.
//!
//! ```text
//! {"status": "success", "description": "...", "trace": {...},
//!  "data": [
//!    {"metadata": {"content": "<text or base64>",
//!                  "content_metadata": {"type": "image", "description": "..."},
//!                  ...}},
//!    ...
//!  ]}
//! ```
//!
//! A bare top-level array is accepted as `data`. Records are decoded one by
//! one; a malformed record is kept in [`JobResult::rejected`] and the rest of
//! the result is still usable.

use crate::client::JobId;
use crate::error::{IngestError, RecordError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// What a result record holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentType {
    Text,
    Image,
    Table,
    Structured,
    Audio,
    /// Any tag this crate does not know about, kept verbatim.
    Other(String),
}

impl ContentType {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "text" => ContentType::Text,
            "image" => ContentType::Image,
            "table" => ContentType::Table,
            "structured" => ContentType::Structured,
            "audio" => ContentType::Audio,
            other => ContentType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Table => "table",
            ContentType::Structured => "structured",
            ContentType::Audio => "audio",
            ContentType::Other(tag) => tag,
        }
    }

    /// Records of this type carry base64-encoded binary content.
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            ContentType::Image | ContentType::Table | ContentType::Structured
        )
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ContentType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ContentType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(ContentType::parse(&tag))
    }
}

/// One extracted item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Position in the job's `data` array, counting rejected records too.
    #[serde(default)]
    pub index: usize,
    pub content_type: ContentType,
    /// Free-text label, e.g. "Image extracted from PDF document.".
    pub description: String,
    /// Plain text for text records, base64 for binary ones.
    pub content: String,
    /// The complete `metadata` object as received.
    pub metadata: Value,
}

impl ResultRecord {
    /// Decode the element at `index` of a `data` array.
    pub fn from_value(index: usize, value: &Value) -> Result<Self, RecordError> {
        let malformed = |detail: &str| RecordError::Malformed {
            index,
            detail: detail.to_string(),
        };

        let metadata = value
            .get("metadata")
            .filter(|m| m.is_object())
            .ok_or_else(|| malformed("missing 'metadata' object"))?;
        let content_metadata = metadata
            .get("content_metadata")
            .filter(|m| m.is_object())
            .ok_or_else(|| malformed("missing 'metadata.content_metadata' object"))?;
        let tag = content_metadata
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing 'content_metadata.type'"))?;
        let description = match content_metadata.get("description") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(malformed("'content_metadata.description' is not a string")),
        };
        let content = match metadata.get("content") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(malformed("'metadata.content' is not a string")),
        };

        Ok(Self {
            index,
            content_type: ContentType::parse(tag),
            description,
            content,
            metadata: metadata.clone(),
        })
    }
}

/// The decoded result of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_id: JobId,
    /// Records that decoded, in service order.
    pub records: Vec<ResultRecord>,
    /// Records that did not decode, each carrying its index in `raw`.
    pub rejected: Vec<RecordError>,
    /// The untouched `data` array, for persistence.
    pub raw: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Value>,
}

impl JobResult {
    /// `true` when every record decoded.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Decode a result document for `job_id`.
///
/// # Errors
/// * [`IngestError::RemoteJobFailed`] when `status` is `"failed"`.
/// * [`IngestError::MalformedResult`] when there is no `data` array.
pub fn decode_response(job_id: JobId, document: Value) -> Result<JobResult, IngestError> {
    let (data, description, trace) = match document {
        Value::Array(data) => (data, None, None),
        Value::Object(mut map) => {
            let description = map
                .remove("description")
                .and_then(|d| d.as_str().map(str::to_string));
            if map.get("status").and_then(Value::as_str) == Some("failed") {
                return Err(IngestError::RemoteJobFailed {
                    job_id,
                    reason: description.unwrap_or_else(|| "no reason given".to_string()),
                });
            }
            let data = match map.remove("data") {
                Some(Value::Array(data)) => data,
                Some(Value::Null) | None => {
                    return Err(IngestError::MalformedResult(
                        "result document has no 'data' array".into(),
                    ))
                }
                Some(_) => {
                    return Err(IngestError::MalformedResult(
                        "'data' is not an array".into(),
                    ))
                }
            };
            (data, description, map.remove("trace"))
        }
        other => {
            return Err(IngestError::MalformedResult(format!(
                "expected an object or array, got {}",
                json_kind(&other)
            )))
        }
    };

    let mut records = Vec::with_capacity(data.len());
    let mut rejected = Vec::new();
    for (index, value) in data.iter().enumerate() {
        match ResultRecord::from_value(index, value) {
            Ok(r) => records.push(r),
            Err(e) => rejected.push(e),
        }
    }

    Ok(JobResult {
        job_id,
        records,
        rejected,
        raw: data,
        description,
        trace,
    })
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(kind: &str, content: &str) -> Value {
        json!({"metadata": {
            "content": content,
            "content_metadata": {"type": kind, "description": format!("{kind} item")}
        }})
    }

    #[test]
    fn decodes_wrapped_document() {
        let doc = json!({
            "status": "success",
            "description": "ok",
            "trace": {"trace::entry::pdf_extractor": 1},
            "data": [record("text", "hello"), record("image", "aGk=")]
        });
        let r = decode_response(JobId::new(), doc).unwrap();
        assert_eq!(r.records.len(), 2);
        assert_eq!(r.records[1].content_type, ContentType::Image);
        assert_eq!(r.records[0].description, "text item");
        assert_eq!(r.description.as_deref(), Some("ok"));
        assert!(r.trace.is_some());
        assert!(r.is_clean());
    }

    #[test]
    fn bare_array_is_accepted() {
        let r = decode_response(JobId::new(), json!([record("text", "a")])).unwrap();
        assert_eq!(r.records.len(), 1);
        assert_eq!(r.raw.len(), 1);
    }

    #[test]
    fn failed_status_is_remote_failure() {
        let doc = json!({"status": "failed", "description": "pdfium crashed", "data": null});
        match decode_response(JobId::new(), doc) {
            Err(IngestError::RemoteJobFailed { reason, .. }) => {
                assert_eq!(reason, "pdfium crashed")
            }
            other => panic!("expected RemoteJobFailed, got {other:?}"),
        }
    }

    #[test]
    fn missing_data_is_malformed() {
        assert!(matches!(
            decode_response(JobId::new(), json!({"status": "success"})),
            Err(IngestError::MalformedResult(_))
        ));
        assert!(matches!(
            decode_response(JobId::new(), json!("nope")),
            Err(IngestError::MalformedResult(_))
        ));
    }

    #[test]
    fn bad_record_is_rejected_alone() {
        let doc = json!({"data": [
            record("text", "a"),
            {"metadata": {"content": "x"}},
            record("structured", "aGk="),
        ]});
        let r = decode_response(JobId::new(), doc).unwrap();
        assert_eq!(r.records.len(), 2);
        assert_eq!(r.raw.len(), 3);
        match &r.rejected[..] {
            [RecordError::Malformed { index: 1, .. }] => {}
            other => panic!("unexpected rejects: {other:?}"),
        }
    }

    #[test]
    fn records_keep_their_raw_position() {
        let doc = json!({"data": [
            {"metadata": null},
            record("image", "aGk="),
            record("text", "b"),
        ]});
        let r = decode_response(JobId::new(), doc).unwrap();
        let indices: Vec<usize> = r.records.iter().map(|rec| rec.index).collect();
        assert_eq!(indices, [1, 2]);
        assert!(matches!(r.rejected[..], [RecordError::Malformed { index: 0, .. }]));
        assert_eq!(r.raw[r.records[0].index]["metadata"]["content"], "aGk=");
    }

    #[test]
    fn unknown_tag_is_kept() {
        let r = decode_response(JobId::new(), json!([record("video", "")])).unwrap();
        assert_eq!(r.records[0].content_type, ContentType::Other("video".into()));
        assert_eq!(r.records[0].content_type.to_string(), "video");
    }
}
