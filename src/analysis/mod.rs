//! Read-only inspection of job results.
//!
//! Nothing here touches the network or mutates its input. [`classify`]
//! groups record indices by content type, [`extract_binary`] decodes the
//! base64 content of image/table/structured records, and [`Summary`] gathers
//! the counts and descriptions the CLI prints.

pub mod media;

use crate::error::RecordError;
use crate::result::{ContentType, ResultRecord};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Record indices grouped by content type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Classification {
    groups: BTreeMap<ContentType, Vec<usize>>,
}

impl Classification {
    /// Number of records of type `ct`.
    pub fn count(&self, ct: &ContentType) -> usize {
        self.groups.get(ct).map_or(0, Vec::len)
    }

    /// Indices of records of type `ct`, in input order.
    pub fn indices(&self, ct: &ContentType) -> &[usize] {
        self.groups.get(ct).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `(type, count)` for every type present.
    pub fn counts(&self) -> BTreeMap<ContentType, usize> {
        self.groups
            .iter()
            .map(|(ct, idx)| (ct.clone(), idx.len()))
            .collect()
    }

    /// Content types present, sorted.
    pub fn types(&self) -> impl Iterator<Item = &ContentType> {
        self.groups.keys()
    }

    pub fn total(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Group records by content type. Every index lands in exactly one group.
pub fn classify(records: &[ResultRecord]) -> Classification {
    let mut groups: BTreeMap<ContentType, Vec<usize>> = BTreeMap::new();
    for (i, r) in records.iter().enumerate() {
        groups.entry(r.content_type.clone()).or_default().push(i);
    }
    Classification { groups }
}

/// Decode the binary content of an image, table or structured record.
pub fn extract_binary(record: &ResultRecord) -> Result<Vec<u8>, RecordError> {
    if !record.content_type.is_binary() {
        return Err(RecordError::NotBinary {
            content_type: record.content_type.to_string(),
        });
    }
    STANDARD
        .decode(record.content.trim())
        .map_err(|e| RecordError::InvalidBase64 {
            detail: e.to_string(),
        })
}

/// [`extract_binary`] over every binary-bearing record.
///
/// Returns `(index, outcome)` pairs; text and other non-binary records are
/// skipped rather than reported.
pub fn extract_all(records: &[ResultRecord]) -> Vec<(usize, Result<Vec<u8>, RecordError>)> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.content_type.is_binary())
        .map(|(i, r)| (i, extract_binary(r)))
        .collect()
}

/// Distinct non-empty descriptions, sorted.
pub fn unique_descriptions(records: &[ResultRecord]) -> BTreeSet<String> {
    records
        .iter()
        .filter(|r| !r.description.is_empty())
        .map(|r| r.description.clone())
        .collect()
}

/// Per-type counts and distinct descriptions of a set of records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub counts: BTreeMap<ContentType, usize>,
    pub descriptions: BTreeSet<String>,
}

impl Summary {
    pub fn from_records(records: &[ResultRecord]) -> Self {
        Self {
            total: records.len(),
            counts: classify(records).counts(),
            descriptions: unique_descriptions(records),
        }
    }

    /// Fold another summary into this one.
    pub fn merge(&mut self, other: Summary) {
        self.total += other.total;
        for (ct, n) in other.counts {
            *self.counts.entry(ct).or_default() += n;
        }
        self.descriptions.extend(other.descriptions);
    }
}
