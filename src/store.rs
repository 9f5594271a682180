//! Local persistence for downloaded inputs and job artifacts.
//!
//! Keys are relative, `/`-separated paths such as
//! `extracted_data/generated_metadata_paper.pdf.json`. They may never climb
//! out of the store root.

use crate::error::IngestError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static regex"));

/// Replace every run of characters outside `[A-Za-z0-9._-]` with `_`, so
/// an arbitrary name can be used as a single key segment.
pub fn sanitize_segment(name: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(name.trim(), "_");
    match cleaned.as_ref() {
        "" | "." | ".." => "_".to_string(),
        s => s.to_string(),
    }
}

/// Byte storage addressed by relative keys.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write `bytes` under `key`, replacing any previous value atomically.
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<PathBuf, IngestError>;

    async fn load(&self, key: &str) -> Result<Vec<u8>, IngestError>;
}

/// An [`ArtifactStore`] rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path under the root, rejecting escapes.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, IngestError> {
        let rel = Path::new(key);
        let invalid = |why: &str| IngestError::Store {
            path: rel.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, why.to_string()),
        };

        if key.trim().is_empty() {
            return Err(invalid("empty key"));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => return Err(invalid("key must not contain '..'")),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid("key must be relative"))
                }
            }
        }
        Ok(self.root.join(rel))
    }

    /// Keys directly under `prefix`, sorted. Missing prefix → empty.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, IngestError> {
        let dir = self.path_for(prefix)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(IngestError::Store { path: dir, source: e }),
        };

        let mut keys = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|e| IngestError::Store {
                path: dir.clone(),
                source: e,
            })?;
            let Some(entry) = entry else { break };
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_file && !name.ends_with(".tmp") {
                keys.push(format!("{}/{}", prefix.trim_end_matches('/'), name));
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl ArtifactStore for FsStore {
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<PathBuf, IngestError> {
        let path = self.path_for(key)?;
        let io_err = |source| IngestError::Store {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        // Atomic write: temp file next to the target, then rename.
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        tokio::fs::write(&tmp_path, bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(io_err)?;

        debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(path)
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>, IngestError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|source| IngestError::Store { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        let path = store.store("extracted_data/a.json", b"[]").await.unwrap();
        assert!(path.ends_with("extracted_data/a.json"));
        assert_eq!(store.load("extracted_data/a.json").await.unwrap(), b"[]");

        store.store("extracted_data/a.json", b"[1]").await.unwrap();
        assert_eq!(store.load("extracted_data/a.json").await.unwrap(), b"[1]");
        assert!(!dir.path().join("extracted_data/a.json.tmp").exists());
    }

    #[tokio::test]
    async fn escaping_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.store("../outside", b"x").await.is_err());
        assert!(store.store("a/../../outside", b"x").await.is_err());
        assert!(store.store("/etc/passwd", b"x").await.is_err());
        assert!(store.store("", b"x").await.is_err());
    }

    #[tokio::test]
    async fn list_is_sorted_and_tolerates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.list("pdfs").await.unwrap().is_empty());

        store.store("pdfs/b.pdf", b"%PDF").await.unwrap();
        store.store("pdfs/a.pdf", b"%PDF").await.unwrap();
        assert_eq!(
            store.list("pdfs").await.unwrap(),
            vec!["pdfs/a.pdf".to_string(), "pdfs/b.pdf".to_string()]
        );
    }

    #[tokio::test]
    async fn load_missing_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(matches!(
            store.load("nope.json").await,
            Err(IngestError::Store { .. })
        ));
    }

    #[test]
    fn sanitize() {
        assert_eq!(sanitize_segment("my paper (v2).pdf"), "my_paper_v2_.pdf");
        assert_eq!(sanitize_segment(".."), "_");
        assert_eq!(sanitize_segment("2408.09869.pdf"), "2408.09869.pdf");
    }
}
