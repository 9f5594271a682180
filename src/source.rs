//! Where documents come from before they become [`JobSpec`]s.
//!
//! A [`DocumentSource`] turns an identifier into bytes plus a
//! [`DocumentType`]. Three are provided:
//!
//! * [`LocalFileSource`]: paths on disk, type inferred from the extension.
//! * [`InputSource`]: a path *or* an HTTP(S) URL, via [`resolve_input`].
//! * [`ArxivSource`]: arXiv IDs or abs/pdf URLs, cached on disk by
//!   `arxiv-fetch`.
//!
//! PDFs are checked for the `%PDF` magic so a saved HTML error page never
//! reaches the service disguised as a paper.

use crate::error::IngestError;
use crate::job_spec::{DocumentType, JobSpec, TracingOptions};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF";

/// A document ready to be wrapped in a [`JobSpec`].
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub bytes: Vec<u8>,
    pub document_type: DocumentType,
    /// Where the document came from (path, URL or arXiv ID).
    pub source_id: String,
    /// Short display name, usually the file name.
    pub source_name: String,
}

impl SourceDocument {
    /// Read a local file, inferring its type from the extension.
    pub async fn from_path(path: &Path) -> Result<Self, IngestError> {
        let input = path.display().to_string();
        let document_type = DocumentType::from_path(path).ok_or_else(|| IngestError::Source {
            input: input.clone(),
            reason: "unsupported or missing file extension".into(),
        })?;

        let bytes = tokio::fs::read(path).await.map_err(|e| IngestError::Source {
            input: input.clone(),
            reason: e.to_string(),
        })?;
        check_magic(&input, document_type, &bytes)?;

        let source_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.clone());
        debug!("Read {} ({}, {} bytes)", input, document_type, bytes.len());

        Ok(Self {
            bytes,
            document_type,
            source_id: input,
            source_name,
        })
    }

    /// Wrap the document in a spec with no tasks.
    pub fn into_spec(self, tracing_options: TracingOptions) -> Result<JobSpec, IngestError> {
        JobSpec::new(
            self.document_type,
            self.bytes,
            self.source_id,
            self.source_name,
            tracing_options,
        )
    }
}

/// Supplies documents by identifier.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<SourceDocument, IngestError>;
}

/// Documents on the local file system, optionally relative to a root.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSource {
    root: Option<PathBuf>,
}

impl LocalFileSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative ids against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

#[async_trait]
impl DocumentSource for LocalFileSource {
    async fn fetch(&self, id: &str) -> Result<SourceDocument, IngestError> {
        let path = match &self.root {
            Some(root) => root.join(id),
            None => PathBuf::from(id),
        };
        SourceDocument::from_path(&path).await
    }
}

/// Paths or HTTP(S) URLs, downloading the latter with a timeout.
#[derive(Debug, Clone)]
pub struct InputSource {
    download_timeout_secs: u64,
}

impl InputSource {
    pub fn new(download_timeout_secs: u64) -> Self {
        Self {
            download_timeout_secs,
        }
    }
}

impl Default for InputSource {
    fn default() -> Self {
        Self::new(120)
    }
}

#[async_trait]
impl DocumentSource for InputSource {
    async fn fetch(&self, id: &str) -> Result<SourceDocument, IngestError> {
        let resolved = resolve_input(id, self.download_timeout_secs).await?;
        let mut doc = SourceDocument::from_path(resolved.path()).await?;
        doc.source_id = id.to_string();
        Ok(doc)
    }
}

/// arXiv articles, downloaded once into `dir`.
#[derive(Debug, Clone)]
pub struct ArxivSource {
    dir: PathBuf,
}

impl ArxivSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Use the per-user arXiv cache directory.
    pub fn cached() -> Self {
        Self::new(arxiv_fetch::article_cache_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Make sure the article is on disk, downloading it if needed.
    pub async fn ensure(&self, input: &str) -> Result<arxiv_fetch::Article, IngestError> {
        let dir = self.dir.clone();
        let owned = input.to_string();
        let article = tokio::task::spawn_blocking(move || {
            arxiv_fetch::ensure_article(&owned, &dir, None)
        })
        .await
        .map_err(|e| IngestError::Internal(format!("download task panicked: {e}")))?
        .map_err(|e| IngestError::Source {
            input: input.to_string(),
            reason: e.to_string(),
        })?;

        if article.skipped {
            debug!("Article {} already at {}", article.id, article.path.display());
        } else {
            info!("Downloaded {} → {}", article.id, article.path.display());
        }
        Ok(article)
    }
}

#[async_trait]
impl DocumentSource for ArxivSource {
    async fn fetch(&self, id: &str) -> Result<SourceDocument, IngestError> {
        let article = self.ensure(id).await?;
        let mut doc = SourceDocument::from_path(&article.path).await?;
        doc.source_id = article.id;
        Ok(doc)
    }
}

// ── Path-or-URL resolution ───────────────────────────────────────────────

/// A local path, or a download that lives as long as this value.
#[derive(Debug)]
pub enum ResolvedInput {
    Local(PathBuf),
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or URL to a readable local file.
///
/// URLs are downloaded into a temporary directory that is removed when the
/// returned value is dropped.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, IngestError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        let path = PathBuf::from(input);
        if !path.is_file() {
            return Err(IngestError::Source {
                input: input.to_string(),
                reason: "file not found".into(),
            });
        }
        Ok(ResolvedInput::Local(path))
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, IngestError> {
    info!("Downloading {}", url);
    let fail = |reason: String| IngestError::Source {
        input: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| fail(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            fail(format!("timed out after {timeout_secs}s"))
        } else {
            fail(e.to_string())
        }
    })?;
    if !response.status().is_success() {
        return Err(fail(format!("HTTP {}", response.status())));
    }

    let filename = filename_from_url(url);
    let bytes = response.bytes().await.map_err(|e| fail(e.to_string()))?;
    if let Some(doc_type) = DocumentType::from_path(Path::new(&filename)) {
        check_magic(url, doc_type, &bytes)?;
    }

    let temp_dir = TempDir::new().map_err(|e| IngestError::Internal(format!("tempdir: {e}")))?;
    let path = temp_dir.path().join(&filename);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| IngestError::Store {
            path: path.clone(),
            source: e,
        })?;

    debug!("Downloaded {} bytes to {}", bytes.len(), path.display());
    Ok(ResolvedInput::Downloaded {
        path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of the URL when it has an extension.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(last) = parsed.path_segments().and_then(|mut s| s.next_back()) {
            if !last.is_empty() && last.contains('.') {
                return last.to_string();
            }
        }
    }
    "downloaded.pdf".to_string()
}

fn check_magic(input: &str, document_type: DocumentType, bytes: &[u8]) -> Result<(), IngestError> {
    if document_type == DocumentType::Pdf && !bytes.starts_with(PDF_MAGIC) {
        let head = &bytes[..bytes.len().min(4)];
        return Err(IngestError::Source {
            input: input.to_string(),
            reason: format!("not a PDF (first bytes: {head:?})"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://arxiv.org/pdf/2408.09869"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn url_filename() {
        assert_eq!(filename_from_url("https://x.org/a/paper.pdf"), "paper.pdf");
        assert_eq!(filename_from_url("https://x.org/a/2408.09869"), "2408.09869");
        assert_eq!(filename_from_url("https://x.org/"), "downloaded.pdf");
    }

    #[tokio::test]
    async fn local_file_infers_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "# hi").unwrap();

        let source = LocalFileSource::with_root(dir.path());
        let doc = source.fetch("notes.md").await.unwrap();
        assert_eq!(doc.document_type, DocumentType::Md);
        assert_eq!(doc.source_name, "notes.md");
        assert_eq!(doc.bytes, b"# hi");
    }

    #[tokio::test]
    async fn fake_pdf_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.pdf");
        std::fs::write(&path, "<html>rate limited</html>").unwrap();

        let err = SourceDocument::from_path(&path).await.unwrap_err();
        assert!(err.to_string().contains("not a PDF"), "got: {err}");
    }

    #[tokio::test]
    async fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.xyz");
        std::fs::write(&path, "data").unwrap();
        assert!(matches!(
            SourceDocument::from_path(&path).await,
            Err(IngestError::Source { .. })
        ));
    }

    #[tokio::test]
    async fn missing_local_input() {
        assert!(resolve_input("/definitely/not/here.pdf", 5).await.is_err());
    }

    #[tokio::test]
    async fn empty_file_cannot_become_a_spec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "").unwrap();
        let doc = SourceDocument::from_path(&path).await.unwrap();
        assert!(matches!(
            doc.into_spec(TracingOptions::default()),
            Err(IngestError::EmptyPayload { .. })
        ));
    }

    #[tokio::test]
    async fn arxiv_source_uses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2408.09869.pdf"), b"%PDF-1.5 body").unwrap();

        let source = ArxivSource::new(dir.path());
        let doc = source.fetch("https://arxiv.org/abs/2408.09869").await.unwrap();
        assert_eq!(doc.source_id, "2408.09869");
        assert_eq!(doc.document_type, DocumentType::Pdf);
    }
}
