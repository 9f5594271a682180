//! # arxiv-fetch
//!
//! Resolve [arXiv](https://arxiv.org) identifiers and download article PDFs
//! into a local directory, skipping anything that is already on disk.
//!
//! ## How it works
//!
//! On a call to [`ensure_article`]:
//!
//! 1. Parses the input, either a bare ID (`2401.01234`, `2401.01234v2`) or an
//!    `arxiv.org/abs/…` / `arxiv.org/pdf/…` URL, into a canonical ID.
//! 2. Derives the on-disk file name from the input (`<basename>.pdf`).
//! 3. If that file exists in the target directory, returns immediately.
//! 4. Otherwise downloads `https://arxiv.org/pdf/{id}` and writes it
//!    atomically (`.part` file + rename).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use arxiv_fetch::{ensure_article, parse_id};
//! use std::path::Path;
//!
//! assert_eq!(parse_id("https://arxiv.org/abs/1706.03762v7").unwrap(), "1706.03762v7");
//!
//! let article = ensure_article("1706.03762", Path::new("sources/pdfs"), None)
//!     .expect("download failed");
//! println!("{} (skipped: {})", article.path.display(), article.skipped);
//! ```
//!
//! ## Environment variable overrides
//!
//! - `ARXIV_FETCH_CACHE_DIR`: override the default cache directory returned
//!   by [`article_cache_dir`].
//! - `ARXIV_PDF_BASE_URL`: override the PDF mirror (defaults to arxiv.org).

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Base URL that article PDFs are downloaded from.
pub const ARXIV_PDF_BASE: &str = "https://arxiv.org/pdf";

static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}\.\d{4,5}(v\d+)?$").expect("static regex"));

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:www\.)?arxiv\.org/(abs|pdf)/(\d{4}\.\d{4,5})(v\d+)?(\.pdf)?$")
        .expect("static regex")
});

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by arxiv-fetch operations.
#[derive(Error, Debug)]
pub enum ArxivError {
    /// The input is neither an arXiv ID nor an arXiv abs/pdf URL.
    #[error("The provided input '{input}' does not match the expected URL or ID format.")]
    InvalidId { input: String },

    /// Could not create the target directory.
    #[error("Cache directory error: {0}")]
    CacheDir(#[source] std::io::Error),

    /// Network download failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// The downloaded body was not a PDF.
    #[error("Response for '{id}' is not a PDF (first bytes: {magic:?})")]
    NotAPdf { id: String, magic: Vec<u8> },

    /// Writing the article to disk failed.
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An article that is present on disk after [`ensure_article`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    /// Canonical arXiv ID, including the version suffix when one was given.
    pub id: String,
    /// Location of the PDF.
    pub path: PathBuf,
    /// `true` when the file already existed and no request was made.
    pub skipped: bool,
}

// ── Identifier parsing ───────────────────────────────────────────────────────

/// Parse an arXiv ID from either a bare ID or an arXiv abs/pdf URL.
pub fn parse_id(input: &str) -> Result<String, ArxivError> {
    let input = input.trim();
    if ID_PATTERN.is_match(input) {
        return Ok(input.to_string());
    }

    if let Some(caps) = URL_PATTERN.captures(input) {
        let base = &caps[2];
        let version = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        return Ok(format!("{base}{version}"));
    }

    Err(ArxivError::InvalidId {
        input: input.to_string(),
    })
}

/// PDF download URL for a canonical ID.
pub fn pdf_url(id: &str) -> String {
    let base = std::env::var("ARXIV_PDF_BASE_URL").unwrap_or_else(|_| ARXIV_PDF_BASE.to_string());
    format!("{}/{}", base.trim_end_matches('/'), id)
}

/// File name used on disk for an input: its last path segment, with `.pdf`
/// appended when missing.
pub fn file_name_for(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if base.ends_with(".pdf") {
        base.to_string()
    } else {
        format!("{base}.pdf")
    }
}

// ── Cache directory resolution ───────────────────────────────────────────────

/// Default directory for downloaded articles.
///
/// - **macOS**: `~/Library/Caches/eq-ingest/arxiv/`
/// - **Linux**: `~/.cache/eq-ingest/arxiv/`
/// - **Windows**: `%LOCALAPPDATA%\eq-ingest\arxiv\`
///
/// Override by setting `ARXIV_FETCH_CACHE_DIR`.
pub fn article_cache_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var("ARXIV_FETCH_CACHE_DIR") {
        return PathBuf::from(override_dir);
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("eq-ingest").join("arxiv")
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Ensures the article named by `input` is present in `dir`.
///
/// `on_progress` receives `(bytes_downloaded, total_size_option)` during the
/// download. Pass `None` to suppress progress callbacks.
///
/// Blocking: call from `spawn_blocking` / `block_in_place` in async code.
pub fn ensure_article(
    input: &str,
    dir: &Path,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<Article, ArxivError> {
    let id = parse_id(input)?;
    let path = dir.join(file_name_for(input));

    if path.exists() {
        return Ok(Article {
            id,
            path,
            skipped: true,
        });
    }

    std::fs::create_dir_all(dir).map_err(ArxivError::CacheDir)?;

    let bytes = download_bytes(&pdf_url(&id), on_progress)?;
    if !bytes.starts_with(b"%PDF") {
        return Err(ArxivError::NotAPdf {
            id,
            magic: bytes.iter().take(4).copied().collect(),
        });
    }

    write_atomic(&path, &bytes)?;

    Ok(Article {
        id,
        path,
        skipped: false,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────────

/// Whole-request deadline for one article download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound on the buffer reserved from `Content-Length`.
const MAX_PREALLOC: u64 = 64 << 20;

fn initial_capacity(content_length: Option<u64>) -> usize {
    content_length.unwrap_or(2 * 1024 * 1024).min(MAX_PREALLOC) as usize
}

/// Streams a URL into a `Vec<u8>`, calling `on_progress` every 64 KiB.
fn download_bytes(
    url: &str,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<Vec<u8>, ArxivError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("arxiv-fetch/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .connect_timeout(Duration::from_secs(30))
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| ArxivError::Download(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| ArxivError::Download(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(ArxivError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let total = response.content_length();
    let mut buf = Vec::with_capacity(initial_capacity(total));

    let mut stream = response;
    let mut chunk = vec![0u8; 64 * 1024]; // 64 KiB
    let mut downloaded: u64 = 0;

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                downloaded += n as u64;
                if let Some(cb) = on_progress {
                    cb(downloaded, total);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(ArxivError::Download(format!("Read error: {e}")));
            }
        }
    }

    Ok(buf)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArxivError> {
    let tmp = path.with_extension("pdf.part");
    let write_err = |source| ArxivError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut file = std::fs::File::create(&tmp).map_err(write_err)?;
    file.write_all(bytes).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    std::fs::rename(&tmp, path).map_err(write_err)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
