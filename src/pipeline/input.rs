//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! Both pdfium and the ollama CLI need a file-system path, so URL inputs
//! and in-memory bytes are written into a `TempDir` that lives exactly as
//! long as the [`ResolvedInput`]. The input kind is decided here, before
//! any decoding, so an unsupported file fails with a clear message instead
//! of a decoder error further down.

use crate::error::Ocr2MdError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF";
const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

/// What kind of source a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Multi-page document, rasterised with pdfium.
    Pdf,
    /// A single PNG or JPEG page.
    Image,
}

/// A local file ready for rasterisation, plus any temp storage backing it.
#[derive(Debug)]
pub struct ResolvedInput {
    path: PathBuf,
    kind: InputKind,
    name: String,
    /// Kept alive so a downloaded file is not removed mid-conversion.
    _temp_dir: Option<TempDir>,
}

impl ResolvedInput {
    /// Path to the file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> InputKind {
        self.kind
    }

    /// File name used in the provenance comment (`<!-- Generated from … -->`).
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Decide the input kind from the file extension, falling back to magic bytes.
pub fn detect_kind(path: &Path, head: &[u8]) -> Option<InputKind> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => return Some(InputKind::Pdf),
        Some("png") | Some("jpg") | Some("jpeg") => return Some(InputKind::Image),
        _ => {}
    }

    if head.starts_with(PDF_MAGIC) {
        Some(InputKind::Pdf)
    } else if head.starts_with(PNG_MAGIC) || head.starts_with(JPEG_MAGIC) {
        Some(InputKind::Image)
    } else {
        None
    }
}

/// Resolve the input string to a local PDF or image file.
///
/// URLs are downloaded to a temporary directory; local paths are checked
/// for existence and read permission.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, Ocr2MdError> {
    if input.trim().is_empty() {
        return Err(Ocr2MdError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(Path::new(input))
    }
}

/// Write `bytes` into a fresh temp dir under `filename` and resolve it.
pub async fn stage_bytes(bytes: &[u8], filename: &str) -> Result<ResolvedInput, Ocr2MdError> {
    let name = sanitize_filename(filename);
    let temp_dir = TempDir::new().map_err(|e| Ocr2MdError::Internal(e.to_string()))?;
    let path = temp_dir.path().join(&name);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| Ocr2MdError::Internal(format!("Failed to write temp file: {}", e)))?;

    let kind = detect_kind(&path, bytes).ok_or_else(|| Ocr2MdError::UnsupportedInput {
        path: PathBuf::from(&name),
    })?;
    debug!("Staged {} bytes as {} ({:?})", bytes.len(), name, kind);

    Ok(ResolvedInput {
        path,
        kind,
        name,
        _temp_dir: Some(temp_dir),
    })
}

/// Resolve a local file path, validating existence and kind.
fn resolve_local(path: &Path) -> Result<ResolvedInput, Ocr2MdError> {
    let path = path.to_path_buf();
    if !path.exists() {
        return Err(Ocr2MdError::FileNotFound { path });
    }
    if path.is_dir() {
        return Err(Ocr2MdError::InvalidInput {
            input: path.display().to_string(),
        });
    }

    let mut head = Vec::with_capacity(8);
    match std::fs::File::open(&path) {
        Ok(f) => {
            // A short or unreadable head just means detection falls back to
            // the extension alone.
            let _ = f.take(8).read_to_end(&mut head);
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Ocr2MdError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(Ocr2MdError::FileNotFound { path });
        }
    }

    let kind = detect_kind(&path, &head).ok_or_else(|| Ocr2MdError::UnsupportedInput {
        path: path.clone(),
    })?;
    let name = display_name(&path);

    debug!("Resolved local {:?}: {}", kind, path.display());
    Ok(ResolvedInput {
        path,
        kind,
        name,
        _temp_dir: None,
    })
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, Ocr2MdError> {
    info!("Downloading from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Ocr2MdError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Ocr2MdError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Ocr2MdError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Ocr2MdError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url);

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            Ocr2MdError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Ocr2MdError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    let resolved = stage_bytes(&bytes, &filename).await?;
    info!("Downloaded {} bytes to: {}", bytes.len(), resolved.path().display());
    Ok(resolved)
}

/// Last path segment of the URL if it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded".to_string()
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Keep only the final component so a caller-supplied name cannot escape
/// the temp dir.
fn sanitize_filename(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "input".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/scan.png"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn kind_from_extension_is_case_insensitive() {
        assert_eq!(detect_kind(Path::new("a.PDF"), b""), Some(InputKind::Pdf));
        assert_eq!(detect_kind(Path::new("a.Png"), b""), Some(InputKind::Image));
        assert_eq!(detect_kind(Path::new("a.jpeg"), b""), Some(InputKind::Image));
        assert_eq!(detect_kind(Path::new("a.JPG"), b""), Some(InputKind::Image));
    }

    #[test]
    fn kind_from_magic_when_extension_is_unknown() {
        assert_eq!(detect_kind(Path::new("blob"), b"%PDF-1.7"), Some(InputKind::Pdf));
        assert_eq!(detect_kind(Path::new("blob.bin"), PNG_MAGIC), Some(InputKind::Image));
        assert_eq!(
            detect_kind(Path::new("blob"), &[0xFF, 0xD8, 0xFF, 0xE0]),
            Some(InputKind::Image)
        );
        assert_eq!(detect_kind(Path::new("notes.txt"), b"hello"), None);
    }

    #[test]
    fn filename_from_url_path() {
        assert_eq!(filename_from_url("https://x.org/a/report.pdf?dl=1"), "report.pdf");
        assert_eq!(filename_from_url("https://x.org/a/"), "downloaded");
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/scan.png"), "scan.png");
        assert_eq!(sanitize_filename(""), "input");
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, Ocr2MdError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn unsupported_local_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "plain text").unwrap();
        let err = resolve_input(path.to_str().unwrap(), 5).await.unwrap_err();
        assert!(matches!(err, Ocr2MdError::UnsupportedInput { .. }));
    }

    #[tokio::test]
    async fn local_image_keeps_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        std::fs::write(&path, PNG_MAGIC).unwrap();
        let resolved = resolve_input(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(resolved.kind(), InputKind::Image);
        assert_eq!(resolved.name(), "scan.png");
        assert_eq!(resolved.path(), path.as_path());
    }

    #[tokio::test]
    async fn staged_bytes_live_in_temp_dir() {
        let resolved = stage_bytes(b"%PDF-1.4\n", "paper.pdf").await.unwrap();
        assert_eq!(resolved.kind(), InputKind::Pdf);
        assert_eq!(resolved.name(), "paper.pdf");
        assert!(resolved.path().exists());
    }
}
