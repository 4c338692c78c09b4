//! Error types for the deepseek-ocr2md library.
//!
//! Two distinct types reflect two distinct failure modes:
//!
//! * [`Ocr2MdError`] — **Fatal**: the document cannot be produced at all
//!   (missing input, undecodable image, rasterizer failure, OCR engine
//!   failure). Returned as `Err(Ocr2MdError)` from the `convert*` functions.
//!
//! * [`Diagnostic`] — **Non-fatal**: one tag on one page could not be parsed
//!   or embedded. The tag keeps its raw text, the rest of the document is
//!   unaffected, and the diagnostic is attached to
//!   [`crate::output::PageResult`] so callers can surface it as a warning.

use std::ops::Range;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the deepseek-ocr2md library.
#[derive(Debug, Error)]
pub enum Ocr2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// The file is neither a PDF nor a supported raster image.
    #[error("Unsupported input '{path}': expected a PDF, PNG or JPEG file")]
    UnsupportedInput { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Source errors ─────────────────────────────────────────────────────
    /// The source document or image could not be opened or decoded.
    #[error("Source '{source_name}' is unavailable: {detail}")]
    SourceUnavailable { source_name: String, detail: String },

    /// pdfium failed to rasterise a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install pdfium system-wide, or set PDFIUM_LIB_PATH=/path/to/libpdfium."
    )]
    PdfiumBindingFailed(String),

    /// The page selection matched no page of the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The OCR engine failed on a page after all retries.
    #[error("OCR failed on page {page} of '{source_name}': {detail}")]
    OcrInvocationFailed {
        page: usize,
        source_name: String,
        detail: String,
    },

    /// The configured OCR engine could not be constructed.
    #[error("OCR engine '{engine}' is not configured.\n{hint}")]
    EngineNotConfigured { engine: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A recoverable problem with a single tag.
///
/// The offending tag is left in the output exactly as the model wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum Diagnostic {
    /// The tag did not match the grammar (bad coordinate list, missing box).
    #[error("Page {page}: malformed tag at bytes {start}..{end}: {detail}")]
    MalformedTag {
        page: usize,
        start: usize,
        end: usize,
        detail: String,
    },

    /// The region was recognised but could not be cropped or encoded.
    #[error("Page {page}: image embedding failed at bytes {start}..{end}: {detail}")]
    EmbeddingFailed {
        page: usize,
        start: usize,
        end: usize,
        detail: String,
    },
}

impl Diagnostic {
    pub fn malformed(page: usize, span: Range<usize>, detail: impl Into<String>) -> Self {
        Diagnostic::MalformedTag {
            page,
            start: span.start,
            end: span.end,
            detail: detail.into(),
        }
    }

    pub fn embedding(page: usize, span: Range<usize>, detail: impl Into<String>) -> Self {
        Diagnostic::EmbeddingFailed {
            page,
            start: span.start,
            end: span.end,
            detail: detail.into(),
        }
    }

    /// 1-indexed page the diagnostic belongs to.
    pub fn page(&self) -> usize {
        match self {
            Diagnostic::MalformedTag { page, .. } | Diagnostic::EmbeddingFailed { page, .. } => {
                *page
            }
        }
    }
}
