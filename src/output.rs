//! Result types returned by the conversion entry points.
//!
//! All of them derive `Serialize` so the CLI's `--json` mode is a plain
//! `serde_json::to_string_pretty` of [`ConversionOutput`].

use crate::error::Diagnostic;
use crate::preview;
use serde::{Deserialize, Serialize};

/// One page after OCR, embedding and cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number within the source.
    pub index: usize,
    /// Final page text. Raw model output when cleanup is off.
    pub markdown: String,
    /// Figures inlined as `data:` URIs on this page.
    pub embedded_images: usize,
    /// Tags on this page that could not be parsed or embedded.
    pub diagnostics: Vec<Diagnostic>,
    /// Wall-clock time for OCR plus cleanup.
    pub duration_ms: u64,
    /// OCR retries needed before the page succeeded.
    pub retries: u32,
}

/// An ordered sequence of pages plus the source they came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub source_name: String,
    /// Sorted by `index`.
    pub pages: Vec<PageResult>,
}

impl Document {
    pub fn new(source_name: impl Into<String>, mut pages: Vec<PageResult>) -> Self {
        pages.sort_by_key(|p| p.index);
        Self {
            source_name: source_name.into(),
            pages,
        }
    }

    /// Every diagnostic in page order.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.pages.iter().flat_map(|p| p.diagnostics.iter())
    }
}

/// Aggregate numbers for one conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Pages in the source, selected or not.
    pub total_pages: usize,
    /// Pages that went through OCR.
    pub processed_pages: usize,
    pub embedded_images: usize,
    pub diagnostics: usize,
    pub total_retries: u32,
    pub total_duration_ms: u64,
    pub render_duration_ms: u64,
    pub ocr_duration_ms: u64,
}

/// Output of a successful conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// The assembled Markdown document.
    pub markdown: String,
    pub document: Document,
    pub stats: ConversionStats,
}

impl ConversionOutput {
    /// The Markdown with every inline image replaced by a short placeholder.
    pub fn preview(&self) -> String {
        preview::redact_embedded_images(&self.markdown)
    }

    /// Shorthand for `self.document.diagnostics()`.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.document.diagnostics()
    }
}
