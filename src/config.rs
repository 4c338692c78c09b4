//! Configuration types for OCR-to-Markdown conversion.
//!
//! Every knob lives in [`ConversionConfig`], built via its
//! [`ConversionConfigBuilder`] and passed by reference to every entry point.
//! Nothing is read from globals: two conversions with different prompts or
//! DPI can run side by side in the same process.

use crate::error::Ocr2MdError;
use crate::pipeline::ocr::OcrEngine;
use crate::progress::ProgressCallback;
use crate::prompts::DEFAULT_PROMPT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lowest DPI accepted for rasterising PDF pages.
pub const MIN_DPI: u32 = 72;
/// Highest DPI accepted for rasterising PDF pages.
pub const MAX_DPI: u32 = 600;

/// Configuration for a conversion.
///
/// # Example
/// ```rust
/// use deepseek_ocr2md::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .dpi(300)
///     .clean(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 300);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Prompt sent with every page. Default: [`DEFAULT_PROMPT`].
    ///
    /// Figures can only be embedded when the prompt asks for grounding
    /// (`<|grounding|>`); without it the model emits no boxes.
    pub prompt: String,

    /// Rendering DPI for PDF pages. Range: 72–600. Default: 200.
    ///
    /// Ignored for image inputs, which are read at their native resolution.
    pub dpi: u32,

    /// Embed figures and strip tag syntax. Default: true.
    ///
    /// When false the raw model output is assembled unchanged.
    pub clean: bool,

    /// Pages in flight at once. Default: 1.
    ///
    /// A local model usually serialises requests anyway; raise this for
    /// remote providers.
    pub concurrency: usize,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Longest edge of a rasterised page in pixels. Default: 8000.
    ///
    /// A 600-DPI render of a large-format page can otherwise exhaust memory.
    pub max_rendered_pixels: u32,

    /// Which OCR engine to build when `engine` is not set.
    pub backend: OcrBackend,

    /// Pre-constructed engine. Takes precedence over `backend`.
    pub engine: Option<Arc<dyn OcrEngine>>,

    /// Retries per page after a failed OCR call. Default: 0.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled on each retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Timeout for a single OCR call in seconds. Default: 600.
    ///
    /// DeepSeek-OCR on CPU can take minutes for a dense page.
    pub ocr_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Receives per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            dpi: 200,
            clean: true,
            concurrency: 1,
            pages: PageSelection::default(),
            max_rendered_pixels: 8000,
            backend: OcrBackend::default(),
            engine: None,
            max_retries: 0,
            retry_backoff_ms: 500,
            ocr_timeout_secs: 600,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("prompt", &self.prompt)
            .field("dpi", &self.dpi)
            .field("clean", &self.clean)
            .field("concurrency", &self.concurrency)
            .field("pages", &self.pages)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("backend", &self.backend)
            .field("engine", &self.engine.as_ref().map(|e| e.name().to_string()))
            .field("max_retries", &self.max_retries)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = prompt.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(MIN_DPI, MAX_DPI);
        self
    }

    pub fn clean(mut self, v: bool) -> Self {
        self.config.clean = v;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn backend(mut self, backend: OcrBackend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.engine = Some(engine);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Ocr2MdError> {
        let c = &self.config;
        if c.dpi < MIN_DPI || c.dpi > MAX_DPI {
            return Err(Ocr2MdError::InvalidConfig(format!(
                "DPI must be {MIN_DPI}–{MAX_DPI}, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(Ocr2MdError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.prompt.trim().is_empty() {
            return Err(Ocr2MdError::InvalidConfig("Prompt must not be empty".into()));
        }
        if c.ocr_timeout_secs == 0 {
            return Err(Ocr2MdError::InvalidConfig(
                "OCR timeout must be at least 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How to reach DeepSeek-OCR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OcrBackend {
    /// `ollama run <model>` as a child process (default).
    OllamaCli { binary: String, model: String },
    /// Any `edgequake-llm` vision provider, e.g. `ollama` over HTTP.
    Provider { name: String, model: String },
}

impl Default for OcrBackend {
    fn default() -> Self {
        OcrBackend::OllamaCli {
            binary: "ollama".to_string(),
            model: "deepseek-ocr".to_string(),
        }
    }
}

/// Specifies which pages of a PDF to convert.
///
/// Image inputs have exactly one page; any selection that excludes page 1
/// yields an empty document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert all pages (default).
    #[default]
    All,
    /// Convert a single page (1-indexed).
    Single(usize),
    /// Convert a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Convert specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}
