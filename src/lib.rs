//! # deepseek-ocr2md
//!
//! Convert PDFs and scanned images to Markdown with DeepSeek-OCR.
//!
//! DeepSeek-OCR does not return clean Markdown. In grounding mode it wraps
//! every layout element in tags such as
//! `<|ref|>image<|/ref|><|det|>[[x1,y1,x2,y2]]<|/det|>`, with coordinates on
//! a 0–1000 grid. This crate turns that output into a self-contained
//! document: figure boxes are cropped from the page and inlined as base64
//! PNGs, the remaining tags are stripped, LaTeX delimiters are rewritten to
//! `$`/`$$`, and pages are joined in order.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / PNG / JPEG
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Render    rasterise pages via pdfium (spawn_blocking)
//!  ├─ 3. OCR       `ollama run deepseek-ocr` or an edgequake-llm provider
//!  ├─ 4. Embed     crop `image` boxes → `![image](data:image/png;base64,…)`
//!  ├─ 5. Clean     strip tags, rewrite math, collapse blank lines
//!  └─ 6. Assemble  provenance comment + `<!-- Page N -->` markers
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deepseek_ocr2md::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Needs `ollama pull deepseek-ocr` and pdfium for PDF inputs.
//!     let config = ConversionConfig::default();
//!     let output = convert("paper.pdf", &config).await?;
//!     println!("{}", output.preview());
//!     for d in output.diagnostics() {
//!         eprintln!("warning: {d}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocr2md` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! ```toml
//! deepseek-ocr2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod preview;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, OcrBackend, PageSelection};
pub use convert::{
    clean_page, convert, convert_from_bytes, convert_pages, convert_sync, convert_to_file,
};
pub use error::{Diagnostic, Ocr2MdError};
pub use output::{ConversionOutput, ConversionStats, Document, PageResult};
pub use pipeline::assemble::assemble_document;
pub use pipeline::embed::{embed_images, Embedded};
pub use pipeline::ocr::{
    OcrEngine, OcrEngineError, OcrRequest, OllamaCliEngine, ProviderEngine, RawPage,
};
pub use pipeline::postprocess::clean_text;
pub use preview::redact_embedded_images;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
