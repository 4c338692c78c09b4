//! Pipeline stages for OCR-to-Markdown conversion.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested on its own and the OCR engine can be swapped without touching
//! the text stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ ocr ──▶ embed ──▶ postprocess ──▶ assemble
//! (URL/path) (pdfium)  (model)  (crops)    (strip tags)    (document)
//! ```
//!
//! 1. [`input`]  — canonicalise the path or URL to a local PDF or image
//! 2. [`render`] — rasterise selected pages to `page_N.png` on `spawn_blocking`
//! 3. [`ocr`]    — run DeepSeek-OCR on each page with timeout and retries
//! 4. [`embed`]  — crop every `image` reference and inline it as a PNG
//!    `data:` URI, using [`tags`] to find the boxes
//! 5. [`postprocess`] — drop remaining tag syntax, rewrite math delimiters,
//!    collapse blank lines
//! 6. [`assemble`] — join pages in index order under a provenance comment
//!
//! [`encode`] is shared by [`embed`] (figure crops) and [`ocr`] (whole pages
//! for HTTP providers).

pub mod assemble;
pub mod embed;
pub mod encode;
pub mod input;
pub mod ocr;
pub mod postprocess;
pub mod render;
pub mod tags;
