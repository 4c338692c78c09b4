//! Progress-callback trait for per-page conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`]. The CLI
//! drives its progress bar from these events; library callers can forward
//! them anywhere.
//!
//! # Example
//!
//! ```rust
//! use deepseek_ocr2md::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, markdown_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({} bytes)", page_num, total_pages, markdown_len);
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::Diagnostic;
use std::sync::Arc;

/// Called by the conversion pipeline as it processes each page.
///
/// All methods have no-op defaults. With `concurrency > 1` page events
/// arrive from several tasks at once, so shared state needs `Mutex` or
/// atomics.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once after the source is rasterised, before any OCR call.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the OCR engine is invoked for a page.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called for every tag that could not be embedded.
    ///
    /// The tag stays in the page text (or is stripped); conversion goes on.
    fn on_diagnostic(&self, diagnostic: &Diagnostic) {
        let _ = diagnostic;
    }

    /// Called when a page has been read and cleaned.
    ///
    /// `markdown_len` is the byte length of the page's final text.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, markdown_len: usize) {
        let _ = (page_num, total_pages, markdown_len);
    }

    /// Called when OCR for a page fails after all retries.
    ///
    /// The conversion aborts right after this event.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page has been read successfully.
    fn on_conversion_complete(&self, total_pages: usize, embedded_images: usize) {
        let _ = (total_pages, embedded_images);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
