//! Conversion entry points.
//!
//! Every entry point funnels into the same pipeline: load the source pages,
//! read each page with the OCR engine, embed figures and strip tags, then
//! assemble the pages in index order. Only fatal errors come back as
//! `Err`; tag-level problems travel as [`Diagnostic`]s on the output.

use crate::config::ConversionConfig;
use crate::error::{Diagnostic, Ocr2MdError};
use crate::output::{ConversionOutput, ConversionStats, Document, PageResult};
use crate::pipeline::embed::{self, Embedded};
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::ocr::{self, OcrEngine, OcrRequest, RawPage};
use crate::pipeline::render::{self, SourceDocument, SourcePage};
use crate::pipeline::{assemble, postprocess, tags};
use crate::prompts;
use futures::stream::{self, StreamExt, TryStreamExt};
use image::DynamicImage;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert a PDF or image (local path or HTTP/HTTPS URL) to Markdown.
///
/// # Errors
/// Any failure to load the source or to read a page with the OCR engine
/// aborts the whole conversion. Tags that cannot be embedded do not: they
/// are reported through [`ConversionOutput::diagnostics`].
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Ocr2MdError> {
    let input_str = input_str.as_ref();
    info!("Starting conversion: {}", input_str);

    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    convert_resolved(&resolved, config).await
}

/// Convert a file held in memory.
///
/// `filename` names the source in the provenance comment and decides the
/// input kind by extension (magic bytes are checked when it has none).
///
/// # Example
/// ```rust,no_run
/// use deepseek_ocr2md::{convert_from_bytes, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("scan.png")?;
/// let output = convert_from_bytes(&bytes, "scan.png", &ConversionConfig::default()).await?;
/// println!("{}", output.preview());
/// # Ok(())
/// # }
/// ```
pub async fn convert_from_bytes(
    bytes: &[u8],
    filename: &str,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Ocr2MdError> {
    let resolved = input::stage_bytes(bytes, filename).await?;
    convert_resolved(&resolved, config).await
}

/// Convert page images that are already decoded, numbered from 1.
///
/// `config.dpi` and `config.pages` do not apply.
pub async fn convert_pages(
    images: Vec<DynamicImage>,
    source_name: &str,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Ocr2MdError> {
    let total_start = Instant::now();
    let engine = ocr::resolve_engine(config)?;
    let source = render::stage_images(source_name, images).await?;
    run_pipeline(&engine, source, config, total_start, 0).await
}

/// Convert and write the Markdown to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Ocr2MdError> {
    let output = convert(input_str, config).await?;
    write_atomic(output_path.as_ref(), &output.markdown).await?;
    Ok(output)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Ocr2MdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Ocr2MdError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_str, config))
}

/// Embed figures, then strip tags and normalise. A no-op when `clean` is off.
pub fn clean_page(raw: &RawPage<'_>, clean: bool) -> Embedded {
    if !clean {
        return Embedded {
            text: raw.text.clone(),
            ..Embedded::default()
        };
    }
    if !tags::contains_tags(&raw.text) {
        return Embedded {
            text: postprocess::clean_text(&raw.text),
            ..Embedded::default()
        };
    }
    let embedded = embed::embed_images(&raw.text, raw.source_image, raw.index);
    Embedded {
        text: postprocess::clean_text(&embedded.text),
        ..embedded
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn convert_resolved(
    resolved: &ResolvedInput,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Ocr2MdError> {
    let total_start = Instant::now();

    // Fail on a bad engine config before paying for rasterisation.
    let engine = ocr::resolve_engine(config)?;

    let render_start = Instant::now();
    let source = render::load_source(resolved, config).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!(
        "Loaded {} of {} pages from {} in {}ms",
        source.pages.len(),
        source.total_pages,
        source.name,
        render_duration_ms
    );

    run_pipeline(&engine, source, config, total_start, render_duration_ms).await
}

async fn run_pipeline(
    engine: &Arc<dyn OcrEngine>,
    source: SourceDocument,
    config: &ConversionConfig,
    total_start: Instant,
    render_duration_ms: u64,
) -> Result<ConversionOutput, Ocr2MdError> {
    let selected = source.pages.len();
    if config.clean && !prompts::is_grounded(&config.prompt) {
        warn!("Prompt has no <|grounding|> token: the model will emit no boxes to embed");
    }
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(selected);
    }

    let ocr_start = Instant::now();
    // The first fatal error drops the remaining futures, which kills any
    // child process still running.
    let by_index: BTreeMap<usize, PageResult> = stream::iter(source.pages.iter())
        .map(|page| process_page(engine, page, &source.name, selected, config))
        .buffer_unordered(config.concurrency)
        .try_collect()
        .await?;
    let ocr_duration_ms = ocr_start.elapsed().as_millis() as u64;

    let document = Document::new(source.name.clone(), by_index.into_values().collect());
    let markdown = assemble::assemble_document(&document);

    let stats = ConversionStats {
        total_pages: source.total_pages,
        processed_pages: document.pages.len(),
        embedded_images: document.pages.iter().map(|p| p.embedded_images).sum(),
        diagnostics: document.diagnostics().count(),
        total_retries: document.pages.iter().map(|p| p.retries).sum(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        render_duration_ms,
        ocr_duration_ms,
    };

    info!(
        "Conversion complete: {} pages, {} images embedded, {} diagnostics, {}ms total",
        stats.processed_pages, stats.embedded_images, stats.diagnostics, stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(selected, stats.embedded_images);
    }

    Ok(ConversionOutput {
        markdown,
        document,
        stats,
    })
}

async fn process_page(
    engine: &Arc<dyn OcrEngine>,
    page: &SourcePage,
    source_name: &str,
    total: usize,
    config: &ConversionConfig,
) -> Result<(usize, PageResult), Ocr2MdError> {
    let start = Instant::now();
    if let Some(ref cb) = config.progress_callback {
        cb.on_page_start(page.index, total);
    }

    let request = OcrRequest {
        page: page.index,
        image_path: &page.path,
        image: &page.image,
        prompt: &config.prompt,
    };

    let recognition = match ocr::recognize_page(engine, &request, config).await {
        Ok(r) => r,
        Err(e) => {
            let detail = e.to_string();
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_error(page.index, total, &detail);
            }
            return Err(Ocr2MdError::OcrInvocationFailed {
                page: page.index,
                source_name: source_name.to_string(),
                detail,
            });
        }
    };

    let raw = RawPage {
        index: page.index,
        text: recognition.text,
        source_image: &page.image,
    };
    let cleaned = clean_page(&raw, config.clean);
    debug!(
        "Page {}: {} bytes raw → {} bytes, {} images, {} diagnostics",
        page.index,
        raw.text.len(),
        cleaned.text.len(),
        cleaned.embedded,
        cleaned.diagnostics.len()
    );

    if let Some(ref cb) = config.progress_callback {
        cleaned.diagnostics.iter().for_each(|d: &Diagnostic| cb.on_diagnostic(d));
        cb.on_page_complete(page.index, total, cleaned.text.len());
    }

    Ok((
        page.index,
        PageResult {
            index: page.index,
            markdown: cleaned.text,
            embedded_images: cleaned.embedded,
            diagnostics: cleaned.diagnostics,
            duration_ms: start.elapsed().as_millis() as u64,
            retries: recognition.retries,
        },
    ))
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), Ocr2MdError> {
    let write_err = |e| Ocr2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ocr::OcrEngineError;
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};

    struct Echo;

    #[async_trait]
    impl OcrEngine for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn recognize(&self, request: &OcrRequest<'_>) -> Result<String, OcrEngineError> {
            Ok(format!(
                "<|grounding|># Page {}\n\n\n<|ref|>image<|/ref|><|det|>[[0,0,1000,1000]]<|/det|>\nwhere \\(x\\)",
                request.page
            ))
        }
    }

    fn canvas(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([0, 0, 255, 255])))
    }

    fn config() -> ConversionConfig {
        ConversionConfig::builder()
            .engine(Arc::new(Echo))
            .build()
            .unwrap()
    }

    #[test]
    fn clean_off_passes_raw_text_through() {
        let img = canvas(10, 10);
        let raw = RawPage {
            index: 1,
            text: "<|ref|>image<|/ref|><|det|>[[1,2,3]]<|/det|>\n\n\n\\(x\\)".into(),
            source_image: &img,
        };
        let out = clean_page(&raw, false);
        assert_eq!(out.text, raw.text);
        assert_eq!(out.embedded, 0);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn clean_on_embeds_then_strips() {
        let img = canvas(10, 10);
        let raw = RawPage {
            index: 4,
            text: "<|ref|>image<|/ref|><|det|>[[0,0,500,500]]<|/det|> <|ref|>image<|/ref|><|det|>[[1,2,3]]<|/det|>".into(),
            source_image: &img,
        };
        let out = clean_page(&raw, true);
        assert!(out.text.starts_with("![image](data:image/png;base64,"));
        assert!(!out.text.contains("<|"));
        assert_eq!(out.embedded, 1);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].page(), 4);
    }

    #[tokio::test]
    async fn convert_pages_runs_the_whole_pipeline() {
        let output = convert_pages(vec![canvas(8, 8)], "slide.png", &config())
            .await
            .unwrap();
        assert!(output
            .markdown
            .starts_with("<!-- Generated from slide.png -->\n\n# Page 1\n\n![image](data:image/png;base64,"));
        assert!(output.markdown.ends_with("where $x$\n"));
        assert!(!output.markdown.contains("<!-- Page"));
        assert_eq!(output.stats.embedded_images, 1);
        assert_eq!(output.stats.processed_pages, 1);
    }

    #[tokio::test]
    async fn convert_to_file_writes_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scan.png");
        canvas(6, 6).save(&input).unwrap();
        let out_path = dir.path().join("nested").join("scan.md");

        let output = convert_to_file(input.to_str().unwrap(), &out_path, &config())
            .await
            .unwrap();
        let written = std::fs::read_to_string(&out_path).unwrap();
        assert_eq!(written, output.markdown);
        assert!(!out_path.with_extension("md.tmp").exists());
    }
}
