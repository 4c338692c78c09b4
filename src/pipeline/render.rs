//! Rasterisation: turn a resolved input into page images on disk.
//!
//! Every page ends up both decoded (for cropping figures) and as a PNG file
//! (for path-based engines such as the ollama CLI). PDF pages are rendered
//! with pdfium at `dpi / 72` scale and written as `page_N.png` into a
//! scratch `TempDir` owned by the [`SourceDocument`]. An image input is its
//! own single page and is read in place.
//!
//! pdfium and the PNG codec are CPU-bound and pdfium is not async-safe, so
//! all of this runs inside `tokio::task::spawn_blocking`.

use crate::config::{ConversionConfig, PageSelection};
use crate::error::Ocr2MdError;
use crate::pipeline::input::{InputKind, ResolvedInput};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// One page image, decoded and on disk.
#[derive(Debug, Clone)]
pub struct SourcePage {
    /// 1-indexed page number within the source document.
    pub index: usize,
    pub image: DynamicImage,
    pub path: PathBuf,
}

/// The selected pages of one source.
#[derive(Debug)]
pub struct SourceDocument {
    pub name: String,
    /// Page count of the whole source, selected or not.
    pub total_pages: usize,
    pub pages: Vec<SourcePage>,
    _scratch: Option<TempDir>,
}

/// Rasterise or decode the selected pages of `input`.
pub async fn load_source(
    input: &ResolvedInput,
    config: &ConversionConfig,
) -> Result<SourceDocument, Ocr2MdError> {
    let path = input.path().to_path_buf();
    let name = input.name().to_string();
    let kind = input.kind();
    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;
    let selection = config.pages.clone();

    tokio::task::spawn_blocking(move || match kind {
        InputKind::Pdf => render_pdf_blocking(&path, name, dpi, max_pixels, &selection),
        InputKind::Image => load_image_blocking(&path, name, &selection),
    })
    .await
    .map_err(|e| Ocr2MdError::Internal(format!("Render task panicked: {}", e)))?
}

/// Write already-decoded page images to a scratch dir as `page_N.png`.
///
/// Pages are numbered from 1 in the order given.
pub async fn stage_images(
    name: &str,
    images: Vec<DynamicImage>,
) -> Result<SourceDocument, Ocr2MdError> {
    let name = name.to_string();
    tokio::task::spawn_blocking(move || {
        let scratch = scratch_dir()?;
        let total_pages = images.len();
        let pages = images
            .into_iter()
            .enumerate()
            .map(|(i, image)| write_page(scratch.path(), i + 1, image))
            .collect::<Result<Vec<_>, _>>()?;
        Ok::<_, Ocr2MdError>(SourceDocument {
            name,
            total_pages,
            pages,
            _scratch: Some(scratch),
        })
    })
    .await
    .map_err(|e| Ocr2MdError::Internal(format!("Staging task panicked: {}", e)))?
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` first, then the working directory,
/// then the system library.
pub fn bind_pdfium() -> Result<Pdfium, Ocr2MdError> {
    if let Ok(lib) = std::env::var("PDFIUM_LIB_PATH") {
        if !lib.is_empty() {
            let bindings = Pdfium::bind_to_library(&lib)
                .map_err(|e| Ocr2MdError::PdfiumBindingFailed(format!("{lib}: {e:?}")))?;
            return Ok(Pdfium::new(bindings));
        }
    }

    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Ocr2MdError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn render_pdf_blocking(
    pdf_path: &Path,
    name: String,
    dpi: u32,
    max_pixels: u32,
    selection: &PageSelection,
) -> Result<SourceDocument, Ocr2MdError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| Ocr2MdError::SourceUnavailable {
            source_name: name.clone(),
            detail: format!("cannot open PDF: {:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let indices = selected_indices(selection, total_pages)?;

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let scratch = scratch_dir()?;
    let mut out = Vec::with_capacity(indices.len());

    for idx in indices {
        let page_num = idx + 1;
        let page = pages
            .get(idx as u16)
            .map_err(|e| Ocr2MdError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            })?;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            Ocr2MdError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} at {} DPI → {}x{} px",
            page_num,
            dpi,
            image.width(),
            image.height()
        );

        out.push(write_page(scratch.path(), page_num, image)?);
    }

    Ok(SourceDocument {
        name,
        total_pages,
        pages: out,
        _scratch: Some(scratch),
    })
}

fn load_image_blocking(
    path: &Path,
    name: String,
    selection: &PageSelection,
) -> Result<SourceDocument, Ocr2MdError> {
    let indices = selected_indices(selection, 1)?;

    let image = image::open(path).map_err(|e| Ocr2MdError::SourceUnavailable {
        source_name: name.clone(),
        detail: format!("cannot decode image: {}", e),
    })?;
    debug!("Decoded {} → {}x{} px", name, image.width(), image.height());

    let pages = if indices.is_empty() {
        Vec::new()
    } else {
        vec![SourcePage {
            index: 1,
            image,
            path: path.to_path_buf(),
        }]
    };

    Ok(SourceDocument {
        name,
        total_pages: 1,
        pages,
        _scratch: None,
    })
}

/// Resolve the selection, failing if an explicit selection matches nothing.
fn selected_indices(
    selection: &PageSelection,
    total_pages: usize,
) -> Result<Vec<usize>, Ocr2MdError> {
    let indices = selection.to_indices(total_pages);
    if indices.is_empty() && *selection != PageSelection::All {
        let page = match selection {
            PageSelection::Single(p) => *p,
            PageSelection::Range(start, _) => *start,
            PageSelection::Set(pages) => pages.first().copied().unwrap_or(0),
            PageSelection::All => 0,
        };
        return Err(Ocr2MdError::PageOutOfRange {
            page,
            total: total_pages,
        });
    }
    Ok(indices)
}

fn scratch_dir() -> Result<TempDir, Ocr2MdError> {
    tempfile::Builder::new()
        .prefix("ocr2md-")
        .tempdir()
        .map_err(|e| Ocr2MdError::Internal(format!("Failed to create temp dir: {}", e)))
}

fn write_page(dir: &Path, page_num: usize, image: DynamicImage) -> Result<SourcePage, Ocr2MdError> {
    let path = dir.join(format!("page_{page_num}.png"));
    image
        .save_with_format(&path, image::ImageFormat::Png)
        .map_err(|e| Ocr2MdError::RasterisationFailed {
            page: page_num,
            detail: format!("cannot write {}: {}", path.display(), e),
        })?;
    Ok(SourcePage {
        index: page_num,
        image,
        path,
    })
}
