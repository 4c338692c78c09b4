//! Figure embedding: turn `image` references into inline PNG crops.
//!
//! For every `<|ref|>image<|/ref|><|det|>[[x1,y1,x2,y2]]<|/det|>` the box is
//! mapped from the model's 1000×1000 canvas onto the page's real pixel grid,
//! the region is cropped out of the page image and the whole tag span is
//! replaced with `![image](data:image/png;base64,…)`.
//!
//! Failures stay local to the tag that caused them. A bad box or a failed
//! encode leaves that tag's text exactly as the model wrote it and records a
//! [`Diagnostic`]; the stripper removes the leftover tag later if cleaning is
//! on.

use crate::error::Diagnostic;
use crate::pipeline::encode;
use crate::pipeline::tags::{self, NormalizedBox, TagMatch, NORMALIZED_CANVAS};
use image::DynamicImage;
use std::ops::Range;
use thiserror::Error;
use tracing::{debug, warn};

/// Alt text used for every embedded figure.
pub const IMAGE_ALT: &str = "image";

/// A crop rectangle in page pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// `(x1, y1, x2, y2)` with exclusive far corner.
    pub fn corners(&self) -> (u32, u32, u32, u32) {
        (self.x, self.y, self.x + self.width, self.y + self.height)
    }
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("region {region} has zero area on a {width}x{height} image")]
    EmptyRegion {
        region: NormalizedBox,
        width: u32,
        height: u32,
    },

    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Result of running the embedder over one page.
#[derive(Debug, Clone, Default)]
pub struct Embedded {
    pub text: String,
    pub embedded: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Map a normalised box onto a `width`×`height` image.
///
/// Each coordinate becomes `round(v / 1000 * dim)` clamped into `[0, dim]`;
/// reversed corners are swapped. Returns `None` when nothing is left to crop.
pub fn resolve_region(region: &NormalizedBox, width: u32, height: u32) -> Option<PixelRect> {
    let (x1, x2) = ordered(scale(region.x1, width), scale(region.x2, width));
    let (y1, y2) = ordered(scale(region.y1, height), scale(region.y2, height));
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(PixelRect {
        x: x1,
        y: y1,
        width: x2 - x1,
        height: y2 - y1,
    })
}

fn scale(value: i64, dimension: u32) -> u32 {
    let px = (value as f64 / NORMALIZED_CANVAS as f64 * f64::from(dimension)).round();
    px.clamp(0.0, f64::from(dimension)) as u32
}

fn ordered(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Crop `region` out of `image` and return it as a PNG `data:` URI.
pub fn crop_to_data_uri(image: &DynamicImage, region: &NormalizedBox) -> Result<String, EmbedError> {
    let rect = resolve_region(region, image.width(), image.height()).ok_or(
        EmbedError::EmptyRegion {
            region: *region,
            width: image.width(),
            height: image.height(),
        },
    )?;
    let crop = image.crop_imm(rect.x, rect.y, rect.width, rect.height);
    Ok(encode::png_data_uri(&crop)?)
}

/// Replace every resolvable `image` reference in `text` with an inline crop.
///
/// `page` is the 1-indexed page number used in diagnostics.
pub fn embed_images(text: &str, image: &DynamicImage, page: usize) -> Embedded {
    let mut out = Embedded {
        text: String::with_capacity(text.len()),
        ..Embedded::default()
    };
    let mut cursor = 0;

    for tag in tags::scan(text) {
        if !tag.is_image_reference() {
            continue;
        }
        let span = tag.span();
        match embed_one(&tag, image) {
            Ok(markup) => {
                out.text.push_str(&text[cursor..span.start]);
                out.text.push_str(&markup);
                cursor = span.end;
                out.embedded += 1;
            }
            Err(diagnostic) => {
                warn!("{}", diagnostic);
                out.diagnostics.push(diagnostic.at(page, span));
            }
        }
    }

    out.text.push_str(&text[cursor..]);
    debug!(
        "Page {}: embedded {} image(s), {} diagnostic(s)",
        page,
        out.embedded,
        out.diagnostics.len()
    );
    out
}

/// A per-tag failure before the page number and span are attached.
enum TagFailure {
    Malformed(String),
    Embedding(String),
}

impl std::fmt::Display for TagFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagFailure::Malformed(d) => write!(f, "Skipping malformed image tag: {d}"),
            TagFailure::Embedding(d) => write!(f, "Failed to extract image: {d}"),
        }
    }
}

impl TagFailure {
    fn at(self, page: usize, span: Range<usize>) -> Diagnostic {
        match self {
            TagFailure::Malformed(d) => Diagnostic::malformed(page, span, d),
            TagFailure::Embedding(d) => Diagnostic::embedding(page, span, d),
        }
    }
}

fn embed_one(tag: &TagMatch<'_>, image: &DynamicImage) -> Result<String, TagFailure> {
    let coords = match tag {
        TagMatch::Reference {
            detection: Some(coords),
            ..
        } => *coords,
        _ => {
            return Err(TagFailure::Malformed(
                "image reference has no detection box".into(),
            ))
        }
    };
    let region: NormalizedBox = coords
        .parse()
        .map_err(|e| TagFailure::Malformed(format!("{e}")))?;
    let uri =
        crop_to_data_uri(image, &region).map_err(|e| TagFailure::Embedding(e.to_string()))?;
    Ok(format!("![{IMAGE_ALT}]({uri})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use image::{Rgb, RgbImage};

    fn nb(x1: i64, y1: i64, x2: i64, y2: i64) -> NormalizedBox {
        NormalizedBox { x1, y1, x2, y2 }
    }

    fn page(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 0])
        }))
    }

    fn decode_embedded(markup: &str) -> DynamicImage {
        let b64 = markup
            .strip_prefix("![image](data:image/png;base64,")
            .and_then(|s| s.strip_suffix(')'))
            .expect("inline image markup");
        let bytes = STANDARD.decode(b64).expect("base64");
        image::load_from_memory(&bytes).expect("png")
    }

    #[test]
    fn centre_box_on_square_canvas() {
        let rect = resolve_region(&nb(250, 250, 750, 750), 1000, 1000).unwrap();
        assert_eq!(rect.corners(), (250, 250, 750, 750));
    }

    #[test]
    fn full_canvas_is_full_image() {
        for (w, h) in [(1000, 1000), (1654, 2339), (17, 3)] {
            let rect = resolve_region(&nb(0, 0, 1000, 1000), w, h).unwrap();
            assert_eq!(rect.corners(), (0, 0, w, h));
        }
    }

    #[test]
    fn axes_scale_independently_with_rounding() {
        // 333/1000 * 200 = 66.6 → 67; 500/1000 * 301 = 150.5 → 151
        let rect = resolve_region(&nb(333, 500, 1000, 1000), 200, 301).unwrap();
        assert_eq!(rect.corners(), (67, 151, 200, 301));
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let rect = resolve_region(&nb(-50, -1, 1500, 2000), 400, 300).unwrap();
        assert_eq!(rect.corners(), (0, 0, 400, 300));
    }

    #[test]
    fn reversed_corners_are_swapped() {
        let rect = resolve_region(&nb(750, 750, 250, 250), 1000, 1000).unwrap();
        assert_eq!(rect.corners(), (250, 250, 750, 750));
    }

    #[test]
    fn zero_area_is_rejected() {
        assert_eq!(resolve_region(&nb(100, 100, 100, 900), 1000, 1000), None);
        assert_eq!(resolve_region(&nb(1200, 0, 1500, 1000), 1000, 1000), None);
        // Both ends round to the same pixel on a tiny image.
        assert_eq!(resolve_region(&nb(100, 0, 140, 1000), 10, 10), None);
    }

    #[test]
    fn embeds_cropped_region() {
        let img = page(1000, 1000);
        let text = "Before\n<|ref|>image<|/ref|><|det|>[[250,250,750,750]]<|/det|>\nAfter";
        let out = embed_images(text, &img, 1);
        assert_eq!(out.embedded, 1);
        assert!(out.diagnostics.is_empty());
        assert!(out.text.starts_with("Before\n![image](data:image/png;base64,"));
        assert!(out.text.ends_with(")\nAfter"));

        let markup = out.text.lines().nth(1).unwrap();
        let crop = decode_embedded(markup);
        assert_eq!((crop.width(), crop.height()), (500, 500));
        let expected = img.to_rgb8().get_pixel(250, 250).0;
        assert_eq!(crop.to_rgb8().get_pixel(0, 0).0, expected);
    }

    #[test]
    fn non_image_references_are_left_alone() {
        let img = page(100, 100);
        let text = "<|ref|>table<|/ref|><|det|>[[1,2,3,4]]<|/det|>";
        let out = embed_images(text, &img, 1);
        assert_eq!(out.text, text);
        assert_eq!(out.embedded, 0);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn malformed_coordinates_keep_tag_and_record_diagnostic() {
        let img = page(100, 100);
        let text = "x <|ref|>image<|/ref|><|det|>[[1,2,3]]<|/det|> y";
        let out = embed_images(text, &img, 4);
        assert_eq!(out.text, text);
        assert_eq!(out.diagnostics.len(), 1);
        match &out.diagnostics[0] {
            Diagnostic::MalformedTag {
                page, start, end, ..
            } => {
                assert_eq!(*page, 4);
                assert_eq!(&text[*start..*end], &text[2..text.len() - 2]);
            }
            other => panic!("unexpected diagnostic {other:?}"),
        }
    }

    #[test]
    fn image_reference_without_box_is_malformed() {
        let img = page(100, 100);
        let out = embed_images("<|ref|>image<|/ref|> caption", &img, 1);
        assert_eq!(out.text, "<|ref|>image<|/ref|> caption");
        assert!(matches!(
            out.diagnostics[0],
            Diagnostic::MalformedTag { .. }
        ));
    }

    #[test]
    fn zero_area_keeps_tag_and_records_embedding_failure() {
        let img = page(100, 100);
        let text = "<|ref|>image<|/ref|><|det|>[[10,10,10,90]]<|/det|>";
        let out = embed_images(text, &img, 2);
        assert_eq!(out.text, text);
        assert!(matches!(
            out.diagnostics[0],
            Diagnostic::EmbeddingFailed { page: 2, .. }
        ));
    }

    #[test]
    fn one_bad_tag_does_not_stop_the_next() {
        let img = page(200, 200);
        let text = "<|ref|>image<|/ref|><|det|>[[a,b,c,d]]<|/det|>\n\
                    <|ref|>image<|/ref|><|det|>[[0,0,500,500]]<|/det|>";
        let out = embed_images(text, &img, 1);
        assert_eq!(out.embedded, 1);
        assert_eq!(out.diagnostics.len(), 1);
        assert!(out.text.contains("[[a,b,c,d]]"));
        assert!(out.text.contains("![image](data:image/png;base64,"));
    }

    #[test]
    fn embedding_is_idempotent() {
        let img = page(300, 300);
        let once = embed_images(
            "<|ref|>image<|/ref|><|det|>[[0,0,1000,1000]]<|/det|>",
            &img,
            1,
        );
        let twice = embed_images(&once.text, &img, 1);
        assert_eq!(twice.text, once.text);
        assert_eq!(twice.embedded, 0);
        assert!(twice.diagnostics.is_empty());
    }
}
