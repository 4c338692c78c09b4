//! Image encoding: `DynamicImage` → PNG bytes → base64.
//!
//! Two consumers share this stage. Figure crops are inlined into the
//! Markdown as `data:` URIs so the document never points at a file that
//! will not exist on the reader's machine, and whole pages are wrapped in
//! `ImageData` for HTTP vision providers. PNG is used for both because it is
//! lossless: JPEG ringing around glyphs hurts OCR and looks poor in figures.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// MIME type of every image this crate produces.
pub const PNG_MIME: &str = "image/png";

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode an image as a self-contained `data:image/png;base64,…` URI.
pub fn png_data_uri(img: &DynamicImage) -> Result<String, image::ImageError> {
    let png = encode_png(img)?;
    let b64 = STANDARD.encode(&png);
    debug!(
        "Encoded {}x{} crop → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );
    Ok(format!("data:{PNG_MIME};base64,{b64}"))
}

/// Encode a whole page for a vision provider request.
///
/// `detail: "high"` keeps fine print legible for providers that tile images.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let b64 = STANDARD.encode(encode_png(img)?);
    debug!("Encoded page → {} bytes base64", b64.len());
    Ok(ImageData::new(b64, PNG_MIME).with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn encode_small_page() {
        let data = encode_page(&red(10, 10)).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(!decoded.is_empty());
    }

    #[test]
    fn data_uri_round_trips_dimensions() {
        let uri = png_data_uri(&red(7, 3)).expect("encode");
        let b64 = uri
            .strip_prefix("data:image/png;base64,")
            .expect("data uri prefix");
        let bytes = STANDARD.decode(b64).expect("valid base64");
        let back = image::load_from_memory(&bytes).expect("decodable png");
        assert_eq!((back.width(), back.height()), (7, 3));
    }
}
