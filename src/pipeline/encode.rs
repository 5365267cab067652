//! Image encoding: `DynamicImage` → JPEG or PNG bytes for the page unit.
//!
//! Base64 wrapping happens at request time in [`super::inference`], so page
//! units carry the compact binary form.

use crate::config::ImageEncoding;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page in the configured format.
///
/// JPEG has no alpha channel, so the page is flattened to RGB first; pdfium
/// renders an opaque white background anyway.
pub fn encode_page(img: &DynamicImage, format: ImageEncoding) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    match format {
        ImageEncoding::Png => {
            img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        }
        ImageEncoding::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)?;
        }
    }
    debug!("Encoded {}x{} page → {} bytes", img.width(), img.height(), buf.len());
    Ok(buf)
}
