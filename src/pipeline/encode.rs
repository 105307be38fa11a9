//! Image encoding helpers: `DynamicImage` → PNG bytes → base64 / data URI.
//!
//! Page images stay PNG end to end. Rasterisers that already emit PNG files
//! (Ghostscript) skip [`png_bytes`]; the pdfium path encodes here.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page as PNG.
pub fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} page → {} PNG bytes", img.width(), img.height(), buf.len());
    Ok(buf)
}

pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// `data:<mime>;base64,<payload>`, as accepted by the OCR and chat APIs.
pub fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, to_base64(bytes))
}
