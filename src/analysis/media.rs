//! Re-encode extracted images as PNG for display.
//!
//! The service returns images in whatever format the source document
//! embedded (JPEG, PNG, ...). Writing everything out as PNG gives a single
//! lossless format that any viewer opens.

use crate::error::RecordError;
use image::ImageFormat;
use std::io::Cursor;
use tracing::debug;

/// Decode `bytes` as any supported image and return it PNG-encoded.
pub fn to_png(bytes: &[u8]) -> Result<Vec<u8>, RecordError> {
    let img = image::load_from_memory(bytes).map_err(|e| RecordError::Image {
        detail: e.to_string(),
    })?;

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| RecordError::Image {
            detail: e.to_string(),
        })?;

    debug!(
        "Re-encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};

    #[test]
    fn jpeg_becomes_png() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, Rgb([0, 128, 255])));
        let mut jpeg = Vec::new();
        img.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .expect("encode jpeg");

        let png = to_png(&jpeg).expect("re-encode");
        assert_eq!(&png[..4], b"\x89PNG");
        let back = image::load_from_memory(&png).expect("valid png");
        assert_eq!((back.width(), back.height()), (8, 6));
    }

    #[test]
    fn garbage_is_image_error() {
        assert!(matches!(
            to_png(b"definitely not an image"),
            Err(RecordError::Image { .. })
        ));
    }
}
