// loader.rs — Decode photos and reference images into 8-bit luma.
//
// Everything the extractor sees goes through here, so the size check and
// the color → luma conversion happen in exactly one place. Color images are
// converted with the `image` crate's Rec. 601 luma weights.

use std::path::Path;

use image::DynamicImage;

use crate::error::ExtractionError;
use crate::image::Image;

/// Convert a decoded image to luma and check it against `min_size`.
pub fn to_luma(img: &DynamicImage, min_size: u32) -> Result<Image<u8>, ExtractionError> {
    let (width, height) = (img.width(), img.height());
    if width < min_size || height < min_size {
        return Err(ExtractionError::TooSmall { width, height, min: min_size });
    }
    Ok(Image::from_gray(&img.to_luma8()))
}

/// Decode an in-memory encoded image (JPEG, PNG, WebP, BMP, ...).
pub fn decode_bytes(bytes: &[u8], min_size: u32) -> Result<Image<u8>, ExtractionError> {
    let img = image::load_from_memory(bytes)?;
    to_luma(&img, min_size)
}

/// Read and decode an image file.
pub fn load_path(path: &Path, min_size: u32) -> Result<Image<u8>, ExtractionError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_bytes(&bytes, min_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let gray = GrayImage::from_fn(80, 70, |x, _| Luma([x as u8]));
        let bytes = png_bytes(&DynamicImage::ImageLuma8(gray));
        let img = decode_bytes(&bytes, 64).unwrap();
        assert_eq!((img.width(), img.height()), (80, 70));
        assert_eq!(img.get(42, 3), 42);
    }

    #[test]
    fn test_color_is_converted_to_luma() {
        let rgb = RgbImage::from_pixel(64, 64, Rgb([200, 200, 200]));
        let img = to_luma(&DynamicImage::ImageRgb8(rgb), 64).unwrap();
        assert_eq!(img.get(10, 10), 200);
    }

    #[test]
    fn test_too_small() {
        let gray = GrayImage::new(100, 32);
        let err = to_luma(&DynamicImage::ImageLuma8(gray), 64).unwrap_err();
        assert!(matches!(err, ExtractionError::TooSmall { width: 100, height: 32, min: 64 }));
    }

    #[test]
    fn test_garbage_bytes() {
        let err = decode_bytes(b"definitely not an image", 64).unwrap_err();
        assert!(matches!(err, ExtractionError::Decode(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = load_path(Path::new("/nonexistent/123.jpg"), 64).unwrap_err();
        assert!(matches!(err, ExtractionError::Io { .. }));
    }
}
