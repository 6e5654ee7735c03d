//! JPEG re-encoding for images embedded in PDF documents

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageFormat};

use crate::errors::{DomainError, DomainResult};

/// Colour layouts a PDF image XObject can declare and we can round-trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddedColorSpace {
    Rgb,
    Gray,
}

impl EmbeddedColorSpace {
    fn matches(&self, color: ColorType) -> bool {
        matches!(
            (self, color),
            (EmbeddedColorSpace::Rgb, ColorType::Rgb8) | (EmbeddedColorSpace::Gray, ColorType::L8)
        )
    }
}

/// Re-encode JPEG bytes at `quality`.
///
/// Returns `Ok(None)` when the image should be left alone: the decoded colour
/// type doesn't match what the PDF declares, or the new encoding isn't smaller.
pub fn recompress_jpeg(
    data: &[u8],
    color_space: EmbeddedColorSpace,
    quality: u8,
) -> DomainResult<Option<Vec<u8>>> {
    let quality = quality.clamp(1, 100);

    let img = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map_err(|e| DomainError::Compression(format!("Failed to decode embedded JPEG: {}", e)))?;

    if !color_space.matches(img.color()) {
        return Ok(None);
    }

    let mut output = Vec::with_capacity(data.len() / 2);
    let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);
    // Encode from a concrete buffer so the component count stays what the PDF declares
    let encoded = match color_space {
        EmbeddedColorSpace::Rgb => encoder.encode_image(&img.to_rgb8()),
        EmbeddedColorSpace::Gray => encoder.encode_image(&img.to_luma8()),
    };
    encoded.map_err(|e| DomainError::Compression(format!("JPEG encoding error: {}", e)))?;

    if output.len() < data.len() {
        Ok(Some(output))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
pub(crate) fn sample_jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
    use image::{Rgb, RgbImage};

    let img = RgbImage::from_fn(width, height, |x, y| {
        // Noisy gradient so the encoder has real work to do
        let noise = ((x * 7919 + y * 104729) % 97) as u8;
        Rgb([(x % 256) as u8 ^ noise, (y % 256) as u8, ((x + y) % 256) as u8 ^ noise])
    });
    let mut output = Vec::new();
    JpegEncoder::new_with_quality(&mut output, quality)
        .encode_image(&img)
        .expect("encode sample jpeg");
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recompress_shrinks_high_quality_jpeg() {
        let original = sample_jpeg(128, 128, 100);
        let smaller = recompress_jpeg(&original, EmbeddedColorSpace::Rgb, 30)
            .unwrap()
            .expect("lower quality should shrink");
        assert!(smaller.len() < original.len());
        assert!(image::load_from_memory_with_format(&smaller, ImageFormat::Jpeg).is_ok());
    }

    #[test]
    fn test_color_space_mismatch_is_left_alone() {
        let original = sample_jpeg(32, 32, 100);
        assert_eq!(recompress_jpeg(&original, EmbeddedColorSpace::Gray, 30).unwrap(), None);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(recompress_jpeg(b"not a jpeg", EmbeddedColorSpace::Rgb, 50).is_err());
    }
}
