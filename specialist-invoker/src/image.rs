//! Downscales an uploaded image before dispatch if its longest side
//! exceeds the cap, preserving aspect ratio.

use common::error::AppError;
use image::imageops::FilterType;
use image::ImageFormat;

pub const MAX_LONGEST_SIDE: u32 = 1024;

/// Downscales `bytes` if needed; returns the original bytes unchanged if
/// already within bounds or if the format can't be decoded (the caller
/// dispatches the original rather than failing the turn over a thumbnail).
pub fn downscale_if_needed(bytes: &[u8]) -> Result<Vec<u8>, AppError> {
    let format = match image::guess_format(bytes) {
        Ok(fmt) => fmt,
        Err(_) => return Ok(bytes.to_vec()),
    };

    let decoded = match image::load_from_memory_with_format(bytes, format) {
        Ok(img) => img,
        Err(_) => return Ok(bytes.to_vec()),
    };

    let (width, height) = (decoded.width(), decoded.height());
    let longest = width.max(height);
    if longest <= MAX_LONGEST_SIDE {
        return Ok(bytes.to_vec());
    }

    let scale = f64::from(MAX_LONGEST_SIDE) / f64::from(longest);
    let new_width = (f64::from(width) * scale).round().max(1.0) as u32;
    let new_height = (f64::from(height) * scale).round().max(1.0) as u32;

    let resized = decoded.resize(new_width, new_height, FilterType::Lanczos3);

    let mut out = Vec::new();
    let encode_format = if matches!(format, ImageFormat::Jpeg) {
        ImageFormat::Jpeg
    } else {
        ImageFormat::Png
    };
    resized
        .write_to(&mut std::io::Cursor::new(&mut out), encode_format)
        .map_err(|err| AppError::Internal(format!("could not re-encode downscaled image: {err}")))?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn make_png(width: u32, height: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(width, height, Rgb([10, 20, 30]));
        let mut out = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png).unwrap();
        out
    }

    #[test]
    fn small_image_passes_through_unchanged() {
        let bytes = make_png(100, 80);
        let result = downscale_if_needed(&bytes).unwrap();
        assert_eq!(result, bytes);
    }

    #[test]
    fn oversized_image_is_downscaled_preserving_aspect_ratio() {
        let bytes = make_png(2048, 1024);
        let result = downscale_if_needed(&bytes).unwrap();
        let decoded = image::load_from_memory(&result).unwrap();
        assert!(decoded.width() <= MAX_LONGEST_SIDE);
        assert!(decoded.height() <= MAX_LONGEST_SIDE);
        let original_ratio = 2048.0 / 1024.0;
        let new_ratio = f64::from(decoded.width()) / f64::from(decoded.height());
        assert!((original_ratio - new_ratio).abs() < 0.02);
    }
}
