use crate::error::AppError;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageReader;
use std::io::Cursor;

const THUMBNAIL_MAX_DIM: u32 = 80;
const THUMBNAIL_QUALITY: u8 = 60;

/// Downscale an uploaded image into a small JPEG data URI for history
/// display. Returns `None` if the bytes cannot be decoded; a thumbnail
/// failure never fails the surrounding history push.
pub fn encode(bytes: &[u8]) -> Option<String> {
    encode_with_max(bytes, THUMBNAIL_MAX_DIM)
}

pub fn encode_with_max(bytes: &[u8], max_dim: u32) -> Option<String> {
    match try_encode(bytes, max_dim) {
        Ok(uri) => Some(uri),
        Err(e) => {
            tracing::warn!("thumbnail generation failed: {}", e);
            None
        }
    }
}

pub(crate) fn try_encode(bytes: &[u8], max_dim: u32) -> Result<String, AppError> {
    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| AppError::DecodeFailure(e.to_string()))?
        .decode()?;

    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 {
        return Err(AppError::DecodeFailure("image has zero dimension".to_string()));
    }

    // Fit inside max_dim x max_dim preserving aspect ratio; never upscale.
    let scale = (max_dim as f32 / w as f32)
        .min(max_dim as f32 / h as f32)
        .min(1.0);
    let img = if scale < 1.0 {
        let new_w = ((w as f32 * scale).round() as u32).clamp(1, max_dim);
        let new_h = ((h as f32 * scale).round() as u32).clamp(1, max_dim);
        img.resize_exact(new_w, new_h, FilterType::Triangle)
    } else {
        img
    };

    // JPEG has no alpha channel; flatten before encoding.
    let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());

    let mut buffer = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, THUMBNAIL_QUALITY);
    rgb.write_with_encoder(encoder)
        .map_err(|e| AppError::DecodeFailure(format!("failed to encode thumbnail: {}", e)))?;

    let b64 = base64::engine::general_purpose::STANDARD.encode(buffer.get_ref());
    Ok(format!("data:image/jpeg;base64,{}", b64))
}
