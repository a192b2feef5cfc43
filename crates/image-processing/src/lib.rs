use std::io::Cursor;

use image::{
    codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, GenericImageView,
    ImageEncoder, ImageFormat, ImageReader,
};
use serde::Serialize;
use thiserror::Error;

pub const PNG_CONTENT_TYPE: &str = "image/png";
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 200;
pub const DEFAULT_THUMBNAIL_QUALITY: u8 = 80;

#[derive(Debug, Error)]
pub enum ImageProcessingError {
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("failed to encode image: {0}")]
    Encode(String),

    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub mime_type: String,
}

/// Reads dimensions and format from the image header. The format comes from
/// the content itself; the uploaded file name is never trusted.
pub fn probe_image(bytes: &[u8]) -> Result<ImageMetadata, ImageProcessingError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|error| ImageProcessingError::Decode(error.to_string()))?;

    let format = reader
        .format()
        .ok_or_else(|| ImageProcessingError::Decode("unrecognized image format".to_string()))?;

    let (width, height) = reader
        .into_dimensions()
        .map_err(|error| ImageProcessingError::Decode(error.to_string()))?;

    Ok(ImageMetadata {
        width,
        height,
        format: format
            .extensions_str()
            .first()
            .copied()
            .unwrap_or("unknown")
            .to_string(),
        mime_type: format.to_mime_type().to_string(),
    })
}

/// Mirrors the image left to right. Output is always PNG so the alpha
/// channel from background removal survives.
pub fn flip_horizontal(bytes: &[u8]) -> Result<Vec<u8>, ImageProcessingError> {
    let img = decode(bytes)?;
    encode_png(&img.fliph())
}

pub fn flip_vertical(bytes: &[u8]) -> Result<Vec<u8>, ImageProcessingError> {
    let img = decode(bytes)?;
    encode_png(&img.flipv())
}

pub fn convert_to_png(bytes: &[u8]) -> Result<Vec<u8>, ImageProcessingError> {
    let img = decode(bytes)?;
    encode_png(&img)
}

/// Fits the image inside `width` x `height` while preserving the aspect
/// ratio. Images that already fit are re-encoded untouched, never enlarged.
pub fn resize_to_fit(
    bytes: &[u8],
    width: u32,
    height: Option<u32>,
) -> Result<Vec<u8>, ImageProcessingError> {
    if width == 0 || height == Some(0) {
        return Err(ImageProcessingError::InvalidDimensions(
            "resize target must be at least 1px".to_string(),
        ));
    }

    let img = decode(bytes)?;
    let (current_width, current_height) = img.dimensions();
    let max_height = height.unwrap_or(u32::MAX);

    if current_width <= width && current_height <= max_height {
        return encode_png(&img);
    }

    encode_png(&img.resize(width, max_height, FilterType::Lanczos3))
}

/// Square, cover-cropped JPEG preview for gallery listings.
pub fn generate_thumbnail(
    bytes: &[u8],
    size: u32,
    quality: u8,
) -> Result<Vec<u8>, ImageProcessingError> {
    if size == 0 {
        return Err(ImageProcessingError::InvalidDimensions(
            "thumbnail size must be at least 1px".to_string(),
        ));
    }

    let img = decode(bytes)?;
    let thumbnail = img.resize_to_fill(size, size, FilterType::Lanczos3);
    let rgb_img = thumbnail.to_rgb8();

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .write_image(
            rgb_img.as_raw(),
            rgb_img.width(),
            rgb_img.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|error| ImageProcessingError::Encode(error.to_string()))?;

    Ok(buffer)
}

fn decode(bytes: &[u8]) -> Result<DynamicImage, ImageProcessingError> {
    image::load_from_memory(bytes).map_err(|error| ImageProcessingError::Decode(error.to_string()))
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ImageProcessingError> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png)
        .map_err(|error| ImageProcessingError::Encode(error.to_string()))?;
    Ok(buffer.into_inner())
}
