//! Image decoding, JPEG encoding and base64 transport encoding.

use super::params::{MAX_DIMENSION, Quality};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::error::{LimitError, LimitErrorKind};
use image::{DynamicImage, ImageError, ImageReader, ImageResult};
use std::io::Cursor;

pub const DEFAULT_MAX_DECODE_BYTES: u64 = 256 * 1024 * 1024;

/// Bounds on what a compressed image may expand to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Largest accepted width or height.
    pub max_dimension: u32,
    /// Largest decoded RGB8 buffer, and the decoder's allocation budget.
    pub max_bytes: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_dimension: MAX_DIMENSION as u32,
            max_bytes: DEFAULT_MAX_DECODE_BYTES,
        }
    }
}

impl DecodeLimits {
    fn check(&self, width: u32, height: u32) -> ImageResult<()> {
        let rgb_bytes = u64::from(width) * u64::from(height) * 3;
        if width > self.max_dimension || height > self.max_dimension {
            return Err(ImageError::Limits(LimitError::from_kind(
                LimitErrorKind::DimensionError,
            )));
        }
        if rgb_bytes > self.max_bytes {
            return Err(ImageError::Limits(LimitError::from_kind(
                LimitErrorKind::InsufficientMemory,
            )));
        }
        Ok(())
    }

    fn reader_limits(&self) -> image::Limits {
        let mut limits = image::Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits.max_alloc = Some(self.max_bytes);
        limits
    }
}

/// Decode any supported container and normalize to 8-bit RGB.
///
/// The header is read first and the image rejected with
/// [`ImageError::Limits`] before any pixel buffer is allocated when its
/// dimensions or its RGB8 size exceed `limits`.
pub fn decode_image(bytes: &[u8], limits: DecodeLimits) -> ImageResult<DynamicImage> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()?;
    limits.check(width, height)?;

    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(limits.reader_limits());
    let image = reader.decode()?;
    Ok(match image {
        DynamicImage::ImageRgb8(_) => image,
        other => DynamicImage::ImageRgb8(other.into_rgb8()),
    })
}

/// Encode as baseline JPEG. Luma images stay single-channel.
pub fn encode_jpeg(image: &DynamicImage, quality: Quality) -> ImageResult<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.value() as u8);
    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => {
            image.write_with_encoder(encoder)?
        }
        other => DynamicImage::ImageRgb8(other.to_rgb8()).write_with_encoder(encoder)?,
    }
    Ok(buf)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text.trim())
}
