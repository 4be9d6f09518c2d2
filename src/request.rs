//! Payload decoding for `POST /`.
//!
//! The body is a JSON object: `img` carries the base64 image, every other
//! key is a directive. Checks run in a fixed order and stop at the first
//! failure: size, JSON syntax, object shape, `img` presence, base64, decoded
//! image size, image decode. Directive validation happens later, in the
//! pipeline builder.

use crate::error::{ServiceError, ValidationError};
use crate::imaging::{DecodeLimits, decode_base64, decode_image};
use crate::pipeline::DirectiveSet;
use image::{DynamicImage, ImageError};
use serde_json::Value;

pub const IMAGE_FIELD: &str = "img";
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug)]
pub struct DecodedRequest {
    pub image: DynamicImage,
    pub directives: DirectiveSet,
}

pub fn decode(
    raw: &[u8],
    max_body_bytes: usize,
    image_limits: DecodeLimits,
) -> Result<DecodedRequest, ServiceError> {
    if raw.len() > max_body_bytes {
        return Err(ServiceError::PayloadTooLarge {
            size: raw.len() as u64,
            limit: max_body_bytes as u64,
        });
    }

    let payload: Value = serde_json::from_slice(raw).map_err(ValidationError::from)?;
    let Value::Object(mut fields) = payload else {
        return Err(ValidationError::NotAnObject.into());
    };
    let Some(Value::String(encoded)) = fields.remove(IMAGE_FIELD) else {
        return Err(ValidationError::MissingImage.into());
    };

    let bytes = decode_base64(&encoded).map_err(ValidationError::from)?;
    if bytes.is_empty() {
        return Err(ValidationError::ImageDecode("image data is empty".into()).into());
    }
    let image = decode_image(&bytes, image_limits).map_err(|e| match e {
        ImageError::Limits(limit) => ServiceError::ImageTooLarge(limit.to_string()),
        other => ValidationError::ImageDecode(other.to_string()).into(),
    })?;
    if image.width() == 0 || image.height() == 0 {
        return Err(ValidationError::ImageDecode(format!(
            "image has no pixels ({}x{})",
            image.width(),
            image.height()
        ))
        .into());
    }

    Ok(DecodedRequest {
        image,
        directives: DirectiveSet::from(fields),
    })
}
