//! Directive parameter types.
//!
//! Each parameterized directive deserializes its JSON object into one of these
//! structs, then a validating accessor turns the raw fields into the values an
//! operation needs. Deserialization rejects unknown keys and fills documented
//! defaults; the accessors enforce ranges and report violations as
//! [`InvalidParameter`] naming the field.
//!
//! - [`Quality`]: JPEG output quality (1–100, default 90). Clamped on construction.

use crate::error::InvalidParameter;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub const MAX_DIMENSION: i64 = 16_384;
pub const MAX_KERNEL: i64 = 255;
pub const MAX_WATERMARK_CHARS: usize = 256;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Deserialize a parameter object for `directive`.
pub fn parse<T: DeserializeOwned>(directive: &str, value: &Value) -> Result<T, InvalidParameter> {
    if !value.is_object() {
        return Err(InvalidParameter::new(
            directive,
            format!("expected an object of parameters (got {})", json_kind(value)),
        ));
    }
    T::deserialize(value).map_err(|e| InvalidParameter::new(directive, e.to_string()))
}

/// Flag directives take a bare boolean.
pub fn parse_flag(directive: &str, value: &Value) -> Result<bool, InvalidParameter> {
    value.as_bool().ok_or_else(|| {
        InvalidParameter::new(
            directive,
            format!("expected true or false (got {})", json_kind(value)),
        )
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn odd_kernel(directive: &str, field: &str, k: i64) -> Result<u32, InvalidParameter> {
    if k < 1 || k % 2 == 0 || k > MAX_KERNEL {
        return Err(InvalidParameter::new(
            directive,
            format!("{field} must be a positive odd integer no greater than {MAX_KERNEL} (got {k})"),
        ));
    }
    Ok(k as u32)
}

fn finite(directive: &str, field: &str, v: f64) -> Result<f64, InvalidParameter> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(InvalidParameter::new(
            directive,
            format!("{field} must be a finite number"),
        ))
    }
}

fn default_contrast() -> f64 {
    1.0
}

fn default_gamma() -> f64 {
    1.0
}

fn default_strength() -> f64 {
    1.0
}

fn default_clip_limit() -> f64 {
    2.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResizeParams {
    pub width: i64,
    pub height: i64,
}

impl ResizeParams {
    pub fn dimensions(&self, directive: &str) -> Result<(u32, u32), InvalidParameter> {
        let check = |field: &str, v: i64| {
            if (1..=MAX_DIMENSION).contains(&v) {
                Ok(v as u32)
            } else {
                Err(InvalidParameter::new(
                    directive,
                    format!("{field} must be between 1 and {MAX_DIMENSION} (got {v})"),
                ))
            }
        };
        Ok((check("width", self.width)?, check("height", self.height)?))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlurParams {
    pub kernel_size: i64,
}

impl BlurParams {
    pub fn kernel_size(&self, directive: &str) -> Result<u32, InvalidParameter> {
        odd_kernel(directive, "kernel_size", self.kernel_size)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RotateParams {
    #[serde(default)]
    pub angle: f64,
}

impl RotateParams {
    pub fn angle(&self, directive: &str) -> Result<f64, InvalidParameter> {
        finite(directive, "angle", self.angle)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrightnessContrastParams {
    #[serde(default)]
    pub brightness: i64,
    #[serde(default = "default_contrast")]
    pub contrast: f64,
}

impl BrightnessContrastParams {
    pub fn brightness(&self, directive: &str) -> Result<i32, InvalidParameter> {
        if (-255..=255).contains(&self.brightness) {
            Ok(self.brightness as i32)
        } else {
            Err(InvalidParameter::new(
                directive,
                format!(
                    "brightness must be between -255 and 255 (got {})",
                    self.brightness
                ),
            ))
        }
    }

    pub fn contrast(&self, directive: &str) -> Result<f64, InvalidParameter> {
        let c = finite(directive, "contrast", self.contrast)?;
        if c < 0.0 {
            return Err(InvalidParameter::new(
                directive,
                format!("contrast must not be negative (got {c})"),
            ));
        }
        Ok(c)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GammaParams {
    #[serde(default = "default_gamma")]
    pub gamma: f64,
}

impl GammaParams {
    pub fn gamma(&self, directive: &str) -> Result<f64, InvalidParameter> {
        let g = finite(directive, "gamma", self.gamma)?;
        if g <= 0.0 {
            return Err(InvalidParameter::new(
                directive,
                format!("gamma must be greater than 0 (got {g})"),
            ));
        }
        Ok(g)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatermarkParams {
    pub text: String,
}

impl WatermarkParams {
    pub fn text(&self, directive: &str) -> Result<String, InvalidParameter> {
        let chars = self.text.chars().count();
        if chars == 0 || chars > MAX_WATERMARK_CHARS {
            return Err(InvalidParameter::new(
                directive,
                format!("text must be 1 to {MAX_WATERMARK_CHARS} characters (got {chars})"),
            ));
        }
        Ok(self.text.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MedianBlurParams {
    pub kernel: i64,
}

impl MedianBlurParams {
    pub fn kernel(&self, directive: &str) -> Result<u32, InvalidParameter> {
        odd_kernel(directive, "kernel", self.kernel)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnsharpMaskParams {
    #[serde(default = "default_strength")]
    pub strength: f64,
}

impl UnsharpMaskParams {
    pub fn strength(&self, directive: &str) -> Result<f32, InvalidParameter> {
        let s = finite(directive, "strength", self.strength)?;
        if s < 0.0 {
            return Err(InvalidParameter::new(
                directive,
                format!("strength must not be negative (got {s})"),
            ));
        }
        Ok(s as f32)
    }
}

/// Shared by dilation and erosion.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MorphologyParams {
    pub kernel: i64,
}

impl MorphologyParams {
    pub fn kernel(&self, directive: &str) -> Result<u32, InvalidParameter> {
        if (1..=MAX_KERNEL).contains(&self.kernel) {
            Ok(self.kernel as u32)
        } else {
            Err(InvalidParameter::new(
                directive,
                format!(
                    "kernel must be between 1 and {MAX_KERNEL} (got {})",
                    self.kernel
                ),
            ))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaheParams {
    #[serde(default = "default_clip_limit")]
    pub clip_limit: f64,
}

impl ClaheParams {
    pub fn clip_limit(&self, directive: &str) -> Result<f64, InvalidParameter> {
        let c = finite(directive, "clip_limit", self.clip_limit)?;
        if c <= 0.0 {
            return Err(InvalidParameter::new(
                directive,
                format!("clip_limit must be greater than 0 (got {c})"),
            ));
        }
        Ok(c)
    }
}
