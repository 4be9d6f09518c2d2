//! Operation registry.
//!
//! A fixed, process-wide table mapping directive names to operation
//! factories. The table's order *is* the canonical application order: a
//! pipeline applies its stages in this order no matter how the directives
//! were ordered in the payload.
//!
//! Factories validate their parameters when called and fail with
//! [`InvalidParameter`] before any image is touched. A flag directive set to
//! `false` builds no operation at all.

use crate::error::InvalidParameter;
use crate::imaging::filters::Morphology;
use crate::imaging::operations::{
    BrightnessContrast, Clahe, EdgeDetect, EqualizeHistogram, GammaCorrection, GaussianBlur,
    Grayscale, Invert, MedianBlur, Morph, Resize, Rotate, Sepia, Sharpen, StretchHistogram,
    UnsharpMask, Watermark,
};
use crate::imaging::params::{
    self, BlurParams, BrightnessContrastParams, ClaheParams, GammaParams, MedianBlurParams,
    MorphologyParams, ResizeParams, RotateParams, UnsharpMaskParams, WatermarkParams,
};
use crate::imaging::{BoxedOperation, ImageOperation};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Builds an operation from a directive's JSON value. `Ok(None)` means the
/// directive is present but disabled.
pub type OperationFactory = fn(&str, &Value) -> Result<Option<BoxedOperation>, InvalidParameter>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Integer,
    Float,
    Text,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamKind::Integer => "integer",
            ParamKind::Float => "float",
            ParamKind::Text => "string",
        })
    }
}

/// One field of a parameterized directive, for listings.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: Option<&'static str>,
    pub constraint: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub enum Schema {
    /// Bare boolean.
    Flag,
    /// Object with these fields.
    Params(&'static [ParamSpec]),
}

pub struct OperationSpec {
    pub name: &'static str,
    pub schema: Schema,
    factory: OperationFactory,
}

impl OperationSpec {
    /// Validate `value` and construct the operation.
    pub fn build(&self, value: &Value) -> Result<Option<BoxedOperation>, InvalidParameter> {
        (self.factory)(self.name, value)
    }
}

impl fmt::Debug for OperationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationSpec")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for OperationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.schema {
            Schema::Flag => write!(f, "{}: true | false", self.name),
            Schema::Params(fields) => {
                write!(f, "{}: {{", self.name)?;
                for (i, p) in fields.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    write!(f, "{sep}{}: {} ({}", p.name, p.kind, p.constraint)?;
                    if let Some(default) = p.default {
                        write!(f, ", default {default}")?;
                    }
                    f.write_str(")")?;
                }
                f.write_str(" }")
            }
        }
    }
}

const fn param(
    name: &'static str,
    kind: ParamKind,
    default: Option<&'static str>,
    constraint: &'static str,
) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        default,
        constraint,
    }
}

const RESIZE_PARAMS: &[ParamSpec] = &[
    param("width", ParamKind::Integer, None, "1..=16384"),
    param("height", ParamKind::Integer, None, "1..=16384"),
];
const BLUR_PARAMS: &[ParamSpec] = &[param(
    "kernel_size",
    ParamKind::Integer,
    None,
    "positive odd, <= 255",
)];
const ROTATE_PARAMS: &[ParamSpec] = &[param(
    "angle",
    ParamKind::Float,
    Some("0"),
    "degrees, counter-clockwise",
)];
const BRIGHTNESS_CONTRAST_PARAMS: &[ParamSpec] = &[
    param("brightness", ParamKind::Integer, Some("0"), "-255..=255"),
    param("contrast", ParamKind::Float, Some("1.0"), ">= 0"),
];
const GAMMA_PARAMS: &[ParamSpec] = &[param("gamma", ParamKind::Float, Some("1.0"), "> 0")];
const WATERMARK_PARAMS: &[ParamSpec] = &[param("text", ParamKind::Text, None, "1..=256 chars")];
const MEDIAN_PARAMS: &[ParamSpec] = &[param(
    "kernel",
    ParamKind::Integer,
    None,
    "positive odd, <= 255",
)];
const UNSHARP_PARAMS: &[ParamSpec] = &[param("strength", ParamKind::Float, Some("1.0"), ">= 0")];
const MORPHOLOGY_PARAMS: &[ParamSpec] = &[param("kernel", ParamKind::Integer, None, "1..=255")];
const CLAHE_PARAMS: &[ParamSpec] = &[param("clip_limit", ParamKind::Float, Some("2.0"), "> 0")];

static OPERATIONS: &[OperationSpec] = &[
    OperationSpec {
        name: "ConvertColorToGray",
        schema: Schema::Flag,
        factory: flag::<Grayscale>,
    },
    OperationSpec {
        name: "Resize",
        schema: Schema::Params(RESIZE_PARAMS),
        factory: resize,
    },
    OperationSpec {
        name: "Blur",
        schema: Schema::Params(BLUR_PARAMS),
        factory: blur,
    },
    OperationSpec {
        name: "DetectEdges",
        schema: Schema::Flag,
        factory: flag::<EdgeDetect>,
    },
    OperationSpec {
        name: "RotateImage",
        schema: Schema::Params(ROTATE_PARAMS),
        factory: rotate,
    },
    OperationSpec {
        name: "AdjustBrightnessContrast",
        schema: Schema::Params(BRIGHTNESS_CONTRAST_PARAMS),
        factory: brightness_contrast,
    },
    OperationSpec {
        name: "ApplySharpening",
        schema: Schema::Flag,
        factory: flag::<Sharpen>,
    },
    OperationSpec {
        name: "EqualizeHistogram",
        schema: Schema::Flag,
        factory: flag::<EqualizeHistogram>,
    },
    OperationSpec {
        name: "ApplyGammaCorrection",
        schema: Schema::Params(GAMMA_PARAMS),
        factory: gamma,
    },
    OperationSpec {
        name: "ApplyWatermark",
        schema: Schema::Params(WATERMARK_PARAMS),
        factory: watermark,
    },
    OperationSpec {
        name: "InvertColors",
        schema: Schema::Flag,
        factory: flag::<Invert>,
    },
    OperationSpec {
        name: "ApplySepia",
        schema: Schema::Flag,
        factory: flag::<Sepia>,
    },
    OperationSpec {
        name: "ApplyMedianBlur",
        schema: Schema::Params(MEDIAN_PARAMS),
        factory: median_blur,
    },
    OperationSpec {
        name: "StretchHistogram",
        schema: Schema::Flag,
        factory: flag::<StretchHistogram>,
    },
    OperationSpec {
        name: "ApplyUnsharpMask",
        schema: Schema::Params(UNSHARP_PARAMS),
        factory: unsharp_mask,
    },
    OperationSpec {
        name: "ApplyDilation",
        schema: Schema::Params(MORPHOLOGY_PARAMS),
        factory: dilation,
    },
    OperationSpec {
        name: "ApplyErosion",
        schema: Schema::Params(MORPHOLOGY_PARAMS),
        factory: erosion,
    },
    OperationSpec {
        name: "ApplyCLAHE",
        schema: Schema::Params(CLAHE_PARAMS),
        factory: clahe,
    },
];

static INDEX: LazyLock<HashMap<&'static str, &'static OperationSpec>> =
    LazyLock::new(|| OPERATIONS.iter().map(|spec| (spec.name, spec)).collect());

/// Look up a directive by its exact name.
pub fn lookup(name: &str) -> Option<&'static OperationSpec> {
    INDEX.get(name).copied()
}

/// Every known directive name, in application order.
pub fn canonical_order() -> impl Iterator<Item = &'static str> {
    OPERATIONS.iter().map(|spec| spec.name)
}

/// The full table, in application order.
pub fn operations() -> &'static [OperationSpec] {
    OPERATIONS
}

// =============================================================================
// Factories
// =============================================================================

fn boxed(op: impl ImageOperation + 'static) -> Option<BoxedOperation> {
    Some(Box::new(op))
}

fn flag<O: ImageOperation + Default + 'static>(
    name: &str,
    value: &Value,
) -> Result<Option<BoxedOperation>, InvalidParameter> {
    Ok(if params::parse_flag(name, value)? {
        boxed(O::default())
    } else {
        None
    })
}

fn resize(name: &str, value: &Value) -> Result<Option<BoxedOperation>, InvalidParameter> {
    let (width, height) = params::parse::<ResizeParams>(name, value)?.dimensions(name)?;
    Ok(boxed(Resize { width, height }))
}

fn blur(name: &str, value: &Value) -> Result<Option<BoxedOperation>, InvalidParameter> {
    let k = params::parse::<BlurParams>(name, value)?.kernel_size(name)?;
    Ok(boxed(GaussianBlur::new(k)))
}

fn rotate(name: &str, value: &Value) -> Result<Option<BoxedOperation>, InvalidParameter> {
    let angle = params::parse::<RotateParams>(name, value)?.angle(name)?;
    Ok(boxed(Rotate { angle }))
}

fn brightness_contrast(
    name: &str,
    value: &Value,
) -> Result<Option<BoxedOperation>, InvalidParameter> {
    let p = params::parse::<BrightnessContrastParams>(name, value)?;
    Ok(boxed(BrightnessContrast::new(
        p.brightness(name)?,
        p.contrast(name)?,
    )))
}

fn gamma(name: &str, value: &Value) -> Result<Option<BoxedOperation>, InvalidParameter> {
    let g = params::parse::<GammaParams>(name, value)?.gamma(name)?;
    Ok(boxed(GammaCorrection::new(g)))
}

fn watermark(name: &str, value: &Value) -> Result<Option<BoxedOperation>, InvalidParameter> {
    let text = params::parse::<WatermarkParams>(name, value)?.text(name)?;
    Ok(boxed(Watermark { text }))
}

fn median_blur(name: &str, value: &Value) -> Result<Option<BoxedOperation>, InvalidParameter> {
    let kernel = params::parse::<MedianBlurParams>(name, value)?.kernel(name)?;
    Ok(boxed(MedianBlur { kernel }))
}

fn unsharp_mask(name: &str, value: &Value) -> Result<Option<BoxedOperation>, InvalidParameter> {
    let strength = params::parse::<UnsharpMaskParams>(name, value)?.strength(name)?;
    Ok(boxed(UnsharpMask { strength }))
}

fn dilation(name: &str, value: &Value) -> Result<Option<BoxedOperation>, InvalidParameter> {
    let kernel = params::parse::<MorphologyParams>(name, value)?.kernel(name)?;
    Ok(boxed(Morph {
        kernel,
        op: Morphology::Dilate,
    }))
}

fn erosion(name: &str, value: &Value) -> Result<Option<BoxedOperation>, InvalidParameter> {
    let kernel = params::parse::<MorphologyParams>(name, value)?.kernel(name)?;
    Ok(boxed(Morph {
        kernel,
        op: Morphology::Erode,
    }))
}

fn clahe(name: &str, value: &Value) -> Result<Option<BoxedOperation>, InvalidParameter> {
    let clip_limit = params::parse::<ClaheParams>(name, value)?.clip_limit(name)?;
    Ok(boxed(Clahe { clip_limit }))
}
