//! Image operations.
//!
//! Each directive in the registry resolves to one [`ImageOperation`]: a
//! configured, validated transform that consumes an image and returns a new
//! one. Operations accept 8-bit RGB or 8-bit luma input. Luma stays luma
//! unless the operation needs colour (sepia); anything else is converted to
//! RGB first.

use super::filters::{self, Morphology};
use super::glyphs;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage};
use std::fmt::Debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OperationError {
    #[error("image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("{0}")]
    ProcessingFailed(String),
}

pub type Result<T> = std::result::Result<T, OperationError>;

/// A single configured transform.
pub trait ImageOperation: Send + Sync + Debug {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage>;
}

pub type BoxedOperation = Box<dyn ImageOperation>;

fn ensure_not_empty(image: &DynamicImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(OperationError::EmptyImage {
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(())
}

/// Run `f` over the interleaved pixel buffer. Luma input stays luma; every
/// other layout is processed as RGB.
fn map_buffer(
    image: DynamicImage,
    f: impl FnOnce(&[u8], usize, usize, usize) -> Vec<u8>,
) -> Result<DynamicImage> {
    let (w, h) = (image.width(), image.height());
    match image {
        DynamicImage::ImageLuma8(gray) => {
            let out = f(gray.as_raw(), w as usize, h as usize, 1);
            GrayImage::from_raw(w, h, out)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| buffer_mismatch(w, h))
        }
        other => {
            let rgb = other.into_rgb8();
            let out = f(rgb.as_raw(), w as usize, h as usize, 3);
            RgbImage::from_raw(w, h, out)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| buffer_mismatch(w, h))
        }
    }
}

/// Run a single-channel transform on the luma plane. Colour images get the
/// luma change applied to every channel.
fn map_luma(image: DynamicImage, f: impl FnOnce(&[u8], usize, usize) -> Vec<u8>) -> Result<DynamicImage> {
    let (w, h) = (image.width(), image.height());
    match image {
        DynamicImage::ImageLuma8(gray) => {
            let out = f(gray.as_raw(), w as usize, h as usize);
            GrayImage::from_raw(w, h, out)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| buffer_mismatch(w, h))
        }
        other => {
            let rgb = other.into_rgb8();
            let luma = filters::rgb_to_luma(rgb.as_raw());
            let mapped = f(&luma, w as usize, h as usize);
            let out = filters::remap_luma(rgb.as_raw(), &luma, &mapped);
            RgbImage::from_raw(w, h, out)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| buffer_mismatch(w, h))
        }
    }
}

fn map_lut(image: DynamicImage, lut: &[u8; 256]) -> Result<DynamicImage> {
    map_buffer(image, |data, _, _, _| {
        let mut out = data.to_vec();
        filters::apply_lut(&mut out, lut);
        out
    })
}

fn buffer_mismatch(w: u32, h: u32) -> OperationError {
    OperationError::ProcessingFailed(format!("pixel buffer does not match {w}x{h}"))
}

fn to_luma(image: DynamicImage) -> Result<GrayImage> {
    match image {
        DynamicImage::ImageLuma8(gray) => Ok(gray),
        other => {
            let rgb = other.into_rgb8();
            let (w, h) = rgb.dimensions();
            let luma = filters::rgb_to_luma(rgb.as_raw());
            GrayImage::from_raw(w, h, luma).ok_or_else(|| buffer_mismatch(w, h))
        }
    }
}

// =============================================================================
// Operations
// =============================================================================

#[derive(Debug, Default)]
pub struct Grayscale;

impl ImageOperation for Grayscale {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        Ok(DynamicImage::ImageLuma8(to_luma(image)?))
    }
}

/// Exact-size bilinear resize.
#[derive(Debug)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
}

impl ImageOperation for Resize {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        ensure_not_empty(&image)?;
        Ok(image.resize_exact(self.width, self.height, FilterType::Triangle))
    }
}

#[derive(Debug)]
pub struct GaussianBlur {
    pub kernel_size: u32,
    pub sigma: f64,
}

impl GaussianBlur {
    /// Blur with the sigma implied by the kernel size.
    pub fn new(kernel_size: u32) -> Self {
        Self {
            kernel_size,
            sigma: filters::sigma_for_kernel(kernel_size),
        }
    }
}

impl ImageOperation for GaussianBlur {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        map_buffer(image, |data, w, h, c| {
            filters::gaussian_blur(data, w, h, c, self.kernel_size, self.sigma)
        })
    }
}

/// Canny edges; always produces a luma image.
#[derive(Debug, Default)]
pub struct EdgeDetect;

impl EdgeDetect {
    pub const LOW_THRESHOLD: i32 = 100;
    pub const HIGH_THRESHOLD: i32 = 200;
}

impl ImageOperation for EdgeDetect {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        let gray = to_luma(image)?;
        let (w, h) = gray.dimensions();
        let edges = filters::canny(
            gray.as_raw(),
            w as usize,
            h as usize,
            Self::LOW_THRESHOLD,
            Self::HIGH_THRESHOLD,
        );
        GrayImage::from_raw(w, h, edges)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| buffer_mismatch(w, h))
    }
}

/// Counter-clockwise rotation in degrees about the centre.
#[derive(Debug)]
pub struct Rotate {
    pub angle: f64,
}

impl ImageOperation for Rotate {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        if self.angle == 0.0 {
            return Ok(image);
        }
        map_buffer(image, |data, w, h, c| {
            filters::rotate_about_center(data, w, h, c, self.angle)
        })
    }
}

/// `v * contrast + brightness`, saturated.
#[derive(Debug)]
pub struct BrightnessContrast {
    lut: [u8; 256],
}

impl BrightnessContrast {
    pub fn new(brightness: i32, contrast: f64) -> Self {
        let mut lut = [0u8; 256];
        for (v, slot) in lut.iter_mut().enumerate() {
            *slot = (v as f64 * contrast + brightness as f64).round().clamp(0.0, 255.0) as u8;
        }
        Self { lut }
    }
}

impl ImageOperation for BrightnessContrast {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        map_lut(image, &self.lut)
    }
}

#[derive(Debug, Default)]
pub struct Sharpen;

impl Sharpen {
    pub const KERNEL: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];
}

impl ImageOperation for Sharpen {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        map_buffer(image, |data, w, h, c| {
            filters::convolve3x3(data, w, h, c, &Self::KERNEL)
        })
    }
}

#[derive(Debug, Default)]
pub struct EqualizeHistogram;

impl ImageOperation for EqualizeHistogram {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        ensure_not_empty(&image)?;
        map_luma(image, |luma, _, _| {
            let lut = filters::equalize_lut(luma);
            let mut out = luma.to_vec();
            filters::apply_lut(&mut out, &lut);
            out
        })
    }
}

#[derive(Debug)]
pub struct GammaCorrection {
    lut: [u8; 256],
}

impl GammaCorrection {
    pub fn new(gamma: f64) -> Self {
        let mut lut = [0u8; 256];
        for (v, slot) in lut.iter_mut().enumerate() {
            *slot = (255.0 * (v as f64 / 255.0).powf(gamma)).round().clamp(0.0, 255.0) as u8;
        }
        Self { lut }
    }
}

impl ImageOperation for GammaCorrection {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        map_lut(image, &self.lut)
    }
}

/// White bitmap text with its baseline 10px above the bottom edge, starting
/// 10px from the left.
#[derive(Debug)]
pub struct Watermark {
    pub text: String,
}

impl Watermark {
    pub const MARGIN: i64 = 10;
}

impl ImageOperation for Watermark {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        let (w, h) = (image.width() as i64, image.height() as i64);
        let pixels = glyphs::text_pixels(&self.text, Self::MARGIN, h - Self::MARGIN);
        map_buffer(image, |data, _, _, c| {
            let mut out = data.to_vec();
            for (x, y) in pixels {
                if x < 0 || y < 0 || x >= w || y >= h {
                    continue;
                }
                let offset = (y * w + x) as usize * c;
                out[offset..offset + c].fill(255);
            }
            out
        })
    }
}

#[derive(Debug, Default)]
pub struct Invert;

impl ImageOperation for Invert {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        let mut lut = [0u8; 256];
        for (v, slot) in lut.iter_mut().enumerate() {
            *slot = 255 - v as u8;
        }
        map_lut(image, &lut)
    }
}

/// Always produces RGB.
#[derive(Debug, Default)]
pub struct Sepia;

impl ImageOperation for Sepia {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        let rgb = image.into_rgb8();
        let (w, h) = rgb.dimensions();
        RgbImage::from_raw(w, h, filters::sepia(rgb.as_raw()))
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| buffer_mismatch(w, h))
    }
}

#[derive(Debug)]
pub struct MedianBlur {
    pub kernel: u32,
}

impl ImageOperation for MedianBlur {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        map_buffer(image, |data, w, h, c| {
            filters::median(data, w, h, c, self.kernel)
        })
    }
}

#[derive(Debug, Default)]
pub struct StretchHistogram;

impl ImageOperation for StretchHistogram {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        ensure_not_empty(&image)?;
        map_buffer(image, |data, _, _, _| filters::stretch(data))
    }
}

#[derive(Debug)]
pub struct UnsharpMask {
    pub strength: f32,
}

impl ImageOperation for UnsharpMask {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        map_buffer(image, |data, w, h, c| {
            filters::unsharp_mask(data, w, h, c, self.strength)
        })
    }
}

/// Rectangular dilation or erosion.
#[derive(Debug)]
pub struct Morph {
    pub kernel: u32,
    pub op: Morphology,
}

impl ImageOperation for Morph {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        map_buffer(image, |data, w, h, c| {
            filters::morphology(data, w, h, c, self.kernel, self.op)
        })
    }
}

#[derive(Debug)]
pub struct Clahe {
    pub clip_limit: f64,
}

impl ImageOperation for Clahe {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage> {
        ensure_not_empty(&image)?;
        map_luma(image, |luma, w, h| filters::clahe(luma, w, h, self.clip_limit))
    }
}
