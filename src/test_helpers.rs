//! Shared test utilities for the darkroom test suite.
//!
//! Provides synthetic images, encoded payload builders and a scratch
//! directory helper, so tests never depend on binary fixtures.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let image = gradient_rgb(32, 16);
//! let payload = payload_with(&image, serde_json::json!({"InvertColors": true}));
//! ```

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};

// =========================================================================
// Synthetic images
// =========================================================================

/// A horizontal red ramp over a vertical green ramp with constant blue.
pub fn gradient_rgb(width: u32, height: u32) -> DynamicImage {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.saturating_sub(1).max(1)) as u8;
        let g = (y * 255 / height.saturating_sub(1).max(1)) as u8;
        Rgb([r, g, 96])
    });
    DynamicImage::ImageRgb8(img)
}

pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// A JSON payload with `img` set to the base64 PNG of `image`, merged with
/// the given directives object.
pub fn payload_with(image: &DynamicImage, directives: serde_json::Value) -> Vec<u8> {
    let mut map = match directives {
        serde_json::Value::Object(map) => map,
        other => panic!("directives must be an object, got {other}"),
    };
    map.insert(
        "img".into(),
        serde_json::Value::String(crate::imaging::encode_base64(&png_bytes(image))),
    );
    serde_json::Value::Object(map).to_string().into_bytes()
}

// =========================================================================
// Filesystem
// =========================================================================

/// Write `image` as PNG to `dir/name` and return the path.
pub fn write_png(dir: &Path, name: &str, image: &DynamicImage) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, png_bytes(image)).unwrap();
    path
}
