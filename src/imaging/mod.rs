//! Image processing: pure Rust on top of the `image` crate.
//!
//! | Concern | Where |
//! |---|---|
//! | **Decode** | `image::load_from_memory`, normalized to RGB8 |
//! | **Transform** | [`ImageOperation`] implementations over [`filters`] kernels |
//! | **Watermark text** | built-in 5×7 bitmap font |
//! | **Encode** | `JpegEncoder` at a configurable [`Quality`] |
//!
//! The module is split into:
//! - **Parameters**: serde types for directive parameters plus validation
//! - **Operations**: [`ImageOperation`] trait and one type per directive
//! - **Filters**: pixel kernels on raw interleaved buffers (unit testable)
//! - **Codec**: decode, JPEG encode, base64

pub mod codec;
pub mod filters;
mod glyphs;
pub mod operations;
pub mod params;

pub use codec::{DecodeLimits, decode_base64, decode_image, encode_base64, encode_jpeg};
pub use operations::{BoxedOperation, ImageOperation, OperationError};
pub use params::Quality;
