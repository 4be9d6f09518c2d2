//! Frame streaming for `GET /stream`.
//!
//! The emitter sends a single response head announcing an open-ended
//! `multipart/x-mixed-replace` body, then pulls frames from a
//! [`FrameSource`], runs each through the stream pipeline and writes it as
//! one JPEG part:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes>\r\n
//! ```
//!
//! The stream ends when the source runs dry or a write fails. The session
//! closes the connection afterwards.

use crate::http;
use crate::imaging::{DecodeLimits, Quality, decode_image, encode_jpeg};
use crate::pipeline::Pipeline;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, Frames};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("cannot open frame source {path}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("frame decode failed: {0}")]
    Frame(#[from] image::ImageError),
    #[error("stream write failed: {0}")]
    Write(#[from] io::Error),
}

/// A finite sequence of frames.
pub trait FrameSource {
    /// The next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<DynamicImage>, StreamError>;
}

/// Image files in a directory, played in file-name order. Files that fail
/// to decode are skipped.
#[derive(Debug)]
pub struct DirectoryFrames {
    pending: VecDeque<PathBuf>,
}

impl DirectoryFrames {
    pub fn open(dir: &Path) -> Result<Self, StreamError> {
        let open_err = |e: io::Error| StreamError::Open {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        };
        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(open_err)? {
            let entry = entry.map_err(open_err)?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                files.push(entry.path());
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(Self {
            pending: files.into(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FrameSource for DirectoryFrames {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>, StreamError> {
        while let Some(path) = self.pending.pop_front() {
            let decoded = fs::read(&path)
                .map_err(image::ImageError::IoError)
                .and_then(|bytes| decode_image(&bytes, DecodeLimits::default()));
            match decoded {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable frame"),
            }
        }
        Ok(None)
    }
}

/// Frames of an animated GIF.
pub struct GifFrames {
    frames: Frames<'static>,
}

impl GifFrames {
    pub fn open(path: &Path) -> Result<Self, StreamError> {
        let file = File::open(path).map_err(|e| StreamError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let decoder = GifDecoder::new(BufReader::new(file)).map_err(|e| StreamError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            frames: decoder.into_frames(),
        })
    }
}

impl FrameSource for GifFrames {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>, StreamError> {
        match self.frames.next() {
            Some(frame) => {
                let rgba = frame?.into_buffer();
                Ok(Some(DynamicImage::ImageRgb8(
                    DynamicImage::ImageRgba8(rgba).into_rgb8(),
                )))
            }
            None => Ok(None),
        }
    }
}

/// Open a directory or a `.gif` file as a frame source.
pub fn open_source(path: &Path) -> Result<Box<dyn FrameSource>, StreamError> {
    if path.is_dir() {
        return Ok(Box::new(DirectoryFrames::open(path)?));
    }
    let is_gif = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gif"));
    if is_gif {
        return Ok(Box::new(GifFrames::open(path)?));
    }
    Err(StreamError::Open {
        path: path.to_path_buf(),
        reason: if path.exists() {
            "expected a directory of frames or a .gif file".into()
        } else {
            "no such file or directory".into()
        },
    })
}

/// Writes transformed frames as a multipart body.
#[derive(Debug)]
pub struct Emitter {
    pub pipeline: Pipeline,
    pub quality: Quality,
    pub frame_delay: Duration,
}

impl Emitter {
    /// Stream every frame of `source` to `out`. Returns the number of parts
    /// written. Frames whose transform or encode fails are skipped.
    pub fn run<W: Write>(
        &self,
        source: &mut dyn FrameSource,
        out: &mut W,
        version: u8,
    ) -> Result<u64, StreamError> {
        http::write_stream_head(out, CONTENT_TYPE, version)?;
        let mut sent = 0u64;
        let mut index = 0u64;
        while let Some(frame) = source.next_frame()? {
            index += 1;
            let jpeg = match self
                .pipeline
                .apply(frame)
                .map_err(|e| e.to_string())
                .and_then(|img| encode_jpeg(&img, self.quality).map_err(|e| e.to_string()))
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(frame = index, error = %e, "skipping frame");
                    continue;
                }
            };
            if sent > 0 && !self.frame_delay.is_zero() {
                thread::sleep(self.frame_delay);
            }
            write_part(out, &jpeg)?;
            sent += 1;
        }
        write!(out, "--{BOUNDARY}--\r\n")?;
        out.flush()?;
        debug!(frames = sent, "frame source exhausted");
        Ok(sent)
    }
}

/// One multipart part, flushed so the client sees it immediately.
pub fn write_part<W: Write>(out: &mut W, jpeg: &[u8]) -> io::Result<()> {
    write!(
        out,
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    )?;
    out.write_all(jpeg)?;
    out.write_all(b"\r\n")?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{DirectiveSet, PipelineBuilder};
    use crate::test_helpers::{gradient_rgb, write_png};
    use image::GenericImageView;
    use tempfile::TempDir;

    struct VecFrames(VecDeque<DynamicImage>);

    impl FrameSource for VecFrames {
        fn next_frame(&mut self) -> Result<Option<DynamicImage>, StreamError> {
            Ok(self.0.pop_front())
        }
    }

    fn emitter(directives: serde_json::Value) -> Emitter {
        let serde_json::Value::Object(map) = directives else {
            panic!("directives must be an object");
        };
        Emitter {
            pipeline: PipelineBuilder::default()
                .build(&DirectiveSet::from(map))
                .unwrap(),
            quality: Quality::default(),
            frame_delay: Duration::ZERO,
        }
    }

    /// Split a multipart body into part payloads, checking each declared
    /// length against the bytes actually present.
    fn parts(body: &[u8]) -> Vec<Vec<u8>> {
        let mut parts = Vec::new();
        let mut rest = body;
        let closing = format!("--{BOUNDARY}--\r\n");
        while !rest.starts_with(closing.as_bytes()) {
            let head_end = rest
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .expect("part head");
            let head = std::str::from_utf8(&rest[..head_end]).unwrap();
            assert!(head.starts_with("--frame\r\nContent-Type: image/jpeg\r\n"));
            let length: usize = head
                .lines()
                .find_map(|l| l.strip_prefix("Content-Length: "))
                .unwrap()
                .parse()
                .unwrap();
            let start = head_end + 4;
            parts.push(rest[start..start + length].to_vec());
            assert_eq!(&rest[start + length..start + length + 2], b"\r\n");
            rest = &rest[start + length + 2..];
        }
        parts
    }

    // =========================================================================
    // Emitter
    // =========================================================================

    #[test]
    fn emits_one_part_per_frame() {
        let frames: VecDeque<_> = (0..3).map(|i| gradient_rgb(8 + i, 6)).collect();
        let mut source = VecFrames(frames);
        let mut out = Vec::new();
        let sent = emitter(serde_json::json!({"ConvertColorToGray": true}))
            .run(&mut source, &mut out, 1)
            .unwrap();
        assert_eq!(sent, 3);

        let head_end = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let head = std::str::from_utf8(&out[..head_end]).unwrap();
        assert!(head.contains(&format!("Content-Type: {CONTENT_TYPE}\r\n")));
        assert!(head.contains("Connection: close\r\n"));

        let parts = parts(&out[head_end..]);
        assert_eq!(parts.len(), 3);
        for (i, jpeg) in parts.iter().enumerate() {
            let frame = image::load_from_memory(jpeg).unwrap();
            assert_eq!(frame.dimensions(), (8 + i as u32, 6));
            assert!(matches!(frame, DynamicImage::ImageLuma8(_)));
        }
    }

    #[test]
    fn failing_frames_are_skipped() {
        let empty = DynamicImage::ImageRgb8(image::RgbImage::new(0, 0));
        let mut source = VecFrames(VecDeque::from([gradient_rgb(4, 4), empty, gradient_rgb(4, 4)]));
        let mut out = Vec::new();
        let sent = emitter(serde_json::json!({"StretchHistogram": true}))
            .run(&mut source, &mut out, 1)
            .unwrap();
        assert_eq!(sent, 2);
    }

    #[test]
    fn empty_source_sends_head_and_closing_boundary() {
        let mut source = VecFrames(VecDeque::new());
        let mut out = Vec::new();
        let sent = emitter(serde_json::json!({})).run(&mut source, &mut out, 0).unwrap();
        assert_eq!(sent, 0);
        assert!(out.starts_with(b"HTTP/1.0 200 OK\r\n"));
        assert!(out.ends_with(b"\r\n\r\n--frame--\r\n"));
    }

    // =========================================================================
    // Sources
    // =========================================================================

    #[test]
    fn directory_frames_are_sorted_and_skip_junk() {
        let tmp = TempDir::new().unwrap();
        write_png(tmp.path(), "b.png", &gradient_rgb(2, 2));
        write_png(tmp.path(), "a.png", &gradient_rgb(1, 1));
        fs::write(tmp.path().join("c.txt"), "not a frame").unwrap();
        write_png(tmp.path(), "d.png", &gradient_rgb(3, 3));
        fs::create_dir(tmp.path().join("nested")).unwrap();

        let mut source = DirectoryFrames::open(tmp.path()).unwrap();
        assert_eq!(source.remaining(), 4);
        let widths: Vec<u32> = std::iter::from_fn(|| source.next_frame().unwrap())
            .map(|f| f.width())
            .collect();
        assert_eq!(widths, [1, 2, 3]);
    }

    #[test]
    fn gif_frames_decode() {
        use image::codecs::gif::GifEncoder;
        use image::{Delay, Frame, Rgba, RgbaImage};

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("anim.gif");
        {
            let file = File::create(&path).unwrap();
            let mut encoder = GifEncoder::new(file);
            for shade in [0u8, 128, 255] {
                let buffer = RgbaImage::from_pixel(5, 4, Rgba([shade, shade, shade, 255]));
                encoder
                    .encode_frame(Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(10, 1)))
                    .unwrap();
            }
        }
        let mut source = open_source(&path).unwrap();
        let mut count = 0;
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!(frame.dimensions(), (5, 4));
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn open_source_rejects_missing_and_unsupported() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            open_source(&tmp.path().join("missing")),
            Err(StreamError::Open { .. })
        ));
        let png = write_png(tmp.path(), "still.png", &gradient_rgb(2, 2));
        assert!(matches!(open_source(&png), Err(StreamError::Open { .. })));
    }
}
