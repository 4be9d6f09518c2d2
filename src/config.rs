//! Service configuration module.
//!
//! Handles loading, validating, and merging TOML config files. Configuration
//! is layered: stock defaults are overridden by each `--config` file in the
//! order given, so a shared base file can be refined by a host-specific one.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [server]
//! # workers = 8                 # Session worker threads (omit for auto)
//! queue_depth = 64              # Accepted connections waiting for a worker
//! read_timeout_secs = 30        # Idle/read deadline per socket
//! write_timeout_secs = 30
//! request_timeout_secs = 60     # Whole-request read deadline
//! max_body_bytes = 10485760     # 10 MiB
//! max_header_bytes = 16384
//! reference_image = "x.jpg"     # Served by GET /
//!
//! [pipeline]
//! unknown_directives = "reject" # or "ignore"
//! jpeg_quality = 90             # 1-100
//! max_image_dimension = 16384   # Largest decoded width or height
//! max_decode_bytes = 268435456  # Largest decoded RGB8 image (256 MiB)
//!
//! [stream]
//! # source = "frames/"          # Directory of frames or an animated GIF
//! frame_delay_ms = 40
//!
//! [stream.directives]
//! ConvertColorToGray = true
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse. Override just the values you want:
//!
//! ```toml
//! [server]
//! reference_image = "/srv/darkroom/reference.jpg"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::http::Limits;
use crate::imaging::params::MAX_DIMENSION;
use crate::imaging::{DecodeLimits, Quality};
use crate::pipeline::{DirectiveSet, PipelineBuilder, UnknownDirectivePolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Service configuration.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub stream: StreamConfig,
}

impl ServiceConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.workers == Some(0) {
            return Err(ConfigError::Validation(
                "server.workers must be at least 1".into(),
            ));
        }
        if server.queue_depth == 0 {
            return Err(ConfigError::Validation(
                "server.queue_depth must be at least 1".into(),
            ));
        }
        if server.read_timeout_secs == 0
            || server.write_timeout_secs == 0
            || server.request_timeout_secs == 0
        {
            return Err(ConfigError::Validation(
                "server timeouts must be greater than 0".into(),
            ));
        }
        if server.max_body_bytes == 0 {
            return Err(ConfigError::Validation(
                "server.max_body_bytes must be greater than 0".into(),
            ));
        }
        if server.max_header_bytes < 1024 {
            return Err(ConfigError::Validation(
                "server.max_header_bytes must be at least 1024".into(),
            ));
        }
        if self.pipeline.jpeg_quality == 0 || self.pipeline.jpeg_quality > 100 {
            return Err(ConfigError::Validation(
                "pipeline.jpeg_quality must be 1-100".into(),
            ));
        }
        let dimension = self.pipeline.max_image_dimension;
        if dimension == 0 || i64::from(dimension) > MAX_DIMENSION {
            return Err(ConfigError::Validation(format!(
                "pipeline.max_image_dimension must be 1-{MAX_DIMENSION}"
            )));
        }
        if self.pipeline.max_decode_bytes == 0 {
            return Err(ConfigError::Validation(
                "pipeline.max_decode_bytes must be greater than 0".into(),
            ));
        }
        self.stream.check_directives(self.pipeline.builder())
    }
}

/// Listener and connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Session worker threads. When absent, derived from the core count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    pub queue_depth: usize,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    /// Upper bound on reading one whole request, head and body.
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
    pub max_header_bytes: usize,
    pub reference_image: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            workers: None,
            queue_depth: 64,
            read_timeout_secs: 30,
            write_timeout_secs: 30,
            request_timeout_secs: 60,
            max_body_bytes: limits.max_body_bytes,
            max_header_bytes: limits.max_header_bytes,
            reference_image: PathBuf::from("x.jpg"),
        }
    }
}

impl ServerConfig {
    pub fn limits(&self) -> Limits {
        Limits {
            max_header_bytes: self.max_header_bytes,
            max_body_bytes: self.max_body_bytes,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Resolve the effective worker count from config.
///
/// - `None` → the core count, but never fewer than 4 since a keep-alive
///   client holds its worker between requests
/// - `Some(n)` → exactly `n`
pub fn effective_workers(config: &ServerConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.workers.unwrap_or_else(|| cores.max(4))
}

/// Directive handling for `POST /`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub unknown_directives: UnknownDirectivePolicy,
    pub jpeg_quality: u32,
    pub max_image_dimension: u32,
    pub max_decode_bytes: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            unknown_directives: UnknownDirectivePolicy::Reject,
            jpeg_quality: 90,
            max_image_dimension: DecodeLimits::default().max_dimension,
            max_decode_bytes: DecodeLimits::default().max_bytes,
        }
    }
}

impl PipelineConfig {
    pub fn builder(&self) -> PipelineBuilder {
        PipelineBuilder::new(self.unknown_directives)
    }

    pub fn quality(&self) -> Quality {
        Quality::new(self.jpeg_quality)
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_dimension: self.max_image_dimension,
            max_bytes: self.max_decode_bytes,
        }
    }
}

/// Frame source and per-frame directives for `GET /stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Directory of frames or an animated GIF. `/stream` answers 501 without one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    pub frame_delay_ms: u64,
    pub directives: serde_json::Map<String, serde_json::Value>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        let mut directives = serde_json::Map::new();
        directives.insert("ConvertColorToGray".into(), serde_json::Value::Bool(true));
        Self {
            source: None,
            frame_delay_ms: 40,
            directives,
        }
    }
}

impl StreamConfig {
    pub fn frame_delay(&self) -> Duration {
        Duration::from_millis(self.frame_delay_ms)
    }

    pub fn directive_set(&self) -> DirectiveSet {
        DirectiveSet::from(self.directives.clone())
    }

    fn check_directives(&self, builder: PipelineBuilder) -> Result<(), ConfigError> {
        builder
            .build(&self.directive_set())
            .map(|_| ())
            .map_err(|e| ConfigError::Validation(format!("stream.directives: {e}")))
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// `ServiceConfig::default()` as a TOML table: the bottom layer every
/// `--config` file is merged onto.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ServiceConfig::default())?)
}

/// Lay one `--config` file over the layers below it.
///
/// Tables merge key by key, so a file that sets `[stream.directives]
/// Blur = ...` keeps the default `ConvertColorToGray`. Any other value in
/// `overlay`, arrays included, replaces what was there.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(below), toml::Value::Table(layer)) => toml::Value::Table(
            layer.into_iter().fold(below, |mut merged, (key, value)| {
                let value = match merged.remove(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => value,
                };
                merged.insert(key, value);
                merged
            }),
        ),
        (_, replacement) => replacement,
    }
}

/// Load a config file as a raw TOML value.
pub fn load_raw_config(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Merge overlays onto a base value in order, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlays: impl IntoIterator<Item = toml::Value>,
) -> Result<ServiceConfig, ConfigError> {
    let merged = overlays.into_iter().fold(base, merge_toml);
    let config: ServiceConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the given files, later files overriding earlier ones.
///
/// With no files the stock defaults apply. Unknown keys are rejected and the
/// result is validated.
pub fn load_config(paths: &[PathBuf]) -> Result<ServiceConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlays = paths
        .iter()
        .map(|p| load_raw_config(p))
        .collect::<Result<Vec<_>, _>>()?;
    resolve_config(base, overlays)
}

/// Returns a fully-commented stock config file with all keys and explanations.
///
/// Used by the `--print-config` CLI flag.
pub fn stock_config_toml() -> &'static str {
    r##"# Darkroom Configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Pass one or more files with --config; later files override earlier ones.
# Each file only needs the keys it wants to override.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Listener and connections
# ---------------------------------------------------------------------------
[server]
# Worker threads serving sessions. One worker owns one connection for its
# whole keep-alive lifetime. Omit for auto (CPU cores, at least 4).
# workers = 8

# Accepted connections allowed to wait for a free worker. When the queue is
# full the acceptor stops accepting until a worker frees up.
queue_depth = 64

# Socket deadlines in seconds. An idle keep-alive connection is closed when
# the read deadline passes.
read_timeout_secs = 30
write_timeout_secs = 30

# Longest time one request may take to arrive, counted from when the session
# starts waiting for it. A client trickling bytes is cut off here even though
# each read beats read_timeout_secs.
request_timeout_secs = 60

# Largest accepted request body (10 MiB). Larger bodies get 413.
max_body_bytes = 10485760

# Largest accepted request head.
max_header_bytes = 16384

# Image served by GET /.
reference_image = "x.jpg"

# ---------------------------------------------------------------------------
# Directive processing for POST /
# ---------------------------------------------------------------------------
[pipeline]
# What to do with directive names that are not recognised:
#   "reject" - answer 400 naming the directive
#   "ignore" - skip it and apply the rest
unknown_directives = "reject"

# JPEG quality of processed images (1-100).
jpeg_quality = 90

# Bounds on the decoded size of a submitted image. A small compressed file
# can declare a huge canvas; such images get 413 before pixels are allocated.
max_image_dimension = 16384
max_decode_bytes = 268435456

# ---------------------------------------------------------------------------
# Frame streaming for GET /stream
# ---------------------------------------------------------------------------
[stream]
# A directory of image frames (played in file-name order) or an animated
# GIF. Without a source, /stream answers 501.
# source = "frames/"

# Pause between frames in milliseconds.
frame_delay_ms = 40

# Directives applied to every frame, same names as POST / payloads. Tables
# merge with these defaults, so set ConvertColorToGray = false to drop it.
[stream.directives]
ConvertColorToGray = true
"##
}
