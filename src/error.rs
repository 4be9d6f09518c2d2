//! Error taxonomy.
//!
//! Errors come in two scopes:
//!
//! - [`ServiceError`] belongs to a single request. The session turns it into
//!   a JSON error response via [`ServiceError::status`] and keeps reading.
//! - [`SessionError`] belongs to the connection. Transport failures and
//!   broken framing end the session.

use crate::http::Status;
use crate::imaging::OperationError;
use std::io;
use thiserror::Error;

/// A directive parameter failed its factory's validation.
///
/// The message names the offending field and the constraint it broke, e.g.
/// `Blur: kernel_size must be a positive odd integer (got 4)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{directive}: {message}")]
pub struct InvalidParameter {
    pub directive: String,
    pub message: String,
}

impl InvalidParameter {
    pub fn new(directive: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            directive: directive.into(),
            message: message.into(),
        }
    }
}

/// The payload or its directives are unusable. Answered with 400.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("invalid JSON payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("missing or invalid 'img' field: expected a base64-encoded image string")]
    MissingImage,
    #[error("base64 decode failed: {0}")]
    Base64Decode(#[from] base64::DecodeError),
    #[error("image decode failed: {0}")]
    ImageDecode(String),
    #[error("unknown directive '{0}'")]
    UnknownDirective(String),
    #[error("invalid parameter {0}")]
    InvalidParameter(#[from] InvalidParameter),
}

/// Pipeline application or output encoding failed. Answered with 500.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("{stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: OperationError,
    },
    #[error("failed to encode processed image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Everything a single request can fail with.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("request body of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: u64, limit: u64 },
    #[error("image too large to decode: {0}")]
    ImageTooLarge(String),
    #[error(transparent)]
    Processing(#[from] ProcessingError),
    #[error("{0}")]
    NotFound(String),
    #[error("method {0} not allowed")]
    MethodNotAllowed(String),
    #[error("{0}")]
    NotImplemented(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// The response status for this error kind.
    pub fn status(&self) -> Status {
        match self {
            ServiceError::Validation(_) => Status::BadRequest,
            ServiceError::PayloadTooLarge { .. } | ServiceError::ImageTooLarge(_) => {
                Status::PayloadTooLarge
            }
            ServiceError::Processing(_) | ServiceError::Internal(_) => Status::InternalServerError,
            ServiceError::NotFound(_) => Status::NotFound,
            ServiceError::MethodNotAllowed(_) => Status::MethodNotAllowed,
            ServiceError::NotImplemented(_) => Status::NotImplemented,
        }
    }
}

/// Failures that end the connection.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// True when the socket hit its read deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SessionError::Transport(e)
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        )
    }
}
