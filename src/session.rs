//! Per-connection state machine.
//!
//! ```text
//! AwaitRequest ──► Route ──► Dispatch ──► Respond ──► AwaitRequest (keep-alive)
//!      │                        │            └──────► Close
//!      │                        └──► Stream ─────────► Close
//!      └──► Close (peer closed, timeout, transport error)
//! ```
//!
//! One session owns one connection for its whole lifetime and handles its
//! requests strictly in order. Request-scoped failures (bad payload, size,
//! processing, panics inside a handler) become error responses and the
//! session keeps going; transport failures and broken framing end it.
//!
//! Reads are bounded twice: each one waits at most the socket's idle
//! timeout, and the whole of one request must arrive before a per-request
//! deadline armed when the session starts waiting for it.

use crate::config::ServiceConfig;
use crate::error::{ProcessingError, ServiceError, SessionError};
use crate::http::{self, Body, Limits, Request, Response, Status};
use crate::imaging::{DecodeLimits, Quality, encode_base64, encode_jpeg};
use crate::pipeline::{DirectiveSet, PipelineBuilder};
use crate::request;
use crate::stream::{self, Emitter};
use std::fs;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Read-only state shared by every session.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub limits: Limits,
    pub decode_limits: DecodeLimits,
    pub read_timeout: Duration,
    pub request_timeout: Duration,
    pub reference_image: PathBuf,
    pub builder: PipelineBuilder,
    pub quality: Quality,
    pub stream: StreamSettings,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub source: Option<PathBuf>,
    pub frame_delay: Duration,
    pub directives: DirectiveSet,
}

impl From<&ServiceConfig> for ServiceContext {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            limits: config.server.limits(),
            decode_limits: config.pipeline.decode_limits(),
            read_timeout: config.server.read_timeout(),
            request_timeout: config.server.request_timeout(),
            reference_image: config.server.reference_image.clone(),
            builder: config.pipeline.builder(),
            quality: config.pipeline.quality(),
            stream: StreamSettings {
                source: config.stream.source.clone(),
                frame_delay: config.stream.frame_delay(),
                directives: config.stream.directive_set(),
            },
        }
    }
}

/// A connection the session can read, write and half-close.
pub trait Transport: Read + Write {
    /// Bound how long the next read may block.
    fn set_read_wait(&mut self, wait: Duration) -> io::Result<()>;

    fn shutdown_write(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_read_wait(&mut self, wait: Duration) -> io::Result<()> {
        self.set_read_timeout(Some(wait))
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

/// Transport wrapper that caps every read at the idle timeout and at the
/// time left before the armed request deadline.
struct Deadline<T> {
    inner: T,
    idle: Duration,
    until: Option<Instant>,
}

impl<T: Transport> Deadline<T> {
    fn arm(&mut self, budget: Duration) {
        self.until = Some(Instant::now() + budget);
    }
}

impl<T: Transport> Read for Deadline<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(until) = self.until {
            let left = until.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "request deadline passed",
                ));
            }
            self.inner.set_read_wait(left.min(self.idle))?;
        }
        self.inner.read(buf)
    }
}

impl<T: Transport> Write for Deadline<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Reference,
    Process,
    Stream,
    MethodNotAllowed,
    NotFound,
}

/// Classify a request by path and method. `/stream` accepts any method.
pub fn route(method: &str, path: &str) -> Route {
    match (path, method) {
        ("/", "GET") => Route::Reference,
        ("/", "POST") => Route::Process,
        ("/", _) => Route::MethodNotAllowed,
        ("/stream", _) => Route::Stream,
        _ => Route::NotFound,
    }
}

/// A response on its way out, with what the log line needs.
#[derive(Debug)]
struct Reply {
    response: Response,
    keep_alive: bool,
    version: u8,
    method: String,
    path: String,
    started: Instant,
}

impl Reply {
    fn to(request: &Request, response: Response, started: Instant) -> Self {
        Self {
            response,
            keep_alive: request.keep_alive,
            version: request.version,
            method: request.method.clone(),
            path: request.path().to_string(),
            started,
        }
    }
}

#[derive(Debug)]
enum State {
    AwaitRequest,
    Route(Request),
    Dispatch(Request, Route),
    Respond(Reply),
    Stream(Request),
    Close,
}

/// Produces the response for a routed, non-streaming request.
type Handler = fn(&ServiceContext, &Request, Route) -> Result<Response, ServiceError>;

pub struct Session<'a, T: Transport> {
    conn: BufReader<Deadline<T>>,
    ctx: &'a ServiceContext,
    handler: Handler,
    served: u64,
}

impl<'a, T: Transport> Session<'a, T> {
    pub fn new(transport: T, ctx: &'a ServiceContext) -> Self {
        Self {
            conn: BufReader::new(Deadline {
                inner: transport,
                idle: ctx.read_timeout,
                until: None,
            }),
            ctx,
            handler: handle,
            served: 0,
        }
    }

    #[cfg(test)]
    fn with_handler(mut self, handler: Handler) -> Self {
        self.handler = handler;
        self
    }

    /// Drive the connection until it closes. Returns the number of
    /// responses written.
    pub fn run(mut self) -> u64 {
        let mut state = State::AwaitRequest;
        loop {
            state = match state {
                State::AwaitRequest => self.await_request(),
                State::Route(request) => {
                    let route = route(&request.method, request.path());
                    State::Dispatch(request, route)
                }
                State::Dispatch(request, Route::Stream) => State::Stream(request),
                State::Dispatch(request, route) => self.dispatch(request, route),
                State::Respond(reply) => self.respond(reply),
                State::Stream(request) => self.stream(request),
                State::Close => {
                    self.close();
                    return self.served;
                }
            };
        }
    }

    fn await_request(&mut self) -> State {
        let started = Instant::now();
        self.conn.get_mut().arm(self.ctx.request_timeout);
        match http::read_request(&mut self.conn, &self.ctx.limits) {
            Ok(None) => {
                debug!("peer closed connection");
                State::Close
            }
            Ok(Some(request)) => match request.body {
                Body::TooLarge { size } => {
                    let err = ServiceError::PayloadTooLarge {
                        size,
                        limit: self.ctx.limits.max_body_bytes as u64,
                    };
                    let response = Response::error(err.status(), &err.to_string());
                    State::Respond(Reply::to(&request, response, started))
                }
                Body::Complete(_) => State::Route(request),
            },
            Err(e) if e.is_timeout() => {
                debug!(error = %e, "read timed out");
                State::Close
            }
            Err(SessionError::Protocol(message)) => {
                warn!(error = %message, "malformed request");
                State::Respond(Reply {
                    response: Response::error(Status::BadRequest, &message),
                    keep_alive: false,
                    version: 1,
                    method: "-".into(),
                    path: "-".into(),
                    started,
                })
            }
            Err(e) => {
                warn!(error = %e, "read failed");
                State::Close
            }
        }
    }

    fn dispatch(&mut self, request: Request, route: Route) -> State {
        let started = Instant::now();
        let (ctx, handler) = (self.ctx, self.handler);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(ctx, &request, route)));
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                let status = err.status();
                if status == Status::InternalServerError {
                    error!(error = %err, "request failed");
                } else {
                    debug!(error = %err, "request rejected");
                }
                Response::error(status, &err.to_string())
            }
            Err(_) => {
                error!("handler panicked");
                Response::error(Status::InternalServerError, "internal error")
            }
        };
        State::Respond(Reply::to(&request, response, started))
    }

    fn respond(&mut self, reply: Reply) -> State {
        let written = reply
            .response
            .write_to(self.conn.get_mut(), reply.keep_alive, reply.version);
        info!(
            method = %reply.method,
            path = %reply.path,
            status = reply.response.status.code(),
            elapsed_ms = reply.started.elapsed().as_millis() as u64,
            "request"
        );
        if let Err(e) = written {
            warn!(error = %e, "write failed");
            return State::Close;
        }
        self.served += 1;
        if reply.keep_alive {
            State::AwaitRequest
        } else {
            State::Close
        }
    }

    fn stream(&mut self, request: Request) -> State {
        let started = Instant::now();
        let settings = &self.ctx.stream;
        let Some(source_path) = &settings.source else {
            let err = ServiceError::NotImplemented("streaming is not configured".into());
            let response = Response::error(err.status(), &err.to_string());
            return State::Respond(Reply::to(&request, response, started));
        };
        let mut source = match stream::open_source(source_path) {
            Ok(source) => source,
            Err(e) => {
                warn!(error = %e, "stream source unavailable");
                let err = ServiceError::NotFound(e.to_string());
                let response = Response::error(err.status(), &err.to_string());
                return State::Respond(Reply::to(&request, response, started));
            }
        };
        let pipeline = match self.ctx.builder.build(&settings.directives) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                let response = Response::error(Status::InternalServerError, &e.to_string());
                return State::Respond(Reply::to(&request, response, started));
            }
        };

        let emitter = Emitter {
            pipeline,
            quality: self.ctx.quality,
            frame_delay: settings.frame_delay,
        };
        match emitter.run(source.as_mut(), self.conn.get_mut(), request.version) {
            Ok(frames) => {
                self.served += 1;
                info!(
                    method = %request.method,
                    path = %request.path(),
                    status = 200,
                    frames,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "stream finished"
                );
            }
            Err(e) => warn!(error = %e, "stream ended early"),
        }
        State::Close
    }

    fn close(&mut self) {
        if let Err(e) = self.conn.get_mut().inner.shutdown_write() {
            debug!(error = %e, "shutdown failed");
        }
    }
}

fn handle(ctx: &ServiceContext, request: &Request, route: Route) -> Result<Response, ServiceError> {
    match route {
        Route::Reference => match fs::read(&ctx.reference_image) {
            Ok(bytes) => Ok(Response::bytes(Status::Ok, "image/jpeg", bytes)),
            Err(e) => {
                debug!(path = %ctx.reference_image.display(), error = %e, "reference image unavailable");
                Err(ServiceError::NotFound("reference image not found".into()))
            }
        },
        Route::Process => match &request.body {
            Body::Complete(raw) => process(ctx, raw),
            Body::TooLarge { size } => Err(ServiceError::PayloadTooLarge {
                size: *size,
                limit: ctx.limits.max_body_bytes as u64,
            }),
        },
        Route::MethodNotAllowed => Err(ServiceError::MethodNotAllowed(request.method.clone())),
        Route::NotFound => Err(ServiceError::NotFound(format!(
            "no route for {}",
            request.path()
        ))),
        Route::Stream => Err(ServiceError::Internal(
            "stream requests are not dispatched".into(),
        )),
    }
}

/// `POST /`: decode, build, apply, encode.
fn process(ctx: &ServiceContext, raw: &[u8]) -> Result<Response, ServiceError> {
    let decoded = request::decode(raw, ctx.limits.max_body_bytes, ctx.decode_limits)?;
    let pipeline = ctx.builder.build(&decoded.directives)?;
    let output = pipeline.apply(decoded.image)?;
    let jpeg = encode_jpeg(&output, ctx.quality).map_err(ProcessingError::from)?;
    let encoded = encode_base64(&jpeg);
    if encoded.is_empty() {
        return Err(ServiceError::Internal("encoder produced no output".into()));
    }
    Ok(Response::json(
        Status::Ok,
        &serde_json::json!({ "processed_image": encoded }),
    ))
}
