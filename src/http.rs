//! Minimal HTTP/1.x framing.
//!
//! Request heads are parsed with `httparse`; bodies are read from either a
//! `Content-Length` or a chunked transfer coding. Responses always carry an
//! explicit `Content-Length` so the connection can be reused, except for the
//! multipart stream which ends with the connection.

use crate::error::SessionError;
use std::io::{self, BufRead, Read, Write};

pub const SERVER_NAME: &str = concat!("darkroom/", env!("CARGO_PKG_VERSION"));

const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    PayloadTooLarge,
    InternalServerError,
    NotImplemented,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
            Status::PayloadTooLarge => 413,
            Status::InternalServerError => 500,
            Status::NotImplemented => 501,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::PayloadTooLarge => "Payload Too Large",
            Status::InternalServerError => "Internal Server Error",
            Status::NotImplemented => "Not Implemented",
        }
    }
}

/// Size caps applied while reading a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_bytes: 16 * 1024,
            max_body_bytes: crate::request::DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Complete(Vec<u8>),
    /// The body exceeded `max_body_bytes`. `size` is the declared length,
    /// or the number of bytes seen before reading stopped.
    TooLarge { size: u64 },
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    /// Minor version: `0` for HTTP/1.0, `1` for HTTP/1.1.
    pub version: u8,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    pub keep_alive: bool,
}

impl Request {
    /// Request target without its query string.
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    /// First header with this name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Read one request from the connection.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between
/// requests. An oversized body is drained when it fits within twice the
/// limit so the connection can carry on; past that the request is marked
/// `keep_alive = false` and reading stops.
pub fn read_request<R: BufRead>(
    reader: &mut R,
    limits: &Limits,
) -> Result<Option<Request>, SessionError> {
    let Some(head) = read_head(reader, limits.max_header_bytes)? else {
        return Ok(None);
    };

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    match parsed.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(SessionError::Protocol("incomplete request head".into()));
        }
        Err(e) => return Err(SessionError::Protocol(format!("malformed request: {e}"))),
    }

    let method = parsed.method.unwrap_or_default().to_string();
    let target = parsed.path.unwrap_or_default().to_string();
    let version = parsed.version.unwrap_or(1);
    let headers: Vec<(String, String)> = parsed
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect();

    let mut request = Request {
        keep_alive: keep_alive(version, &headers),
        method,
        target,
        version,
        headers,
        body: Body::Complete(Vec::new()),
    };

    let limit = limits.max_body_bytes as u64;
    if let Some(coding) = request.header("transfer-encoding") {
        if !coding.eq_ignore_ascii_case("chunked") {
            return Err(SessionError::Protocol(format!(
                "unsupported transfer-encoding '{coding}'"
            )));
        }
        let (body, fits_window) = read_chunked(reader, limit)?;
        request.body = body;
        request.keep_alive &= fits_window;
    } else if let Some(raw) = request.header("content-length") {
        let length: u64 = raw
            .parse()
            .map_err(|_| SessionError::Protocol(format!("invalid content-length '{raw}'")))?;
        if length <= limit {
            let mut body = vec![0u8; length as usize];
            reader.read_exact(&mut body)?;
            request.body = Body::Complete(body);
        } else {
            if length <= limit.saturating_mul(2) {
                io::copy(&mut (&mut *reader).take(length), &mut io::sink())?;
            } else {
                request.keep_alive = false;
            }
            request.body = Body::TooLarge { size: length };
        }
    }

    Ok(Some(request))
}

/// Collect header lines up to and including the blank line. Blank lines
/// skipped before the request line count against `max`.
fn read_head<R: BufRead>(reader: &mut R, max: usize) -> Result<Option<Vec<u8>>, SessionError> {
    let mut head = Vec::new();
    let mut skipped = 0;
    loop {
        let remaining = max.saturating_sub(head.len() + skipped);
        if remaining == 0 {
            return Err(SessionError::Protocol(format!(
                "request head exceeds {max} bytes"
            )));
        }
        let mut line = Vec::new();
        let n = (&mut *reader)
            .take(remaining as u64)
            .read_until(b'\n', &mut line)?;
        if n == 0 {
            if head.is_empty() {
                return Ok(None);
            }
            return Err(SessionError::Protocol(
                "connection closed inside request head".into(),
            ));
        }
        if !line.ends_with(b"\n") {
            let message = if n == remaining {
                format!("request head exceeds {max} bytes")
            } else {
                "connection closed inside request head".to_string()
            };
            return Err(SessionError::Protocol(message));
        }
        let blank = line == b"\r\n" || line == b"\n";
        if blank && head.is_empty() {
            // Stray line breaks between pipelined requests.
            skipped += n;
            continue;
        }
        head.extend_from_slice(&line);
        if blank {
            return Ok(Some(head));
        }
    }
}

/// Decode a chunked body. The flag is false when reading stopped past the
/// drain window and the connection can no longer be trusted.
fn read_chunked<R: BufRead>(reader: &mut R, limit: u64) -> Result<(Body, bool), SessionError> {
    let window = limit.saturating_mul(2);
    let mut body = Vec::new();
    let mut total: u64 = 0;
    loop {
        let line = read_line(reader)?;
        let size_field = line.split(';').next().unwrap_or_default().trim();
        let size = u64::from_str_radix(size_field, 16)
            .map_err(|_| SessionError::Protocol(format!("invalid chunk size '{size_field}'")))?;
        if size == 0 {
            break;
        }
        total = total.saturating_add(size);
        if total > window {
            return Ok((Body::TooLarge { size: total }, false));
        }
        if total > limit {
            body.clear();
            io::copy(&mut (&mut *reader).take(size), &mut io::sink())?;
        } else {
            let start = body.len();
            body.resize(start + size as usize, 0);
            reader.read_exact(&mut body[start..])?;
        }
        if !read_line(reader)?.is_empty() {
            return Err(SessionError::Protocol("chunk not followed by CRLF".into()));
        }
    }
    // Trailers are read and discarded.
    while !read_line(reader)?.is_empty() {}

    if total > limit {
        Ok((Body::TooLarge { size: total }, true))
    } else {
        Ok((Body::Complete(body), true))
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<String, SessionError> {
    let mut line = Vec::new();
    let n = (&mut *reader).take(8 * 1024).read_until(b'\n', &mut line)?;
    if n == 0 || !line.ends_with(b"\n") {
        return Err(SessionError::Protocol("truncated chunked body".into()));
    }
    Ok(String::from_utf8_lossy(&line).trim_end().to_string())
}

fn keep_alive(version: u8, headers: &[(String, String)]) -> bool {
    let mut keep = version >= 1;
    for (_, value) in headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("connection"))
    {
        for token in value.split(',').map(str::trim) {
            if token.eq_ignore_ascii_case("close") {
                return false;
            }
            if token.eq_ignore_ascii_case("keep-alive") {
                keep = true;
            }
        }
    }
    keep
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(status: Status, value: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    pub fn bytes(status: Status, content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            body,
        }
    }

    /// `{"error": message}` with the given status.
    pub fn error(status: Status, message: &str) -> Self {
        Self::json(status, &serde_json::json!({ "error": message }))
    }

    pub fn write_to<W: Write>(&self, out: &mut W, keep_alive: bool, version: u8) -> io::Result<()> {
        let head = format!(
            "HTTP/1.{version} {code} {reason}\r\n\
             Server: {SERVER_NAME}\r\n\
             Content-Type: {content_type}\r\n\
             Content-Length: {length}\r\n\
             Connection: {connection}\r\n\r\n",
            code = self.status.code(),
            reason = self.status.reason(),
            content_type = self.content_type,
            length = self.body.len(),
            connection = if keep_alive { "keep-alive" } else { "close" },
        );
        out.write_all(head.as_bytes())?;
        out.write_all(&self.body)?;
        out.flush()
    }
}

/// Head of an open-ended streaming response. The body runs until the
/// connection closes.
pub fn write_stream_head<W: Write>(out: &mut W, content_type: &str, version: u8) -> io::Result<()> {
    let head = format!(
        "HTTP/1.{version} 200 OK\r\n\
         Server: {SERVER_NAME}\r\n\
         Content-Type: {content_type}\r\n\
         Cache-Control: no-cache\r\n\
         Connection: close\r\n\r\n"
    );
    out.write_all(head.as_bytes())?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn limits(max_body: usize) -> Limits {
        Limits {
            max_header_bytes: 1024,
            max_body_bytes: max_body,
        }
    }

    fn read(raw: &[u8], max_body: usize) -> Result<Option<Request>, SessionError> {
        read_request(&mut Cursor::new(raw.to_vec()), &limits(max_body))
    }

    // =========================================================================
    // Request heads
    // =========================================================================

    #[test]
    fn parses_simple_get() {
        let req = read(b"GET /?x=1 HTTP/1.1\r\nHost: a\r\n\r\n", 100)
            .unwrap()
            .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/?x=1");
        assert_eq!(req.path(), "/");
        assert_eq!(req.version, 1);
        assert!(req.keep_alive);
        assert_eq!(req.header("HOST"), Some("a"));
        assert_eq!(req.body, Body::Complete(Vec::new()));
    }

    #[test]
    fn clean_eof_is_none() {
        assert!(read(b"", 100).unwrap().is_none());
        assert!(read(b"\r\n\r\n", 100).unwrap().is_none());
    }

    #[test]
    fn eof_inside_head_is_protocol_error() {
        let err = read(b"GET / HTTP/1.1\r\nHost: a\r\n", 100).unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
    }

    #[test]
    fn garbage_is_protocol_error() {
        let err = read(b"\x01\x02 nonsense\r\n\r\n", 100).unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
    }

    #[test]
    fn oversized_head_is_protocol_error() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Long: ".to_vec();
        raw.extend(std::iter::repeat_n(b'a', 2048));
        raw.extend_from_slice(b"\r\n\r\n");
        let err = read(&raw, 100).unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
    }

    #[test]
    fn leading_blank_lines_count_against_head_limit() {
        let req = read(b"\r\n\r\nGET / HTTP/1.1\r\n\r\n", 100).unwrap().unwrap();
        assert_eq!(req.method, "GET");

        let mut raw = b"\r\n".repeat(600);
        raw.extend_from_slice(b"GET / HTTP/1.1\r\n\r\n");
        let err = read(&raw, 100).unwrap_err();
        assert!(matches!(err, SessionError::Protocol(ref m) if m.contains("exceeds")));
    }

    #[test]
    fn keep_alive_defaults_follow_version() {
        let v10 = read(b"GET / HTTP/1.0\r\n\r\n", 100).unwrap().unwrap();
        assert!(!v10.keep_alive);
        let v10_ka = read(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n", 100)
            .unwrap()
            .unwrap();
        assert!(v10_ka.keep_alive);
        let v11_close = read(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n", 100)
            .unwrap()
            .unwrap();
        assert!(!v11_close.keep_alive);
    }

    // =========================================================================
    // Bodies
    // =========================================================================

    #[test]
    fn content_length_body_and_pipelining() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /x HTTP/1.1\r\n\r\n";
        let mut cursor = Cursor::new(raw.to_vec());
        let first = read_request(&mut cursor, &limits(100)).unwrap().unwrap();
        assert_eq!(first.body, Body::Complete(b"hello".to_vec()));
        let second = read_request(&mut cursor, &limits(100)).unwrap().unwrap();
        assert_eq!(second.target, "/x");
        assert!(read_request(&mut cursor, &limits(100)).unwrap().is_none());
    }

    #[test]
    fn invalid_content_length_is_protocol_error() {
        let err = read(b"POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n", 100).unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
    }

    #[test]
    fn oversized_body_within_window_is_drained() {
        let mut raw = b"POST / HTTP/1.1\r\nContent-Length: 15\r\n\r\n".to_vec();
        raw.extend_from_slice(&[b'x'; 15]);
        raw.extend_from_slice(b"GET / HTTP/1.1\r\n\r\n");
        let mut cursor = Cursor::new(raw);
        let first = read_request(&mut cursor, &limits(10)).unwrap().unwrap();
        assert_eq!(first.body, Body::TooLarge { size: 15 });
        assert!(first.keep_alive);
        let second = read_request(&mut cursor, &limits(10)).unwrap().unwrap();
        assert_eq!(second.method, "GET");
    }

    #[test]
    fn oversized_body_past_window_closes() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 1000\r\n\r\n";
        let req = read(raw, 10).unwrap().unwrap();
        assert_eq!(req.body, Body::TooLarge { size: 1000 });
        assert!(!req.keep_alive);
    }

    #[test]
    fn chunked_body_is_reassembled() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                    5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\nX-Trailer: y\r\n\r\n";
        let req = read(raw, 100).unwrap().unwrap();
        assert_eq!(req.body, Body::Complete(b"hello world".to_vec()));
        assert!(req.keep_alive);
    }

    #[test]
    fn chunked_body_over_limit() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                    8\r\n12345678\r\n4\r\nabcd\r\n0\r\n\r\n";
        let req = read(raw, 10).unwrap().unwrap();
        assert_eq!(req.body, Body::TooLarge { size: 12 });
        assert!(req.keep_alive);
    }

    #[test]
    fn unsupported_transfer_encoding() {
        let err = read(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n", 100).unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
    }

    // =========================================================================
    // Responses
    // =========================================================================

    #[test]
    fn response_carries_length_connection_and_server() {
        let mut out = Vec::new();
        Response::error(Status::BadRequest, "nope")
            .write_to(&mut out, true, 1)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains(&format!("Server: {SERVER_NAME}\r\n")));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        let body = r#"{"error":"nope"}"#;
        assert!(text.contains(&format!("Content-Length: {}\r\n", body.len())));
        assert!(text.ends_with(body));
    }

    #[test]
    fn response_echoes_http_10() {
        let mut out = Vec::new();
        Response::bytes(Status::Ok, "image/jpeg", vec![1, 2, 3])
            .write_to(&mut out, false, 0)
            .unwrap();
        assert!(out.starts_with(b"HTTP/1.0 200 OK\r\n"));
        assert!(out.ends_with(&[1, 2, 3]));
    }

    #[test]
    fn stream_head_has_no_length() {
        let mut out = Vec::new();
        write_stream_head(&mut out, "multipart/x-mixed-replace; boundary=frame", 1).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("Content-Length"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
