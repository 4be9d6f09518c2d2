//! Blocking companion client for the service.
//!
//! [`Client::post_image`] sends a file's bytes with a set of directives to
//! `POST /` and returns the decoded JPEG from `processed_image`.
//! [`Client::get`] fetches a path and returns the raw body. Each call opens
//! its own connection and asks the server to close it afterwards.

use crate::imaging::{decode_base64, encode_base64};
use serde_json::{Map, Value};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;

const MAX_HEADERS: usize = 32;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),
    #[error("malformed response: {0}")]
    Protocol(String),
    #[error("server answered {status}: {message}")]
    Status { status: u16, message: String },
    #[error("response is not JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("processed image is not base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("response has no '{0}' field")]
    MissingField(&'static str),
}

/// A parsed HTTP response.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Client {
    host: String,
    port: u16,
    timeout: Duration,
}

impl Client {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// POST `image` with `directives` and return the processed JPEG bytes.
    ///
    /// An `img` key in `directives` is replaced by the encoded image.
    pub fn post_image(
        &self,
        image: &[u8],
        directives: &Map<String, Value>,
    ) -> Result<Vec<u8>, ClientError> {
        let mut payload = directives.clone();
        payload.insert("img".into(), Value::String(encode_base64(image)));
        let body = serde_json::to_vec(&Value::Object(payload))?;

        let reply = self.send("POST", "/", Some(&body))?;
        let json: Value = serde_json::from_slice(&reply.body)?;
        let encoded = json
            .get("processed_image")
            .and_then(Value::as_str)
            .ok_or(ClientError::MissingField("processed_image"))?;
        Ok(decode_base64(encoded)?)
    }

    /// GET `target` and return the body.
    pub fn get(&self, target: &str) -> Result<Vec<u8>, ClientError> {
        Ok(self.send("GET", target, None)?.body)
    }

    /// Send one request and read the whole response. Non-2xx statuses
    /// become [`ClientError::Status`] carrying the server's `error` text.
    pub fn send(
        &self,
        method: &str,
        target: &str,
        body: Option<&[u8]>,
    ) -> Result<Reply, ClientError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", self.host))
            })?;
        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let mut head = format!(
            "{method} {target} HTTP/1.1\r\nHost: {}:{}\r\nConnection: close\r\n",
            self.host, self.port
        );
        if let Some(body) = body {
            head.push_str("Content-Type: application/json\r\n");
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        head.push_str("\r\n");
        stream.write_all(head.as_bytes())?;
        if let Some(body) = body {
            stream.write_all(body)?;
        }
        stream.flush()?;

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw)?;
        let reply = parse_reply(&raw)?;
        if !(200..300).contains(&reply.status) {
            return Err(ClientError::Status {
                status: reply.status,
                message: error_message(&reply.body),
            });
        }
        Ok(reply)
    }
}

fn parse_reply(raw: &[u8]) -> Result<Reply, ClientError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let head_len = match response.parse(raw) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => {
            return Err(ClientError::Protocol("response ended inside the head".into()));
        }
        Err(e) => return Err(ClientError::Protocol(e.to_string())),
    };
    let status = response
        .code
        .ok_or_else(|| ClientError::Protocol("missing status code".into()))?;

    let header = |name: &str| {
        response
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| String::from_utf8_lossy(h.value).trim().to_string())
    };
    let rest = &raw[head_len..];
    let body = match header("Content-Length") {
        Some(value) => {
            let length: usize = value
                .parse()
                .map_err(|_| ClientError::Protocol(format!("bad Content-Length '{value}'")))?;
            if rest.len() < length {
                return Err(ClientError::Protocol(format!(
                    "body truncated at {} of {length} bytes",
                    rest.len()
                )));
            }
            rest[..length].to_vec()
        }
        None => rest.to_vec(),
    };
    Ok(Reply {
        status,
        content_type: header("Content-Type"),
        body,
    })
}

/// The `error` field of a JSON error body, or the body as text.
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}
