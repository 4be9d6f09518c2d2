//! Shared helpers for the HTTP integration tests: a server on an ephemeral
//! port backed by a scratch directory, and a raw HTTP/1.1 client.

#![allow(dead_code)]

use darkroom::config::{self, ServiceConfig};
use darkroom::imaging::encode_base64;
use darkroom::server::{Server, ServerHandle};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::{BufRead, BufReader, Cursor, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

pub const REFERENCE_JPEG: &[u8] = b"\xFF\xD8\xFF\xE0reference\xFF\xD9";

pub struct TestServer {
    pub dir: TempDir,
    handle: Option<ServerHandle>,
}

impl TestServer {
    /// Start a server whose config is the stock defaults overlaid with
    /// `extra_toml`. `{dir}` in the TOML is replaced by the scratch path.
    pub fn start(extra_toml: &str) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("x.jpg"), REFERENCE_JPEG).unwrap();

        let base = format!(
            "[server]\nworkers = 4\nread_timeout_secs = 5\nreference_image = \"{}\"\n",
            toml_path(&dir.path().join("x.jpg"))
        );
        let base_path = dir.path().join("base.toml");
        std::fs::write(&base_path, base).unwrap();
        let extra_path = dir.path().join("extra.toml");
        std::fs::write(&extra_path, extra_toml.replace("{dir}", &toml_path(dir.path()))).unwrap();

        let config: ServiceConfig = config::load_config(&[base_path, extra_path]).unwrap();
        let handle = Server::bind("127.0.0.1", 0, &config).unwrap().spawn().unwrap();
        Self {
            dir,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.as_ref().unwrap().local_addr()
    }

    pub fn connect(&self) -> Client {
        Client::connect(self.addr())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
    }
}

fn toml_path(path: &Path) -> String {
    path.display().to_string().replace('\\', "\\\\")
}

// =========================================================================
// Client
// =========================================================================

#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap().to_string()
    }
}

/// One keep-alive connection.
pub struct Client {
    reader: BufReader<TcpStream>,
}

impl Client {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        Self {
            reader: BufReader::new(stream),
        }
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.reader.get_mut().write_all(bytes).unwrap();
    }

    pub fn get(&mut self, path: &str) -> Reply {
        self.send_raw(format!("GET {path} HTTP/1.1\r\nHost: test\r\n\r\n").as_bytes());
        self.read_reply()
    }

    pub fn request(&mut self, method: &str, path: &str) -> Reply {
        self.send_raw(format!("{method} {path} HTTP/1.1\r\nHost: test\r\n\r\n").as_bytes());
        self.read_reply()
    }

    pub fn post(&mut self, body: &[u8]) -> Reply {
        self.send_raw(
            format!(
                "POST / HTTP/1.1\r\nHost: test\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
                body.len()
            )
            .as_bytes(),
        );
        self.send_raw(body);
        self.read_reply()
    }

    /// Read the status line and headers.
    pub fn read_head(&mut self) -> (u16, Vec<(String, String)>) {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        let status = line.split(' ').nth(1).unwrap().parse().unwrap();
        let mut headers = Vec::new();
        loop {
            line.clear();
            self.reader.read_line(&mut line).unwrap();
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                break;
            }
            let (name, value) = trimmed.split_once(": ").unwrap();
            headers.push((name.to_string(), value.to_string()));
        }
        (status, headers)
    }

    pub fn read_reply(&mut self) -> Reply {
        let (status, headers) = self.read_head();
        let length: usize = headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
            .map(|(_, v)| v.parse().unwrap())
            .unwrap();
        let mut body = vec![0; length];
        self.reader.read_exact(&mut body).unwrap();
        Reply {
            status,
            headers,
            body,
        }
    }

    /// Everything until the server closes the connection.
    pub fn read_to_end(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        self.reader.read_to_end(&mut rest).unwrap();
        rest
    }
}

// =========================================================================
// Images and payloads
// =========================================================================

pub fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
    }))
}

pub fn png(image: &DynamicImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

pub fn payload(image: &DynamicImage, directives: serde_json::Value) -> Vec<u8> {
    let serde_json::Value::Object(mut map) = directives else {
        panic!("directives must be an object");
    };
    map.insert("img".into(), encode_base64(&png(image)).into());
    serde_json::Value::Object(map).to_string().into_bytes()
}
