//! Listener, acceptor thread and worker pool.
//!
//! ```text
//! TcpListener ─► acceptor ─► bounded queue ─► worker 0..N ─► Session::run
//! ```
//!
//! Each worker owns one connection at a time for its whole keep-alive
//! lifetime. When every worker is busy and the queue is full, the acceptor
//! blocks and new clients wait in the kernel backlog.

use crate::config::{self, ServiceConfig};
use crate::session::{ServiceContext, Session};
use crossbeam_channel::{Receiver, Sender};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A bound listener that has not started serving yet.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServiceContext>,
    workers: usize,
    queue_depth: usize,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl Server {
    /// Resolve `host:port` and bind to the first address that resolves.
    pub fn bind(host: &str, port: u16, config: &ServiceConfig) -> Result<Self, ServerError> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|_| ServerError::InvalidAddress(host.to_string()))?
            .next()
            .ok_or_else(|| ServerError::InvalidAddress(host.to_string()))?;
        let listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self {
            listener,
            ctx: Arc::new(ServiceContext::from(config)),
            workers: config::effective_workers(&config.server),
            queue_depth: config.server.queue_depth,
            read_timeout: config.server.read_timeout(),
            write_timeout: config.server.write_timeout(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Start the acceptor and worker threads.
    pub fn spawn(self) -> Result<ServerHandle, ServerError> {
        let addr = self.listener.local_addr()?;
        let (tx, rx) = crossbeam_channel::bounded::<TcpStream>(self.queue_depth);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let rx = rx.clone();
            let ctx = Arc::clone(&self.ctx);
            let timeouts = (self.read_timeout, self.write_timeout);
            let handle = thread::Builder::new()
                .name(format!("darkroom-worker-{id}"))
                .spawn(move || worker_loop(id, rx, ctx, timeouts))
                .map_err(ServerError::Spawn)?;
            workers.push(handle);
        }
        drop(rx);

        let listener = self.listener;
        let flag = Arc::clone(&shutdown);
        let acceptor = thread::Builder::new()
            .name("darkroom-acceptor".into())
            .spawn(move || accept_loop(listener, tx, flag))
            .map_err(ServerError::Spawn)?;

        info!(%addr, workers = workers.len(), queue_depth = self.queue_depth, "listening");
        Ok(ServerHandle {
            addr,
            shutdown,
            acceptor,
            workers,
        })
    }
}

fn accept_loop(listener: TcpListener, tx: Sender<TcpStream>, shutdown: Arc<AtomicBool>) {
    for conn in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match conn {
            Ok(stream) => {
                if tx.send(stream).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(Duration::from_millis(5));
            }
        }
    }
    debug!("acceptor stopped");
}

fn worker_loop(
    id: usize,
    rx: Receiver<TcpStream>,
    ctx: Arc<ServiceContext>,
    (read_timeout, write_timeout): (Duration, Duration),
) {
    for stream in rx {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        let span = info_span!("session", %peer, worker = id);
        let _enter = span.enter();

        if let Err(e) = configure(&stream, read_timeout, write_timeout) {
            warn!(error = %e, "failed to configure socket");
            continue;
        }
        debug!("session opened");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| Session::new(stream, &ctx).run()));
        match outcome {
            Ok(served) => debug!(served, "session closed"),
            Err(_) => error!("session panicked"),
        }
    }
}

fn configure(stream: &TcpStream, read: Duration, write: Duration) -> io::Result<()> {
    stream.set_read_timeout(Some(read))?;
    stream.set_write_timeout(Some(write))?;
    stream.set_nodelay(true)
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    acceptor: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, let workers finish their current sessions, and wait.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Wake the acceptor out of its blocking accept.
        let mut wake = self.addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(match wake {
                SocketAddr::V4(_) => [127, 0, 0, 1].into(),
                SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
            });
        }
        if let Err(e) = TcpStream::connect_timeout(&wake, Duration::from_secs(1)) {
            debug!(error = %e, "shutdown wake-up connect failed");
        }
        self.join();
    }

    /// Block until the acceptor and every worker have exited.
    pub fn join(self) {
        if self.acceptor.join().is_err() {
            error!("acceptor thread panicked");
        }
        for worker in self.workers {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
        info!("server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn test_config(workers: usize) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.server.workers = Some(workers);
        config.server.queue_depth = 4;
        config.server.read_timeout_secs = 5;
        config
    }

    fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        write!(stream, "GET {path} HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn invalid_host_is_rejected() {
        let err = Server::bind("no such host!", 0, &test_config(1)).err().unwrap();
        assert!(matches!(err, ServerError::InvalidAddress(_)));
    }

    #[test]
    fn second_bind_on_same_port_fails() {
        let first = Server::bind("127.0.0.1", 0, &test_config(1)).unwrap();
        let port = first.local_addr().unwrap().port();
        let err = Server::bind("127.0.0.1", port, &test_config(1)).err().unwrap();
        let ServerError::Bind { source, .. } = err else {
            panic!("expected bind error, got {err:?}");
        };
        assert_eq!(source.kind(), io::ErrorKind::AddrInUse);
    }

    #[test]
    fn serves_then_shuts_down() {
        let handle = Server::bind("127.0.0.1", 0, &test_config(2))
            .unwrap()
            .spawn()
            .unwrap();
        let addr = handle.local_addr();
        let response = get(addr, "/nowhere");
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{response}");
        handle.shutdown();
        assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_err());
    }

    #[test]
    fn more_clients_than_workers_are_all_served() {
        let handle = Server::bind("127.0.0.1", 0, &test_config(1))
            .unwrap()
            .spawn()
            .unwrap();
        let addr = handle.local_addr();
        let clients: Vec<_> = (0..6)
            .map(|i| thread::spawn(move || get(addr, &format!("/c{i}"))))
            .collect();
        for client in clients {
            assert!(client.join().unwrap().contains(" 404 "));
        }
        handle.shutdown();
    }
}
