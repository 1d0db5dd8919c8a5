use std::net::{SocketAddr, TcpStream as StdTcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::BigiotError;

/// Byte-level access to the one live broker connection.
///
/// Writes are whole-message: one `send` call carries one complete,
/// newline-terminated line and never interleaves with another `send`.
/// Reads never block; `try_receive` returns `Ok(0)` when nothing is
/// buffered right now.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Write all of `bytes` as one unit. Returns the number of bytes written.
    async fn send(&self, bytes: &[u8]) -> Result<usize, BigiotError>;

    /// Read whatever is available into `buf` without waiting.
    fn try_receive(&self, buf: &mut [u8]) -> Result<usize, BigiotError>;

    /// Close the connection. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Opens transports to the broker.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn Transport>, BigiotError>;
}

#[async_trait]
impl<T: Connector + ?Sized> Connector for Arc<T> {
    async fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn Transport>, BigiotError> {
        (**self).connect(host, port).await
    }
}

pub type Connection = BigiotConnection;

/// A nonblocking TCP connection to the broker.
#[derive(Debug)]
pub struct BigiotConnection {
    stream: TcpStream,
    peer: SocketAddr,
    // Serialises writers so each message lands on the wire in one piece.
    write_lock: Mutex<()>,
    closed: AtomicBool,
    send_timeout: Duration,
}

impl BigiotConnection {
    /// Resolve `host`, connect with a bounded blocking connect, then switch
    /// the socket to nonblocking mode.
    ///
    /// Any socket opened along the way is closed again on failure.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        send_timeout: Duration,
    ) -> Result<Self, BigiotError> {
        let host_owned = host.to_string();
        let std_stream = tokio::task::spawn_blocking(move || {
            blocking_connect(&host_owned, port, connect_timeout)
        })
        .await
        .map_err(|e| BigiotError::Connect {
            addr: format!("{host}:{port}"),
            source: std::io::Error::other(e),
        })??;

        let peer = std_stream.peer_addr().map_err(BigiotError::Configuration)?;
        let stream = TcpStream::from_std(std_stream).map_err(BigiotError::Configuration)?;
        debug!(%peer, "tcp connection established");

        Ok(Self {
            stream,
            peer,
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            send_timeout,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    async fn write_message(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            self.stream.writable().await?;
            match self.stream.try_write(&bytes[written..]) {
                Ok(0) => return Err(std::io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn blocking_connect(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<StdTcpStream, BigiotError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| BigiotError::Resolution {
            host: host.to_string(),
            source,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(BigiotError::Resolution {
            host: host.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        });
    }

    let mut last_err = None;
    for addr in &addrs {
        match StdTcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => {
                // Dropping `stream` on the error path closes it.
                stream
                    .set_nonblocking(true)
                    .map_err(BigiotError::Configuration)?;
                return Ok(stream);
            }
            Err(e) => {
                trace!(%addr, "connect attempt failed: {e}");
                last_err = Some(e);
            }
        }
    }

    Err(BigiotError::Connect {
        addr: format!("{host}:{port}"),
        source: last_err
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses")),
    })
}

#[async_trait]
impl Transport for BigiotConnection {
    async fn send(&self, bytes: &[u8]) -> Result<usize, BigiotError> {
        if self.is_closed() {
            return Err(BigiotError::Send(std::io::ErrorKind::NotConnected.into()));
        }
        let _guard = self.write_lock.lock().await;
        tokio::time::timeout(self.send_timeout, self.write_message(bytes))
            .await
            .map_err(|_| BigiotError::Send(std::io::ErrorKind::TimedOut.into()))?
            .map_err(BigiotError::Send)?;
        trace!(len = bytes.len(), "sent");
        Ok(bytes.len())
    }

    fn try_receive(&self, buf: &mut [u8]) -> Result<usize, BigiotError> {
        if self.is_closed() {
            return Err(BigiotError::ConnectionClosed);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        match self.stream.try_read(buf) {
            Ok(0) => Err(BigiotError::ConnectionClosed),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(BigiotError::Receive(e)),
        }
    }

    // Marks the connection unusable; the socket itself is released when
    // the last handle drops.
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(peer = %self.peer, "connection closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// [`Connector`] that opens real TCP connections.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    send_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, send_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            send_timeout,
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(5))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn Transport>, BigiotError> {
        let conn =
            BigiotConnection::connect(host, port, self.connect_timeout, self.send_timeout).await?;
        Ok(Arc::new(conn))
    }
}
