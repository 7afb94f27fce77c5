//! # Modbus TCP Transport
//!
//! A thin wrapper over one connection that applies a fresh deadline to every
//! write and every read, and offers "read exactly N bytes" semantics.
//!
//! ## Features
//! - TCP dial with a connect deadline, `TCP_NODELAY` and periodic keep-alive probes
//! - One deadline per operation (`now + timeout`), no retries
//! - Optional hex packet logging
//! - Per-connection statistics
//!
//! The transport is generic over the underlying stream so the same code runs on a
//! [`TcpStream`] in production and on scripted in-memory streams in tests.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use voltage_loadtest::transport::Transport;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut transport = Transport::dial("127.0.0.1:502", Duration::from_millis(500)).await?;
//!
//!     // Read holding register 0 on unit 1 (transaction id 1)
//!     transport.write(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01]).await?;
//!
//!     let mut header = [0u8; 7];
//!     transport.read_exact(&mut header).await?;
//!     println!("MBAP header: {:02X?}", header);
//!
//!     transport.close().await?;
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{ModbusError, ModbusResult};
use crate::utils::format::bytes_to_hex;

/// Idle time before the first keep-alive probe
const KEEPALIVE_TIME: Duration = Duration::from_secs(30);

/// Log packet with direction
fn log_packet(direction: &str, data: &[u8], peer: &str) {
    info!("[MODBUS-TCP] {} {} {}", direction, peer, bytes_to_hex(data));
}

/// Transport layer statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub timeouts: u64,
    pub errors: u64,
}

/// One connection to a Modbus TCP target
pub struct Transport<S = TcpStream> {
    stream: S,
    peer: String,
    timeout: Duration,
    stats: TransportStats,
    /// Enable packet logging for debugging
    packet_logging: bool,
}

impl Transport<TcpStream> {
    /// Connect to `address` within `timeout`
    ///
    /// Nagle's algorithm is disabled and keep-alive probes are enabled so that
    /// measured latency reflects the device, not the socket layer.
    pub async fn dial(address: &str, connect_timeout: Duration) -> ModbusResult<Self> {
        let stream = match timeout(connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ModbusError::connection(format!(
                    "Failed to connect to {}: {}",
                    address, e
                )))
            }
            Err(_) => {
                return Err(ModbusError::connection(format!(
                    "Connection to {} timed out after {}ms",
                    address,
                    connect_timeout.as_millis()
                )))
            }
        };

        configure_socket(&stream);
        debug!("TCP connected: {}", address);

        Ok(Self::from_stream(stream, address, connect_timeout))
    }
}

/// Configure TCP socket options for latency measurement
fn configure_socket(stream: &TcpStream) {
    // Set TCP_NODELAY to disable Nagle's algorithm
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {e}");
    }

    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_TIME);
    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        warn!("Failed to set keep-alive: {e}");
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already connected stream
    pub fn from_stream(stream: S, peer: impl Into<String>, timeout: Duration) -> Self {
        Self {
            stream,
            peer: peer.into(),
            timeout,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Replace the per-operation deadline
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write the whole buffer before `now + timeout`
    pub async fn write(&mut self, data: &[u8]) -> ModbusResult<()> {
        if self.packet_logging {
            log_packet("send", data, &self.peer);
        }

        match timeout(self.timeout, self.stream.write_all(data)).await {
            Ok(Ok(())) => {
                self.stats.requests_sent += 1;
                self.stats.bytes_sent += data.len() as u64;
                Ok(())
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                Err(e.into())
            }
            Err(_) => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                Err(ModbusError::timeout("write request", self.timeout_ms()))
            }
        }
    }

    /// Fill `buf` completely before `now + timeout`
    ///
    /// Partial reads are accumulated until the buffer is full; EOF before that
    /// point is a connection error.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> ModbusResult<()> {
        if buf.is_empty() {
            return Ok(());
        }

        match timeout(self.timeout, self.stream.read_exact(buf)).await {
            Ok(Ok(_)) => {
                self.stats.bytes_received += buf.len() as u64;
                if self.packet_logging {
                    log_packet("receive", buf, &self.peer);
                }
                Ok(())
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                Err(e.into())
            }
            Err(_) => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                Err(ModbusError::timeout(
                    format!("read {} bytes", buf.len()),
                    self.timeout_ms(),
                ))
            }
        }
    }

    /// Shut the write half down; the stream is dropped with the transport
    pub async fn close(&mut self) -> ModbusResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}
