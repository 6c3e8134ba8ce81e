//! # Modbus Slave Transport Layer
//!
//! The framers never touch sockets or serial ports directly. They consume the
//! small, synchronous, non-blocking contract defined here:
//!
//! - [`ByteStream`]: a byte source/sink (`bytes_available`, `read_byte`, `write_bytes`)
//! - [`Connection`]: a stream with a peer that can disconnect, be half-closed and closed
//! - [`Listener`]: a source of new [`Connection`]s
//!
//! ## Provided Adapters
//!
//! ### TCP (`StdTcpListener`, `StdTcpConnection`)
//! - Non-blocking `std::net` sockets, safe to poll from a single thread
//! - Bounded link wait at startup (`bind_with_retry`)
//! - Responses written with a short blocking section so frames leave whole,
//!   bounded by a write timeout so a master that stops reading is dropped
//!
//! ### RTU (`SerialStream`)
//! - Serial port opened through `tokio_serial`'s blocking port API
//! - `bytes_available` maps to the driver's receive queue length
//!
//! ## Example
//!
//! ```rust,no_run
//! use voltage_modbus_slave::transport::{Listener, StdTcpListener};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut listener = StdTcpListener::bind_with_retry(
//!     "0.0.0.0:502".parse()?,
//!     Duration::from_secs(5),
//! )?;
//!
//! if let Some(connection) = listener.accept()? {
//!     println!("New client: {:?}", connection);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::{ModbusError, ModbusResult};

/// Interval between bind attempts during the link wait
const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Bytes pulled from a socket per refill
const READ_CHUNK_SIZE: usize = 256;

/// Longest a response write may block before the client is given up on
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Non-blocking byte source and sink
pub trait ByteStream {
    /// Bytes that can be read right now without blocking
    fn bytes_available(&mut self) -> ModbusResult<usize>;

    /// Read one byte, `None` if nothing is available
    fn read_byte(&mut self) -> ModbusResult<Option<u8>>;

    /// Write all of `bytes`
    fn write_bytes(&mut self, bytes: &[u8]) -> ModbusResult<()>;
}

/// A connected peer
pub trait Connection: ByteStream {
    /// `false` once the peer disconnected or the connection failed
    fn connected(&self) -> bool;

    /// Address of the peer, if known
    fn remote_address(&self) -> Option<SocketAddr>;

    /// Half-close: stop sending, keep receiving
    fn shutdown_output(&mut self) -> ModbusResult<()>;

    /// Close both directions and release the connection
    fn close(&mut self);
}

/// Source of new connections
pub trait Listener {
    type Connection: Connection;

    /// Accept one pending connection, if any, without blocking
    fn accept(&mut self) -> ModbusResult<Option<Self::Connection>>;
}

/// Non-blocking TCP listener
#[derive(Debug)]
pub struct StdTcpListener {
    listener: TcpListener,
}

impl StdTcpListener {
    /// Bind once
    pub fn bind(address: SocketAddr) -> ModbusResult<Self> {
        let listener = TcpListener::bind(address)
            .map_err(|e| ModbusError::connection(format!("Failed to bind {}: {}", address, e)))?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    /// Bind, retrying until `link_timeout` elapses
    ///
    /// Covers the startup window where the network interface is not up yet.
    pub fn bind_with_retry(address: SocketAddr, link_timeout: Duration) -> ModbusResult<Self> {
        let deadline = Instant::now() + link_timeout;
        loop {
            match Self::bind(address) {
                Ok(listener) => return Ok(listener),
                Err(err) if Instant::now() < deadline => {
                    debug!("Waiting for link on {}: {}", address, err);
                    thread::sleep(BIND_RETRY_INTERVAL);
                }
                Err(err) => {
                    warn!("Link wait for {} expired: {}", address, err);
                    return Err(ModbusError::timeout(
                        format!("bind {}", address),
                        link_timeout.as_millis() as u64,
                    ));
                }
            }
        }
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> ModbusResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

impl Listener for StdTcpListener {
    type Connection = StdTcpConnection;

    fn accept(&mut self) -> ModbusResult<Option<StdTcpConnection>> {
        match self.listener.accept() {
            Ok((stream, peer)) => Ok(Some(StdTcpConnection::new(stream, peer)?)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(ModbusError::connection(format!("Accept failed: {}", e))),
        }
    }
}

/// Non-blocking TCP connection
#[derive(Debug)]
pub struct StdTcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
    rx: VecDeque<u8>,
    connected: bool,
}

impl StdTcpConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> ModbusResult<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        Ok(Self {
            stream,
            peer,
            rx: VecDeque::with_capacity(READ_CHUNK_SIZE),
            connected: true,
        })
    }

    /// Pull whatever the socket has into the receive queue
    fn fill(&mut self) {
        if !self.connected {
            return;
        }
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!("Client {} closed its side", self.peer);
                    self.connected = false;
                    return;
                }
                Ok(n) => {
                    self.rx.extend(&chunk[..n]);
                    return;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Read from {} failed: {}", self.peer, e);
                    self.connected = false;
                    return;
                }
            }
        }
    }
}

impl ByteStream for StdTcpConnection {
    fn bytes_available(&mut self) -> ModbusResult<usize> {
        if self.rx.is_empty() {
            self.fill();
        }
        Ok(self.rx.len())
    }

    fn read_byte(&mut self) -> ModbusResult<Option<u8>> {
        if self.rx.is_empty() {
            self.fill();
        }
        Ok(self.rx.pop_front())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> ModbusResult<()> {
        let result = self.stream.set_nonblocking(false)
            .and_then(|()| self.stream.write_all(bytes))
            .and_then(|()| self.stream.flush())
            .and_then(|()| self.stream.set_nonblocking(true));
        result.map_err(|e| {
            self.connected = false;
            ModbusError::io(format!("Write to {} failed: {}", self.peer, e))
        })
    }
}

impl Connection for StdTcpConnection {
    fn connected(&self) -> bool {
        self.connected
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn shutdown_output(&mut self) -> ModbusResult<()> {
        self.stream.shutdown(Shutdown::Write)
            .map_err(|e| ModbusError::io(format!("Half-close of {} failed: {}", self.peer, e)))
    }

    fn close(&mut self) {
        // The peer may already be gone
        let _ = self.stream.shutdown(Shutdown::Both);
        self.connected = false;
        self.rx.clear();
    }
}

/// Serial port byte stream for RTU
pub struct SerialStream {
    port: Box<dyn tokio_serial::SerialPort>,
    name: String,
}

impl SerialStream {
    /// Open `path` at `baud_rate`, 8N1
    pub fn open(path: &str, baud_rate: u32) -> ModbusResult<Self> {
        Self::open_with_config(
            path,
            baud_rate,
            tokio_serial::DataBits::Eight,
            tokio_serial::StopBits::One,
            tokio_serial::Parity::None,
        )
    }

    /// Open with explicit framing parameters
    pub fn open_with_config(
        path: &str,
        baud_rate: u32,
        data_bits: tokio_serial::DataBits,
        stop_bits: tokio_serial::StopBits,
        parity: tokio_serial::Parity,
    ) -> ModbusResult<Self> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| ModbusError::connection(format!("Failed to open serial port {}: {}", path, e)))?;
        Ok(Self { port, name: path.to_string() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SerialStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialStream").field("name", &self.name).finish()
    }
}

impl ByteStream for SerialStream {
    fn bytes_available(&mut self) -> ModbusResult<usize> {
        self.port.bytes_to_read()
            .map(|count| count as usize)
            .map_err(|e| ModbusError::io(format!("Serial port {}: {}", self.name, e)))
    }

    fn read_byte(&mut self) -> ModbusResult<Option<u8>> {
        if self.bytes_available()? == 0 {
            return Ok(None);
        }
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(ModbusError::io(format!("Serial read on {}: {}", self.name, e))),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> ModbusResult<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }
}
