//! # Voltage Modbus Slave Error Handling
//!
//! This module provides the error type used across the slave engine: codec
//! failures, register table configuration problems, and transport errors.
//!
//! ## Overview
//!
//! Errors in a Modbus slave fall into four groups, and only some of them are
//! ever visible to the remote master:
//!
//! ### Protocol Exceptions
//! - **Exception Responses**: Illegal function, illegal data address, illegal data
//!   value and slave device failure. These are not Rust errors inside the engine;
//!   they travel as [`crate::protocol::ModbusException`] values inside a response
//!   PDU and are sent to the master. [`ModbusError::exception`] exists for callers
//!   that want to surface one as an error.
//!
//! ### Frame Integrity Errors
//! - **Frame Errors**: Short or malformed PDUs, bad MBAP headers
//! - **CRC Errors**: Checksum failures on RTU frames
//!
//! Framers drop these silently; the master cannot tell them apart from line noise.
//!
//! ### Data Errors
//! - **Invalid Function**: Function codes outside the eight supported ones
//! - **Invalid Address**: Address ranges that overflow the 16-bit address space
//! - **Invalid Data**: Malformed values or configuration documents
//!
//! ### System Errors
//! - **I/O / Connection / Timeout**: Transport failures, handled by closing the
//!   affected connection
//! - **Configuration Errors**: Register tables or servers that cannot be built
//!
//! ## Error Classification
//!
//! ```rust
//! use voltage_modbus_slave::ModbusError;
//!
//! fn classify_error(error: &ModbusError) {
//!     if error.is_transport_error() {
//!         println!("Network/transport issue: {}", error);
//!     } else if error.is_protocol_error() {
//!         println!("Modbus protocol issue: {}", error);
//!     } else {
//!         println!("Other issue: {}", error);
//!     }
//! }
//! ```

use thiserror::Error;

/// Result type alias for Modbus operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus slave error types
///
/// Each variant carries enough context to be logged on its own; the framers
/// log frame-level errors at `debug` level and never forward them to the peer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// I/O related errors (network, serial)
    ///
    /// # Examples
    /// - Serial port read failure
    /// - Socket reset while writing a response
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection errors
    ///
    /// # Examples
    /// - Listener failed to bind
    /// - Serial port could not be opened
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Timeout errors
    ///
    /// Raised by bounded waits, e.g. the link wait performed while binding
    /// the TCP listener.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Invalid function code
    ///
    /// # Examples
    /// - Function code 0x08 (diagnostics, not supported by this slave)
    #[error("Invalid function code: {code}")]
    InvalidFunction { code: u8 },

    /// Invalid address range
    ///
    /// # Examples
    /// - Start address + quantity > 65536
    /// - Zero-length range
    #[error("Invalid address: start={start}, count={count}")]
    InvalidAddress { start: u16, count: u16 },

    /// Invalid data value
    ///
    /// # Examples
    /// - Unit address outside 1-247
    /// - Malformed JSON register map
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// CRC validation failure on an RTU frame
    #[error("CRC validation failed: expected={expected:04X}, actual={actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Modbus exception response
    ///
    /// # Standard Exception Codes
    /// - 0x01: Illegal Function
    /// - 0x02: Illegal Data Address
    /// - 0x03: Illegal Data Value
    /// - 0x04: Slave Device Failure
    /// - 0x06: Slave Device Busy
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception { function: u8, code: u8, message: String },

    /// Frame parsing errors
    ///
    /// # Examples
    /// - PDU shorter than its declared byte count
    /// - MBAP protocol id other than 0
    /// - Frame larger than the receive buffer
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Configuration errors
    ///
    /// # Examples
    /// - Register storage shorter than its address range
    /// - Register without any function code
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms
        }
    }

    /// Create an invalid function error
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid address error
    pub fn invalid_address(start: u16, count: u16) -> Self {
        Self::InvalidAddress { start, count }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create a CRC mismatch error
    ///
    /// # Arguments
    ///
    /// * `expected` - CRC computed over the received frame
    /// * `actual` - CRC carried by the frame
    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Create a Modbus exception error
    ///
    /// Automatically maps standard exception codes to human-readable messages.
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Slave Device Failure",
            0x06 => "Slave Device Busy",
            _ => "Unknown Exception",
        }.to_string();

        Self::Exception { function, code, message }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Check if the error is recoverable (the master may retry)
    ///
    /// ```rust
    /// use voltage_modbus_slave::ModbusError;
    ///
    /// let busy = ModbusError::exception(0x03, 0x06);
    /// assert!(busy.is_recoverable());
    ///
    /// let invalid_function = ModbusError::invalid_function(0x99);
    /// assert!(!invalid_function.is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Connection { .. } => true,
            Self::Timeout { .. } => true,
            // Noise on the line; the master retries the transaction
            Self::Frame { .. } | Self::CrcMismatch { .. } => true,
            Self::Exception { code, .. } => matches!(code, 0x06),
            _ => false,
        }
    }

    /// Check if the error is a network/transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(self,
            Self::Io { .. } |
            Self::Connection { .. } |
            Self::Timeout { .. }
        )
    }

    /// Check if the error is a protocol issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(self,
            Self::InvalidFunction { .. } |
            Self::Exception { .. } |
            Self::Frame { .. } |
            Self::CrcMismatch { .. }
        )
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convert from serde JSON errors (register map documents)
impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_data(format!("JSON error: {}", err))
    }
}
