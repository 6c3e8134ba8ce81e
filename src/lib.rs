//! # Voltage Modbus Slave - Poll-Driven Modbus RTU/TCP Slave Engine
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **Version:** 0.1.0
//! **License:** MIT
//!
//! A Modbus slave that maps a typed, range-addressed register table onto
//! Modbus PDUs, framed either as RTU (serial, CRC16) or as Modbus TCP
//! (MBAP header, multiple clients).
//!
//! ## Features
//!
//! - **🔁 Poll-Driven**: single-threaded, every call non-blocking apart from bounded waits
//! - **📦 Fixed Buffers**: frames live in inline or once-allocated buffers, answered in place
//! - **🧭 Typed Registers**: coil and holding registers with per-register byte order
//! - **🛡️ Robust Framing**: malformed frames, CRC errors and misbehaving clients are dropped, never fatal
//! - **📊 Built-in Monitoring**: request, exception and connection statistics
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Register |
//! |------|----------|----------|
//! | 0x01 | Read Coils | Coil |
//! | 0x02 | Read Discrete Inputs | Coil |
//! | 0x03 | Read Holding Registers | Holding |
//! | 0x04 | Read Input Registers | Holding |
//! | 0x05 | Write Single Coil | Coil |
//! | 0x06 | Write Single Holding Register | Holding |
//! | 0x0F | Write Multiple Coils | Coil |
//! | 0x10 | Write Multiple Holding Registers | Holding |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_modbus_slave::{
//!     ModbusFunction, ModbusServer, RegisterConfig, RegisterTable,
//!     StdTcpListener, TcpServer, TcpServerConfig,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut table = RegisterTable::from_config(&[
//!         RegisterConfig::holding("setpoints", 0, 99, &[
//!             ModbusFunction::ReadHoldingRegisters,
//!             ModbusFunction::WriteMultipleHoldingRegisters,
//!         ]),
//!     ])?;
//!
//!     let config = TcpServerConfig::default();
//!     let listener = StdTcpListener::bind_with_retry(config.bind_address, config.link_timeout())?;
//!     let mut server = TcpServer::new(listener, config)?;
//!
//!     loop {
//!         server.poll(&mut table)?;
//!         table.set_holding(0, 42)?;
//!         std::thread::sleep(std::time::Duration::from_millis(1));
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐
//! │   Serial Port   │    │   TCP Clients   │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │   RTU Framer    │    │   TCP Framer    │
//! │   (CRC16)       │    │   (MBAP)        │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//!          └──────────┬────────────┘
//!           ┌─────────────────┐
//!           │   PDU Codec     │
//!           └─────────────────┘
//!                     │
//!           ┌─────────────────┐
//!           │ Register Table  │
//!           │ (Coil/Holding)  │
//!           └─────────────────┘
//! ```

/// Core error types and result handling
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod error;

/// Byte order and bit packing codecs
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod codec;

/// Modbus protocol definitions, PDU codec, MBAP header and CRC16
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod protocol;

/// Coil and holding registers
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod register;

/// Request routing over an ordered register list
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod register_table;

/// Fixed-capacity frame buffers
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod buffer;

/// Byte stream, connection and listener contracts with TCP and serial adapters
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod transport;

/// Modbus RTU slave framer
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod rtu;

/// Modbus TCP slave framer and client lifecycle
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod tcp;

/// Poll trait, statistics and async poll driver
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod server;

/// Utility functions for validation and formatting
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod utils;

/// Packet logging for the library
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod logging;

// Re-export main types for convenience
pub use error::{ModbusError, ModbusResult};
pub use codec::{Endianness, HOST_ENDIANNESS, NETWORK_ENDIANNESS};
pub use protocol::{MbapHeader, ModbusException, ModbusFunction, RequestPdu, ResponseBody, ResponsePdu};
pub use register::{CoilRegister, HoldingRegister, Register, RegisterConfig, RegisterKind, RegisterRange};
pub use register_table::{RegisterTable, RegisterTableStats, Transaction};
pub use buffer::{FrameAccumulator, FrameBuffer, HeapBuffer, StaticBuffer};
pub use transport::{ByteStream, Connection, Listener, SerialStream, StdTcpConnection, StdTcpListener};
pub use rtu::{RtuServer, RtuServerConfig};
pub use tcp::{ClientConnection, TcpServer, TcpServerConfig};
pub use server::{run_polling, ModbusServer, ServerStats};
pub use logging::{LogLevel, LogCallback, CallbackLogger, LoggingMode};

/// Maximum number of coils that can be read in a single request
pub const MAX_COILS_PER_REQUEST: u16 = 2000;

/// Maximum number of registers that can be read in a single request
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

/// Maximum Modbus TCP frame size (MBAP header + PDU)
pub const MAX_TCP_FRAME_SIZE: usize = 260;

/// Maximum Modbus RTU frame size
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage Modbus Slave v{} - Poll-driven Modbus RTU/TCP slave engine by Evan Liu", VERSION)
}
