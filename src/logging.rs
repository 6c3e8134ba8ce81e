/// Callback-based packet logging for the slave framers
///
/// This is independent of the `log` facade: framers always emit `log`
/// records, and additionally hand every request/response pair to a
/// [`CallbackLogger`] when one is installed. The callback decides where the
/// lines go (console, file, UI).

use std::sync::Arc;

use crate::protocol::{ModbusFunction, RequestPdu, ResponseBody, ResponsePdu, UnitId};
use crate::utils::format::{bytes_to_hex, registers_to_hex};

/// Log levels for the callback logging system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Error messages
    Error,
    /// Warning messages
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
}

/// Logging mode for packet display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Show raw frame bytes only
    Raw,
    /// Show decoded fields
    Interpreted,
    /// Decoded fields at the packet level, raw bytes at debug level
    Both,
}

impl LogLevel {
    /// Convert log level to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Type alias for log callback functions
///
/// The callback receives a log level and message string
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger that uses callbacks for flexible logging
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    /// Create a new callback logger
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self::with_mode(callback, min_level, LoggingMode::Interpreted)
    }

    /// Create a new callback logger with specific mode
    pub fn with_mode(callback: Option<LogCallback>, min_level: LogLevel, mode: LoggingMode) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Create a logger with default console output
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match level {
                LogLevel::Error | LogLevel::Warn => eprintln!("[{}] {}: {}", timestamp, level.as_str(), message),
                LogLevel::Info | LogLevel::Debug => println!("[{}] {}: {}", timestamp, level.as_str(), message),
            }
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    /// Create a logger that outputs nothing (disabled)
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    /// Set logging mode
    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    /// Get current logging mode
    pub fn get_mode(&self) -> LoggingMode {
        self.mode
    }

    /// Log a message at the specified level
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    /// Log an error message
    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    /// Log a warning message
    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    /// Log an info message
    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    /// Log a debug message
    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    /// `true` if a callback is installed
    pub fn is_enabled(&self) -> bool {
        self.callback.is_some()
    }

    /// Check if a message at the given level should be logged
    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level as u8 <= self.min_level as u8
    }

    /// Log frame bytes with a hex dump
    pub fn log_packet(&self, level: LogLevel, direction: &str, data: &[u8]) {
        if !self.should_log(level) {
            return;
        }
        let message = format!("{} packet ({} bytes): {}", direction, data.len(), bytes_to_hex(data));
        self.log(level, &message);
    }

    /// Log a request received from the master
    ///
    /// `frame` is the complete wire frame (MBAP or RTU address/CRC included).
    pub fn log_request(&self, unit_id: UnitId, request: &RequestPdu, frame: &[u8]) {
        let interpreted = || format!(
            "Modbus Request <- Unit: {}, Function: {} (0x{:02X}), Address: {}, {}: {}{}",
            unit_id,
            ModbusFunction::name_of(request.function_code),
            request.function_code,
            request.address,
            if is_single_write(request.function_code) { "Value" } else { "Quantity" },
            request.count,
            if request.payload.is_empty() {
                String::new()
            } else {
                format!(", Payload: {}", hex::encode(&request.payload))
            },
        );
        self.log_with_mode("Modbus Request <- Raw", interpreted, frame);
    }

    /// Log a response sent back to the master
    pub fn log_response(&self, unit_id: UnitId, response: &ResponsePdu, frame: &[u8]) {
        let interpreted = || format!(
            "Modbus Response -> Unit: {}, Function: {} (0x{:02X}), {}",
            unit_id,
            ModbusFunction::name_of(response.function_code),
            response.function_code,
            interpret_response(response),
        );
        self.log_with_mode("Modbus Response -> Raw", interpreted, frame);
    }

    fn log_with_mode<F: Fn() -> String>(&self, raw_label: &str, interpreted: F, frame: &[u8]) {
        if !self.should_log(LogLevel::Info) {
            return;
        }
        match self.mode {
            LoggingMode::Raw => self.info(&format!("{}: {}", raw_label, bytes_to_hex(frame))),
            LoggingMode::Interpreted => self.info(&interpreted()),
            LoggingMode::Both => {
                self.info(&interpreted());
                self.debug(&format!("{}: {}", raw_label, bytes_to_hex(frame)));
            }
        }
    }
}

fn is_single_write(function_code: u8) -> bool {
    ModbusFunction::from_u8(function_code)
        .map(ModbusFunction::is_single_write)
        .unwrap_or(false)
}

/// Describe a response's decoded content
fn interpret_response(response: &ResponsePdu) -> String {
    match &response.body {
        ResponseBody::Exception(exception) => {
            format!("Exception: {:?} (0x{:02X})", exception, exception.to_u8())
        }
        ResponseBody::Read { payload } => match response.function_code {
            0x01 | 0x02 => {
                let coils: Vec<bool> = payload.iter()
                    .flat_map(|&byte| crate::codec::decompress_booleans(byte))
                    .take(16)
                    .collect();
                format!("Byte count: {}, Coils: {:?}", payload.len(), coils)
            }
            _ => {
                let registers: Vec<u16> = payload.chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .take(8)
                    .collect();
                format!("Byte count: {}, Registers: {}", payload.len(), registers_to_hex(&registers))
            }
        },
        ResponseBody::WriteSingle { address, value } if response.function_code == 0x05 => {
            format!("Address: {}, Value: 0x{:04X} ({})", address, value, if *value > 0 { "ON" } else { "OFF" })
        }
        ResponseBody::WriteSingle { address, value } => {
            format!("Address: {}, Value: {} (0x{:04X})", address, value, value)
        }
        ResponseBody::WriteMultiple { address, quantity } => {
            format!("Address: {}, Quantity: {}", address, quantity)
        }
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl std::fmt::Debug for CallbackLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackLogger")
            .field("enabled", &self.callback.is_some())
            .field("min_level", &self.min_level)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Convenience macro for creating a simple console logger
#[macro_export]
macro_rules! console_logger {
    () => {
        $crate::logging::CallbackLogger::console()
    };
}

/// Convenience macro for creating a custom logger
#[macro_export]
macro_rules! custom_logger {
    ($callback:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $crate::logging::LogLevel::Info)
    };
    ($callback:expr, $level:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $level)
    };
    ($callback:expr, $level:expr, $mode:expr) => {
        $crate::logging::CallbackLogger::with_mode(Some($callback), $level, $mode)
    };
}
