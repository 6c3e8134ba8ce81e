/// Utility functions and helpers for the Modbus slave
///
/// This module contains validation helpers used when building servers,
/// formatting helpers for logs and reports, and test logger setup.

use std::time::Duration;

use crate::error::{ModbusError, ModbusResult};

/// Data validation utilities
pub mod validation {
    use super::*;

    /// Validate a slave unit address (1-247)
    pub fn validate_unit_id(unit_id: u8) -> ModbusResult<()> {
        if unit_id == 0 || unit_id > 247 {
            return Err(ModbusError::configuration(
                format!("Invalid unit address: {} (must be 1-247)", unit_id)
            ));
        }
        Ok(())
    }
}

/// Formatting and display utilities
pub mod format {
    use super::*;

    /// Format byte array as hex string
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        bytes.iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format register values as hex
    pub fn registers_to_hex(registers: &[u16]) -> String {
        registers.iter()
            .map(|r| format!("{:04X}", r))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format duration in a human-readable way
    pub fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis < 1000 {
            format!("{}ms", millis)
        } else if millis < 60_000 {
            format!("{:.2}s", duration.as_secs_f64())
        } else {
            let mins = millis / 60_000;
            let secs = (millis % 60_000) as f64 / 1000.0;
            format!("{}m {:.1}s", mins, secs)
        }
    }

    /// Format server statistics as a table
    pub fn format_stats(stats: &crate::server::ServerStats, uptime: Duration) -> String {
        format!(
            "Server Statistics:\n\
             ├─ Uptime: {}\n\
             ├─ Requests: {} ({:.1}% without exception)\n\
             ├─ Exceptions: {}\n\
             ├─ Broadcasts: {}\n\
             ├─ Dropped frames: {}\n\
             ├─ Bytes in/out: {}/{}\n\
             └─ Connections: {} accepted, {} closed, {} active",
            format_duration(uptime),
            stats.total_requests,
            stats.success_rate(),
            stats.exception_responses,
            stats.broadcast_requests,
            stats.dropped_frames,
            stats.bytes_received,
            stats.bytes_sent,
            stats.connections_accepted,
            stats.connections_closed,
            stats.active_connections,
        )
    }
}

/// Logging utilities
pub mod logging {
    /// Initialize simple logger for testing
    pub fn init_test_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }

    /// Initialize the `log` backend for binaries, honouring `RUST_LOG`
    pub fn init_logger(default_filter: &str) {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(default_filter)
        ).try_init();
    }
}
