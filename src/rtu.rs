/// Modbus RTU slave framer
///
/// Frames are delimited by silence on the line: bytes are accumulated while
/// they keep arriving, and a gap longer than the inter-character timeout ends
/// the frame. A complete frame is then checked in this order, dropping it
/// silently at the first failure:
///
/// 1. overflow (more bytes than the frame buffer holds)
/// 2. minimum length (address + 5-byte PDU header + CRC)
/// 3. unit address (own address or broadcast 0)
/// 4. CRC16
///
/// Valid frames are answered in place: the PDU following the address byte is
/// overwritten by the response PDU and a fresh CRC is appended. Broadcast
/// requests are executed but never answered.

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::buffer::{FrameAccumulator, FrameBuffer, StaticBuffer};
use crate::error::ModbusResult;
use crate::logging::{CallbackLogger, LogLevel};
use crate::protocol::{self, UnitId, BROADCAST_UNIT_ID, REQUEST_HEADER_LEN};
use crate::register_table::RegisterTable;
use crate::server::{ModbusServer, ServerStats};
use crate::transport::ByteStream;
use crate::utils::validation;
use crate::MAX_RTU_FRAME_SIZE;

/// Address byte plus CRC
const RTU_OVERHEAD: usize = 3;

/// Shortest frame worth checking: address, PDU header and CRC
pub const MIN_RTU_FRAME_LEN: usize = REQUEST_HEADER_LEN + RTU_OVERHEAD;

/// Modbus RTU slave configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtuServerConfig {
    /// Own unit address (1-247)
    pub unit_address: UnitId,
    /// Silence that ends a frame, in microseconds
    pub inter_char_timeout_us: u64,
    /// Serial device path, used by the binary
    pub port: String,
    pub baud_rate: u32,
}

impl Default for RtuServerConfig {
    fn default() -> Self {
        Self {
            unit_address: 1,
            inter_char_timeout_us: 750,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 19200,
        }
    }
}

impl RtuServerConfig {
    /// Configuration with the inter-character timeout derived from the baud rate
    ///
    /// 1.5 character times (11 bits each), never below the fixed 750 µs used
    /// above 19200 baud.
    pub fn for_serial_port(port: &str, baud_rate: u32, unit_address: UnitId) -> Self {
        let char_time_us = 11_000_000 / u64::from(baud_rate.max(1));
        Self {
            unit_address,
            inter_char_timeout_us: (char_time_us * 15 / 10).max(750),
            port: port.to_string(),
            baud_rate,
        }
    }

    pub fn inter_char_timeout(&self) -> Duration {
        Duration::from_micros(self.inter_char_timeout_us)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ModbusResult<()> {
        validation::validate_unit_id(self.unit_address)
    }
}

/// Modbus RTU slave
pub struct RtuServer<S: ByteStream, B: FrameBuffer = StaticBuffer<MAX_RTU_FRAME_SIZE>> {
    stream: S,
    config: RtuServerConfig,
    frame: FrameAccumulator<B>,
    stats: ServerStats,
    logger: CallbackLogger,
}

impl<S: ByteStream> RtuServer<S> {
    /// Create an RTU slave with an inline 256-byte frame buffer
    pub fn new(stream: S, config: RtuServerConfig) -> ModbusResult<Self> {
        Self::with_buffer(stream, config, StaticBuffer::new())
    }
}

impl<S: ByteStream, B: FrameBuffer> RtuServer<S, B> {
    /// Create an RTU slave over a caller-chosen frame buffer
    pub fn with_buffer(stream: S, config: RtuServerConfig, buffer: B) -> ModbusResult<Self> {
        config.validate()?;
        info!("📡 RTU slave: unit {}, inter-character timeout {:?}",
              config.unit_address, config.inter_char_timeout());
        Ok(Self {
            stream,
            config,
            frame: FrameAccumulator::new(buffer),
            stats: ServerStats::default(),
            logger: CallbackLogger::disabled(),
        })
    }

    /// Install a packet logger
    pub fn with_logger(mut self, logger: CallbackLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &RtuServerConfig {
        &self.config
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Receive and answer at most one frame
    ///
    /// Returns the number of bytes written back (0 when nothing was received,
    /// the frame was dropped or it was a broadcast).
    pub fn process(&mut self, table: &mut RegisterTable) -> ModbusResult<usize> {
        self.frame.clear();
        self.receive_frame()?;
        if self.frame.is_empty() {
            return Ok(0);
        }
        self.stats.bytes_received += self.frame.len() as u64;

        let written = self.handle_frame(table)?;
        self.frame.clear();
        Ok(written)
    }

    /// Read bytes until the line stays silent for the inter-character timeout
    fn receive_frame(&mut self) -> ModbusResult<()> {
        let gap = self.config.inter_char_timeout();
        while self.stream.bytes_available()? > 0 {
            while let Some(byte) = self.stream.read_byte()? {
                // Overflowing bytes are still read to keep the receive queue draining
                self.frame.push(byte);
            }
            if self.stream.bytes_available()? == 0 && !gap.is_zero() {
                thread::sleep(gap);
            }
        }
        Ok(())
    }

    fn handle_frame(&mut self, table: &mut RegisterTable) -> ModbusResult<usize> {
        let len = self.frame.len();
        if self.frame.overflowed() {
            debug!("RTU frame overflowed {} byte buffer, dropped", self.frame.capacity());
            self.stats.record_drop();
            return Ok(0);
        }
        if len < MIN_RTU_FRAME_LEN {
            debug!("RTU frame of {} bytes too short, dropped", len);
            self.stats.record_drop();
            return Ok(0);
        }

        let unit_id = self.frame.as_slice()[0];
        let broadcast = unit_id == BROADCAST_UNIT_ID;
        if unit_id != self.config.unit_address && !broadcast {
            debug!("RTU frame for unit {} ignored", unit_id);
            return Ok(0);
        }

        if let Err(e) = protocol::verify_crc(self.frame.as_slice()) {
            debug!("RTU frame dropped: {}", e);
            self.stats.record_drop();
            return Ok(0);
        }

        let request_frame = self.logger.is_enabled().then(|| self.frame.as_slice().to_vec());

        // Keep two bytes spare for the CRC
        let storage = self.frame.storage_mut();
        let pdu_end = storage.len() - 2;
        let transaction = match table.process_stream(&mut storage[1..pdu_end], len - RTU_OVERHEAD) {
            Ok(transaction) => transaction,
            Err(e) => {
                debug!("RTU request dropped: {}", e);
                self.stats.record_drop();
                return Ok(0);
            }
        };
        self.stats.record_transaction(&transaction);

        let response_len = 1 + transaction.len;
        let crc = protocol::crc16(&storage[..response_len]);
        storage[response_len..response_len + 2].copy_from_slice(&crc.to_le_bytes());
        let frame_len = response_len + 2;

        if let Some(request_frame) = request_frame {
            self.logger.log_request(unit_id, &transaction.request, &request_frame);
        }

        if broadcast {
            self.stats.broadcast_requests += 1;
            debug!("Broadcast {} processed, no response", transaction.request.function_code);
            return Ok(0);
        }

        self.logger.log_response(unit_id, &transaction.response, &storage[..frame_len]);
        if let Err(e) = self.stream.write_bytes(&storage[..frame_len]) {
            warn!("RTU response write failed: {}", e);
            return Err(e);
        }
        self.stats.bytes_sent += frame_len as u64;
        self.logger.log_packet(LogLevel::Debug, "RTU TX", &storage[..frame_len]);
        Ok(frame_len)
    }
}

impl<S: ByteStream, B: FrameBuffer> ModbusServer for RtuServer<S, B> {
    fn poll(&mut self, table: &mut RegisterTable) -> ModbusResult<()> {
        self.process(table).map(|_| ())
    }

    fn protocol(&self) -> &'static str {
        "RTU"
    }

    fn get_stats(&self) -> ServerStats {
        self.stats.clone()
    }
}
