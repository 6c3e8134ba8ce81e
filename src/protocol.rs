/// Modbus protocol definitions and PDU codec
///
/// This module contains the function and exception codes understood by the
/// slave, the request/response PDU structures with their wire codecs, the
/// MBAP header used by Modbus TCP and the CRC16 used by Modbus RTU.
///
/// ## In-place responses
///
/// A slave answers in the buffer the request arrived in. [`ResponsePdu::write_into`]
/// documents exactly which bytes it reads and which it overwrites; everything
/// else in the buffer is left as it was.

use crc::{Crc, CRC_16_MODBUS};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::{self, combine_bytes, Endianness};
use crate::error::{ModbusError, ModbusResult};

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus value type (16-bit register value)
pub type ModbusValue = u16;

/// Modbus unit identifier (RTU slave address / TCP unit id)
pub type UnitId = u8;

/// Unit id of an RTU broadcast request
pub const BROADCAST_UNIT_ID: UnitId = 0;

/// Function code, address and quantity/value: the fixed part of every request
pub const REQUEST_HEADER_LEN: usize = 5;

/// Maximum PDU size allowed by the Modbus application protocol
pub const MAX_PDU_SIZE: usize = 253;

/// MBAP header size (transaction id, protocol id, length, unit id)
pub const MBAP_HEADER_LEN: usize = 7;

/// Bit set in the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// CRC calculator for RTU (CRC-16/MODBUS: poly 0xA001 reflected, init 0xFFFF)
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Modbus function codes supported by the slave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Holding Register (0x06)
    WriteSingleHoldingRegister = 0x06,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Holding Registers (0x10)
    WriteMultipleHoldingRegisters = 0x10,
}

impl ModbusFunction {
    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleHoldingRegister),
            0x0F => Ok(ModbusFunction::WriteMultipleCoils),
            0x10 => Ok(ModbusFunction::WriteMultipleHoldingRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a read function
    pub fn is_read_function(self) -> bool {
        matches!(self,
            ModbusFunction::ReadCoils |
            ModbusFunction::ReadDiscreteInputs |
            ModbusFunction::ReadHoldingRegisters |
            ModbusFunction::ReadInputRegisters
        )
    }

    /// Check if this is a write function
    pub fn is_write_function(self) -> bool {
        !self.is_read_function()
    }

    /// Single writes carry a value where other functions carry a quantity
    pub fn is_single_write(self) -> bool {
        matches!(self,
            ModbusFunction::WriteSingleCoil |
            ModbusFunction::WriteSingleHoldingRegister
        )
    }

    /// Multiple writes are the only requests with a byte count and payload
    pub fn is_multiple_write(self) -> bool {
        matches!(self,
            ModbusFunction::WriteMultipleCoils |
            ModbusFunction::WriteMultipleHoldingRegisters
        )
    }

    /// Human readable name for any function code, supported or not
    pub fn name_of(code: u8) -> &'static str {
        match Self::from_u8(code) {
            Ok(function) => function.name(),
            Err(_) => "Unknown Function",
        }
    }

    fn name(self) -> &'static str {
        match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleHoldingRegister => "Write Single Holding Register",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleHoldingRegisters => "Write Multiple Holding Registers",
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), *self as u8)
    }
}

/// Modbus exception codes sent by the slave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    SlaveDeviceBusy = 0x06,
}

impl ModbusException {
    /// Convert from u8 to ModbusException
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::SlaveDeviceFailure),
            0x06 => Some(ModbusException::SlaveDeviceBusy),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "The function code received in the query is not an allowable action for the slave",
            ModbusException::IllegalDataAddress => "The data address received in the query is not an allowable address for the slave",
            ModbusException::IllegalDataValue => "A value contained in the query data field is not an allowable value for the slave",
            ModbusException::SlaveDeviceFailure => "The slave could not perform the requested action",
            ModbusException::SlaveDeviceBusy => "The slave is engaged in processing a long-duration command",
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}: {}", self.to_u8(), self.description())
    }
}

/// Parsed Modbus request PDU
///
/// Byte layout: `[function][address hi][address lo][count/value hi][count/value lo]`
/// followed, for multiple writes only, by `[byte count][payload...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPdu {
    /// Raw function code; unsupported codes are rejected by the register table
    pub function_code: u8,
    pub address: ModbusAddress,
    /// Quantity of coils/registers, or the value for single writes
    pub count: u16,
    /// Payload of multiple writes, empty otherwise
    pub payload: Vec<u8>,
}

impl RequestPdu {
    /// Create a read request
    pub fn new_read(function: ModbusFunction, address: ModbusAddress, quantity: u16) -> Self {
        Self {
            function_code: function.to_u8(),
            address,
            count: quantity,
            payload: Vec::new(),
        }
    }

    /// Create a single write request
    pub fn new_write_single(function: ModbusFunction, address: ModbusAddress, value: ModbusValue) -> Self {
        Self {
            function_code: function.to_u8(),
            address,
            count: value,
            payload: Vec::new(),
        }
    }

    /// Create a multiple write request
    pub fn new_write_multiple(
        function: ModbusFunction,
        address: ModbusAddress,
        quantity: u16,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            function_code: function.to_u8(),
            address,
            count: quantity,
            payload,
        }
    }

    /// Parse a request PDU from the start of `buffer`
    ///
    /// Only the bytes the function code calls for are read; trailing bytes
    /// (an RTU CRC, a pipelined TCP frame) are ignored.
    pub fn parse(buffer: &[u8]) -> ModbusResult<Self> {
        if buffer.len() < REQUEST_HEADER_LEN {
            return Err(ModbusError::frame(format!(
                "Request PDU too short: {} bytes", buffer.len()
            )));
        }

        let function_code = buffer[0];
        let address = combine_bytes(buffer[1], buffer[2]);
        let count = combine_bytes(buffer[3], buffer[4]);

        let multiple_write = ModbusFunction::from_u8(function_code)
            .map(ModbusFunction::is_multiple_write)
            .unwrap_or(false);

        let payload = if multiple_write {
            let byte_count = *buffer.get(REQUEST_HEADER_LEN)
                .ok_or_else(|| ModbusError::frame("Missing byte count"))? as usize;
            let start = REQUEST_HEADER_LEN + 1;
            buffer.get(start..start + byte_count)
                .ok_or_else(|| ModbusError::frame(format!(
                    "Incomplete payload: declared {} bytes, got {}",
                    byte_count, buffer.len() - start
                )))?
                .to_vec()
        } else {
            Vec::new()
        };

        Ok(Self { function_code, address, count, payload })
    }

    /// Supported function, if the code is one
    pub fn function(&self) -> ModbusResult<ModbusFunction> {
        ModbusFunction::from_u8(self.function_code)
    }

    /// Value of a single write (aliases the count field)
    pub fn value(&self) -> ModbusValue {
        self.count
    }

    /// Byte count of the trailing payload
    pub fn byte_count(&self) -> u8 {
        self.payload.len() as u8
    }

    /// Encoded PDU length: `5 + payload + (payload present ? 1 : 0)`
    pub fn encoded_len(&self) -> usize {
        REQUEST_HEADER_LEN + self.payload.len() + usize::from(!self.payload.is_empty())
    }

    /// Serialize into `buffer`, returning the number of bytes written
    pub fn encode_into(&self, buffer: &mut [u8]) -> ModbusResult<usize> {
        let len = self.encoded_len();
        if buffer.len() < len {
            return Err(ModbusError::frame(format!(
                "Buffer too small for request: need {}, have {}", len, buffer.len()
            )));
        }

        buffer[0] = self.function_code;
        buffer[1..3].copy_from_slice(&codec::split_bytes(self.address, Endianness::Big));
        buffer[3..5].copy_from_slice(&codec::split_bytes(self.count, Endianness::Big));
        if !self.payload.is_empty() {
            buffer[5] = self.byte_count();
            buffer[6..len].copy_from_slice(&self.payload);
        }
        Ok(len)
    }

    /// Serialize to a new byte vector
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.encoded_len()];
        // The vector is sized by encoded_len, so encoding cannot fail
        let _ = self.encode_into(&mut bytes);
        bytes
    }
}

/// Function-specific content of a response
///
/// Exactly one of these is meaningful per function code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Read functions: packed coils or big-endian register bytes
    Read { payload: Vec<u8> },
    /// Single writes echo address and value
    WriteSingle { address: ModbusAddress, value: ModbusValue },
    /// Multiple writes echo address and quantity written
    WriteMultiple { address: ModbusAddress, quantity: u16 },
    /// The request failed
    Exception(ModbusException),
}

/// Modbus response PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePdu {
    /// Function code of the request, without the exception flag
    pub function_code: u8,
    pub body: ResponseBody,
}

impl ResponsePdu {
    /// Create a read response
    pub fn new_read(function: ModbusFunction, payload: Vec<u8>) -> Self {
        Self { function_code: function.to_u8(), body: ResponseBody::Read { payload } }
    }

    /// Create a single write acknowledgement
    pub fn new_write_single(function: ModbusFunction, address: ModbusAddress, value: ModbusValue) -> Self {
        Self { function_code: function.to_u8(), body: ResponseBody::WriteSingle { address, value } }
    }

    /// Create a multiple write acknowledgement
    pub fn new_write_multiple(function: ModbusFunction, address: ModbusAddress, quantity: u16) -> Self {
        Self { function_code: function.to_u8(), body: ResponseBody::WriteMultiple { address, quantity } }
    }

    /// Create an exception response for any function code
    pub fn new_exception(function_code: u8, exception: ModbusException) -> Self {
        Self {
            function_code: function_code & !EXCEPTION_FLAG,
            body: ResponseBody::Exception(exception),
        }
    }

    /// Check if this is an exception response
    pub fn is_exception(&self) -> bool {
        matches!(self.body, ResponseBody::Exception(_))
    }

    /// Get the exception, if any
    pub fn exception(&self) -> Option<ModbusException> {
        match self.body {
            ResponseBody::Exception(exception) => Some(exception),
            _ => None,
        }
    }

    /// Turn an exception response into an error
    pub fn into_result(self) -> ModbusResult<Self> {
        match self.body {
            ResponseBody::Exception(exception) => {
                Err(ModbusError::exception(self.function_code, exception.to_u8()))
            }
            _ => Ok(self),
        }
    }

    /// Data byte count of a read response, 0 otherwise
    pub fn byte_count(&self) -> u8 {
        match &self.body {
            ResponseBody::Read { payload } => payload.len() as u8,
            _ => 0,
        }
    }

    /// Encoded PDU length
    pub fn encoded_len(&self) -> usize {
        match &self.body {
            ResponseBody::Exception(_) => 2,
            ResponseBody::Read { payload } => payload.len() + 2,
            ResponseBody::WriteSingle { .. } | ResponseBody::WriteMultiple { .. } => 5,
        }
    }

    /// Write the response over the request it answers, returning its length
    ///
    /// `buffer` must start with the request PDU this response was built from.
    ///
    /// * Exception: sets the high bit of byte 0, writes the code to byte 1.
    /// * Read: writes the byte count to byte 1 and the payload from byte 2;
    ///   byte 0 (function code) is reused.
    /// * Write acknowledgement: writes nothing. Bytes 0..5 of the request
    ///   (function, address, quantity/value) already are the response.
    ///
    /// Bytes past the returned length are left untouched and carry no meaning.
    pub fn write_into(&self, buffer: &mut [u8]) -> ModbusResult<usize> {
        let len = self.encoded_len();
        if buffer.len() < len {
            return Err(ModbusError::frame(format!(
                "Buffer too small for response: need {}, have {}", len, buffer.len()
            )));
        }

        match &self.body {
            ResponseBody::Exception(exception) => {
                buffer[0] |= EXCEPTION_FLAG;
                buffer[1] = exception.to_u8();
            }
            ResponseBody::Read { payload } => {
                buffer[1] = payload.len() as u8;
                buffer[2..len].copy_from_slice(payload);
            }
            ResponseBody::WriteSingle { .. } | ResponseBody::WriteMultiple { .. } => {}
        }
        Ok(len)
    }

    /// Serialize to a standalone byte image
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        match &self.body {
            ResponseBody::Exception(exception) => {
                bytes.push(self.function_code | EXCEPTION_FLAG);
                bytes.push(exception.to_u8());
            }
            ResponseBody::Read { payload } => {
                bytes.push(self.function_code);
                bytes.push(payload.len() as u8);
                bytes.extend_from_slice(payload);
            }
            ResponseBody::WriteSingle { address, value: second }
            | ResponseBody::WriteMultiple { address, quantity: second } => {
                bytes.push(self.function_code);
                bytes.extend_from_slice(&codec::split_bytes(*address, Endianness::Big));
                bytes.extend_from_slice(&codec::split_bytes(*second, Endianness::Big));
            }
        }
        bytes
    }

    /// Parse a response PDU
    pub fn parse(buffer: &[u8]) -> ModbusResult<Self> {
        if buffer.len() < 2 {
            return Err(ModbusError::frame("Response PDU too short"));
        }

        let function_code = buffer[0];
        if function_code & EXCEPTION_FLAG != 0 {
            let exception = ModbusException::from_u8(buffer[1])
                .ok_or_else(|| ModbusError::frame(format!("Unknown exception code 0x{:02X}", buffer[1])))?;
            return Ok(Self::new_exception(function_code, exception));
        }

        let function = ModbusFunction::from_u8(function_code)?;
        if function.is_read_function() {
            let byte_count = buffer[1] as usize;
            let payload = buffer.get(2..2 + byte_count)
                .ok_or_else(|| ModbusError::frame("Incomplete read response"))?
                .to_vec();
            return Ok(Self::new_read(function, payload));
        }

        if buffer.len() < REQUEST_HEADER_LEN {
            return Err(ModbusError::frame("Incomplete write acknowledgement"));
        }
        let address = combine_bytes(buffer[1], buffer[2]);
        let second = combine_bytes(buffer[3], buffer[4]);
        if function.is_single_write() {
            Ok(Self::new_write_single(function, address, second))
        } else {
            Ok(Self::new_write_multiple(function, address, second))
        }
    }
}

/// Modbus Application Protocol header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    /// Always 0 for Modbus
    pub protocol_id: u16,
    /// Bytes following the length field: unit id + PDU
    pub length: u16,
    pub unit_id: UnitId,
}

impl MbapHeader {
    /// Parse the 7-byte header at the start of `bytes`
    pub fn parse(bytes: &[u8]) -> ModbusResult<Self> {
        if bytes.len() < MBAP_HEADER_LEN {
            return Err(ModbusError::frame(format!(
                "MBAP header too short: {} bytes", bytes.len()
            )));
        }
        Ok(Self {
            transaction_id: combine_bytes(bytes[0], bytes[1]),
            protocol_id: combine_bytes(bytes[2], bytes[3]),
            length: combine_bytes(bytes[4], bytes[5]),
            unit_id: bytes[6],
        })
    }

    /// Total frame length announced by the header
    pub fn frame_len(&self) -> usize {
        self.length as usize + MBAP_HEADER_LEN - 1
    }

    /// Serialize the header
    pub fn to_bytes(&self) -> [u8; MBAP_HEADER_LEN] {
        let mut bytes = [0u8; MBAP_HEADER_LEN];
        bytes[0..2].copy_from_slice(&self.transaction_id.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.protocol_id.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.length.to_be_bytes());
        bytes[6] = self.unit_id;
        bytes
    }
}

/// Calculate the Modbus CRC16 of `data`
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Verify the trailing CRC of an RTU frame (CRC is sent low byte first)
pub fn verify_crc(frame: &[u8]) -> ModbusResult<()> {
    if frame.len() < 3 {
        return Err(ModbusError::frame("RTU frame too short for CRC"));
    }
    let data_len = frame.len() - 2;
    let expected = crc16(&frame[..data_len]);
    let actual = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
    if expected != actual {
        return Err(ModbusError::crc_mismatch(expected, actual));
    }
    Ok(())
}

/// `true` if the trailing CRC of an RTU frame matches its content
pub fn crc16_check(frame: &[u8]) -> bool {
    verify_crc(frame).is_ok()
}

/// Data conversion utilities
pub mod data_utils {
    use super::*;

    /// Convert register values to bytes (big-endian)
    pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
        registers.iter().flat_map(|register| register.to_be_bytes()).collect()
    }

    /// Convert bytes to register values (big-endian)
    pub fn bytes_to_registers(bytes: &[u8]) -> ModbusResult<Vec<u16>> {
        if bytes.len() % 2 != 0 {
            return Err(ModbusError::invalid_data("Byte array length must be even".to_string()));
        }
        Ok(bytes.chunks_exact(2).map(|chunk| combine_bytes(chunk[0], chunk[1])).collect())
    }

    /// Pack boolean values into bytes, LSB first
    pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
        bits.chunks(8).map(|chunk| codec::compress_booleans(chunk, 8)).collect()
    }

    /// Unpack bytes into `bit_count` boolean values
    pub fn unpack_bits(bytes: &[u8], bit_count: usize) -> Vec<bool> {
        bytes.iter()
            .flat_map(|&byte| codec::decompress_booleans(byte))
            .chain(std::iter::repeat(false))
            .take(bit_count)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_conversion() {
        assert_eq!(ModbusFunction::from_u8(0x03).unwrap(), ModbusFunction::ReadHoldingRegisters);
        assert_eq!(ModbusFunction::ReadHoldingRegisters.to_u8(), 0x03);
        assert_eq!(ModbusFunction::from_u8(0x10).unwrap(), ModbusFunction::WriteMultipleHoldingRegisters);

        assert!(ModbusFunction::from_u8(0xFF).is_err());
        assert!(ModbusFunction::from_u8(0x07).is_err());
        assert_eq!(ModbusFunction::name_of(0x2B), "Unknown Function");
    }

    #[test]
    fn test_exception_conversion() {
        assert_eq!(ModbusException::from_u8(0x02).unwrap(), ModbusException::IllegalDataAddress);
        assert_eq!(ModbusException::IllegalDataAddress.to_u8(), 0x02);
        assert_eq!(ModbusException::SlaveDeviceBusy.to_u8(), 0x06);
        assert!(ModbusException::from_u8(0x05).is_none());
    }

    #[test]
    fn test_parse_read_request() {
        let request = RequestPdu::parse(&[0x03, 0x00, 0x01, 0x00, 0x02]).unwrap();
        assert_eq!(request.function().unwrap(), ModbusFunction::ReadHoldingRegisters);
        assert_eq!(request.address, 1);
        assert_eq!(request.count, 2);
        assert_eq!(request.byte_count(), 0);
        assert!(request.payload.is_empty());
    }

    #[test]
    fn test_parse_multiple_write_request() {
        let buffer = [0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x02, 0x00, 0x03, 0xAA];
        let request = RequestPdu::parse(&buffer).unwrap();
        assert_eq!(request.address, 1);
        assert_eq!(request.count, 2);
        assert_eq!(request.byte_count(), 4);
        assert_eq!(request.payload, vec![0x00, 0x02, 0x00, 0x03]);
    }

    #[test]
    fn test_parse_single_write_value_aliases_count() {
        let request = RequestPdu::parse(&[0x05, 0x42, 0x6A, 0xFF, 0x00]).unwrap();
        assert_eq!(request.address, 17002);
        assert_eq!(request.value(), 0xFF00);
        assert_eq!(request.count, request.value());
    }

    #[test]
    fn test_parse_rejects_short_buffers() {
        assert!(RequestPdu::parse(&[0x03, 0x00, 0x01, 0x00]).is_err());
        // Byte count says 4, only 2 payload bytes present
        assert!(RequestPdu::parse(&[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x02]).is_err());
        // Missing byte count
        assert!(RequestPdu::parse(&[0x0F, 0x00, 0x01, 0x00, 0x02]).is_err());
    }

    #[test]
    fn test_parse_unknown_function_is_deferred() {
        let request = RequestPdu::parse(&[0x2B, 0x0E, 0x01, 0x00, 0x00]).unwrap();
        assert_eq!(request.function_code, 0x2B);
        assert!(request.function().is_err());
    }

    #[test]
    fn test_request_encoding() {
        let request = RequestPdu::new_write_multiple(
            ModbusFunction::WriteMultipleHoldingRegisters, 1, 2, vec![0x00, 0x02, 0x00, 0x03],
        );
        assert_eq!(request.encoded_len(), 10);
        assert_eq!(request.to_bytes(), vec![0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x02, 0x00, 0x03]);
        assert_eq!(RequestPdu::parse(&request.to_bytes()).unwrap(), request);

        let read = RequestPdu::new_read(ModbusFunction::ReadCoils, 16500, 88);
        assert_eq!(read.encoded_len(), 5);
        assert_eq!(RequestPdu::parse(&read.to_bytes()).unwrap(), read);

        let mut small = [0u8; 4];
        assert!(read.encode_into(&mut small).is_err());
    }

    #[test]
    fn test_response_write_into_read() {
        let mut buffer = [0x03, 0x00, 0x01, 0x00, 0x02, 0xEE, 0xEE, 0xEE];
        let response = ResponsePdu::new_read(ModbusFunction::ReadHoldingRegisters, vec![0x00, 0x02, 0x00, 0x03]);
        let len = response.write_into(&mut buffer).unwrap();
        assert_eq!(len, 6);
        assert_eq!(&buffer[..len], &[0x03, 0x04, 0x00, 0x02, 0x00, 0x03]);
        // Past the response nothing changed
        assert_eq!(&buffer[len..], &[0xEE, 0xEE]);
    }

    #[test]
    fn test_response_write_into_exception() {
        let mut buffer = [0x03, 0x00, 0x09, 0x00, 0x02];
        let response = ResponsePdu::new_exception(0x03, ModbusException::IllegalDataAddress);
        let len = response.write_into(&mut buffer).unwrap();
        assert_eq!(len, 2);
        // Only the function code and exception code are overwritten
        assert_eq!(buffer, [0x83, 0x02, 0x09, 0x00, 0x02]);
    }

    #[test]
    fn test_response_write_into_ack_reuses_request() {
        let mut buffer = [0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x02, 0x00, 0x03];
        let original = buffer;
        let response = ResponsePdu::new_write_multiple(ModbusFunction::WriteMultipleHoldingRegisters, 1, 2);
        let len = response.write_into(&mut buffer).unwrap();
        assert_eq!(len, 5);
        // Nothing is rewritten: the echoed bytes are the request's own
        assert_eq!(buffer, original);
        assert_eq!(&buffer[..len], response.encode().as_slice());
    }

    #[test]
    fn test_response_round_trip() {
        let responses = [
            ResponsePdu::new_read(ModbusFunction::ReadCoils, vec![0b0000_0101]),
            ResponsePdu::new_read(ModbusFunction::ReadInputRegisters, vec![0x12, 0x34]),
            ResponsePdu::new_write_single(ModbusFunction::WriteSingleCoil, 17002, 0xFF00),
            ResponsePdu::new_write_multiple(ModbusFunction::WriteMultipleCoils, 17000, 3),
            ResponsePdu::new_exception(0x06, ModbusException::SlaveDeviceFailure),
        ];
        for response in responses {
            let bytes = response.encode();
            assert_eq!(bytes.len(), response.encoded_len());
            assert_eq!(ResponsePdu::parse(&bytes).unwrap(), response);
        }
    }

    #[test]
    fn test_exception_into_result() {
        let response = ResponsePdu::new_exception(0x83, ModbusException::IllegalFunction);
        assert_eq!(response.function_code, 0x03);
        assert!(response.is_exception());
        let err = response.into_result().unwrap_err();
        assert!(matches!(err, ModbusError::Exception { function: 0x03, code: 0x01, .. }));
    }

    #[test]
    fn test_mbap_header() {
        let bytes = [0x00, 0x2A, 0x00, 0x00, 0x00, 0x06, 0x01];
        let header = MbapHeader::parse(&bytes).unwrap();
        assert_eq!(header.transaction_id, 42);
        assert_eq!(header.protocol_id, 0);
        assert_eq!(header.length, 6);
        assert_eq!(header.unit_id, 1);
        assert_eq!(header.frame_len(), 12);
        assert_eq!(header.to_bytes(), bytes);
        assert!(MbapHeader::parse(&bytes[..6]).is_err());
    }

    #[test]
    fn test_crc_known_frame() {
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B];
        assert_eq!(crc16(&frame[..6]), 0x0BC4);
        assert!(crc16_check(&frame));
    }

    #[test]
    fn test_crc_detects_single_bit_flips() {
        let mut frame = vec![0x11, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02];
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        assert!(crc16_check(&frame));

        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(!crc16_check(&corrupted), "flip at byte {} bit {} undetected", byte, bit);
            }
        }
    }

    #[test]
    fn test_data_utils() {
        let registers = vec![0x1234, 0x5678];
        let bytes = data_utils::registers_to_bytes(&registers);
        assert_eq!(bytes, vec![0x12, 0x34, 0x56, 0x78]);
        assert_eq!(data_utils::bytes_to_registers(&bytes).unwrap(), registers);
        assert!(data_utils::bytes_to_registers(&[0x01]).is_err());

        let bits = vec![true, false, true, true, false, false, false, false, true];
        let packed = data_utils::pack_bits(&bits);
        assert_eq!(packed, vec![0b0000_1101, 0b0000_0001]);
        assert_eq!(data_utils::unpack_bits(&packed, bits.len()), bits);
    }
}
