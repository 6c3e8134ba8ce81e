/// Range-addressed registers backing the slave's data model
///
/// A register owns a contiguous, inclusive address range, the function codes
/// it answers and the storage behind it. There are exactly two kinds:
///
/// * [`CoilRegister`]: one boolean per address, bit-packed on the wire
/// * [`HoldingRegister`]: one 16-bit word per address, with independent
///   receive and send byte orders
///
/// All addresses passed to the read/write operations are absolute Modbus
/// addresses; the register translates them to storage offsets and refuses
/// anything outside its range with [`ModbusException::IllegalDataAddress`].

use serde::{Deserialize, Serialize};

use crate::codec::{self, Endianness};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusAddress, ModbusException, ModbusFunction, ModbusValue};

/// Function codes a coil register may answer
pub const COIL_FUNCTIONS: [ModbusFunction; 4] = [
    ModbusFunction::ReadCoils,
    ModbusFunction::ReadDiscreteInputs,
    ModbusFunction::WriteSingleCoil,
    ModbusFunction::WriteMultipleCoils,
];

/// Function codes a holding register may answer
pub const HOLDING_FUNCTIONS: [ModbusFunction; 4] = [
    ModbusFunction::ReadHoldingRegisters,
    ModbusFunction::ReadInputRegisters,
    ModbusFunction::WriteSingleHoldingRegister,
    ModbusFunction::WriteMultipleHoldingRegisters,
];

/// Inclusive address range `[first, last]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRange {
    pub first: ModbusAddress,
    pub last: ModbusAddress,
}

impl RegisterRange {
    /// Create a range, rejecting `first > last`
    pub fn new(first: ModbusAddress, last: ModbusAddress) -> ModbusResult<Self> {
        if first > last {
            return Err(ModbusError::configuration(format!(
                "Register range start 0x{:04X} is after its end 0x{:04X}", first, last
            )));
        }
        Ok(Self { first, last })
    }

    /// Number of addresses in the range
    pub fn len(&self) -> usize {
        (self.last - self.first) as usize + 1
    }

    /// A range always holds at least one address
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Check whether `address` is inside the range
    pub fn contains(&self, address: ModbusAddress) -> bool {
        (self.first..=self.last).contains(&address)
    }

    /// Check whether every unit of `[address, address + count)` is inside the range
    pub fn contains_run(&self, address: ModbusAddress, count: u16) -> bool {
        if count == 0 || !self.contains(address) {
            return false;
        }
        let end = address as u32 + count as u32 - 1;
        end <= self.last as u32
    }

    /// Storage offsets of the run `[address, address + count)`
    fn offsets(&self, address: ModbusAddress, count: u16) -> Result<std::ops::Range<usize>, ModbusException> {
        if !self.contains_run(address, count) {
            return Err(ModbusException::IllegalDataAddress);
        }
        let start = (address - self.first) as usize;
        Ok(start..start + count as usize)
    }
}

fn validate_functions(
    name: &str,
    functions: &[ModbusFunction],
    allowed: &[ModbusFunction],
) -> ModbusResult<()> {
    if functions.is_empty() {
        return Err(ModbusError::configuration(format!(
            "Register '{}' answers no function code", name
        )));
    }
    if let Some(function) = functions.iter().find(|&&f| !allowed.contains(&f)) {
        return Err(ModbusError::configuration(format!(
            "Register '{}' cannot answer {}", name, function
        )));
    }
    Ok(())
}

fn validate_storage(name: &str, range: RegisterRange, storage_len: usize) -> ModbusResult<()> {
    if storage_len != range.len() {
        return Err(ModbusError::configuration(format!(
            "Register '{}' storage holds {} values but its range 0x{:04X}-0x{:04X} needs {}",
            name, storage_len, range.first, range.last, range.len()
        )));
    }
    Ok(())
}

/// Bit-addressed register: coils and discrete inputs
#[derive(Debug, Clone, PartialEq)]
pub struct CoilRegister {
    name: String,
    range: RegisterRange,
    functions: Vec<ModbusFunction>,
    values: Vec<bool>,
}

impl CoilRegister {
    /// Create a coil register over caller-supplied storage
    pub fn new(
        name: impl Into<String>,
        first: ModbusAddress,
        last: ModbusAddress,
        functions: &[ModbusFunction],
        values: Vec<bool>,
    ) -> ModbusResult<Self> {
        let name = name.into();
        let range = RegisterRange::new(first, last)?;
        validate_functions(&name, functions, &COIL_FUNCTIONS)?;
        validate_storage(&name, range, values.len())?;
        Ok(Self { name, range, functions: functions.to_vec(), values })
    }

    /// Create a coil register with every coil cleared
    pub fn zeroed(
        name: impl Into<String>,
        first: ModbusAddress,
        last: ModbusAddress,
        functions: &[ModbusFunction],
    ) -> ModbusResult<Self> {
        let range = RegisterRange::new(first, last)?;
        Self::new(name, first, last, functions, vec![false; range.len()])
    }

    /// Pack `count` coils starting at `address`, LSB first
    pub fn read(&self, address: ModbusAddress, count: u16) -> Result<Vec<u8>, ModbusException> {
        let offsets = self.range.offsets(address, count)?;
        Ok(self.values[offsets]
            .chunks(8)
            .map(|chunk| codec::compress_booleans(chunk, chunk.len()))
            .collect())
    }

    /// Unpack `count` coils from `payload` into storage starting at `address`
    pub fn write(&mut self, address: ModbusAddress, count: u16, payload: &[u8]) -> Result<(), ModbusException> {
        let offsets = self.range.offsets(address, count)?;
        if payload.len() < codec::packed_len(count as usize) {
            return Err(ModbusException::IllegalDataValue);
        }
        let bits = payload.iter().flat_map(|&byte| codec::decompress_booleans(byte));
        for (slot, bit) in self.values[offsets].iter_mut().zip(bits) {
            *slot = bit;
        }
        Ok(())
    }

    /// Store `value > 0` at `address`
    pub fn write_single(&mut self, address: ModbusAddress, value: ModbusValue) -> Result<(), ModbusException> {
        let offsets = self.range.offsets(address, 1)?;
        self.values[offsets.start] = value > 0;
        Ok(())
    }

    /// Coil at `address`, if the register owns it
    pub fn value(&self, address: ModbusAddress) -> Option<bool> {
        self.range.offsets(address, 1).ok().map(|offsets| self.values[offsets.start])
    }

    /// Set the coil at `address`; returns `false` if the register does not own it
    pub fn set_value(&mut self, address: ModbusAddress, value: bool) -> bool {
        match self.range.offsets(address, 1) {
            Ok(offsets) => {
                self.values[offsets.start] = value;
                true
            }
            Err(_) => false,
        }
    }

    /// Backing storage, indexed by `address - first`
    pub fn values(&self) -> &[bool] {
        &self.values
    }
}

/// Word-addressed register: holding and input registers
#[derive(Debug, Clone, PartialEq)]
pub struct HoldingRegister {
    name: String,
    range: RegisterRange,
    functions: Vec<ModbusFunction>,
    values: Vec<u16>,
    receive_order: Endianness,
    send_order: Endianness,
}

impl HoldingRegister {
    /// Create a holding register over caller-supplied storage
    ///
    /// `receive_order` is the byte order incoming words are decoded with,
    /// `send_order` the one outgoing words are encoded with. Standard Modbus
    /// uses [`Endianness::Big`] for both.
    pub fn new(
        name: impl Into<String>,
        first: ModbusAddress,
        last: ModbusAddress,
        functions: &[ModbusFunction],
        values: Vec<u16>,
        receive_order: Endianness,
        send_order: Endianness,
    ) -> ModbusResult<Self> {
        let name = name.into();
        let range = RegisterRange::new(first, last)?;
        validate_functions(&name, functions, &HOLDING_FUNCTIONS)?;
        validate_storage(&name, range, values.len())?;
        Ok(Self {
            name,
            range,
            functions: functions.to_vec(),
            values,
            receive_order,
            send_order,
        })
    }

    /// Create a big-endian holding register with every word zeroed
    pub fn zeroed(
        name: impl Into<String>,
        first: ModbusAddress,
        last: ModbusAddress,
        functions: &[ModbusFunction],
    ) -> ModbusResult<Self> {
        let range = RegisterRange::new(first, last)?;
        Self::new(
            name, first, last, functions,
            vec![0; range.len()],
            Endianness::Big, Endianness::Big,
        )
    }

    /// Change the receive and send byte orders
    pub fn with_byte_order(mut self, receive_order: Endianness, send_order: Endianness) -> Self {
        self.receive_order = receive_order;
        self.send_order = send_order;
        self
    }

    pub fn receive_order(&self) -> Endianness {
        self.receive_order
    }

    pub fn send_order(&self) -> Endianness {
        self.send_order
    }

    /// Encode `count` words starting at `address` in the send byte order
    pub fn read(&self, address: ModbusAddress, count: u16) -> Result<Vec<u8>, ModbusException> {
        let offsets = self.range.offsets(address, count)?;
        Ok(self.values[offsets]
            .iter()
            .flat_map(|&word| codec::split_bytes(word, self.send_order))
            .collect())
    }

    /// Decode `count` words from `payload` in the receive byte order
    pub fn write(&mut self, address: ModbusAddress, count: u16, payload: &[u8]) -> Result<(), ModbusException> {
        let offsets = self.range.offsets(address, count)?;
        if payload.len() < count as usize * 2 {
            return Err(ModbusException::IllegalDataValue);
        }
        let order = self.receive_order;
        for (slot, bytes) in self.values[offsets].iter_mut().zip(payload.chunks_exact(2)) {
            *slot = codec::decode_word([bytes[0], bytes[1]], order);
        }
        Ok(())
    }

    /// Store a single word
    ///
    /// `value` was read big-endian off the wire; it is re-interpreted in the
    /// receive byte order so single and multiple writes store the same word.
    pub fn write_single(&mut self, address: ModbusAddress, value: ModbusValue) -> Result<(), ModbusException> {
        let offsets = self.range.offsets(address, 1)?;
        self.values[offsets.start] = codec::decode_word(value.to_be_bytes(), self.receive_order);
        Ok(())
    }

    /// Word at `address`, if the register owns it
    pub fn value(&self, address: ModbusAddress) -> Option<u16> {
        self.range.offsets(address, 1).ok().map(|offsets| self.values[offsets.start])
    }

    /// Set the word at `address`; returns `false` if the register does not own it
    pub fn set_value(&mut self, address: ModbusAddress, value: u16) -> bool {
        match self.range.offsets(address, 1) {
            Ok(offsets) => {
                self.values[offsets.start] = value;
                true
            }
            Err(_) => false,
        }
    }

    /// Backing storage, indexed by `address - first`
    pub fn values(&self) -> &[u16] {
        &self.values
    }
}

/// A register of either kind
#[derive(Debug, Clone, PartialEq)]
pub enum Register {
    Coil(CoilRegister),
    Holding(HoldingRegister),
}

impl Register {
    pub fn name(&self) -> &str {
        match self {
            Register::Coil(coil) => &coil.name,
            Register::Holding(holding) => &holding.name,
        }
    }

    pub fn range(&self) -> RegisterRange {
        match self {
            Register::Coil(coil) => coil.range,
            Register::Holding(holding) => holding.range,
        }
    }

    pub fn functions(&self) -> &[ModbusFunction] {
        match self {
            Register::Coil(coil) => &coil.functions,
            Register::Holding(holding) => &holding.functions,
        }
    }

    /// Check whether the register answers the raw function code
    pub fn supports(&self, function_code: u8) -> bool {
        self.functions().iter().any(|f| f.to_u8() == function_code)
    }

    /// Check whether `address` falls in the register's range
    pub fn address_in_range(&self, address: ModbusAddress) -> bool {
        self.range().contains(address)
    }

    /// Data bytes a read of `count` units produces
    pub fn response_byte_count(&self, count: u16) -> usize {
        match self {
            Register::Coil(_) => codec::packed_len(count as usize),
            Register::Holding(_) => count as usize * 2,
        }
    }

    /// Read `count` units starting at `address` in wire format
    pub fn read(&self, address: ModbusAddress, count: u16) -> Result<Vec<u8>, ModbusException> {
        match self {
            Register::Coil(coil) => coil.read(address, count),
            Register::Holding(holding) => holding.read(address, count),
        }
    }

    /// Write `count` units starting at `address` from a wire-format payload
    pub fn write(&mut self, address: ModbusAddress, count: u16, payload: &[u8]) -> Result<(), ModbusException> {
        match self {
            Register::Coil(coil) => coil.write(address, count, payload),
            Register::Holding(holding) => holding.write(address, count, payload),
        }
    }

    /// Write a single unit
    pub fn write_single(&mut self, address: ModbusAddress, value: ModbusValue) -> Result<(), ModbusException> {
        match self {
            Register::Coil(coil) => coil.write_single(address, value),
            Register::Holding(holding) => holding.write_single(address, value),
        }
    }
}

impl From<CoilRegister> for Register {
    fn from(register: CoilRegister) -> Self {
        Register::Coil(register)
    }
}

impl From<HoldingRegister> for Register {
    fn from(register: HoldingRegister) -> Self {
        Register::Holding(register)
    }
}

/// Kind of register to build from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    Coil,
    Holding,
}

/// One entry of a register table configuration
///
/// Storage is not part of the configuration: building a register allocates
/// zeroed storage sized to the address range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterConfig {
    pub name: String,
    pub kind: RegisterKind,
    pub first_address: ModbusAddress,
    pub last_address: ModbusAddress,
    pub functions: Vec<ModbusFunction>,
    /// Holding registers only
    #[serde(default)]
    pub receive_order: Endianness,
    /// Holding registers only
    #[serde(default)]
    pub send_order: Endianness,
}

impl RegisterConfig {
    /// Coil register configuration
    pub fn coil(
        name: impl Into<String>,
        first_address: ModbusAddress,
        last_address: ModbusAddress,
        functions: &[ModbusFunction],
    ) -> Self {
        Self {
            name: name.into(),
            kind: RegisterKind::Coil,
            first_address,
            last_address,
            functions: functions.to_vec(),
            receive_order: Endianness::Big,
            send_order: Endianness::Big,
        }
    }

    /// Big-endian holding register configuration
    pub fn holding(
        name: impl Into<String>,
        first_address: ModbusAddress,
        last_address: ModbusAddress,
        functions: &[ModbusFunction],
    ) -> Self {
        Self {
            kind: RegisterKind::Holding,
            ..Self::coil(name, first_address, last_address, functions)
        }
    }

    /// Override the holding register byte orders
    pub fn with_byte_order(mut self, receive_order: Endianness, send_order: Endianness) -> Self {
        self.receive_order = receive_order;
        self.send_order = send_order;
        self
    }

    /// Build the register with zeroed storage
    pub fn build(&self) -> ModbusResult<Register> {
        match self.kind {
            RegisterKind::Coil => CoilRegister::zeroed(
                self.name.clone(), self.first_address, self.last_address, &self.functions,
            ).map(Register::Coil),
            RegisterKind::Holding => HoldingRegister::zeroed(
                self.name.clone(), self.first_address, self.last_address, &self.functions,
            ).map(|register| Register::Holding(
                register.with_byte_order(self.receive_order, self.send_order),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coils() -> CoilRegister {
        CoilRegister::zeroed("coils", 0x4000, 0x47CF, &COIL_FUNCTIONS).unwrap()
    }

    #[test]
    fn test_range() {
        let range = RegisterRange::new(10, 19).unwrap();
        assert_eq!(range.len(), 10);
        assert!(range.contains(10));
        assert!(range.contains(19));
        assert!(!range.contains(20));
        assert!(range.contains_run(15, 5));
        assert!(!range.contains_run(15, 6));
        assert!(!range.contains_run(15, 0));
        assert!(RegisterRange::new(5, 4).is_err());

        let top = RegisterRange::new(0xFFF0, 0xFFFF).unwrap();
        assert!(top.contains_run(0xFFFF, 1));
        assert!(!top.contains_run(0xFFFF, 2));
    }

    #[test]
    fn test_configuration_errors() {
        assert!(CoilRegister::new("short", 0, 9, &COIL_FUNCTIONS, vec![false; 9]).is_err());
        assert!(CoilRegister::zeroed("none", 0, 9, &[]).is_err());
        assert!(CoilRegister::zeroed("wrong", 0, 9, &[ModbusFunction::ReadHoldingRegisters]).is_err());
        assert!(HoldingRegister::zeroed("wrong", 0, 9, &[ModbusFunction::WriteSingleCoil]).is_err());
        assert!(HoldingRegister::zeroed("ok", 0, 9, &HOLDING_FUNCTIONS).is_ok());
    }

    #[test]
    fn test_coil_read_packs_only_requested_bits() {
        let mut register = coils();
        assert!(register.set_value(0x4000 + 178, true));
        let start = 16500;
        let payload = register.read(start, 88).unwrap();
        assert_eq!(payload.len(), 11);

        let offset = (178 + 0x4000 - start) as usize;
        assert_ne!(payload[offset / 8] & (1 << (offset % 8)), 0);

        for (i, &byte) in payload.iter().enumerate() {
            for bit in 0..8 {
                if i * 8 + bit != offset {
                    assert_eq!(byte & (1 << bit), 0);
                }
            }
        }

        // Ten coils set: the second byte only carries two of them
        for address in 0x4000..0x400A {
            register.set_value(address, true);
        }
        assert_eq!(register.read(0x4000, 10).unwrap(), vec![0xFF, 0x03]);
    }

    #[test]
    fn test_coil_write() {
        let mut register = coils();
        register.write(17000, 3, &[0b0000_0101]).unwrap();
        assert_eq!(register.value(17000), Some(true));
        assert_eq!(register.value(17001), Some(false));
        assert_eq!(register.value(17002), Some(true));
        // Bits past the quantity are not written
        register.write(17010, 2, &[0xFF]).unwrap();
        assert_eq!(register.value(17012), Some(false));

        register.write_single(17002, 0).unwrap();
        assert_eq!(register.value(17002), Some(false));
        register.write_single(17002, 0xFF00).unwrap();
        assert_eq!(register.value(17002), Some(true));

        assert_eq!(register.write(17000, 9, &[0xFF]), Err(ModbusException::IllegalDataValue));
        assert_eq!(register.write(0x47CF, 2, &[0xFF]), Err(ModbusException::IllegalDataAddress));
        assert_eq!(register.write_single(0x3FFF, 1), Err(ModbusException::IllegalDataAddress));
    }

    #[test]
    fn test_holding_round_trip_any_byte_order() {
        let payload = [0x12, 0x34, 0xAB, 0xCD, 0x00, 0x01];
        for order in [Endianness::Big, Endianness::Little] {
            let mut register = HoldingRegister::zeroed("holding", 0, 15, &HOLDING_FUNCTIONS)
                .unwrap()
                .with_byte_order(order, order);
            register.write(4, 3, &payload).unwrap();
            assert_eq!(register.read(4, 3).unwrap(), payload.to_vec());
        }
    }

    #[test]
    fn test_holding_storage_order() {
        let mut big = HoldingRegister::zeroed("big", 0, 3, &HOLDING_FUNCTIONS).unwrap();
        big.write(0, 1, &[0x12, 0x34]).unwrap();
        assert_eq!(big.value(0), Some(0x1234));

        let mut little = big.clone().with_byte_order(Endianness::Little, Endianness::Big);
        little.write(1, 1, &[0x12, 0x34]).unwrap();
        assert_eq!(little.value(1), Some(0x3412));
        assert_eq!(little.read(1, 1).unwrap(), vec![0x34, 0x12]);
    }

    #[test]
    fn test_holding_single_write_matches_multiple() {
        for order in [Endianness::Big, Endianness::Little] {
            let mut register = HoldingRegister::zeroed("holding", 0, 3, &HOLDING_FUNCTIONS)
                .unwrap()
                .with_byte_order(order, Endianness::Big);
            register.write(0, 1, &[0x12, 0x34]).unwrap();
            register.write_single(1, 0x1234).unwrap();
            assert_eq!(register.value(0), register.value(1));
        }
    }

    #[test]
    fn test_holding_rejects_short_payload() {
        let mut register = HoldingRegister::zeroed("holding", 0, 3, &HOLDING_FUNCTIONS).unwrap();
        assert_eq!(register.write(0, 2, &[0x00, 0x01, 0x02]), Err(ModbusException::IllegalDataValue));
        assert_eq!(register.values(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_register_dispatch() {
        let register: Register = coils().into();
        assert!(register.supports(0x01));
        assert!(!register.supports(0x03));
        assert!(register.address_in_range(0x4000));
        assert_eq!(register.response_byte_count(9), 2);

        let holding: Register = HoldingRegister::zeroed("h", 0, 3, &HOLDING_FUNCTIONS).unwrap().into();
        assert_eq!(holding.response_byte_count(9), 18);
        assert_eq!(holding.name(), "h");
    }

    #[test]
    fn test_register_config() {
        let json = r#"{
            "name": "floats",
            "kind": "holding",
            "first_address": 28672,
            "last_address": 29670,
            "functions": ["ReadHoldingRegisters", "WriteMultipleHoldingRegisters"],
            "receive_order": "little"
        }"#;
        let config: RegisterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.send_order, Endianness::Big);

        match config.build().unwrap() {
            Register::Holding(register) => {
                assert_eq!(register.receive_order(), Endianness::Little);
                assert_eq!(register.values().len(), 999);
            }
            Register::Coil(_) => panic!("expected a holding register"),
        }

        let bad = RegisterConfig::coil("bad", 10, 5, &COIL_FUNCTIONS);
        assert!(bad.build().is_err());
    }
}
