/// Register table: request routing for the slave
///
/// The table is an ordered list of [`Register`]s. A request is routed to the
/// first register, in list order, that answers its function code and owns its
/// start address. When no register qualifies, the exception follows the usual
/// Modbus precedence:
///
/// 1. `IllegalFunction` if no register answers the function code at all
/// 2. `IllegalDataAddress` if no register, of any function, owns the address
/// 3. `SlaveDeviceFailure` otherwise: function and address exist, but never together
///
/// The table owns every register's storage. Applications read and update
/// values through the accessor methods between polls.

use log::debug;

use crate::codec;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{
    ModbusAddress, ModbusException, ModbusFunction, RequestPdu, ResponsePdu,
};
use crate::register::{Register, RegisterConfig};
use crate::{MAX_COILS_PER_REQUEST, MAX_REGISTERS_PER_REQUEST};

/// One processed request: what came in, what went out and its encoded length
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub request: RequestPdu,
    pub response: ResponsePdu,
    /// Bytes of the response PDU now at the start of the buffer
    pub len: usize,
}

/// Ordered collection of registers
#[derive(Debug, Clone, Default)]
pub struct RegisterTable {
    registers: Vec<Register>,
}

impl RegisterTable {
    /// Create a table; list order is the routing tie-break
    pub fn new(registers: Vec<Register>) -> Self {
        Self { registers }
    }

    /// Build a table from configuration, allocating zeroed storage
    pub fn from_config(configs: &[RegisterConfig]) -> ModbusResult<Self> {
        let registers = configs.iter()
            .map(RegisterConfig::build)
            .collect::<ModbusResult<Vec<_>>>()?;
        Ok(Self::new(registers))
    }

    /// Append a register after all existing ones
    pub fn push(&mut self, register: impl Into<Register>) {
        self.registers.push(register.into());
    }

    /// Builder form of [`RegisterTable::push`]
    pub fn with_register(mut self, register: impl Into<Register>) -> Self {
        self.push(register);
        self
    }

    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Register looked up by name
    pub fn register(&self, name: &str) -> Option<&Register> {
        self.registers.iter().find(|register| register.name() == name)
    }

    /// Mutable register looked up by name
    pub fn register_mut(&mut self, name: &str) -> Option<&mut Register> {
        self.registers.iter_mut().find(|register| register.name() == name)
    }

    /// Execute a request against the table
    ///
    /// Never fails: every problem becomes an exception response.
    pub fn process_request(&mut self, request: &RequestPdu) -> ResponsePdu {
        let function_code = request.function_code;
        let function = match request.function() {
            Ok(function) => function,
            Err(_) => {
                debug!("Unsupported function code 0x{:02X}", function_code);
                return ResponsePdu::new_exception(function_code, ModbusException::IllegalFunction);
            }
        };

        let address = request.address;
        let index = self.registers.iter()
            .position(|register| register.supports(function_code) && register.address_in_range(address));
        let Some(index) = index else {
            let exception = self.exception_for(function_code, address);
            debug!("No register for {} at 0x{:04X}: {:?}", function, address, exception);
            return ResponsePdu::new_exception(function_code, exception);
        };

        let register = &mut self.registers[index];
        let result = if function.is_read_function() {
            Self::read(register, function, address, request.count)
        } else if function.is_single_write() {
            register.write_single(address, request.value())
                .map(|()| ResponsePdu::new_write_single(function, address, request.value()))
        } else if request.count == 0 {
            Err(ModbusException::IllegalDataValue)
        } else {
            register.write(address, request.count, &request.payload)
                .map(|()| ResponsePdu::new_write_multiple(function, address, request.count))
        };

        result.unwrap_or_else(|exception| {
            debug!("{} at 0x{:04X} x{} rejected: {:?}", function, address, request.count, exception);
            ResponsePdu::new_exception(function_code, exception)
        })
    }

    fn read(
        register: &Register,
        function: ModbusFunction,
        address: ModbusAddress,
        count: u16,
    ) -> Result<ResponsePdu, ModbusException> {
        let limit = match register {
            Register::Coil(_) => MAX_COILS_PER_REQUEST,
            Register::Holding(_) => MAX_REGISTERS_PER_REQUEST,
        };
        if count == 0 || count > limit {
            return Err(ModbusException::IllegalDataValue);
        }
        if !register.range().contains_run(address, count) {
            return Err(ModbusException::IllegalDataAddress);
        }
        let payload = register.read(address, count)?;
        debug_assert_eq!(payload.len(), register.response_byte_count(count));
        Ok(ResponsePdu::new_read(function, payload))
    }

    /// Exception for a request no register can serve
    fn exception_for(&self, function_code: u8, address: ModbusAddress) -> ModbusException {
        if !self.registers.iter().any(|register| register.supports(function_code)) {
            ModbusException::IllegalFunction
        } else if !self.registers.iter().any(|register| register.address_in_range(address)) {
            ModbusException::IllegalDataAddress
        } else {
            ModbusException::SlaveDeviceFailure
        }
    }

    /// Process the request PDU at the start of `buffer` and answer in place
    ///
    /// `request_len` bounds the request; the response may use the whole buffer.
    /// A buffer that cannot hold the response gets a `SlaveDeviceFailure`
    /// exception instead. Malformed requests are returned as errors and the
    /// buffer is left untouched.
    pub fn process_stream(&mut self, buffer: &mut [u8], request_len: usize) -> ModbusResult<Transaction> {
        let request_bytes = buffer.get(..request_len)
            .ok_or_else(|| ModbusError::frame(format!(
                "Request length {} exceeds buffer of {} bytes", request_len, buffer.len()
            )))?;
        let request = RequestPdu::parse(request_bytes)?;

        let mut response = self.process_request(&request);
        let len = match response.write_into(buffer) {
            Ok(len) => len,
            Err(err) => {
                debug!("Response does not fit: {}", err);
                response = ResponsePdu::new_exception(request.function_code, ModbusException::SlaveDeviceFailure);
                response.write_into(buffer)?
            }
        };

        Ok(Transaction { request, response, len })
    }

    /// Coil at `address` from the first coil register owning it
    pub fn coil(&self, address: ModbusAddress) -> Option<bool> {
        self.registers.iter().find_map(|register| match register {
            Register::Coil(coil) => coil.value(address),
            Register::Holding(_) => None,
        })
    }

    /// Set the coil at `address` in the first coil register owning it
    pub fn set_coil(&mut self, address: ModbusAddress, value: bool) -> ModbusResult<()> {
        let updated = self.registers.iter_mut().any(|register| match register {
            Register::Coil(coil) => coil.set_value(address, value),
            Register::Holding(_) => false,
        });
        if updated { Ok(()) } else { Err(ModbusError::invalid_address(address, 1)) }
    }

    /// Word at `address` from the first holding register owning it
    pub fn holding(&self, address: ModbusAddress) -> Option<u16> {
        self.registers.iter().find_map(|register| match register {
            Register::Holding(holding) => holding.value(address),
            Register::Coil(_) => None,
        })
    }

    /// Set the word at `address` in the first holding register owning it
    pub fn set_holding(&mut self, address: ModbusAddress, value: u16) -> ModbusResult<()> {
        let updated = self.registers.iter_mut().any(|register| match register {
            Register::Holding(holding) => holding.set_value(address, value),
            Register::Coil(_) => false,
        });
        if updated { Ok(()) } else { Err(ModbusError::invalid_address(address, 1)) }
    }

    /// 32-bit value stored high word first at `address`, `address + 1`
    pub fn holding_u32(&self, address: ModbusAddress) -> Option<u32> {
        let high = self.holding(address)?;
        let low = self.holding(address.checked_add(1)?)?;
        Some(codec::combine_words(high, low))
    }

    /// Store a 32-bit value high word first at `address`, `address + 1`
    pub fn set_holding_u32(&mut self, address: ModbusAddress, value: u32) -> ModbusResult<()> {
        let next = address.checked_add(1)
            .ok_or_else(|| ModbusError::invalid_address(address, 2))?;
        if self.holding(address).is_none() || self.holding(next).is_none() {
            return Err(ModbusError::invalid_address(address, 2));
        }
        let [high, low] = codec::split_words(value);
        self.set_holding(address, high)?;
        self.set_holding(next, low)
    }

    /// IEEE-754 float stored over two words
    pub fn holding_f32(&self, address: ModbusAddress) -> Option<f32> {
        self.holding_u32(address).map(f32::from_bits)
    }

    pub fn set_holding_f32(&mut self, address: ModbusAddress, value: f32) -> ModbusResult<()> {
        self.set_holding_u32(address, value.to_bits())
    }

    /// Get register table statistics
    pub fn get_stats(&self) -> RegisterTableStats {
        let mut stats = RegisterTableStats {
            register_count: self.registers.len(),
            ..RegisterTableStats::default()
        };
        for register in &self.registers {
            match register {
                Register::Coil(coil) => stats.coil_count += coil.values().len(),
                Register::Holding(holding) => stats.holding_word_count += holding.values().len(),
            }
        }
        stats
    }
}

/// Register table statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterTableStats {
    pub register_count: usize,
    pub coil_count: usize,
    pub holding_word_count: usize,
}
