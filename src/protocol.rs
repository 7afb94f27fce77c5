/// Modbus protocol definitions and data structures
///
/// This module contains the read function codes the load tester can drive, the
/// exception code catalogue, the per-step request template and the decoding of
/// response payloads into values.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, ModbusResult};

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus unit identifier
pub type UnitId = u8;

/// Bit set on the function code of an exception response
pub const EXCEPTION_BIT: u8 = 0x80;

/// Modbus read function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
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
}

impl ModbusFunction {
    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Function code as it appears in an exception response
    pub fn exception_code(self) -> u8 {
        self.to_u8() | EXCEPTION_BIT
    }

    /// Check if the function reads single bits (coils, discrete inputs)
    pub fn is_bit_function(self) -> bool {
        matches!(
            self,
            ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs
        )
    }

    /// Largest quantity the protocol allows in one request
    pub fn max_quantity(self) -> u16 {
        if self.is_bit_function() {
            crate::MAX_COILS_PER_REQUEST
        } else {
            crate::MAX_REGISTERS_PER_REQUEST
        }
    }

    /// Number of payload bytes a well-formed response carries for `quantity` items
    pub fn expected_byte_count(self, quantity: u16) -> usize {
        if self.is_bit_function() {
            (quantity as usize + 7) / 8
        } else {
            quantity as usize * 2
        }
    }
}

impl TryFrom<u8> for ModbusFunction {
    type Error = ModbusError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value)
    }
}

impl From<ModbusFunction> for u8 {
    fn from(function: ModbusFunction) -> Self {
        function.to_u8()
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes
///
/// Codes outside the standard set are kept verbatim in `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetDeviceFailedToRespond,
    Unknown(u8),
}

impl ExceptionCode {
    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::ServerDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::ServerDeviceBusy => 0x06,
            ExceptionCode::MemoryParityError => 0x08,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetDeviceFailedToRespond => 0x0B,
            ExceptionCode::Unknown(code) => code,
        }
    }

    /// Short human-readable name
    pub fn name(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::ServerDeviceFailure => "Server Device Failure",
            ExceptionCode::Acknowledge => "Acknowledge",
            ExceptionCode::ServerDeviceBusy => "Server Device Busy",
            ExceptionCode::MemoryParityError => "Memory Parity Error",
            ExceptionCode::GatewayPathUnavailable => "Gateway Path Unavailable",
            ExceptionCode::GatewayTargetDeviceFailedToRespond => {
                "Gateway Target Device Failed to Respond"
            }
            ExceptionCode::Unknown(_) => "Unknown Exception",
        }
    }
}

impl From<u8> for ExceptionCode {
    fn from(value: u8) -> Self {
        match value {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::ServerDeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::ServerDeviceBusy,
            0x08 => ExceptionCode::MemoryParityError,
            0x0A => ExceptionCode::GatewayPathUnavailable,
            0x0B => ExceptionCode::GatewayTargetDeviceFailedToRespond,
            other => ExceptionCode::Unknown(other),
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} ({})", self.to_u8(), self.name())
    }
}

/// A Modbus exception response: the device rejected the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    /// Function code with the exception bit cleared
    pub function: u8,
    /// Raw exception code
    pub code: u8,
}

impl ExceptionResponse {
    /// Build from the on-wire function byte (bit 7 set) and the exception code
    pub fn from_wire(function_byte: u8, code: u8) -> Self {
        Self {
            function: function_byte & !EXCEPTION_BIT,
            code,
        }
    }

    pub fn exception_code(&self) -> ExceptionCode {
        ExceptionCode::from(self.code)
    }
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exception fc=0x{:02X} code={}",
            self.function,
            self.exception_code()
        )
    }
}

impl From<ExceptionResponse> for ModbusError {
    fn from(exception: ExceptionResponse) -> Self {
        ModbusError::exception(exception.function, exception.code)
    }
}

/// Read request template
///
/// Immutable for the lifetime of a test step; every worker executes the same
/// template over and over on its own connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub unit_id: UnitId,
    pub function: ModbusFunction,
    pub address: ModbusAddress,
    pub quantity: u16,
    /// Deadline applied to each socket write and each socket read
    pub timeout: Duration,
}

impl ReadRequest {
    /// Create a new read request with the default timeout
    pub fn new(
        unit_id: UnitId,
        function: ModbusFunction,
        address: ModbusAddress,
        quantity: u16,
    ) -> Self {
        Self {
            unit_id,
            function,
            address,
            quantity,
            timeout: Duration::from_millis(crate::DEFAULT_TIMEOUT_MS),
        }
    }

    /// Replace the per-operation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate the request
    ///
    /// Only the conditions that make a frame meaningless are rejected. Quantities
    /// above the protocol maxima are allowed so that a test can provoke exception
    /// responses on purpose.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.quantity == 0 {
            return Err(ModbusError::invalid_data("Quantity cannot be zero"));
        }
        if self.timeout.is_zero() {
            return Err(ModbusError::invalid_data("Timeout cannot be zero"));
        }
        Ok(())
    }

    /// Check if the quantity exceeds what a compliant device will accept
    pub fn exceeds_protocol_limit(&self) -> bool {
        self.quantity > self.function.max_quantity()
    }
}

/// Successful response PDU as consumed from the wire
///
/// The buffer keeps every byte the parser read, including any leading unit id,
/// so the function code sits at offset 0 or 1 depending on the device layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePdu {
    raw: Bytes,
    function_offset: usize,
}

impl ResponsePdu {
    /// Wrap a raw buffer whose function code is at `function_offset`
    pub fn new(raw: Bytes, function_offset: usize) -> Self {
        Self {
            raw,
            function_offset,
        }
    }

    /// Every byte the parser consumed for this response
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Offset of the function code inside [`raw`](Self::raw)
    pub fn function_offset(&self) -> usize {
        self.function_offset
    }

    pub fn function_code(&self) -> Option<u8> {
        self.raw.get(self.function_offset).copied()
    }

    /// Byte count field following the function code
    pub fn byte_count(&self) -> Option<u8> {
        self.raw.get(self.function_offset + 1).copied()
    }

    /// Payload bytes announced by the byte count
    pub fn payload(&self) -> ModbusResult<&[u8]> {
        let byte_count = self
            .byte_count()
            .ok_or_else(|| ModbusError::invalid_data("Missing byte count"))?
            as usize;
        let start = self.function_offset + 2;
        self.raw
            .get(start..start + byte_count)
            .ok_or_else(|| ModbusError::invalid_data("Data exceeds PDU length"))
    }

    /// Decode the payload into one `u16` per requested item
    ///
    /// Registers (0x03/0x04) are big-endian words; coils and discrete inputs
    /// (0x01/0x02) are unpacked LSB first into 0/1 values.
    pub fn decode_values(&self, function: ModbusFunction, quantity: u16) -> ModbusResult<Vec<u16>> {
        match self.function_code() {
            Some(code) if code == function.to_u8() => {}
            Some(code) => {
                return Err(ModbusError::invalid_data(format!(
                    "Function code not found in PDU: got 0x{:02X}, expected 0x{:02X}",
                    code,
                    function.to_u8()
                )))
            }
            None => return Err(ModbusError::invalid_data("Empty PDU")),
        }

        let data = self.payload()?;
        let expected = function.expected_byte_count(quantity);
        if data.len() != expected {
            return Err(ModbusError::invalid_data(format!(
                "Byte count mismatch: got {} expected {}",
                data.len(),
                expected
            )));
        }

        let values = if function.is_bit_function() {
            (0..quantity as usize)
                .map(|i| u16::from((data[i / 8] >> (i % 8)) & 0x01))
                .collect()
        } else {
            data.chunks_exact(2)
                .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                .collect()
        };
        Ok(values)
    }

    /// Decode holding/input register values
    pub fn decode_registers(&self, quantity: u16) -> ModbusResult<Vec<u16>> {
        let function = self.register_function()?;
        self.decode_values(function, quantity)
    }

    /// Decode coil/discrete input states
    pub fn decode_bits(&self, quantity: u16) -> ModbusResult<Vec<bool>> {
        let function = match self.function_code().map(ModbusFunction::from_u8) {
            Some(Ok(f)) if f.is_bit_function() => f,
            _ => return Err(ModbusError::invalid_data("Not a bit read response")),
        };
        Ok(self
            .decode_values(function, quantity)?
            .into_iter()
            .map(|v| v != 0)
            .collect())
    }

    fn register_function(&self) -> ModbusResult<ModbusFunction> {
        match self.function_code().map(ModbusFunction::from_u8) {
            Some(Ok(f)) if !f.is_bit_function() => Ok(f),
            _ => Err(ModbusError::invalid_data("Not a register read response")),
        }
    }
}
