/// Modbus TCP framing
///
/// Request frames are a 7-byte MBAP header followed by a 5-byte read PDU:
///
/// ```text
/// ┌──────────┬──────────┬──────────┬─────────┬────┬─────────┬──────────┐
/// │ TxID (2) │ Proto (2)│ Len (2)  │ Unit (1)│ FC │ Addr (2)│ Qty (2)  │
/// └──────────┴──────────┴──────────┴─────────┴────┴─────────┴──────────┘
/// ```
///
/// Every field is big-endian. `Len` counts the unit id plus the PDU, so it is
/// always 6 for a read request.

use byteorder::{BigEndian, ByteOrder};
use bytes::BufMut;

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusAddress, ModbusFunction, UnitId};

/// Modbus Application Protocol header size (transaction, protocol, length, unit id)
pub const MBAP_HEADER_LEN: usize = 7;

/// Size of a read request PDU (function code, address, quantity)
pub const READ_PDU_LEN: usize = 5;

/// Size of a complete read request frame
pub const READ_REQUEST_FRAME_LEN: usize = MBAP_HEADER_LEN + READ_PDU_LEN;

/// Protocol id for Modbus
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// MBAP length of a read request: unit id + 5-byte PDU
const READ_REQUEST_LENGTH: u16 = 1 + READ_PDU_LEN as u16;

/// Exact bytes written to the socket for one read request
pub type WireFrame = [u8; READ_REQUEST_FRAME_LEN];

/// Decoded MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Byte count of everything after the length field (unit id included)
    pub length: u16,
    pub unit_id: UnitId,
}

impl MbapHeader {
    /// Decode the 7 header bytes. No validation happens here.
    pub fn decode(header: &[u8; MBAP_HEADER_LEN]) -> Self {
        Self {
            transaction_id: BigEndian::read_u16(&header[0..2]),
            protocol_id: BigEndian::read_u16(&header[2..4]),
            length: BigEndian::read_u16(&header[4..6]),
            unit_id: header[6],
        }
    }
}

/// Builds read request frames for one connection
///
/// The encoder owns the transaction id sequence of its connection; it is never
/// shared between workers.
#[derive(Debug, Default)]
pub struct FrameEncoder {
    transaction_id: u16,
}

impl FrameEncoder {
    /// Create an encoder whose first frame carries transaction id 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an encoder that resumes after `last_transaction_id`
    pub fn starting_after(last_transaction_id: u16) -> Self {
        Self {
            transaction_id: last_transaction_id,
        }
    }

    /// Build a read request, advancing the transaction id first
    ///
    /// The id wraps modulo 2^16.
    pub fn build_read_frame(
        &mut self,
        unit_id: UnitId,
        function: ModbusFunction,
        address: ModbusAddress,
        quantity: u16,
    ) -> WireFrame {
        self.transaction_id = self.transaction_id.wrapping_add(1);

        let mut frame = [0u8; READ_REQUEST_FRAME_LEN];
        let mut buf = &mut frame[..];

        // MBAP Header
        buf.put_u16(self.transaction_id);
        buf.put_u16(MODBUS_PROTOCOL_ID);
        buf.put_u16(READ_REQUEST_LENGTH);
        buf.put_u8(unit_id);

        // PDU
        buf.put_u8(function.to_u8());
        buf.put_u16(address);
        buf.put_u16(quantity);

        frame
    }

    /// Transaction id of the most recently built frame
    pub fn current_transaction_id(&self) -> u16 {
        self.transaction_id
    }
}

/// A read request recovered from its 12 wire bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame {
    pub transaction_id: u16,
    pub unit_id: UnitId,
    pub function: ModbusFunction,
    pub address: ModbusAddress,
    pub quantity: u16,
}

impl RequestFrame {
    /// Parse a read request frame
    pub fn decode(frame: &[u8]) -> ModbusResult<Self> {
        if frame.len() != READ_REQUEST_FRAME_LEN {
            return Err(ModbusError::frame(format!(
                "Read request must be {} bytes, got {}",
                READ_REQUEST_FRAME_LEN,
                frame.len()
            )));
        }

        let mut header = [0u8; MBAP_HEADER_LEN];
        header.copy_from_slice(&frame[..MBAP_HEADER_LEN]);
        let mbap = MbapHeader::decode(&header);

        if mbap.protocol_id != MODBUS_PROTOCOL_ID {
            return Err(ModbusError::invalid_protocol_id(mbap.protocol_id));
        }
        if mbap.length != READ_REQUEST_LENGTH {
            return Err(ModbusError::invalid_length(mbap.length));
        }

        Ok(Self {
            transaction_id: mbap.transaction_id,
            unit_id: mbap.unit_id,
            function: ModbusFunction::from_u8(frame[7])?,
            address: BigEndian::read_u16(&frame[8..10]),
            quantity: BigEndian::read_u16(&frame[10..12]),
        })
    }
}
