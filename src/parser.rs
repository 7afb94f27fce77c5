//! # Response Parser
//!
//! Consumes a Modbus TCP response after the caller has read its 7-byte MBAP
//! header, and classifies it as a data response, an exception response or a
//! parse error.
//!
//! ## Framing modes
//!
//! **Strict** trusts the MBAP length field and reads exactly `length - 1` body
//! bytes; a length beyond a full PDU is rejected before reading. The returned buffer is `[unit id] [function code] [...]`, with the unit
//! id taken from the header.
//!
//! **Lenient** (default) ignores the MBAP length and tolerates devices that
//! repeat the unit id at the start of the PDU. It reads two bytes and decides the
//! layout from the first one:
//!
//! ```text
//! FC first:    [fc] [byte count] [payload...]        or  [fc|0x80] [code]
//! Unit first:  [unit] [fc] [byte count] [payload...] or  [unit] [fc|0x80] [code]
//! ```
//!
//! Every byte consumed stays in the returned buffer, so downstream decoding finds
//! the function code at offset 0 or 1 (see [`ResponsePdu::function_offset`]).
//!
//! A unit id equal to the expected function code is indistinguishable from the
//! FC-first layout; lenient mode reads such a frame as FC first.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use crate::error::{ModbusError, ModbusResult};
use crate::frame::{MbapHeader, MBAP_HEADER_LEN, MODBUS_PROTOCOL_ID};
use crate::protocol::{ExceptionResponse, ModbusFunction, ResponsePdu, EXCEPTION_BIT};
use crate::transport::Transport;

/// Largest MBAP length a response can carry: unit id + 253-byte PDU
pub const MAX_MBAP_LENGTH: u16 = 1 + crate::MAX_PDU_SIZE as u16;

/// How the parser locates the function code in a response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingMode {
    /// Body length from the MBAP header, unit id always present
    Strict,
    /// Layout detected from the first two body bytes
    #[default]
    Lenient,
}

/// Result of parsing one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponse {
    /// Non-exception response, raw body as consumed
    Data(ResponsePdu),
    /// The device answered with an exception
    Exception(ExceptionResponse),
}

impl ParsedResponse {
    pub fn is_exception(&self) -> bool {
        matches!(self, ParsedResponse::Exception(_))
    }

    /// Turn an exception into an error, keeping data responses
    pub fn into_pdu(self) -> ModbusResult<ResponsePdu> {
        match self {
            ParsedResponse::Data(pdu) => Ok(pdu),
            ParsedResponse::Exception(exception) => Err(exception.into()),
        }
    }
}

/// Response parser with a fixed framing mode
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseParser {
    mode: FramingMode,
}

impl ResponseParser {
    pub fn new(mode: FramingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Validate `header` and consume the response body from `transport`
    ///
    /// `body` is a scratch buffer owned by the caller; it is cleared first and its
    /// contents are moved into the returned [`ResponsePdu`].
    ///
    /// Failures while reading the body are reported as
    /// [`ModbusError::BodyRead`], never as connection errors.
    pub async fn parse<S>(
        &self,
        transport: &mut Transport<S>,
        expected_transaction_id: u16,
        expected_function: ModbusFunction,
        header: &[u8; MBAP_HEADER_LEN],
        body: &mut BytesMut,
    ) -> ModbusResult<ParsedResponse>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mbap = MbapHeader::decode(header);
        validate_header(&mbap, expected_transaction_id)?;

        body.clear();
        match self.mode {
            FramingMode::Strict => parse_strict(transport, &mbap, expected_function, body).await,
            FramingMode::Lenient => parse_lenient(transport, expected_function, body).await,
        }
    }
}

fn validate_header(mbap: &MbapHeader, expected_transaction_id: u16) -> ModbusResult<()> {
    if mbap.transaction_id != expected_transaction_id {
        return Err(ModbusError::transaction_mismatch(
            expected_transaction_id,
            mbap.transaction_id,
        ));
    }
    if mbap.protocol_id != MODBUS_PROTOCOL_ID {
        return Err(ModbusError::invalid_protocol_id(mbap.protocol_id));
    }
    if mbap.length < 1 {
        return Err(ModbusError::invalid_length(mbap.length));
    }
    Ok(())
}

/// Append exactly `n` bytes from the transport to `body`
async fn read_into<S>(transport: &mut Transport<S>, body: &mut BytesMut, n: usize) -> ModbusResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let start = body.len();
    body.resize(start + n, 0);
    transport
        .read_exact(&mut body[start..])
        .await
        .map_err(|e| ModbusError::body_read(&e))
}

async fn parse_strict<S>(
    transport: &mut Transport<S>,
    mbap: &MbapHeader,
    expected_function: ModbusFunction,
    body: &mut BytesMut,
) -> ModbusResult<ParsedResponse>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if mbap.length > MAX_MBAP_LENGTH {
        return Err(ModbusError::invalid_length(mbap.length));
    }

    body.extend_from_slice(&[mbap.unit_id]);
    read_into(transport, body, mbap.length as usize - 1).await?;

    let function_byte = *body
        .get(1)
        .ok_or_else(|| ModbusError::frame("Response body has no function code"))?;

    if function_byte & EXCEPTION_BIT != 0 {
        let code = *body
            .get(2)
            .ok_or_else(|| ModbusError::frame("Exception response without exception code"))?;
        return Ok(ParsedResponse::Exception(ExceptionResponse::from_wire(
            function_byte,
            code,
        )));
    }

    if function_byte != expected_function.to_u8() {
        return Err(ModbusError::function_mismatch(
            expected_function.to_u8(),
            function_byte,
        ));
    }

    Ok(ParsedResponse::Data(ResponsePdu::new(body.split().freeze(), 1)))
}

async fn parse_lenient<S>(
    transport: &mut Transport<S>,
    expected_function: ModbusFunction,
    body: &mut BytesMut,
) -> ModbusResult<ParsedResponse>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    read_into(transport, body, 2).await?;
    let (first, second) = (body[0], body[1]);

    if first == expected_function.to_u8() || first == expected_function.exception_code() {
        trace!("FC-first response layout");
        if first & EXCEPTION_BIT != 0 {
            return Ok(ParsedResponse::Exception(ExceptionResponse::from_wire(
                first, second,
            )));
        }
        read_into(transport, body, second as usize).await?;
        return Ok(ParsedResponse::Data(ResponsePdu::new(body.split().freeze(), 0)));
    }

    trace!("Unit-first response layout (unit id {})", first);
    if second & EXCEPTION_BIT != 0 {
        read_into(transport, body, 1).await?;
        return Ok(ParsedResponse::Exception(ExceptionResponse::from_wire(
            second, body[2],
        )));
    }
    if second != expected_function.to_u8() {
        return Err(ModbusError::function_mismatch(
            expected_function.to_u8(),
            second,
        ));
    }

    read_into(transport, body, 1).await?;
    let byte_count = body[2] as usize;
    read_into(transport, body, byte_count).await?;
    Ok(ParsedResponse::Data(ResponsePdu::new(body.split().freeze(), 1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::io::{Builder, Mock};

    const FC3: ModbusFunction = ModbusFunction::ReadHoldingRegisters;

    fn transport(mock: Mock) -> Transport<Mock> {
        Transport::from_stream(mock, "mock", Duration::from_secs(1))
    }

    fn header(transaction_id: u16, length: u16, unit_id: u8) -> [u8; 7] {
        let tx = transaction_id.to_be_bytes();
        let len = length.to_be_bytes();
        [tx[0], tx[1], 0x00, 0x00, len[0], len[1], unit_id]
    }

    async fn parse_with(
        mode: FramingMode,
        header: [u8; 7],
        body_bytes: &[u8],
    ) -> ModbusResult<ParsedResponse> {
        let mut transport = transport(Builder::new().read(body_bytes).build());
        let mut body = BytesMut::with_capacity(260);
        ResponseParser::new(mode)
            .parse(&mut transport, 1, FC3, &header, &mut body)
            .await
    }

    #[tokio::test]
    async fn test_strict_standard_response() {
        let parsed = parse_with(
            FramingMode::Strict,
            header(1, 7, 1),
            &[0x03, 0x04, 0x00, 0x2A, 0x00, 0x2B],
        )
        .await
        .unwrap();

        let pdu = parsed.into_pdu().unwrap();
        assert_eq!(pdu.raw(), &[0x01, 0x03, 0x04, 0x00, 0x2A, 0x00, 0x2B]);
        assert_eq!(pdu.function_offset(), 1);
        assert_eq!(pdu.decode_registers(2).unwrap(), vec![42, 43]);
    }

    #[tokio::test]
    async fn test_lenient_unit_first_response() {
        // Lenient reads 2 + 1 + 4 bytes; mock enforces exact consumption
        let mut transport = transport(
            Builder::new()
                .read(&[0x01, 0x03])
                .read(&[0x04])
                .read(&[0x00, 0x2A, 0x00, 0x2B])
                .build(),
        );
        let mut body = BytesMut::new();
        let parsed = ResponseParser::new(FramingMode::Lenient)
            .parse(&mut transport, 1, FC3, &header(1, 8, 1), &mut body)
            .await
            .unwrap();

        let pdu = parsed.into_pdu().unwrap();
        assert_eq!(pdu.raw(), &[0x01, 0x03, 0x04, 0x00, 0x2A, 0x00, 0x2B]);
        assert_eq!(pdu.function_offset(), 1);
        assert_eq!(pdu.decode_registers(2).unwrap(), vec![42, 43]);
    }

    #[tokio::test]
    async fn test_lenient_fc_first_response() {
        let parsed = parse_with(
            FramingMode::Lenient,
            header(1, 7, 1),
            &[0x03, 0x04, 0x00, 0x2A, 0x00, 0x2B],
        )
        .await
        .unwrap();

        let pdu = parsed.into_pdu().unwrap();
        assert_eq!(pdu.raw(), &[0x03, 0x04, 0x00, 0x2A, 0x00, 0x2B]);
        assert_eq!(pdu.function_offset(), 0);
        assert_eq!(pdu.decode_registers(2).unwrap(), vec![42, 43]);
    }

    #[tokio::test]
    async fn test_strict_and_lenient_agree_on_payload() {
        let payload: Vec<u8> = (0u8..20).collect();
        let mut wire = vec![0x03, payload.len() as u8];
        wire.extend_from_slice(&payload);
        let length = 1 + wire.len() as u16;

        let strict = parse_with(FramingMode::Strict, header(1, length, 7), &wire)
            .await
            .unwrap()
            .into_pdu()
            .unwrap();
        let lenient = parse_with(FramingMode::Lenient, header(1, length, 7), &wire)
            .await
            .unwrap()
            .into_pdu()
            .unwrap();

        assert_eq!(strict.payload().unwrap(), &payload[..]);
        assert_eq!(strict.payload().unwrap(), lenient.payload().unwrap());
        assert_eq!(strict.decode_registers(10).unwrap(), lenient.decode_registers(10).unwrap());

        // A device repeating the unit id in its PDU decodes to the same values
        let mut unit_first = vec![0x07];
        unit_first.extend_from_slice(&wire);
        let repeated = parse_with(FramingMode::Lenient, header(1, length + 1, 7), &unit_first)
            .await
            .unwrap()
            .into_pdu()
            .unwrap();
        assert_eq!(repeated.payload().unwrap(), &payload[..]);
    }

    #[tokio::test]
    async fn test_exception_detected_in_every_layout() {
        let expected = ExceptionResponse { function: 0x03, code: 0x02 };

        // Strict
        let parsed = parse_with(FramingMode::Strict, header(1, 3, 1), &[0x83, 0x02])
            .await
            .unwrap();
        assert_eq!(parsed, ParsedResponse::Exception(expected));

        // Lenient, unit first
        let parsed = parse_with(FramingMode::Lenient, header(1, 4, 1), &[0x01, 0x83, 0x02])
            .await
            .unwrap();
        assert_eq!(parsed, ParsedResponse::Exception(expected));

        // Lenient, FC first
        let parsed = parse_with(FramingMode::Lenient, header(1, 3, 1), &[0x83, 0x02])
            .await
            .unwrap();
        assert_eq!(parsed, ParsedResponse::Exception(expected));
        assert!(parsed.is_exception());
        assert!(parsed.into_pdu().unwrap_err().is_exception());
    }

    #[tokio::test]
    async fn test_exception_function_is_low_seven_bits() {
        // A different function's exception is still an exception
        let parsed = parse_with(FramingMode::Lenient, header(1, 4, 1), &[0x01, 0x84, 0x0B])
            .await
            .unwrap();
        assert_eq!(
            parsed,
            ParsedResponse::Exception(ExceptionResponse { function: 0x04, code: 0x0B })
        );
    }

    #[tokio::test]
    async fn test_header_validation_reads_nothing() {
        let mut body = BytesMut::new();
        let parser = ResponseParser::default();

        let mut t = transport(Builder::new().build());
        let err = parser
            .parse(&mut t, 1, FC3, &header(2, 7, 1), &mut body)
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::TransactionMismatch { expected: 1, actual: 2 }));

        let mut t = transport(Builder::new().build());
        let err = parser
            .parse(&mut t, 1, FC3, &[0x00, 0x01, 0x00, 0x01, 0x00, 0x07, 0x01], &mut body)
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidProtocolId { protocol_id: 1 }));

        let mut t = transport(Builder::new().build());
        let err = parser
            .parse(&mut t, 1, FC3, &header(1, 0, 1), &mut body)
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidLength { length: 0 }));

        let mut t = transport(Builder::new().build());
        let err = ResponseParser::new(FramingMode::Strict)
            .parse(&mut t, 1, FC3, &header(1, 300, 1), &mut body)
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidLength { length: 300 }));
        assert!(err.is_parse_error());
    }

    #[tokio::test]
    async fn test_lenient_ignores_oversized_length() {
        let pdu = parse_with(
            FramingMode::Lenient,
            header(1, 300, 1),
            &[0x03, 0x04, 0x00, 0x2A, 0x00, 0x2B],
        )
        .await
        .unwrap()
        .into_pdu()
        .unwrap();
        assert_eq!(pdu.decode_registers(2).unwrap(), vec![42, 43]);
    }

    #[tokio::test]
    async fn test_lenient_function_mismatch_stops_reading() {
        let err = parse_with(FramingMode::Lenient, header(1, 7, 1), &[0x01, 0x04])
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::FunctionMismatch { expected: 0x03, actual: 0x04 }));
    }

    #[tokio::test]
    async fn test_strict_function_mismatch() {
        let err = parse_with(FramingMode::Strict, header(1, 5, 1), &[0x04, 0x02, 0x00, 0x01])
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::FunctionMismatch { expected: 0x03, actual: 0x04 }));
    }

    #[tokio::test]
    async fn test_strict_length_one_has_no_function_code() {
        let mut t = transport(Builder::new().build());
        let mut body = BytesMut::new();
        let err = ResponseParser::new(FramingMode::Strict)
            .parse(&mut t, 1, FC3, &header(1, 1, 1), &mut body)
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));
    }

    #[tokio::test]
    async fn test_truncated_body_is_parse_error() {
        // Byte count announces 4 bytes, peer closes after 2
        let err = parse_with(FramingMode::Lenient, header(1, 7, 1), &[0x01, 0x03, 0x04, 0x00, 0x2A])
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::BodyRead { .. }));
        assert!(err.is_parse_error());
        assert!(!err.is_connection_fatal());
    }

    #[tokio::test]
    async fn test_body_buffer_is_reused() {
        let mut t = transport(
            Builder::new()
                .read(&[0x03, 0x02, 0x00, 0x01])
                .read(&[0x03, 0x02, 0x00, 0x02])
                .build(),
        );
        let parser = ResponseParser::new(FramingMode::Lenient);
        let mut body = BytesMut::with_capacity(64);

        let first = parser
            .parse(&mut t, 1, FC3, &header(1, 5, 1), &mut body)
            .await
            .unwrap()
            .into_pdu()
            .unwrap();
        let second = parser
            .parse(&mut t, 2, FC3, &header(2, 5, 1), &mut body)
            .await
            .unwrap()
            .into_pdu()
            .unwrap();

        assert_eq!(first.decode_registers(1).unwrap(), vec![1]);
        assert_eq!(second.decode_registers(1).unwrap(), vec![2]);
    }

    #[test]
    fn test_framing_mode_serde() {
        assert_eq!(FramingMode::default(), FramingMode::Lenient);
        let mode: FramingMode = serde_json::from_str("\"strict\"").unwrap();
        assert_eq!(mode, FramingMode::Strict);
    }
}
