//! # Request Engine
//!
//! One request cycle: build a frame, write it, read the MBAP header, hand the rest
//! to the [`ResponseParser`], and time the whole round trip.
//!
//! Workers only see the [`RequestEngine`] trait, so they can be exercised against
//! a fake engine without any socket.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::error::{ModbusError, ModbusResult};
use crate::frame::{FrameEncoder, MBAP_HEADER_LEN};
use crate::parser::{FramingMode, ParsedResponse, ResponseParser};
use crate::protocol::{ExceptionResponse, ReadRequest, ResponsePdu};
use crate::transport::{Transport, TransportStats};

/// Classified outcome of one request cycle
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(ResponsePdu),
    Exception(ExceptionResponse),
    Failed(ModbusError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Failed in a way that leaves the connection unusable
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Outcome::Failed(e) if e.is_connection_fatal())
    }
}

/// One completed request cycle
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub latency: Duration,
    pub outcome: Outcome,
}

impl ExecutionResult {
    pub fn new(latency: Duration, outcome: Outcome) -> Self {
        Self { latency, outcome }
    }
}

/// Executes read requests on a single connection
#[async_trait]
pub trait RequestEngine: Send {
    /// Perform exactly one wire round trip for `request`
    async fn execute(&mut self, request: &ReadRequest) -> ExecutionResult;

    /// Release the connection
    async fn close(&mut self) -> ModbusResult<()> {
        Ok(())
    }
}

/// Modbus TCP implementation of [`RequestEngine`]
///
/// Owns its transport, its transaction id sequence and its body buffer; none of
/// them are shared with another engine.
pub struct ModbusEngine<S = TcpStream> {
    transport: Transport<S>,
    encoder: FrameEncoder,
    parser: ResponseParser,
    body: BytesMut,
}

impl ModbusEngine<TcpStream> {
    /// Dial `address` and build an engine over the new connection
    pub async fn connect(
        address: &str,
        timeout: Duration,
        mode: FramingMode,
    ) -> ModbusResult<Self> {
        let transport = Transport::dial(address, timeout).await?;
        Ok(Self::new(transport, mode))
    }
}

impl<S> ModbusEngine<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(transport: Transport<S>, mode: FramingMode) -> Self {
        Self {
            transport,
            encoder: FrameEncoder::new(),
            parser: ResponseParser::new(mode),
            body: BytesMut::with_capacity(crate::MAX_PDU_SIZE + 1),
        }
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.transport.set_packet_logging(enabled);
    }

    pub fn transport_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }

    async fn round_trip(&mut self, frame: &[u8], request: &ReadRequest) -> Outcome {
        if let Err(e) = self.transport.write(frame).await {
            return Outcome::Failed(e);
        }

        let mut header = [0u8; MBAP_HEADER_LEN];
        if let Err(e) = self.transport.read_exact(&mut header).await {
            return Outcome::Failed(e);
        }

        let parsed = self
            .parser
            .parse(
                &mut self.transport,
                self.encoder.current_transaction_id(),
                request.function,
                &header,
                &mut self.body,
            )
            .await;

        match parsed {
            Ok(ParsedResponse::Data(pdu)) => Outcome::Success(pdu),
            Ok(ParsedResponse::Exception(exception)) => Outcome::Exception(exception),
            Err(e) => Outcome::Failed(e),
        }
    }
}

#[async_trait]
impl<S> RequestEngine for ModbusEngine<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn execute(&mut self, request: &ReadRequest) -> ExecutionResult {
        self.transport.set_timeout(request.timeout);
        let frame = self.encoder.build_read_frame(
            request.unit_id,
            request.function,
            request.address,
            request.quantity,
        );

        let start = Instant::now();
        let outcome = self.round_trip(&frame, request).await;
        ExecutionResult::new(start.elapsed(), outcome)
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ModbusFunction;
    use tokio_test::io::{Builder, Mock};

    fn engine(mock: Mock, mode: FramingMode) -> ModbusEngine<Mock> {
        ModbusEngine::new(
            Transport::from_stream(mock, "mock", Duration::from_secs(1)),
            mode,
        )
    }

    fn request() -> ReadRequest {
        ReadRequest::new(1, ModbusFunction::ReadHoldingRegisters, 0, 2)
    }

    #[tokio::test]
    async fn test_execute_success() {
        let mock = Builder::new()
            .write(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02])
            .read(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01])
            .read(&[0x03, 0x04, 0x00, 0x2A, 0x00, 0x2B])
            .build();
        let mut engine = engine(mock, FramingMode::Lenient);

        let result = engine.execute(&request()).await;
        match result.outcome {
            Outcome::Success(pdu) => assert_eq!(pdu.decode_registers(2).unwrap(), vec![42, 43]),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(engine.transport_stats().requests_sent, 1);
    }

    #[tokio::test]
    async fn test_execute_exception() {
        let mock = Builder::new()
            .write(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02])
            .read(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01])
            .read(&[0x83, 0x02])
            .build();
        let mut engine = engine(mock, FramingMode::Lenient);

        let result = engine.execute(&request()).await;
        match result.outcome {
            Outcome::Exception(e) => {
                assert_eq!(e.function, 0x03);
                assert_eq!(e.code, 0x02);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transaction_ids_advance_per_request() {
        let mock = Builder::new()
            .write(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02])
            .read(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01])
            .read(&[0x03, 0x04, 0x00, 0x01, 0x00, 0x02])
            .write(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02])
            .read(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x07, 0x01])
            .read(&[0x03, 0x04, 0x00, 0x03, 0x00, 0x04])
            .build();
        let mut engine = engine(mock, FramingMode::Strict);

        assert!(engine.execute(&request()).await.outcome.is_success());
        assert!(engine.execute(&request()).await.outcome.is_success());
    }

    #[tokio::test]
    async fn test_header_eof_is_fatal() {
        let mock = Builder::new()
            .write(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02])
            .read(&[0x00, 0x01, 0x00])
            .build();
        let mut engine = engine(mock, FramingMode::Lenient);

        let result = engine.execute(&request()).await;
        assert!(result.outcome.is_connection_fatal());
    }

    #[tokio::test]
    async fn test_mismatch_is_not_fatal() {
        let mock = Builder::new()
            .write(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02])
            .read(&[0x00, 0x09, 0x00, 0x00, 0x00, 0x07, 0x01])
            .build();
        let mut engine = engine(mock, FramingMode::Lenient);

        let result = engine.execute(&request()).await;
        match &result.outcome {
            Outcome::Failed(e) => assert!(e.is_parse_error()),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!result.outcome.is_connection_fatal());
    }
}
