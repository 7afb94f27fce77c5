//! # Load Test Error Handling
//!
//! This module provides the error type shared by every layer of the load tester:
//! connection setup, socket I/O, response framing and Modbus exception responses.
//!
//! ## Error Categories
//!
//! ### Connection-fatal errors
//! - **I/O Errors**: write/read failures on an established socket
//! - **Connection Errors**: dial failures, peer closing the socket
//! - **Timeout Errors**: a single write or read exceeded its deadline
//!
//! A worker that observes one of these reports it once and then terminates; the
//! connection is presumed broken and is never re-dialed.
//!
//! ### Parse errors
//! - **Transaction mismatch**, **invalid protocol id**, **invalid MBAP length**
//! - **Function code mismatch**
//! - **Body read failures** while the parser consumes the PDU
//! - **Frame errors** for structurally malformed responses
//!
//! Parse errors are counted as "other errors" but do not tear the connection down.
//!
//! ### Exception responses
//! A well-formed Modbus exception (function code with bit 7 set) is a protocol-level
//! outcome of its own. The parser reports it as a value, not as an error; the
//! [`ModbusError::Exception`] variant exists for callers that want to turn it into one.
//!
//! ## Classification
//!
//! ```rust
//! use voltage_loadtest::ModbusError;
//!
//! fn classify(error: &ModbusError) -> &'static str {
//!     if error.is_connection_fatal() {
//!         "connection lost"
//!     } else if error.is_exception() {
//!         "exception"
//!     } else {
//!         "bad response"
//!     }
//! }
//!
//! assert_eq!(classify(&ModbusError::timeout("read header", 100)), "connection lost");
//! assert_eq!(classify(&ModbusError::exception(0x03, 0x02)), "exception");
//! assert_eq!(classify(&ModbusError::function_mismatch(0x03, 0x04)), "bad response");
//! ```

use thiserror::Error;

use crate::protocol::ExceptionCode;

/// Result type alias for load test operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Error conditions raised while driving a Modbus TCP target
///
/// Each variant carries enough context to be printed on its own; the worker loop
/// only needs the classification helpers to decide whether to keep going.
#[derive(Error, Debug, Clone)]
pub enum ModbusError {
    /// I/O related errors on an established connection
    ///
    /// # Examples
    /// - Connection reset by peer while writing
    /// - Broken pipe
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection errors
    ///
    /// Dial failures and orderly closes by the remote side.
    ///
    /// # Examples
    /// - Connection refused by remote host
    /// - Peer closed the socket mid-response (EOF)
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// A single write or read exceeded the per-request deadline
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// MBAP transaction id did not match the id of the request just sent
    #[error("Transaction id mismatch: expected={expected}, actual={actual}")]
    TransactionMismatch { expected: u16, actual: u16 },

    /// MBAP protocol id was not 0 (Modbus)
    #[error("Invalid protocol id: {protocol_id}")]
    InvalidProtocolId { protocol_id: u16 },

    /// MBAP length field outside the range a response can have
    #[error("Invalid MBAP length: {length}")]
    InvalidLength { length: u16 },

    /// Response function code differs from the request function code
    #[error("Function code mismatch: expected={expected:02X}, actual={actual:02X}")]
    FunctionMismatch { expected: u8, actual: u8 },

    /// Reading the response body failed after a valid header was received
    ///
    /// Reported as a parse error: the worker keeps its connection.
    #[error("Response body read failed: {message}")]
    BodyRead { message: String },

    /// Function code outside the supported read functions (0x01-0x04)
    #[error("Invalid function code: {code}")]
    InvalidFunction { code: u8 },

    /// Modbus exception response
    ///
    /// # Standard Exception Codes
    /// - 0x01: Illegal Function
    /// - 0x02: Illegal Data Address
    /// - 0x03: Illegal Data Value
    /// - 0x04: Server Device Failure
    /// - 0x05: Acknowledge
    /// - 0x06: Server Device Busy
    /// - 0x08: Memory Parity Error
    /// - 0x0A: Gateway Path Unavailable
    /// - 0x0B: Gateway Target Device Failed to Respond
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception { function: u8, code: u8, message: String },

    /// Structurally malformed frame
    ///
    /// # Examples
    /// - Exception response without an exception code
    /// - Request frame of the wrong size
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Payload could not be decoded into values
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Invalid or inconsistent load test configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn transaction_mismatch(expected: u16, actual: u16) -> Self {
        Self::TransactionMismatch { expected, actual }
    }

    pub fn invalid_protocol_id(protocol_id: u16) -> Self {
        Self::InvalidProtocolId { protocol_id }
    }

    pub fn invalid_length(length: u16) -> Self {
        Self::InvalidLength { length }
    }

    pub fn function_mismatch(expected: u8, actual: u8) -> Self {
        Self::FunctionMismatch { expected, actual }
    }

    /// Wrap a transport failure that happened while reading a response body
    pub fn body_read(source: &ModbusError) -> Self {
        Self::BodyRead {
            message: source.to_string(),
        }
    }

    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create a Modbus exception error
    ///
    /// Standard exception codes are mapped to their human-readable names.
    ///
    /// # Arguments
    ///
    /// * `function` - Original function code (high bit cleared)
    /// * `code` - Modbus exception code
    pub fn exception(function: u8, code: u8) -> Self {
        Self::Exception {
            function,
            code,
            message: ExceptionCode::from(code).name().to_string(),
        }
    }

    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Check if the error means the connection can no longer be trusted
    ///
    /// Write failures, header read failures and deadline expiry leave the socket in
    /// an unknown state. Workers terminate after reporting one of these.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use voltage_loadtest::ModbusError;
    ///
    /// assert!(ModbusError::connection("Connection refused").is_connection_fatal());
    /// assert!(!ModbusError::transaction_mismatch(7, 8).is_connection_fatal());
    /// ```
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }

    /// Check if the error is a framing/parse failure
    ///
    /// These are counted as "other errors" without closing the connection.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::TransactionMismatch { .. }
                | Self::InvalidProtocolId { .. }
                | Self::InvalidLength { .. }
                | Self::FunctionMismatch { .. }
                | Self::BodyRead { .. }
                | Self::Frame { .. }
        )
    }

    /// Check if the error is a Modbus exception response
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }
}

/// Convert from std::io::Error
///
/// EOF-style failures mean the peer went away and map to `Connection`; everything
/// else is a plain `Io` error.
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => {
                Self::connection(format!("connection closed by peer: {}", err))
            }
            std::io::ErrorKind::TimedOut => Self::timeout(err.to_string(), 0),
            _ => Self::io(err.to_string()),
        }
    }
}

/// Convert from tokio timeout errors
///
/// The elapsed duration is unknown here; the transport creates timeout errors with
/// the configured deadline itself.
impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_data(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for ModbusError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("YAML error: {}", err))
    }
}
