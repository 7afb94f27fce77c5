//! # Voltage Loadtest - Modbus TCP Load Testing Library
//!
//! Opens many concurrent connections to a Modbus TCP device or simulator, drives
//! them at a controlled request rate and reports the latency distribution and
//! outcome breakdown of the test window.
//!
//! ## Features
//!
//! - **🚀 Async Workers**: one Tokio task per connection, strictly sequential requests
//! - **⏱️ Rate Control**: shared token bucket with fixed-rate, unlimited and ramp plans
//! - **🔍 Lenient Framing**: detects whether a device repeats the unit id in its PDU
//! - **📊 Bounded Statistics**: lock-free counters and a fixed-size log2 latency histogram
//! - **🛡️ Explicit Failure Model**: exceptions, bad responses and lost connections are
//!   counted separately; nothing is retried
//!
//! ## Supported Function Codes
//!
//! | Code | Function |
//! |------|----------|
//! | 0x01 | Read Coils |
//! | 0x02 | Read Discrete Inputs |
//! | 0x03 | Read Holding Registers |
//! | 0x04 | Read Input Registers |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_loadtest::{run_load_test, LoadTestConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoadTestConfig {
//!         target: "127.0.0.1:5020".to_string(),
//!         workers: 20,
//!         rate: 1000,
//!         duration_ms: 10_000,
//!         ..LoadTestConfig::default()
//!     };
//!
//!     let report = run_load_test(&config, std::future::pending()).await?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │     Runner      │──── drains results, enforces the step duration
//! └─────────────────┘
//!          │ spawns N
//! ┌─────────────────┐    ┌─────────────────┐
//! │     Worker      │◄──►│    Scheduler    │  (shared token bucket)
//! └─────────────────┘    └─────────────────┘
//!          │
//! ┌─────────────────┐    ┌─────────────────┐
//! │  Modbus Engine  │───►│ Counters / Hist │──► Report
//! │ encoder+parser  │    └─────────────────┘
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │    Transport    │
//! │   (Async I/O)   │
//! └─────────────────┘
//! ```

/// Error types and classification
pub mod error;

/// Function codes, exception codes, request template, response payload decoding
pub mod protocol;

/// MBAP framing and the per-connection request encoder
pub mod frame;

/// TCP transport with per-operation deadlines
pub mod transport;

/// Response parsing in strict and lenient framing modes
pub mod parser;

/// One request/response cycle behind a trait
pub mod engine;

/// Per-connection request loop
pub mod worker;

/// Token bucket rate limiting
pub mod scheduler;

/// Outcome counters and latency histogram
pub mod stats;

/// Final report
pub mod report;

/// Test step configuration
pub mod config;

/// Test step orchestration
pub mod runner;

/// Formatting and parsing helpers
pub mod utils;

// Re-export main types for convenience
pub use config::LoadTestConfig;
pub use engine::{ExecutionResult, ModbusEngine, Outcome, RequestEngine};
pub use error::{ModbusError, ModbusResult};
pub use frame::{FrameEncoder, WireFrame};
pub use parser::{FramingMode, ParsedResponse, ResponseParser};
pub use protocol::{ExceptionCode, ExceptionResponse, ModbusFunction, ReadRequest, ResponsePdu};
pub use report::Report;
pub use runner::run_load_test;
pub use scheduler::{Acquire, RatePlan, Scheduler};
pub use stats::{Counters, CountersSnapshot, Histogram, HistogramSnapshot};
pub use transport::{Transport, TransportStats};
pub use worker::{Worker, WorkerExit};

/// Default per-operation timeout (100 milliseconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Maximum number of coils that can be read in a single request
pub const MAX_COILS_PER_REQUEST: u16 = 2000;

/// Maximum number of registers that can be read in a single request
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

/// Maximum Modbus PDU size (function code + data)
pub const MAX_PDU_SIZE: usize = 253;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage Loadtest v{} - Modbus TCP load testing", VERSION)
}
