//! # Load Test Configuration
//!
//! [`LoadTestConfig`] describes one test step: where to connect, how many
//! connections to open, how fast to drive them and which read to issue.
//! Durations are stored in milliseconds so that YAML files stay flat:
//!
//! ```yaml
//! target: "192.168.1.20:502"
//! workers: 20
//! rate: 0              # requests/s shared by all workers, 0 = unlimited
//! duration_ms: 30000
//! ramp: [100, 500, 1000]
//! step_duration_ms: 5000
//! unit_id: 1
//! function_code: 3
//! address: 0
//! quantity: 10
//! timeout_ms: 100
//! framing: lenient     # or strict
//! packet_logging: false
//! ```
//!
//! Every field is optional; missing fields take the defaults listed on
//! [`LoadTestConfig::default`]. A non-empty `ramp` takes precedence over `rate`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ModbusError, ModbusResult};
use crate::parser::FramingMode;
use crate::protocol::{ModbusFunction, ReadRequest};
use crate::scheduler::RatePlan;

/// Configuration of one load test step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadTestConfig {
    /// Target `host:port`
    pub target: String,
    /// Concurrent connections, one worker each
    pub workers: usize,
    /// Shared request rate in requests per second, 0 for unlimited
    pub rate: u32,
    /// Step duration for a fixed rate test
    pub duration_ms: u64,
    /// Ramp rates; zero entries are skipped
    pub ramp: Vec<u32>,
    /// Time spent on each ramp rate
    pub step_duration_ms: u64,
    pub unit_id: u8,
    pub function_code: u8,
    pub address: u16,
    pub quantity: u16,
    /// Deadline for dialing and for each socket write/read
    pub timeout_ms: u64,
    pub framing: FramingMode,
    pub packet_logging: bool,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            target: format!("127.0.0.1:{}", crate::DEFAULT_TCP_PORT),
            workers: 10,
            rate: 0,
            duration_ms: 10_000,
            ramp: Vec::new(),
            step_duration_ms: 5_000,
            unit_id: 1,
            function_code: 3,
            address: 0,
            quantity: 10,
            timeout_ms: crate::DEFAULT_TIMEOUT_MS,
            framing: FramingMode::Lenient,
            packet_logging: false,
        }
    }
}

impl LoadTestConfig {
    /// Load a configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ModbusResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ModbusResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Reject configurations that cannot produce a meaningful test
    ///
    /// Quantities above the protocol maxima only produce a warning: the device is
    /// expected to answer them with an exception, which may be what the test wants.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.target.trim().is_empty() {
            return Err(ModbusError::configuration("target required"));
        }
        if self.workers == 0 {
            return Err(ModbusError::configuration("workers must be > 0"));
        }
        if self.quantity == 0 {
            return Err(ModbusError::configuration("quantity must be > 0"));
        }
        if self.timeout_ms == 0 {
            return Err(ModbusError::configuration("timeout must be > 0"));
        }
        let function = ModbusFunction::from_u8(self.function_code).map_err(|_| {
            ModbusError::configuration(format!(
                "function code must be 1-4, got {}",
                self.function_code
            ))
        })?;
        if self.is_ramp() && self.step_duration_ms == 0 {
            return Err(ModbusError::configuration("step duration must be > 0"));
        }

        if self.quantity > function.max_quantity() {
            warn!(
                "Quantity {} exceeds the protocol maximum of {} for {}",
                self.quantity,
                function.max_quantity(),
                function
            );
        }
        Ok(())
    }

    /// Whether the ramp schedule is used instead of the fixed rate
    pub fn is_ramp(&self) -> bool {
        self.ramp.iter().any(|&rate| rate > 0)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Request template shared by all workers
    pub fn read_request(&self) -> ModbusResult<ReadRequest> {
        let function = ModbusFunction::from_u8(self.function_code)?;
        let request = ReadRequest::new(self.unit_id, function, self.address, self.quantity)
            .with_timeout(self.timeout());
        request.validate()?;
        Ok(request)
    }

    pub fn rate_plan(&self) -> RatePlan {
        if self.is_ramp() {
            RatePlan::Ramp {
                rates: self.ramp.iter().copied().filter(|&rate| rate > 0).collect(),
                step_duration: Duration::from_millis(self.step_duration_ms),
            }
        } else {
            RatePlan::Fixed { rate: self.rate }
        }
    }

    /// How long results are collected
    ///
    /// A ramp runs for `steps * step_duration`; a fixed rate for `duration_ms`.
    pub fn test_duration(&self) -> Duration {
        self.rate_plan()
            .total_duration()
            .unwrap_or_else(|| Duration::from_millis(self.duration_ms))
    }
}
