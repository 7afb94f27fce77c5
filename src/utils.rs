//! Utility functions and helpers
//!
//! Hex dumps for packet logging, duration formatting for reports and duration
//! parsing for command-line values.

use std::time::Duration;

use crate::error::{ModbusError, ModbusResult};

/// Parse a human-entered duration
///
/// Accepts anything `humantime` understands (`500ms`, `10s`, `2m`, `1h 30m`) or a
/// bare number of milliseconds.
pub fn parse_duration(input: &str) -> ModbusResult<Duration> {
    let input = input.trim();
    if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) {
        let millis: u64 = input
            .parse()
            .map_err(|_| ModbusError::configuration(format!("Invalid duration: '{}'", input)))?;
        return Ok(Duration::from_millis(millis));
    }

    humantime::parse_duration(input).map_err(|e| {
        ModbusError::configuration(format!("Invalid duration '{}': {}", input, e))
    })
}

/// Formatting and display utilities
pub mod format {
    use super::*;

    /// Format byte array as upper-case hex, space separated
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| hex::encode_upper([*b]))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Nanoseconds as fractional milliseconds
    pub fn ns_to_ms(ns: u64) -> f64 {
        ns as f64 / 1_000_000.0
    }

    /// Format duration in a human-readable way
    pub fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis < 1000 {
            format!("{}ms", millis)
        } else if millis < 60_000 {
            format!("{:.2}s", duration.as_secs_f64())
        } else {
            let mins = millis / 60_000;
            let secs = (millis % 60_000) as f64 / 1000.0;
            format!("{}m {:.1}s", mins, secs)
        }
    }
}
