//! Voltage Loadtest command-line runner
//!
//! Runs one load test step against a Modbus TCP target and prints the report.
//! Flags override values from an optional YAML file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use voltage_loadtest::utils::parse_duration;
use voltage_loadtest::{run_load_test, FramingMode, LoadTestConfig, Report};

#[derive(Debug, Parser)]
#[command(name = "loadtest", version, about = "Modbus TCP load tester")]
struct Cli {
    /// YAML configuration file
    #[arg(long, env = "LOADTEST_CONFIG")]
    config: Option<PathBuf>,

    /// Target address (host:port)
    #[arg(long)]
    target: Option<String>,

    /// Number of concurrent connections
    #[arg(long)]
    workers: Option<usize>,

    /// Requests per second shared by all workers (0 = unlimited)
    #[arg(long)]
    rate: Option<u32>,

    /// Test duration (500ms, 10s, 2m)
    #[arg(long, value_parser = duration_arg)]
    duration: Option<Duration>,

    /// Ramp rates, e.g. 100,500,1000
    #[arg(long, value_delimiter = ',')]
    ramp: Option<Vec<u32>>,

    /// Duration of each ramp step
    #[arg(long, value_parser = duration_arg)]
    step_duration: Option<Duration>,

    /// Modbus unit id
    #[arg(long)]
    unit: Option<u8>,

    /// Function code (1-4)
    #[arg(long)]
    fc: Option<u8>,

    /// Starting address
    #[arg(long)]
    address: Option<u16>,

    /// Number of coils/registers per request
    #[arg(long)]
    quantity: Option<u16>,

    /// Socket timeout per write/read
    #[arg(long, value_parser = duration_arg)]
    timeout: Option<Duration>,

    /// Strict Modbus TCP framing
    #[arg(long)]
    strict: bool,

    /// Log every frame sent and received
    #[arg(long)]
    packet_logging: bool,

    /// Minimal output
    #[arg(long)]
    quiet: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn duration_arg(value: &str) -> Result<Duration, String> {
    parse_duration(value).map_err(|e| e.to_string())
}

fn as_millis(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

impl Cli {
    fn into_config(self) -> Result<LoadTestConfig> {
        let mut config = match &self.config {
            Some(path) => LoadTestConfig::from_yaml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => LoadTestConfig::default(),
        };

        if let Some(target) = self.target {
            config.target = target;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(rate) = self.rate {
            config.rate = rate;
        }
        if let Some(duration) = self.duration {
            config.duration_ms = as_millis(duration);
        }
        if let Some(ramp) = self.ramp {
            config.ramp = ramp;
        }
        if let Some(step) = self.step_duration {
            config.step_duration_ms = as_millis(step);
        }
        if let Some(unit) = self.unit {
            config.unit_id = unit;
        }
        if let Some(fc) = self.fc {
            config.function_code = fc;
        }
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(quantity) = self.quantity {
            config.quantity = quantity;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_ms = as_millis(timeout);
        }
        if self.strict {
            config.framing = FramingMode::Strict;
        }
        if self.packet_logging {
            config.packet_logging = true;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_header(config: &LoadTestConfig) {
    println!("🚀 {}", voltage_loadtest::info());
    println!("=======================================");
    println!("  Target:   {}", config.target);
    println!("  Workers:  {}", config.workers);
    if config.is_ramp() {
        println!(
            "  Ramp:     {:?} req/s, {}ms per step",
            config.ramp, config.step_duration_ms
        );
    } else if config.rate == 0 {
        println!("  Rate:     unlimited for {}ms", config.duration_ms);
    } else {
        println!("  Rate:     {} req/s for {}ms", config.rate, config.duration_ms);
    }
    println!(
        "  Request:  unit {} fc {} address {} quantity {} ({:?}, timeout {}ms)",
        config.unit_id,
        config.function_code,
        config.address,
        config.quantity,
        config.framing,
        config.timeout_ms
    );
}

fn print_report(report: &Report, quiet: bool) {
    if !quiet {
        println!("\n📋 Results");
        println!("===========================");
    }
    print!("{}", report);
    if !quiet {
        println!("\n✅ Success rate: {:.1}%", report.success_rate());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (quiet, json) = (cli.quiet, cli.json);
    init_tracing(quiet);

    let config = cli.into_config()?;
    if !quiet && !json {
        print_header(&config);
    }

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler available: never trigger
            std::future::pending::<()>().await;
        }
    };

    let report = run_load_test(&config, shutdown)
        .await
        .context("load test aborted")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serializing report")?
        );
    } else {
        print_report(&report, quiet);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("loadtest").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&[
            "--target",
            "10.0.0.5:1502",
            "--workers",
            "4",
            "--duration",
            "2m",
            "--timeout",
            "250",
            "--fc",
            "4",
            "--strict",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.target, "10.0.0.5:1502");
        assert_eq!(config.workers, 4);
        assert_eq!(config.duration_ms, 120_000);
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.function_code, 4);
        assert_eq!(config.framing, FramingMode::Strict);
    }

    #[test]
    fn test_ramp_list() {
        let config = parse(&["--ramp", "100,500,1000", "--step-duration", "1s 500ms"])
            .into_config()
            .unwrap();
        assert_eq!(config.ramp, vec![100, 500, 1000]);
        assert_eq!(config.step_duration_ms, 1500);
        assert!(config.is_ramp());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Cli::try_parse_from(["loadtest", "--ramp", "100,x"]).is_err());
        assert!(Cli::try_parse_from(["loadtest", "--duration", "soon"]).is_err());
        assert!(parse(&["--fc", "6"]).into_config().is_err());
    }
}
