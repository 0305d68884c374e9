//! CLI entry point for the dipole moment test station
//!
//! # Usage
//!
//! Test one DUT, prompting for the serial number and baselines:
//! ```bash
//! dipole-test run
//! ```
//!
//! Bench run without instruments:
//! ```bash
//! dipole-test run --debug --serial 1042
//! ```
//!
//! Validate a configuration file:
//! ```bash
//! dipole-test check-config --config config/dipole_test.toml
//! ```

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use dipole_test::config::{TestConfig, DEFAULT_CONFIG_PATH};
use dipole_test::error::{AppResult, DipoleError};
use dipole_test::logging;
use dipole_test::measurement_types::Baselines;
use dipole_test::procedures::{execute_dut_run, RunContext};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "dipole-test")]
#[command(about = "Coil dipole moment functional test", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test one DUT (repeated `run.loop_count` times)
    ///
    /// Instrument runs need a build with `--features full` (VISA and serial
    /// transports); the default build only supports `--debug`.
    Run {
        /// Station configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// DUT serial number, with or without the "MI-" prefix
        #[arg(long)]
        serial: Option<String>,

        /// Bypass instruments and use fixed readings (baselines are still prompted
        /// for when `run.user_entry` is set)
        #[arg(long)]
        debug: bool,

        /// Coil A reference resistance (ohm)
        #[arg(long)]
        r0_a: Option<f64>,

        /// Coil A reference temperature (°C)
        #[arg(long)]
        t0_a: Option<f64>,

        /// Coil B reference resistance (ohm)
        #[arg(long)]
        r0_b: Option<f64>,

        /// Coil B reference temperature (°C)
        #[arg(long)]
        t0_b: Option<f64>,
    },

    /// Load and validate a configuration file, then print it
    CheckConfig {
        /// Station configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            serial,
            debug,
            r0_a,
            t0_a,
            r0_b,
            t0_b,
        } => {
            let mut config = TestConfig::load_from(&config)?;
            if debug {
                config.run.debug = true;
            }
            logging::init_from_config(&config).map_err(|e| anyhow!(e))?;

            let overrides = BaselineOverrides {
                r0_a,
                t0_a,
                r0_b,
                t0_b,
            };
            run_loops(&config, serial, overrides).await
        }
        Commands::CheckConfig { config } => {
            let config = TestConfig::load_from(&config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!("Configuration OK");
            Ok(())
        }
    }
}

struct BaselineOverrides {
    r0_a: Option<f64>,
    t0_a: Option<f64>,
    r0_b: Option<f64>,
    t0_b: Option<f64>,
}

async fn run_loops(
    config: &TestConfig,
    serial: Option<String>,
    overrides: BaselineOverrides,
) -> Result<()> {
    let serial = match serial {
        Some(entry) => format_serial(&entry)?,
        None => format_serial(&prompt("Enter DUT serial number: MI-")?)?,
    };
    let baselines = resolve_baselines(config, overrides, prompt)?;

    for loop_number in 1..=config.run.loop_count {
        let context = RunContext {
            serial: serial.clone(),
            baselines,
            loop_number,
        };

        match execute_dut_run(config, &context).await {
            Ok(summary) => {
                println!();
                println!("{}", summary.report);
                info!(artifacts = summary.artifacts.len(), "Artifacts written");
            }
            Err(e) => {
                error!(category = e.category(), "{}", e);
                return Err(e.into());
            }
        }

        if loop_number < config.run.loop_count {
            tokio::time::sleep(config.run.loop_delay).await;
        }
    }

    Ok(())
}

/// Command-line values win; missing ones are asked for when `run.user_entry` is
/// set, debug mode included, and otherwise come from the configuration.
fn resolve_baselines(
    config: &TestConfig,
    overrides: BaselineOverrides,
    mut ask: impl FnMut(&str) -> AppResult<String>,
) -> AppResult<Baselines> {
    let mut baselines = config.baseline.baselines();
    let prompt_missing = config.run.user_entry;

    let fields = [
        ("T0_A", overrides.t0_a, &mut baselines.a.t0),
        ("R0_A", overrides.r0_a, &mut baselines.a.r0),
        ("T0_B", overrides.t0_b, &mut baselines.b.t0),
        ("R0_B", overrides.r0_b, &mut baselines.b.r0),
    ];
    for (name, given, slot) in fields {
        match given {
            Some(value) => *slot = value,
            None if prompt_missing => *slot = parse_entry(name, &ask(&format!("{}: ", name))?)?,
            None => {}
        }
    }

    for (name, r0) in [("R0_A", baselines.a.r0), ("R0_B", baselines.b.r0)] {
        if !(r0.is_finite() && r0 > 0.0) {
            return Err(DipoleError::Configuration(format!(
                "{} must be a positive resistance, got {}",
                name, r0
            )));
        }
    }
    Ok(baselines)
}

fn prompt(label: &str) -> AppResult<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// `1042` and `MI-1042` both become `MI-1042`
fn format_serial(entry: &str) -> AppResult<String> {
    let entry = entry.trim();
    let number = entry.strip_prefix("MI-").unwrap_or(entry);
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(DipoleError::Configuration(format!(
            "invalid serial number '{}'",
            entry
        )));
    }
    Ok(format!("MI-{}", number))
}

fn parse_entry(name: &str, entry: &str) -> AppResult<f64> {
    entry
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DipoleError::Configuration(format!("invalid {} entry '{}'", name, entry)))
}
