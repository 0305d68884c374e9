//! Station configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/dipole_test.toml` by default)
//! 2. environment variables prefixed with `DIPOLE_TEST_` (nested keys split on `__`)
//!
//! The loaded [`TestConfig`] is immutable and is passed explicitly to every component
//! that needs it. Nothing in the crate reads configuration from global state.
//!
//! # Example
//! ```no_run
//! use dipole_test::config::TestConfig;
//!
//! let config = TestConfig::load()?;
//! println!("Station: {} {}", config.application.name, config.application.version);
//! # Ok::<(), dipole_test::error::DipoleError>(())
//! ```

use crate::error::{AppResult, DipoleError};
use crate::logging::OutputFormat;
use crate::measurement::current::parse_sample_interval;
use crate::measurement_types::{Baselines, Coil, TestBaseline};
use crate::procedures::limits::TestLimits;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/dipole_test.toml";

/// Top-level station configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    /// Application and report identity
    pub application: ApplicationConfig,
    /// Run-level switches
    pub run: RunConfig,
    /// Default coil baselines (used when operator entry is disabled)
    pub baseline: BaselineConfig,
    /// Pass/fail limits
    pub limits: TestLimits,
    /// Physical constants and sample counts
    pub constants: ConstantsConfig,
    /// Settle and polling delays
    pub delays: DelayConfig,
    /// Instrument definitions
    pub equipment: EquipmentConfig,
    /// Artifact locations
    pub output: OutputConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Test name printed in the report header
    pub name: String,
    /// Test program version
    pub version: String,
    /// Copyright line for the report header
    #[serde(default)]
    pub copyright: String,
    /// First line written to every run log
    #[serde(default)]
    pub log_title: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Console format (compact, pretty, json)
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Run-level switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Replace every instrument with fixed literal readings
    #[serde(default)]
    pub debug: bool,
    /// Apply temperature compensation to single-coil moments
    #[serde(default = "default_true")]
    pub compensation_enabled: bool,
    /// Prompt the operator for R0/T0 instead of using `[baseline]`
    #[serde(default)]
    pub user_entry: bool,
    /// Number of DUT runs per invocation
    #[serde(default = "default_loop_count")]
    pub loop_count: u32,
    /// Pause between loop iterations
    #[serde(default, with = "humantime_serde")]
    pub loop_delay: Duration,
}

/// Coil baselines from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// Coil A
    pub a: TestBaseline,
    /// Coil B
    pub b: TestBaseline,
}

impl BaselineConfig {
    /// Baselines of both coils.
    pub fn baselines(&self) -> Baselines {
        Baselines {
            a: self.a,
            b: self.b,
        }
    }
}

/// Physical constants and sample counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantsConfig {
    /// Temperature coefficient of the coil wire (1/°C)
    pub alpha: f64,
    /// Magnetometer-to-DUT distance L in metres
    pub magnetometer_distance_m: f64,
    /// Temperature the target moment is normalized to (°C)
    pub target_temperature_c: f64,
    /// Magnetometer polls per field measurement
    pub magnet_average_count: usize,
    /// Trailing window size K for the current average
    pub current_average_count: usize,
    /// Decimal places of surfaced moments
    #[serde(default = "default_decimal_places")]
    pub decimal_places: u32,
    /// Frames whose first field is this long or longer are dropped
    #[serde(default = "default_first_field_max_len")]
    pub first_field_max_len: usize,
}

/// Settle and polling delays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Wait after power-on before digitizing the coil current
    #[serde(with = "humantime_serde")]
    pub current_meas: Duration,
    /// Wait before reading back the supply voltage
    #[serde(with = "humantime_serde")]
    pub voltage_meas: Duration,
    /// Wait before each magnetometer poll
    #[serde(with = "humantime_serde")]
    pub magnetometer_poll: Duration,
    /// Wait after each magnetometer configuration write
    #[serde(with = "humantime_serde")]
    pub magnetometer_write: Duration,
}

/// Instrument definitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentConfig {
    /// Supply driving coil A
    pub power_supply_a: PowerSupplyConfig,
    /// Supply driving coil B
    pub power_supply_b: PowerSupplyConfig,
    /// Digitizing DAQ
    pub daq: DaqConfig,
    /// Fluxgate magnetometer
    pub magnetometer: MagnetometerConfig,
}

impl EquipmentConfig {
    /// Supply configuration for a coil.
    pub fn power_supply(&self, coil: Coil) -> &PowerSupplyConfig {
        match coil {
            Coil::A => &self.power_supply_a,
            Coil::B => &self.power_supply_b,
        }
    }
}

/// Programmable power supply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerSupplyConfig {
    /// VISA resource string
    pub resource: String,
    /// Substring expected in the `*IDN?` answer
    pub model: String,
    /// Command timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Output voltage setpoint in volts
    pub voltage: f64,
    /// Current limit in amperes
    pub current_limit: f64,
}

/// Digitizing DAQ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaqConfig {
    /// VISA resource string
    pub resource: String,
    /// Substring expected in the `*IDN?` answer
    pub model: String,
    /// Command timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Digitize command for coil A (third comma field is the sample interval)
    pub digitize_a: String,
    /// Digitize command for coil B
    pub digitize_b: String,
}

impl DaqConfig {
    /// Digitize command used while measuring a coil.
    pub fn digitize_command(&self, coil: Coil) -> &str {
        match coil {
            Coil::A => &self.digitize_a,
            Coil::B => &self.digitize_b,
        }
    }
}

/// Serial magnetometer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MagnetometerConfig {
    /// Serial port path (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout for one response line
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Bytes that precede the X,Y,Z payload
    #[serde(default = "default_frame_start")]
    pub frame_start: String,
    /// Bytes that follow the X,Y,Z payload
    #[serde(default = "default_frame_end")]
    pub frame_end: String,
}

/// Artifact locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory; each DUT gets a sub-directory named after its serial
    pub directory: PathBuf,
    /// Append-only CSV with one row per DUT run
    #[serde(default = "default_aggregate_csv")]
    pub aggregate_csv: PathBuf,
    /// Move the run's artifacts to `share_directory` when done
    #[serde(default)]
    pub relocate: bool,
    /// Network share for relocated artifacts
    #[serde(default)]
    pub share_directory: Option<PathBuf>,
}

/// Digits beyond this exceed f64 precision and overflow the rounding scale
pub const MAX_DECIMAL_PLACES: u32 = 15;

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_loop_count() -> u32 {
    1
}

fn default_decimal_places() -> u32 {
    4
}

fn default_first_field_max_len() -> usize {
    10
}

fn default_frame_start() -> String {
    "A\u{4}".to_string()
}

fn default_frame_end() -> String {
    "\rD".to_string()
}

fn default_aggregate_csv() -> PathBuf {
    PathBuf::from("test_data.csv")
}

impl TestConfig {
    /// Load configuration from the default path and environment variables
    ///
    /// Environment variables can override configuration with prefix `DIPOLE_TEST_`.
    /// Example: `DIPOLE_TEST_RUN__DEBUG=true`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load and validate configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DipoleError::Configuration(format!(
                "configuration file '{}' not found",
                path.display()
            )));
        }

        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("DIPOLE_TEST_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string (no environment overrides)
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let config: Self = Figment::from(Toml::string(toml)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return invalid(format!(
                "application.log_level '{}' must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.run.loop_count == 0 {
            return invalid("run.loop_count must be at least 1".to_string());
        }

        for (name, baseline) in [("baseline.a", &self.baseline.a), ("baseline.b", &self.baseline.b)] {
            if !(baseline.r0.is_finite() && baseline.r0 > 0.0) {
                return invalid(format!("{}.r0 must be a positive resistance", name));
            }
            if !baseline.t0.is_finite() {
                return invalid(format!("{}.t0 must be finite", name));
            }
        }

        self.limits.validate()?;

        let c = &self.constants;
        if !c.alpha.is_finite() || c.alpha == 0.0 {
            return invalid("constants.alpha must be a non-zero coefficient".to_string());
        }
        if !(c.magnetometer_distance_m.is_finite() && c.magnetometer_distance_m > 0.0) {
            return invalid("constants.magnetometer_distance_m must be positive".to_string());
        }
        if !c.target_temperature_c.is_finite() {
            return invalid("constants.target_temperature_c must be finite".to_string());
        }
        if c.magnet_average_count < 3 {
            return invalid(format!(
                "constants.magnet_average_count is {}, trimmed averaging needs at least 3",
                c.magnet_average_count
            ));
        }
        if c.current_average_count < 2 {
            return invalid(format!(
                "constants.current_average_count is {}, the trailing window needs at least 2",
                c.current_average_count
            ));
        }
        if c.decimal_places > MAX_DECIMAL_PLACES {
            return invalid(format!(
                "constants.decimal_places is {}, at most {} are meaningful for f64",
                c.decimal_places, MAX_DECIMAL_PLACES
            ));
        }
        if c.first_field_max_len == 0 {
            return invalid("constants.first_field_max_len must be positive".to_string());
        }

        for coil in Coil::ALL {
            let supply = self.equipment.power_supply(coil);
            if supply.model.trim().is_empty() {
                return invalid(format!("equipment.power_supply_{}.model is empty", lower(coil)));
            }
            if !(supply.voltage.is_finite() && supply.voltage > 0.0) {
                return invalid(format!(
                    "equipment.power_supply_{}.voltage must be positive",
                    lower(coil)
                ));
            }
            if !(supply.current_limit.is_finite() && supply.current_limit > 0.0) {
                return invalid(format!(
                    "equipment.power_supply_{}.current_limit must be positive",
                    lower(coil)
                ));
            }
            let command = self.equipment.daq.digitize_command(coil);
            parse_sample_interval(command).map_err(|e| {
                DipoleError::Configuration(format!("equipment.daq.digitize_{}: {}", lower(coil), e))
            })?;
        }

        if self.equipment.daq.model.trim().is_empty() {
            return invalid("equipment.daq.model is empty".to_string());
        }

        let mag = &self.equipment.magnetometer;
        if mag.frame_start.is_empty() || mag.frame_end.is_empty() {
            return invalid("equipment.magnetometer frame markers must not be empty".to_string());
        }
        if mag.baud_rate == 0 {
            return invalid("equipment.magnetometer.baud_rate must be positive".to_string());
        }

        if self.output.relocate && self.output.share_directory.is_none() {
            return invalid("output.relocate is set but output.share_directory is missing".to_string());
        }

        Ok(())
    }

    /// Sample interval in seconds encoded in the digitize command of a coil.
    pub fn sample_interval(&self, coil: Coil) -> AppResult<f64> {
        parse_sample_interval(self.equipment.daq.digitize_command(coil))
    }
}

fn invalid(message: String) -> AppResult<()> {
    Err(DipoleError::Configuration(message))
}

fn lower(coil: Coil) -> &'static str {
    match coil {
        Coil::A => "a",
        Coil::B => "b",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = include_str!("../config/dipole_test.toml");

    fn example() -> TestConfig {
        TestConfig::from_toml_str(EXAMPLE).unwrap()
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = example();
        assert_eq!(config.constants.magnet_average_count, 10);
        assert_eq!(config.delays.current_meas, Duration::from_millis(500));
        assert_eq!(config.equipment.magnetometer.frame_start, "A\u{4}");
        assert_eq!(config.equipment.magnetometer.frame_end, "\rD");
        assert!(config.run.compensation_enabled);
    }

    #[test]
    fn test_sample_interval_comes_from_coil_command() {
        let config = example();
        assert_eq!(config.sample_interval(Coil::A).unwrap(), 0.001);
        assert_eq!(config.sample_interval(Coil::B).unwrap(), 0.002);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = example();
        config.application.log_level = "verbose".to_string();
        assert!(matches!(config.validate(), Err(DipoleError::Configuration(_))));
    }

    #[test]
    fn test_decimal_places_above_fifteen_rejected() {
        let mut config = example();
        config.constants.decimal_places = 15;
        assert!(config.validate().is_ok());

        config.constants.decimal_places = 400;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("decimal_places"));
    }

    #[test]
    fn test_log_format_key() {
        let toml = include_str!("../config/dipole_test.toml")
            .replace("log_format = \"compact\"", "log_format = \"json\"");
        let config = TestConfig::from_toml_str(&toml).unwrap();
        assert_eq!(config.application.log_format, OutputFormat::Json);
    }

    #[test]
    fn test_magnet_average_count_below_three_rejected() {
        let mut config = example();
        config.constants.magnet_average_count = 2;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("magnet_average_count"));
    }

    #[test]
    fn test_zero_alpha_rejected() {
        let mut config = example();
        config.constants.alpha = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_r0_rejected() {
        let mut config = example();
        config.baseline.b.r0 = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("baseline.b.r0"));
    }

    #[test]
    fn test_digitize_command_without_interval_rejected() {
        let mut config = example();
        config.equipment.daq.digitize_b = "CONF:DIG:CURR:DC".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("digitize_b"));
    }

    #[test]
    fn test_relocate_requires_share() {
        let mut config = example();
        config.output.relocate = true;
        config.output.share_directory = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_section_is_figment_error() {
        let result = TestConfig::from_toml_str("[application]\nname = \"x\"\nversion = \"1\"\n");
        assert!(matches!(result, Err(DipoleError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let result = TestConfig::load_from("does/not/exist.toml");
        assert!(matches!(result, Err(DipoleError::Configuration(_))));
    }
}
