//! Console tracing setup
//!
//! The console subscriber is chosen by `[application]`:
//! - `log_level` is the default filter, `RUST_LOG` overrides it
//! - `log_format` selects `compact` (production line), `pretty` (bench) or `json`
//!   (log shipping)
//!
//! The per-run text event log written next to the DUT artifacts is a separate,
//! flat file (see [`crate::storage::RunLog`]); every line written there is also
//! emitted through `tracing`.
//!
//! # Example
//! ```no_run
//! use dipole_test::{config::TestConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TestConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!(coil = "A", "Output enabled");
//! # Ok(())
//! # }
//! ```

use crate::config::TestConfig;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Console output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, colored
    Pretty,
    /// Single line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// Console logging options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
}

impl LoggingConfig {
    /// Options from the `[application]` section
    pub fn from_config(config: &TestConfig) -> Result<Self, String> {
        let level = config
            .application
            .log_level
            .parse::<Level>()
            .map_err(|_| format!("invalid log level '{}'", config.application.log_level))?;
        Ok(Self {
            level,
            format: config.application.log_format,
        })
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(self.level).into()))
    }
}

/// Subscriber for `config`, not yet installed
pub fn build_subscriber(config: LoggingConfig) -> impl Subscriber + Send + Sync {
    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer().pretty().boxed(),
        OutputFormat::Compact => fmt::layer().compact().with_target(false).boxed(),
        OutputFormat::Json => fmt::layer().json().with_ansi(false).boxed(),
    };
    tracing_subscriber::registry().with(layer.with_filter(config.filter()))
}

/// Install the console subscriber described by the station configuration
///
/// Returns `Ok(())` when a global subscriber is already installed.
pub fn init_from_config(config: &TestConfig) -> Result<(), String> {
    let logging_config = LoggingConfig::from_config(config)?;
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }
    build_subscriber(logging_config)
        .try_init()
        .map_err(|e| format!("Failed to initialize tracing: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station_config() -> TestConfig {
        TestConfig::from_toml_str(include_str!("../config/dipole_test.toml")).unwrap()
    }

    #[test]
    fn test_level_and_format_from_station_config() {
        let mut config = station_config();
        config.application.log_level = "debug".to_string();
        config.application.log_format = OutputFormat::Json;

        let logging = LoggingConfig::from_config(&config).unwrap();
        assert_eq!(logging.level, Level::DEBUG);
        assert_eq!(logging.format, OutputFormat::Json);
    }

    #[test]
    fn test_format_defaults_to_compact() {
        let config = station_config();
        assert_eq!(config.application.log_format, OutputFormat::Compact);
    }

    #[test]
    fn test_unknown_level_rejected() {
        let mut config = station_config();
        config.application.log_level = "verbose".to_string();
        assert!(LoggingConfig::from_config(&config).is_err());
    }

    #[test]
    fn test_every_format_builds_a_scoped_subscriber() {
        for format in [OutputFormat::Pretty, OutputFormat::Compact, OutputFormat::Json] {
            let subscriber = build_subscriber(LoggingConfig {
                level: Level::WARN,
                format,
            });
            tracing::subscriber::with_default(subscriber, || {
                tracing::warn!(?format, "scoped subscriber");
            });
        }
    }
}
