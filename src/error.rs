//! Custom error types for the dipole test.
//!
//! This module defines the primary error type, `DipoleError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! everything that can abort a DUT run, from configuration problems to instruments
//! that stop answering in the middle of a measurement.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically a missing file, a TOML syntax
//!   error or a key with the wrong type.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine but is
//!   logically wrong (e.g. `magnet_average_count = 2`).
//! - **`Connection`**: An instrument could not be opened.
//! - **`Protocol`**: An instrument answered `*IDN?` with an unexpected model.
//! - **`Instrument`**: Transport error or timeout while the sequencer was driving an
//!   instrument that was already connected.
//! - **`Measurement`**: Malformed or insufficient magnetometer or waveform samples.
//! - **`Arithmetic`**: Division by zero in the resistance/temperature computation.
//! - **`Io`**, **`Csv`**, **`Serialization`**: Artifact persistence failures.
//! - **`FeatureNotEnabled`**: Instruments were requested from a build without the
//!   matching transport feature (`instrument_visa`, `instrument_serial`).
//!
//! A measured value outside its limits is *not* an error. Limit failures are
//! recorded as `Verdict::Fail` in the report and never abort a run.
//!
//! Every variant is fatal to the DUT run. There is no retry anywhere in the crate.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DipoleError>;

/// Errors that abort a DUT test run.
#[derive(Error, Debug)]
pub enum DipoleError {
    /// Configuration file could not be read or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Instrument could not be opened.
    #[error("Could not connect to {instrument}: {source}")]
    Connection {
        /// Instrument role, e.g. "power supply A"
        instrument: String,
        /// Underlying transport error
        #[source]
        source: anyhow::Error,
    },

    /// Instrument identification did not match the configured model.
    #[error("Incorrect {instrument} model: expected '{expected}', instrument reports '{found}'")]
    Protocol {
        /// Instrument role
        instrument: String,
        /// Configured model substring
        expected: String,
        /// Raw identification string
        found: String,
    },

    /// Transport error or timeout during a measurement phase.
    #[error("Could not communicate with {instrument}: {source}")]
    Instrument {
        /// Instrument role
        instrument: String,
        /// Underlying transport error
        #[source]
        source: anyhow::Error,
    },

    /// Malformed or insufficient samples.
    #[error("Measurement error: {0}")]
    Measurement(String),

    /// Division by zero or another non-finite intermediate.
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    /// I/O error while writing artifacts.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Requested instrument transport was not compiled in.
    #[error("Feature not enabled: {0}")]
    FeatureNotEnabled(String),
}

impl DipoleError {
    /// Wrap a transport error raised while an instrument was in use.
    pub fn instrument(instrument: impl Into<String>, source: anyhow::Error) -> Self {
        DipoleError::Instrument {
            instrument: instrument.into(),
            source,
        }
    }

    /// Wrap a transport error raised while opening an instrument.
    pub fn connection(instrument: impl Into<String>, source: anyhow::Error) -> Self {
        DipoleError::Connection {
            instrument: instrument.into(),
            source,
        }
    }

    /// Short category name used in the run log.
    pub fn category(&self) -> &'static str {
        match self {
            DipoleError::Config(_)
            | DipoleError::Configuration(_)
            | DipoleError::FeatureNotEnabled(_) => "ConfigurationError",
            DipoleError::Connection { .. } => "ConnectionError",
            DipoleError::Protocol { .. } => "ProtocolError",
            DipoleError::Instrument { .. } => "InstrumentError",
            DipoleError::Measurement(_) => "MeasurementError",
            DipoleError::Arithmetic(_) => "ArithmeticError",
            DipoleError::Io(_) | DipoleError::Csv(_) | DipoleError::Serialization(_) => {
                "PersistenceError"
            }
        }
    }
}

impl From<figment::Error> for DipoleError {
    fn from(value: figment::Error) -> Self {
        DipoleError::Config(Box::new(value))
    }
}
