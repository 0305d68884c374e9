//! Instrument capability traits
//!
//! The station drives three kinds of instrument, each behind a small trait:
//!
//! - [`PowerSupply`]: programmable DC supply, one per coil
//! - [`Digitizer`]: DAQ that digitizes the coil current
//! - [`MagnetometerTransport`]: byte-level link to the fluxgate magnetometer
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Takes `&self`; drivers keep their port or session behind a Mutex
//! - Uses anyhow::Result for errors
//!
//! Callers in `procedures` map these errors into [`crate::error::DipoleError`]
//! together with the instrument's role, so drivers never need to know which coil
//! they are wired to.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn energize<P: PowerSupply + ?Sized>(supply: &P) -> Result<f64> {
//!     supply.enable_output().await?;
//!     let volts = supply.measure_voltage().await?;
//!     supply.disable_output().await?;
//!     Ok(volts)
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

/// Capability: Programmable DC Supply
///
/// # Contract
/// - Setpoints take effect immediately but do not enable the output
/// - `disable_output` must be safe to call when the output is already off
/// - Every call is bounded by the driver's command timeout
#[async_trait]
pub trait PowerSupply: Send + Sync {
    /// Identification string (`*IDN?`)
    async fn identify(&self) -> Result<String>;

    /// Set the output voltage in volts
    async fn set_output_voltage(&self, volts: f64) -> Result<()>;

    /// Set the current limit in amperes
    async fn set_current_limit(&self, amps: f64) -> Result<()>;

    /// Energize the output
    async fn enable_output(&self) -> Result<()>;

    /// De-energize the output
    async fn disable_output(&self) -> Result<()>;

    /// Read back the output voltage in volts
    async fn measure_voltage(&self) -> Result<f64>;
}

/// Capability: Waveform Digitizer
///
/// # Contract
/// - `configure_digitize` sends the command verbatim; it encodes range, interval,
///   sample count and channel
/// - `read_raw` triggers one digitize cycle and returns the comma-separated line
#[async_trait]
pub trait Digitizer: Send + Sync {
    /// Identification string (`*IDN?`)
    async fn identify(&self) -> Result<String>;

    /// Configure the next digitize cycle
    async fn configure_digitize(&self, channel_spec: &str) -> Result<()>;

    /// Run one digitize cycle and return the raw response line
    async fn read_raw(&self) -> Result<String>;

    /// Run one digitize cycle and parse the readings
    ///
    /// # Default Implementation
    /// Splits [`Digitizer::read_raw`] on commas.
    async fn read_digitized_array(&self) -> Result<Vec<f64>> {
        let raw = self.read_raw().await?;
        Ok(crate::measurement::current::parse_readings(&raw)?)
    }
}

/// Capability: Magnetometer Link
///
/// # Contract
/// - `write` sends bytes without a terminator
/// - `read_line` returns whatever arrived before a newline or the read timeout;
///   an empty string means the instrument did not answer in time
/// - Transport failures (port gone, I/O error) are errors
#[async_trait]
pub trait MagnetometerTransport: Send + Sync {
    /// Send raw bytes
    async fn write(&self, command: &[u8]) -> Result<()>;

    /// Read one response
    async fn read_line(&self) -> Result<String>;
}
