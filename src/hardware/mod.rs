//! Station hardware
//!
//! Capability traits plus the drivers that implement them.
//!
//! - [`capabilities`]: `PowerSupply`, `Digitizer`, `MagnetometerTransport`
//! - [`scpi`]: SCPI drivers for the supplies and the DAQ, generic over a transport
//! - [`visa`]: VISA transport (feature `instrument_visa`)
//! - [`fvm400`]: magnetometer configuration and its serial link (feature `instrument_serial`)
//! - [`mock`]: scripted instruments for tests and bench runs

pub mod capabilities;
pub mod fvm400;
pub mod mock;
pub mod scpi;

#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use capabilities::{Digitizer, MagnetometerTransport, PowerSupply};
pub use scpi::{verify_model, ConnectOutcome, ScpiDigitizer, ScpiPowerSupply, ScpiTransport};
