//! # Coil Dipole Moment Test
//!
//! Functional test of a two-coil magnetic torquer on the factory floor. Each coil is
//! energized in turn (A, B, then both together) while the station measures coil
//! current and voltage and samples the resulting magnetic field with a fluxgate
//! magnetometer. From those readings the crate computes the dipole moment,
//! optionally compensates it to a target coil temperature, checks every metric
//! against configured limits and writes the run's artifacts.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based station configuration (`config/dipole_test.toml`)
//!   with semantic validation.
//! - **`error`**: The `DipoleError` enum; every variant aborts a DUT run.
//! - **`hardware`**: Capability traits (`PowerSupply`, `Digitizer`,
//!   `MagnetometerTransport`), SCPI drivers, VISA/serial transports and mocks.
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`measurement`**: Pure reducers: magnetometer frames to a field, digitized
//!   current to a waveform and average, field and electrical readings to a moment.
//! - **`measurement_types`**: Coil identities, baselines and per-coil readings shared
//!   across modules.
//! - **`procedures`**: The coil test sequencer, the station abstraction, limits,
//!   the report and the DUT run driver.
//! - **`storage`**: Run log, waveform CSVs, text report, aggregate CSV and
//!   relocation.

pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod measurement;
pub mod measurement_types;
pub mod procedures;
pub mod storage;
