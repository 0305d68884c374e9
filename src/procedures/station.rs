//! Coil stations: the measurement source the sequencer drives.
//!
//! [`CoilStation`] is the seam between the test sequence and the bench. Two
//! implementations exist:
//!
//! - [`InstrumentStation`]: two supplies, the DAQ and the magnetometer
//! - [`DebugStation`]: fixed literal readings, no instruments at all
//!
//! The sequencer runs the same state machine against either one.

use crate::config::{DaqConfig, TestConfig};
use crate::error::{AppResult, DipoleError};
use crate::hardware::capabilities::{Digitizer, MagnetometerTransport, PowerSupply};
use crate::hardware::fvm400::configure_relative_mode;
use crate::hardware::scpi::{verify_model, ConnectOutcome};
use crate::measurement::current::{reduce_current, CurrentWaveform};
use crate::measurement::field::{FieldReducer, ReducedField};
use crate::measurement_types::Coil;
use crate::storage::RunLog;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Role name of a coil's supply, used in errors and logs.
pub fn supply_name(coil: Coil) -> String {
    format!("power supply {}", coil)
}

/// Role name of the DAQ.
pub const DAQ_NAME: &str = "DAQ";

/// Role name of the magnetometer.
pub const MAGNETOMETER_NAME: &str = "magnetometer";

/// Digitized current of one coil.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentAcquisition {
    /// Full waveform, persisted verbatim
    pub waveform: CurrentWaveform,
    /// Trailing-window average in amperes
    pub average: f64,
}

/// Measurement source for one DUT run.
///
/// Every method is one sequencer transition. Errors are fatal to the run.
#[async_trait]
pub trait CoilStation: Send + Sync {
    /// Short description for logs
    fn describe(&self) -> &str;

    /// Energize a coil's supply
    async fn enable_output(&self, coil: Coil) -> AppResult<()>;

    /// De-energize a coil's supply
    async fn disable_output(&self, coil: Coil) -> AppResult<()>;

    /// Digitize and reduce a coil's current
    async fn acquire_current(&self, coil: Coil) -> AppResult<CurrentAcquisition>;

    /// Read back a coil's supply voltage
    async fn measure_voltage(&self, coil: Coil) -> AppResult<f64>;

    /// Sample the field produced by the energized coils
    async fn acquire_field(&self, energized: &[Coil]) -> AppResult<ReducedField>;

    /// De-energize every output before the station is dropped
    ///
    /// # Default Implementation
    /// Disables both coils, attempting the second even if the first fails.
    async fn shutdown(&self) -> AppResult<()> {
        let mut first_error = None;
        for coil in Coil::ALL {
            if let Err(e) = self.disable_output(coil).await {
                warn!(%coil, error = %e, "Failed to disable output during shutdown");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// =============================================================================
// InstrumentStation
// =============================================================================

/// Opened, not yet verified instruments of a station.
pub struct StationInstruments {
    /// Supply driving coil A
    pub supply_a: Box<dyn PowerSupply>,
    /// Supply driving coil B
    pub supply_b: Box<dyn PowerSupply>,
    /// Digitizing DAQ
    pub daq: Box<dyn Digitizer>,
    /// Fluxgate magnetometer link
    pub magnetometer: Box<dyn MagnetometerTransport>,
}

/// Station backed by real (or scripted) instruments.
pub struct InstrumentStation {
    instruments: StationInstruments,
    daq: DaqConfig,
    current_window: usize,
    field: FieldReducer,
}

impl InstrumentStation {
    /// Verify and configure opened instruments.
    ///
    /// Each instrument's `*IDN?` must contain its configured model. Supplies are
    /// programmed with their setpoints and left disabled, and the magnetometer is
    /// put in relative mode.
    pub async fn prepare(
        instruments: StationInstruments,
        config: &TestConfig,
        log: &RunLog,
    ) -> AppResult<Self> {
        let equipment = &config.equipment;

        for coil in Coil::ALL {
            let supply = match coil {
                Coil::A => instruments.supply_a.as_ref(),
                Coil::B => instruments.supply_b.as_ref(),
            };
            let settings = equipment.power_supply(coil);
            let name = supply_name(coil);

            let identity = supply
                .identify()
                .await
                .map_err(|e| DipoleError::connection(name.as_str(), e))?;
            check_identity(&name, &identity, &settings.model, log)?;

            supply
                .set_output_voltage(settings.voltage)
                .await
                .map_err(|e| DipoleError::instrument(name.as_str(), e))?;
            supply
                .set_current_limit(settings.current_limit)
                .await
                .map_err(|e| DipoleError::instrument(name.as_str(), e))?;
            supply
                .disable_output()
                .await
                .map_err(|e| DipoleError::instrument(name.as_str(), e))?;
            log.record(format!(
                "Power Supply {} Voltage set to {} V; Current set to {} A",
                coil, settings.voltage, settings.current_limit
            ));
        }

        let identity = instruments
            .daq
            .identify()
            .await
            .map_err(|e| DipoleError::connection(DAQ_NAME, e))?;
        check_identity(DAQ_NAME, &identity, &equipment.daq.model, log)?;

        configure_relative_mode(instruments.magnetometer.as_ref(), config.delays.magnetometer_write)
            .await
            .map_err(|e| DipoleError::connection(MAGNETOMETER_NAME, e))?;
        log.record("Connected to Magnetometer FVM-400, configured to Rel mode");

        Ok(Self {
            instruments,
            daq: equipment.daq.clone(),
            current_window: config.constants.current_average_count,
            field: FieldReducer::from_config(config),
        })
    }

    fn supply(&self, coil: Coil) -> &dyn PowerSupply {
        match coil {
            Coil::A => self.instruments.supply_a.as_ref(),
            Coil::B => self.instruments.supply_b.as_ref(),
        }
    }
}

fn check_identity(name: &str, identity: &str, model: &str, log: &RunLog) -> AppResult<()> {
    match verify_model(identity, model) {
        ConnectOutcome::Connected { identity } => {
            log.record(format!("Connected to {}: {}", name, identity));
            Ok(())
        }
        ConnectOutcome::ModelMismatch { expected, found } => {
            log.record(format!("Incorrect {} model: {}", name, found));
            Err(DipoleError::Protocol {
                instrument: name.to_string(),
                expected,
                found,
            })
        }
    }
}

#[async_trait]
impl CoilStation for InstrumentStation {
    fn describe(&self) -> &str {
        "instruments"
    }

    async fn enable_output(&self, coil: Coil) -> AppResult<()> {
        self.supply(coil)
            .enable_output()
            .await
            .map_err(|e| DipoleError::instrument(supply_name(coil), e))
    }

    async fn disable_output(&self, coil: Coil) -> AppResult<()> {
        self.supply(coil)
            .disable_output()
            .await
            .map_err(|e| DipoleError::instrument(supply_name(coil), e))
    }

    async fn acquire_current(&self, coil: Coil) -> AppResult<CurrentAcquisition> {
        let command = self.daq.digitize_command(coil);
        let daq = self.instruments.daq.as_ref();

        daq.configure_digitize(command)
            .await
            .map_err(|e| DipoleError::instrument(DAQ_NAME, e))?;
        debug!(%coil, command, "Digitize configured");

        let response = daq
            .read_raw()
            .await
            .map_err(|e| DipoleError::instrument(DAQ_NAME, e))?;
        let (waveform, average) = reduce_current(coil, command, &response, self.current_window)?;

        Ok(CurrentAcquisition { waveform, average })
    }

    async fn measure_voltage(&self, coil: Coil) -> AppResult<f64> {
        self.supply(coil)
            .measure_voltage()
            .await
            .map_err(|e| DipoleError::instrument(supply_name(coil), e))
    }

    async fn acquire_field(&self, _energized: &[Coil]) -> AppResult<ReducedField> {
        self.field
            .acquire(self.instruments.magnetometer.as_ref())
            .await
    }
}

/// Open every instrument named in the configuration.
#[cfg(all(feature = "instrument_visa", feature = "instrument_serial"))]
pub async fn open_instruments(config: &TestConfig) -> AppResult<StationInstruments> {
    use crate::hardware::fvm400::Fvm400Serial;
    use crate::hardware::scpi::ScpiDigitizer;
    use crate::hardware::visa::VisaTransport;

    let supply_a = open_supply(config, Coil::A).await?;
    let supply_b = open_supply(config, Coil::B).await?;

    let daq = &config.equipment.daq;
    let daq_transport = VisaTransport::open(&daq.resource, daq.timeout)
        .await
        .map_err(|e| DipoleError::connection(DAQ_NAME, e))?;
    tracing::info!(resource = %daq.resource, "DAQ opened");

    let mag = &config.equipment.magnetometer;
    let magnetometer = Fvm400Serial::open(&mag.port, mag.baud_rate, mag.timeout)
        .map_err(|e| DipoleError::connection(MAGNETOMETER_NAME, e))?;
    tracing::info!(port = %mag.port, baud = mag.baud_rate, "Magnetometer opened");

    Ok(StationInstruments {
        supply_a,
        supply_b,
        daq: Box::new(ScpiDigitizer::new(daq_transport)),
        magnetometer: Box::new(magnetometer),
    })
}

#[cfg(all(feature = "instrument_visa", feature = "instrument_serial"))]
async fn open_supply(config: &TestConfig, coil: Coil) -> AppResult<Box<dyn PowerSupply>> {
    use crate::hardware::scpi::ScpiPowerSupply;
    use crate::hardware::visa::VisaTransport;

    let settings = config.equipment.power_supply(coil);
    let transport = VisaTransport::open(&settings.resource, settings.timeout)
        .await
        .map_err(|e| DipoleError::connection(supply_name(coil), e))?;
    tracing::info!(%coil, resource = %settings.resource, "Power supply opened");
    Ok(Box::new(ScpiPowerSupply::new(transport)))
}

/// Open every instrument named in the configuration.
#[cfg(not(all(feature = "instrument_visa", feature = "instrument_serial")))]
pub async fn open_instruments(_config: &TestConfig) -> AppResult<StationInstruments> {
    Err(DipoleError::FeatureNotEnabled(
        "instrument_visa and instrument_serial (build with --features full, or set run.debug)"
            .to_string(),
    ))
}

// =============================================================================
// DebugStation
// =============================================================================

/// Fixed readings of one coil in debug mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugReadings {
    /// Averaged current in amperes
    pub current: f64,
    /// Supply voltage in volts
    pub voltage: f64,
    /// X field in tesla with only this coil energized
    pub field_tesla: f64,
}

/// Station returning literal values; no instrument is touched.
#[derive(Debug, Clone)]
pub struct DebugStation {
    coil_a: DebugReadings,
    coil_b: DebugReadings,
    combined_field_tesla: f64,
}

impl DebugStation {
    /// Literals of the reference rig.
    pub fn new() -> Self {
        Self {
            coil_a: DebugReadings {
                current: 0.066,
                voltage: 66.0,
                field_tesla: 4.8e-6,
            },
            coil_b: DebugReadings {
                current: 0.0530973451327434,
                voltage: 66.0,
                field_tesla: 4.0e-6,
            },
            combined_field_tesla: 6.0e-6,
        }
    }

    /// Override the readings of one coil
    pub fn with_readings(mut self, coil: Coil, readings: DebugReadings) -> Self {
        match coil {
            Coil::A => self.coil_a = readings,
            Coil::B => self.coil_b = readings,
        }
        self
    }

    fn readings(&self, coil: Coil) -> DebugReadings {
        match coil {
            Coil::A => self.coil_a,
            Coil::B => self.coil_b,
        }
    }
}

impl Default for DebugStation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoilStation for DebugStation {
    fn describe(&self) -> &str {
        "debug"
    }

    async fn enable_output(&self, coil: Coil) -> AppResult<()> {
        debug!(%coil, "Debug station: output enable skipped");
        Ok(())
    }

    async fn disable_output(&self, coil: Coil) -> AppResult<()> {
        debug!(%coil, "Debug station: output disable skipped");
        Ok(())
    }

    async fn acquire_current(&self, coil: Coil) -> AppResult<CurrentAcquisition> {
        Ok(CurrentAcquisition {
            waveform: CurrentWaveform::empty(coil),
            average: self.readings(coil).current,
        })
    }

    async fn measure_voltage(&self, coil: Coil) -> AppResult<f64> {
        Ok(self.readings(coil).voltage)
    }

    async fn acquire_field(&self, energized: &[Coil]) -> AppResult<ReducedField> {
        let field = match energized {
            [coil] => self.readings(*coil).field_tesla,
            [_, _] => self.combined_field_tesla,
            _ => {
                return Err(DipoleError::Measurement(format!(
                    "debug station has no field for {} energized coils",
                    energized.len()
                )))
            }
        };
        Ok(ReducedField::literal(field))
    }
}
