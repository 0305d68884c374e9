//! Coil test state machine.
//!
//! One [`CoilTestSequencer`] run per logical test:
//!
//! ```text
//! Idle → PowerOn(c) → SettleCurrent(c) → AcquireCurrent(c) → SettleVoltage(c)
//!      → AcquireVoltage(c) → AcquireField → PowerOff(c) → Compute → Done
//! ```
//!
//! For the combined test the per-coil block runs for A, then for B, before one
//! shared `AcquireField`, and both outputs are switched off in power-up order.
//!
//! Any error moves the machine to `Aborted`. Before the error is returned, every
//! output that was switched on is switched off again (last on, first off). This
//! is owned by [`EnergizedOutputs`], so no exit path can skip it.

use crate::config::TestConfig;
use crate::error::{AppResult, DipoleError};
use crate::measurement::current::CurrentWaveform;
use crate::measurement::dipole::{self, CompensationConstants, DipoleResult};
use crate::measurement::field::ReducedField;
use crate::measurement_types::{Baselines, Coil, CoilMeasurement, CoilTest};
use crate::procedures::station::CoilStation;
use crate::storage::RunLog;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// States of one coil test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencerState {
    /// Not started
    Idle,
    /// Enabling a coil's output
    PowerOn(Coil),
    /// Waiting for the coil current to settle
    SettleCurrent(Coil),
    /// Digitizing the coil current
    AcquireCurrent(Coil),
    /// Waiting before the voltage readback
    SettleVoltage(Coil),
    /// Reading back the supply voltage
    AcquireVoltage(Coil),
    /// Sampling the field of every energized coil
    AcquireField,
    /// Disabling a coil's output
    PowerOff(Coil),
    /// Computing the dipole moment
    Compute,
    /// Completed
    Done,
    /// Stopped by a fatal error; outputs were released
    Aborted,
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequencerState::Idle => write!(f, "Idle"),
            SequencerState::PowerOn(c) => write!(f, "PowerOn({})", c),
            SequencerState::SettleCurrent(c) => write!(f, "SettleCurrent({})", c),
            SequencerState::AcquireCurrent(c) => write!(f, "AcquireCurrent({})", c),
            SequencerState::SettleVoltage(c) => write!(f, "SettleVoltage({})", c),
            SequencerState::AcquireVoltage(c) => write!(f, "AcquireVoltage({})", c),
            SequencerState::AcquireField => write!(f, "AcquireField"),
            SequencerState::PowerOff(c) => write!(f, "PowerOff({})", c),
            SequencerState::Compute => write!(f, "Compute"),
            SequencerState::Done => write!(f, "Done"),
            SequencerState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Inputs fixed for a whole DUT run
#[derive(Debug, Clone)]
pub struct SequencerSettings {
    /// Wait between power-on and the current acquisition
    pub current_settle: Duration,
    /// Wait between the current acquisition and the voltage readback
    pub voltage_settle: Duration,
    /// R0/T0 of both coils
    pub baselines: Baselines,
    /// Compensation formula constants
    pub constants: CompensationConstants,
}

impl SequencerSettings {
    /// Settings from the configuration and the run's baselines
    pub fn from_config(config: &TestConfig, baselines: Baselines) -> Self {
        Self {
            current_settle: config.delays.current_meas,
            voltage_settle: config.delays.voltage_meas,
            baselines,
            constants: CompensationConstants::from_config(config),
        }
    }
}

/// Everything measured and computed in one coil test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoilTestRecord {
    /// Which test
    pub test: CoilTest,
    /// Averaged current and voltage of each energized coil, in power-up order
    pub measurements: Vec<CoilMeasurement>,
    /// Digitized current of each energized coil
    pub waveforms: Vec<CurrentWaveform>,
    /// Field with every coil of the test energized
    pub field: ReducedField,
    /// Computed moment
    pub dipole: DipoleResult,
    /// Visited states, `Idle` through `Done`
    pub states: Vec<SequencerState>,
}

// =============================================================================
// EnergizedOutputs
// =============================================================================

/// Tracks which outputs are on so they can be switched off on any exit path.
///
/// A coil is tracked before its enable command is sent, so a failed enable is
/// still followed by a disable attempt.
pub struct EnergizedOutputs<'a, S: CoilStation + ?Sized> {
    station: &'a S,
    energized: Vec<Coil>,
}

impl<'a, S: CoilStation + ?Sized> EnergizedOutputs<'a, S> {
    /// Start with every output off
    pub fn new(station: &'a S) -> Self {
        Self {
            station,
            energized: Vec::new(),
        }
    }

    /// Switch a coil on
    pub async fn enable(&mut self, coil: Coil, log: &RunLog) -> AppResult<()> {
        self.energized.push(coil);
        self.station.enable_output(coil).await?;
        info!(%coil, "Output enabled");
        log.record(format!("Output {} enabled", coil));
        Ok(())
    }

    /// Switch a coil off
    pub async fn disable(&mut self, coil: Coil, log: &RunLog) -> AppResult<()> {
        self.station.disable_output(coil).await?;
        self.energized.retain(|c| *c != coil);
        info!(%coil, "Output disabled");
        log.record(format!("Output {} disabled", coil));
        Ok(())
    }

    /// Coils currently tracked as on, in power-up order
    pub fn energized(&self) -> &[Coil] {
        &self.energized
    }

    /// Switch every tracked coil off, last on first
    ///
    /// Keeps going when a disable fails; a coil that could not be switched off
    /// stays tracked.
    pub async fn release_all(&mut self, log: &RunLog) {
        let mut still_on = Vec::new();
        while let Some(coil) = self.energized.pop() {
            match self.station.disable_output(coil).await {
                Ok(()) => {
                    warn!(%coil, "Output disabled after abort");
                    log.record(format!("Output {} disabled after abort", coil));
                }
                Err(e) => {
                    error!(%coil, error = %e, "Could not disable output after abort");
                    log.record(format!("Output {} could not be disabled: {}", coil, e));
                    still_on.push(coil);
                }
            }
        }
        still_on.reverse();
        self.energized = still_on;
    }
}

impl<S: CoilStation + ?Sized> Drop for EnergizedOutputs<'_, S> {
    fn drop(&mut self) {
        if !self.energized.is_empty() {
            error!(
                coils = ?self.energized,
                "Outputs may still be energized; switch them off at the supply"
            );
        }
    }
}

// =============================================================================
// CoilTestSequencer
// =============================================================================

/// Runs one coil test against a station
pub struct CoilTestSequencer<'a, S: CoilStation + ?Sized> {
    station: &'a S,
    settings: &'a SequencerSettings,
    log: &'a RunLog,
    state: SequencerState,
    visited: Vec<SequencerState>,
}

struct Acquired {
    measurements: Vec<CoilMeasurement>,
    waveforms: Vec<CurrentWaveform>,
    field: ReducedField,
}

impl<'a, S: CoilStation + ?Sized> CoilTestSequencer<'a, S> {
    /// Create an idle sequencer
    pub fn new(station: &'a S, settings: &'a SequencerSettings, log: &'a RunLog) -> Self {
        Self {
            station,
            settings,
            log,
            state: SequencerState::Idle,
            visited: vec![SequencerState::Idle],
        }
    }

    /// Current state
    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// States visited so far
    pub fn visited(&self) -> &[SequencerState] {
        &self.visited
    }

    fn transition(&mut self, test: CoilTest, next: SequencerState) {
        debug!(%test, from = %self.state, to = %next, "Sequencer transition");
        self.state = next;
        self.visited.push(next);
    }

    /// Run one test to `Done` or `Aborted`
    pub async fn run(&mut self, test: CoilTest) -> AppResult<CoilTestRecord> {
        if self.state != SequencerState::Idle {
            return Err(DipoleError::Configuration(format!(
                "sequencer for test {} started in state {}",
                test, self.state
            )));
        }

        let mut outputs = EnergizedOutputs::new(self.station);
        let result = self.execute(test, &mut outputs).await;

        match result {
            Ok(record) => Ok(record),
            Err(e) => {
                self.transition(test, SequencerState::Aborted);
                error!(%test, error = %e, "Coil test aborted");
                self.log
                    .record(format!("Test {} aborted: {}: {}", test, e.category(), e));
                outputs.release_all(self.log).await;
                Err(e)
            }
        }
    }

    async fn execute(
        &mut self,
        test: CoilTest,
        outputs: &mut EnergizedOutputs<'a, S>,
    ) -> AppResult<CoilTestRecord> {
        let acquired = self.acquire(test, outputs).await?;

        for &coil in test.coils() {
            self.transition(test, SequencerState::PowerOff(coil));
            outputs.disable(coil, self.log).await?;
        }

        self.transition(test, SequencerState::Compute);
        let dipole = self.compute(test, &acquired.measurements, &acquired.field)?;

        self.transition(test, SequencerState::Done);
        Ok(CoilTestRecord {
            test,
            measurements: acquired.measurements,
            waveforms: acquired.waveforms,
            field: acquired.field,
            dipole,
            states: self.visited.clone(),
        })
    }

    async fn acquire(
        &mut self,
        test: CoilTest,
        outputs: &mut EnergizedOutputs<'a, S>,
    ) -> AppResult<Acquired> {
        let mut measurements = Vec::with_capacity(test.coils().len());
        let mut waveforms = Vec::with_capacity(test.coils().len());

        for &coil in test.coils() {
            self.transition(test, SequencerState::PowerOn(coil));
            outputs.enable(coil, self.log).await?;

            self.transition(test, SequencerState::SettleCurrent(coil));
            tokio::time::sleep(self.settings.current_settle).await;

            self.transition(test, SequencerState::AcquireCurrent(coil));
            let current = self.station.acquire_current(coil).await?;
            info!(%coil, value = current.average, "Coil current");
            self.log
                .record(format!("Coil_{} current: {}", coil, current.average));

            self.transition(test, SequencerState::SettleVoltage(coil));
            tokio::time::sleep(self.settings.voltage_settle).await;

            self.transition(test, SequencerState::AcquireVoltage(coil));
            let voltage = self.station.measure_voltage(coil).await?;
            info!(%coil, value = voltage, "Coil voltage");
            self.log.record(format!("Coil_{} voltage: {}", coil, voltage));

            measurements.push(CoilMeasurement {
                coil,
                current: current.average,
                voltage,
            });
            waveforms.push(current.waveform);
        }

        self.transition(test, SequencerState::AcquireField);
        let field = self.station.acquire_field(test.coils()).await?;
        info!(%test, value = field.x_tesla, frames = field.frames_accepted, "Magnetic field");
        self.log.record(format!(
            "Magnetic field X: {} T (Y: {} T, Z: {} T, {} frames)",
            field.x_tesla, field.y_tesla, field.z_tesla, field.frames_accepted
        ));

        Ok(Acquired {
            measurements,
            waveforms,
            field,
        })
    }

    fn compute(
        &self,
        test: CoilTest,
        measurements: &[CoilMeasurement],
        field: &ReducedField,
    ) -> AppResult<DipoleResult> {
        let reference = test.reference_coil();
        let measurement = measurements
            .iter()
            .find(|m| m.coil == reference)
            .ok_or_else(|| {
                DipoleError::Measurement(format!("test {} has no coil {} reading", test, reference))
            })?;
        let baseline = self.settings.baselines.for_coil(reference);

        let result = dipole::calculate(
            test,
            measurement.voltage,
            measurement.current,
            field.x_tesla,
            baseline,
            &self.settings.constants,
        )?;

        info!(
            %test,
            resistance = result.resistance,
            temperature = result.temperature,
            moment = result.raw_moment,
            target = result.target_moment,
            "Dipole moment"
        );
        self.log.record(format!(
            "R: {}; R0: {}; T: {}; T0: {}; Alpha: {}",
            result.resistance, baseline.r0, result.temperature, baseline.t0, self.settings.constants.alpha
        ));
        self.log.record(format!(
            "Moment: {}; Moment Target: {}",
            result.raw_moment, result.target_moment
        ));

        Ok(result)
    }
}

// =============================================================================
// DUT run
// =============================================================================

/// Records of the three tests of one DUT
#[derive(Debug, Clone)]
pub struct DutRun {
    /// A, B and AB records, in that order
    pub records: Vec<CoilTestRecord>,
    /// Wall-clock time of the three tests
    pub elapsed: Duration,
}

/// Run tests A, B and AB in order.
///
/// The first fatal error stops the sequence; later tests are not attempted.
/// Out-of-limit values are not errors and never stop it.
pub async fn run_dut<S>(station: &S, settings: &SequencerSettings, log: &RunLog) -> AppResult<DutRun>
where
    S: CoilStation + ?Sized,
{
    let started = Instant::now();
    let mut records = Vec::with_capacity(CoilTest::SEQUENCE.len());

    for test in CoilTest::SEQUENCE {
        info!(%test, number = test.number(), station = station.describe(), "Dipole test");
        log.record(format!("Test #{}", test.number()));

        let mut sequencer = CoilTestSequencer::new(station, settings, log);
        records.push(sequencer.run(test).await?);
    }

    Ok(DutRun {
        records,
        elapsed: started.elapsed(),
    })
}
