//! Coil test procedures
//!
//! # Key Concepts
//!
//! - **CoilStation**: the measurement source (instruments or fixed debug values)
//! - **CoilTestSequencer**: state machine running one test (A, B or AB)
//! - **TestLimits**: inclusive pass/fail bounds per metric
//! - **RunReport**: the three evaluated tests of one DUT
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ run::execute_dut_run                                          │
//! │   artifacts → connect → run_dut → shutdown → report → persist │
//! ├──────────────────────────────────────────────────────────────┤
//! │ sequencer::run_dut          A → B → AB, first error stops     │
//! │ sequencer::CoilTestSequencer PowerOn … Compute → Done/Aborted │
//! ├──────────────────────────────────────────────────────────────┤
//! │ station::CoilStation        InstrumentStation | DebugStation  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod limits;
pub mod result;
pub mod run;
pub mod sequencer;
pub mod station;

pub use limits::{Limit, Metric, MetricCheck, TestLimits, Verdict};
pub use result::{ReportHeader, RunReport, TestOutcome};
pub use run::{execute_dut_run, run_on_station, RunContext, RunSummary};
pub use sequencer::{
    run_dut, CoilTestRecord, CoilTestSequencer, DutRun, EnergizedOutputs, SequencerSettings,
    SequencerState,
};
pub use station::{
    open_instruments, CoilStation, CurrentAcquisition, DebugReadings, DebugStation,
    InstrumentStation, StationInstruments,
};
