//! Test outcomes and the DUT report
//!
//! Each coil test record is evaluated against the limits into a [`TestOutcome`].
//! The three outcomes plus a header and the elapsed time make up the
//! [`RunReport`], which renders to the operator text report and to one row of the
//! aggregate CSV.

use crate::config::TestConfig;
use crate::error::AppResult;
use crate::measurement::dipole::DipoleResult;
use crate::measurement::field::ReducedField;
use crate::measurement_types::{CoilMeasurement, CoilTest};
use crate::procedures::limits::{Metric, MetricCheck, TestLimits, Verdict};
use crate::procedures::sequencer::{CoilTestRecord, SequencerState};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// =============================================================================
// TestOutcome
// =============================================================================

/// One coil test with every metric checked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Which test
    pub test: CoilTest,
    /// Computed moment at full precision
    pub dipole: DipoleResult,
    /// Voltage/current of every energized coil
    pub measurements: Vec<CoilMeasurement>,
    /// Field the moment was computed from
    pub field: ReducedField,
    /// Voltage and current checks per coil, then the moment check
    pub checks: Vec<MetricCheck>,
    /// States visited by the sequencer
    pub states: Vec<SequencerState>,
}

impl TestOutcome {
    /// Check a record against the limits
    ///
    /// The moment is checked at `decimal_places`, the value printed in the report.
    pub fn evaluate(record: &CoilTestRecord, limits: &TestLimits, decimal_places: u32) -> Self {
        let mut checks = Vec::with_capacity(record.measurements.len() * 2 + 1);
        for m in &record.measurements {
            checks.push(limits.evaluate(Metric::Voltage(m.coil), m.voltage));
            checks.push(limits.evaluate(Metric::Current(m.coil), m.current));
        }
        checks.push(limits.evaluate(
            Metric::DipoleMoment(record.test),
            record.dipole.surfaced_moment(decimal_places),
        ));

        Self {
            test: record.test,
            dipole: record.dipole,
            measurements: record.measurements.clone(),
            field: record.field,
            checks,
            states: record.states.clone(),
        }
    }

    /// Number of failed checks
    pub fn fail_count(&self) -> usize {
        self.checks.iter().filter(|c| !c.verdict.passed()).count()
    }

    /// Pass iff every check passed
    pub fn verdict(&self) -> Verdict {
        if self.fail_count() == 0 {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

// =============================================================================
// RunReport
// =============================================================================

/// Report header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportHeader {
    /// Test name
    pub name: String,
    /// Test program version
    pub version: String,
    /// Copyright line
    pub copyright: String,
    /// DUT serial, e.g. "MI-1042"
    pub serial: String,
    /// When the report was produced
    pub timestamp: DateTime<Local>,
}

impl ReportHeader {
    /// Header stamped now
    pub fn new(config: &TestConfig, serial: impl Into<String>) -> Self {
        Self {
            name: config.application.name.clone(),
            version: config.application.version.clone(),
            copyright: config.application.copyright.clone(),
            serial: serial.into(),
            timestamp: Local::now(),
        }
    }

    fn timestamp_text(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Complete result of one DUT run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Identity of the run
    pub header: ReportHeader,
    /// A, B and AB outcomes
    pub outcomes: Vec<TestOutcome>,
    /// Wall-clock time of the three tests
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl RunReport {
    /// Evaluate every record of a DUT run
    pub fn new(
        header: ReportHeader,
        records: &[CoilTestRecord],
        limits: &TestLimits,
        decimal_places: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            header,
            outcomes: records
                .iter()
                .map(|r| TestOutcome::evaluate(r, limits, decimal_places))
                .collect(),
            elapsed,
        }
    }

    /// Failed checks across all tests
    pub fn fail_count(&self) -> usize {
        self.outcomes.iter().map(TestOutcome::fail_count).sum()
    }

    /// PASS iff no check failed
    pub fn overall(&self) -> Verdict {
        if self.fail_count() == 0 {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    fn overall_text(&self) -> &'static str {
        match self.overall() {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
        }
    }

    /// Aggregate CSV row
    ///
    /// `name, serial, version, timestamp`, then `value, min, max, verdict` per
    /// check (empty `max` for min-only limits), then the overall verdict.
    pub fn csv_record(&self) -> Vec<String> {
        let mut record = vec![
            self.header.name.clone(),
            self.header.serial.clone(),
            self.header.version.clone(),
            self.header.timestamp_text(),
        ];
        for check in self.outcomes.iter().flat_map(|o| &o.checks) {
            record.push(check.value.to_string());
            record.push(check.limit.min.to_string());
            record.push(check.limit.max.map(|m| m.to_string()).unwrap_or_default());
            record.push(check.verdict.to_string());
        }
        record.push(self.overall_text().to_string());
        record
    }

    /// Pretty JSON, as written to the run log
    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = &self.header;
        writeln!(f, "Test: {}", h.name)?;
        writeln!(f, "Version: {}", h.version)?;
        writeln!(f, "Copyright:{}", h.copyright)?;
        writeln!(f)?;
        writeln!(f, "Test Date/Time: {}", h.timestamp_text())?;
        writeln!(f)?;
        writeln!(f, "SN: {}", h.serial)?;

        for outcome in &self.outcomes {
            writeln!(f)?;
            writeln!(f, "Test #{} Coil {}", outcome.test.number(), outcome.test)?;
            for check in &outcome.checks {
                writeln!(f, "{}", check)?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Overall Result: {}", self.overall_text())?;
        writeln!(f, "Test Duration: {:.3} s", self.elapsed.as_secs_f64())
    }
}
