//! Pass/fail limits and metric evaluation.
//!
//! Bounds are inclusive: a value equal to `min` (or `max`) passes. A NaN never
//! passes. Evaluation never fails; an out-of-limit value is a [`Verdict::Fail`]
//! recorded in the report, not an error.

use crate::error::{AppResult, DipoleError};
use crate::measurement_types::{Coil, CoilTest};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Inside the limit
    Pass,
    /// Outside the limit
    Fail,
}

impl Verdict {
    /// True for [`Verdict::Pass`]
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "Pass"),
            Verdict::Fail => write!(f, "Fail"),
        }
    }
}

/// Inclusive bounds; `max` absent means min-only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    /// Lower bound
    pub min: f64,
    /// Upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Limit {
    /// Min-only limit
    pub fn at_least(min: f64) -> Self {
        Self { min, max: None }
    }

    /// Ranged limit
    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    /// Check a value against the bounds
    pub fn check(&self, value: f64) -> Verdict {
        let above_min = value >= self.min;
        let below_max = self.max.map_or(true, |max| value <= max);
        if above_min && below_max {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    fn validate(&self, name: &str) -> AppResult<()> {
        if !self.min.is_finite() {
            return Err(DipoleError::Configuration(format!(
                "limits.{}.min must be finite",
                name
            )));
        }
        if let Some(max) = self.max {
            if !max.is_finite() || max < self.min {
                return Err(DipoleError::Configuration(format!(
                    "limits.{}.max ({}) must be finite and not below min ({})",
                    name, max, self.min
                )));
            }
        }
        Ok(())
    }
}

/// Every limit of a DUT run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLimits {
    /// Supply voltage readback, both coils
    pub coil_voltage: Limit,
    /// Coil A current
    pub coil_a_current: Limit,
    /// Coil B current
    pub coil_b_current: Limit,
    /// Test A dipole moment
    pub dipole_a: Limit,
    /// Test B dipole moment
    pub dipole_b: Limit,
    /// Test AB dipole moment
    pub dipole_ab: Limit,
}

impl TestLimits {
    /// Check bounds are finite and ordered
    pub fn validate(&self) -> AppResult<()> {
        self.coil_voltage.validate("coil_voltage")?;
        self.coil_a_current.validate("coil_a_current")?;
        self.coil_b_current.validate("coil_b_current")?;
        self.dipole_a.validate("dipole_a")?;
        self.dipole_b.validate("dipole_b")?;
        self.dipole_ab.validate("dipole_ab")?;
        Ok(())
    }

    /// Limit applying to a metric
    pub fn limit_for(&self, metric: Metric) -> Limit {
        match metric {
            Metric::Voltage(_) => self.coil_voltage,
            Metric::Current(Coil::A) => self.coil_a_current,
            Metric::Current(Coil::B) => self.coil_b_current,
            Metric::DipoleMoment(CoilTest::A) => self.dipole_a,
            Metric::DipoleMoment(CoilTest::B) => self.dipole_b,
            Metric::DipoleMoment(CoilTest::AB) => self.dipole_ab,
        }
    }

    /// Evaluate one measured value
    pub fn evaluate(&self, metric: Metric, value: f64) -> MetricCheck {
        let limit = self.limit_for(metric);
        MetricCheck {
            metric,
            value,
            limit,
            verdict: limit.check(value),
        }
    }
}

/// A quantity checked against a limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Supply voltage readback of a coil
    Voltage(Coil),
    /// Averaged current of a coil
    Current(Coil),
    /// Surfaced target moment of a test
    DipoleMoment(CoilTest),
}

impl Metric {
    /// Label used in the text report
    pub fn label(&self) -> String {
        match self {
            Metric::Voltage(coil) => format!("Coil {} Voltage", coil),
            Metric::Current(coil) => format!("Coil {} Current", coil),
            Metric::DipoleMoment(CoilTest::AB) => "Coil A&B Dipole Moment".to_string(),
            Metric::DipoleMoment(test) => format!("Coil {} Dipole Moment Target", test),
        }
    }

    /// Unit used in the text report
    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Voltage(_) => "V",
            Metric::Current(_) => "A",
            Metric::DipoleMoment(_) => "Am2",
        }
    }
}

/// One evaluated metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricCheck {
    /// What was measured
    pub metric: Metric,
    /// Measured value
    pub value: f64,
    /// Limit it was checked against
    pub limit: Limit,
    /// Result of the check
    pub verdict: Verdict,
}

impl fmt::Display for MetricCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}\tLower Limit: {}",
            self.metric.label(),
            self.value,
            self.limit.min
        )?;
        if let Some(max) = self.limit.max {
            write!(f, "\tUpper Limit: {}", max)?;
        }
        write!(f, "\tUnit: {}\t{}", self.metric.unit(), self.verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> TestLimits {
        TestLimits {
            coil_voltage: Limit::between(60.0, 70.0),
            coil_a_current: Limit::between(0.060, 0.070),
            coil_b_current: Limit::between(0.050, 0.056),
            dipole_a: Limit::at_least(0.0020),
            dipole_b: Limit::at_least(0.0018),
            dipole_ab: Limit::at_least(0.0028),
        }
    }

    #[test]
    fn test_min_boundary_is_inclusive() {
        let limit = Limit::at_least(0.0024);
        assert_eq!(limit.check(0.0024), Verdict::Pass);
        let one_ulp_below = f64::from_bits(0.0024f64.to_bits() - 1);
        assert_eq!(limit.check(one_ulp_below), Verdict::Fail);
    }

    #[test]
    fn test_ranged_limit_is_inclusive_on_both_ends() {
        let limit = Limit::between(60.0, 70.0);
        assert_eq!(limit.check(60.0), Verdict::Pass);
        assert_eq!(limit.check(70.0), Verdict::Pass);
        assert_eq!(limit.check(70.000001), Verdict::Fail);
        assert_eq!(limit.check(59.9), Verdict::Fail);
    }

    #[test]
    fn test_nan_never_passes() {
        assert_eq!(Limit::at_least(0.0).check(f64::NAN), Verdict::Fail);
    }

    #[test]
    fn test_metric_limit_routing() {
        let limits = limits();
        assert_eq!(limits.limit_for(Metric::Current(Coil::B)), Limit::between(0.050, 0.056));
        assert_eq!(limits.limit_for(Metric::Voltage(Coil::B)), Limit::between(60.0, 70.0));
        assert_eq!(
            limits.limit_for(Metric::DipoleMoment(CoilTest::AB)),
            Limit::at_least(0.0028)
        );
    }

    #[test]
    fn test_evaluate_and_render() {
        let check = limits().evaluate(Metric::DipoleMoment(CoilTest::A), 0.0024);
        assert!(check.verdict.passed());
        assert_eq!(
            check.to_string(),
            "Coil A Dipole Moment Target: 0.0024\tLower Limit: 0.002\tUnit: Am2\tPass"
        );

        let check = limits().evaluate(Metric::Current(Coil::B), 0.066);
        assert_eq!(check.verdict, Verdict::Fail);
        assert!(check.to_string().contains("Upper Limit: 0.056"));
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let mut limits = limits();
        assert!(limits.validate().is_ok());
        limits.coil_voltage = Limit::between(70.0, 60.0);
        let err = limits.validate().unwrap_err();
        assert!(err.to_string().contains("coil_voltage"));
    }
}
