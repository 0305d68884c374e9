//! Resistance → temperature → dipole moment compensation.
//!
//! ```text
//! R        = V / I
//! T        = (R / R0 - 1) / alpha + T0
//! M        = (B / 2) * L^3 * 1e7
//! M_target = M / (1 + alpha * (T_target - T))     single coil, compensation on
//! M_target = M                                    otherwise, and always for AB
//! ```
//!
//! All values are kept at full precision. Rounding happens only when a moment is
//! surfaced to a report or a limit check.

use super::round_to;
use crate::config::TestConfig;
use crate::error::{AppResult, DipoleError};
use crate::measurement_types::{CoilTest, TestBaseline};
use serde::{Deserialize, Serialize};

/// Permeability factor 4π/μ0 folded into the moment formula.
const MOMENT_SCALE: f64 = 1e7;

/// Constants of the compensation formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompensationConstants {
    /// Temperature coefficient of the coil wire (1/°C)
    pub alpha: f64,
    /// Magnetometer-to-DUT distance in metres
    pub distance_m: f64,
    /// Temperature the target moment is normalized to (°C)
    pub target_temperature_c: f64,
    /// Apply temperature compensation to single-coil tests
    pub enabled: bool,
}

impl CompensationConstants {
    /// Constants from the station configuration.
    pub fn from_config(config: &TestConfig) -> Self {
        Self {
            alpha: config.constants.alpha,
            distance_m: config.constants.magnetometer_distance_m,
            target_temperature_c: config.constants.target_temperature_c,
            enabled: config.run.compensation_enabled,
        }
    }
}

/// Moment computed for one test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DipoleResult {
    /// Test the moment belongs to
    pub test: CoilTest,
    /// Uncompensated moment in A·m²
    pub raw_moment: f64,
    /// Moment normalized to the target temperature in A·m²
    pub target_moment: f64,
    /// Coil resistance in ohms
    pub resistance: f64,
    /// Coil temperature in °C
    pub temperature: f64,
}

impl DipoleResult {
    /// Target moment rounded for reports and limit checks.
    pub fn surfaced_moment(&self, decimal_places: u32) -> f64 {
        round_to(self.target_moment, decimal_places)
    }
}

/// `R = V / I`, failing on zero current.
pub fn resistance(voltage: f64, current: f64) -> AppResult<f64> {
    if current == 0.0 {
        return Err(DipoleError::Arithmetic(format!(
            "coil resistance undefined: current is zero at {} V",
            voltage
        )));
    }
    finite("resistance", voltage / current)
}

/// Coil temperature from its resistance and baseline.
pub fn coil_temperature(resistance: f64, baseline: TestBaseline, alpha: f64) -> AppResult<f64> {
    if baseline.r0 == 0.0 {
        return Err(DipoleError::Arithmetic("baseline resistance R0 is zero".to_string()));
    }
    if alpha == 0.0 {
        return Err(DipoleError::Arithmetic("temperature coefficient alpha is zero".to_string()));
    }
    finite("temperature", (resistance / baseline.r0 - 1.0) / alpha + baseline.t0)
}

/// Raw moment from the field measured at `distance_m`.
pub fn raw_moment(field_tesla: f64, distance_m: f64) -> f64 {
    (field_tesla / 2.0) * distance_m.powf(3.0) * MOMENT_SCALE
}

/// Run the full compensation for one test.
pub fn calculate(
    test: CoilTest,
    voltage: f64,
    current: f64,
    field_tesla: f64,
    baseline: TestBaseline,
    constants: &CompensationConstants,
) -> AppResult<DipoleResult> {
    let resistance = resistance(voltage, current)?;
    let temperature = coil_temperature(resistance, baseline, constants.alpha)?;
    let raw_moment = raw_moment(field_tesla, constants.distance_m);

    let target_moment = match test {
        CoilTest::A | CoilTest::B if constants.enabled => finite(
            "target moment",
            raw_moment / (1.0 + constants.alpha * (constants.target_temperature_c - temperature)),
        )?,
        CoilTest::A | CoilTest::B | CoilTest::AB => raw_moment,
    };

    Ok(DipoleResult {
        test,
        raw_moment,
        target_moment,
        resistance,
        temperature,
    })
}

fn finite(what: &str, value: f64) -> AppResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DipoleError::Arithmetic(format!("{} is not finite ({})", what, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constants(enabled: bool) -> CompensationConstants {
        CompensationConstants {
            alpha: 0.004,
            distance_m: 0.1,
            target_temperature_c: 20.0,
            enabled,
        }
    }

    const BASELINE: TestBaseline = TestBaseline { r0: 10.0, t0: 25.0 };

    #[test]
    fn temperature_matches_formula_exactly() {
        let result = calculate(CoilTest::A, 66.0, 0.066, 4.8e-6, BASELINE, &constants(true)).unwrap();

        let r = 66.0 / 0.066;
        assert_eq!(result.resistance, r);
        assert_eq!(result.temperature, (r / 10.0 - 1.0) / 0.004 + 25.0);
        assert!((result.temperature - 24_775.0).abs() < 1e-6);
    }

    #[test]
    fn raw_moment_for_reference_field() {
        let m = raw_moment(4.8e-6, 0.1);
        assert_eq!(m, (4.8e-6 / 2.0) * 0.1f64.powf(3.0) * 1e7);
        // 2.4e-6 T * 1e-3 m^3 * 1e7 = 0.024 Am2
        assert_eq!(round_to(m, 4), 0.024);
    }

    #[test]
    fn compensation_divides_by_temperature_factor() {
        let c = constants(true);
        let result = calculate(CoilTest::B, 66.0, 0.066, 4.8e-6, BASELINE, &c).unwrap();
        let expected =
            result.raw_moment / (1.0 + c.alpha * (c.target_temperature_c - result.temperature));
        assert_eq!(result.target_moment, expected);
        assert_ne!(result.target_moment, result.raw_moment);
    }

    #[test]
    fn disabled_compensation_passes_raw_moment_through() {
        for test in [CoilTest::A, CoilTest::B] {
            let result = calculate(test, 66.0, 0.066, 4.8e-6, BASELINE, &constants(false)).unwrap();
            assert_eq!(result.target_moment, result.raw_moment);
        }
    }

    #[test]
    fn combined_test_is_never_compensated() {
        for enabled in [true, false] {
            let result =
                calculate(CoilTest::AB, 66.0, 0.066, 6e-6, BASELINE, &constants(enabled)).unwrap();
            assert_eq!(result.target_moment, result.raw_moment);
        }
    }

    #[test]
    fn zero_current_is_arithmetic_error() {
        let result = calculate(CoilTest::A, 66.0, 0.0, 4.8e-6, BASELINE, &constants(true));
        assert!(matches!(result, Err(DipoleError::Arithmetic(_))));
        assert!(matches!(resistance(66.0, -0.0), Err(DipoleError::Arithmetic(_))));
    }

    #[test]
    fn zero_baseline_or_alpha_is_arithmetic_error() {
        let zero_r0 = TestBaseline { r0: 0.0, t0: 25.0 };
        assert!(matches!(
            coil_temperature(1000.0, zero_r0, 0.004),
            Err(DipoleError::Arithmetic(_))
        ));
        assert!(matches!(
            coil_temperature(1000.0, BASELINE, 0.0),
            Err(DipoleError::Arithmetic(_))
        ));
    }

    #[test]
    fn surfaced_moment_is_rounded() {
        let result = calculate(CoilTest::AB, 66.0, 0.066, 4.8e-6, BASELINE, &constants(true)).unwrap();
        // (4.8e-6 / 2) * 0.1^3 * 1e7 = 0.024, pass-through for AB
        assert_eq!(result.surfaced_moment(4), 0.024);
    }
}
