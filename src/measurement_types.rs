//! Identifier and record types shared by the measurement, procedure and storage modules.
//!
//! Coils and tests are closed enums so every `match` on them is exhaustive. There is
//! no string-keyed branching anywhere past the configuration layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A physical coil in the DUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Coil {
    /// Coil A
    A,
    /// Coil B
    B,
}

impl Coil {
    /// Both coils, in the order they are energized.
    pub const ALL: [Coil; 2] = [Coil::A, Coil::B];
}

impl fmt::Display for Coil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coil::A => write!(f, "A"),
            Coil::B => write!(f, "B"),
        }
    }
}

/// One of the three logical tests of a DUT run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoilTest {
    /// Coil A energized alone
    A,
    /// Coil B energized alone
    B,
    /// Both coils energized together
    AB,
}

impl CoilTest {
    /// The fixed order tests run in.
    pub const SEQUENCE: [CoilTest; 3] = [CoilTest::A, CoilTest::B, CoilTest::AB];

    /// Coils energized during this test, in power-up order.
    pub fn coils(&self) -> &'static [Coil] {
        match self {
            CoilTest::A => &[Coil::A],
            CoilTest::B => &[Coil::B],
            CoilTest::AB => &[Coil::A, Coil::B],
        }
    }

    /// Coil whose measurements and baseline feed the dipole computation.
    pub fn reference_coil(&self) -> Coil {
        match self {
            CoilTest::A | CoilTest::AB => Coil::A,
            CoilTest::B => Coil::B,
        }
    }

    /// 1-based test number used in logs and reports.
    pub fn number(&self) -> usize {
        match self {
            CoilTest::A => 1,
            CoilTest::B => 2,
            CoilTest::AB => 3,
        }
    }
}

impl fmt::Display for CoilTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoilTest::A => write!(f, "A"),
            CoilTest::B => write!(f, "B"),
            CoilTest::AB => write!(f, "AB"),
        }
    }
}

/// Reference resistance and temperature of one coil from the assembly steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestBaseline {
    /// Reference resistance R0 in ohms
    pub r0: f64,
    /// Reference temperature T0 in °C
    pub t0: f64,
}

/// Baselines of both coils, fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baselines {
    /// Coil A baseline
    pub a: TestBaseline,
    /// Coil B baseline
    pub b: TestBaseline,
}

impl Baselines {
    /// Baseline of the given coil.
    pub fn for_coil(&self, coil: Coil) -> TestBaseline {
        match coil {
            Coil::A => self.a,
            Coil::B => self.b,
        }
    }
}

/// Averaged electrical readings of one energized coil.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoilMeasurement {
    /// Measured coil
    pub coil: Coil,
    /// Trailing-window average current in amperes
    pub current: f64,
    /// Supply voltage readback in volts
    pub voltage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_order_is_fixed() {
        assert_eq!(CoilTest::SEQUENCE, [CoilTest::A, CoilTest::B, CoilTest::AB]);
        let numbers: Vec<usize> = CoilTest::SEQUENCE.iter().map(|t| t.number()).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_combined_test_powers_both_coils_and_references_a() {
        assert_eq!(CoilTest::AB.coils(), &[Coil::A, Coil::B]);
        assert_eq!(CoilTest::AB.reference_coil(), Coil::A);
        assert_eq!(CoilTest::B.reference_coil(), Coil::B);
    }

    #[test]
    fn test_coil_deserialization_rejects_unknown() {
        let ok: Coil = serde_json::from_str("\"B\"").unwrap();
        assert_eq!(ok, Coil::B);
        assert!(serde_json::from_str::<Coil>("\"C\"").is_err());
    }
}
