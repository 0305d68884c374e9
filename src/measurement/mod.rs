//! Measurement reduction and compensation.
//!
//! - [`field`]: magnetometer frame grammar and the trimmed-average field reducer
//! - [`current`]: digitized current waveform and its trailing-window average
//! - [`dipole`]: resistance → temperature → dipole moment compensation
//!
//! Everything here except [`field::FieldReducer::acquire`] is pure and synchronous.

pub mod current;
pub mod dipole;
pub mod field;

pub use current::{reduce_current, CurrentWaveform, WaveformSample};
pub use dipole::{CompensationConstants, DipoleResult};
pub use field::{FieldReducer, FrameGrammar, MagnetometerFrame, ReducedField};

/// Round half away from zero to `places` decimal places.
pub fn round_to(value: f64, places: u32) -> f64 {
    let scale = 10f64.powi(places as i32);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_places() {
        assert_eq!(round_to(0.002448319, 4), 0.0024);
        assert_eq!(round_to(1.23456, 3), 1.235);
        assert_eq!(round_to(0.0015, 0), 0.0);
        assert_eq!(round_to(-2.5, 0), -3.0);
    }
}
