//! Digitized current waveform and its trailing-window average.
//!
//! The DAQ answers `READ?` with one line of comma-separated current readings taken at
//! a fixed interval. The interval is not reported by the instrument; it is the third
//! comma field of the digitize command that configured the acquisition, e.g.
//! `CONF:DIG:CURR:DC 0.1,DEF,0.001,1000,(@121)` samples every 1 ms.

use super::round_to;
use crate::error::{AppResult, DipoleError};
use crate::measurement_types::Coil;
use serde::{Deserialize, Serialize};

/// Extract the sample interval in seconds from a digitize command.
pub fn parse_sample_interval(command: &str) -> AppResult<f64> {
    let field = command.split(',').nth(2).ok_or_else(|| {
        DipoleError::Configuration(format!(
            "digitize command '{}' has no sample interval field",
            command
        ))
    })?;

    let interval: f64 = field.trim().parse().map_err(|_| {
        DipoleError::Configuration(format!(
            "digitize command '{}' has a non-numeric sample interval '{}'",
            command,
            field.trim()
        ))
    })?;

    if !(interval.is_finite() && interval > 0.0) {
        return Err(DipoleError::Configuration(format!(
            "digitize command '{}' has a non-positive sample interval",
            command
        )));
    }

    Ok(interval)
}

/// One timestamped reading of a waveform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveformSample {
    /// Seconds since the first reading, rounded to milliseconds
    pub elapsed_s: f64,
    /// Raw current reading in amperes
    pub current: f64,
}

/// The readings of one digitize cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWaveform {
    /// Coil the waveform was taken on
    pub coil: Coil,
    /// Readings in acquisition order
    pub samples: Vec<WaveformSample>,
}

impl CurrentWaveform {
    /// Timestamp raw readings at `interval` seconds.
    pub fn from_readings(coil: Coil, readings: &[f64], interval: f64) -> Self {
        let samples = readings
            .iter()
            .enumerate()
            .map(|(i, &current)| WaveformSample {
                elapsed_s: round_to(i as f64 * interval, 3),
                current,
            })
            .collect();
        Self { coil, samples }
    }

    /// Parse a raw `READ?` response line.
    pub fn parse(coil: Coil, response: &str, interval: f64) -> AppResult<Self> {
        let readings = parse_readings(response)?;
        Ok(Self::from_readings(coil, &readings, interval))
    }

    /// Waveform with no samples, reported by stations without a digitizer.
    pub fn empty(coil: Coil) -> Self {
        Self {
            coil,
            samples: Vec::new(),
        }
    }

    /// Number of readings.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no reading was taken.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean of the last `window` readings, excluding the final one.
    ///
    /// The averaged slice is `readings[len - window .. len - 1]`, which holds
    /// `window - 1` values. `window` larger than the waveform or smaller than 2
    /// is an error.
    pub fn trailing_average(&self, window: usize) -> AppResult<f64> {
        let count = self.samples.len();
        if window > count {
            return Err(DipoleError::Measurement(format!(
                "current window of {} readings exceeds the {} digitized on coil {}",
                window, count, self.coil
            )));
        }
        if window < 2 {
            return Err(DipoleError::Measurement(format!(
                "current window of {} readings leaves nothing to average",
                window
            )));
        }

        let slice = &self.samples[count - window..count - 1];
        Ok(slice.iter().map(|s| s.current).sum::<f64>() / slice.len() as f64)
    }
}

/// Split a comma-separated response into readings.
pub fn parse_readings(response: &str) -> AppResult<Vec<f64>> {
    let response = response.trim();
    if response.is_empty() {
        return Ok(Vec::new());
    }

    response
        .split(',')
        .map(|field| {
            let field = field.trim();
            field
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    DipoleError::Measurement(format!("non-numeric digitized reading '{}'", field))
                })
        })
        .collect()
}

/// Turn one digitize response into a persisted waveform and its averaged current.
pub fn reduce_current(
    coil: Coil,
    command: &str,
    response: &str,
    window: usize,
) -> AppResult<(CurrentWaveform, f64)> {
    let interval = parse_sample_interval(command)?;
    let waveform = CurrentWaveform::parse(coil, response, interval)?;
    let average = waveform.trailing_average(window)?;
    Ok((waveform, average))
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMAND: &str = "CONF:DIG:CURR:DC 0.1,DEF,0.001,1000,(@121)";

    #[test]
    fn interval_is_third_comma_field() {
        assert_eq!(parse_sample_interval(COMMAND).unwrap(), 0.001);
        assert_eq!(parse_sample_interval("X 1, 2 , 0.25 ,4").unwrap(), 0.25);
    }

    #[test]
    fn bad_interval_is_configuration_error() {
        for command in ["CONF:DIG:CURR:DC 0.1,DEF", "a,b,fast,d", "a,b,0,d", "a,b,-1,d"] {
            assert!(
                matches!(parse_sample_interval(command), Err(DipoleError::Configuration(_))),
                "{} should be rejected",
                command
            );
        }
    }

    #[test]
    fn timestamps_round_to_milliseconds() {
        let waveform = CurrentWaveform::from_readings(Coil::A, &[1.0, 2.0, 3.0, 4.0], 0.0007);
        let times: Vec<f64> = waveform.samples.iter().map(|s| s.elapsed_s).collect();
        assert_eq!(times, vec![0.0, 0.001, 0.001, 0.002]);
    }

    #[test]
    fn window_excludes_final_reading() {
        let waveform = CurrentWaveform::from_readings(Coil::A, &[9.0, 1.0, 2.0, 3.0, 100.0], 0.001);
        // readings[5-4..4] = [1, 2, 3]
        assert_eq!(waveform.trailing_average(4).unwrap(), 2.0);
        // readings[0..4] = [9, 1, 2, 3]
        assert_eq!(waveform.trailing_average(5).unwrap(), 3.75);
        assert_eq!(waveform.trailing_average(2).unwrap(), 3.0);
    }

    #[test]
    fn window_larger_than_waveform_is_error() {
        let waveform = CurrentWaveform::from_readings(Coil::B, &[1.0, 2.0, 3.0], 0.001);
        let err = waveform.trailing_average(4).unwrap_err();
        assert!(matches!(err, DipoleError::Measurement(_)));
        assert!(err.to_string().contains("coil B"));
    }

    #[test]
    fn window_below_two_is_error() {
        let waveform = CurrentWaveform::from_readings(Coil::A, &[1.0, 2.0, 3.0], 0.001);
        assert!(waveform.trailing_average(1).is_err());
        assert!(waveform.trailing_average(0).is_err());
    }

    #[test]
    fn reduce_parses_response() {
        let (waveform, average) =
            reduce_current(Coil::A, COMMAND, "0.065, 0.066,0.067,0.5\r\n", 3).unwrap();
        assert_eq!(waveform.len(), 4);
        assert_eq!(waveform.samples[3].elapsed_s, 0.003);
        assert_eq!(average, (0.066 + 0.067) / 2.0);
    }

    #[test]
    fn non_numeric_reading_is_measurement_error() {
        let result = reduce_current(Coil::A, COMMAND, "0.065,ERR,0.067", 2);
        assert!(matches!(result, Err(DipoleError::Measurement(_))));
    }

    #[test]
    fn empty_response_fails_at_window() {
        let result = reduce_current(Coil::A, COMMAND, "", 2);
        assert!(matches!(result, Err(DipoleError::Measurement(_))));
    }
}
