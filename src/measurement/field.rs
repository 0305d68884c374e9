//! Magnetometer frame parsing and field reduction.
//!
//! The fluxgate magnetometer answers each `?` poll with one frame. On the wire:
//!
//! ```text
//! A<EOT>A<EOT> <x>,<y>,<z><CR>D<EOT>
//! ```
//!
//! The start and end markers are raw bytes (`0x41 0x04` and `0x0D 0x44` by default).
//! The payload is taken between the last start marker that precedes the first end
//! marker and that end marker. Values are in nanotesla.
//!
//! Frames that do not yield exactly three finite numbers, or whose first field is too
//! long, are dropped without retry. Each axis is then reduced with a trimmed mean (one
//! max and one min removed), which needs at least three accepted frames.

use crate::config::TestConfig;
use crate::error::{AppResult, DipoleError};
use crate::hardware::capabilities::MagnetometerTransport;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Device units (nT) to tesla.
pub const NANOTESLA: f64 = 1e-9;

/// Poll command understood by the magnetometer.
pub const POLL_COMMAND: &[u8] = b"?";

/// One accepted magnetometer reading in device units (nT).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MagnetometerFrame {
    /// X axis
    pub x: f64,
    /// Y axis
    pub y: f64,
    /// Z axis
    pub z: f64,
}

/// Byte-level frame grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameGrammar {
    start: String,
    end: String,
    first_field_max_len: usize,
}

impl FrameGrammar {
    /// Create a grammar from explicit markers.
    pub fn new(start: impl Into<String>, end: impl Into<String>, first_field_max_len: usize) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            first_field_max_len,
        }
    }

    /// Grammar configured for the station magnetometer.
    pub fn from_config(config: &TestConfig) -> Self {
        Self::new(
            config.equipment.magnetometer.frame_start.clone(),
            config.equipment.magnetometer.frame_end.clone(),
            config.constants.first_field_max_len,
        )
    }

    /// Extract the payload between the markers, or `None` if either marker is missing.
    ///
    /// Anything before the first start marker is the tail of an earlier frame and is
    /// skipped. Repeated start markers collapse onto the last one before the end marker.
    pub fn payload<'a>(&self, response: &'a str) -> Option<&'a str> {
        let first_start = response.find(&self.start)?;
        let frame = &response[first_start..];
        let end = frame.find(&self.end)?;
        let head = &frame[..end];
        let start = head.rfind(&self.start)? + self.start.len();
        Some(head[start..].trim())
    }

    /// Parse one response into a frame, or `None` if the frame must be dropped.
    pub fn parse(&self, response: &str) -> Option<MagnetometerFrame> {
        let payload = self.payload(response)?;
        let fields: Vec<&str> = payload.split(',').map(str::trim).collect();
        if fields.len() != 3 || fields[0].len() >= self.first_field_max_len {
            return None;
        }

        let mut values = [0.0; 3];
        for (slot, field) in values.iter_mut().zip(&fields) {
            let value: f64 = field.parse().ok()?;
            if !value.is_finite() {
                return None;
            }
            *slot = value;
        }

        Some(MagnetometerFrame {
            x: values[0],
            y: values[1],
            z: values[2],
        })
    }
}

impl Default for FrameGrammar {
    fn default() -> Self {
        Self::new("A\u{4}", "\rD", 10)
    }
}

/// Mean after removing exactly one occurrence of the maximum and one of the minimum.
///
/// Fails with a measurement error for fewer than three samples.
pub fn trimmed_mean(samples: &[f64]) -> AppResult<f64> {
    if samples.len() < 3 {
        return Err(DipoleError::Measurement(format!(
            "trimmed average needs at least 3 samples, got {}",
            samples.len()
        )));
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let kept = &sorted[1..sorted.len() - 1];
    Ok(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// Field reduced from a set of accepted frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReducedField {
    /// Trimmed X mean in tesla; the only axis used for the dipole moment
    pub x_tesla: f64,
    /// Trimmed Y mean in tesla (diagnostics)
    pub y_tesla: f64,
    /// Trimmed Z mean in tesla (diagnostics)
    pub z_tesla: f64,
    /// Frames that passed the grammar
    pub frames_accepted: usize,
}

impl ReducedField {
    /// Reduce accepted frames axis by axis.
    pub fn from_frames(frames: &[MagnetometerFrame]) -> AppResult<Self> {
        if frames.is_empty() {
            return Err(DipoleError::Measurement(
                "no magnetometer frame was accepted".to_string(),
            ));
        }

        let xs: Vec<f64> = frames.iter().map(|f| f.x).collect();
        let ys: Vec<f64> = frames.iter().map(|f| f.y).collect();
        let zs: Vec<f64> = frames.iter().map(|f| f.z).collect();

        Ok(Self {
            x_tesla: trimmed_mean(&xs)? * NANOTESLA,
            y_tesla: trimmed_mean(&ys)? * NANOTESLA,
            z_tesla: trimmed_mean(&zs)? * NANOTESLA,
            frames_accepted: frames.len(),
        })
    }

    /// Fixed X-axis field, used when the station runs without instruments.
    pub fn literal(x_tesla: f64) -> Self {
        Self {
            x_tesla,
            y_tesla: 0.0,
            z_tesla: 0.0,
            frames_accepted: 1,
        }
    }
}

/// Polls the magnetometer and reduces the accepted frames.
#[derive(Debug, Clone)]
pub struct FieldReducer {
    grammar: FrameGrammar,
    samples: usize,
    poll_delay: Duration,
}

impl FieldReducer {
    /// Create a reducer polling `samples` times with `poll_delay` before each poll.
    pub fn new(grammar: FrameGrammar, samples: usize, poll_delay: Duration) -> Self {
        Self {
            grammar,
            samples,
            poll_delay,
        }
    }

    /// Reducer configured for the station.
    pub fn from_config(config: &TestConfig) -> Self {
        Self::new(
            FrameGrammar::from_config(config),
            config.constants.magnet_average_count,
            config.delays.magnetometer_poll,
        )
    }

    /// Frame grammar in use.
    pub fn grammar(&self) -> &FrameGrammar {
        &self.grammar
    }

    /// Poll the transport and reduce the accepted frames to a field.
    ///
    /// Transport failures are fatal. Unparsable frames are dropped.
    pub async fn acquire<T>(&self, transport: &T) -> AppResult<ReducedField>
    where
        T: MagnetometerTransport + ?Sized,
    {
        let mut frames = Vec::with_capacity(self.samples);

        for poll in 0..self.samples {
            tokio::time::sleep(self.poll_delay).await;
            transport
                .write(POLL_COMMAND)
                .await
                .map_err(|e| DipoleError::instrument("magnetometer", e))?;
            let response = transport
                .read_line()
                .await
                .map_err(|e| DipoleError::instrument("magnetometer", e))?;

            match self.grammar.parse(&response) {
                Some(frame) => {
                    debug!(poll, x = frame.x, y = frame.y, z = frame.z, "Magnetometer reading");
                    frames.push(frame);
                }
                None => {
                    debug!(poll, response = ?response, "Dropped magnetometer frame");
                }
            }
        }

        if frames.len() < self.samples {
            warn!(
                accepted = frames.len(),
                polled = self.samples,
                "Some magnetometer frames were dropped"
            );
        }

        ReducedField::from_frames(&frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockMagnetometer;

    fn frame(x: &str, y: &str, z: &str) -> String {
        format!("A\u{4}A\u{4} {},{},{}\rD\u{4}", x, y, z)
    }

    #[test]
    fn parses_raw_control_byte_frame() {
        let grammar = FrameGrammar::default();
        let parsed = grammar.parse(&frame("4800.5", "-108638", "-107863")).unwrap();
        assert_eq!(parsed.x, 4800.5);
        assert_eq!(parsed.y, -108638.0);
        assert_eq!(parsed.z, -107863.0);
    }

    #[test]
    fn takes_first_frame_when_two_are_concatenated() {
        let grammar = FrameGrammar::default();
        let response = format!("{}{}", frame("1", "2", "3"), frame("4", "5", "6"));
        assert_eq!(grammar.parse(&response).unwrap().x, 1.0);
    }

    #[test]
    fn skips_leading_partial_frame() {
        let grammar = FrameGrammar::default();
        let parsed = grammar.parse("3\rD\u{4}A\u{4}A\u{4} 4800,0,0\rD\u{4}").unwrap();
        assert_eq!(parsed.x, 4800.0);
        // only a start marker, then only a trailing end marker
        assert!(grammar.parse("A\u{4}").is_none());
        assert!(grammar.parse("3\rD\u{4}").is_none());
    }

    #[test]
    fn printed_escapes_are_not_markers() {
        let grammar = FrameGrammar::default();
        assert!(grammar.parse("A\\x04 1,2,3\\rD").is_none());
    }

    #[test]
    fn drops_frames_with_wrong_field_count() {
        let grammar = FrameGrammar::default();
        assert!(grammar.parse("A\u{4} 1,2\rD").is_none());
        assert!(grammar.parse("A\u{4} 1,2,3,4\rD").is_none());
    }

    #[test]
    fn drops_frames_with_long_first_field() {
        let grammar = FrameGrammar::default();
        // exactly at the threshold is rejected
        assert!(grammar.parse(&frame("1234567890", "0", "0")).is_none());
        assert!(grammar.parse(&frame("123456789", "0", "0")).is_some());
    }

    #[test]
    fn drops_frames_with_missing_markers_or_bad_numbers() {
        let grammar = FrameGrammar::default();
        assert!(grammar.parse("").is_none());
        assert!(grammar.parse(" 1,2,3\rD").is_none());
        assert!(grammar.parse("A\u{4} 1,2,3").is_none());
        assert!(grammar.parse(&frame("1", "x", "3")).is_none());
        assert!(grammar.parse(&frame("NaN", "2", "3")).is_none());
    }

    #[test]
    fn trimmed_mean_removes_one_max_and_one_min() {
        assert_eq!(trimmed_mean(&[1.0, 2.0, 100.0]).unwrap(), 2.0);
        assert_eq!(trimmed_mean(&[5.0, 1.0, 3.0, 9.0]).unwrap(), 4.0);
    }

    #[test]
    fn trimmed_mean_with_duplicate_extremes_removes_single_occurrence() {
        // one 1.0 and one 5.0 removed: mean of [1, 3, 5]
        assert_eq!(trimmed_mean(&[1.0, 1.0, 5.0, 5.0, 3.0]).unwrap(), 3.0);
        assert_eq!(trimmed_mean(&[7.0, 7.0, 7.0]).unwrap(), 7.0);
    }

    #[test]
    fn trimmed_mean_needs_three_samples() {
        assert!(matches!(trimmed_mean(&[]), Err(DipoleError::Measurement(_))));
        assert!(matches!(trimmed_mean(&[1.0]), Err(DipoleError::Measurement(_))));
        assert!(matches!(trimmed_mean(&[1.0, 2.0]), Err(DipoleError::Measurement(_))));
    }

    #[test]
    fn reduced_field_scales_x_to_tesla() {
        let frames = [
            MagnetometerFrame { x: 4000.0, y: 1.0, z: 2.0 },
            MagnetometerFrame { x: 4800.0, y: 1.0, z: 2.0 },
            MagnetometerFrame { x: 9000.0, y: 1.0, z: 2.0 },
        ];
        let field = ReducedField::from_frames(&frames).unwrap();
        assert_eq!(field.x_tesla, 4800.0 * NANOTESLA);
        assert_eq!(field.frames_accepted, 3);
    }

    #[test]
    fn empty_frame_set_is_an_error() {
        assert!(matches!(
            ReducedField::from_frames(&[]),
            Err(DipoleError::Measurement(_))
        ));
    }

    #[tokio::test]
    async fn acquire_polls_and_drops_garbage() {
        let magnetometer = MockMagnetometer::with_responses(vec![
            frame("4700", "0", "0"),
            "garbage".to_string(),
            frame("4800", "0", "0"),
            frame("12345678901", "0", "0"),
            frame("4900", "0", "0"),
            frame("4800", "0", "0"),
        ]);
        let reducer = FieldReducer::new(FrameGrammar::default(), 6, Duration::ZERO);

        let field = reducer.acquire(&magnetometer).await.unwrap();

        assert_eq!(field.frames_accepted, 4);
        assert_eq!(field.x_tesla, 4800.0 * NANOTESLA);
        assert_eq!(magnetometer.writes().len(), 6);
        assert!(magnetometer.writes().iter().all(|w| w == POLL_COMMAND));
    }

    #[tokio::test]
    async fn acquire_steady_field_accepts_every_poll() {
        let magnetometer = MockMagnetometer::steady(4800.0);
        let reducer = FieldReducer::new(FrameGrammar::default(), 5, Duration::ZERO);

        let field = reducer.acquire(&magnetometer).await.unwrap();

        assert_eq!(field.frames_accepted, 5);
        assert_eq!(field.x_tesla, 4800.0 * NANOTESLA);
    }

    #[tokio::test]
    async fn acquire_fails_with_too_few_accepted_frames() {
        let magnetometer = MockMagnetometer::with_responses(vec![
            frame("4700", "0", "0"),
            String::new(),
            frame("4800", "0", "0"),
        ]);
        let reducer = FieldReducer::new(FrameGrammar::default(), 3, Duration::ZERO);

        let err = reducer.acquire(&magnetometer).await.unwrap_err();
        assert!(matches!(err, DipoleError::Measurement(_)));
    }

    #[tokio::test]
    async fn acquire_transport_failure_is_fatal() {
        let magnetometer = MockMagnetometer::with_responses(vec![frame("1", "2", "3")]);
        magnetometer.fail_reads();
        let reducer = FieldReducer::new(FrameGrammar::default(), 3, Duration::ZERO);

        let err = reducer.acquire(&magnetometer).await.unwrap_err();
        assert!(matches!(err, DipoleError::Instrument { .. }));
    }
}
