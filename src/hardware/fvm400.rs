//! FVM-400 fluxgate magnetometer
//!
//! Protocol Overview:
//! - Format: short ASCII commands, no terminator
//! - Baud: configurable (9600 on the station), 8N1, no flow control
//! - `SC<n>` selects axis n (0 = X, 1 = Y, 2 = Z)
//! - `SM1` puts the selected axis in relative mode
//! - `?` requests one X,Y,Z frame (see [`crate::measurement::field`])
//!
//! The device does not acknowledge configuration commands; a fixed delay after
//! each write gives it time to apply them.

use crate::hardware::capabilities::MagnetometerTransport;
use anyhow::Result;
use std::time::Duration;
use tracing::debug;

#[cfg(feature = "instrument_serial")]
use anyhow::Context;
#[cfg(feature = "instrument_serial")]
use async_trait::async_trait;
#[cfg(feature = "instrument_serial")]
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_serial")]
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Axis selection and mode commands that put all three axes in relative mode.
pub const RELATIVE_MODE_SEQUENCE: [&str; 6] = ["SC0", "SM1", "SC1", "SM1", "SC2", "SM1"];

/// Put every axis in relative mode, waiting `write_delay` after each command.
pub async fn configure_relative_mode<T>(transport: &T, write_delay: Duration) -> Result<()>
where
    T: MagnetometerTransport + ?Sized,
{
    for command in RELATIVE_MODE_SEQUENCE {
        transport.write(command.as_bytes()).await?;
        debug!(command, "Magnetometer configuration write");
        tokio::time::sleep(write_delay).await;
    }
    Ok(())
}

/// Serial link to an FVM-400
#[cfg(feature = "instrument_serial")]
pub struct Fvm400Serial {
    /// Serial port protected by Mutex for exclusive access
    port: Mutex<BufReader<SerialStream>>,
    /// Read timeout for one response
    timeout: Duration,
}

#[cfg(feature = "instrument_serial")]
impl Fvm400Serial {
    /// Open the serial port
    ///
    /// # Arguments
    /// * `port_path` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Line speed
    /// * `timeout` - Read timeout for one response
    ///
    /// # Errors
    /// Returns error if serial port cannot be opened
    pub fn open(port_path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = tokio_serial::new(port_path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("Failed to open FVM-400 serial port {}", port_path))?;

        Ok(Self {
            port: Mutex::new(BufReader::new(port)),
            timeout,
        })
    }
}

#[cfg(feature = "instrument_serial")]
#[async_trait]
impl MagnetometerTransport for Fvm400Serial {
    async fn write(&self, command: &[u8]) -> Result<()> {
        let mut port = self.port.lock().await;
        port.get_mut()
            .write_all(command)
            .await
            .context("FVM-400 write failed")?;
        Ok(())
    }

    async fn read_line(&self) -> Result<String> {
        let mut port = self.port.lock().await;
        let mut buffer = Vec::new();

        // Bytes read before a timeout stay in the buffer and are returned as-is.
        match tokio::time::timeout(self.timeout, port.read_until(b'\n', &mut buffer)).await {
            Ok(result) => {
                result.context("FVM-400 read failed")?;
            }
            Err(_) => {
                debug!(bytes = buffer.len(), "FVM-400 read timed out");
            }
        }

        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockMagnetometer;

    #[tokio::test]
    async fn test_relative_mode_sequence() {
        let magnetometer = MockMagnetometer::with_responses(Vec::new());
        configure_relative_mode(&magnetometer, Duration::ZERO)
            .await
            .unwrap();

        let writes: Vec<String> = magnetometer
            .writes()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect();
        assert_eq!(writes, vec!["SC0", "SM1", "SC1", "SM1", "SC2", "SM1"]);
    }

    #[tokio::test]
    async fn test_relative_mode_stops_on_write_failure() {
        let magnetometer = MockMagnetometer::with_responses(Vec::new());
        magnetometer.fail_writes();
        assert!(configure_relative_mode(&magnetometer, Duration::ZERO)
            .await
            .is_err());
        assert!(magnetometer.writes().is_empty());
    }
}
