//! SCPI power supply and digitizer drivers.
//!
//! Both drivers are generic over [`ScpiTransport`], so the same command set runs
//! over VISA in production and over a scripted transport in tests.
//!
//! | Operation | Command |
//! |---|---|
//! | identify | `*IDN?` |
//! | set voltage | `:SOUR:VOLT <v>` |
//! | set current limit | `:SOUR:CURR <i>` |
//! | output on / off | `:OUTP ON` / `:OUTP OFF` |
//! | measure voltage | `:MEAS:VOLT?` |
//! | configure digitize | configured command, verbatim |
//! | digitize | `READ?` |

use crate::hardware::capabilities::{Digitizer, PowerSupply};
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Trait for SCPI communication transports.
///
/// Abstracts the underlying communication mechanism (VISA, scripted mock)
/// to enable protocol-agnostic SCPI operations.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a query command and return the response.
    async fn query(&self, command: &str) -> Result<String>;

    /// Send a command without expecting a response.
    async fn command(&self, command: &str) -> Result<()>;
}

/// Result of checking an instrument's identification against its configured model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The identification contains the configured model
    Connected {
        /// Raw `*IDN?` answer
        identity: String,
    },
    /// The instrument answered, but it is not the configured model
    ModelMismatch {
        /// Configured model substring
        expected: String,
        /// Raw `*IDN?` answer
        found: String,
    },
}

/// Compare an `*IDN?` answer with the configured model.
pub fn verify_model(identity: &str, expected_model: &str) -> ConnectOutcome {
    let identity = identity.trim();
    if identity.contains(expected_model) {
        ConnectOutcome::Connected {
            identity: identity.to_string(),
        }
    } else {
        ConnectOutcome::ModelMismatch {
            expected: expected_model.to_string(),
            found: identity.to_string(),
        }
    }
}

/// Parse a floating-point response from SCPI query.
pub fn parse_f64_response(response: &str) -> Result<f64> {
    response
        .trim()
        .parse::<f64>()
        .with_context(|| format!("Failed to parse SCPI response as f64: '{}'", response.trim()))
}

/// SCPI programmable power supply.
pub struct ScpiPowerSupply<T: ScpiTransport> {
    transport: T,
}

impl<T: ScpiTransport> ScpiPowerSupply<T> {
    /// Wrap a transport
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl<T: ScpiTransport> PowerSupply for ScpiPowerSupply<T> {
    async fn identify(&self) -> Result<String> {
        self.transport.query("*IDN?").await
    }

    async fn set_output_voltage(&self, volts: f64) -> Result<()> {
        self.transport.command(&format!(":SOUR:VOLT {}", volts)).await
    }

    async fn set_current_limit(&self, amps: f64) -> Result<()> {
        self.transport.command(&format!(":SOUR:CURR {}", amps)).await
    }

    async fn enable_output(&self) -> Result<()> {
        self.transport.command(":OUTP ON").await
    }

    async fn disable_output(&self) -> Result<()> {
        self.transport.command(":OUTP OFF").await
    }

    async fn measure_voltage(&self) -> Result<f64> {
        let response = self.transport.query(":MEAS:VOLT?").await?;
        parse_f64_response(&response)
    }
}

/// SCPI digitizing DAQ.
pub struct ScpiDigitizer<T: ScpiTransport> {
    transport: T,
}

impl<T: ScpiTransport> ScpiDigitizer<T> {
    /// Wrap a transport
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl<T: ScpiTransport> Digitizer for ScpiDigitizer<T> {
    async fn identify(&self) -> Result<String> {
        self.transport.query("*IDN?").await
    }

    async fn configure_digitize(&self, channel_spec: &str) -> Result<()> {
        self.transport.command(channel_spec).await
    }

    async fn read_raw(&self) -> Result<String> {
        self.transport.query("READ?").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{CommandLog, MockScpiTransport};

    #[test]
    fn test_verify_model() {
        let ok = verify_model("Keysight Technologies,N5748A,US1234,A.01\n", "N5748A");
        assert_eq!(
            ok,
            ConnectOutcome::Connected {
                identity: "Keysight Technologies,N5748A,US1234,A.01".to_string()
            }
        );

        let mismatch = verify_model("Keysight Technologies,E36313A,MY1234,1.0", "N5748A");
        assert!(matches!(mismatch, ConnectOutcome::ModelMismatch { .. }));
    }

    #[test]
    fn test_parse_f64_response() {
        assert_eq!(parse_f64_response("+6.60000E+01\n").unwrap(), 66.0);
        assert!(parse_f64_response("").is_err());
        assert!(parse_f64_response("ERR").is_err());
    }

    #[tokio::test]
    async fn test_power_supply_commands() {
        let log = CommandLog::new();
        let transport = MockScpiTransport::new("PSU A", log.clone())
            .with_response(":MEAS:VOLT?", "66.01");
        let supply = ScpiPowerSupply::new(transport);

        supply.set_output_voltage(66.0).await.unwrap();
        supply.set_current_limit(0.1).await.unwrap();
        supply.enable_output().await.unwrap();
        assert_eq!(supply.measure_voltage().await.unwrap(), 66.01);
        supply.disable_output().await.unwrap();

        assert_eq!(
            log.entries(),
            vec![
                "PSU A: :SOUR:VOLT 66",
                "PSU A: :SOUR:CURR 0.1",
                "PSU A: :OUTP ON",
                "PSU A: :MEAS:VOLT?",
                "PSU A: :OUTP OFF",
            ]
        );
    }

    #[tokio::test]
    async fn test_digitizer_reads_array() {
        let log = CommandLog::new();
        let transport =
            MockScpiTransport::new("DAQ", log.clone()).with_response("READ?", "0.1,0.2,0.3\n");
        let daq = ScpiDigitizer::new(transport);

        daq.configure_digitize("CONF:DIG:CURR:DC 0.1,DEF,0.001,3,(@121)")
            .await
            .unwrap();
        assert_eq!(daq.read_digitized_array().await.unwrap(), vec![0.1, 0.2, 0.3]);
        assert_eq!(
            log.entries(),
            vec!["DAQ: CONF:DIG:CURR:DC 0.1,DEF,0.001,3,(@121)", "DAQ: READ?"]
        );
    }
}
