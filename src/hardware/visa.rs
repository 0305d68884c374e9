//! VISA transport for the power supplies and the DAQ
//!
//! Wraps the visa-rs crate. VISA I/O is synchronous, so every call runs on
//! Tokio's blocking pool. The configured timeout is set as the session I/O
//! timeout, so a stalled read fails inside VISA and releases the session.
//!
//! Supports resource strings like:
//! - "USB0::0x0957::0x0807::MY12345678::INSTR" (USB)
//! - "TCPIP0::192.168.1.100::inst0::INSTR" (Ethernet/LXI)
//! - "GPIB0::5::INSTR" (GPIB interface)

use crate::hardware::scpi::ScpiTransport;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use visa_rs::attribute::AttrTmoValue;
use visa_rs::prelude::*;
use visa_rs::HasAttribute;

const LINE_TERMINATOR: &str = "\n";

struct VisaSession {
    // Dropping the resource manager closes every session it opened.
    _rm: DefaultRM,
    instrument: Instrument,
}

/// SCPI transport over a VISA session
pub struct VisaTransport {
    resource: String,
    timeout: Duration,
    session: Arc<Mutex<VisaSession>>,
}

/// Session timeout attribute value in milliseconds, saturating at `u32::MAX`
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

impl VisaTransport {
    /// Open a VISA session
    ///
    /// # Arguments
    /// * `resource` - VISA resource identifier (e.g., "GPIB0::1::INSTR")
    /// * `timeout` - Open timeout and session I/O timeout
    pub async fn open(resource: &str, timeout: Duration) -> Result<Self> {
        let name = resource.to_string();
        let millis = timeout_millis(timeout);
        let session = tokio::task::spawn_blocking(move || -> Result<VisaSession> {
            let rm = DefaultRM::new().map_err(|e| anyhow!("VISA resource manager: {}", e))?;
            let resource_id = CString::new(name.clone())
                .with_context(|| format!("Invalid VISA resource string '{}'", name))?;
            let instrument = rm
                .open(&resource_id.into(), AccessMode::NO_LOCK, timeout)
                .map_err(|e| anyhow!("Failed to open {}: {}", name, e))?;
            let tmo = AttrTmoValue::new_checked(millis)
                .ok_or_else(|| anyhow!("VISA timeout of {} ms is out of range", millis))?;
            instrument
                .set_attr(tmo)
                .map_err(|e| anyhow!("Failed to set I/O timeout on {}: {}", name, e))?;
            Ok(VisaSession {
                _rm: rm,
                instrument,
            })
        })
        .await
        .context("VISA open task panicked")??;

        Ok(Self {
            resource: resource.to_string(),
            timeout,
            session: Arc::new(Mutex::new(session)),
        })
    }

    async fn exchange(&self, command: &str, expect_response: bool) -> Result<String> {
        let session = Arc::clone(&self.session);
        let message = format!("{}{}", command, LINE_TERMINATOR);
        let resource = self.resource.clone();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || -> Result<String> {
            let mut session = session
                .lock()
                .map_err(|_| anyhow!("VISA session for {} is poisoned", resource))?;
            session
                .instrument
                .write_all(message.as_bytes())
                .with_context(|| format!("VISA write to {} failed (timeout {:?})", resource, timeout))?;

            let mut response = String::new();
            if expect_response {
                BufReader::new(&session.instrument)
                    .read_line(&mut response)
                    .with_context(|| {
                        format!("VISA read from {} failed (timeout {:?})", resource, timeout)
                    })?;
            }
            Ok(response.trim().to_string())
        })
        .await
        .context("VISA I/O task panicked")?
    }
}

#[async_trait]
impl ScpiTransport for VisaTransport {
    async fn query(&self, command: &str) -> Result<String> {
        self.exchange(command, true).await
    }

    async fn command(&self, command: &str) -> Result<()> {
        self.exchange(command, false).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_millis() {
        assert_eq!(timeout_millis(Duration::from_secs(5)), 5000);
        assert_eq!(timeout_millis(Duration::from_micros(2500)), 2);
        assert_eq!(timeout_millis(Duration::from_secs(u64::MAX)), u32::MAX);
    }
}
