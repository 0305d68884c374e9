//! Mock Hardware Implementations
//!
//! Scripted instruments for testing the station without a bench.
//!
//! # Available Mocks
//!
//! - `MockScpiTransport` - SCPI transport with canned query answers; wrap it in
//!   `ScpiPowerSupply` or `ScpiDigitizer`
//! - `MockMagnetometer` - magnetometer link replaying a list of responses
//!
//! Every mock appends what it was asked to do to a [`CommandLog`], which can be
//! shared between instruments to check the global order of operations.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::hardware::capabilities::MagnetometerTransport;
use crate::hardware::scpi::ScpiTransport;

// =============================================================================
// CommandLog - shared record of instrument traffic
// =============================================================================

/// Ordered record of commands sent to mock instruments
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CommandLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, instrument: &str, command: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(format!("{}: {}", instrument, command));
        }
    }

    /// Snapshot of every entry, oldest first
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Position of the first entry equal to `entry`
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    /// Position of the last entry equal to `entry`
    pub fn last_position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().rposition(|e| e == entry)
    }

    /// Number of entries equal to `entry`
    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }
}

// =============================================================================
// MockScpiTransport - scripted SCPI instrument
// =============================================================================

/// SCPI transport answering queries from a table
///
/// Queries without a scripted answer return an empty string. Commands listed
/// with [`MockScpiTransport::fail_on`] return an error and are still logged.
pub struct MockScpiTransport {
    name: String,
    log: CommandLog,
    responses: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
}

impl MockScpiTransport {
    /// Create a transport logging under `name`
    pub fn new(name: impl Into<String>, log: CommandLog) -> Self {
        Self {
            name: name.into(),
            log,
            responses: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Answer `query` with `response`
    pub fn with_response(self, query: &str, response: &str) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(query.to_string(), response.to_string());
        }
        self
    }

    /// Make `command` fail from now on
    pub fn fail_on(&self, command: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(command.to_string());
        }
    }

    fn exchange(&self, command: &str) -> Result<String> {
        self.log.push(&self.name, command);

        let fails = self
            .failing
            .lock()
            .map(|f| f.contains(command))
            .unwrap_or(false);
        if fails {
            return Err(anyhow!("{}: timeout waiting for '{}'", self.name, command));
        }

        Ok(self
            .responses
            .lock()
            .ok()
            .and_then(|r| r.get(command).cloned())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ScpiTransport for MockScpiTransport {
    async fn query(&self, command: &str) -> Result<String> {
        self.exchange(command)
    }

    async fn command(&self, command: &str) -> Result<()> {
        self.exchange(command)?;
        Ok(())
    }
}

// =============================================================================
// MockMagnetometer - replayed magnetometer responses
// =============================================================================

/// Magnetometer link replaying canned responses
///
/// Each `read_line` pops the next response. Once the script is exhausted the
/// last response repeats; an empty script reads as silence (empty string).
pub struct MockMagnetometer {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    writes: Mutex<Vec<Vec<u8>>>,
    log: CommandLog,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MockMagnetometer {
    /// Replay `responses` in order
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self::with_log(responses, CommandLog::new())
    }

    /// Replay `responses`, logging writes to a shared log
    pub fn with_log(responses: Vec<String>, log: CommandLog) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(String::new()),
            writes: Mutex::new(Vec::new()),
            log,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Answer every poll with the same X value (nT)
    pub fn steady(x_nanotesla: f64) -> Self {
        Self::with_responses(vec![format!(
            "A\u{4}A\u{4} {},0,0\rD\u{4}",
            x_nanotesla
        )])
    }

    /// Every byte string written so far
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Make every subsequent read fail
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MagnetometerTransport for MockMagnetometer {
    async fn write(&self, command: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("magnetometer port closed"));
        }
        self.log
            .push("Magnetometer", &String::from_utf8_lossy(command));
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(command.to_vec());
        }
        Ok(())
    }

    async fn read_line(&self) -> Result<String> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("magnetometer port closed"));
        }

        let next = self.responses.lock().ok().and_then(|mut r| r.pop_front());
        let mut last = self
            .last
            .lock()
            .map_err(|_| anyhow!("mock magnetometer poisoned"))?;
        if let Some(response) = next {
            *last = response;
        }
        Ok(last.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_transport_answers_and_logs() {
        let log = CommandLog::new();
        let transport = MockScpiTransport::new("PSU", log.clone()).with_response("*IDN?", "N5748A");

        assert_eq!(transport.query("*IDN?").await.unwrap(), "N5748A");
        assert_eq!(transport.query(":MEAS:CURR?").await.unwrap(), "");
        transport.command(":OUTP ON").await.unwrap();

        assert_eq!(log.entries(), vec!["PSU: *IDN?", "PSU: :MEAS:CURR?", "PSU: :OUTP ON"]);
        assert_eq!(log.position("PSU: :OUTP ON"), Some(2));
    }

    #[tokio::test]
    async fn test_fault_injection_still_logs() {
        let log = CommandLog::new();
        let transport = MockScpiTransport::new("DAQ", log.clone());
        transport.fail_on("READ?");

        assert!(transport.query("READ?").await.is_err());
        assert_eq!(log.count("DAQ: READ?"), 1);
    }

    #[tokio::test]
    async fn test_magnetometer_repeats_last_response() {
        let magnetometer = MockMagnetometer::with_responses(vec!["a".into(), "b".into()]);
        assert_eq!(magnetometer.read_line().await.unwrap(), "a");
        assert_eq!(magnetometer.read_line().await.unwrap(), "b");
        assert_eq!(magnetometer.read_line().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_silent_magnetometer_reads_empty() {
        let magnetometer = MockMagnetometer::with_responses(Vec::new());
        assert_eq!(magnetometer.read_line().await.unwrap(), "");
    }
}
