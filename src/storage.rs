//! Run artifacts
//!
//! Every DUT run writes into `<output.directory>/<serial>/`:
//!
//! | File | Writer |
//! |---|---|
//! | `<sn>_data_log_<YYYYmmdd_HHMMSS>.txt` | [`RunLog`] |
//! | `<sn>_coil_<c>_current_waveform<YYYYmmdd_HHMMSS>.csv` | [`write_waveform`] |
//! | `<sn>_test_report_<YYYYmmddHHMMSS>.txt` | [`write_report_text`] |
//!
//! and appends one row to the aggregate CSV ([`append_aggregate_row`]). When
//! relocation is enabled the run directory's files are then moved to the share
//! ([`relocate_artifacts`]).

use crate::error::AppResult;
use crate::measurement::current::CurrentWaveform;
use crate::measurement_types::{Coil, CoilTest};
use crate::procedures::result::RunReport;
use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// =============================================================================
// ArtifactPaths
// =============================================================================

/// File names of one DUT run
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    directory: PathBuf,
    serial: String,
    stamp: String,
}

impl ArtifactPaths {
    /// Paths under `<output_dir>/<serial>/`, stamped with the run's start time
    pub fn new(output_dir: &Path, serial: &str, started: DateTime<Local>) -> Self {
        Self {
            directory: output_dir.join(serial),
            serial: serial.to_string(),
            stamp: started.format("%Y%m%d_%H%M%S").to_string(),
        }
    }

    /// Create the run directory
    pub fn create_dir(&self) -> AppResult<()> {
        fs::create_dir_all(&self.directory)?;
        Ok(())
    }

    /// Run directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Event log
    pub fn run_log(&self) -> PathBuf {
        self.directory
            .join(format!("{}_data_log_{}.txt", self.serial, self.stamp))
    }

    /// Current waveform of one coil in one test
    pub fn waveform(&self, test: CoilTest, coil: Coil) -> PathBuf {
        let name = match test {
            CoilTest::A | CoilTest::B => {
                format!("{}_coil_{}_current_waveform{}.csv", self.serial, coil, self.stamp)
            }
            CoilTest::AB => format!(
                "{}_coil_AB_{}_current_waveform{}.csv",
                self.serial, coil, self.stamp
            ),
        };
        self.directory.join(name)
    }

    /// Text report, stamped when it is written
    pub fn report_text(&self, written: DateTime<Local>) -> PathBuf {
        self.directory.join(format!(
            "{}_test_report_{}.txt",
            self.serial,
            written.format("%Y%m%d%H%M%S")
        ))
    }
}

// =============================================================================
// RunLog
// =============================================================================

/// Flat text event log of one DUT run
///
/// Each line is `<YYYY-mm-dd HH:MM:SS.ffffff>\t<message> `. Every message is
/// also emitted with `tracing::info!`. A failed write is reported once through
/// tracing and never aborts the run.
#[derive(Debug)]
pub struct RunLog {
    path: Option<PathBuf>,
}

impl RunLog {
    /// Log appending to `path`; the file is created on first write
    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Log that only emits tracing events
    pub fn discard() -> Self {
        Self { path: None }
    }

    /// File being written, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one event
    pub fn record(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{}", message);

        let Some(path) = &self.path else {
            return;
        };
        let line = format!(
            "{}\t{} \n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.6f"),
            message
        );
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "Could not write run log");
        }
    }

    /// Append a multi-line block, one event per line
    pub fn record_lines(&self, block: &str) {
        for line in block.lines() {
            self.record(line);
        }
    }
}

// =============================================================================
// Writers
// =============================================================================

/// Write a waveform as `time,current` rows without a header
pub fn write_waveform(path: &Path, waveform: &CurrentWaveform) -> AppResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    for sample in &waveform.samples {
        writer.serialize((sample.elapsed_s, sample.current))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the text report
pub fn write_report_text(path: &Path, report: &RunReport) -> AppResult<()> {
    let mut file = File::create(path)?;
    file.write_all(report.to_string().as_bytes())?;
    Ok(())
}

/// Append the report's row to the aggregate CSV, creating it if needed
pub fn append_aggregate_row(path: &Path, report: &RunReport) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(file);
    writer.write_record(report.csv_record())?;
    writer.flush()?;
    Ok(())
}

/// Move every file of `directory` into `<share>/<directory name>/`
///
/// Falls back to copy-and-delete when a rename crosses filesystems. Returns the
/// new paths.
pub fn relocate_artifacts(directory: &Path, share: &Path) -> AppResult<Vec<PathBuf>> {
    let target = match directory.file_name() {
        Some(name) => share.join(name),
        None => share.to_path_buf(),
    };
    fs::create_dir_all(&target)?;

    let mut moved = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let destination = target.join(entry.file_name());
        if fs::rename(entry.path(), &destination).is_err() {
            fs::copy(entry.path(), &destination)?;
            fs::remove_file(entry.path())?;
        }
        moved.push(destination);
    }

    moved.sort();
    info!(count = moved.len(), target = %target.display(), "Artifacts relocated");
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement_types::Coil;
    use chrono::TimeZone;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    fn started() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_artifact_names() {
        let paths = ArtifactPaths::new(Path::new("results"), "MI-7", started());
        assert_eq!(
            paths.run_log(),
            PathBuf::from("results/MI-7/MI-7_data_log_20260314_092653.txt")
        );
        assert_eq!(
            paths.waveform(CoilTest::A, Coil::A),
            PathBuf::from("results/MI-7/MI-7_coil_A_current_waveform20260314_092653.csv")
        );
        assert_eq!(
            paths.waveform(CoilTest::AB, Coil::B),
            PathBuf::from("results/MI-7/MI-7_coil_AB_B_current_waveform20260314_092653.csv")
        );
        assert_eq!(
            paths.report_text(started()),
            PathBuf::from("results/MI-7/MI-7_test_report_20260314092653.txt")
        );
    }

    #[test]
    fn test_run_log_line_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let log = RunLog::create(&path);

        log.record("Output A enabled");
        log.record_lines("a\nb");

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        let (stamp, message) = lines[0].split_once('\t').unwrap();
        // YYYY-mm-dd HH:MM:SS.ffffff
        assert_eq!(stamp.len(), 26);
        assert_eq!(message, "Output A enabled ");
    }

    #[test]
    #[traced_test]
    fn test_discarded_log_still_emits_events() {
        let log = RunLog::discard();
        log.record("Output B disabled");
        assert!(log.path().is_none());
        assert!(logs_contain("Output B disabled"));
    }

    #[test]
    fn test_waveform_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wave.csv");
        let waveform = CurrentWaveform::from_readings(Coil::A, &[0.065, 0.066], 0.001);

        write_waveform(&path, &waveform).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "0.0,0.065\n0.001,0.066\n");
    }

    #[test]
    fn test_relocate_moves_files() {
        let out = tempdir().unwrap();
        let share = tempdir().unwrap();
        let run_dir = out.path().join("MI-7");
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(run_dir.join("a.txt"), "a").unwrap();
        fs::write(run_dir.join("b.csv"), "b").unwrap();

        let moved = relocate_artifacts(&run_dir, share.path()).unwrap();

        assert_eq!(
            moved,
            vec![share.path().join("MI-7/a.txt"), share.path().join("MI-7/b.csv")]
        );
        assert_eq!(fs::read_dir(&run_dir).unwrap().count(), 0);
        assert_eq!(fs::read_to_string(share.path().join("MI-7/b.csv")).unwrap(), "b");
    }
}
