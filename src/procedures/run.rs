//! One DUT run, end to end.
//!
//! ```text
//! artifact dir → run log → connect station → A, B, AB → shutdown + drop station
//!              → report → waveforms, text report, aggregate row → relocate
//! ```
//!
//! The station is owned by the run and dropped before any artifact is written, so
//! instrument sessions are closed on every path out of [`run_on_station`].

use crate::config::TestConfig;
use crate::error::{AppResult, DipoleError};
use crate::measurement_types::Baselines;
use crate::procedures::result::{ReportHeader, RunReport};
use crate::procedures::sequencer::{run_dut, SequencerSettings};
use crate::procedures::station::{open_instruments, CoilStation, DebugStation, InstrumentStation};
use crate::storage::{
    append_aggregate_row, relocate_artifacts, write_report_text, write_waveform, ArtifactPaths,
    RunLog,
};
use chrono::Local;
use std::path::PathBuf;
use tracing::{error, info};

/// Inputs of one loop iteration
#[derive(Debug, Clone)]
pub struct RunContext {
    /// DUT serial, e.g. "MI-1042"
    pub serial: String,
    /// R0/T0 of both coils
    pub baselines: Baselines,
    /// 1-based loop iteration
    pub loop_number: u32,
}

/// What a completed run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Evaluated report
    pub report: RunReport,
    /// Files written, at their final location
    pub artifacts: Vec<PathBuf>,
}

/// Connect the station the configuration asks for and run one DUT.
pub async fn execute_dut_run(config: &TestConfig, context: &RunContext) -> AppResult<RunSummary> {
    let paths = ArtifactPaths::new(&config.output.directory, &context.serial, Local::now());
    paths.create_dir()?;
    let log = RunLog::create(paths.run_log());
    log_run_start(config, context, &log)?;

    let station = match connect_station(config, &log).await {
        Ok(station) => station,
        Err(e) => {
            log_fatal(&log, &e);
            return Err(e);
        }
    };

    run_on_station(config, context, &paths, &log, station).await
}

async fn connect_station(config: &TestConfig, log: &RunLog) -> AppResult<Box<dyn CoilStation>> {
    if config.run.debug {
        log.record("Debug mode: instruments bypassed");
        return Ok(Box::new(DebugStation::new()));
    }

    let instruments = open_instruments(config).await?;
    let station = InstrumentStation::prepare(instruments, config, log).await?;
    Ok(Box::new(station))
}

/// Run the three tests on an already connected station and persist the results.
pub async fn run_on_station(
    config: &TestConfig,
    context: &RunContext,
    paths: &ArtifactPaths,
    log: &RunLog,
    station: Box<dyn CoilStation>,
) -> AppResult<RunSummary> {
    let settings = SequencerSettings::from_config(config, context.baselines);

    let outcome = run_dut(station.as_ref(), &settings, log).await;
    let shutdown = station.shutdown().await;
    let described = station.describe().to_string();
    drop(station);
    log.record(format!("Closed {} station", described));

    let run = match outcome.and_then(|run| shutdown.map(|()| run)) {
        Ok(run) => run,
        Err(e) => {
            log_fatal(log, &e);
            return Err(e);
        }
    };

    let report = RunReport::new(
        ReportHeader::new(config, &context.serial),
        &run.records,
        &config.limits,
        config.constants.decimal_places,
        run.elapsed,
    );
    log.record_lines(&report.to_json()?);

    let mut artifacts = Vec::new();
    if let Some(path) = log.path() {
        artifacts.push(path.to_path_buf());
    }

    for record in &run.records {
        for waveform in record.waveforms.iter().filter(|w| !w.is_empty()) {
            let path = paths.waveform(record.test, waveform.coil);
            write_waveform(&path, waveform)?;
            log.record(format!("Waveform saved: {}", path.display()));
            artifacts.push(path);
        }
    }

    let report_path = paths.report_text(report.header.timestamp);
    write_report_text(&report_path, &report)?;
    log.record(format!("TXT file {} saved", report_path.display()));
    artifacts.push(report_path);

    append_aggregate_row(&config.output.aggregate_csv, &report)?;
    log.record(format!(
        "CSV row appended to {}",
        config.output.aggregate_csv.display()
    ));

    log.record(format!(
        "Overall Result: {} ({} failed checks)",
        report.overall(),
        report.fail_count()
    ));

    if config.output.relocate {
        let share = config.output.share_directory.as_ref().ok_or_else(|| {
            DipoleError::Configuration("output.share_directory is not set".to_string())
        })?;
        log.record(format!("Relocating artifacts to {}", share.display()));
        artifacts = relocate_artifacts(paths.directory(), share)?;
    }

    info!(
        serial = %context.serial,
        loop_number = context.loop_number,
        verdict = %report.overall(),
        "DUT run complete"
    );

    Ok(RunSummary { report, artifacts })
}

fn log_run_start(config: &TestConfig, context: &RunContext, log: &RunLog) -> AppResult<()> {
    log.record(&config.application.log_title);
    log.record(&context.serial);
    log.record(format!("Loop#: {}", context.loop_number));
    let b = &context.baselines;
    log.record(format!(
        "T0_A={}; R0_A={}; T0_B={}; R0_B={}",
        b.a.t0, b.a.r0, b.b.t0, b.b.r0
    ));
    log.record("load Configuration");
    log.record_lines(&serde_json::to_string_pretty(config)?);
    Ok(())
}

fn log_fatal(log: &RunLog, e: &DipoleError) {
    error!(category = e.category(), error = %e, "DUT run aborted");
    log.record(format!("{}: {}", e.category(), e));
}
