//! Run Recorder - per-run metadata and execution logs.
//!
//! Layout under the workspace:
//!
//! ```text
//! <workspace>/
//! ├── runs/<run_id>/
//! │   ├── run_metadata.json
//! │   ├── execution.log
//! │   └── outputs/
//! └── .trafficgen/scenario_metadata_<ts>.json
//! ```
//!
//! Metadata documents are written through a temporary file, fsynced, then
//! renamed into place, so readers never observe a partial document.

use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use trafficgen_shared::errors::{RecordError, RecordResult};
use trafficgen_shared::metadata::{RunMetadata, ScenarioMetadata};
use trafficgen_shared::time::{compact_stamp, format_iso_millis, utc_now};

pub const RUNS_DIR: &str = "runs";
pub const OUTPUTS_DIR: &str = "outputs";
pub const RUN_METADATA_FILE: &str = "run_metadata.json";
pub const EXECUTION_LOG_FILE: &str = "execution.log";
pub const SCENARIO_METADATA_DIR: &str = ".trafficgen";

/// Append-only, timestamped lifecycle log of one run.
///
/// Write failures are logged once and then ignored; the log must never be the
/// reason a run fails.
#[derive(Debug)]
pub struct ExecutionLog {
    path: PathBuf,
    file: Option<File>,
}

impl ExecutionLog {
    /// Open `<run_dir>/execution.log` for appending.
    pub fn open(run_dir: &Path) -> RecordResult<Self> {
        let path = run_dir.join(EXECUTION_LOG_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| RecordError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn line(&mut self, message: impl Display) {
        let Some(file) = self.file.as_mut() else {
            return;
        };

        let entry = format!("{} {}\n", format_iso_millis(&utc_now()), message);
        if let Err(e) = file.write_all(entry.as_bytes()) {
            warn!("Failed to append to execution log {:?}: {}", self.path, e);
            self.file = None;
        }
    }
}

/// Serialize `value` as pretty JSON to `path` via temp file, fsync and rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> RecordResult<()> {
    let io_error = |source: std::io::Error| RecordError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut content = serde_json::to_vec_pretty(value)?;
    content.push(b'\n');

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let mut file = File::create(&tmp_path).map_err(io_error)?;
    file.write_all(&content).map_err(io_error)?;
    file.sync_all().map_err(io_error)?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(io_error)?;

    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            if let Err(e) = dir.sync_all() {
                debug!("Failed to fsync directory {:?}: {}", parent, e);
            }
        }
    }
    Ok(())
}

/// Persists metadata below one workspace
#[derive(Debug, Clone)]
pub struct RunRecorder {
    workspace: PathBuf,
}

impl RunRecorder {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.workspace.join(RUNS_DIR)
    }

    pub fn scenario_metadata_dir(&self) -> PathBuf {
        self.workspace.join(SCENARIO_METADATA_DIR)
    }

    /// Write `<run_dir>/run_metadata.json`. A run is recorded at most once.
    pub fn record(&self, run_dir: &Path, metadata: &RunMetadata) -> RecordResult<PathBuf> {
        let path = run_dir.join(RUN_METADATA_FILE);
        if path.exists() {
            return Err(RecordError::Io {
                path,
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "run metadata already recorded",
                ),
            });
        }

        write_json_atomic(&path, metadata)?;
        info!(
            "Recorded run {} ({}, {}) to {:?}",
            metadata.run_id, metadata.state, metadata.outcome, path
        );
        Ok(path)
    }

    /// Write `<workspace>/.trafficgen/scenario_metadata_<ts>.json`.
    pub fn record_scenario(&self, metadata: &ScenarioMetadata) -> RecordResult<PathBuf> {
        let dir = self.scenario_metadata_dir();
        fs::create_dir_all(&dir).map_err(|source| RecordError::Io {
            path: dir.clone(),
            source,
        })?;

        let stem = format!("scenario_metadata_{}", compact_stamp(&metadata.generated_at));
        let mut path = dir.join(format!("{}.json", stem));
        let mut suffix = 1;
        while path.exists() {
            path = dir.join(format!("{}_{}.json", stem, suffix));
            suffix += 1;
        }

        write_json_atomic(&path, metadata)?;
        info!("Scenario metadata: {:?}", path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use trafficgen_shared::metadata::{
        RunOutcome, RunState, RunSummary, ScenarioInfo, TOOL_NAME,
    };
    use trafficgen_shared::scenario::RunKind;

    fn run_metadata(run_dir: &Path) -> RunMetadata {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        RunMetadata {
            tool: TOOL_NAME.to_string(),
            version: "test".to_string(),
            run_id: "s_a_20240501_100000".to_string(),
            run_id_base: "a".to_string(),
            scenario: "s".to_string(),
            kind: RunKind::Benign,
            label: "s".to_string(),
            script: PathBuf::from("/x.sh"),
            profile: None,
            environment: BTreeMap::new(),
            started_at: ts,
            ended_at: ts,
            duration_s: 0.0,
            process: None,
            exit_code: Some(0),
            state: RunState::Completed,
            outcome: RunOutcome::Success,
            timed_out: false,
            failure_kind: None,
            failure_reason: None,
            failure_message: None,
            outputs_dir: run_dir.join(OUTPUTS_DIR),
            stdout_log: None,
            stderr_log: None,
            benign_config: None,
        }
    }

    #[test]
    fn test_record_writes_once() {
        let temp_dir = TempDir::new().unwrap();
        let recorder = RunRecorder::new(temp_dir.path());
        let run_dir = temp_dir.path().join("runs").join("s_a");
        fs::create_dir_all(&run_dir).unwrap();

        let metadata = run_metadata(&run_dir);
        let path = recorder.record(&run_dir, &metadata).unwrap();
        assert_eq!(path, run_dir.join(RUN_METADATA_FILE));

        let stored: RunMetadata =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored, metadata);

        assert!(recorder.record(&run_dir, &metadata).is_err());

        // No temp files left behind
        let names: Vec<_> = fs::read_dir(&run_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![RUN_METADATA_FILE.to_string()]);
    }

    #[test]
    fn test_record_scenario_never_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let recorder = RunRecorder::new(temp_dir.path());
        let metadata = ScenarioMetadata {
            tool: TOOL_NAME.to_string(),
            version: "test".to_string(),
            scenario: ScenarioInfo {
                name: "s".to_string(),
                description: String::new(),
                source: PathBuf::from("/s.yaml"),
            },
            generated_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            interrupted: false,
            runs: Vec::<RunSummary>::new(),
        };

        let first = recorder.record_scenario(&metadata).unwrap();
        let second = recorder.record_scenario(&metadata).unwrap();

        assert_eq!(
            first,
            temp_dir
                .path()
                .join(".trafficgen/scenario_metadata_20240501_100000.json")
        );
        assert_eq!(
            second,
            temp_dir
                .path()
                .join(".trafficgen/scenario_metadata_20240501_100000_1.json")
        );
    }

    #[test]
    fn test_execution_log_appends_timestamped_lines() {
        let temp_dir = TempDir::new().unwrap();
        let mut log = ExecutionLog::open(temp_dir.path()).unwrap();
        log.line("first");
        log.line(format_args!("second {}", 2));
        drop(log);

        let mut log = ExecutionLog::open(temp_dir.path()).unwrap();
        log.line("third");

        let content = fs::read_to_string(temp_dir.path().join(EXECUTION_LOG_FILE)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("Z first"));
        assert!(lines[1].ends_with("Z second 2"));
        assert!(lines[2].ends_with("Z third"));
    }
}
