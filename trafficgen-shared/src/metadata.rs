//! Persisted run and scenario metadata.
//!
//! `RunMetadata` is written once per attempted run to
//! `<workspace>/runs/<run_id>/run_metadata.json`. `ScenarioMetadata` summarises
//! every attempted run of one scenario execution.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scenario::RunKind;
use crate::time::iso_millis;

/// Name written into every metadata document
pub const TOOL_NAME: &str = "trafficgen";

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Completed,
    Interrupted,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Completed => "completed",
            RunState::Interrupted => "interrupted",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the run ended, from the dataset's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Timeout,
    Interrupted,
    Failure,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Timeout => "timeout",
            RunOutcome::Interrupted => "interrupted",
            RunOutcome::Failure => "failure",
        }
    }

    /// Whether the run counts as a success for the scenario exit code.
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success | RunOutcome::Timeout)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage at which a failed run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A placeholder could not be resolved
    Placeholder,
    /// Preflight or spawn failed; no process ran
    Launch,
    /// The process exited with a code outside the success set
    ExitStatus,
    /// The process was killed by a signal the engine did not send
    Signal,
    /// The duration bound elapsed under the failure deadline policy
    Deadline,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Placeholder => "placeholder",
            FailureKind::Launch => "launch",
            FailureKind::ExitStatus => "exit_status",
            FailureKind::Signal => "signal",
            FailureKind::Deadline => "deadline",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What was observed about the subprocess, when one was spawned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: Option<u32>,
    /// Full command line, interpreter first when there is one
    pub command: Vec<String>,
    #[serde(with = "iso_millis")]
    pub spawned_at: DateTime<Utc>,
    #[serde(with = "iso_millis")]
    pub exited_at: DateTime<Utc>,
    /// Exit code as reported by the OS, absent when killed by a signal
    pub raw_exit_code: Option<i32>,
    /// Terminating signal number, if any
    pub signal: Option<i32>,
}

/// Profile referenced by a run, as loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub path: PathBuf,
    pub tool: String,
    pub name: String,
}

/// Device range of a benign run, from `RANGE_START`/`RANGE_END`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRange {
    pub start: i64,
    pub end: i64,
    pub count: i64,
}

/// Lab infrastructure a benign run talks to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Infrastructure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_broker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

/// Extra description of benign traffic runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenignConfig {
    pub device_range: Option<DeviceRange>,
    pub base_ip: Option<String>,
    pub infrastructure: Infrastructure,
    pub protocols: Vec<String>,
}

impl BenignConfig {
    /// Derive the benign description from the effective environment and script name.
    pub fn from_env(env: &BTreeMap<String, String>, script: &Path) -> Self {
        let device_range = match (env.get("RANGE_START"), env.get("RANGE_END")) {
            (Some(start), Some(end)) => {
                match (start.trim().parse::<i64>(), end.trim().parse::<i64>()) {
                    (Ok(start), Ok(end)) => Some(DeviceRange {
                        start,
                        end,
                        count: end - start + 1,
                    }),
                    _ => None,
                }
            }
            _ => None,
        };

        let infrastructure = Infrastructure {
            mqtt_broker: env.get("BROKER_IP").cloned(),
            web_server: env.get("WEB_SERVER_IP").cloned(),
            database: env.get("DB_HOST").cloned(),
        };

        let script_name = script
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let mut protocols = Vec::new();
        if script_name.contains("mqtt") || infrastructure.mqtt_broker.is_some() {
            protocols.push("mqtt".to_string());
        }
        if script_name.contains("http") || infrastructure.web_server.is_some() {
            protocols.push("http".to_string());
        }
        if ["udp", "swarm", "device"]
            .iter()
            .any(|hint| script_name.contains(hint))
        {
            protocols.push("udp".to_string());
        }

        Self {
            device_range,
            base_ip: env.get("BASE_IP").cloned(),
            infrastructure,
            protocols,
        }
    }
}

/// Metadata document of one attempted run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub tool: String,
    pub version: String,
    pub run_id: String,
    /// Run id as written in the scenario
    pub run_id_base: String,
    pub scenario: String,
    #[serde(rename = "type")]
    pub kind: RunKind,
    pub label: String,
    pub script: PathBuf,
    pub profile: Option<ProfileSummary>,
    /// Entries the engine set for the child, on top of its own environment
    pub environment: BTreeMap<String, String>,
    #[serde(with = "iso_millis")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "iso_millis")]
    pub ended_at: DateTime<Utc>,
    pub duration_s: f64,
    pub process: Option<ProcessRecord>,
    /// Effective exit code; absent when no process ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub state: RunState,
    pub outcome: RunOutcome,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    pub outputs_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_log: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_log: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benign_config: Option<BenignConfig>,
}

impl RunMetadata {
    pub fn summary(&self, metadata_path: &Path) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            run_id_base: self.run_id_base.clone(),
            state: self.state,
            outcome: self.outcome,
            exit_code: self.exit_code,
            failure_reason: self.failure_reason.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            duration_s: self.duration_s,
            outputs_dir: self.outputs_dir.clone(),
            metadata_path: metadata_path.to_path_buf(),
        }
    }
}

/// One row of the scenario metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub run_id_base: String,
    pub state: RunState,
    pub outcome: RunOutcome,
    pub exit_code: Option<i32>,
    pub failure_reason: Option<String>,
    #[serde(with = "iso_millis")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "iso_millis")]
    pub ended_at: DateTime<Utc>,
    pub duration_s: f64,
    pub outputs_dir: PathBuf,
    pub metadata_path: PathBuf,
}

/// Scenario identity in the scenario metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioInfo {
    pub name: String,
    pub description: String,
    pub source: PathBuf,
}

/// Summary of one scenario execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMetadata {
    pub tool: String,
    pub version: String,
    pub scenario: ScenarioInfo,
    #[serde(with = "iso_millis")]
    pub generated_at: DateTime<Utc>,
    pub interrupted: bool,
    pub runs: Vec<RunSummary>,
}
