//! Scenario data structures.
//!
//! A scenario is a named, ordered list of runs plus the destination of the
//! ground-truth markers that bracket each run. Scenarios are loaded once per
//! invocation and never mutated afterwards; everything that varies per run
//! (run id, output directory, resolved environment) lives in the engine's
//! per-run context instead.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::marker::MarkerEventKind;

/// Default marker destination host
pub const DEFAULT_MARKER_HOST: &str = "127.0.0.1";

/// Default marker destination port
pub const DEFAULT_MARKER_PORT: u16 = 55556;

/// A complete traffic generation scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique scenario name, never empty
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Where ground-truth markers are sent
    pub markers: MarkerSettings,
    /// Runs, executed strictly in this order
    pub runs: Vec<Run>,
    /// Document the scenario was loaded from
    pub source_path: PathBuf,
}

impl Scenario {
    /// Find a run by its id.
    pub fn run(&self, id: &str) -> Option<&Run> {
        self.runs.iter().find(|r| r.id == id)
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }
}

/// Ground-truth marker destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for MarkerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: DEFAULT_MARKER_HOST.to_string(),
            port: DEFAULT_MARKER_PORT,
        }
    }
}

impl MarkerSettings {
    /// `host:port` for display and logging.
    pub fn destination(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Kind of traffic a run generates; selects the marker event names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Attack,
    Benign,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Attack => "attack",
            RunKind::Benign => "benign",
        }
    }

    /// Marker sent before the subprocess is spawned.
    pub fn start_event(&self) -> MarkerEventKind {
        match self {
            RunKind::Attack => MarkerEventKind::AttackStart,
            RunKind::Benign => MarkerEventKind::BenignStart,
        }
    }

    /// Marker sent after the subprocess has been reaped.
    pub fn end_event(&self) -> MarkerEventKind {
        match self {
            RunKind::Attack => MarkerEventKind::AttackEnd,
            RunKind::Benign => MarkerEventKind::BenignEnd,
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "attack" => Ok(RunKind::Attack),
            "benign" => Ok(RunKind::Benign),
            other => Err(other.to_string()),
        }
    }
}

/// What the engine does with the subprocess's stdout/stderr
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Pipe both streams into files under the run's output directory
    #[default]
    Capture,
    /// Leave both streams attached to the engine's terminal; the script
    /// writes its own result files into `OUT_DIR`
    Inherit,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "capture" => Ok(OutputMode::Capture),
            "inherit" => Ok(OutputMode::Inherit),
            other => Err(other.to_string()),
        }
    }
}

/// A single execution run within a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique within the scenario
    pub id: String,
    pub kind: RunKind,
    /// Dataset label; defaults to the scenario name
    pub label: String,
    /// Script to launch, already resolved against the scenario directory
    pub script_path: PathBuf,
    /// Tool-argument profile, same resolution rule as the script
    pub profile_path: Option<PathBuf>,
    /// Raw environment block, placeholders not yet resolved
    pub env: BTreeMap<String, String>,
    pub output: OutputMode,
}
