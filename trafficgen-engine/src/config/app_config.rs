//! Application configuration management for the trafficgen engine.
//!
//! This module turns the parsed command line plus the process environment
//! (`TRAFFICGEN_WORKSPACE`, `RUST_LOG`, whether stdin is a terminal) into the
//! settings the runner works with, and initializes logging.

use std::collections::BTreeMap;
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::Level;

use trafficgen_shared::document::{ScalarValue, read_document};

use super::cli::{CliCommand, CliConfig};
use crate::markers::MarkerOverrides;
use crate::placeholder::AnswerMode;
use crate::process::{DeadlinePolicy, SupervisorConfig};
use crate::scenario::RunnerConfig;

/// Environment variable naming the default workspace
pub const WORKSPACE_ENV: &str = "TRAFFICGEN_WORKSPACE";

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Lowercase name, as written in `RUST_LOG`
    pub fn to_filter_string(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    pub fn to_level(&self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Process environment the configuration depends on
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    pub workspace: Option<String>,
    pub rust_log: Option<String>,
    pub current_dir: PathBuf,
    pub stdin_is_terminal: bool,
}

impl EnvSnapshot {
    /// Capture the current process environment.
    pub fn capture() -> Result<Self> {
        Ok(Self {
            workspace: env::var(WORKSPACE_ENV).ok(),
            rust_log: env::var("RUST_LOG").ok(),
            current_dir: env::current_dir().context("Failed to determine current directory")?,
            stdin_is_terminal: std::io::stdin().is_terminal(),
        })
    }
}

/// Application configuration structure
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub command: CliCommand,
    pub scenario_path: PathBuf,
    pub workspace: PathBuf,
    pub log_level: LogLevel,
    /// Placeholder answers: answers file overlaid with `--set`
    pub answers: BTreeMap<String, String>,
    pub answer_mode: AnswerMode,
    pub fail_fast: bool,
    pub supervisor: SupervisorConfig,
    pub markers: MarkerOverrides,
}

impl AppConfig {
    /// Create application configuration from CLI config and the process environment
    pub fn from_cli(cli_config: &CliConfig) -> Result<Self> {
        Self::from_cli_with_env(cli_config, &EnvSnapshot::capture()?)
    }

    /// Same as [`AppConfig::from_cli`] against an explicit environment (useful for testing)
    pub fn from_cli_with_env(cli_config: &CliConfig, env: &EnvSnapshot) -> Result<Self> {
        cli_config.validate()?;

        let log_level = if cli_config.quiet {
            LogLevel::Error
        } else if cli_config.verbose {
            LogLevel::Debug
        } else {
            match env.rust_log.as_deref() {
                Some(level_str) if !level_str.trim().is_empty() => Self::parse_log_level(level_str),
                _ => LogLevel::Info,
            }
        };

        let workspace = match (&cli_config.workspace, env.workspace.as_deref()) {
            (Some(dir), _) => dir.clone(),
            (None, Some(dir)) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => env.current_dir.clone(),
        };
        let workspace = if workspace.is_absolute() {
            workspace
        } else {
            env.current_dir.join(workspace)
        };

        let mut answers = match &cli_config.answers_file {
            Some(path) => load_answers_file(path)?,
            None => BTreeMap::new(),
        };
        for entry in &cli_config.set {
            let (key, value) = parse_answer(entry)?;
            answers.insert(key, value);
        }

        let answer_mode = AnswerMode::select(
            !answers.is_empty(),
            cli_config.non_interactive,
            env.stdin_is_terminal,
        );

        let deadline_policy = if cli_config.deadline_is_failure {
            DeadlinePolicy::Failure
        } else {
            DeadlinePolicy::Success
        };

        Ok(Self {
            command: cli_config.command,
            scenario_path: cli_config.scenario.clone(),
            workspace,
            log_level,
            answers,
            answer_mode,
            fail_fast: cli_config.fail_fast,
            supervisor: SupervisorConfig {
                success_codes: cli_config.success_codes.clone(),
                grace_period: Duration::from_secs(cli_config.grace_seconds),
                deadline_policy,
            },
            markers: MarkerOverrides {
                host: cli_config.marker_host.clone(),
                port: cli_config.marker_port,
                disabled: cli_config.no_markers,
            },
        })
    }

    /// Parse log level from string
    fn parse_log_level(level_str: &str) -> LogLevel {
        // Extract the main log level from complex RUST_LOG format
        let main_level = level_str
            .split(',')
            .next()
            .unwrap_or(level_str)
            .split('=')
            .next()
            .unwrap_or(level_str)
            .trim()
            .to_lowercase();

        match main_level.as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info, // Default fallback
        }
    }

    /// Initialize logging based on configuration
    ///
    /// Logs go to stderr so that `validate` output on stdout stays clean.
    pub fn init_logging(&self) -> Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(self.log_level.to_level())
            .with_writer(std::io::stderr)
            .with_target(false) // Don't show the module target
            .with_level(true) // Show log level
            .with_thread_ids(false) // Don't show thread IDs
            .with_thread_names(false) // Don't show thread names
            .with_file(false) // Don't show file names
            .with_line_number(false) // Don't show line numbers
            .with_ansi(std::io::stderr().is_terminal())
            .event_format(
                tracing_subscriber::fmt::format()
                    .with_target(false)
                    .compact(),
            )
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

        tracing::debug!(
            "Logging initialized with level: {}",
            self.log_level.to_filter_string()
        );
        Ok(())
    }

    /// Validate application configuration
    pub fn validate(&self) -> Result<()> {
        if self.scenario_path.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Scenario path cannot be empty"));
        }

        if self.supervisor.success_codes.is_empty() {
            return Err(anyhow::anyhow!("At least one success code is required"));
        }

        if self.workspace.exists() && !self.workspace.is_dir() {
            return Err(anyhow::anyhow!(
                "Workspace {:?} exists and is not a directory",
                self.workspace
            ));
        }

        Ok(())
    }

    /// Settings handed to the scenario runner
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            workspace: self.workspace.clone(),
            fail_fast: self.fail_fast,
            supervisor: self.supervisor.clone(),
            markers: self.markers.clone(),
        }
    }
}

/// Split a `KEY=VALUE` answer at the first `=`.
pub fn parse_answer(entry: &str) -> Result<(String, String)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(anyhow::anyhow!(
            "Invalid answer '{}'. Expected KEY=VALUE",
            entry
        )),
    }
}

/// Read a YAML or JSON5 mapping of placeholder keys to answers.
pub fn load_answers_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let raw: Option<BTreeMap<String, ScalarValue>> = read_document(path)
        .with_context(|| format!("Failed to load answers file {:?}", path))?;

    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.into_string()))
        .collect())
}
