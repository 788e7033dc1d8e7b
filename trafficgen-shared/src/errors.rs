use std::path::PathBuf;

use thiserror::Error;

/// Scenario or profile document is malformed. Fatal: no run is executed.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field '{field}'")]
    MissingField { field: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Unknown type '{kind}' for run '{run}' (expected 'attack' or 'benign')")]
    UnknownRunKind { run: String, kind: String },

    #[error("Duplicate run id '{id}'")]
    DuplicateRunId { id: String },

    #[error("Failed to parse {format} document {path:?}: {message}")]
    Parse {
        path: PathBuf,
        format: &'static str,
        message: String,
    },

    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ValidationError {
    pub fn missing(field: impl Into<String>) -> Self {
        ValidationError::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A `_PLACEHOLDER` value could not be turned into a concrete value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderError {
    #[error("Unresolved placeholder '{raw}' for '{key}': no answer supplied and no default")]
    Unresolved { key: String, raw: String },

    #[error("Resolution of placeholder for '{key}' was cancelled by the operator")]
    Cancelled { key: String },

    #[error("Failed to read answer for '{key}': {message}")]
    Input { key: String, message: String },
}

impl PlaceholderError {
    pub fn key(&self) -> &str {
        match self {
            PlaceholderError::Unresolved { key, .. }
            | PlaceholderError::Cancelled { key }
            | PlaceholderError::Input { key, .. } => key,
        }
    }
}

/// The run could not be brought to the `Running` state. Fatal for that run only.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Script not found: {0:?}")]
    ScriptNotFound(PathBuf),

    #[error("Script path is not a file: {0:?}")]
    ScriptNotAFile(PathBuf),

    #[error("Script is not executable: {0:?} (fix with: chmod +x)")]
    ScriptNotExecutable(PathBuf),

    #[error("Profile not found: {0:?}")]
    ProfileNotFound(PathBuf),

    #[error("Invalid profile {path:?}: {message}")]
    ProfileInvalid { path: PathBuf, message: String },

    #[error("Interpreter '{runtime}' not found in PATH")]
    InterpreterNotFound { runtime: String },

    #[error("Invalid environment entry '{key}': {reason}")]
    InvalidEnvironment { key: String, reason: String },

    #[error("Failed to prepare output directory {path:?}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn {path:?}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LaunchError {
    /// Stable machine-readable reason written to `failure_reason` in run metadata.
    pub fn reason(&self) -> &'static str {
        match self {
            LaunchError::ScriptNotFound(_) => "script_not_found",
            LaunchError::ScriptNotAFile(_) => "script_not_a_file",
            LaunchError::ScriptNotExecutable(_) => "script_not_executable",
            LaunchError::ProfileNotFound(_) => "profile_not_found",
            LaunchError::ProfileInvalid { .. } => "profile_invalid",
            LaunchError::InterpreterNotFound { .. } => "interpreter_not_found",
            LaunchError::InvalidEnvironment { .. } => "invalid_environment",
            LaunchError::OutputDir { .. } => "output_dir_failed",
            LaunchError::Spawn { .. } => "spawn_failed",
        }
    }
}

/// Persisting run or scenario metadata failed.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize metadata: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type aliases for convenience
pub type ValidationResult<T> = Result<T, ValidationError>;
pub type LaunchResult<T> = Result<T, LaunchError>;
pub type RecordResult<T> = Result<T, RecordError>;
