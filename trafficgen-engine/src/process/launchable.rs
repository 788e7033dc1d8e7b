//! Launch target selection.
//!
//! The suffix of a script decides how it is started. `.py` scripts run under
//! `python3`; everything else (shell scripts, extensionless scripts, compiled
//! binaries) is executed directly and relies on its shebang or file format.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use nix::unistd::{AccessFlags, access};
use tokio::process::Command;

use trafficgen_shared::errors::{LaunchError, LaunchResult};

/// Interpreter used for `.py` scripts
pub const PYTHON_RUNTIME: &str = "python3";

/// How a run's script is started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launchable {
    Direct { script: PathBuf },
    Interpreted { runtime: String, script: PathBuf },
}

impl Launchable {
    /// Pick the launch target from the script's suffix. Performs no I/O.
    pub fn for_script(script: &Path) -> Self {
        let suffix = script
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match suffix.as_deref() {
            Some("py") => Launchable::Interpreted {
                runtime: PYTHON_RUNTIME.to_string(),
                script: script.to_path_buf(),
            },
            _ => Launchable::Direct {
                script: script.to_path_buf(),
            },
        }
    }

    /// Check that `script` can be launched and pick its launch target.
    pub fn preflight(script: &Path) -> LaunchResult<Self> {
        let metadata = match std::fs::metadata(script) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LaunchError::ScriptNotFound(script.to_path_buf()));
            }
            Err(e) => {
                return Err(LaunchError::Spawn {
                    path: script.to_path_buf(),
                    source: e,
                });
            }
        };

        if !metadata.is_file() {
            return Err(LaunchError::ScriptNotAFile(script.to_path_buf()));
        }
        if access(script, AccessFlags::X_OK).is_err() {
            return Err(LaunchError::ScriptNotExecutable(script.to_path_buf()));
        }

        let launchable = Self::for_script(script);
        if let Some(runtime) = launchable.runtime() {
            if find_in_path(runtime).is_none() {
                return Err(LaunchError::InterpreterNotFound {
                    runtime: runtime.to_string(),
                });
            }
        }

        Ok(launchable)
    }

    pub fn script(&self) -> &Path {
        match self {
            Launchable::Direct { script } | Launchable::Interpreted { script, .. } => script,
        }
    }

    pub fn runtime(&self) -> Option<&str> {
        match self {
            Launchable::Direct { .. } => None,
            Launchable::Interpreted { runtime, .. } => Some(runtime),
        }
    }

    /// Program and arguments, for display and metadata.
    pub fn command_line(&self) -> Vec<String> {
        match self {
            Launchable::Direct { script } => vec![script.to_string_lossy().into_owned()],
            Launchable::Interpreted { runtime, script } => {
                vec![runtime.clone(), script.to_string_lossy().into_owned()]
            }
        }
    }

    /// A command ready for environment and stdio configuration.
    pub fn command(&self) -> Command {
        match self {
            Launchable::Direct { script } => Command::new(script),
            Launchable::Interpreted { runtime, script } => {
                let mut command = Command::new(runtime);
                command.arg(OsString::from(script.as_os_str()));
                command
            }
        }
    }
}

/// Locate an executable named `program` on `PATH`.
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file() && access(candidate.as_path(), AccessFlags::X_OK).is_ok())
}
