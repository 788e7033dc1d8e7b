//! Per-run context owned by the runner for the duration of one run.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use trafficgen_shared::errors::{RecordError, RecordResult};
use trafficgen_shared::scenario::Run;
use trafficgen_shared::time::{compact_stamp, utc_now};

use crate::environment::RunEnvironment;
use crate::placeholder::ResolvedPlaceholder;
use crate::profile_loader::LoadedProfile;
use crate::recorder::OUTPUTS_DIR;

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `<scenario>_<run>_<UTC %Y%m%d_%H%M%S>`, sanitized.
pub fn base_run_id(scenario_name: &str, run_id: &str, at: &DateTime<Utc>) -> String {
    sanitize_id(&format!("{}_{}_{}", scenario_name, run_id, compact_stamp(at)))
}

#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    /// Run id as written in the scenario
    pub run_id_base: String,
    pub run_dir: PathBuf,
    pub out_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub placeholders: Vec<ResolvedPlaceholder>,
    pub profile: Option<LoadedProfile>,
    pub environment: Option<RunEnvironment>,
}

impl RunContext {
    fn new(run: &Run, run_id: String, run_dir: PathBuf, started_at: DateTime<Utc>) -> Self {
        Self {
            out_dir: run_dir.join(OUTPUTS_DIR),
            run_id,
            run_id_base: run.id.clone(),
            run_dir,
            started_at,
            ended_at: None,
            placeholders: Vec::new(),
            profile: None,
            environment: None,
        }
    }

    /// Context for validation: paths are computed, nothing is created.
    pub fn planned(
        runs_dir: &Path,
        scenario_name: &str,
        run: &Run,
        started_at: DateTime<Utc>,
    ) -> Self {
        let run_id = base_run_id(scenario_name, &run.id, &started_at);
        let run_dir = runs_dir.join(&run_id);
        Self::new(run, run_id, run_dir, started_at)
    }

    /// Claim a fresh run directory under `runs_dir`.
    ///
    /// The directory is created exclusively; if it already exists a numeric
    /// suffix is appended to the run id until creation succeeds.
    pub fn allocate(
        runs_dir: &Path,
        scenario_name: &str,
        run: &Run,
        started_at: DateTime<Utc>,
    ) -> RecordResult<Self> {
        fs::create_dir_all(runs_dir).map_err(|source| RecordError::Io {
            path: runs_dir.to_path_buf(),
            source,
        })?;

        let base = base_run_id(scenario_name, &run.id, &started_at);
        let mut run_id = base.clone();
        let mut suffix = 1u32;
        loop {
            let run_dir = runs_dir.join(&run_id);
            match fs::create_dir(&run_dir) {
                Ok(()) => return Ok(Self::new(run, run_id, run_dir, started_at)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    run_id = format!("{}_{}", base, suffix);
                    suffix += 1;
                }
                Err(source) => {
                    return Err(RecordError::Io {
                        path: run_dir,
                        source,
                    });
                }
            }
        }
    }

    /// Stamp the end of the run. Idempotent.
    pub fn finish(&mut self) -> DateTime<Utc> {
        *self.ended_at.get_or_insert_with(utc_now)
    }

    pub fn duration_secs(&self) -> f64 {
        let ended_at = self.ended_at.unwrap_or(self.started_at);
        (ended_at - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}
