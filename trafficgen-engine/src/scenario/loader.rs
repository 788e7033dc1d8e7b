//! Scenario Loader - reads one scenario document per invocation.
//!
//! Loading is pure: it parses and validates the document only. Whether a
//! run's script or profile exists is decided at launch time, so a missing
//! script fails that run instead of the whole scenario.

use std::path::Path;

use tracing::{debug, info, instrument};

use trafficgen_shared::errors::ValidationResult;
use trafficgen_shared::scenario::Scenario;
use trafficgen_shared::scenario_doc::parse_scenario_file;

/// Load and validate the scenario at `path`.
#[instrument(fields(path = %path.display()))]
pub fn load_scenario(path: &Path) -> ValidationResult<Scenario> {
    let scenario = parse_scenario_file(path)?;

    info!(
        "Loaded scenario '{}' with {} run(s) from {:?}",
        scenario.name,
        scenario.run_count(),
        scenario.source_path
    );
    for run in &scenario.runs {
        debug!(
            "  run '{}' ({}): {:?}{}",
            run.id,
            run.kind,
            run.script_path,
            run.profile_path
                .as_ref()
                .map(|p| format!(", profile {:?}", p))
                .unwrap_or_default()
        );
    }

    Ok(scenario)
}
