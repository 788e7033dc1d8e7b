//! Environment Builder.
//!
//! Composes the entries the engine sets for a run's subprocess. Precedence,
//! highest first: engine identifiers (`RUN_ID`, `OUT_DIR`), the run's resolved
//! `env` block, the profile's `tool_args` as `TOOL_ARGS`. The child inherits the
//! engine's own environment underneath these entries.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use duration_string::DurationString;
use tracing::warn;

use trafficgen_shared::errors::{LaunchError, LaunchResult};

pub const RUN_ID: &str = "RUN_ID";
pub const OUT_DIR: &str = "OUT_DIR";
pub const TOOL_ARGS: &str = "TOOL_ARGS";
pub const DURATION_SECONDS: &str = "DURATION_SECONDS";

/// Keys searched for the marker `target_ip`, in order
pub const TARGET_KEYS: [&str; 3] = ["TARGET_IP", "TARGET_HOST", "TARGET"];

/// Typed, ordered environment of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunEnvironment {
    entries: BTreeMap<String, String>,
}

impl RunEnvironment {
    /// Merge the layers for one run. Every entry is validated.
    pub fn build(
        run_id: &str,
        out_dir: &Path,
        run_env: &BTreeMap<String, String>,
        tool_args: Option<&str>,
    ) -> LaunchResult<Self> {
        let mut entries = BTreeMap::new();

        if let Some(tool_args) = tool_args {
            entries.insert(TOOL_ARGS.to_string(), tool_args.to_string());
        }
        for (key, value) in run_env {
            entries.insert(key.clone(), value.clone());
        }
        entries.insert(RUN_ID.to_string(), run_id.to_string());
        entries.insert(
            OUT_DIR.to_string(),
            out_dir.to_string_lossy().into_owned(),
        );

        for (key, value) in &entries {
            validate_entry(key, value)?;
        }

        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pairs handed to the process spawner.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// First non-empty value of [`TARGET_KEYS`].
    pub fn target_ip(&self) -> Option<&str> {
        TARGET_KEYS
            .iter()
            .filter_map(|key| self.get(key))
            .find(|value| !value.trim().is_empty())
    }

    /// Duration bound from `DURATION_SECONDS`, if present and usable.
    pub fn duration_bound(&self) -> Option<Duration> {
        let raw = self.get(DURATION_SECONDS)?;
        match parse_duration_bound(raw) {
            Ok(bound) => bound,
            Err(e) => {
                warn!("Ignoring {}: {}", DURATION_SECONDS, e);
                None
            }
        }
    }
}

/// Integer seconds or a duration string such as `90s` or `2m`. Zero means unbounded.
pub fn parse_duration_bound(raw: &str) -> Result<Option<Duration>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let bound = match raw.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => {
            let parsed: DurationString = raw
                .parse()
                .map_err(|e| format!("invalid duration '{}': {}", raw, e))?;
            parsed.into()
        }
    };

    Ok((!bound.is_zero()).then_some(bound))
}

fn validate_entry(key: &str, value: &str) -> LaunchResult<()> {
    let invalid = |reason: &str| LaunchError::InvalidEnvironment {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("empty key"));
    }
    if key.contains('=') {
        return Err(invalid("key contains '='"));
    }
    if key.contains('\0') {
        return Err(invalid("key contains NUL"));
    }
    if value.contains('\0') {
        return Err(invalid("value contains NUL"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_precedence() {
        let run_env = env(&[
            ("TOOL_ARGS", "-p 443"),
            ("RUN_ID", "spoofed"),
            ("TARGET_IP", "10.0.0.5"),
        ]);
        let environment = RunEnvironment::build(
            "scan_a_20240501_100000",
            &PathBuf::from("/w/runs/x/outputs"),
            &run_env,
            Some("-p 80"),
        )
        .unwrap();

        assert_eq!(environment.get(RUN_ID), Some("scan_a_20240501_100000"));
        assert_eq!(environment.get(OUT_DIR), Some("/w/runs/x/outputs"));
        assert_eq!(environment.get(TOOL_ARGS), Some("-p 443"));
        assert_eq!(environment.get("TARGET_IP"), Some("10.0.0.5"));
        assert_eq!(environment.len(), 4);
    }

    #[test]
    fn test_tool_args_from_profile() {
        let environment =
            RunEnvironment::build("id", Path::new("/o"), &BTreeMap::new(), Some("-sS")).unwrap();
        assert_eq!(environment.get(TOOL_ARGS), Some("-sS"));

        let environment =
            RunEnvironment::build("id", Path::new("/o"), &BTreeMap::new(), None).unwrap();
        assert_eq!(environment.get(TOOL_ARGS), None);
    }

    #[test]
    fn test_invalid_entries_rejected() {
        let err = RunEnvironment::build("id", Path::new("/o"), &env(&[("A=B", "x")]), None)
            .unwrap_err();
        assert_eq!(err.reason(), "invalid_environment");

        let err = RunEnvironment::build("id", Path::new("/o"), &env(&[("A", "x\0y")]), None)
            .unwrap_err();
        assert_eq!(err.reason(), "invalid_environment");
    }

    #[test]
    fn test_deterministic_apart_from_run_keys() {
        let run_env = env(&[("B", "2"), ("A", "1")]);
        let first = RunEnvironment::build("id1", Path::new("/o1"), &run_env, Some("x")).unwrap();
        let second = RunEnvironment::build("id2", Path::new("/o2"), &run_env, Some("x")).unwrap();
        let stable = |run_env: &RunEnvironment| {
            run_env
                .pairs()
                .filter(|(key, _)| *key != RUN_ID && *key != OUT_DIR)
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>()
        };

        assert_ne!(first, second);
        assert_eq!(stable(&first), stable(&second));
        assert_eq!(
            stable(&first).iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            vec!["A", "B", "TOOL_ARGS"]
        );
    }

    #[test]
    fn test_target_ip_lookup_order() {
        let build = |pairs: &[(&str, &str)]| {
            RunEnvironment::build("id", Path::new("/o"), &env(pairs), None).unwrap()
        };

        assert_eq!(
            build(&[("TARGET", "c"), ("TARGET_HOST", "b"), ("TARGET_IP", "a")]).target_ip(),
            Some("a")
        );
        assert_eq!(
            build(&[("TARGET", "c"), ("TARGET_HOST", "b")]).target_ip(),
            Some("b")
        );
        assert_eq!(
            build(&[("TARGET_IP", ""), ("TARGET", "c")]).target_ip(),
            Some("c")
        );
        assert_eq!(build(&[]).target_ip(), None);
    }

    #[test]
    fn test_parse_duration_bound() {
        assert_eq!(parse_duration_bound("2"), Ok(Some(Duration::from_secs(2))));
        assert_eq!(parse_duration_bound(" 90s "), Ok(Some(Duration::from_secs(90))));
        assert_eq!(parse_duration_bound("2m"), Ok(Some(Duration::from_secs(120))));
        assert_eq!(parse_duration_bound("0"), Ok(None));
        assert_eq!(parse_duration_bound(""), Ok(None));
        assert!(parse_duration_bound("soon").is_err());
    }

    #[test]
    fn test_unparsable_duration_is_ignored() {
        let environment = RunEnvironment::build(
            "id",
            Path::new("/o"),
            &env(&[("DURATION_SECONDS", "forever")]),
            None,
        )
        .unwrap();
        assert_eq!(environment.duration_bound(), None);
    }
}
