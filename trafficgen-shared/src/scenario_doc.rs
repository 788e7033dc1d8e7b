//! Scenario document parsing.
//!
//! Documents are deserialized into loose intermediate structs first so that
//! every missing or malformed field can be reported by name, then validated
//! into a [`Scenario`].
//!
//! # Example Scenario File
//!
//! ```yaml
//! scenario:
//!   name: mqtt-flood
//!   description: MQTT publish flood against the lab broker
//!   markers:
//!     enabled: true
//!     host: 127.0.0.1
//!     port: 55556
//! runs:
//!   - id: flood
//!     type: attack
//!     script: ../scripts/attacks/mqtt_flood.py
//!     profile: ../profiles/mqtt_flood.yaml
//!     env:
//!       TARGET_IP: TARGET_IP_PLACEHOLDER
//!       DURATION_SECONDS: 60_PLACEHOLDER
//! ```
//!
//! Relative `script` and `profile` paths are resolved against the directory
//! containing the scenario document, never against the working directory.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::document::{DocumentFormat, ScalarValue, parse_document};
use crate::errors::{ValidationError, ValidationResult};
use crate::scenario::{MarkerSettings, OutputMode, Run, RunKind, Scenario};

/// Intermediate struct for deserialization of a scenario file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioFile {
    pub scenario: Option<ScenarioHeaderDoc>,
    pub runs: Option<Vec<RunDoc>>,
}

/// The `scenario:` block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioHeaderDoc {
    pub name: Option<ScalarValue>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub markers: Option<MarkersDoc>,
}

/// The `scenario.markers:` block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarkersDoc {
    pub enabled: Option<bool>,
    pub host: Option<String>,
    pub port: Option<ScalarValue>,
}

/// One entry of `runs:`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunDoc {
    pub id: Option<ScalarValue>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub label: Option<String>,
    pub script: Option<String>,
    pub profile: Option<String>,
    #[serde(default)]
    pub env: Option<BTreeMap<String, ScalarValue>>,
    pub output: Option<String>,
}

/// Parse a scenario file from disk.
///
/// The path is made absolute first so that the scenario stays relocatable
/// regardless of the working directory the engine later runs in.
pub fn parse_scenario_file(path: &Path) -> ValidationResult<Scenario> {
    let source_path = std::path::absolute(path).map_err(|source| ValidationError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let content =
        std::fs::read_to_string(&source_path).map_err(|source| ValidationError::Io {
            path: source_path.clone(),
            source,
        })?;

    parse_scenario_str(&content, DocumentFormat::from_path(&source_path), &source_path)
}

/// Parse scenario content that was read from `source_path`.
pub fn parse_scenario_str(
    content: &str,
    format: DocumentFormat,
    source_path: &Path,
) -> ValidationResult<Scenario> {
    let file: Option<ScenarioFile> = parse_document(content, format, source_path)?;
    let file = file.unwrap_or_default();
    let base_dir = source_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    file.into_scenario(&base_dir, source_path)
}

impl ScenarioFile {
    /// Validate and convert into a [`Scenario`], resolving paths against `base_dir`.
    pub fn into_scenario(self, base_dir: &Path, source_path: &Path) -> ValidationResult<Scenario> {
        let header = self
            .scenario
            .ok_or_else(|| ValidationError::missing("scenario"))?;

        let name = header
            .name
            .map(ScalarValue::into_string)
            .map(|n| n.trim().to_string())
            .ok_or_else(|| ValidationError::missing("scenario.name"))?;
        if name.is_empty() {
            return Err(ValidationError::invalid("scenario.name", "must not be empty"));
        }

        let markers = header.markers.unwrap_or_default().into_settings()?;

        let run_docs = self.runs.ok_or_else(|| ValidationError::missing("runs"))?;
        if run_docs.is_empty() {
            return Err(ValidationError::invalid(
                "runs",
                "scenario must have at least one run",
            ));
        }

        let mut seen = HashSet::new();
        let mut runs = Vec::with_capacity(run_docs.len());
        for (index, doc) in run_docs.into_iter().enumerate() {
            let run = doc.into_run(index, &name, base_dir)?;
            if !seen.insert(run.id.clone()) {
                return Err(ValidationError::DuplicateRunId { id: run.id });
            }
            runs.push(run);
        }

        Ok(Scenario {
            name,
            description: header.description.unwrap_or_default(),
            markers,
            runs,
            source_path: source_path.to_path_buf(),
        })
    }
}

impl MarkersDoc {
    fn into_settings(self) -> ValidationResult<MarkerSettings> {
        let defaults = MarkerSettings::default();

        let port = match self.port {
            None | Some(ScalarValue::Null) => defaults.port,
            Some(ScalarValue::Integer(port)) => u16::try_from(port)
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| {
                    ValidationError::invalid("scenario.markers.port", format!("{} is out of range", port))
                })?,
            Some(ScalarValue::String(raw)) => raw
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| {
                    ValidationError::invalid("scenario.markers.port", format!("'{}' is not a port", raw))
                })?,
            Some(other) => {
                return Err(ValidationError::invalid(
                    "scenario.markers.port",
                    format!("'{}' is not a port", other.into_string()),
                ));
            }
        };

        let host = match self.host {
            Some(host) if host.trim().is_empty() => {
                return Err(ValidationError::invalid(
                    "scenario.markers.host",
                    "must not be empty",
                ));
            }
            Some(host) => host.trim().to_string(),
            None => defaults.host,
        };

        Ok(MarkerSettings {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            host,
            port,
        })
    }
}

impl RunDoc {
    fn into_run(self, index: usize, scenario_name: &str, base_dir: &Path) -> ValidationResult<Run> {
        let field = |name: &str| format!("runs[{}].{}", index, name);

        let id = self
            .id
            .map(ScalarValue::into_string)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ValidationError::missing(field("id")))?;

        let script = self
            .script
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ValidationError::missing(field("script")))?;

        let raw_kind = self
            .kind
            .ok_or_else(|| ValidationError::missing(field("type")))?;
        let kind = raw_kind
            .parse::<RunKind>()
            .map_err(|kind| ValidationError::UnknownRunKind {
                run: id.clone(),
                kind,
            })?;

        let output = match self.output {
            Some(raw) => raw
                .parse::<OutputMode>()
                .map_err(|mode| {
                    ValidationError::invalid(
                        field("output"),
                        format!("'{}' (expected 'capture' or 'inherit')", mode),
                    )
                })?,
            None => OutputMode::default(),
        };

        let mut env = BTreeMap::new();
        for (key, value) in self.env.unwrap_or_default() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(ValidationError::invalid(
                    field("env"),
                    format!("'{}' is not a valid variable name", key),
                ));
            }
            env.insert(key, value.into_string());
        }

        Ok(Run {
            id,
            kind,
            label: self
                .label
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| scenario_name.to_string()),
            script_path: resolve_relative(base_dir, &script),
            profile_path: self
                .profile
                .filter(|p| !p.trim().is_empty())
                .map(|p| resolve_relative(base_dir, &p)),
            env,
            output,
        })
    }
}

/// Resolve `raw` against `base_dir` unless it is already absolute.
pub fn resolve_relative(base_dir: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw.trim());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const YAML_SCENARIO: &str = r#"
scenario:
  name: syn-flood
  description: SYN flood against the lab web server
  markers:
    host: 10.0.0.1
    port: 6000
runs:
  - id: flood
    type: attack
    script: ../scripts/syn_flood.sh
    profile: profiles/fast.yaml
    env:
      TARGET_IP: TARGET_IP_PLACEHOLDER
      DURATION_SECONDS: 30
  - id: background
    type: benign
    label: idle
    script: /opt/scripts/idle.py
    output: inherit
"#;

    fn parse_yaml(content: &str) -> ValidationResult<Scenario> {
        parse_scenario_str(
            content,
            DocumentFormat::Yaml,
            Path::new("/lab/scenarios/syn.yaml"),
        )
    }

    #[test]
    fn test_parse_yaml_scenario() {
        let scenario = parse_yaml(YAML_SCENARIO).unwrap();

        assert_eq!(scenario.name, "syn-flood");
        assert_eq!(scenario.markers.host, "10.0.0.1");
        assert_eq!(scenario.markers.port, 6000);
        assert!(scenario.markers.enabled);
        assert_eq!(scenario.run_count(), 2);

        let flood = scenario.run("flood").unwrap();
        assert_eq!(flood.kind, RunKind::Attack);
        assert_eq!(flood.label, "syn-flood"); // defaults to scenario name
        assert_eq!(
            flood.script_path,
            PathBuf::from("/lab/scenarios/../scripts/syn_flood.sh")
        );
        assert_eq!(
            flood.profile_path,
            Some(PathBuf::from("/lab/scenarios/profiles/fast.yaml"))
        );
        assert_eq!(flood.env["DURATION_SECONDS"], "30");
        assert_eq!(flood.output, OutputMode::Capture);

        let background = scenario.run("background").unwrap();
        assert_eq!(background.kind, RunKind::Benign);
        assert_eq!(background.label, "idle");
        assert_eq!(background.script_path, PathBuf::from("/opt/scripts/idle.py"));
        assert!(background.profile_path.is_none());
        assert_eq!(background.output, OutputMode::Inherit);
    }

    #[test]
    fn test_parse_json5_scenario() {
        let content = r#"{
            scenario: { name: "dns-beacon", markers: { enabled: false } },
            runs: [
                { id: 1, type: "attack", script: "beacon.sh", env: { INTERVAL: 5 } },
            ],
        }"#;

        let scenario = parse_scenario_str(
            content,
            DocumentFormat::Json5,
            Path::new("/lab/dns.json5"),
        )
        .unwrap();

        assert_eq!(scenario.name, "dns-beacon");
        assert!(!scenario.markers.enabled);
        assert_eq!(scenario.markers.port, 55556);
        assert_eq!(scenario.runs[0].id, "1");
        assert_eq!(scenario.runs[0].env["INTERVAL"], "5");
        assert_eq!(scenario.runs[0].script_path, PathBuf::from("/lab/beacon.sh"));
    }

    #[test]
    fn test_missing_fields_are_named() {
        let cases = [
            ("runs: []\n", "scenario"),
            ("scenario:\n  description: x\nruns: []\n", "scenario.name"),
            ("scenario:\n  name: x\n", "runs"),
            (
                "scenario:\n  name: x\nruns:\n  - type: attack\n    script: a.sh\n",
                "runs[0].id",
            ),
            (
                "scenario:\n  name: x\nruns:\n  - id: a\n    type: attack\n",
                "runs[0].script",
            ),
            (
                "scenario:\n  name: x\nruns:\n  - id: a\n    script: a.sh\n",
                "runs[0].type",
            ),
        ];

        for (content, field) in cases {
            let err = parse_yaml(content).unwrap_err();
            assert!(
                err.to_string().contains(field),
                "expected error naming '{}', got: {}",
                field,
                err
            );
        }
    }

    #[test]
    fn test_empty_runs_rejected() {
        let err = parse_yaml("scenario:\n  name: x\nruns: []\n").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { .. }));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = parse_yaml("scenario:\n  name: x\nruns:\n  - id: a\n    type: recon\n    script: a.sh\n")
            .unwrap_err();
        match err {
            ValidationError::UnknownRunKind { run, kind } => {
                assert_eq!(run, "a");
                assert_eq!(kind, "recon");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_duplicate_run_ids_rejected() {
        let content = "scenario:\n  name: x\nruns:\n  - id: a\n    type: attack\n    script: a.sh\n  - id: a\n    type: benign\n    script: b.sh\n";
        let err = parse_yaml(content).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateRunId { id } if id == "a"));
    }

    #[test]
    fn test_invalid_marker_port_rejected() {
        let content = "scenario:\n  name: x\n  markers:\n    port: 70000\nruns:\n  - id: a\n    type: attack\n    script: a.sh\n";
        let err = parse_yaml(content).unwrap_err();
        assert!(err.to_string().contains("scenario.markers.port"));
    }

    #[test]
    fn test_empty_document_reports_missing_scenario() {
        let err = parse_yaml("").unwrap_err();
        assert!(err.to_string().contains("scenario"));
    }

    #[test]
    fn test_parse_scenario_file_resolves_against_file_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("bundle");
        fs::create_dir_all(&nested).unwrap();
        fs::write(
            nested.join("scenario.yaml"),
            "scenario:\n  name: relocatable\nruns:\n  - id: a\n    type: benign\n    script: run.sh\n",
        )
        .unwrap();

        let scenario = parse_scenario_file(&nested.join("scenario.yaml")).unwrap();
        assert_eq!(scenario.runs[0].script_path, nested.join("run.sh"));
        assert_eq!(scenario.source_path, nested.join("scenario.yaml"));
    }

    #[test]
    fn test_parse_missing_file() {
        let err = parse_scenario_file(Path::new("/nonexistent/scenario.yaml")).unwrap_err();
        assert!(matches!(err, ValidationError::Io { .. }));
    }
}
