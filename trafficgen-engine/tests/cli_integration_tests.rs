//! Integration tests for the `trafficgen` binary.
//!
//! These tests verify command line parsing, exit codes and the split between
//! report output on stdout and logs on stderr.

use anyhow::Result;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

fn trafficgen(args: &[&str], cwd: &Path) -> Result<Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_trafficgen"))
        .args(args)
        .current_dir(cwd)
        .env_remove("TRAFFICGEN_WORKSPACE")
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .output()?;
    Ok(output)
}

fn write_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Scenario with markers disabled so the tests don't need a listener
fn write_scenario(dir: &Path, runs: &str) -> Result<PathBuf> {
    let path = dir.join("scenario.yaml");
    fs::write(
        &path,
        format!(
            "scenario:\n  name: cli\n  markers:\n    enabled: false\nruns:\n{}",
            runs
        ),
    )?;
    Ok(path)
}

#[test]
fn test_cli_help_works() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = trafficgen(&["run", "--help"], temp_dir.path())?;

    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--workspace"));
    assert!(stdout.contains("--set"));
    assert!(stdout.contains("--non-interactive"));
    assert!(stdout.contains("--fail-fast"));

    Ok(())
}

#[test]
fn test_cli_version_works() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = trafficgen(&["--version"], temp_dir.path())?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));

    Ok(())
}

#[test]
fn test_invalid_arguments_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = trafficgen(
        &["run", "scenario.yaml", "--marker-port", "0"],
        temp_dir.path(),
    )?;

    assert!(!output.status.success());
    Ok(())
}

#[test]
fn test_malformed_set_is_config_error() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = trafficgen(
        &["validate", "scenario.yaml", "--set", "NO_EQUALS_SIGN"],
        temp_dir.path(),
    )?;

    assert_eq!(output.status.code(), Some(2));
    Ok(())
}

#[test]
fn test_invalid_scenario_exits_with_two() -> Result<()> {
    let temp_dir = TempDir::new()?;
    fs::write(temp_dir.path().join("scenario.yaml"), "scenario:\n  name: x\nruns: []\n")?;

    let output = trafficgen(&["run", "scenario.yaml"], temp_dir.path())?;

    assert_eq!(output.status.code(), Some(2));
    assert!(!temp_dir.path().join("runs").exists());
    Ok(())
}

#[test]
fn test_validate_prints_plan_without_side_effects() -> Result<()> {
    let temp_dir = TempDir::new()?;
    write_script(temp_dir.path(), "flood.sh", "exit 0")?;
    write_scenario(
        temp_dir.path(),
        "  - id: flood\n    type: attack\n    script: flood.sh\n    env:\n      TARGET_IP: TARGET_IP_PLACEHOLDER\n",
    )?;

    let output = trafficgen(
        &["validate", "scenario.yaml", "--set", "TARGET_IP=10.9.9.9"],
        temp_dir.path(),
    )?;

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("TARGET_IP=10.9.9.9"));
    assert!(stdout.contains("flood.sh"));
    assert!(!temp_dir.path().join("runs").exists());

    Ok(())
}

#[test]
fn test_validate_reports_unlaunchable_runs() -> Result<()> {
    let temp_dir = TempDir::new()?;
    write_scenario(
        temp_dir.path(),
        "  - id: gone\n    type: attack\n    script: gone.sh\n",
    )?;

    let output = trafficgen(&["validate", "scenario.yaml"], temp_dir.path())?;

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("NOT LAUNCHABLE (script_not_found)"));

    Ok(())
}

#[test]
fn test_run_exit_code_follows_first_failure() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let workspace = temp_dir.path().join("ws");
    write_script(temp_dir.path(), "ok.sh", "echo fine")?;
    write_script(temp_dir.path(), "bad.sh", "exit 7")?;
    write_scenario(
        temp_dir.path(),
        "  - id: ok\n    type: benign\n    script: ok.sh\n  - id: bad\n    type: attack\n    script: bad.sh\n",
    )?;

    let output = trafficgen(
        &["run", "scenario.yaml", "--workspace", workspace.to_str().unwrap_or("ws")],
        temp_dir.path(),
    )?;

    assert_eq!(output.status.code(), Some(7));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Scenario metadata:"));

    let runs = fs::read_dir(workspace.join("runs"))?.count();
    assert_eq!(runs, 2);
    assert!(workspace.join(".trafficgen").is_dir());

    Ok(())
}

#[test]
fn test_non_interactive_run_without_answer_fails_run() -> Result<()> {
    let temp_dir = TempDir::new()?;
    write_script(temp_dir.path(), "flood.sh", "exit 0")?;
    write_scenario(
        temp_dir.path(),
        "  - id: flood\n    type: attack\n    script: flood.sh\n    env:\n      TARGET_IP: TARGET_IP_PLACEHOLDER\n",
    )?;

    let output = trafficgen(&["run", "scenario.yaml", "--non-interactive"], temp_dir.path())?;

    assert_eq!(output.status.code(), Some(1));
    let run_dir = fs::read_dir(temp_dir.path().join("runs"))?
        .next()
        .expect("one run directory")?
        .path();
    let metadata = fs::read_to_string(run_dir.join("run_metadata.json"))?;
    assert!(metadata.contains("unresolved_placeholder"));

    Ok(())
}
