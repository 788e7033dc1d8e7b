//! CLI argument parsing for the trafficgen engine.
//!
//! This module handles command line argument parsing using clap and provides
//! a structured representation of CLI configuration that can be used by
//! other configuration components.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Arg, ArgMatches, Command};

/// Which top-level command was invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliCommand {
    Run,
    Validate,
}

/// CLI configuration structure containing all parsed command line arguments
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub command: CliCommand,
    pub scenario: PathBuf,
    pub workspace: Option<PathBuf>,
    /// Raw `KEY=VALUE` answers, in command-line order
    pub set: Vec<String>,
    pub answers_file: Option<PathBuf>,
    pub non_interactive: bool,
    pub fail_fast: bool,
    pub deadline_is_failure: bool,
    pub success_codes: Vec<i32>,
    pub grace_seconds: u64,
    pub marker_host: Option<String>,
    pub marker_port: Option<u16>,
    pub no_markers: bool,
    pub verbose: bool,
    pub quiet: bool,
}

impl CliConfig {
    /// Parse CLI arguments and create CliConfig
    pub fn from_args() -> Result<Self> {
        let matches = Self::build_cli().get_matches();
        Self::from_matches(&matches)
    }

    /// Create CliConfig from pre-parsed ArgMatches (useful for testing)
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let (command, sub) = match matches.subcommand() {
            Some(("run", sub)) => (CliCommand::Run, sub),
            Some(("validate", sub)) => (CliCommand::Validate, sub),
            Some((other, _)) => return Err(anyhow::anyhow!("Unknown command '{}'", other)),
            None => return Err(anyhow::anyhow!("A command is required: run or validate")),
        };

        let scenario = sub
            .get_one::<PathBuf>("scenario")
            .ok_or_else(|| anyhow::anyhow!("Scenario path is required"))?
            .clone();

        let set: Vec<String> = sub
            .get_many::<String>("set")
            .map(|vals| vals.cloned().collect())
            .unwrap_or_default();

        let success_codes: Vec<i32> = sub
            .get_many::<i32>("success-code")
            .map(|vals| vals.copied().collect())
            .unwrap_or_else(|| vec![0]);

        let grace_seconds = sub
            .get_one::<u64>("grace-seconds")
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Grace period is required"))?;

        Ok(Self {
            command,
            scenario,
            workspace: sub.get_one::<PathBuf>("workspace").cloned(),
            set,
            answers_file: sub.get_one::<PathBuf>("answers").cloned(),
            non_interactive: sub.get_flag("non-interactive"),
            fail_fast: sub.get_flag("fail-fast"),
            deadline_is_failure: sub.get_flag("deadline-is-failure"),
            success_codes,
            grace_seconds,
            marker_host: sub.get_one::<String>("marker-host").cloned(),
            marker_port: sub.get_one::<u16>("marker-port").copied(),
            no_markers: sub.get_flag("no-markers"),
            verbose: sub.get_flag("verbose"),
            quiet: sub.get_flag("quiet"),
        })
    }

    /// Build the clap Command structure
    pub fn build_cli() -> Command {
        Command::new("trafficgen")
            .version(env!("CARGO_PKG_VERSION"))
            .about("trafficgen - Labeled network traffic generation")
            .long_about("Runs traffic generation scenarios: launches attack and benign scripts \
                       in order, brackets each run with UDP ground-truth markers and records \
                       per-run metadata for dataset labeling.")
            .subcommand_required(true)
            .arg_required_else_help(true)
            .subcommand(
                Self::with_common_args(
                    Command::new("run")
                        .about("Execute every run of a scenario")
                        .long_about("Execute every run of a scenario in document order. Each run gets \
                                   its own directory under <workspace>/runs/ with run_metadata.json, \
                                   execution.log and an outputs/ directory."),
                ),
            )
            .subcommand(
                Self::with_common_args(
                    Command::new("validate")
                        .about("Check a scenario without launching anything")
                        .long_about("Resolve placeholders, load profiles and check scripts for every run, \
                                   then print the command line and environment each run would get. \
                                   No directory is created, no process is spawned and no marker is sent."),
                ),
            )
    }

    fn with_common_args(command: Command) -> Command {
        command
            .arg(
                Arg::new("scenario")
                    .value_name("SCENARIO")
                    .value_parser(clap::value_parser!(PathBuf))
                    .required(true)
                    .help("Scenario document (.yaml, .yml, .json5 or .json)"),
            )
            .arg(
                Arg::new("workspace")
                    .short('w')
                    .long("workspace")
                    .value_name("DIRECTORY")
                    .value_parser(clap::value_parser!(PathBuf))
                    .help("Root directory for run output and metadata")
                    .long_help("Root directory for run output and metadata. Defaults to \
                              $TRAFFICGEN_WORKSPACE, then to the current directory."),
            )
            .arg(
                Arg::new("set")
                    .long("set")
                    .value_name("KEY=VALUE")
                    .action(clap::ArgAction::Append)
                    .help("Answer a placeholder without prompting")
                    .long_help("Answer the placeholder of environment key KEY with VALUE. \
                              Can be specified multiple times. Takes priority over --answers. \
                              Any answer disables interactive prompting."),
            )
            .arg(
                Arg::new("answers")
                    .long("answers")
                    .value_name("FILE")
                    .value_parser(clap::value_parser!(PathBuf))
                    .help("YAML or JSON5 file mapping placeholder keys to answers"),
            )
            .arg(
                Arg::new("non-interactive")
                    .long("non-interactive")
                    .action(clap::ArgAction::SetTrue)
                    .help("Never prompt; unresolved placeholders fail the run")
                    .long_help("Never prompt. Placeholders fall back to their embedded default; \
                              a placeholder without one fails its run. Implied when stdin is not a terminal."),
            )
            .arg(
                Arg::new("fail-fast")
                    .long("fail-fast")
                    .action(clap::ArgAction::SetTrue)
                    .help("Stop after the first failed run"),
            )
            .arg(
                Arg::new("deadline-is-failure")
                    .long("deadline-is-failure")
                    .action(clap::ArgAction::SetTrue)
                    .help("Record runs stopped by DURATION_SECONDS as failures")
                    .long_help("Record runs stopped by their DURATION_SECONDS bound as failures. \
                              By default reaching the duration bound is a successful timeout."),
            )
            .arg(
                Arg::new("success-code")
                    .long("success-code")
                    .value_name("CODE")
                    .value_parser(clap::value_parser!(i32))
                    .action(clap::ArgAction::Append)
                    .help("Exit code treated as success (repeatable, default 0)"),
            )
            .arg(
                Arg::new("grace-seconds")
                    .long("grace-seconds")
                    .value_name("SECONDS")
                    .value_parser(clap::value_parser!(u64))
                    .default_value("10")
                    .help("Time between a forwarded signal and SIGKILL"),
            )
            .arg(
                Arg::new("marker-host")
                    .long("marker-host")
                    .value_name("HOST")
                    .help("Override the scenario's marker destination host"),
            )
            .arg(
                Arg::new("marker-port")
                    .long("marker-port")
                    .value_name("PORT")
                    .value_parser(clap::value_parser!(u16).range(1..))
                    .help("Override the scenario's marker destination port"),
            )
            .arg(
                Arg::new("no-markers")
                    .long("no-markers")
                    .action(clap::ArgAction::SetTrue)
                    .help("Do not send ground-truth markers"),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .action(clap::ArgAction::SetTrue)
                    .conflicts_with("quiet")
                    .help("Enable verbose logging")
                    .long_help("Enable verbose debug logging, including captured subprocess output lines."),
            )
            .arg(
                Arg::new("quiet")
                    .short('q')
                    .long("quiet")
                    .action(clap::ArgAction::SetTrue)
                    .help("Only log errors"),
            )
    }

    /// Validate CLI configuration
    pub fn validate(&self) -> Result<()> {
        for entry in &self.set {
            match entry.split_once('=') {
                Some((key, _)) if !key.trim().is_empty() => {}
                _ => {
                    return Err(anyhow::anyhow!(
                        "Invalid --set '{}'. Expected KEY=VALUE",
                        entry
                    ));
                }
            }
        }

        if self.success_codes.is_empty() {
            return Err(anyhow::anyhow!("At least one success code is required"));
        }

        if self
            .marker_host
            .as_deref()
            .is_some_and(|host| host.trim().is_empty())
        {
            return Err(anyhow::anyhow!("Marker host cannot be empty"));
        }

        Ok(())
    }
}
