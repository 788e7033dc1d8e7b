//! Scenario Runner - sequences every component for each run of a scenario.
//!
//! Runs are executed strictly in document order, one at a time:
//!
//! ```text
//! resolve placeholders ─► preflight ─► profile ─► allocate run dir ─► environment
//!        ─► OUT_DIR ─► START marker ─► supervise ─► END marker ─► run_metadata.json
//! ```
//!
//! Any step before the START marker can fail the run; such runs are recorded
//! without markers. An interruption that lands before the START marker keeps
//! the run from launching at all. Either way the sequence stops after the
//! current run, and the scenario metadata is written regardless.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use trafficgen_shared::errors::{LaunchError, PlaceholderError, RecordError};
use trafficgen_shared::marker::MarkerEvent;
use trafficgen_shared::metadata::{
    BenignConfig, FailureKind, RunMetadata, RunOutcome, RunState, ScenarioInfo, ScenarioMetadata,
    TOOL_NAME,
};
use trafficgen_shared::scenario::{Run, RunKind, Scenario};
use trafficgen_shared::time::utc_now;

use super::context::RunContext;
use crate::environment::{RunEnvironment, TOOL_ARGS};
use crate::interrupt::{INTERRUPTED_EXIT_CODE, InterruptSignal, InterruptToken};
use crate::markers::{MarkerEmitter, MarkerOverrides};
use crate::placeholder::{AnswerSupplier, PlaceholderResolver, ResolvedPlaceholder};
use crate::process::{
    Launchable, ProcessReport, ProcessSpec, ProcessSupervisor, SupervisorConfig, Verdict,
};
use crate::profile_loader::{LoadedProfile, load_profile};
use crate::recorder::{ExecutionLog, RunRecorder};

/// Version written into every metadata document
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Why a run could not be brought up to launch
#[derive(Error, Debug)]
pub enum PrepareError {
    #[error(transparent)]
    Placeholder(#[from] PlaceholderError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Interrupted by {0} before launch")]
    Interrupted(InterruptSignal),
}

impl PrepareError {
    /// Stable machine-readable reason, as written to `failure_reason`.
    pub fn reason(&self) -> &'static str {
        match self {
            PrepareError::Placeholder(PlaceholderError::Unresolved { .. }) => {
                "unresolved_placeholder"
            }
            PrepareError::Placeholder(PlaceholderError::Cancelled { .. }) => "cancelled",
            PrepareError::Placeholder(PlaceholderError::Input { .. }) => "placeholder_input_failed",
            PrepareError::Launch(e) => e.reason(),
            PrepareError::Interrupted(_) => "interrupted",
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PrepareError::Placeholder(_) => FailureKind::Placeholder,
            PrepareError::Launch(_) | PrepareError::Interrupted(_) => FailureKind::Launch,
        }
    }

    /// The operator stopped the run before it launched.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PrepareError::Placeholder(PlaceholderError::Cancelled { .. })
                | PrepareError::Interrupted(_)
        )
    }
}

/// Runner settings derived from the application configuration
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    pub workspace: PathBuf,
    pub fail_fast: bool,
    pub supervisor: SupervisorConfig,
    pub markers: MarkerOverrides,
}

/// One attempted run, as recorded
#[derive(Debug, Clone)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub metadata_path: PathBuf,
}

/// Result of executing a scenario
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub scenario: String,
    pub runs: Vec<RunReport>,
    pub interrupted: bool,
    pub metadata_path: Option<PathBuf>,
}

impl ScenarioReport {
    pub fn succeeded(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| r.metadata.outcome.is_success())
            .count()
    }

    /// Process exit code for the whole execution.
    ///
    /// 0 when every attempted run succeeded, 130 when interrupted, otherwise
    /// the first failed run's exit code (1 when it had none or it does not
    /// fit an exit status).
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            return INTERRUPTED_EXIT_CODE;
        }

        match self
            .runs
            .iter()
            .find(|r| !r.metadata.outcome.is_success())
        {
            None => 0,
            Some(failed) => failed
                .metadata
                .exit_code
                .filter(|code| (1..=255).contains(code))
                .unwrap_or(1),
        }
    }
}

/// What validation found for one run
#[derive(Debug)]
pub struct RunPlan {
    pub run_id: String,
    pub run_id_base: String,
    pub kind: RunKind,
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub placeholders: Vec<ResolvedPlaceholder>,
    pub error: Option<PrepareError>,
}

impl RunPlan {
    pub fn is_launchable(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of validating a scenario
#[derive(Debug)]
pub struct ValidationReport {
    pub scenario: String,
    pub runs: Vec<RunPlan>,
    pub interrupted: bool,
}

impl ValidationReport {
    pub fn all_launchable(&self) -> bool {
        !self.interrupted && self.runs.iter().all(RunPlan::is_launchable)
    }

    /// 0 when every run is launchable, 130 when interrupted, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            INTERRUPTED_EXIT_CODE
        } else if self.all_launchable() {
            0
        } else {
            1
        }
    }

    /// Human-readable per-run summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Scenario '{}':", self.scenario);
        for plan in &self.runs {
            let _ = writeln!(out, "\n[{}] {} ({})", plan.run_id_base, plan.run_id, plan.kind);
            match &plan.error {
                None => {
                    let _ = writeln!(out, "  command: {}", plan.command.join(" "));
                    let _ = writeln!(out, "  environment:");
                    for (key, value) in &plan.environment {
                        let _ = writeln!(out, "    {}={}", key, value);
                    }
                }
                Some(e) => {
                    let _ = writeln!(out, "  NOT LAUNCHABLE ({}): {}", e.reason(), e);
                }
            }
        }
        if self.interrupted {
            let _ = writeln!(out, "\nValidation interrupted");
        }
        out
    }
}

/// What a run resolves to before it gets a directory
#[derive(Default)]
struct RunInputs {
    placeholders: Vec<ResolvedPlaceholder>,
    values: BTreeMap<String, String>,
    profile: Option<LoadedProfile>,
    tool_args: Option<String>,
}

/// How far a run got
enum Attempt {
    /// Preparation or spawn failed; no process ran
    NotLaunched(PrepareError),
    Ran {
        report: ProcessReport,
        verdict: Verdict,
    },
}

pub struct ScenarioRunner<S> {
    recorder: RunRecorder,
    supervisor: ProcessSupervisor,
    resolver: PlaceholderResolver<S>,
    interrupt: InterruptToken,
    fail_fast: bool,
    marker_overrides: MarkerOverrides,
}

impl<S: AnswerSupplier> ScenarioRunner<S> {
    pub fn new(
        config: RunnerConfig,
        supplier: S,
        interrupt: InterruptToken,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            recorder: RunRecorder::new(config.workspace),
            supervisor: ProcessSupervisor::new(config.supervisor)?,
            resolver: PlaceholderResolver::new(supplier)?,
            interrupt,
            fail_fast: config.fail_fast,
            marker_overrides: config.markers,
        })
    }

    /// Execute every run of `scenario` and write the scenario metadata.
    ///
    /// Only failures to persist metadata abort the scenario; everything else
    /// is recorded against the run it happened in.
    #[instrument(skip_all, fields(scenario = %scenario.name))]
    pub async fn execute(&mut self, scenario: &Scenario) -> Result<ScenarioReport, RecordError> {
        let emitter = MarkerEmitter::new(self.marker_overrides.apply(&scenario.markers));
        if emitter.is_enabled() {
            info!(
                "Executing scenario '{}' ({} run(s)), markers to {}",
                scenario.name,
                scenario.run_count(),
                emitter.settings().destination()
            );
        } else {
            info!(
                "Executing scenario '{}' ({} run(s)), markers disabled",
                scenario.name,
                scenario.run_count()
            );
        }

        let mut report = ScenarioReport {
            scenario: scenario.name.clone(),
            runs: Vec::new(),
            interrupted: false,
            metadata_path: None,
        };

        for (index, run) in scenario.runs.iter().enumerate() {
            if self.interrupt.is_interrupted() {
                warn!(
                    "Interrupted, skipping {} remaining run(s)",
                    scenario.runs.len() - index
                );
                report.interrupted = true;
                break;
            }

            info!(
                "Run {}/{}: '{}' ({})",
                index + 1,
                scenario.run_count(),
                run.id,
                run.kind
            );
            let run_report = self.execute_run(scenario, run, &emitter).await?;
            let state = run_report.metadata.state;
            report.runs.push(run_report);

            match state {
                RunState::Interrupted => {
                    report.interrupted = true;
                    break;
                }
                RunState::Failed if self.fail_fast => {
                    warn!("Fail-fast: stopping after failed run '{}'", run.id);
                    break;
                }
                _ => {}
            }
        }

        let metadata = ScenarioMetadata {
            tool: TOOL_NAME.to_string(),
            version: ENGINE_VERSION.to_string(),
            scenario: ScenarioInfo {
                name: scenario.name.clone(),
                description: scenario.description.clone(),
                source: scenario.source_path.clone(),
            },
            generated_at: utc_now(),
            interrupted: report.interrupted,
            runs: report
                .runs
                .iter()
                .map(|r| r.metadata.summary(&r.metadata_path))
                .collect(),
        };
        report.metadata_path = Some(self.recorder.record_scenario(&metadata)?);

        info!(
            "Scenario '{}' finished: {}/{} run(s) succeeded{}",
            scenario.name,
            report.succeeded(),
            report.runs.len(),
            if report.interrupted { " (interrupted)" } else { "" }
        );
        Ok(report)
    }

    /// Check every run without side effects beyond placeholder prompts.
    ///
    /// Creates no directory, spawns nothing and sends no marker.
    #[instrument(skip_all, fields(scenario = %scenario.name))]
    pub async fn validate(&mut self, scenario: &Scenario) -> ValidationReport {
        let runs_dir = self.recorder.runs_dir();
        let mut report = ValidationReport {
            scenario: scenario.name.clone(),
            runs: Vec::new(),
            interrupted: false,
        };

        for run in &scenario.runs {
            if self.interrupt.is_interrupted() {
                report.interrupted = true;
                break;
            }

            let mut inputs = RunInputs::default();
            let resolved = self.resolve_inputs(run, &mut inputs).await;
            let mut context = RunContext::planned(&runs_dir, &scenario.name, run, utc_now());
            let result = settle(&mut context, inputs, resolved);

            let (command, error) = match result {
                Ok((launchable, _)) => {
                    info!("Run '{}' is launchable", run.id);
                    (launchable.command_line(), None)
                }
                Err(e) => {
                    warn!("Run '{}' is not launchable: {}", run.id, e);
                    (Vec::new(), Some(e))
                }
            };
            let cancelled = error.as_ref().is_some_and(PrepareError::is_cancelled);
            report.interrupted |= cancelled;

            report.runs.push(RunPlan {
                run_id: context.run_id,
                run_id_base: context.run_id_base,
                kind: run.kind,
                command,
                environment: context
                    .environment
                    .map(|env| env.entries().clone())
                    .unwrap_or_default(),
                placeholders: context.placeholders,
                error,
            });

            if cancelled {
                break;
            }
        }

        report
    }

    /// Resolve placeholders, check the script and load the profile. Whatever
    /// was resolved stays in `inputs`, even when a later step fails.
    async fn resolve_inputs(
        &mut self,
        run: &Run,
        inputs: &mut RunInputs,
    ) -> Result<Launchable, PrepareError> {
        let resolved = self.resolver.resolve_env(&run.env).await?;
        inputs.placeholders = resolved.placeholders;
        inputs.values = resolved.values;

        let launchable = Launchable::preflight(&run.script_path)?;

        if let Some(path) = &run.profile_path {
            let loaded = load_profile(path)?;
            let raw = loaded.profile.tool_args.clone();
            let value = self.resolver.resolve(TOOL_ARGS, &raw).await?;
            if self.resolver.pattern().is_placeholder(&raw) {
                inputs.placeholders.push(ResolvedPlaceholder {
                    key: TOOL_ARGS.to_string(),
                    raw,
                    value: value.clone(),
                });
            }
            inputs.profile = Some(loaded);
            inputs.tool_args = Some(value);
        }

        Ok(launchable)
    }

    #[instrument(skip_all, fields(run = %run.id))]
    async fn execute_run(
        &mut self,
        scenario: &Scenario,
        run: &Run,
        emitter: &MarkerEmitter,
    ) -> Result<RunReport, RecordError> {
        let mut inputs = RunInputs::default();
        let resolved = self.resolve_inputs(run, &mut inputs).await;

        // Prompts are over: the run id timestamp is the launch time
        let mut context = RunContext::allocate(
            &self.recorder.runs_dir(),
            &scenario.name,
            run,
            utc_now(),
        )?;
        let mut log = ExecutionLog::open(&context.run_dir)?;
        log.line(format_args!(
            "Run {} ({}) of scenario '{}', label '{}'",
            context.run_id, run.kind, scenario.name, run.label
        ));
        log.line(format_args!("Script: {}", run.script_path.display()));

        let prepared = settle(&mut context, inputs, resolved);
        let attempt = self
            .attempt(&mut context, run, prepared, emitter, &mut log)
            .await;
        context.finish();

        let metadata = self.build_metadata(scenario, run, &context, &attempt);
        match &attempt {
            Attempt::NotLaunched(e) if e.is_cancelled() => {
                warn!("Run '{}' interrupted before launch", context.run_id);
            }
            Attempt::NotLaunched(e) => {
                error!(
                    "Run '{}' failed ({}): {}",
                    context.run_id,
                    e.failure_kind(),
                    e
                );
            }
            Attempt::Ran { verdict, .. } => match verdict.failure_kind {
                Some(kind) => error!(
                    "Run '{}' failed ({}): exit code {}",
                    context.run_id, kind, verdict.exit_code
                ),
                None => info!(
                    "Run '{}' {} (exit code {}, {:.1}s)",
                    context.run_id,
                    verdict.outcome,
                    verdict.exit_code,
                    metadata.duration_s
                ),
            },
        }
        log.line(format_args!(
            "Outcome: state={} outcome={} exit_code={}",
            metadata.state,
            metadata.outcome,
            metadata
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string())
        ));

        let metadata_path = self.recorder.record(&context.run_dir, &metadata)?;
        log.line(format_args!("Metadata: {}", metadata_path.display()));

        Ok(RunReport {
            metadata,
            metadata_path,
        })
    }

    /// Everything between allocation and recording.
    async fn attempt(
        &mut self,
        context: &mut RunContext,
        run: &Run,
        prepared: Result<(Launchable, RunEnvironment), PrepareError>,
        emitter: &MarkerEmitter,
        log: &mut ExecutionLog,
    ) -> Attempt {
        let (launchable, environment) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                log.line(format_args!("FAILED ({}): {}", e.reason(), e));
                return Attempt::NotLaunched(e);
            }
        };

        for placeholder in &context.placeholders {
            log.line(format_args!(
                "Placeholder {}: {} -> {}",
                placeholder.key, placeholder.raw, placeholder.value
            ));
        }
        if let Some(loaded) = &context.profile {
            log.line(format_args!(
                "Profile: {} ({}, tool {})",
                loaded.path.display(),
                loaded.profile.name,
                loaded.profile.tool
            ));
        }

        for (key, value) in environment.entries() {
            log.line(format_args!("Env {}={}", key, value));
        }

        if let Some(signal) = self.interrupt.signal() {
            let e = PrepareError::Interrupted(signal);
            log.line(format_args!("FAILED ({}): {}", e.reason(), e));
            return Attempt::NotLaunched(e);
        }

        if let Err(source) = std::fs::create_dir_all(&context.out_dir) {
            let e = PrepareError::Launch(LaunchError::OutputDir {
                path: context.out_dir.clone(),
                source,
            });
            log.line(format_args!("FAILED ({}): {}", e.reason(), e));
            return Attempt::NotLaunched(e);
        }

        let target_ip = environment.target_ip();
        let start_at = utc_now();
        let start = MarkerEvent::new(
            run.kind.start_event(),
            &context.run_id,
            start_at,
            target_ip,
            &run.label,
            run.kind,
        );
        log_marker(log, &start, emitter.emit(&start).await);

        let spec = ProcessSpec {
            launchable: &launchable,
            environment: &environment,
            output: run.output,
            out_dir: &context.out_dir,
            deadline: environment.duration_bound(),
        };
        if let Some(bound) = spec.deadline {
            log.line(format_args!("Duration bound: {:?}", bound));
        }
        log.line(format_args!("Spawning: {}", launchable.command_line().join(" ")));

        let result = self.supervisor.run(spec, &mut self.interrupt).await;

        let end_at = utc_now();
        let duration_s = (end_at - start_at).num_milliseconds().max(0) as f64 / 1000.0;
        let exit_code = match &result {
            Ok(report) => Some(self.supervisor.verdict(report).exit_code),
            // Keep the bracket balanced: START was already sent
            Err(_) => None,
        };
        let end = MarkerEvent::new(
            run.kind.end_event(),
            &context.run_id,
            end_at,
            target_ip,
            &run.label,
            run.kind,
        )
        .with_result(exit_code, duration_s);
        log_marker(log, &end, emitter.emit(&end).await);

        match result {
            Ok(report) => {
                log.line(format_args!(
                    "Process {} exited (code: {:?}, signal: {:?}, cause: {:?}{})",
                    report
                        .pid
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "?".to_string()),
                    report.raw_exit_code,
                    report.signal,
                    report.cause,
                    if report.killed { ", killed after grace period" } else { "" }
                ));
                let verdict = self.supervisor.verdict(&report);
                Attempt::Ran { report, verdict }
            }
            Err(e) => {
                let e = PrepareError::Launch(e);
                log.line(format_args!("FAILED ({}): {}", e.reason(), e));
                Attempt::NotLaunched(e)
            }
        }
    }

    fn build_metadata(
        &self,
        scenario: &Scenario,
        run: &Run,
        context: &RunContext,
        attempt: &Attempt,
    ) -> RunMetadata {
        let environment = context
            .environment
            .as_ref()
            .map(|env| env.entries().clone())
            .unwrap_or_else(|| run.env.clone());

        let benign_config = match run.kind {
            RunKind::Benign => Some(BenignConfig::from_env(&environment, &run.script_path)),
            RunKind::Attack => None,
        };

        let mut metadata = RunMetadata {
            tool: TOOL_NAME.to_string(),
            version: ENGINE_VERSION.to_string(),
            run_id: context.run_id.clone(),
            run_id_base: context.run_id_base.clone(),
            scenario: scenario.name.clone(),
            kind: run.kind,
            label: run.label.clone(),
            script: run.script_path.clone(),
            profile: context.profile.as_ref().map(|p| p.summary()),
            environment,
            started_at: context.started_at,
            ended_at: context.ended_at.unwrap_or(context.started_at),
            duration_s: context.duration_secs(),
            process: None,
            exit_code: None,
            state: RunState::Failed,
            outcome: RunOutcome::Failure,
            timed_out: false,
            failure_kind: None,
            failure_reason: None,
            failure_message: None,
            outputs_dir: context.out_dir.clone(),
            stdout_log: None,
            stderr_log: None,
            benign_config,
        };

        match attempt {
            Attempt::NotLaunched(e) if e.is_cancelled() => {
                metadata.exit_code = Some(INTERRUPTED_EXIT_CODE);
                metadata.state = RunState::Interrupted;
                metadata.outcome = RunOutcome::Interrupted;
                metadata.failure_reason = Some(e.reason().to_string());
                metadata.failure_message = Some(e.to_string());
            }
            Attempt::NotLaunched(e) => {
                metadata.failure_kind = Some(e.failure_kind());
                metadata.failure_reason = Some(e.reason().to_string());
                metadata.failure_message = Some(e.to_string());
            }
            Attempt::Ran { report, verdict } => {
                metadata.process = Some(report.to_record());
                metadata.exit_code = Some(verdict.exit_code);
                metadata.state = verdict.state;
                metadata.outcome = verdict.outcome;
                metadata.timed_out = verdict.timed_out;
                metadata.failure_kind = verdict.failure_kind;
                metadata.failure_reason = verdict.failure_reason.clone();
                if let Some(capture) = &report.capture {
                    metadata.stdout_log = Some(capture.stdout.clone());
                    metadata.stderr_log = Some(capture.stderr.clone());
                }
            }
        }

        metadata
    }
}

/// Move resolved inputs into `context` and build its environment.
fn settle(
    context: &mut RunContext,
    inputs: RunInputs,
    resolved: Result<Launchable, PrepareError>,
) -> Result<(Launchable, RunEnvironment), PrepareError> {
    context.placeholders = inputs.placeholders;
    context.profile = inputs.profile;
    let launchable = resolved?;

    let environment = RunEnvironment::build(
        &context.run_id,
        &context.out_dir,
        &inputs.values,
        inputs.tool_args.as_deref(),
    )?;
    context.environment = Some(environment.clone());

    Ok((launchable, environment))
}

fn log_marker(log: &mut ExecutionLog, marker: &MarkerEvent, sent: bool) {
    log.line(format_args!(
        "Marker {} at {} {}",
        marker.event,
        marker.ts_iso_utc,
        if sent { "sent" } else { "not sent" }
    ));
}
