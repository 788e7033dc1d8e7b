//! Process Supervisor.
//!
//! Spawns a run's script in its own process group and waits for whichever
//! comes first: the child exiting, the run's duration bound elapsing, or an
//! operator interruption. Stopping always signals the whole group, waits a
//! grace period, then SIGKILLs the group. Once the leader is gone the group
//! gets a final SIGTERM so detached children don't outlive the run.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::Child;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, instrument, warn};

use trafficgen_shared::errors::{LaunchError, LaunchResult};
use trafficgen_shared::metadata::{FailureKind, ProcessRecord, RunOutcome, RunState};
use trafficgen_shared::scenario::OutputMode;
use trafficgen_shared::time::utc_now;

use super::capture::{CapturePaths, OutputFilter, spawn_capture};
use super::launchable::Launchable;
use crate::environment::RunEnvironment;
use crate::interrupt::{INTERRUPTED_EXIT_CODE, InterruptSignal, InterruptToken};

/// Default time between a forwarded signal and SIGKILL
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Exit code recorded when a duration bound is treated as a failure
pub const DEADLINE_EXIT_CODE: i32 = 124;

/// How long to wait for capture tasks once the child is gone
const CAPTURE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How a run stopped by its duration bound is recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeadlinePolicy {
    /// Completed, `timed_out=true`, outcome `timeout`
    #[default]
    Success,
    /// Failed with failure kind `deadline`
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub success_codes: Vec<i32>,
    pub grace_period: Duration,
    pub deadline_policy: DeadlinePolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            success_codes: vec![0],
            grace_period: DEFAULT_GRACE_PERIOD,
            deadline_policy: DeadlinePolicy::Success,
        }
    }
}

/// Everything needed to start one run's process
#[derive(Debug, Clone, Copy)]
pub struct ProcessSpec<'a> {
    pub launchable: &'a Launchable,
    pub environment: &'a RunEnvironment,
    pub output: OutputMode,
    pub out_dir: &'a Path,
    pub deadline: Option<Duration>,
}

/// Why supervision ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// The child exited on its own
    Exited,
    /// The duration bound elapsed and the engine stopped the child
    DeadlineElapsed,
    /// The engine was interrupted and forwarded the signal
    Interrupted(InterruptSignal),
}

/// What was observed about one subprocess
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessReport {
    pub pid: Option<u32>,
    pub command: Vec<String>,
    pub spawned_at: DateTime<Utc>,
    pub exited_at: DateTime<Utc>,
    pub raw_exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub cause: StopCause,
    /// The group had to be SIGKILLed after the grace period
    pub killed: bool,
    pub capture: Option<CapturePaths>,
}

impl ProcessReport {
    pub fn to_record(&self) -> ProcessRecord {
        ProcessRecord {
            pid: self.pid,
            command: self.command.clone(),
            spawned_at: self.spawned_at,
            exited_at: self.exited_at,
            raw_exit_code: self.raw_exit_code,
            signal: self.signal,
        }
    }
}

/// Classification of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub state: RunState,
    pub outcome: RunOutcome,
    /// Effective exit code written to metadata and END markers
    pub exit_code: i32,
    pub timed_out: bool,
    pub failure_kind: Option<FailureKind>,
    pub failure_reason: Option<String>,
}

pub struct ProcessSupervisor {
    config: SupervisorConfig,
    filter: OutputFilter,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            config,
            filter: OutputFilter::new()?,
        })
    }

    /// Spawn the process described by `spec` and supervise it to termination.
    ///
    /// Returns an error only if the process could not be spawned.
    #[instrument(skip_all, fields(script = %spec.launchable.script().display()))]
    pub async fn run(
        &self,
        spec: ProcessSpec<'_>,
        interrupt: &mut InterruptToken,
    ) -> LaunchResult<ProcessReport> {
        let mut command = spec.launchable.command();
        command
            .envs(spec.environment.pairs())
            .stdin(Stdio::null())
            .process_group(0)
            .kill_on_drop(true);

        match spec.output {
            OutputMode::Capture => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            OutputMode::Inherit => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }

        let command_line = spec.launchable.command_line();
        debug!("Spawning: {}", command_line.join(" "));

        let mut child = command.spawn().map_err(|source| {
            match (source.kind(), spec.launchable.runtime()) {
                (std::io::ErrorKind::NotFound, Some(runtime)) => LaunchError::InterpreterNotFound {
                    runtime: runtime.to_string(),
                },
                _ => LaunchError::Spawn {
                    path: spec.launchable.script().to_path_buf(),
                    source,
                },
            }
        })?;
        let spawned_at = utc_now();
        let pid = child.id();
        info!("Process started (pid {:?})", pid);

        let (capture, capture_tasks) = match spec.output {
            OutputMode::Capture => {
                let paths = CapturePaths::in_dir(spec.out_dir);
                let mut tasks = Vec::new();
                if let Some(stdout) = child.stdout.take() {
                    tasks.push(spawn_capture(
                        stdout,
                        paths.stdout.clone(),
                        "stdout",
                        self.filter.clone(),
                    ));
                }
                if let Some(stderr) = child.stderr.take() {
                    tasks.push(spawn_capture(
                        stderr,
                        paths.stderr.clone(),
                        "stderr",
                        self.filter.clone(),
                    ));
                }
                (Some(paths), tasks)
            }
            OutputMode::Inherit => (None, Vec::new()),
        };

        let started = Instant::now();
        let deadline = async {
            match spec.deadline {
                Some(bound) => sleep(bound).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let (status, cause, killed) = tokio::select! {
            status = child.wait() => (status, StopCause::Exited, false),
            () = &mut deadline => {
                info!(
                    "Duration bound of {:?} reached, stopping process group",
                    spec.deadline.unwrap_or_default()
                );
                let (status, killed) = self.stop(&mut child, pid, Signal::SIGINT).await;
                (status, StopCause::DeadlineElapsed, killed)
            }
            received = interrupt.interrupted() => {
                info!("Forwarding {} to process group", received);
                let (status, killed) = self.stop(&mut child, pid, received.as_signal()).await;
                (status, StopCause::Interrupted(received), killed)
            }
        };
        let exited_at = utc_now();

        // Background children outlive the leader; they must not keep sending after END
        signal_group(pid, Signal::SIGTERM);

        for task in capture_tasks {
            match timeout(CAPTURE_DRAIN_TIMEOUT, task).await {
                Ok(Ok(Ok(lines))) => debug!("Captured {} line(s)", lines),
                Ok(Ok(Err(e))) => warn!("Output capture failed: {}", e),
                Ok(Err(e)) => warn!("Output capture task failed: {}", e),
                Err(_) => warn!("Output still open after exit (background children?), detaching"),
            }
        }

        let (raw_exit_code, signal) = match status {
            Ok(status) => decode_status(status),
            Err(e) => {
                warn!("Failed to collect exit status: {}", e);
                (None, None)
            }
        };

        info!(
            "Process exited after {:.2}s (code: {:?}, signal: {:?})",
            started.elapsed().as_secs_f64(),
            raw_exit_code,
            signal
        );

        Ok(ProcessReport {
            pid,
            command: command_line,
            spawned_at,
            exited_at,
            raw_exit_code,
            signal,
            cause,
            killed,
            capture,
        })
    }

    /// Signal the group, wait out the grace period, then SIGKILL the group.
    async fn stop(
        &self,
        child: &mut Child,
        pid: Option<u32>,
        signal: Signal,
    ) -> (std::io::Result<ExitStatus>, bool) {
        signal_group(pid, signal);

        match timeout(self.config.grace_period, child.wait()).await {
            Ok(status) => (status, false),
            Err(_) => {
                warn!(
                    "Process did not exit within {:?} of {}, sending SIGKILL",
                    self.config.grace_period,
                    signal.as_str()
                );
                signal_group(pid, Signal::SIGKILL);
                (child.wait().await, true)
            }
        }
    }

    /// Classify a finished process according to the configured policies.
    pub fn verdict(&self, report: &ProcessReport) -> Verdict {
        match report.cause {
            StopCause::Interrupted(_) => Verdict {
                state: RunState::Interrupted,
                outcome: RunOutcome::Interrupted,
                exit_code: INTERRUPTED_EXIT_CODE,
                timed_out: false,
                failure_kind: None,
                failure_reason: None,
            },
            StopCause::DeadlineElapsed => match self.config.deadline_policy {
                DeadlinePolicy::Success => Verdict {
                    state: RunState::Completed,
                    outcome: RunOutcome::Timeout,
                    exit_code: 0,
                    timed_out: true,
                    failure_kind: None,
                    failure_reason: None,
                },
                DeadlinePolicy::Failure => Verdict {
                    state: RunState::Failed,
                    outcome: RunOutcome::Failure,
                    exit_code: DEADLINE_EXIT_CODE,
                    timed_out: true,
                    failure_kind: Some(FailureKind::Deadline),
                    failure_reason: Some("deadline_elapsed".to_string()),
                },
            },
            StopCause::Exited => match (report.raw_exit_code, report.signal) {
                (Some(code), _) if self.config.success_codes.contains(&code) => Verdict {
                    state: RunState::Completed,
                    outcome: RunOutcome::Success,
                    exit_code: code,
                    timed_out: false,
                    failure_kind: None,
                    failure_reason: None,
                },
                (Some(code), _) => failed(code, FailureKind::ExitStatus, "exit_status"),
                (None, Some(signal)) => {
                    failed(128 + signal, FailureKind::Signal, "killed_by_signal")
                }
                (None, None) => failed(1, FailureKind::ExitStatus, "exit_status_unknown"),
            },
        }
    }
}

fn failed(exit_code: i32, kind: FailureKind, reason: &str) -> Verdict {
    Verdict {
        state: RunState::Failed,
        outcome: RunOutcome::Failure,
        exit_code,
        timed_out: false,
        failure_kind: Some(kind),
        failure_reason: Some(reason.to_string()),
    }
}

fn decode_status(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), status.signal())
}

/// Send `signal` to the process group led by `pid`. A vanished group is not an error.
fn signal_group(pid: Option<u32>, signal: Signal) {
    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        debug!("No pid to signal, process already reaped");
        return;
    };

    match killpg(Pid::from_raw(pid), signal) {
        Ok(()) => debug!("Sent {} to process group {}", signal.as_str(), pid),
        Err(Errno::ESRCH) => debug!("Process group {} already gone", pid),
        Err(e) => warn!("Failed to send {} to process group {}: {}", signal.as_str(), pid, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::InterruptHandle;
    use std::collections::BTreeMap;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn supervisor(config: SupervisorConfig) -> ProcessSupervisor {
        ProcessSupervisor::new(config).unwrap()
    }

    fn environment(out_dir: &Path, pairs: &[(&str, &str)]) -> RunEnvironment {
        let env: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RunEnvironment::build("test_run", out_dir, &env, None).unwrap()
    }

    fn report(cause: StopCause, code: Option<i32>, signal: Option<i32>) -> ProcessReport {
        let now = utc_now();
        ProcessReport {
            pid: Some(1),
            command: vec!["x".to_string()],
            spawned_at: now,
            exited_at: now,
            raw_exit_code: code,
            signal,
            cause,
            killed: false,
            capture: None,
        }
    }

    #[tokio::test]
    async fn test_captures_output_and_environment() {
        let temp_dir = TempDir::new().unwrap();
        let path = script(
            temp_dir.path(),
            "echo.sh",
            "echo \"run=$RUN_ID greeting=$GREETING\"\necho oops >&2\nexit 0",
        );
        let launchable = Launchable::preflight(&path).unwrap();
        let environment = environment(temp_dir.path(), &[("GREETING", "hello")]);
        let handle = InterruptHandle::new();
        let mut token = handle.token();

        let supervisor = supervisor(SupervisorConfig::default());
        let report = supervisor
            .run(
                ProcessSpec {
                    launchable: &launchable,
                    environment: &environment,
                    output: OutputMode::Capture,
                    out_dir: temp_dir.path(),
                    deadline: None,
                },
                &mut token,
            )
            .await
            .unwrap();

        assert_eq!(report.cause, StopCause::Exited);
        assert_eq!(report.raw_exit_code, Some(0));
        assert!(report.spawned_at <= report.exited_at);

        let capture = report.capture.clone().unwrap();
        assert_eq!(
            fs::read_to_string(&capture.stdout).unwrap(),
            "run=test_run greeting=hello\n"
        );
        assert_eq!(fs::read_to_string(&capture.stderr).unwrap(), "oops\n");

        let verdict = supervisor.verdict(&report);
        assert_eq!(verdict.outcome, RunOutcome::Success);
        assert_eq!(verdict.exit_code, 0);
    }

    #[tokio::test]
    async fn test_deadline_stops_endless_script() {
        let temp_dir = TempDir::new().unwrap();
        let path = script(temp_dir.path(), "forever.sh", "while true; do sleep 0.1; done");
        let launchable = Launchable::preflight(&path).unwrap();
        let environment = environment(temp_dir.path(), &[]);
        let handle = InterruptHandle::new();
        let mut token = handle.token();

        let supervisor = supervisor(SupervisorConfig {
            grace_period: Duration::from_secs(2),
            ..SupervisorConfig::default()
        });
        let started = std::time::Instant::now();
        let report = supervisor
            .run(
                ProcessSpec {
                    launchable: &launchable,
                    environment: &environment,
                    output: OutputMode::Capture,
                    out_dir: temp_dir.path(),
                    deadline: Some(Duration::from_millis(500)),
                },
                &mut token,
            )
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.cause, StopCause::DeadlineElapsed);

        let verdict = supervisor.verdict(&report);
        assert_eq!(verdict.state, RunState::Completed);
        assert_eq!(verdict.outcome, RunOutcome::Timeout);
        assert!(verdict.timed_out);
        assert_eq!(verdict.exit_code, 0);
    }

    #[tokio::test]
    async fn test_sigkill_after_grace_period() {
        let temp_dir = TempDir::new().unwrap();
        let path = script(
            temp_dir.path(),
            "stubborn.sh",
            "trap '' INT TERM\nwhile true; do sleep 0.1; done",
        );
        let launchable = Launchable::preflight(&path).unwrap();
        let environment = environment(temp_dir.path(), &[]);
        let handle = InterruptHandle::new();
        let mut token = handle.token();

        let supervisor = supervisor(SupervisorConfig {
            grace_period: Duration::from_millis(300),
            ..SupervisorConfig::default()
        });
        let report = supervisor
            .run(
                ProcessSpec {
                    launchable: &launchable,
                    environment: &environment,
                    output: OutputMode::Inherit,
                    out_dir: temp_dir.path(),
                    deadline: Some(Duration::from_millis(200)),
                },
                &mut token,
            )
            .await
            .unwrap();

        assert!(report.killed);
        assert_eq!(report.signal, Some(9));
        assert!(report.capture.is_none());
    }

    #[tokio::test]
    async fn test_interrupt_is_forwarded() {
        let temp_dir = TempDir::new().unwrap();
        let path = script(
            temp_dir.path(),
            "polite.sh",
            "trap 'exit 130' INT\nwhile true; do sleep 0.1; done",
        );
        let launchable = Launchable::preflight(&path).unwrap();
        let environment = environment(temp_dir.path(), &[]);
        let handle = InterruptHandle::new();
        let mut token = handle.token();

        let interrupter = handle.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            interrupter.interrupt(InterruptSignal::Interrupt);
        });

        let supervisor = supervisor(SupervisorConfig::default());
        let report = supervisor
            .run(
                ProcessSpec {
                    launchable: &launchable,
                    environment: &environment,
                    output: OutputMode::Capture,
                    out_dir: temp_dir.path(),
                    deadline: None,
                },
                &mut token,
            )
            .await
            .unwrap();

        assert_eq!(report.cause, StopCause::Interrupted(InterruptSignal::Interrupt));
        assert!(!report.killed);

        let verdict = supervisor.verdict(&report);
        assert_eq!(verdict.state, RunState::Interrupted);
        assert_eq!(verdict.exit_code, 130);
    }

    /// Alive and not yet a zombie
    fn is_running(pid: &str) -> bool {
        match fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| !matches!(rest.trim_start().chars().next(), Some('Z' | 'X')))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn test_background_children_stopped_after_leader_exits() {
        let temp_dir = TempDir::new().unwrap();
        let path = script(
            temp_dir.path(),
            "detach.sh",
            "sleep 30 &\necho $! > \"$OUT_DIR/background.pid\"\nexit 0",
        );
        let launchable = Launchable::preflight(&path).unwrap();
        let environment = environment(temp_dir.path(), &[]);
        let handle = InterruptHandle::new();
        let mut token = handle.token();

        let supervisor = supervisor(SupervisorConfig::default());
        let started = std::time::Instant::now();
        let report = supervisor
            .run(
                ProcessSpec {
                    launchable: &launchable,
                    environment: &environment,
                    output: OutputMode::Capture,
                    out_dir: temp_dir.path(),
                    deadline: None,
                },
                &mut token,
            )
            .await
            .unwrap();

        assert_eq!(report.cause, StopCause::Exited);
        assert_eq!(report.raw_exit_code, Some(0));
        assert!(started.elapsed() < Duration::from_secs(10));

        let background = fs::read_to_string(temp_dir.path().join("background.pid")).unwrap();
        let background = background.trim();
        let mut waited = Duration::ZERO;
        while is_running(background) && waited < Duration::from_secs(3) {
            sleep(Duration::from_millis(50)).await;
            waited += Duration::from_millis(50);
        }
        assert!(!is_running(background), "pid {} still running", background);
    }

    #[test]
    fn test_verdict_exit_codes() {
        let supervisor = supervisor(SupervisorConfig {
            success_codes: vec![0, 3],
            ..SupervisorConfig::default()
        });

        let ok = supervisor.verdict(&report(StopCause::Exited, Some(3), None));
        assert_eq!(ok.outcome, RunOutcome::Success);
        assert_eq!(ok.exit_code, 3);

        let failed = supervisor.verdict(&report(StopCause::Exited, Some(2), None));
        assert_eq!(failed.state, RunState::Failed);
        assert_eq!(failed.failure_kind, Some(FailureKind::ExitStatus));
        assert_eq!(failed.exit_code, 2);

        // A child exiting 130 on its own is a failure, not an interruption
        let own_130 = supervisor.verdict(&report(StopCause::Exited, Some(130), None));
        assert_eq!(own_130.state, RunState::Failed);

        let killed = supervisor.verdict(&report(StopCause::Exited, None, Some(9)));
        assert_eq!(killed.failure_kind, Some(FailureKind::Signal));
        assert_eq!(killed.exit_code, 137);
    }

    #[test]
    fn test_verdict_deadline_policy() {
        let supervisor = supervisor(SupervisorConfig {
            deadline_policy: DeadlinePolicy::Failure,
            ..SupervisorConfig::default()
        });

        let verdict = supervisor.verdict(&report(StopCause::DeadlineElapsed, Some(130), None));
        assert_eq!(verdict.state, RunState::Failed);
        assert_eq!(verdict.failure_kind, Some(FailureKind::Deadline));
        assert!(verdict.timed_out);
        assert_eq!(verdict.exit_code, DEADLINE_EXIT_CODE);
    }
}
