//! Capture process supervisor
//!
//! Owns at most one capture subprocess and drives it through
//! `Idle -> Starting -> Running -> Stopping -> Stopped | Failed`.
//!
//! Start and Stop are serialized by an async mutex that also owns the child
//! handle, so spawning, signalling and reaping never overlap. Observable
//! state lives behind a separate read-write lock that is only held for short,
//! non-blocking sections; status readers never wait on subprocess I/O.

use super::diagnostics::spawn_scanner;
use super::output::OutputTarget;
use super::readiness::{Readiness, ReadinessDetector};
use super::shutdown::{ShutdownError, ShutdownSequencer};
use super::traits::{CaptureProfile, CaptureSource};
use super::types::{ExitRecord, FailureReason, StartError, StopError, SupervisorState};
use crate::config::{ConfigError, ProcessConfig};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Observable supervisor state
#[derive(Debug, Clone)]
struct SupervisorStatus {
    state: SupervisorState,
    config: ProcessConfig,
    pid: Option<u32>,
    last_exit: Option<ExitRecord>,
}

/// Supervises one capture subprocess for one capture session
pub struct CaptureProcessSupervisor {
    profile: CaptureProfile,
    output: OutputTarget,
    process: Mutex<Option<Child>>,
    status: RwLock<SupervisorStatus>,
}

impl CaptureProcessSupervisor {
    /// Create a supervisor; the output path is normalized for the profile's container
    pub fn new(
        profile: CaptureProfile,
        output_path: impl Into<PathBuf>,
        config: ProcessConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let output = OutputTarget::resolve(output_path, profile.container);

        Ok(Self {
            profile,
            output,
            process: Mutex::new(None),
            status: RwLock::new(SupervisorStatus {
                state: SupervisorState::Idle,
                config,
                pid: None,
                last_exit: None,
            }),
        })
    }

    pub fn state(&self) -> SupervisorState {
        self.status.read().state
    }

    /// Last observed subprocess exit, kept until the next successful Start
    pub fn last_exit(&self) -> Option<ExitRecord> {
        self.status.read().last_exit
    }

    /// Pid of the current subprocess, if one is live
    pub fn pid(&self) -> Option<u32> {
        self.status.read().pid
    }

    fn set_state(&self, state: SupervisorState) {
        self.status.write().state = state;
    }

    fn command(&self, config: &ProcessConfig) -> Command {
        let builder = &self.profile.command;
        let mut command = Command::new(builder.program());
        command
            .args(builder.args(config, self.output.path()))
            .envs(builder.envs())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Make sure a subprocess that failed to start is gone, and record its exit
    async fn kill_and_reap(&self, child: &mut Child, pid: Option<u32>) -> ExitRecord {
        if let Ok(Some(status)) = child.try_wait() {
            return ExitRecord::from_status(pid, status);
        }

        if let Err(e) = child.start_kill() {
            tracing::warn!("{}: failed to kill process: {}", self.profile.name, e);
        }

        match child.wait().await {
            Ok(status) => ExitRecord::from_status(pid, status),
            Err(e) => {
                tracing::warn!("{}: failed to reap process: {}", self.profile.name, e);
                ExitRecord::unknown(pid)
            }
        }
    }

    fn fail_start(&self, last_exit: Option<ExitRecord>) {
        let mut status = self.status.write();
        status.state = SupervisorState::Failed;
        status.pid = None;
        if last_exit.is_some() {
            status.last_exit = last_exit;
        }
    }
}

#[async_trait]
impl CaptureSource for CaptureProcessSupervisor {
    async fn start(&self, cancel: &CancellationToken) -> Result<(), StartError> {
        let mut process = self.process.lock().await;

        let state = self.state();
        if state == SupervisorState::Running && process.is_some() {
            tracing::debug!("{}: already running", self.profile.name);
            return Ok(());
        }

        let config = self.status.read().config.clone();
        tracing::info!(
            "Starting {}: {} @ {}fps, bitrate {}, output {:?}",
            self.profile.name,
            config.resolution(),
            config.fps,
            config.bitrate,
            self.output.path()
        );

        if let Err(e) = self.output.prepare() {
            tracing::error!("{}: {}", self.profile.name, e);
            self.fail_start(None);
            return Err(e);
        }

        let program = self.profile.command.program().to_string();
        let mut child = match self.command(&config).spawn() {
            Ok(child) => child,
            Err(source) => {
                tracing::error!(
                    "Failed to start {} ({}): {}. Check that it is installed and that camera access is allowed",
                    self.profile.name,
                    program,
                    source
                );
                self.fail_start(None);
                return Err(StartError::Launch { program, source });
            }
        };

        let pid = child.id();
        {
            let mut status = self.status.write();
            status.state = SupervisorState::Starting;
            status.pid = pid;
        }

        let diagnostics = match child.stderr.take() {
            Some(stderr) => spawn_scanner(stderr, self.profile.diagnostics, self.profile.name).1,
            None => None,
        };

        let detector = ReadinessDetector::new(self.profile.readiness, &self.output, self.profile.name);
        let verdict = detector.detect(&mut child, diagnostics, cancel).await;

        let error = match verdict {
            Readiness::Ready => {
                {
                    let mut status = self.status.write();
                    status.config.start_time = Some(Utc::now());
                    status.state = SupervisorState::Running;
                    status.last_exit = None;
                }
                *process = Some(child);
                tracing::info!("{} started (pid {:?})", self.profile.name, pid);
                return Ok(());
            }
            Readiness::Cancelled => StartError::Cancelled,
            Readiness::Failed(FailureReason::Timeout) => {
                StartError::ReadinessTimeout(self.profile.readiness.startup_timeout)
            }
            Readiness::Failed(FailureReason::FatalDiagnostic(line)) => {
                StartError::FatalDiagnostic(line)
            }
            Readiness::Failed(FailureReason::ExitedImmediately(record)) => {
                StartError::ProcessExitedImmediately(record)
            }
        };

        let record = self.kill_and_reap(&mut child, pid).await;
        self.fail_start(Some(record));
        tracing::error!("{} failed to start: {} ({})", self.profile.name, error, record);
        Err(error)
    }

    async fn stop(&self, cancel: &CancellationToken) -> Result<(), StopError> {
        let mut process = self.process.lock().await;

        let state = self.state();
        if state != SupervisorState::Running {
            tracing::debug!("{}: not running ({:?}), nothing to stop", self.profile.name, state);
            return Ok(());
        }

        let Some(mut child) = process.take() else {
            self.set_state(SupervisorState::Stopped);
            return Ok(());
        };

        let pid = self.pid();
        self.set_state(SupervisorState::Stopping);
        tracing::info!("Stopping {} (pid {:?})", self.profile.name, pid);

        let sequencer = ShutdownSequencer::new(self.profile.shutdown, self.profile.name);
        let result = sequencer.shutdown(&mut child, cancel).await;

        let (state, record, outcome) = match result {
            Ok(record) if record.is_abnormal() => (
                SupervisorState::Stopped,
                record,
                Err(StopError::AbnormalExit(record)),
            ),
            Ok(record) => (SupervisorState::Stopped, record, Ok(())),
            Err(ShutdownError::Cancelled) => (
                SupervisorState::Stopped,
                ExitRecord::unknown(pid),
                Err(StopError::Cancelled),
            ),
            Err(ShutdownError::KillFailed(e)) => (
                SupervisorState::Failed,
                ExitRecord::unknown(pid),
                Err(StopError::KillFailed(e)),
            ),
            Err(ShutdownError::Wait(e)) => (
                SupervisorState::Failed,
                ExitRecord::unknown(pid),
                Err(StopError::Wait(e)),
            ),
        };

        {
            let mut status = self.status.write();
            status.state = state;
            status.pid = None;
            status.last_exit = Some(record);
        }

        match &outcome {
            Ok(()) => tracing::info!("{} stopped ({})", self.profile.name, record),
            Err(e) => tracing::error!("Error stopping {}: {}", self.profile.name, e),
        }
        outcome
    }

    fn is_running(&self) -> bool {
        self.state() == SupervisorState::Running
    }

    fn config(&self) -> ProcessConfig {
        self.status.read().config.clone()
    }

    fn output_path(&self) -> PathBuf {
        self.output.path().to_path_buf()
    }

    fn name(&self) -> &str {
        self.profile.name
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::capture::diagnostics::DiagnosticMode;
    use crate::capture::readiness::ReadinessPolicy;
    use crate::capture::shutdown::{ShutdownPlan, ShutdownSignal};
    use crate::capture::traits::CommandBuilder;
    use crate::capture::types::ExitKind;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::{tempdir, TempDir};

    /// Runs a shell script with the output path as `$0`
    struct ShellCommand {
        program: String,
        script: String,
    }

    impl CommandBuilder for ShellCommand {
        fn program(&self) -> &str {
            &self.program
        }

        fn args(&self, _config: &ProcessConfig, output: &Path) -> Vec<String> {
            vec![
                "-c".to_string(),
                self.script.clone(),
                output.to_string_lossy().to_string(),
            ]
        }
    }

    const READY: &str = r#"echo launched >> "$0.launches"; printf data > "$0"; exec sleep 30"#;

    fn profile(program: &str, script: &str) -> CaptureProfile {
        CaptureProfile {
            name: "Test Camera",
            command: Arc::new(ShellCommand {
                program: program.to_string(),
                script: script.to_string(),
            }),
            container: Some("ts"),
            diagnostics: DiagnosticMode::Structured,
            readiness: ReadinessPolicy {
                startup_timeout: Duration::from_millis(400),
                poll_interval: Duration::from_millis(20),
            },
            shutdown: ShutdownPlan {
                primary: ShutdownSignal::Terminate,
                fallback: None,
                grace_period: Duration::from_millis(300),
            },
        }
    }

    fn supervisor(script: &str) -> (CaptureProcessSupervisor, TempDir) {
        let dir = tempdir().unwrap();
        let supervisor = CaptureProcessSupervisor::new(
            profile("sh", script),
            dir.path().join("capture/out.mp4"),
            ProcessConfig::default(),
        )
        .unwrap();
        (supervisor, dir)
    }

    fn launches(supervisor: &CaptureProcessSupervisor) -> usize {
        let path = format!("{}.launches", supervisor.output_path().display());
        std::fs::read_to_string(path).map(|s| s.lines().count()).unwrap_or(0)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ProcessConfig {
            fps: 0,
            ..ProcessConfig::default()
        };
        assert!(CaptureProcessSupervisor::new(profile("sh", READY), "/tmp/out.ts", config).is_err());
    }

    #[tokio::test]
    async fn test_output_path_is_normalized() {
        let (supervisor, dir) = supervisor(READY);
        assert_eq!(supervisor.output_path(), dir.path().join("capture/out.ts"));
        assert_eq!(supervisor.name(), "Test Camera");
        assert_eq!(supervisor.state(), SupervisorState::Idle);
    }

    #[tokio::test]
    async fn test_start_twice_spawns_once() {
        let (supervisor, _dir) = supervisor(READY);
        let cancel = CancellationToken::new();

        supervisor.start(&cancel).await.unwrap();
        let pid = supervisor.pid();
        supervisor.start(&cancel).await.unwrap();

        assert!(supervisor.is_running());
        assert_eq!(supervisor.pid(), pid);
        assert_eq!(launches(&supervisor), 1);

        supervisor.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_never_started_is_noop() {
        let (supervisor, _dir) = supervisor(READY);

        supervisor.stop(&CancellationToken::new()).await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Idle);
        assert!(supervisor.last_exit().is_none());
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let (supervisor, _dir) = supervisor(READY);
        let cancel = CancellationToken::new();

        supervisor.start(&cancel).await.unwrap();
        supervisor.stop(&cancel).await.unwrap();

        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(!supervisor.is_running());
        assert!(supervisor.pid().is_none());
        assert_eq!(
            supervisor.last_exit().map(|r| r.kind),
            Some(ExitKind::Killed { signal: Some(15) })
        );

        // Second stop is a no-op
        supervisor.stop(&cancel).await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_config_snapshot_after_start() {
        let (supervisor, _dir) = supervisor(READY);
        assert!(supervisor.config().start_time.is_none());

        supervisor.start(&CancellationToken::new()).await.unwrap();

        let mut snapshot = supervisor.config();
        assert!(snapshot.start_time.is_some());
        snapshot.start_time = None;
        assert_eq!(snapshot, ProcessConfig::default());

        supervisor.stop(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let (supervisor, _dir) = supervisor("exec sleep 30");

        let started = Instant::now();
        let result = supervisor.start(&CancellationToken::new()).await;

        assert!(matches!(result, Err(StartError::ReadinessTimeout(_))));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(400));
        assert!(elapsed < Duration::from_millis(400 + 5 * 20), "timed out late: {:?}", elapsed);
        assert_eq!(supervisor.state(), SupervisorState::Failed);
        assert_eq!(
            supervisor.last_exit().map(|r| r.kind),
            Some(ExitKind::Killed { signal: Some(9) })
        );
    }

    #[tokio::test]
    async fn test_fatal_diagnostic_fails_start() {
        let (supervisor, _dir) = supervisor("echo 'Permission denied' >&2; exec sleep 30");

        let result = supervisor.start(&CancellationToken::new()).await;
        match result {
            Err(StartError::FatalDiagnostic(line)) => assert_eq!(line, "Permission denied"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_fatal_diagnostic_after_invalid_utf8() {
        let (supervisor, _dir) =
            supervisor(r"printf '\377\n' >&2; echo 'Permission denied' >&2; exec sleep 30");

        let result = supervisor.start(&CancellationToken::new()).await;
        assert!(
            matches!(result, Err(StartError::FatalDiagnostic(_))),
            "unexpected result: {:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_after_start_keeps_process_alive() {
        let (supervisor, _dir) = supervisor(
            r#"trap 'exit 0' TERM; printf data > "$0"; printf '\377\n' >&2; while :; do echo frame >&2; sleep 0.02; done"#,
        );
        let cancel = CancellationToken::new();
        supervisor.start(&cancel).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        supervisor.stop(&cancel).await.unwrap();

        assert_eq!(
            supervisor.last_exit().map(|r| r.kind),
            Some(ExitKind::Exited { code: 0 })
        );
    }

    #[tokio::test]
    async fn test_exited_process_fails_start() {
        let (supervisor, _dir) = supervisor("exit 1");

        let result = supervisor.start(&CancellationToken::new()).await;
        assert!(matches!(result, Err(StartError::ProcessExitedImmediately(_))));
        assert_eq!(
            supervisor.last_exit().map(|r| r.kind),
            Some(ExitKind::Exited { code: 1 })
        );
    }

    #[tokio::test]
    async fn test_cancel_during_start_kills_process() {
        let (supervisor, _dir) = supervisor("exec sleep 30");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = supervisor.start(&cancel).await;
        assert!(matches!(result, Err(StartError::Cancelled)));
        assert_eq!(
            supervisor.last_exit().map(|r| r.kind),
            Some(ExitKind::Killed { signal: Some(9) })
        );
    }

    #[tokio::test]
    async fn test_launch_error() {
        let dir = tempdir().unwrap();
        let supervisor = CaptureProcessSupervisor::new(
            profile("/nonexistent/capture-tool", READY),
            dir.path().join("out.ts"),
            ProcessConfig::default(),
        )
        .unwrap();

        let result = supervisor.start(&CancellationToken::new()).await;
        assert!(matches!(result, Err(StartError::Launch { .. })));
        assert_eq!(supervisor.state(), SupervisorState::Failed);
    }

    #[tokio::test]
    async fn test_stop_escalates_and_succeeds() {
        let (supervisor, _dir) = supervisor(
            r#"trap '' INT TERM; printf data > "$0"; while :; do sleep 0.05; done"#,
        );
        let cancel = CancellationToken::new();
        supervisor.start(&cancel).await.unwrap();

        let started = Instant::now();
        supervisor.stop(&cancel).await.unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(300 + 5 * 20), "escalated late: {:?}", elapsed);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert_eq!(
            supervisor.last_exit().map(|r| r.kind),
            Some(ExitKind::Killed { signal: Some(9) })
        );
    }

    #[tokio::test]
    async fn test_abnormal_exit_on_stop() {
        let (supervisor, _dir) = supervisor(
            r#"trap 'exit 3' TERM; printf data > "$0"; while :; do sleep 0.05; done"#,
        );
        let cancel = CancellationToken::new();
        supervisor.start(&cancel).await.unwrap();

        let result = supervisor.stop(&cancel).await;
        assert!(matches!(result, Err(StopError::AbnormalExit(_))));
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_after_failed_start() {
        let (supervisor, dir) = supervisor(
            r#"if [ -e "$0.second" ]; then printf data > "$0"; exec sleep 30; fi; touch "$0.second"; exit 1"#,
        );
        let cancel = CancellationToken::new();

        assert!(supervisor.start(&cancel).await.is_err());
        assert!(dir.path().join("capture/out.ts.second").exists());

        supervisor.start(&cancel).await.unwrap();
        assert!(supervisor.is_running());
        assert!(supervisor.last_exit().is_none());

        supervisor.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_accessors_do_not_block_during_start() {
        let (supervisor, _dir) = supervisor("exec sleep 30");
        let supervisor = Arc::new(supervisor);

        let starting = supervisor.clone();
        let handle = tokio::spawn(async move { starting.start(&CancellationToken::new()).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let reads = Instant::now();
        assert_eq!(supervisor.state(), SupervisorState::Starting);
        assert!(!supervisor.is_running());
        let _ = supervisor.config();
        assert!(reads.elapsed() < Duration::from_millis(50));

        assert!(handle.await.unwrap().is_err());
    }
}
