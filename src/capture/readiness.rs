//! Startup readiness detection
//!
//! A capture subprocess gives no synchronous "ready" signal, so startup is
//! decided by racing cancellation, a startup timeout, fatal diagnostic lines
//! and a periodic check for the output target.

use super::diagnostics::{DiagnosticEvent, DiagnosticKind};
use super::output::OutputTarget;
use super::types::{ExitRecord, FailureReason};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Timing of the readiness race
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// How long the output target has to appear
    pub startup_timeout: Duration,
    /// How often the output target is checked
    pub poll_interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Outcome of the readiness race
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Failed(FailureReason),
    Cancelled,
}

/// Drives the startup race for one launched subprocess
pub struct ReadinessDetector<'a> {
    policy: ReadinessPolicy,
    target: &'a OutputTarget,
    label: &'a str,
}

impl<'a> ReadinessDetector<'a> {
    pub fn new(policy: ReadinessPolicy, target: &'a OutputTarget, label: &'a str) -> Self {
        Self {
            policy,
            target,
            label,
        }
    }

    /// Race the startup triggers until one resolves.
    ///
    /// `diagnostics` is consumed: it is dropped on return so the scanner can
    /// stop forwarding. On cancellation the subprocess is sent a kill signal.
    pub async fn detect(
        &self,
        child: &mut Child,
        diagnostics: Option<mpsc::Receiver<DiagnosticEvent>>,
        cancel: &CancellationToken,
    ) -> Readiness {
        let pid = child.id();
        let mut diagnostics = diagnostics;
        let mut diagnostics_open = diagnostics.is_some();

        let deadline = time::sleep(self.policy.startup_timeout);
        tokio::pin!(deadline);

        let mut ticker = time::interval(self.policy.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let verdict = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::warn!("{}: startup cancelled, killing pid {:?}", self.label, pid);
                    if let Err(e) = child.start_kill() {
                        tracing::warn!("{}: failed to kill process: {}", self.label, e);
                    }
                    return Readiness::Cancelled;
                }

                _ = &mut deadline => {
                    tracing::warn!(
                        "{}: timeout waiting for output {:?} after {:?}",
                        self.label,
                        self.target.path(),
                        self.policy.startup_timeout
                    );
                    break Readiness::Failed(FailureReason::Timeout);
                }

                event = recv(&mut diagnostics), if diagnostics_open => {
                    match event {
                        Some(event) if event.kind == DiagnosticKind::Fatal => {
                            break Readiness::Failed(FailureReason::FatalDiagnostic(event.line));
                        }
                        Some(_) => {}
                        None => diagnostics_open = false,
                    }
                }

                _ = ticker.tick() => {
                    if self.target.is_ready() {
                        break Readiness::Ready;
                    }
                    if let Ok(Some(status)) = child.try_wait() {
                        let record = ExitRecord::from_status(pid, status);
                        tracing::warn!("{}: process exited during startup: {}", self.label, record);
                        break Readiness::Failed(FailureReason::ExitedImmediately(Some(record)));
                    }
                }
            }
        };

        drop(diagnostics);

        if verdict == Readiness::Ready {
            if let Ok(Some(status)) = child.try_wait() {
                let record = ExitRecord::from_status(pid, status);
                tracing::warn!("{}: output appeared but process already exited: {}", self.label, record);
                return Readiness::Failed(FailureReason::ExitedImmediately(Some(record)));
            }
        }

        verdict
    }
}

async fn recv(rx: &mut Option<mpsc::Receiver<DiagnosticEvent>>) -> Option<DiagnosticEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => None,
    }
}
