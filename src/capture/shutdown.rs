//! Graceful shutdown with signal escalation
//!
//! Sends the primary signal (falling back to a second signal only when the
//! first cannot be sent), waits out a grace period and then kills the process.

use super::types::ExitRecord;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

/// Signals used to ask a capture subprocess to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub fn name(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        }
    }
}

/// Signal escalation protocol for one platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPlan {
    pub primary: ShutdownSignal,
    /// Sent only if sending `primary` fails
    pub fallback: Option<ShutdownSignal>,
    /// Wait after signalling before the process is killed
    pub grace_period: Duration,
}

/// Shutdown failures
#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("Shutdown cancelled, process killed")]
    Cancelled,

    #[error("Failed to kill process: {0}")]
    KillFailed(#[source] std::io::Error),

    #[error("Failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Delivers a shutdown signal to a pid
pub type SignalSender = fn(u32, ShutdownSignal) -> std::io::Result<()>;

/// Runs a [`ShutdownPlan`] against a subprocess
pub struct ShutdownSequencer<'a> {
    plan: ShutdownPlan,
    label: &'a str,
    send: SignalSender,
}

impl<'a> ShutdownSequencer<'a> {
    pub fn new(plan: ShutdownPlan, label: &'a str) -> Self {
        Self {
            plan,
            label,
            send: send_signal,
        }
    }

    /// Replace the OS signal delivery
    pub fn with_sender(mut self, send: SignalSender) -> Self {
        self.send = send;
        self
    }

    /// Terminate `child` and return how it exited.
    ///
    /// A process that ends because of the escalation kill is reported as
    /// killed; callers decide whether that is an error.
    pub async fn shutdown(
        &self,
        child: &mut Child,
        cancel: &CancellationToken,
    ) -> Result<ExitRecord, ShutdownError> {
        let pid = child.id();

        // Reaped already: never signal a pid that may have been reused.
        if let Ok(Some(status)) = child.try_wait() {
            let record = ExitRecord::from_status(pid, status);
            tracing::info!("{}: process already exited: {}", self.label, record);
            return Ok(record);
        }

        self.signal(pid);

        let grace = tokio::time::sleep(self.plan.grace_period);
        tokio::pin!(grace);

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::warn!("{}: shutdown cancelled, killing pid {:?}", self.label, pid);
                if let Err(e) = child.start_kill() {
                    tracing::warn!("{}: failed to kill process: {}", self.label, e);
                }
                Err(ShutdownError::Cancelled)
            }

            status = child.wait() => {
                let record = ExitRecord::from_status(pid, status.map_err(ShutdownError::Wait)?);
                tracing::info!("{}: stopped gracefully: {}", self.label, record);
                Ok(record)
            }

            _ = &mut grace => {
                tracing::warn!(
                    "{}: not responding to {} after {:?}, forcing termination",
                    self.label,
                    self.plan.primary.name(),
                    self.plan.grace_period
                );
                child.start_kill().map_err(ShutdownError::KillFailed)?;

                let status = child.wait().await.map_err(ShutdownError::Wait)?;
                let record = ExitRecord::from_status(pid, status);
                tracing::info!("{}: forcefully terminated: {}", self.label, record);
                Ok(record)
            }
        }
    }

    fn signal(&self, pid: Option<u32>) {
        let Some(pid) = pid else {
            return;
        };

        match (self.send)(pid, self.plan.primary) {
            Ok(()) => {
                tracing::debug!("{}: sent {} to pid {}", self.label, self.plan.primary.name(), pid)
            }
            Err(e) => {
                tracing::warn!(
                    "{}: failed to send {} to pid {}: {}",
                    self.label,
                    self.plan.primary.name(),
                    pid,
                    e
                );
                if let Some(fallback) = self.plan.fallback {
                    if let Err(e) = (self.send)(pid, fallback) {
                        tracing::warn!(
                            "{}: failed to send {} to pid {}: {}",
                            self.label,
                            fallback.name(),
                            pid,
                            e
                        );
                    }
                }
            }
        }
    }
}

/// Deliver `signal` to `pid` through the OS
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: ShutdownSignal) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let signal = match signal {
        ShutdownSignal::Interrupt => Signal::SIGINT,
        ShutdownSignal::Terminate => Signal::SIGTERM,
    };
    let pid = i32::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    kill(Pid::from_raw(pid), signal).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, signal: ShutdownSignal) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("{} is not supported on this platform", signal.name()),
    ))
}
