//! Capture supervisor types
//!
//! Lifecycle states, exit records and the errors surfaced by Start and Stop.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Lifecycle state of a capture supervisor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SupervisorState {
    /// Never started
    #[default]
    Idle,
    /// Subprocess launched, waiting for readiness
    Starting,
    /// Subprocess confirmed producing output
    Running,
    /// Shutdown in progress
    Stopping,
    /// Subprocess terminated after a Stop
    Stopped,
    /// Start failed or shutdown could not complete
    Failed,
}

/// How a capture subprocess terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ExitKind {
    /// Exited on its own with a status code
    Exited { code: i32 },
    /// Terminated by a signal
    Killed { signal: Option<i32> },
    /// Termination was requested but could not be observed
    Unknown,
}

/// Last observed termination of a capture subprocess
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitRecord {
    pub pid: Option<u32>,
    pub kind: ExitKind,
}

impl ExitRecord {
    pub fn from_status(pid: Option<u32>, status: ExitStatus) -> Self {
        let kind = match status.code() {
            Some(code) => ExitKind::Exited { code },
            None => ExitKind::Killed {
                signal: termination_signal(&status),
            },
        };
        Self { pid, kind }
    }

    pub fn unknown(pid: Option<u32>) -> Self {
        Self {
            pid,
            kind: ExitKind::Unknown,
        }
    }

    /// Non-zero exit that was not caused by a signal
    pub fn is_abnormal(&self) -> bool {
        matches!(self.kind, ExitKind::Exited { code } if code != 0)
    }
}

impl std::fmt::Display for ExitRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pid = self
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string());
        match self.kind {
            ExitKind::Exited { code } => write!(f, "pid {} exited with status {}", pid, code),
            ExitKind::Killed { signal: Some(sig) } => {
                write!(f, "pid {} killed by signal {}", pid, sig)
            }
            ExitKind::Killed { signal: None } => write!(f, "pid {} killed", pid),
            ExitKind::Unknown => write!(f, "pid {} terminated with unknown status", pid),
        }
    }
}

#[cfg(unix)]
fn termination_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Why a capture subprocess was not considered started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The output target never appeared in time
    Timeout,
    /// The subprocess reported an unrecoverable condition
    FatalDiagnostic(String),
    /// The subprocess terminated before producing output
    ExitedImmediately(Option<ExitRecord>),
}

/// Errors returned by Start
#[derive(Error, Debug)]
pub enum StartError {
    #[error("Failed to prepare output {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Capture output did not appear within {0:?}")]
    ReadinessTimeout(Duration),

    #[error("Capture process reported a fatal error: {0}")]
    FatalDiagnostic(String),

    #[error("Capture process exited immediately, check camera permissions")]
    ProcessExitedImmediately(Option<ExitRecord>),

    #[error("Start cancelled")]
    Cancelled,
}

/// Errors returned by Stop
#[derive(Error, Debug)]
pub enum StopError {
    #[error("Capture process exited abnormally: {0}")]
    AbnormalExit(ExitRecord),

    #[error("Failed to kill capture process: {0}")]
    KillFailed(#[source] std::io::Error),

    #[error("Failed to wait for capture process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Stop cancelled")]
    Cancelled,
}
