//! Capture trait definitions
//!
//! Platform-agnostic contract for capture sources and the strategy values a
//! platform supplies to the supervisor.

use super::diagnostics::DiagnosticMode;
use super::readiness::ReadinessPolicy;
use super::shutdown::ShutdownPlan;
use super::types::{StartError, StopError};
use crate::config::{ConfigError, ProcessConfig};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A capture source backed by an external subprocess
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Launch the subprocess and wait until it produces output.
    /// A no-op if already running.
    async fn start(&self, cancel: &CancellationToken) -> Result<(), StartError>;

    /// Terminate the subprocess. A no-op if not running.
    async fn stop(&self, cancel: &CancellationToken) -> Result<(), StopError>;

    fn is_running(&self) -> bool;

    /// Snapshot of the capture parameters
    fn config(&self) -> ProcessConfig;

    fn output_path(&self) -> PathBuf;

    /// Human-readable label
    fn name(&self) -> &str;
}

/// Builds the command line for a capture subprocess
pub trait CommandBuilder: Send + Sync {
    fn program(&self) -> &str;

    fn args(&self, config: &ProcessConfig, output: &Path) -> Vec<String>;

    /// Environment overrides for the subprocess
    fn envs(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Everything that differs between capture platforms
#[derive(Clone)]
pub struct CaptureProfile {
    pub name: &'static str,
    pub command: Arc<dyn CommandBuilder>,
    /// Extension the output path must carry, if any
    pub container: Option<&'static str>,
    pub diagnostics: DiagnosticMode,
    pub readiness: ReadinessPolicy,
    pub shutdown: ShutdownPlan,
}

impl std::fmt::Debug for CaptureProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureProfile")
            .field("name", &self.name)
            .field("program", &self.command.program())
            .field("container", &self.container)
            .field("diagnostics", &self.diagnostics)
            .field("readiness", &self.readiness)
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

/// Creates a capture source for an output path and capture parameters
pub type CaptureFactory =
    Arc<dyn Fn(PathBuf, ProcessConfig) -> Result<Box<dyn CaptureSource>, ConfigError> + Send + Sync>;
