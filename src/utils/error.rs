//! Error types and handling
//!
//! Application-level error type wrapping the errors of each module.

use crate::capture::{StartError, StopError};
use crate::config::ConfigError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Capture start failed: {0}")]
    Start(#[from] StartError),

    #[error("Capture stop failed: {0}")]
    Stop(#[from] StopError),
}

impl AppError {
    /// Stable code for the error category
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Start(StartError::Cancelled) | AppError::Stop(StopError::Cancelled) => {
                "CANCELLED"
            }
            AppError::Start(_) => "START_ERROR",
            AppError::Stop(_) => "STOP_ERROR",
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
