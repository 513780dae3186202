//! Capture configuration
//!
//! Defines the capture parameter snapshot handed to a supervisor and the
//! application configuration file it is built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Capture parameters for one capture session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessConfig {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Frames per second (1-120)
    pub fps: u32,

    /// Target bitrate in bits per second
    pub bitrate: u64,

    /// Encoder identifier (e.g. "libx265", "h264")
    pub codec: String,

    /// Encoder profile (e.g. "main", "high")
    pub profile: String,

    /// Frames between keyframes
    pub keyframe_interval: u32,

    /// Encoder quality hint
    pub quality: u32,

    /// Set once, when the subprocess is confirmed started
    #[serde(skip_deserializing)]
    pub start_time: Option<DateTime<Utc>>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate: 25_000_000,
            codec: "libx265".to_string(),
            profile: "main".to_string(),
            keyframe_interval: 30,
            quality: 90,
            start_time: None,
        }
    }
}

impl ProcessConfig {
    /// Check the parameters are usable by a capture subprocess
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 {
            return Err(ConfigError::Invalid("camera.width must be positive".to_string()));
        }
        if self.height == 0 {
            return Err(ConfigError::Invalid("camera.height must be positive".to_string()));
        }
        if self.fps == 0 || self.fps > 120 {
            return Err(ConfigError::Invalid(
                "camera.fps must be between 1 and 120".to_string(),
            ));
        }
        if self.codec.trim().is_empty() {
            return Err(ConfigError::Invalid("camera.codec cannot be empty".to_string()));
        }
        if self.profile.trim().is_empty() {
            return Err(ConfigError::Invalid("camera.profile cannot be empty".to_string()));
        }
        if self.keyframe_interval == 0 {
            return Err(ConfigError::Invalid(
                "camera.keyframeInterval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolution formatted as `WIDTHxHEIGHT`
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Capture source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSettings {
    /// Where the capture subprocess writes its output
    pub output_path: PathBuf,

    /// avfoundation input, formatted as "VIDEO:AUDIO"
    pub device_id: String,

    /// Upper bound on a Stop issued during application shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("buffer/capture.ts"),
            device_id: "0:none".to_string(),
            shutdown_timeout_secs: 5,
        }
    }
}

/// Application configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub camera: ProcessConfig,
    pub capture: CaptureSettings,
}

impl AppConfig {
    /// Read, parse and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate()?;

        tracing::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load `path` if given, otherwise the default file when present, otherwise defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            Self::load(default_path)
        } else {
            tracing::info!("No configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.camera.validate()?;

        if self.capture.output_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("capture.outputPath cannot be empty".to_string()));
        }
        if self.capture.device_id.trim().is_empty() {
            return Err(ConfigError::Invalid("capture.deviceId cannot be empty".to_string()));
        }
        Ok(())
    }
}
