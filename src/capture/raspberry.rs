//! Raspberry Pi camera capture through rpicam-vid

use super::diagnostics::DiagnosticMode;
use super::readiness::ReadinessPolicy;
use super::shutdown::{ShutdownPlan, ShutdownSignal};
use super::supervisor::CaptureProcessSupervisor;
use super::traits::{CaptureFactory, CaptureProfile, CaptureSource, CommandBuilder};
use crate::config::{ConfigError, ProcessConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const NAME: &str = "Raspberry Pi Camera";

#[derive(Debug, Clone, Default)]
pub struct RpicamCommand;

impl CommandBuilder for RpicamCommand {
    fn program(&self) -> &str {
        "rpicam-vid"
    }

    fn args(&self, config: &ProcessConfig, output: &Path) -> Vec<String> {
        vec![
            "--width".to_string(),
            config.width.to_string(),
            "--height".to_string(),
            config.height.to_string(),
            "--framerate".to_string(),
            config.fps.to_string(),
            "--bitrate".to_string(),
            config.bitrate.to_string(),
            "--codec".to_string(),
            config.codec.clone(),
            "--profile".to_string(),
            config.profile.clone(),
            "--intra".to_string(),
            config.keyframe_interval.to_string(),
            "--quality".to_string(),
            config.quality.to_string(),
            "--output".to_string(),
            output.to_string_lossy().to_string(),
            "--nopreview".to_string(),
        ]
    }
}

/// Strategy values for Raspberry Pi capture.
///
/// rpicam-vid diagnostics are logged as-is; startup is judged on output alone.
pub fn profile() -> CaptureProfile {
    CaptureProfile {
        name: NAME,
        command: Arc::new(RpicamCommand),
        container: None,
        diagnostics: DiagnosticMode::PassThrough,
        readiness: ReadinessPolicy {
            startup_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        },
        shutdown: ShutdownPlan {
            primary: ShutdownSignal::Terminate,
            fallback: None,
            grace_period: Duration::from_millis(500),
        },
    }
}

pub fn factory() -> CaptureFactory {
    let profile = profile();
    Arc::new(
        move |output_path: PathBuf, config: ProcessConfig| -> Result<Box<dyn CaptureSource>, ConfigError> {
            let supervisor = CaptureProcessSupervisor::new(profile.clone(), output_path, config)?;
            Ok(Box::new(supervisor))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_shape() {
        let config = ProcessConfig {
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate: 25_000_000,
            codec: "h264".to_string(),
            profile: "high".to_string(),
            keyframe_interval: 30,
            quality: 90,
            start_time: None,
        };
        let args = RpicamCommand.args(&config, Path::new("/tmp/out.h264"));

        let expected = [
            "--width", "1920", "--height", "1080", "--framerate", "30", "--bitrate", "25000000",
            "--codec", "h264", "--profile", "high", "--intra", "30", "--quality", "90",
            "--output", "/tmp/out.h264", "--nopreview",
        ];
        assert_eq!(args, expected);
        assert!(RpicamCommand.envs().is_empty());
    }

    #[test]
    fn test_factory_keeps_output_path() {
        let source = factory()(PathBuf::from("/tmp/out.h264"), ProcessConfig::default()).unwrap();
        assert_eq!(source.name(), NAME);
        assert_eq!(source.output_path(), PathBuf::from("/tmp/out.h264"));
    }

    #[test]
    fn test_factory_rejects_invalid_config() {
        let config = ProcessConfig {
            width: 0,
            ..ProcessConfig::default()
        };
        assert!(factory()(PathBuf::from("/tmp/out.h264"), config).is_err());
    }
}
