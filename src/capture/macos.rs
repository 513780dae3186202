//! macOS camera capture through ffmpeg's avfoundation input
//!
//! Encodes the camera feed to MPEG-TS for live buffering. Startup failures
//! (missing device, denied camera permission) are detected from ffmpeg's
//! stderr.

use super::diagnostics::DiagnosticMode;
use super::readiness::ReadinessPolicy;
use super::shutdown::{ShutdownPlan, ShutdownSignal};
use super::supervisor::CaptureProcessSupervisor;
use super::traits::{CaptureFactory, CaptureProfile, CaptureSource, CommandBuilder};
use crate::config::{ConfigError, ProcessConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const NAME: &str = "macOS Camera";

/// Container the transcoder writes
pub const CONTAINER: &str = "ts";

/// ffmpeg command line for avfoundation capture
#[derive(Debug, Clone)]
pub struct AvFoundationCommand {
    /// avfoundation input, formatted as "VIDEO:AUDIO" (e.g. "0:none")
    pub device_id: String,
}

impl CommandBuilder for AvFoundationCommand {
    fn program(&self) -> &str {
        "ffmpeg"
    }

    fn args(&self, config: &ProcessConfig, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-f".to_string(),
            "avfoundation".to_string(),
            "-framerate".to_string(),
            config.fps.to_string(),
            "-pixel_format".to_string(),
            "uyvy422".to_string(), // native camera format
            "-video_size".to_string(),
            config.resolution(),
            "-thread_queue_size".to_string(),
            "1024".to_string(),
            "-i".to_string(),
            self.device_id.clone(),
            "-c:v".to_string(),
            config.codec.clone(),
            "-profile:v".to_string(),
            config.profile.clone(),
            "-preset".to_string(),
            "ultrafast".to_string(),
            "-tune".to_string(),
            "zerolatency".to_string(),
            "-b:v".to_string(),
            config.bitrate.to_string(),
            "-maxrate".to_string(),
            config.bitrate.to_string(),
            "-bufsize".to_string(),
            config.bitrate.saturating_mul(2).to_string(),
            "-g".to_string(),
            config.keyframe_interval.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-f".to_string(),
            "mpegts".to_string(),
            "-flush_packets".to_string(),
            "1".to_string(),
            "-muxdelay".to_string(),
            "0".to_string(),
            "-muxpreload".to_string(),
            "0".to_string(),
            "-y".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    fn envs(&self) -> Vec<(String, String)> {
        // Skip the interactive camera authorization prompt
        vec![("AVFOUNDATION_SKIP_AUTHENTICATION".to_string(), "1".to_string())]
    }
}

/// Strategy values for macOS capture
pub fn profile(device_id: impl Into<String>) -> CaptureProfile {
    CaptureProfile {
        name: NAME,
        command: Arc::new(AvFoundationCommand {
            device_id: device_id.into(),
        }),
        container: Some(CONTAINER),
        diagnostics: DiagnosticMode::Structured,
        readiness: ReadinessPolicy {
            startup_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        },
        shutdown: ShutdownPlan {
            primary: ShutdownSignal::Interrupt,
            fallback: Some(ShutdownSignal::Terminate),
            grace_period: Duration::from_secs(2),
        },
    }
}

/// Factory producing macOS capture sources for `device_id`
pub fn factory(device_id: impl Into<String>) -> CaptureFactory {
    let profile = profile(device_id);
    Arc::new(
        move |output_path: PathBuf, config: ProcessConfig| -> Result<Box<dyn CaptureSource>, ConfigError> {
            let supervisor = CaptureProcessSupervisor::new(profile.clone(), output_path, config)?;
            Ok(Box::new(supervisor))
        },
    )
}
