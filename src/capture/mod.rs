//! Capture subprocess supervision
//!
//! A capture source is an external program (ffmpeg on macOS, rpicam-vid on a
//! Raspberry Pi) that encodes camera video into an output file or pipe.
//!
//! # Architecture
//!
//! * `supervisor`: lifecycle state machine exposed through [`CaptureSource`].
//! * `output`: output path normalization and preparation.
//! * `diagnostics`: classifies the subprocess's stderr.
//! * `readiness`: decides whether a launched subprocess started successfully.
//! * `shutdown`: signal escalation on stop.
//! * `macos`, `raspberry`: platform command lines and timings.

pub mod diagnostics;
pub mod macos;
pub mod output;
pub mod raspberry;
pub mod readiness;
pub mod shutdown;
pub mod supervisor;
pub mod traits;
pub mod types;

pub use supervisor::CaptureProcessSupervisor;
pub use traits::{CaptureFactory, CaptureProfile, CaptureSource, CommandBuilder};
pub use types::{ExitKind, ExitRecord, StartError, StopError, SupervisorState};

/// Capture factory for the platform this binary runs on
pub fn platform_factory(device_id: &str) -> CaptureFactory {
    if cfg!(target_os = "macos") {
        tracing::info!("Using {} (device {})", macos::NAME, device_id);
        macos::factory(device_id)
    } else {
        tracing::info!("Using {}", raspberry::NAME);
        raspberry::factory()
    }
}
