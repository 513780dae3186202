//! Capture output target
//!
//! Normalizes the output path for the container a capture subprocess writes,
//! prepares its parent directory and clears stale output before a session.
//! The output may be a regular file or a named pipe owned by another process.

use super::types::StartError;
use std::fs;
use std::path::{Path, PathBuf};

/// Output path of one capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    path: PathBuf,
}

impl OutputTarget {
    /// Resolve `requested` so it carries `extension`, if one is required
    pub fn resolve(requested: impl Into<PathBuf>, extension: Option<&str>) -> Self {
        let mut path = requested.into();
        if let Some(ext) = extension {
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                path.set_extension(ext);
            }
        }
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the output currently exists as a named pipe.
    /// Not cached: the answer is only known once the path exists.
    pub fn is_named_pipe(&self) -> bool {
        is_named_pipe(&self.path)
    }

    /// Whether the output is ready to be consumed: a named pipe, or a
    /// regular file holding data
    pub fn is_ready(&self) -> bool {
        match fs::metadata(&self.path) {
            Ok(meta) if is_fifo(&meta) => {
                tracing::info!("Capture output fifo ready: {:?}", self.path);
                true
            }
            Ok(meta) if meta.len() > 0 => {
                tracing::info!(
                    "Capture output file created: {:?} ({} bytes)",
                    self.path,
                    meta.len()
                );
                true
            }
            _ => false,
        }
    }

    /// Create the parent directory and remove stale output
    pub fn prepare(&self) -> Result<(), StartError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent).map_err(|source| StartError::Filesystem {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        if fs::symlink_metadata(&self.path).is_err() {
            return Ok(());
        }

        if self.is_named_pipe() {
            tracing::info!("Output path is a fifo, skipping removal: {:?}", self.path);
        } else if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove existing output file {:?}: {}", self.path, e);
        } else {
            tracing::debug!("Removed stale output file {:?}", self.path);
        }
        Ok(())
    }
}

#[cfg(unix)]
fn create_dir_all(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o755).create(dir)
}

#[cfg(not(unix))]
fn create_dir_all(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

/// Check whether `path` exists and is a named pipe
pub fn is_named_pipe(path: &Path) -> bool {
    fs::metadata(path).map(|meta| is_fifo(&meta)).unwrap_or(false)
}

#[cfg(unix)]
fn is_fifo(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    meta.file_type().is_fifo()
}

#[cfg(not(unix))]
fn is_fifo(_meta: &fs::Metadata) -> bool {
    false
}
