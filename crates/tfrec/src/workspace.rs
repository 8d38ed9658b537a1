//! Per-run scratch directory.
//!
//! Every file a run produces (segments, concat manifest, artwork, muxed
//! output) lives under one uniquely named directory that is removed
//! recursively when the run ends, whichever way it ends. Normal paths call
//! [`WorkspaceDir::cleanup`]; `Drop` covers early returns and unwinding.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::PipelineError;

#[derive(Debug)]
pub struct WorkspaceDir {
    path: PathBuf,
    removed: bool,
}

impl WorkspaceDir {
    /// Create `<root>/tfrec-<uuid>`.
    pub async fn create(root: &Path) -> Result<Self, PipelineError> {
        let path = root.join(format!("tfrec-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| PipelineError::workspace(&path, e))?;
        debug!(path = %path.display(), "Created workspace");
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the directory and everything in it.
    pub async fn cleanup(mut self) -> Result<(), PipelineError> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed workspace");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::workspace(&self.path, e)),
        }
    }
}

impl Drop for WorkspaceDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed workspace on drop"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove workspace"),
        }
    }
}
