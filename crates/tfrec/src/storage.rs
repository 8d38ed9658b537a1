//! Seam to durable storage for finished recordings.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::PipelineError;

#[async_trait]
pub trait OutputStore: Send + Sync {
    /// Persist the file at `path` under `file_name` and return its stored location.
    ///
    /// Errors surface as [`PipelineError::UploadFailure`].
    async fn store(&self, path: &Path, file_name: &str) -> Result<String, PipelineError>;
}

/// Copies recordings into a local directory.
#[derive(Debug, Clone)]
pub struct LocalDirectoryStore {
    root: PathBuf,
}

impl LocalDirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl OutputStore for LocalDirectoryStore {
    async fn store(&self, path: &Path, file_name: &str) -> Result<String, PipelineError> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            PipelineError::upload(format!("cannot create {}: {e}", self.root.display()))
        })?;

        let dest = self.root.join(file_name);
        // Partial copies never carry the final name.
        let partial = self.root.join(format!(".{file_name}.part"));

        let copied = match copy_verified(path, &partial, &dest).await {
            Ok(copied) => copied,
            Err(e) => {
                discard_partial(&partial).await;
                return Err(e);
            }
        };

        debug!(bytes = copied, "Copied recording");
        info!(location = %dest.display(), "Recording stored");
        Ok(dest.to_string_lossy().into_owned())
    }
}

/// Copy `src` to `partial`, check the size, then move it to `dest`.
async fn copy_verified(src: &Path, partial: &Path, dest: &Path) -> Result<u64, PipelineError> {
    let copied = fs::copy(src, partial).await.map_err(|e| {
        PipelineError::upload(format!(
            "copy {} -> {} failed: {e}",
            src.display(),
            partial.display()
        ))
    })?;

    let expected = fs::metadata(src)
        .await
        .map_err(|e| PipelineError::upload(format!("stat {} failed: {e}", src.display())))?
        .len();
    if copied != expected {
        return Err(PipelineError::upload(format!(
            "size mismatch storing {}: source {expected} bytes, copied {copied}",
            dest.display()
        )));
    }

    fs::rename(partial, dest).await.map_err(|e| {
        PipelineError::upload(format!("rename to {} failed: {e}", dest.display()))
    })?;
    Ok(copied)
}

async fn discard_partial(partial: &Path) {
    match fs::remove_file(partial).await {
        Ok(()) => debug!(path = %partial.display(), "Removed partial copy"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %partial.display(), error = %e, "Failed to remove partial copy"),
    }
}
