//! Scratch file guard
//!
//! One scratch file exists per pipeline run. The guard deletes the path on
//! every exit from the run — explicit removal in the persist stage, or the
//! Drop impl for any earlier failure, panic, or caller-initiated
//! cancellation of the future.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use uuid::Uuid;

pub struct ScratchFile {
    path: PathBuf,
    cleaned: bool,
}

impl ScratchFile {
    /// Write `data` to a fresh uniquely named file under `tmp_dir`.
    pub async fn create(tmp_dir: &Path, extension: &str, data: &[u8]) -> std::io::Result<Self> {
        let path = tmp_dir.join(format!("{}.{}", Uuid::new_v4(), extension));
        tokio::fs::write(&path, data).await?;
        Ok(Self {
            path,
            cleaned: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current file contents.
    pub async fn read(&self) -> std::io::Result<Bytes> {
        Ok(Bytes::from(tokio::fs::read(&self.path).await?))
    }

    /// Delete the file now instead of at drop time.
    pub async fn remove(mut self) -> std::io::Result<()> {
        self.cleaned = true;
        tokio::fs::remove_file(&self.path).await
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.cleaned {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to clean scratch file");
            }
        }
    }
}
