use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{SyncError, SyncResult};

/// Per-run state handed to every stage: a private work directory and the
/// final output path. Nothing is resolved against the process working
/// directory.
pub struct RunContext {
    work: TempDir,
    output: PathBuf,
    keep_work: bool,
}

impl RunContext {
    pub fn new(output: impl Into<PathBuf>, keep_work: bool) -> SyncResult<Self> {
        let work = tempfile::Builder::new()
            .prefix("scorereel-")
            .tempdir()
            .map_err(|e| SyncError::unavailable(std::env::temp_dir(), e))?;
        Ok(Self::with_dir(work, output, keep_work))
    }

    pub fn in_dir(parent: &Path, output: impl Into<PathBuf>, keep_work: bool) -> SyncResult<Self> {
        let work = tempfile::Builder::new()
            .prefix("scorereel-")
            .tempdir_in(parent)
            .map_err(|e| SyncError::unavailable(parent, e))?;
        Ok(Self::with_dir(work, output, keep_work))
    }

    fn with_dir(work: TempDir, output: impl Into<PathBuf>, keep_work: bool) -> Self {
        tracing::debug!(work = %work.path().display(), "Created work directory");
        Self {
            work,
            output: output.into(),
            keep_work,
        }
    }

    pub fn work_dir(&self) -> &Path {
        self.work.path()
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Removes the work directory, or leaves it on disk when asked to keep
    /// it. Returns the kept path.
    pub fn close(self) -> Option<PathBuf> {
        if self.keep_work {
            let kept = self.work.keep();
            tracing::info!(work = %kept.display(), "Keeping work directory");
            Some(kept)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_dir_is_removed_unless_kept() {
        let parent = tempfile::tempdir().unwrap();

        let ctx = RunContext::in_dir(parent.path(), "out.mp4", false).unwrap();
        let work = ctx.work_dir().to_path_buf();
        assert!(work.is_dir());
        assert_eq!(ctx.close(), None);
        assert!(!work.exists());

        let ctx = RunContext::in_dir(parent.path(), "out.mp4", true).unwrap();
        let work = ctx.work_dir().to_path_buf();
        assert_eq!(ctx.close(), Some(work.clone()));
        assert!(work.is_dir());
    }
}
