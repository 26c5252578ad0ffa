use std::fs;
use std::path::{Path, PathBuf};

use super::FrameSink;
use crate::error::{SyncError, SyncResult};
use crate::render::RasterFrame;

/// Writes `frame%06d.png` files into a directory instead of encoding video.
/// Frames go to a staging directory that is renamed into place on finish.
pub struct PngSequenceSink {
    staging: PathBuf,
    output: PathBuf,
    next: u64,
}

impl PngSequenceSink {
    pub fn create(output: &Path) -> SyncResult<Self> {
        if output.exists() {
            return Err(SyncError::unavailable(output, "frame directory already exists"));
        }
        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frames".to_string());
        let staging = output.with_file_name(format!(".partial-{name}"));
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| SyncError::unavailable(&staging, e))?;
        }
        fs::create_dir_all(&staging).map_err(|e| SyncError::unavailable(&staging, e))?;
        Ok(Self {
            staging,
            output: output.to_path_buf(),
            next: 0,
        })
    }

    pub fn frame_name(index: u64) -> String {
        format!("frame{index:06}.png")
    }
}

impl FrameSink for PngSequenceSink {
    fn write_frame(&mut self, frame: &RasterFrame) -> SyncResult<()> {
        if frame.index != self.next {
            return Err(SyncError::Encoder(format!(
                "frame {} arrived, expected {}",
                frame.index, self.next
            )));
        }
        let path = self.staging.join(Self::frame_name(frame.index));
        frame
            .image
            .save(&path)
            .map_err(|e| SyncError::unavailable(&path, e))?;
        self.next += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> SyncResult<()> {
        fs::rename(&self.staging, &self.output).map_err(|e| SyncError::unavailable(&self.output, e))?;
        tracing::info!(frames = self.next, output = %self.output.display(), "Wrote frame sequence");
        Ok(())
    }

    fn abort(self: Box<Self>) {
        let _ = fs::remove_dir_all(&self.staging);
    }
}
