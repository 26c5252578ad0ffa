use std::path::{Path, PathBuf};

use super::run_tool;
use crate::error::{SyncError, SyncResult};

pub struct TimiditySynth {
    program: String,
}

impl TimiditySynth {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Renders `midi` to `<work>/score.wav`.
    pub fn synthesize(&self, midi: &Path, work: &Path) -> SyncResult<PathBuf> {
        let wav = work.join("score.wav");
        let args = vec![
            midi.display().to_string(),
            "-Ow".to_string(),
            "-o".to_string(),
            wav.display().to_string(),
        ];
        tracing::info!(midi = %midi.display(), "Synthesizing audio");
        run_tool(&self.program, &args, Some(work))?;

        if !wav.is_file() {
            return Err(SyncError::ToolFailed {
                program: self.program.clone(),
                message: format!("{} was not written", wav.display()),
            });
        }
        Ok(wav)
    }
}
