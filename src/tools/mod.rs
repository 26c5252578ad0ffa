//! Drivers for the external programs the pipeline hands work to.

mod ffmpeg;
mod lilypond;
mod png_sink;
mod timidity;

pub use ffmpeg::FfmpegMuxer;
pub use lilypond::{EngravedScore, LilyPondEngraver};
pub use png_sink::PngSequenceSink;
pub use timidity::TimiditySynth;

use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{SyncError, SyncResult};
use crate::render::RasterFrame;

/// Receives rendered frames strictly in index order.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &RasterFrame) -> SyncResult<()>;

    /// Completes the output. Only after this returns Ok does the result exist
    /// at its final path.
    fn finish(self: Box<Self>) -> SyncResult<()>;

    /// Discards partial output.
    fn abort(self: Box<Self>);
}

/// Runs `program` to completion and fails with its stderr when it exits
/// unsuccessfully.
pub(crate) fn run_tool(program: &str, args: &[String], cwd: Option<&Path>) -> SyncResult<String> {
    tracing::debug!(program, args = ?args, "Running external tool");
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd.output().map_err(|e| SyncError::ToolFailed {
        program: program.to_string(),
        message: format!("could not start: {e}"),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SyncError::ToolFailed {
            program: program.to_string(),
            message: format!("{}: {}", output.status, tail(&stderr, 20)),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Checks that `program` runs at all, returning the first line it prints.
pub fn check_tool(program: &str, version_flag: &str) -> SyncResult<String> {
    let out = run_tool(program, &[version_flag.to_string()], None)?;
    let first = out.lines().next().unwrap_or_default().trim().to_string();
    tracing::info!(program, version = %first, "Found external tool");
    Ok(first)
}

/// The last `lines` lines of `text`.
pub(crate) fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
