use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use super::{FrameSink, tail};
use crate::error::{SyncError, SyncResult};
use crate::render::RasterFrame;

/// Streams raw RGB frames into FFmpeg and muxes them with the audio file.
///
/// FFmpeg writes to a hidden sibling of the output path; the real path only
/// appears once encoding finished cleanly.
pub struct FfmpegMuxer {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Arc<Mutex<String>>,
    drain: Option<JoinHandle<()>>,
    size: (u32, u32),
    partial: PathBuf,
    output: PathBuf,
    frames: u64,
}

impl FfmpegMuxer {
    /// `audio_delay` pushes the audio back by that many seconds, to sit
    /// behind a title card.
    pub fn args(size: (u32, u32), fps: u32, audio: Option<&Path>, audio_delay: f64, target: &Path) -> Vec<String> {
        let mut args: Vec<String> = [
            "-y",
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(format!("{}x{}", size.0, size.1));
        args.extend(["-r".to_string(), fps.to_string(), "-i".to_string(), "-".to_string()]);
        if let Some(audio) = audio {
            args.extend(["-i".to_string(), audio.display().to_string()]);
            args.extend(["-map", "0:v", "-map", "1:a", "-c:a", "aac"].iter().map(|s| s.to_string()));
            let delay_ms = (audio_delay * 1000.0).round() as u64;
            if delay_ms > 0 {
                args.extend(["-af".to_string(), format!("adelay={delay_ms}:all=1")]);
            }
        }
        args.extend(
            ["-c:v", "libx264", "-pix_fmt", "yuv420p", "-shortest"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(target.display().to_string());
        args
    }

    pub fn partial_path(output: &Path) -> PathBuf {
        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output.mp4".to_string());
        output.with_file_name(format!(".partial-{name}"))
    }

    pub fn spawn(
        program: &str,
        size: (u32, u32),
        fps: u32,
        audio: Option<&Path>,
        audio_delay: f64,
        output: &Path,
    ) -> SyncResult<Self> {
        let partial = Self::partial_path(output);
        let args = Self::args(size, fps, audio, audio_delay, &partial);
        tracing::debug!(args = ?args, "Running ffmpeg");

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SyncError::Encoder(format!("failed to start {program}: {e}")))?;

        tracing::info!(
            pid = child.id(),
            width = size.0,
            height = size.1,
            fps,
            output = %output.display(),
            "ffmpeg process started"
        );

        let stdin = child.stdin.take();
        let stderr_pipe = child.stderr.take();
        let stderr = Arc::new(Mutex::new(String::new()));

        // Keep draining so a chatty encoder never blocks on a full pipe.
        let drain = stderr_pipe.map(|mut pipe| {
            let sink = Arc::clone(&stderr);
            std::thread::spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match pipe.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => sink.lock().push_str(&String::from_utf8_lossy(&buf[..n])),
                    }
                }
            })
        });

        Ok(Self {
            child: Some(child),
            stdin,
            stderr,
            drain,
            size,
            partial,
            output: output.to_path_buf(),
            frames: 0,
        })
    }

    fn failure(&self, what: impl std::fmt::Display) -> SyncError {
        let stderr = self.stderr.lock();
        SyncError::Encoder(format!("{what}: {}", tail(&stderr, 20)))
    }

    fn join_drain(&mut self) {
        if let Some(handle) = self.drain.take() {
            let _ = handle.join();
        }
    }

    /// Closes the input, waits for the encoder and moves its output into
    /// place.
    fn complete(&mut self) -> SyncResult<()> {
        // Closing stdin ends the input stream.
        self.stdin = None;
        let Some(mut child) = self.child.take() else {
            return Err(SyncError::Encoder("encoder already stopped".into()));
        };
        let waited = child.wait();
        if waited.is_err() {
            let _ = child.kill();
        }
        self.join_drain();
        let status = waited.map_err(|e| SyncError::Encoder(format!("failed to wait on ffmpeg: {e}")))?;

        if !status.success() {
            return Err(self.failure(format!("ffmpeg exited with {status}")));
        }
        fs::rename(&self.partial, &self.output).map_err(|e| SyncError::unavailable(&self.output, e))?;
        tracing::info!(frames = self.frames, output = %self.output.display(), "Encoded video");
        Ok(())
    }

    fn kill(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.join_drain();
        let _ = fs::remove_file(&self.partial);
    }
}

impl FrameSink for FfmpegMuxer {
    fn write_frame(&mut self, frame: &RasterFrame) -> SyncResult<()> {
        if frame.image.dimensions() != self.size {
            return Err(SyncError::Encoder(format!(
                "frame {} is {:?}, encoder expects {:?}",
                frame.index,
                frame.image.dimensions(),
                self.size
            )));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(SyncError::Encoder("encoder input already closed".into()));
        };
        if let Err(e) = stdin.write_all(frame.image.as_raw()) {
            return Err(self.failure(format!("writing frame {} failed ({e})", frame.index)));
        }
        self.frames += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> SyncResult<()> {
        let result = self.complete();
        if result.is_err() {
            let _ = fs::remove_file(&self.partial);
        }
        result
    }

    fn abort(mut self: Box<Self>) {
        tracing::warn!(frames = self.frames, "Aborting encoder, discarding partial output");
        self.kill();
    }
}

impl Drop for FfmpegMuxer {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.kill();
        }
    }
}
