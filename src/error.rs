use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Engraver output is inconsistent with the rendered pages.
    #[error("malformed coordinate data at line {line}: {message}")]
    MalformedCoordinateData { line: usize, message: String },

    #[error("malformed onset data at line {line}: {message}")]
    MalformedOnsetData { line: usize, message: String },

    /// The declared format of an input listing is missing or unknown.
    #[error("unsupported {what} format: {declared}")]
    UnsupportedFormat { what: &'static str, declared: String },

    #[error("no note onsets found; nothing to synchronize")]
    EmptyTimeline,

    /// An onset could not be resolved to a notated position in strict mode,
    /// or no onset could be placed at all.
    #[error("onset '{id}' at {time:.3}s has no notated position")]
    IdentifierMismatch { id: String, time: f64 },

    #[error("encoder did not accept a frame within {waited_ms} ms")]
    EncoderBackpressureTimeout { waited_ms: u64 },

    #[error("cannot use {}: {reason}", path.display())]
    ResourceUnavailable { path: PathBuf, reason: String },

    #[error("encoder failed: {0}")]
    Encoder(String),

    #[error("{program} failed: {message}")]
    ToolFailed { program: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("run cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn coords(line: usize, message: impl Into<String>) -> Self {
        SyncError::MalformedCoordinateData {
            line,
            message: message.into(),
        }
    }

    pub fn onsets(line: usize, message: impl Into<String>) -> Self {
        SyncError::MalformedOnsetData {
            line,
            message: message.into(),
        }
    }

    pub fn unavailable(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        SyncError::ResourceUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Engrave,
    Synthesize,
    Extract,
    Timeline,
    Correlate,
    Plan,
    Title,
    Render,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Engrave => "engrave",
            Stage::Synthesize => "synthesize",
            Stage::Extract => "extract",
            Stage::Timeline => "timeline",
            Stage::Correlate => "correlate",
            Stage::Plan => "plan",
            Stage::Title => "title",
            Stage::Render => "render",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Top-level failure of a pipeline run: which stage failed and why.
#[derive(Error, Debug)]
#[error("{stage} stage failed: {source}")]
pub struct RunError {
    pub stage: Stage,
    #[source]
    pub source: SyncError,
}

pub trait StageExt<T> {
    fn stage(self, stage: Stage) -> Result<T, RunError>;
}

impl<T> StageExt<T> for SyncResult<T> {
    fn stage(self, stage: Stage) -> Result<T, RunError> {
        self.map_err(|source| RunError { stage, source })
    }
}
