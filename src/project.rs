use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{SyncError, SyncResult};
use crate::render::CursorStyle;
use crate::sync::{ChordAnchor, UnplacedPolicy, ViewMode};

/// Where the page images of a prepared input come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSource {
    Files(Vec<PathBuf>),
    /// `<stem>.png` or `<stem>-page<N>.png` inside `dir`.
    Directory { dir: PathBuf, stem: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnsetSource {
    Listing(PathBuf),
    Midi(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Input {
    /// Engrave and synthesize a notation source with the external engines.
    Notation { source: PathBuf },
    /// Use engine outputs produced elsewhere.
    Prepared {
        pages: PageSource,
        coordinates: PathBuf,
        onsets: OnsetSource,
        #[serde(default)]
        audio: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    #[default]
    Video,
    PngFrames,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub sink: SinkKind,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("scorereel.mp4"),
            width: 1280,
            height: 720,
            fps: 30,
            sink: SinkKind::Video,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub mode: ViewMode,
    pub chord_anchor: ChordAnchor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    pub style: CursorStyle,
    pub color: String,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            style: CursorStyle::Line,
            color: "red".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub unplaced: UnplacedPolicy,
    /// Raster resolution of the page images.
    pub dpi: u32,
    /// Seconds shown after the last note when nothing else fixes the length.
    pub tail_secs: f64,
    pub pitch_lookahead: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            unplaced: UnplacedPolicy::Hold,
            dpi: 110,
            tail_secs: 1.0,
            pitch_lookahead: crate::sync::DEFAULT_LOOKAHEAD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub threads: usize,
    pub queue_depth: usize,
    pub backpressure_timeout_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            queue_depth: 8,
            backpressure_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub lilypond: String,
    pub timidity: String,
    pub ffmpeg: String,
    /// Ask each program for its version before the run starts.
    pub check_versions: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            lilypond: "lilypond".to_string(),
            timidity: "timidity".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            check_versions: true,
        }
    }
}

/// Title card shown before the score; the audio is delayed to match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleConfig {
    /// TrueType or OpenType font for the card text.
    pub font: PathBuf,
    #[serde(default = "default_title_secs")]
    pub delay_secs: f64,
    /// Defaults to the notation's `title` header, then the file name.
    #[serde(default)]
    pub name: Option<String>,
    /// Defaults to the notation's `composer` header.
    #[serde(default)]
    pub author: Option<String>,
}

fn default_title_secs() -> f64 {
    3.0
}

impl TitleConfig {
    pub fn new(font: impl Into<PathBuf>) -> Self {
        Self {
            font: font.into(),
            delay_secs: default_title_secs(),
            name: None,
            author: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub name: String,
    pub input: Input,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub cursor: CursorConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub title: Option<TitleConfig>,
}

impl Project {
    pub fn new(input: Input) -> Self {
        Self {
            name: String::new(),
            input,
            output: OutputConfig::default(),
            view: ViewConfig::default(),
            cursor: CursorConfig::default(),
            sync: SyncConfig::default(),
            render: RenderConfig::default(),
            tools: ToolsConfig::default(),
            title: None,
        }
    }

    pub fn save(&self, path: &Path) -> SyncResult<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| SyncError::unavailable(dir, e))?;
        }
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| SyncError::Config(e.to_string()))?;
        fs::write(path, ron_string).map_err(|e| SyncError::unavailable(path, e))?;
        Ok(())
    }

    /// Loads a project file. Relative paths inside it are taken relative to
    /// the file's directory.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let ron_string = fs::read_to_string(path).map_err(|e| SyncError::unavailable(path, e))?;
        let mut project: Project =
            ron::from_str(&ron_string).map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        if let Some(base) = path.parent() {
            project.resolve_paths(base);
        }
        project.validate()?;
        tracing::info!(path = %path.display(), name = %project.name, "Project loaded");
        Ok(project)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        match &mut self.input {
            Input::Notation { source } => fix(source),
            Input::Prepared {
                pages,
                coordinates,
                onsets,
                audio,
            } => {
                match pages {
                    PageSource::Files(files) => files.iter_mut().for_each(fix),
                    PageSource::Directory { dir, .. } => fix(dir),
                }
                fix(coordinates);
                match onsets {
                    OnsetSource::Listing(p) | OnsetSource::Midi(p) => fix(p),
                }
                if let Some(audio) = audio {
                    fix(audio);
                }
            }
        }
        fix(&mut self.output.path);
        if let Some(title) = &mut self.title {
            fix(&mut title.font);
        }
    }

    pub fn validate(&self) -> SyncResult<()> {
        let out = &self.output;
        if out.width == 0 || out.height == 0 || out.fps == 0 {
            return Err(SyncError::Config(format!(
                "output {}x{} @ {} fps must be non-zero",
                out.width, out.height, out.fps
            )));
        }
        if self.render.threads == 0 || self.render.queue_depth == 0 {
            return Err(SyncError::Config("render threads and queue depth must be at least 1".into()));
        }
        if self.sync.dpi == 0 {
            return Err(SyncError::Config("dpi must be positive".into()));
        }
        if !(self.sync.tail_secs.is_finite() && self.sync.tail_secs >= 0.0) {
            return Err(SyncError::Config(format!("tail {} must be non-negative", self.sync.tail_secs)));
        }
        let bad_delay = |t: &&TitleConfig| !(t.delay_secs.is_finite() && t.delay_secs >= 0.0);
        if let Some(title) = self.title.as_ref().filter(bad_delay) {
            return Err(SyncError::Config(format!("title delay {} must be non-negative", title.delay_secs)));
        }
        Ok(())
    }
}
