use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender};
use parking_lot::Mutex;

use crate::audio::{resolve_duration, wav_duration};
use crate::context::RunContext;
use crate::error::{RunError, Stage, StageExt, SyncError, SyncResult};
use crate::project::{Input, OnsetSource, PageSource, Project, SinkKind, TitleConfig};
use crate::render::{CursorOverlay, FrameRenderer, RasterFrame, TitleCard, TitleSegment};
use crate::score::{LySource, NoteCoordinateExtractor, PageSet, discover_pages};
use crate::sync::{EventCorrelator, PitchMatcher, ScrollWindowPlanner, ViewportPlan, Waypoint};
use crate::timing::{MidiTimelineBuilder, read_midi_file, read_onset_listing};
use crate::tools::{FfmpegMuxer, FrameSink, LilyPondEngraver, PngSequenceSink, TimiditySynth, check_tool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub stage: Stage,
    pub frames_done: u64,
    pub frames_total: u64,
}

pub type ProgressCallback = Box<dyn FnMut(Progress) + Send>;

/// Shared flag that stops a run between frames.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything computed before the first frame is rendered.
pub struct PreparedRun {
    pub pages: Arc<PageSet>,
    pub waypoints: Vec<Waypoint>,
    pub plan: Arc<ViewportPlan>,
    pub audio: Option<PathBuf>,
    /// Length of the synchronized score, title excluded.
    pub duration: f64,
    pub title: Option<TitleSegment>,
}

impl PreparedRun {
    /// Seconds the audio starts after the first frame.
    pub fn audio_delay(&self) -> f64 {
        self.title.as_ref().map_or(0.0, |t| t.offset_secs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    /// Length of the video, title included.
    pub duration: f64,
    pub waypoints: usize,
}

/// Engine outputs (or user-prepared files) the analysis stages read.
struct SourceFiles {
    pages: Vec<PathBuf>,
    coordinates: PathBuf,
    onsets: OnsetSource,
    audio: Option<PathBuf>,
}

pub struct PipelineDriver {
    project: Project,
    progress: Option<ProgressCallback>,
    cancel: CancelToken,
}

impl PipelineDriver {
    pub fn new(project: Project) -> Self {
        Self {
            project,
            progress: None,
            cancel: CancelToken::default(),
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Full run into the sink the project asks for.
    pub fn run(&mut self, ctx: &RunContext) -> Result<RunSummary, RunError> {
        let prepared = self.prepare(ctx)?;
        let sink = self
            .open_sink(ctx, prepared.audio.as_deref(), prepared.audio_delay())
            .stage(Stage::Render)?;
        self.render(prepared, sink)
    }

    /// Full run into a caller-supplied sink.
    pub fn run_with_sink(&mut self, ctx: &RunContext, sink: Box<dyn FrameSink>) -> Result<RunSummary, RunError> {
        match self.prepare(ctx) {
            Ok(prepared) => self.render(prepared, sink),
            Err(e) => {
                sink.abort();
                Err(e)
            }
        }
    }

    /// Runs every stage up to and including planning.
    pub fn prepare(&mut self, ctx: &RunContext) -> Result<PreparedRun, RunError> {
        let files = self.gather_sources(ctx)?;

        self.enter(Stage::Extract)?;
        let pages = PageSet::load(&files.pages).stage(Stage::Extract)?;
        let dims = pages.dimensions();
        let coords = NoteCoordinateExtractor::new(self.project.sync.dpi as f64)
            .extract_file(&files.coordinates, &dims)
            .stage(Stage::Extract)?;
        tracing::info!(pages = pages.len(), notes = coords.len(), "Extracted note coordinates");

        self.enter(Stage::Timeline)?;
        let timeline = match &files.onsets {
            OnsetSource::Listing(path) => read_onset_listing(path),
            OnsetSource::Midi(path) => read_midi_file(path).map(|mut stream| {
                PitchMatcher::new(self.project.sync.pitch_lookahead).assign(&mut stream, &coords);
                stream
            }),
        }
        .and_then(|stream| MidiTimelineBuilder::build(&stream))
        .stage(Stage::Timeline)?;

        self.enter(Stage::Correlate)?;
        let waypoints = EventCorrelator::new(self.project.sync.unplaced)
            .correlate(&timeline, &coords)
            .stage(Stage::Correlate)?;

        self.enter(Stage::Plan)?;
        let audio_secs = files.audio.as_deref().and_then(|path| match wav_duration(path) {
            Ok(secs) => Some(secs),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot read audio length, falling back to note timing");
                None
            }
        });
        let last = waypoints.last().map_or(0.0, |w| w.time);
        let duration = resolve_duration(audio_secs, timeline.end_time, last, self.project.sync.tail_secs);

        let out = &self.project.output;
        let plan = ScrollWindowPlanner::new(out.fps, (out.width, out.height), self.project.view.mode, self.project.view.chord_anchor)
            .and_then(|planner| planner.plan(&waypoints, &dims, duration))
            .stage(Stage::Plan)?;

        let title = match self.project.title.clone() {
            Some(cfg) => {
                self.enter(Stage::Title)?;
                Some(self.title_segment(&cfg).stage(Stage::Title)?)
            }
            None => None,
        };

        Ok(PreparedRun {
            pages: Arc::new(pages),
            waypoints,
            plan: Arc::new(plan),
            audio: files.audio,
            duration,
            title,
        })
    }

    fn title_segment(&self, cfg: &TitleConfig) -> SyncResult<TitleSegment> {
        let (name, author) = self.title_text(cfg);
        let card = TitleCard::load(&cfg.font, &name, author)?;
        let out = &self.project.output;
        let segment = TitleSegment::new(card.render((out.width, out.height)), out.fps, cfg.delay_secs);
        tracing::info!(name = %name, frames = segment.frames, "Prepared title card");
        Ok(segment)
    }

    /// Configured text first, then the notation header, then file names.
    fn title_text(&self, cfg: &TitleConfig) -> (String, Option<String>) {
        let (header, file) = match &self.project.input {
            Input::Notation { source } => (LySource::load(source).ok(), source),
            Input::Prepared { .. } => (None, &self.project.output.path),
        };
        let field = |name: &str| header.as_ref().and_then(|h| h.header_field(name));
        let name = cfg
            .name
            .clone()
            .or_else(|| field("title"))
            .or_else(|| Some(self.project.name.clone()).filter(|n| !n.is_empty()))
            .or_else(|| file.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_default();
        let author = cfg.author.clone().or_else(|| field("composer"));
        (name, author)
    }

    fn gather_sources(&mut self, ctx: &RunContext) -> Result<SourceFiles, RunError> {
        match self.project.input.clone() {
            Input::Notation { source } => {
                let tools = self.project.tools.clone();
                if tools.check_versions {
                    check_tool(&tools.lilypond, "-v").stage(Stage::Engrave)?;
                    check_tool(&tools.timidity, "-v").stage(Stage::Synthesize)?;
                    if self.project.output.sink == SinkKind::Video {
                        check_tool(&tools.ffmpeg, "-version").stage(Stage::Render)?;
                    }
                }

                self.enter(Stage::Engrave)?;
                let engraved = LilyPondEngraver::new(&tools.lilypond, self.project.sync.dpi)
                    .engrave(&source, ctx.work_dir())
                    .stage(Stage::Engrave)?;

                self.enter(Stage::Synthesize)?;
                let wav = TimiditySynth::new(&tools.timidity)
                    .synthesize(&engraved.midi, ctx.work_dir())
                    .stage(Stage::Synthesize)?;

                Ok(SourceFiles {
                    pages: engraved.pages,
                    coordinates: engraved.coordinates,
                    onsets: OnsetSource::Midi(engraved.midi),
                    audio: Some(wav),
                })
            }
            Input::Prepared {
                pages,
                coordinates,
                onsets,
                audio,
            } => {
                tracing::debug!("Prepared input, skipping engrave and synthesize");
                if let Some(missing) = audio.as_deref().filter(|a| !a.is_file()) {
                    return Err(SyncError::unavailable(missing, "audio file not found")).stage(Stage::Extract);
                }
                let pages = match pages {
                    PageSource::Files(files) => files,
                    PageSource::Directory { dir, stem } => discover_pages(&dir, &stem).stage(Stage::Extract)?,
                };
                Ok(SourceFiles {
                    pages,
                    coordinates,
                    onsets,
                    audio,
                })
            }
        }
    }

    fn open_sink(&self, ctx: &RunContext, audio: Option<&Path>, audio_delay: f64) -> SyncResult<Box<dyn FrameSink>> {
        let out = &self.project.output;
        let sink: Box<dyn FrameSink> = match out.sink {
            SinkKind::Video => Box::new(FfmpegMuxer::spawn(
                &self.project.tools.ffmpeg,
                (out.width, out.height),
                out.fps,
                audio,
                audio_delay,
                ctx.output(),
            )?),
            SinkKind::PngFrames => Box::new(PngSequenceSink::create(ctx.output())?),
        };
        Ok(sink)
    }

    /// Renders every planned frame into `sink`, finishing it on success and
    /// aborting it on any failure.
    pub fn render(&mut self, prepared: PreparedRun, mut sink: Box<dyn FrameSink>) -> Result<RunSummary, RunError> {
        if let Err(e) = self.enter(Stage::Render) {
            sink.abort();
            return Err(e);
        }
        let out = &self.project.output;
        let renderer = FrameRenderer::new(
            Arc::clone(&prepared.pages),
            (out.width, out.height),
            CursorOverlay::new(self.project.cursor.style, &self.project.cursor.color),
        );

        let written = self.render_frames(renderer, Arc::clone(&prepared.plan), prepared.title.as_ref(), sink.as_mut());
        let frames = match written {
            Ok(frames) => frames,
            Err(e) => {
                sink.abort();
                return Err(e).stage(Stage::Render);
            }
        };
        sink.finish().stage(Stage::Render)?;

        let duration = prepared.duration + prepared.audio_delay();
        tracing::info!(frames, duration_secs = duration, "Run complete");
        Ok(RunSummary {
            frames,
            duration,
            waypoints: prepared.waypoints.len(),
        })
    }

    /// Title frames go out first. Then worker `k` of `n` renders plan frames
    /// `k, k + n, ...` into its own bounded queue; queues are drained
    /// round-robin so the sink sees frames in index order.
    fn render_frames(
        &mut self,
        renderer: FrameRenderer,
        plan: Arc<ViewportPlan>,
        title: Option<&TitleSegment>,
        sink: &mut dyn FrameSink,
    ) -> SyncResult<u64> {
        let planned = plan.frame_count();
        let lead = title.map_or(0, |t| t.frames);
        let total = lead + planned;
        let cfg = self.project.render.clone();
        let workers = cfg.threads.clamp(1, planned.max(1) as usize);
        let timeout = Duration::from_millis(cfg.backpressure_timeout_ms);
        let stalled: Mutex<Option<SyncError>> = Mutex::new(None);
        let cancel = self.cancel.clone();
        let progress = &mut self.progress;
        let mut report = |done: u64| {
            if let Some(cb) = progress.as_mut() {
                cb(Progress {
                    stage: Stage::Render,
                    frames_done: done,
                    frames_total: total,
                });
            }
        };

        tracing::info!(frames = total, title_frames = lead, workers, queue_depth = cfg.queue_depth, "Rendering frames");

        thread::scope(|scope| {
            let mut queues: Vec<Receiver<SyncResult<RasterFrame>>> = Vec::with_capacity(workers);
            for k in 0..workers {
                let (tx, rx) = channel::bounded(cfg.queue_depth);
                queues.push(rx);
                let stream = renderer.clone().into_stream(Arc::clone(&plan), k as u64, workers as u64);
                let (cancel, stalled) = (&cancel, &stalled);
                scope.spawn(move || render_worker(stream, tx, timeout, cancel, stalled));
            }

            let result = (|| -> SyncResult<u64> {
                if let Some(title) = title {
                    for index in 0..lead {
                        cancel.check()?;
                        sink.write_frame(&title.frame(index))?;
                        report(index + 1);
                    }
                }
                drain_queues(&queues, planned, lead, sink, &cancel, &stalled, &mut report)?;
                Ok(total)
            })();

            // Unblocks any worker still waiting on a full queue.
            drop(queues);
            result
        })
    }

    fn enter(&mut self, stage: Stage) -> Result<(), RunError> {
        self.cancel.check().stage(stage)?;
        tracing::info!(stage = %stage, "Stage started");
        if let Some(cb) = self.progress.as_mut() {
            cb(Progress {
                stage,
                frames_done: 0,
                frames_total: 0,
            });
        }
        Ok(())
    }
}

/// Pulls `frames` plan frames round-robin from the worker queues and hands
/// them to `sink` numbered from `first_index`. `written` is told how many
/// frames of the whole video are out after each one.
fn drain_queues(
    queues: &[Receiver<SyncResult<RasterFrame>>],
    frames: u64,
    first_index: u64,
    sink: &mut dyn FrameSink,
    cancel: &CancelToken,
    stalled: &Mutex<Option<SyncError>>,
    written: &mut dyn FnMut(u64),
) -> SyncResult<()> {
    let workers = queues.len().max(1) as u64;
    for index in 0..frames {
        cancel.check()?;
        let mut frame = match queues[(index % workers) as usize].recv() {
            Ok(item) => item?,
            Err(_) => {
                cancel.check()?;
                return Err(stalled
                    .lock()
                    .take()
                    .unwrap_or_else(|| SyncError::Encoder(format!("renderer stopped before frame {index}"))));
            }
        };
        debug_assert_eq!(frame.index, index);
        frame.index += first_index;
        sink.write_frame(&frame)?;
        written(frame.index + 1);
    }
    Ok(())
}

fn render_worker(
    frames: impl Iterator<Item = SyncResult<RasterFrame>>,
    tx: Sender<SyncResult<RasterFrame>>,
    timeout: Duration,
    cancel: &CancelToken,
    stalled: &Mutex<Option<SyncError>>,
) {
    for item in frames {
        if cancel.is_cancelled() {
            return;
        }
        let failed = item.is_err();
        match tx.send_timeout(item, timeout) {
            Ok(()) if !failed => {}
            Ok(()) => return,
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::error!(waited_ms = timeout.as_millis() as u64, "Encoder stopped accepting frames");
                stalled.lock().get_or_insert(SyncError::EncoderBackpressureTimeout {
                    waited_ms: timeout.as_millis() as u64,
                });
                return;
            }
            Err(SendTimeoutError::Disconnected(_)) => return,
        }
    }
}
