use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use scorereel::project::{Input, OnsetSource, PageSource, SinkKind, TitleConfig};
use scorereel::render::RasterFrame;
use scorereel::score::NoteCoordinateExtractor;
use scorereel::sync::{EventCorrelator, UnplacedPolicy, ViewMode};
use scorereel::timing::{MidiTimelineBuilder, parse_onset_listing};
use scorereel::tools::FrameSink;
use scorereel::{PipelineDriver, Progress, Project, RunContext, Stage, SyncError};

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn pages(&self, sizes: &[(u32, u32)]) {
        for (n, &(w, h)) in sizes.iter().enumerate() {
            let page = RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 40 * n as u8]));
            page.save(self.path().join(format!("score-page{}.png", n + 1))).unwrap();
        }
    }

    fn write(&self, name: &str, text: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    fn project(&self, coords: &str, onsets: &str) -> Project {
        let coordinates = self.write("score.coords", coords);
        let onsets = self.write("score.onsets", onsets);
        let mut project = Project::new(Input::Prepared {
            pages: PageSource::Directory {
                dir: self.path().to_path_buf(),
                stem: "score".to_string(),
            },
            coordinates,
            onsets: OnsetSource::Listing(onsets),
            audio: None,
        });
        project.output.width = 64;
        project.output.height = 48;
        project.output.fps = 10;
        project.output.path = self.path().join("out.mp4");
        project
    }

    fn context(&self) -> RunContext {
        RunContext::in_dir(self.path(), self.path().join("out.mp4"), false).unwrap()
    }
}

#[derive(Clone, Default)]
struct Recording {
    frames: Arc<Mutex<Vec<RasterFrame>>>,
    finished: Arc<AtomicBool>,
    aborted: Arc<AtomicBool>,
}

struct RecordingSink {
    record: Recording,
}

impl RecordingSink {
    fn boxed(record: &Recording) -> Box<dyn FrameSink> {
        Box::new(Self {
            record: record.clone(),
        })
    }
}

impl FrameSink for RecordingSink {
    fn write_frame(&mut self, frame: &RasterFrame) -> scorereel::SyncResult<()> {
        self.record.frames.lock().push(frame.clone());
        Ok(())
    }

    fn finish(self: Box<Self>) -> scorereel::SyncResult<()> {
        self.record.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn abort(self: Box<Self>) {
        self.record.aborted.store(true, Ordering::SeqCst);
    }
}

const THREE_NOTES: &str = "#format pixels/1\nn1 0 10 10 4 4\nn2 0 10 50 4 4\nn3 0 10 90 4 4\n";
const THREE_ONSETS: &str = "#format onsets/1\n0.0 n1 0\n1.0 n2 0\n2.0 n3 0\n";

#[test]
fn notes_round_trip_to_waypoints() {
    let fx = Fixture::new();
    fx.pages(&[(200, 150)]);
    let mut driver = PipelineDriver::new(fx.project(THREE_NOTES, THREE_ONSETS));

    let prepared = driver.prepare(&fx.context()).unwrap();
    let got: Vec<_> = prepared
        .waypoints
        .iter()
        .map(|w| (w.time, w.page, w.x, w.y))
        .collect();
    assert_eq!(
        got,
        vec![(0.0, 0, 10.0, 10.0), (1.0, 0, 10.0, 50.0), (2.0, 0, 10.0, 90.0)]
    );
    // No audio and no end marker: last note plus the default one second tail.
    assert_eq!(prepared.duration, 3.0);
    assert_eq!(prepared.plan.frame_count(), 30);
}

#[test]
fn unplaced_notes_follow_policy() {
    let fx = Fixture::new();
    fx.pages(&[(200, 150)]);
    let coords = "#format pixels/1\na 0 10 10 4 4\nc 0 30 10 4 4\n";
    let onsets = "#format onsets/1\n0.0 a 0\n0.5 grace 0\n1.0 c 0\n";

    let mut project = fx.project(coords, onsets);
    project.sync.unplaced = UnplacedPolicy::Skip;
    let skipped = PipelineDriver::new(project.clone()).prepare(&fx.context()).unwrap();
    assert_eq!(skipped.waypoints.len(), 2);
    assert!(skipped.waypoints.iter().all(|w| w.time != 0.5));

    project.sync.unplaced = UnplacedPolicy::Hold;
    let held = PipelineDriver::new(project.clone()).prepare(&fx.context()).unwrap();
    let grace = &held.waypoints[1];
    assert_eq!((grace.time, grace.x, grace.y), (0.5, 10.0, 10.0));

    project.sync.unplaced = UnplacedPolicy::Strict;
    let err = PipelineDriver::new(project).prepare(&fx.context()).err().unwrap();
    assert_eq!(err.stage, Stage::Correlate);
    assert!(matches!(err.source, SyncError::IdentifierMismatch { ref id, .. } if id == "grace"));
}

#[test]
fn empty_onsets_fail_before_any_frame() {
    let fx = Fixture::new();
    fx.pages(&[(200, 150)]);
    let record = Recording::default();
    let mut driver = PipelineDriver::new(fx.project(THREE_NOTES, "#format onsets/1\n"));

    let err = driver
        .run_with_sink(&fx.context(), RecordingSink::boxed(&record))
        .unwrap_err();
    assert_eq!(err.stage, Stage::Timeline);
    assert!(matches!(err.source, SyncError::EmptyTimeline));
    assert!(record.frames.lock().is_empty());
    assert!(record.aborted.load(Ordering::SeqCst));
    assert!(!record.finished.load(Ordering::SeqCst));
}

#[test]
fn page_turn_at_five_seconds() {
    let fx = Fixture::new();
    fx.pages(&[(400, 300), (400, 300)]);
    let coords = "#format pixels/1\na 0 50 50 4 4\nb 0 300 200 4 4\nc 1 60 40 4 4\nd 1 350 250 4 4\n";
    let onsets = "#format onsets/1\n0.0 a 0\n2.5 b 0\n5.0 c 0\n7.5 d 0\nend 8.0\n";
    let mut project = fx.project(coords, onsets);
    project.view.mode = ViewMode::default();

    let prepared = PipelineDriver::new(project).prepare(&fx.context()).unwrap();
    let plan = &prepared.plan;
    assert_eq!(plan.frame_count(), 80);

    let before = plan.frame(49);
    let after = plan.frame(50);
    assert_eq!(before.page, 0);
    assert_eq!(after.page, 1);
    // The pre-turn frame holds page 0's last window, the turn frame starts
    // page 1's first window: nothing in between.
    assert_eq!(before.crop, plan.frame(25).crop);
    assert_eq!(before.cursor.x, 300.0);
    assert_eq!(after.cursor.x, 60.0);
    for i in 0..plan.frame_count() {
        assert!(plan.frame(i).crop.fits_in(400, 300));
    }
}

#[test]
fn frames_are_contiguous_and_bounded() {
    let fx = Fixture::new();
    fx.pages(&[(200, 150)]);
    let record = Recording::default();
    let mut driver = PipelineDriver::new(fx.project(THREE_NOTES, "#format onsets/1\n0.0 n1 0\n1.0 n2 0\n2.0 n3 0\nend 2.34\n"));

    let summary = driver
        .run_with_sink(&fx.context(), RecordingSink::boxed(&record))
        .unwrap();
    assert!(record.finished.load(Ordering::SeqCst));

    let frames = record.frames.lock();
    assert_eq!(summary.frames, frames.len() as u64);
    assert_eq!(frames.len(), 24);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.index, i as u64);
        assert_eq!(frame.image.dimensions(), (64, 48));
    }
    let last_time = (frames.len() - 1) as f64 / 10.0;
    assert!(last_time <= summary.duration + 0.1);
}

fn render_all(fx: &Fixture, threads: usize) -> Vec<RasterFrame> {
    let coords = "#format pixels/1\na 0 20 20 4 4\nb 0 120 60 4 4\nc 0 180 120 4 4\n";
    let onsets = "#format onsets/1\n0.0 a 0\n0.7 b 0\n1.3 c 0\nend 2.0\n";
    let mut project = fx.project(coords, onsets);
    project.render.threads = threads;
    project.render.queue_depth = 2;

    let record = Recording::default();
    PipelineDriver::new(project)
        .run_with_sink(&fx.context(), RecordingSink::boxed(&record))
        .unwrap();
    record.frames.lock().clone()
}

#[test]
fn output_is_identical_across_runs_and_thread_counts() {
    let fx = Fixture::new();
    fx.pages(&[(200, 150)]);

    let single = render_all(&fx, 1);
    let again = render_all(&fx, 1);
    let parallel = render_all(&fx, 3);
    assert_eq!(single.len(), 20);
    assert_eq!(single, again);
    assert_eq!(single, parallel);
}

#[test]
fn cancel_stops_between_frames() {
    let fx = Fixture::new();
    fx.pages(&[(200, 150)]);
    let record = Recording::default();
    let seen = Arc::new(AtomicUsize::new(0));

    let driver = PipelineDriver::new(fx.project(THREE_NOTES, THREE_ONSETS));
    let token = driver.cancel_token();
    let counter = Arc::clone(&seen);
    let mut driver = driver.with_progress(Box::new(move |p: Progress| {
        if p.stage == Stage::Render && p.frames_done == 3 {
            token.cancel();
        }
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let err = driver
        .run_with_sink(&fx.context(), RecordingSink::boxed(&record))
        .unwrap_err();
    assert!(matches!(err.source, SyncError::Cancelled));
    assert_eq!(record.frames.lock().len(), 3);
    assert!(record.aborted.load(Ordering::SeqCst));
    assert!(seen.load(Ordering::SeqCst) > 0);
}

#[test]
fn wav_length_sets_frame_count() {
    let fx = Fixture::new();
    fx.pages(&[(200, 150)]);
    let wav = fx.path().join("score.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 1000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&wav, spec).unwrap();
    for _ in 0..4500 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();

    let mut project = fx.project(THREE_NOTES, THREE_ONSETS);
    if let Input::Prepared { audio, .. } = &mut project.input {
        *audio = Some(wav);
    }
    let prepared = PipelineDriver::new(project).prepare(&fx.context()).unwrap();
    assert_eq!(prepared.duration, 4.5);
    assert_eq!(prepared.plan.frame_count(), 45);
}

#[test]
fn png_sink_writes_frame_directory() {
    let fx = Fixture::new();
    fx.pages(&[(200, 150)]);
    let mut project = fx.project(THREE_NOTES, "#format onsets/1\n0.0 n1 0\n0.1 n2 0\n0.2 n3 0\nend 0.5\n");
    project.output.sink = SinkKind::PngFrames;
    let out = fx.path().join("frames");
    let ctx = RunContext::in_dir(fx.path(), &out, false).unwrap();

    let summary = PipelineDriver::new(project).run(&ctx).unwrap();
    assert_eq!(summary.frames, 5);
    for i in 0..5 {
        assert!(out.join(format!("frame{i:06}.png")).is_file());
    }
}

/// One track of back-to-back notes, `(key, beats)` at 480 ticks per beat and
/// the default half second per beat.
fn write_midi(fx: &Fixture, notes: &[(u8, u32)]) -> PathBuf {
    use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};

    let note = |delta: u32, key: u8, vel: u8| TrackEvent {
        delta: delta.into(),
        kind: TrackEventKind::Midi {
            channel: 0.into(),
            message: MidiMessage::NoteOn {
                key: key.into(),
                vel: vel.into(),
            },
        },
    };
    let mut track = Vec::new();
    for &(key, beats) in notes {
        track.push(note(0, key, 80));
        track.push(note(480 * beats, key, 0));
    }
    track.push(TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    let smf = Smf {
        header: Header {
            format: Format::SingleTrack,
            timing: Timing::Metrical(480.into()),
        },
        tracks: vec![track],
    };
    let mut bytes = Vec::new();
    smf.write(&mut bytes).unwrap();
    let midi = fx.path().join("score.midi");
    std::fs::write(&midi, bytes).unwrap();
    midi
}

fn with_midi(mut project: Project, midi: PathBuf) -> Project {
    if let Input::Prepared { onsets, .. } = &mut project.input {
        *onsets = OnsetSource::Midi(midi);
    }
    project
}

fn waypoint_ids(prepared: &scorereel::PreparedRun) -> Vec<(String, f64)> {
    prepared
        .waypoints
        .iter()
        .map(|w| (w.id.as_str().to_string(), w.time))
        .collect()
}

#[test]
fn midi_onsets_are_matched_by_pitch() {
    let fx = Fixture::new();
    fx.pages(&[(200, 150)]);
    let coords = "#format pixels/1\n3:2 0 10 40 4 4 60\n3:5 0 40 36 4 4 64\n3:8 0 70 32 4 4 67\n";
    let midi = write_midi(&fx, &[(60, 1), (64, 1), (67, 1)]);

    let mut project = with_midi(fx.project(coords, "#format onsets/1\n"), midi);
    project.sync.unplaced = UnplacedPolicy::Strict;

    let prepared = PipelineDriver::new(project).prepare(&fx.context()).unwrap();
    assert_eq!(
        waypoint_ids(&prepared),
        vec![
            ("3:2".to_string(), 0.0),
            ("3:5".to_string(), 0.5),
            ("3:8".to_string(), 1.0)
        ]
    );
    // End of track fixes the length.
    assert_eq!(prepared.duration, 1.5);
}

#[test]
fn midi_onsets_follow_engraved_links() {
    let fx = Fixture::new();
    fx.pages(&[(200, 150)]);
    let ly = fx.write("score.ly", "{ c'4 e'4~ e'4 g'4 }\n");
    let link = |col: u32, x: u32| {
        format!("0 {x} 80 {} 76 textedit://{}:1:{col}:{}\n", x + 4, ly.display(), col + 1)
    };
    let tie = format!("0 33 82 37 80 textedit://{}:1:9:10\n", ly.display());
    let coords = format!(
        "#format links/1\n{}{}{tie}{}{}",
        link(2, 10),
        link(6, 30),
        link(11, 50),
        link(15, 70)
    );
    let midi = write_midi(&fx, &[(60, 1), (64, 2), (67, 1)]);

    let mut project = with_midi(fx.project(&coords, "#format onsets/1\n"), midi);
    project.sync.unplaced = UnplacedPolicy::Strict;

    let prepared = PipelineDriver::new(project).prepare(&fx.context()).unwrap();
    assert_eq!(
        waypoint_ids(&prepared),
        vec![
            ("1:2".to_string(), 0.0),
            ("1:6".to_string(), 0.5),
            ("1:15".to_string(), 1.5)
        ]
    );
    assert_eq!(prepared.duration, 2.0);
}

#[test]
fn missing_audio_fails_before_any_work() {
    let fx = Fixture::new();
    fx.pages(&[(200, 150)]);
    let record = Recording::default();
    let mut project = fx.project(THREE_NOTES, THREE_ONSETS);
    if let Input::Prepared { audio, .. } = &mut project.input {
        *audio = Some(fx.path().join("absent.wav"));
    }

    let err = PipelineDriver::new(project)
        .run_with_sink(&fx.context(), RecordingSink::boxed(&record))
        .unwrap_err();
    assert_eq!(err.stage, Stage::Extract);
    assert!(matches!(err.source, SyncError::ResourceUnavailable { ref path, .. } if path.ends_with("absent.wav")));
    assert!(record.frames.lock().is_empty());
    assert!(record.aborted.load(Ordering::SeqCst));
}

#[test]
fn unreadable_audio_falls_back_to_note_timing() {
    let fx = Fixture::new();
    fx.pages(&[(200, 150)]);
    let mp3 = fx.write("score.mp3", "not a wave file");
    let mut project = fx.project(THREE_NOTES, THREE_ONSETS);
    if let Input::Prepared { audio, .. } = &mut project.input {
        *audio = Some(mp3.clone());
    }

    let prepared = PipelineDriver::new(project).prepare(&fx.context()).unwrap();
    assert_eq!(prepared.duration, 3.0);
    assert_eq!(prepared.audio, Some(mp3));
}

const SYSTEM_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

#[test]
fn title_frames_lead_the_score() {
    if !Path::new(SYSTEM_FONT).is_file() {
        eprintln!("skipping: {SYSTEM_FONT} not installed");
        return;
    }
    let fx = Fixture::new();
    fx.pages(&[(200, 150)]);
    let mut project = fx.project(THREE_NOTES, THREE_ONSETS);
    project.title = Some(TitleConfig {
        delay_secs: 1.0,
        name: Some("Menuet".to_string()),
        ..TitleConfig::new(SYSTEM_FONT)
    });
    let record = Recording::default();

    let summary = PipelineDriver::new(project)
        .run_with_sink(&fx.context(), RecordingSink::boxed(&record))
        .unwrap();

    let frames = record.frames.lock();
    assert_eq!(summary.frames, 40);
    assert_eq!(frames.len(), 40);
    assert_eq!(summary.duration, 4.0);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.index, i as u64);
    }
    assert!(frames[..10].iter().all(|f| f.image == frames[0].image));
    assert_eq!(*frames[0].image.get_pixel(0, 0), Rgb([255, 255, 255]));
    assert_ne!(frames[10].image, frames[0].image);
}

#[test]
fn missing_title_font_is_a_title_failure() {
    let fx = Fixture::new();
    fx.pages(&[(200, 150)]);
    let mut project = fx.project(THREE_NOTES, THREE_ONSETS);
    project.title = Some(TitleConfig::new(fx.path().join("absent.ttf")));
    let record = Recording::default();

    let err = PipelineDriver::new(project)
        .run_with_sink(&fx.context(), RecordingSink::boxed(&record))
        .unwrap_err();
    assert_eq!(err.stage, Stage::Title);
    assert!(matches!(err.source, SyncError::ResourceUnavailable { .. }));
    assert!(record.frames.lock().is_empty());
}

#[test]
fn waypoints_never_go_back_in_time() {
    let mut rng = StdRng::seed_from_u64(0x5c0e);
    let pages = [(500u32, 400u32), (500, 400)];

    for round in 0..20 {
        let notes = rng.gen_range(1..40);
        let mut coords = String::from("#format pixels/1\n");
        let mut onsets = String::from("#format onsets/1\n");
        for n in 0..notes {
            if rng.gen_bool(0.8) {
                coords.push_str(&format!(
                    "n{n} {} {} {} 4 4\n",
                    rng.gen_range(0..2),
                    rng.gen_range(0..490),
                    rng.gen_range(0..390)
                ));
            }
            // Coarse grid so ties are common.
            let time = rng.gen_range(0..20) as f64 * 0.25;
            onsets.push_str(&format!("{time} n{n} 0\n"));
        }

        let map = NoteCoordinateExtractor::new(110.0).extract(&coords, &pages).unwrap();
        let timeline = MidiTimelineBuilder::build(&parse_onset_listing(&onsets).unwrap()).unwrap();
        for policy in [UnplacedPolicy::Skip, UnplacedPolicy::Hold] {
            let Ok(waypoints) = EventCorrelator::new(policy).correlate(&timeline, &map) else {
                // Nothing placed at all in this round.
                continue;
            };
            assert!(
                waypoints.windows(2).all(|w| w[0].time <= w[1].time),
                "round {round}: waypoints out of order under {policy:?}"
            );
        }
    }
}
