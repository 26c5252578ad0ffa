use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;

use midly::{Fps, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

use super::TempoMap;
use crate::error::{SyncError, SyncResult};
use crate::events::{NoteEvent, NoteId, OnsetStream};

struct RawNote {
    tick: u64,
    end_tick: Option<u64>,
    channel: u8,
    key: u8,
}

pub fn read_midi_file(path: &Path) -> SyncResult<OnsetStream> {
    let data = fs::read(path).map_err(|e| SyncError::unavailable(path, e))?;
    let stream = parse_midi(&data).map_err(|e| SyncError::unavailable(path, e))?;
    tracing::info!(
        path = %path.display(),
        onsets = stream.events.len(),
        end_secs = stream.end_time.unwrap_or(0.0),
        "Parsed MIDI file"
    );
    Ok(stream)
}

/// Turns a standard MIDI file into onset events. Every NoteOn with non-zero
/// velocity is an onset; the matching NoteOff (or zero-velocity NoteOn) on
/// the same channel and key gives its duration. Onsets come out ordered by
/// time, then track, then position in the track.
///
/// Identifiers are placeholders (`midi:<channel>:<n>`); the MIDI file itself
/// carries nothing that ties an event to the notation.
pub fn parse_midi(data: &[u8]) -> Result<OnsetStream, midly::Error> {
    let smf = Smf::parse(data)?;

    let mut tempo_changes: Vec<(u64, u32)> = Vec::new();
    let mut notes: Vec<RawNote> = Vec::new();
    let mut end_tick = 0u64;

    for track in &smf.tracks {
        let mut tick = 0u64;
        let mut open: HashMap<(u8, u8), VecDeque<usize>> = HashMap::new();

        for event in track {
            tick += event.delta.as_int() as u64;
            match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(t)) => {
                    tempo_changes.push((tick, t.as_int()));
                }
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            open.entry((channel, key.as_int()))
                                .or_default()
                                .push_back(notes.len());
                            notes.push(RawNote {
                                tick,
                                end_tick: None,
                                channel,
                                key: key.as_int(),
                            });
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            if let Some(idx) = open
                                .get_mut(&(channel, key.as_int()))
                                .and_then(|queue| queue.pop_front())
                            {
                                notes[idx].end_tick = Some(tick);
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        end_tick = end_tick.max(tick);
    }

    let tempo = match smf.header.timing {
        Timing::Metrical(tpq) => TempoMap::metrical(tpq.as_int(), &tempo_changes),
        Timing::Timecode(fps, ticks_per_frame) => {
            let fps = match fps {
                Fps::Fps24 => 24.0,
                Fps::Fps25 => 25.0,
                Fps::Fps29 => 29.97,
                Fps::Fps30 => 30.0,
            };
            TempoMap::timecode(fps, ticks_per_frame)
        }
    };

    notes.sort_by_key(|n| n.tick);

    let events = notes
        .iter()
        .enumerate()
        .map(|(n, note)| {
            let onset = tempo.seconds_at(note.tick);
            NoteEvent {
                id: NoteId::new(format!("midi:{}:{}", note.channel, n)),
                channel: note.channel,
                pitch: Some(note.key),
                onset,
                duration: note.end_tick.map(|end| tempo.seconds_at(end) - onset),
            }
        })
        .collect();

    Ok(OnsetStream {
        events,
        end_time: (!smf.tracks.is_empty()).then(|| tempo.seconds_at(end_tick)),
    })
}
