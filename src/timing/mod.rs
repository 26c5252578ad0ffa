mod midi;
mod onsets;
mod tempo;
mod timeline;

pub use midi::{parse_midi, read_midi_file};
pub use onsets::{parse_onset_listing, read_onset_listing};
pub use tempo::{DEFAULT_TEMPO, Segment, TempoMap};
pub use timeline::{MidiTimelineBuilder, Timeline};
