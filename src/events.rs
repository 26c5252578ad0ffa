use std::fmt;

/// Identifier shared by the engraver's coordinate listing and the onset
/// stream. Two events with the same id are the same musical event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteId(String);

impl NoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NoteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent {
    pub id: NoteId,
    pub channel: u8,
    pub pitch: Option<u8>,
    /// Seconds from the start of the performance.
    pub onset: f64,
    pub duration: Option<f64>,
}

impl NoteEvent {
    pub fn new(id: impl Into<String>, onset: f64) -> Self {
        Self {
            id: NoteId::new(id),
            channel: 0,
            pitch: None,
            onset,
            duration: None,
        }
    }
}

/// Parsed output of the synthesis side, in stream order.
#[derive(Debug, Clone, Default)]
pub struct OnsetStream {
    pub events: Vec<NoteEvent>,
    /// End of the performance, when the source declares one.
    pub end_time: Option<f64>,
}

/// One entry of the built timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedOnset {
    pub time: f64,
    pub id: NoteId,
}
