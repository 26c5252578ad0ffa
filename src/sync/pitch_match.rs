use crate::events::{NoteId, OnsetStream};
use crate::score::{CoordinateMap, PageCoordinate};

pub const DEFAULT_LOOKAHEAD: usize = 16;

/// Gives MIDI-derived onsets the identifiers of the notes they sound.
///
/// A MIDI file has no link back to the notation, so the notated notes are
/// walked in reading order alongside the onsets in time order. Each onset
/// takes the first unused notated note within `lookahead` places whose pitch
/// class agrees; a notated note without a pitch agrees with anything. Notes
/// that continue a tie are never struck and take no part. When an onset
/// matches, unused notes lying wholly before the match are passed over, so a
/// notated note that is never played cannot hold the window back. Onsets
/// that find nothing keep their placeholder id and are later handled by the
/// correlator's unplaced policy.
pub struct PitchMatcher {
    lookahead: usize,
}

struct Notated<'a> {
    id: &'a NoteId,
    coord: &'a PageCoordinate,
}

impl Notated<'_> {
    fn accepts(&self, pitch: u8) -> bool {
        self.coord.pitch.is_none_or(|p| p % 12 == pitch % 12)
    }

    /// Wholly left of `other` in reading order, so played before it.
    fn precedes(&self, other: &Notated<'_>) -> bool {
        let (a, b) = (self.coord, other.coord);
        a.page < b.page || (a.page == b.page && a.bbox.x1 < b.bbox.x0)
    }
}

impl Default for PitchMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKAHEAD)
    }
}

impl PitchMatcher {
    pub fn new(lookahead: usize) -> Self {
        Self {
            lookahead: lookahead.max(1),
        }
    }

    /// Rewrites ids in `stream` in place. Returns how many onsets matched.
    pub fn assign(&self, stream: &mut OnsetStream, coords: &CoordinateMap) -> usize {
        let notated: Vec<Notated<'_>> = coords
            .reading_order()
            .into_iter()
            .filter(|(_, c)| !c.continues_tie)
            .map(|(id, coord)| Notated { id, coord })
            .collect();
        if notated.is_empty() {
            tracing::warn!("No struck notes in the coordinate listing; MIDI onsets keep placeholder ids");
            return 0;
        }
        if notated.iter().all(|n| n.coord.pitch.is_none()) {
            tracing::info!("Coordinate listing carries no pitches; matching onsets in reading order");
        }

        let mut order: Vec<usize> = (0..stream.events.len()).collect();
        order.sort_by(|&a, &b| stream.events[a].onset.total_cmp(&stream.events[b].onset));

        // Claimed by an onset, or passed over.
        let mut used = vec![false; notated.len()];
        let mut cursor = 0usize;
        let mut matched = 0usize;

        for idx in order {
            let Some(pitch) = stream.events[idx].pitch else {
                continue;
            };
            while cursor < used.len() && used[cursor] {
                cursor += 1;
            }
            let end = (cursor + self.lookahead).min(notated.len());
            let hit = (cursor..end).find(|&j| !used[j] && notated[j].accepts(pitch));
            let Some(j) = hit else {
                tracing::debug!(
                    id = %stream.events[idx].id,
                    pitch,
                    "No notated note within look-ahead"
                );
                continue;
            };

            used[j] = true;
            stream.events[idx].id = notated[j].id.clone();
            matched += 1;
            for i in cursor..j {
                if !used[i] && notated[i].precedes(&notated[j]) {
                    tracing::debug!(id = %notated[i].id, "Passing over notated note that was not played");
                    used[i] = true;
                }
            }
        }

        tracing::info!(
            matched,
            onsets = stream.events.len(),
            notated = notated.len(),
            "Matched MIDI onsets to notation by pitch"
        );
        matched
    }
}
