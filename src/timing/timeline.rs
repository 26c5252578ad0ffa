use crate::error::{SyncError, SyncResult};
use crate::events::{OnsetStream, TimedOnset};

/// Onsets ordered by time. Equal times keep the order they had in the
/// source stream, so chord notes are never shuffled.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub entries: Vec<TimedOnset>,
    pub end_time: Option<f64>,
}

impl Timeline {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_time(&self) -> f64 {
        self.entries.last().map_or(0.0, |e| e.time)
    }
}

pub struct MidiTimelineBuilder;

impl MidiTimelineBuilder {
    pub fn build(stream: &OnsetStream) -> SyncResult<Timeline> {
        if stream.events.is_empty() {
            return Err(SyncError::EmptyTimeline);
        }

        for (i, event) in stream.events.iter().enumerate() {
            if !event.onset.is_finite() || event.onset < 0.0 {
                return Err(SyncError::onsets(
                    i + 1,
                    format!("onset '{}' has invalid time {}", event.id, event.onset),
                ));
            }
        }

        let mut entries: Vec<TimedOnset> = stream
            .events
            .iter()
            .map(|e| TimedOnset {
                time: e.onset,
                id: e.id.clone(),
            })
            .collect();
        // sort_by is stable
        entries.sort_by(|a, b| a.time.total_cmp(&b.time));

        tracing::info!(
            onsets = entries.len(),
            first_secs = entries[0].time,
            last_secs = entries[entries.len() - 1].time,
            "Built onset timeline"
        );

        Ok(Timeline {
            entries,
            end_time: stream.end_time,
        })
    }
}
