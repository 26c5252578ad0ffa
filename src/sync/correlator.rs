use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::events::NoteId;
use crate::geometry::Rect;
use crate::score::{CoordinateMap, PageCoordinate};
use crate::timing::Timeline;

/// What to do with an onset whose identifier has no notated position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnplacedPolicy {
    /// Drop the onset; the cursor does not move for it.
    Skip,
    /// Repeat the previous position at the onset's own time.
    #[default]
    Hold,
    /// Fail the run.
    Strict,
}

/// A timed cursor position.
#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    pub time: f64,
    pub page: usize,
    pub x: f64,
    pub y: f64,
    pub id: NoteId,
    pub bbox: Rect,
    /// Position borrowed from a neighbouring note under [`UnplacedPolicy::Hold`].
    pub held: bool,
}

impl Waypoint {
    fn placed(time: f64, id: NoteId, coord: &PageCoordinate) -> Self {
        Self {
            time,
            page: coord.page,
            x: coord.anchor.x,
            y: coord.anchor.y,
            id,
            bbox: coord.bbox,
            held: false,
        }
    }
}

pub struct EventCorrelator {
    policy: UnplacedPolicy,
}

impl EventCorrelator {
    pub fn new(policy: UnplacedPolicy) -> Self {
        Self { policy }
    }

    /// Joins the onset timeline with the notated positions. The result keeps
    /// timeline order, so it is non-decreasing in time.
    pub fn correlate(&self, timeline: &Timeline, coords: &CoordinateMap) -> SyncResult<Vec<Waypoint>> {
        if timeline.is_empty() {
            return Err(SyncError::EmptyTimeline);
        }
        // Hold needs something to hold before the first placed onset.
        let first_placed = timeline.entries.iter().find_map(|e| coords.get(&e.id));

        let mut waypoints: Vec<Waypoint> = Vec::with_capacity(timeline.len());
        let mut unplaced = 0usize;

        for entry in &timeline.entries {
            if let Some(coord) = coords.get(&entry.id) {
                waypoints.push(Waypoint::placed(entry.time, entry.id.clone(), coord));
                continue;
            }

            unplaced += 1;
            tracing::debug!(id = %entry.id, time = entry.time, "Onset has no notated position");
            match self.policy {
                UnplacedPolicy::Strict => {
                    return Err(SyncError::IdentifierMismatch {
                        id: entry.id.to_string(),
                        time: entry.time,
                    });
                }
                UnplacedPolicy::Skip => {}
                UnplacedPolicy::Hold => {
                    let held = match (waypoints.last(), first_placed) {
                        (Some(prev), _) => Waypoint {
                            time: entry.time,
                            id: entry.id.clone(),
                            held: true,
                            ..prev.clone()
                        },
                        (None, Some(coord)) => Waypoint {
                            held: true,
                            ..Waypoint::placed(entry.time, entry.id.clone(), coord)
                        },
                        (None, None) => continue,
                    };
                    waypoints.push(held);
                }
            }
        }

        if waypoints.is_empty() {
            let first = &timeline.entries[0];
            return Err(SyncError::IdentifierMismatch {
                id: first.id.to_string(),
                time: first.time,
            });
        }

        if unplaced > 0 {
            tracing::warn!(
                unplaced,
                total = timeline.len(),
                policy = ?self.policy,
                "Some onsets have no notated position"
            );
        }
        tracing::info!(waypoints = waypoints.len(), "Correlated onsets with notation");
        Ok(waypoints)
    }
}
