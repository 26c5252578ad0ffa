/// Microseconds per quarter note when a file declares no tempo (120 BPM).
pub const DEFAULT_TEMPO: u32 = 500_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub tick: u64,
    pub seconds: f64,
    pub us_per_quarter: u32,
}

/// Converts absolute MIDI ticks to seconds, piecewise across tempo changes.
#[derive(Debug, Clone, PartialEq)]
pub enum TempoMap {
    Metrical {
        ticks_per_quarter: u16,
        segments: Vec<Segment>,
    },
    /// SMPTE timing: ticks have a fixed wall-clock length.
    Timecode { ticks_per_second: f64 },
}

impl TempoMap {
    /// `changes` are `(absolute tick, µs per quarter)` in any order. When
    /// several changes share a tick the last one listed wins.
    pub fn metrical(ticks_per_quarter: u16, changes: &[(u64, u32)]) -> Self {
        let mut changes = changes.to_vec();
        changes.sort_by_key(|&(tick, _)| tick);

        let mut segments = vec![Segment {
            tick: 0,
            seconds: 0.0,
            us_per_quarter: DEFAULT_TEMPO,
        }];
        let tpq = ticks_per_quarter.max(1) as f64;

        for (tick, us_per_quarter) in changes {
            let Some(last) = segments.last_mut() else { break };
            if last.tick == tick {
                last.us_per_quarter = us_per_quarter;
                continue;
            }
            let seconds = last.seconds + seconds_for(tick - last.tick, last.us_per_quarter, tpq);
            segments.push(Segment {
                tick,
                seconds,
                us_per_quarter,
            });
        }

        TempoMap::Metrical {
            ticks_per_quarter,
            segments,
        }
    }

    pub fn timecode(frames_per_second: f64, ticks_per_frame: u8) -> Self {
        TempoMap::Timecode {
            ticks_per_second: frames_per_second * ticks_per_frame.max(1) as f64,
        }
    }

    pub fn seconds_at(&self, tick: u64) -> f64 {
        match self {
            TempoMap::Metrical {
                ticks_per_quarter,
                segments,
            } => {
                let idx = segments.partition_point(|s| s.tick <= tick);
                let seg = &segments[idx.saturating_sub(1)];
                seg.seconds
                    + seconds_for(
                        tick - seg.tick,
                        seg.us_per_quarter,
                        (*ticks_per_quarter).max(1) as f64,
                    )
            }
            TempoMap::Timecode { ticks_per_second } => tick as f64 / ticks_per_second,
        }
    }
}

fn seconds_for(ticks: u64, us_per_quarter: u32, ticks_per_quarter: f64) -> f64 {
    ticks as f64 / ticks_per_quarter * us_per_quarter as f64 / 1_000_000.0
}
