use serde::{Deserialize, Serialize};

use super::Waypoint;
use crate::error::{SyncError, SyncResult};
use crate::geometry::{PixelRect, Point, Rect};

/// How waypoints that share a time and page collapse into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordAnchor {
    /// The first chord member in timeline order.
    #[default]
    FirstVoice,
    /// The center of the union of the members' boxes.
    Union,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// Whole pages, turned at the exact transition frame.
    Paged,
    /// A fixed window that follows the cursor. `comfort_band` is the
    /// fraction of the window (on both axes) the cursor is kept inside.
    Scrolling { comfort_band: (f64, f64), zoom: f64 },
}

impl Default for ViewMode {
    fn default() -> Self {
        ViewMode::Scrolling {
            comfort_band: (0.4, 0.6),
            zoom: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewportFrame {
    pub index: u64,
    pub time: f64,
    pub page: usize,
    pub crop: PixelRect,
    pub cursor: Point,
    pub highlight: Rect,
}

/// One collapsed waypoint with the viewport it implies.
#[derive(Debug, Clone, PartialEq)]
struct Key {
    time: f64,
    page: usize,
    cursor: Point,
    highlight: Rect,
    /// Top-left of the window in page pixels, before rounding.
    offset: Point,
}

pub struct ScrollWindowPlanner {
    fps: u32,
    output: (u32, u32),
    mode: ViewMode,
    chord_anchor: ChordAnchor,
}

impl ScrollWindowPlanner {
    pub fn new(fps: u32, output: (u32, u32), mode: ViewMode, chord_anchor: ChordAnchor) -> SyncResult<Self> {
        if fps == 0 {
            return Err(SyncError::Config("fps must be positive".into()));
        }
        if output.0 == 0 || output.1 == 0 {
            return Err(SyncError::Config("output size must be non-zero".into()));
        }
        if let ViewMode::Scrolling {
            comfort_band: (lo, hi),
            zoom,
        } = mode
        {
            if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
                return Err(SyncError::Config(format!("comfort band {lo}..{hi} must lie within 0..1")));
            }
            if !(zoom.is_finite() && zoom > 0.0) {
                return Err(SyncError::Config(format!("zoom {zoom} must be positive")));
            }
        }
        Ok(Self {
            fps,
            output,
            mode,
            chord_anchor,
        })
    }

    /// Plans `duration` seconds of frames. `pages` holds the pixel size of
    /// every page; each waypoint must reference one of them.
    pub fn plan(&self, waypoints: &[Waypoint], pages: &[(u32, u32)], duration: f64) -> SyncResult<ViewportPlan> {
        if waypoints.is_empty() {
            return Err(SyncError::EmptyTimeline);
        }
        if let Some(w) = waypoints.iter().find(|w| w.page >= pages.len()) {
            return Err(SyncError::coords(0, format!("note '{}' is on missing page {}", w.id, w.page + 1)));
        }

        let views: Vec<(u32, u32)> = pages.iter().map(|&size| self.view_size(size)).collect();
        let mut keys = self.collapse(waypoints);
        if let ViewMode::Scrolling { comfort_band, .. } = self.mode {
            place_windows(&mut keys, pages, &views, comfort_band);
        }

        let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
        let frame_count = ((duration * self.fps as f64).ceil() as u64).max(1);

        tracing::info!(
            frames = frame_count,
            fps = self.fps,
            keys = keys.len(),
            duration_secs = duration,
            mode = ?self.mode,
            "Planned viewport"
        );

        Ok(ViewportPlan {
            fps: self.fps,
            frame_count,
            paged: matches!(self.mode, ViewMode::Paged),
            pages: pages.to_vec(),
            views,
            keys,
        })
    }

    fn view_size(&self, (page_w, page_h): (u32, u32)) -> (u32, u32) {
        match self.mode {
            ViewMode::Paged => (page_w, page_h),
            ViewMode::Scrolling { zoom, .. } => {
                let w = (self.output.0 as f64 / zoom).round() as u32;
                let h = (self.output.1 as f64 / zoom).round() as u32;
                (w.clamp(1, page_w.max(1)), h.clamp(1, page_h.max(1)))
            }
        }
    }

    fn collapse(&self, waypoints: &[Waypoint]) -> Vec<Key> {
        let mut keys: Vec<Key> = Vec::with_capacity(waypoints.len());
        let mut group_start = 0;
        while group_start < waypoints.len() {
            let first = &waypoints[group_start];
            let group_end = waypoints[group_start..]
                .iter()
                .position(|w| w.time != first.time || w.page != first.page)
                .map_or(waypoints.len(), |n| group_start + n);
            let group = &waypoints[group_start..group_end];

            let (cursor, highlight) = match self.chord_anchor {
                ChordAnchor::FirstVoice => (Point::new(first.x, first.y), first.bbox),
                ChordAnchor::Union => {
                    let bbox = group.iter().skip(1).fold(first.bbox, |acc, w| acc.union(&w.bbox));
                    (bbox.center(), bbox)
                }
            };
            keys.push(Key {
                time: first.time,
                page: first.page,
                cursor,
                highlight,
                offset: Point::default(),
            });
            group_start = group_end;
        }
        keys
    }
}

/// Each key's window: centered on the first cursor of a page, then moved as
/// little as possible to keep the cursor inside the band. Always clamped to
/// the page.
fn place_windows(keys: &mut [Key], pages: &[(u32, u32)], views: &[(u32, u32)], band: (f64, f64)) {
    let mut prev: Option<(usize, Point)> = None;
    for key in keys.iter_mut() {
        let (vw, vh) = views[key.page];
        let (vw, vh) = (vw as f64, vh as f64);
        let offset = match prev {
            Some((page, off)) if page == key.page => Point::new(
                band_clamp(off.x, key.cursor.x, vw, band),
                band_clamp(off.y, key.cursor.y, vh, band),
            ),
            _ => Point::new(key.cursor.x - vw / 2.0, key.cursor.y - vh / 2.0),
        };
        let (pw, ph) = pages[key.page];
        key.offset = Point::new(
            offset.x.clamp(0.0, (pw as f64 - vw).max(0.0)),
            offset.y.clamp(0.0, (ph as f64 - vh).max(0.0)),
        );
        prev = Some((key.page, key.offset));
    }
}

fn band_clamp(offset: f64, cursor: f64, extent: f64, (lo, hi): (f64, f64)) -> f64 {
    // Cursor at `cursor - offset`; keep that within [lo, hi] * extent.
    offset.clamp(cursor - hi * extent, cursor - lo * extent)
}

/// The dense frame plan. Frames are computed on demand from the keys, so any
/// frame can be produced independently of the others.
#[derive(Debug, Clone)]
pub struct ViewportPlan {
    fps: u32,
    frame_count: u64,
    paged: bool,
    pages: Vec<(u32, u32)>,
    views: Vec<(u32, u32)>,
    keys: Vec<Key>,
}

impl ViewportPlan {
    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn frame_time(&self, index: u64) -> f64 {
        index as f64 / self.fps as f64
    }

    pub fn frame(&self, index: u64) -> ViewportFrame {
        let time = self.frame_time(index);
        let next = self.keys.partition_point(|k| k.time <= time);
        let active = &self.keys[next.saturating_sub(1)];

        // Before the first key everything holds the first.
        let (cursor, offset) = match self.keys.get(next) {
            Some(following) if next > 0 && following.page == active.page => {
                let fraction = (time - active.time) / (following.time - active.time);
                (
                    active.cursor.lerp(following.cursor, fraction),
                    active.offset.lerp(following.offset, fraction),
                )
            }
            _ => (active.cursor, active.offset),
        };

        let (pw, ph) = self.pages[active.page];
        let crop = if self.paged {
            PixelRect::full(pw, ph)
        } else {
            let (vw, vh) = self.views[active.page];
            PixelRect {
                x: clamp_px(offset.x, pw - vw),
                y: clamp_px(offset.y, ph - vh),
                width: vw,
                height: vh,
            }
        };

        ViewportFrame {
            index,
            time,
            page: active.page,
            crop,
            cursor,
            highlight: active.highlight,
        }
    }

    pub fn frames(&self) -> impl Iterator<Item = ViewportFrame> + '_ {
        (0..self.frame_count).map(|i| self.frame(i))
    }
}

fn clamp_px(value: f64, max: u32) -> u32 {
    (value.round().max(0.0) as u32).min(max)
}
