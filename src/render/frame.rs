use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use super::CursorOverlay;
use crate::error::{SyncError, SyncResult};
use crate::score::PageSet;
use crate::sync::{ViewportFrame, ViewportPlan};

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// One finished output frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterFrame {
    pub index: u64,
    pub image: RgbImage,
}

/// Turns viewport frames into fixed-size RGB images. Cloning is cheap; the
/// page images are shared.
#[derive(Clone)]
pub struct FrameRenderer {
    pages: Arc<PageSet>,
    output: (u32, u32),
    cursor: CursorOverlay,
}

impl FrameRenderer {
    pub fn new(pages: Arc<PageSet>, output: (u32, u32), cursor: CursorOverlay) -> Self {
        Self {
            pages,
            output,
            cursor,
        }
    }

    pub fn output_size(&self) -> (u32, u32) {
        self.output
    }

    /// Crops, aspect-fits into the output with white letterboxing, then
    /// draws the cursor. Depends on nothing but `frame` and the page image.
    pub fn render(&self, frame: &ViewportFrame) -> SyncResult<RasterFrame> {
        let page = self.pages.get(frame.page).ok_or_else(|| {
            SyncError::Config(format!("frame {} refers to missing page {}", frame.index, frame.page + 1))
        })?;
        let crop = frame.crop;
        if crop.width == 0 || crop.height == 0 || !crop.fits_in(page.width(), page.height()) {
            return Err(SyncError::Config(format!(
                "crop {crop:?} of frame {} lies outside page {}",
                frame.index,
                frame.page + 1
            )));
        }

        let (out_w, out_h) = self.output;
        let scale = (out_w as f64 / crop.width as f64).min(out_h as f64 / crop.height as f64);
        let fit_w = ((crop.width as f64 * scale).round() as u32).clamp(1, out_w);
        let fit_h = ((crop.height as f64 * scale).round() as u32).clamp(1, out_h);

        let view = imageops::crop_imm(&page.image, crop.x, crop.y, crop.width, crop.height).to_image();
        let fitted = if (fit_w, fit_h) == (crop.width, crop.height) {
            view
        } else {
            imageops::resize(&view, fit_w, fit_h, FilterType::Triangle)
        };

        let left = (out_w - fit_w) / 2;
        let top = (out_h - fit_h) / 2;
        let mut canvas = RgbImage::from_pixel(out_w, out_h, BACKGROUND);
        imageops::replace(&mut canvas, &fitted, left as i64, top as i64);

        // Page pixels to canvas pixels.
        let sx = fit_w as f64 / crop.width as f64;
        let sy = fit_h as f64 / crop.height as f64;
        let to_x = |x: f64| left as f64 + (x - crop.x as f64) * sx;
        let to_y = |y: f64| top as f64 + (y - crop.y as f64) * sy;

        let area = (left as f64, top as f64, (left + fit_w) as f64, (top + fit_h) as f64);
        let hl = frame.highlight;
        let note = (to_x(hl.x0), to_y(hl.y0), to_x(hl.x1), to_y(hl.y1));
        self.cursor.draw(&mut canvas, to_x(frame.cursor.x), area, note);

        Ok(RasterFrame {
            index: frame.index,
            image: canvas,
        })
    }

    /// All frames of `plan`, in order.
    pub fn into_frames(self, plan: Arc<ViewportPlan>) -> FrameStream {
        self.into_stream(plan, 0, 1)
    }

    /// Frames `first, first + step, ...` of `plan`. Render workers each take
    /// one residue class.
    pub fn into_stream(self, plan: Arc<ViewportPlan>, first: u64, step: u64) -> FrameStream {
        FrameStream {
            renderer: self,
            plan,
            next: first,
            step: step.max(1),
        }
    }
}

/// Lazy, finite frame sequence. Not restartable: it owns its renderer and
/// only moves forward.
pub struct FrameStream {
    renderer: FrameRenderer,
    plan: Arc<ViewportPlan>,
    next: u64,
    step: u64,
}

impl Iterator for FrameStream {
    type Item = SyncResult<RasterFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.plan.frame_count() {
            return None;
        }
        let frame = self.plan.frame(self.next);
        self.next += self.step;
        Some(self.renderer.render(&frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoteId;
    use crate::geometry::{PixelRect, Point, Rect};
    use crate::render::CursorStyle;
    use crate::sync::{ChordAnchor, ScrollWindowPlanner, ViewMode, Waypoint};

    fn pages() -> Arc<PageSet> {
        let mut page = RgbImage::from_pixel(40, 20, Rgb([200, 200, 200]));
        page.put_pixel(0, 0, Rgb([10, 20, 30]));
        Arc::new(PageSet::from_images(vec![page]))
    }

    fn frame(crop: PixelRect) -> ViewportFrame {
        ViewportFrame {
            index: 3,
            time: 0.1,
            page: 0,
            crop,
            cursor: Point::new(10.0, 10.0),
            highlight: Rect::new(8.0, 8.0, 12.0, 12.0),
        }
    }

    #[test]
    fn letterboxes_wide_crop() {
        let renderer = FrameRenderer::new(pages(), (40, 40), CursorOverlay::new(CursorStyle::None, "red"));
        let raster = renderer.render(&frame(PixelRect::full(40, 20))).unwrap();
        assert_eq!(raster.index, 3);
        assert_eq!(raster.image.dimensions(), (40, 40));
        // Bars above and below, page in the middle.
        assert_eq!(*raster.image.get_pixel(20, 2), BACKGROUND);
        assert_eq!(*raster.image.get_pixel(20, 37), BACKGROUND);
        assert_eq!(*raster.image.get_pixel(20, 20), Rgb([200, 200, 200]));
        assert_eq!(*raster.image.get_pixel(0, 10), Rgb([10, 20, 30]));
    }

    #[test]
    fn cursor_line_lands_on_note() {
        let renderer = FrameRenderer::new(pages(), (40, 20), CursorOverlay::new(CursorStyle::Line, "blue"));
        let raster = renderer.render(&frame(PixelRect::full(40, 20))).unwrap();
        assert_eq!(*raster.image.get_pixel(9, 5), Rgb([0, 0, 255]));
        assert_eq!(*raster.image.get_pixel(10, 5), Rgb([0, 0, 255]));
        assert_eq!(*raster.image.get_pixel(12, 5), Rgb([200, 200, 200]));
    }

    #[test]
    fn crop_outside_page_is_rejected() {
        let renderer = FrameRenderer::new(pages(), (10, 10), CursorOverlay::new(CursorStyle::None, "red"));
        let bad = PixelRect {
            x: 35,
            y: 0,
            width: 10,
            height: 10,
        };
        assert!(renderer.render(&frame(bad)).is_err());
    }

    #[test]
    fn rendering_is_deterministic() {
        let renderer = FrameRenderer::new(pages(), (32, 18), CursorOverlay::new(CursorStyle::Box, "green"));
        let f = frame(PixelRect {
            x: 4,
            y: 2,
            width: 20,
            height: 12,
        });
        assert_eq!(renderer.render(&f).unwrap(), renderer.render(&f).unwrap());
    }

    #[test]
    fn stream_covers_plan_in_order() {
        let waypoint = Waypoint {
            time: 0.0,
            page: 0,
            x: 10.0,
            y: 10.0,
            id: NoteId::from("a"),
            bbox: Rect::new(8.0, 8.0, 12.0, 12.0),
            held: false,
        };
        let plan = ScrollWindowPlanner::new(10, (20, 10), ViewMode::default(), ChordAnchor::FirstVoice)
            .unwrap()
            .plan(&[waypoint], &[(40, 20)], 0.5)
            .unwrap();
        let renderer = FrameRenderer::new(pages(), (20, 10), CursorOverlay::new(CursorStyle::Line, "red"));

        let all: Vec<u64> = renderer
            .clone()
            .into_frames(Arc::new(plan.clone()))
            .map(|f| f.unwrap().index)
            .collect();
        assert_eq!(all, vec![0, 1, 2, 3, 4]);

        let odd: Vec<u64> = renderer
            .into_stream(Arc::new(plan), 1, 2)
            .map(|f| f.unwrap().index)
            .collect();
        assert_eq!(odd, vec![1, 3]);
    }
}
