//! Title card played before the score starts.

use std::fs;
use std::path::Path;

use fontdue::layout::{CoordinateSystem, HorizontalAlign, Layout, LayoutSettings, TextStyle, VerticalAlign, WrapStyle};
use fontdue::{Font, FontSettings};
use image::{Rgb, RgbImage};

use super::RasterFrame;
use crate::error::{SyncError, SyncResult};

const PAPER: Rgb<u8> = Rgb([255, 255, 255]);
const INK: [u8; 3] = [0, 0, 0];

/// Black text on white: the piece's name above the middle, its author below.
pub struct TitleCard {
    font: Font,
    name: String,
    author: Option<String>,
}

impl TitleCard {
    pub fn load(font_path: &Path, name: impl Into<String>, author: Option<String>) -> SyncResult<Self> {
        let bytes = fs::read(font_path).map_err(|e| SyncError::unavailable(font_path, e))?;
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| SyncError::unavailable(font_path, format!("not a usable font: {e}")))?;
        Ok(Self {
            font,
            name: name.into(),
            author,
        })
    }

    pub fn render(&self, size: (u32, u32)) -> RgbImage {
        let mut image = RgbImage::from_pixel(size.0, size.1, PAPER);
        let (w, h) = (size.0 as f32, size.1 as f32);

        let name = self.layout(&self.name, h / 15.0);
        let (width, height) = extent(&name);
        self.paint(&mut image, &name, ((w - width) / 2.0, (h - height) / 2.0 - h / 25.0));

        if let Some(author) = &self.author {
            let author = self.layout(author, h / 25.0);
            let (width, _) = extent(&author);
            self.paint(&mut image, &author, ((w - width) / 2.0, h / 2.0 + h / 25.0));
        }
        image
    }

    /// Lays `text` out from the origin.
    fn layout(&self, text: &str, px: f32) -> Layout {
        let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
        layout.reset(&LayoutSettings {
            x: 0.0,
            y: 0.0,
            max_width: None,
            max_height: None,
            horizontal_align: HorizontalAlign::Left,
            vertical_align: VerticalAlign::Top,
            line_height: 1.0,
            wrap_style: WrapStyle::Letter,
            wrap_hard_breaks: true,
        });
        layout.append(&[&self.font], &TextStyle::new(text, px.max(1.0), 0));
        layout
    }

    fn paint(&self, image: &mut RgbImage, layout: &Layout, origin: (f32, f32)) {
        let (width, height) = (image.width() as i32, image.height() as i32);
        for glyph in layout.glyphs() {
            if glyph.width == 0 || glyph.height == 0 {
                continue;
            }
            let (_, coverage) = self.font.rasterize_config(glyph.key);
            let x0 = (origin.0 + glyph.x).round() as i32;
            let y0 = (origin.1 + glyph.y).round() as i32;
            for row in 0..glyph.height {
                let y = y0 + row as i32;
                if !(0..height).contains(&y) {
                    continue;
                }
                for col in 0..glyph.width {
                    let x = x0 + col as i32;
                    let alpha = coverage[row * glyph.width + col];
                    if alpha == 0 || !(0..width).contains(&x) {
                        continue;
                    }
                    blend(image.get_pixel_mut(x as u32, y as u32), alpha);
                }
            }
        }
    }
}

/// Ink width and line height of a laid out string.
fn extent(layout: &Layout) -> (f32, f32) {
    let glyphs = layout.glyphs();
    let left = glyphs.iter().map(|g| g.x).fold(f32::INFINITY, f32::min);
    let right = glyphs.iter().map(|g| g.x + g.width as f32).fold(f32::NEG_INFINITY, f32::max);
    let width = if right > left { right - left } else { 0.0 };
    (width, layout.height())
}

fn blend(pixel: &mut Rgb<u8>, alpha: u8) {
    let alpha = u16::from(alpha);
    let inv = 255 - alpha;
    for (dst, ink) in pixel.0.iter_mut().zip(INK) {
        *dst = ((u16::from(ink) * alpha + u16::from(*dst) * inv + 127) / 255) as u8;
    }
}

/// Title frames ahead of the score, and how far the audio is delayed to
/// stay in step with them.
#[derive(Debug, Clone)]
pub struct TitleSegment {
    pub image: RgbImage,
    pub frames: u64,
    pub offset_secs: f64,
}

impl TitleSegment {
    /// Holds `image` for `delay_secs`, rounded to whole frames.
    pub fn new(image: RgbImage, fps: u32, delay_secs: f64) -> Self {
        let fps = fps.max(1);
        let frames = (delay_secs.max(0.0) * fps as f64).round() as u64;
        Self {
            image,
            frames,
            offset_secs: frames as f64 / fps as f64,
        }
    }

    pub fn frame(&self, index: u64) -> RasterFrame {
        RasterFrame {
            index,
            image: self.image.clone(),
        }
    }
}
