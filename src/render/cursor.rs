use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorStyle {
    /// Vertical bar through the cursor point.
    #[default]
    Line,
    /// Outline around the active note.
    Box,
    None,
}

const THICKNESS: u32 = 2;

pub fn color_by_name(name: &str) -> Option<Rgb<u8>> {
    let rgb = match name.to_ascii_lowercase().as_str() {
        "black" => [0, 0, 0],
        "yellow" => [255, 255, 0],
        "red" => [255, 0, 0],
        "green" => [0, 128, 0],
        "blue" => [0, 0, 255],
        "brown" => [165, 42, 42],
        _ => return None,
    };
    Some(Rgb(rgb))
}

/// Cursor look resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorOverlay {
    pub style: CursorStyle,
    pub color: Rgb<u8>,
}

impl CursorOverlay {
    pub fn new(style: CursorStyle, color: &str) -> Self {
        let color = color_by_name(color).unwrap_or_else(|| {
            tracing::warn!(color, "Unknown cursor color, using red");
            Rgb([255, 0, 0])
        });
        Self { style, color }
    }

    /// Draws onto `canvas`. `x` is the cursor column; `area` is the
    /// `(x0, y0, x1, y1)` region of the canvas the line spans, and `note` the
    /// highlighted box, both already in canvas pixels.
    pub fn draw(&self, canvas: &mut RgbImage, x: f64, area: (f64, f64, f64, f64), note: (f64, f64, f64, f64)) {
        match self.style {
            CursorStyle::None => {}
            CursorStyle::Line => {
                let left = (x - THICKNESS as f64 / 2.0).round();
                fill(canvas, self.color, left, area.1, left + THICKNESS as f64, area.3);
            }
            CursorStyle::Box => {
                let (x0, y0, x1, y1) = note;
                let t = THICKNESS as f64;
                fill(canvas, self.color, x0 - t, y0 - t, x1 + t, y0);
                fill(canvas, self.color, x0 - t, y1, x1 + t, y1 + t);
                fill(canvas, self.color, x0 - t, y0, x0, y1);
                fill(canvas, self.color, x1, y0, x1 + t, y1);
            }
        }
    }
}

/// Fills `[x0, x1) × [y0, y1)`, clipped to the canvas.
fn fill(canvas: &mut RgbImage, color: Rgb<u8>, x0: f64, y0: f64, x1: f64, y1: f64) {
    let (w, h) = canvas.dimensions();
    let clip = |v: f64, max: u32| v.round().clamp(0.0, max as f64) as u32;
    let (x0, x1) = (clip(x0, w), clip(x1, w));
    let (y0, y1) = (clip(y0, h), clip(y1, h));
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, color);
        }
    }
}
