mod cursor;
mod frame;
mod title;

pub use cursor::{CursorOverlay, CursorStyle, color_by_name};
pub use frame::{FrameRenderer, FrameStream, RasterFrame};
pub use title::{TitleCard, TitleSegment};
