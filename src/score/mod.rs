mod coords;
mod pages;
mod pdf;
mod source;

pub use coords::{
    CoordinateFormat, CoordinateMap, NoteCoordinateExtractor, PageCoordinate, UnitScale,
};
pub use pages::{PageImage, PageSet, discover_pages};
pub use pdf::{PdfLink, links_listing, read_pdf_links, write_links_listing};
pub use source::{LySource, SourceToken};
