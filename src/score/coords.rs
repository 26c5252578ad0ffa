use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use percent_encoding::percent_decode_str;

use crate::error::{SyncError, SyncResult};
use crate::events::NoteId;
use crate::format::{Declaration, Record, split_listing};
use crate::geometry::{Point, Rect};
use crate::score::{LySource, SourceToken};

const BOUNDS_EPSILON: f64 = 1e-6;

/// Conversion from engraver units to raster pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitScale {
    pub units_per_inch: f64,
    pub dpi: f64,
}

impl UnitScale {
    /// Values are already raster pixels.
    pub fn identity() -> Self {
        Self {
            units_per_inch: 1.0,
            dpi: 1.0,
        }
    }

    /// PDF points (72 per inch) rasterized at `dpi`.
    pub fn points(dpi: f64) -> Self {
        Self {
            units_per_inch: 72.0,
            dpi,
        }
    }

    pub fn factor(&self) -> f64 {
        self.dpi / self.units_per_inch
    }

    pub fn to_pixels(&self, units: f64) -> f64 {
        units * self.factor()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoordinateFormat {
    /// `pixels/1`: `<id> <page> <x> <y> <width> <height> [pitch]`, top-left origin.
    Pixels { scale: UnitScale },
    /// `links/1`: `<page> <x0> <y0> <x1> <y1> <uri>` point-and-click rectangles
    /// in bottom-left origin units.
    Links { scale: UnitScale },
}

impl CoordinateFormat {
    pub fn from_declaration(decl: &Declaration, dpi: f64) -> SyncResult<Self> {
        match (decl.name.as_str(), decl.version) {
            ("pixels", 1) => {
                let scale = match decl.attr_f64("units-per-inch", "coordinate")? {
                    Some(units_per_inch) => UnitScale {
                        units_per_inch,
                        dpi,
                    },
                    None => UnitScale::identity(),
                };
                Ok(CoordinateFormat::Pixels { scale })
            }
            ("links", 1) => {
                let units_per_inch = decl
                    .attr_f64("units-per-inch", "coordinate")?
                    .unwrap_or(72.0);
                Ok(CoordinateFormat::Links {
                    scale: UnitScale {
                        units_per_inch,
                        dpi,
                    },
                })
            }
            _ => Err(SyncError::UnsupportedFormat {
                what: "coordinate",
                declared: decl.tag(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageCoordinate {
    pub page: usize,
    /// Point the cursor follows.
    pub anchor: Point,
    pub bbox: Rect,
    /// MIDI pitch, or only its pitch class when recovered from a source
    /// file. Pitch matching compares classes either way.
    pub pitch: Option<u8>,
    /// Tied on from the previous note, so never struck on its own.
    pub continues_tie: bool,
}

/// Page, then left to right, then top to bottom.
fn reading_cmp(a: &PageCoordinate, b: &PageCoordinate) -> Ordering {
    a.page
        .cmp(&b.page)
        .then(a.bbox.x0.total_cmp(&b.bbox.x0))
        .then(a.bbox.y0.total_cmp(&b.bbox.y0))
}

#[derive(Debug, Clone, Default)]
pub struct CoordinateMap {
    by_id: HashMap<NoteId, PageCoordinate>,
    order: Vec<NoteId>,
}

impl CoordinateMap {
    pub fn insert(&mut self, id: NoteId, coord: PageCoordinate) -> Result<(), NoteId> {
        if self.by_id.contains_key(&id) {
            return Err(id);
        }
        self.order.push(id.clone());
        self.by_id.insert(id, coord);
        Ok(())
    }

    pub fn get(&self, id: &NoteId) -> Option<&PageCoordinate> {
        self.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entries in listing order.
    pub fn iter(&self) -> impl Iterator<Item = (&NoteId, &PageCoordinate)> {
        self.order.iter().map(|id| (id, &self.by_id[id]))
    }

    /// Entries as a reader meets them: by page, then left to right, then top
    /// to bottom, then by id.
    pub fn reading_order(&self) -> Vec<(&NoteId, &PageCoordinate)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by(|(ia, a), (ib, b)| reading_cmp(a, b).then_with(|| ia.cmp(ib)));
        entries
    }
}

pub struct NoteCoordinateExtractor {
    dpi: f64,
}

impl NoteCoordinateExtractor {
    /// `dpi` is the resolution the pages were rasterized at.
    pub fn new(dpi: f64) -> Self {
        Self { dpi }
    }

    pub fn extract_file(&self, path: &Path, pages: &[(u32, u32)]) -> SyncResult<CoordinateMap> {
        let text = fs::read_to_string(path).map_err(|e| SyncError::unavailable(path, e))?;
        self.extract(&text, pages)
    }

    /// Parses a coordinate listing against the dimensions of the rendered
    /// pages.
    pub fn extract(&self, listing: &str, pages: &[(u32, u32)]) -> SyncResult<CoordinateMap> {
        let (decl, records) = split_listing(listing, "coordinate")?;
        let format = CoordinateFormat::from_declaration(&decl, self.dpi)?;
        tracing::debug!(format = %decl.tag(), records = records.len(), "Parsing coordinate listing");

        let map = match format {
            CoordinateFormat::Pixels { scale } => {
                let mut map = CoordinateMap::default();
                for record in records {
                    let (id, coord) = parse_pixel_record(&record, scale)?;
                    check_bounds(&record, &coord, pages)?;
                    map.insert(id, coord).map_err(|id| {
                        SyncError::coords(record.line, format!("duplicate identifier '{id}'"))
                    })?;
                }
                map
            }
            CoordinateFormat::Links { scale } => extract_links(&records, scale, pages)?,
        };

        tracing::info!(notes = map.len(), pages = pages.len(), "Extracted note coordinates");
        Ok(map)
    }
}

struct Link {
    line: usize,
    position: SourcePosition,
    coord: PageCoordinate,
}

/// Link listings name notes by source position. Links to rests, ties and
/// other non-note grobs are dropped when the source can be read. A position
/// engraved several times (repeats, reused variables) gets one identifier per
/// placement in reading order: `12:4`, `12:4#2`, and so on.
fn extract_links(records: &[Record<'_>], scale: UnitScale, pages: &[(u32, u32)]) -> SyncResult<CoordinateMap> {
    let mut sources = SourceCache::default();
    let mut links = Vec::with_capacity(records.len());
    let (mut foreign, mut not_notes) = (0usize, 0usize);

    for record in records {
        let Some(mut link) = parse_link_record(record, scale, pages)? else {
            foreign += 1;
            continue;
        };
        check_bounds(record, &link.coord, pages)?;
        match sources.token_at(&link.position) {
            Some(SourceToken::Note {
                pitch_class,
                continues_tie,
            }) => {
                link.coord.pitch = pitch_class;
                link.coord.continues_tie = continues_tie;
            }
            Some(_) => {
                not_notes += 1;
                continue;
            }
            None => {}
        }
        links.push(link);
    }
    if foreign + not_notes > 0 {
        tracing::debug!(foreign, not_notes, "Skipped links that do not point at notes");
    }

    links.sort_by(|a, b| reading_cmp(&a.coord, &b.coord));
    let mut seen: HashMap<NoteId, usize> = HashMap::new();
    let mut map = CoordinateMap::default();
    for link in links {
        let id = link.position.id();
        let count = seen.entry(id.clone()).or_insert(0);
        *count += 1;
        let id = match *count {
            1 => id,
            n => NoteId::new(format!("{id}#{n}")),
        };
        map.insert(id, link.coord).map_err(|id| {
            SyncError::coords(link.line, format!("duplicate identifier '{id}'"))
        })?;
    }
    Ok(map)
}

/// Source files named by links, read once each.
#[derive(Default)]
struct SourceCache {
    files: HashMap<String, Option<LySource>>,
}

impl SourceCache {
    /// `None` when the source file cannot be read.
    fn token_at(&mut self, position: &SourcePosition) -> Option<SourceToken> {
        let source = self.files.entry(position.path.clone()).or_insert_with(|| {
            match LySource::load(Path::new(&position.path)) {
                Ok(source) => Some(source),
                Err(e) => {
                    tracing::warn!(error = %e, "Cannot read notation source; keeping every link without pitch");
                    None
                }
            }
        });
        source.as_ref().map(|s| s.token_at(position.line, position.column))
    }
}

fn parse_pixel_record(
    record: &Record<'_>,
    scale: UnitScale,
) -> SyncResult<(NoteId, PageCoordinate)> {
    let fields = record.fields();
    if !(6..=7).contains(&fields.len()) {
        return Err(SyncError::coords(
            record.line,
            format!("expected 6 or 7 fields, found {}", fields.len()),
        ));
    }

    let page = parse_page(record, fields[1])?;
    let x = scale.to_pixels(parse_number(record, fields[2], "x")?);
    let y = scale.to_pixels(parse_number(record, fields[3], "y")?);
    let width = scale.to_pixels(parse_number(record, fields[4], "width")?);
    let height = scale.to_pixels(parse_number(record, fields[5], "height")?);
    if width < 0.0 || height < 0.0 {
        return Err(SyncError::coords(record.line, "negative note size"));
    }
    let pitch = match fields.get(6) {
        Some(raw) => Some(
            raw.parse::<u8>()
                .ok()
                .filter(|p| *p < 128)
                .ok_or_else(|| SyncError::coords(record.line, format!("bad pitch '{raw}'")))?,
        ),
        None => None,
    };

    Ok((
        NoteId::new(fields[0]),
        PageCoordinate {
            page,
            anchor: Point::new(x, y),
            bbox: Rect::new(x, y, x + width, y + height),
            pitch,
            continues_tie: false,
        },
    ))
}

/// Returns `None` for links that do not carry a `textedit://` source position.
fn parse_link_record(record: &Record<'_>, scale: UnitScale, pages: &[(u32, u32)]) -> SyncResult<Option<Link>> {
    let fields = record.fields();
    if fields.len() != 6 {
        return Err(SyncError::coords(
            record.line,
            format!("expected 6 fields, found {}", fields.len()),
        ));
    }

    let Some(position) = SourcePosition::parse(fields[5]) else {
        return Ok(None);
    };
    let page = parse_page(record, fields[0])?;
    let page_height = pages
        .get(page)
        .map(|&(_, h)| h as f64)
        .ok_or_else(|| missing_page(record, page, pages))?;

    let mut corners = [0.0f64; 4];
    for (slot, (raw, name)) in corners
        .iter_mut()
        .zip(fields[1..5].iter().zip(["x0", "y0", "x1", "y1"]))
    {
        *slot = scale.to_pixels(parse_number(record, raw, name)?);
    }
    let [x0, y0, x1, y1] = corners;
    let bbox = Rect::new(x0, page_height - y0, x1, page_height - y1);

    Ok(Some(Link {
        line: record.line,
        position,
        coord: PageCoordinate {
            page,
            anchor: bbox.center(),
            bbox,
            pitch: None,
            continues_tie: false,
        },
    }))
}

#[derive(Debug, Clone, PartialEq)]
struct SourcePosition {
    path: String,
    line: u32,
    column: u32,
}

impl SourcePosition {
    /// `textedit:///path/score.ly:12:4:5` is line 12, start column 4.
    fn parse(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("textedit://")?;
        let mut parts = rest.rsplitn(4, ':');
        let _end_column: u32 = parts.next()?.parse().ok()?;
        let column: u32 = parts.next()?.parse().ok()?;
        let line: u32 = parts.next()?.parse().ok()?;
        let path = percent_decode_str(parts.next()?).decode_utf8_lossy().into_owned();
        Some(Self { path, line, column })
    }

    fn id(&self) -> NoteId {
        NoteId::new(format!("{}:{}", self.line, self.column))
    }
}

fn parse_page(record: &Record<'_>, raw: &str) -> SyncResult<usize> {
    raw.parse::<usize>()
        .map_err(|_| SyncError::coords(record.line, format!("bad page index '{raw}'")))
}

fn parse_number(record: &Record<'_>, raw: &str, name: &str) -> SyncResult<f64> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(SyncError::coords(record.line, format!("bad {name} '{raw}'"))),
    }
}

fn missing_page(record: &Record<'_>, page: usize, pages: &[(u32, u32)]) -> SyncError {
    SyncError::coords(
        record.line,
        format!("page {page} has no image ({} pages rendered)", pages.len()),
    )
}

fn check_bounds(
    record: &Record<'_>,
    coord: &PageCoordinate,
    pages: &[(u32, u32)],
) -> SyncResult<()> {
    let &(width, height) = pages
        .get(coord.page)
        .ok_or_else(|| missing_page(record, coord.page, pages))?;

    let b = coord.bbox;
    let shrunk = Rect {
        x0: b.x0 + BOUNDS_EPSILON,
        y0: b.y0 + BOUNDS_EPSILON,
        x1: b.x1 - BOUNDS_EPSILON,
        y1: b.y1 - BOUNDS_EPSILON,
    };
    if !shrunk.within(width as f64, height as f64) {
        return Err(SyncError::coords(
            record.line,
            format!(
                "box ({:.1}, {:.1})-({:.1}, {:.1}) lies outside page {} ({}x{})",
                b.x0, b.y0, b.x1, b.y1, coord.page, width, height
            ),
        ));
    }
    Ok(())
}
