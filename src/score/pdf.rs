//! Point-and-click links from an engraved PDF, turned into a `links/1`
//! coordinate listing.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use lopdf::{Document, Object};

use crate::error::{SyncError, SyncResult};

/// A link annotation: 0-based page, `[x0, y0, x1, y1]` in PDF points with a
/// bottom-left origin, and its target.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfLink {
    pub page: usize,
    pub rect: [f64; 4],
    pub uri: String,
}

/// Every URI link annotation in the document, page by page.
pub fn read_pdf_links(path: &Path) -> SyncResult<Vec<PdfLink>> {
    let doc = Document::load(path).map_err(|e| SyncError::unavailable(path, e))?;
    let mut links = Vec::new();

    for (index, (_, page_id)) in doc.get_pages().into_iter().enumerate() {
        let page = doc.get_dictionary(page_id).map_err(|e| SyncError::unavailable(path, e))?;
        let Some(annots) = page
            .get(b"Annots")
            .ok()
            .and_then(|a| doc.dereference(a).ok())
            .and_then(|(_, a)| a.as_array().ok())
        else {
            continue;
        };
        links.extend(annots.iter().filter_map(|annot| {
            let (rect, uri) = link_target(&doc, annot)?;
            Some(PdfLink {
                page: index,
                rect,
                uri,
            })
        }));
    }

    tracing::debug!(pdf = %path.display(), links = links.len(), "Read link annotations");
    Ok(links)
}

fn link_target(doc: &Document, annot: &Object) -> Option<([f64; 4], String)> {
    let annot = doc.dereference(annot).ok()?.1.as_dict().ok()?;
    let action = doc.dereference(annot.get(b"A").ok()?).ok()?.1.as_dict().ok()?;
    let uri = doc.dereference(action.get(b"URI").ok()?).ok()?.1.as_str().ok()?;
    let rect = doc.dereference(annot.get(b"Rect").ok()?).ok()?.1.as_array().ok()?;
    if rect.len() != 4 {
        return None;
    }
    let mut corners = [0.0; 4];
    for (slot, value) in corners.iter_mut().zip(rect) {
        *slot = number(value)?;
    }
    Some((corners, String::from_utf8_lossy(uri).into_owned()))
}

fn number(value: &Object) -> Option<f64> {
    match value {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// Reads the links of `pdf` and writes them to `out` as a coordinate
/// listing. Returns how many links the PDF carries.
pub fn write_links_listing(pdf: &Path, out: &Path) -> SyncResult<usize> {
    let links = read_pdf_links(pdf)?;
    fs::write(out, links_listing(&links)).map_err(|e| SyncError::unavailable(out, e))?;
    Ok(links.len())
}

/// Renders links as a `links/1` listing in PDF points.
pub fn links_listing(links: &[PdfLink]) -> String {
    let mut out = String::from("#format links/1 units-per-inch=72\n");
    for link in links.iter().filter(|l| !l.uri.contains(char::is_whitespace)) {
        let [x0, y0, x1, y1] = link.rect;
        let _ = writeln!(out, "{} {x0} {y0} {x1} {y1} {}", link.page, link.uri);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{Dictionary, dictionary};
    use crate::events::NoteId;
    use crate::score::NoteCoordinateExtractor;

    fn rect(r: [i64; 4]) -> Object {
        Object::Array(r.iter().map(|&v| Object::Integer(v)).collect())
    }

    /// Writes a PDF whose pages carry the given `(rect, uri)` link annotations.
    fn write_linked_pdf(path: &Path, size: (i64, i64), pages: &[Vec<([i64; 4], &str)>]) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for links in pages {
            let annots: Vec<Object> = links
                .iter()
                .map(|&(r, uri)| {
                    let annot = dictionary! {
                        "Type" => "Annot",
                        "Subtype" => "Link",
                        "Rect" => rect(r),
                        "A" => dictionary! {
                            "S" => "URI",
                            "URI" => Object::string_literal(uri)
                        }
                    };
                    Object::Reference(doc.add_object(annot))
                })
                .collect();
            let page: Dictionary = dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(pages_id),
                "MediaBox" => rect([0, 0, size.0, size.1]),
                "Annots" => annots
            };
            kids.push(Object::Reference(doc.add_object(page)));
        }
        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => Object::Integer(count)
            }),
        );
        let catalog = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id)
        });
        doc.trailer.set("Root", Object::Reference(catalog));
        doc.save(path).unwrap();
    }

    #[test]
    fn reads_links_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("score.pdf");
        write_linked_pdf(
            &path,
            (200, 100),
            &[
                vec![
                    ([10, 40, 20, 30], "textedit:///w/score.ly:3:2:3"),
                    ([0, 0, 5, 5], "http://lilypond.org"),
                ],
                vec![],
                vec![([50, 60, 58, 70], "textedit:///w/score.ly:4:6:7")],
            ],
        );

        let links = read_pdf_links(&path).unwrap();
        assert_eq!(
            links,
            vec![
                PdfLink {
                    page: 0,
                    rect: [10.0, 40.0, 20.0, 30.0],
                    uri: "textedit:///w/score.ly:3:2:3".to_string()
                },
                PdfLink {
                    page: 0,
                    rect: [0.0, 0.0, 5.0, 5.0],
                    uri: "http://lilypond.org".to_string()
                },
                PdfLink {
                    page: 2,
                    rect: [50.0, 60.0, 58.0, 70.0],
                    uri: "textedit:///w/score.ly:4:6:7".to_string()
                },
            ]
        );
    }

    #[test]
    fn listing_keeps_points_and_drops_unsplittable_uris() {
        let links = [
            PdfLink {
                page: 1,
                rect: [10.5, 40.0, 20.0, 30.25],
                uri: "textedit:///w/score.ly:3:2:3".to_string(),
            },
            PdfLink {
                page: 0,
                rect: [0.0, 0.0, 1.0, 1.0],
                uri: "textedit:///my score.ly:1:1:2".to_string(),
            },
        ];
        assert_eq!(
            links_listing(&links),
            "#format links/1 units-per-inch=72\n1 10.5 40 20 30.25 textedit:///w/score.ly:3:2:3\n"
        );
    }

    #[test]
    fn missing_pdf_is_unavailable() {
        let err = read_pdf_links(Path::new("/nonexistent/score.pdf")).unwrap_err();
        assert!(matches!(err, SyncError::ResourceUnavailable { .. }));
    }

    #[test]
    fn engraved_links_become_pitched_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let ly = dir.path().join("score.ly");
        std::fs::write(&ly, "\\version \"2.24.0\"\n{ c'4 e'4~ e'4 r4 }\n").unwrap();
        let uri = |line: u32, col: u32| format!("textedit://{}:{line}:{col}:{}", ly.display(), col + 1);
        let (c, e, e2, tie, rest) = (uri(2, 2), uri(2, 6), uri(2, 11), uri(2, 9), uri(2, 15));
        let pdf = dir.path().join("score.pdf");
        write_linked_pdf(
            &pdf,
            (200, 100),
            &[vec![
                ([10, 40, 14, 36], c.as_str()),
                ([30, 42, 34, 38], e.as_str()),
                ([36, 44, 44, 42], tie.as_str()),
                ([50, 42, 54, 38], e2.as_str()),
                ([70, 50, 74, 46], rest.as_str()),
            ]],
        );

        let listing = dir.path().join("score.coords");
        assert_eq!(write_links_listing(&pdf, &listing).unwrap(), 5);
        // 72 dpi keeps PDF points as pixels.
        let map = NoteCoordinateExtractor::new(72.0)
            .extract_file(&listing, &[(200, 100)])
            .unwrap();

        assert_eq!(map.len(), 3);
        let c = map.get(&NoteId::from("2:2")).unwrap();
        assert_eq!((c.pitch, c.continues_tie), (Some(0), false));
        assert_eq!(c.anchor.y, 62.0);
        let e = map.get(&NoteId::from("2:6")).unwrap();
        assert_eq!((e.pitch, e.continues_tie), (Some(4), false));
        let held = map.get(&NoteId::from("2:11")).unwrap();
        assert_eq!((held.pitch, held.continues_tie), (Some(4), true));
    }
}
