use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone)]
pub struct PageImage {
    pub source: Option<PathBuf>,
    pub image: RgbImage,
}

impl PageImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Rendered pages, indexed 0..N-1. Read-only once loaded.
#[derive(Debug, Clone, Default)]
pub struct PageSet {
    pages: Vec<PageImage>,
}

impl PageSet {
    pub fn load(paths: &[PathBuf]) -> SyncResult<Self> {
        if paths.is_empty() {
            return Err(SyncError::Config("no page images given".to_string()));
        }

        let mut pages = Vec::with_capacity(paths.len());
        for path in paths {
            let image = image::open(path).map_err(|e| SyncError::unavailable(path, e))?;
            let image = image.to_rgb8();
            tracing::debug!(
                path = %path.display(),
                width = image.width(),
                height = image.height(),
                "Loaded page image"
            );
            pages.push(PageImage {
                source: Some(path.clone()),
                image,
            });
        }

        Ok(Self { pages })
    }

    pub fn from_images(images: Vec<RgbImage>) -> Self {
        Self {
            pages: images
                .into_iter()
                .map(|image| PageImage {
                    source: None,
                    image,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PageImage> {
        self.pages.get(index)
    }

    pub fn dimensions(&self) -> Vec<(u32, u32)> {
        self.pages.iter().map(|p| (p.width(), p.height())).collect()
    }
}

/// Finds `<stem>.png` or `<stem>-page<N>.png` files in `dir`, ordered by page
/// number. A lone `<stem>.png` counts as page 1.
pub fn discover_pages(dir: &Path, stem: &str) -> SyncResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| SyncError::unavailable(dir, e))?;

    let mut found: Vec<(u32, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SyncError::unavailable(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(number) = page_number(name, stem) {
            found.push((number, entry.path()));
        }
    }

    if found.is_empty() {
        return Err(SyncError::unavailable(
            dir,
            format!("no page images named {stem}.png or {stem}-pageN.png"),
        ));
    }

    found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Ok(found.into_iter().map(|(_, p)| p).collect())
}

fn page_number(file_name: &str, stem: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(stem)?.strip_suffix(".png")?;
    if rest.is_empty() {
        return Some(1);
    }
    rest.strip_prefix("-page")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn page_numbers() {
        assert_eq!(page_number("score.png", "score"), Some(1));
        assert_eq!(page_number("score-page12.png", "score"), Some(12));
        assert_eq!(page_number("score-page.png", "score"), None);
        assert_eq!(page_number("other.png", "score"), None);
        assert_eq!(page_number("score.midi", "score"), None);
    }

    #[test]
    fn discovers_pages_in_numeric_order() {
        let dir = tempdir().unwrap();
        for n in [10, 2, 1] {
            let img = RgbImage::new(4, 4);
            img.save(dir.path().join(format!("score-page{n}.png"))).unwrap();
        }
        fs::write(dir.path().join("score.midi"), b"x").unwrap();

        let pages = discover_pages(dir.path(), "score").unwrap();
        let names: Vec<_> = pages
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["score-page1.png", "score-page2.png", "score-page10.png"]
        );

        let set = PageSet::load(&pages).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.dimensions(), vec![(4, 4); 3]);
    }

    #[test]
    fn missing_image_is_unavailable() {
        let err = PageSet::load(&[PathBuf::from("/nonexistent/page.png")]).unwrap_err();
        assert!(matches!(err, SyncError::ResourceUnavailable { .. }));
    }
}
