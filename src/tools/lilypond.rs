use std::path::{Path, PathBuf};

use super::run_tool;
use crate::error::{SyncError, SyncResult};
use crate::score::{discover_pages, write_links_listing};

/// Files the engraver leaves in the work directory.
#[derive(Debug, Clone)]
pub struct EngravedScore {
    pub pages: Vec<PathBuf>,
    /// `links/1` listing of the PDF's point-and-click annotations.
    pub coordinates: PathBuf,
    pub midi: PathBuf,
}

pub struct LilyPondEngraver {
    program: String,
    dpi: u32,
}

impl LilyPondEngraver {
    pub const STEM: &'static str = "score";

    pub fn new(program: impl Into<String>, dpi: u32) -> Self {
        Self {
            program: program.into(),
            dpi,
        }
    }

    pub fn args(&self, source: &Path, work: &Path) -> Vec<String> {
        vec![
            "--pdf".to_string(),
            "--png".to_string(),
            format!("-dresolution={}", self.dpi),
            "-dpoint-and-click".to_string(),
            "-dmidi-extension=midi".to_string(),
            "-o".to_string(),
            work.join(Self::STEM).display().to_string(),
            source.display().to_string(),
        ]
    }

    pub fn engrave(&self, source: &Path, work: &Path) -> SyncResult<EngravedScore> {
        if !source.is_file() {
            return Err(SyncError::unavailable(source, "notation source not found"));
        }
        tracing::info!(source = %source.display(), dpi = self.dpi, "Engraving score");
        run_tool(&self.program, &self.args(source, work), Some(work))?;

        let pages = discover_pages(work, Self::STEM)?;
        let pdf = work.join(format!("{}.pdf", Self::STEM));
        let midi = work.join(format!("{}.midi", Self::STEM));
        for expected in [&pdf, &midi] {
            if !expected.is_file() {
                return Err(SyncError::ToolFailed {
                    program: self.program.clone(),
                    message: format!("expected output {} was not written", expected.display()),
                });
            }
        }
        let coordinates = work.join(format!("{}.coords", Self::STEM));
        let links = write_links_listing(&pdf, &coordinates)?;

        tracing::info!(pages = pages.len(), links, "Engraved score");
        Ok(EngravedScore {
            pages,
            coordinates,
            midi,
        })
    }
}
