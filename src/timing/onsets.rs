use std::fs;
use std::path::Path;

use crate::error::{SyncError, SyncResult};
use crate::events::{NoteEvent, NoteId, OnsetStream};
use crate::format::{Record, split_listing};

pub fn read_onset_listing(path: &Path) -> SyncResult<OnsetStream> {
    let text = fs::read_to_string(path).map_err(|e| SyncError::unavailable(path, e))?;
    parse_onset_listing(&text)
}

/// Parses an `onsets/1` listing:
///
/// ```text
/// #format onsets/1
/// 0.000 n1 0 60 0.5
/// 0.500 n2 0
/// end 2.0
/// ```
///
/// Records are `<time> <id> <channel> [pitch] [duration]`; `end <time>`
/// declares the length of the performance.
pub fn parse_onset_listing(text: &str) -> SyncResult<OnsetStream> {
    let (decl, records) = split_listing(text, "onset")?;
    if (decl.name.as_str(), decl.version) != ("onsets", 1) {
        return Err(SyncError::UnsupportedFormat {
            what: "onset",
            declared: decl.tag(),
        });
    }

    let mut stream = OnsetStream::default();
    for record in records {
        let fields = record.fields();
        if fields[0] == "end" {
            if fields.len() != 2 {
                return Err(SyncError::onsets(record.line, "expected 'end <time>'"));
            }
            stream.end_time = Some(parse_seconds(&record, fields[1], "end time")?);
            continue;
        }

        if !(3..=5).contains(&fields.len()) {
            return Err(SyncError::onsets(
                record.line,
                format!("expected 3 to 5 fields, found {}", fields.len()),
            ));
        }

        let onset = parse_seconds(&record, fields[0], "time")?;
        let channel = fields[2]
            .parse::<u8>()
            .ok()
            .filter(|c| *c < 16)
            .ok_or_else(|| SyncError::onsets(record.line, format!("bad channel '{}'", fields[2])))?;
        let pitch = match fields.get(3) {
            Some(&"-") | None => None,
            Some(raw) => Some(
                raw.parse::<u8>()
                    .ok()
                    .filter(|p| *p < 128)
                    .ok_or_else(|| SyncError::onsets(record.line, format!("bad pitch '{raw}'")))?,
            ),
        };
        let duration = match fields.get(4) {
            Some(raw) => Some(parse_seconds(&record, raw, "duration")?),
            None => None,
        };

        stream.events.push(NoteEvent {
            id: NoteId::new(fields[1]),
            channel,
            pitch,
            onset,
            duration,
        });
    }

    tracing::debug!(onsets = stream.events.len(), "Parsed onset listing");
    Ok(stream)
}

fn parse_seconds(record: &Record<'_>, raw: &str, name: &str) -> SyncResult<f64> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(SyncError::onsets(record.line, format!("bad {name} '{raw}'"))),
    }
}
