//! Declared-format headers for the text listings exchanged with the
//! engraver and the synthesizer.
//!
//! Every listing starts with a line such as
//!
//! ```text
//! #format pixels/1 units-per-inch=72
//! ```
//!
//! naming the record layout and its version. Parsers pick their variant from
//! this declaration and refuse anything they do not know.

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub version: u32,
    pub attributes: Vec<(String, String)>,
}

impl Declaration {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn attr_f64(&self, key: &str, what: &'static str) -> SyncResult<Option<f64>> {
        match self.attr(key) {
            None => Ok(None),
            Some(raw) => match raw.parse::<f64>() {
                Ok(v) if v.is_finite() && v > 0.0 => Ok(Some(v)),
                _ => Err(SyncError::UnsupportedFormat {
                    what,
                    declared: format!("{}={}", key, raw),
                }),
            },
        }
    }

    pub fn tag(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

/// A non-empty, non-comment line of a listing with its 1-based line number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record<'a> {
    pub line: usize,
    pub text: &'a str,
}

impl<'a> Record<'a> {
    pub fn fields(&self) -> Vec<&'a str> {
        self.text.split_whitespace().collect()
    }
}

/// Splits a listing into its declaration and its records. Blank lines and
/// lines starting with `%` are skipped.
pub fn split_listing<'a>(
    text: &'a str,
    what: &'static str,
) -> SyncResult<(Declaration, Vec<Record<'a>>)> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| Record {
            line: i + 1,
            text: l.trim(),
        })
        .filter(|r| !r.text.is_empty() && !r.text.starts_with('%'));

    let header = lines.next().ok_or_else(|| SyncError::UnsupportedFormat {
        what,
        declared: "<empty listing>".to_string(),
    })?;
    let declaration = parse_declaration(header.text, what)?;

    Ok((declaration, lines.collect()))
}

fn parse_declaration(line: &str, what: &'static str) -> SyncResult<Declaration> {
    let unsupported = || SyncError::UnsupportedFormat {
        what,
        declared: line.to_string(),
    };

    let rest = line.strip_prefix("#format").ok_or_else(unsupported)?;
    let mut parts = rest.split_whitespace();
    let tag = parts.next().ok_or_else(unsupported)?;
    let (name, version) = tag.split_once('/').ok_or_else(unsupported)?;
    let version: u32 = version.parse().map_err(|_| unsupported())?;

    let mut attributes = Vec::new();
    for part in parts {
        let (k, v) = part.split_once('=').ok_or_else(unsupported)?;
        attributes.push((k.to_string(), v.to_string()));
    }

    Ok(Declaration {
        name: name.to_string(),
        version,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_declaration_and_skips_comments() {
        let text = "% generated\n\n#format pixels/1 units-per-inch=72\nn1 0 1 2 3 4\n% c\nn2 0 5 6 7 8\n";
        let (decl, records) = split_listing(text, "coordinate").unwrap();
        assert_eq!(decl.name, "pixels");
        assert_eq!(decl.version, 1);
        assert_eq!(decl.attr("units-per-inch"), Some("72"));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].line, 4);
        assert_eq!(records[1].fields()[0], "n2");
    }

    #[test]
    fn missing_declaration_is_rejected() {
        let err = split_listing("n1 0 1 2 3 4\n", "coordinate").unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedFormat { what: "coordinate", .. }));
    }

    #[test]
    fn empty_listing_is_rejected() {
        assert!(split_listing("\n\n", "onset").is_err());
    }

    #[test]
    fn bad_attribute_value() {
        let (decl, _) = split_listing("#format pixels/1 units-per-inch=abc\n", "coordinate").unwrap();
        assert!(decl.attr_f64("units-per-inch", "coordinate").is_err());
    }
}
