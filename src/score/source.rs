//! Just enough LilyPond source reading to tell what a point-and-click link
//! points at: a note (and its pitch class), a rest, a tie, or something else.

use std::fs;
use std::path::Path;

use crate::error::{SyncError, SyncResult};

/// What sits at a linked source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceToken {
    Note {
        /// `None` when the note name cannot be read (chord repeats, unknown
        /// note-name languages).
        pitch_class: Option<u8>,
        /// Second half of a tie; it is not struck again.
        continues_tie: bool,
    },
    Rest,
    Tie,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NoteNames {
    Nederlands,
    English,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct LySource {
    lines: Vec<String>,
    names: NoteNames,
}

impl LySource {
    pub fn load(path: &Path) -> SyncResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| SyncError::unavailable(path, e))?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let names = lines
            .iter()
            .find_map(|l| note_names_directive(l))
            .unwrap_or(NoteNames::Nederlands);
        Self { lines, names }
    }

    /// `line` is 1-based, `column` a 0-based character offset, as in
    /// `textedit://` links.
    pub fn token_at(&self, line: u32, column: u32) -> SourceToken {
        let Some(text) = (line as usize).checked_sub(1).and_then(|i| self.lines.get(i)) else {
            return SourceToken::Other;
        };
        let Some((start, _)) = text.char_indices().nth(column as usize) else {
            return SourceToken::Other;
        };
        let rest = &text[start..];
        let continues_tie = || self.follows_tie(line as usize - 1, start);

        let Some(first) = rest.chars().next() else {
            return SourceToken::Other;
        };
        if first == '~' {
            return SourceToken::Tie;
        }
        let word_ends = |len: usize| !rest[len..].starts_with(|c: char| c.is_ascii_alphabetic());

        if self.names == NoteNames::Unknown {
            return if first.is_alphabetic() {
                SourceToken::Note {
                    pitch_class: None,
                    continues_tie: continues_tie(),
                }
            } else {
                SourceToken::Other
            };
        }

        match first {
            'r' | 'R' | 's' if word_ends(1) => SourceToken::Rest,
            'q' if word_ends(1) => SourceToken::Note {
                pitch_class: None,
                continues_tie: continues_tie(),
            },
            _ => match pitch_class(rest, self.names) {
                Some((class, len)) if word_ends(len) => {
                    if is_pitched_rest(&rest[len..]) {
                        SourceToken::Rest
                    } else {
                        SourceToken::Note {
                            pitch_class: Some(class),
                            continues_tie: continues_tie(),
                        }
                    }
                }
                _ => SourceToken::Other,
            },
        }
    }

    /// Whether the music just before `byte` on `line` (0-based) ends in a tie.
    fn follows_tie(&self, line: usize, byte: usize) -> bool {
        let mut before = chord_start(&self.lines[line][..byte]);
        let mut line = line;
        loop {
            let trimmed = before.trim_end_matches(|c: char| c.is_whitespace() || c == '|');
            if !trimmed.is_empty() {
                return trimmed.ends_with('~');
            }
            if line == 0 {
                return false;
            }
            line -= 1;
            before = strip_comment(&self.lines[line]);
        }
    }

    /// Value of a `\header` field such as `title = "Menuet"`.
    pub fn header_field(&self, name: &str) -> Option<String> {
        self.lines.iter().find_map(|line| {
            let rest = line.trim().strip_prefix(name)?.trim_start().strip_prefix('=')?;
            let value = rest.trim().strip_prefix('"')?;
            let end = value.find('"')?;
            Some(value[..end].to_string())
        })
    }
}

fn note_names_directive(line: &str) -> Option<NoteNames> {
    const LANGUAGES: [&str; 12] = [
        "catalan", "deutsch", "english", "espanol", "español", "francais", "italiano", "nederlands", "norsk",
        "portugues", "suomi", "svenska",
    ];
    let line = strip_comment(line).trim();
    let (directive, rest) = if let Some(rest) = line.strip_prefix("\\language") {
        ("language", rest)
    } else {
        ("include", line.strip_prefix("\\include")?)
    };
    let lang = rest.trim().trim_matches('"').trim_end_matches(".ly");
    match lang {
        "nederlands" => Some(NoteNames::Nederlands),
        "english" => Some(NoteNames::English),
        _ if directive == "language" || LANGUAGES.contains(&lang) => Some(NoteNames::Unknown),
        _ => None,
    }
}

fn strip_comment(line: &str) -> &str {
    line.find('%').map_or(line, |i| &line[..i])
}

/// Inside an open `<...` chord, the music before the chord.
fn chord_start(prefix: &str) -> &str {
    match (prefix.rfind('<'), prefix.rfind('>')) {
        (Some(open), close) if close.is_none_or(|c| c < open) && !prefix[..open].ends_with('<') => {
            &prefix[..open]
        }
        _ => prefix,
    }
}

/// `c4\rest` is a rest placed at a pitch.
fn is_pitched_rest(after: &str) -> bool {
    after
        .trim_start_matches(|c: char| c.is_ascii_digit() || "',.!?=*/ ".contains(c))
        .starts_with("\\rest")
}

/// Pitch class of the note name starting `token`, and the bytes it spans.
fn pitch_class(token: &str, names: NoteNames) -> Option<(u8, usize)> {
    let name = token.chars().next()?;
    let base: i32 = match name {
        'c' => 0,
        'd' => 2,
        'e' => 4,
        'f' => 5,
        'g' => 7,
        'a' => 9,
        'b' => 11,
        _ => return None,
    };
    let tail = &token[1..];
    let (alter, used) = match names {
        NoteNames::English => english_alteration(tail),
        _ => dutch_alteration(name, tail),
    };
    Some(((base + alter).rem_euclid(12) as u8, 1 + used))
}

fn dutch_alteration(name: char, tail: &str) -> (i32, usize) {
    let mut alter = 0;
    let mut used = 0;
    // "as", "es" and their doubles drop the leading 'e'.
    if matches!(name, 'a' | 'e') && tail.starts_with('s') {
        alter -= 1;
        used += 1;
    }
    for _ in 0..2 {
        let rest = &tail[used..];
        if rest.starts_with("is") {
            alter += 1;
        } else if rest.starts_with("es") {
            alter -= 1;
        } else {
            break;
        }
        used += 2;
    }
    (alter, used)
}

fn english_alteration(tail: &str) -> (i32, usize) {
    const SUFFIXES: [(&str, i32); 9] = [
        ("-sharpsharp", 2),
        ("-flatflat", -2),
        ("-sharp", 1),
        ("-flat", -1),
        ("ss", 2),
        ("x", 2),
        ("ff", -2),
        ("s", 1),
        ("f", -1),
    ];
    SUFFIXES
        .iter()
        .find(|(suffix, _)| tail.starts_with(suffix))
        .map_or((0, 0), |&(suffix, alter)| (alter, suffix.len()))
}
