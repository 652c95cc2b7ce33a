//! Session file format.
//!
//! UTF-8 text, one header row, one row per entry in insertion order. Fields
//! are quoted per RFC 4180 when they contain a delimiter, quote or line break.
//! Writing is canonical, so `encode(decode(encode(s)))` is byte-identical.
//!
//! Reading also accepts files produced by the original pandas-based tool:
//! columns in any order, missing optional columns, `True`/`False` booleans and
//! float-formatted numbers.

use crate::entry::{Entry, MAX_SCORE};
use crate::error::{CatalogueError, Result};
use crate::session::Session;

/// Column order of every file this crate writes.
pub const HEADER: [&str; 6] = [
    "tomo_name",
    "thickness",
    "notes",
    "score",
    "delete",
    "double_confirmed",
];

/// Serialize a session to its on-disk text form.
pub fn encode(session: &Session) -> String {
    let mut out = String::with_capacity(64 + session.len() * 48);
    out.push_str(&HEADER.join(","));
    out.push('\n');

    for entry in session.entries() {
        let thickness = entry.thickness.map(|t| t.to_string()).unwrap_or_default();
        let score = entry.score.map(|s| s.to_string()).unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            escape_field(&entry.tomo_name),
            thickness,
            escape_field(&entry.notes),
            score,
            entry.delete,
            entry.double_confirmed,
        ));
    }
    out
}

/// Parse session text. `name` is only used for the resulting session and for
/// error messages.
pub fn decode(name: &str, text: &str) -> Result<Session> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = parse_records(text).map_err(|e| invalid(name, e))?.into_iter();

    let header = match records.next() {
        Some(h) => h,
        None => return Err(invalid(name, "file is empty".to_string())),
    };
    let columns = Columns::locate(&header).map_err(|e| invalid(name, e))?;

    let mut entries = Vec::new();
    for (i, record) in records.enumerate() {
        // Header is line 1.
        let row = i + 2;
        if record.len() == 1 && record[0].trim().is_empty() {
            continue;
        }
        let entry = columns
            .entry(&record)
            .map_err(|e| invalid(name, format!("row {row}: {e}")))?;
        entries.push(entry);
    }

    Session::from_entries(name, entries)
}

fn invalid(name: &str, message: String) -> CatalogueError {
    CatalogueError::validation(format!("malformed session file {name}: {message}"))
}

/// Escape a field per RFC 4180.
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split text into records of unescaped fields.
fn parse_records(text: &str) -> std::result::Result<Vec<Vec<String>>, String> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut field_started = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() && !field_started => {
                in_quotes = true;
                field_started = true;
            }
            '"' => return Err(format!("unexpected quote in field {:?}", field)),
            ',' => {
                record.push(std::mem::take(&mut field));
                field_started = false;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
                field_started = false;
            }
            _ => {
                field.push(c);
                field_started = true;
            }
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    if field_started || !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

/// Column positions resolved from the header row.
struct Columns {
    tomo_name: usize,
    thickness: Option<usize>,
    notes: Option<usize>,
    score: Option<usize>,
    delete: Option<usize>,
    double_confirmed: Option<usize>,
}

impl Columns {
    fn locate(header: &[String]) -> std::result::Result<Self, String> {
        let find = |name: &str| header.iter().position(|h| h.trim() == name);
        Ok(Self {
            tomo_name: find("tomo_name").ok_or("missing tomo_name column")?,
            thickness: find("thickness"),
            notes: find("notes"),
            score: find("score"),
            delete: find("delete"),
            double_confirmed: find("double_confirmed"),
        })
    }

    fn entry(&self, record: &[String]) -> std::result::Result<Entry, String> {
        let cell = |idx: Option<usize>| idx.and_then(|i| record.get(i)).map(String::as_str);

        let tomo_name = cell(Some(self.tomo_name)).unwrap_or("").to_string();
        if tomo_name.trim().is_empty() {
            return Err("empty tomo_name".to_string());
        }

        Ok(Entry {
            thickness: parse_thickness(cell(self.thickness).unwrap_or(""))?,
            notes: cell(self.notes)
                .filter(|n| !is_nan(n))
                .unwrap_or("")
                .to_string(),
            score: parse_score(cell(self.score).unwrap_or(""))?,
            delete: parse_bool(cell(self.delete).unwrap_or(""))?,
            double_confirmed: parse_bool(cell(self.double_confirmed).unwrap_or(""))?,
            tomo_name,
        })
    }
}

fn is_nan(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case("nan")
}

fn parse_thickness(raw: &str) -> std::result::Result<Option<f64>, String> {
    let raw = raw.trim();
    if raw.is_empty() || is_nan(raw) {
        return Ok(None);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(format!("invalid thickness {raw:?}")),
    }
}

fn parse_score(raw: &str) -> std::result::Result<Option<u8>, String> {
    let raw = raw.trim();
    if raw.is_empty() || is_nan(raw) {
        return Ok(None);
    }
    let value: f64 = raw.parse().map_err(|_| format!("invalid score {raw:?}"))?;
    if value.fract() != 0.0 || !(0.0..=f64::from(MAX_SCORE)).contains(&value) {
        return Err(format!("score must be an integer between 0 and {MAX_SCORE}, got {raw:?}"));
    }
    Ok(Some(value as u8))
}

fn parse_bool(raw: &str) -> std::result::Result<bool, String> {
    match raw.trim() {
        "" | "0" | "0.0" => Ok(false),
        "1" | "1.0" => Ok(true),
        s if s.eq_ignore_ascii_case("false") => Ok(false),
        s if s.eq_ignore_ascii_case("true") => Ok(true),
        s => Err(format!("invalid boolean {s:?}")),
    }
}
