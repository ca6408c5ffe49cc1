//! Delimited text decoding into header + row payloads.
//!
//! ### Format
//! - Comma separated, `"` quoted fields, `""` is a literal quote inside quotes
//! - Rows end with LF or CRLF; a trailing terminator does not add a row
//! - A leading UTF-8 BOM is ignored
//!
//! ### Shape
//! The first row is the header row, the rest are data rows. Rows shorter than
//! the widest row are padded with empty cells so the payload is rectangular.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DELIMITER: char = ',';
const QUOTE: char = '"';
const BOM: char = '\u{feff}';

/// Errors raised while decoding delimited text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TabularError {
    #[error("body is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("unterminated quoted field starting on line {line}")]
    UnterminatedQuote { line: usize },

    #[error("unexpected character {found:?} after closing quote on line {line}")]
    TrailingAfterQuote { line: usize, found: char },
}

/// One successfully retrieved table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePayload {
    /// Column labels from the first row.
    pub headers: Vec<String>,
    /// Data rows in origin order.
    pub rows: Vec<Vec<String>>,
    /// When the payload was retrieved.
    pub fetched_at: DateTime<Utc>,
}

impl TablePayload {
    /// Decode a response body into a payload stamped with the current time.
    pub fn from_bytes(body: &[u8]) -> Result<Self, TabularError> {
        let text = std::str::from_utf8(body).map_err(|e| TabularError::InvalidUtf8(e.to_string()))?;
        Self::from_text(text)
    }

    /// Decode delimited text. An empty body yields empty headers and rows.
    pub fn from_text(text: &str) -> Result<Self, TabularError> {
        let mut records = parse_records(text)?.into_iter();
        let headers = records.next().unwrap_or_default();
        let rows: Vec<Vec<String>> = records.collect();
        let (headers, rows) = normalize(headers, rows);

        Ok(Self { headers, rows, fetched_at: Utc::now() })
    }

    /// Number of data rows (headers excluded).
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has neither headers nor rows.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.rows.is_empty()
    }
}

/// Pad every row (headers included) to the widest row.
fn normalize(mut headers: Vec<String>, mut rows: Vec<Vec<String>>) -> (Vec<String>, Vec<Vec<String>>) {
    let width = rows.iter().map(Vec::len).chain(std::iter::once(headers.len())).max().unwrap_or(0);

    headers.resize(width, String::new());
    for row in &mut rows {
        row.resize(width, String::new());
    }

    (headers, rows)
}

/// Split delimited text into records of fields.
pub fn parse_records(text: &str) -> Result<Vec<Vec<String>>, TabularError> {
    let text = text.strip_prefix(BOM).unwrap_or(text);

    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut chars = text.chars().peekable();
    let mut line = 1;
    // Set once anything has been read for the current record.
    let mut dirty = false;

    while let Some(c) = chars.next() {
        match c {
            QUOTE if field.is_empty() => {
                let opened_on = line;
                dirty = true;
                loop {
                    match chars.next() {
                        Some(QUOTE) if chars.peek() == Some(&QUOTE) => {
                            chars.next();
                            field.push(QUOTE);
                        }
                        Some(QUOTE) => break,
                        Some(inner) => {
                            if inner == '\n' {
                                line += 1;
                            }
                            field.push(inner);
                        }
                        None => return Err(TabularError::UnterminatedQuote { line: opened_on }),
                    }
                }
                match chars.peek() {
                    None | Some(&DELIMITER) | Some(&'\n') | Some(&'\r') => {}
                    Some(&found) => return Err(TabularError::TrailingAfterQuote { line, found }),
                }
            }
            DELIMITER => {
                record.push(std::mem::take(&mut field));
                dirty = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
                dirty = false;
                line += 1;
            }
            other => {
                field.push(other);
                dirty = true;
            }
        }
    }

    if dirty {
        record.push(field);
        records.push(record);
    }

    Ok(records)
}
