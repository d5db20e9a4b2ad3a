//! A1-notation range descriptors
//!
//! Accepts `Sheet1!A1:D10`, `'My Sheet'!B2:C5`, `A1:D10`, single cells
//! (`C3`) and whole-column spans (`Sheet1!A:D`, unbounded rows).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Parsed range, keeping the text it was parsed from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RangeDescriptor {
    raw: String,
    sheet: Option<String>,
    /// 1-based, inclusive
    start_col: u32,
    start_row: Option<u32>,
    end_col: u32,
    end_row: Option<u32>,
}

/// Range text that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("Empty range")]
    Empty,

    #[error("Invalid cell reference: {0}")]
    InvalidCell(String),

    #[error("Unterminated sheet name quote in: {0}")]
    UnterminatedQuote(String),

    #[error("Range end precedes start: {0}")]
    Inverted(String),
}

impl RangeDescriptor {
    pub fn parse(text: &str) -> Result<Self, RangeError> {
        text.parse()
    }

    /// Sheet (tab) name, if the range names one
    pub fn sheet(&self) -> Option<&str> {
        self.sheet.as_deref()
    }

    /// The range as given, suitable for an API path segment after encoding
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Maximum number of columns a snapshot of this range can hold
    pub fn max_columns(&self) -> usize {
        (self.end_col - self.start_col + 1) as usize
    }

    /// Maximum number of rows, or `None` for whole-column ranges
    pub fn max_rows(&self) -> Option<usize> {
        match (self.start_row, self.end_row) {
            (Some(start), Some(end)) => Some((end - start + 1) as usize),
            _ => None,
        }
    }

    /// Whether a grid of the given shape fits inside the range
    pub fn fits(&self, rows: usize, columns: usize) -> bool {
        columns <= self.max_columns() && self.max_rows().map_or(true, |max| rows <= max)
    }
}

/// Column letters (`A`, `Z`, `AA`) to a 1-based index
fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    letters.chars().try_fold(0u32, |acc, c| {
        let c = c.to_ascii_uppercase();
        c.is_ascii_uppercase()
            .then(|| acc * 26 + (c as u32 - 'A' as u32 + 1))
    })
}

/// Split `B12` into column 2 and row 12; a bare `B` has no row
fn parse_cell(cell: &str) -> Result<(u32, Option<u32>), RangeError> {
    let invalid = || RangeError::InvalidCell(cell.to_string());
    let split = cell
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(cell.len());
    let (letters, digits) = cell.split_at(split);

    let col = column_index(letters).ok_or_else(invalid)?;
    let row = if digits.is_empty() {
        None
    } else {
        let row: u32 = digits.parse().map_err(|_| invalid())?;
        if row == 0 {
            return Err(invalid());
        }
        Some(row)
    };
    Ok((col, row))
}

/// Split off an optional `Sheet!` or `'Quoted Sheet'!` prefix
fn split_sheet(text: &str) -> Result<(Option<String>, &str), RangeError> {
    if let Some(rest) = text.strip_prefix('\'') {
        let close = rest
            .find("'!")
            .ok_or_else(|| RangeError::UnterminatedQuote(text.to_string()))?;
        let name = rest[..close].replace("''", "'");
        return Ok((Some(name), &rest[close + 2..]));
    }

    match text.rsplit_once('!') {
        Some((sheet, cells)) if !sheet.is_empty() => Ok((Some(sheet.to_string()), cells)),
        Some(_) => Err(RangeError::InvalidCell(text.to_string())),
        None => Ok((None, text)),
    }
}

impl FromStr for RangeDescriptor {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(RangeError::Empty);
        }

        let (sheet, cells) = split_sheet(raw)?;
        let (start, end) = cells.split_once(':').unwrap_or((cells, cells));
        let (start_col, start_row) = parse_cell(start)?;
        let (end_col, end_row) = parse_cell(end)?;

        // Either both corners carry rows or neither does
        if start_row.is_some() != end_row.is_some() {
            return Err(RangeError::InvalidCell(cells.to_string()));
        }
        if end_col < start_col || end_row < start_row {
            return Err(RangeError::Inverted(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            sheet,
            start_col,
            start_row,
            end_col,
            end_row,
        })
    }
}

impl fmt::Display for RangeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<RangeDescriptor> for String {
    fn from(range: RangeDescriptor) -> Self {
        range.raw
    }
}

impl TryFrom<String> for RangeDescriptor {
    type Error = RangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
