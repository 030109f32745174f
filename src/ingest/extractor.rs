//! Row extraction from statement workbooks.

use std::io::Cursor;

use calamine::{Data, DataType, Range, Reader, Xlsx};
use tracing::debug;

use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::models::TIMESTAMP_FORMAT;

/// One spreadsheet line rendered as text cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based row number in the worksheet
    pub line: usize,

    /// Cell text, trailing empty cells trimmed
    pub cells: Vec<String>,
}

impl RawRow {
    pub fn new(line: usize, cells: Vec<String>) -> Self {
        Self { line, cells }
    }

    /// Trimmed text of a cell, or "" when the row is too short.
    pub fn cell(&self, index: usize) -> &str {
        self.cells.get(index).map(|c| c.trim()).unwrap_or("")
    }
}

/// Lazy iterator over the data rows of one worksheet, after the header region.
pub struct RawRows {
    range: Range<Data>,
    next_row: usize,
}

impl RawRows {
    /// Open a workbook from raw bytes and select the configured worksheet.
    pub fn from_bytes(bytes: &[u8], config: &ImportConfig) -> Result<Self, ImportError> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
            .map_err(|e| ImportError::Format(format!("unreadable workbook: {}", e)))?;

        let sheet_count = workbook.sheet_names().len();
        let range = select_sheet(
            workbook.worksheet_range_at(config.sheet_index),
            config.sheet_index,
            sheet_count,
        )?;

        debug!(
            sheet = config.sheet_index,
            rows = range.height(),
            columns = range.width(),
            "Opened statement worksheet"
        );

        Ok(Self::from_range(range, config.header_rows))
    }

    /// Iterate an already loaded worksheet range, skipping the first
    /// `header_rows` rows of the sheet.
    pub fn from_range(range: Range<Data>, header_rows: usize) -> Self {
        // The range begins at the first used row, not at sheet row 1.
        let start_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
        Self {
            range,
            next_row: header_rows.saturating_sub(start_row),
        }
    }

    fn render_row(&self, row: usize) -> RawRow {
        let (start_row, start_col) = self.range.start().unwrap_or((0, 0));
        let mut cells: Vec<String> = (0..self.range.width())
            .map(|col| {
                self.range
                    .get((row, col))
                    .map(render_cell)
                    .unwrap_or_default()
            })
            .collect();

        // Ranges start at the first used cell; re-anchor to column A.
        if start_col > 0 {
            let mut padded = vec![String::new(); start_col as usize];
            padded.append(&mut cells);
            cells = padded;
        }

        while cells.last().is_some_and(|c| c.trim().is_empty()) {
            cells.pop();
        }

        RawRow::new(start_row as usize + row + 1, cells)
    }
}

impl Iterator for RawRows {
    type Item = RawRow;

    fn next(&mut self) -> Option<RawRow> {
        if self.next_row >= self.range.height() {
            return None;
        }
        let row = self.render_row(self.next_row);
        self.next_row += 1;
        Some(row)
    }
}

/// Resolve the worksheet lookup into a non-empty range.
fn select_sheet<E: std::fmt::Display>(
    found: Option<Result<Range<Data>, E>>,
    index: usize,
    sheet_count: usize,
) -> Result<Range<Data>, ImportError> {
    let range = found
        .ok_or_else(|| {
            ImportError::Format(format!(
                "no worksheet at index {} (workbook has {})",
                index, sheet_count
            ))
        })?
        .map_err(|e| ImportError::Format(format!("failed to read worksheet: {}", e)))?;

    if range.is_empty() {
        return Err(ImportError::Format(format!(
            "worksheet at index {} is empty",
            index
        )));
    }

    Ok(range)
}

fn render_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::DateTime(_) => cell
            .as_datetime()
            .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_else(|| cell.to_string()),
        other => other.to_string(),
    }
}
