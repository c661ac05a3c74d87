//! Table location inside an unlabelled sheet grid.
//!
//! The header is the densest row; the table ends just before the first run of
//! fully blank rows reaching the threshold.

use crate::sheet_parser::RawSheet;
use std::ops::RangeInclusive;

/// Blank rows in a row that close a table.
pub const DEFAULT_BLANK_RUN: usize = 2;

/// The detected header row. Cells keep their column position.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderRow {
    pub index: usize,
    pub cells: Vec<(usize, String)>,
}

impl HeaderRow {
    /// Non-blank header values in column order.
    pub fn values(&self) -> Vec<String> {
        self.cells.iter().map(|(_, v)| v.clone()).collect()
    }

    /// Column of the first header cell equal to `name` (trimmed, then case-insensitive).
    pub fn column_of(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.cells
            .iter()
            .find(|(_, v)| v.trim() == name)
            .or_else(|| self.cells.iter().find(|(_, v)| v.trim().eq_ignore_ascii_case(name)))
            .map(|(col, _)| *col)
    }
}

/// A located table: header plus inclusive body row range.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRegion {
    pub header: HeaderRow,
    pub body: RangeInclusive<usize>,
}

impl TableRegion {
    /// Body rows; empty when the header is the last row.
    pub fn body_rows<'s>(&self, sheet: &'s RawSheet) -> &'s [Vec<String>] {
        let start = *self.body.start();
        let end = (*self.body.end() + 1).min(sheet.rows.len());
        if start >= end {
            &[]
        } else {
            &sheet.rows[start..end]
        }
    }
}

pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

fn non_blank_count(row: &[String]) -> usize {
    row.iter().filter(|c| !c.trim().is_empty()).count()
}

fn header_at(sheet: &RawSheet, index: usize) -> HeaderRow {
    let cells = sheet.rows[index]
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.trim().is_empty())
        .map(|(col, c)| (col, c.trim().to_string()))
        .collect();
    HeaderRow { index, cells }
}

/// Row with the most non-blank cells; the earliest row wins ties.
/// `None` only for a sheet with no rows.
pub fn header(sheet: &RawSheet) -> Option<HeaderRow> {
    let mut best: Option<(usize, usize)> = None;
    for (index, row) in sheet.rows.iter().enumerate() {
        let count = non_blank_count(row);
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((index, count)),
        }
    }
    best.map(|(index, _)| header_at(sheet, index))
}

/// Last table row (inclusive). Scans from the header; at the `threshold`-th
/// consecutive blank row the table ends just before the run started. Without
/// such a run the table reaches the last row.
pub fn end_of_table(sheet: &RawSheet, header_index: usize, threshold: usize) -> usize {
    let last = sheet.rows.len().saturating_sub(1);
    let threshold = threshold.max(1);
    let mut blank_run = 0usize;

    for (index, row) in sheet.rows.iter().enumerate().skip(header_index) {
        if is_blank_row(row) {
            blank_run += 1;
            if blank_run >= threshold {
                let run_start = index + 1 - threshold;
                return run_start.saturating_sub(1);
            }
        } else {
            blank_run = 0;
        }
    }

    last
}

/// Whether the first row already is a header: more than `threshold` of the
/// sheet's columns carry a value.
pub fn leading_header(sheet: &RawSheet, threshold: f64) -> Option<HeaderRow> {
    let first = sheet.rows.first()?;
    let width = sheet.width();
    if width == 0 {
        return None;
    }
    let named = non_blank_count(first) as f64;
    (named / width as f64 > threshold).then(|| header_at(sheet, 0))
}

/// Header by density plus the blank-run end of table.
pub fn locate_bounded(sheet: &RawSheet, threshold: usize) -> Option<TableRegion> {
    let header = header(sheet)?;
    let end = end_of_table(sheet, header.index, threshold);
    Some(TableRegion {
        body: header.index + 1..=end,
        header,
    })
}

/// Leading header if present, else density header; body runs to the last row.
pub fn locate_open_ended(sheet: &RawSheet) -> Option<TableRegion> {
    let header = leading_header(sheet, 0.5).or_else(|| header(sheet))?;
    let end = sheet.rows.len().saturating_sub(1);
    Some(TableRegion {
        body: header.index + 1..=end,
        header,
    })
}
