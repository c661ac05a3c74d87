//! Workbook reading: CSV and Excel (.xlsx/.xlsm/.xlsb/.xls) into raw cell grids.
//!
//! No header is assumed and blank rows are kept; their position is what the
//! table locator works from.

use anyhow::{Context, Result};
use calamine::{open_workbook_from_rs, Data, Reader, Xls, Xlsb, Xlsx};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read, Seek};

/// One worksheet as loaded: a rectangular grid of trimmed-or-empty strings.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl RawSheet {
    /// Build a sheet, padding short rows with empty cells.
    pub fn new(name: impl Into<String>, mut rows: Vec<Vec<String>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, String::new());
        }
        Self {
            name: name.into(),
            rows,
        }
    }

    pub fn width(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|r| r.iter().all(|c| c.trim().is_empty()))
    }
}

/// An uploaded workbook.
#[derive(Debug, Clone)]
pub struct Workbook {
    pub source_file: String,
    pub content_hash: String,
    pub sheets: Vec<RawSheet>,
}

/// Parse uploaded bytes, dispatching on the file extension.
pub fn parse_workbook(filename: &str, data: &[u8]) -> Result<Workbook> {
    let sheets = parse_file(filename, data)?;
    let content_hash = {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    };
    Ok(Workbook {
        source_file: filename.to_string(),
        content_hash,
        sheets,
    })
}

/// Dispatch file parsing by extension.
pub fn parse_file(filename: &str, data: &[u8]) -> Result<Vec<RawSheet>> {
    let ext = filename
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "csv" => parse_csv(filename, data),
        "xlsx" | "xlsm" => {
            let workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(data))
                .context("Failed to open Excel workbook")?;
            read_sheets(workbook)
        }
        "xlsb" => {
            let workbook: Xlsb<_> = open_workbook_from_rs(Cursor::new(data))
                .context("Failed to open Excel workbook")?;
            read_sheets(workbook)
        }
        "xls" => {
            let workbook: Xls<_> = open_workbook_from_rs(Cursor::new(data))
                .context("Failed to open Excel workbook")?;
            read_sheets(workbook)
        }
        _ => anyhow::bail!(
            "Unsupported file type: .{}. Supported: .csv, .xlsx, .xlsm, .xlsb, .xls",
            ext
        ),
    }
}

/// Parse a CSV file into a single sheet named after the file.
fn parse_csv(filename: &str, data: &[u8]) -> Result<Vec<RawSheet>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_reader(data);

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to read CSV record")?;
        rows.push(record.iter().map(|f| f.trim().to_string()).collect());
    }

    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim_end_matches(".csv")
        .to_string();

    let sheet = RawSheet::new(name, rows);
    if sheet.is_empty() {
        anyhow::bail!("CSV file has no data");
    }
    Ok(vec![sheet])
}

/// Read every worksheet. Unreadable or empty sheets are skipped.
fn read_sheets<RS, R>(mut workbook: R) -> Result<Vec<RawSheet>>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: std::fmt::Display,
{
    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let mut sheets = Vec::new();

    for name in &sheet_names {
        let range = match workbook.worksheet_range(name) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Skipping sheet '{}': {}", name, e);
                continue;
            }
        };

        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect();
        let sheet = RawSheet::new(name.as_str(), rows);
        if sheet.is_empty() {
            tracing::debug!("Skipping empty sheet '{}'", name);
            continue;
        }
        sheets.push(sheet);
    }

    if sheets.is_empty() {
        anyhow::bail!("No sheets with data found in workbook");
    }

    Ok(sheets)
}

/// Convert a calamine cell to text. Dates render as `DD-Mon-YYYY`.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            // Avoid trailing ".0" for whole numbers
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64()),
        Data::DateTimeIso(s) => iso_to_date(s).unwrap_or_else(|| s.clone()),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERR:{:?}", e),
    }
}

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

fn format_date(year: i32, month: u32, day: u32) -> String {
    let month_name = MONTHS
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("Jan");
    format!("{:02}-{}-{:04}", day, month_name, year)
}

/// `2024-11-14` or `2024-11-14T09:30:00` → `14-Nov-2024`.
fn iso_to_date(s: &str) -> Option<String> {
    let date = s.split(['T', ' ']).next()?;
    let mut parts = date.splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(format_date(year, month, day))
}

/// Excel serial date → `DD-Mon-YYYY`; the time of day is dropped.
/// Excel epoch: 1899-12-30, counting the nonexistent 29-Feb-1900 as day 60.
fn excel_serial_to_date(serial: f64) -> String {
    let days = serial.floor() as i64;

    // Adjust for Excel's 1900 leap year bug (serial > 59 means after fake Feb 29, 1900)
    let adjusted_days = if days > 59 { days - 1 } else { days };
    let base = 25568i64; // adjusted days from the Excel epoch to 1970-01-01
    let mut remaining = (adjusted_days - base) as i32;
    let mut year = 1970i32;

    if remaining >= 0 {
        loop {
            let diy = if is_leap(year) { 366 } else { 365 };
            if remaining < diy {
                break;
            }
            remaining -= diy;
            year += 1;
        }
    } else {
        loop {
            year -= 1;
            let diy = if is_leap(year) { 366 } else { 365 };
            remaining += diy;
            if remaining >= 0 {
                break;
            }
        }
    }

    let dim: [i32; 12] = if is_leap(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 1u32;
    for d in dim {
        if remaining < d {
            break;
        }
        remaining -= d;
        month += 1;
    }

    format_date(year, month, (remaining + 1) as u32)
}

fn is_leap(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}
