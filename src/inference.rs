//! Layout B: whole-sheet inference.
//!
//! Layout B workbooks have no reliable table shape, so every relevant sheet is
//! flattened into one text blob and the oracle answers with the canonical
//! table directly, as quoted CSV.

use tracing::{debug, info, warn};

use crate::locator::is_blank_row;
use crate::oracle::{strip_code_fences, OracleRequest, SemanticOracle};
use crate::schema::{CanonicalField, IngestWarning, WorkingRow};
use crate::sheet_parser::RawSheet;

#[derive(Debug, thiserror::Error)]
pub enum CsvReplyError {
    #[error("malformed CSV reply: {0}")]
    Csv(#[from] csv::Error),
    #[error("reply header has no canonical column")]
    NoCanonicalColumns,
}

/// Whether a sheet name matches one of the excluded keywords (case-insensitive).
pub fn is_excluded_sheet(name: &str, keywords: &[String]) -> bool {
    let name = name.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .any(|k| !k.is_empty() && name.contains(&k))
}

/// Flatten sheets for the inference prompt: one `Sheet: "name"` line per
/// sheet, then its non-blank rows with cells joined by ` | `. A cell holding
/// just `x` is written as `0`.
pub fn sheet_blob(sheets: &[&RawSheet]) -> String {
    let mut parts = Vec::new();

    for sheet in sheets {
        let mut section = format!("Sheet: \"{}\"\n", sheet.name);
        for row in sheet.rows.iter().filter(|r| !is_blank_row(r)) {
            let cells: Vec<&str> = row
                .iter()
                .map(|c| match c.trim() {
                    "x" => "0",
                    other => other,
                })
                .collect();
            section.push_str(&cells.join(" | "));
            section.push('\n');
        }
        parts.push(section);
    }

    parts.join("\n")
}

/// Parse the oracle's CSV reply into working rows.
///
/// Columns are matched to canonical fields by title; unknown columns are
/// ignored. Fully blank records are skipped.
pub fn parse_csv_reply(reply: &str) -> Result<Vec<WorkingRow>, CsvReplyError> {
    let text = strip_code_fences(reply).replace("\r\n", "\n");
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let columns: Vec<Option<CanonicalField>> = reader
        .headers()?
        .iter()
        .map(CanonicalField::from_header)
        .collect();
    if columns.iter().all(Option::is_none) {
        return Err(CsvReplyError::NoCanonicalColumns);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = WorkingRow::default();
        for (value, field) in record.iter().zip(&columns) {
            if let Some(field) = field {
                if row.is_blank(*field) {
                    row.set(*field, value);
                }
            }
        }
        if CanonicalField::ALL.iter().all(|f| row.is_blank(*f)) {
            continue;
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Send the selected sheets to the oracle and parse its CSV reply. Never
/// fails: problems yield no rows and an `Error: …` warning.
pub async fn infer_rows(
    oracle: &dyn SemanticOracle,
    sheets: &[&RawSheet],
    warnings: &mut Vec<IngestWarning>,
) -> Vec<WorkingRow> {
    let blob = sheet_blob(sheets);
    debug!("Inference blob: {} sheets, {} chars", sheets.len(), blob.len());

    let request = OracleRequest::CsvInference {
        blob: &blob,
        fields: &CanonicalField::ALL,
    };

    let parsed = match oracle.complete(&request).await {
        Ok(reply) => parse_csv_reply(&reply).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    match parsed {
        Ok(rows) => {
            info!("Inference produced {} rows via {}", rows.len(), oracle.name());
            rows
        }
        Err(reason) => {
            warn!("Sheet inference failed: {}", reason);
            warnings.push(IngestWarning::CsvReply { reason });
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::testing::StubOracle;
    use crate::oracle::OracleError;

    fn sheet(name: &str, rows: &[&[&str]]) -> RawSheet {
        RawSheet::new(
            name,
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_excluded_sheet_names() {
        let keywords: Vec<String> = ["terms", "sow", "bom"].iter().map(|s| s.to_string()).collect();
        assert!(is_excluded_sheet("Terms & Conditions", &keywords));
        assert!(is_excluded_sheet("Hardware BOM", &keywords));
        assert!(!is_excluded_sheet("Pricing", &keywords));
    }

    #[test]
    fn test_sheet_blob_replaces_x_and_drops_blank_rows() {
        let s = sheet(
            "Pricing",
            &[&["Service", "Included", "Price"], &["", "", ""], &["Install", "x", "$100"]],
        );
        let blob = sheet_blob(&[&s]);
        assert_eq!(blob, "Sheet: \"Pricing\"\nService | Included | Price\nInstall | 0 | $100\n");
    }

    #[test]
    fn test_parse_csv_reply() {
        let reply = "```csv\r\n\"Date\",\"Item\",\"Description\",\"Currency\",\"Total Cost\",\"QTY\",\"Hours\",\"Notes\"\r\n\
                     \"28-Dec-2024\",\"Support\",\"Holidays\",\"USD\",\"1558.5\",\"4\",\"8x5xNBD\",\"ignored\"\r\n\
                     \"\",\"\",\"\",\"\",\"\",\"\",\"\",\"\"\r\n```";
        let rows = parse_csv_reply(reply).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(CanonicalField::Item), "Support");
        assert_eq!(rows[0].get(CanonicalField::TotalCost), "1558.5");
        assert_eq!(rows[0].get(CanonicalField::Hours), "8x5xNBD");
    }

    #[test]
    fn test_parse_csv_reply_rejects_prose() {
        assert!(matches!(
            parse_csv_reply("I could not find any services in this data."),
            Err(CsvReplyError::NoCanonicalColumns)
        ));
    }

    #[tokio::test]
    async fn test_infer_rows_transport_failure() {
        let oracle = StubOracle::new(|_| Err(OracleError::Transport("timeout".to_string())));
        let s = sheet("Pricing", &[&["Service", "Price"], &["Install", "100"]]);
        let mut warnings = Vec::new();
        let rows = infer_rows(&oracle, &[&s], &mut warnings).await;
        assert!(rows.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].to_string().starts_with("Error: "));
    }

    #[test]
    fn test_csv_error_warning_has_single_prefix() {
        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "stream did not contain valid UTF-8");
        let error = CsvReplyError::from(csv::Error::from(io));
        let warning = IngestWarning::CsvReply {
            reason: error.to_string(),
        };
        let text = warning.to_string();
        assert!(text.starts_with("Error: malformed CSV reply: "));
        assert_eq!(text.matches("Error").count(), 1);
    }
}
