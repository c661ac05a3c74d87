//! Column mapping: raw sheet headers → canonical fields.
//!
//! The oracle proposes a mapping literal; the parser accepts it only if it is
//! a JSON object of canonical field → string. A failed call or a rejected
//! literal leaves the whole mapping empty and is reported as a warning.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::locator::{is_blank_row, TableRegion};
use crate::oracle::{strip_code_fences, OracleRequest, SemanticOracle};
use crate::schema::{CanonicalField, IngestWarning, MappingResult, WorkingRow};
use crate::sheet_parser::RawSheet;

#[derive(Debug, thiserror::Error)]
pub enum MappingParseError {
    #[error("invalid JSON syntax: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("reply is a JSON {0}, not a mapping")]
    NotAMapping(&'static str),
    #[error("value for '{0}' is not a string")]
    NonStringValue(String),
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Parse a mapping literal restricted to `allowed` fields.
///
/// Unknown keys are dropped. `null` reads as empty; numbers are accepted as
/// their text.
pub fn parse_mapping_literal(
    reply: &str,
    allowed: &[CanonicalField],
) -> Result<BTreeMap<CanonicalField, String>, MappingParseError> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fences(reply))?;
    let entries = match value {
        serde_json::Value::Object(entries) => entries,
        other => return Err(MappingParseError::NotAMapping(json_kind(&other))),
    };

    let mut parsed = BTreeMap::new();
    for (key, value) in entries {
        let Some(field) = CanonicalField::from_header(&key).filter(|f| allowed.contains(f)) else {
            debug!("Dropping unrequested mapping key '{}'", key);
            continue;
        };
        let text = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return Err(MappingParseError::NonStringValue(key)),
        };
        parsed.entry(field).or_insert(text);
    }

    Ok(parsed)
}

/// Validate an oracle reply against the sheet's headers.
///
/// Values that are not one of `headers` are dropped. Fields the oracle left
/// empty fall back to a header spelled like the canonical title.
pub fn resolve_mapping(reply: &str, headers: &[String]) -> Result<MappingResult, MappingParseError> {
    let parsed = parse_mapping_literal(reply, &CanonicalField::ALL)?;
    let mut mapping = MappingResult::empty();

    for (field, proposed) in parsed {
        let proposed = proposed.trim();
        if proposed.is_empty() {
            continue;
        }
        match find_header(headers, proposed) {
            Some(header) => mapping.set(field, header),
            None => debug!("Dropping {} -> '{}': not a sheet header", field, proposed),
        }
    }

    for field in CanonicalField::ALL {
        if !mapping.get(field).is_empty() {
            continue;
        }
        if let Some(header) = find_header(headers, field.header()) {
            debug!("Direct header match for {}", field);
            mapping.set(field, header);
        }
    }

    Ok(mapping)
}

fn find_header(headers: &[String], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| h.trim() == name)
        .or_else(|| headers.iter().find(|h| h.trim().eq_ignore_ascii_case(name)))
        .map(|h| h.trim().to_string())
}

/// Ask the oracle for a mapping and validate it. Never fails: problems leave
/// the mapping empty and add a warning.
pub async fn map_columns(
    oracle: &dyn SemanticOracle,
    sheet: &str,
    headers: &[String],
    sample_row: &str,
    warnings: &mut Vec<IngestWarning>,
) -> MappingResult {
    let request = OracleRequest::ColumnMapping {
        headers,
        fields: &CanonicalField::ALL,
        sample_row,
    };

    let reply = match oracle.complete(&request).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!("Column mapping for sheet '{}' failed: {}", sheet, e);
            warnings.push(IngestWarning::ColumnMapping {
                sheet: sheet.to_string(),
                reason: e.to_string(),
            });
            return MappingResult::empty();
        }
    };

    match resolve_mapping(&reply, headers) {
        Ok(mapping) => {
            info!(
                "Sheet '{}': mapped {} of {} canonical columns via {}",
                sheet,
                mapping.mapped().count(),
                CanonicalField::COUNT,
                oracle.name()
            );
            mapping
        }
        Err(e) => {
            warn!("Error converting mapping for sheet '{}': {}", sheet, e);
            warnings.push(IngestWarning::ColumnMapping {
                sheet: sheet.to_string(),
                reason: e.to_string(),
            });
            MappingResult::empty()
        }
    }
}

/// First non-blank body row, cells joined for the prompt.
pub fn sample_row(sheet: &RawSheet, region: &TableRegion) -> String {
    region
        .body_rows(sheet)
        .iter()
        .find(|row| !is_blank_row(row))
        .map(|row| row.join(" | "))
        .unwrap_or_default()
}

/// Project one table row onto the canonical fields.
pub fn project_row(mapping: &MappingResult, region: &TableRegion, row: &[String]) -> WorkingRow {
    let mut working = WorkingRow::default();
    for (field, header) in mapping.mapped() {
        if let Some(col) = region.header.column_of(header) {
            let value = row.get(col).map(|v| v.trim()).unwrap_or("");
            working.set(field, value);
        }
    }
    working
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::locate_bounded;
    use crate::oracle::testing::StubOracle;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_parse_rejects_non_mapping() {
        assert!(matches!(
            parse_mapping_literal("[\"Item\"]", &CanonicalField::ALL),
            Err(MappingParseError::NotAMapping("array"))
        ));
        assert!(matches!(
            parse_mapping_literal("Sure! Here is the mapping", &CanonicalField::ALL),
            Err(MappingParseError::Syntax(_))
        ));
        assert!(matches!(
            parse_mapping_literal(r#"{"Item": ["a"]}"#, &CanonicalField::ALL),
            Err(MappingParseError::NonStringValue(_))
        ));
    }

    #[test]
    fn test_parse_drops_unrequested_keys() {
        let parsed = parse_mapping_literal(
            r#"{"Item": "Product", "Vendor Rating": "Stars", "Quote #": null}"#,
            &CanonicalField::ALL,
        )
        .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[&CanonicalField::Item], "Product");
        assert_eq!(parsed[&CanonicalField::QuoteId], "");
    }

    #[test]
    fn test_resolve_drops_invented_headers_and_fills_direct_matches() {
        let sheet_headers = headers(&["Product", "Description", "Qty", "Total"]);
        let mapping = resolve_mapping(
            r#"{"Item": "Product", "Total Cost": "Total", "Currency": "Currency Code", "QTY": ""}"#,
            &sheet_headers,
        )
        .unwrap();
        assert_eq!(mapping.get(CanonicalField::Item), "Product");
        assert_eq!(mapping.get(CanonicalField::TotalCost), "Total");
        assert_eq!(mapping.get(CanonicalField::Currency), "");
        assert_eq!(mapping.get(CanonicalField::Description), "Description");
        assert_eq!(mapping.get(CanonicalField::Quantity), "Qty");
    }

    #[tokio::test]
    async fn test_unparsable_reply_yields_empty_mapping() {
        let oracle = StubOracle::replying("{'Item': 'Product',");
        let mut warnings = Vec::new();
        let mapping = map_columns(
            &oracle,
            "Pricing",
            &headers(&["Item", "Product"]),
            "Router | Cisco",
            &mut warnings,
        )
        .await;
        assert!(mapping.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(matches!(&warnings[0], IngestWarning::ColumnMapping { sheet, .. } if sheet == "Pricing"));
    }

    #[tokio::test]
    async fn test_fenced_reply_is_accepted() {
        let oracle = StubOracle::replying("```json\n{\"Item\": \"Product\"}\n```");
        let mut warnings = Vec::new();
        let mapping = map_columns(&oracle, "S", &headers(&["Product"]), "", &mut warnings).await;
        assert_eq!(mapping.get(CanonicalField::Item), "Product");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_project_row_uses_header_columns() {
        let sheet = RawSheet::new(
            "S",
            vec![
                headers(&["", "Product", "", "Total"]),
                headers(&["", " Router ", "", "200"]),
            ],
        );
        let region = locate_bounded(&sheet, 2).unwrap();
        let mut mapping = MappingResult::empty();
        mapping.set(CanonicalField::Item, "Product");
        mapping.set(CanonicalField::TotalCost, "Total");

        assert_eq!(sample_row(&sheet, &region), " |  Router  |  | 200");
        let row = project_row(&mapping, &region, &sheet.rows[1]);
        assert_eq!(row.get(CanonicalField::Item), "Router");
        assert_eq!(row.get(CanonicalField::TotalCost), "200");
        assert_eq!(row.get(CanonicalField::Description), "");
    }
}
