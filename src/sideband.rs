//! Metadata living outside the table body (quote headers, footers, letterheads).
//!
//! Rows before the header, rows after the table end and the header row itself
//! are serialized to CSV and handed to the oracle, which may only fill the
//! sideband fields. Whatever it finds applies to every table row.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::locator::{is_blank_row, TableRegion};
use crate::mapper::parse_mapping_literal;
use crate::oracle::{OracleRequest, SemanticOracle};
use crate::schema::{CanonicalField, IngestWarning, WorkingRow};
use crate::sheet_parser::RawSheet;

/// Supplier context passed to the oracle.
#[derive(Debug, Clone, Copy)]
pub struct SupplierHints<'a> {
    pub candidates: &'a [String],
    pub own_aliases: &'a [String],
}

/// Sideband field values found outside the table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SidebandValues {
    values: BTreeMap<CanonicalField, String>,
}

impl SidebandValues {
    #[cfg(test)]
    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Write every found value into every row, replacing the table value.
    pub fn apply(&self, rows: &mut [WorkingRow]) {
        for row in rows.iter_mut() {
            for (field, value) in &self.values {
                row.set(*field, value.clone());
            }
        }
    }
}

/// Rows outside the table: before the header, after the end, then the header.
pub fn outside_rows<'s>(sheet: &'s RawSheet, region: &TableRegion) -> Vec<&'s [String]> {
    let header = region.header.index;
    let after = *region.body.end() + 1;

    sheet.rows[..header.min(sheet.rows.len())]
        .iter()
        .chain(sheet.rows.iter().skip(after.max(header + 1)))
        .chain(sheet.rows.get(header))
        .map(Vec::as_slice)
        .collect()
}

/// Serialize rows to CSV with a leading row number, skipping blank rows.
pub fn serialize_rows(rows: &[&[String]]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    for (index, row) in rows.iter().enumerate().filter(|(_, r)| !is_blank_row(r)) {
        let mut record = vec![index.to_string()];
        record.extend(row.iter().map(|c| c.trim().to_string()));
        writer.write_record(&record).context("Failed to write sideband row")?;
    }
    let bytes = writer.into_inner().context("Failed to flush sideband CSV")?;
    String::from_utf8(bytes).context("Sideband CSV is not UTF-8")
}

/// Validate a sideband reply. Only sideband fields survive; a supplier that
/// names the operating organization is discarded with a warning.
pub fn resolve_sideband(
    reply: &str,
    own_aliases: &[String],
    warnings: &mut Vec<IngestWarning>,
) -> Result<SidebandValues, crate::mapper::MappingParseError> {
    let parsed = parse_mapping_literal(reply, &CanonicalField::SIDEBAND)?;
    let mut values = BTreeMap::new();

    for (field, value) in parsed {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if field == CanonicalField::Supplier && is_own_organization(value, own_aliases) {
            warn!("Discarding supplier '{}': operating organization", value);
            warnings.push(IngestWarning::SupplierDiscarded {
                value: value.to_string(),
            });
            continue;
        }
        values.insert(field, value.to_string());
    }

    Ok(SidebandValues { values })
}

fn is_own_organization(value: &str, own_aliases: &[String]) -> bool {
    let value = value.to_lowercase();
    own_aliases
        .iter()
        .map(|a| a.trim().to_lowercase())
        .any(|alias| !alias.is_empty() && value.contains(&alias))
}

/// Extract sideband values for one sheet. Never fails: problems yield empty
/// values and a warning.
pub async fn extract_sideband(
    oracle: &dyn SemanticOracle,
    hints: SupplierHints<'_>,
    sheet: &RawSheet,
    region: &TableRegion,
    warnings: &mut Vec<IngestWarning>,
) -> SidebandValues {
    let rows = outside_rows(sheet, region);
    let blob = match serialize_rows(&rows) {
        Ok(blob) => blob,
        Err(e) => {
            warnings.push(IngestWarning::Sideband {
                sheet: sheet.name.clone(),
                reason: format!("{:#}", e),
            });
            return SidebandValues::default();
        }
    };
    debug!("Sheet '{}': {} sideband rows, {} chars", sheet.name, rows.len(), blob.len());

    let request = OracleRequest::Sideband {
        blob: &blob,
        fields: &CanonicalField::SIDEBAND,
        suppliers: hints.candidates,
        excluded_suppliers: hints.own_aliases,
    };

    let parsed = match oracle.complete(&request).await {
        Ok(reply) => resolve_sideband(&reply, hints.own_aliases, warnings)
            .map_err(|e| format!("Error converting sideband mapping: {}", e)),
        Err(e) => Err(e.to_string()),
    };

    match parsed {
        Ok(values) if values.is_empty() => {
            debug!("Sheet '{}': no sideband values found", sheet.name);
            values
        }
        Ok(values) => {
            info!("Sheet '{}': {} sideband value(s) found", sheet.name, values.values.len());
            values
        }
        Err(reason) => {
            warn!("Sideband extraction for sheet '{}' failed: {}", sheet.name, reason);
            warnings.push(IngestWarning::Sideband {
                sheet: sheet.name.clone(),
                reason,
            });
            SidebandValues::default()
        }
    }
}
