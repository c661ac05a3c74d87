//! Layout C cross-sheet join.
//!
//! Device sheets carry their category key in the first column, written once
//! per block. The key is forward-filled and looked up in the quotation sheet,
//! which supplies site metadata for every row of the block.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::QuotationColumns;
use crate::locator::locate_open_ended;
use crate::schema::{CanonicalField, WorkingRow};
use crate::sheet_parser::RawSheet;

static BOM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bBOM\b").unwrap());
static PRICE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bprice\b").unwrap());

/// Sheets that are bills of material, or carry no price, hold no cost rows.
pub fn contains_bom_or_missing_price(headers: &[String]) -> bool {
    let contains_bom = headers.iter().any(|h| BOM_RE.is_match(h));
    let has_price = headers.iter().any(|h| PRICE_RE.is_match(h));
    contains_bom || !has_price
}

/// Forward-fill `column` over `rows`. Rows before the first non-blank value
/// get `None`.
pub fn forward_fill(rows: &[Vec<String>], column: usize) -> Vec<Option<String>> {
    let mut current: Option<String> = None;
    rows.iter()
        .map(|row| {
            if let Some(value) = row.get(column).map(|v| v.trim()).filter(|v| !v.is_empty()) {
                current = Some(value.to_string());
            }
            current.clone()
        })
        .collect()
}

/// First sheet whose name contains `keyword`, case-insensitively.
pub fn find_quotation_sheet<'a>(sheets: &'a [RawSheet], keyword: &str) -> Option<&'a RawSheet> {
    let keyword = keyword.to_lowercase();
    sheets.iter().find(|s| s.name.to_lowercase().contains(&keyword))
}

/// One quotation row, reduced to the join columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuotationRow {
    pub key: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub supplier: Option<String>,
    pub quote_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct QuotationTable {
    rows: Vec<QuotationRow>,
}

impl QuotationTable {
    /// Read the quotation sheet. `None` when it has no header or no key column.
    pub fn from_sheet(sheet: &RawSheet, columns: &QuotationColumns) -> Option<Self> {
        let region = locate_open_ended(sheet)?;
        let Some(key_col) = region.header.column_of(&columns.key) else {
            warn!(
                "Quotation sheet '{}' has no '{}' column, join skipped",
                sheet.name, columns.key
            );
            return None;
        };

        let country = region.header.column_of(&columns.country);
        let city = region.header.column_of(&columns.city);
        let supplier = region.header.column_of(&columns.supplier);
        let quote_id = region.header.column_of(&columns.quote_id);
        let cell = |row: &[String], col: Option<usize>| {
            col.and_then(|c| row.get(c)).map(|v| v.trim().to_string())
        };

        let rows: Vec<QuotationRow> = region
            .body_rows(sheet)
            .iter()
            .filter_map(|row| {
                let row = row.as_slice();
                let key = row.get(key_col)?.trim();
                (!key.is_empty()).then(|| QuotationRow {
                    key: key.to_string(),
                    country: cell(row, country),
                    city: cell(row, city),
                    supplier: cell(row, supplier),
                    quote_id: cell(row, quote_id),
                })
            })
            .collect();

        debug!("Quotation sheet '{}': {} keyed rows", sheet.name, rows.len());
        Some(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First quotation row whose key equals `key`.
    pub fn lookup(&self, key: &str) -> Option<&QuotationRow> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        self.rows.iter().find(|r| r.key == key)
    }

    /// Copy site metadata into `row` from the quotation row matching its key.
    /// Returns whether a match was found; without one the row is untouched.
    pub fn join(&self, row: &mut WorkingRow) -> bool {
        let Some(matched) = row.match_key.as_deref().and_then(|k| self.lookup(k)) else {
            return false;
        };

        let copies = [
            (CanonicalField::Country, &matched.country),
            (CanonicalField::City, &matched.city),
            (CanonicalField::Supplier, &matched.supplier),
            (CanonicalField::QuoteId, &matched.quote_id),
        ];
        for (field, value) in copies {
            if let Some(value) = value {
                row.set(field, value.clone());
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn quotation_sheet() -> RawSheet {
        RawSheet::new(
            "Quotation Summary",
            grid(&[
                &["BOM", "Country", "Address (TO BE DEPLOYED)", "Solution", "Customer Site ID/Name"],
                &["SD-WAN", "SG", "1 Fusionopolis Way, Singapore", "Velo", "SITE-001"],
                &["LAN", "FR", "Paris. Level 2", "Meraki", "SITE-002"],
                &["SD-WAN", "AU", "Sydney", "Other", "SITE-999"],
            ]),
        )
    }

    #[test]
    fn test_bom_or_missing_price() {
        let h = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        assert!(contains_bom_or_missing_price(&h(&["BOM", "Unit Price"])));
        assert!(contains_bom_or_missing_price(&h(&["Item", "Qty"])));
        assert!(!contains_bom_or_missing_price(&h(&["Item", "Unit Price"])));
        // "BOMs" and "Pricing" are not whole words
        assert!(!contains_bom_or_missing_price(&h(&["BOMs", "Price (USD)"])));
        assert!(contains_bom_or_missing_price(&h(&["Item", "Pricing"])));
    }

    #[test]
    fn test_forward_fill_first_column() {
        let rows = grid(&[&["", "x"], &["SD-WAN", "a"], &["", "b"], &[" LAN ", "c"], &["", "d"]]);
        assert_eq!(
            forward_fill(&rows, 0),
            vec![
                None,
                Some("SD-WAN".to_string()),
                Some("SD-WAN".to_string()),
                Some("LAN".to_string()),
                Some("LAN".to_string()),
            ]
        );
    }

    #[test]
    fn test_lookup_takes_first_match() {
        let table = QuotationTable::from_sheet(&quotation_sheet(), &QuotationColumns::default()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup("SD-WAN").unwrap().quote_id.as_deref(), Some("SITE-001"));
        assert!(table.lookup("").is_none());
        assert!(table.lookup("WAN").is_none());
    }

    #[test]
    fn test_join_copies_site_metadata() {
        let table = QuotationTable::from_sheet(&quotation_sheet(), &QuotationColumns::default()).unwrap();

        let mut row = WorkingRow::default();
        row.match_key = Some("LAN".to_string());
        row.set(CanonicalField::Supplier, "from device sheet");
        assert!(table.join(&mut row));
        assert_eq!(row.get(CanonicalField::Country), "FR");
        assert_eq!(row.get(CanonicalField::City), "Paris. Level 2");
        assert_eq!(row.get(CanonicalField::Supplier), "Meraki");
        assert_eq!(row.get(CanonicalField::QuoteId), "SITE-002");

        let mut unmatched = WorkingRow::default();
        unmatched.match_key = Some("Firewall".to_string());
        unmatched.set(CanonicalField::Country, "Japan");
        assert!(!table.join(&mut unmatched));
        assert_eq!(unmatched.get(CanonicalField::Country), "Japan");
    }

    #[test]
    fn test_quotation_without_key_column() {
        let sheet = RawSheet::new("Quotation", grid(&[&["Site", "Country"], &["A", "SG"]]));
        assert!(QuotationTable::from_sheet(&sheet, &QuotationColumns::default()).is_none());
    }

    #[test]
    fn test_find_quotation_sheet() {
        let sheets = vec![
            RawSheet::new("Terms", grid(&[&["a"]])),
            quotation_sheet(),
        ];
        assert_eq!(
            find_quotation_sheet(&sheets, "quotation").map(|s| s.name.as_str()),
            Some("Quotation Summary")
        );
    }
}
