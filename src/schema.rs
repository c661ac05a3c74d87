//! Canonical procurement schema and the ingest report returned to callers.
//!
//! Every source layout converges on [`CanonicalRecord`]. Between mapping and
//! normalization rows travel as [`WorkingRow`], a loosely-typed row keyed by
//! [`CanonicalField`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::pipeline::Layout;

/// One column of the canonical schema, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CanonicalField {
    Date,
    Item,
    Description,
    Country,
    City,
    Supplier,
    #[serde(rename = "Quote #")]
    QuoteId,
    Currency,
    #[serde(rename = "Total Cost")]
    TotalCost,
    #[serde(rename = "QTY")]
    Quantity,
    Hours,
    #[serde(rename = "Unit Cost")]
    UnitCost,
    #[serde(rename = "Unit Cost (USD)")]
    UnitCostUsd,
}

impl CanonicalField {
    pub const COUNT: usize = 13;

    pub const ALL: [CanonicalField; Self::COUNT] = [
        CanonicalField::Date,
        CanonicalField::Item,
        CanonicalField::Description,
        CanonicalField::Country,
        CanonicalField::City,
        CanonicalField::Supplier,
        CanonicalField::QuoteId,
        CanonicalField::Currency,
        CanonicalField::TotalCost,
        CanonicalField::Quantity,
        CanonicalField::Hours,
        CanonicalField::UnitCost,
        CanonicalField::UnitCostUsd,
    ];

    /// Metadata fields that may live outside the table body.
    pub const SIDEBAND: [CanonicalField; 6] = [
        CanonicalField::Date,
        CanonicalField::Country,
        CanonicalField::City,
        CanonicalField::Supplier,
        CanonicalField::QuoteId,
        CanonicalField::Currency,
    ];

    /// The exact column title used in prompts and CSV replies.
    pub fn header(self) -> &'static str {
        match self {
            CanonicalField::Date => "Date",
            CanonicalField::Item => "Item",
            CanonicalField::Description => "Description",
            CanonicalField::Country => "Country",
            CanonicalField::City => "City",
            CanonicalField::Supplier => "Supplier",
            CanonicalField::QuoteId => "Quote #",
            CanonicalField::Currency => "Currency",
            CanonicalField::TotalCost => "Total Cost",
            CanonicalField::Quantity => "QTY",
            CanonicalField::Hours => "Hours",
            CanonicalField::UnitCost => "Unit Cost",
            CanonicalField::UnitCostUsd => "Unit Cost (USD)",
        }
    }

    /// Case-insensitive lookup by column title.
    pub fn from_header(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.header().eq_ignore_ascii_case(name))
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

/// Canonical field → source header name (empty when unmapped).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingResult {
    headers: [String; CanonicalField::COUNT],
}

impl MappingResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, field: CanonicalField) -> &str {
        &self.headers[field.index()]
    }

    pub fn set(&mut self, field: CanonicalField, header: impl Into<String>) {
        self.headers[field.index()] = header.into();
    }

    /// True when no canonical field is mapped.
    pub fn is_empty(&self) -> bool {
        self.headers.iter().all(|h| h.is_empty())
    }

    /// Mapped (field, header) pairs in canonical order.
    pub fn mapped(&self) -> impl Iterator<Item = (CanonicalField, &str)> + '_ {
        CanonicalField::ALL
            .iter()
            .map(move |&f| (f, self.get(f)))
            .filter(|(_, h)| !h.is_empty())
    }
}

/// Row between mapping and normalization.
///
/// Text cells are keyed by canonical field; numeric fields are filled in by
/// the normalizer's coercion stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingRow {
    cells: [String; CanonicalField::COUNT],
    pub match_key: Option<String>,
    pub total_cost: Option<f64>,
    pub quantity: Option<f64>,
    pub hours: Option<f64>,
    pub unit_cost: Option<f64>,
    pub unit_cost_usd: Option<f64>,
}

impl WorkingRow {
    pub fn get(&self, field: CanonicalField) -> &str {
        &self.cells[field.index()]
    }

    pub fn set(&mut self, field: CanonicalField, value: impl Into<String>) {
        self.cells[field.index()] = value.into();
    }

    pub fn is_blank(&self, field: CanonicalField) -> bool {
        self.get(field).trim().is_empty()
    }

    /// Finalize into a record. Rows without a non-zero total cost, or with
    /// neither item nor description, never become records.
    pub fn into_record(self) -> Option<CanonicalRecord> {
        let total_cost = self.total_cost.filter(|c| *c != 0.0)?;
        if self.is_blank(CanonicalField::Item) && self.is_blank(CanonicalField::Description) {
            return None;
        }

        let text = |field: CanonicalField| self.get(field).trim().to_string();
        let optional = |field: CanonicalField| {
            let value = self.get(field).trim();
            (!value.is_empty()).then(|| value.to_string())
        };

        Some(CanonicalRecord {
            date: optional(CanonicalField::Date),
            item: text(CanonicalField::Item),
            description: text(CanonicalField::Description),
            country: optional(CanonicalField::Country),
            city: optional(CanonicalField::City),
            supplier: optional(CanonicalField::Supplier),
            quote_id: optional(CanonicalField::QuoteId),
            currency: text(CanonicalField::Currency),
            total_cost,
            quantity: self.quantity,
            hours: self.hours,
            unit_cost: self.unit_cost,
            unit_cost_usd: self.unit_cost_usd,
        })
    }
}

/// The pipeline's only externally visible output row.
///
/// Field order matches the 13 storage columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub date: Option<String>,
    pub item: String,
    pub description: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub supplier: Option<String>,
    pub quote_id: Option<String>,
    pub currency: String,
    pub total_cost: f64,
    pub quantity: Option<f64>,
    pub hours: Option<f64>,
    pub unit_cost: Option<f64>,
    pub unit_cost_usd: Option<f64>,
}

/// A failure the pipeline recovered from locally.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestWarning {
    #[error("sheet '{sheet}': column mapping unavailable: {reason}")]
    ColumnMapping { sheet: String, reason: String },
    #[error("sheet '{sheet}': sideband metadata unavailable: {reason}")]
    Sideband { sheet: String, reason: String },
    #[error("sheet '{sheet}' skipped: {reason}")]
    SheetSkipped { sheet: String, reason: String },
    #[error("Error: {reason}")]
    CsvReply { reason: String },
    #[error("exchange rate {currency}->USD unavailable, using 1.0: {reason}")]
    FxFallback { currency: String, reason: String },
    #[error("currency '{raw}' not recognised, assuming USD")]
    CurrencyAssumed { raw: String },
    #[error("supplier '{value}' names the operating organization, discarded")]
    SupplierDiscarded { value: String },
    #[error("no quotation sheet found, cross-sheet join skipped")]
    NoQuotationSheet,
}

/// Result envelope of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub id: String,
    pub layout: Layout,
    pub source_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub records: Vec<CanonicalRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<IngestWarning>,
    pub sheets_processed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sheets_skipped: Vec<String>,
}

impl IngestReport {
    pub fn new(source_file: String, layout: Layout) -> Self {
        Self {
            id: format!("ing_{}", Uuid::new_v4().simple()),
            layout,
            source_file,
            content_hash: None,
            records: Vec::new(),
            warnings: Vec::new(),
            sheets_processed: Vec::new(),
            sheets_skipped: Vec::new(),
        }
    }
}

/// Render records as fully quoted CSV with the storage column names.
pub fn records_to_csv(records: &[CanonicalRecord]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());
    for record in records {
        writer.serialize(record).context("Failed to serialize record")?;
    }
    if records.is_empty() {
        writer
            .write_record([
                "date",
                "item",
                "description",
                "country",
                "city",
                "supplier",
                "quote_id",
                "currency",
                "total_cost",
                "quantity",
                "hours",
                "unit_cost",
                "unit_cost_usd",
            ])
            .context("Failed to write CSV header")?;
    }
    let bytes = writer.into_inner().context("Failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}
