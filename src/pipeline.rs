//! Format pipelines.
//!
//! One [`Pipeline`] runs every layout; the differences live in the
//! [`LayoutPlan`] each [`Layout`] selects: which sheets are read, where rows
//! come from (with how their tables are bounded) and which normalization rules
//! apply.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, QuotationColumns};
use crate::geo::GeoReference;
use crate::inference::{infer_rows, is_excluded_sheet};
use crate::joiner::{contains_bom_or_missing_price, find_quotation_sheet, forward_fill, QuotationTable};
use crate::locator::{is_blank_row, locate_bounded, locate_open_ended, TableRegion};
use crate::mapper::{map_columns, project_row, sample_row};
use crate::normalizer::{Normalizer, RuleSet};
use crate::oracle::{FxRateOracle, SemanticOracle};
use crate::schema::{IngestReport, IngestWarning, MappingResult, WorkingRow};
use crate::sheet_parser::{RawSheet, Workbook};
use crate::sideband::{extract_sideband, SupplierHints};

/// Source layout of an uploaded workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// One quote table on the first sheet, metadata around it.
    A,
    /// Free-form sheets interpreted wholesale.
    B,
    /// Per-category price sheets keyed into a quotation sheet.
    C,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown layout '{0}', expected one of a, b, c")]
pub struct UnknownLayout(String);

impl FromStr for Layout {
    type Err = UnknownLayout;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" => Ok(Layout::A),
            "b" => Ok(Layout::B),
            "c" => Ok(Layout::C),
            _ => Err(UnknownLayout(s.to_string())),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layout::A => "a",
            Layout::B => "b",
            Layout::C => "c",
        };
        f.write_str(name)
    }
}

impl Layout {
    pub fn all() -> [Layout; 3] {
        [Layout::A, Layout::B, Layout::C]
    }

    pub fn plan(self, config: &PipelineConfig) -> LayoutPlan {
        match self {
            Layout::A => LayoutPlan {
                sheets: SheetSelection::First,
                rows: RowSource::MappedTable {
                    table: TableStrategy::Bounded {
                        blank_run: config.blank_run_threshold,
                    },
                    sideband: true,
                },
                rules: RuleSet::layout_a(),
            },
            Layout::B => LayoutPlan {
                sheets: SheetSelection::ExcludingKeywords(config.excluded_sheet_keywords.clone()),
                rows: RowSource::Inferred,
                rules: RuleSet::layout_b(),
            },
            Layout::C => LayoutPlan {
                sheets: SheetSelection::All,
                rows: RowSource::JoinedTables {
                    table: TableStrategy::OpenEnded,
                    quotation: config.quotation.clone(),
                },
                rules: RuleSet::layout_c(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SheetSelection {
    First,
    All,
    /// Every sheet whose name matches none of the keywords.
    ExcludingKeywords(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TableStrategy {
    /// Densest-row header; body ends before a run of blank rows.
    Bounded { blank_run: usize },
    /// Leading or densest header; body runs to the last row.
    OpenEnded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowSource {
    /// Oracle column mapping, optionally with sideband metadata.
    MappedTable { table: TableStrategy, sideband: bool },
    /// Oracle column mapping on priced sheets, joined to the quotation sheet.
    JoinedTables {
        table: TableStrategy,
        quotation: QuotationColumns,
    },
    /// One oracle call producing canonical rows as CSV from whole sheets.
    Inferred,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutPlan {
    pub sheets: SheetSelection,
    pub rows: RowSource,
    pub rules: RuleSet,
}

/// A located, mapped table on one sheet.
struct MappedSheet<'s> {
    sheet: &'s RawSheet,
    region: TableRegion,
    mapping: MappingResult,
}

impl MappedSheet<'_> {
    fn body(&self) -> &[Vec<String>] {
        self.region.body_rows(self.sheet)
    }

    fn project(&self, row: &[String]) -> WorkingRow {
        project_row(&self.mapping, &self.region, row)
    }
}

/// Runs one workbook through a layout. Holds only shared, read-only state;
/// everything a run produces lives in its [`IngestReport`].
pub struct Pipeline<'a> {
    geo: &'a GeoReference,
    oracle: &'a dyn SemanticOracle,
    fx: &'a dyn FxRateOracle,
    config: &'a PipelineConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        geo: &'a GeoReference,
        oracle: &'a dyn SemanticOracle,
        fx: &'a dyn FxRateOracle,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            geo,
            oracle,
            fx,
            config,
        }
    }

    /// Run `layout` over `workbook`. Never fails; every recovered problem is
    /// listed in the report's warnings.
    pub async fn run(&self, layout: Layout, workbook: &Workbook) -> IngestReport {
        let mut report = IngestReport::new(workbook.source_file.clone(), layout);
        report.content_hash = Some(workbook.content_hash.clone());
        let plan = layout.plan(self.config);

        info!(
            "Ingesting '{}' as layout {} ({} sheets)",
            workbook.source_file,
            layout,
            workbook.sheets.len()
        );

        let sheets = select_sheets(&plan.sheets, &workbook.sheets, &mut report);
        let rows = match &plan.rows {
            RowSource::MappedTable { table, sideband } => {
                self.mapped_table_rows(&sheets, *table, *sideband, &mut report).await
            }
            RowSource::JoinedTables { table, quotation } => {
                self.joined_rows(&workbook.sheets, &sheets, *table, quotation, &mut report)
                    .await
            }
            RowSource::Inferred => self.inferred_rows(&sheets, &mut report).await,
        };

        let mut normalizer = Normalizer::new(self.geo, self.fx);
        report.records = normalizer.run(&plan.rules, rows, &mut report.warnings).await;

        info!(
            "Ingest {} finished: {} records, {} warnings",
            report.id,
            report.records.len(),
            report.warnings.len()
        );
        report
    }

    async fn locate_and_map<'s>(
        &self,
        sheet: &'s RawSheet,
        table: TableStrategy,
        report: &mut IngestReport,
    ) -> Option<MappedSheet<'s>> {
        let region = match table {
            TableStrategy::Bounded { blank_run } => locate_bounded(sheet, blank_run),
            TableStrategy::OpenEnded => locate_open_ended(sheet),
        };
        let Some(region) = region else {
            skip_sheet(report, sheet, "no header row");
            return None;
        };

        let headers = region.header.values();
        debug!(
            "Sheet '{}': header at row {}, body rows {:?}",
            sheet.name, region.header.index, region.body
        );
        let sample = sample_row(sheet, &region);
        let mapping = map_columns(self.oracle, &sheet.name, &headers, &sample, &mut report.warnings).await;

        Some(MappedSheet {
            sheet,
            region,
            mapping,
        })
    }

    async fn mapped_table_rows(
        &self,
        sheets: &[&RawSheet],
        table: TableStrategy,
        sideband: bool,
        report: &mut IngestReport,
    ) -> Vec<WorkingRow> {
        let mut rows = Vec::new();

        for sheet in sheets {
            let Some(mapped) = self.locate_and_map(sheet, table, report).await else {
                continue;
            };
            let mut sheet_rows: Vec<WorkingRow> = mapped
                .body()
                .iter()
                .filter(|row| !is_blank_row(row))
                .map(|row| mapped.project(row))
                .collect();

            if sideband {
                let hints = SupplierHints {
                    candidates: &self.config.supplier_candidates,
                    own_aliases: &self.config.own_organization_aliases,
                };
                let values =
                    extract_sideband(self.oracle, hints, sheet, &mapped.region, &mut report.warnings).await;
                values.apply(&mut sheet_rows);
            }

            report.sheets_processed.push(sheet.name.clone());
            rows.extend(sheet_rows);
        }

        rows
    }

    async fn joined_rows(
        &self,
        workbook_sheets: &[RawSheet],
        sheets: &[&RawSheet],
        table: TableStrategy,
        columns: &QuotationColumns,
        report: &mut IngestReport,
    ) -> Vec<WorkingRow> {
        let quotation = find_quotation_sheet(workbook_sheets, &columns.sheet_keyword)
            .and_then(|sheet| QuotationTable::from_sheet(sheet, columns));
        match &quotation {
            Some(table) if table.is_empty() => warn!("Quotation sheet has no keyed rows, no row will join"),
            Some(table) => info!("Quotation sheet: {} keyed rows", table.len()),
            None => {
                warn!("No usable quotation sheet, cross-sheet join skipped");
                report.warnings.push(IngestWarning::NoQuotationSheet);
            }
        }

        let mut rows = Vec::new();
        for sheet in sheets {
            let priced = match locate_open_ended(sheet) {
                Some(region) => !contains_bom_or_missing_price(&region.header.values()),
                None => false,
            };
            if !priced {
                debug!("Sheet '{}' has no price column or is a BOM, skipped", sheet.name);
                report.sheets_skipped.push(sheet.name.clone());
                continue;
            }

            let Some(mapped) = self.locate_and_map(sheet, table, report).await else {
                continue;
            };
            let body = mapped.body();
            let keys = forward_fill(body, 0);
            let mut joined = 0usize;

            for (row, key) in body.iter().zip(keys) {
                if is_blank_row(row) {
                    continue;
                }
                let mut working = mapped.project(row);
                working.match_key = key;
                if quotation.as_ref().is_some_and(|q| q.join(&mut working)) {
                    joined += 1;
                }
                rows.push(working);
            }

            debug!("Sheet '{}': {} rows joined to quotation", sheet.name, joined);
            report.sheets_processed.push(sheet.name.clone());
        }

        rows
    }

    async fn inferred_rows(&self, sheets: &[&RawSheet], report: &mut IngestReport) -> Vec<WorkingRow> {
        if sheets.is_empty() {
            info!("No sheets left after exclusions, nothing to infer");
            return Vec::new();
        }
        let rows = infer_rows(self.oracle, sheets, &mut report.warnings).await;
        report
            .sheets_processed
            .extend(sheets.iter().map(|s| s.name.clone()));
        rows
    }
}

fn select_sheets<'w>(
    selection: &SheetSelection,
    sheets: &'w [RawSheet],
    report: &mut IngestReport,
) -> Vec<&'w RawSheet> {
    match selection {
        SheetSelection::First => sheets.iter().take(1).collect(),
        SheetSelection::All => sheets.iter().collect(),
        SheetSelection::ExcludingKeywords(keywords) => {
            let (excluded, kept): (Vec<&RawSheet>, Vec<&RawSheet>) =
                sheets.iter().partition(|s| is_excluded_sheet(&s.name, keywords));
            report
                .sheets_skipped
                .extend(excluded.iter().map(|s| s.name.clone()));
            kept
        }
    }
}

fn skip_sheet(report: &mut IngestReport, sheet: &RawSheet, reason: &str) {
    warn!("Sheet '{}' skipped: {}", sheet.name, reason);
    report.sheets_skipped.push(sheet.name.clone());
    report.warnings.push(IngestWarning::SheetSkipped {
        sheet: sheet.name.clone(),
        reason: reason.to_string(),
    });
}
