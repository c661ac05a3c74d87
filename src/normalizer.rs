//! Record normalization: the last step of every layout.
//!
//! A [`RuleSet`] is an ordered list of [`Stage`]s. Every stage except currency
//! conversion is a pure function of the rows and the gazetteer; conversion
//! also consults the FX oracle through a per-run rate cache.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::geo::{place_tokens, GeoReference};
use crate::oracle::FxRateOracle;
use crate::schema::{CanonicalField, CanonicalRecord, IngestWarning, WorkingRow};

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+(\.\d+)?").unwrap());
static SHIFT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*x\s*(\d+(?:\.\d+)?)").unwrap());
static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(hours?|hrs?|h|days?|d|weeks?|wks?|w)?\b").unwrap()
});
static ISO_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Za-z]{3}\b").unwrap());
static DOLLAR_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(US|HK|NZ|S|A|C)\$").unwrap());

/// ISO 4217 codes accepted from free text.
const ISO_CODES: &[&str] = &[
    "AED", "ARS", "AUD", "BDT", "BGN", "BHD", "BRL", "CAD", "CHF", "CLP", "CNY", "COP", "CZK",
    "DKK", "EGP", "EUR", "GBP", "HKD", "HUF", "IDR", "ILS", "INR", "ISK", "JPY", "KES", "KRW",
    "KWD", "LKR", "MAD", "MXN", "MYR", "NGN", "NOK", "NZD", "OMR", "PEN", "PHP", "PKR", "PLN",
    "QAR", "RON", "RUB", "SAR", "SEK", "SGD", "THB", "TRY", "TWD", "UAH", "USD", "VND", "ZAR",
];

const USD: &str = "USD";

/// One normalization step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Drop rows whose total cost is blank or numerically zero.
    DropZeroCost,
    /// At the second row with a blank Item or Description, drop it and all later rows.
    TruncateAtSecondIncompleteRow,
    /// Keep the first of rows sharing (Item, Description).
    DropDuplicateItems,
    /// Drop rows with a blank Item or a blank Description.
    DropIncompleteItems,
    /// Drop rows whose Item and Description are both blank.
    DropBlankItems,
    /// Fill Country/City from place names found in the other cells.
    ResolveGeographyFromCells,
    /// Parse numeric cells and hour strings.
    CoerceNumbers,
    /// `unit_cost = total_cost / quantity` unless a unit cost was supplied.
    DeriveUnitCost,
    /// Reduce the currency cell to an ISO 4217 code.
    NormalizeCurrency,
    /// Overwrite every row's currency.
    ForceCurrency(&'static str),
    /// Unit cost in USD, rounded to cents. Without a unit cost the USD cell
    /// is kept only when `keep_source_usd` is set, otherwise cleared.
    ConvertToUsd { keep_source_usd: bool },
    /// Keep only gazetteer cities in City; expand ISO-2 country codes.
    CanonicalizeCityCountry,
}

/// Ordered stages for one layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    stages: Vec<Stage>,
}

impl RuleSet {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn layout_a() -> Self {
        Self::new(vec![
            Stage::DropZeroCost,
            Stage::TruncateAtSecondIncompleteRow,
            Stage::DropDuplicateItems,
            Stage::DropIncompleteItems,
            Stage::ResolveGeographyFromCells,
            Stage::CoerceNumbers,
            Stage::DeriveUnitCost,
            Stage::NormalizeCurrency,
            Stage::ConvertToUsd { keep_source_usd: false },
        ])
    }

    /// The inference oracle fills Unit Cost (USD) itself, so it is kept when
    /// no unit cost is available to convert.
    pub fn layout_b() -> Self {
        Self::new(vec![
            Stage::DropZeroCost,
            Stage::DropIncompleteItems,
            Stage::CoerceNumbers,
            Stage::DeriveUnitCost,
            Stage::NormalizeCurrency,
            Stage::ConvertToUsd { keep_source_usd: true },
        ])
    }

    pub fn layout_c() -> Self {
        Self::new(vec![
            Stage::DropZeroCost,
            Stage::DropBlankItems,
            Stage::CoerceNumbers,
            Stage::DeriveUnitCost,
            Stage::ForceCurrency(USD),
            Stage::ConvertToUsd { keep_source_usd: false },
            Stage::CanonicalizeCityCountry,
        ])
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

// ============================================================================
// Value parsing
// ============================================================================

/// First number in a cell, e.g. `"USD 1558.50"` → 1558.5.
pub fn extract_number(value: &str) -> Option<f64> {
    NUMBER_RE
        .find(value)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Hours from a support-window string.
///
/// `AxB[xC]` multiplies the first two numbers (`24x7x1` → 168, `8x5xNBD` →
/// 40). Otherwise the first number is taken, scaled by a day or week unit.
pub fn parse_hours(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(caps) = SHIFT_RE.captures(value) {
        let per_day: f64 = caps[1].parse().ok()?;
        let days: f64 = caps[2].parse().ok()?;
        return Some(per_day * days);
    }

    let caps = DURATION_RE.captures(value)?;
    let amount: f64 = caps[1].parse().ok()?;
    let unit = caps.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
    let factor = match unit.chars().next() {
        Some('d') => 24.0,
        Some('w') => 168.0,
        _ => 1.0,
    };
    Some(amount * factor)
}

/// ISO 4217 code for a currency cell, or `None` when nothing recognizable is there.
///
/// A known code is taken from an upper-case word, or from a cell holding only
/// the code in any case. Prefixed dollars (`S$`, `HK$`, ...) are checked
/// before bare symbols.
pub fn normalize_currency(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let code = ISO_CODE_RE
        .find_iter(raw)
        .map(|m| m.as_str())
        .filter(|token| token.len() == raw.len() || token.chars().all(|c| c.is_ascii_uppercase()))
        .map(str::to_ascii_uppercase)
        .find(|token| ISO_CODES.contains(&token.as_str()));
    if code.is_some() {
        return code;
    }
    if let Some(caps) = DOLLAR_PREFIX_RE.captures(raw) {
        let code = match &caps[1] {
            "US" => "USD",
            "HK" => "HKD",
            "NZ" => "NZD",
            "S" => "SGD",
            "A" => "AUD",
            _ => "CAD",
        };
        return Some(code.to_string());
    }
    let symbol = raw.chars().find_map(|c| match c {
        '$' => Some("USD"),
        '€' => Some("EUR"),
        '£' => Some("GBP"),
        '¥' => Some("JPY"),
        '₹' => Some("INR"),
        _ => None,
    });
    symbol.map(str::to_string)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// Currency conversion
// ============================================================================

/// Rates to USD fetched during one run, keyed by source currency.
#[derive(Debug, Default)]
pub struct RateCache {
    rates: HashMap<String, f64>,
}

/// Convert `amount` to USD, rounded to 2 dp. A failed lookup uses rate 1.0,
/// warns once and is cached like any other rate.
pub async fn convert_to_usd(
    amount: f64,
    currency: &str,
    cache: &mut RateCache,
    fx: &dyn FxRateOracle,
    warnings: &mut Vec<IngestWarning>,
) -> f64 {
    if currency == USD {
        return round2(amount);
    }

    let rate = match cache.rates.get(currency) {
        Some(rate) => *rate,
        None => {
            let rate = match fx.rate(currency, USD).await {
                Ok(rate) => {
                    debug!("Exchange rate {} -> USD: {}", currency, rate);
                    rate
                }
                Err(e) => {
                    warn!("Exchange rate {} -> USD unavailable, using 1.0: {}", currency, e);
                    warnings.push(IngestWarning::FxFallback {
                        currency: currency.to_string(),
                        reason: e.to_string(),
                    });
                    1.0
                }
            };
            cache.rates.insert(currency.to_string(), rate);
            rate
        }
    };

    round2(amount * rate)
}

// ============================================================================
// Geography
// ============================================================================

/// Scan the non-geography cells in canonical order. The first token naming a
/// gazetteer city sets City and its Country; the first naming a country sets
/// Country and clears City. Cities are checked before countries per token.
pub fn resolve_geography(mut row: WorkingRow, geo: &GeoReference) -> WorkingRow {
    let scanned = CanonicalField::ALL
        .into_iter()
        .filter(|f| !matches!(f, CanonicalField::Country | CanonicalField::City));

    for field in scanned {
        let value = row.get(field).to_string();
        for token in place_tokens(&value) {
            if let Some(country) = geo.country_for_city(token) {
                let country = country.to_string();
                row.set(CanonicalField::Country, country);
                row.set(CanonicalField::City, token);
                return row;
            }
            if geo.is_country(token) {
                row.set(CanonicalField::Country, token);
                row.set(CanonicalField::City, "");
                return row;
            }
        }
    }
    row
}

/// The first token of `value` that is a gazetteer city.
pub fn canonical_city<'v>(value: &'v str, geo: &GeoReference) -> Option<&'v str> {
    place_tokens(value).find(|t| geo.is_city(t))
}

/// Expand an ISO-2 code to the country name; anything else is kept as is.
pub fn canonical_country(value: &str, geo: &GeoReference) -> String {
    let value = value.trim();
    geo.country_for_iso2(value).unwrap_or(value).to_string()
}

// ============================================================================
// Stages
// ============================================================================

fn incomplete(row: &WorkingRow) -> bool {
    row.is_blank(CanonicalField::Item) || row.is_blank(CanonicalField::Description)
}

fn drop_zero_cost(rows: Vec<WorkingRow>) -> Vec<WorkingRow> {
    rows.into_iter()
        .filter(|row| {
            let cell = row.get(CanonicalField::TotalCost).trim();
            !cell.is_empty() && extract_number(cell) != Some(0.0)
        })
        .collect()
}

fn truncate_at_second_incomplete(mut rows: Vec<WorkingRow>) -> Vec<WorkingRow> {
    let cut = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| incomplete(row))
        .nth(1)
        .map(|(index, _)| index);
    if let Some(cut) = cut {
        debug!("Truncating {} rows at second incomplete row", rows.len() - cut);
        rows.truncate(cut);
    }
    rows
}

fn drop_duplicate_items(rows: Vec<WorkingRow>) -> Vec<WorkingRow> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| {
            seen.insert((
                row.get(CanonicalField::Item).trim().to_string(),
                row.get(CanonicalField::Description).trim().to_string(),
            ))
        })
        .collect()
}

fn coerce_numbers(rows: &mut [WorkingRow]) {
    for row in rows {
        row.total_cost = extract_number(row.get(CanonicalField::TotalCost));
        row.quantity = extract_number(row.get(CanonicalField::Quantity));
        row.unit_cost = extract_number(row.get(CanonicalField::UnitCost));
        row.unit_cost_usd = extract_number(row.get(CanonicalField::UnitCostUsd));
        row.hours = parse_hours(row.get(CanonicalField::Hours));
    }
}

fn derive_unit_cost(rows: &mut [WorkingRow]) {
    for row in rows.iter_mut().filter(|r| r.unit_cost.is_none()) {
        row.unit_cost = match (row.total_cost, row.quantity) {
            (Some(total), Some(qty)) if qty != 0.0 => Some(total / qty),
            _ => None,
        };
    }
}

fn normalize_currencies(rows: &mut [WorkingRow], warnings: &mut Vec<IngestWarning>) {
    let mut assumed = HashSet::new();
    for row in rows {
        let raw = row.get(CanonicalField::Currency).trim().to_string();
        let code = normalize_currency(&raw).unwrap_or_else(|| {
            if assumed.insert(raw.clone()) {
                warn!("Currency '{}' not recognised, assuming USD", raw);
                warnings.push(IngestWarning::CurrencyAssumed { raw: raw.clone() });
            }
            USD.to_string()
        });
        row.set(CanonicalField::Currency, code);
    }
}

fn canonicalize_city_country(rows: &mut [WorkingRow], geo: &GeoReference) {
    for row in rows {
        let city = canonical_city(row.get(CanonicalField::City), geo)
            .unwrap_or_default()
            .to_string();
        row.set(CanonicalField::City, city);
        let country = canonical_country(row.get(CanonicalField::Country), geo);
        row.set(CanonicalField::Country, country);
    }
}

/// Runs a [`RuleSet`] and finalizes the survivors into records.
pub struct Normalizer<'a> {
    geo: &'a GeoReference,
    fx: &'a dyn FxRateOracle,
    rates: RateCache,
}

impl<'a> Normalizer<'a> {
    pub fn new(geo: &'a GeoReference, fx: &'a dyn FxRateOracle) -> Self {
        Self {
            geo,
            fx,
            rates: RateCache::default(),
        }
    }

    pub async fn run(
        &mut self,
        rules: &RuleSet,
        mut rows: Vec<WorkingRow>,
        warnings: &mut Vec<IngestWarning>,
    ) -> Vec<CanonicalRecord> {
        let incoming = rows.len();
        for stage in rules.stages() {
            rows = self.apply(*stage, rows, warnings).await;
        }

        let records: Vec<CanonicalRecord> = rows.into_iter().filter_map(WorkingRow::into_record).collect();
        info!("Normalized {} rows into {} records", incoming, records.len());
        records
    }

    async fn apply(
        &mut self,
        stage: Stage,
        mut rows: Vec<WorkingRow>,
        warnings: &mut Vec<IngestWarning>,
    ) -> Vec<WorkingRow> {
        match stage {
            Stage::DropZeroCost => drop_zero_cost(rows),
            Stage::TruncateAtSecondIncompleteRow => truncate_at_second_incomplete(rows),
            Stage::DropDuplicateItems => drop_duplicate_items(rows),
            Stage::DropIncompleteItems => rows.into_iter().filter(|r| !incomplete(r)).collect(),
            Stage::DropBlankItems => rows
                .into_iter()
                .filter(|r| !(r.is_blank(CanonicalField::Item) && r.is_blank(CanonicalField::Description)))
                .collect(),
            Stage::ResolveGeographyFromCells => rows
                .into_iter()
                .map(|row| resolve_geography(row, self.geo))
                .collect(),
            Stage::CoerceNumbers => {
                coerce_numbers(&mut rows);
                rows
            }
            Stage::DeriveUnitCost => {
                derive_unit_cost(&mut rows);
                rows
            }
            Stage::NormalizeCurrency => {
                normalize_currencies(&mut rows, warnings);
                rows
            }
            Stage::ForceCurrency(code) => {
                for row in &mut rows {
                    row.set(CanonicalField::Currency, code);
                }
                rows
            }
            Stage::ConvertToUsd { keep_source_usd } => {
                for row in &mut rows {
                    let Some(unit_cost) = row.unit_cost else {
                        if !keep_source_usd {
                            row.unit_cost_usd = None;
                        }
                        continue;
                    };
                    let currency = row.get(CanonicalField::Currency).to_string();
                    row.unit_cost_usd =
                        Some(convert_to_usd(unit_cost, &currency, &mut self.rates, self.fx, warnings).await);
                }
                rows
            }
            Stage::CanonicalizeCityCountry => {
                canonicalize_city_country(&mut rows, self.geo);
                rows
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::sample_reference;
    use crate::oracle::testing::StubRates;

    fn row(item: &str, description: &str, total: &str) -> WorkingRow {
        let mut row = WorkingRow::default();
        row.set(CanonicalField::Item, item);
        row.set(CanonicalField::Description, description);
        row.set(CanonicalField::TotalCost, total);
        row
    }

    fn items(rows: &[WorkingRow]) -> Vec<&str> {
        rows.iter().map(|r| r.get(CanonicalField::Item)).collect()
    }

    #[test]
    fn test_extract_number() {
        assert_eq!(extract_number("USD 1558.50"), Some(1558.5));
        assert_eq!(extract_number("-12"), Some(-12.0));
        assert_eq!(extract_number("2 units"), Some(2.0));
        assert_eq!(extract_number("Included"), None);
    }

    #[test]
    fn test_parse_hours() {
        assert_eq!(parse_hours("24x7x1"), Some(168.0));
        assert_eq!(parse_hours("8x5xNBD"), Some(40.0));
        assert_eq!(parse_hours("24X7"), Some(168.0));
        assert_eq!(parse_hours("4Hour"), Some(4.0));
        assert_eq!(parse_hours("12"), Some(12.0));
        assert_eq!(parse_hours("2 days"), Some(48.0));
        assert_eq!(parse_hours("1 week"), Some(168.0));
        assert_eq!(parse_hours("NaN"), None);
        assert_eq!(parse_hours(""), None);
    }

    #[test]
    fn test_normalize_currency() {
        assert_eq!(normalize_currency(" eur "), Some("EUR".to_string()));
        assert_eq!(normalize_currency("USD $"), Some("USD".to_string()));
        assert_eq!(normalize_currency("£"), Some("GBP".to_string()));
        assert_eq!(normalize_currency("₹ 100"), Some("INR".to_string()));
        assert_eq!(normalize_currency("Dollars"), None);
        assert_eq!(normalize_currency(""), None);
    }

    #[test]
    fn test_normalize_currency_ignores_ordinary_words() {
        assert_eq!(normalize_currency("All prices in EUR"), Some("EUR".to_string()));
        assert_eq!(normalize_currency("Net EUR"), Some("EUR".to_string()));
        assert_eq!(normalize_currency("NET"), None);
        assert_eq!(normalize_currency("all"), None);
        assert_eq!(normalize_currency("Per unit"), None);
    }

    #[test]
    fn test_normalize_currency_prefixed_dollars() {
        assert_eq!(normalize_currency("S$"), Some("SGD".to_string()));
        assert_eq!(normalize_currency("S$ 1,200"), Some("SGD".to_string()));
        assert_eq!(normalize_currency("A$"), Some("AUD".to_string()));
        assert_eq!(normalize_currency("HK$"), Some("HKD".to_string()));
        assert_eq!(normalize_currency("US$"), Some("USD".to_string()));
        assert_eq!(normalize_currency("$ 50"), Some("USD".to_string()));
    }

    #[test]
    fn test_duplicate_items_keep_first() {
        let rows = vec![
            row("Router", "Cisco 9999", "100"),
            row("Switch", "Cisco 2960", "50"),
            row("Router", "Cisco 9999", "120"),
        ];
        let kept = drop_duplicate_items(rows);
        assert_eq!(items(&kept), vec!["Router", "Switch"]);
        assert_eq!(kept[0].get(CanonicalField::TotalCost), "100");
    }

    #[test]
    fn test_truncation_at_second_incomplete_row() {
        let rows = vec![
            row("r1", "d1", "1"),
            row("", "d2", "2"),
            row("r3", "d3", "3"),
            row("r4", "d4", "4"),
            row("r5", "", "5"),
            row("r6", "d6", "6"),
        ];
        let truncated = truncate_at_second_incomplete(rows);
        assert_eq!(items(&truncated), vec!["r1", "", "r3", "r4"]);

        let complete: Vec<_> = truncated.into_iter().filter(|r| !incomplete(r)).collect();
        assert_eq!(items(&complete), vec!["r1", "r3", "r4"]);
    }

    #[test]
    fn test_drop_zero_cost() {
        let rows = vec![row("a", "a", "0"), row("b", "b", ""), row("c", "c", "USD 0.00"), row("d", "d", "10")];
        assert_eq!(items(&drop_zero_cost(rows)), vec!["d"]);
    }

    #[test]
    fn test_supplied_unit_cost_wins() {
        let mut rows = vec![row("a", "a", "200"), row("b", "b", "200"), row("c", "c", "200")];
        rows[0].set(CanonicalField::Quantity, "2");
        rows[1].set(CanonicalField::Quantity, "2");
        rows[1].set(CanonicalField::UnitCost, "90");
        rows[2].set(CanonicalField::Quantity, "0");
        coerce_numbers(&mut rows);
        derive_unit_cost(&mut rows);
        assert_eq!(rows[0].unit_cost, Some(100.0));
        assert_eq!(rows[1].unit_cost, Some(90.0));
        assert_eq!(rows[2].unit_cost, None);
    }

    #[tokio::test]
    async fn test_convert_to_usd() {
        let fx = StubRates::with(&[("EUR", 1.10)]);
        let mut cache = RateCache::default();
        let mut warnings = Vec::new();

        assert_eq!(convert_to_usd(100.0, "USD", &mut cache, &fx, &mut warnings).await, 100.0);
        assert_eq!(convert_to_usd(100.0, "EUR", &mut cache, &fx, &mut warnings).await, 110.0);
        assert_eq!(convert_to_usd(33.333, "EUR", &mut cache, &fx, &mut warnings).await, 36.67);
        assert_eq!(fx.lookups.lock().unwrap().len(), 1);
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_convert_to_usd_falls_back_to_rate_one() {
        let fx = StubRates::default();
        let mut cache = RateCache::default();
        let mut warnings = Vec::new();

        assert_eq!(convert_to_usd(12.346, "XYZ", &mut cache, &fx, &mut warnings).await, 12.35);
        assert_eq!(convert_to_usd(10.0, "XYZ", &mut cache, &fx, &mut warnings).await, 10.0);
        assert_eq!(warnings.len(), 1);
        assert_eq!(cache.rates.len(), 1);
    }

    #[test]
    fn test_resolve_geography_city_first() {
        let geo = sample_reference();
        let mut r = row("Install", "Paris, France Office", "10");
        r.set(CanonicalField::Supplier, "Tokyo");
        r.set(CanonicalField::QuoteId, "Japan");
        let r = resolve_geography(r, &geo);
        assert_eq!(r.get(CanonicalField::City), "Paris");
        assert_eq!(r.get(CanonicalField::Country), "France");
    }

    #[test]
    fn test_resolve_geography_country_clears_city() {
        let geo = sample_reference();
        let mut r = row("Shipping", "Delivery. Japan", "10");
        r.set(CanonicalField::City, "Somewhere");
        let r = resolve_geography(r, &geo);
        assert_eq!(r.get(CanonicalField::Country), "Japan");
        assert_eq!(r.get(CanonicalField::City), "");
    }

    #[test]
    fn test_canonical_city_and_country() {
        let geo = sample_reference();
        assert_eq!(canonical_city("1 Fusionopolis Way, Singapore", &geo), Some("Singapore"));
        assert_eq!(canonical_city("Level 2; Unknown Town", &geo), None);
        assert_eq!(canonical_country("SG", &geo), "Singapore");
        assert_eq!(canonical_country("Germany", &geo), "Germany");
    }

    #[tokio::test]
    async fn test_layout_c_rules() {
        let geo = sample_reference();
        let fx = StubRates::default();
        let mut normalizer = Normalizer::new(&geo, &fx);
        let mut warnings = Vec::new();

        let mut with_site = row("", "Managed LAN", "300");
        with_site.set(CanonicalField::Quantity, "3");
        with_site.set(CanonicalField::Currency, "SGD");
        with_site.set(CanonicalField::Country, "FR");
        with_site.set(CanonicalField::City, "Paris. Level 2");
        let rows = vec![with_site, row("", "", "100"), row("Cable", "Cat6", "")];

        let records = normalizer.run(&RuleSet::layout_c(), rows, &mut warnings).await;
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.item, "");
        assert_eq!(record.currency, "USD");
        assert_eq!(record.unit_cost, Some(100.0));
        assert_eq!(record.unit_cost_usd, Some(100.0));
        assert_eq!(record.country.as_deref(), Some("France"));
        assert_eq!(record.city.as_deref(), Some("Paris"));
        assert!(fx.lookups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_layout_b_rules_keep_oracle_usd_when_no_unit_cost() {
        let geo = sample_reference();
        let fx = StubRates::default();
        let mut normalizer = Normalizer::new(&geo, &fx);
        let mut warnings = Vec::new();

        let mut r = row("Support", "Holidays", "1558.5");
        r.set(CanonicalField::Currency, "");
        r.set(CanonicalField::UnitCostUsd, "1000");
        r.set(CanonicalField::Hours, "24x7x1");
        let records = normalizer.run(&RuleSet::layout_b(), vec![r], &mut warnings).await;

        assert_eq!(records[0].currency, "USD");
        assert_eq!(records[0].unit_cost, None);
        assert_eq!(records[0].unit_cost_usd, Some(1000.0));
        assert_eq!(records[0].hours, Some(168.0));
        assert!(matches!(&warnings[0], IngestWarning::CurrencyAssumed { raw } if raw.is_empty()));
    }

    #[tokio::test]
    async fn test_layout_b_rules_drop_incomplete_items() {
        let geo = sample_reference();
        let fx = StubRates::default();
        let mut normalizer = Normalizer::new(&geo, &fx);
        let mut warnings = Vec::new();

        let mut rows = vec![row("Support", "", "200"), row("", "Install", "50"), row("Support", "Holidays", "300")];
        for r in &mut rows {
            r.set(CanonicalField::Currency, "USD");
        }
        let records = normalizer.run(&RuleSet::layout_b(), rows, &mut warnings).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].description, "Holidays");
    }

    #[tokio::test]
    async fn test_source_usd_cost_cleared_without_unit_cost() {
        let geo = sample_reference();
        let fx = StubRates::default();
        let mut warnings = Vec::new();

        let mut r = row("Support", "Holidays", "300");
        r.set(CanonicalField::Currency, "USD");
        r.set(CanonicalField::UnitCostUsd, "999");

        let mut normalizer = Normalizer::new(&geo, &fx);
        let records = normalizer.run(&RuleSet::layout_a(), vec![r.clone()], &mut warnings).await;
        assert_eq!(records[0].unit_cost, None);
        assert_eq!(records[0].unit_cost_usd, None);

        let mut normalizer = Normalizer::new(&geo, &fx);
        let records = normalizer.run(&RuleSet::layout_c(), vec![r], &mut warnings).await;
        assert_eq!(records[0].unit_cost_usd, None);
    }
}
