//! Read-only gazetteer lookups: city → country, valid countries, ISO-2 → country.
//!
//! Built once per process and shared by reference; nothing mutates it after load.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct GazetteerRow {
    city_ascii: String,
    country: String,
    #[serde(default)]
    iso2: String,
}

#[derive(Debug, Clone, Default)]
pub struct GeoReference {
    city_to_country: HashMap<String, String>,
    countries: HashSet<String>,
    iso2_to_country: HashMap<String, String>,
}

impl GeoReference {
    /// Load the gazetteer CSV from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open gazetteer: {:?}", path))?;
        let geo = Self::from_reader(file)
            .with_context(|| format!("Failed to load gazetteer: {:?}", path))?;
        info!(
            "Loaded gazetteer: {} cities, {} countries, {} ISO-2 codes",
            geo.city_count(),
            geo.countries.len(),
            geo.iso2_to_country.len()
        );
        Ok(geo)
    }

    /// Build from CSV with a header row. Duplicate city names keep the
    /// first-seen country; the country and ISO-2 tables are derived from those
    /// surviving rows.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let mut geo = Self::default();

        for result in reader.deserialize::<GazetteerRow>() {
            let row = result.context("Failed to read gazetteer row")?;
            let city = row.city_ascii.trim();
            let country = row.country.trim();
            if city.is_empty() || geo.city_to_country.contains_key(city) {
                continue;
            }

            geo.city_to_country.insert(city.to_string(), country.to_string());
            if country.is_empty() {
                continue;
            }
            geo.countries.insert(country.to_string());

            let iso2 = row.iso2.trim();
            if !iso2.is_empty() {
                geo.iso2_to_country
                    .entry(iso2.to_string())
                    .or_insert_with(|| country.to_string());
            }
        }

        Ok(geo)
    }

    pub fn country_for_city(&self, city: &str) -> Option<&str> {
        self.city_to_country.get(city).map(String::as_str)
    }

    pub fn is_city(&self, city: &str) -> bool {
        self.city_to_country.contains_key(city)
    }

    pub fn is_country(&self, country: &str) -> bool {
        self.countries.contains(country)
    }

    pub fn country_for_iso2(&self, code: &str) -> Option<&str> {
        self.iso2_to_country.get(code).map(String::as_str)
    }

    pub fn city_count(&self) -> usize {
        self.city_to_country.len()
    }
}

/// Split a free-text cell into place-name candidates on `,` `.` `;`.
pub fn place_tokens(value: &str) -> impl Iterator<Item = &str> {
    value
        .trim()
        .split([',', '.', ';'])
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
pub(crate) fn sample_reference() -> GeoReference {
    let csv = "city_ascii,country,iso2\n\
               Paris,France,FR\n\
               Singapore,Singapore,SG\n\
               Paris,United States,US\n\
               Sydney,Australia,AU\n\
               Tokyo,Japan,JP\n";
    GeoReference::from_reader(csv.as_bytes()).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_city_keeps_first_country() {
        let geo = sample_reference();
        assert_eq!(geo.country_for_city("Paris"), Some("France"));
        assert_eq!(geo.city_count(), 4);
    }

    #[test]
    fn test_countries_and_iso2_come_from_surviving_rows() {
        let geo = sample_reference();
        assert!(geo.is_country("France"));
        assert!(!geo.is_country("United States"));
        assert_eq!(geo.country_for_iso2("SG"), Some("Singapore"));
        assert_eq!(geo.country_for_iso2("US"), None);
    }

    #[test]
    fn test_extra_columns_are_ignored() {
        let csv = "city,city_ascii,lat,country,iso2,iso3\nZürich,Zurich,47.3,Switzerland,CH,CHE\n";
        let geo = GeoReference::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(geo.country_for_city("Zurich"), Some("Switzerland"));
    }

    #[test]
    fn test_place_tokens() {
        let tokens: Vec<_> = place_tokens(" Paris, France Office; Level 3.").collect();
        assert_eq!(tokens, vec!["Paris", "France Office", "Level 3"]);
    }
}
