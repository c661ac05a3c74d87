//! Pipeline configuration.
//!
//! Loaded from the JSON file named by `INGEST_CONFIG` (default
//! `configs/pipeline.json`). Every field has a default, so a missing file or a
//! partial file is fine. Secrets stay in the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::locator::DEFAULT_BLANK_RUN;

const CONFIG_ENV: &str = "INGEST_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "configs/pipeline.json";

/// Top-level configuration shared by every pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub listen_addr: String,
    /// Gazetteer CSV with at least `city_ascii`, `country`, `iso2`.
    pub gazetteer_path: PathBuf,
    pub oracle: OracleConfig,
    pub fx: FxConfig,
    /// Consecutive blank rows that close a table.
    pub blank_run_threshold: usize,
    /// Layout B: sheets whose name matches any of these are not sent to the oracle.
    pub excluded_sheet_keywords: Vec<String>,
    /// Known supplier names offered to the sideband oracle.
    pub supplier_candidates: Vec<String>,
    /// Names of the operating organization; never accepted as a supplier.
    pub own_organization_aliases: Vec<String>,
    pub quotation: QuotationColumns,
}

/// Semantic-mapping oracle client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub api_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

/// FX-rate oracle client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FxConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

/// Column titles of the layout C quotation sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotationColumns {
    /// Substring (case-insensitive) identifying the quotation sheet by name.
    pub sheet_keyword: String,
    pub key: String,
    pub country: String,
    /// Deployment address, copied into City.
    pub city: String,
    /// Solution, copied into Supplier.
    pub supplier: String,
    /// Customer site id/name, copied into Quote #.
    pub quote_id: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            gazetteer_path: PathBuf::from("data/worldcities.csv"),
            oracle: OracleConfig::default(),
            fx: FxConfig::default(),
            blank_run_threshold: DEFAULT_BLANK_RUN,
            excluded_sheet_keywords: ["terms", "condition", "sow", "assumption", "change", "bom"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            supplier_candidates: Vec::new(),
            own_organization_aliases: [
                "SingTel",
                "Singapore telecommunication",
                "SINGAPORE TELECOM HONG KONG LIMITED",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            quotation: QuotationColumns::default(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "openai/gpt-4o".to_string(),
            timeout_secs: 120,
        }
    }
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.frankfurter.app".to_string(),
            timeout_secs: 15,
        }
    }
}

impl Default for QuotationColumns {
    fn default() -> Self {
        Self {
            sheet_keyword: "quotation".to_string(),
            key: "BOM".to_string(),
            country: "Country".to_string(),
            city: "Address (TO BE DEPLOYED)".to_string(),
            supplier: "Solution".to_string(),
            quote_id: "Customer Site ID/Name".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load from the path in `INGEST_CONFIG`, or the default path.
    /// A missing default file yields the built-in defaults.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(Path::new(&path)),
            Err(_) => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::load(path)
                } else {
                    warn!("No config at {:?}, using defaults", path);
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {:?}", path))?;

        if config.blank_run_threshold == 0 {
            anyhow::bail!("blank_run_threshold must be at least 1 in {:?}", path);
        }

        info!("Loaded pipeline config from {:?}", path);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"supplier_candidates": ["Acme Networks"], "quotation": {"key": "Site"}}"#)
                .unwrap();
        assert_eq!(config.supplier_candidates, vec!["Acme Networks"]);
        assert_eq!(config.quotation.key, "Site");
        assert_eq!(config.quotation.supplier, "Solution");
        assert_eq!(config.blank_run_threshold, 2);
        assert!(config.excluded_sheet_keywords.iter().any(|k| k == "bom"));
    }
}
