//! Frankfurter-style exchange-rate client.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::config::FxConfig;
use crate::oracle::{FxError, FxRateOracle};

#[derive(Clone)]
pub struct FrankfurterClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct LatestRates {
    #[serde(default)]
    rates: HashMap<String, f64>,
}

impl FrankfurterClient {
    pub fn new(config: &FxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl FxRateOracle for FrankfurterClient {
    async fn rate(&self, from: &str, to: &str) -> Result<f64, FxError> {
        let url = format!("{}/latest", self.base_url);
        debug!("Fetching exchange rate {} -> {}", from, to);

        let response = self
            .client
            .get(&url)
            .query(&[("from", from), ("to", to)])
            .send()
            .await
            .map_err(|e| FxError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FxError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let latest: LatestRates = response
            .json()
            .await
            .map_err(|e| FxError::Request(e.to_string()))?;

        latest.rates.get(to).copied().ok_or_else(|| FxError::MissingRate {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
