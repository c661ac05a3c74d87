//! External oracle capabilities.
//!
//! The pipeline never talks to a network service directly: it holds a
//! [`SemanticOracle`] for column mapping, sideband extraction and whole-sheet
//! CSV inference, and an [`FxRateOracle`] for exchange rates. Production
//! implementations live in `openrouter` and `fx`; tests use stubs.

use crate::schema::CanonicalField;

/// A typed request to the semantic-mapping oracle.
#[derive(Debug, Clone, Copy)]
pub enum OracleRequest<'a> {
    /// Raw headers → canonical fields, disambiguated by one sample row.
    ColumnMapping {
        headers: &'a [String],
        fields: &'a [CanonicalField],
        sample_row: &'a str,
    },
    /// Metadata outside the table body, serialized as CSV.
    Sideband {
        blob: &'a str,
        fields: &'a [CanonicalField],
        suppliers: &'a [String],
        excluded_suppliers: &'a [String],
    },
    /// Whole sheets → one quoted CSV block in canonical columns.
    CsvInference {
        blob: &'a str,
        fields: &'a [CanonicalField],
    },
}

impl OracleRequest<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            OracleRequest::ColumnMapping { .. } => "column_mapping",
            OracleRequest::Sideband { .. } => "sideband",
            OracleRequest::CsvInference { .. } => "csv_inference",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Transport(String),
    #[error("oracle returned an empty reply")]
    EmptyReply,
}

/// Request in, reply text out. Implementations enforce their own timeouts.
#[async_trait::async_trait]
pub trait SemanticOracle: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, request: &OracleRequest<'_>) -> Result<String, OracleError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FxError {
    #[error("exchange rate request failed: {0}")]
    Request(String),
    #[error("exchange rate service error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("no {to} rate in reply for {from}")]
    MissingRate { from: String, to: String },
}

#[async_trait::async_trait]
pub trait FxRateOracle: Send + Sync {
    async fn rate(&self, from: &str, to: &str) -> Result<f64, FxError>;
}

/// Strip markdown code fences an LLM may wrap around its reply.
pub fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    if !trimmed.contains("```") {
        return trimmed;
    }
    let inner = trimmed.split("```").nth(1).unwrap_or(trimmed);
    // Drop a language tag such as `json` or `csv` on the fence line.
    match inner.split_once('\n') {
        Some((tag, rest)) if !tag.trim().is_empty() && !tag.contains([',', '{', '"']) => rest.trim(),
        _ => inner.trim(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&OracleRequest<'_>) -> Result<String, OracleError> + Send + Sync>;

    /// Scripted oracle that records the kinds of requests it served.
    pub struct StubOracle {
        responder: Responder,
        pub calls: Mutex<Vec<&'static str>>,
    }

    impl StubOracle {
        pub fn new(
            responder: impl Fn(&OracleRequest<'_>) -> Result<String, OracleError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                responder: Box::new(responder),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Always answers with the same text.
        pub fn replying(text: &str) -> Self {
            let text = text.to_string();
            Self::new(move |_| Ok(text.clone()))
        }
    }

    #[async_trait::async_trait]
    impl SemanticOracle for StubOracle {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(&self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
            self.calls.lock().unwrap().push(request.kind());
            (self.responder)(request)
        }
    }

    /// Fixed rates keyed by source currency; anything else fails.
    #[derive(Default)]
    pub struct StubRates {
        rates: HashMap<String, f64>,
        pub lookups: Mutex<Vec<String>>,
    }

    impl StubRates {
        pub fn with(pairs: &[(&str, f64)]) -> Self {
            Self {
                rates: pairs.iter().map(|(c, r)| (c.to_string(), *r)).collect(),
                lookups: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl FxRateOracle for StubRates {
        async fn rate(&self, from: &str, to: &str) -> Result<f64, FxError> {
            self.lookups.lock().unwrap().push(from.to_string());
            self.rates.get(from).copied().ok_or_else(|| FxError::MissingRate {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("  {\"a\": \"b\"} "), "{\"a\": \"b\"}");
        assert_eq!(strip_code_fences("```json\n{\"a\": \"b\"}\n```"), "{\"a\": \"b\"}");
        assert_eq!(strip_code_fences("```csv\n\"Date\",\"Item\"\n```"), "\"Date\",\"Item\"");
        assert_eq!(strip_code_fences("```\n\"Date\",\"Item\"\n```"), "\"Date\",\"Item\"");
    }
}
