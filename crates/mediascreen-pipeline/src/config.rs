//! Screening configuration: every policy constant the pipeline consults.
//!
//! Loaded from an optional JSON file; any field left out keeps its default.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use mediascreen_llm::ModelCatalog;
use mediascreen_types::{Result, ScreeningError, TokenUsage};

use crate::retry::{BackoffPolicy, RetryPolicy};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NameMatchConfig {
    /// When false every name check goes to the oracle.
    pub prefilter: bool,
    /// Name tokens shorter than this are ignored by the absence tier.
    pub min_token_len: usize,
}

impl Default for NameMatchConfig {
    fn default() -> Self {
        Self {
            prefilter: true,
            min_token_len: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
        }
    }
}

/// Per-million-token prices in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl TokenPricing {
    pub fn estimate_cost_usd(&self, usage: TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 * self.input_per_million
            + usage.completion_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub model: String,
    /// Explicit provider name; otherwise resolved from the model catalog.
    pub provider: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    /// Overrides the catalog price for `model`.
    pub pricing: Option<TokenPricing>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            provider: None,
            temperature: 0.0,
            max_tokens: 1024,
            timeout_ms: 60_000,
            pricing: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub concurrency: usize,
    /// Pause between run submissions.
    pub delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            delay_ms: 1_000,
        }
    }
}

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ScreeningConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    pub name_match: NameMatchConfig,
    /// Accepted difference between stated and DOB-derived age.
    pub age_tolerance_years: u32,
    pub retry: RetryConfig,
    pub oracle: OracleConfig,
    /// Reference date for age computation; today when unset.
    pub as_of: Option<NaiveDate>,
    pub batch: BatchConfig,
    pub acquisition: AcquisitionConfig,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            name_match: NameMatchConfig::default(),
            age_tolerance_years: 1,
            retry: RetryConfig::default(),
            oracle: OracleConfig::default(),
            as_of: None,
            batch: BatchConfig::default(),
            acquisition: AcquisitionConfig::default(),
        }
    }
}

impl ScreeningConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        let config: ScreeningConfig = serde_json::from_str(&json)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), model = %config.oracle.model, "Config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(ScreeningError::InvalidInput(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.name_match.min_token_len == 0 {
            return Err(ScreeningError::InvalidInput(
                "name_match.min_token_len must be at least 1".into(),
            ));
        }
        if self.batch.concurrency == 0 {
            return Err(ScreeningError::InvalidInput(
                "batch.concurrency must be at least 1".into(),
            ));
        }
        if self.oracle.timeout_ms == 0 {
            return Err(ScreeningError::InvalidInput(
                "oracle.timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff: BackoffPolicy::Exponential {
                base: Duration::from_millis(self.retry.backoff_base_ms),
                max: Duration::from_millis(self.retry.backoff_max_ms),
            },
        }
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle.timeout_ms)
    }

    pub fn as_of_date(&self) -> NaiveDate {
        self.as_of
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    /// Configured price override, else the catalog price for the model.
    pub fn pricing(&self) -> Option<TokenPricing> {
        self.oracle.pricing.or_else(|| {
            ModelCatalog::new()
                .lookup(&self.oracle.model)
                .map(|info| TokenPricing {
                    input_per_million: info.input_price_per_million,
                    output_per_million: info.output_price_per_million,
                })
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_constants() {
        let config = ScreeningConfig::default();
        assert!(config.name_match.prefilter);
        assert_eq!(config.name_match.min_token_len, 2);
        assert_eq!(config.age_tolerance_years, 1);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.acquisition.timeout_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ScreeningConfig = serde_json::from_str(
            r#"{"age_tolerance_years": 2, "oracle": {"model": "gpt-4o-mini"}, "as_of": "2023-06-01"}"#,
        )
        .unwrap();
        assert_eq!(config.age_tolerance_years, 2);
        assert_eq!(config.oracle.model, "gpt-4o-mini");
        assert_eq!(config.oracle.max_tokens, 1024);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(
            config.as_of_date(),
            NaiveDate::from_ymd_opt(2023, 6, 1).unwrap()
        );
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut config = ScreeningConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ScreeningError::InvalidInput(_))
        ));
    }

    #[test]
    fn retry_policy_uses_configured_backoff() {
        let config = ScreeningConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.backoff.delay_for_attempt(10), Duration::from_millis(8_000));
    }

    #[test]
    fn pricing_prefers_override_then_catalog() {
        let mut config = ScreeningConfig::default();
        let catalog = config.pricing().unwrap();
        assert!(catalog.input_per_million > 0.0);

        config.oracle.pricing = Some(TokenPricing {
            input_per_million: 1.0,
            output_per_million: 2.0,
        });
        let cost = config
            .pricing()
            .unwrap()
            .estimate_cost_usd(TokenUsage::new(1_000_000, 500_000));
        assert!((cost - 2.0).abs() < 1e-9);

        config.oracle.pricing = None;
        config.oracle.model = "unlisted-model".into();
        assert!(config.pricing().is_none());
    }

    #[tokio::test]
    async fn load_reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screening.json");
        tokio::fs::write(&path, r#"{"batch": {"concurrency": 4}}"#)
            .await
            .unwrap();
        let config = ScreeningConfig::load(&path).await.unwrap();
        assert_eq!(config.batch.concurrency, 4);
        assert_eq!(config.batch.delay_ms, 1_000);
    }

    #[tokio::test]
    async fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screening.json");
        tokio::fs::write(&path, r#"{"batch": {"concurrency": 0}}"#)
            .await
            .unwrap();
        assert!(ScreeningConfig::load(&path).await.is_err());
    }
}
