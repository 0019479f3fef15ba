//! Configuration for tally-imports
//!
//! Service settings live in the `[imports]` table of the shared TOML file.
//! Every key is optional; missing keys take the defaults below.
//!
//! The AI provider API key is resolved with Database → ENV → TOML priority.

use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tally_common::config::TomlConfig;
use tally_common::{Error, Result};
use tracing::{info, warn};

/// Settings-table key holding the AI provider API key
pub const AI_API_KEY_SETTING: &str = "ai_api_key";

/// Environment variable holding the AI provider API key
pub const AI_API_KEY_ENV: &str = "TALLY_AI_API_KEY";

/// Which classification provider backs AI escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Heuristic only
    None,
    /// In-process pattern matcher
    Local,
    /// OpenAI-compatible chat completion endpoint
    Unified,
    /// Document-AI style REST backend
    Vendor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub provider: ProviderKind,
    /// Heuristic confidence below which the provider is consulted
    pub threshold: f64,
    pub timeout_ms: u64,
    pub endpoint: Option<String>,
    pub model: String,
    pub requests_per_minute: u32,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::None,
            threshold: 0.7,
            timeout_ms: 8_000,
            endpoint: None,
            model: "gpt-4o-mini".to_string(),
            requests_per_minute: 60,
            cache_ttl_secs: 3_600,
            cache_max_entries: 1_024,
        }
    }
}

/// Validation toggles; per-tenant settings override these
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub require_currency: bool,
    pub require_category: bool,
    pub default_country: Option<String>,
    pub default_currency: Option<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            require_currency: false,
            require_category: true,
            default_country: None,
            default_currency: None,
        }
    }
}

/// Quality gate and retraining thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub min_precision: f64,
    pub min_recall: f64,
    pub min_f1: f64,
    /// Below this many labeled samples the gate does not judge
    pub min_samples: usize,
    /// Latest labeled events considered by the gate
    pub sample_size: usize,
    /// Feedback events required before retraining runs
    pub retrain_min_feedback: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_precision: 0.8,
            min_recall: 0.8,
            min_f1: 0.8,
            min_samples: 20,
            sample_size: 200,
            retrain_min_feedback: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 30_000,
        }
    }
}

/// `[imports]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportsConfig {
    pub listen: String,
    pub db_max_lock_wait_ms: u64,
    /// Downgrade PROMOTED-without-id items to OK when promotion meets them
    pub repair_stale_promotions: bool,
    pub ai: AiConfig,
    pub validation: ValidationConfig,
    pub quality: QualityConfig,
    pub ocr: OcrConfig,
}

impl Default for ImportsConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5740".to_string(),
            db_max_lock_wait_ms: 5_000,
            repair_stale_promotions: true,
            ai: AiConfig::default(),
            validation: ValidationConfig::default(),
            quality: QualityConfig::default(),
            ocr: OcrConfig::default(),
        }
    }
}

impl ImportsConfig {
    /// Read the `[imports]` table of the shared config
    pub fn from_toml(config: &TomlConfig) -> Result<Self> {
        let parsed: Self = toml::Value::Table(config.imports.clone())
            .try_into()
            .map_err(|e| Error::Config(format!("Invalid [imports] section: {}", e)))?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.ai.threshold) {
            return Err(Error::Config(format!(
                "imports.ai.threshold must be within 0..1 (got {})",
                self.ai.threshold
            )));
        }
        if self.ai.requests_per_minute == 0 {
            return Err(Error::Config("imports.ai.requests_per_minute must be > 0".into()));
        }
        if matches!(self.ai.provider, ProviderKind::Unified | ProviderKind::Vendor) && self.ai.endpoint.is_none() {
            return Err(Error::Config(format!(
                "imports.ai.endpoint is required for the {:?} provider",
                self.ai.provider
            )));
        }
        Ok(())
    }
}

/// Resolve the AI provider API key from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML. Returns `None` when no tier holds a
/// usable key; hosted providers then refuse to start.
pub async fn resolve_ai_api_key(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<Option<String>> {
    let db_key = tally_common::db::get_setting(db, AI_API_KEY_SETTING)
        .await?
        .filter(|k| is_valid_key(k));
    let env_key = std::env::var(AI_API_KEY_ENV).ok().filter(|k| is_valid_key(k));
    let toml_key = toml_config.ai_api_key.clone().filter(|k| is_valid_key(k));

    let sources: Vec<&str> = [
        db_key.as_ref().map(|_| "database"),
        env_key.as_ref().map(|_| "environment"),
        toml_key.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if sources.len() > 1 {
        warn!(
            "AI API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(key) = db_key {
        info!("AI API key loaded from database");
        return Ok(Some(key));
    }
    if let Some(key) = env_key {
        info!("AI API key loaded from environment variable");
        return Ok(Some(key));
    }
    if let Some(key) = toml_key {
        info!("AI API key loaded from TOML config");
        return Ok(Some(key));
    }
    Ok(None)
}

/// Non-empty and not just whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_table_empty() {
        let config = ImportsConfig::from_toml(&TomlConfig::default()).unwrap();
        assert_eq!(config, ImportsConfig::default());
        assert_eq!(config.ai.threshold, 0.7);
        assert!(config.repair_stale_promotions);
    }

    #[test]
    fn test_partial_table_overrides() {
        let toml_text = r#"
            [imports]
            repair_stale_promotions = false

            [imports.ai]
            provider = "local"
            threshold = 0.6

            [imports.validation]
            require_currency = true
        "#;
        let config: TomlConfig = toml::from_str(toml_text).unwrap();
        let imports = ImportsConfig::from_toml(&config).unwrap();
        assert!(!imports.repair_stale_promotions);
        assert_eq!(imports.ai.provider, ProviderKind::Local);
        assert_eq!(imports.ai.threshold, 0.6);
        assert_eq!(imports.ai.timeout_ms, 8_000);
        assert!(imports.validation.require_currency);
    }

    #[test]
    fn test_hosted_provider_requires_endpoint() {
        let config: TomlConfig = toml::from_str("[imports.ai]\nprovider = \"unified\"\n").unwrap();
        assert!(ImportsConfig::from_toml(&config).is_err());
    }

    #[test]
    fn test_threshold_range_checked() {
        let config: TomlConfig = toml::from_str("[imports.ai]\nthreshold = 1.5\n").unwrap();
        assert!(ImportsConfig::from_toml(&config).is_err());
    }

    #[test]
    fn test_key_validation() {
        assert!(is_valid_key("sk-123"));
        assert!(!is_valid_key("   "));
    }
}
