//! Record validation
//!
//! [`RecordValidator`] is the seam the canonical mapper and the ingest
//! service call; [`ValidationGate`] is the standard implementation.

pub mod country;
pub mod gate;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ValidationConfig;
use crate::models::{ItemError, SourceType};

pub use country::{CountryIssue, CountryValidator, FormatCountryValidator};
pub use gate::ValidationGate;

/// Per-document-type record checks
pub trait RecordValidator: Send + Sync {
    /// Ordered field errors; empty when the record is valid
    fn validate(&self, source_type: SourceType, record: &Map<String, Value>) -> Vec<ItemError>;
}

/// Effective validation toggles for one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    pub require_currency: bool,
    pub require_category: bool,
    pub default_country: Option<String>,
    pub default_currency: Option<String>,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self::from(&ValidationConfig::default())
    }
}

impl From<&ValidationConfig> for ValidationRules {
    fn from(config: &ValidationConfig) -> Self {
        Self {
            require_currency: config.require_currency,
            require_category: config.require_category,
            default_country: config.default_country.clone(),
            default_currency: config.default_currency.clone(),
        }
    }
}
