//! Reusable field-mapping templates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::batch::SourceType;

/// Per-field value transform applied after alias resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    Trim,
    Upper,
    Lower,
    /// Locale-aware amount → plain decimal string
    Number,
    /// Any accepted date form → ISO `YYYY-MM-DD`
    Date,
    /// Keep ASCII digits only (tax ids, barcodes)
    Digits,
}

/// Tenant mapping template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub source_type: SourceType,
    /// Bumped on every update
    pub version: i64,
    /// canonical field → raw aliases
    pub fields: BTreeMap<String, Vec<String>>,
    pub transforms: BTreeMap<String, Vec<Transform>>,
    pub defaults: Map<String, Value>,
    /// Ordered key fields replacing the source-type dedupe recipe
    pub dedupe_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create/update payload for a mapping template
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingInput {
    pub name: String,
    pub source_type: Option<SourceType>,
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub transforms: BTreeMap<String, Vec<Transform>>,
    #[serde(default)]
    pub defaults: Map<String, Value>,
    #[serde(default)]
    pub dedupe_keys: Vec<String>,
}

impl Mapping {
    pub fn from_input(tenant_id: &str, input: MappingInput) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            name: input.name,
            source_type: input.source_type.unwrap_or(SourceType::Generic),
            version: 1,
            fields: input.fields,
            transforms: input.transforms,
            defaults: input.defaults,
            dedupe_keys: input.dedupe_keys,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an update, bumping the version
    pub fn apply_update(&mut self, input: MappingInput) {
        self.name = input.name;
        if let Some(source_type) = input.source_type {
            self.source_type = source_type;
        }
        self.fields = input.fields;
        self.transforms = input.transforms;
        self.defaults = input.defaults;
        self.dedupe_keys = input.dedupe_keys;
        self.version += 1;
        self.updated_at = Utc::now();
    }
}
