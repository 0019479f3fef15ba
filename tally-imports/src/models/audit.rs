//! Append-only audit records: corrections and lineage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single field edit on an item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub id: Uuid,
    pub tenant_id: String,
    pub item_id: Uuid,
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Link from a promoted item to the record it produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lineage {
    pub id: Uuid,
    pub tenant_id: String,
    pub item_id: Uuid,
    pub promoted_to: String,
    pub promoted_ref: String,
    pub created_at: DateTime<Utc>,
}
