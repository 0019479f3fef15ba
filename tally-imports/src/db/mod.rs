//! Database access for tally-imports
//!
//! Every query is tenant-scoped. Functions take a `&mut SqliteConnection`
//! so the same code runs on a pooled connection or inside a transaction
//! (and its savepoints).

pub mod audit;
pub mod batches;
pub mod feedback;
pub mod items;
pub mod mappings;
pub mod schema;
pub mod tenant_settings;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tally_common::{Error, Result};
use uuid::Uuid;

pub use schema::init_import_tables;

pub(crate) fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub(crate) fn parse_ts(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_opt_ts(column: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(column, &v)).transpose()
}

pub(crate) fn parse_uuid(column: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn to_json<T: Serialize>(column: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", column, e)))
}

pub(crate) fn from_json<T: DeserializeOwned>(column: &str, value: &str) -> Result<T> {
    serde_json::from_str(value).map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", column, e)))
}
