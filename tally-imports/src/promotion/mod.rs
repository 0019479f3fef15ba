//! Promotion of validated items into business records
//!
//! A [`PromotionHandler`] writes one merged record into its destination
//! table and reports the id it created (or updated). The
//! [`engine::PromotionEngine`] wraps every handler call in its own
//! savepoint, so a failing item never undoes its siblings.

pub mod engine;
pub mod finance;
pub mod inventory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::mapping::normalize::{is_blank, value_text};
use crate::models::SourceType;

pub use engine::{PromoteRequest, PromotionEngine, PromotionSummary};

pub const CONFIGURATION_ERROR: &str = "CONFIGURATION_ERROR";
pub const INVALID_RECORD: &str = "INVALID_RECORD";
pub const HANDLER_FAILED: &str = "HANDLER_FAILED";
pub const MISSING_DOMAIN_ID: &str = "MISSING_DOMAIN_ID";

/// Caller-selected promotion behaviour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionOptions {
    /// Products without a price are accepted
    pub allow_missing_price: bool,
    /// Newly created products start active
    pub auto_activate: bool,
    /// Location receiving product stock (overrides the record's `location`)
    pub target_location: Option<String>,
    /// Unknown locations are created instead of failing the item
    pub auto_create_locations: bool,
}

/// Everything a handler may consult besides the record
#[derive(Debug, Clone, Default)]
pub struct PromotionContext {
    pub options: PromotionOptions,
    pub default_currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionOutcome {
    pub domain_id: Option<String>,
    pub skipped: bool,
}

impl PromotionOutcome {
    pub fn created(domain_id: String) -> Self {
        Self {
            domain_id: Some(domain_id),
            skipped: false,
        }
    }

    pub fn skipped() -> Self {
        Self {
            domain_id: None,
            skipped: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum PromotionError {
    /// Destination setup missing (no currency default, unknown location...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Storage error: {0}")]
    Storage(#[from] tally_common::Error),
}

impl From<sqlx::Error> for PromotionError {
    fn from(err: sqlx::Error) -> Self {
        PromotionError::Storage(err.into())
    }
}

impl PromotionError {
    pub fn code(&self) -> &'static str {
        match self {
            PromotionError::Configuration(_) => CONFIGURATION_ERROR,
            PromotionError::InvalidRecord(_) => INVALID_RECORD,
            PromotionError::Storage(_) => HANDLER_FAILED,
        }
    }
}

/// Writes one record type into its destination
#[async_trait]
pub trait PromotionHandler: Send + Sync {
    /// Destination name stored as `promoted_to`
    fn target(&self) -> &'static str;

    async fn promote(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        record: &Map<String, Value>,
        existing_promoted_id: Option<&str>,
        ctx: &PromotionContext,
    ) -> Result<PromotionOutcome, PromotionError>;
}

/// Handlers by source type
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<SourceType, Arc<dyn PromotionHandler>>,
}

impl HandlerRegistry {
    /// Handlers for every specific source type
    pub fn standard() -> Self {
        Self::default()
            .with_handler(SourceType::Invoices, Arc::new(finance::InvoiceHandler))
            .with_handler(SourceType::Bank, Arc::new(finance::BankHandler))
            .with_handler(SourceType::Expenses, Arc::new(finance::ExpenseHandler))
            .with_handler(SourceType::Products, Arc::new(inventory::ProductHandler))
            .with_handler(SourceType::Recipes, Arc::new(inventory::RecipeHandler))
    }

    pub fn with_handler(mut self, source_type: SourceType, handler: Arc<dyn PromotionHandler>) -> Self {
        self.handlers.insert(source_type, handler);
        self
    }

    pub fn get(&self, source_type: SourceType) -> Option<Arc<dyn PromotionHandler>> {
        self.handlers.get(&source_type).cloned()
    }
}

/// Non-blank field as text
pub(crate) fn text(record: &Map<String, Value>, field: &str) -> Option<String> {
    record.get(field).filter(|v| !is_blank(v)).map(value_text)
}

pub(crate) fn required(record: &Map<String, Value>, field: &str) -> Result<String, PromotionError> {
    text(record, field).ok_or_else(|| PromotionError::InvalidRecord(format!("'{}' is missing", field)))
}

/// Record currency, else the tenant default
pub(crate) fn currency(record: &Map<String, Value>, ctx: &PromotionContext) -> Result<String, PromotionError> {
    text(record, "currency")
        .or_else(|| ctx.default_currency.clone())
        .map(|c| c.to_uppercase())
        .ok_or_else(|| {
            PromotionError::Configuration("record has no currency and the tenant has no default currency".into())
        })
}
