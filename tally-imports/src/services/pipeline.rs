//! Per-record processing shared by ingestion, correction and revalidation
//!
//! A [`BatchContext`] fixes everything that is constant for one batch (the
//! effective source type, its mapping template, the tenant's validation
//! rules and whether LOW-confidence routing forces review). Each record
//! then goes map → validate → dedupe stamp → status.

use serde_json::{Map, Value};
use sqlx::SqliteConnection;
use std::sync::Arc;
use tally_common::Result;

use crate::db::{audit, items, mappings, tenant_settings};
use crate::dedup::dedupe_hash;
use crate::mapping::CanonicalMapper;
use crate::models::{
    merge_views, Batch, ConfidenceBucket, Correction, ErrorPhase, Item, ItemError, ItemStatus, Mapping, SourceType,
};
use crate::validation::{CountryValidator, ValidationGate, ValidationRules};

pub const PARSE_ERROR: &str = "PARSE_ERROR";

/// Outcome of processing one record
#[derive(Debug, Clone)]
pub struct ProcessedRecord {
    pub normalized: Map<String, Value>,
    pub errors: Vec<ItemError>,
    pub status: ItemStatus,
    pub dedupe_hash: Option<String>,
    pub warnings: Vec<String>,
}

pub struct BatchContext {
    pub source_type: SourceType,
    pub force_review: bool,
    dedupe_keys: Vec<String>,
    mapper: CanonicalMapper,
}

impl BatchContext {
    pub fn process(&self, raw: &Map<String, Value>, overrides: &Map<String, Value>) -> ProcessedRecord {
        let result = self.mapper.map_with_overrides(raw, overrides, self.source_type);

        let hash = if self.source_type == SourceType::Generic {
            dedupe_hash(self.source_type, &result.normalized, &self.dedupe_keys)
        } else {
            dedupe_hash(self.source_type, &merge_views(raw, &result.normalized), &self.dedupe_keys)
        };

        let status = if self.force_review {
            ItemStatus::NeedsReview
        } else if result.validation_errors.is_empty() {
            ItemStatus::Ok
        } else {
            ItemStatus::ErrorValidation
        };

        ProcessedRecord {
            normalized: result.normalized,
            errors: result.validation_errors,
            status,
            dedupe_hash: hash,
            warnings: result.warnings,
        }
    }
}

/// Builds batch contexts from service-wide defaults
pub struct RecordPipeline {
    country: Arc<dyn CountryValidator>,
    base_rules: ValidationRules,
}

impl RecordPipeline {
    pub fn new(country: Arc<dyn CountryValidator>, base_rules: ValidationRules) -> Self {
        Self { country, base_rules }
    }

    pub fn base_rules(&self) -> &ValidationRules {
        &self.base_rules
    }

    pub fn context(
        &self,
        source_type: SourceType,
        template: Option<&Mapping>,
        rules: ValidationRules,
        force_review: bool,
    ) -> BatchContext {
        let gate = Arc::new(ValidationGate::new(rules, Arc::clone(&self.country)));
        BatchContext {
            source_type,
            force_review,
            dedupe_keys: template.map(|t| t.dedupe_keys.clone()).unwrap_or_default(),
            mapper: CanonicalMapper::new().with_template(template).with_validator(gate),
        }
    }

    /// Effective validation rules for a tenant
    pub async fn rules_for(&self, conn: &mut SqliteConnection, tenant_id: &str) -> Result<ValidationRules> {
        let rules = self.base_rules.clone();
        Ok(match tenant_settings::get_settings(conn, tenant_id).await? {
            Some(settings) => settings.apply_to(rules),
            None => rules,
        })
    }

    /// Context for a stored batch, as its current state dictates
    pub async fn load_context(&self, conn: &mut SqliteConnection, batch: &Batch) -> Result<BatchContext> {
        let template = match batch.mapping_id {
            Some(mapping_id) => Some(mappings::require_mapping(conn, &batch.tenant_id, mapping_id).await?),
            None => None,
        };
        let rules = self.rules_for(conn, &batch.tenant_id).await?;
        Ok(self.context(batch.source_type, template.as_ref(), rules, forces_review(batch)))
    }

    /// Re-run an item end-to-end from its raw record plus its recorded
    /// corrections. PROMOTED and SKIPPED items are left alone. Returns
    /// whether the item was rewritten.
    pub async fn revalidate_item(&self, conn: &mut SqliteConnection, ctx: &BatchContext, item: &mut Item) -> Result<bool> {
        if !item.status.is_pre_promotion() {
            return Ok(false);
        }
        let corrections = audit::corrections_for_item(conn, &item.tenant_id, item.id).await?;
        let parse_failed = item.errors.iter().any(|e| e.phase == ErrorPhase::Parse);
        if parse_failed && corrections.is_empty() {
            return Ok(false);
        }

        let processed = ctx.process(&item.raw, &overrides_from(&corrections));
        item.status = item.status.transition(processed.status)?;
        item.normalized = processed.normalized;
        item.errors = processed.errors;
        item.dedupe_hash = processed.dedupe_hash;
        items::update_validation(conn, item).await?;
        Ok(true)
    }
}

/// LOW-confidence classification of an undeclared, unconfirmed batch
pub fn forces_review(batch: &Batch) -> bool {
    batch.source_type == SourceType::Generic
        && batch.confirmed_at.is_none()
        && batch
            .classification_confidence
            .map(|c| ConfidenceBucket::from_confidence(c) == ConfidenceBucket::Low)
            .unwrap_or(false)
}

/// Latest value per corrected field
pub fn overrides_from(corrections: &[Correction]) -> Map<String, Value> {
    let mut overrides = Map::new();
    for correction in corrections {
        overrides.insert(correction.field.clone(), correction.new_value.clone());
    }
    overrides
}

/// Item stand-in for a row the parser could not read
pub fn parse_error_record(raw: Option<&str>) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert("_raw".into(), raw.map(|r| Value::String(r.to_string())).unwrap_or(Value::Null));
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::FormatCountryValidator;
    use serde_json::json;

    fn pipeline() -> RecordPipeline {
        RecordPipeline::new(Arc::new(FormatCountryValidator), ValidationRules::default())
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_valid_bank_row_is_ok_with_hash() {
        let p = pipeline();
        let ctx = p.context(SourceType::Bank, None, ValidationRules::default(), false);
        let out = ctx.process(
            &obj(json!({"Fecha": "05/01/2024", "Descripción": "Pago", "Importe": "-40,00"})),
            &Map::new(),
        );
        assert_eq!(out.status, ItemStatus::Ok, "{:?}", out.errors);
        assert!(out.dedupe_hash.is_some());
    }

    #[test]
    fn test_bad_amount_is_error_validation() {
        let p = pipeline();
        let ctx = p.context(SourceType::Bank, None, ValidationRules::default(), false);
        let out = ctx.process(&obj(json!({"date": "2024-01-05", "amount": "12,3x4"})), &Map::new());
        assert_eq!(out.status, ItemStatus::ErrorValidation);
        assert_eq!(out.errors[0].field.as_deref(), Some("amount"));
    }

    #[test]
    fn test_forced_review_wins() {
        let p = pipeline();
        let ctx = p.context(SourceType::Generic, None, ValidationRules::default(), true);
        let out = ctx.process(&obj(json!({"a": 1})), &Map::new());
        assert_eq!(out.status, ItemStatus::NeedsReview);
    }

    #[test]
    fn test_latest_correction_wins() {
        let now = chrono::Utc::now();
        let correction = |v: &str| Correction {
            id: uuid::Uuid::new_v4(),
            tenant_id: "t1".into(),
            item_id: uuid::Uuid::nil(),
            field: "amount".into(),
            old_value: Value::Null,
            new_value: json!(v),
            user_id: "u1".into(),
            created_at: now,
        };
        let overrides = overrides_from(&[correction("1"), correction("2")]);
        assert_eq!(overrides["amount"], json!("2"));
    }
}
