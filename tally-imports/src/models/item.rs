//! Import item: one logical record inside a batch
//!
//! Item status is a closed enum with an explicit transition table. Legacy
//! spellings found in stored rows are normalized when read; unknown values
//! are rejected at the boundary instead of being carried along.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tally_common::{Error, Result};
use uuid::Uuid;

/// Item lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Pending,
    Ok,
    ErrorValidation,
    NeedsReview,
    Promoted,
    ErrorPromotion,
    /// Duplicate of a document already promoted for this tenant
    Skipped,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "PENDING",
            ItemStatus::Ok => "OK",
            ItemStatus::ErrorValidation => "ERROR_VALIDATION",
            ItemStatus::NeedsReview => "NEEDS_REVIEW",
            ItemStatus::Promoted => "PROMOTED",
            ItemStatus::ErrorPromotion => "ERROR_PROMOTION",
            ItemStatus::Skipped => "SKIPPED",
        }
    }

    /// Statuses that may still change through correction or revalidation
    pub fn is_pre_promotion(&self) -> bool {
        matches!(
            self,
            ItemStatus::Pending
                | ItemStatus::Ok
                | ItemStatus::ErrorValidation
                | ItemStatus::NeedsReview
                | ItemStatus::ErrorPromotion
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ItemStatus::ErrorValidation | ItemStatus::ErrorPromotion)
    }

    /// Total transition table.
    ///
    /// `Promoted → Ok` exists only for stale-row repair (PROMOTED without a
    /// promoted id); callers must check that precondition.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        match (self, next) {
            (Pending, Ok | ErrorValidation | NeedsReview) => true,
            (Ok, Ok | ErrorValidation | NeedsReview | Promoted | ErrorPromotion | Skipped) => true,
            (ErrorValidation, Ok | ErrorValidation | NeedsReview) => true,
            (NeedsReview, Ok | ErrorValidation | NeedsReview) => true,
            (ErrorPromotion, Ok | ErrorValidation | NeedsReview | ErrorPromotion) => true,
            (Promoted, Ok) => true,
            _ => false,
        }
    }

    /// Checked transition
    pub fn transition(self, next: ItemStatus) -> Result<ItemStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidInput(format!(
                "Illegal item transition {} -> {}",
                self, next
            )))
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "NEW" => Ok(ItemStatus::Pending),
            "OK" | "VALID" | "VALIDATED" => Ok(ItemStatus::Ok),
            "ERROR_VALIDATION" | "ERROR" | "INVALID" => Ok(ItemStatus::ErrorValidation),
            "NEEDS_REVIEW" | "REVIEW" => Ok(ItemStatus::NeedsReview),
            "PROMOTED" => Ok(ItemStatus::Promoted),
            "ERROR_PROMOTION" | "PROMOTION_ERROR" => Ok(ItemStatus::ErrorPromotion),
            "SKIPPED" | "DUPLICATE" => Ok(ItemStatus::Skipped),
            other => Err(Error::InvalidInput(format!("Unknown item status: {}", other))),
        }
    }
}

/// Pipeline stage that produced an item error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPhase {
    Parse,
    Mapping,
    Validation,
    Dedupe,
    Promotion,
}

impl ErrorPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorPhase::Parse => "parse",
            ErrorPhase::Mapping => "mapping",
            ErrorPhase::Validation => "validation",
            ErrorPhase::Dedupe => "dedupe",
            ErrorPhase::Promotion => "promotion",
        }
    }
}

/// One entry of an item's ordered error list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub phase: ErrorPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    /// Machine-readable extras (e.g. `{"diff": "0.01"}` for totals mismatches)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl ItemError {
    pub fn field(phase: ErrorPhase, field: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.to_string()),
            phase,
            code: Some(code.to_string()),
            message: message.into(),
            detail: None,
        }
    }

    pub fn phase(phase: ErrorPhase, code: &str, message: impl Into<String>) -> Self {
        Self {
            field: None,
            phase,
            code: Some(code.to_string()),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Persisted item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub tenant_id: String,
    pub batch_id: Uuid,
    pub idx: i64,
    pub raw: Map<String, Value>,
    pub normalized: Map<String, Value>,
    pub status: ItemStatus,
    pub errors: Vec<ItemError>,
    pub dedupe_hash: Option<String>,
    pub idempotency_key: String,
    pub promoted_to: Option<String>,
    pub promoted_id: Option<String>,
    pub promoted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Normalized-over-raw merged view used by validation, dedupe and
    /// promotion: raw keys first, normalized values win on conflict.
    pub fn merged(&self) -> Map<String, Value> {
        merge_views(&self.raw, &self.normalized)
    }

    /// PROMOTED without a promoted id: left behind by an old defect
    pub fn is_stale_promotion(&self) -> bool {
        self.status == ItemStatus::Promoted && self.promoted_id.is_none()
    }
}

/// Overlay `normalized` on top of `raw`
pub fn merge_views(raw: &Map<String, Value>, normalized: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = raw.clone();
    for (key, value) in normalized {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_happy_path_transitions() {
        assert!(ItemStatus::Pending.can_transition_to(ItemStatus::Ok));
        assert!(ItemStatus::Ok.can_transition_to(ItemStatus::Promoted));
        assert!(ItemStatus::ErrorValidation.can_transition_to(ItemStatus::Ok));
        assert!(ItemStatus::ErrorPromotion.can_transition_to(ItemStatus::Ok));
    }

    #[test]
    fn test_promoted_is_closed_except_repair() {
        for next in [
            ItemStatus::Pending,
            ItemStatus::ErrorValidation,
            ItemStatus::NeedsReview,
            ItemStatus::ErrorPromotion,
            ItemStatus::Skipped,
        ] {
            assert!(!ItemStatus::Promoted.can_transition_to(next), "{next}");
        }
        assert!(ItemStatus::Promoted.can_transition_to(ItemStatus::Ok));
    }

    #[test]
    fn test_cannot_promote_without_validation() {
        assert!(ItemStatus::Pending.transition(ItemStatus::Promoted).is_err());
        assert!(ItemStatus::ErrorValidation.transition(ItemStatus::Promoted).is_err());
        assert!(ItemStatus::NeedsReview.transition(ItemStatus::Promoted).is_err());
    }

    #[test]
    fn test_skipped_is_terminal() {
        for next in [ItemStatus::Ok, ItemStatus::Promoted, ItemStatus::Pending] {
            assert!(!ItemStatus::Skipped.can_transition_to(next));
        }
    }

    #[test]
    fn test_status_serde_uses_screaming_case() {
        let s = serde_json::to_string(&ItemStatus::ErrorValidation).unwrap();
        assert_eq!(s, "\"ERROR_VALIDATION\"");
        assert_eq!("valid".parse::<ItemStatus>().unwrap(), ItemStatus::Ok);
        assert!("weird".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn test_merge_prefers_normalized() {
        let raw = json!({"Monto": "12,50", "amount": "x"}).as_object().unwrap().clone();
        let normalized = json!({"amount": "12.50"}).as_object().unwrap().clone();
        let merged = merge_views(&raw, &normalized);
        assert_eq!(merged["amount"], json!("12.50"));
        assert_eq!(merged["Monto"], json!("12,50"));
    }

    #[test]
    fn test_error_serialization_omits_missing_field() {
        let err = ItemError::phase(ErrorPhase::Promotion, "HANDLER_FAILED", "boom");
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v, json!({"phase": "promotion", "code": "HANDLER_FAILED", "message": "boom"}));
    }
}
