//! Import batch: the tenant-scoped unit of one uploaded or posted source
//!
//! Batch status is a derived view over item status counts (see
//! [`BatchStatus::aggregate`]); it is never set by hand except for the
//! PENDING/PARSING bookkeeping around ingestion and the admin reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tally_common::{Error, Result};
use uuid::Uuid;

use super::item::ItemStatus;

/// Destination family of a batch; also the document type candidates the
/// classifier scores against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Invoices,
    Bank,
    Expenses,
    Products,
    Recipes,
    Generic,
}

impl SourceType {
    pub const ALL: [SourceType; 6] = [
        SourceType::Invoices,
        SourceType::Bank,
        SourceType::Expenses,
        SourceType::Products,
        SourceType::Recipes,
        SourceType::Generic,
    ];

    /// Types with a dedicated parser and vocabulary (generic excluded)
    pub const SPECIFIC: [SourceType; 5] = [
        SourceType::Invoices,
        SourceType::Bank,
        SourceType::Expenses,
        SourceType::Products,
        SourceType::Recipes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Invoices => "invoices",
            SourceType::Bank => "bank",
            SourceType::Expenses => "expenses",
            SourceType::Products => "products",
            SourceType::Recipes => "recipes",
            SourceType::Generic => "generic",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "invoices" | "invoice" | "facturas" | "factura" => Ok(SourceType::Invoices),
            "bank" | "banks" | "bank_statement" | "banco" => Ok(SourceType::Bank),
            "expenses" | "expense" | "receipts" | "receipt" | "gastos" => Ok(SourceType::Expenses),
            "products" | "product" | "productos" => Ok(SourceType::Products),
            "recipes" | "recipe" | "recetas" => Ok(SourceType::Recipes),
            "generic" | "" => Ok(SourceType::Generic),
            other => Err(Error::InvalidInput(format!("Unknown source type: {}", other))),
        }
    }
}

/// How the batch content arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Excel,
    Ocr,
    Api,
    Csv,
    Xml,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Excel => "excel",
            Origin::Ocr => "ocr",
            Origin::Api => "api",
            Origin::Csv => "csv",
            Origin::Xml => "xml",
        }
    }
}

impl FromStr for Origin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "excel" | "xlsx" | "xls" | "spreadsheet" => Ok(Origin::Excel),
            "ocr" | "pdf" | "image" => Ok(Origin::Ocr),
            "api" | "json" => Ok(Origin::Api),
            "csv" => Ok(Origin::Csv),
            "xml" => Ok(Origin::Xml),
            other => Err(Error::InvalidInput(format!("Unknown origin: {}", other))),
        }
    }
}

/// Batch lifecycle state
///
/// The status only aggregates item outcomes. A batch whose classification
/// still awaits confirmation (`requires_confirmation` set, no
/// `confirmed_at`) reports READY once its items validate, yet promotion
/// refuses it with a conflict until it is confirmed. Check
/// [`Batch::awaiting_confirmation`] before treating READY as promotable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Registered, no items yet
    Pending,
    /// Ingestion in progress
    Parsing,
    /// Ingestion produced zero items
    Empty,
    /// Every item is OK (promotable unless confirmation is pending)
    Ready,
    /// Mixture of outcomes
    Partial,
    /// Every item failed
    Error,
    /// Every item was promoted (or skipped as an already-promoted duplicate)
    Promoted,
    /// Low-confidence classification awaiting confirmation
    NeedsReview,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Parsing => "PARSING",
            BatchStatus::Empty => "EMPTY",
            BatchStatus::Ready => "READY",
            BatchStatus::Partial => "PARTIAL",
            BatchStatus::Error => "ERROR",
            BatchStatus::Promoted => "PROMOTED",
            BatchStatus::NeedsReview => "NEEDS_REVIEW",
        }
    }

    /// Terminal for the normal flow; only an admin reset leaves these
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Promoted | BatchStatus::Empty | BatchStatus::Error
        )
    }

    /// Derive batch status from item status counts.
    ///
    /// Rules, first match wins:
    /// 1. no items → EMPTY
    /// 2. every item PROMOTED or SKIPPED → PROMOTED
    /// 3. every item in an error state → ERROR
    /// 4. any item still PENDING → PARSING
    /// 5. any item NEEDS_REVIEW → NEEDS_REVIEW
    /// 6. every item OK → READY
    /// 7. otherwise → PARTIAL
    pub fn aggregate(counts: &StatusCounts) -> BatchStatus {
        let total = counts.total();
        if total == 0 {
            return BatchStatus::Empty;
        }
        if counts.promoted + counts.skipped == total {
            return BatchStatus::Promoted;
        }
        if counts.errors() == total {
            return BatchStatus::Error;
        }
        if counts.pending > 0 {
            return BatchStatus::Parsing;
        }
        if counts.needs_review > 0 {
            return BatchStatus::NeedsReview;
        }
        if counts.ok == total {
            return BatchStatus::Ready;
        }
        BatchStatus::Partial
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = Error;

    /// Accepts current names plus legacy spellings; rejects anything else
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(BatchStatus::Pending),
            "PARSING" | "INGESTED" => Ok(BatchStatus::Parsing),
            "EMPTY" => Ok(BatchStatus::Empty),
            "READY" | "VALIDATED" => Ok(BatchStatus::Ready),
            "PARTIAL" => Ok(BatchStatus::Partial),
            "ERROR" | "FAILED" => Ok(BatchStatus::Error),
            "PROMOTED" => Ok(BatchStatus::Promoted),
            "NEEDS_REVIEW" | "REVIEW" => Ok(BatchStatus::NeedsReview),
            other => Err(Error::InvalidInput(format!("Unknown batch status: {}", other))),
        }
    }
}

/// Item status histogram for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub ok: usize,
    pub error_validation: usize,
    pub needs_review: usize,
    pub promoted: usize,
    pub error_promotion: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending
            + self.ok
            + self.error_validation
            + self.needs_review
            + self.promoted
            + self.error_promotion
            + self.skipped
    }

    pub fn errors(&self) -> usize {
        self.error_validation + self.error_promotion
    }

    pub fn add(&mut self, status: ItemStatus, n: usize) {
        match status {
            ItemStatus::Pending => self.pending += n,
            ItemStatus::Ok => self.ok += n,
            ItemStatus::ErrorValidation => self.error_validation += n,
            ItemStatus::NeedsReview => self.needs_review += n,
            ItemStatus::Promoted => self.promoted += n,
            ItemStatus::ErrorPromotion => self.error_promotion += n,
            ItemStatus::Skipped => self.skipped += n,
        }
    }

    pub fn from_statuses<I: IntoIterator<Item = ItemStatus>>(statuses: I) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.add(status, 1);
        }
        counts
    }
}

/// Persisted batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub tenant_id: String,
    pub source_type: SourceType,
    pub origin: Origin,
    pub file_key: Option<String>,
    pub mapping_id: Option<Uuid>,
    pub status: BatchStatus,
    pub suggested_parser: Option<String>,
    pub classification_confidence: Option<f64>,
    pub ai_enhanced: bool,
    /// MEDIUM confidence or a failing quality gate: promotion waits for a user
    pub requires_confirmation: bool,
    pub confirmed_by: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Last classification result, kept for diagnostics
    pub classification: Option<serde_json::Value>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for registering a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBatch {
    pub source_type: SourceType,
    pub origin: Origin,
    #[serde(default)]
    pub file_key: Option<String>,
    #[serde(default)]
    pub mapping_id: Option<Uuid>,
}

impl Batch {
    pub fn new(tenant_id: &str, created_by: &str, params: NewBatch) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            source_type: params.source_type,
            origin: params.origin,
            file_key: params.file_key,
            mapping_id: params.mapping_id,
            status: BatchStatus::Pending,
            suggested_parser: None,
            classification_confidence: None,
            ai_enhanced: false,
            requires_confirmation: false,
            confirmed_by: None,
            confirmed_at: None,
            classification: None,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Promotion is blocked until someone confirms a MEDIUM classification
    pub fn awaiting_confirmation(&self) -> bool {
        self.requires_confirmation && self.confirmed_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(ok: usize, errors: usize, promoted: usize) -> StatusCounts {
        StatusCounts {
            ok,
            error_validation: errors,
            promoted,
            ..Default::default()
        }
    }

    #[test]
    fn test_aggregate_empty() {
        assert_eq!(BatchStatus::aggregate(&StatusCounts::default()), BatchStatus::Empty);
    }

    #[test]
    fn test_aggregate_ready_iff_all_ok() {
        assert_eq!(BatchStatus::aggregate(&counts(3, 0, 0)), BatchStatus::Ready);
        assert_ne!(BatchStatus::aggregate(&counts(3, 1, 0)), BatchStatus::Ready);
    }

    #[test]
    fn test_aggregate_partial_on_mix() {
        assert_eq!(BatchStatus::aggregate(&counts(2, 1, 0)), BatchStatus::Partial);
        assert_eq!(BatchStatus::aggregate(&counts(1, 0, 2)), BatchStatus::Partial);
    }

    #[test]
    fn test_aggregate_error_when_all_failed() {
        let mut c = counts(0, 2, 0);
        c.error_promotion = 1;
        assert_eq!(BatchStatus::aggregate(&c), BatchStatus::Error);
    }

    #[test]
    fn test_aggregate_promoted_counts_skips() {
        let mut c = counts(0, 0, 4);
        c.skipped = 1;
        assert_eq!(BatchStatus::aggregate(&c), BatchStatus::Promoted);
    }

    #[test]
    fn test_aggregate_needs_review_wins_over_mix() {
        let mut c = counts(2, 1, 0);
        c.needs_review = 1;
        assert_eq!(BatchStatus::aggregate(&c), BatchStatus::NeedsReview);
    }

    #[test]
    fn test_legacy_status_names_normalized() {
        assert_eq!("validated".parse::<BatchStatus>().unwrap(), BatchStatus::Ready);
        assert_eq!("INGESTED".parse::<BatchStatus>().unwrap(), BatchStatus::Parsing);
        assert!("bogus".parse::<BatchStatus>().is_err());
    }

    #[test]
    fn test_source_type_aliases() {
        assert_eq!("receipts".parse::<SourceType>().unwrap(), SourceType::Expenses);
        assert_eq!("Invoice".parse::<SourceType>().unwrap(), SourceType::Invoices);
        assert!("payroll".parse::<SourceType>().is_err());
    }
}
