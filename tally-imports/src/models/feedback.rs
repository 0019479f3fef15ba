//! Classification feedback and classifier snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::batch::SourceType;
use crate::classification::ScoringWeights;

/// Heuristic suggestion vs user-confirmed truth for one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub id: Uuid,
    pub tenant_id: String,
    pub batch_id: Option<Uuid>,
    pub fingerprint: Option<String>,
    /// Folded header/field names of the classified content
    pub header_tokens: Vec<String>,
    pub suggested: SourceType,
    pub confirmed: SourceType,
    pub confidence: f64,
    pub heuristic_version: i64,
    pub created_at: DateTime<Utc>,
}

impl FeedbackEvent {
    pub fn is_correct(&self) -> bool {
        self.suggested == self.confirmed
    }
}

/// Feedback payload from the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeedback {
    #[serde(default)]
    pub batch_id: Option<Uuid>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub header_tokens: Vec<String>,
    pub suggested: SourceType,
    pub confirmed: SourceType,
    #[serde(default)]
    pub confidence: f64,
}

/// Per-type precision/recall over a labeled sample
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassScore {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Macro-averaged classification quality
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub samples: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    #[serde(default)]
    pub per_type: BTreeMap<SourceType, ClassScore>,
}

/// A versioned set of scoring weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSnapshot {
    pub version: i64,
    pub weights: ScoringWeights,
    pub metrics: Option<QualityMetrics>,
    /// Passed evaluation; only validated snapshots may be pinned
    pub validated: bool,
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
}
