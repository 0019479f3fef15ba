//! Classification outcome types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::batch::SourceType;

/// Routing bucket derived from a confidence score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceBucket {
    /// Eligible for promotion after validation
    High,
    /// Needs user confirmation before promotion
    Medium,
    /// Items forced into NEEDS_REVIEW
    Low,
}

impl ConfidenceBucket {
    pub const HIGH_THRESHOLD: f64 = 0.8;
    pub const MEDIUM_THRESHOLD: f64 = 0.5;

    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= Self::HIGH_THRESHOLD {
            ConfidenceBucket::High
        } else if confidence >= Self::MEDIUM_THRESHOLD {
            ConfidenceBucket::Medium
        } else {
            ConfidenceBucket::Low
        }
    }
}

/// Result of classifying one document (transient, snapshotted on the batch)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub doc_type: SourceType,
    pub suggested_parser: Option<String>,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub probabilities: BTreeMap<SourceType, f64>,
    pub reasoning: String,
    pub provider: String,
    pub enhanced_by_ai: bool,
    /// Shape fingerprint of the classified content
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl ClassificationResult {
    pub fn bucket(&self) -> ConfidenceBucket {
        ConfidenceBucket::from_confidence(self.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(ConfidenceBucket::from_confidence(0.8), ConfidenceBucket::High);
        assert_eq!(ConfidenceBucket::from_confidence(0.79), ConfidenceBucket::Medium);
        assert_eq!(ConfidenceBucket::from_confidence(0.5), ConfidenceBucket::Medium);
        assert_eq!(ConfidenceBucket::from_confidence(0.49), ConfidenceBucket::Low);
    }
}
