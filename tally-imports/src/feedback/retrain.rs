//! Heuristic retraining from confirmed feedback
//!
//! New keyword weights come from how often each header token appeared
//! under each confirmed type. The candidate is evaluated against the same
//! labeled sample as the active weights and pinned only when its macro F1
//! does not regress.

use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tally_common::Result;
use tracing::{info, warn};

use super::quality_gate::compute_metrics;
use crate::classification::{ClassificationEngine, HeuristicScorer, ScoringWeights};
use crate::config::QualityConfig;
use crate::db::feedback as feedback_db;
use crate::models::{ClassifierSnapshot, FeedbackEvent, QualityMetrics, SourceType};
use crate::utils::begin_monitored;

/// Occurrences a token needs before it moves any weight
const MIN_TOKEN_SUPPORT: usize = 2;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetrainOutcome {
    NotEnoughFeedback {
        available: usize,
        required: usize,
    },
    Rejected {
        version: i64,
        candidate: QualityMetrics,
        baseline: QualityMetrics,
    },
    Pinned {
        version: i64,
        candidate: QualityMetrics,
        baseline: QualityMetrics,
    },
}

/// Blend token/type co-occurrence shares into `base`
pub fn derive_weights(base: &ScoringWeights, events: &[FeedbackEvent]) -> ScoringWeights {
    let mut counts: BTreeMap<&str, BTreeMap<SourceType, usize>> = BTreeMap::new();
    for event in events.iter().filter(|e| e.confirmed != SourceType::Generic) {
        for token in &event.header_tokens {
            *counts.entry(token.as_str()).or_default().entry(event.confirmed).or_insert(0) += 1;
        }
    }

    let mut weights = base.clone();
    for (token, per_type) in counts {
        let total: usize = per_type.values().sum();
        if total < MIN_TOKEN_SUPPORT {
            continue;
        }
        for source_type in SourceType::SPECIFIC {
            let share = per_type.get(&source_type).copied().unwrap_or(0) as f64 / total as f64;
            let table = weights.keywords.entry(source_type).or_default();
            match (table.get(token).copied(), share > 0.0) {
                (Some(existing), true) => {
                    table.insert(token.to_string(), round4((existing + share) / 2.0));
                }
                (None, true) => {
                    table.insert(token.to_string(), round4(share));
                }
                (Some(existing), false) => {
                    table.insert(token.to_string(), round4(existing * 0.5));
                }
                (None, false) => {}
            }
        }
    }
    weights
}

/// Re-score each event's header tokens with `weights`
pub fn evaluate_weights(weights: &ScoringWeights, events: &[FeedbackEvent]) -> QualityMetrics {
    let scorer = HeuristicScorer::new(weights.clone());
    compute_metrics(events.iter().map(|event| {
        let record: Map<String, Value> = event
            .header_tokens
            .iter()
            .map(|t| (t.clone(), Value::Null))
            .collect();
        let predicted = scorer.score_records(&[&record], &[]).doc_type;
        (predicted, event.confirmed)
    }))
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

pub struct Retrainer {
    config: QualityConfig,
}

impl Retrainer {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub async fn retrain(&self, db: &SqlitePool, engine: &ClassificationEngine) -> Result<RetrainOutcome> {
        let (available, sample) = {
            let mut conn = db.acquire().await?;
            let available = feedback_db::count_feedback(&mut conn).await? as usize;
            if available < self.config.retrain_min_feedback {
                info!(available, required = self.config.retrain_min_feedback, "Retraining skipped");
                return Ok(RetrainOutcome::NotEnoughFeedback {
                    available,
                    required: self.config.retrain_min_feedback,
                });
            }
            let sample = feedback_db::latest_sample(&mut conn, self.config.sample_size as i64).await?;
            (available, sample)
        };

        let current = engine.weights();
        let baseline = evaluate_weights(&current, &sample);
        let mut candidate_weights = derive_weights(&current, &sample);
        let candidate = evaluate_weights(&candidate_weights, &sample);
        let accepted = candidate.f1 >= baseline.f1;

        let mut tx = begin_monitored(db, "feedback::retrain").await?;
        if feedback_db::get_snapshot(tx.conn()?, current.version).await?.is_none() {
            let nothing_pinned = feedback_db::pinned_snapshot(tx.conn()?).await?.is_none();
            feedback_db::insert_snapshot(
                tx.conn()?,
                &ClassifierSnapshot {
                    version: current.version,
                    weights: current.clone(),
                    metrics: Some(baseline.clone()),
                    validated: true,
                    pinned: nothing_pinned,
                    created_at: chrono::Utc::now(),
                },
            )
            .await?;
        }

        let version = feedback_db::max_snapshot_version(tx.conn()?).await? + 1;
        candidate_weights.version = version;
        feedback_db::insert_snapshot(
            tx.conn()?,
            &ClassifierSnapshot {
                version,
                weights: candidate_weights.clone(),
                metrics: Some(candidate.clone()),
                validated: accepted,
                pinned: false,
                created_at: chrono::Utc::now(),
            },
        )
        .await?;
        if accepted {
            feedback_db::pin_snapshot(tx.conn()?, version).await?;
        }
        tx.commit().await?;

        if accepted {
            engine.set_weights(candidate_weights);
            info!(version, available, f1 = candidate.f1, baseline_f1 = baseline.f1, "Retrained weights pinned");
            Ok(RetrainOutcome::Pinned {
                version,
                candidate,
                baseline,
            })
        } else {
            warn!(version, f1 = candidate.f1, baseline_f1 = baseline.f1, "Retrained weights regress; not pinned");
            Ok(RetrainOutcome::Rejected {
                version,
                candidate,
                baseline,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(tokens: &[&str], suggested: SourceType, confirmed: SourceType) -> FeedbackEvent {
        FeedbackEvent {
            id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            batch_id: None,
            fingerprint: None,
            header_tokens: tokens.iter().map(|t| t.to_string()).collect(),
            suggested,
            confirmed,
            confidence: 0.4,
            heuristic_version: 1,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_unknown_token_learned() {
        let events = vec![
            event(&["zorblat", "fecha"], SourceType::Invoices, SourceType::Bank),
            event(&["zorblat", "importe"], SourceType::Invoices, SourceType::Bank),
        ];
        let weights = derive_weights(&ScoringWeights::defaults(), &events);
        assert_eq!(weights.keywords[&SourceType::Bank]["zorblat"], 1.0);
        assert!(!weights.keywords[&SourceType::Invoices].contains_key("zorblat"));
    }

    #[test]
    fn test_single_occurrence_ignored() {
        let events = vec![event(&["zorblat"], SourceType::Bank, SourceType::Bank)];
        let weights = derive_weights(&ScoringWeights::defaults(), &events);
        assert!(!weights.keywords[&SourceType::Bank].contains_key("zorblat"));
    }

    #[test]
    fn test_learned_weights_do_not_regress_on_their_sample() {
        let events: Vec<FeedbackEvent> = (0..6)
            .map(|_| event(&["zorblat", "quuxer"], SourceType::Generic, SourceType::Products))
            .collect();
        let base = ScoringWeights::defaults();
        let candidate = derive_weights(&base, &events);
        assert!(evaluate_weights(&candidate, &events).f1 >= evaluate_weights(&base, &events).f1);
        assert_eq!(evaluate_weights(&candidate, &events).accuracy, 1.0);
    }
}
