//! Classification quality gate
//!
//! Macro-averaged precision/recall/F1 of the suggested type against the
//! user-confirmed type over the latest labeled feedback. Below
//! `min_samples` the gate does not judge and lets HIGH results through.

use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::{BTreeMap, BTreeSet};
use tally_common::Result;

use crate::config::QualityConfig;
use crate::db::feedback as feedback_db;
use crate::models::{ClassScore, QualityMetrics, SourceType};

/// (suggested, confirmed) pairs → metrics
pub fn compute_metrics<I>(pairs: I) -> QualityMetrics
where
    I: IntoIterator<Item = (SourceType, SourceType)>,
{
    let pairs: Vec<(SourceType, SourceType)> = pairs.into_iter().collect();
    if pairs.is_empty() {
        return QualityMetrics::default();
    }

    let labels: BTreeSet<SourceType> = pairs.iter().flat_map(|(s, c)| [*s, *c]).collect();
    let mut per_type = BTreeMap::new();
    for label in &labels {
        let tp = pairs.iter().filter(|(s, c)| s == label && c == label).count();
        let predicted = pairs.iter().filter(|(s, _)| s == label).count();
        let support = pairs.iter().filter(|(_, c)| c == label).count();
        let precision = ratio(tp, predicted);
        let recall = ratio(tp, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        per_type.insert(
            *label,
            ClassScore {
                precision,
                recall,
                f1,
                support,
            },
        );
    }

    let n = per_type.len() as f64;
    let correct = pairs.iter().filter(|(s, c)| s == c).count();
    QualityMetrics {
        samples: pairs.len(),
        accuracy: ratio(correct, pairs.len()),
        precision: per_type.values().map(|s| s.precision).sum::<f64>() / n,
        recall: per_type.values().map(|s| s.recall).sum::<f64>() / n,
        f1: per_type.values().map(|s| s.f1).sum::<f64>() / n,
        per_type,
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GateReport {
    pub metrics: QualityMetrics,
    /// Enough samples to judge
    pub judged: bool,
    pub passed: bool,
}

#[derive(Debug, Clone)]
pub struct QualityGate {
    config: QualityConfig,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub fn judge(&self, metrics: QualityMetrics) -> GateReport {
        let judged = metrics.samples >= self.config.min_samples;
        let passed = !judged
            || (metrics.precision >= self.config.min_precision
                && metrics.recall >= self.config.min_recall
                && metrics.f1 >= self.config.min_f1);
        GateReport {
            metrics,
            judged,
            passed,
        }
    }

    /// Judge the latest labeled sample
    pub async fn evaluate(&self, conn: &mut SqliteConnection) -> Result<GateReport> {
        let sample = feedback_db::latest_sample(conn, self.config.sample_size as i64).await?;
        let metrics = compute_metrics(sample.iter().map(|e| (e.suggested, e.confirmed)));
        let report = self.judge(metrics);
        if report.judged && !report.passed {
            tracing::warn!(
                samples = report.metrics.samples,
                precision = report.metrics.precision,
                recall = report.metrics.recall,
                f1 = report.metrics.f1,
                "Classification quality gate failing; HIGH results require confirmation"
            );
        }
        Ok(report)
    }
}
