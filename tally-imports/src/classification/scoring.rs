//! Deterministic heuristic scoring
//!
//! Each candidate type gets a raw score from keyword weights over the
//! folded field names plus value rules over a sample of records. Raw scores
//! are squared and normalised into probabilities (squaring sharpens a clear
//! winner). Confidence is the winner's probability scaled by how much
//! evidence backed it: fewer than [`FULL_EVIDENCE`] independent signals
//! reduce it proportionally.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::mapping::aliases::default_aliases;
use crate::mapping::normalize::{fold_key, fold_tokens, value_text};
use crate::mapping::values::{is_date_like, parse_amount};
use crate::models::{ClassificationResult, SourceType};
use crate::parsers::vocabulary;

pub const HEURISTIC_PROVIDER: &str = "heuristic";

/// Independent signals needed for undiminished confidence
pub const FULL_EVIDENCE: f64 = 3.0;

/// Records inspected by value rules
const VALUE_SAMPLE: usize = 10;

/// Minimum keyword weight for a column to count as a signal
const SIGNAL_WEIGHT: f64 = 0.25;

static IBAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{2}\d{2}[A-Z0-9 ]{10,30}$").expect("static regex"));
static BARCODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{8}|\d{12}|\d{13}|\d{14})$").expect("static regex"));
static SKU: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{2,5}-?\d{2,6}(-[A-Z0-9]{1,4})?$").expect("static regex"));
static INVOICE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{3}-\d{3}-\d{6,9}|[A-Z]{1,3}-?\d{4,10}|F\d{3,}-\d+)$").expect("static regex")
});

/// Keyword weights per candidate type; retraining produces new versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub version: i64,
    pub keywords: BTreeMap<SourceType, BTreeMap<String, f64>>,
    /// Multiplier for value-rule evidence
    pub value_rule_weight: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::defaults()
    }
}

impl ScoringWeights {
    /// Built-in weights: domain vocabulary at 1.0, canonical aliases at
    /// 1/n where n is the number of types sharing the alias
    pub fn defaults() -> Self {
        let mut alias_owners: HashMap<&str, usize> = HashMap::new();
        for source_type in SourceType::SPECIFIC {
            let mut seen = std::collections::HashSet::new();
            for (_, aliases) in default_aliases(source_type) {
                for alias in *aliases {
                    if seen.insert(*alias) {
                        *alias_owners.entry(*alias).or_insert(0) += 1;
                    }
                }
            }
        }

        let mut keywords = BTreeMap::new();
        for source_type in SourceType::SPECIFIC {
            let mut weights: BTreeMap<String, f64> = BTreeMap::new();
            for (_, aliases) in default_aliases(source_type) {
                for alias in *aliases {
                    let owners = alias_owners.get(alias).copied().unwrap_or(1).max(1);
                    weights.insert(alias.to_string(), 1.0 / owners as f64);
                }
            }
            for keyword in vocabulary::keywords(source_type) {
                weights.insert(keyword.to_string(), 1.0);
            }
            keywords.insert(source_type, weights);
        }

        Self {
            version: 1,
            keywords,
            value_rule_weight: 1.0,
        }
    }

    /// Weight of a folded column name for a type: exact match, else the
    /// best of its tokens at half weight
    pub fn weight(&self, source_type: SourceType, folded: &str) -> f64 {
        let Some(table) = self.keywords.get(&source_type) else {
            return 0.0;
        };
        if let Some(w) = table.get(folded) {
            return *w;
        }
        fold_tokens(folded)
            .iter()
            .filter_map(|t| table.get(t))
            .fold(0.0, |acc: f64, w| acc.max(*w))
            * 0.5
    }
}

/// Per-type evidence collected while scoring
#[derive(Debug, Default, Clone)]
struct Evidence {
    raw: f64,
    signals: usize,
    matched: Vec<String>,
    rules: Vec<&'static str>,
}

/// Keyword/value-rule scorer
#[derive(Debug, Clone, Default)]
pub struct HeuristicScorer {
    weights: ScoringWeights,
}

impl HeuristicScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Score structured records (field names + values)
    pub fn score_records(&self, records: &[&Map<String, Value>], candidates: &[SourceType]) -> ClassificationResult {
        let mut headers: Vec<String> = records
            .iter()
            .take(VALUE_SAMPLE)
            .flat_map(|r| r.keys().map(|k| fold_key(k)))
            .filter(|k| !k.is_empty())
            .collect();
        headers.sort();
        headers.dedup();
        let sample: Vec<&Map<String, Value>> = records.iter().take(VALUE_SAMPLE).copied().collect();
        self.score(&headers, &sample, candidates)
    }

    /// Score free text (OCR output, AI fallback): words act as columns
    pub fn score_text(&self, text: &str, candidates: &[SourceType]) -> ClassificationResult {
        let mut tokens = fold_tokens(text);
        tokens.sort();
        tokens.dedup();
        self.score(&tokens, &[], candidates)
    }

    fn score(
        &self,
        headers: &[String],
        sample: &[&Map<String, Value>],
        candidates: &[SourceType],
    ) -> ClassificationResult {
        let candidates: Vec<SourceType> = if candidates.is_empty() {
            SourceType::SPECIFIC.to_vec()
        } else {
            candidates.iter().copied().filter(|c| *c != SourceType::Generic).collect()
        };

        let mut evidence: BTreeMap<SourceType, Evidence> = BTreeMap::new();
        for candidate in &candidates {
            let mut ev = Evidence::default();
            for header in headers {
                let w = self.weights.weight(*candidate, header);
                if w > 0.0 {
                    ev.raw += w;
                    if w >= SIGNAL_WEIGHT {
                        ev.signals += 1;
                        ev.matched.push(header.clone());
                    }
                }
            }
            for (rule, share) in value_rules(*candidate, sample) {
                if share > 0.0 {
                    ev.raw += 2.0 * share * self.weights.value_rule_weight;
                    ev.signals += 1;
                    ev.rules.push(rule);
                }
            }
            evidence.insert(*candidate, ev);
        }

        let squared_total: f64 = evidence.values().map(|e| e.raw * e.raw).sum();
        let mut probabilities: BTreeMap<SourceType, f64> = BTreeMap::new();

        if squared_total <= f64::EPSILON {
            for candidate in &candidates {
                probabilities.insert(*candidate, 0.0);
            }
            probabilities.insert(SourceType::Generic, 1.0);
            return ClassificationResult {
                doc_type: SourceType::Generic,
                suggested_parser: None,
                confidence: 0.0,
                probabilities,
                reasoning: "No vocabulary or value-rule evidence".to_string(),
                provider: HEURISTIC_PROVIDER.to_string(),
                enhanced_by_ai: false,
                fingerprint: None,
            };
        }

        for (t, e) in &evidence {
            probabilities.insert(*t, round4(e.raw * e.raw / squared_total));
        }

        // Highest probability; candidate order breaks ties
        let (top, top_ev) = candidates
            .iter()
            .filter_map(|c| evidence.get(c).map(|e| (*c, e)))
            .fold(None::<(SourceType, &Evidence)>, |best, (c, e)| match best {
                Some((_, b)) if b.raw >= e.raw => best,
                _ => Some((c, e)),
            })
            .map(|(c, e)| (c, e.clone()))
            .unwrap_or((SourceType::Generic, Evidence::default()));

        let p_top = probabilities.get(&top).copied().unwrap_or(0.0);
        let coverage = (top_ev.signals as f64 / FULL_EVIDENCE).min(1.0);
        let confidence = round4(p_top * coverage);

        let mut reasoning = format!(
            "{} p={:.2} from {} signal(s)",
            top,
            p_top,
            top_ev.signals
        );
        if !top_ev.matched.is_empty() {
            reasoning.push_str(&format!("; columns: {}", top_ev.matched.join(", ")));
        }
        if !top_ev.rules.is_empty() {
            reasoning.push_str(&format!("; value rules: {}", top_ev.rules.join(", ")));
        }

        ClassificationResult {
            doc_type: top,
            suggested_parser: None,
            confidence,
            probabilities,
            reasoning,
            provider: HEURISTIC_PROVIDER.to_string(),
            enhanced_by_ai: false,
            fingerprint: None,
        }
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Share of sampled records satisfying each value rule of a type
fn value_rules(source_type: SourceType, sample: &[&Map<String, Value>]) -> Vec<(&'static str, f64)> {
    if sample.is_empty() {
        return Vec::new();
    }
    let n = sample.len() as f64;
    let share = |pred: &dyn Fn(&Map<String, Value>) -> bool| {
        sample.iter().filter(|r| pred(r)).count() as f64 / n
    };
    let any_text = |r: &Map<String, Value>, re: &Regex| {
        r.values().any(|v| v.is_string() && re.is_match(&value_text(v)))
    };

    match source_type {
        SourceType::Bank => vec![
            ("iban", share(&|r| any_text(r, &IBAN))),
            (
                "dated_signed_amount",
                share(&|r| {
                    r.values().any(is_date_like)
                        && r.values().any(|v| {
                            !is_date_like(v) && parse_amount(v).map(|d| d.is_sign_negative()).unwrap_or(false)
                        })
                }),
            ),
        ],
        SourceType::Products => vec![
            ("barcode", share(&|r| any_text(r, &BARCODE))),
            ("sku", share(&|r| any_text(r, &SKU))),
        ],
        SourceType::Invoices => vec![("invoice_number", share(&|r| any_text(r, &INVOICE_NUMBER)))],
        _ => Vec::new(),
    }
}
