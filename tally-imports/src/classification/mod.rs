//! Document classification
//!
//! - [`scoring`]: deterministic keyword/value-rule scorer
//! - [`provider`]: AI capability interface and configuration factory
//! - [`local`], [`hosted`]: provider implementations
//! - [`cache`]: TTL cache wrapping every provider
//! - [`engine`]: heuristic-then-escalate orchestration

pub mod cache;
pub mod engine;
pub mod fingerprint;
pub mod hosted;
pub mod local;
pub mod provider;
pub mod scoring;

pub use engine::{ClassificationEngine, ClassificationInput};
pub use provider::{build_provider, ClassificationProvider, ProviderError, ProviderTelemetry};
pub use scoring::{HeuristicScorer, ScoringWeights};
