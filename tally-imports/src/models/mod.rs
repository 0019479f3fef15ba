//! Data models for the imports subsystem
//!
//! - Batch/item lifecycle state machines
//! - Mapping templates
//! - Audit records (corrections, lineage)
//! - Classification and feedback types

pub mod audit;
pub mod batch;
pub mod classification;
pub mod feedback;
pub mod item;
pub mod mapping;

pub use audit::{Correction, Lineage};
pub use batch::{Batch, BatchStatus, NewBatch, Origin, SourceType, StatusCounts};
pub use classification::{ClassificationResult, ConfidenceBucket};
pub use feedback::{ClassScore, ClassifierSnapshot, FeedbackEvent, NewFeedback, QualityMetrics};
pub use item::{merge_views, ErrorPhase, Item, ItemError, ItemStatus};
pub use mapping::{Mapping, MappingInput, Transform};
