//! Service layer: orchestrates parsing, classification, validation and
//! persistence behind the HTTP handlers

pub mod admin_service;
pub mod blob_store;
pub mod ingest_service;
pub mod pipeline;
pub mod review_service;

pub use admin_service::{AdminService, PurgeReport, ReconcileReport, ResetReport};
pub use blob_store::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use ingest_service::{IngestReport, IngestService, RevalidateReport};
pub use pipeline::RecordPipeline;
pub use review_service::{ConfirmReport, ConfirmRequest, ItemView, ReviewService};
