//! Test Helper Utilities
//!
//! Shared setup for tally-imports integration tests: a temp-file SQLite
//! database with the imports schema, in-memory blob storage and a
//! heuristic-only classifier unless a test supplies its own services.

#![allow(dead_code)]

use anyhow::Result;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tempfile::TempDir;

use tally_imports::classification::ClassificationEngine;
use tally_imports::config::ImportsConfig;
use tally_imports::models::{Batch, NewBatch, Origin, SourceType};
use tally_imports::parsers::ocr::{DisabledOcr, OcrService};
use tally_imports::services::MemoryBlobStore;
use tally_imports::AppState;

pub const TENANT: &str = "acme";
pub const OTHER_TENANT: &str = "globex";
pub const USER: &str = "reviewer-1";

/// Test context; the TempDir must outlive the pool
pub struct TestContext {
    pub _dir: TempDir,
    pub state: AppState,
    pub blobs: Arc<MemoryBlobStore>,
}

/// Create app state over a fresh temp-file database
pub async fn create_test_state() -> Result<TestContext> {
    create_test_state_with(ImportsConfig::default()).await
}

pub async fn create_test_state_with(config: ImportsConfig) -> Result<TestContext> {
    build_state(config, Arc::new(ClassificationEngine::heuristic_only()), Arc::new(DisabledOcr)).await
}

/// App state with a specific classifier and OCR backend
pub async fn create_test_state_with_services(
    engine: Arc<ClassificationEngine>,
    ocr: Arc<dyn OcrService>,
) -> Result<TestContext> {
    build_state(ImportsConfig::default(), engine, ocr).await
}

async fn build_state(
    config: ImportsConfig,
    engine: Arc<ClassificationEngine>,
    ocr: Arc<dyn OcrService>,
) -> Result<TestContext> {
    let dir = TempDir::new()?;
    let db = tally_common::db::init_database(&dir.path().join("test_tally.db")).await?;
    tally_imports::db::init_import_tables(&db).await?;

    let blobs = Arc::new(MemoryBlobStore::new());
    let state = AppState::new(db, config, engine, blobs.clone(), ocr);
    Ok(TestContext {
        _dir: dir,
        state,
        blobs,
    })
}

/// Register a batch with a declared type
pub async fn create_batch(state: &AppState, tenant: &str, source_type: SourceType, origin: Origin) -> Batch {
    state
        .ingest
        .create_batch(
            tenant,
            USER,
            NewBatch {
                source_type,
                origin,
                file_key: None,
                mapping_id: None,
            },
        )
        .await
        .expect("create batch")
}

/// Bank statement row with bank-only columns so classification agrees
pub fn bank_row(date: &str, description: &str, amount: &str, reference: &str) -> Map<String, Value> {
    json!({
        "date": date,
        "description": description,
        "amount": amount,
        "balance": "1000.00",
        "account": "ES7620770024003102575766",
        "reference": reference,
        "currency": "EUR",
    })
    .as_object()
    .cloned()
    .expect("object literal")
}

/// Three-row bank CSV whose last row carries a malformed amount
pub const BANK_CSV_ONE_BAD: &str = "\
date,description,amount,balance,account,currency
2024-01-05,Coffee beans,-4.50,995.50,ES7620770024003102575766,EUR
2024-01-06,Salary,1500.00,2495.50,ES7620770024003102575766,EUR
2024-01-07,Refund,abc,2505.50,ES7620770024003102575766,EUR
";

pub async fn item_statuses(state: &AppState, tenant: &str, batch_id: uuid::Uuid) -> Vec<String> {
    state
        .review
        .list_items(tenant, batch_id, None)
        .await
        .expect("list items")
        .into_iter()
        .map(|view| view.item.status.to_string())
        .collect()
}
