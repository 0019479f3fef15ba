//! Ingestion: staging, idempotency, routing and revalidation

mod helpers;

use async_trait::async_trait;
use helpers::*;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tally_imports::classification::{
    ClassificationEngine, ClassificationProvider, ProviderError, ProviderTelemetry, ScoringWeights,
};
use tally_imports::models::{BatchStatus, ClassificationResult, ItemStatus, Origin, SourceType};
use tally_imports::parsers::ocr::{OcrError, OcrOutput, OcrService};
use tally_imports::parsers::FileInput;
use tokio_util::sync::CancellationToken;

/// Scanned invoice whose text has no total line
const SCAN_WITHOUT_TOTAL: &str =
    "ACME S.A.\nRUC: 1790012345001\nFACTURA No. 001-002-000123\nFecha: 15/03/2024\nSubtotal: 100.00\nIVA 12%: 12.00\n";

struct ScanOcr;

#[async_trait]
impl OcrService for ScanOcr {
    async fn extract(&self, _file: &FileInput) -> Result<OcrOutput, OcrError> {
        Ok(OcrOutput {
            text: SCAN_WITHOUT_TOTAL.to_string(),
            pages: 1,
            confidence: 0.88,
        })
    }
}

/// Provider that only extracts; records which fields it was asked for
struct ExtractingProvider {
    fail: bool,
    requested: Mutex<Vec<String>>,
}

#[async_trait]
impl ClassificationProvider for ExtractingProvider {
    fn name(&self) -> &str {
        "extracting"
    }

    async fn classify_document(
        &self,
        _text: &str,
        _candidates: &[SourceType],
        _metadata: Option<&Map<String, Value>>,
    ) -> Result<ClassificationResult, ProviderError> {
        Err(ProviderError::Request("classification not offered".into()))
    }

    async fn extract_fields(
        &self,
        _text: &str,
        _doc_type: SourceType,
        fields: &[String],
    ) -> Result<Map<String, Value>, ProviderError> {
        self.requested.lock().unwrap().extend(fields.iter().cloned());
        if self.fail {
            return Err(ProviderError::Request("extraction unavailable".into()));
        }
        Ok(json!({"total": "112.00", "invoice_number": "WRONG-1"}).as_object().cloned().unwrap())
    }

    fn get_telemetry(&self) -> ProviderTelemetry {
        ProviderTelemetry::default()
    }
}

async fn ingest_scan(fail: bool) -> (TestContext, Arc<ExtractingProvider>, Map<String, Value>) {
    let provider = Arc::new(ExtractingProvider {
        fail,
        requested: Mutex::new(Vec::new()),
    });
    let engine = ClassificationEngine::new(
        ScoringWeights::defaults(),
        Some(provider.clone() as Arc<dyn ClassificationProvider>),
        0.7,
        Duration::from_secs(2),
    );
    let ctx = create_test_state_with_services(Arc::new(engine), Arc::new(ScanOcr)).await.unwrap();
    let batch = create_batch(&ctx.state, TENANT, SourceType::Invoices, Origin::Ocr).await;

    let file = FileInput::new("scan.pdf", b"%PDF-1.7\n...".to_vec());
    let report = ctx
        .state
        .ingest
        .ingest_file(TENANT, batch.id, file, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.parser.as_deref(), Some("ocr"));

    let items = ctx.state.review.list_items(TENANT, batch.id, None).await.unwrap();
    assert_eq!(items.len(), 1);
    let raw = items[0].item.raw.clone();
    (ctx, provider, raw)
}

#[tokio::test]
async fn test_bank_csv_with_one_bad_amount_is_partial() {
    let ctx = create_test_state().await.unwrap();
    let batch = create_batch(&ctx.state, TENANT, SourceType::Bank, Origin::Csv).await;

    let file = FileInput::new("statement.csv", BANK_CSV_ONE_BAD.as_bytes().to_vec());
    let report = ctx
        .state
        .ingest
        .ingest_file(TENANT, batch.id, file, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.inserted, 3);
    assert_eq!(report.status, BatchStatus::Partial);
    assert_eq!(report.source_type, SourceType::Bank);
    assert!(!report.requires_confirmation);

    let items = ctx.state.review.list_items(TENANT, batch.id, None).await.unwrap();
    let ok = items.iter().filter(|v| v.item.status == ItemStatus::Ok).count();
    let bad: Vec<_> = items
        .iter()
        .filter(|v| v.item.status == ItemStatus::ErrorValidation)
        .collect();
    assert_eq!(ok, 2);
    assert_eq!(bad.len(), 1);
    assert_eq!(bad[0].item.idx, 2);
    assert_eq!(bad[0].item.errors[0].field.as_deref(), Some("amount"));

    // Stored file is kept under a content-addressed key
    assert_eq!(ctx.blobs.len().await, 1);
    assert!(report.file_key.starts_with("acme/"));
    assert!(report.file_key.ends_with("/statement.csv"));
}

#[tokio::test]
async fn test_ingesting_same_file_twice_inserts_nothing_new() {
    let ctx = create_test_state().await.unwrap();
    let batch = create_batch(&ctx.state, TENANT, SourceType::Bank, Origin::Csv).await;
    let cancel = CancellationToken::new();

    let file = FileInput::new("statement.csv", BANK_CSV_ONE_BAD.as_bytes().to_vec());
    let first = ctx.state.ingest.ingest_file(TENANT, batch.id, file.clone(), &cancel).await.unwrap();
    let second = ctx.state.ingest.ingest_file(TENANT, batch.id, file, &cancel).await.unwrap();

    assert_eq!(first.inserted, 3);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.already_ingested, 3);
    assert_eq!(first.file_key, second.file_key);
    assert_eq!(item_statuses(&ctx.state, TENANT, batch.id).await.len(), 3);
}

#[tokio::test]
async fn test_different_file_for_same_batch_conflicts() {
    let ctx = create_test_state().await.unwrap();
    let batch = create_batch(&ctx.state, TENANT, SourceType::Bank, Origin::Csv).await;
    let cancel = CancellationToken::new();

    let first = FileInput::new("a.csv", BANK_CSV_ONE_BAD.as_bytes().to_vec());
    ctx.state.ingest.ingest_file(TENANT, batch.id, first, &cancel).await.unwrap();

    let other = FileInput::new("b.csv", b"date,amount\n2024-01-01,1.00\n".to_vec());
    let err = ctx.state.ingest.ingest_file(TENANT, batch.id, other, &cancel).await.unwrap_err();
    assert!(matches!(err, tally_common::Error::Conflict(_)), "{err}");
}

#[tokio::test]
async fn test_rows_ingest_is_idempotent_per_position() {
    let ctx = create_test_state().await.unwrap();
    let batch = create_batch(&ctx.state, TENANT, SourceType::Bank, Origin::Api).await;
    let cancel = CancellationToken::new();
    let rows = vec![
        bank_row("2024-02-01", "Rent", "-900.00", "R-1"),
        bank_row("2024-02-02", "Invoice 17", "250.00", "R-2"),
    ];

    let first = ctx
        .state
        .ingest
        .ingest_rows(TENANT, batch.id, rows.clone(), None, &cancel)
        .await
        .unwrap();
    let again = ctx
        .state
        .ingest
        .ingest_rows(TENANT, batch.id, rows, None, &cancel)
        .await
        .unwrap();

    assert_eq!(first.inserted, 2);
    assert_eq!(first.status, BatchStatus::Ready);
    assert_eq!(again.inserted, 0);
    assert_eq!(again.already_ingested, 2);
    assert_eq!(first.parser.as_deref(), Some("api"));
}

#[tokio::test]
async fn test_different_rows_for_same_batch_conflict() {
    let ctx = create_test_state().await.unwrap();
    let batch = create_batch(&ctx.state, TENANT, SourceType::Bank, Origin::Api).await;
    let cancel = CancellationToken::new();

    let first = vec![bank_row("2024-02-01", "Rent", "-900.00", "R-1")];
    let report = ctx
        .state
        .ingest
        .ingest_rows(TENANT, batch.id, first, None, &cancel)
        .await
        .unwrap();

    let other = vec![bank_row("2024-02-03", "Coffee", "-4.20", "R-9")];
    let err = ctx
        .state
        .ingest
        .ingest_rows(TENANT, batch.id, other.clone(), None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, tally_common::Error::Conflict(_)), "{err}");

    // An explicit key that differs from the stored one is refused too
    let err = ctx
        .state
        .ingest
        .ingest_rows(TENANT, batch.id, other, Some("acme/api/manual".into()), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, tally_common::Error::Conflict(_)), "{err}");

    let stored = ctx.state.ingest.get_batch(TENANT, batch.id).await.unwrap();
    assert_eq!(stored.file_key.as_deref(), Some(report.file_key.as_str()));
    assert_eq!(item_statuses(&ctx.state, TENANT, batch.id).await.len(), 1);
}

#[tokio::test]
async fn test_empty_rows_rejected() {
    let ctx = create_test_state().await.unwrap();
    let batch = create_batch(&ctx.state, TENANT, SourceType::Bank, Origin::Api).await;
    let err = ctx
        .state
        .ingest
        .ingest_rows(TENANT, batch.id, Vec::new(), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, tally_common::Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_batches_are_tenant_scoped() {
    let ctx = create_test_state().await.unwrap();
    let batch = create_batch(&ctx.state, TENANT, SourceType::Bank, Origin::Api).await;

    let err = ctx.state.ingest.get_batch(OTHER_TENANT, batch.id).await.unwrap_err();
    assert!(matches!(err, tally_common::Error::NotFound(_)));
    assert!(ctx
        .state
        .ingest
        .list_batches(OTHER_TENANT, None, 10, 0)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_tenant_currency_rule_applies_on_revalidate() {
    let ctx = create_test_state().await.unwrap();
    let batch = create_batch(&ctx.state, TENANT, SourceType::Bank, Origin::Api).await;
    let mut row = bank_row("2024-03-01", "Card payment", "-12.00", "C-1");
    row.remove("currency");
    let report = ctx
        .state
        .ingest
        .ingest_rows(TENANT, batch.id, vec![row], None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.status, BatchStatus::Ready);

    sqlx::query("INSERT INTO tenant_settings (tenant_id, require_currency, updated_at) VALUES (?, 1, ?)")
        .bind(TENANT)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&ctx.state.db)
        .await
        .unwrap();

    let revalidated = ctx.state.ingest.revalidate_batch(TENANT, batch.id).await.unwrap();
    assert_eq!(revalidated.revalidated, 1);
    assert_eq!(revalidated.status, BatchStatus::Error);
    assert_eq!(item_statuses(&ctx.state, TENANT, batch.id).await, vec!["ERROR_VALIDATION"]);
}

#[tokio::test]
async fn test_ocr_fills_missing_required_fields_from_provider() {
    let (_ctx, provider, raw) = ingest_scan(false).await;

    // Only the field the patterns missed is requested and filled
    assert_eq!(*provider.requested.lock().unwrap(), vec!["total".to_string()]);
    assert_eq!(raw["total"], json!("112.00"));
    assert_eq!(raw["invoice_number"], json!("001-002-000123"));
}

#[tokio::test]
async fn test_ocr_keeps_pattern_fields_when_extraction_fails() {
    let (_ctx, provider, raw) = ingest_scan(true).await;

    assert_eq!(provider.requested.lock().unwrap().len(), 1);
    assert!(raw.get("total").is_none());
    assert_eq!(raw["net"], json!("100.00"));
}
