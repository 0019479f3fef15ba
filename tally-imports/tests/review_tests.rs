//! Review and admin flows: corrections, confirmation, reset and purge

mod helpers;

use helpers::*;
use serde_json::json;
use tally_common::Error;
use tally_imports::models::{BatchStatus, ItemStatus, Origin, SourceType};
use tally_imports::parsers::FileInput;
use tally_imports::promotion::PromoteRequest;
use tally_imports::services::ConfirmRequest;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

async fn staged_bank_batch(ctx: &TestContext) -> Uuid {
    let batch = create_batch(&ctx.state, TENANT, SourceType::Bank, Origin::Api).await;
    ctx.state
        .ingest
        .ingest_rows(
            TENANT,
            batch.id,
            vec![
                bank_row("2024-02-01", "Coffee", "-4.50", "C-1"),
                bank_row("2024-02-02", "Salary", "1500.00", "C-2"),
                bank_row("2024-02-03", "Refund", "abc", "C-3"),
            ],
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    batch.id
}

#[tokio::test]
async fn test_correction_fixes_item_and_batch() {
    let ctx = create_test_state().await.unwrap();
    let batch_id = staged_bank_batch(&ctx).await;
    let bad = ctx
        .state
        .review
        .list_items(TENANT, batch_id, Some(ItemStatus::ErrorValidation))
        .await
        .unwrap();
    assert_eq!(bad.len(), 1);

    let fixed = ctx
        .state
        .review
        .patch_item(TENANT, USER, bad[0].item.id, "amount", json!("12.00"))
        .await
        .unwrap();
    assert_eq!(fixed.status, ItemStatus::Ok);
    assert!(fixed.errors.is_empty());

    let batch = ctx.state.ingest.get_batch(TENANT, batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Ready);

    let view = &ctx.state.review.list_items(TENANT, batch_id, None).await.unwrap()[2];
    assert_eq!(view.corrections.len(), 1);
    assert_eq!(view.corrections[0].old_value, json!("abc"));
    assert_eq!(view.corrections[0].new_value, json!("12.00"));
    assert_eq!(view.corrections[0].user_id, USER);
}

#[tokio::test]
async fn test_corrections_survive_revalidation() {
    let ctx = create_test_state().await.unwrap();
    let batch_id = staged_bank_batch(&ctx).await;
    let bad = ctx
        .state
        .review
        .list_items(TENANT, batch_id, Some(ItemStatus::ErrorValidation))
        .await
        .unwrap();
    ctx.state
        .review
        .patch_item(TENANT, USER, bad[0].item.id, "amount", json!("12.00"))
        .await
        .unwrap();

    ctx.state.ingest.revalidate_batch(TENANT, batch_id).await.unwrap();
    assert_eq!(item_statuses(&ctx.state, TENANT, batch_id).await, vec!["OK", "OK", "OK"]);
}

#[tokio::test]
async fn test_promoted_item_cannot_be_corrected() {
    let ctx = create_test_state().await.unwrap();
    let batch_id = staged_bank_batch(&ctx).await;
    ctx.state
        .promotion
        .promote_batch(TENANT, batch_id, &PromoteRequest::default())
        .await
        .unwrap();
    let promoted = ctx
        .state
        .review
        .list_items(TENANT, batch_id, Some(ItemStatus::Promoted))
        .await
        .unwrap();
    assert_eq!(promoted.len(), 2);

    let err = ctx
        .state
        .review
        .patch_item(TENANT, USER, promoted[0].item.id, "amount", json!("1.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "{err}");
}

#[tokio::test]
async fn test_empty_field_name_rejected() {
    let ctx = create_test_state().await.unwrap();
    let batch_id = staged_bank_batch(&ctx).await;
    let items = ctx.state.review.list_items(TENANT, batch_id, None).await.unwrap();
    let err = ctx
        .state
        .review
        .patch_item(TENANT, USER, items[0].item.id, "  ", json!("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_confirm_undeclared_batch_records_feedback() {
    let ctx = create_test_state().await.unwrap();
    let batch = create_batch(&ctx.state, TENANT, SourceType::Generic, Origin::Api).await;
    ctx.state
        .ingest
        .ingest_rows(
            TENANT,
            batch.id,
            vec![
                bank_row("2024-03-01", "Coffee", "-4.50", "F-1"),
                bank_row("2024-03-02", "Salary", "1500.00", "F-2"),
            ],
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let report = ctx
        .state
        .review
        .confirm_batch(
            TENANT,
            USER,
            batch.id,
            ConfirmRequest {
                source_type: Some(SourceType::Bank),
            },
        )
        .await
        .unwrap();

    assert_eq!(report.batch.source_type, SourceType::Bank);
    assert_eq!(report.batch.confirmed_by.as_deref(), Some(USER));
    assert!(!report.batch.awaiting_confirmation());
    assert_eq!(report.status, BatchStatus::Ready);

    let event = report.feedback.expect("feedback recorded");
    assert_eq!(event.confirmed, SourceType::Bank);
    assert_eq!(event.batch_id, Some(batch.id));
    assert!(event.header_tokens.contains(&"amount".to_string()));

    let stored = ctx.state.feedback.list(TENANT, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(ctx.state.feedback.list(OTHER_TENANT, 10).await.unwrap().is_empty());

    let summary = ctx
        .state
        .promotion
        .promote_batch(TENANT, batch.id, &PromoteRequest::default())
        .await
        .unwrap();
    assert_eq!(summary.created, 2);
}

#[tokio::test]
async fn test_confirm_rejects_generic_and_promoted() {
    let ctx = create_test_state().await.unwrap();
    let generic = create_batch(&ctx.state, TENANT, SourceType::Generic, Origin::Api).await;
    let err = ctx
        .state
        .review
        .confirm_batch(TENANT, USER, generic.id, ConfirmRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "{err}");

    let batch = create_batch(&ctx.state, TENANT, SourceType::Bank, Origin::Api).await;
    ctx.state
        .ingest
        .ingest_rows(TENANT, batch.id, vec![bank_row("2024-03-05", "Fee", "-1.00", "P-1")], None, &CancellationToken::new())
        .await
        .unwrap();
    ctx.state
        .promotion
        .promote_batch(TENANT, batch.id, &PromoteRequest::default())
        .await
        .unwrap();
    let err = ctx
        .state
        .review
        .confirm_batch(TENANT, USER, batch.id, ConfirmRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "{err}");
}

#[tokio::test]
async fn test_errors_csv_lists_failing_items() {
    let ctx = create_test_state().await.unwrap();
    let batch_id = staged_bank_batch(&ctx).await;
    let csv = ctx.state.review.export_errors_csv(TENANT, batch_id).await.unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "idx,status,phase,field,code,message,detail,raw");
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("2,ERROR_VALIDATION,validation,amount,"));
}

#[tokio::test]
async fn test_admin_reset_clears_items() {
    let ctx = create_test_state().await.unwrap();
    let batch_id = staged_bank_batch(&ctx).await;

    let report = ctx.state.admin.reset_batch(TENANT, batch_id).await.unwrap();
    assert_eq!(report.items_removed, 3);
    assert_eq!(report.batch.status, BatchStatus::Pending);
    assert!(item_statuses(&ctx.state, TENANT, batch_id).await.is_empty());
}

#[tokio::test]
async fn test_admin_reset_refused_after_promotion() {
    let ctx = create_test_state().await.unwrap();
    let batch_id = staged_bank_batch(&ctx).await;
    ctx.state
        .promotion
        .promote_batch(TENANT, batch_id, &PromoteRequest::default())
        .await
        .unwrap();
    let err = ctx.state.admin.reset_batch(TENANT, batch_id).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "{err}");
}

#[tokio::test]
async fn test_admin_purge_removes_batch_and_blob() {
    let ctx = create_test_state().await.unwrap();
    let batch = create_batch(&ctx.state, TENANT, SourceType::Bank, Origin::Csv).await;
    ctx.state
        .ingest
        .ingest_file(
            TENANT,
            batch.id,
            FileInput::new("statement.csv", BANK_CSV_ONE_BAD.as_bytes().to_vec()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(ctx.blobs.len().await, 1);

    let report = ctx.state.admin.purge_batch(TENANT, batch.id).await.unwrap();
    assert!(report.blob_deleted);
    assert_eq!(ctx.blobs.len().await, 0);

    let err = ctx.state.ingest.get_batch(TENANT, batch.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_admin_purge_is_tenant_scoped() {
    let ctx = create_test_state().await.unwrap();
    let batch_id = staged_bank_batch(&ctx).await;
    let err = ctx.state.admin.purge_batch(OTHER_TENANT, batch_id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(item_statuses(&ctx.state, TENANT, batch_id).await.len(), 3);
}
