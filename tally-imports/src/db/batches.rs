//! Batch persistence

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tally_common::{Error, Result};
use uuid::Uuid;

use super::{from_json, parse_opt_ts, parse_ts, parse_uuid, to_json, ts};
use crate::models::{Batch, BatchStatus, ClassificationResult, StatusCounts};

const COLUMNS: &str = "id, tenant_id, source_type, origin, file_key, mapping_id, status, suggested_parser, \
     classification_confidence, ai_enhanced, requires_confirmation, confirmed_by, confirmed_at, \
     classification, created_by, created_at, updated_at";

fn from_row(row: &SqliteRow) -> Result<Batch> {
    let id: String = row.get("id");
    let source_type: String = row.get("source_type");
    let origin: String = row.get("origin");
    let mapping_id: Option<String> = row.get("mapping_id");
    let status: String = row.get("status");
    let classification: Option<String> = row.get("classification");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Batch {
        id: parse_uuid("id", &id)?,
        tenant_id: row.get("tenant_id"),
        source_type: source_type.parse()?,
        origin: origin.parse()?,
        file_key: row.get("file_key"),
        mapping_id: mapping_id.map(|m| parse_uuid("mapping_id", &m)).transpose()?,
        status: status.parse()?,
        suggested_parser: row.get("suggested_parser"),
        classification_confidence: row.get("classification_confidence"),
        ai_enhanced: row.get::<i64, _>("ai_enhanced") != 0,
        requires_confirmation: row.get::<i64, _>("requires_confirmation") != 0,
        confirmed_by: row.get("confirmed_by"),
        confirmed_at: parse_opt_ts("confirmed_at", row.get("confirmed_at"))?,
        classification: classification.map(|c| from_json("classification", &c)).transpose()?,
        created_by: row.get("created_by"),
        created_at: parse_ts("created_at", &created_at)?,
        updated_at: parse_ts("updated_at", &updated_at)?,
    })
}

pub async fn insert_batch(conn: &mut SqliteConnection, batch: &Batch) -> Result<()> {
    let classification = batch
        .classification
        .as_ref()
        .map(|c| to_json("classification", c))
        .transpose()?;
    sqlx::query(&format!(
        "INSERT INTO import_batches ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        COLUMNS
    ))
    .bind(batch.id.to_string())
    .bind(&batch.tenant_id)
    .bind(batch.source_type.as_str())
    .bind(batch.origin.as_str())
    .bind(&batch.file_key)
    .bind(batch.mapping_id.map(|m| m.to_string()))
    .bind(batch.status.as_str())
    .bind(&batch.suggested_parser)
    .bind(batch.classification_confidence)
    .bind(batch.ai_enhanced as i64)
    .bind(batch.requires_confirmation as i64)
    .bind(&batch.confirmed_by)
    .bind(batch.confirmed_at.as_ref().map(ts))
    .bind(classification)
    .bind(&batch.created_by)
    .bind(ts(&batch.created_at))
    .bind(ts(&batch.updated_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_batch(conn: &mut SqliteConnection, tenant_id: &str, batch_id: Uuid) -> Result<Option<Batch>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM import_batches WHERE tenant_id = ? AND id = ?",
        COLUMNS
    ))
    .bind(tenant_id)
    .bind(batch_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(from_row).transpose()
}

/// Like [`get_batch`] but a missing batch is `Error::NotFound`
pub async fn require_batch(conn: &mut SqliteConnection, tenant_id: &str, batch_id: Uuid) -> Result<Batch> {
    get_batch(conn, tenant_id, batch_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("batch {}", batch_id)))
}

pub async fn list_batches(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    status: Option<BatchStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Batch>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM import_batches WHERE tenant_id = ? AND (? IS NULL OR status = ?) \
         ORDER BY created_at DESC LIMIT ? OFFSET ?",
        COLUMNS
    ))
    .bind(tenant_id)
    .bind(status.map(|s| s.as_str()))
    .bind(status.map(|s| s.as_str()))
    .bind(limit)
    .bind(offset)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(from_row).collect()
}

pub async fn set_status(conn: &mut SqliteConnection, tenant_id: &str, batch_id: Uuid, status: BatchStatus) -> Result<()> {
    sqlx::query("UPDATE import_batches SET status = ?, updated_at = ? WHERE tenant_id = ? AND id = ?")
        .bind(status.as_str())
        .bind(ts(&chrono::Utc::now()))
        .bind(tenant_id)
        .bind(batch_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Store a classification outcome and its routing flags
pub async fn record_classification(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    batch_id: Uuid,
    result: &ClassificationResult,
    suggested_parser: Option<&str>,
    requires_confirmation: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE import_batches SET
            suggested_parser = COALESCE(?, suggested_parser),
            classification_confidence = ?,
            ai_enhanced = ?,
            requires_confirmation = ?,
            classification = ?,
            updated_at = ?
        WHERE tenant_id = ? AND id = ?
        "#,
    )
    .bind(suggested_parser)
    .bind(result.confidence)
    .bind(result.enhanced_by_ai as i64)
    .bind(requires_confirmation as i64)
    .bind(to_json("classification", result)?)
    .bind(ts(&chrono::Utc::now()))
    .bind(tenant_id)
    .bind(batch_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn set_file_key(conn: &mut SqliteConnection, tenant_id: &str, batch_id: Uuid, file_key: &str) -> Result<()> {
    sqlx::query("UPDATE import_batches SET file_key = ?, updated_at = ? WHERE tenant_id = ? AND id = ?")
        .bind(file_key)
        .bind(ts(&chrono::Utc::now()))
        .bind(tenant_id)
        .bind(batch_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// User confirmation, optionally overriding the source type
pub async fn confirm(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    batch_id: Uuid,
    user_id: &str,
    source_type: Option<crate::models::SourceType>,
) -> Result<()> {
    let now = ts(&chrono::Utc::now());
    sqlx::query(
        r#"
        UPDATE import_batches SET
            source_type = COALESCE(?, source_type),
            confirmed_by = ?,
            confirmed_at = ?,
            updated_at = ?
        WHERE tenant_id = ? AND id = ?
        "#,
    )
    .bind(source_type.map(|s| s.as_str()))
    .bind(user_id)
    .bind(&now)
    .bind(&now)
    .bind(tenant_id)
    .bind(batch_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Item status histogram
pub async fn status_counts(conn: &mut SqliteConnection, tenant_id: &str, batch_id: Uuid) -> Result<StatusCounts> {
    let rows = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM import_items WHERE tenant_id = ? AND batch_id = ? GROUP BY status",
    )
    .bind(tenant_id)
    .bind(batch_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let mut counts = StatusCounts::default();
    for row in rows {
        let status: String = row.get("status");
        let n: i64 = row.get("n");
        counts.add(status.parse()?, n as usize);
    }
    Ok(counts)
}

/// Recompute and store the batch status from its items. Call inside the
/// transaction that changed the items.
pub async fn refresh_status(conn: &mut SqliteConnection, tenant_id: &str, batch_id: Uuid) -> Result<BatchStatus> {
    let counts = status_counts(conn, tenant_id, batch_id).await?;
    let status = BatchStatus::aggregate(&counts);
    set_status(conn, tenant_id, batch_id, status).await?;
    tracing::debug!(batch_id = %batch_id, status = %status, total = counts.total(), "Batch status aggregated");
    Ok(status)
}

/// Delete all items (admin reset)
pub async fn clear_items(conn: &mut SqliteConnection, tenant_id: &str, batch_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM import_items WHERE tenant_id = ? AND batch_id = ?")
        .bind(tenant_id)
        .bind(batch_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Reset classification state back to a fresh batch (admin reset)
pub async fn reset(conn: &mut SqliteConnection, tenant_id: &str, batch_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE import_batches SET
            status = 'PENDING',
            suggested_parser = NULL,
            classification_confidence = NULL,
            ai_enhanced = 0,
            requires_confirmation = 0,
            confirmed_by = NULL,
            confirmed_at = NULL,
            classification = NULL,
            updated_at = ?
        WHERE tenant_id = ? AND id = ?
        "#,
    )
    .bind(ts(&chrono::Utc::now()))
    .bind(tenant_id)
    .bind(batch_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Physically delete a batch; items, corrections and lineage cascade
pub async fn delete_batch(conn: &mut SqliteConnection, tenant_id: &str, batch_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM import_batches WHERE tenant_id = ? AND id = ?")
        .bind(tenant_id)
        .bind(batch_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_referencing_mapping(conn: &mut SqliteConnection, tenant_id: &str, mapping_id: Uuid) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM import_batches WHERE tenant_id = ? AND mapping_id = ?")
        .bind(tenant_id)
        .bind(mapping_id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    Ok(n)
}

pub async fn set_source_type(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    batch_id: Uuid,
    source_type: crate::models::SourceType,
) -> Result<()> {
    sqlx::query("UPDATE import_batches SET source_type = ?, updated_at = ? WHERE tenant_id = ? AND id = ?")
        .bind(source_type.as_str())
        .bind(ts(&chrono::Utc::now()))
        .bind(tenant_id)
        .bind(batch_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn count_with_file_key(conn: &mut SqliteConnection, tenant_id: &str, file_key: &str) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM import_batches WHERE tenant_id = ? AND file_key = ?")
        .bind(tenant_id)
        .bind(file_key)
        .fetch_one(&mut *conn)
        .await?;
    Ok(n)
}
