//! Item persistence

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tally_common::{Error, Result};
use uuid::Uuid;

use super::{from_json, parse_opt_ts, parse_ts, parse_uuid, to_json, ts};
use crate::models::{Item, ItemError, ItemStatus};

const COLUMNS: &str = "id, tenant_id, batch_id, idx, raw, normalized, status, errors, dedupe_hash, \
     idempotency_key, promoted_to, promoted_id, promoted_at, created_at, updated_at";

fn from_row(row: &SqliteRow) -> Result<Item> {
    let id: String = row.get("id");
    let batch_id: String = row.get("batch_id");
    let raw: String = row.get("raw");
    let normalized: String = row.get("normalized");
    let status: String = row.get("status");
    let errors: String = row.get("errors");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Item {
        id: parse_uuid("id", &id)?,
        tenant_id: row.get("tenant_id"),
        batch_id: parse_uuid("batch_id", &batch_id)?,
        idx: row.get("idx"),
        raw: from_json("raw", &raw)?,
        normalized: from_json("normalized", &normalized)?,
        status: status.parse()?,
        errors: from_json("errors", &errors)?,
        dedupe_hash: row.get("dedupe_hash"),
        idempotency_key: row.get("idempotency_key"),
        promoted_to: row.get("promoted_to"),
        promoted_id: row.get("promoted_id"),
        promoted_at: parse_opt_ts("promoted_at", row.get("promoted_at"))?,
        created_at: parse_ts("created_at", &created_at)?,
        updated_at: parse_ts("updated_at", &updated_at)?,
    })
}

/// Insert unless the tenant already has an item with this idempotency key.
/// Returns false when the row already existed.
pub async fn insert_item(conn: &mut SqliteConnection, item: &Item) -> Result<bool> {
    let result = sqlx::query(&format!(
        "INSERT INTO import_items ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(tenant_id, idempotency_key) DO NOTHING",
        COLUMNS
    ))
    .bind(item.id.to_string())
    .bind(&item.tenant_id)
    .bind(item.batch_id.to_string())
    .bind(item.idx)
    .bind(to_json("raw", &item.raw)?)
    .bind(to_json("normalized", &item.normalized)?)
    .bind(item.status.as_str())
    .bind(to_json("errors", &item.errors)?)
    .bind(&item.dedupe_hash)
    .bind(&item.idempotency_key)
    .bind(&item.promoted_to)
    .bind(&item.promoted_id)
    .bind(item.promoted_at.as_ref().map(ts))
    .bind(ts(&item.created_at))
    .bind(ts(&item.updated_at))
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_item(conn: &mut SqliteConnection, tenant_id: &str, item_id: Uuid) -> Result<Option<Item>> {
    let row = sqlx::query(&format!("SELECT {} FROM import_items WHERE tenant_id = ? AND id = ?", COLUMNS))
        .bind(tenant_id)
        .bind(item_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn require_item(conn: &mut SqliteConnection, tenant_id: &str, item_id: Uuid) -> Result<Item> {
    get_item(conn, tenant_id, item_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("item {}", item_id)))
}

/// Items of a batch in source order, optionally filtered by status
pub async fn list_items(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    batch_id: Uuid,
    status: Option<ItemStatus>,
) -> Result<Vec<Item>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM import_items WHERE tenant_id = ? AND batch_id = ? AND (? IS NULL OR status = ?) ORDER BY idx",
        COLUMNS
    ))
    .bind(tenant_id)
    .bind(batch_id.to_string())
    .bind(status.map(|s| s.as_str()))
    .bind(status.map(|s| s.as_str()))
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(from_row).collect()
}

/// Store validation outcome of an item
pub async fn update_validation(
    conn: &mut SqliteConnection,
    item: &Item,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE import_items SET
            normalized = ?, status = ?, errors = ?, dedupe_hash = ?, updated_at = ?
        WHERE tenant_id = ? AND id = ?
        "#,
    )
    .bind(to_json("normalized", &item.normalized)?)
    .bind(item.status.as_str())
    .bind(to_json("errors", &item.errors)?)
    .bind(&item.dedupe_hash)
    .bind(ts(&Utc::now()))
    .bind(&item.tenant_id)
    .bind(item.id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn set_status(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    item_id: Uuid,
    status: ItemStatus,
    errors: &[ItemError],
) -> Result<()> {
    sqlx::query("UPDATE import_items SET status = ?, errors = ?, updated_at = ? WHERE tenant_id = ? AND id = ?")
        .bind(status.as_str())
        .bind(to_json("errors", &errors)?)
        .bind(ts(&Utc::now()))
        .bind(tenant_id)
        .bind(item_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Successful promotion. Fails with a unique violation when another item
/// of the tenant already holds this dedupe hash in PROMOTED state.
pub async fn mark_promoted(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    item_id: Uuid,
    promoted_to: &str,
    promoted_id: &str,
    promoted_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE import_items SET
            status = 'PROMOTED', errors = '[]', promoted_to = ?, promoted_id = ?, promoted_at = ?, updated_at = ?
        WHERE tenant_id = ? AND id = ?
        "#,
    )
    .bind(promoted_to)
    .bind(promoted_id)
    .bind(ts(&promoted_at))
    .bind(ts(&promoted_at))
    .bind(tenant_id)
    .bind(item_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Does the tenant already have a promoted item with this hash?
pub async fn promoted_hash_exists(conn: &mut SqliteConnection, tenant_id: &str, dedupe_hash: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM import_items WHERE tenant_id = ? AND dedupe_hash = ? AND status = 'PROMOTED' LIMIT 1",
    )
    .bind(tenant_id)
    .bind(dedupe_hash)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(found.is_some())
}

/// Items left PROMOTED without a promoted id
pub async fn list_stale_promotions(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    batch_id: Option<Uuid>,
) -> Result<Vec<Item>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM import_items WHERE tenant_id = ? AND (? IS NULL OR batch_id = ?) \
         AND status = 'PROMOTED' AND promoted_id IS NULL ORDER BY batch_id, idx",
        COLUMNS
    ))
    .bind(tenant_id)
    .bind(batch_id.map(|b| b.to_string()))
    .bind(batch_id.map(|b| b.to_string()))
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(from_row).collect()
}

/// Replace the normalized view after a correction
pub async fn set_normalized(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    item_id: Uuid,
    normalized: &Map<String, Value>,
) -> Result<()> {
    sqlx::query("UPDATE import_items SET normalized = ?, updated_at = ? WHERE tenant_id = ? AND id = ?")
        .bind(to_json("normalized", normalized)?)
        .bind(ts(&Utc::now()))
        .bind(tenant_id)
        .bind(item_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Items with validation errors across a batch, for the error report
pub async fn list_with_errors(conn: &mut SqliteConnection, tenant_id: &str, batch_id: Uuid) -> Result<Vec<Item>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM import_items WHERE tenant_id = ? AND batch_id = ? AND errors != '[]' ORDER BY idx",
        COLUMNS
    ))
    .bind(tenant_id)
    .bind(batch_id.to_string())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(from_row).collect()
}

/// Downgrade a PROMOTED-without-id item to OK and clear its promotion stamp
pub async fn repair_stale(conn: &mut SqliteConnection, tenant_id: &str, item_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE import_items SET
            status = 'OK', promoted_to = NULL, promoted_at = NULL, updated_at = ?
        WHERE tenant_id = ? AND id = ? AND status = 'PROMOTED' AND promoted_id IS NULL
        "#,
    )
    .bind(ts(&Utc::now()))
    .bind(tenant_id)
    .bind(item_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}
