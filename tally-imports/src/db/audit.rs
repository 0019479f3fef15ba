//! Append-only audit trails: corrections and lineage

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tally_common::Result;
use uuid::Uuid;

use super::{from_json, parse_ts, parse_uuid, to_json, ts};
use crate::models::{Correction, Lineage};

pub async fn insert_correction(conn: &mut SqliteConnection, correction: &Correction) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO import_corrections (id, tenant_id, item_id, field, old_value, new_value, user_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(correction.id.to_string())
    .bind(&correction.tenant_id)
    .bind(correction.item_id.to_string())
    .bind(&correction.field)
    .bind(to_json("old_value", &correction.old_value)?)
    .bind(to_json("new_value", &correction.new_value)?)
    .bind(&correction.user_id)
    .bind(ts(&correction.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn correction_from_row(row: &SqliteRow) -> Result<Correction> {
    let id: String = row.get("id");
    let item_id: String = row.get("item_id");
    let old_value: String = row.get("old_value");
    let new_value: String = row.get("new_value");
    let created_at: String = row.get("created_at");
    Ok(Correction {
        id: parse_uuid("id", &id)?,
        tenant_id: row.get("tenant_id"),
        item_id: parse_uuid("item_id", &item_id)?,
        field: row.get("field"),
        old_value: from_json("old_value", &old_value)?,
        new_value: from_json("new_value", &new_value)?,
        user_id: row.get("user_id"),
        created_at: parse_ts("created_at", &created_at)?,
    })
}

pub async fn corrections_for_item(conn: &mut SqliteConnection, tenant_id: &str, item_id: Uuid) -> Result<Vec<Correction>> {
    let rows = sqlx::query(
        r#"
        SELECT id, tenant_id, item_id, field, old_value, new_value, user_id, created_at
        FROM import_corrections
        WHERE tenant_id = ? AND item_id = ?
        ORDER BY created_at, rowid
        "#,
    )
    .bind(tenant_id)
    .bind(item_id.to_string())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(correction_from_row).collect()
}

/// Corrections of every item in a batch, oldest first
pub async fn corrections_for_batch(conn: &mut SqliteConnection, tenant_id: &str, batch_id: Uuid) -> Result<Vec<Correction>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id, c.tenant_id, c.item_id, c.field, c.old_value, c.new_value, c.user_id, c.created_at
        FROM import_corrections c
        JOIN import_items i ON i.id = c.item_id
        WHERE c.tenant_id = ? AND i.batch_id = ?
        ORDER BY c.created_at, c.rowid
        "#,
    )
    .bind(tenant_id)
    .bind(batch_id.to_string())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(correction_from_row).collect()
}

pub async fn insert_lineage(conn: &mut SqliteConnection, lineage: &Lineage) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO import_lineage (id, tenant_id, item_id, promoted_to, promoted_ref, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(lineage.id.to_string())
    .bind(&lineage.tenant_id)
    .bind(lineage.item_id.to_string())
    .bind(&lineage.promoted_to)
    .bind(&lineage.promoted_ref)
    .bind(ts(&lineage.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn lineage_from_row(row: &SqliteRow) -> Result<Lineage> {
    let id: String = row.get("id");
    let item_id: String = row.get("item_id");
    let created_at: String = row.get("created_at");
    Ok(Lineage {
        id: parse_uuid("id", &id)?,
        tenant_id: row.get("tenant_id"),
        item_id: parse_uuid("item_id", &item_id)?,
        promoted_to: row.get("promoted_to"),
        promoted_ref: row.get("promoted_ref"),
        created_at: parse_ts("created_at", &created_at)?,
    })
}

pub async fn lineage_for_batch(conn: &mut SqliteConnection, tenant_id: &str, batch_id: Uuid) -> Result<Vec<Lineage>> {
    let rows = sqlx::query(
        r#"
        SELECT l.id, l.tenant_id, l.item_id, l.promoted_to, l.promoted_ref, l.created_at
        FROM import_lineage l
        JOIN import_items i ON i.id = l.item_id
        WHERE l.tenant_id = ? AND i.batch_id = ?
        ORDER BY l.created_at
        "#,
    )
    .bind(tenant_id)
    .bind(batch_id.to_string())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(lineage_from_row).collect()
}
