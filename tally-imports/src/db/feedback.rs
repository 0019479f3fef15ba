//! Classification feedback and classifier snapshot persistence

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tally_common::{Error, Result};

use super::{from_json, parse_ts, parse_uuid, to_json, ts};
use crate::models::{ClassifierSnapshot, FeedbackEvent};

const FEEDBACK_COLUMNS: &str =
    "id, tenant_id, batch_id, fingerprint, header_tokens, suggested, confirmed, confidence, heuristic_version, created_at";

fn feedback_from_row(row: &SqliteRow) -> Result<FeedbackEvent> {
    let id: String = row.get("id");
    let batch_id: Option<String> = row.get("batch_id");
    let header_tokens: String = row.get("header_tokens");
    let suggested: String = row.get("suggested");
    let confirmed: String = row.get("confirmed");
    let created_at: String = row.get("created_at");
    Ok(FeedbackEvent {
        id: parse_uuid("id", &id)?,
        tenant_id: row.get("tenant_id"),
        batch_id: batch_id.map(|b| parse_uuid("batch_id", &b)).transpose()?,
        fingerprint: row.get("fingerprint"),
        header_tokens: from_json("header_tokens", &header_tokens)?,
        suggested: suggested.parse()?,
        confirmed: confirmed.parse()?,
        confidence: row.get("confidence"),
        heuristic_version: row.get("heuristic_version"),
        created_at: parse_ts("created_at", &created_at)?,
    })
}

pub async fn insert_feedback(conn: &mut SqliteConnection, event: &FeedbackEvent) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO classification_feedback ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        FEEDBACK_COLUMNS
    ))
    .bind(event.id.to_string())
    .bind(&event.tenant_id)
    .bind(event.batch_id.map(|b| b.to_string()))
    .bind(&event.fingerprint)
    .bind(to_json("header_tokens", &event.header_tokens)?)
    .bind(event.suggested.as_str())
    .bind(event.confirmed.as_str())
    .bind(event.confidence)
    .bind(event.heuristic_version)
    .bind(ts(&event.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// A tenant's most recent feedback, newest first
pub async fn list_feedback(conn: &mut SqliteConnection, tenant_id: &str, limit: i64) -> Result<Vec<FeedbackEvent>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM classification_feedback WHERE tenant_id = ? ORDER BY created_at DESC LIMIT ?",
        FEEDBACK_COLUMNS
    ))
    .bind(tenant_id)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(feedback_from_row).collect()
}

/// Latest labeled events across every tenant (the classifier is shared)
pub async fn latest_sample(conn: &mut SqliteConnection, limit: i64) -> Result<Vec<FeedbackEvent>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM classification_feedback ORDER BY created_at DESC LIMIT ?",
        FEEDBACK_COLUMNS
    ))
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(feedback_from_row).collect()
}

pub async fn count_feedback(conn: &mut SqliteConnection) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM classification_feedback")
        .fetch_one(&mut *conn)
        .await?;
    Ok(n)
}

const SNAPSHOT_COLUMNS: &str = "version, weights, metrics, validated, pinned, created_at";

fn snapshot_from_row(row: &SqliteRow) -> Result<ClassifierSnapshot> {
    let weights: String = row.get("weights");
    let metrics: Option<String> = row.get("metrics");
    let created_at: String = row.get("created_at");
    Ok(ClassifierSnapshot {
        version: row.get("version"),
        weights: from_json("weights", &weights)?,
        metrics: metrics.map(|m| from_json("metrics", &m)).transpose()?,
        validated: row.get::<i64, _>("validated") != 0,
        pinned: row.get::<i64, _>("pinned") != 0,
        created_at: parse_ts("created_at", &created_at)?,
    })
}

pub async fn insert_snapshot(conn: &mut SqliteConnection, snapshot: &ClassifierSnapshot) -> Result<()> {
    let metrics = snapshot.metrics.as_ref().map(|m| to_json("metrics", m)).transpose()?;
    sqlx::query(&format!(
        "INSERT INTO classifier_snapshots ({}) VALUES (?, ?, ?, ?, ?, ?)",
        SNAPSHOT_COLUMNS
    ))
    .bind(snapshot.version)
    .bind(to_json("weights", &snapshot.weights)?)
    .bind(metrics)
    .bind(snapshot.validated as i64)
    .bind(snapshot.pinned as i64)
    .bind(ts(&snapshot.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list_snapshots(conn: &mut SqliteConnection) -> Result<Vec<ClassifierSnapshot>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM classifier_snapshots ORDER BY version DESC",
        SNAPSHOT_COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(snapshot_from_row).collect()
}

pub async fn get_snapshot(conn: &mut SqliteConnection, version: i64) -> Result<Option<ClassifierSnapshot>> {
    let row = sqlx::query(&format!("SELECT {} FROM classifier_snapshots WHERE version = ?", SNAPSHOT_COLUMNS))
        .bind(version)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(snapshot_from_row).transpose()
}

pub async fn pinned_snapshot(conn: &mut SqliteConnection) -> Result<Option<ClassifierSnapshot>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM classifier_snapshots WHERE pinned = 1 ORDER BY version DESC LIMIT 1",
        SNAPSHOT_COLUMNS
    ))
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(snapshot_from_row).transpose()
}

pub async fn max_snapshot_version(conn: &mut SqliteConnection) -> Result<i64> {
    let n: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM classifier_snapshots")
        .fetch_one(&mut *conn)
        .await?;
    Ok(n.unwrap_or(0))
}

/// Make `version` the only pinned snapshot. Call inside a transaction.
pub async fn pin_snapshot(conn: &mut SqliteConnection, version: i64) -> Result<()> {
    sqlx::query("UPDATE classifier_snapshots SET pinned = 0 WHERE pinned = 1")
        .execute(&mut *conn)
        .await?;
    let result = sqlx::query("UPDATE classifier_snapshots SET pinned = 1 WHERE version = ? AND validated = 1")
        .bind(version)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::InvalidInput(format!(
            "snapshot {} does not exist or was never validated",
            version
        )));
    }
    Ok(())
}
