//! Mapping template persistence

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tally_common::{Error, Result};
use uuid::Uuid;

use super::{from_json, parse_ts, parse_uuid, to_json, ts};
use crate::models::Mapping;

const COLUMNS: &str =
    "id, tenant_id, name, source_type, version, fields, transforms, defaults, dedupe_keys, created_at, updated_at";

fn from_row(row: &SqliteRow) -> Result<Mapping> {
    let id: String = row.get("id");
    let source_type: String = row.get("source_type");
    let fields: String = row.get("fields");
    let transforms: String = row.get("transforms");
    let defaults: String = row.get("defaults");
    let dedupe_keys: String = row.get("dedupe_keys");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Mapping {
        id: parse_uuid("id", &id)?,
        tenant_id: row.get("tenant_id"),
        name: row.get("name"),
        source_type: source_type.parse()?,
        version: row.get("version"),
        fields: from_json("fields", &fields)?,
        transforms: from_json("transforms", &transforms)?,
        defaults: from_json("defaults", &defaults)?,
        dedupe_keys: from_json("dedupe_keys", &dedupe_keys)?,
        created_at: parse_ts("created_at", &created_at)?,
        updated_at: parse_ts("updated_at", &updated_at)?,
    })
}

/// Insert a new template; a duplicate name for the tenant is a conflict
pub async fn insert_mapping(conn: &mut SqliteConnection, mapping: &Mapping) -> Result<()> {
    let result = sqlx::query(&format!(
        "INSERT INTO import_mappings ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        COLUMNS
    ))
    .bind(mapping.id.to_string())
    .bind(&mapping.tenant_id)
    .bind(&mapping.name)
    .bind(mapping.source_type.as_str())
    .bind(mapping.version)
    .bind(to_json("fields", &mapping.fields)?)
    .bind(to_json("transforms", &mapping.transforms)?)
    .bind(to_json("defaults", &mapping.defaults)?)
    .bind(to_json("dedupe_keys", &mapping.dedupe_keys)?)
    .bind(ts(&mapping.created_at))
    .bind(ts(&mapping.updated_at))
    .execute(&mut *conn)
    .await
    .map_err(Error::Database);

    match result {
        Err(e) if e.is_unique_violation() => Err(Error::Conflict(format!(
            "mapping named '{}' already exists",
            mapping.name
        ))),
        other => other.map(|_| ()),
    }
}

pub async fn update_mapping(conn: &mut SqliteConnection, mapping: &Mapping) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE import_mappings SET
            name = ?, source_type = ?, version = ?, fields = ?, transforms = ?,
            defaults = ?, dedupe_keys = ?, updated_at = ?
        WHERE tenant_id = ? AND id = ?
        "#,
    )
    .bind(&mapping.name)
    .bind(mapping.source_type.as_str())
    .bind(mapping.version)
    .bind(to_json("fields", &mapping.fields)?)
    .bind(to_json("transforms", &mapping.transforms)?)
    .bind(to_json("defaults", &mapping.defaults)?)
    .bind(to_json("dedupe_keys", &mapping.dedupe_keys)?)
    .bind(ts(&mapping.updated_at))
    .bind(&mapping.tenant_id)
    .bind(mapping.id.to_string())
    .execute(&mut *conn)
    .await
    .map_err(Error::Database);

    match result {
        Err(e) if e.is_unique_violation() => Err(Error::Conflict(format!(
            "mapping named '{}' already exists",
            mapping.name
        ))),
        Err(e) => Err(e),
        Ok(done) if done.rows_affected() == 0 => Err(Error::NotFound(format!("mapping {}", mapping.id))),
        Ok(_) => Ok(()),
    }
}

pub async fn get_mapping(conn: &mut SqliteConnection, tenant_id: &str, mapping_id: Uuid) -> Result<Option<Mapping>> {
    let row = sqlx::query(&format!("SELECT {} FROM import_mappings WHERE tenant_id = ? AND id = ?", COLUMNS))
        .bind(tenant_id)
        .bind(mapping_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn require_mapping(conn: &mut SqliteConnection, tenant_id: &str, mapping_id: Uuid) -> Result<Mapping> {
    get_mapping(conn, tenant_id, mapping_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("mapping {}", mapping_id)))
}

pub async fn list_mappings(conn: &mut SqliteConnection, tenant_id: &str) -> Result<Vec<Mapping>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM import_mappings WHERE tenant_id = ? ORDER BY name",
        COLUMNS
    ))
    .bind(tenant_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(from_row).collect()
}

pub async fn delete_mapping(conn: &mut SqliteConnection, tenant_id: &str, mapping_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM import_mappings WHERE tenant_id = ? AND id = ?")
        .bind(tenant_id)
        .bind(mapping_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
