//! Database bootstrap tests

use tally_common::db::{get_setting, init_database, set_setting};
use tempfile::TempDir;

#[tokio::test]
async fn test_init_creates_database_file_and_settings() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("tally.db");

    let pool = init_database(&db_path).await.unwrap();
    assert!(db_path.exists());

    assert_eq!(get_setting(&pool, "missing").await.unwrap(), None);
    set_setting(&pool, "ai_api_key", "first").await.unwrap();
    set_setting(&pool, "ai_api_key", "second").await.unwrap();
    assert_eq!(
        get_setting(&pool, "ai_api_key").await.unwrap().as_deref(),
        Some("second")
    );
}

#[tokio::test]
async fn test_foreign_keys_enabled_on_pooled_connections() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("tally.db")).await.unwrap();

    let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(enabled, 1);
}
