//! AI provider key resolution (Database → ENV → TOML)
//!
//! Tests touching TALLY_AI_API_KEY run under #[serial] so parallel tests
//! never observe each other's environment.

use serial_test::serial;
use sqlx::SqlitePool;
use tally_common::config::TomlConfig;
use tally_imports::config::{resolve_ai_api_key, AI_API_KEY_ENV, AI_API_KEY_SETTING};
use tempfile::TempDir;

async fn settings_db() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().unwrap();
    let pool = tally_common::db::init_database(&dir.path().join("settings.db")).await.unwrap();
    (dir, pool)
}

fn toml_with_key(key: Option<&str>) -> TomlConfig {
    TomlConfig {
        ai_api_key: key.map(str::to_string),
        ..TomlConfig::default()
    }
}

#[tokio::test]
#[serial]
async fn test_database_key_wins() {
    let (_dir, pool) = settings_db().await;
    tally_common::db::set_setting(&pool, AI_API_KEY_SETTING, "db-key").await.unwrap();
    std::env::set_var(AI_API_KEY_ENV, "env-key");

    let key = resolve_ai_api_key(&pool, &toml_with_key(Some("toml-key"))).await.unwrap();
    assert_eq!(key.as_deref(), Some("db-key"));

    std::env::remove_var(AI_API_KEY_ENV);
}

#[tokio::test]
#[serial]
async fn test_env_key_when_database_empty() {
    let (_dir, pool) = settings_db().await;
    std::env::set_var(AI_API_KEY_ENV, "env-key");

    let key = resolve_ai_api_key(&pool, &toml_with_key(Some("toml-key"))).await.unwrap();
    assert_eq!(key.as_deref(), Some("env-key"));

    std::env::remove_var(AI_API_KEY_ENV);
}

#[tokio::test]
#[serial]
async fn test_blank_values_fall_through_to_toml() {
    let (_dir, pool) = settings_db().await;
    tally_common::db::set_setting(&pool, AI_API_KEY_SETTING, "   ").await.unwrap();
    std::env::set_var(AI_API_KEY_ENV, "");

    let key = resolve_ai_api_key(&pool, &toml_with_key(Some("toml-key"))).await.unwrap();
    assert_eq!(key.as_deref(), Some("toml-key"));

    std::env::remove_var(AI_API_KEY_ENV);
}

#[tokio::test]
#[serial]
async fn test_no_key_anywhere() {
    let (_dir, pool) = settings_db().await;
    std::env::remove_var(AI_API_KEY_ENV);

    let key = resolve_ai_api_key(&pool, &toml_with_key(None)).await.unwrap();
    assert!(key.is_none());
}
