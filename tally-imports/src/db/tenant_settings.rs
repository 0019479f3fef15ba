//! Per-tenant overrides of the validation and promotion defaults

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection};
use tally_common::Result;

use super::{parse_ts, ts};
use crate::validation::ValidationRules;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSettings {
    pub tenant_id: String,
    pub default_currency: Option<String>,
    pub default_country: Option<String>,
    /// `None` keeps the service-wide toggle
    pub require_currency: Option<bool>,
    pub require_category: Option<bool>,
    pub updated_at: DateTime<Utc>,
}

impl TenantSettings {
    pub fn empty(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            default_currency: None,
            default_country: None,
            require_currency: None,
            require_category: None,
            updated_at: Utc::now(),
        }
    }

    /// Overlay these settings on service-wide rules
    pub fn apply_to(&self, mut rules: ValidationRules) -> ValidationRules {
        if let Some(require) = self.require_currency {
            rules.require_currency = require;
        }
        if let Some(require) = self.require_category {
            rules.require_category = require;
        }
        if self.default_country.is_some() {
            rules.default_country = self.default_country.clone();
        }
        if self.default_currency.is_some() {
            rules.default_currency = self.default_currency.clone();
        }
        rules
    }
}

pub async fn get_settings(conn: &mut SqliteConnection, tenant_id: &str) -> Result<Option<TenantSettings>> {
    let row = sqlx::query(
        "SELECT tenant_id, default_currency, default_country, require_currency, require_category, updated_at \
         FROM tenant_settings WHERE tenant_id = ?",
    )
    .bind(tenant_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let updated_at: String = row.get("updated_at");
    Ok(Some(TenantSettings {
        tenant_id: row.get("tenant_id"),
        default_currency: row.get("default_currency"),
        default_country: row.get("default_country"),
        require_currency: row.get::<Option<i64>, _>("require_currency").map(|v| v != 0),
        require_category: row.get::<Option<i64>, _>("require_category").map(|v| v != 0),
        updated_at: parse_ts("updated_at", &updated_at)?,
    }))
}

pub async fn upsert_settings(conn: &mut SqliteConnection, settings: &TenantSettings) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tenant_settings (tenant_id, default_currency, default_country, require_currency, require_category, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(tenant_id) DO UPDATE SET
            default_currency = excluded.default_currency,
            default_country = excluded.default_country,
            require_currency = excluded.require_currency,
            require_category = excluded.require_category,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&settings.tenant_id)
    .bind(&settings.default_currency)
    .bind(&settings.default_country)
    .bind(settings.require_currency.map(|v| v as i64))
    .bind(settings.require_category.map(|v| v as i64))
    .bind(ts(&settings.updated_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_only_what_is_set() {
        let base = ValidationRules {
            require_currency: false,
            require_category: true,
            default_country: Some("EC".into()),
            default_currency: None,
        };
        let mut settings = TenantSettings::empty("t1");
        settings.require_currency = Some(true);
        settings.default_currency = Some("USD".into());

        let rules = settings.apply_to(base);
        assert!(rules.require_currency);
        assert!(rules.require_category);
        assert_eq!(rules.default_country.as_deref(), Some("EC"));
        assert_eq!(rules.default_currency.as_deref(), Some("USD"));
    }
}
