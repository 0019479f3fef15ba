//! Invoice, bank transaction and expense handlers

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::{currency, required, text, PromotionContext, PromotionError, PromotionHandler, PromotionOutcome};

/// Row still present for the tenant (updates fall back to inserts otherwise)
async fn exists(conn: &mut SqliteConnection, table: &str, tenant_id: &str, id: &str) -> Result<bool, PromotionError> {
    let found: Option<i64> = sqlx::query_scalar(&format!("SELECT 1 FROM {} WHERE tenant_id = ? AND id = ?", table))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

pub struct InvoiceHandler;

#[async_trait]
impl PromotionHandler for InvoiceHandler {
    fn target(&self) -> &'static str {
        "invoices"
    }

    async fn promote(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        record: &Map<String, Value>,
        existing_promoted_id: Option<&str>,
        ctx: &PromotionContext,
    ) -> Result<PromotionOutcome, PromotionError> {
        let number = required(record, "invoice_number")?;
        let date = required(record, "invoice_date")?;
        let total = required(record, "total")?;
        let currency = currency(record, ctx)?;
        let now = Utc::now().to_rfc3339();

        let update = match existing_promoted_id {
            Some(id) => exists(conn, "invoices", tenant_id, id).await?.then(|| id.to_string()),
            None => None,
        };
        let id = update.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

        let sql = if update.is_some() {
            r#"
            UPDATE invoices SET
                invoice_number = ?, invoice_date = ?, due_date = ?, issuer_name = ?, issuer_tax_id = ?,
                customer_name = ?, customer_tax_id = ?, net = ?, tax = ?, total = ?, currency = ?,
                country = ?, description = ?, updated_at = ?
            WHERE tenant_id = ? AND id = ?
            "#
        } else {
            r#"
            INSERT INTO invoices (
                invoice_number, invoice_date, due_date, issuer_name, issuer_tax_id,
                customer_name, customer_tax_id, net, tax, total, currency,
                country, description, updated_at, tenant_id, id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        };
        let mut query = sqlx::query(sql)
            .bind(number)
            .bind(date)
            .bind(text(record, "due_date"))
            .bind(text(record, "issuer_name"))
            .bind(text(record, "issuer_tax_id"))
            .bind(text(record, "customer_name"))
            .bind(text(record, "customer_tax_id"))
            .bind(text(record, "net"))
            .bind(text(record, "tax"))
            .bind(total)
            .bind(currency)
            .bind(text(record, "country"))
            .bind(text(record, "description"))
            .bind(&now)
            .bind(tenant_id)
            .bind(&id);
        if update.is_none() {
            query = query.bind(&now);
        }
        query.execute(&mut *conn).await?;
        Ok(PromotionOutcome::created(id))
    }
}

pub struct BankHandler;

#[async_trait]
impl PromotionHandler for BankHandler {
    fn target(&self) -> &'static str {
        "bank_transactions"
    }

    async fn promote(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        record: &Map<String, Value>,
        existing_promoted_id: Option<&str>,
        ctx: &PromotionContext,
    ) -> Result<PromotionOutcome, PromotionError> {
        let date = required(record, "date")?;
        let amount = required(record, "amount")?;
        let currency = currency(record, ctx)?;
        let now = Utc::now().to_rfc3339();

        if let Some(id) = existing_promoted_id {
            if exists(conn, "bank_transactions", tenant_id, id).await? {
                sqlx::query(
                    r#"
                    UPDATE bank_transactions SET
                        date = ?, value_date = ?, description = ?, amount = ?, balance = ?,
                        reference = ?, account = ?, currency = ?, updated_at = ?
                    WHERE tenant_id = ? AND id = ?
                    "#,
                )
                .bind(&date)
                .bind(text(record, "value_date"))
                .bind(text(record, "description"))
                .bind(&amount)
                .bind(text(record, "balance"))
                .bind(text(record, "reference"))
                .bind(text(record, "account"))
                .bind(&currency)
                .bind(&now)
                .bind(tenant_id)
                .bind(id)
                .execute(&mut *conn)
                .await?;
                return Ok(PromotionOutcome::created(id.to_string()));
            }
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO bank_transactions (
                id, tenant_id, date, value_date, description, amount, balance,
                reference, account, currency, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(&date)
        .bind(text(record, "value_date"))
        .bind(text(record, "description"))
        .bind(&amount)
        .bind(text(record, "balance"))
        .bind(text(record, "reference"))
        .bind(text(record, "account"))
        .bind(&currency)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
        Ok(PromotionOutcome::created(id))
    }
}

pub struct ExpenseHandler;

#[async_trait]
impl PromotionHandler for ExpenseHandler {
    fn target(&self) -> &'static str {
        "expenses"
    }

    async fn promote(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        record: &Map<String, Value>,
        existing_promoted_id: Option<&str>,
        ctx: &PromotionContext,
    ) -> Result<PromotionOutcome, PromotionError> {
        let date = required(record, "date")?;
        let amount = required(record, "amount")?;
        let currency = currency(record, ctx)?;
        let now = Utc::now().to_rfc3339();

        if let Some(id) = existing_promoted_id {
            if exists(conn, "expenses", tenant_id, id).await? {
                sqlx::query(
                    r#"
                    UPDATE expenses SET
                        date = ?, vendor_name = ?, vendor_tax_id = ?, description = ?, category = ?,
                        amount = ?, tax = ?, currency = ?, payment_method = ?, updated_at = ?
                    WHERE tenant_id = ? AND id = ?
                    "#,
                )
                .bind(&date)
                .bind(text(record, "vendor_name"))
                .bind(text(record, "vendor_tax_id"))
                .bind(text(record, "description"))
                .bind(text(record, "category"))
                .bind(&amount)
                .bind(text(record, "tax"))
                .bind(&currency)
                .bind(text(record, "payment_method"))
                .bind(&now)
                .bind(tenant_id)
                .bind(id)
                .execute(&mut *conn)
                .await?;
                return Ok(PromotionOutcome::created(id.to_string()));
            }
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO expenses (
                id, tenant_id, date, vendor_name, vendor_tax_id, description, category,
                amount, tax, currency, payment_method, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(&date)
        .bind(text(record, "vendor_name"))
        .bind(text(record, "vendor_tax_id"))
        .bind(text(record, "description"))
        .bind(text(record, "category"))
        .bind(&amount)
        .bind(text(record, "tax"))
        .bind(&currency)
        .bind(text(record, "payment_method"))
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
        Ok(PromotionOutcome::created(id))
    }
}
