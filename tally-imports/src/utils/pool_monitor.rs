//! Connection pool monitoring
//!
//! Instrumented transactions: logs how long a caller waited for a pooled
//! connection and how long it held it. Ingest, revalidation and promotion
//! all run inside one of these so slow writers show up in the logs with
//! their call site.

use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::time::Instant;
use tally_common::{Error, Result};

/// Transaction wrapper that logs acquisition and release timing
pub struct MonitoredTransaction<'c> {
    tx: Option<Transaction<'c, Sqlite>>,
    caller: &'static str,
    acquired_at: Instant,
}

impl<'c> MonitoredTransaction<'c> {
    fn new(tx: Transaction<'c, Sqlite>, caller: &'static str) -> Self {
        Self {
            tx: Some(tx),
            caller,
            acquired_at: Instant::now(),
        }
    }

    fn take(&mut self) -> Result<Transaction<'c, Sqlite>> {
        self.tx
            .take()
            .ok_or_else(|| Error::Internal(format!("{}: transaction already released", self.caller)))
    }

    /// Commit and log how long the connection was held
    pub async fn commit(mut self) -> Result<()> {
        let tx = self.take()?;
        tx.commit().await?;

        let held_ms = self.acquired_at.elapsed().as_millis();
        if held_ms > 2000 {
            tracing::warn!(
                caller = self.caller,
                held_ms,
                "LONG TRANSACTION - connection held for extended period"
            );
        } else {
            tracing::debug!(caller = self.caller, held_ms, "Connection released (commit)");
        }
        Ok(())
    }

    /// Roll back and log how long the connection was held
    pub async fn rollback(mut self) -> Result<()> {
        let tx = self.take()?;
        tx.rollback().await?;

        tracing::debug!(
            caller = self.caller,
            held_ms = self.acquired_at.elapsed().as_millis(),
            "Connection released (rollback)"
        );
        Ok(())
    }

    /// Connection for queries (and nested savepoints) inside the transaction
    pub fn conn(&mut self) -> Result<&mut SqliteConnection> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(Error::Internal(format!(
                "{}: transaction already released",
                self.caller
            ))),
        }
    }
}

impl Drop for MonitoredTransaction<'_> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            let held_ms = self.acquired_at.elapsed().as_millis();
            if held_ms > 2000 {
                tracing::warn!(
                    caller = self.caller,
                    held_ms,
                    "LONG TRANSACTION DROPPED - rolled back via Drop (error path?)"
                );
            } else {
                tracing::debug!(caller = self.caller, held_ms, "Connection released (drop)");
            }
        }
    }
}

/// Begin a monitored transaction
///
/// ```ignore
/// let mut tx = begin_monitored(&pool, "ingest_service::ingest_rows").await?;
/// db::items::insert_item(tx.conn()?, &item).await?;
/// tx.commit().await?;
/// ```
pub async fn begin_monitored<'c>(
    pool: &'c sqlx::SqlitePool,
    caller: &'static str,
) -> Result<MonitoredTransaction<'c>> {
    let start = Instant::now();
    let tx = pool.begin().await?;

    let wait_ms = start.elapsed().as_millis();
    if wait_ms > 1000 {
        tracing::warn!(
            caller,
            wait_ms,
            "SLOW CONNECTION ACQUISITION - pool may be saturated"
        );
    } else {
        tracing::debug!(caller, wait_ms, "Connection acquired");
    }

    Ok(MonitoredTransaction::new(tx, caller))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_commit_persists_and_rollback_discards() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE t (v INTEGER)").execute(&pool).await.unwrap();

        let mut tx = begin_monitored(&pool, "test::commit").await.unwrap();
        sqlx::query("INSERT INTO t VALUES (1)").execute(tx.conn().unwrap()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = begin_monitored(&pool, "test::rollback").await.unwrap();
        sqlx::query("INSERT INTO t VALUES (2)").execute(tx.conn().unwrap()).await.unwrap();
        tx.rollback().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_nested_savepoint_rolls_back_alone() {
        use sqlx::Connection;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE t (v INTEGER)").execute(&pool).await.unwrap();

        let mut tx = begin_monitored(&pool, "test::savepoint").await.unwrap();
        sqlx::query("INSERT INTO t VALUES (1)").execute(tx.conn().unwrap()).await.unwrap();
        {
            let mut sp = tx.conn().unwrap().begin().await.unwrap();
            sqlx::query("INSERT INTO t VALUES (2)").execute(&mut *sp).await.unwrap();
            sp.rollback().await.unwrap();
        }
        tx.commit().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 1);
    }
}
