//! Snapshot pinning and restore

use sqlx::SqlitePool;
use tally_common::{Error, Result};
use tracing::info;

use crate::classification::ClassificationEngine;
use crate::db::feedback as feedback_db;
use crate::models::ClassifierSnapshot;
use crate::utils::begin_monitored;

pub struct RollbackManager;

impl RollbackManager {
    /// Pin a validated snapshot and make its weights active
    pub async fn pin(db: &SqlitePool, engine: &ClassificationEngine, version: i64) -> Result<ClassifierSnapshot> {
        let mut tx = begin_monitored(db, "feedback::pin").await?;
        let mut snapshot = feedback_db::get_snapshot(tx.conn()?, version)
            .await?
            .ok_or_else(|| Error::NotFound(format!("classifier snapshot {}", version)))?;
        if !snapshot.validated {
            return Err(Error::InvalidInput(format!(
                "snapshot {} failed evaluation and cannot be pinned",
                version
            )));
        }
        feedback_db::pin_snapshot(tx.conn()?, version).await?;
        tx.commit().await?;

        snapshot.pinned = true;
        engine.set_weights(snapshot.weights.clone());
        info!(version, "Classifier snapshot pinned");
        Ok(snapshot)
    }

    /// Load the pinned snapshot into the engine (startup)
    pub async fn activate_pinned(db: &SqlitePool, engine: &ClassificationEngine) -> Result<Option<i64>> {
        let mut conn = db.acquire().await?;
        match feedback_db::pinned_snapshot(&mut conn).await? {
            Some(snapshot) => {
                let version = snapshot.version;
                engine.set_weights(snapshot.weights);
                Ok(Some(version))
            }
            None => Ok(None),
        }
    }
}
