//! Postgres callback-log store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use courier_core::CallbackLogStatus;

use super::map_sqlx_error;
use crate::store::{CallbackLogRecord, CallbackLogStore, StoreError};

#[derive(Debug, Clone)]
pub struct PgCallbackLogStore {
    pool: PgPool,
}

impl PgCallbackLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &PgRow) -> Result<CallbackLogRecord, StoreError> {
    let bad = |what: &str, e: sqlx::Error| StoreError::Database(format!("decode {what}: {e}"));
    let status: String = row.try_get("status").map_err(|e| bad("status", e))?;
    Ok(CallbackLogRecord {
        id: row.try_get("id").map_err(|e| bad("id", e))?,
        notification_id: row
            .try_get("notification_id")
            .map_err(|e| bad("notification_id", e))?,
        retry_count: row.try_get("retry_count").map_err(|e| bad("retry_count", e))?,
        next_retry_time: row
            .try_get("next_retry_time")
            .map_err(|e| bad("next_retry_time", e))?,
        status: CallbackLogStatus::parse(&status)
            .ok_or_else(|| StoreError::Database(format!("unknown callback status {status:?}")))?,
    })
}

#[async_trait]
impl CallbackLogStore for PgCallbackLogStore {
    async fn find_by_notification_ids(
        &self,
        notification_ids: &[i64],
    ) -> Result<Vec<CallbackLogRecord>, StoreError> {
        if notification_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, notification_id, retry_count, next_retry_time, status \
             FROM callback_logs WHERE notification_id = ANY($1) ORDER BY id ASC",
        )
        .bind(notification_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find callback logs", e))?;
        rows.iter().map(row_to_record).collect()
    }

    async fn find_due(
        &self,
        now_ms: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<CallbackLogRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, notification_id, retry_count, next_retry_time, status \
             FROM callback_logs \
             WHERE status = 'PENDING' AND next_retry_time <= $1 \
             ORDER BY next_retry_time ASC OFFSET $2 LIMIT $3",
        )
        .bind(now_ms)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find due callback logs", e))?;
        rows.iter().map(row_to_record).collect()
    }

    #[instrument(skip(self, logs), fields(count = logs.len()), err)]
    async fn update(&self, logs: &[CallbackLogRecord]) -> Result<(), StoreError> {
        if logs.is_empty() {
            return Ok(());
        }
        let now_ms = Utc::now().timestamp_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        for log in logs {
            sqlx::query(
                "UPDATE callback_logs \
                 SET retry_count = $1, next_retry_time = $2, status = $3, utime = $4 \
                 WHERE id = $5",
            )
            .bind(log.retry_count)
            .bind(log.next_retry_time)
            .bind(log.status.as_str())
            .bind(now_ms)
            .bind(log.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update callback log", e))?;
        }
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }
}
