//! Postgres transactional-notification store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, QueryBuilder, Row};
use tracing::instrument;

use courier_core::{SendStatus, TxNotification, TxStatus};

use super::map_sqlx_error;
use super::notification::{insert_notification, row_to_notification, SELECT_COLUMNS};
use crate::store::{StoreError, TxNotificationStore};

#[derive(Debug, Clone)]
pub struct PgTxNotificationStore {
    pool: PgPool,
}

impl PgTxNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TxNotificationStore for PgTxNotificationStore {
    #[instrument(skip(self, txn), fields(biz_id = txn.biz_id, key = %txn.key), err)]
    async fn prepare(&self, txn: TxNotification) -> Result<i64, StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let inserted = insert_notification(&mut *tx, &txn.notification, now_ms, true).await?;
        if inserted == 0 {
            // Key already taken; prepare is idempotent and hands back the
            // existing notification id.
            let row = sqlx::query("SELECT id FROM notifications WHERE biz_id = $1 AND key = $2")
                .bind(txn.biz_id)
                .bind(&txn.key)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("prepare lookup", e))?;
            let id: i64 = row
                .try_get("id")
                .map_err(|e| StoreError::Database(format!("decode id: {e}")))?;
            tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
            return Ok(id);
        }

        sqlx::query(
            "INSERT INTO tx_notifications \
             (key, notification_id, biz_id, status, check_count, next_check_time, ctime, utime) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7) \
             ON CONFLICT (biz_id, key) DO NOTHING",
        )
        .bind(&txn.key)
        .bind(txn.notification.id)
        .bind(txn.biz_id)
        .bind(txn.status.as_str())
        .bind(txn.check_count)
        .bind(txn.next_check_time)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert tx notification", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(txn.notification.id)
    }

    #[instrument(skip(self), err)]
    async fn update_status(
        &self,
        biz_id: i64,
        key: &str,
        status: TxStatus,
        notification_status: SendStatus,
    ) -> Result<(), StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let result = sqlx::query(
            "UPDATE tx_notifications SET status = $1, utime = $2 \
             WHERE biz_id = $3 AND key = $4 AND status = 'PREPARE'",
        )
        .bind(status.as_str())
        .bind(now_ms)
        .bind(biz_id)
        .bind(key)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update tx status", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UpdateStatusFailed);
        }

        sqlx::query(
            "UPDATE notifications SET status = $1, version = version + 1, utime = $2 \
             WHERE biz_id = $3 AND key = $4",
        )
        .bind(notification_status.as_str())
        .bind(now_ms)
        .bind(biz_id)
        .bind(key)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update notification status", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }

    async fn find_check_back(
        &self,
        now_ms: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<TxNotification>, StoreError> {
        let rows = sqlx::query(
            "SELECT tx_id, key, notification_id, biz_id, status, check_count, \
                    next_check_time, ctime, utime \
             FROM tx_notifications \
             WHERE status = 'PREPARE' AND next_check_time > 0 AND next_check_time <= $1 \
             ORDER BY next_check_time ASC OFFSET $2 LIMIT $3",
        )
        .bind(now_ms)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find check back", e))?;

        let mut txns = Vec::with_capacity(rows.len());
        for row in &rows {
            let bad = |what: &str, e: sqlx::Error| {
                StoreError::Database(format!("decode {what}: {e}"))
            };
            let status: String = row.try_get("status").map_err(|e| bad("status", e))?;
            let notification_id: i64 = row
                .try_get("notification_id")
                .map_err(|e| bad("notification_id", e))?;

            let n_row = sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM notifications WHERE id = $1"
            ))
            .bind(notification_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("check back notification", e))?;

            txns.push(TxNotification {
                tx_id: row.try_get("tx_id").map_err(|e| bad("tx_id", e))?,
                notification: row_to_notification(&n_row)?,
                biz_id: row.try_get("biz_id").map_err(|e| bad("biz_id", e))?,
                key: row.try_get("key").map_err(|e| bad("key", e))?,
                status: TxStatus::parse(&status)
                    .ok_or_else(|| StoreError::Database(format!("unknown tx status {status:?}")))?,
                check_count: row.try_get("check_count").map_err(|e| bad("check_count", e))?,
                next_check_time: row
                    .try_get("next_check_time")
                    .map_err(|e| bad("next_check_time", e))?,
                ctime: row.try_get("ctime").map_err(|e| bad("ctime", e))?,
                utime: row.try_get("utime").map_err(|e| bad("utime", e))?,
            });
        }
        Ok(txns)
    }

    #[instrument(skip(self, txns), fields(count = txns.len()), err)]
    async fn batch_update_check_status(
        &self,
        txns: &[TxNotification],
        notification_status: SendStatus,
    ) -> Result<(), StoreError> {
        if txns.is_empty() {
            return Ok(());
        }
        let now_ms = Utc::now().timestamp_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        // One parameterized statement for the whole group.
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("UPDATE tx_notifications SET utime = ");
        builder.push_bind(now_ms);
        builder.push(", status = CASE tx_id");
        for txn in txns {
            builder.push(" WHEN ");
            builder.push_bind(txn.tx_id);
            builder.push(" THEN ");
            builder.push_bind(txn.status.as_str());
        }
        builder.push(" ELSE status END, check_count = CASE tx_id");
        for txn in txns {
            builder.push(" WHEN ");
            builder.push_bind(txn.tx_id);
            builder.push(" THEN ");
            builder.push_bind(txn.check_count);
        }
        builder.push(" ELSE check_count END, next_check_time = CASE tx_id");
        for txn in txns {
            builder.push(" WHEN ");
            builder.push_bind(txn.tx_id);
            builder.push(" THEN ");
            builder.push_bind(txn.next_check_time);
        }
        builder.push(" ELSE next_check_time END WHERE status = 'PREPARE' AND tx_id IN (");
        let mut separated = builder.separated(", ");
        for txn in txns {
            separated.push_bind(txn.tx_id);
        }
        builder.push(")");
        builder
            .build()
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("batch update tx", e))?;

        if notification_status != SendStatus::Prepare {
            let ids: Vec<i64> = txns.iter().map(|t| t.notification.id).collect();
            sqlx::query(
                "UPDATE notifications SET status = $1, version = version + 1, utime = $2 \
                 WHERE id = ANY($3)",
            )
            .bind(notification_status.as_str())
            .bind(now_ms)
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("batch update tx notifications", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }
}
