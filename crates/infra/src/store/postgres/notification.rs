//! Postgres notification store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use courier_core::notification::Channel;
use courier_core::{Notification, SendStatus, SendStrategyConfig, TemplateRef};

use super::map_sqlx_error;
use crate::store::{NotificationStore, StoreError};

pub(crate) const SELECT_COLUMNS: &str = "id, biz_id, key, receivers, channel, template_id, \
     template_version_id, template_params, send_strategy, status, \
     scheduled_stime, scheduled_etime, version";

#[derive(Debug, Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn row_to_notification(row: &PgRow) -> Result<Notification, StoreError> {
    let bad = |what: &str, e: String| StoreError::Database(format!("decode {what}: {e}"));

    let channel: String = row.try_get("channel").map_err(|e| bad("channel", e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| bad("status", e.to_string()))?;
    let receivers: String = row
        .try_get("receivers")
        .map_err(|e| bad("receivers", e.to_string()))?;
    let params: String = row
        .try_get("template_params")
        .map_err(|e| bad("template_params", e.to_string()))?;
    let strategy: String = row
        .try_get("send_strategy")
        .map_err(|e| bad("send_strategy", e.to_string()))?;

    Ok(Notification {
        id: row.try_get("id").map_err(|e| bad("id", e.to_string()))?,
        biz_id: row.try_get("biz_id").map_err(|e| bad("biz_id", e.to_string()))?,
        key: row.try_get("key").map_err(|e| bad("key", e.to_string()))?,
        receivers: serde_json::from_str(&receivers)
            .map_err(|e| bad("receivers", e.to_string()))?,
        channel: Channel::parse(&channel)
            .map_err(|e| bad("channel", e.to_string()))?,
        template: TemplateRef {
            id: row
                .try_get("template_id")
                .map_err(|e| bad("template_id", e.to_string()))?,
            version_id: row
                .try_get("template_version_id")
                .map_err(|e| bad("template_version_id", e.to_string()))?,
            params: serde_json::from_str(&params)
                .map_err(|e| bad("template_params", e.to_string()))?,
        },
        status: SendStatus::parse(&status).map_err(|e| bad("status", e.to_string()))?,
        scheduled_stime: millis_to_utc(
            row.try_get("scheduled_stime")
                .map_err(|e| bad("scheduled_stime", e.to_string()))?,
        ),
        scheduled_etime: millis_to_utc(
            row.try_get("scheduled_etime")
                .map_err(|e| bad("scheduled_etime", e.to_string()))?,
        ),
        version: row
            .try_get("version")
            .map_err(|e| bad("version", e.to_string()))?,
        send_strategy: serde_json::from_str::<SendStrategyConfig>(&strategy)
            .map_err(|e| bad("send_strategy", e.to_string()))?,
    })
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

pub(crate) fn encode_notification(
    n: &Notification,
) -> Result<(String, String, String), StoreError> {
    let receivers = serde_json::to_string(&n.receivers)
        .map_err(|e| StoreError::Database(format!("encode receivers: {e}")))?;
    let params = serde_json::to_string(&n.template.params)
        .map_err(|e| StoreError::Database(format!("encode template_params: {e}")))?;
    let strategy = serde_json::to_string(&n.send_strategy)
        .map_err(|e| StoreError::Database(format!("encode send_strategy: {e}")))?;
    Ok((receivers, params, strategy))
}

pub(crate) async fn insert_notification<'e, E>(
    executor: E,
    n: &Notification,
    now_ms: i64,
    on_conflict_do_nothing: bool,
) -> Result<u64, StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let (receivers, params, strategy) = encode_notification(n)?;
    let conflict_clause = if on_conflict_do_nothing {
        " ON CONFLICT (biz_id, key) DO NOTHING"
    } else {
        ""
    };
    let sql = format!(
        "INSERT INTO notifications \
         (id, biz_id, key, receivers, channel, template_id, template_version_id, \
          template_params, send_strategy, status, scheduled_stime, scheduled_etime, \
          version, ctime, utime) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 1, $13, $13){conflict_clause}"
    );
    let result = sqlx::query(&sql)
        .bind(n.id)
        .bind(n.biz_id)
        .bind(&n.key)
        .bind(receivers)
        .bind(n.channel.as_str())
        .bind(n.template.id)
        .bind(n.template.version_id)
        .bind(params)
        .bind(strategy)
        .bind(n.status.as_str())
        .bind(n.scheduled_stime.timestamp_millis())
        .bind(n.scheduled_etime.timestamp_millis())
        .bind(now_ms)
        .execute(executor)
        .await
        .map_err(|e| map_sqlx_error("insert notification", e))?;
    Ok(result.rows_affected())
}

pub(crate) async fn insert_callback_log<'e, E>(
    executor: E,
    notification_id: i64,
    now_ms: i64,
) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        "INSERT INTO callback_logs (notification_id, retry_count, next_retry_time, status, ctime, utime) \
         VALUES ($1, 0, $2, 'INIT', $2, $2)",
    )
    .bind(notification_id)
    .bind(now_ms)
    .execute(executor)
    .await
    .map_err(|e| map_sqlx_error("insert callback log", e))?;
    Ok(())
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    #[instrument(skip(self, notification), fields(id = notification.id, biz_id = notification.biz_id), err)]
    async fn create(
        &self,
        mut notification: Notification,
        with_callback_log: bool,
    ) -> Result<Notification, StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        notification.version = 1;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        insert_notification(&mut *tx, &notification, now_ms, false).await?;
        if with_callback_log {
            insert_callback_log(&mut *tx, notification.id, now_ms).await?;
        }
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(notification)
    }

    #[instrument(skip(self, notifications), fields(count = notifications.len()), err)]
    async fn batch_create(
        &self,
        mut notifications: Vec<Notification>,
        with_callback_log: bool,
    ) -> Result<Vec<Notification>, StoreError> {
        if notifications.is_empty() {
            return Ok(notifications);
        }
        let now_ms = Utc::now().timestamp_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        for n in &mut notifications {
            n.version = 1;
            insert_notification(&mut *tx, n, now_ms, false).await?;
            if with_callback_log {
                insert_callback_log(&mut *tx, n.id, now_ms).await?;
            }
        }
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(notifications)
    }

    async fn get_by_id(&self, id: i64) -> Result<Notification, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM notifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get by id", e))?;
        row_to_notification(&row)
    }

    async fn get_by_key(&self, biz_id: i64, key: &str) -> Result<Notification, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM notifications WHERE biz_id = $1 AND key = $2"
        ))
        .bind(biz_id)
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get by key", e))?;
        row_to_notification(&row)
    }

    async fn batch_get_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, Notification>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM notifications WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("batch get by ids", e))?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in &rows {
            let n = row_to_notification(row)?;
            out.insert(n.id, n);
        }
        Ok(out)
    }

    #[instrument(skip(self), err)]
    async fn cas_status(
        &self,
        id: i64,
        status: SendStatus,
        expected_version: i32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE notifications SET status = $1, version = version + 1, utime = $2 \
             WHERE id = $3 AND version = $4",
        )
        .bind(status.as_str())
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("cas status", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::VersionMismatch(id));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn mark_success(&self, id: i64) -> Result<(), StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        sqlx::query(
            "UPDATE notifications SET status = 'SUCCEEDED', version = version + 1, utime = $1 \
             WHERE id = $2",
        )
        .bind(now_ms)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("mark success", e))?;
        sqlx::query(
            "UPDATE callback_logs SET status = 'PENDING', utime = $1 WHERE notification_id = $2",
        )
        .bind(now_ms)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("mark success logs", e))?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn mark_failed(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE notifications SET status = 'FAILED', version = version + 1, utime = $1 \
             WHERE id = $2",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark failed", e))?;
        Ok(())
    }

    #[instrument(skip(self, succeeded_ids, failed_ids), fields(succeeded = succeeded_ids.len(), failed = failed_ids.len()), err)]
    async fn batch_update_terminal(
        &self,
        succeeded_ids: &[i64],
        failed_ids: &[i64],
    ) -> Result<(), StoreError> {
        if succeeded_ids.is_empty() && failed_ids.is_empty() {
            return Ok(());
        }
        let now_ms = Utc::now().timestamp_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        if !succeeded_ids.is_empty() {
            sqlx::query(
                "UPDATE notifications SET status = 'SUCCEEDED', version = version + 1, utime = $1 \
                 WHERE id = ANY($2)",
            )
            .bind(now_ms)
            .bind(succeeded_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("batch mark success", e))?;
            sqlx::query(
                "UPDATE callback_logs SET status = 'PENDING', utime = $1 \
                 WHERE notification_id = ANY($2)",
            )
            .bind(now_ms)
            .bind(succeeded_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("batch mark success logs", e))?;
        }
        if !failed_ids.is_empty() {
            sqlx::query(
                "UPDATE notifications SET status = 'FAILED', version = version + 1, utime = $1 \
                 WHERE id = ANY($2)",
            )
            .bind(now_ms)
            .bind(failed_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("batch mark failed", e))?;
        }
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }

    async fn find_ready(
        &self,
        now: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let now_ms = now.timestamp_millis();
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM notifications \
             WHERE status = 'PENDING' AND scheduled_stime <= $1 AND scheduled_etime >= $1 \
             ORDER BY scheduled_stime ASC OFFSET $2 LIMIT $3"
        ))
        .bind(now_ms)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find ready", e))?;
        rows.iter().map(row_to_notification).collect()
    }
}
