//! Callback-log repository: hydrates stored log rows with their
//! notifications so the callback engine can build the tenant request.

use std::sync::Arc;

use courier_core::{CallbackLog, CoreResult};

use crate::store::{CallbackLogRecord, CallbackLogStore, NotificationStore};

pub struct CallbackLogRepository {
    logs: Arc<dyn CallbackLogStore>,
    notifications: Arc<dyn NotificationStore>,
}

impl CallbackLogRepository {
    pub fn new(
        logs: Arc<dyn CallbackLogStore>,
        notifications: Arc<dyn NotificationStore>,
    ) -> Self {
        Self { logs, notifications }
    }

    pub async fn find_by_notification_ids(
        &self,
        notification_ids: &[i64],
    ) -> CoreResult<Vec<CallbackLog>> {
        let records = self.logs.find_by_notification_ids(notification_ids).await?;
        self.hydrate(records).await
    }

    /// PENDING logs whose retry slot has opened.
    pub async fn find_due(
        &self,
        now_ms: i64,
        offset: i64,
        limit: i64,
    ) -> CoreResult<Vec<CallbackLog>> {
        let records = self.logs.find_due(now_ms, offset, limit).await?;
        self.hydrate(records).await
    }

    pub async fn update(&self, logs: &[CallbackLog]) -> CoreResult<()> {
        let records: Vec<CallbackLogRecord> = logs
            .iter()
            .map(|log| CallbackLogRecord {
                id: log.id,
                notification_id: log.notification.id,
                retry_count: log.retry_count,
                next_retry_time: log.next_retry_time,
                status: log.status,
            })
            .collect();
        Ok(self.logs.update(&records).await?)
    }

    async fn hydrate(&self, records: Vec<CallbackLogRecord>) -> CoreResult<Vec<CallbackLog>> {
        let ids: Vec<i64> = records.iter().map(|r| r.notification_id).collect();
        let notifications = self.notifications.batch_get_by_ids(&ids).await?;
        Ok(records
            .into_iter()
            .filter_map(|record| {
                notifications
                    .get(&record.notification_id)
                    .map(|n| CallbackLog {
                        id: record.id,
                        notification: n.clone(),
                        retry_count: record.retry_count,
                        next_retry_time: record.next_retry_time,
                        status: record.status,
                    })
            })
            .collect())
    }
}
