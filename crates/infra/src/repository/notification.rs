//! Notification repository: persistence coupled with quota reservation.
//!
//! Every create reserves quota first; if the insert then fails the
//! reservation is rolled back best-effort (a failed rollback is logged, not
//! propagated). Quota is released on FAILED outcomes only, never on
//! SUCCEEDED.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::error;

use courier_core::notification::Channel;
use courier_core::{CoreResult, Notification, SendStatus};

use crate::quota::{QuotaItem, QuotaStore};
use crate::store::NotificationStore;

const DEFAULT_QUOTA: i32 = 1;

pub struct NotificationRepository {
    store: Arc<dyn NotificationStore>,
    quota: Arc<dyn QuotaStore>,
}

impl NotificationRepository {
    pub fn new(store: Arc<dyn NotificationStore>, quota: Arc<dyn QuotaStore>) -> Self {
        Self { store, quota }
    }

    /// Create one notification; reserves one unit of quota up front.
    pub async fn create(&self, notification: Notification) -> CoreResult<Notification> {
        self.create_inner(notification, false).await
    }

    /// Create plus an `INIT` callback log in the same transaction.
    pub async fn create_with_callback_log(
        &self,
        notification: Notification,
    ) -> CoreResult<Notification> {
        self.create_inner(notification, true).await
    }

    async fn create_inner(
        &self,
        notification: Notification,
        with_callback_log: bool,
    ) -> CoreResult<Notification> {
        let (biz_id, channel) = (notification.biz_id, notification.channel);
        self.quota.decr(biz_id, channel, DEFAULT_QUOTA).await?;

        match self.store.create(notification, with_callback_log).await {
            Ok(created) => Ok(created),
            Err(err) => {
                if let Err(rollback) = self.quota.incr(biz_id, channel, DEFAULT_QUOTA).await {
                    error!(
                        biz_id,
                        channel = %channel,
                        error = %rollback,
                        "quota rollback failed after create error"
                    );
                }
                Err(err.into())
            }
        }
    }

    /// Batch create with all-or-nothing quota reservation.
    pub async fn batch_create(
        &self,
        notifications: Vec<Notification>,
        with_callback_log: bool,
    ) -> CoreResult<Vec<Notification>> {
        if notifications.is_empty() {
            return Ok(Vec::new());
        }
        let items = Self::quota_items(&notifications);
        self.quota.multi_decr(&items).await?;

        match self.store.batch_create(notifications, with_callback_log).await {
            Ok(created) => Ok(created),
            Err(err) => {
                if let Err(rollback) = self.quota.multi_incr(&items).await {
                    error!(error = %rollback, "quota rollback failed after batch create error");
                }
                Err(err.into())
            }
        }
    }

    fn quota_items(notifications: &[Notification]) -> Vec<QuotaItem> {
        let mut grouped: HashMap<(i64, Channel), i32> = HashMap::new();
        for n in notifications {
            *grouped.entry((n.biz_id, n.channel)).or_insert(0) += DEFAULT_QUOTA;
        }
        grouped
            .into_iter()
            .map(|((biz_id, channel), n)| QuotaItem { biz_id, channel, n })
            .collect()
    }

    pub async fn get_by_id(&self, id: i64) -> CoreResult<Notification> {
        Ok(self.store.get_by_id(id).await?)
    }

    pub async fn get_by_key(&self, biz_id: i64, key: &str) -> CoreResult<Notification> {
        Ok(self.store.get_by_key(biz_id, key).await?)
    }

    pub async fn batch_get_by_ids(
        &self,
        ids: &[i64],
    ) -> CoreResult<HashMap<i64, Notification>> {
        Ok(self.store.batch_get_by_ids(ids).await?)
    }

    /// Optimistic transition on the row's version.
    pub async fn cas_status(&self, notification: &Notification) -> CoreResult<()> {
        Ok(self
            .store
            .cas_status(notification.id, notification.status, notification.version)
            .await?)
    }

    /// Terminal success; the notification's callback logs flip to PENDING.
    pub async fn mark_success(&self, notification: &Notification) -> CoreResult<()> {
        Ok(self.store.mark_success(notification.id).await?)
    }

    /// Terminal failure; the reserved quota goes back.
    pub async fn mark_failed(&self, notification: &Notification) -> CoreResult<()> {
        self.store.mark_failed(notification.id).await?;
        self.quota
            .incr(notification.biz_id, notification.channel, DEFAULT_QUOTA)
            .await
    }

    /// Batch outcome commit; failed rows release their quota after the
    /// transaction commits (best-effort).
    pub async fn batch_update_status_succeeded_or_failed(
        &self,
        succeeded: &[Notification],
        failed: &[Notification],
    ) -> CoreResult<()> {
        if succeeded.is_empty() && failed.is_empty() {
            return Ok(());
        }
        let succeeded_ids: Vec<i64> = succeeded.iter().map(|n| n.id).collect();
        let failed_ids: Vec<i64> = failed.iter().map(|n| n.id).collect();
        self.store
            .batch_update_terminal(&succeeded_ids, &failed_ids)
            .await?;

        if !failed.is_empty() {
            let items = Self::quota_items(failed);
            if let Err(err) = self.quota.multi_incr(&items).await {
                error!(error = %err, "quota release failed after batch terminal update");
            }
        }
        Ok(())
    }

    pub async fn find_ready(
        &self,
        now: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> CoreResult<Vec<Notification>> {
        Ok(self.store.find_ready(now, offset, limit).await?)
    }

    /// Direct handle for stores that need the same backend (callback
    /// hydration).
    pub fn store(&self) -> Arc<dyn NotificationStore> {
        self.store.clone()
    }
}

impl NotificationRepository {
    /// Quota released by terminal-failure commits; exposed so tests can
    /// assert conservation.
    pub async fn quota_balance(&self, biz_id: i64, channel: Channel) -> CoreResult<Option<i64>> {
        self.quota.get(biz_id, channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::MemoryQuotaStore;
    use crate::store::memory::MemoryNotificationStore;
    use courier_core::{CoreError, SendStrategyConfig, TemplateRef};

    fn notification(id: i64, key: &str) -> Notification {
        Notification {
            id,
            biz_id: 42,
            key: key.into(),
            receivers: vec!["r".into()],
            channel: Channel::Sms,
            template: TemplateRef {
                id: 7,
                version_id: 1,
                params: HashMap::from([("code".into(), "1".into())]),
            },
            status: SendStatus::Sending,
            scheduled_stime: Utc::now(),
            scheduled_etime: Utc::now() + chrono::Duration::hours(1),
            version: 1,
            send_strategy: SendStrategyConfig::Immediate,
        }
    }

    fn repo() -> (NotificationRepository, Arc<MemoryQuotaStore>) {
        let quota = Arc::new(MemoryQuotaStore::new());
        let store = Arc::new(MemoryNotificationStore::new());
        (NotificationRepository::new(store, quota.clone()), quota)
    }

    #[tokio::test]
    async fn create_reserves_quota() {
        let (repo, quota) = repo();
        quota.set(42, Channel::Sms, 10).await.unwrap();

        repo.create(notification(1, "k1")).await.unwrap();
        assert_eq!(quota.get(42, Channel::Sms).await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn create_without_quota_fails_and_persists_nothing() {
        let (repo, quota) = repo();
        quota.set(42, Channel::Sms, 0).await.unwrap();

        let err = repo.create(notification(1, "k1")).await.unwrap_err();
        assert!(matches!(err, CoreError::NoQuota(_)));
        assert!(repo.get_by_key(42, "k1").await.is_err());
        assert_eq!(quota.get(42, Channel::Sms).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn duplicate_create_rolls_the_reservation_back() {
        let (repo, quota) = repo();
        quota.set(42, Channel::Sms, 10).await.unwrap();

        repo.create(notification(1, "k1")).await.unwrap();
        let err = repo.create(notification(2, "k1")).await.unwrap_err();
        assert_eq!(err, CoreError::Duplicate);
        // One reservation stands (the live row); the duplicate's was
        // returned.
        assert_eq!(quota.get(42, Channel::Sms).await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn mark_failed_releases_quota_mark_success_does_not() {
        let (repo, quota) = repo();
        quota.set(42, Channel::Sms, 10).await.unwrap();

        let ok = repo.create(notification(1, "ok")).await.unwrap();
        let bad = repo.create(notification(2, "bad")).await.unwrap();
        assert_eq!(quota.get(42, Channel::Sms).await.unwrap(), Some(8));

        repo.mark_success(&ok).await.unwrap();
        repo.mark_failed(&bad).await.unwrap();
        assert_eq!(quota.get(42, Channel::Sms).await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn batch_terminal_update_releases_only_failed_quota() {
        let (repo, quota) = repo();
        quota.set(42, Channel::Sms, 10).await.unwrap();

        let a = repo.create(notification(1, "a")).await.unwrap();
        let b = repo.create(notification(2, "b")).await.unwrap();
        let c = repo.create(notification(3, "c")).await.unwrap();
        assert_eq!(quota.get(42, Channel::Sms).await.unwrap(), Some(7));

        repo.batch_update_status_succeeded_or_failed(&[a, b], &[c])
            .await
            .unwrap();
        // quota_initial - quota_final == number of non-failed creates.
        assert_eq!(quota.get(42, Channel::Sms).await.unwrap(), Some(8));
    }

    #[tokio::test]
    async fn quota_items_group_per_tenant_channel() {
        let mut sms1 = notification(1, "a");
        sms1.biz_id = 1;
        let mut sms2 = notification(2, "b");
        sms2.biz_id = 1;
        let mut email = notification(3, "c");
        email.biz_id = 1;
        email.channel = Channel::Email;

        let mut items = NotificationRepository::quota_items(&[sms1, sms2, email]);
        items.sort_by_key(|i| i.channel.as_str());
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].n, 2); // SMS
        assert_eq!(items[0].n, 1); // EMAIL
    }
}
