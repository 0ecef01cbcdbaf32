//! In-memory store implementations for tests and the self-contained dev
//! wiring. Semantics mirror the Postgres implementations: unique-key
//! conflicts, guarded updates, version CAS and the transactional coupling
//! between notifications, tx rows and callback logs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use courier_core::notification::Channel;
use courier_core::{
    BusinessConfig, CallbackLogStatus, ChannelTemplate, ChannelTemplateProvider,
    ChannelTemplateVersion, Notification, Provider, SendStatus, TxNotification, TxStatus,
};

use super::{
    CallbackLogRecord, CallbackLogStore, ConfigStore, NotificationStore, ProviderStore,
    StoreError, TemplateStore, TxNotificationStore,
};

#[derive(Default)]
struct Tables {
    notifications: HashMap<i64, Notification>,
    /// `(biz_id, key)` -> notification id (the unique index).
    keys: HashMap<(i64, String), i64>,
    txns: HashMap<i64, TxNotification>,
    tx_keys: HashMap<(i64, String), i64>,
    callback_logs: HashMap<i64, CallbackLogRecord>,
}

/// Shared-state store implementing the notification, tx-notification and
/// callback-log ports, so cross-table "transactions" stay atomic under one
/// lock.
#[derive(Default)]
pub struct MemoryNotificationStore {
    tables: Mutex<Tables>,
    next_tx_id: AtomicI64,
    next_log_id: AtomicI64,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            next_tx_id: AtomicI64::new(1),
            next_log_id: AtomicI64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert_log(&self, tables: &mut Tables, notification_id: i64) {
        let id = self.next_log_id.fetch_add(1, Ordering::Relaxed);
        tables.callback_logs.insert(
            id,
            CallbackLogRecord {
                id,
                notification_id,
                retry_count: 0,
                next_retry_time: Utc::now().timestamp_millis(),
                status: CallbackLogStatus::Init,
            },
        );
    }

    fn flip_logs_pending(tables: &mut Tables, notification_id: i64) {
        for log in tables.callback_logs.values_mut() {
            if log.notification_id == notification_id && log.status == CallbackLogStatus::Init {
                log.status = CallbackLogStatus::Pending;
            }
        }
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(
        &self,
        mut notification: Notification,
        with_callback_log: bool,
    ) -> Result<Notification, StoreError> {
        let mut tables = self.lock();
        let key = (notification.biz_id, notification.key.clone());
        if tables.keys.contains_key(&key) {
            return Err(StoreError::Duplicate);
        }
        notification.version = 1;
        tables.keys.insert(key, notification.id);
        tables
            .notifications
            .insert(notification.id, notification.clone());
        if with_callback_log {
            self.insert_log(&mut tables, notification.id);
        }
        Ok(notification)
    }

    async fn batch_create(
        &self,
        mut notifications: Vec<Notification>,
        with_callback_log: bool,
    ) -> Result<Vec<Notification>, StoreError> {
        let mut tables = self.lock();
        for n in &notifications {
            if tables.keys.contains_key(&(n.biz_id, n.key.clone())) {
                return Err(StoreError::Duplicate);
            }
        }
        for n in &mut notifications {
            n.version = 1;
            tables.keys.insert((n.biz_id, n.key.clone()), n.id);
            tables.notifications.insert(n.id, n.clone());
            if with_callback_log {
                self.insert_log(&mut tables, n.id);
            }
        }
        Ok(notifications)
    }

    async fn get_by_id(&self, id: i64) -> Result<Notification, StoreError> {
        self.lock()
            .notifications
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_key(&self, biz_id: i64, key: &str) -> Result<Notification, StoreError> {
        let tables = self.lock();
        let id = tables
            .keys
            .get(&(biz_id, key.to_string()))
            .ok_or(StoreError::NotFound)?;
        tables
            .notifications
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn batch_get_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, Notification>, StoreError> {
        let tables = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| tables.notifications.get(id).map(|n| (*id, n.clone())))
            .collect())
    }

    async fn cas_status(
        &self,
        id: i64,
        status: SendStatus,
        expected_version: i32,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let row = tables
            .notifications
            .get_mut(&id)
            .ok_or(StoreError::VersionMismatch(id))?;
        if row.version != expected_version {
            return Err(StoreError::VersionMismatch(id));
        }
        row.status = status;
        row.version += 1;
        Ok(())
    }

    async fn mark_success(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let row = tables.notifications.get_mut(&id).ok_or(StoreError::NotFound)?;
        row.status = SendStatus::Succeeded;
        row.version += 1;
        Self::flip_logs_pending(&mut tables, id);
        Ok(())
    }

    async fn mark_failed(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let row = tables.notifications.get_mut(&id).ok_or(StoreError::NotFound)?;
        row.status = SendStatus::Failed;
        row.version += 1;
        Ok(())
    }

    async fn batch_update_terminal(
        &self,
        succeeded_ids: &[i64],
        failed_ids: &[i64],
    ) -> Result<(), StoreError> {
        let mut tables = self.lock();
        for id in succeeded_ids {
            if let Some(row) = tables.notifications.get_mut(id) {
                row.status = SendStatus::Succeeded;
                row.version += 1;
            }
            Self::flip_logs_pending(&mut tables, *id);
        }
        for id in failed_ids {
            if let Some(row) = tables.notifications.get_mut(id) {
                row.status = SendStatus::Failed;
                row.version += 1;
            }
        }
        Ok(())
    }

    async fn find_ready(
        &self,
        now: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let tables = self.lock();
        let mut ready: Vec<_> = tables
            .notifications
            .values()
            .filter(|n| {
                n.status == SendStatus::Pending
                    && n.scheduled_stime <= now
                    && now <= n.scheduled_etime
            })
            .cloned()
            .collect();
        ready.sort_by_key(|n| n.scheduled_stime);
        Ok(ready
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

#[async_trait]
impl TxNotificationStore for MemoryNotificationStore {
    async fn prepare(&self, mut txn: TxNotification) -> Result<i64, StoreError> {
        let mut tables = self.lock();
        let key = (txn.notification.biz_id, txn.notification.key.clone());
        if let Some(existing) = tables.keys.get(&key) {
            return Ok(*existing);
        }
        let notification_id = txn.notification.id;
        txn.notification.version = 1;
        tables.keys.insert(key.clone(), notification_id);
        tables
            .notifications
            .insert(notification_id, txn.notification.clone());

        if !tables.tx_keys.contains_key(&key) {
            let tx_id = self.next_tx_id.fetch_add(1, Ordering::Relaxed);
            txn.tx_id = tx_id;
            let now = Utc::now().timestamp_millis();
            txn.ctime = now;
            txn.utime = now;
            tables.tx_keys.insert(key, tx_id);
            tables.txns.insert(tx_id, txn);
        }
        Ok(notification_id)
    }

    async fn update_status(
        &self,
        biz_id: i64,
        key: &str,
        status: TxStatus,
        notification_status: SendStatus,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let tx_id = *tables
            .tx_keys
            .get(&(biz_id, key.to_string()))
            .ok_or(StoreError::UpdateStatusFailed)?;
        {
            let txn = tables.txns.get_mut(&tx_id).ok_or(StoreError::UpdateStatusFailed)?;
            if txn.status != TxStatus::Prepare {
                return Err(StoreError::UpdateStatusFailed);
            }
            txn.status = status;
            txn.utime = Utc::now().timestamp_millis();
        }
        if let Some(id) = tables.keys.get(&(biz_id, key.to_string())).copied() {
            if let Some(row) = tables.notifications.get_mut(&id) {
                row.status = notification_status;
                row.version += 1;
            }
        }
        Ok(())
    }

    async fn find_check_back(
        &self,
        now_ms: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<TxNotification>, StoreError> {
        let tables = self.lock();
        let mut due: Vec<_> = tables
            .txns
            .values()
            .filter(|t| {
                t.status == TxStatus::Prepare
                    && t.next_check_time > 0
                    && t.next_check_time <= now_ms
            })
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_check_time);
        let mut due: Vec<_> = due
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        // Hydrate the embedded notification from the live table.
        for txn in &mut due {
            if let Some(id) = tables.keys.get(&(txn.biz_id, txn.key.clone())) {
                if let Some(n) = tables.notifications.get(id) {
                    txn.notification = n.clone();
                }
            }
        }
        Ok(due)
    }

    async fn batch_update_check_status(
        &self,
        txns: &[TxNotification],
        notification_status: SendStatus,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let now = Utc::now().timestamp_millis();
        for update in txns {
            let Some(tx_id) = tables
                .tx_keys
                .get(&(update.biz_id, update.key.clone()))
                .copied()
            else {
                continue;
            };
            let Some(txn) = tables.txns.get_mut(&tx_id) else {
                continue;
            };
            if txn.status != TxStatus::Prepare {
                continue;
            }
            txn.status = update.status;
            txn.check_count = update.check_count;
            txn.next_check_time = update.next_check_time;
            txn.utime = now;

            if notification_status != SendStatus::Prepare {
                if let Some(id) = tables.keys.get(&(update.biz_id, update.key.clone())).copied() {
                    if let Some(row) = tables.notifications.get_mut(&id) {
                        row.status = notification_status;
                        row.version += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CallbackLogStore for MemoryNotificationStore {
    async fn find_by_notification_ids(
        &self,
        notification_ids: &[i64],
    ) -> Result<Vec<CallbackLogRecord>, StoreError> {
        let tables = self.lock();
        let mut logs: Vec<_> = tables
            .callback_logs
            .values()
            .filter(|l| notification_ids.contains(&l.notification_id))
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.id);
        Ok(logs)
    }

    async fn find_due(
        &self,
        now_ms: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<CallbackLogRecord>, StoreError> {
        let tables = self.lock();
        let mut due: Vec<_> = tables
            .callback_logs
            .values()
            .filter(|l| l.status == CallbackLogStatus::Pending && l.next_retry_time <= now_ms)
            .cloned()
            .collect();
        due.sort_by_key(|l| l.next_retry_time);
        Ok(due
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn update(&self, logs: &[CallbackLogRecord]) -> Result<(), StoreError> {
        let mut tables = self.lock();
        for log in logs {
            if let Some(row) = tables.callback_logs.get_mut(&log.id) {
                row.retry_count = log.retry_count;
                row.next_retry_time = log.next_retry_time;
                row.status = log.status;
            }
        }
        Ok(())
    }
}

/// In-memory tenant-config store.
#[derive(Default)]
pub struct MemoryConfigStore {
    configs: Mutex<HashMap<i64, BusinessConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_by_id(&self, id: i64) -> Result<BusinessConfig, StoreError> {
        self.configs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, BusinessConfig>, StoreError> {
        let configs = self.configs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(ids
            .iter()
            .filter_map(|id| configs.get(id).map(|c| (*id, c.clone())))
            .collect())
    }

    async fn find(&self, offset: i64, limit: i64) -> Result<Vec<BusinessConfig>, StoreError> {
        let configs = self.configs.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = configs.values().cloned().collect();
        all.sort_by_key(|c| c.id);
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn save(&self, config: BusinessConfig) -> Result<(), StoreError> {
        self.configs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(config.id, config);
        Ok(())
    }
}

/// In-memory template store.
#[derive(Default)]
pub struct MemoryTemplateStore {
    templates: Mutex<HashMap<i64, ChannelTemplate>>,
    versions: Mutex<HashMap<i64, ChannelTemplateVersion>>,
    providers: Mutex<HashMap<i64, ChannelTemplateProvider>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn get_template_by_id(&self, id: i64) -> Result<ChannelTemplate, StoreError> {
        self.templates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_versions_by_template_ids(
        &self,
        template_ids: &[i64],
    ) -> Result<Vec<ChannelTemplateVersion>, StoreError> {
        let versions = self.versions.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = versions
            .values()
            .filter(|v| template_ids.contains(&v.template_id))
            .cloned()
            .collect();
        out.sort_by_key(|v| v.id);
        Ok(out)
    }

    async fn get_providers_by_version_ids(
        &self,
        version_ids: &[i64],
    ) -> Result<Vec<ChannelTemplateProvider>, StoreError> {
        let providers = self.providers.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = providers
            .values()
            .filter(|p| version_ids.contains(&p.template_version_id))
            .cloned()
            .collect();
        out.sort_by_key(|p| p.id);
        Ok(out)
    }

    async fn save_template(&self, template: ChannelTemplate) -> Result<(), StoreError> {
        self.templates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(template.id, template);
        Ok(())
    }

    async fn save_version(&self, version: ChannelTemplateVersion) -> Result<(), StoreError> {
        self.versions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(version.id, version);
        Ok(())
    }

    async fn save_provider(
        &self,
        provider: ChannelTemplateProvider,
    ) -> Result<(), StoreError> {
        self.providers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(provider.id, provider);
        Ok(())
    }
}

/// In-memory vendor-descriptor store.
#[derive(Default)]
pub struct MemoryProviderStore {
    providers: Mutex<HashMap<i64, Provider>>,
    next_id: AtomicI64,
}

impl MemoryProviderStore {
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl ProviderStore for MemoryProviderStore {
    async fn create(&self, mut provider: Provider) -> Result<Provider, StoreError> {
        let mut providers = self.providers.lock().unwrap_or_else(|e| e.into_inner());
        if providers
            .values()
            .any(|p| p.name == provider.name && p.channel == provider.channel)
        {
            return Err(StoreError::Duplicate);
        }
        provider.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        providers.insert(provider.id, provider.clone());
        Ok(provider)
    }

    async fn find_active_by_channel(
        &self,
        channel: Channel,
    ) -> Result<Vec<Provider>, StoreError> {
        let providers = self.providers.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = providers
            .values()
            .filter(|p| {
                p.channel == channel
                    && p.status == courier_core::ProviderStatus::Active
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.weight.cmp(&a.weight).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{SendStrategyConfig, TemplateRef};
    use std::collections::HashMap as Map;

    fn notification(id: i64, biz_id: i64, key: &str, status: SendStatus) -> Notification {
        Notification {
            id,
            biz_id,
            key: key.into(),
            receivers: vec!["r".into()],
            channel: Channel::Sms,
            template: TemplateRef {
                id: 7,
                version_id: 1,
                params: Map::from([("code".into(), "1".into())]),
            },
            status,
            scheduled_stime: Utc::now(),
            scheduled_etime: Utc::now() + chrono::Duration::hours(1),
            version: 1,
            send_strategy: SendStrategyConfig::Immediate,
        }
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected() {
        let store = MemoryNotificationStore::new();
        store
            .create(notification(1, 42, "k1", SendStatus::Sending), false)
            .await
            .unwrap();
        let err = store
            .create(notification(2, 42, "k1", SendStatus::Sending), false)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Duplicate);

        // Same key under another tenant is fine.
        store
            .create(notification(3, 43, "k1", SendStatus::Sending), false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn batch_create_is_all_or_nothing() {
        let store = MemoryNotificationStore::new();
        store
            .create(notification(1, 42, "dup", SendStatus::Pending), false)
            .await
            .unwrap();
        let err = store
            .batch_create(
                vec![
                    notification(2, 42, "fresh", SendStatus::Pending),
                    notification(3, 42, "dup", SendStatus::Pending),
                ],
                false,
            )
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Duplicate);
        assert!(store.get_by_key(42, "fresh").await.is_err());
    }

    #[tokio::test]
    async fn cas_lets_exactly_one_writer_through() {
        let store = MemoryNotificationStore::new();
        store
            .create(notification(1, 42, "k1", SendStatus::Pending), false)
            .await
            .unwrap();

        store
            .cas_status(1, SendStatus::Sending, 1)
            .await
            .unwrap();
        let err = store
            .cas_status(1, SendStatus::Sending, 1)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::VersionMismatch(1));
        assert_eq!(store.get_by_id(1).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn find_ready_only_returns_open_pending_windows() {
        let store = MemoryNotificationStore::new();
        let now = Utc::now();

        let mut open = notification(1, 42, "open", SendStatus::Pending);
        open.scheduled_stime = now - chrono::Duration::seconds(5);
        open.scheduled_etime = now + chrono::Duration::seconds(5);
        store.create(open, false).await.unwrap();

        let mut future = notification(2, 42, "future", SendStatus::Pending);
        future.scheduled_stime = now + chrono::Duration::hours(1);
        future.scheduled_etime = now + chrono::Duration::hours(2);
        store.create(future, false).await.unwrap();

        let mut done = notification(3, 42, "done", SendStatus::Succeeded);
        done.scheduled_stime = now - chrono::Duration::seconds(5);
        done.scheduled_etime = now + chrono::Duration::seconds(5);
        store.create(done, false).await.unwrap();

        let ready = store.find_ready(now, 0, 10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, 1);
        assert!(ready.iter().all(|n| !n.status.is_terminal()));
    }

    #[tokio::test]
    async fn mark_success_flips_callback_log() {
        let store = MemoryNotificationStore::new();
        store
            .create(notification(1, 42, "k1", SendStatus::Sending), true)
            .await
            .unwrap();

        let logs = store.find_by_notification_ids(&[1]).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, CallbackLogStatus::Init);

        store.mark_success(1).await.unwrap();
        let logs = store.find_by_notification_ids(&[1]).await.unwrap();
        assert_eq!(logs[0].status, CallbackLogStatus::Pending);
        assert_eq!(store.get_by_id(1).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn tx_prepare_is_idempotent_on_key() {
        let store = MemoryNotificationStore::new();
        let txn = TxNotification {
            tx_id: 0,
            notification: notification(10, 42, "tx1", SendStatus::Prepare),
            biz_id: 42,
            key: "tx1".into(),
            status: TxStatus::Prepare,
            check_count: 0,
            next_check_time: 0,
            ctime: 0,
            utime: 0,
        };
        let id1 = store.prepare(txn.clone()).await.unwrap();
        assert_eq!(id1, 10);

        let mut again = txn;
        again.notification.id = 11;
        let id2 = store.prepare(again).await.unwrap();
        assert_eq!(id2, 10);
    }

    #[tokio::test]
    async fn tx_commit_guard_rejects_double_commit() {
        let store = MemoryNotificationStore::new();
        let txn = TxNotification {
            tx_id: 0,
            notification: notification(10, 42, "tx1", SendStatus::Prepare),
            biz_id: 42,
            key: "tx1".into(),
            status: TxStatus::Prepare,
            check_count: 0,
            next_check_time: 0,
            ctime: 0,
            utime: 0,
        };
        store.prepare(txn).await.unwrap();

        store
            .update_status(42, "tx1", TxStatus::Commit, SendStatus::Pending)
            .await
            .unwrap();
        assert_eq!(
            store.get_by_key(42, "tx1").await.unwrap().status,
            SendStatus::Pending
        );

        let err = store
            .update_status(42, "tx1", TxStatus::Cancel, SendStatus::Canceled)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::UpdateStatusFailed);
    }

    #[tokio::test]
    async fn provider_order_is_weight_desc_id_asc() {
        let store = MemoryProviderStore::new();
        for (name, weight) in [("a", 10), ("b", 30), ("c", 30), ("d", 20)] {
            store
                .create(Provider {
                    id: 0,
                    name: name.into(),
                    channel: Channel::Sms,
                    endpoint: "http://localhost".into(),
                    region_id: String::new(),
                    api_key: "k".into(),
                    api_secret: "s".into(),
                    app_id: String::new(),
                    weight,
                    qps_limit: 100,
                    daily_limit: 10_000,
                    audit_callback_url: String::new(),
                    status: courier_core::ProviderStatus::Active,
                    ctime: 0,
                    utime: 0,
                })
                .await
                .unwrap();
        }
        let ordered = store.find_active_by_channel(Channel::Sms).await.unwrap();
        let names: Vec<_> = ordered.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "d", "a"]);
    }
}
