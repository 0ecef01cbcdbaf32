//! Store ports and their error model.
//!
//! Traits speak domain types directly; each backend owns its own row
//! mapping. The Postgres implementations live in [`postgres`], the
//! in-memory ones (tests + dev wiring) in [`memory`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use courier_core::{
    BusinessConfig, CallbackLogStatus, ChannelTemplate, ChannelTemplateProvider,
    ChannelTemplateVersion, CoreError, Notification, Provider, SendStatus, TxNotification,
    TxStatus,
};
use courier_core::notification::Channel;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryConfigStore, MemoryNotificationStore, MemoryProviderStore, MemoryTemplateStore};
pub use postgres::{
    PgCallbackLogStore, PgConfigStore, PgNotificationStore, PgProviderStore, PgTemplateStore,
    PgTxNotificationStore,
};

/// Storage-tier error, mapped to [`CoreError`] system kinds at the
/// repository boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unique-key conflict; recoverable (idempotent read-back).
    #[error("duplicate key")]
    Duplicate,

    /// Optimistic-concurrency miss on the row's `version`.
    #[error("version mismatch on row {0}")]
    VersionMismatch(i64),

    #[error("row not found")]
    NotFound,

    /// A guarded update matched zero rows (state already moved on).
    #[error("guarded update matched no rows")]
    UpdateStatusFailed,

    #[error("database error: {0}")]
    Database(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate => CoreError::Duplicate,
            StoreError::VersionMismatch(id) => CoreError::VersionMismatch(id),
            StoreError::NotFound => CoreError::NotificationNotFound,
            StoreError::UpdateStatusFailed => CoreError::send_failed(
                "already committed, canceled or expired",
            ),
            StoreError::Database(msg) => CoreError::Storage(msg),
        }
    }
}

/// Callback-log row as stored; the domain [`courier_core::CallbackLog`]
/// embeds the full notification, which repositories join in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackLogRecord {
    pub id: i64,
    pub notification_id: i64,
    pub retry_count: i32,
    pub next_retry_time: i64,
    pub status: CallbackLogStatus,
}

/// Notification persistence.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert one notification (`ctime=utime=now`, `version=1`), optionally
    /// co-inserting an `INIT` callback log in the same transaction.
    async fn create(
        &self,
        notification: Notification,
        with_callback_log: bool,
    ) -> Result<Notification, StoreError>;

    /// Batch insert; a single unique-key conflict fails the whole batch.
    async fn batch_create(
        &self,
        notifications: Vec<Notification>,
        with_callback_log: bool,
    ) -> Result<Vec<Notification>, StoreError>;

    async fn get_by_id(&self, id: i64) -> Result<Notification, StoreError>;

    async fn get_by_key(&self, biz_id: i64, key: &str) -> Result<Notification, StoreError>;

    async fn batch_get_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, Notification>, StoreError>;

    /// `UPDATE … SET status=?, version=version+1 WHERE id=? AND version=?`;
    /// zero rows affected is a [`StoreError::VersionMismatch`].
    async fn cas_status(
        &self,
        id: i64,
        status: SendStatus,
        expected_version: i32,
    ) -> Result<(), StoreError>;

    /// Terminal success: bump version blind and flip the notification's
    /// callback logs to `PENDING` in the same transaction.
    async fn mark_success(&self, id: i64) -> Result<(), StoreError>;

    /// Terminal failure: bump version blind. Quota release happens in the
    /// repository layer, post-commit.
    async fn mark_failed(&self, id: i64) -> Result<(), StoreError>;

    /// Two disjoint terminal sets in one transaction; the succeeded set also
    /// flips callback logs to `PENDING`. Versions increment blind.
    async fn batch_update_terminal(
        &self,
        succeeded_ids: &[i64],
        failed_ids: &[i64],
    ) -> Result<(), StoreError>;

    /// `status=PENDING AND scheduled_stime <= now <= scheduled_etime`,
    /// ordered by `scheduled_stime`.
    async fn find_ready(
        &self,
        now: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError>;
}

/// Transactional-notification persistence. Implementations share storage
/// with the notification store: prepare and the status transitions touch
/// both tables atomically.
#[async_trait]
pub trait TxNotificationStore: Send + Sync {
    /// Insert-if-absent of both the tx row (`PREPARE`) and its underlying
    /// notification (`PREPARE`) in one transaction. Returns the
    /// notification id (the existing one when the key was already taken).
    async fn prepare(&self, txn: TxNotification) -> Result<i64, StoreError>;

    /// Guarded `PREPARE -> status` transition of the tx row plus the
    /// matching notification status flip. Zero guarded rows is a
    /// [`StoreError::UpdateStatusFailed`].
    async fn update_status(
        &self,
        biz_id: i64,
        key: &str,
        status: TxStatus,
        notification_status: SendStatus,
    ) -> Result<(), StoreError>;

    /// Txs with `status=PREPARE AND 0 < next_check_time <= now`, ordered by
    /// `next_check_time`.
    async fn find_check_back(
        &self,
        now_ms: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<TxNotification>, StoreError>;

    /// Batch write-back after one back-check tick: per-tx status /
    /// check_count / next_check_time (single parameterized statement), plus
    /// the grouped notification status flip when `notification_status` is a
    /// real transition (i.e. not `Prepare`).
    async fn batch_update_check_status(
        &self,
        txns: &[TxNotification],
        notification_status: SendStatus,
    ) -> Result<(), StoreError>;
}

/// Callback-log persistence.
#[async_trait]
pub trait CallbackLogStore: Send + Sync {
    async fn find_by_notification_ids(
        &self,
        notification_ids: &[i64],
    ) -> Result<Vec<CallbackLogRecord>, StoreError>;

    /// `status=PENDING AND next_retry_time <= now`, ordered by
    /// `next_retry_time`.
    async fn find_due(
        &self,
        now_ms: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<CallbackLogRecord>, StoreError>;

    async fn update(&self, logs: &[CallbackLogRecord]) -> Result<(), StoreError>;
}

/// Tenant configuration persistence.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<BusinessConfig, StoreError>;

    async fn get_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, BusinessConfig>, StoreError>;

    /// Stable-order page over all configs (cache preload).
    async fn find(&self, offset: i64, limit: i64) -> Result<Vec<BusinessConfig>, StoreError>;

    async fn save(&self, config: BusinessConfig) -> Result<(), StoreError>;
}

/// Template metadata persistence.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get_template_by_id(&self, id: i64) -> Result<ChannelTemplate, StoreError>;

    async fn get_versions_by_template_ids(
        &self,
        template_ids: &[i64],
    ) -> Result<Vec<ChannelTemplateVersion>, StoreError>;

    async fn get_providers_by_version_ids(
        &self,
        version_ids: &[i64],
    ) -> Result<Vec<ChannelTemplateProvider>, StoreError>;

    async fn save_template(&self, template: ChannelTemplate) -> Result<(), StoreError>;

    async fn save_version(&self, version: ChannelTemplateVersion) -> Result<(), StoreError>;

    async fn save_provider(
        &self,
        provider: ChannelTemplateProvider,
    ) -> Result<(), StoreError>;
}

/// Vendor descriptor persistence.
#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// Insert; `(name, channel)` is unique.
    async fn create(&self, provider: Provider) -> Result<Provider, StoreError>;

    /// Active providers for a channel, ordered weight desc then id asc (the
    /// baseline selector order).
    async fn find_active_by_channel(
        &self,
        channel: Channel,
    ) -> Result<Vec<Provider>, StoreError>;
}
