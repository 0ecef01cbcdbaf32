//! Send strategies: how a validated notification gets persisted and when
//! it gets handed to a channel.

use std::sync::Arc;

use tracing::warn;

use courier_core::{
    BatchSendResponse, CoreError, CoreResult, Notification, SendResponse, SendStatus,
};
use courier_infra::repository::NotificationRepository;

use crate::config::BusinessConfigService;
use crate::sender::Sender;

/// Persist-then-send-synchronously. The duplicate-key ladder makes retries
/// by the caller idempotent.
pub struct ImmediateStrategy {
    repo: Arc<NotificationRepository>,
    sender: Arc<Sender>,
    config: Arc<BusinessConfigService>,
}

impl ImmediateStrategy {
    pub fn new(
        repo: Arc<NotificationRepository>,
        sender: Arc<Sender>,
        config: Arc<BusinessConfigService>,
    ) -> Self {
        Self { repo, sender, config }
    }

    pub async fn send(&self, mut notification: Notification) -> CoreResult<SendResponse> {
        notification.set_send_time();
        notification.status = SendStatus::Sending;

        let create_result = if self.wants_callback_log(&notification).await {
            self.repo.create_with_callback_log(notification.clone()).await
        } else {
            self.repo.create(notification.clone()).await
        };

        let created = match create_result {
            Ok(created) => created,
            Err(CoreError::Duplicate) => return self.resend_existing(&notification).await,
            Err(err) => return Err(err),
        };
        self.sender.send(created).await
    }

    /// The unique key already exists: the caller is retrying.
    async fn resend_existing(&self, notification: &Notification) -> CoreResult<SendResponse> {
        let mut found = self
            .repo
            .get_by_key(notification.biz_id, &notification.key)
            .await?;

        match found.status {
            // Already delivered; hand the original result back.
            SendStatus::Succeeded => Ok(SendResponse {
                notification_id: found.id,
                status: SendStatus::Succeeded,
            }),
            // A concurrent send is in flight; the caller retries later.
            SendStatus::Sending => Err(CoreError::send_failed(
                "a concurrent send for this key is in flight",
            )),
            _ => {
                found.status = SendStatus::Sending;
                self.repo.cas_status(&found).await?;
                found.version += 1;
                self.sender.send(found).await
            }
        }
    }

    pub async fn batch_send(
        &self,
        mut notifications: Vec<Notification>,
    ) -> CoreResult<Vec<SendResponse>> {
        if notifications.is_empty() {
            return Ok(Vec::new());
        }
        for n in &mut notifications {
            n.set_send_time();
            n.status = SendStatus::Sending;
        }
        let with_callback_log = self.wants_callback_log(&notifications[0]).await;
        // A single unique-key conflict fails the whole batch.
        let created = self
            .repo
            .batch_create(notifications, with_callback_log)
            .await?;
        self.sender.batch_send(created).await
    }

    async fn wants_callback_log(&self, notification: &Notification) -> bool {
        match self.config.get_by_id(notification.biz_id).await {
            Ok(config) => config.callback_config.is_some(),
            Err(err) => {
                warn!(biz_id = notification.biz_id, error = %err, "config lookup failed");
                false
            }
        }
    }
}

/// Persist as PENDING inside the computed send window; a scheduler tick
/// delivers later. Covers delayed, scheduled, time-window and deadline
/// strategies.
pub struct DeferredStrategy {
    repo: Arc<NotificationRepository>,
    config: Arc<BusinessConfigService>,
}

impl DeferredStrategy {
    pub fn new(repo: Arc<NotificationRepository>, config: Arc<BusinessConfigService>) -> Self {
        Self { repo, config }
    }

    pub async fn send(&self, mut notification: Notification) -> CoreResult<SendResponse> {
        notification.set_send_time();
        notification.status = SendStatus::Pending;

        let created = if self.wants_callback_log(&notification).await {
            self.repo.create_with_callback_log(notification).await?
        } else {
            self.repo.create(notification).await?
        };
        Ok(SendResponse {
            notification_id: created.id,
            status: created.status,
        })
    }

    /// Deferred persistence is per-notification.
    pub async fn batch_send(
        &self,
        notifications: Vec<Notification>,
    ) -> CoreResult<Vec<SendResponse>> {
        let mut responses = Vec::with_capacity(notifications.len());
        for notification in notifications {
            responses.push(self.send(notification).await?);
        }
        Ok(responses)
    }

    async fn wants_callback_log(&self, notification: &Notification) -> bool {
        match self.config.get_by_id(notification.biz_id).await {
            Ok(config) => config.callback_config.is_some(),
            Err(err) => {
                warn!(biz_id = notification.biz_id, error = %err, "config lookup failed");
                false
            }
        }
    }
}

/// Selects the strategy from the notification's own config.
pub struct StrategyDispatcher {
    immediate: ImmediateStrategy,
    deferred: DeferredStrategy,
}

impl StrategyDispatcher {
    pub fn new(immediate: ImmediateStrategy, deferred: DeferredStrategy) -> Self {
        Self { immediate, deferred }
    }

    pub async fn send(&self, notification: Notification) -> CoreResult<SendResponse> {
        if notification.send_strategy.is_immediate() {
            self.immediate.send(notification).await
        } else {
            self.deferred.send(notification).await
        }
    }

    /// Batch send; all notifications must share one strategy family, so the
    /// first one picks.
    pub async fn batch_send(
        &self,
        notifications: Vec<Notification>,
    ) -> CoreResult<BatchSendResponse> {
        let first = notifications
            .first()
            .ok_or_else(|| CoreError::invalid_parameter("notification list is empty"))?;
        let results = if first.send_strategy.is_immediate() {
            self.immediate.batch_send(notifications).await?
        } else {
            self.deferred.batch_send(notifications).await?
        };
        Ok(BatchSendResponse { results })
    }
}
