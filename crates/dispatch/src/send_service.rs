//! The send boundary: validation, template resolution, ID minting and
//! strategy dispatch.

use std::sync::Arc;

use courier_core::{
    BatchSendAsyncResponse, BatchSendResponse, CoreError, CoreResult, IdGenerator, Notification,
    SendResponse,
};

use crate::strategy::StrategyDispatcher;
use crate::template::ChannelTemplateService;

pub const BATCH_SIZE_LIMIT: usize = 100;

pub struct SendService {
    templates: Arc<ChannelTemplateService>,
    strategy: Arc<StrategyDispatcher>,
    ids: IdGenerator,
}

impl SendService {
    pub fn new(templates: Arc<ChannelTemplateService>, strategy: Arc<StrategyDispatcher>) -> Self {
        Self {
            templates,
            strategy,
            ids: IdGenerator::new(),
        }
    }

    /// Resolve the template's active version, validate, mint the ID.
    /// Shared by every entry point (including the transactional prepare).
    pub async fn admit(&self, mut notification: Notification) -> CoreResult<Notification> {
        if notification.template.id <= 0 {
            return Err(CoreError::invalid_parameter(format!(
                "template.id = {}",
                notification.template.id
            )));
        }
        let template = self
            .templates
            .get_template_by_id(notification.template.id)
            .await?;
        if !template.has_published() {
            return Err(CoreError::invalid_parameter(format!(
                "template {} has no published version",
                notification.template.id
            )));
        }
        notification.template.version_id = template.active_version_id;

        notification.validate()?;
        notification.id = self.ids.generate(notification.biz_id, &notification.key);
        Ok(notification)
    }

    /// Synchronous single send.
    pub async fn send_notification(
        &self,
        notification: Notification,
    ) -> CoreResult<SendResponse> {
        let notification = self.admit(notification).await?;
        self.strategy.send(notification).await
    }

    /// Asynchronous single send: an immediate strategy is rewritten into a
    /// short delay so the scheduler delivers it.
    pub async fn send_notification_async(
        &self,
        notification: Notification,
    ) -> CoreResult<SendResponse> {
        let mut notification = self.admit(notification).await?;
        notification.replace_async_immediate();
        self.strategy.send(notification).await
    }

    /// Synchronous batch send (all rows share one strategy family).
    pub async fn batch_send_notifications(
        &self,
        notifications: Vec<Notification>,
    ) -> CoreResult<BatchSendResponse> {
        let admitted = self.admit_batch(notifications).await?;
        self.strategy.batch_send(admitted).await
    }

    /// Asynchronous batch send; returns the minted IDs.
    pub async fn batch_send_notifications_async(
        &self,
        notifications: Vec<Notification>,
    ) -> CoreResult<BatchSendAsyncResponse> {
        let mut admitted = self.admit_batch(notifications).await?;
        for n in &mut admitted {
            n.replace_async_immediate();
        }
        let notification_ids = admitted.iter().map(|n| n.id).collect();
        self.strategy.batch_send(admitted).await?;
        Ok(BatchSendAsyncResponse { notification_ids })
    }

    async fn admit_batch(
        &self,
        notifications: Vec<Notification>,
    ) -> CoreResult<Vec<Notification>> {
        if notifications.is_empty() {
            return Err(CoreError::invalid_parameter("notification list is empty"));
        }
        if notifications.len() > BATCH_SIZE_LIMIT {
            return Err(CoreError::BatchSizeOverLimit {
                got: notifications.len(),
                limit: BATCH_SIZE_LIMIT,
            });
        }
        let mut admitted = Vec::with_capacity(notifications.len());
        for notification in notifications {
            admitted.push(self.admit(notification).await?);
        }
        Ok(admitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackService;
    use crate::channel::NotificationChannel;
    use crate::config::BusinessConfigService;
    use crate::sender::Sender;
    use crate::strategy::{DeferredStrategy, ImmediateStrategy};
    use async_trait::async_trait;
    use chrono::Utc;
    use courier_core::notification::Channel;
    use courier_core::template::OwnerType;
    use courier_core::{
        AuditStatus, ChannelTemplate, ChannelTemplateVersion, SendStatus, SendStrategyConfig,
        TemplateRef,
    };
    use courier_core::id::{extract_sequence, extract_timestamp};
    use courier_infra::cache::LocalConfigCache;
    use courier_infra::quota::{MemoryQuotaStore, QuotaStore};
    use courier_infra::repository::{
        BusinessConfigRepository, CallbackLogRepository, NotificationRepository,
    };
    use courier_infra::rpc::RecordingCallbackClient;
    use courier_infra::store::memory::{
        MemoryConfigStore, MemoryNotificationStore, MemoryTemplateStore,
    };
    use courier_infra::store::TemplateStore;
    use std::collections::HashMap;

    struct OkChannel;

    #[async_trait]
    impl NotificationChannel for OkChannel {
        async fn send(&self, n: &courier_core::Notification) -> CoreResult<SendResponse> {
            Ok(SendResponse {
                notification_id: n.id,
                status: SendStatus::Succeeded,
            })
        }
    }

    fn request(key: &str, strategy: SendStrategyConfig) -> Notification {
        Notification {
            id: 0,
            biz_id: 42,
            key: key.into(),
            receivers: vec!["13800000000".into()],
            channel: Channel::Sms,
            template: TemplateRef {
                id: 7,
                version_id: 1,
                params: HashMap::from([("code".into(), "1234".into())]),
            },
            status: SendStatus::Pending,
            scheduled_stime: Utc::now(),
            scheduled_etime: Utc::now(),
            version: 0,
            send_strategy: strategy,
        }
    }

    async fn service(active_version: i64) -> SendService {
        let template_store = Arc::new(MemoryTemplateStore::new());
        template_store
            .save_template(ChannelTemplate {
                id: 7,
                owner_id: 42,
                owner_type: OwnerType::Organization,
                name: "otp".into(),
                description: "code".into(),
                channel: Channel::Sms,
                active_version_id: active_version,
                ctime: 0,
                utime: 0,
                versions: vec![],
            })
            .await
            .unwrap();
        template_store
            .save_version(ChannelTemplateVersion {
                id: 1,
                template_id: 7,
                name: "v1".into(),
                signature: "Acme".into(),
                content: "${code}".into(),
                remark: String::new(),
                audit_status: AuditStatus::Approved,
                ctime: 0,
                utime: 0,
                providers: vec![],
            })
            .await
            .unwrap();
        let templates = Arc::new(ChannelTemplateService::new(template_store));

        let quota = Arc::new(MemoryQuotaStore::new());
        quota.set(42, Channel::Sms, 1000).await.unwrap();
        let store = Arc::new(MemoryNotificationStore::new());
        let repo = Arc::new(NotificationRepository::new(store.clone(), quota));
        let config = Arc::new(BusinessConfigService::new(Arc::new(
            BusinessConfigRepository::new(
                Arc::new(MemoryConfigStore::new()),
                Arc::new(LocalConfigCache::new()),
                Arc::new(LocalConfigCache::new()),
            ),
        )));
        let callbacks = Arc::new(CallbackService::new(
            config.clone(),
            Arc::new(CallbackLogRepository::new(store.clone(), store.clone())),
            Arc::new(RecordingCallbackClient::accepting()),
        ));
        let sender = Arc::new(Sender::new(repo.clone(), Arc::new(OkChannel), callbacks));
        let strategy = Arc::new(StrategyDispatcher::new(
            ImmediateStrategy::new(repo.clone(), sender, config.clone()),
            DeferredStrategy::new(repo, config),
        ));
        SendService::new(templates, strategy)
    }

    #[tokio::test]
    async fn admit_mints_ids_and_resolves_versions() {
        let svc = service(1).await;
        let before = Utc::now();
        let admitted = svc
            .admit(request("k1", SendStrategyConfig::Immediate))
            .await
            .unwrap();
        assert_ne!(admitted.id, 0);
        assert_eq!(admitted.template.version_id, 1);
        assert!(extract_timestamp(admitted.id) >= before - chrono::Duration::milliseconds(1));

        let next = svc
            .admit(request("k2", SendStrategyConfig::Immediate))
            .await
            .unwrap();
        assert_eq!(
            extract_sequence(next.id),
            (extract_sequence(admitted.id) + 1) % 4096
        );
    }

    #[tokio::test]
    async fn unpublished_template_is_rejected() {
        let svc = service(0).await;
        let err = svc
            .send_notification(request("k1", SendStrategyConfig::Immediate))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn invalid_notification_is_rejected_before_any_send() {
        let svc = service(1).await;
        let mut bad = request("", SendStrategyConfig::Immediate);
        bad.key = String::new();
        assert!(matches!(
            svc.send_notification(bad).await.unwrap_err(),
            CoreError::InvalidParameter(_)
        ));
    }

    #[tokio::test]
    async fn async_send_defers_immediate_strategies() {
        let svc = service(1).await;
        let response = svc
            .send_notification_async(request("k1", SendStrategyConfig::Immediate))
            .await
            .unwrap();
        // Delivered later by the scheduler, so the row parks in PENDING.
        assert_eq!(response.status, SendStatus::Pending);
    }

    #[tokio::test]
    async fn batch_guards_size_and_emptiness() {
        let svc = service(1).await;
        assert!(matches!(
            svc.batch_send_notifications(vec![]).await.unwrap_err(),
            CoreError::InvalidParameter(_)
        ));

        let oversized: Vec<Notification> = (0..=BATCH_SIZE_LIMIT)
            .map(|i| request(&format!("k{i}"), SendStrategyConfig::Immediate))
            .collect();
        assert!(matches!(
            svc.batch_send_notifications(oversized).await.unwrap_err(),
            CoreError::BatchSizeOverLimit { got: 101, limit: 100 }
        ));
    }

    #[tokio::test]
    async fn batch_send_counts_every_row() {
        let svc = service(1).await;
        let batch: Vec<Notification> = (0..5)
            .map(|i| request(&format!("k{i}"), SendStrategyConfig::Immediate))
            .collect();
        let response = svc.batch_send_notifications(batch).await.unwrap();
        assert_eq!(response.results.len(), 5);
        assert!(response
            .results
            .iter()
            .all(|r| r.status == SendStatus::Succeeded));
    }

    #[tokio::test]
    async fn async_batch_returns_minted_ids() {
        let svc = service(1).await;
        let batch: Vec<Notification> = (0..3)
            .map(|i| request(&format!("k{i}"), SendStrategyConfig::Immediate))
            .collect();
        let response = svc.batch_send_notifications_async(batch).await.unwrap();
        assert_eq!(response.notification_ids.len(), 3);
        assert!(response.notification_ids.iter().all(|id| *id != 0));
    }
}
