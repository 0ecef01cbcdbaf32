//! Callback engine: delivers send outcomes to tenants with per-tenant
//! retry policies.
//!
//! Firing is reusable from the online send path (immediately after the
//! outcome commit) and from the drain loop that picks up PENDING logs
//! whose retry slot has opened. Callback failures never propagate into the
//! send path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::warn;

use courier_core::{CallbackConfig, CallbackLog, CallbackLogStatus, CoreError, CoreResult};
use courier_infra::loopjob::{LoopJob, LoopStep};
use courier_infra::repository::CallbackLogRepository;
use courier_infra::rpc::{CallbackClient, CallbackRequest};
use courier_infra::LockClient;
use tokio_util::sync::CancellationToken;

use crate::config::BusinessConfigService;

pub const CALLBACK_LOCK_KEY: &str = "callback_log_job";
const DRAIN_BATCH_SIZE: i64 = 10;

pub struct CallbackService {
    config: Arc<BusinessConfigService>,
    repo: Arc<CallbackLogRepository>,
    client: Arc<dyn CallbackClient>,
    /// Hot `biz_id -> callback_config` map, populated lazily; entries only
    /// age out with the process (config changes propagate via cache TTL on
    /// the slow path).
    hot_configs: DashMap<i64, CallbackConfig>,
}

impl CallbackService {
    pub fn new(
        config: Arc<BusinessConfigService>,
        repo: Arc<CallbackLogRepository>,
        client: Arc<dyn CallbackClient>,
    ) -> Self {
        Self {
            config,
            repo,
            client,
            hot_configs: DashMap::new(),
        }
    }

    /// Fire the callback(s) for one notification, both outcomes.
    pub async fn send_callback_by_notification(
        &self,
        notification_id: i64,
    ) -> CoreResult<()> {
        let logs = self.repo.find_by_notification_ids(&[notification_id]).await?;
        self.send_and_update(logs).await
    }

    /// Fire callbacks for a batch of notifications.
    pub async fn send_callback_by_notifications(
        &self,
        notification_ids: &[i64],
    ) -> CoreResult<()> {
        if notification_ids.is_empty() {
            return Ok(());
        }
        let logs = self.repo.find_by_notification_ids(notification_ids).await?;
        self.send_and_update(logs).await
    }

    /// Shared firing path: attempt every log, persist whatever changed.
    pub async fn send_and_update(&self, mut logs: Vec<CallbackLog>) -> CoreResult<()> {
        let mut changed = Vec::with_capacity(logs.len());
        for log in logs.iter_mut() {
            match self.fire_one(log).await {
                Ok(true) => changed.push(log.clone()),
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        callback_log_id = log.id,
                        notification_id = log.notification.id,
                        error = %err,
                        "tenant callback attempt failed"
                    );
                }
            }
        }
        self.repo.update(&changed).await
    }

    /// One attempt against the tenant. `Ok(true)` means the log changed and
    /// needs persisting.
    async fn fire_one(&self, log: &mut CallbackLog) -> CoreResult<bool> {
        let config = self
            .callback_config(log.notification.biz_id)
            .await?
            .ok_or(CoreError::ConfigNotFound)?;

        let accepted = self
            .client
            .handle_notification_result(
                &config.service_name,
                &CallbackRequest::from_notification(&log.notification),
            )
            .await?;

        if accepted {
            log.status = CallbackLogStatus::Success;
            return Ok(true);
        }

        // The tenant rejected the result; spend retry budget.
        let next = config
            .retry_policy
            .as_ref()
            .and_then(|policy| policy.build().ok())
            .and_then(|strategy| strategy.next_with_retries(log.retry_count + 1));
        match next {
            Some(interval) => {
                log.next_retry_time =
                    Utc::now().timestamp_millis() + interval.as_millis() as i64;
                log.retry_count += 1;
                log.status = CallbackLogStatus::Pending;
            }
            None => {
                log.status = CallbackLogStatus::Failed;
            }
        }
        Ok(true)
    }

    async fn callback_config(&self, biz_id: i64) -> CoreResult<Option<CallbackConfig>> {
        if let Some(config) = self.hot_configs.get(&biz_id) {
            return Ok(Some(config.clone()));
        }
        let business = self.config.get_by_id(biz_id).await?;
        if let Some(config) = &business.callback_config {
            self.hot_configs.insert(biz_id, config.clone());
        }
        Ok(business.callback_config)
    }
}

/// Lease-looped drainer for PENDING callback logs whose `next_retry_time`
/// has passed.
pub struct CallbackTask {
    service: Arc<CallbackService>,
    repo: Arc<CallbackLogRepository>,
    batch_size: i64,
}

impl CallbackTask {
    pub fn new(service: Arc<CallbackService>, repo: Arc<CallbackLogRepository>) -> Self {
        Self {
            service,
            repo,
            batch_size: DRAIN_BATCH_SIZE,
        }
    }

    /// Run under the callback lease until cancelled.
    pub async fn start(self: Arc<Self>, lock_client: Arc<dyn LockClient>, cancel: CancellationToken) {
        let job = LoopJob::new(lock_client, CALLBACK_LOCK_KEY);
        job.run(cancel, self).await;
    }
}

#[async_trait]
impl LoopStep for CallbackTask {
    async fn run_once(&self) -> CoreResult<()> {
        let now_ms = Utc::now().timestamp_millis();
        let due = self.repo.find_due(now_ms, 0, self.batch_size).await?;
        if due.is_empty() {
            tokio::time::sleep(Duration::from_secs(1)).await;
            return Ok(());
        }
        self.service.send_and_update(due).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::notification::Channel;
    use courier_core::{
        BusinessConfig, Notification, RetryPolicy, SendStatus, SendStrategyConfig, TemplateRef,
    };
    use courier_infra::cache::LocalConfigCache;
    use courier_infra::repository::BusinessConfigRepository;
    use courier_infra::rpc::RecordingCallbackClient;
    use courier_infra::store::memory::{MemoryConfigStore, MemoryNotificationStore};
    use courier_infra::store::{ConfigStore, NotificationStore};
    use std::collections::HashMap;

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
            status: SendStatus::Succeeded,
            scheduled_stime: Utc::now(),
            scheduled_etime: Utc::now(),
            version: 2,
            send_strategy: SendStrategyConfig::Immediate,
        }
    }

    async fn harness(
        client: Arc<RecordingCallbackClient>,
        retry_policy: Option<RetryPolicy>,
    ) -> (Arc<CallbackService>, Arc<CallbackLogRepository>, Arc<MemoryNotificationStore>) {
        let store = Arc::new(MemoryNotificationStore::new());
        let config_store = Arc::new(MemoryConfigStore::new());
        config_store
            .save(BusinessConfig {
                id: 42,
                callback_config: Some(CallbackConfig {
                    service_name: "biz-callback".into(),
                    retry_policy,
                }),
                ..Default::default()
            })
            .await
            .unwrap();
        let config = Arc::new(BusinessConfigService::new(Arc::new(
            BusinessConfigRepository::new(
                config_store,
                Arc::new(LocalConfigCache::new()),
                Arc::new(LocalConfigCache::new()),
            ),
        )));
        let repo = Arc::new(CallbackLogRepository::new(store.clone(), store.clone()));
        let service = Arc::new(CallbackService::new(config, repo.clone(), client));
        (service, repo, store)
    }

    #[tokio::test]
    async fn accepted_callback_marks_the_log_success() {
        let client = Arc::new(RecordingCallbackClient::accepting());
        let (service, repo, store) = harness(client.clone(), None).await;
        store.create(notification(1, "k1"), true).await.unwrap();
        store.mark_success(1).await.unwrap();

        service.send_callback_by_notification(1).await.unwrap();

        let logs = repo.find_by_notification_ids(&[1]).await.unwrap();
        assert_eq!(logs[0].status, CallbackLogStatus::Success);
        assert_eq!(client.requests().len(), 1);
        assert_eq!(client.requests()[0].notification_id, 1);
    }

    #[tokio::test]
    async fn rejected_callback_spends_retry_budget_then_fails() {
        let client = Arc::new(RecordingCallbackClient::rejecting());
        let (service, repo, store) = harness(
            client,
            Some(RetryPolicy::fixed(Duration::from_secs(1), 2)),
        )
        .await;
        store.create(notification(1, "k1"), true).await.unwrap();
        store.mark_success(1).await.unwrap();

        // Attempts 1 and 2 reschedule; attempt 3 exhausts.
        service.send_callback_by_notification(1).await.unwrap();
        let logs = repo.find_by_notification_ids(&[1]).await.unwrap();
        assert_eq!(logs[0].status, CallbackLogStatus::Pending);
        assert_eq!(logs[0].retry_count, 1);
        assert!(logs[0].next_retry_time > Utc::now().timestamp_millis());

        service.send_and_update(logs).await.unwrap();
        let logs = repo.find_by_notification_ids(&[1]).await.unwrap();
        assert_eq!(logs[0].retry_count, 2);

        service.send_and_update(logs).await.unwrap();
        let logs = repo.find_by_notification_ids(&[1]).await.unwrap();
        assert_eq!(logs[0].status, CallbackLogStatus::Failed);
    }

    #[tokio::test]
    async fn rejected_without_policy_fails_immediately() {
        let client = Arc::new(RecordingCallbackClient::rejecting());
        let (service, repo, store) = harness(client, None).await;
        store.create(notification(1, "k1"), true).await.unwrap();
        store.mark_success(1).await.unwrap();

        service.send_callback_by_notification(1).await.unwrap();
        let logs = repo.find_by_notification_ids(&[1]).await.unwrap();
        assert_eq!(logs[0].status, CallbackLogStatus::Failed);
    }

    #[tokio::test]
    async fn drain_step_picks_up_due_pending_logs() {
        let client = Arc::new(RecordingCallbackClient::accepting());
        let (service, repo, store) = harness(client.clone(), None).await;
        store.create(notification(1, "k1"), true).await.unwrap();
        store.mark_success(1).await.unwrap();

        let task = CallbackTask::new(service, repo.clone());
        task.run_once().await.unwrap();

        let logs = repo.find_by_notification_ids(&[1]).await.unwrap();
        assert_eq!(logs[0].status, CallbackLogStatus::Success);
        assert_eq!(client.requests().len(), 1);
    }
}
