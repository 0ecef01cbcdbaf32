//! Asynchronous scheduler: drains PENDING notifications whose send window
//! has opened, under a distributed lease.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use courier_core::{CoreError, CoreResult};
use courier_infra::loopjob::{LoopJob, LoopStep};
use courier_infra::repository::NotificationRepository;
use courier_infra::LockClient;

use crate::sender::Sender;

pub const SCHEDULER_LOCK_KEY: &str = "notification_platform_async_scheduler";

const DEFAULT_BATCH_SIZE: i64 = 10;
const TICK_TIMEOUT: Duration = Duration::from_secs(3);
const EMPTY_PAUSE: Duration = Duration::from_secs(1);

pub struct Scheduler {
    repo: Arc<NotificationRepository>,
    sender: Arc<Sender>,
    batch_size: i64,
}

impl Scheduler {
    pub fn new(repo: Arc<NotificationRepository>, sender: Arc<Sender>) -> Self {
        Self {
            repo,
            sender,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Run the scheduler loop under its lease until cancelled.
    pub async fn start(self: Arc<Self>, lock_client: Arc<dyn LockClient>, cancel: CancellationToken) {
        let job = LoopJob::new(lock_client, SCHEDULER_LOCK_KEY);
        job.run(cancel, self).await;
    }
}

#[async_trait]
impl LoopStep for Scheduler {
    async fn run_once(&self) -> CoreResult<()> {
        let ready = timeout(
            TICK_TIMEOUT,
            self.repo.find_ready(Utc::now(), 0, self.batch_size),
        )
        .await
        .map_err(|_| CoreError::storage("ready scan timed out"))??;

        if ready.is_empty() {
            // Debounce so an empty table doesn't spin the lease loop.
            tokio::time::sleep(EMPTY_PAUSE).await;
            return Ok(());
        }

        self.sender.batch_send(ready).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackService;
    use crate::channel::NotificationChannel;
    use crate::config::BusinessConfigService;
    use courier_core::notification::Channel;
    use courier_core::{
        Notification, SendResponse, SendStatus, SendStrategyConfig, TemplateRef,
    };
    use courier_infra::cache::LocalConfigCache;
    use courier_infra::lease::MemoryLockClient;
    use courier_infra::quota::{MemoryQuotaStore, QuotaStore};
    use courier_infra::repository::{BusinessConfigRepository, CallbackLogRepository};
    use courier_infra::rpc::RecordingCallbackClient;
    use courier_infra::store::memory::{MemoryConfigStore, MemoryNotificationStore};
    use std::collections::HashMap;

    struct OkChannel;

    #[async_trait]
    impl NotificationChannel for OkChannel {
        async fn send(&self, n: &Notification) -> CoreResult<SendResponse> {
            Ok(SendResponse {
                notification_id: n.id,
                status: SendStatus::Succeeded,
            })
        }
    }

    fn pending(id: i64, key: &str, opens_in_secs: i64) -> Notification {
        let now = Utc::now();
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
            status: SendStatus::Pending,
            scheduled_stime: now + chrono::Duration::seconds(opens_in_secs),
            scheduled_etime: now + chrono::Duration::seconds(opens_in_secs) + chrono::Duration::hours(1),
            version: 1,
            send_strategy: SendStrategyConfig::Delayed { delay_seconds: 1 },
        }
    }

    async fn scheduler() -> (Arc<Scheduler>, Arc<NotificationRepository>) {
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
            config,
            Arc::new(CallbackLogRepository::new(store.clone(), store.clone())),
            Arc::new(RecordingCallbackClient::accepting()),
        ));
        let sender = Arc::new(Sender::new(repo.clone(), Arc::new(OkChannel), callbacks));
        (Arc::new(Scheduler::new(repo.clone(), sender)), repo)
    }

    #[tokio::test]
    async fn tick_delivers_open_windows_and_skips_closed_ones() {
        let (scheduler, repo) = scheduler().await;
        repo.create(pending(1, "open", -1)).await.unwrap();
        repo.create(pending(2, "future", 3600)).await.unwrap();

        scheduler.run_once().await.unwrap();

        assert_eq!(
            repo.get_by_id(1).await.unwrap().status,
            SendStatus::Succeeded
        );
        assert_eq!(repo.get_by_id(2).await.unwrap().status, SendStatus::Pending);
    }

    #[tokio::test]
    async fn crashed_tick_leaves_rows_claimable() {
        let (scheduler, repo) = scheduler().await;
        repo.create(pending(1, "open", -1)).await.unwrap();

        // A tick that never committed leaves PENDING rows with their
        // version; a later tick picks them up.
        scheduler.run_once().await.unwrap();
        scheduler.run_once().await.unwrap();
        assert_eq!(
            repo.get_by_id(1).await.unwrap().status,
            SendStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn lease_loop_drives_ticks() {
        let (scheduler, repo) = scheduler().await;
        repo.create(pending(1, "open", -1)).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            let lock_client: Arc<dyn LockClient> = Arc::new(MemoryLockClient::new());
            tokio::spawn(scheduler.clone().start(lock_client, cancel))
        };

        // Give the loop a moment to acquire and tick.
        for _ in 0..50 {
            if repo.get_by_id(1).await.unwrap().status == SendStatus::Succeeded {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(
            repo.get_by_id(1).await.unwrap().status,
            SendStatus::Succeeded
        );
    }
}
