//! Transactional notifications: prepare / commit / cancel, and the
//! back-check loop that settles transactions the caller went silent on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use courier_core::{
    BusinessConfig, CoreError, CoreResult, Notification, SendStatus, TxNotification, TxStatus,
};
use courier_infra::loopjob::{LoopJob, LoopStep};
use courier_infra::repository::NotificationRepository;
use courier_infra::rpc::{CheckStatus, TxCheckClient};
use courier_infra::store::TxNotificationStore;
use courier_infra::LockClient;

use crate::config::BusinessConfigService;
use crate::sender::Sender;

pub const CHECK_BACK_LOCK_KEY: &str = "check_back_job";

const DEFAULT_BATCH_SIZE: i64 = 10;
const TICK_TIMEOUT: Duration = Duration::from_secs(5);
const EMPTY_PAUSE: Duration = Duration::from_secs(1);

pub struct TxNotificationService {
    store: Arc<dyn TxNotificationStore>,
    notifications: Arc<NotificationRepository>,
    config: Arc<BusinessConfigService>,
    sender: Arc<Sender>,
}

impl TxNotificationService {
    pub fn new(
        store: Arc<dyn TxNotificationStore>,
        notifications: Arc<NotificationRepository>,
        config: Arc<BusinessConfigService>,
        sender: Arc<Sender>,
    ) -> Self {
        Self {
            store,
            notifications,
            config,
            sender,
        }
    }

    /// Create the tx envelope and its PREPARE-state notification. Returns
    /// the notification id.
    pub async fn prepare(&self, mut notification: Notification) -> CoreResult<i64> {
        notification.status = SendStatus::Prepare;
        notification.set_send_time();

        let mut txn = TxNotification {
            tx_id: 0,
            biz_id: notification.biz_id,
            key: notification.key.clone(),
            notification,
            status: TxStatus::Prepare,
            check_count: 0,
            next_check_time: 0,
            ctime: 0,
            utime: 0,
        };

        // A tenant with a txn config gets its first back-check scheduled;
        // everyone else is probed never.
        if let Ok(config) = self.config.get_by_id(txn.biz_id).await {
            if let Some(txn_config) = &config.txn_config {
                if txn_config.initial_delay_seconds > 0 {
                    txn.next_check_time = Utc::now().timestamp_millis()
                        + txn_config.initial_delay_seconds * 1000;
                }
            }
        }

        Ok(self.store.prepare(txn).await?)
    }

    /// PREPARE -> COMMIT; the underlying notification goes PENDING (or is
    /// handed to the sender directly when its strategy is immediate).
    pub async fn commit(&self, biz_id: i64, key: &str) -> CoreResult<()> {
        self.store
            .update_status(biz_id, key, TxStatus::Commit, SendStatus::Pending)
            .await?;

        let notification = self.notifications.get_by_key(biz_id, key).await?;
        if notification.send_strategy.is_immediate() {
            self.sender.send(notification).await?;
        }
        Ok(())
    }

    /// PREPARE -> CANCEL; the underlying notification is CANCELED.
    pub async fn cancel(&self, biz_id: i64, key: &str) -> CoreResult<()> {
        Ok(self
            .store
            .update_status(biz_id, key, TxStatus::Cancel, SendStatus::Canceled)
            .await?)
    }
}

/// The back-check loop: probes tenants for PREPARE transactions whose
/// check time has come, and settles them in grouped batch writes.
pub struct TxCheckTask {
    store: Arc<dyn TxNotificationStore>,
    config: Arc<BusinessConfigService>,
    client: Arc<dyn TxCheckClient>,
    batch_size: i64,
}

impl TxCheckTask {
    pub fn new(
        store: Arc<dyn TxNotificationStore>,
        config: Arc<BusinessConfigService>,
        client: Arc<dyn TxCheckClient>,
    ) -> Self {
        Self {
            store,
            config,
            client,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Run the back-check loop under its lease until cancelled.
    pub async fn start(self: Arc<Self>, lock_client: Arc<dyn LockClient>, cancel: CancellationToken) {
        let job = LoopJob::new(lock_client, CHECK_BACK_LOCK_KEY);
        job.run(cancel, self).await;
    }

    async fn one_tick(&self) -> CoreResult<()> {
        let now_ms = Utc::now().timestamp_millis();
        let due = self.store.find_check_back(now_ms, 0, self.batch_size).await?;
        if due.is_empty() {
            tokio::time::sleep(EMPTY_PAUSE).await;
            return Ok(());
        }

        let biz_ids: Vec<i64> = due.iter().map(|t| t.biz_id).collect();
        let configs = self.config.get_by_ids(&biz_ids).await?;
        let configs = Arc::new(configs);

        // Probe concurrently; each task hands back the settled envelope.
        let mut probes = JoinSet::new();
        for txn in due {
            let client = self.client.clone();
            let configs = configs.clone();
            probes.spawn(async move { one_back_check(client, &configs, txn).await });
        }

        let mut retry = Vec::new();
        let mut commit = Vec::new();
        let mut cancel = Vec::new();
        let mut fail = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(txn) => match txn.status {
                    TxStatus::Prepare => retry.push(txn),
                    TxStatus::Commit => commit.push(txn),
                    TxStatus::Cancel => cancel.push(txn),
                    TxStatus::Fail => fail.push(txn),
                },
                Err(err) => error!(error = %err, "back-check probe panicked"),
            }
        }

        // Grouped write-back, one statement per target status.
        let mut first_error = None;
        for (txns, status) in [
            (&retry, SendStatus::Prepare),
            (&commit, SendStatus::Pending),
            (&cancel, SendStatus::Canceled),
            (&fail, SendStatus::Failed),
        ] {
            if txns.is_empty() {
                continue;
            }
            if let Err(err) = self.store.batch_update_check_status(txns, status).await {
                warn!(error = %err, status = %status, "back-check batch update failed");
                first_error.get_or_insert(CoreError::from(err));
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// One probe: resolve the tenant's txn config, call its check endpoint,
/// settle the envelope.
async fn one_back_check(
    client: Arc<dyn TxCheckClient>,
    configs: &HashMap<i64, BusinessConfig>,
    mut txn: TxNotification,
) -> TxNotification {
    let txn_config = configs.get(&txn.biz_id).and_then(|c| c.txn_config.as_ref());
    let Some(txn_config) = txn_config else {
        // Nothing to probe; the transaction can never settle.
        txn.next_check_time = 0;
        txn.status = TxStatus::Fail;
        return txn;
    };

    let result = client.check(&txn_config.service_name, &txn.key).await;
    txn.check_count += 1;
    match result {
        Ok(CheckStatus::Commit) => {
            txn.next_check_time = 0;
            txn.status = TxStatus::Commit;
        }
        Ok(CheckStatus::Cancel) => {
            txn.next_check_time = 0;
            txn.status = TxStatus::Cancel;
        }
        Ok(CheckStatus::Unknown) => {
            txn.schedule_next_check(Some(txn_config));
        }
        Err(err) => {
            warn!(
                biz_id = txn.biz_id,
                key = %txn.key,
                error = %err,
                "back-check probe failed"
            );
            txn.schedule_next_check(Some(txn_config));
        }
    }
    txn
}

#[async_trait]
impl LoopStep for TxCheckTask {
    async fn run_once(&self) -> CoreResult<()> {
        timeout(TICK_TIMEOUT, self.one_tick())
            .await
            .map_err(|_| CoreError::storage("back-check tick timed out"))?
    }
}
