//! The sender: channel dispatch, outcome commit, callback trigger.

use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, warn};

use courier_core::{CoreResult, Notification, SendResponse, SendStatus};
use courier_infra::repository::NotificationRepository;

use crate::callback::CallbackService;
use crate::channel::NotificationChannel;

const DEFAULT_CONCURRENCY: usize = 16;

pub struct Sender {
    repo: Arc<NotificationRepository>,
    channel: Arc<dyn NotificationChannel>,
    callbacks: Arc<CallbackService>,
    concurrency: usize,
}

impl Sender {
    pub fn new(
        repo: Arc<NotificationRepository>,
        channel: Arc<dyn NotificationChannel>,
        callbacks: Arc<CallbackService>,
    ) -> Self {
        Self {
            repo,
            channel,
            callbacks,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Send one notification and commit its outcome. The callback fires for
    /// both outcomes; callback errors never reach the caller.
    pub async fn send(&self, mut notification: Notification) -> CoreResult<SendResponse> {
        let outcome = match self.channel.send(&notification).await {
            Ok(_) => {
                notification.status = SendStatus::Succeeded;
                self.repo.mark_success(&notification).await
            }
            Err(err) => {
                warn!(
                    notification_id = notification.id,
                    error = %err,
                    "channel send failed"
                );
                notification.status = SendStatus::Failed;
                self.repo.mark_failed(&notification).await
            }
        };
        outcome?;

        if let Err(err) = self
            .callbacks
            .send_callback_by_notification(notification.id)
            .await
        {
            warn!(notification_id = notification.id, error = %err, "callback dispatch failed");
        }

        Ok(SendResponse {
            notification_id: notification.id,
            status: notification.status,
        })
    }

    /// Concurrent fan-out with a bounded worker set, then a single batched
    /// outcome commit carrying fresh row versions.
    pub async fn batch_send(
        &self,
        notifications: Vec<Notification>,
    ) -> CoreResult<Vec<SendResponse>> {
        if notifications.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let succeeded: Arc<Mutex<Vec<SendResponse>>> = Arc::new(Mutex::new(Vec::new()));
        let failed: Arc<Mutex<Vec<SendResponse>>> = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = JoinSet::new();
        for notification in notifications {
            let semaphore = semaphore.clone();
            let channel = self.channel.clone();
            let succeeded = succeeded.clone();
            let failed = failed.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let response = match channel.send(&notification).await {
                    Ok(_) => {
                        let response = SendResponse {
                            notification_id: notification.id,
                            status: SendStatus::Succeeded,
                        };
                        succeeded
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push(response);
                        response
                    }
                    Err(err) => {
                        warn!(
                            notification_id = notification.id,
                            error = %err,
                            "channel send failed"
                        );
                        let response = SendResponse {
                            notification_id: notification.id,
                            status: SendStatus::Failed,
                        };
                        failed
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push(response);
                        response
                    }
                };
                response
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "batch send worker panicked");
            }
        }

        let succeeded = std::mem::take(&mut *succeeded.lock().unwrap_or_else(|e| e.into_inner()));
        let failed = std::mem::take(&mut *failed.lock().unwrap_or_else(|e| e.into_inner()));

        // Re-read for fresh versions so the batch commit reflects reality.
        let all_ids: Vec<i64> = succeeded
            .iter()
            .chain(failed.iter())
            .map(|r| r.notification_id)
            .collect();
        let current = self.repo.batch_get_by_ids(&all_ids).await?;

        let updated = |responses: &[SendResponse], status: SendStatus| -> Vec<Notification> {
            responses
                .iter()
                .filter_map(|r| current.get(&r.notification_id).cloned())
                .map(|mut n| {
                    n.status = status;
                    n
                })
                .collect()
        };
        let succeeded_rows = updated(&succeeded, SendStatus::Succeeded);
        let failed_rows = updated(&failed, SendStatus::Failed);

        self.repo
            .batch_update_status_succeeded_or_failed(&succeeded_rows, &failed_rows)
            .await?;

        if let Err(err) = self.callbacks.send_callback_by_notifications(&all_ids).await {
            warn!(error = %err, "batch callback dispatch failed");
        }

        let mut responses = succeeded;
        responses.extend(failed);
        Ok(responses)
    }
}
