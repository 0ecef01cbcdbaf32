//! Channel dispatch and the selector-driven provider loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use courier_core::notification::Channel;
use courier_core::{CoreError, CoreResult, Notification, SendResponse};

use crate::provider::SelectorBuilder;

/// A delivery channel (SMS, email, in-app).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, notification: &Notification) -> CoreResult<SendResponse>;
}

/// Channel backed by a provider selector: try providers in selector order,
/// advance on provider failure, succeed on the first provider success,
/// and surface `NoAvailableProvider` once the selector is exhausted.
pub struct SelectorChannel {
    builder: Arc<dyn SelectorBuilder>,
}

impl SelectorChannel {
    pub fn new(builder: Arc<dyn SelectorBuilder>) -> Self {
        Self { builder }
    }
}

#[async_trait]
impl NotificationChannel for SelectorChannel {
    async fn send(&self, notification: &Notification) -> CoreResult<SendResponse> {
        let mut selector = self.builder.build().await?;
        loop {
            let provider = selector.next(notification)?;
            match provider.send(notification).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    warn!(
                        provider = provider.name(),
                        notification_id = notification.id,
                        error = %err,
                        "provider send failed, advancing to next provider"
                    );
                }
            }
        }
    }
}

/// Routes a notification to its channel implementation.
pub struct ChannelDispatcher {
    channels: HashMap<Channel, Arc<dyn NotificationChannel>>,
}

impl ChannelDispatcher {
    pub fn new(channels: HashMap<Channel, Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl NotificationChannel for ChannelDispatcher {
    async fn send(&self, notification: &Notification) -> CoreResult<SendResponse> {
        let channel = self
            .channels
            .get(&notification.channel)
            .ok_or_else(|| CoreError::NoAvailableChannel(notification.channel.to_string()))?;
        channel.send(notification).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{SendProvider, SequentialSelectorBuilder};
    use courier_core::{SendStatus, SendStrategyConfig, TemplateRef};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        name: String,
        calls: AtomicUsize,
        succeed: bool,
    }

    #[async_trait]
    impl SendProvider for CountingProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, notification: &Notification) -> CoreResult<SendResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(SendResponse {
                    notification_id: notification.id,
                    status: SendStatus::Succeeded,
                })
            } else {
                Err(CoreError::send_failed("vendor rejected"))
            }
        }
    }

    fn notification(channel: Channel) -> Notification {
        Notification {
            id: 1,
            biz_id: 42,
            key: "k".into(),
            receivers: vec!["r".into()],
            channel,
            template: TemplateRef {
                id: 7,
                version_id: 1,
                params: std::collections::HashMap::from([("code".into(), "1".into())]),
            },
            status: SendStatus::Sending,
            scheduled_stime: chrono::Utc::now(),
            scheduled_etime: chrono::Utc::now(),
            version: 1,
            send_strategy: SendStrategyConfig::Immediate,
        }
    }

    #[tokio::test]
    async fn advances_past_failing_providers() {
        let failing = Arc::new(CountingProvider {
            name: "failing".into(),
            calls: AtomicUsize::new(0),
            succeed: false,
        });
        let healthy = Arc::new(CountingProvider {
            name: "healthy".into(),
            calls: AtomicUsize::new(0),
            succeed: true,
        });
        let channel = SelectorChannel::new(Arc::new(SequentialSelectorBuilder::new(vec![
            failing.clone(),
            healthy.clone(),
        ])));

        let response = channel.send(&notification(Channel::Sms)).await.unwrap();
        assert_eq!(response.status, SendStatus::Succeeded);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_no_available_provider() {
        let failing = Arc::new(CountingProvider {
            name: "failing".into(),
            calls: AtomicUsize::new(0),
            succeed: false,
        });
        let channel = SelectorChannel::new(Arc::new(SequentialSelectorBuilder::new(vec![
            failing.clone(),
        ])));

        let err = channel.send(&notification(Channel::Sms)).await.unwrap_err();
        assert_eq!(err, CoreError::NoAvailableProvider);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatcher_routes_by_channel() {
        let sms = Arc::new(CountingProvider {
            name: "sms".into(),
            calls: AtomicUsize::new(0),
            succeed: true,
        });
        let mut channels: HashMap<Channel, Arc<dyn NotificationChannel>> = HashMap::new();
        channels.insert(
            Channel::Sms,
            Arc::new(SelectorChannel::new(Arc::new(SequentialSelectorBuilder::new(
                vec![sms],
            )))),
        );
        let dispatcher = ChannelDispatcher::new(channels);

        assert!(dispatcher.send(&notification(Channel::Sms)).await.is_ok());
        let err = dispatcher
            .send(&notification(Channel::Email))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoAvailableChannel(_)));
    }
}
