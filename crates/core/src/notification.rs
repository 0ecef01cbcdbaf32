//! The notification aggregate and its send-strategy configuration.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};

/// Delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Sms,
    Email,
    InApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "SMS",
            Channel::Email => "EMAIL",
            Channel::InApp => "IN_APP",
        }
    }

    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "SMS" => Ok(Channel::Sms),
            "EMAIL" => Ok(Channel::Email),
            "IN_APP" => Ok(Channel::InApp),
            _ => Err(CoreError::UnknownChannel),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Send lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendStatus {
    Prepare,
    Canceled,
    Pending,
    Sending,
    Succeeded,
    Failed,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Prepare => "PREPARE",
            SendStatus::Canceled => "CANCELED",
            SendStatus::Pending => "PENDING",
            SendStatus::Sending => "SENDING",
            SendStatus::Succeeded => "SUCCEEDED",
            SendStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "PREPARE" => Ok(SendStatus::Prepare),
            "CANCELED" => Ok(SendStatus::Canceled),
            "PENDING" => Ok(SendStatus::Pending),
            "SENDING" => Ok(SendStatus::Sending),
            "SUCCEEDED" => Ok(SendStatus::Succeeded),
            "FAILED" => Ok(SendStatus::Failed),
            other => Err(CoreError::storage(format!("unknown send status {other:?}"))),
        }
    }

    /// Terminal states are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SendStatus::Succeeded | SendStatus::Failed | SendStatus::Canceled
        )
    }
}

impl std::fmt::Display for SendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the template a notification renders through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub id: i64,
    pub version_id: i64,
    pub params: HashMap<String, String>,
}

/// When to hand a notification to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SendStrategyConfig {
    /// Synchronous send on the request path.
    Immediate,
    /// Send after a delay, driven by the scheduler.
    Delayed { delay_seconds: i64 },
    /// Send at a point in time, driven by the scheduler.
    Scheduled { send_time: DateTime<Utc> },
    /// Send anywhere inside an explicit window.
    TimeWindow {
        start_time_ms: i64,
        end_time_ms: i64,
    },
    /// Send any time up to a deadline.
    Deadline { deadline: DateTime<Utc> },
}

/// Slack appended to point-in-time windows so a briefly stalled scheduler
/// still finds the row inside its window.
fn window_slack() -> Duration {
    Duration::hours(1)
}

impl SendStrategyConfig {
    pub fn is_immediate(&self) -> bool {
        matches!(self, SendStrategyConfig::Immediate)
    }

    /// Compute the `[stime, etime]` send window as of `now`.
    pub fn send_time_window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match *self {
            SendStrategyConfig::Immediate => (now, now + window_slack()),
            SendStrategyConfig::Delayed { delay_seconds } => {
                let start = now + Duration::seconds(delay_seconds);
                (start, start + window_slack())
            }
            SendStrategyConfig::Scheduled { send_time } => {
                (send_time, send_time + window_slack())
            }
            SendStrategyConfig::TimeWindow {
                start_time_ms,
                end_time_ms,
            } => (
                DateTime::from_timestamp_millis(start_time_ms).unwrap_or(now),
                DateTime::from_timestamp_millis(end_time_ms).unwrap_or(now),
            ),
            SendStrategyConfig::Deadline { deadline } => (now, deadline),
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        match *self {
            SendStrategyConfig::Immediate => Ok(()),
            SendStrategyConfig::Delayed { delay_seconds } => {
                if delay_seconds <= 0 {
                    return Err(CoreError::invalid_parameter("delay_seconds must be > 0"));
                }
                Ok(())
            }
            SendStrategyConfig::Scheduled { .. } => Ok(()),
            SendStrategyConfig::TimeWindow {
                start_time_ms,
                end_time_ms,
            } => {
                if end_time_ms < start_time_ms {
                    return Err(CoreError::invalid_parameter(
                        "time window end precedes start",
                    ));
                }
                Ok(())
            }
            SendStrategyConfig::Deadline { .. } => Ok(()),
        }
    }
}

impl Default for SendStrategyConfig {
    fn default() -> Self {
        SendStrategyConfig::Immediate
    }
}

/// A single unit of delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub biz_id: i64,
    pub key: String,
    pub receivers: Vec<String>,
    pub channel: Channel,
    pub template: TemplateRef,
    pub status: SendStatus,
    pub scheduled_stime: DateTime<Utc>,
    pub scheduled_etime: DateTime<Utc>,
    /// Monotonic version for CAS; starts at 1, +1 per status mutation.
    pub version: i32,
    pub send_strategy: SendStrategyConfig,
}

impl Notification {
    /// Stamp the send window from the strategy config.
    pub fn set_send_time(&mut self) {
        let (stime, etime) = self.send_strategy.send_time_window(Utc::now());
        self.scheduled_stime = stime;
        self.scheduled_etime = etime;
    }

    /// An immediate strategy arriving through an async entry point cannot be
    /// honored synchronously; rewrite it into a short delay so the scheduler
    /// performs the send.
    pub fn replace_async_immediate(&mut self) {
        if self.send_strategy.is_immediate() {
            self.send_strategy = SendStrategyConfig::Delayed { delay_seconds: 10 };
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.biz_id <= 0 {
            return Err(CoreError::invalid_parameter(format!(
                "biz_id = {}",
                self.biz_id
            )));
        }
        if self.key.is_empty() {
            return Err(CoreError::invalid_parameter("key is empty"));
        }
        if self.receivers.is_empty() {
            return Err(CoreError::invalid_parameter("receivers is empty"));
        }
        if self.template.id <= 0 {
            return Err(CoreError::invalid_parameter(format!(
                "template.id = {}",
                self.template.id
            )));
        }
        if self.template.version_id <= 0 {
            return Err(CoreError::invalid_parameter(format!(
                "template.version_id = {}",
                self.template.version_id
            )));
        }
        if self.template.params.is_empty() {
            return Err(CoreError::invalid_parameter("template.params is empty"));
        }
        self.send_strategy.validate()
    }
}

/// Outcome of a single send request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    pub notification_id: i64,
    pub status: SendStatus,
}

/// Outcome of a synchronous batch send.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSendResponse {
    pub results: Vec<SendResponse>,
}

/// Outcome of an asynchronous batch send.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSendAsyncResponse {
    pub notification_ids: Vec<i64>,
}
