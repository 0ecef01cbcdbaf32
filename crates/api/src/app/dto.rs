//! Request/response DTOs and their mapping to domain types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::notification::Channel;
use courier_core::{CoreResult, Notification, SendResponse, SendStatus, SendStrategyConfig, TemplateRef};

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    pub notification: NotificationDto,
}

#[derive(Debug, Deserialize)]
pub struct BatchSendRequest {
    pub notifications: Vec<NotificationDto>,
}

#[derive(Debug, Deserialize)]
pub struct TxKeyRequest {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct NotificationDto {
    pub key: String,
    pub receivers: Vec<String>,
    pub channel: String,
    pub template_id: i64,
    #[serde(default)]
    pub template_params: HashMap<String, String>,
    #[serde(default)]
    pub strategy: Option<SendStrategyDto>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SendStrategyDto {
    Immediate,
    Delayed { delay_seconds: i64 },
    Scheduled { send_time: DateTime<Utc> },
    TimeWindow { start_time_ms: i64, end_time_ms: i64 },
    Deadline { deadline: DateTime<Utc> },
}

impl From<SendStrategyDto> for SendStrategyConfig {
    fn from(dto: SendStrategyDto) -> Self {
        match dto {
            SendStrategyDto::Immediate => SendStrategyConfig::Immediate,
            SendStrategyDto::Delayed { delay_seconds } => {
                SendStrategyConfig::Delayed { delay_seconds }
            }
            SendStrategyDto::Scheduled { send_time } => {
                SendStrategyConfig::Scheduled { send_time }
            }
            SendStrategyDto::TimeWindow {
                start_time_ms,
                end_time_ms,
            } => SendStrategyConfig::TimeWindow {
                start_time_ms,
                end_time_ms,
            },
            SendStrategyDto::Deadline { deadline } => SendStrategyConfig::Deadline { deadline },
        }
    }
}

impl NotificationDto {
    /// Translate the external request into the domain object. The tenant
    /// comes from the token, never from the body; the template version is
    /// resolved later by the send service.
    pub fn into_domain(self, biz_id: i64) -> CoreResult<Notification> {
        let channel = Channel::parse(&self.channel)?;
        let now = Utc::now();
        Ok(Notification {
            id: 0,
            biz_id,
            key: self.key,
            receivers: self.receivers,
            channel,
            template: TemplateRef {
                id: self.template_id,
                version_id: 0,
                params: self.template_params,
            },
            status: SendStatus::Pending,
            scheduled_stime: now,
            scheduled_etime: now,
            version: 0,
            send_strategy: self
                .strategy
                .map(SendStrategyConfig::from)
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct SendNotificationResponse {
    pub notification_id: i64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SendNotificationResponse {
    pub fn ok(response: SendResponse) -> Self {
        Self {
            notification_id: response.notification_id,
            status: response.status.as_str().to_string(),
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(code: &str, message: String) -> Self {
        Self {
            notification_id: 0,
            status: SendStatus::Failed.as_str().to_string(),
            error_code: Some(code.to_string()),
            error_message: Some(message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchSendResponseBody {
    pub total_count: i32,
    pub success_count: i32,
    pub results: Vec<SendNotificationResponse>,
}

#[derive(Debug, Serialize)]
pub struct BatchSendAsyncResponseBody {
    pub notification_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct TxPrepareResponse {
    pub notification_id: i64,
}

/// Read-model view of a stored notification.
#[derive(Debug, Serialize)]
pub struct NotificationView {
    pub id: i64,
    pub biz_id: i64,
    pub key: String,
    pub receivers: Vec<String>,
    pub channel: String,
    pub template_id: i64,
    pub template_version_id: i64,
    pub status: String,
    pub scheduled_stime: i64,
    pub scheduled_etime: i64,
    pub version: i32,
}

impl From<Notification> for NotificationView {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id,
            biz_id: n.biz_id,
            key: n.key,
            receivers: n.receivers,
            channel: n.channel.as_str().to_string(),
            template_id: n.template.id,
            template_version_id: n.template.version_id,
            status: n.status.as_str().to_string(),
            scheduled_stime: n.scheduled_stime.timestamp_millis(),
            scheduled_etime: n.scheduled_etime.timestamp_millis(),
            version: n.version,
        }
    }
}
