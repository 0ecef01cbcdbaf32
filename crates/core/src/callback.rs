//! Callback logs: one row per notification whose tenant registered a
//! callback endpoint. The send outcome is delivered post-commit; callback
//! failures never feed back into the send path.

use serde::{Deserialize, Serialize};

use crate::notification::Notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackLogStatus {
    /// Created alongside the notification; not yet eligible to fire.
    Init,
    /// Outcome committed; eligible to fire (or awaiting a retry slot).
    Pending,
    Success,
    Failed,
}

impl CallbackLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackLogStatus::Init => "INIT",
            CallbackLogStatus::Pending => "PENDING",
            CallbackLogStatus::Success => "SUCCESS",
            CallbackLogStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INIT" => Some(CallbackLogStatus::Init),
            "PENDING" => Some(CallbackLogStatus::Pending),
            "SUCCESS" => Some(CallbackLogStatus::Success),
            "FAILED" => Some(CallbackLogStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackLog {
    pub id: i64,
    pub notification: Notification,
    pub retry_count: i32,
    /// Epoch milliseconds of the earliest next attempt.
    pub next_retry_time: i64,
    pub status: CallbackLogStatus,
}
