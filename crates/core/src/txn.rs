//! Transactional-notification envelope for the prepare/commit/cancel flow.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::TxnConfig;
use crate::error::CoreResult;
use crate::notification::Notification;

/// Two-phase submission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Prepare,
    Commit,
    Cancel,
    /// Back-check budget exhausted, or the tenant has no back-check config.
    Fail,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Prepare => "PREPARE",
            TxStatus::Commit => "COMMIT",
            TxStatus::Cancel => "CANCEL",
            TxStatus::Fail => "FAIL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PREPARE" => Some(TxStatus::Prepare),
            "COMMIT" => Some(TxStatus::Commit),
            "CANCEL" => Some(TxStatus::Cancel),
            "FAIL" => Some(TxStatus::Fail),
            _ => None,
        }
    }
}

/// Envelope around a notification in two-phase submission.
///
/// Owns the back-check bookkeeping: how often the tenant has been probed and
/// when to probe next (`next_check_time == 0` means never again).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxNotification {
    pub tx_id: i64,
    pub notification: Notification,
    pub biz_id: i64,
    pub key: String,
    pub status: TxStatus,
    pub check_count: i32,
    /// Epoch milliseconds; 0 = no further back-check.
    pub next_check_time: i64,
    pub ctime: i64,
    pub utime: i64,
}

impl TxNotification {
    /// After an inconclusive probe: either schedule the next one from the
    /// tenant's retry policy, or fail the transaction when the budget is
    /// exhausted (including when no policy is configured).
    pub fn schedule_next_check(&mut self, txn_config: Option<&TxnConfig>) {
        match self.next_check_interval(txn_config) {
            Some(interval) => {
                self.next_check_time =
                    Utc::now().timestamp_millis() + interval.as_millis() as i64;
            }
            None => {
                self.next_check_time = 0;
                self.status = TxStatus::Fail;
            }
        }
    }

    /// The probe that just ran was attempt `check_count`; the question is
    /// whether attempt `check_count + 1` still fits the budget.
    fn next_check_interval(&self, txn_config: Option<&TxnConfig>) -> Option<std::time::Duration> {
        let policy = txn_config?.retry_policy.as_ref()?;
        let strategy: CoreResult<_> = policy.build();
        strategy.ok()?.next_with_retries(self.check_count + 1)
    }
}
