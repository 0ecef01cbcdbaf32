//! Per-tenant business configuration.
//!
//! Every section is optional; a tenant without a `txn_config` is failed on
//! back-check, one without a `callback_config` gets no callback logs, and
//! so on.

use serde::{Deserialize, Serialize};

use crate::notification::Channel;
use crate::retry::RetryPolicy;

/// Per-tenant policy root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessConfig {
    pub id: i64,
    pub owner_id: i64,
    pub owner_type: String,
    pub channel_config: Option<ChannelConfig>,
    pub txn_config: Option<TxnConfig>,
    /// Maximum requests per second; enforced at the ingress boundary.
    pub rate_limit: i32,
    pub quota: Option<QuotaConfig>,
    pub callback_config: Option<CallbackConfig>,
    pub ctime: i64,
    pub utime: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channels: Vec<ChannelItem>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelItem {
    pub channel: Channel,
    pub priority: i32,
    pub enabled: bool,
}

/// Transactional back-check configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxnConfig {
    /// Where the platform probes for the transaction outcome.
    pub service_name: String,
    /// The tenant expects the transaction to settle within this many
    /// seconds; the first back-check fires after it.
    #[serde(default)]
    pub initial_delay_seconds: i64,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub monthly: MonthlyQuota,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyQuota {
    #[serde(default)]
    pub sms: i32,
    #[serde(default)]
    pub email: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Where send outcomes are delivered.
    pub service_name: String,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn config_round_trips_with_absent_sections() {
        let cfg = BusinessConfig {
            id: 42,
            owner_id: 1,
            owner_type: "organization".into(),
            channel_config: None,
            txn_config: Some(TxnConfig {
                service_name: "order-service".into(),
                initial_delay_seconds: 1,
                retry_policy: Some(RetryPolicy::fixed(Duration::from_secs(1), 3)),
            }),
            rate_limit: 100,
            quota: Some(QuotaConfig {
                monthly: MonthlyQuota { sms: 1000, email: 500 },
            }),
            callback_config: None,
            ctime: 0,
            utime: 0,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: BusinessConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
        assert!(back.channel_config.is_none());
        assert!(back.callback_config.is_none());
    }
}
