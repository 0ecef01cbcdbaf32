//! Vendor descriptors.

use serde::{Deserialize, Serialize};

use crate::notification::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
    Active,
    Inactive,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Active => "ACTIVE",
            ProviderStatus::Inactive => "INACTIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(ProviderStatus::Active),
            "INACTIVE" => Some(ProviderStatus::Inactive),
            _ => None,
        }
    }
}

/// One upstream vendor for one channel. `(name, channel)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: i64,
    pub name: String,
    pub channel: Channel,
    pub endpoint: String,
    pub region_id: String,
    pub api_key: String,
    /// Stored sealed (AES-256-GCM, nonce-prefixed, base64); decrypted only
    /// for outbound calls.
    pub api_secret: String,
    pub app_id: String,
    pub weight: i32,
    pub qps_limit: i32,
    pub daily_limit: i32,
    /// Vendor-initiated audit results land here.
    pub audit_callback_url: String,
    pub status: ProviderStatus,
    pub ctime: i64,
    pub utime: i64,
}
