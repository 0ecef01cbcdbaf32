//! Config cache tiers.
//!
//! The config repository reads through process-local → shared (redis) →
//! store; both cache tiers hold entries for 10 minutes and are only
//! invalidated by TTL.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use courier_core::{BusinessConfig, CoreResult};

pub mod local;
pub mod redis;

pub use local::LocalConfigCache;
pub use redis::RedisConfigCache;

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

pub fn config_key(biz_id: i64) -> String {
    format!("config:{biz_id}")
}

#[async_trait]
pub trait ConfigCache: Send + Sync {
    async fn get(&self, biz_id: i64) -> CoreResult<Option<BusinessConfig>>;

    async fn set(&self, config: &BusinessConfig) -> CoreResult<()>;

    /// Returns whatever subset of `ids` this tier holds.
    async fn get_many(&self, ids: &[i64]) -> CoreResult<HashMap<i64, BusinessConfig>>;

    async fn set_many(&self, configs: &[BusinessConfig]) -> CoreResult<()>;
}
