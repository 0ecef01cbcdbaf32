//! Shared (redis) config cache: JSON values under `config:<biz_id>` with a
//! 10-minute expiry.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use courier_core::{BusinessConfig, CoreError, CoreResult};

use super::{config_key, ConfigCache, DEFAULT_TTL};

#[derive(Clone)]
pub struct RedisConfigCache {
    client: redis::Client,
    ttl: Duration,
}

impl RedisConfigCache {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            ttl: DEFAULT_TTL,
        }
    }

    async fn connection(&self) -> CoreResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CoreError::storage(format!("redis connect: {e}")))
    }

    fn decode(raw: &str) -> Option<BusinessConfig> {
        match serde_json::from_str(raw) {
            Ok(config) => Some(config),
            Err(err) => {
                warn!(error = %err, "dropping undecodable cached config");
                None
            }
        }
    }
}

#[async_trait]
impl ConfigCache for RedisConfigCache {
    async fn get(&self, biz_id: i64) -> CoreResult<Option<BusinessConfig>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(config_key(biz_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::storage(format!("config cache get: {e}")))?;
        Ok(raw.as_deref().and_then(Self::decode))
    }

    async fn set(&self, config: &BusinessConfig) -> CoreResult<()> {
        let raw = serde_json::to_string(config)
            .map_err(|e| CoreError::storage(format!("encode config: {e}")))?;
        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(config_key(config.id))
            .arg(raw)
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CoreError::storage(format!("config cache set: {e}")))
    }

    async fn get_many(&self, ids: &[i64]) -> CoreResult<HashMap<i64, BusinessConfig>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("MGET");
        for id in ids {
            cmd.arg(config_key(*id));
        }
        let raw: Vec<Option<String>> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::storage(format!("config cache mget: {e}")))?;
        Ok(ids
            .iter()
            .zip(raw)
            .filter_map(|(id, value)| value.as_deref().and_then(Self::decode).map(|c| (*id, c)))
            .collect())
    }

    async fn set_many(&self, configs: &[BusinessConfig]) -> CoreResult<()> {
        if configs.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        for config in configs {
            let raw = serde_json::to_string(config)
                .map_err(|e| CoreError::storage(format!("encode config: {e}")))?;
            pipe.cmd("SET")
                .arg(config_key(config.id))
                .arg(raw)
                .arg("EX")
                .arg(self.ttl.as_secs())
                .ignore();
        }
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CoreError::storage(format!("config cache set many: {e}")))
    }
}
