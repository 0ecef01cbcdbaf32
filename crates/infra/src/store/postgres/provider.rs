//! Postgres vendor-descriptor store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use courier_core::notification::Channel;
use courier_core::{Provider, ProviderStatus};

use super::map_sqlx_error;
use crate::store::{ProviderStore, StoreError};

#[derive(Debug, Clone)]
pub struct PgProviderStore {
    pool: PgPool,
}

impl PgProviderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_provider(row: &PgRow) -> Result<Provider, StoreError> {
    fn bad(what: &str, e: impl std::fmt::Display) -> StoreError {
        StoreError::Database(format!("decode {what}: {e}"))
    }
    let channel: String = row.try_get("channel").map_err(|e| bad("channel", e))?;
    let status: String = row.try_get("status").map_err(|e| bad("status", e))?;
    Ok(Provider {
        id: row.try_get("id").map_err(|e| bad("id", e))?,
        name: row.try_get("name").map_err(|e| bad("name", e))?,
        channel: Channel::parse(&channel).map_err(|e| bad("channel", e))?,
        endpoint: row.try_get("endpoint").map_err(|e| bad("endpoint", e))?,
        region_id: row.try_get("region_id").map_err(|e| bad("region_id", e))?,
        api_key: row.try_get("api_key").map_err(|e| bad("api_key", e))?,
        api_secret: row.try_get("api_secret").map_err(|e| bad("api_secret", e))?,
        app_id: row.try_get("app_id").map_err(|e| bad("app_id", e))?,
        weight: row.try_get("weight").map_err(|e| bad("weight", e))?,
        qps_limit: row.try_get("qps_limit").map_err(|e| bad("qps_limit", e))?,
        daily_limit: row.try_get("daily_limit").map_err(|e| bad("daily_limit", e))?,
        audit_callback_url: row
            .try_get("audit_callback_url")
            .map_err(|e| bad("audit_callback_url", e))?,
        status: ProviderStatus::parse(&status)
            .ok_or_else(|| bad("status", format!("unknown value {status:?}")))?,
        ctime: row.try_get("ctime").map_err(|e| bad("ctime", e))?,
        utime: row.try_get("utime").map_err(|e| bad("utime", e))?,
    })
}

#[async_trait]
impl ProviderStore for PgProviderStore {
    #[instrument(skip(self, provider), fields(name = %provider.name, channel = %provider.channel), err)]
    async fn create(&self, mut provider: Provider) -> Result<Provider, StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        let row = sqlx::query(
            "INSERT INTO providers \
             (name, channel, endpoint, region_id, api_key, api_secret, app_id, weight, \
              qps_limit, daily_limit, audit_callback_url, status, ctime, utime) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13) \
             RETURNING id",
        )
        .bind(&provider.name)
        .bind(provider.channel.as_str())
        .bind(&provider.endpoint)
        .bind(&provider.region_id)
        .bind(&provider.api_key)
        .bind(&provider.api_secret)
        .bind(&provider.app_id)
        .bind(provider.weight)
        .bind(provider.qps_limit)
        .bind(provider.daily_limit)
        .bind(&provider.audit_callback_url)
        .bind(provider.status.as_str())
        .bind(now_ms)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create provider", e))?;
        provider.id = row
            .try_get("id")
            .map_err(|e| StoreError::Database(format!("decode id: {e}")))?;
        provider.ctime = now_ms;
        provider.utime = now_ms;
        Ok(provider)
    }

    async fn find_active_by_channel(
        &self,
        channel: Channel,
    ) -> Result<Vec<Provider>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, channel, endpoint, region_id, api_key, api_secret, app_id, \
                    weight, qps_limit, daily_limit, audit_callback_url, status, ctime, utime \
             FROM providers WHERE channel = $1 AND status = 'ACTIVE' \
             ORDER BY weight DESC, id ASC",
        )
        .bind(channel.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find providers", e))?;
        rows.iter().map(row_to_provider).collect()
    }
}
