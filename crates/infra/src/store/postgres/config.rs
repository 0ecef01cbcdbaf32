//! Postgres tenant-config store. The four policy sections live in nullable
//! JSONB columns; absent means the tenant opted out of that concern.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use courier_core::{BusinessConfig, CallbackConfig, ChannelConfig, QuotaConfig, TxnConfig};

use super::map_sqlx_error;
use crate::store::{ConfigStore, StoreError};

#[derive(Debug, Clone)]
pub struct PgConfigStore {
    pool: PgPool,
}

impl PgConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_section<T: serde::de::DeserializeOwned>(
    row: &PgRow,
    column: &str,
) -> Result<Option<T>, StoreError> {
    let raw: Option<serde_json::Value> = row
        .try_get(column)
        .map_err(|e| StoreError::Database(format!("decode {column}: {e}")))?;
    raw.map(|v| {
        serde_json::from_value(v)
            .map_err(|e| StoreError::Database(format!("decode {column}: {e}")))
    })
    .transpose()
}

fn encode_section<T: serde::Serialize>(
    section: &Option<T>,
    column: &str,
) -> Result<Option<serde_json::Value>, StoreError> {
    section
        .as_ref()
        .map(|v| {
            serde_json::to_value(v)
                .map_err(|e| StoreError::Database(format!("encode {column}: {e}")))
        })
        .transpose()
}

fn row_to_config(row: &PgRow) -> Result<BusinessConfig, StoreError> {
    let bad = |what: &str, e: sqlx::Error| StoreError::Database(format!("decode {what}: {e}"));
    Ok(BusinessConfig {
        id: row.try_get("id").map_err(|e| bad("id", e))?,
        owner_id: row.try_get("owner_id").map_err(|e| bad("owner_id", e))?,
        owner_type: row.try_get("owner_type").map_err(|e| bad("owner_type", e))?,
        channel_config: decode_section::<ChannelConfig>(row, "channel_config")?,
        txn_config: decode_section::<TxnConfig>(row, "txn_config")?,
        rate_limit: row.try_get("rate_limit").map_err(|e| bad("rate_limit", e))?,
        quota: decode_section::<QuotaConfig>(row, "quota_config")?,
        callback_config: decode_section::<CallbackConfig>(row, "callback_config")?,
        ctime: row.try_get("ctime").map_err(|e| bad("ctime", e))?,
        utime: row.try_get("utime").map_err(|e| bad("utime", e))?,
    })
}

const SELECT_COLUMNS: &str = "id, owner_id, owner_type, channel_config, txn_config, \
     rate_limit, quota_config, callback_config, ctime, utime";

#[async_trait]
impl ConfigStore for PgConfigStore {
    async fn get_by_id(&self, id: i64) -> Result<BusinessConfig, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM business_configs WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get config", e))?;
        row_to_config(&row)
    }

    async fn get_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, BusinessConfig>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM business_configs WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get configs", e))?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in &rows {
            let cfg = row_to_config(row)?;
            out.insert(cfg.id, cfg);
        }
        Ok(out)
    }

    async fn find(&self, offset: i64, limit: i64) -> Result<Vec<BusinessConfig>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM business_configs ORDER BY id ASC OFFSET $1 LIMIT $2"
        ))
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find configs", e))?;
        rows.iter().map(row_to_config).collect()
    }

    #[instrument(skip(self, config), fields(id = config.id), err)]
    async fn save(&self, config: BusinessConfig) -> Result<(), StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO business_configs \
             (id, owner_id, owner_type, channel_config, txn_config, rate_limit, \
              quota_config, callback_config, ctime, utime) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
             ON CONFLICT (id) DO UPDATE SET \
               owner_id = EXCLUDED.owner_id, owner_type = EXCLUDED.owner_type, \
               channel_config = EXCLUDED.channel_config, txn_config = EXCLUDED.txn_config, \
               rate_limit = EXCLUDED.rate_limit, quota_config = EXCLUDED.quota_config, \
               callback_config = EXCLUDED.callback_config, utime = EXCLUDED.utime",
        )
        .bind(config.id)
        .bind(config.owner_id)
        .bind(&config.owner_type)
        .bind(encode_section(&config.channel_config, "channel_config")?)
        .bind(encode_section(&config.txn_config, "txn_config")?)
        .bind(config.rate_limit)
        .bind(encode_section(&config.quota, "quota_config")?)
        .bind(encode_section(&config.callback_config, "callback_config")?)
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save config", e))?;
        Ok(())
    }
}
