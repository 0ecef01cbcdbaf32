//! Postgres template store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use courier_core::notification::Channel;
use courier_core::template::OwnerType;
use courier_core::{AuditStatus, ChannelTemplate, ChannelTemplateProvider, ChannelTemplateVersion};

use super::map_sqlx_error;
use crate::store::{StoreError, TemplateStore};

#[derive(Debug, Clone)]
pub struct PgTemplateStore {
    pool: PgPool,
}

impl PgTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn bad(what: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Database(format!("decode {what}: {e}"))
}

fn parse_audit(s: &str) -> Result<AuditStatus, StoreError> {
    AuditStatus::parse(s).ok_or_else(|| bad("audit_status", format!("unknown value {s:?}")))
}

fn row_to_template(row: &PgRow) -> Result<ChannelTemplate, StoreError> {
    let channel: String = row.try_get("channel").map_err(|e| bad("channel", e))?;
    let owner_type: String = row.try_get("owner_type").map_err(|e| bad("owner_type", e))?;
    Ok(ChannelTemplate {
        id: row.try_get("id").map_err(|e| bad("id", e))?,
        owner_id: row.try_get("owner_id").map_err(|e| bad("owner_id", e))?,
        owner_type: match owner_type.as_str() {
            "person" => OwnerType::Person,
            "organization" => OwnerType::Organization,
            other => return Err(bad("owner_type", format!("unknown value {other:?}"))),
        },
        name: row.try_get("name").map_err(|e| bad("name", e))?,
        description: row.try_get("description").map_err(|e| bad("description", e))?,
        channel: Channel::parse(&channel).map_err(|e| bad("channel", e))?,
        active_version_id: row
            .try_get("active_version_id")
            .map_err(|e| bad("active_version_id", e))?,
        ctime: row.try_get("ctime").map_err(|e| bad("ctime", e))?,
        utime: row.try_get("utime").map_err(|e| bad("utime", e))?,
        versions: Vec::new(),
    })
}

fn row_to_version(row: &PgRow) -> Result<ChannelTemplateVersion, StoreError> {
    let audit: String = row.try_get("audit_status").map_err(|e| bad("audit_status", e))?;
    Ok(ChannelTemplateVersion {
        id: row.try_get("id").map_err(|e| bad("id", e))?,
        template_id: row.try_get("template_id").map_err(|e| bad("template_id", e))?,
        name: row.try_get("name").map_err(|e| bad("name", e))?,
        signature: row.try_get("signature").map_err(|e| bad("signature", e))?,
        content: row.try_get("content").map_err(|e| bad("content", e))?,
        remark: row.try_get("remark").map_err(|e| bad("remark", e))?,
        audit_status: parse_audit(&audit)?,
        ctime: row.try_get("ctime").map_err(|e| bad("ctime", e))?,
        utime: row.try_get("utime").map_err(|e| bad("utime", e))?,
        providers: Vec::new(),
    })
}

fn row_to_provider(row: &PgRow) -> Result<ChannelTemplateProvider, StoreError> {
    let audit: String = row.try_get("audit_status").map_err(|e| bad("audit_status", e))?;
    let channel: String = row
        .try_get("provider_channel")
        .map_err(|e| bad("provider_channel", e))?;
    Ok(ChannelTemplateProvider {
        id: row.try_get("id").map_err(|e| bad("id", e))?,
        template_id: row.try_get("template_id").map_err(|e| bad("template_id", e))?,
        template_version_id: row
            .try_get("template_version_id")
            .map_err(|e| bad("template_version_id", e))?,
        provider_id: row.try_get("provider_id").map_err(|e| bad("provider_id", e))?,
        provider_name: row
            .try_get("provider_name")
            .map_err(|e| bad("provider_name", e))?,
        provider_channel: Channel::parse(&channel).map_err(|e| bad("provider_channel", e))?,
        provider_template_id: row
            .try_get("provider_template_id")
            .map_err(|e| bad("provider_template_id", e))?,
        audit_status: parse_audit(&audit)?,
        ctime: row.try_get("ctime").map_err(|e| bad("ctime", e))?,
        utime: row.try_get("utime").map_err(|e| bad("utime", e))?,
    })
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
    async fn get_template_by_id(&self, id: i64) -> Result<ChannelTemplate, StoreError> {
        let row = sqlx::query(
            "SELECT id, owner_id, owner_type, name, description, channel, \
                    active_version_id, ctime, utime \
             FROM channel_templates WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get template", e))?;
        row_to_template(&row)
    }

    async fn get_versions_by_template_ids(
        &self,
        template_ids: &[i64],
    ) -> Result<Vec<ChannelTemplateVersion>, StoreError> {
        if template_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, template_id, name, signature, content, remark, audit_status, \
                    ctime, utime \
             FROM channel_template_versions WHERE template_id = ANY($1) ORDER BY id ASC",
        )
        .bind(template_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get template versions", e))?;
        rows.iter().map(row_to_version).collect()
    }

    async fn get_providers_by_version_ids(
        &self,
        version_ids: &[i64],
    ) -> Result<Vec<ChannelTemplateProvider>, StoreError> {
        if version_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, template_id, template_version_id, provider_id, provider_name, \
                    provider_channel, provider_template_id, audit_status, ctime, utime \
             FROM channel_template_providers \
             WHERE template_version_id = ANY($1) ORDER BY id ASC",
        )
        .bind(version_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get template providers", e))?;
        rows.iter().map(row_to_provider).collect()
    }

    #[instrument(skip(self, template), fields(id = template.id), err)]
    async fn save_template(&self, template: ChannelTemplate) -> Result<(), StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        let owner_type = match template.owner_type {
            OwnerType::Person => "person",
            OwnerType::Organization => "organization",
        };
        sqlx::query(
            "INSERT INTO channel_templates \
             (id, owner_id, owner_type, name, description, channel, active_version_id, ctime, utime) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) \
             ON CONFLICT (id) DO UPDATE SET \
               name = EXCLUDED.name, description = EXCLUDED.description, \
               active_version_id = EXCLUDED.active_version_id, utime = EXCLUDED.utime",
        )
        .bind(template.id)
        .bind(template.owner_id)
        .bind(owner_type)
        .bind(&template.name)
        .bind(&template.description)
        .bind(template.channel.as_str())
        .bind(template.active_version_id)
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save template", e))?;
        Ok(())
    }

    #[instrument(skip(self, version), fields(id = version.id), err)]
    async fn save_version(&self, version: ChannelTemplateVersion) -> Result<(), StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO channel_template_versions \
             (id, template_id, name, signature, content, remark, audit_status, ctime, utime) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) \
             ON CONFLICT (id) DO UPDATE SET \
               signature = EXCLUDED.signature, content = EXCLUDED.content, \
               audit_status = EXCLUDED.audit_status, utime = EXCLUDED.utime",
        )
        .bind(version.id)
        .bind(version.template_id)
        .bind(&version.name)
        .bind(&version.signature)
        .bind(&version.content)
        .bind(&version.remark)
        .bind(version.audit_status.as_str())
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save template version", e))?;
        Ok(())
    }

    #[instrument(skip(self, provider), fields(id = provider.id), err)]
    async fn save_provider(
        &self,
        provider: ChannelTemplateProvider,
    ) -> Result<(), StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO channel_template_providers \
             (id, template_id, template_version_id, provider_id, provider_name, \
              provider_channel, provider_template_id, audit_status, ctime, utime) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
             ON CONFLICT (id) DO UPDATE SET \
               provider_template_id = EXCLUDED.provider_template_id, \
               audit_status = EXCLUDED.audit_status, utime = EXCLUDED.utime",
        )
        .bind(provider.id)
        .bind(provider.template_id)
        .bind(provider.template_version_id)
        .bind(provider.provider_id)
        .bind(&provider.provider_name)
        .bind(provider.provider_channel.as_str())
        .bind(&provider.provider_template_id)
        .bind(provider.audit_status.as_str())
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save template provider", e))?;
        Ok(())
    }
}
