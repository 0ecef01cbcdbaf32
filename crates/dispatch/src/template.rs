//! Template service: resolves templates with their versions and vendor
//! bindings, enforcing the publish/audit gates.

use std::sync::Arc;

use courier_core::notification::Channel;
use courier_core::{ChannelTemplate, CoreError, CoreResult};
use courier_infra::store::{StoreError, TemplateStore};

pub struct ChannelTemplateService {
    store: Arc<dyn TemplateStore>,
}

impl ChannelTemplateService {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self { store }
    }

    /// Template with all versions and their vendor bindings attached.
    pub async fn get_template_by_id(&self, id: i64) -> CoreResult<ChannelTemplate> {
        let mut template = self.store.get_template_by_id(id).await.map_err(|err| {
            match err {
                StoreError::NotFound => CoreError::TemplateNotFound(id),
                other => other.into(),
            }
        })?;

        let mut versions = self.store.get_versions_by_template_ids(&[id]).await?;
        let version_ids: Vec<i64> = versions.iter().map(|v| v.id).collect();
        let providers = self.store.get_providers_by_version_ids(&version_ids).await?;
        for version in &mut versions {
            version.providers = providers
                .iter()
                .filter(|p| p.template_version_id == version.id)
                .cloned()
                .collect();
        }
        template.versions = versions;
        Ok(template)
    }

    /// Template narrowed to the bindings of one vendor on one channel, for
    /// the provider send path.
    pub async fn get_template_for_provider(
        &self,
        template_id: i64,
        provider_name: &str,
        channel: Channel,
    ) -> CoreResult<ChannelTemplate> {
        let mut template = self.get_template_by_id(template_id).await?;
        if template.channel != channel {
            return Err(CoreError::TemplateNotFound(template_id));
        }
        for version in &mut template.versions {
            version.providers.retain(|p| {
                p.provider_name == provider_name && p.provider_channel == channel
            });
        }
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::template::OwnerType;
    use courier_core::{AuditStatus, ChannelTemplateProvider, ChannelTemplateVersion};
    use courier_infra::store::memory::MemoryTemplateStore;

    async fn seeded() -> ChannelTemplateService {
        let store = Arc::new(MemoryTemplateStore::new());
        store
            .save_template(ChannelTemplate {
                id: 7,
                owner_id: 42,
                owner_type: OwnerType::Organization,
                name: "otp".into(),
                description: "login code".into(),
                channel: Channel::Sms,
                active_version_id: 1,
                ctime: 0,
                utime: 0,
                versions: vec![],
            })
            .await
            .unwrap();
        store
            .save_version(ChannelTemplateVersion {
                id: 1,
                template_id: 7,
                name: "v1.0.0".into(),
                signature: "Acme".into(),
                content: "your code is ${code}".into(),
                remark: String::new(),
                audit_status: AuditStatus::Approved,
                ctime: 0,
                utime: 0,
                providers: vec![],
            })
            .await
            .unwrap();
        for (id, name) in [(1, "smsly"), (2, "textwave")] {
            store
                .save_provider(ChannelTemplateProvider {
                    id,
                    template_id: 7,
                    template_version_id: 1,
                    provider_id: id,
                    provider_name: name.into(),
                    provider_channel: Channel::Sms,
                    provider_template_id: format!("vendor-{id}"),
                    audit_status: AuditStatus::Approved,
                    ctime: 0,
                    utime: 0,
                })
                .await
                .unwrap();
        }
        ChannelTemplateService::new(store)
    }

    #[tokio::test]
    async fn hydrates_versions_and_bindings() {
        let svc = seeded().await;
        let template = svc.get_template_by_id(7).await.unwrap();
        assert_eq!(template.versions.len(), 1);
        assert_eq!(template.versions[0].providers.len(), 2);
        assert_eq!(template.active_version().unwrap().id, 1);
    }

    #[tokio::test]
    async fn missing_template_has_its_own_error_kind() {
        let svc = seeded().await;
        assert_eq!(
            svc.get_template_by_id(99).await.unwrap_err(),
            CoreError::TemplateNotFound(99)
        );
    }

    #[tokio::test]
    async fn provider_view_filters_to_one_vendor() {
        let svc = seeded().await;
        let template = svc
            .get_template_for_provider(7, "smsly", Channel::Sms)
            .await
            .unwrap();
        let bindings = &template.active_version().unwrap().providers;
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].provider_name, "smsly");

        // Wrong channel yields nothing usable.
        assert!(svc
            .get_template_for_provider(7, "smsly", Channel::Email)
            .await
            .is_err());
    }
}
