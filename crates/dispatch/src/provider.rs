//! Provider selection and the vendor-backed provider implementation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use courier_core::notification::Channel;
use courier_core::{CoreError, CoreResult, Notification, Provider, SendResponse, SendStatus};
use courier_infra::rpc::{VendorClient, VendorSendRequest};
use courier_infra::store::{ProviderStore, StoreError};
use courier_infra::SecretBox;

use crate::template::ChannelTemplateService;

/// One upstream vendor able to deliver a notification.
#[async_trait]
pub trait SendProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> CoreResult<SendResponse>;
}

impl std::fmt::Debug for dyn SendProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendProvider").field("name", &self.name()).finish()
    }
}

/// Yields providers one at a time until exhaustion.
pub trait ProviderSelector: Send {
    fn next(&mut self, notification: &Notification) -> CoreResult<Arc<dyn SendProvider>>;
}

/// Selectors are rebuilt per request, so provider registrations take
/// effect immediately and a future strategy can filter per tenant or per
/// notification.
#[async_trait]
pub trait SelectorBuilder: Send + Sync {
    async fn build(&self) -> CoreResult<Box<dyn ProviderSelector>>;
}

/// Baseline strategy: walk the providers in their configured order
/// (weight desc, id asc as loaded from the store).
pub struct SequentialSelector {
    idx: usize,
    providers: Vec<Arc<dyn SendProvider>>,
}

impl ProviderSelector for SequentialSelector {
    fn next(&mut self, _notification: &Notification) -> CoreResult<Arc<dyn SendProvider>> {
        let provider = self
            .providers
            .get(self.idx)
            .cloned()
            .ok_or(CoreError::NoAvailableProvider)?;
        self.idx += 1;
        Ok(provider)
    }
}

pub struct SequentialSelectorBuilder {
    providers: Vec<Arc<dyn SendProvider>>,
}

impl SequentialSelectorBuilder {
    pub fn new(providers: Vec<Arc<dyn SendProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl SelectorBuilder for SequentialSelectorBuilder {
    async fn build(&self) -> CoreResult<Box<dyn ProviderSelector>> {
        Ok(Box::new(SequentialSelector {
            idx: 0,
            providers: self.providers.clone(),
        }))
    }
}

/// Builds the selector from the provider store on every request: active
/// vendors for the channel, in store order (weight desc, id asc), each
/// wrapped as a [`VendorProvider`].
pub struct StoreBackedSelectorBuilder {
    manager: Arc<ProviderManager>,
    channel: Channel,
    templates: Arc<ChannelTemplateService>,
    vendor: Arc<dyn VendorClient>,
}

impl StoreBackedSelectorBuilder {
    pub fn new(
        manager: Arc<ProviderManager>,
        channel: Channel,
        templates: Arc<ChannelTemplateService>,
        vendor: Arc<dyn VendorClient>,
    ) -> Self {
        Self {
            manager,
            channel,
            templates,
            vendor,
        }
    }
}

#[async_trait]
impl SelectorBuilder for StoreBackedSelectorBuilder {
    async fn build(&self) -> CoreResult<Box<dyn ProviderSelector>> {
        let descriptors = self.manager.active_providers(self.channel).await?;
        let providers: Vec<Arc<dyn SendProvider>> = descriptors
            .into_iter()
            .map(|descriptor| {
                Arc::new(VendorProvider::new(
                    descriptor,
                    self.templates.clone(),
                    self.vendor.clone(),
                    self.manager.secrets(),
                )) as Arc<dyn SendProvider>
            })
            .collect();
        Ok(Box::new(SequentialSelector { idx: 0, providers }))
    }
}

/// Vendor-backed provider: resolves the template binding for this vendor,
/// enforces the audit gates, and hands the message to the vendor transport.
pub struct VendorProvider {
    descriptor: Provider,
    templates: Arc<ChannelTemplateService>,
    vendor: Arc<dyn VendorClient>,
    secrets: SecretBox,
}

impl VendorProvider {
    pub fn new(
        descriptor: Provider,
        templates: Arc<ChannelTemplateService>,
        vendor: Arc<dyn VendorClient>,
        secrets: SecretBox,
    ) -> Self {
        Self {
            descriptor,
            templates,
            vendor,
            secrets,
        }
    }
}

#[async_trait]
impl SendProvider for VendorProvider {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    #[instrument(skip(self, notification), fields(provider = %self.descriptor.name, notification_id = notification.id), err)]
    async fn send(&self, notification: &Notification) -> CoreResult<SendResponse> {
        let template = self
            .templates
            .get_template_for_provider(
                notification.template.id,
                &self.descriptor.name,
                self.descriptor.channel,
            )
            .await
            .map_err(|e| CoreError::send_failed(e.to_string()))?;

        let active = template
            .active_version()
            .ok_or_else(|| CoreError::send_failed("template has no published version"))?;
        if !active.audit_status.is_approved() {
            return Err(CoreError::send_failed("active template version not approved"));
        }
        let binding = active
            .providers
            .iter()
            .find(|p| p.audit_status.is_approved() && !p.provider_template_id.is_empty())
            .ok_or_else(|| {
                CoreError::send_failed(format!(
                    "no approved binding for provider {}",
                    self.descriptor.name
                ))
            })?;

        // The stored secret stays sealed except for this call.
        let api_secret = self.secrets.open(&self.descriptor.api_secret)?;
        let response = self
            .vendor
            .send(
                &self.descriptor.endpoint,
                &VendorSendRequest {
                    receivers: notification.receivers.clone(),
                    signature: active.signature.clone(),
                    provider_template_id: binding.provider_template_id.clone(),
                    params: notification.template.params.clone(),
                    api_key: self.descriptor.api_key.clone(),
                    api_secret,
                },
            )
            .await
            .map_err(|e| CoreError::send_failed(e.to_string()))?;

        if !response.all_ok() {
            let failed = response
                .statuses
                .iter()
                .find(|s| !s.code.eq_ignore_ascii_case("OK"));
            return Err(CoreError::send_failed(match failed {
                Some(s) => format!("receiver {}: code={} message={}", s.receiver, s.code, s.message),
                None => "vendor returned no receiver statuses".to_string(),
            }));
        }

        Ok(SendResponse {
            notification_id: notification.id,
            status: SendStatus::Succeeded,
        })
    }
}

/// Vendor descriptor management: seals API secrets before they touch
/// storage and builds the per-channel provider lists.
pub struct ProviderManager {
    store: Arc<dyn ProviderStore>,
    secrets: SecretBox,
}

impl ProviderManager {
    pub fn new(store: Arc<dyn ProviderStore>, secrets: SecretBox) -> Self {
        Self { store, secrets }
    }

    /// Register a vendor. The caller passes the plaintext secret and gets
    /// it back; only the sealed form is stored.
    pub async fn create(&self, mut provider: Provider) -> CoreResult<Provider> {
        let plaintext = std::mem::take(&mut provider.api_secret);
        provider.api_secret = self.secrets.seal(&plaintext)?;
        let mut created = self.store.create(provider).await.map_err(|err| match err {
            StoreError::Duplicate => {
                CoreError::invalid_parameter("provider (name, channel) already registered")
            }
            other => other.into(),
        })?;
        created.api_secret = plaintext;
        Ok(created)
    }

    /// Active vendors for a channel in selector order, as stored (secrets
    /// sealed).
    pub async fn active_providers(&self, channel: Channel) -> CoreResult<Vec<Provider>> {
        Ok(self.store.find_active_by_channel(channel).await?)
    }

    pub fn secrets(&self) -> SecretBox {
        self.secrets.clone()
    }
}
