//! Service wiring.
//!
//! Two assemblies share every service type and differ only in their ports:
//! [`in_memory`] wires the whole platform against the in-memory backends
//! (tests, local development), [`from_env`] against Postgres + Redis with
//! HTTP outbound clients.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use courier_core::notification::Channel;
use courier_dispatch::{
    BusinessConfigService, CallbackService, CallbackTask, ChannelDispatcher,
    ChannelTemplateService, DeferredStrategy, ImmediateStrategy, NotificationChannel,
    NotificationQueryService, ProviderManager, Scheduler, SelectorChannel, SendService, Sender,
    StoreBackedSelectorBuilder, StrategyDispatcher, TxCheckTask, TxNotificationService,
};
use courier_infra::cache::{ConfigCache, LocalConfigCache, RedisConfigCache};
use courier_infra::lease::{MemoryLockClient, RedisLockClient};
use courier_infra::quota::{MemoryQuotaStore, RedisQuotaStore};
use courier_infra::repository::{
    BusinessConfigRepository, CallbackLogRepository, NotificationRepository,
};
use courier_infra::rpc::{
    CallbackClient, HttpCallbackClient, HttpTxCheckClient, HttpVendorClient,
    RecordingCallbackClient, ScriptedTxCheckClient, ServiceRegistry, TxCheckClient, VendorClient,
};
use courier_infra::store::{
    CallbackLogStore, ConfigStore, MemoryConfigStore, MemoryNotificationStore,
    MemoryProviderStore, MemoryTemplateStore, NotificationStore, PgCallbackLogStore,
    PgConfigStore, PgNotificationStore, PgProviderStore, PgTemplateStore, PgTxNotificationStore,
    ProviderStore, TemplateStore, TxNotificationStore,
};
use courier_infra::{LockClient, QuotaStore, SecretBox};

/// The services the routes depend on.
pub struct AppServices {
    pub send: Arc<SendService>,
    pub txn: Arc<TxNotificationService>,
    pub queries: Arc<NotificationQueryService>,
}

/// Everything the caller may still want to touch after wiring: seeding
/// handles (in-memory assembly) and the cancellation token driving the
/// background loops.
pub struct InMemoryApp {
    pub services: Arc<AppServices>,
    pub configs: Arc<MemoryConfigStore>,
    pub templates: Arc<MemoryTemplateStore>,
    pub quota: Arc<MemoryQuotaStore>,
    pub providers: Arc<ProviderManager>,
    pub cancel: CancellationToken,
}

/// Optional client overrides for the in-memory assembly (tests script the
/// tenant side through these).
#[derive(Default)]
pub struct InMemoryOptions {
    pub check_client: Option<Arc<dyn TxCheckClient>>,
    pub callback_client: Option<Arc<dyn CallbackClient>>,
}

struct Ports {
    notification_store: Arc<dyn NotificationStore>,
    tx_store: Arc<dyn TxNotificationStore>,
    callback_store: Arc<dyn CallbackLogStore>,
    config_store: Arc<dyn ConfigStore>,
    template_store: Arc<dyn TemplateStore>,
    provider_store: Arc<dyn ProviderStore>,
    quota: Arc<dyn QuotaStore>,
    local_cache: Arc<dyn ConfigCache>,
    shared_cache: Arc<dyn ConfigCache>,
    lock_client: Arc<dyn LockClient>,
    check_client: Arc<dyn TxCheckClient>,
    callback_client: Arc<dyn CallbackClient>,
    vendor_client: Arc<dyn VendorClient>,
    secrets: SecretBox,
}

/// Assemble the platform from its ports and start the background loops.
fn assemble(ports: Ports, cancel: CancellationToken) -> (Arc<AppServices>, Arc<ProviderManager>) {
    let config_repo = Arc::new(BusinessConfigRepository::new(
        ports.config_store,
        ports.local_cache,
        ports.shared_cache,
    ));
    config_repo.clone().start_preload(cancel.clone());
    let config = Arc::new(BusinessConfigService::new(config_repo));

    let templates = Arc::new(ChannelTemplateService::new(ports.template_store));
    let providers = Arc::new(ProviderManager::new(ports.provider_store, ports.secrets));

    let notification_repo = Arc::new(NotificationRepository::new(
        ports.notification_store.clone(),
        ports.quota,
    ));
    let callback_repo = Arc::new(CallbackLogRepository::new(
        ports.callback_store,
        ports.notification_store,
    ));
    let callbacks = Arc::new(CallbackService::new(
        config.clone(),
        callback_repo.clone(),
        ports.callback_client,
    ));

    let mut channels: HashMap<Channel, Arc<dyn NotificationChannel>> = HashMap::new();
    for channel in [Channel::Sms, Channel::Email, Channel::InApp] {
        channels.insert(
            channel,
            Arc::new(SelectorChannel::new(Arc::new(StoreBackedSelectorBuilder::new(
                providers.clone(),
                channel,
                templates.clone(),
                ports.vendor_client.clone(),
            )))),
        );
    }
    let dispatcher: Arc<dyn NotificationChannel> = Arc::new(ChannelDispatcher::new(channels));

    let sender = Arc::new(Sender::new(
        notification_repo.clone(),
        dispatcher,
        callbacks.clone(),
    ));

    let strategy = Arc::new(StrategyDispatcher::new(
        ImmediateStrategy::new(notification_repo.clone(), sender.clone(), config.clone()),
        DeferredStrategy::new(notification_repo.clone(), config.clone()),
    ));

    let send = Arc::new(SendService::new(templates, strategy));
    let txn = Arc::new(TxNotificationService::new(
        ports.tx_store.clone(),
        notification_repo.clone(),
        config.clone(),
        sender.clone(),
    ));
    let queries = Arc::new(NotificationQueryService::new(notification_repo.clone()));

    // Background loops, each under its own distributed lease.
    let scheduler = Arc::new(Scheduler::new(notification_repo, sender));
    tokio::spawn(scheduler.start(ports.lock_client.clone(), cancel.clone()));

    let check_task = Arc::new(TxCheckTask::new(
        ports.tx_store,
        config,
        ports.check_client,
    ));
    tokio::spawn(check_task.start(ports.lock_client.clone(), cancel.clone()));

    let callback_task = Arc::new(CallbackTask::new(callbacks, callback_repo));
    tokio::spawn(callback_task.start(ports.lock_client, cancel));

    (Arc::new(AppServices { send, txn, queries }), providers)
}

/// Self-contained assembly over the in-memory backends.
pub fn in_memory(options: InMemoryOptions) -> InMemoryApp {
    let cancel = CancellationToken::new();

    let store = Arc::new(MemoryNotificationStore::new());
    let configs = Arc::new(MemoryConfigStore::new());
    let templates = Arc::new(MemoryTemplateStore::new());
    let provider_store = Arc::new(MemoryProviderStore::new());
    let quota = Arc::new(MemoryQuotaStore::new());

    let ports = Ports {
        notification_store: store.clone(),
        tx_store: store.clone(),
        callback_store: store,
        config_store: configs.clone(),
        template_store: templates.clone(),
        provider_store,
        quota: quota.clone(),
        local_cache: Arc::new(LocalConfigCache::new()),
        shared_cache: Arc::new(LocalConfigCache::new()),
        lock_client: Arc::new(MemoryLockClient::new()),
        check_client: options
            .check_client
            .unwrap_or_else(|| Arc::new(ScriptedTxCheckClient::new(vec![]))),
        callback_client: options
            .callback_client
            .unwrap_or_else(|| Arc::new(RecordingCallbackClient::accepting())),
        vendor_client: Arc::new(courier_infra::rpc::StaticVendorClient::ok()),
        secrets: SecretBox::new("courier-dev-provider-key"),
    };

    let (services, providers) = assemble(ports, cancel.clone());
    info!("courier wired against in-memory backends");

    InMemoryApp {
        services,
        configs,
        templates,
        quota,
        providers,
        cancel,
    }
}

/// Environment-driven configuration for the production assembly.
pub struct EnvConfig {
    pub database_url: String,
    pub redis_url: String,
    pub provider_key: String,
    /// `name=url` pairs for tenant-registered services.
    pub services: Vec<(String, String)>,
}

impl EnvConfig {
    pub fn from_env() -> Option<Self> {
        let database_url = std::env::var("COURIER_DATABASE_URL").ok()?;
        let redis_url = std::env::var("COURIER_REDIS_URL").ok()?;
        let provider_key =
            std::env::var("COURIER_PROVIDER_KEY").unwrap_or_else(|_| "courier-provider-key".into());
        let services = std::env::var("COURIER_SERVICES")
            .unwrap_or_default()
            .split(',')
            .filter_map(|pair| {
                let (name, url) = pair.split_once('=')?;
                Some((name.trim().to_string(), url.trim().to_string()))
            })
            .collect();
        Some(Self {
            database_url,
            redis_url,
            provider_key,
            services,
        })
    }
}

/// Production assembly: Postgres stores, Redis counters/leases/cache, HTTP
/// outbound clients.
pub async fn from_env(
    config: EnvConfig,
    cancel: CancellationToken,
) -> Result<Arc<AppServices>, Box<dyn std::error::Error + Send + Sync>> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await?;
    let redis = redis::Client::open(config.redis_url.as_str())?;

    let mut registry = ServiceRegistry::new();
    for (name, url) in &config.services {
        registry = registry.register(name, url);
    }

    let ports = Ports {
        notification_store: Arc::new(PgNotificationStore::new(pool.clone())),
        tx_store: Arc::new(PgTxNotificationStore::new(pool.clone())),
        callback_store: Arc::new(PgCallbackLogStore::new(pool.clone())),
        config_store: Arc::new(PgConfigStore::new(pool.clone())),
        template_store: Arc::new(PgTemplateStore::new(pool.clone())),
        provider_store: Arc::new(PgProviderStore::new(pool)),
        quota: Arc::new(RedisQuotaStore::new(redis.clone())),
        local_cache: Arc::new(LocalConfigCache::new()),
        shared_cache: Arc::new(RedisConfigCache::new(redis.clone())),
        lock_client: Arc::new(RedisLockClient::new(redis)),
        check_client: Arc::new(HttpTxCheckClient::new(registry.clone())),
        callback_client: Arc::new(HttpCallbackClient::new(registry)),
        vendor_client: Arc::new(HttpVendorClient::new()),
        secrets: SecretBox::new(&config.provider_key),
    };

    let (services, _providers) = assemble(ports, cancel);
    info!("courier wired against postgres + redis");
    Ok(services)
}
