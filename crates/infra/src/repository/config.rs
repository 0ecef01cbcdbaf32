//! Three-tier read-through config repository.
//!
//! Reads go local cache → shared cache → store, populating the caches on
//! the way back; batch reads write back only what each tier was actually
//! missing. On startup the repository preloads the local cache in the
//! background, best-effort: the system serves traffic on read-through even
//! if the preload never completes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use courier_core::{BusinessConfig, CoreResult};

use crate::cache::ConfigCache;
use crate::store::ConfigStore;

const PRELOAD_BATCH: i64 = 10;
const PRELOAD_BATCH_TIMEOUT: Duration = Duration::from_secs(3);

pub struct BusinessConfigRepository {
    store: Arc<dyn ConfigStore>,
    local_cache: Arc<dyn ConfigCache>,
    shared_cache: Arc<dyn ConfigCache>,
}

impl BusinessConfigRepository {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        local_cache: Arc<dyn ConfigCache>,
        shared_cache: Arc<dyn ConfigCache>,
    ) -> Self {
        Self {
            store,
            local_cache,
            shared_cache,
        }
    }

    /// Spawn the background cache preload; cancellation stops it between
    /// batches.
    pub fn start_preload(self: Arc<Self>, cancel: CancellationToken) {
        tokio::spawn(async move {
            if let Err(err) = self.load_cache(cancel).await {
                error!(error = %err, "config cache preload aborted");
            }
        });
    }

    /// Paginate the store into the local cache. Individual batch failures
    /// are logged and retried on the next iteration.
    pub async fn load_cache(&self, cancel: CancellationToken) -> CoreResult<()> {
        let mut offset = 0;
        loop {
            if cancel.is_cancelled() {
                info!("config cache preload cancelled");
                return Ok(());
            }
            // The per-batch budget nests inside the caller's cancellation
            // scope rather than replacing it.
            let batch = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = timeout(PRELOAD_BATCH_TIMEOUT, self.load_cache_batch(offset)) => result,
            };
            match batch {
                Ok(Ok(count)) => {
                    if count < PRELOAD_BATCH {
                        info!(total = offset + count, "config cache preload complete");
                        return Ok(());
                    }
                    offset += count;
                }
                Ok(Err(err)) => {
                    warn!(offset, error = %err, "config preload batch failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Err(_) => {
                    warn!(offset, "config preload batch timed out, retrying");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    async fn load_cache_batch(&self, offset: i64) -> CoreResult<i64> {
        let configs = self.store.find(offset, PRELOAD_BATCH).await?;
        let count = configs.len() as i64;
        self.local_cache.set_many(&configs).await?;
        Ok(count)
    }

    /// Single-key read-through.
    pub async fn get_by_id(&self, id: i64) -> CoreResult<BusinessConfig> {
        if let Some(config) = self.local_cache.get(id).await? {
            return Ok(config);
        }

        if let Ok(Some(config)) = self.shared_cache.get(id).await {
            if let Err(err) = self.local_cache.set(&config).await {
                warn!(biz_id = id, error = %err, "local cache refresh failed");
            }
            return Ok(config);
        }

        let config = self.store.get_by_id(id).await.map_err(|err| match err {
            crate::store::StoreError::NotFound => courier_core::CoreError::ConfigNotFound,
            other => other.into(),
        })?;
        if let Err(err) = self.local_cache.set(&config).await {
            warn!(biz_id = id, error = %err, "local cache refresh failed");
        }
        if let Err(err) = self.shared_cache.set(&config).await {
            warn!(biz_id = id, error = %err, "shared cache refresh failed");
        }
        Ok(config)
    }

    /// Batch read-through: local first, the remainder from the shared
    /// cache, the remainder from the store. Each tier is back-filled with
    /// only what it was missing.
    pub async fn get_by_ids(&self, ids: &[i64]) -> CoreResult<HashMap<i64, BusinessConfig>> {
        let mut found = match self.local_cache.get_many(ids).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!(error = %err, "local cache batch read failed");
                HashMap::with_capacity(ids.len())
            }
        };

        let missing = Self::diff_ids(ids, &found);
        if missing.is_empty() {
            return Ok(found);
        }

        match self.shared_cache.get_many(&missing).await {
            Ok(shared_hit) => {
                let fetched: Vec<BusinessConfig> = shared_hit.values().cloned().collect();
                found.extend(shared_hit);
                if let Err(err) = self.local_cache.set_many(&fetched).await {
                    warn!(error = %err, "local cache batch back-fill failed");
                }
            }
            Err(err) => {
                warn!(error = %err, "shared cache batch read failed");
            }
        }

        let missing = Self::diff_ids(ids, &found);
        if missing.is_empty() {
            return Ok(found);
        }

        let from_store = self.store.get_by_ids(&missing).await?;
        if !from_store.is_empty() {
            let fetched: Vec<BusinessConfig> = from_store.values().cloned().collect();
            if let Err(err) = self.local_cache.set_many(&fetched).await {
                warn!(error = %err, "local cache batch back-fill failed");
            }
            if let Err(err) = self.shared_cache.set_many(&fetched).await {
                warn!(error = %err, "shared cache batch back-fill failed");
            }
            found.extend(from_store);
        }
        Ok(found)
    }

    fn diff_ids(ids: &[i64], found: &HashMap<i64, BusinessConfig>) -> Vec<i64> {
        ids.iter()
            .filter(|id| !found.contains_key(id))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalConfigCache;
    use crate::store::memory::MemoryConfigStore;

    fn config(id: i64) -> BusinessConfig {
        BusinessConfig {
            id,
            owner_id: id,
            ..Default::default()
        }
    }

    fn repo() -> (Arc<BusinessConfigRepository>, Arc<MemoryConfigStore>) {
        let store = Arc::new(MemoryConfigStore::new());
        let repo = Arc::new(BusinessConfigRepository::new(
            store.clone(),
            Arc::new(LocalConfigCache::new()),
            Arc::new(LocalConfigCache::new()),
        ));
        (repo, store)
    }

    #[tokio::test]
    async fn read_through_populates_both_tiers() {
        let (repo, store) = repo();
        store.save(config(42)).await.unwrap();

        let first = repo.get_by_id(42).await.unwrap();
        assert_eq!(first.id, 42);

        // Second read is served from cache even if the store row vanishes.
        // (MemoryConfigStore has no delete; assert via the caches instead.)
        assert!(repo.local_cache.get(42).await.unwrap().is_some());
        assert!(repo.shared_cache.get(42).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_config_is_an_error() {
        let (repo, _store) = repo();
        assert!(repo.get_by_id(999).await.is_err());
    }

    #[tokio::test]
    async fn batch_read_merges_tiers_and_backfills() {
        let (repo, store) = repo();
        for id in 1..=5 {
            store.save(config(id)).await.unwrap();
        }
        // Pre-warm tier by tier: 1 in local, 2 in shared, rest in store only.
        repo.local_cache.set(&config(1)).await.unwrap();
        repo.shared_cache.set(&config(2)).await.unwrap();

        let found = repo.get_by_ids(&[1, 2, 3, 4, 5, 6]).await.unwrap();
        assert_eq!(found.len(), 5);
        assert!(!found.contains_key(&6));

        // Store hits were written back to both caches.
        assert!(repo.local_cache.get(4).await.unwrap().is_some());
        assert!(repo.shared_cache.get(4).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn preload_fills_the_local_cache() {
        let (repo, store) = repo();
        for id in 1..=25 {
            store.save(config(id)).await.unwrap();
        }
        repo.load_cache(CancellationToken::new()).await.unwrap();
        for id in [1, 13, 25] {
            assert!(repo.local_cache.get(id).await.unwrap().is_some());
        }
    }
}
