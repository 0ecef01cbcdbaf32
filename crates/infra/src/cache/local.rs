//! Process-local config cache: a TTL map over `DashMap`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use courier_core::{BusinessConfig, CoreResult};

use super::{ConfigCache, DEFAULT_TTL};

#[derive(Clone)]
struct Entry {
    config: BusinessConfig,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

pub struct LocalConfigCache {
    entries: DashMap<i64, Entry>,
    ttl: Duration,
}

impl LocalConfigCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    fn lookup(&self, biz_id: i64) -> Option<BusinessConfig> {
        // The read guard must drop before the expired entry is removed.
        let expired = match self.entries.get(&biz_id) {
            Some(entry) if !entry.is_expired() => return Some(entry.config.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(&biz_id);
        }
        None
    }
}

impl Default for LocalConfigCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigCache for LocalConfigCache {
    async fn get(&self, biz_id: i64) -> CoreResult<Option<BusinessConfig>> {
        Ok(self.lookup(biz_id))
    }

    async fn set(&self, config: &BusinessConfig) -> CoreResult<()> {
        self.entries.insert(
            config.id,
            Entry {
                config: config.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn get_many(&self, ids: &[i64]) -> CoreResult<HashMap<i64, BusinessConfig>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.lookup(*id).map(|c| (*id, c)))
            .collect())
    }

    async fn set_many(&self, configs: &[BusinessConfig]) -> CoreResult<()> {
        let expires_at = Instant::now() + self.ttl;
        for config in configs {
            self.entries.insert(
                config.id,
                Entry {
                    config: config.clone(),
                    expires_at,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: i64) -> BusinessConfig {
        BusinessConfig {
            id,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let cache = LocalConfigCache::with_ttl(Duration::from_millis(10));
        cache.set(&config(42)).await.unwrap();
        assert!(cache.get(42).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_many_returns_only_the_cached_subset() {
        let cache = LocalConfigCache::new();
        cache.set_many(&[config(1), config(3)]).await.unwrap();
        let hit = cache.get_many(&[1, 2, 3]).await.unwrap();
        assert_eq!(hit.len(), 2);
        assert!(hit.contains_key(&1));
        assert!(hit.contains_key(&3));
    }
}
