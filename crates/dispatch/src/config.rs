//! Tenant configuration service: the validation boundary over the
//! three-tier config repository.

use std::collections::HashMap;
use std::sync::Arc;

use courier_core::{BusinessConfig, CoreError, CoreResult};
use courier_infra::repository::BusinessConfigRepository;

pub struct BusinessConfigService {
    repo: Arc<BusinessConfigRepository>,
}

impl BusinessConfigService {
    pub fn new(repo: Arc<BusinessConfigRepository>) -> Self {
        Self { repo }
    }

    pub async fn get_by_id(&self, id: i64) -> CoreResult<BusinessConfig> {
        if id <= 0 {
            return Err(CoreError::invalid_parameter(format!("biz_id = {id}")));
        }
        self.repo.get_by_id(id).await
    }

    pub async fn get_by_ids(&self, ids: &[i64]) -> CoreResult<HashMap<i64, BusinessConfig>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.repo.get_by_ids(ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_infra::cache::LocalConfigCache;
    use courier_infra::store::memory::MemoryConfigStore;
    use courier_infra::store::ConfigStore;

    async fn service_with(ids: &[i64]) -> BusinessConfigService {
        let store = Arc::new(MemoryConfigStore::new());
        for id in ids {
            store
                .save(BusinessConfig { id: *id, ..Default::default() })
                .await
                .unwrap();
        }
        BusinessConfigService::new(Arc::new(BusinessConfigRepository::new(
            store,
            Arc::new(LocalConfigCache::new()),
            Arc::new(LocalConfigCache::new()),
        )))
    }

    #[tokio::test]
    async fn rejects_non_positive_ids() {
        let svc = service_with(&[]).await;
        assert!(matches!(
            svc.get_by_id(0).await.unwrap_err(),
            CoreError::InvalidParameter(_)
        ));
    }

    #[tokio::test]
    async fn missing_tenant_maps_to_config_not_found() {
        let svc = service_with(&[1]).await;
        assert_eq!(svc.get_by_id(9).await.unwrap_err(), CoreError::ConfigNotFound);
        assert_eq!(svc.get_by_id(1).await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn batch_lookup_returns_the_found_subset() {
        let svc = service_with(&[1, 2]).await;
        let found = svc.get_by_ids(&[1, 2, 3]).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(svc.get_by_ids(&[]).await.unwrap().is_empty());
    }
}
