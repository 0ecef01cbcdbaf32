//! Read-only notification queries.

use std::sync::Arc;

use courier_core::{CoreResult, Notification};
use courier_infra::repository::NotificationRepository;

pub struct NotificationQueryService {
    repo: Arc<NotificationRepository>,
}

impl NotificationQueryService {
    pub fn new(repo: Arc<NotificationRepository>) -> Self {
        Self { repo }
    }

    pub async fn get_by_id(&self, id: i64) -> CoreResult<Notification> {
        self.repo.get_by_id(id).await
    }

    pub async fn get_by_key(&self, biz_id: i64, key: &str) -> CoreResult<Notification> {
        self.repo.get_by_key(biz_id, key).await
    }
}
