//! HTTP routes, one file per surface area.

use axum::Router;

pub mod notifications;
pub mod system;

pub fn router() -> Router {
    Router::new().nest("/api/notifications", notifications::router())
}
