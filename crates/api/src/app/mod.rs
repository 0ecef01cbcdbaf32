//! HTTP application wiring (axum router + service assembly).
//!
//! - `services.rs`: the two service assemblies (in-memory, postgres+redis)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs and domain mapping
//! - `errors.rs`: the error-code translation point

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{in_memory, AppServices, EnvConfig, InMemoryApp, InMemoryOptions};

/// Build the full HTTP router around an assembled service set.
pub fn build_app(services: Arc<AppServices>, jwt_secret: &str) -> Router {
    let auth_state = middleware::AuthState::new(jwt_secret);

    // Every notification route requires a tenant token.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}
