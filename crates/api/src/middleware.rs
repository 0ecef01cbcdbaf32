//! Bearer-token authentication.
//!
//! Every inbound request carries an HS256-signed JWT whose `biz_id` claim
//! identifies the tenant. Tokens are minted by the account system;
//! depending on the minting path the claim may arrive as a JSON integer or
//! float, so it is decoded as a number and truncated to i64.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::context::BizContext;

#[derive(Clone)]
pub struct AuthState {
    key: Arc<DecodingKey>,
}

impl AuthState {
    pub fn new(jwt_secret: &str) -> Self {
        Self {
            key: Arc::new(DecodingKey::from_secret(jwt_secret.as_bytes())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    biz_id: f64,
    #[allow(dead_code)]
    exp: i64,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer(req.headers())?;

    let validation = Validation::new(Algorithm::HS256);
    let decoded = jsonwebtoken::decode::<Claims>(token, &state.key, &validation)
        .map_err(|_e| StatusCode::UNAUTHORIZED)?;

    let biz_id = decoded.claims.biz_id as i64;
    if biz_id <= 0 {
        return Err(StatusCode::UNAUTHORIZED);
    }
    req.extensions_mut().insert(BizContext::new(biz_id));

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let token = header
        .strip_prefix("Bearer ")
        .unwrap_or(header)
        .trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
