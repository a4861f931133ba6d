//! Admin authentication.
//!
//! Two mutually exclusive credentials, fixed at boot: a static API key
//! checked against the `x-admin-api-key` header, or an RS256 JWT verified
//! with the configured public key and required to carry the admin role.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;

use crate::config::AdminAuthConfig;
use crate::utils::response::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
struct AdminClaims {
    sub: String,
    #[serde(default)]
    roles: Vec<String>,
    #[allow(dead_code)]
    exp: u64,
}

/// Authenticated admin identity, attached as a request extension.
#[derive(Debug, Clone)]
pub struct AdminIdentity {
    pub actor_id: String,
}

pub async fn admin_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = match &state.config.admin_auth {
        AdminAuthConfig::ApiKey(expected) => {
            let provided = request
                .headers()
                .get("x-admin-api-key")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| ApiError::unauthorized("missing admin api key"))?;
            if provided != expected {
                return Err(ApiError::unauthorized("invalid admin api key"));
            }
            AdminIdentity {
                actor_id: "admin".to_string(),
            }
        }
        AdminAuthConfig::JwtPublicKey(pem) => {
            let token = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

            let key = DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|_| ApiError::internal("invalid admin jwt public key"))?;
            let claims = decode::<AdminClaims>(token, &key, &Validation::new(Algorithm::RS256))
                .map_err(|_| ApiError::unauthorized("invalid admin token"))?
                .claims;

            if !claims.roles.iter().any(|role| role == "admin") {
                return Err(ApiError::forbidden("admin role required"));
            }
            AdminIdentity {
                actor_id: claims.sub,
            }
        }
    };

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
