// src/handlers/auth.rs
use crate::error::ApiError;
use crate::middleware::rate_limit::login_rate_limit_middleware;
use crate::models::auth::{AdminInfo, Claims, LoginRequest};
use crate::AppState;
use axum::extract::Extension;
use axum::routing::post;
use axum::{Json, Router};
use bcrypt::verify;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::RwLock;
use std::sync::Arc;

pub const TOKEN_ISSUER: &str = "chatbot-api";
pub const TOKEN_AUDIENCE: &str = "chatbot-admin";
const TOKEN_TTL_HOURS: i64 = 24;

/// Capability-grant lookup: which identities may perform admin operations.
/// In-process set seeded from config; any identity store can sit behind the
/// same two calls.
pub struct AdminDirectory {
    grants: RwLock<HashSet<String>>,
}

impl AdminDirectory {
    pub fn new<I: IntoIterator<Item = String>>(seed: I) -> Self {
        AdminDirectory {
            grants: RwLock::new(seed.into_iter().map(|e| e.to_lowercase()).collect()),
        }
    }

    pub fn grant_admin(&self, email: &str) {
        self.grants.write().unwrap().insert(email.to_lowercase());
    }

    pub fn has_admin_grant(&self, email: &str) -> bool {
        self.grants.read().unwrap().contains(&email.to_lowercase())
    }
}

pub fn auth_routes() -> Router {
    Router::new()
        .route("/api/admin/login", post(admin_login))
        .layer(axum::middleware::from_fn(login_rate_limit_middleware))
}

/// The only login path: one fixed admin credential, verified against a
/// salted bcrypt hash. No self-service registration.
async fn admin_login(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest(
            "Validation failed: valid email is required".to_string(),
        ));
    }
    if payload.password.len() < 6 {
        return Err(ApiError::BadRequest(
            "Validation failed: password must be at least 6 characters".to_string(),
        ));
    }

    if email != state.admin_email {
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    match verify(&payload.password, &state.admin_password_hash) {
        Ok(true) => {}
        Ok(false) => {
            return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
        }
        Err(e) => {
            return Err(ApiError::internal("Error verifying admin password", e));
        }
    }

    state.admin_directory.grant_admin(&email);

    let token = generate_admin_token(&state.jwt_secret, &email)
        .map_err(|e| ApiError::internal("Error generating admin token", e))?;

    tracing::info!("Admin login successful for {}", email);

    Ok(Json(json!({
        "success": true,
        "data": {
            "token": token,
            "admin": AdminInfo {
                email,
                role: "admin".to_string(),
            }
        }
    })))
}

/// Mint a signed admin token: 24h validity, fixed issuer and audience.
pub fn generate_admin_token(
    secret: &str,
    email: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: format!("admin-{}", uuid::Uuid::new_v4()),
        email: email.to_string(),
        admin: true,
        iat: now.timestamp() as usize,
        exp: (now + Duration::hours(TOKEN_TTL_HOURS)).timestamp() as usize,
        iss: TOKEN_ISSUER.to_string(),
        aud: TOKEN_AUDIENCE.to_string(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

/// Signature, expiry, issuer and audience checks. Callers distinguish
/// expiry from other failures via the error kind.
pub fn verify_admin_token(
    secret: &str,
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::default();
    validation.set_issuer(&[TOKEN_ISSUER]);
    validation.set_audience(&[TOKEN_AUDIENCE]);

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )?;

    Ok(token_data.claims)
}
