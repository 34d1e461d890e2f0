// src/middleware/auth.rs
use crate::error::ApiError;
use crate::handlers::auth::verify_admin_token;
use crate::AppState;
use axum::extract::{Extension, Request};
use axum::http::Uri;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::errors::ErrorKind;
use std::sync::Arc;

/// Widget-origin capability check: the shared API key, via the `x-api-key`
/// header or an `apiKey` query parameter (EventSource cannot set headers).
pub async fn api_key_middleware(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| query_param(request.uri(), "apiKey"));

    match provided {
        None => Err(ApiError::Unauthorized("API key required".to_string())),
        Some(key) if key != state.api_key => {
            Err(ApiError::Unauthorized("Invalid API key".to_string()))
        }
        Some(_) => Ok(next.run(request).await),
    }
}

/// Admin capability check: bearer token signature/expiry, then the grant
/// lookup. On success the decoded claims land in the request extensions so
/// handlers can stamp `adminId`.
pub async fn admin_auth_middleware(
    Extension(state): Extension<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = match request.headers().get("Authorization") {
        Some(header) => header,
        None => return Err(ApiError::Unauthorized("Admin token required".to_string())),
    };

    let auth_str = match auth_header.to_str() {
        Ok(value) => value,
        Err(_) => {
            return Err(ApiError::Unauthorized(
                "Invalid Authorization header format".to_string(),
            ));
        }
    };

    let token = match auth_str.strip_prefix("Bearer ") {
        Some(token) => token,
        None => {
            return Err(ApiError::Unauthorized(
                "Invalid Authorization header format. Expected 'Bearer <token>'".to_string(),
            ));
        }
    };

    let claims = match verify_admin_token(&state.jwt_secret, token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!("Admin token verification failed: {}", e);
            let message = match e.kind() {
                ErrorKind::ExpiredSignature => "Token expired",
                _ => "Invalid token",
            };
            return Err(ApiError::Unauthorized(message.to_string()));
        }
    };

    // A valid token alone is not enough; the email must carry the grant.
    if !state.admin_directory.has_admin_grant(&claims.email) {
        return Err(ApiError::Forbidden("Admin access required".to_string()));
    }

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == name {
            urlencoding::decode(value).ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_extraction() {
        let uri: Uri = "/api/chat/session/abc/stream?apiKey=sek%20ret&x=1"
            .parse()
            .unwrap();
        assert_eq!(query_param(&uri, "apiKey").as_deref(), Some("sek ret"));
        assert_eq!(query_param(&uri, "x").as_deref(), Some("1"));
        assert!(query_param(&uri, "missing").is_none());

        let bare: Uri = "/api/chat/session".parse().unwrap();
        assert!(query_param(&bare, "apiKey").is_none());
    }
}
