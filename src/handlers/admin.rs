// src/handlers/admin.rs
use crate::error::ApiError;
use crate::handlers::chat::{validate_session_id, validate_text};
use crate::middleware::auth::admin_auth_middleware;
use crate::middleware::rate_limit::admin_rate_limit_middleware;
use crate::models::auth::Claims;
use crate::models::chat::{
    AdminMessageRequest, SessionQuery, SessionStats, SessionStatus, UpdateStatusRequest,
};
use crate::services::chat_store::NewMessage;
use crate::AppState;
use axum::extract::{Extension, Path, Query};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn admin_routes() -> Router {
    Router::new()
        .route("/api/admin/sessions", get(list_sessions))
        .route("/api/admin/session/:session_id", get(get_session))
        .route("/api/admin/message", post(send_message))
        .route("/api/admin/session/:session_id/status", put(update_status))
        .route("/api/admin/stats", get(get_stats))
        .route("/api/admin/verify", get(verify_token))
        .layer(axum::middleware::from_fn(admin_auth_middleware))
        .layer(axum::middleware::from_fn(admin_rate_limit_middleware))
}

async fn list_sessions(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Value>, ApiError> {
    let sessions = state.store.list_sessions(query.include_user_info());
    Ok(Json(json!({ "success": true, "data": sessions })))
}

async fn get_session(
    Path(session_id): Path<String>,
    Query(query): Query<SessionQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    validate_session_id(&session_id)?;
    match state.store.get_session(&session_id, query.include_user_info()) {
        Some(session) => Ok(Json(json!({ "success": true, "data": session }))),
        None => Err(ApiError::NotFound("Session not found".to_string())),
    }
}

/// Admin reply: stamps the authenticated admin's identity and latches the
/// session's adminReplied flag via the store.
async fn send_message(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<AdminMessageRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_session_id(&payload.session_id)?;
    let text = validate_text(&payload.text)?;

    let message = state.store.add_message(
        &payload.session_id,
        NewMessage::from_admin(text, claims.email.clone()),
    );

    tracing::info!(
        "Admin {} replied in session {}",
        claims.email,
        payload.session_id
    );

    Ok(Json(json!({
        "success": true,
        "data": { "messageId": message.id, "message": message }
    })))
}

async fn update_status(
    Path(session_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_session_id(&session_id)?;
    let status: SessionStatus = payload.status.parse().map_err(ApiError::BadRequest)?;

    state
        .store
        .update_status(&session_id, status)
        .map_err(|_| ApiError::NotFound("Session not found".to_string()))?;

    Ok(Json(json!({
        "success": true,
        "data": { "sessionId": session_id, "status": status }
    })))
}

async fn get_stats(Extension(state): Extension<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let sessions = state.store.list_sessions(false);
    let today = Utc::now().date_naive();

    let stats = SessionStats {
        total_sessions: sessions.len(),
        active_sessions: sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Active)
            .count(),
        closed_sessions: sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Closed)
            .count(),
        pending_sessions: sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Pending)
            .count(),
        admin_replied_sessions: sessions.iter().filter(|s| s.admin_replied).count(),
        today_sessions: sessions
            .iter()
            .filter(|s| {
                Utc.timestamp_millis_opt(s.created_at)
                    .single()
                    .map(|created| created.date_naive() == today)
                    .unwrap_or(false)
            })
            .count(),
    };

    Ok(Json(json!({ "success": true, "data": stats })))
}

/// Liveness probe for a held token; the middleware has already done the work.
async fn verify_token(Extension(claims): Extension<Claims>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "admin": { "email": claims.email, "sub": claims.sub },
            "verified": true
        }
    }))
}
