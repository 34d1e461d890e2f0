// src/handlers/chat.rs
use crate::db::MessageSubscription;
use crate::error::ApiError;
use crate::middleware::auth::api_key_middleware;
use crate::middleware::rate_limit::chat_rate_limit_middleware;
use crate::models::chat::{
    is_valid_session_id, AddMessageRequest, CreateSessionRequest, WebhookRequest,
};
use crate::services::chat_store::NewMessage;
use crate::webhook_client::FALLBACK_REPLY;
use crate::AppState;
use axum::extract::{ConnectInfo, Extension, Path};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

const MAX_MESSAGE_LEN: usize = 1000;

pub fn chat_routes() -> Router {
    // Mutating endpoints carry the chat rate limit ahead of the key check;
    // reads are key-checked only.
    let mutating = Router::new()
        .route("/api/chat/session", post(create_session))
        .route("/api/chat/message", post(add_message))
        .route("/api/chat/webhook", post(relay_webhook))
        .layer(axum::middleware::from_fn(api_key_middleware))
        .layer(axum::middleware::from_fn(chat_rate_limit_middleware));

    let reads = Router::new()
        .route("/api/chat/session/:session_id/messages", get(get_messages))
        .route("/api/chat/session/:session_id", get(get_session))
        .route("/api/chat/session/:session_id/stream", get(stream_messages))
        .layer(axum::middleware::from_fn(api_key_middleware));

    mutating.merge(reads)
}

pub(crate) fn validate_session_id(session_id: &str) -> Result<(), ApiError> {
    if is_valid_session_id(session_id) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "Invalid session ID format".to_string(),
        ))
    }
}

/// Trim, reject empty, cap at 1000 characters.
pub(crate) fn validate_text(text: &str) -> Result<String, ApiError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest("Message text is required".to_string()));
    }
    if trimmed.chars().count() > MAX_MESSAGE_LEN {
        Ok(trimmed.chars().take(MAX_MESSAGE_LEN).collect())
    } else {
        Ok(trimmed.to_string())
    }
}

async fn create_session(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_session_id(&payload.session_id)?;

    // Whatever the widget sent, the connection metadata wins.
    let mut user_info = payload.user_info.unwrap_or_default();
    user_info.ip = Some(addr.ip().to_string());
    user_info.user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    user_info.origin = headers
        .get("origin")
        .or_else(|| headers.get("referer"))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    user_info.timestamp = Some(crate::db::now_ms());

    let session = state
        .store
        .create_session(&payload.session_id, &user_info)
        .map_err(|e| ApiError::internal("Error creating chat session", e))?;

    tracing::info!("Created chat session {}", session.session_id);

    Ok(Json(json!({
        "success": true,
        "data": { "sessionId": session.session_id }
    })))
}

async fn add_message(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<AddMessageRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_session_id(&payload.session_id)?;
    let text = validate_text(&payload.text)?;

    // Admin authorship is only ever stamped by the admin surface.
    let message = state.store.add_message(
        &payload.session_id,
        NewMessage {
            text,
            is_bot: payload.is_bot,
            is_admin: false,
            admin_id: None,
        },
    );

    Ok(Json(json!({
        "success": true,
        "data": { "messageId": message.id, "message": message }
    })))
}

async fn get_messages(
    Path(session_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    validate_session_id(&session_id)?;
    let messages = state.store.get_messages(&session_id);
    Ok(Json(json!({ "success": true, "data": messages })))
}

/// Widget-facing session lookup: userInfo is always stripped here.
async fn get_session(
    Path(session_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    validate_session_id(&session_id)?;
    match state.store.get_session(&session_id, false) {
        Some(session) => Ok(Json(json!({ "success": true, "data": session }))),
        None => Err(ApiError::NotFound("Session not found".to_string())),
    }
}

// Unsubscribes the store listener when the HTTP stream goes away, so a
// dropped EventSource does not pin a watcher for the process lifetime.
struct StreamGuard {
    subscription: Option<MessageSubscription>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

/// SSE stream of full ordered message snapshots: one event on subscribe,
/// one after every append. Consumers must tolerate repeated snapshots.
async fn stream_messages(
    Path(session_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    validate_session_id(&session_id)?;

    let guard = StreamGuard {
        subscription: Some(state.store.subscribe_messages(&session_id)),
    };

    let stream = futures::stream::unfold(guard, |mut guard| async move {
        let snapshot = guard.subscription.as_mut()?.receiver.recv().await?;
        let event = Event::default().event("snapshot").json_data(&snapshot).ok()?;
        Some((Ok::<Event, Infallible>(event), guard))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Relay one user message to the external bot and persist both sides of the
/// exchange.
async fn relay_webhook(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<WebhookRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_session_id(&payload.session_id)?;
    let text = validate_text(&payload.message)?;

    let webhook_client = match state.webhook_client.as_ref() {
        Some(client) => client,
        None => {
            tracing::error!("WEBHOOK_URL not configured, cannot relay message");
            return Err(ApiError::Internal);
        }
    };

    // The user's side of the exchange is persisted before the bot is called.
    state
        .store
        .add_message(&payload.session_id, NewMessage::from_user(text.clone()));

    let bot_reply = match webhook_client.send_message(&payload.session_id, &text).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!("Webhook relay failed: {}", e);
            // Best effort: leave the apology in the transcript before
            // surfacing the relay failure.
            state
                .store
                .add_message(&payload.session_id, NewMessage::from_bot(FALLBACK_REPLY));
            return Err(ApiError::Internal);
        }
    };

    state
        .store
        .add_message(&payload.session_id, NewMessage::from_bot(bot_reply.clone()));

    Ok(Json(json!({
        "success": true,
        "data": { "userMessage": text, "botReply": bot_reply }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get as axum_get;
    use serde_json::json;

    const SID: &str = "custom_session_1700000000000_ab12cd34e";

    fn local_addr() -> ConnectInfo<SocketAddr> {
        ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 51123)))
    }

    async fn spawn_bot_stub(reply: &'static str) -> String {
        let app = Router::new().route(
            "/bot",
            axum_get(move || async move { Json(json!({ "reply": reply })) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/bot", addr)
    }

    #[test]
    fn test_validate_text_limits() {
        assert!(validate_text("   ").is_err());
        assert_eq!(validate_text("  hi  ").unwrap(), "hi");
        let long = "a".repeat(1500);
        assert_eq!(validate_text(&long).unwrap().len(), MAX_MESSAGE_LEN);
    }

    #[tokio::test]
    async fn test_create_session_rejects_bad_id() {
        let state = crate::test_state(None);
        let result = create_session(
            local_addr(),
            Extension(state),
            HeaderMap::new(),
            Json(CreateSessionRequest {
                session_id: "not-a-session".to_string(),
                user_info: None,
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_create_session_captures_connection_metadata() {
        let state = crate::test_state(None);
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", "widget-test/1.0".parse().unwrap());
        headers.insert("origin", "https://shop.example".parse().unwrap());

        create_session(
            local_addr(),
            Extension(state.clone()),
            headers,
            Json(CreateSessionRequest {
                session_id: SID.to_string(),
                user_info: None,
            }),
        )
        .await
        .unwrap();

        let session = state.store.get_session(SID, true).unwrap();
        let info = session.user_info.unwrap();
        assert_eq!(info.ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(info.user_agent.as_deref(), Some("widget-test/1.0"));
        assert_eq!(info.origin.as_deref(), Some("https://shop.example"));
    }

    #[tokio::test]
    async fn test_public_message_never_carries_admin_flag() {
        let state = crate::test_state(None);
        let response = add_message(
            Extension(state.clone()),
            Json(AddMessageRequest {
                session_id: SID.to_string(),
                text: "hello there".to_string(),
                is_bot: true,
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.0["success"], json!(true));
        let messages = state.store.get_messages(SID);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_bot);
        assert!(!messages[0].is_admin);
        assert!(messages[0].admin_id.is_none());
    }

    #[tokio::test]
    async fn test_get_session_is_stripped_and_404s() {
        let state = crate::test_state(None);
        create_session(
            local_addr(),
            Extension(state.clone()),
            HeaderMap::new(),
            Json(CreateSessionRequest {
                session_id: SID.to_string(),
                user_info: None,
            }),
        )
        .await
        .unwrap();

        let response = get_session(Path(SID.to_string()), Extension(state.clone()))
            .await
            .unwrap();
        assert!(response.0["data"].get("userInfo").is_none());

        let missing = get_session(
            Path("custom_session_2_none".to_string()),
            Extension(state),
        )
        .await;
        assert!(matches!(missing, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_end_to_end_relay_conversation() {
        let bot_url = spawn_bot_stub("Hello! How can I help?").await;
        let state = crate::test_state(Some(bot_url));

        create_session(
            local_addr(),
            Extension(state.clone()),
            HeaderMap::new(),
            Json(CreateSessionRequest {
                session_id: SID.to_string(),
                user_info: None,
            }),
        )
        .await
        .unwrap();
        let after_create = state.store.get_session(SID, false).unwrap().last_activity;

        let response = relay_webhook(
            Extension(state.clone()),
            Json(WebhookRequest {
                session_id: SID.to_string(),
                message: "Hi".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.0["data"]["userMessage"], json!("Hi"));
        assert_eq!(response.0["data"]["botReply"], json!("Hello! How can I help?"));

        let messages = state.store.get_messages(SID);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "Hi");
        assert!(!messages[0].is_bot);
        assert_eq!(messages[1].text, "Hello! How can I help?");
        assert!(messages[1].is_bot);
        assert!(messages[1].timestamp > messages[0].timestamp);

        let after_relay = state.store.get_session(SID, false).unwrap().last_activity;
        assert!(after_relay > after_create);
    }

    #[tokio::test]
    async fn test_relay_transport_failure_persists_apology() {
        // Nothing listens on the discard port, so the call fails fast.
        let state = crate::test_state(Some("http://127.0.0.1:9/bot".to_string()));

        let result = relay_webhook(
            Extension(state.clone()),
            Json(WebhookRequest {
                session_id: SID.to_string(),
                message: "Hi".to_string(),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Internal)));

        let messages = state.store.get_messages(SID);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "Hi");
        assert_eq!(messages[1].text, FALLBACK_REPLY);
        assert!(messages[1].is_bot);
    }
}
