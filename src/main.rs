use axum::{Extension, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod webhook_client;

use handlers::auth::AdminDirectory;
use middleware::rate_limit::RateLimiter;
use services::{ChatStore, EncryptionService};
use webhook_client::WebhookClient;

// Dev credential pair; override ADMIN_EMAIL / ADMIN_PASSWORD_HASH in any
// real deployment (see src/bin/hash_password.rs).
const DEFAULT_ADMIN_EMAIL: &str = "test@gmail.com";
const DEFAULT_ADMIN_PASSWORD_HASH: &str =
    "$2a$10$92IXUNpkjO0rOQ5byMi.Ye4oKoEa3Ro9llC/.og/at2.uheWG/igi";

// Per-endpoint-group limiter settings: (max requests, window).
const CHAT_RATE_LIMIT: (usize, Duration) = (30, Duration::from_secs(60));
const ADMIN_RATE_LIMIT: (usize, Duration) = (20, Duration::from_secs(60));
const LOGIN_RATE_LIMIT: (usize, Duration) = (5, Duration::from_secs(900));

// Process-wide collaborators, initialized once at startup and shared with
// every request handler.
pub struct AppState {
    pub store: ChatStore,
    pub webhook_client: Option<WebhookClient>,
    pub admin_directory: AdminDirectory,
    pub api_key: String,
    pub jwt_secret: String,
    pub admin_email: String,
    pub admin_password_hash: String,
    pub chat_limiter: RateLimiter,
    pub admin_limiter: RateLimiter,
    pub login_limiter: RateLimiter,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    let api_key = env_or_default("API_KEY", "dev-api-key");
    let jwt_secret = env_or_default("JWT_SECRET", "default_secret");
    let encryption_key = env_or_default("ENCRYPTION_KEY", "default-key-change-this-in-prod");

    let admin_email = std::env::var("ADMIN_EMAIL")
        .unwrap_or_else(|_| DEFAULT_ADMIN_EMAIL.to_string())
        .trim()
        .to_lowercase();
    let admin_password_hash = std::env::var("ADMIN_PASSWORD_HASH").unwrap_or_else(|_| {
        tracing::warn!("ADMIN_PASSWORD_HASH not set. Using the development credential.");
        DEFAULT_ADMIN_PASSWORD_HASH.to_string()
    });

    let webhook_client = match std::env::var("WEBHOOK_URL").ok() {
        Some(url) if !url.is_empty() => {
            tracing::info!("Webhook relay configured");
            Some(WebhookClient::new(url))
        }
        _ => {
            tracing::warn!("WEBHOOK_URL not set. Bot relay will be unavailable.");
            None
        }
    };

    let crypto = Arc::new(EncryptionService::new(&encryption_key));
    let store = ChatStore::new(db::RealtimeDb::new(), crypto);
    let admin_directory = AdminDirectory::new([admin_email.clone()]);

    let shared_state = Arc::new(AppState {
        store,
        webhook_client,
        admin_directory,
        api_key,
        jwt_secret,
        admin_email,
        admin_password_hash,
        chat_limiter: RateLimiter::new(CHAT_RATE_LIMIT.0, CHAT_RATE_LIMIT.1),
        admin_limiter: RateLimiter::new(ADMIN_RATE_LIMIT.0, ADMIN_RATE_LIMIT.1),
        login_limiter: RateLimiter::new(LOGIN_RATE_LIMIT.0, LOGIN_RATE_LIMIT.1),
    });

    // Build our application with all routes and shared state
    let app = Router::new()
        .merge(handlers::chat::chat_routes())
        .merge(handlers::auth::auth_routes())
        .merge(handlers::admin::admin_routes())
        .route("/api/status", axum::routing::get(api_status))
        .layer(axum::middleware::from_fn(
            middleware::logging::request_logging_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(Extension(shared_state));

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(3000);

    // ConnectInfo provides the peer addresses the rate limiters key on.
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .expect("Failed to bind listener");
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}

fn env_or_default(name: &str, fallback: &str) -> String {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => {
            tracing::warn!("{} not set. Using insecure development default.", name);
            fallback.to_string()
        }
    }
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,support_chat=trace,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,support_chat=info,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        // JSON logging for production (easier for log aggregation)
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Support chat backend starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        }
    );

    let api_key_configured = std::env::var("API_KEY").is_ok();
    let webhook_configured = std::env::var("WEBHOOK_URL").is_ok();
    let encryption_configured = std::env::var("ENCRYPTION_KEY").is_ok();
    tracing::info!(
        "Configuration - API key: {}, Webhook: {}, Encryption key: {}",
        if api_key_configured { "set" } else { "default" },
        if webhook_configured { "set" } else { "missing" },
        if encryption_configured { "set" } else { "default" }
    );

    Ok(())
}

// API health/config probe
async fn api_status(
    Extension(state): Extension<Arc<AppState>>,
) -> axum::response::Json<serde_json::Value> {
    use serde_json::json;

    axum::response::Json(json!({
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "session_store": "healthy",
            "webhook_relay": if state.webhook_client.is_some() { "configured" } else { "not_configured" }
        },
        "features": {
            "field_encryption": true,
            "rate_limiting": true,
            "message_streaming": true
        }
    }))
}

#[cfg(test)]
pub fn test_state(webhook_url: Option<String>) -> Arc<AppState> {
    let crypto = Arc::new(EncryptionService::new("test-secret"));
    Arc::new(AppState {
        store: ChatStore::new(db::RealtimeDb::new(), crypto),
        webhook_client: webhook_url.map(WebhookClient::new),
        admin_directory: AdminDirectory::new(["test@gmail.com".to_string()]),
        api_key: "test-api-key".to_string(),
        jwt_secret: "test-jwt-secret".to_string(),
        admin_email: "test@gmail.com".to_string(),
        admin_password_hash: bcrypt::hash("Test@123", 4).unwrap(),
        chat_limiter: RateLimiter::new(CHAT_RATE_LIMIT.0, CHAT_RATE_LIMIT.1),
        admin_limiter: RateLimiter::new(ADMIN_RATE_LIMIT.0, ADMIN_RATE_LIMIT.1),
        login_limiter: RateLimiter::new(LOGIN_RATE_LIMIT.0, LOGIN_RATE_LIMIT.1),
    })
}
