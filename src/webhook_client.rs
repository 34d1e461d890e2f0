// src/webhook_client.rs
use serde_json::Value;
use std::time::Duration;

/// Served to the end user whenever the bot endpoint misbehaves.
pub const FALLBACK_REPLY: &str = "Sorry, I encountered an error. Please try again.";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the external bot endpoint. One outbound call per relayed
/// message; no retries.
#[derive(Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookClient {
    pub fn new(webhook_url: String) -> Self {
        WebhookClient {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }

    /// Forward one user message and extract the bot's `reply` field. A
    /// response without that field degrades to the fixed apology; transport
    /// failures surface as errors for the caller to handle.
    pub async fn send_message(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<String, reqwest::Error> {
        let response = self
            .client
            .get(&self.webhook_url)
            .query(&[
                ("sessionId", session_id),
                ("action", "sendMessage"),
                ("chatInput", text),
            ])
            .header("User-Agent", "ChatBot-API/1.0")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let body: Value = response.json().await?;
        let reply = match body.get("reply").and_then(|v| v.as_str()) {
            Some(reply) => reply.to_string(),
            None => {
                tracing::warn!("Bot response missing 'reply' field, using fallback");
                FALLBACK_REPLY.to_string()
            }
        };

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    async fn spawn_bot_stub(reply: Option<&'static str>) -> String {
        let app = Router::new().route(
            "/hook",
            get(move |Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("action").map(String::as_str), Some("sendMessage"));
                match reply {
                    Some(text) => Json(json!({ "reply": text })),
                    None => Json(json!({ "status": "ok" })),
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/hook", addr)
    }

    #[tokio::test]
    async fn test_extracts_reply_field() {
        let url = spawn_bot_stub(Some("Hello! How can I help?")).await;
        let client = WebhookClient::new(url);
        let reply = client
            .send_message("custom_session_1_a", "Hi")
            .await
            .unwrap();
        assert_eq!(reply, "Hello! How can I help?");
    }

    #[tokio::test]
    async fn test_missing_reply_falls_back_to_apology() {
        let url = spawn_bot_stub(None).await;
        let client = WebhookClient::new(url);
        let reply = client
            .send_message("custom_session_1_a", "Hi")
            .await
            .unwrap();
        assert_eq!(reply, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let client = WebhookClient::new("http://127.0.0.1:9/hook".to_string());
        assert!(client.send_message("custom_session_1_a", "Hi").await.is_err());
    }
}
