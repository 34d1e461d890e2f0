// src/models/chat.rs
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

lazy_static! {
    // Widget-generated session ids: custom_session_<epoch_ms>_<alphanumeric>
    static ref SESSION_ID_RE: Regex = Regex::new(r"^custom_session_\d+_[a-zA-Z0-9]+$").unwrap();
}

/// Format check applied to every session-scoped request before it reaches the
/// store. Accepts exactly `custom_session_<digits>_<alphanumerics>`.
pub fn is_valid_session_id(session_id: &str) -> bool {
    SESSION_ID_RE.is_match(session_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Pending,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Pending => "pending",
            SessionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "pending" => Ok(SessionStatus::Pending),
            "closed" => Ok(SessionStatus::Closed),
            other => Err(format!(
                "Invalid status '{}'. Must be one of: active, pending, closed",
                other
            )),
        }
    }
}

/// Plaintext request metadata captured when a session is created. The widget
/// may supply some fields; the server overwrites `ip`, `userAgent`, `origin`
/// and `timestamp` from the request itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// One AES-GCM sealed field as persisted: hex ciphertext, hex IV, hex tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedField {
    pub encrypted: String,
    pub iv: String,
    pub auth_tag: String,
}

/// `UserInfo` as it sits at rest: the sensitive subset (userAgent, ip,
/// location) only ever stored sealed, the rest plaintext.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUserInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<EncryptedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<EncryptedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<EncryptedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// A chat message as stored and as served. Immutable once written; `id` is
/// the push key and orders identically to `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub is_bot: bool,
    pub is_admin: bool,
    pub admin_id: Option<String>,
    pub timestamp: i64,
    pub created_at: String,
}

/// Session as served to callers. `user_info` is absent entirely (not masked)
/// unless the caller is entitled to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub session_id: String,
    pub created_at: i64,
    pub last_activity: i64,
    pub status: SessionStatus,
    pub admin_replied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
    pub messages: BTreeMap<String, ChatMessage>,
}

// --- request / response payloads -------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub session_id: String,
    #[serde(default)]
    pub user_info: Option<UserInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMessageRequest {
    pub session_id: String,
    pub text: String,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMessageRequest {
    pub session_id: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub include_user_info: Option<String>,
}

impl SessionQuery {
    pub fn include_user_info(&self) -> bool {
        self.include_user_info.as_deref() == Some("true")
    }
}

/// Dashboard aggregates over all sessions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub closed_sessions: usize,
    pub pending_sessions: usize,
    pub admin_replied_sessions: usize,
    pub today_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_pattern_accepts_valid_ids() {
        assert!(is_valid_session_id("custom_session_1700000000000_ab12cd34e"));
        assert!(is_valid_session_id("custom_session_1_a"));
        assert!(is_valid_session_id("custom_session_999_ABC123xyz"));
    }

    #[test]
    fn test_session_id_pattern_rejects_invalid_ids() {
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("custom_session__abc"));
        assert!(!is_valid_session_id("custom_session_abc_123"));
        assert!(!is_valid_session_id("custom_session_1700000000000_"));
        assert!(!is_valid_session_id("custom_session_1700000000000_ab-cd"));
        assert!(!is_valid_session_id("session_1700000000000_abcd"));
        assert!(!is_valid_session_id("custom_session_1700000000000_abcd extra"));
        assert!(!is_valid_session_id("CUSTOM_SESSION_1700000000000_abcd"));
    }

    #[test]
    fn test_status_round_trip() {
        for s in ["active", "pending", "closed"] {
            assert_eq!(SessionStatus::from_str(s).unwrap().as_str(), s);
        }
        assert!(SessionStatus::from_str("archived").is_err());
    }

    #[test]
    fn test_session_serializes_without_user_info_key() {
        let session = ChatSession {
            session_id: "custom_session_1_a".to_string(),
            created_at: 1,
            last_activity: 1,
            status: SessionStatus::Active,
            admin_replied: false,
            user_info: None,
            messages: BTreeMap::new(),
        };
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("userInfo").is_none());
        assert_eq!(json["adminReplied"], serde_json::json!(false));
    }
}
