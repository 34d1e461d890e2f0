// src/services/chat_store.rs
//
// Session/message operations over the realtime store, with the encryption
// rules applied on the way in and out. Handlers talk to this service, never
// to the tree directly.
use crate::db::{MessageSubscription, RealtimeDb, SessionNode, StoreError};
use crate::models::chat::{ChatMessage, ChatSession, SessionStatus, UserInfo};
use crate::services::encryption::{EncryptionError, EncryptionService};
use std::sync::Arc;

/// Input for one message append. `is_admin` implies a bot-side message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub text: String,
    pub is_bot: bool,
    pub is_admin: bool,
    pub admin_id: Option<String>,
}

impl NewMessage {
    pub fn from_user(text: impl Into<String>) -> Self {
        NewMessage {
            text: text.into(),
            is_bot: false,
            is_admin: false,
            admin_id: None,
        }
    }

    pub fn from_bot(text: impl Into<String>) -> Self {
        NewMessage {
            text: text.into(),
            is_bot: true,
            is_admin: false,
            admin_id: None,
        }
    }

    pub fn from_admin(text: impl Into<String>, admin_id: impl Into<String>) -> Self {
        NewMessage {
            text: text.into(),
            is_bot: true,
            is_admin: true,
            admin_id: Some(admin_id.into()),
        }
    }
}

#[derive(Clone)]
pub struct ChatStore {
    db: RealtimeDb,
    crypto: Arc<EncryptionService>,
}

impl ChatStore {
    pub fn new(db: RealtimeDb, crypto: Arc<EncryptionService>) -> Self {
        ChatStore { db, crypto }
    }

    pub fn crypto(&self) -> &EncryptionService {
        &self.crypto
    }

    /// Create (or overwrite — no merge) a session, sealing the sensitive
    /// userInfo subset before it is persisted.
    pub fn create_session(
        &self,
        session_id: &str,
        user_info: &UserInfo,
    ) -> Result<ChatSession, EncryptionError> {
        let stored = self.crypto.encrypt_user_info(user_info)?;
        let node = self.db.put_session(session_id, Some(stored));
        Ok(self.to_session(node, false))
    }

    /// With `include_user_info=false` the returned session has no `userInfo`
    /// at all; with `true` it carries the decrypted fields (redacted where
    /// decryption fails).
    pub fn get_session(&self, session_id: &str, include_user_info: bool) -> Option<ChatSession> {
        self.db
            .get(session_id)
            .map(|node| self.to_session(node, include_user_info))
    }

    /// All sessions, most recently active first, same stripping rule per
    /// element as [`get_session`](Self::get_session).
    pub fn list_sessions(&self, include_user_info: bool) -> Vec<ChatSession> {
        self.db
            .list()
            .into_iter()
            .map(|node| self.to_session(node, include_user_info))
            .collect()
    }

    pub fn update_status(&self, session_id: &str, status: SessionStatus) -> Result<(), StoreError> {
        self.db.update_status(session_id, status)
    }

    /// Sanitize, then append in one logical write (key generation,
    /// lastActivity bump and the adminReplied latch included).
    pub fn add_message(&self, session_id: &str, new_message: NewMessage) -> ChatMessage {
        let text = self.crypto.sanitize_message(&new_message.text);
        self.db.push_message(
            session_id,
            text,
            new_message.is_bot || new_message.is_admin,
            new_message.is_admin,
            new_message.admin_id,
        )
    }

    /// Ascending by timestamp; unknown sessions read as empty.
    pub fn get_messages(&self, session_id: &str) -> Vec<ChatMessage> {
        self.db.messages(session_id)
    }

    /// Full-snapshot subscription; the caller owns cancellation.
    pub fn subscribe_messages(&self, session_id: &str) -> MessageSubscription {
        self.db.watch(session_id)
    }

    fn to_session(&self, node: SessionNode, include_user_info: bool) -> ChatSession {
        let user_info = if include_user_info {
            node.user_info
                .as_ref()
                .map(|stored| self.crypto.decrypt_user_info(stored))
        } else {
            None
        };
        ChatSession {
            session_id: node.session_id,
            created_at: node.created_at,
            last_activity: node.last_activity,
            status: node.status,
            admin_replied: node.admin_replied,
            user_info,
            messages: node.messages,
        }
    }
}
