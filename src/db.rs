// src/db.rs
//
// In-process realtime tree store backing the chat data. Provides the three
// things the rest of the system assumes of its database: atomic per-path
// writes (one lock per operation), push-generated keys that order
// lexicographically by creation time, and full-snapshot change notification
// per session.
use crate::models::chat::{ChatMessage, SessionStatus, StoredUserInfo};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Session '{0}' not found")]
    SessionNotFound(String),
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One session subtree: top-level fields plus the message log keyed by push
/// key, so iteration order is creation order.
#[derive(Debug, Clone)]
pub struct SessionNode {
    pub session_id: String,
    pub created_at: i64,
    pub last_activity: i64,
    pub status: SessionStatus,
    pub admin_replied: bool,
    pub user_info: Option<StoredUserInfo>,
    pub messages: BTreeMap<String, ChatMessage>,
}

impl SessionNode {
    fn bare(session_id: &str, now: i64) -> Self {
        SessionNode {
            session_id: session_id.to_string(),
            created_at: now,
            last_activity: now,
            status: SessionStatus::Active,
            admin_replied: false,
            user_info: None,
            messages: BTreeMap::new(),
        }
    }

    /// Messages in ascending timestamp order. The sort is stable, so entries
    /// sharing a millisecond keep their push-key order.
    fn ordered_messages(&self) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = self.messages.values().cloned().collect();
        messages.sort_by_key(|m| m.timestamp);
        messages
    }
}

// 64-char alphabet in ASCII order, so longer timestamps always compare greater.
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Generates 20-char keys: 8 chars of base-64 epoch millis, then 12 random
/// chars. Calls within the same millisecond increment the random tail, so
/// every key is unique and strictly greater than the one before it.
struct PushKeyGenerator {
    last: Mutex<(i64, [usize; 12])>,
}

impl PushKeyGenerator {
    fn new() -> Self {
        PushKeyGenerator {
            last: Mutex::new((0, [0; 12])),
        }
    }

    fn next_key(&self, now: i64) -> String {
        let mut guard = self.last.lock().unwrap();
        let (ref mut last_ts, ref mut tail) = *guard;

        if now <= *last_ts {
            // Same millisecond (or a rewound clock): bump the tail instead of
            // rolling new randomness, keeping the ordering strict.
            for slot in tail.iter_mut().rev() {
                if *slot == 63 {
                    *slot = 0;
                } else {
                    *slot += 1;
                    break;
                }
            }
        } else {
            *last_ts = now;
            let mut rng = rand::thread_rng();
            for slot in tail.iter_mut() {
                *slot = rng.gen_range(0..64);
            }
        }

        let mut key = [0u8; 20];
        let mut ts = *last_ts as u64;
        for i in (0..8).rev() {
            key[i] = PUSH_CHARS[(ts % 64) as usize];
            ts /= 64;
        }
        for (i, idx) in tail.iter().enumerate() {
            key[8 + i] = PUSH_CHARS[*idx];
        }

        String::from_utf8_lossy(&key).into_owned()
    }
}

struct Watcher {
    id: u64,
    tx: mpsc::UnboundedSender<Vec<ChatMessage>>,
}

struct DbInner {
    sessions: RwLock<HashMap<String, SessionNode>>,
    push_keys: PushKeyGenerator,
    watchers: Mutex<HashMap<String, Vec<Watcher>>>,
    next_watcher_id: AtomicU64,
}

/// Cheap-to-clone handle; all clones share the same tree.
#[derive(Clone)]
pub struct RealtimeDb {
    inner: Arc<DbInner>,
}

impl Default for RealtimeDb {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeDb {
    pub fn new() -> Self {
        RealtimeDb {
            inner: Arc::new(DbInner {
                sessions: RwLock::new(HashMap::new()),
                push_keys: PushKeyGenerator::new(),
                watchers: Mutex::new(HashMap::new()),
                next_watcher_id: AtomicU64::new(1),
            }),
        }
    }

    /// Write a full session node. Replaces any existing node wholesale,
    /// including its message log (set semantics, no merge).
    pub fn put_session(&self, session_id: &str, user_info: Option<StoredUserInfo>) -> SessionNode {
        let now = now_ms();
        let node = SessionNode {
            user_info,
            ..SessionNode::bare(session_id, now)
        };
        self.inner
            .sessions
            .write()
            .unwrap()
            .insert(session_id.to_string(), node.clone());
        self.deliver(session_id, Vec::new());
        node
    }

    /// Append a message. Message insert, `lastActivity` bump and the
    /// `adminReplied` latch land in one write under the session lock. A
    /// missing session gets a bare node created implicitly, matching
    /// push-to-unknown-path store semantics.
    pub fn push_message(
        &self,
        session_id: &str,
        text: String,
        is_bot: bool,
        is_admin: bool,
        admin_id: Option<String>,
    ) -> ChatMessage {
        let snapshot;
        let message;
        {
            let mut sessions = self.inner.sessions.write().unwrap();
            let node = sessions
                .entry(session_id.to_string())
                .or_insert_with(|| SessionNode::bare(session_id, now_ms()));

            // Strictly after the previous activity even within one millisecond.
            let ts = now_ms().max(node.last_activity + 1);
            let key = self.inner.push_keys.next_key(ts);

            message = ChatMessage {
                id: key.clone(),
                text,
                is_bot,
                is_admin,
                admin_id,
                timestamp: ts,
                created_at: chrono::Utc::now().to_rfc3339(),
            };
            node.messages.insert(key, message.clone());
            node.last_activity = ts;
            if is_admin {
                node.admin_replied = true;
            }
            snapshot = node.ordered_messages();
        }
        self.deliver(session_id, snapshot);
        message
    }

    /// Status change and `lastActivity` bump as a single write.
    pub fn update_status(&self, session_id: &str, status: SessionStatus) -> Result<(), StoreError> {
        let mut sessions = self.inner.sessions.write().unwrap();
        let node = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        node.status = status;
        node.last_activity = now_ms().max(node.last_activity + 1);
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> Option<SessionNode> {
        self.inner.sessions.read().unwrap().get(session_id).cloned()
    }

    /// All sessions, most recently active first.
    pub fn list(&self) -> Vec<SessionNode> {
        let mut nodes: Vec<SessionNode> =
            self.inner.sessions.read().unwrap().values().cloned().collect();
        nodes.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        nodes
    }

    /// Ordered message log; an unknown session reads as empty.
    pub fn messages(&self, session_id: &str) -> Vec<ChatMessage> {
        self.inner
            .sessions
            .read()
            .unwrap()
            .get(session_id)
            .map(|node| node.ordered_messages())
            .unwrap_or_default()
    }

    /// Register a snapshot listener for one session. The current snapshot is
    /// delivered immediately, then again after every append. Cancellation is
    /// explicit via [`MessageSubscription::unsubscribe`]; an abandoned
    /// subscription keeps its registry slot for the process lifetime.
    pub fn watch(&self, session_id: &str) -> MessageSubscription {
        let id = self.inner.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(self.messages(session_id));
        self.inner
            .watchers
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_default()
            .push(Watcher { id, tx });
        MessageSubscription {
            db: self.clone(),
            session_id: session_id.to_string(),
            id,
            receiver: rx,
        }
    }

    fn unwatch(&self, session_id: &str, id: u64) {
        let mut watchers = self.inner.watchers.lock().unwrap();
        if let Some(list) = watchers.get_mut(session_id) {
            list.retain(|w| w.id != id);
            if list.is_empty() {
                watchers.remove(session_id);
            }
        }
    }

    fn deliver(&self, session_id: &str, snapshot: Vec<ChatMessage>) {
        let watchers = self.inner.watchers.lock().unwrap();
        if let Some(list) = watchers.get(session_id) {
            for watcher in list {
                // A closed receiver just drops the send; the slot stays
                // registered until the owner unsubscribes.
                let _ = watcher.tx.send(snapshot.clone());
            }
        }
    }
}

/// Live handle to a session's message stream. Dropping it without calling
/// [`unsubscribe`](Self::unsubscribe) leaves the listener registered.
pub struct MessageSubscription {
    db: RealtimeDb,
    session_id: String,
    id: u64,
    pub receiver: mpsc::UnboundedReceiver<Vec<ChatMessage>>,
}

impl MessageSubscription {
    pub fn unsubscribe(self) {
        self.db.unwatch(&self.session_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SID: &str = "custom_session_1700000000000_testnode1";

    #[test]
    fn test_push_keys_are_unique_and_increasing() {
        let gen = PushKeyGenerator::new();
        let mut keys = Vec::new();
        let base = 1_700_000_000_000;
        for i in 0..500 {
            // Exercise both the same-millisecond and fresh-millisecond paths.
            keys.push(gen.next_key(base + (i / 7)));
        }
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
        for key in &keys {
            assert_eq!(key.len(), 20);
        }
    }

    #[test]
    fn test_push_message_orders_and_bumps_activity() {
        let db = RealtimeDb::new();
        let node = db.put_session(SID, None);
        assert!(node.last_activity >= node.created_at);

        let first = db.push_message(SID, "one".into(), false, false, None);
        let second = db.push_message(SID, "two".into(), true, false, None);
        assert!(first.id < second.id);
        assert!(first.timestamp < second.timestamp);

        let after = db.get(SID).unwrap();
        assert_eq!(after.last_activity, second.timestamp);
        assert!(after.last_activity > after.created_at);

        let texts: Vec<String> = db.messages(SID).into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_put_session_overwrites_without_merge() {
        let db = RealtimeDb::new();
        db.put_session(SID, None);
        db.push_message(SID, "hello".into(), false, false, None);
        assert_eq!(db.messages(SID).len(), 1);

        db.put_session(SID, None);
        assert!(db.messages(SID).is_empty());
        assert!(!db.get(SID).unwrap().admin_replied);
    }

    #[test]
    fn test_push_to_unknown_session_creates_bare_node() {
        let db = RealtimeDb::new();
        db.push_message(SID, "orphan".into(), true, false, None);
        let node = db.get(SID).unwrap();
        assert_eq!(node.status, SessionStatus::Active);
        assert_eq!(node.messages.len(), 1);
    }

    #[test]
    fn test_admin_message_latches_admin_replied() {
        let db = RealtimeDb::new();
        db.put_session(SID, None);
        db.push_message(SID, "hi".into(), false, false, None);
        assert!(!db.get(SID).unwrap().admin_replied);

        db.push_message(SID, "hello".into(), true, true, Some("admin@x".into()));
        assert!(db.get(SID).unwrap().admin_replied);

        // Later non-admin traffic never resets the latch.
        db.push_message(SID, "ok".into(), false, false, None);
        assert!(db.get(SID).unwrap().admin_replied);
    }

    #[test]
    fn test_update_status_unknown_session() {
        let db = RealtimeDb::new();
        assert!(matches!(
            db.update_status("custom_session_1_zz", SessionStatus::Closed),
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_list_orders_by_last_activity_desc() {
        let db = RealtimeDb::new();
        db.put_session("custom_session_1_a", None);
        db.put_session("custom_session_2_b", None);
        // Two appends guarantee the first session's lastActivity strictly
        // exceeds the second's even when everything lands in one millisecond.
        db.push_message("custom_session_1_a", "bump".into(), false, false, None);
        db.push_message("custom_session_1_a", "bump again".into(), false, false, None);

        let ids: Vec<String> = db.list().into_iter().map(|n| n.session_id).collect();
        assert_eq!(ids[0], "custom_session_1_a");
        assert_eq!(ids[1], "custom_session_2_b");
    }

    #[tokio::test]
    async fn test_watch_delivers_full_snapshots() {
        let db = RealtimeDb::new();
        db.put_session(SID, None);
        let mut sub = db.watch(SID);

        let initial = sub.receiver.recv().await.unwrap();
        assert!(initial.is_empty());

        db.push_message(SID, "first".into(), false, false, None);
        let snap = sub.receiver.recv().await.unwrap();
        assert_eq!(snap.len(), 1);

        db.push_message(SID, "second".into(), true, false, None);
        let snap = sub.receiver.recv().await.unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].text, "first");
        assert_eq!(snap[1].text, "second");

        sub.unsubscribe();
        assert!(db.inner.watchers.lock().unwrap().get(SID).is_none());
    }
}
