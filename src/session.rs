//! Per-session conversation state.
//!
//! Each caller-supplied session id owns its own message buffer. A buffer
//! starts with a single system message, grows by one user and one
//! assistant message per successful exchange, and is dropped after `ttl_minutes`
//! without activity. Sessions are isolated from each other; concurrent
//! requests on the *same* id are applied in whatever order they finish.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::aggregator::{error_response, ResponseAggregator};
use crate::models::{turns_to_messages, ChatTurn, Message};

/// First message of every new buffer.
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant.";

pub const RESET_MESSAGE: &str = "Conversation memory has been cleared.";

/// Longest idle time a session may be kept: one year.
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365;

struct Session {
    messages: Vec<Message>,
    last_active: DateTime<Utc>,
}

impl Session {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            messages: vec![Message::system(DEFAULT_SYSTEM_MESSAGE)],
            last_active: now,
        }
    }
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    /// `ttl_minutes` is clamped to `1..=MAX_TTL_MINUTES`.
    pub fn new(ttl_minutes: i64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl: Duration::minutes(ttl_minutes.clamp(1, MAX_TTL_MINUTES)),
        }
    }

    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn prune(&self, sessions: &mut HashMap<String, Session>, now: DateTime<Utc>) {
        let Some(cutoff) = now.checked_sub_signed(self.ttl) else {
            return;
        };
        let before = sessions.len();
        sessions.retain(|_, s| s.last_active >= cutoff);
        let expired = before - sessions.len();
        if expired > 0 {
            tracing::debug!(expired, "pruned idle sessions");
        }
    }

    /// Messages for `id`, creating the session if needed.
    pub fn history(&self, id: &str) -> Vec<Message> {
        self.history_at(id, Utc::now())
    }

    fn history_at(&self, id: &str, now: DateTime<Utc>) -> Vec<Message> {
        let mut sessions = self.lock();
        self.prune(&mut sessions, now);
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::fresh(now));
        session.last_active = now;
        session.messages.clone()
    }

    /// Replace the buffer with a client-supplied history.
    pub fn replace(&self, id: &str, turns: &[ChatTurn]) {
        let now = Utc::now();
        let mut sessions = self.lock();
        let mut session = Session::fresh(now);
        session.messages.extend(turns_to_messages(turns));
        sessions.insert(id.to_string(), session);
    }

    /// Append one exchange.
    pub fn record(&self, id: &str, question: &str, answer: &str) {
        let now = Utc::now();
        let mut sessions = self.lock();
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::fresh(now));
        session.messages.push(Message::user(question));
        session.messages.push(Message::assistant(answer));
        session.last_active = now;
    }

    /// Clear a session back to its initial system message. Returns whether
    /// the session existed.
    pub fn reset(&self, id: &str) -> bool {
        let now = Utc::now();
        let mut sessions = self.lock();
        let existed = sessions.contains_key(id);
        sessions.insert(id.to_string(), Session::fresh(now));
        existed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of one chat exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub response: String,
}

/// The multi-turn chat path: session bookkeeping around the aggregator.
pub struct ChatService {
    aggregator: ResponseAggregator,
    sessions: SessionStore,
}

impl ChatService {
    pub fn new(aggregator: ResponseAggregator, sessions: SessionStore) -> Self {
        Self {
            aggregator,
            sessions,
        }
    }

    /// Answer `new_message` in the given session, issuing a new id when
    /// none is supplied. An explicit `conversation` replaces the stored
    /// history first.
    pub async fn chat(
        &self,
        session_id: Option<String>,
        conversation: Option<&[ChatTurn]>,
        new_message: &str,
    ) -> ChatReply {
        let session_id = session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(SessionStore::new_id);

        if let Some(turns) = conversation {
            self.sessions.replace(&session_id, turns);
        }

        let history = self.sessions.history(&session_id);
        tracing::info!(session = %session_id, turns = history.len(), "chat");
        let response = match self.aggregator.try_answer(&history, new_message).await {
            Ok(text) => {
                self.sessions.record(&session_id, new_message, &text);
                text
            }
            // A failed exchange is not replayed to later questions.
            Err(e) => error_response(&e),
        };

        ChatReply {
            session_id,
            response,
        }
    }

    pub fn reset(&self, session_id: &str) -> String {
        self.sessions.reset(session_id);
        tracing::info!(session = %session_id, "session reset");
        RESET_MESSAGE.to_string()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
}
