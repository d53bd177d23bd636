//! Per-session conversation logs.
//!
//! Sessions are identified by a signed cookie carrying a Uuid. The store is
//! bounded twice: at most `max_sessions` sessions (least recently used is
//! dropped) and at most `max_turns` turns per session (oldest dropped).

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use docchat_core::ConversationTurn;
use lru::LruCache;
use tokio::sync::Mutex;
use uuid::Uuid;

type Log = VecDeque<ConversationTurn>;

#[derive(Clone)]
pub struct ConversationStore {
    sessions: Arc<Mutex<LruCache<Uuid, Log>>>,
    max_turns: usize,
}

impl ConversationStore {
    pub fn new(max_sessions: usize, max_turns: usize) -> Self {
        let capacity = NonZeroUsize::new(max_sessions).unwrap_or(NonZeroUsize::MIN);
        Self {
            sessions: Arc::new(Mutex::new(LruCache::new(capacity))),
            max_turns: max_turns.max(2),
        }
    }

    /// Turns of `session`, oldest first. Empty for unknown sessions.
    pub async fn history(&self, session: Uuid) -> Vec<ConversationTurn> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .get(&session)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Append a user message and the reply to it, then return the log.
    pub async fn append_exchange(
        &self,
        session: Uuid,
        user: &str,
        assistant: &str,
    ) -> Vec<ConversationTurn> {
        let mut sessions = self.sessions.lock().await;
        let log = sessions.get_or_insert_mut(session, VecDeque::new);
        for turn in [
            ConversationTurn::user(user),
            ConversationTurn::assistant(assistant),
        ] {
            if log.len() == self.max_turns {
                log.pop_front();
            }
            log.push_back(turn);
        }
        log.iter().cloned().collect()
    }

    /// Forget `session`. Returns whether it had a log.
    pub async fn clear(&self, session: Uuid) -> bool {
        self.sessions.lock().await.pop(&session).is_some()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

/// Session id from the signed cookie, if present and intact.
pub fn session_id(jar: &SignedCookieJar, cookie_name: &str) -> Option<Uuid> {
    jar.get(cookie_name)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
}

/// Reuse the caller's session or start a new one, returning the jar to send back.
pub fn ensure_session(jar: SignedCookieJar, cookie_name: &str) -> (SignedCookieJar, Uuid) {
    if let Some(id) = session_id(&jar, cookie_name) {
        return (jar, id);
    }
    let id = Uuid::new_v4();
    tracing::debug!(session = %id, "Starting new chat session");
    let cookie = Cookie::build((cookie_name.to_string(), id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    (jar.add(cookie), id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_extra::extract::cookie::Key;
    use docchat_core::TurnRole;

    #[tokio::test]
    async fn test_exchanges_alternate_in_order() {
        let store = ConversationStore::new(4, 50);
        let session = Uuid::new_v4();
        for i in 0..3 {
            store
                .append_exchange(session, &format!("q{i}"), &format!("a{i}"))
                .await;
        }

        let history = store.history(session).await;
        assert_eq!(history.len(), 6);
        for (i, turn) in history.iter().enumerate() {
            let expected = if i % 2 == 0 { TurnRole::User } else { TurnRole::Assistant };
            assert_eq!(turn.role, expected);
        }
        assert_eq!(history[0].text, "q0");
        assert_eq!(history[5].text, "a2");
        assert!(history.windows(2).all(|w| w[0].at <= w[1].at));
    }

    #[tokio::test]
    async fn test_ring_buffer_drops_oldest_turns() {
        let store = ConversationStore::new(4, 4);
        let session = Uuid::new_v4();
        for i in 0..3 {
            store
                .append_exchange(session, &format!("q{i}"), &format!("a{i}"))
                .await;
        }

        let texts: Vec<String> = store
            .history(session)
            .await
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(texts, vec!["q1", "a1", "q2", "a2"]);
    }

    #[tokio::test]
    async fn test_least_recent_session_is_evicted() {
        let store = ConversationStore::new(2, 10);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store.append_exchange(a, "hi", "hello").await;
        store.append_exchange(b, "hi", "hello").await;
        store.history(a).await;
        store.append_exchange(c, "hi", "hello").await;

        assert_eq!(store.session_count().await, 2);
        assert!(store.history(b).await.is_empty(), "b was least recently used");
        assert_eq!(store.history(a).await.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_forgets_session() {
        let store = ConversationStore::new(2, 10);
        let session = Uuid::new_v4();
        store.append_exchange(session, "hi", "hello").await;
        assert!(store.clear(session).await);
        assert!(!store.clear(session).await);
        assert!(store.history(session).await.is_empty());
    }

    #[test]
    fn test_ensure_session_keeps_existing_cookie() {
        let jar = SignedCookieJar::new(Key::generate());
        let (jar, first) = ensure_session(jar, "docchat_session");
        let (_, second) = ensure_session(jar, "docchat_session");
        assert_eq!(first, second);
    }
}
