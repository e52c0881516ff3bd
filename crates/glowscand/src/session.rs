//! In-memory browser sessions keyed by a random cookie token.

use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::store::Role;

pub const SESSION_COOKIE: &str = "glowscan_session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Signed-in account, if any.
    pub user: Option<SessionUser>,
    /// Label text of the last capture made in this session.
    pub last_analysis: Option<String>,
}

/// Sessions idle for longer than this are discarded.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
/// Live sessions kept before the least recently used one is evicted.
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

#[derive(Debug)]
struct Entry {
    session: Session,
    last_seen: Instant,
}

/// Sessions expire after `idle_timeout` without use; the store never holds
/// more than `max_sessions`.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Entry>>,
    idle_timeout: Duration,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_limits(DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn with_limits(idle_timeout: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Store a session under a fresh token and return the token.
    pub fn create(&self, session: Session) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let now = Instant::now();
        let mut sessions = self.lock();
        if sessions.len() >= self.max_sessions {
            let timeout = self.idle_timeout;
            sessions.retain(|_, entry| !is_expired(entry, now, timeout));
        }
        while sessions.len() >= self.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(token, _)| token.clone())
            else {
                break;
            };
            sessions.remove(&oldest);
            tracing::debug!("session store full; evicted least recently used session");
        }
        sessions.insert(
            token.clone(),
            Entry {
                session,
                last_seen: now,
            },
        );
        token
    }

    /// The live session for `token`, refreshing its idle timer.
    pub fn get(&self, token: &str) -> Option<Session> {
        let mut sessions = self.lock();
        let entry = self.touch(&mut sessions, token)?;
        Some(entry.session.clone())
    }

    /// Modify a session in place. Returns false if the token is unknown or expired.
    pub fn update(&self, token: &str, f: impl FnOnce(&mut Session)) -> bool {
        let mut sessions = self.lock();
        match self.touch(&mut sessions, token) {
            Some(entry) => {
                f(&mut entry.session);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, token: &str) -> Option<Session> {
        self.lock().remove(token).map(|entry| entry.session)
    }

    /// Drop every session signed in as `username`. Returns how many were removed.
    pub fn remove_user(&self, username: &str) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| {
            entry
                .session
                .user
                .as_ref()
                .map_or(true, |user| user.username != username)
        });
        before - sessions.len()
    }

    /// Discard idle sessions. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| !is_expired(entry, now, self.idle_timeout));
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn touch<'a>(&self, sessions: &'a mut HashMap<String, Entry>, token: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if sessions
            .get(token)
            .is_some_and(|entry| is_expired(entry, now, self.idle_timeout))
        {
            sessions.remove(token);
            return None;
        }
        let entry = sessions.get_mut(token)?;
        entry.last_seen = now;
        Some(entry)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_expired(entry: &Entry, now: Instant, timeout: Duration) -> bool {
    now.saturating_duration_since(entry.last_seen) >= timeout
}

/// `Set-Cookie` value carrying a session token.
pub fn session_cookie(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax")
}

/// `Set-Cookie` value that clears the session cookie.
pub fn expired_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Session token from the request's `Cookie` header, if present.
#[derive(Debug, Clone, Default)]
pub struct SessionToken(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for SessionToken {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
            .map(|(_, value)| value.to_string());
        Ok(Self(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn token_from(cookies: &[&str]) -> Option<String> {
        let mut builder = Request::builder().uri("/");
        for cookie in cookies {
            builder = builder.header(COOKIE, *cookie);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        SessionToken::from_request_parts(&mut parts, &()).await.unwrap().0
    }

    #[tokio::test]
    async fn test_cookie_extraction() {
        assert_eq!(token_from(&[]).await, None);
        assert_eq!(token_from(&["glowscan_session=abc"]).await.as_deref(), Some("abc"));
        assert_eq!(
            token_from(&["theme=dark; glowscan_session=xyz; lang=id"]).await.as_deref(),
            Some("xyz")
        );
        assert_eq!(token_from(&["theme=dark", "glowscan_session=two"]).await.as_deref(), Some("two"));
        assert_eq!(token_from(&["glowscan_session="]).await, None);
        assert_eq!(token_from(&["other_session=abc"]).await, None);
    }

    #[test]
    fn test_session_lifecycle() {
        let store = SessionStore::default();
        let token = store.create(Session::default());
        assert_eq!(token.len(), 32);
        assert!(store.get(&token).unwrap().user.is_none());

        assert!(store.update(&token, |s| s.last_analysis = Some("No face detected".into())));
        assert_eq!(store.get(&token).unwrap().last_analysis.as_deref(), Some("No face detected"));

        assert!(store.remove(&token).is_some());
        assert!(store.get(&token).is_none());
        assert!(!store.update(&token, |_| {}));
    }

    #[test]
    fn test_tokens_are_unique() {
        let store = SessionStore::default();
        let a = store.create(Session::default());
        let b = store.create(Session::default());
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    fn signed_in(username: &str) -> Session {
        Session {
            user: Some(SessionUser {
                username: username.to_string(),
                role: Role::User,
            }),
            last_analysis: None,
        }
    }

    #[test]
    fn test_idle_sessions_are_purged() {
        let store = SessionStore::with_limits(Duration::from_secs(60), 100);
        for _ in 0..5 {
            store.create(Session::default());
        }
        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.len(), 5);

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(store.purge_expired_at(later), 5);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_expired_token_is_unknown() {
        let store = SessionStore::with_limits(Duration::ZERO, 100);
        let token = store.create(Session::default());
        assert!(store.get(&token).is_none());
        assert!(!store.update(&token, |_| {}));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_full_store_evicts_least_recently_used() {
        let store = SessionStore::with_limits(Duration::from_secs(3600), 3);
        let first = store.create(Session::default());
        std::thread::sleep(Duration::from_millis(2));
        let second = store.create(Session::default());
        std::thread::sleep(Duration::from_millis(2));
        let third = store.create(Session::default());
        std::thread::sleep(Duration::from_millis(2));
        // Using the first session makes the second the oldest.
        assert!(store.get(&first).is_some());
        std::thread::sleep(Duration::from_millis(2));

        let fourth = store.create(Session::default());
        assert_eq!(store.len(), 3);
        assert!(store.get(&second).is_none());
        for token in [&first, &third, &fourth] {
            assert!(store.get(token).is_some());
        }
    }

    #[test]
    fn test_remove_user_sessions() {
        let store = SessionStore::default();
        let ana_a = store.create(signed_in("ana"));
        let ana_b = store.create(signed_in("ana"));
        let bob = store.create(signed_in("bob"));
        let anonymous = store.create(Session::default());

        assert_eq!(store.remove_user("ana"), 2);
        assert!(store.get(&ana_a).is_none() && store.get(&ana_b).is_none());
        assert!(store.get(&bob).is_some());
        assert!(store.get(&anonymous).is_some());
    }

    #[test]
    fn test_cookie_values() {
        assert!(session_cookie("t").starts_with("glowscan_session=t;"));
        assert!(expired_cookie().contains("Max-Age=0"));
    }
}
