use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chatrelay::{UserInfo, UserStatus};
use tokio::time::Instant;

use crate::error::ChatError;
use crate::outbox::Outbox;

/// Process-unique identifier of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub origin: SocketAddr,
    pub status: UserStatus,
    pub last_active: Instant,
}

impl User {
    pub fn to_info(&self) -> UserInfo {
        UserInfo {
            username: self.username.clone(),
            status: self.status,
            address: Some(self.origin.ip().to_string()),
        }
    }
}

/// A live registered connection: who it is and where to send to it.
#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub user: User,
    pub outbox: Outbox,
}

#[derive(Default)]
struct Inner {
    by_connection: HashMap<ConnectionId, String>,
    sessions: BTreeMap<String, Session>,
}

/// Shared map of connection ↔ username ↔ presence.
///
/// Both indexes live behind one lock so uniqueness checks and inserts happen
/// atomically. Nothing here awaits or touches a socket while the lock is held;
/// callers that fan out work from a [`SessionRegistry::snapshot`] instead.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `username` to `connection_id`.
    ///
    /// Fails with `AlreadyTaken` if the name is bound to any live session,
    /// including when this connection already holds a name of its own.
    pub fn register(
        &self,
        connection_id: ConnectionId,
        username: &str,
        origin: SocketAddr,
        outbox: Outbox,
    ) -> Result<(), ChatError> {
        let mut inner = self.lock();
        if let Some(existing) = inner.by_connection.get(&connection_id) {
            return Err(ChatError::AlreadyTaken(existing.clone()));
        }
        if username.trim().is_empty() {
            return Err(ChatError::InvalidUsername);
        }
        if inner.sessions.contains_key(username) {
            return Err(ChatError::AlreadyTaken(username.to_string()));
        }

        let session = Session {
            connection_id,
            user: User {
                username: username.to_string(),
                origin,
                status: UserStatus::Online,
                last_active: Instant::now(),
            },
            outbox,
        };
        inner
            .by_connection
            .insert(connection_id, username.to_string());
        inner.sessions.insert(username.to_string(), session);
        Ok(())
    }

    /// Remove the session bound to `connection_id`, returning its username.
    pub fn unregister(&self, connection_id: ConnectionId) -> Result<String, ChatError> {
        let mut inner = self.lock();
        let username = inner
            .by_connection
            .remove(&connection_id)
            .ok_or(ChatError::NotFound)?;
        inner.sessions.remove(&username);
        Ok(username)
    }

    pub fn set_status(
        &self,
        connection_id: ConnectionId,
        status: UserStatus,
    ) -> Result<(), ChatError> {
        let mut inner = self.lock();
        let session = session_mut(&mut inner, connection_id).ok_or(ChatError::NotRegistered)?;
        session.user.status = status;
        Ok(())
    }

    /// Record activity on `connection_id`. An inactive user comes back online.
    /// Returns false if the connection has no session.
    pub fn touch(&self, connection_id: ConnectionId) -> bool {
        let mut inner = self.lock();
        match session_mut(&mut inner, connection_id) {
            Some(session) => {
                session.user.last_active = Instant::now();
                if session.user.status == UserStatus::Inactive {
                    session.user.status = UserStatus::Online;
                }
                true
            }
            None => false,
        }
    }

    /// Flip a session to `Inactive` if it has been quiet for longer than
    /// `threshold` as of `now`. Re-checked under the lock, so a `touch` that
    /// lands after the caller's snapshot wins.
    pub fn mark_inactive_if_idle(
        &self,
        connection_id: ConnectionId,
        threshold: Duration,
        now: Instant,
    ) -> bool {
        let mut inner = self.lock();
        let Some(session) = session_mut(&mut inner, connection_id) else {
            return false;
        };
        let idle = now.saturating_duration_since(session.user.last_active);
        if session.user.status == UserStatus::Inactive || idle <= threshold {
            return false;
        }
        session.user.status = UserStatus::Inactive;
        true
    }

    pub fn resolve(&self, username: &str) -> Option<ConnectionId> {
        self.lock()
            .sessions
            .get(username)
            .map(|s| s.connection_id)
    }

    /// The session bound to `username`, cloned out of the lock.
    pub fn lookup(&self, username: &str) -> Option<Session> {
        self.lock().sessions.get(username).cloned()
    }

    pub fn username_of(&self, connection_id: ConnectionId) -> Option<String> {
        self.lock().by_connection.get(&connection_id).cloned()
    }

    pub fn is_registered(&self, connection_id: ConnectionId) -> bool {
        self.lock().by_connection.contains_key(&connection_id)
    }

    /// Point-in-time copy of every session, ordered by username.
    pub fn snapshot(&self) -> Vec<Session> {
        self.lock().sessions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn session_mut(inner: &mut Inner, connection_id: ConnectionId) -> Option<&mut Session> {
    let username = inner.by_connection.get(&connection_id)?;
    inner.sessions.get_mut(username)
}
