//! Session registry
//!
//! Tracks one live session per user identity. Registering a user who
//! already has a live session evicts the older one: its connection task is
//! woken through its `Notify` handle, sends `Kicked` and closes.

use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::game::state::SessionId;

/// Opaque token handed to the client in `JoinAccepted`
/// Uses CSPRNG for cryptographic security
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken([u8; 32]);

impl SessionToken {
    /// Generate a new cryptographically secure session token
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Convert to Vec<u8> for network transmission
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

/// Identity a session is deduplicated by
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserKey {
    /// Identity supplied by the external auth service
    User(String),
    /// Guests are only unique per connection
    Guest(SessionId),
}

impl UserKey {
    pub fn new(user_id: Option<&str>, session_id: SessionId) -> Self {
        match user_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => UserKey::User(id.to_string()),
            None => UserKey::Guest(session_id),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            UserKey::User(id) => Some(id),
            UserKey::Guest(_) => None,
        }
    }
}

/// A live session
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub session_id: SessionId,
    pub user: UserKey,
    pub room_id: String,
    /// Woken when this session is evicted by a newer one
    pub evict: Arc<Notify>,
}

/// Result of registering a session
#[derive(Debug)]
pub struct Registration {
    pub token: SessionToken,
    pub evict: Arc<Notify>,
    /// Older session of the same user that was displaced (already notified)
    pub evicted: Option<SessionEntry>,
}

/// Registry of live sessions keyed by user identity
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<UserKey, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, evicting any live session of the same user
    pub fn register(
        &mut self,
        user: UserKey,
        session_id: SessionId,
        room_id: String,
    ) -> Registration {
        let evicted = self.sessions.remove(&user).map(|old| {
            old.evict.notify_one();
            old
        });

        let entry = SessionEntry {
            session_id,
            user: user.clone(),
            room_id,
            evict: Arc::new(Notify::new()),
        };
        let registration = Registration {
            token: SessionToken::generate(),
            evict: entry.evict.clone(),
            evicted,
        };
        self.sessions.insert(user, entry);
        registration
    }

    /// Remove the user's entry only if it still belongs to `session_id`.
    /// An evicted connection cleaning up must not remove its replacement.
    pub fn unregister(&mut self, user: &UserKey, session_id: SessionId) -> Option<SessionEntry> {
        match self.sessions.get(user) {
            Some(entry) if entry.session_id == session_id => self.sessions.remove(user),
            _ => None,
        }
    }

    pub fn get(&self, user: &UserKey) -> Option<&SessionEntry> {
        self.sessions.get(user)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    fn register(registry: &mut SessionRegistry, user: Option<&str>) -> (SessionId, Registration) {
        let id = Uuid::new_v4();
        let reg = registry.register(UserKey::new(user, id), id, "default".into());
        (id, reg)
    }

    #[test]
    fn test_session_token_unique() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.to_vec().len(), 32);
    }

    #[test]
    fn test_guests_never_collide() {
        let mut registry = SessionRegistry::new();
        let (_, first) = register(&mut registry, None);
        let (_, second) = register(&mut registry, Some("   "));
        assert!(first.evicted.is_none());
        assert!(second.evicted.is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_same_user_evicts_previous_session() {
        let mut registry = SessionRegistry::new();
        let (old_id, old) = register(&mut registry, Some("user-1"));
        let (new_id, new) = register(&mut registry, Some("user-1"));

        let evicted = new.evicted.expect("previous session evicted");
        assert_eq!(evicted.session_id, old_id);
        assert_ne!(old.token, new.token);
        assert_eq!(registry.len(), 1);
        let user = UserKey::User("user-1".into());
        assert_eq!(registry.get(&user).unwrap().session_id, new_id);
    }

    #[tokio::test]
    async fn test_eviction_wakes_old_connection() {
        let mut registry = SessionRegistry::new();
        let (_, old) = register(&mut registry, Some("user-2"));
        register(&mut registry, Some("user-2"));

        // Permit is stored even though nobody was waiting yet
        tokio::time::timeout(Duration::from_millis(100), old.evict.notified())
            .await
            .expect("evicted session should be notified");
    }

    #[test]
    fn test_stale_unregister_keeps_replacement() {
        let mut registry = SessionRegistry::new();
        let user = UserKey::User("user-3".into());
        let (old_id, _) = register(&mut registry, Some("user-3"));
        let (new_id, _) = register(&mut registry, Some("user-3"));

        assert!(registry.unregister(&user, old_id).is_none());
        assert_eq!(registry.get(&user).unwrap().session_id, new_id);
        assert!(registry.unregister(&user, new_id).is_some());
        assert!(registry.is_empty());
    }
}
