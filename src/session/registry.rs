//! Server-wide directory of registered participants.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::session::participant::SessionHandle;

/// Maps identifiers to live sessions. Cloning yields another handle to the
/// same directory.
#[derive(Debug, Clone)]
pub struct Registry {
    sessions: Arc<Mutex<HashMap<String, SessionHandle>>>,
    capacity: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    /// Bind `handle` under its identifier.
    ///
    /// An identifier already present is never overwritten.
    pub async fn register(&self, handle: SessionHandle) -> Result<()> {
        let mut sessions = self.sessions.lock().await;

        if sessions.contains_key(handle.identifier()) {
            return Err(ProtocolError::DuplicateIdentifier(
                handle.identifier().to_string(),
            ));
        }
        if sessions.len() >= self.capacity {
            return Err(ProtocolError::CapacityReached(self.capacity));
        }

        debug!(identifier = handle.identifier(), "Session registered");
        sessions.insert(handle.identifier().to_string(), handle);
        Ok(())
    }

    pub async fn lookup(&self, identifier: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.get(identifier).cloned()
    }

    /// Remove an identifier. Removing an absent one is a no-op.
    pub async fn remove(&self, identifier: &str) -> Option<SessionHandle> {
        let removed = self.sessions.lock().await.remove(identifier);
        if removed.is_some() {
            debug!(identifier, "Session removed");
        }
        removed
    }

    /// Remove `handle` only if it is still the session bound to its identifier
    pub async fn deregister(&self, handle: &SessionHandle) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(handle.identifier()) {
            Some(current) if current.same_session(handle) => {
                sessions.remove(handle.identifier());
                debug!(identifier = handle.identifier(), "Session deregistered");
                true
            }
            _ => false,
        }
    }

    pub async fn contains(&self, identifier: &str) -> bool {
        self.sessions.lock().await.contains_key(identifier)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Registered identifiers, in no particular order
    pub async fn identifiers(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle(identifier: &str) -> (SessionHandle, mpsc::Receiver<crate::session::SessionCommand>) {
        let (tx, rx) = mpsc::channel(4);
        (SessionHandle::new(identifier, tx), rx)
    }

    #[tokio::test]
    async fn test_duplicate_keeps_original() {
        let registry = Registry::new(10);
        let (first, _first_rx) = handle("alice");
        let (second, _second_rx) = handle("alice");

        registry.register(first.clone()).await.unwrap();
        let err = registry.register(second.clone()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateIdentifier(id) if id == "alice"));

        let bound = registry.lookup("alice").await.unwrap();
        assert!(bound.same_session(&first));
        assert!(!bound.same_session(&second));
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let registry = Registry::new(1);
        let (alice, _a) = handle("alice");
        let (bob, _b) = handle("bob");

        registry.register(alice).await.unwrap();
        assert!(matches!(
            registry.register(bob).await,
            Err(ProtocolError::CapacityReached(1))
        ));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = Registry::new(10);
        let (alice, _a) = handle("alice");
        registry.register(alice).await.unwrap();

        assert!(registry.remove("alice").await.is_some());
        assert!(registry.remove("alice").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_deregister_ignores_stale_handle() {
        let registry = Registry::new(10);
        let (current, _c) = handle("alice");
        let (stale, _s) = handle("alice");
        registry.register(current.clone()).await.unwrap();

        assert!(!registry.deregister(&stale).await);
        assert!(registry.contains("alice").await);
        assert!(registry.deregister(&current).await);
        assert!(!registry.contains("alice").await);
    }
}
