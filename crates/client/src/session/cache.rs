//! Persisted copy of the authenticated identity.

use deskline_core::{Identity, SessionSnapshot};
use tracing::warn;

use crate::storage::{SharedStore, StorageError};

/// Storage key holding the cached identity.
pub const SNAPSHOT_KEY: &str = "session_snapshot";

/// Reads and writes the identity snapshot shared by all contexts.
///
/// The snapshot is stored as the identity's JSON and has no expiry of its
/// own; it lives exactly as long as the reconciler keeps it.
#[derive(Clone, Debug)]
pub struct SessionCache {
    store: SharedStore,
}

impl SessionCache {
    #[must_use]
    pub const fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Load the snapshot, marked as restored.
    ///
    /// Unreadable snapshots are removed and read as absent.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    pub fn load(&self) -> Result<Option<SessionSnapshot>, StorageError> {
        let Some(raw) = self.store.get(SNAPSHOT_KEY)? else {
            return Ok(None);
        };

        match serde_json::from_str::<Identity>(&raw) {
            Ok(identity) => Ok(Some(SessionSnapshot::restored(identity))),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable session snapshot");
                self.store.remove(SNAPSHOT_KEY)?;
                Ok(None)
            }
        }
    }

    /// Replace the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be written.
    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&snapshot.identity)?;
        self.store.set(SNAPSHOT_KEY, &raw)
    }

    /// Remove the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be written.
    pub fn purge(&self) -> Result<(), StorageError> {
        self.store.remove(SNAPSHOT_KEY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use deskline_core::{UserId, UserRole};

    use super::*;
    use crate::storage::{DurableStore, MemoryStore};

    fn identity() -> Identity {
        Identity {
            id: UserId::new("1"),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            full_name: Some("Ada Lovelace".to_string()),
            role: UserRole::Agent,
            email: "ada@example.com".to_string(),
        }
    }

    #[test]
    fn test_save_then_load_marks_restored() {
        let cache = SessionCache::new(Arc::new(MemoryStore::new()));
        cache.save(&SessionSnapshot::confirmed(identity())).unwrap();

        let loaded = cache.load().unwrap().unwrap();
        assert!(loaded.persisted);
        assert_eq!(loaded.identity, identity());
    }

    #[test]
    fn test_stored_as_api_shaped_json() {
        let memory = MemoryStore::new();
        let cache = SessionCache::new(Arc::new(memory.clone()));
        cache.save(&SessionSnapshot::confirmed(identity())).unwrap();

        let raw = memory.get(SNAPSHOT_KEY).unwrap().unwrap();
        assert!(raw.contains("\"fullName\":\"Ada Lovelace\""));
    }

    #[test]
    fn test_corrupt_snapshot_is_purged() {
        let memory = MemoryStore::new();
        memory.set(SNAPSHOT_KEY, "{\"id\":").unwrap();
        let cache = SessionCache::new(Arc::new(memory.clone()));

        assert!(cache.load().unwrap().is_none());
        assert!(memory.get(SNAPSHOT_KEY).unwrap().is_none());
    }

    #[test]
    fn test_purge() {
        let cache = SessionCache::new(Arc::new(MemoryStore::new()));
        cache.save(&SessionSnapshot::confirmed(identity())).unwrap();
        cache.purge().unwrap();
        assert!(cache.load().unwrap().is_none());
    }
}
