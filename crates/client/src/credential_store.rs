//! Durable bearer credential storage.

use chrono::{DateTime, Utc};
use deskline_core::{Credential, CredentialRecord};
use tracing::{debug, warn};

use crate::storage::{SharedStore, StorageError};

/// Storage key holding the credential record.
pub const CREDENTIAL_KEY: &str = "credential";

/// Reads and writes the profile's single active credential.
///
/// A write stamps the credential with a fresh 24 hour expiry and marks it
/// transport-restricted when this context is served over `https`. Restricted
/// credentials are invisible to insecure contexts, the same way a `secure`
/// cookie is.
#[derive(Clone)]
pub struct CredentialStore {
    store: SharedStore,
    secure_context: bool,
}

impl CredentialStore {
    #[must_use]
    pub fn new(store: SharedStore, secure_context: bool) -> Self {
        Self {
            store,
            secure_context,
        }
    }

    #[must_use]
    pub const fn is_secure_context(&self) -> bool {
        self.secure_context
    }

    /// Read the active credential. Absence is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backing store cannot be read.
    pub fn read(&self) -> Result<Option<Credential>, StorageError> {
        self.read_at(Utc::now())
    }

    /// Read the active credential as of `now`.
    ///
    /// Expired and undecodable records are removed and read as absent.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backing store cannot be read.
    pub fn read_at(&self, now: DateTime<Utc>) -> Result<Option<Credential>, StorageError> {
        let Some(raw) = self.store.get(CREDENTIAL_KEY)? else {
            return Ok(None);
        };

        let credential: Credential = match serde_json::from_str::<CredentialRecord>(&raw) {
            Ok(record) => record.into(),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable stored credential");
                self.store.remove(CREDENTIAL_KEY)?;
                return Ok(None);
            }
        };

        if credential.is_expired_at(now) {
            debug!(expired_at = %credential.expires(), "Stored credential expired");
            self.store.remove(CREDENTIAL_KEY)?;
            return Ok(None);
        }

        if credential.is_restricted() && !self.secure_context {
            debug!("Stored credential is restricted to secure contexts");
            return Ok(None);
        }

        Ok(Some(credential))
    }

    /// Replace the active credential, returning it as stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be written.
    pub fn write(&self, credential: Credential) -> Result<Credential, StorageError> {
        self.write_at(credential, Utc::now())
    }

    /// Replace the active credential with expiry counted from `now`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be written.
    pub fn write_at(
        &self,
        credential: Credential,
        now: DateTime<Utc>,
    ) -> Result<Credential, StorageError> {
        let credential = credential.stamped(now, self.secure_context);
        let raw = serde_json::to_string(&credential.to_record())?;
        self.store.set(CREDENTIAL_KEY, &raw)?;
        Ok(credential)
    }

    /// Remove the active credential.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be written.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(CREDENTIAL_KEY)
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("secure_context", &self.secure_context)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::storage::{DurableStore, MemoryStore};

    fn stores(secure: bool) -> (MemoryStore, CredentialStore) {
        let memory = MemoryStore::new();
        let credentials = CredentialStore::new(Arc::new(memory.clone()), secure);
        (memory, credentials)
    }

    #[test]
    fn test_absent_credential_reads_as_none() {
        let (_, credentials) = stores(false);
        assert!(credentials.read().unwrap().is_none());
    }

    #[test]
    fn test_write_supersedes_previous_credential() {
        let (_, credentials) = stores(false);
        credentials.write(Credential::new("first")).unwrap();
        credentials.write(Credential::new("second")).unwrap();

        let read = credentials.read().unwrap().unwrap();
        assert_eq!(read.expose_token(), "second");
    }

    #[test]
    fn test_write_restamps_expiry() {
        let (_, credentials) = stores(false);
        let now = Utc::now();
        let stale = Credential::issued_at("tok", now - Duration::hours(30));

        let stored = credentials.write_at(stale, now).unwrap();
        assert_eq!(stored.expires(), now + Duration::hours(24));
        assert!(credentials.read_at(now + Duration::hours(1)).unwrap().is_some());
    }

    #[test]
    fn test_expired_credential_is_removed_on_read() {
        let (memory, credentials) = stores(false);
        let now = Utc::now();
        credentials.write_at(Credential::new("tok"), now).unwrap();

        assert!(credentials.read_at(now + Duration::hours(25)).unwrap().is_none());
        assert!(memory.get(CREDENTIAL_KEY).unwrap().is_none());
    }

    #[test]
    fn test_restricted_credential_hidden_from_insecure_context() {
        let memory = MemoryStore::new();
        let secure = CredentialStore::new(Arc::new(memory.clone()), true);
        let insecure = CredentialStore::new(Arc::new(memory), false);

        let stored = secure.write(Credential::new("tok")).unwrap();
        assert!(stored.is_restricted());

        assert!(secure.read().unwrap().is_some());
        assert!(insecure.read().unwrap().is_none());
    }

    #[test]
    fn test_insecure_write_is_readable_everywhere() {
        let memory = MemoryStore::new();
        let insecure = CredentialStore::new(Arc::new(memory.clone()), false);
        let secure = CredentialStore::new(Arc::new(memory), true);

        insecure.write(Credential::new("tok")).unwrap();
        assert!(secure.read().unwrap().is_some());
    }

    #[test]
    fn test_garbage_record_is_discarded() {
        let (memory, credentials) = stores(false);
        memory.set(CREDENTIAL_KEY, "not json").unwrap();

        assert!(credentials.read().unwrap().is_none());
        assert!(memory.get(CREDENTIAL_KEY).unwrap().is_none());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (_, credentials) = stores(false);
        credentials.write(Credential::new("tok")).unwrap();
        credentials.clear().unwrap();
        credentials.clear().unwrap();
        assert!(credentials.read().unwrap().is_none());
    }
}
