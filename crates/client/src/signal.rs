//! Cross-context credential change notifications.
//!
//! A signal carries no payload. Whoever receives one re-reads the
//! [`CredentialStore`](crate::credential_store::CredentialStore) and derives
//! its own state from what it finds there, so a late or dropped signal only
//! delays convergence.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::storage::{MemoryStore, SharedStore, StorageError};

/// Storage key holding the last broadcast marker.
pub const AUTH_EVENT_KEY: &str = "auth_event";

const SIGNAL_CAPACITY: usize = 64;

/// Identity of one execution context (tab, window, CLI run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Placeholder origin for signals synthesized after a lagged receiver.
    #[must_use]
    pub const fn unknown() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notification that credential state changed in another context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossTabSignal {
    pub origin: ContextId,
    /// Millisecond timestamp written to the store, strictly increasing.
    pub marker: i64,
}

/// Broadcast hub shared by all contexts of one profile.
#[derive(Clone)]
pub struct SignalHub {
    store: SharedStore,
    tx: broadcast::Sender<CrossTabSignal>,
}

impl SignalHub {
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        let (tx, _rx) = broadcast::channel(SIGNAL_CAPACITY);
        Self { store, tx }
    }

    /// Write a new marker and notify every other context.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the marker cannot be written. Delivery
    /// itself never fails; a context with no subscribers simply hears nothing.
    pub fn announce(&self, origin: ContextId) -> Result<i64, StorageError> {
        let now = Utc::now().timestamp_millis();
        let marker = match self.last_marker()? {
            Some(last) if last >= now => last + 1,
            _ => now,
        };

        self.store.set(AUTH_EVENT_KEY, &marker.to_string())?;

        let receivers = self.tx.send(CrossTabSignal { origin, marker }).unwrap_or(0);
        debug!(%origin, marker, receivers, "Announced credential change");
        Ok(marker)
    }

    /// Last marker written by any context.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    pub fn last_marker(&self) -> Result<Option<i64>, StorageError> {
        Ok(self
            .store
            .get(AUTH_EVENT_KEY)?
            .and_then(|raw| raw.trim().parse::<i64>().ok()))
    }

    /// Subscribe on behalf of `context`; its own announcements are filtered out.
    #[must_use]
    pub fn subscribe(&self, context: ContextId) -> SignalSubscription {
        SignalSubscription {
            context,
            rx: self.tx.subscribe(),
            store: Arc::clone(&self.store),
        }
    }
}

impl std::fmt::Debug for SignalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalHub")
            .field("subscribers", &self.tx.receiver_count())
            .finish_non_exhaustive()
    }
}

/// Receiving half of a [`SignalHub`] for one context.
pub struct SignalSubscription {
    context: ContextId,
    rx: broadcast::Receiver<CrossTabSignal>,
    store: SharedStore,
}

impl SignalSubscription {
    /// Wait for the next signal from another context.
    ///
    /// Returns `None` once the hub is gone. A receiver that fell behind gets a
    /// single synthesized signal carrying the latest stored marker.
    pub async fn recv(&mut self) -> Option<CrossTabSignal> {
        loop {
            match self.rx.recv().await {
                Ok(signal) if signal.origin == self.context => {}
                Ok(signal) => return Some(signal),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(context = %self.context, skipped, "Signal receiver lagged");
                    let marker = self
                        .store
                        .get(AUTH_EVENT_KEY)
                        .ok()
                        .flatten()
                        .and_then(|raw| raw.trim().parse::<i64>().ok())
                        .unwrap_or_default();
                    return Some(CrossTabSignal {
                        origin: ContextId::unknown(),
                        marker,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Storage and signalling shared by every context of one profile.
#[derive(Clone, Debug)]
pub struct Profile {
    store: SharedStore,
    signals: SignalHub,
}

impl Profile {
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        let signals = SignalHub::new(Arc::clone(&store));
        Self { store, signals }
    }

    /// Profile over a fresh in-process store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    #[must_use]
    pub const fn store(&self) -> &SharedStore {
        &self.store
    }

    #[must_use]
    pub const fn signals(&self) -> &SignalHub {
        &self.signals
    }
}
