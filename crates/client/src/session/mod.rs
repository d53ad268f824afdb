//! Identity reconciliation.
//!
//! A [`Session`] is one context's view of the profile's authentication. It
//! reconciles three sources that can disagree:
//!
//! - the credential in the [`CredentialStore`], which any context may change
//! - the identity the server reports for that credential
//! - the [`SessionCache`] snapshot used to render before the server answers
//!
//! # States
//!
//! ```text
//!                 login / signal with credential
//!   NoCredential ───────────────────────────────► Verifying ──fetch ok──► Verified
//!        ▲                                          │   ▲                    │
//!        │ logout / signal without credential       │   └─focus, visibility,─┘
//!        │                                          │     refresh (online)
//!        │                                   auth failure
//!        └──────────────── Rejected ◄──────────────┘
//! ```
//!
//! Every identity fetch carries a generation. Login, logout, rejection and
//! sibling signals bump it, and a fetch that resolves under an older
//! generation is dropped without touching state.

mod cache;

pub use cache::{SNAPSHOT_KEY, SessionCache};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use deskline_core::{Credential, Identity, SessionSnapshot};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::credential_store::CredentialStore;
use crate::error::{ClientError, add_breadcrumb, clear_sentry_user, set_sentry_user};
use crate::signal::{ContextId, CrossTabSignal, Profile, SignalHub, SignalSubscription};
use crate::transport::{ErrorClass, Transport, TransportError};

// =============================================================================
// Public state
// =============================================================================

/// Authentication state as the application sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    /// A credential exists but nothing is known about its identity yet.
    Pending,
    Authenticated(SessionSnapshot),
}

impl AuthState {
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    #[must_use]
    pub const fn snapshot(&self) -> Option<&SessionSnapshot> {
        match self {
            Self::Authenticated(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.snapshot().map(|snapshot| &snapshot.identity)
    }
}

/// Reconciler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NoCredential,
    Verifying,
    Verified,
    Rejected,
}

/// Event asking for the identity to be revalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    FocusGained,
    VisibilityRegained,
    ManualRefresh,
    /// Connectivity returned while a trigger was deferred.
    Reconnected,
}

impl Trigger {
    const fn is_debounced(self) -> bool {
        matches!(self, Self::FocusGained | Self::VisibilityRegained)
    }
}

/// What a [`Trigger`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new identity fetch started.
    Started,
    /// A fetch was already in flight; the trigger joined it.
    Joined,
    /// A fetch started within the debounce window.
    Debounced,
    /// Offline; the trigger runs when connectivity returns.
    Deferred,
    /// No credential to revalidate.
    Ignored,
}

/// Per-context session settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// The context is served over `https`.
    pub secure_context: bool,
    /// Focus and visibility triggers within this window after a fetch start
    /// are dropped.
    pub revalidate_debounce: Duration,
    /// Connectivity when the session starts.
    pub online: bool,
}

impl SessionOptions {
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            secure_context: config.is_secure_context(),
            revalidate_debounce: config.revalidate_debounce,
            online: true,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

// =============================================================================
// Internal state
// =============================================================================

enum PhaseState {
    NoCredential,
    Verifying {
        cached: Option<SessionSnapshot>,
        /// `cached` was confirmed by the server in this context.
        confirmed: bool,
    },
    Verified(SessionSnapshot),
    Rejected,
}

impl PhaseState {
    const fn phase(&self) -> Phase {
        match self {
            Self::NoCredential => Phase::NoCredential,
            Self::Verifying { .. } => Phase::Verifying,
            Self::Verified(_) => Phase::Verified,
            Self::Rejected => Phase::Rejected,
        }
    }

    fn auth_state(&self) -> AuthState {
        match self {
            Self::NoCredential | Self::Rejected => AuthState::Unauthenticated,
            Self::Verifying {
                cached: Some(snapshot),
                ..
            }
            | Self::Verified(snapshot) => AuthState::Authenticated(snapshot.clone()),
            Self::Verifying { cached: None, .. } => AuthState::Pending,
        }
    }

    const fn is_signed_out(&self) -> bool {
        matches!(self, Self::NoCredential | Self::Rejected)
    }
}

struct ReconcilerState {
    phase: PhaseState,
    /// Credential this context currently acts on.
    credential: Option<Credential>,
    generation: u64,
    /// Generation of the fetch in flight.
    in_flight: Option<u64>,
    online: bool,
    /// A trigger arrived while offline.
    deferred: bool,
    last_fetch_started: Option<Instant>,
    last_error: Option<String>,
}

impl ReconcilerState {
    /// Drop any in-flight work and move to `phase`.
    fn reset(&mut self, phase: PhaseState, credential: Option<Credential>) {
        self.generation += 1;
        self.in_flight = None;
        self.deferred = false;
        self.credential = credential;
        self.phase = phase;
    }
}

// =============================================================================
// Session
// =============================================================================

/// One context's authenticated session.
///
/// Cheap to clone; all clones share the same state. Dropping the last clone
/// stops listening for sibling signals.
pub struct Session<T> {
    inner: Arc<SessionInner<T>>,
}

struct SessionInner<T> {
    context: ContextId,
    credentials: CredentialStore,
    cache: SessionCache,
    signals: SignalHub,
    transport: Arc<T>,
    debounce: Duration,
    state: Mutex<ReconcilerState>,
    auth_tx: watch::Sender<AuthState>,
    refreshing_tx: watch::Sender<bool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Drop for SessionInner<T> {
    fn drop(&mut self) {
        let slot = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

impl<T> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> Session<T> {
    /// Open a session for a new context of `profile`.
    ///
    /// Reads the stored credential and, if one exists, starts verifying it.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Storage` if the durable store cannot be read.
    pub fn start(
        profile: &Profile,
        options: SessionOptions,
        transport: Arc<T>,
    ) -> Result<Self, ClientError> {
        let context = ContextId::new();
        let (auth_tx, _) = watch::channel(AuthState::Pending);
        let (refreshing_tx, _) = watch::channel(false);

        let session = Self {
            inner: Arc::new(SessionInner {
                context,
                credentials: CredentialStore::new(
                    Arc::clone(profile.store()),
                    options.secure_context,
                ),
                cache: SessionCache::new(Arc::clone(profile.store())),
                signals: profile.signals().clone(),
                transport,
                debounce: options.revalidate_debounce,
                state: Mutex::new(ReconcilerState {
                    phase: PhaseState::NoCredential,
                    credential: None,
                    generation: 0,
                    in_flight: None,
                    online: options.online,
                    deferred: false,
                    last_fetch_started: None,
                    last_error: None,
                }),
                auth_tx,
                refreshing_tx,
                listener: Mutex::new(None),
            }),
        };

        // Subscribe before reading the store so no change slips in between
        let subscription = profile.signals().subscribe(context);
        session.initialize()?;
        session.spawn_listener(subscription);

        Ok(session)
    }

    fn initialize(&self) -> Result<(), ClientError> {
        let mut state = self.lock();

        match self.inner.credentials.read()? {
            None => {
                self.inner.cache.purge()?;
                state.reset(PhaseState::NoCredential, None);
                self.publish(&state);
                debug!(context = %self.inner.context, "No stored credential");
            }
            Some(credential) => {
                let cached = self.inner.cache.load()?;
                state.reset(
                    PhaseState::Verifying {
                        cached,
                        confirmed: false,
                    },
                    Some(credential.clone()),
                );
                self.publish(&state);
                self.begin_fetch(&mut state, credential);
            }
        }

        Ok(())
    }

    fn spawn_listener(&self, mut subscription: SignalSubscription) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(signal) = subscription.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                Self { inner }.handle_signal(signal);
            }
        });

        let mut slot = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(handle);
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Current authentication state.
    #[must_use]
    pub fn auth_state(&self) -> AuthState {
        self.inner.auth_tx.borrow().clone()
    }

    /// Receiver that observes every authentication state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.auth_tx.subscribe()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.lock().phase.phase()
    }

    /// Whether an identity fetch is in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        *self.inner.refreshing_tx.borrow()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    /// Message of the last failed identity fetch that kept state unchanged.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    #[must_use]
    pub fn context(&self) -> ContextId {
        self.inner.context
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<T> {
        &self.inner.transport
    }

    /// Credential to attach to API requests.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Storage` if the store cannot be read.
    pub fn credential(&self) -> Result<Option<Credential>, ClientError> {
        Ok(self.inner.credentials.read()?)
    }

    /// Wait until no identity fetch is in flight and return the state.
    pub async fn settled(&self) -> AuthState {
        let mut refreshing = self.inner.refreshing_tx.subscribe();
        // The sender lives as long as `self`, so this only returns once idle
        let _ = refreshing.wait_for(|in_flight| !*in_flight).await;
        self.auth_state()
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Adopt a credential and identity the server just issued.
    ///
    /// Writes both to the store, tells sibling contexts and authenticates
    /// without fetching.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Storage` if the credential cannot be written;
    /// state is then unchanged. A snapshot that cannot be saved is purged and
    /// the login goes ahead without one.
    pub fn login(&self, credential: Credential, identity: Identity) -> Result<(), ClientError> {
        let mut state = self.lock();

        let credential = self.inner.credentials.write(credential)?;
        let snapshot = SessionSnapshot::confirmed(identity);
        if let Err(e) = self.inner.cache.save(&snapshot) {
            warn!(error = %e, "Failed to persist session snapshot");
            // The previous identity's snapshot must not outlive its credential
            if let Err(e) = self.inner.cache.purge() {
                warn!(error = %e, "Failed to purge session snapshot");
            }
        }

        state.reset(PhaseState::Verified(snapshot.clone()), Some(credential));
        state.last_error = None;
        self.inner.refreshing_tx.send_replace(false);
        self.publish(&state);
        drop(state);

        self.announce();
        set_sentry_user(snapshot.user_id(), Some(&snapshot.identity.email));
        add_breadcrumb(
            "auth",
            "Signed in",
            Some(&[("user_id", snapshot.user_id().as_str())]),
        );
        info!(user_id = %snapshot.user_id(), "Signed in");

        Ok(())
    }

    /// Sign out this profile. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Storage` if the store could not be cleared. The
    /// context is signed out regardless.
    pub fn logout(&self) -> Result<(), ClientError> {
        let mut state = self.lock();

        let cleared = self.inner.credentials.clear();
        let purged = self.inner.cache.purge();

        state.reset(PhaseState::NoCredential, None);
        state.last_error = None;
        self.inner.refreshing_tx.send_replace(false);
        self.publish(&state);
        drop(state);

        self.announce();
        clear_sentry_user();
        add_breadcrumb("auth", "Signed out", None);
        info!("Signed out");

        cleared?;
        purged?;
        Ok(())
    }

    /// Revalidate the identity on explicit request.
    pub fn refresh(&self) -> TriggerOutcome {
        self.trigger(Trigger::ManualRefresh)
    }

    /// Revalidate the identity in response to `trigger`.
    pub fn trigger(&self, trigger: Trigger) -> TriggerOutcome {
        let mut state = self.lock();

        match &state.phase {
            PhaseState::Verified(_) => {}
            PhaseState::Verifying { .. } if state.in_flight.is_none() => {}
            PhaseState::Verifying { .. } => return TriggerOutcome::Joined,
            PhaseState::NoCredential | PhaseState::Rejected => return TriggerOutcome::Ignored,
        }

        if !state.online {
            state.deferred = true;
            debug!(?trigger, "Offline, deferring revalidation");
            return TriggerOutcome::Deferred;
        }

        let debounced = trigger.is_debounced()
            && matches!(state.phase, PhaseState::Verified(_))
            && state
                .last_fetch_started
                .is_some_and(|started| started.elapsed() < self.inner.debounce);
        if debounced {
            debug!(?trigger, "Revalidation debounced");
            return TriggerOutcome::Debounced;
        }

        let credential = match self.inner.credentials.read() {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                self.sign_out_locally(&mut state, "Stored credential is gone");
                return TriggerOutcome::Ignored;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read credential for revalidation");
                return TriggerOutcome::Ignored;
            }
        };

        let revalidating = match &state.phase {
            PhaseState::Verified(snapshot) => Some(snapshot.clone()),
            _ => None,
        };
        if let Some(snapshot) = revalidating {
            state.phase = PhaseState::Verifying {
                cached: Some(snapshot),
                confirmed: true,
            };
        }
        state.credential = Some(credential.clone());

        debug!(?trigger, "Revalidating identity");
        self.begin_fetch(&mut state, credential);
        TriggerOutcome::Started
    }

    /// Record a connectivity change. Going online runs a deferred trigger.
    pub fn set_online(&self, online: bool) -> TriggerOutcome {
        let resume = {
            let mut state = self.lock();
            state.online = online;
            online && std::mem::take(&mut state.deferred)
        };

        if resume {
            self.trigger(Trigger::Reconnected)
        } else {
            TriggerOutcome::Ignored
        }
    }

    /// Clear the session after the API rejected `credential`.
    ///
    /// A rejection of a credential this context no longer acts on, or one a
    /// sibling has since replaced in the store, is ignored.
    pub fn handle_authentication_failure(&self, credential: &Credential, reason: &str) {
        let mut state = self.lock();
        if state.phase.is_signed_out() || state.credential.as_ref() != Some(credential) {
            debug!(reason, "Ignoring rejection of a superseded credential");
            return;
        }

        match self.inner.credentials.read() {
            Ok(Some(stored)) if stored != *credential => {
                debug!(reason, "Stored credential changed, leaving it to the signal");
            }
            _ => self.reject(&mut state, reason),
        }
    }

    /// Re-derive state after a sibling context changed the credential.
    pub fn handle_signal(&self, signal: CrossTabSignal) {
        let mut state = self.lock();

        let stored = match self.inner.credentials.read() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to read credential after signal");
                return;
            }
        };

        match stored {
            None => {
                if state.phase.is_signed_out() {
                    return;
                }
                self.sign_out_locally(&mut state, "Signed out in another context");
            }
            Some(credential) => {
                let unchanged = !state.phase.is_signed_out()
                    && state.credential.as_ref() == Some(&credential);
                if unchanged {
                    debug!(marker = signal.marker, "Credential unchanged after signal");
                    return;
                }

                let cached = self.inner.cache.load().unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to load session snapshot");
                    None
                });
                state.reset(
                    PhaseState::Verifying {
                        cached,
                        confirmed: false,
                    },
                    Some(credential.clone()),
                );
                self.publish(&state);
                self.drop_read_models();
                info!(marker = signal.marker, "Adopting credential from another context");
                self.begin_fetch(&mut state, credential);
            }
        }
    }

    // =========================================================================
    // Fetch lifecycle
    // =========================================================================

    fn begin_fetch(&self, state: &mut ReconcilerState, credential: Credential) {
        state.generation += 1;
        let generation = state.generation;

        if !state.online {
            state.deferred = true;
            debug!(generation, "Offline, deferring identity fetch");
            return;
        }

        state.in_flight = Some(generation);
        state.last_fetch_started = Some(Instant::now());
        self.inner.refreshing_tx.send_replace(true);

        let session = self.clone();
        tokio::spawn(async move {
            let result = session.inner.transport.fetch_identity(&credential).await;
            session.complete_fetch(generation, result);
        });
    }

    fn complete_fetch(&self, generation: u64, result: Result<Identity, TransportError>) {
        let mut state = self.lock();

        if state.in_flight != Some(generation) || state.generation != generation {
            debug!(
                generation,
                current = state.generation,
                "Discarding superseded identity fetch"
            );
            return;
        }

        state.in_flight = None;
        self.inner.refreshing_tx.send_replace(false);

        match result {
            Ok(identity) => self.accept(&mut state, identity),
            Err(error) if error.class() == ErrorClass::Authentication => {
                self.reject(&mut state, &error.to_string());
            }
            Err(error) => {
                state.last_error = Some(error.to_string());
                let restored = match &state.phase {
                    PhaseState::Verifying {
                        cached: Some(snapshot),
                        confirmed: true,
                    } => Some(snapshot.clone()),
                    _ => None,
                };
                if let Some(snapshot) = restored {
                    state.phase = PhaseState::Verified(snapshot);
                }
                warn!(error = %error, "Identity fetch failed, keeping session state");
            }
        }
    }

    fn accept(&self, state: &mut ReconcilerState, identity: Identity) {
        let snapshot = SessionSnapshot::confirmed(identity);
        if let Err(e) = self.inner.cache.save(&snapshot) {
            warn!(error = %e, "Failed to persist session snapshot");
        }

        state.phase = PhaseState::Verified(snapshot.clone());
        state.last_error = None;
        self.publish(state);

        set_sentry_user(snapshot.user_id(), Some(&snapshot.identity.email));
        add_breadcrumb(
            "auth",
            "Session verified",
            Some(&[("user_id", snapshot.user_id().as_str())]),
        );
        info!(user_id = %snapshot.user_id(), "Session verified");
    }

    fn reject(&self, state: &mut ReconcilerState, reason: &str) {
        if let Err(e) = self.inner.credentials.clear() {
            warn!(error = %e, "Failed to clear rejected credential");
        }
        if let Err(e) = self.inner.cache.purge() {
            warn!(error = %e, "Failed to purge session snapshot");
        }

        state.reset(PhaseState::Rejected, None);
        state.last_error = Some(reason.to_string());
        self.inner.refreshing_tx.send_replace(false);
        self.publish(state);

        self.announce();
        self.drop_read_models();
        clear_sentry_user();
        add_breadcrumb("auth", "Credential rejected", None);
        warn!(reason, "Credential rejected, session cleared");
    }

    /// Move to `NoCredential` without announcing; the store already agrees.
    fn sign_out_locally(&self, state: &mut ReconcilerState, reason: &str) {
        if let Err(e) = self.inner.cache.purge() {
            warn!(error = %e, "Failed to purge session snapshot");
        }

        state.reset(PhaseState::NoCredential, None);
        self.inner.refreshing_tx.send_replace(false);
        self.publish(state);

        self.drop_read_models();
        clear_sentry_user();
        info!(reason, "Session ended");
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn lock(&self) -> MutexGuard<'_, ReconcilerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &ReconcilerState) {
        let next = state.phase.auth_state();
        self.inner.auth_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Drop cached read-models so nothing fetched for one identity is served
    /// to another.
    fn drop_read_models(&self) {
        let transport = Arc::clone(&self.inner.transport);
        tokio::spawn(async move {
            transport.invalidate_all().await;
        });
    }

    fn announce(&self) {
        if let Err(e) = self.inner.signals.announce(self.inner.context) {
            warn!(error = %e, "Failed to announce credential change");
        }
    }
}

impl<T> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("context", &self.inner.context)
            .field("auth_state", &*self.inner.auth_tx.borrow())
            .finish_non_exhaustive()
    }
}
