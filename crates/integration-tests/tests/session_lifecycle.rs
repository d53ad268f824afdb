//! Integration tests for a single context's session.
//!
//! These cover login, restore from durable storage, verification outcomes and
//! logout racing an in-flight identity fetch.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use deskline_client::credential_store::CredentialStore;
use deskline_client::session::{AuthState, Phase, SNAPSHOT_KEY, SessionCache, TriggerOutcome};
use deskline_client::signal::Profile;
use deskline_client::storage::{DurableStore, FileStore, MemoryStore, StorageError};
use deskline_client::transport::{GraphQLError, TransportError};
use deskline_core::SessionSnapshot;
use deskline_integration_tests::{
    ScriptedTransport, agent, credential, customer, settle, start,
};

fn credentials(profile: &Profile) -> CredentialStore {
    CredentialStore::new(Arc::clone(profile.store()), false)
}

fn cache(profile: &Profile) -> SessionCache {
    SessionCache::new(Arc::clone(profile.store()))
}

fn unavailable() -> TransportError {
    TransportError::Status {
        status: 503,
        body: "upstream unavailable".to_string(),
    }
}

// =============================================================================
// Startup
// =============================================================================

#[tokio::test]
async fn test_fresh_context_is_unauthenticated() {
    let profile = Profile::in_memory();
    let transport = ScriptedTransport::serving(agent());
    let session = start(&profile, &transport);

    assert_eq!(session.auth_state(), AuthState::Unauthenticated);
    assert_eq!(session.phase(), Phase::NoCredential);
    assert!(!session.is_refreshing());

    settle().await;
    assert_eq!(transport.identity_calls(), 0);
}

#[tokio::test]
async fn test_startup_without_credential_purges_snapshot() {
    let profile = Profile::in_memory();
    cache(&profile)
        .save(&SessionSnapshot::confirmed(agent()))
        .unwrap();

    let _session = start(&profile, &ScriptedTransport::serving(agent()));

    assert!(cache(&profile).load().unwrap().is_none());
}

#[tokio::test]
async fn test_restored_snapshot_renders_before_confirmation() {
    let profile = Profile::in_memory();
    credentials(&profile).write(credential("tok-1")).unwrap();
    cache(&profile)
        .save(&SessionSnapshot::confirmed(agent()))
        .unwrap();

    let transport = ScriptedTransport::serving(agent());
    let gate = transport.gate_identity();
    let session = start(&profile, &transport);

    let AuthState::Authenticated(restored) = session.auth_state() else {
        panic!("expected the cached identity to render immediately");
    };
    assert!(restored.persisted);
    assert_eq!(session.phase(), Phase::Verifying);
    assert!(session.is_refreshing());

    gate.resolve(Ok(agent()));
    let AuthState::Authenticated(confirmed) = session.settled().await else {
        panic!("expected verification to succeed");
    };
    assert!(!confirmed.persisted);
    assert_eq!(confirmed.identity, agent());
    assert_eq!(session.phase(), Phase::Verified);
}

#[tokio::test]
async fn test_credential_without_snapshot_is_pending() {
    let profile = Profile::in_memory();
    credentials(&profile).write(credential("tok-1")).unwrap();

    let transport = ScriptedTransport::serving(agent());
    let gate = transport.gate_identity();
    let session = start(&profile, &transport);

    assert_eq!(session.auth_state(), AuthState::Pending);

    gate.resolve(Ok(agent()));
    let state = session.settled().await;
    assert_eq!(state.identity(), Some(&agent()));
    assert_eq!(cache(&profile).load().unwrap().unwrap().identity, agent());
}

#[tokio::test]
async fn test_expired_credential_is_ignored() {
    let profile = Profile::in_memory();
    credentials(&profile)
        .write_at(credential("tok-old"), Utc::now() - Duration::hours(25))
        .unwrap();

    let transport = ScriptedTransport::serving(agent());
    let session = start(&profile, &transport);

    assert_eq!(session.auth_state(), AuthState::Unauthenticated);
    assert!(credentials(&profile).read().unwrap().is_none());
    settle().await;
    assert_eq!(transport.identity_calls(), 0);
}

#[tokio::test]
async fn test_restricted_credential_is_invisible_to_insecure_context() {
    let profile = Profile::in_memory();
    CredentialStore::new(Arc::clone(profile.store()), true)
        .write(credential("tok-secure"))
        .unwrap();

    let session = start(&profile, &ScriptedTransport::serving(agent()));

    assert_eq!(session.phase(), Phase::NoCredential);
}

#[tokio::test]
async fn test_file_backed_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::serving(agent());

    {
        let profile = Profile::new(Arc::new(FileStore::open(dir.path()).unwrap()));
        let session = start(&profile, &transport);
        session.login(credential("tok-disk"), agent()).unwrap();
    }

    let profile = Profile::new(Arc::new(FileStore::open(dir.path()).unwrap()));
    let gate = transport.gate_identity();
    let session = start(&profile, &transport);

    let AuthState::Authenticated(restored) = session.auth_state() else {
        panic!("expected the persisted identity after restart");
    };
    assert!(restored.persisted);
    assert_eq!(
        session.credential().unwrap().unwrap().expose_token(),
        "tok-disk"
    );

    gate.resolve(Ok(agent()));
    assert!(session.settled().await.is_authenticated());
}

// =============================================================================
// Login and logout
// =============================================================================

#[tokio::test]
async fn test_login_authenticates_without_fetch() {
    let profile = Profile::in_memory();
    let transport = ScriptedTransport::serving(agent());
    let session = start(&profile, &transport);

    session.login(credential("tok-1"), agent()).unwrap();

    let AuthState::Authenticated(snapshot) = session.auth_state() else {
        panic!("expected authenticated after login");
    };
    assert_eq!(snapshot.identity, agent());
    assert!(!snapshot.persisted);
    assert_eq!(session.phase(), Phase::Verified);
    assert_eq!(
        credentials(&profile).read().unwrap(),
        Some(credential("tok-1"))
    );
    assert_eq!(cache(&profile).load().unwrap().unwrap().identity, agent());

    settle().await;
    assert_eq!(transport.identity_calls(), 0);
}

#[tokio::test]
async fn test_subscribers_observe_login() {
    let profile = Profile::in_memory();
    let session = start(&profile, &ScriptedTransport::serving(agent()));
    let mut states = session.subscribe();

    session.login(credential("tok-1"), agent()).unwrap();

    states.changed().await.unwrap();
    assert!(states.borrow().is_authenticated());
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let profile = Profile::in_memory();
    let session = start(&profile, &ScriptedTransport::serving(agent()));
    session.login(credential("tok-1"), agent()).unwrap();

    session.logout().unwrap();
    session.logout().unwrap();

    assert_eq!(session.auth_state(), AuthState::Unauthenticated);
    assert_eq!(session.phase(), Phase::NoCredential);
    assert!(credentials(&profile).read().unwrap().is_none());
    assert!(cache(&profile).load().unwrap().is_none());
}

#[tokio::test]
async fn test_logout_during_verification_ignores_late_success() {
    let profile = Profile::in_memory();
    credentials(&profile).write(credential("tok-1")).unwrap();
    let transport = ScriptedTransport::serving(agent());
    let gate = transport.gate_identity();
    let session = start(&profile, &transport);
    assert_eq!(session.phase(), Phase::Verifying);

    session.logout().unwrap();
    gate.resolve(Ok(agent()));
    settle().await;

    assert_eq!(session.auth_state(), AuthState::Unauthenticated);
    assert_eq!(session.phase(), Phase::NoCredential);
    assert!(cache(&profile).load().unwrap().is_none());
}

#[tokio::test]
async fn test_logout_during_verification_ignores_late_rejection() {
    let profile = Profile::in_memory();
    credentials(&profile).write(credential("tok-1")).unwrap();
    let transport = ScriptedTransport::serving(agent());
    let gate = transport.gate_identity();
    let session = start(&profile, &transport);

    session.logout().unwrap();
    session.login(credential("tok-2"), agent()).unwrap();
    gate.resolve(Err(TransportError::Unauthenticated));
    settle().await;

    // The rejection belonged to tok-1; tok-2 stays signed in
    assert!(session.auth_state().is_authenticated());
    assert_eq!(
        credentials(&profile).read().unwrap(),
        Some(credential("tok-2"))
    );
}

// =============================================================================
// Verification failures
// =============================================================================

#[tokio::test]
async fn test_transient_error_during_revalidation_keeps_session() {
    let profile = Profile::in_memory();
    let transport = ScriptedTransport::serving(agent());
    let session = start(&profile, &transport);
    session.login(credential("tok-1"), agent()).unwrap();
    let before = session.auth_state();

    transport.push_identity(Err(unavailable()));
    assert_eq!(session.refresh(), TriggerOutcome::Started);
    let after = session.settled().await;

    assert_eq!(after, before);
    assert_eq!(session.phase(), Phase::Verified);
    assert!(session.last_error().is_some());
    assert_eq!(
        credentials(&profile).read().unwrap(),
        Some(credential("tok-1"))
    );
    assert_eq!(cache(&profile).load().unwrap().unwrap().identity, agent());
}

#[tokio::test]
async fn test_authentication_error_during_revalidation_clears_session() {
    let profile = Profile::in_memory();
    let transport = ScriptedTransport::serving(agent());
    let session = start(&profile, &transport);
    session.login(credential("tok-1"), agent()).unwrap();

    transport.push_identity(Err(TransportError::Status {
        status: 401,
        body: String::new(),
    }));
    session.refresh();
    let state = session.settled().await;

    assert_eq!(state, AuthState::Unauthenticated);
    assert_eq!(session.phase(), Phase::Rejected);
    assert!(credentials(&profile).read().unwrap().is_none());
    assert!(cache(&profile).load().unwrap().is_none());
}

#[tokio::test]
async fn test_unauthenticated_error_code_rejects() {
    let profile = Profile::in_memory();
    credentials(&profile).write(credential("tok-1")).unwrap();
    let transport = ScriptedTransport::serving(agent());
    transport.push_identity(Err(TransportError::GraphQL(vec![
        GraphQLError::new("You need to sign in").with_code("UNAUTHENTICATED"),
    ])));

    let session = start(&profile, &transport);

    assert_eq!(session.settled().await, AuthState::Unauthenticated);
    assert_eq!(session.phase(), Phase::Rejected);
}

#[tokio::test]
async fn test_transient_error_during_first_verification_stays_pending() {
    let profile = Profile::in_memory();
    credentials(&profile).write(credential("tok-1")).unwrap();
    let transport = ScriptedTransport::serving(agent());
    transport.push_identity(Err(unavailable()));

    let session = start(&profile, &transport);

    assert_eq!(session.settled().await, AuthState::Pending);
    assert_eq!(session.phase(), Phase::Verifying);
    assert!(credentials(&profile).read().unwrap().is_some());

    // The next trigger retries
    assert_eq!(session.refresh(), TriggerOutcome::Started);
    assert_eq!(session.settled().await.identity(), Some(&agent()));
    assert_eq!(transport.identity_calls(), 2);
}

#[tokio::test]
async fn test_transient_error_keeps_restored_snapshot() {
    let profile = Profile::in_memory();
    credentials(&profile).write(credential("tok-1")).unwrap();
    cache(&profile)
        .save(&SessionSnapshot::confirmed(agent()))
        .unwrap();
    let transport = ScriptedTransport::serving(agent());
    transport.push_identity(Err(unavailable()));

    let session = start(&profile, &transport);

    let AuthState::Authenticated(snapshot) = session.settled().await else {
        panic!("expected the restored identity to survive a network failure");
    };
    assert!(snapshot.persisted);
    assert!(cache(&profile).load().unwrap().is_some());
}

#[tokio::test]
async fn test_api_rejection_reported_by_caller() {
    let profile = Profile::in_memory();
    let session = start(&profile, &ScriptedTransport::serving(agent()));

    // Nothing to reject yet
    session.handle_authentication_failure(&credential("tok-1"), "HTTP 401");
    assert_eq!(session.phase(), Phase::NoCredential);

    session.login(credential("tok-1"), agent()).unwrap();
    session.handle_authentication_failure(&credential("tok-1"), "HTTP 401");

    assert_eq!(session.phase(), Phase::Rejected);
    assert_eq!(session.auth_state(), AuthState::Unauthenticated);
    assert!(credentials(&profile).read().unwrap().is_none());
}

#[tokio::test]
async fn test_rejection_of_replaced_credential_is_ignored() {
    let profile = Profile::in_memory();
    let session = start(&profile, &ScriptedTransport::serving(agent()));
    session.login(credential("tok-old"), agent()).unwrap();
    session.logout().unwrap();
    session.login(credential("tok-new"), customer()).unwrap();

    session.handle_authentication_failure(&credential("tok-old"), "HTTP 401");

    assert_eq!(session.phase(), Phase::Verified);
    assert_eq!(session.auth_state().identity(), Some(&customer()));
    assert_eq!(credentials(&profile).read().unwrap(), Some(credential("tok-new")));
    assert!(cache(&profile).load().unwrap().is_some());
}

/// Memory store whose snapshot writes fail.
#[derive(Debug, Default)]
struct SnapshotWritesFail(MemoryStore);

impl DurableStore for SnapshotWritesFail {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.0.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if key == SNAPSHOT_KEY {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.0.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.0.remove(key)
    }
}

#[tokio::test]
async fn test_login_without_snapshot_still_signs_in() {
    let store = SnapshotWritesFail::default();
    store
        .0
        .set(SNAPSHOT_KEY, &serde_json::to_string(&agent()).unwrap())
        .unwrap();
    let profile = Profile::new(Arc::new(store));
    credentials(&profile).write(credential("tok-0")).unwrap();
    let session = start(&profile, &ScriptedTransport::serving(agent()));
    session.settled().await;
    assert!(cache(&profile).load().unwrap().is_some());

    session.login(credential("tok-1"), customer()).unwrap();

    assert_eq!(session.phase(), Phase::Verified);
    assert_eq!(session.auth_state().identity(), Some(&customer()));
    assert_eq!(credentials(&profile).read().unwrap(), Some(credential("tok-1")));
    // The earlier identity's snapshot is gone rather than paired with the new credential
    assert!(cache(&profile).load().unwrap().is_none());
}
