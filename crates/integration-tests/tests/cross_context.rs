//! Integration tests for several contexts sharing one profile.
//!
//! Each context re-derives its state from the shared store whenever a sibling
//! announces a change; the announcement itself carries nothing.

#![allow(clippy::unwrap_used)]

use deskline_client::session::{AuthState, Phase};
use deskline_client::signal::{ContextId, Profile};
use deskline_client::transport::TransportError;
use deskline_integration_tests::{
    ScriptedTransport, agent, credential, customer, settle, start, until,
};

#[tokio::test]
async fn test_sibling_login_and_logout_propagate() {
    let profile = Profile::in_memory();
    let transport = ScriptedTransport::serving(agent());
    let first = start(&profile, &transport);
    let second = start(&profile, &transport);
    assert_eq!(second.auth_state(), AuthState::Unauthenticated);

    first.login(credential("tok-1"), agent()).unwrap();

    let state = until(&second, AuthState::is_authenticated).await;
    assert_eq!(state.identity(), Some(&agent()));
    second.settled().await;
    assert_eq!(second.phase(), Phase::Verified);

    first.logout().unwrap();

    until(&second, |state| *state == AuthState::Unauthenticated).await;
    assert_eq!(second.phase(), Phase::NoCredential);
}

#[tokio::test]
async fn test_sibling_adopts_cached_identity_before_fetch() {
    let profile = Profile::in_memory();
    let transport = ScriptedTransport::serving(agent());
    let first = start(&profile, &transport);
    let second = start(&profile, &transport);
    let gate = transport.gate_identity();

    first.login(credential("tok-1"), agent()).unwrap();

    // The snapshot written by the first context renders while the second
    // verifies the credential on its own
    let state = until(&second, AuthState::is_authenticated).await;
    assert!(state.snapshot().unwrap().persisted);
    assert_eq!(second.phase(), Phase::Verifying);

    gate.resolve(Ok(agent()));
    let state = second.settled().await;
    assert!(!state.snapshot().unwrap().persisted);
}

#[tokio::test]
async fn test_rejection_in_one_context_signs_out_siblings() {
    let profile = Profile::in_memory();
    let transport = ScriptedTransport::serving(agent());
    let first = start(&profile, &transport);
    let second = start(&profile, &transport);

    first.login(credential("tok-1"), agent()).unwrap();
    until(&second, AuthState::is_authenticated).await;
    second.settled().await;

    transport.push_identity(Err(TransportError::Status {
        status: 403,
        body: String::new(),
    }));
    first.refresh();
    assert_eq!(first.settled().await, AuthState::Unauthenticated);
    assert_eq!(first.phase(), Phase::Rejected);

    until(&second, |state| *state == AuthState::Unauthenticated).await;
    assert_eq!(second.phase(), Phase::NoCredential);
}

#[tokio::test]
async fn test_signal_without_change_is_ignored() {
    let profile = Profile::in_memory();
    let transport = ScriptedTransport::serving(agent());
    let first = start(&profile, &transport);
    let second = start(&profile, &transport);

    first.login(credential("tok-1"), agent()).unwrap();
    until(&second, AuthState::is_authenticated).await;
    second.settled().await;
    let calls = transport.identity_calls();

    profile.signals().announce(ContextId::new()).unwrap();
    settle().await;

    assert_eq!(transport.identity_calls(), calls);
    assert_eq!(second.phase(), Phase::Verified);
    assert_eq!(first.phase(), Phase::Verified);
}

#[tokio::test]
async fn test_sibling_switching_user_is_followed() {
    let profile = Profile::in_memory();
    let transport = ScriptedTransport::serving(agent());
    let first = start(&profile, &transport);
    let second = start(&profile, &transport);

    first.login(credential("tok-agent"), agent()).unwrap();
    until(&second, AuthState::is_authenticated).await;
    second.settled().await;

    transport.set_fallback(Some(customer()));
    first.login(credential("tok-customer"), customer()).unwrap();

    let state = until(&second, |state| state.identity() == Some(&customer())).await;
    assert!(state.is_authenticated());
    assert_eq!(
        second.settled().await.identity().map(|identity| identity.email.clone()),
        Some(customer().email)
    );
    assert_eq!(
        second.credential().unwrap(),
        Some(credential("tok-customer"))
    );
}

#[tokio::test]
async fn test_fetch_for_replaced_credential_is_discarded() {
    let profile = Profile::in_memory();
    let transport = ScriptedTransport::serving(customer());
    let first = start(&profile, &transport);
    let second = start(&profile, &transport);
    let stale = transport.gate_identity();

    first.login(credential("tok-agent"), agent()).unwrap();
    until(&second, AuthState::is_authenticated).await;
    assert!(second.is_refreshing());

    first.login(credential("tok-customer"), customer()).unwrap();
    until(&second, |state| state.identity() == Some(&customer())).await;
    second.settled().await;

    // The fetch for the agent's credential resolves last
    stale.resolve(Ok(agent()));
    settle().await;

    assert_eq!(second.auth_state().identity(), Some(&customer()));
    assert_eq!(second.phase(), Phase::Verified);
}

#[tokio::test]
async fn test_rejected_context_recovers_when_sibling_signs_in() {
    let profile = Profile::in_memory();
    let transport = ScriptedTransport::serving(agent());
    let first = start(&profile, &transport);
    let second = start(&profile, &transport);

    second.login(credential("tok-old"), agent()).unwrap();
    until(&first, AuthState::is_authenticated).await;
    first.settled().await;

    second.handle_authentication_failure(&credential("tok-old"), "HTTP 401");
    until(&first, |state| *state == AuthState::Unauthenticated).await;
    assert_eq!(second.phase(), Phase::Rejected);

    first.login(credential("tok-new"), agent()).unwrap();

    until(&second, AuthState::is_authenticated).await;
    second.settled().await;
    assert_eq!(second.phase(), Phase::Verified);
}
