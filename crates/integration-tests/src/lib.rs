//! Integration tests for Deskline.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p deskline-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `session_lifecycle` - one context through login, restore and failures
//! - `cross_context` - several contexts sharing one profile
//! - `revalidation` - focus, visibility, refresh and connectivity triggers
//! - `mutations` - invalidation manifests and the client facade
//! - `attachment_staging` - staging buffer properties
//!
//! Nothing here touches the network: every test runs against
//! [`ScriptedTransport`].

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use deskline_client::session::{AuthState, Session, SessionOptions};
use deskline_client::signal::Profile;
use deskline_client::transport::{Mutation, MutationResponse, ReadModel, Transport, TransportError};
use deskline_core::{Credential, Identity, UserId, UserRole};
use serde_json::Value;
use tokio::sync::{oneshot, watch};

// =============================================================================
// Fixtures
// =============================================================================

#[must_use]
pub fn agent() -> Identity {
    Identity {
        id: UserId::new("agent-1"),
        first_name: Some("Grace".to_string()),
        last_name: Some("Hopper".to_string()),
        full_name: Some("Grace Hopper".to_string()),
        role: UserRole::Agent,
        email: "grace@example.com".to_string(),
    }
}

#[must_use]
pub fn customer() -> Identity {
    Identity {
        id: UserId::new("customer-7"),
        first_name: Some("Ada".to_string()),
        last_name: Some("Lovelace".to_string()),
        full_name: Some("Ada Lovelace".to_string()),
        role: UserRole::Customer,
        email: "ada@example.com".to_string(),
    }
}

#[must_use]
pub fn credential(token: &str) -> Credential {
    Credential::new(token)
}

/// Session options for tests: insecure context, online, two second debounce.
#[must_use]
pub fn options() -> SessionOptions {
    SessionOptions {
        secure_context: false,
        revalidate_debounce: Duration::from_secs(2),
        online: true,
    }
}

/// Start a context of `profile`.
pub fn start(profile: &Profile, transport: &Arc<ScriptedTransport>) -> Session<ScriptedTransport> {
    Session::start(profile, options(), Arc::clone(transport)).unwrap()
}

/// Let spawned tasks (signal listeners, fetches) run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Wait until the session's state satisfies `predicate`, failing after one
/// second.
pub async fn until(
    session: &Session<ScriptedTransport>,
    predicate: impl FnMut(&AuthState) -> bool,
) -> AuthState {
    let mut receiver: watch::Receiver<AuthState> = session.subscribe();
    let state = tokio::time::timeout(Duration::from_secs(1), receiver.wait_for(predicate))
        .await
        .expect("auth state did not converge")
        .unwrap();
    state.clone()
}

// =============================================================================
// ScriptedTransport
// =============================================================================

type IdentityReply = Result<Identity, TransportError>;
type MutationReply = Result<MutationResponse, TransportError>;

enum Reply<T> {
    Ready(Result<T, TransportError>),
    Gated(oneshot::Receiver<Result<T, TransportError>>),
}

impl<T> Reply<T> {
    fn gated() -> (Self, Gate<T>) {
        let (sender, receiver) = oneshot::channel();
        (Self::Gated(receiver), Gate { sender })
    }

    async fn resolve(self) -> Result<T, TransportError> {
        match self {
            Self::Ready(reply) => reply,
            Self::Gated(receiver) => receiver.await.unwrap_or(Err(TransportError::Offline)),
        }
    }
}

/// Holds back one scripted reply until resolved.
pub struct Gate<T> {
    sender: oneshot::Sender<Result<T, TransportError>>,
}

impl<T> Gate<T> {
    pub fn resolve(self, reply: Result<T, TransportError>) {
        let _ = self.sender.send(reply);
    }
}

pub type IdentityGate = Gate<Identity>;
pub type MutationGate = Gate<MutationResponse>;

#[derive(Default)]
struct Script {
    identities: VecDeque<Reply<Identity>>,
    /// Identity returned once the queue is empty; `None` rejects.
    fallback: Option<Identity>,
    mutations: VecDeque<Reply<MutationResponse>>,
    queries: HashMap<ReadModel, Value>,
    invalidated: Vec<ReadModel>,
    tokens_seen: Vec<String>,
}

/// In-memory [`Transport`] that replays scripted responses.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
    identity_calls: AtomicUsize,
    query_calls: AtomicUsize,
    invalidate_all_calls: AtomicUsize,
}

impl ScriptedTransport {
    /// Transport whose identity fetches return `identity`.
    #[must_use]
    pub fn serving(identity: Identity) -> Arc<Self> {
        let transport = Self::default();
        transport.script.lock().unwrap().fallback = Some(identity);
        Arc::new(transport)
    }

    /// Transport that rejects every credential.
    #[must_use]
    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fallback(&self, identity: Option<Identity>) {
        self.script.lock().unwrap().fallback = identity;
    }

    /// Queue a reply for the next identity fetch.
    pub fn push_identity(&self, reply: IdentityReply) {
        self.script
            .lock()
            .unwrap()
            .identities
            .push_back(Reply::Ready(reply));
    }

    /// Queue a held-back reply for the next identity fetch.
    #[must_use]
    pub fn gate_identity(&self) -> IdentityGate {
        let (reply, gate) = Reply::gated();
        self.script.lock().unwrap().identities.push_back(reply);
        gate
    }

    pub fn push_mutation(&self, reply: MutationReply) {
        self.script
            .lock()
            .unwrap()
            .mutations
            .push_back(Reply::Ready(reply));
    }

    /// Queue a held-back reply for the next mutation.
    #[must_use]
    pub fn gate_mutation(&self) -> MutationGate {
        let (reply, gate) = Reply::gated();
        self.script.lock().unwrap().mutations.push_back(reply);
        gate
    }

    pub fn set_query(&self, model: ReadModel, value: Value) {
        self.script.lock().unwrap().queries.insert(model, value);
    }

    #[must_use]
    pub fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn invalidate_all_calls(&self) -> usize {
        self.invalidate_all_calls.load(Ordering::SeqCst)
    }

    /// Read-models invalidated one by one, in order.
    #[must_use]
    pub fn invalidated(&self) -> Vec<ReadModel> {
        self.script.lock().unwrap().invalidated.clone()
    }

    #[must_use]
    pub fn invalidations_of(&self, model: &ReadModel) -> usize {
        self.script
            .lock()
            .unwrap()
            .invalidated
            .iter()
            .filter(|m| *m == model)
            .count()
    }

    /// Bearer tokens mutations and queries were sent with.
    #[must_use]
    pub fn tokens_seen(&self) -> Vec<String> {
        self.script.lock().unwrap().tokens_seen.clone()
    }

    fn record_token(&self, credential: Option<&Credential>) {
        if let Some(credential) = credential {
            self.script
                .lock()
                .unwrap()
                .tokens_seen
                .push(credential.expose_token().to_string());
        }
    }
}

impl Transport for ScriptedTransport {
    async fn fetch_identity(&self, _credential: &Credential) -> Result<Identity, TransportError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);

        let reply = {
            let mut script = self.script.lock().unwrap();
            script.identities.pop_front().unwrap_or_else(|| {
                Reply::Ready(script.fallback.clone().ok_or(TransportError::Unauthenticated))
            })
        };

        reply.resolve().await
    }

    async fn query(
        &self,
        credential: Option<&Credential>,
        model: &ReadModel,
    ) -> Result<Value, TransportError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.record_token(credential);
        Ok(self
            .script
            .lock()
            .unwrap()
            .queries
            .get(model)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn mutate(
        &self,
        credential: Option<&Credential>,
        mutation: &Mutation,
    ) -> Result<MutationResponse, TransportError> {
        self.record_token(credential);
        let reply = self
            .script
            .lock()
            .unwrap()
            .mutations
            .pop_front()
            .unwrap_or(Reply::Ready(Err(TransportError::EmptyResponse)));

        reply.resolve().await.map(|response| MutationResponse {
            kind: mutation.kind(),
            ..response
        })
    }

    async fn invalidate(&self, model: &ReadModel) {
        self.script.lock().unwrap().invalidated.push(model.clone());
    }

    async fn invalidate_all(&self) {
        self.invalidate_all_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mutation response carrying `payload`; the transport stamps the real kind.
#[must_use]
pub fn response(payload: Value) -> MutationResponse {
    MutationResponse::new(deskline_client::transport::MutationKind::AssignTicket, payload)
}
