//! Request/response access to the helpdesk API.
//!
//! # Architecture
//!
//! - [`Transport`] is the seam between session logic and the network. The
//!   session and coordinator only ever see identities, read-model payloads and
//!   mutation responses.
//! - [`GraphqlTransport`] speaks GraphQL over `reqwest` and caches read-models
//!   in `moka`.
//! - Errors are classified once, here, into [`ErrorClass`]. Everything
//!   upstream branches on the class, never on HTTP details.

mod documents;
mod graphql;

pub use documents::{document_for_mutation, document_for_read_model};
pub use graphql::GraphqlTransport;

use std::future::Future;

use chrono::{DateTime, Utc};
use deskline_core::{Credential, Identity, TicketCategory, TicketId, TicketPriority};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::attachments::StagedAttachment;

// =============================================================================
// Read-models
// =============================================================================

/// Named server-side read-model that can be cached and invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReadModel {
    CurrentUser,
    TicketList,
    TicketDetail(TicketId),
    TicketStatCount,
}

impl std::fmt::Display for ReadModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CurrentUser => f.write_str("current_user"),
            Self::TicketList => f.write_str("tickets"),
            Self::TicketDetail(id) => write!(f, "ticket:{id}"),
            Self::TicketStatCount => f.write_str("ticket_stat_count"),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// How an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Credential rejected; forces logout-equivalent cleanup.
    Authentication,
    /// Network trouble; retryable and never changes auth state.
    Transient,
    /// The server understood the request and refused it.
    Application,
}

/// Error codes the API uses in `extensions.code` for rejected credentials.
const AUTHENTICATION_CODES: &[&str] = &["UNAUTHENTICATED", "FORBIDDEN"];

/// Errors that can occur when talking to the helpdesk API.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Rate limited by the API.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// GraphQL query returned errors.
    #[error("GraphQL errors: {}", format_graphql_errors(.0))]
    GraphQL(Vec<GraphQLError>),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Response carried neither data nor errors.
    #[error("No data in response")]
    EmptyResponse,

    /// The API answered but did not recognise the credential.
    #[error("Not authenticated")]
    Unauthenticated,

    /// The context is offline.
    #[error("Offline")]
    Offline,

    /// A staged attachment could not be read for upload.
    #[error("Attachment {name} could not be read: {source}")]
    Attachment {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Classify the error for propagation.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unauthenticated => ErrorClass::Authentication,
            Self::Status { status, .. } if matches!(*status, 401 | 403) => {
                ErrorClass::Authentication
            }
            Self::GraphQL(errors) if errors.iter().any(GraphQLError::is_authentication) => {
                ErrorClass::Authentication
            }
            Self::GraphQL(_) | Self::Attachment { .. } => ErrorClass::Application,
            Self::Http(_)
            | Self::Status { .. }
            | Self::RateLimited(_)
            | Self::Parse(_)
            | Self::EmptyResponse
            | Self::Offline => ErrorClass::Transient,
        }
    }

    #[must_use]
    pub fn is_authentication(&self) -> bool {
        self.class() == ErrorClass::Authentication
    }
}

/// A GraphQL error returned by the helpdesk API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphQLError {
    /// Error message.
    pub message: String,
    /// `extensions.code`, when present.
    pub code: Option<String>,
    /// Path to the error in the response.
    pub path: Vec<String>,
}

impl GraphQLError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            path: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Whether the error reports a rejected credential.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|code| AUTHENTICATION_CODES.contains(&code))
    }
}

impl From<graphql_client::Error> for GraphQLError {
    fn from(error: graphql_client::Error) -> Self {
        let code = error
            .extensions
            .as_ref()
            .and_then(|extensions| extensions.get("code"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned);

        let path = error.path.map_or_else(Vec::new, |path| {
            path.into_iter()
                .map(|fragment| match fragment {
                    graphql_client::PathFragment::Key(key) => key,
                    graphql_client::PathFragment::Index(index) => index.to_string(),
                })
                .collect()
        });

        Self {
            message: error.message,
            code,
            path,
        }
    }
}

fn format_graphql_errors(errors: &[GraphQLError]) -> String {
    if errors.is_empty() {
        return "(no error details provided)".to_string();
    }

    errors
        .iter()
        .map(|e| {
            let mut text = e.message.clone();
            if !e.path.is_empty() {
                text.push_str(&format!(" at {}", e.path.join(".")));
            }
            if let Some(code) = &e.code {
                text.push_str(&format!(" [{code}]"));
            }
            text
        })
        .collect::<Vec<_>>()
        .join("; ")
}

// =============================================================================
// Mutations
// =============================================================================

/// Fields of a new ticket.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub category: TicketCategory,
    pub priority: TicketPriority,
    pub attachments: Vec<StagedAttachment>,
}

/// Account details for signup.
#[derive(Debug, Clone)]
pub struct SignupForm {
    pub email: String,
    pub password: SecretString,
    pub first_name: String,
    pub last_name: String,
}

/// A state-changing request against the helpdesk API.
#[derive(Debug, Clone)]
pub enum Mutation {
    CreateTicket(NewTicket),
    AssignTicket { ticket_id: TicketId },
    AddComment { ticket_id: TicketId, body: String },
    ResolveTicket { ticket_id: TicketId },
    CloseTicket { ticket_id: TicketId },
    ExportClosedTickets {
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    },
    Login { email: String, password: SecretString },
    Signup(SignupForm),
}

/// Discriminant of a [`Mutation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    CreateTicket,
    AssignTicket,
    AddComment,
    ResolveTicket,
    CloseTicket,
    ExportClosedTickets,
    Login,
    Signup,
}

impl MutationKind {
    /// Field of the mutation payload in the response `data`.
    #[must_use]
    pub const fn response_field(self) -> &'static str {
        match self {
            Self::CreateTicket => "createTicket",
            Self::AssignTicket => "assignTicket",
            Self::AddComment => "addComment",
            Self::ResolveTicket => "resolveTicket",
            Self::CloseTicket => "closeTicket",
            Self::ExportClosedTickets => "exportClosedTickets",
            Self::Login => "login",
            Self::Signup => "signup",
        }
    }

    /// Login and signup run without a credential and produce one.
    #[must_use]
    pub const fn is_authentication(self) -> bool {
        matches!(self, Self::Login | Self::Signup)
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.response_field())
    }
}

impl Mutation {
    #[must_use]
    pub const fn kind(&self) -> MutationKind {
        match self {
            Self::CreateTicket(_) => MutationKind::CreateTicket,
            Self::AssignTicket { .. } => MutationKind::AssignTicket,
            Self::AddComment { .. } => MutationKind::AddComment,
            Self::ResolveTicket { .. } => MutationKind::ResolveTicket,
            Self::CloseTicket { .. } => MutationKind::CloseTicket,
            Self::ExportClosedTickets { .. } => MutationKind::ExportClosedTickets,
            Self::Login { .. } => MutationKind::Login,
            Self::Signup(_) => MutationKind::Signup,
        }
    }

    /// Ticket the mutation targets, if any.
    #[must_use]
    pub const fn ticket_id(&self) -> Option<&TicketId> {
        match self {
            Self::AssignTicket { ticket_id }
            | Self::AddComment { ticket_id, .. }
            | Self::ResolveTicket { ticket_id }
            | Self::CloseTicket { ticket_id } => Some(ticket_id),
            _ => None,
        }
    }
}

/// Payload of a mutation that reached the server.
///
/// `errors` holds the payload's application-level error messages; a response
/// with errors did not change server state.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResponse {
    pub kind: MutationKind,
    pub payload: serde_json::Value,
    pub errors: Vec<String>,
}

impl MutationResponse {
    /// Wrap a mutation payload, lifting its `errors` array.
    #[must_use]
    pub fn new(kind: MutationKind, payload: serde_json::Value) -> Self {
        let errors = payload
            .get("errors")
            .and_then(serde_json::Value::as_array)
            .map(|errors| {
                errors
                    .iter()
                    .map(|error| match error {
                        serde_json::Value::String(message) => message.clone(),
                        other => other
                            .get("message")
                            .and_then(serde_json::Value::as_str)
                            .map_or_else(|| other.to_string(), str::to_owned),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            kind,
            payload,
            errors,
        }
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Decode the payload into a typed value.
    ///
    /// # Errors
    ///
    /// Returns the decode error if the payload does not match `D`.
    pub fn decode<D: DeserializeOwned>(&self) -> Result<D, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Access to the helpdesk API.
///
/// Implementations are stateless with respect to authentication: the caller
/// passes the credential to use on every call.
pub trait Transport: Send + Sync + 'static {
    /// Fetch the identity behind `credential`.
    fn fetch_identity(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Identity, TransportError>> + Send;

    /// Read a read-model, from cache when fresh.
    fn query(
        &self,
        credential: Option<&Credential>,
        model: &ReadModel,
    ) -> impl Future<Output = Result<serde_json::Value, TransportError>> + Send;

    /// Run a mutation.
    fn mutate(
        &self,
        credential: Option<&Credential>,
        mutation: &Mutation,
    ) -> impl Future<Output = Result<MutationResponse, TransportError>> + Send;

    /// Mark a read-model stale; the next read goes to the network.
    fn invalidate(&self, model: &ReadModel) -> impl Future<Output = ()> + Send;

    /// Mark every read-model stale.
    fn invalidate_all(&self) -> impl Future<Output = ()> + Send;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_status_classification() {
        let status = |status| TransportError::Status {
            status,
            body: String::new(),
        };
        assert_eq!(status(401).class(), ErrorClass::Authentication);
        assert_eq!(status(403).class(), ErrorClass::Authentication);
        assert_eq!(status(500).class(), ErrorClass::Transient);
        assert_eq!(status(502).class(), ErrorClass::Transient);
        assert_eq!(TransportError::RateLimited(3).class(), ErrorClass::Transient);
        assert_eq!(TransportError::Offline.class(), ErrorClass::Transient);
    }

    #[test]
    fn test_graphql_code_classification() {
        let unauthenticated =
            TransportError::GraphQL(vec![GraphQLError::new("nope").with_code("UNAUTHENTICATED")]);
        let forbidden =
            TransportError::GraphQL(vec![GraphQLError::new("nope").with_code("FORBIDDEN")]);
        let other = TransportError::GraphQL(vec![GraphQLError::new("Ticket not found")]);

        assert!(unauthenticated.is_authentication());
        assert!(forbidden.is_authentication());
        assert_eq!(other.class(), ErrorClass::Application);
    }

    #[test]
    fn test_graphql_error_display() {
        let err = TransportError::GraphQL(vec![GraphQLError {
            message: "Not allowed".to_string(),
            code: Some("FORBIDDEN".to_string()),
            path: vec!["closeTicket".to_string()],
        }]);
        assert_eq!(
            err.to_string(),
            "GraphQL errors: Not allowed at closeTicket [FORBIDDEN]"
        );
    }

    #[test]
    fn test_mutation_response_lifts_errors() {
        let clean = MutationResponse::new(
            MutationKind::AssignTicket,
            json!({ "ticket": { "id": "1" }, "errors": [] }),
        );
        assert!(!clean.has_errors());

        let failed = MutationResponse::new(
            MutationKind::CloseTicket,
            json!({ "success": false, "errors": ["Ticket is not resolved"] }),
        );
        assert_eq!(failed.errors, vec!["Ticket is not resolved".to_string()]);

        let missing = MutationResponse::new(MutationKind::ResolveTicket, json!({ "success": true }));
        assert!(!missing.has_errors());
    }

    #[test]
    fn test_read_model_display() {
        assert_eq!(ReadModel::TicketDetail(TicketId::new("7")).to_string(), "ticket:7");
        assert_eq!(ReadModel::TicketStatCount.to_string(), "ticket_stat_count");
    }
}
