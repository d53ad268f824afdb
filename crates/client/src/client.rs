//! Helpdesk client facade.
//!
//! [`HelpdeskClient`] ties one context's [`Session`] and
//! [`QueryCoordinator`] to a transport and exposes typed operations for the
//! helpdesk API.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use deskline_core::{
    ClosedTicketExport, Comment, Credential, Identity, Person, Ticket, TicketCategory, TicketId,
    TicketPriority, TicketStatCount,
};
use secrecy::SecretString;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, instrument};

use crate::attachments::AttachmentStagingBuffer;
use crate::config::ClientConfig;
use crate::coordinator::QueryCoordinator;
use crate::error::ClientError;
use crate::session::{AuthState, Session, SessionOptions, Trigger, TriggerOutcome};
use crate::signal::Profile;
use crate::storage::FileStore;
use crate::transport::{
    GraphqlTransport, Mutation, MutationResponse, NewTicket, ReadModel, SignupForm, Transport,
    TransportError,
};

/// Host events that drive revalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    FocusGained,
    VisibilityChanged { visible: bool },
    ConnectivityChanged { online: bool },
    ManualRefresh,
}

// =============================================================================
// Response payloads
// =============================================================================

#[derive(Debug, Deserialize)]
struct AuthPayload {
    #[serde(default)]
    user: Option<Identity>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TicketPayload<D> {
    ticket: Option<D>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignedTicket {
    #[serde(default)]
    assigned_to: Option<Person>,
}

#[derive(Debug, Deserialize)]
struct CommentedTicket {
    #[serde(default)]
    comments: Vec<Comment>,
}

/// Payload of a clean mutation response.
fn clean_payload<D: DeserializeOwned>(response: MutationResponse) -> Result<D, ClientError> {
    if response.has_errors() {
        return Err(ClientError::Validation(response.errors));
    }
    response
        .decode()
        .map_err(|e| ClientError::from(TransportError::Parse(e)))
}

fn ticket_of<D: DeserializeOwned>(response: MutationResponse) -> Result<D, ClientError> {
    clean_payload::<TicketPayload<D>>(response)?
        .ticket
        .ok_or_else(|| ClientError::from(TransportError::EmptyResponse))
}

// =============================================================================
// HelpdeskClient
// =============================================================================

/// One context's client for the helpdesk API.
pub struct HelpdeskClient<T = GraphqlTransport> {
    config: ClientConfig,
    session: Session<T>,
    coordinator: QueryCoordinator<T>,
}

impl HelpdeskClient<GraphqlTransport> {
    /// Connect a new context of `profile` to the configured API.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Storage` if the profile's store cannot be read.
    pub fn connect(config: ClientConfig, profile: &Profile) -> Result<Self, ClientError> {
        let transport = Arc::new(GraphqlTransport::new(&config));
        Self::with_transport(config, profile, transport)
    }

    /// Connect using the file-backed profile in `config.state_dir`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Storage` if the state directory cannot be opened.
    pub fn open(config: ClientConfig) -> Result<Self, ClientError> {
        let store = FileStore::open(config.state_dir.clone())?;
        let profile = Profile::new(Arc::new(store));
        Self::connect(config, &profile)
    }
}

impl<T: Transport> HelpdeskClient<T> {
    /// Start a context over `transport`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Storage` if the profile's store cannot be read.
    pub fn with_transport(
        config: ClientConfig,
        profile: &Profile,
        transport: Arc<T>,
    ) -> Result<Self, ClientError> {
        let options = SessionOptions::from_config(&config);
        let session = Session::start(profile, options, transport)?;
        let coordinator = QueryCoordinator::new(session.clone());

        Ok(Self {
            config,
            session,
            coordinator,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub const fn session(&self) -> &Session<T> {
        &self.session
    }

    #[must_use]
    pub const fn coordinator(&self) -> &QueryCoordinator<T> {
        &self.coordinator
    }

    // =========================================================================
    // Session
    // =========================================================================

    #[must_use]
    pub fn auth_state(&self) -> AuthState {
        self.session.auth_state()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.session.subscribe()
    }

    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.session.is_refreshing()
    }

    /// Wait for any identity fetch in flight and return the state.
    pub async fn settled(&self) -> AuthState {
        self.session.settled().await
    }

    pub fn refresh(&self) -> TriggerOutcome {
        self.session.refresh()
    }

    /// Feed a host lifecycle event to the session.
    pub fn handle(&self, event: LifecycleEvent) -> TriggerOutcome {
        match event {
            LifecycleEvent::FocusGained => self.session.trigger(Trigger::FocusGained),
            LifecycleEvent::VisibilityChanged { visible: true } => {
                self.session.trigger(Trigger::VisibilityRegained)
            }
            LifecycleEvent::VisibilityChanged { visible: false } => TriggerOutcome::Ignored,
            LifecycleEvent::ConnectivityChanged { online } => self.session.set_online(online),
            LifecycleEvent::ManualRefresh => self.session.refresh(),
        }
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` with the server's messages when the
    /// credentials are refused.
    #[instrument(skip(self, password))]
    pub async fn login_with_password(
        &self,
        email: &str,
        password: SecretString,
    ) -> Result<Identity, ClientError> {
        let response = self
            .coordinator
            .execute(&Mutation::Login {
                email: email.to_string(),
                password,
            })
            .await?;
        self.adopt(clean_payload(response)?).await
    }

    /// Create an account and sign in to it.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` with the server's messages when the
    /// account cannot be created.
    #[instrument(skip(self, form), fields(email = %form.email))]
    pub async fn signup(&self, form: SignupForm) -> Result<Identity, ClientError> {
        let response = self.coordinator.execute(&Mutation::Signup(form)).await?;
        self.adopt(clean_payload(response)?).await
    }

    async fn adopt(&self, payload: AuthPayload) -> Result<Identity, ClientError> {
        let (Some(token), Some(user)) = (payload.token, payload.user) else {
            return Err(ClientError::Validation(vec![
                "Sign-in response carried no credential".to_string(),
            ]));
        };

        self.coordinator.invalidate_all().await;
        self.session.login(Credential::new(token), user.clone())?;
        Ok(user)
    }

    /// Sign out this profile in every context.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Storage` if the store could not be cleared; the
    /// context is signed out regardless.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = self.session.logout();
        self.coordinator.invalidate_all().await;
        result
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Run a mutation with invalidation applied.
    ///
    /// # Errors
    ///
    /// See [`QueryCoordinator::execute`].
    pub async fn execute_mutation(
        &self,
        mutation: &Mutation,
    ) -> Result<MutationResponse, ClientError> {
        self.coordinator.execute(mutation).await
    }

    /// Run mutations in order with one invalidation pass.
    pub async fn execute_batch(
        &self,
        mutations: &[Mutation],
    ) -> Vec<Result<MutationResponse, ClientError>> {
        self.coordinator.execute_batch(mutations).await
    }

    /// Submit a new ticket with the staged attachments.
    ///
    /// The buffer is cleared once the server accepts the ticket and left
    /// untouched otherwise.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` with the server's messages if the
    /// ticket was refused.
    #[instrument(skip(self, description, attachments), fields(staged = attachments.len()))]
    pub async fn create_ticket(
        &self,
        title: &str,
        description: &str,
        category: TicketCategory,
        priority: TicketPriority,
        attachments: &mut AttachmentStagingBuffer,
    ) -> Result<Ticket, ClientError> {
        let mutation = Mutation::CreateTicket(NewTicket {
            title: title.to_string(),
            description: description.to_string(),
            category,
            priority,
            attachments: attachments.snapshot(),
        });

        let ticket: Ticket = ticket_of(self.coordinator.execute(&mutation).await?)?;
        attachments.clear();
        info!(ticket_id = %ticket.id, "Ticket created");
        Ok(ticket)
    }

    /// Assign a ticket to the signed-in agent and return the assignee.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` if the server refused.
    pub async fn assign_ticket(&self, ticket_id: &TicketId) -> Result<Option<Person>, ClientError> {
        let response = self
            .coordinator
            .execute(&Mutation::AssignTicket {
                ticket_id: ticket_id.clone(),
            })
            .await?;
        Ok(ticket_of::<AssignedTicket>(response)?.assigned_to)
    }

    /// Add a comment and return the ticket's comments.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` if the server refused.
    pub async fn add_comment(
        &self,
        ticket_id: &TicketId,
        body: &str,
    ) -> Result<Vec<Comment>, ClientError> {
        let response = self
            .coordinator
            .execute(&Mutation::AddComment {
                ticket_id: ticket_id.clone(),
                body: body.to_string(),
            })
            .await?;
        Ok(ticket_of::<CommentedTicket>(response)?.comments)
    }

    /// # Errors
    ///
    /// Returns `ClientError::Validation` if the server refused.
    pub async fn resolve_ticket(&self, ticket_id: &TicketId) -> Result<(), ClientError> {
        let response = self
            .coordinator
            .execute(&Mutation::ResolveTicket {
                ticket_id: ticket_id.clone(),
            })
            .await?;
        clean_payload::<Value>(response).map(drop)
    }

    /// # Errors
    ///
    /// Returns `ClientError::Validation` if the server refused.
    pub async fn close_ticket(&self, ticket_id: &TicketId) -> Result<(), ClientError> {
        let response = self
            .coordinator
            .execute(&Mutation::CloseTicket {
                ticket_id: ticket_id.clone(),
            })
            .await?;
        clean_payload::<Value>(response).map(drop)
    }

    /// Export tickets closed between `start_date` and `end_date` as CSV.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` if the server refused.
    pub async fn export_closed_tickets(
        &self,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<ClosedTicketExport, ClientError> {
        let response = self
            .coordinator
            .execute(&Mutation::ExportClosedTickets {
                start_date,
                end_date,
            })
            .await?;
        clean_payload(response)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read a read-model; `None` unless authenticated.
    ///
    /// # Errors
    ///
    /// See [`QueryCoordinator::read`].
    pub async fn read(&self, model: &ReadModel) -> Result<Option<Value>, ClientError> {
        self.coordinator.read(model).await
    }

    /// # Errors
    ///
    /// Returns `ClientError::NotAuthenticated` unless signed in.
    pub async fn tickets(&self) -> Result<Vec<Ticket>, ClientError> {
        self.require_authenticated()?;
        Ok(self
            .coordinator
            .read_as(&ReadModel::TicketList)
            .await?
            .unwrap_or_default())
    }

    /// Ticket detail, `None` if the server does not know it.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotAuthenticated` unless signed in.
    pub async fn ticket(&self, ticket_id: &TicketId) -> Result<Option<Ticket>, ClientError> {
        self.require_authenticated()?;
        self.coordinator
            .read_as(&ReadModel::TicketDetail(ticket_id.clone()))
            .await
    }

    /// # Errors
    ///
    /// Returns `ClientError::NotAuthenticated` unless signed in.
    pub async fn ticket_stats(&self) -> Result<TicketStatCount, ClientError> {
        self.require_authenticated()?;
        Ok(self
            .coordinator
            .read_as(&ReadModel::TicketStatCount)
            .await?
            .unwrap_or_default())
    }

    fn require_authenticated(&self) -> Result<(), ClientError> {
        if self.auth_state().is_authenticated() {
            Ok(())
        } else {
            Err(ClientError::NotAuthenticated)
        }
    }
}

impl<T> std::fmt::Debug for HelpdeskClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelpdeskClient")
            .field("api_url", &self.config.api_url)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
