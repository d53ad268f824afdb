//! GraphQL documents of the helpdesk API.
//!
//! The schema is not vendored, so documents are plain strings wrapped in
//! `graphql_client::QueryBody` envelopes.

use graphql_client::QueryBody;
use secrecy::ExposeSecret;
use serde_json::{Value, json};

use super::{Mutation, ReadModel};

// =============================================================================
// Queries
// =============================================================================

const GET_CURRENT_USER: &str = r"
query GetCurrentUser {
  currentUser {
    id
    firstName
    lastName
    fullName
    role
    email
  }
}";

const GET_TICKETS: &str = r"
query GetTickets {
  tickets {
    id
    title
    description
    number
    status
    priority
    createdAt
    firstResponseAt
    category
    reopenedAt
    assignedTo { id firstName lastName }
    customer { id firstName lastName }
    attachments { id filename byteSize url createdAt contentType }
  }
}";

const GET_TICKET: &str = r"
query GetTicket($id: ID!) {
  ticket(id: $id) {
    id
    title
    description
    number
    status
    priority
    createdAt
    category
    agentHasReplied
    customer { id firstName lastName role }
    assignedTo { id firstName lastName }
    firstResponseAt
    attachments { id filename url }
    canClose
    canResolve
    agentCanComment
    customerCanComment
    comments {
      id
      body
      createdAt
      author { id fullName email }
    }
  }
}";

const GET_TICKET_STAT_COUNT: &str = r"
query GetTicketStatCount {
  ticketStatCount {
    total
    open
    pending
    completed
  }
}";

// =============================================================================
// Mutations
// =============================================================================

const CREATE_TICKET: &str = r"
mutation CreateTicket($title: String!, $description: String!, $category: String!, $priority: String!, $attachments: [Upload!]) {
  createTicket(input: { title: $title, description: $description, category: $category, priority: $priority, attachments: $attachments }) {
    ticket { id title description category priority status }
    errors
  }
}";

const ASSIGN_TICKET: &str = r"
mutation AssignTicket($ticketId: String!) {
  assignTicket(input: { ticketId: $ticketId }) {
    ticket {
      id
      assignedTo { id fullName }
    }
    errors
  }
}";

const ADD_COMMENT: &str = r"
mutation AddComment($ticketId: String!, $body: String!) {
  addComment(input: { ticketId: $ticketId, body: $body }) {
    ticket {
      id
      comments {
        id
        body
        createdAt
        author { id fullName email }
      }
    }
    errors
  }
}";

const RESOLVE_TICKET: &str = r"
mutation ResolveTicket($ticketId: ID!) {
  resolveTicket(input: { ticketId: $ticketId }) {
    success
    errors
  }
}";

const CLOSE_TICKET: &str = r"
mutation CloseTicket($ticketId: ID!) {
  closeTicket(input: { ticketId: $ticketId }) {
    success
    errors
  }
}";

const EXPORT_CLOSED_TICKETS: &str = r"
mutation ExportClosedTickets($startDate: ISO8601DateTime!, $endDate: ISO8601DateTime!) {
  exportClosedTickets(input: { startDate: $startDate, endDate: $endDate }) {
    csvUrl
    filename
    count
    errors
  }
}";

const LOGIN: &str = r"
mutation Login($email: String!, $password: String!) {
  login(input: { email: $email, password: $password }) {
    user { id firstName lastName fullName role email }
    token
    errors
  }
}";

const SIGNUP: &str = r"
mutation Signup($email: String!, $password: String!, $firstName: String!, $lastName: String!) {
  signup(input: { email: $email, password: $password, firstName: $firstName, lastName: $lastName }) {
    user { id firstName lastName fullName role email }
    token
    errors
  }
}";

impl ReadModel {
    /// Field of the read-model in the response `data`.
    #[must_use]
    pub const fn response_field(&self) -> &'static str {
        match self {
            Self::CurrentUser => "currentUser",
            Self::TicketList => "tickets",
            Self::TicketDetail(_) => "ticket",
            Self::TicketStatCount => "ticketStatCount",
        }
    }
}

/// Request body reading `model`.
#[must_use]
pub fn document_for_read_model(model: &ReadModel) -> QueryBody<Value> {
    let (operation_name, query, variables) = match model {
        ReadModel::CurrentUser => ("GetCurrentUser", GET_CURRENT_USER, json!({})),
        ReadModel::TicketList => ("GetTickets", GET_TICKETS, json!({})),
        ReadModel::TicketDetail(id) => ("GetTicket", GET_TICKET, json!({ "id": id })),
        ReadModel::TicketStatCount => ("GetTicketStatCount", GET_TICKET_STAT_COUNT, json!({})),
    };

    QueryBody {
        variables,
        query,
        operation_name,
    }
}

/// Request body running `mutation`.
///
/// Ticket attachments are sent as `null` placeholders; the multipart upload
/// fills them in by position.
#[must_use]
pub fn document_for_mutation(mutation: &Mutation) -> QueryBody<Value> {
    let (operation_name, query, variables) = match mutation {
        Mutation::CreateTicket(ticket) => {
            let mut variables = json!({
                "title": ticket.title,
                "description": ticket.description,
                "category": ticket.category,
                "priority": ticket.priority,
            });
            if !ticket.attachments.is_empty()
                && let Some(map) = variables.as_object_mut()
            {
                map.insert(
                    "attachments".to_string(),
                    Value::Array(vec![Value::Null; ticket.attachments.len()]),
                );
            }
            ("CreateTicket", CREATE_TICKET, variables)
        }
        Mutation::AssignTicket { ticket_id } => (
            "AssignTicket",
            ASSIGN_TICKET,
            json!({ "ticketId": ticket_id }),
        ),
        Mutation::AddComment { ticket_id, body } => (
            "AddComment",
            ADD_COMMENT,
            json!({ "ticketId": ticket_id, "body": body }),
        ),
        Mutation::ResolveTicket { ticket_id } => (
            "ResolveTicket",
            RESOLVE_TICKET,
            json!({ "ticketId": ticket_id }),
        ),
        Mutation::CloseTicket { ticket_id } => (
            "CloseTicket",
            CLOSE_TICKET,
            json!({ "ticketId": ticket_id }),
        ),
        Mutation::ExportClosedTickets {
            start_date,
            end_date,
        } => (
            "ExportClosedTickets",
            EXPORT_CLOSED_TICKETS,
            json!({
                "startDate": start_date.to_rfc3339(),
                "endDate": end_date.to_rfc3339(),
            }),
        ),
        Mutation::Login { email, password } => (
            "Login",
            LOGIN,
            json!({ "email": email, "password": password.expose_secret() }),
        ),
        Mutation::Signup(form) => (
            "Signup",
            SIGNUP,
            json!({
                "email": form.email,
                "password": form.password.expose_secret(),
                "firstName": form.first_name,
                "lastName": form.last_name,
            }),
        ),
    };

    QueryBody {
        variables,
        query,
        operation_name,
    }
}
