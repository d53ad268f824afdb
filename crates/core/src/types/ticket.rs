//! Ticket read-model payloads.
//!
//! These mirror what the helpdesk API returns for `tickets`, `ticket(id)` and
//! `ticketStatCount`. Permission flags are reported by the server and never
//! derived on the client.

use serde::{Deserialize, Serialize};

use super::id::{AttachmentId, CommentId, TicketId, UserId};
use super::status::{TicketCategory, TicketPriority, TicketStatus, UserRole};

/// A user referenced from a ticket (customer, assignee, comment author).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: UserId,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Option<UserRole>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Person {
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(full) = &self.full_name {
            return full.clone();
        }
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// File attached to a ticket on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketAttachment {
    pub id: AttachmentId,
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub byte_size: Option<u64>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub body: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub author: Option<Person>,
}

/// A ticket as returned by the list and detail queries.
///
/// The list query omits comments and permission flags; they default to empty
/// and `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: TicketId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    pub status: TicketStatus,
    #[serde(default)]
    pub priority: Option<TicketPriority>,
    #[serde(default)]
    pub category: Option<TicketCategory>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub first_response_at: Option<String>,
    #[serde(default)]
    pub reopened_at: Option<String>,
    #[serde(default)]
    pub agent_has_replied: bool,
    #[serde(default)]
    pub customer: Option<Person>,
    #[serde(default)]
    pub assigned_to: Option<Person>,
    #[serde(default)]
    pub attachments: Vec<TicketAttachment>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub can_close: bool,
    #[serde(default)]
    pub can_resolve: bool,
    #[serde(default)]
    pub agent_can_comment: bool,
    #[serde(default)]
    pub customer_can_comment: bool,
}

/// Aggregate ticket counts shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TicketStatCount {
    pub total: u64,
    pub open: u64,
    pub pending: u64,
    pub completed: u64,
}

/// Result of the closed-ticket CSV export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTicketExport {
    #[serde(default)]
    pub csv_url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub count: u64,
}
