//! Ticket commands.
//!
//! # Usage
//!
//! ```bash
//! dl tickets
//! dl ticket 42
//! dl stats
//! dl create -t "Refund" -d "Charged twice" -c billing -p high --attach receipt.pdf
//! dl export --from 2026-09-01 --to 2026-09-30
//! ```

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use deskline_client::HelpdeskClient;
use deskline_client::attachments::{AttachmentStagingBuffer, StagedAttachment, format_file_size};
use deskline_core::{Ticket, TicketCategory, TicketId, TicketPriority};

use super::{CliError, Output};

/// A ticket to open.
pub struct Draft {
    pub title: String,
    pub description: String,
    pub category: TicketCategory,
    pub priority: TicketPriority,
    pub attachments: Vec<PathBuf>,
}

fn summary(ticket: &Ticket) -> String {
    let number = ticket.number.as_deref().unwrap_or(ticket.id.as_str());
    let mut line = format!("#{number} [{}] {}", ticket.status.label(), ticket.title);
    if let Some(priority) = &ticket.priority {
        let _ = write!(line, " ({})", priority.label());
    }
    if let Some(assignee) = &ticket.assigned_to {
        let _ = write!(line, " -> {}", assignee.display_name());
    }
    line
}

fn detail(ticket: &Ticket) -> String {
    let mut text = summary(ticket);
    if let Some(category) = &ticket.category {
        let _ = write!(text, "\nCategory: {}", category.label());
    }
    if let Some(customer) = &ticket.customer {
        let _ = write!(text, "\nCustomer: {}", customer.display_name());
    }
    if let Some(description) = &ticket.description {
        let _ = write!(text, "\n\n{description}");
    }
    for attachment in &ticket.attachments {
        let _ = write!(text, "\n  attachment: {} {}", attachment.filename, attachment.url);
    }
    for comment in &ticket.comments {
        let author = comment
            .author
            .as_ref()
            .map_or_else(|| "unknown".to_string(), deskline_core::Person::display_name);
        let _ = write!(text, "\n\n{author}: {}", comment.body);
    }

    let actions: Vec<&str> = [
        (ticket.can_resolve, "resolve"),
        (ticket.can_close, "close"),
        (ticket.agent_can_comment || ticket.customer_can_comment, "comment"),
    ]
    .into_iter()
    .filter_map(|(allowed, action)| allowed.then_some(action))
    .collect();
    if !actions.is_empty() {
        let _ = write!(text, "\n\nAvailable: {}", actions.join(", "));
    }
    text
}

fn parse_day(value: &str, end_of_day: bool) -> Result<DateTime<Utc>, CliError> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| CliError::InvalidDate(value.to_string()))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|naive| naive.and_utc())
        .ok_or_else(|| CliError::InvalidDate(value.to_string()))
}

pub async fn list(client: &HelpdeskClient, output: &Output) -> Result<(), CliError> {
    let tickets = client.tickets().await?;
    output.emit(&tickets, |tickets| {
        if tickets.is_empty() {
            return "No tickets".to_string();
        }
        tickets.iter().map(summary).collect::<Vec<_>>().join("\n")
    })
}

pub async fn show(client: &HelpdeskClient, output: &Output, id: &str) -> Result<(), CliError> {
    match client.ticket(&TicketId::new(id)).await? {
        Some(ticket) => output.emit(&ticket, detail),
        None => {
            output.note(&format!("Ticket {id} not found"));
            Ok(())
        }
    }
}

pub async fn stats(client: &HelpdeskClient, output: &Output) -> Result<(), CliError> {
    let stats = client.ticket_stats().await?;
    output.emit(&stats, |stats| {
        format!(
            "Total: {}  Open: {}  Pending: {}  Completed: {}",
            stats.total, stats.open, stats.pending, stats.completed
        )
    })
}

pub async fn create(client: &HelpdeskClient, output: &Output, draft: Draft) -> Result<(), CliError> {
    let candidates = draft
        .attachments
        .into_iter()
        .map(StagedAttachment::from_path)
        .collect::<Result<Vec<_>, _>>()?;

    let mut buffer = AttachmentStagingBuffer::new();
    let outcome = buffer.add(candidates);
    if !outcome.rejected.is_empty() {
        return Err(CliError::AttachmentsRejected(outcome.messages()));
    }
    for attachment in buffer.staged() {
        tracing::debug!(
            name = %attachment.name,
            size = %format_file_size(attachment.byte_size),
            "Attaching file"
        );
    }

    let ticket = client
        .create_ticket(
            &draft.title,
            &draft.description,
            draft.category,
            draft.priority,
            &mut buffer,
        )
        .await?;
    output.emit(&ticket, |ticket| format!("Created {}", summary(ticket)))
}

pub async fn assign(client: &HelpdeskClient, output: &Output, id: &str) -> Result<(), CliError> {
    let assignee = client.assign_ticket(&TicketId::new(id)).await?;
    output.emit(&assignee, |assignee| match assignee {
        Some(person) => format!("Ticket {id} assigned to {}", person.display_name()),
        None => format!("Ticket {id} assigned"),
    })
}

pub async fn comment(
    client: &HelpdeskClient,
    output: &Output,
    id: &str,
    body: &str,
) -> Result<(), CliError> {
    let comments = client.add_comment(&TicketId::new(id), body).await?;
    output.emit(&comments, |comments| {
        format!("Comment added to ticket {id} ({} total)", comments.len())
    })
}

pub async fn resolve(client: &HelpdeskClient, id: &str) -> Result<(), CliError> {
    client.resolve_ticket(&TicketId::new(id)).await?;
    tracing::info!(ticket_id = id, "Ticket resolved");
    Ok(())
}

pub async fn close(client: &HelpdeskClient, id: &str) -> Result<(), CliError> {
    client.close_ticket(&TicketId::new(id)).await?;
    tracing::info!(ticket_id = id, "Ticket closed");
    Ok(())
}

pub async fn export(
    client: &HelpdeskClient,
    output: &Output,
    from: &str,
    to: &str,
) -> Result<(), CliError> {
    let export = client
        .export_closed_tickets(parse_day(from, false)?, parse_day(to, true)?)
        .await?;
    output.emit(&export, |export| match &export.csv_url {
        Some(url) => format!("Exported {} closed tickets: {url}", export.count),
        None => format!("No closed tickets between {from} and {to}"),
    })
}
