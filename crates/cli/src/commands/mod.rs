//! Command implementations.

pub mod auth;
pub mod tickets;

use deskline_client::ClientError;
use serde::Serialize;
use thiserror::Error;

/// Errors that end a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid date: {0}. Expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Attachments rejected: {}", .0.join("; "))]
    AttachmentsRejected(Vec<String>),

    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("Not signed in. Run `dl login` first.")]
    NotSignedIn,
}

/// Where command results go.
pub struct Output {
    json: bool,
}

impl Output {
    pub const fn new(json: bool) -> Self {
        Self { json }
    }

    /// Print `value` as JSON, or the text `human` renders.
    #[allow(clippy::print_stdout)]
    pub fn emit<S: Serialize>(
        &self,
        value: &S,
        human: impl FnOnce(&S) -> String,
    ) -> Result<(), CliError> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", human(value));
        }
        Ok(())
    }

    /// Print a status line; suppressed in JSON mode.
    #[allow(clippy::print_stdout)]
    pub fn note(&self, text: &str) {
        if !self.json {
            println!("{text}");
        }
    }
}
