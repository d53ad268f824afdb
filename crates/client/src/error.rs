//! Unified error handling with Sentry integration.
//!
//! Provides `ClientError`, the error every public client operation returns.
//! Its variants follow how the error propagates:
//!
//! - `Authentication` already forced session cleanup before it reached the
//!   caller.
//! - `TransientNetwork` is retryable and never touched auth state.
//! - `Validation` carries user-facing messages.

use thiserror::Error;

use crate::config::ConfigError;
use crate::storage::StorageError;
use crate::transport::{ErrorClass, TransportError};

/// Client-level error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The API rejected the credential.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Network trouble; safe to retry.
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// The server or local checks refused the request.
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The operation needs an authenticated session.
    #[error("Not signed in")]
    NotAuthenticated,

    /// Durable storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// User-facing messages for validation failures.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::Validation(messages) => messages.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(error: TransportError) -> Self {
        match error.class() {
            ErrorClass::Authentication => Self::Authentication(error.to_string()),
            ErrorClass::Transient => Self::TransientNetwork(error.to_string()),
            ErrorClass::Application => match error {
                TransportError::GraphQL(errors) => {
                    Self::Validation(errors.into_iter().map(|e| e.message).collect())
                }
                other => Self::Validation(vec![other.to_string()]),
            },
        }
    }
}

/// Set the Sentry user context.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for session transitions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("auth", "Session verified", Some(&[("user_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
