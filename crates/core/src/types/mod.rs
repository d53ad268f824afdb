//! Core types for Deskline.
//!
//! This module provides type-safe wrappers for the helpdesk domain.

pub mod credential;
pub mod id;
pub mod identity;
pub mod status;
pub mod ticket;

pub use credential::{CREDENTIAL_TTL_HOURS, Credential, CredentialRecord, credential_ttl};
pub use id::*;
pub use identity::{Identity, SessionSnapshot};
pub use status::*;
pub use ticket::*;
