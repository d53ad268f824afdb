//! Deskline client library.
//!
//! Keeps one helpdesk sign-in consistent across every context sharing a
//! profile, and keeps derived read-models fresh after mutations.
//!
//! # Modules
//!
//! - [`credential_store`] and [`session`] - the stored credential and the
//!   state machine deriving [`AuthState`] from it
//! - [`signal`] - change notifications between contexts of one profile
//! - [`coordinator`] - mutations with read-model invalidation
//! - [`attachments`] - staging and validation of ticket attachments
//! - [`transport`] - the helpdesk GraphQL API
//! - [`client`] - the facade tying these together

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod attachments;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod credential_store;
pub mod error;
pub mod session;
pub mod signal;
pub mod storage;
pub mod transport;

pub use client::{HelpdeskClient, LifecycleEvent};
pub use config::ClientConfig;
pub use error::ClientError;
pub use session::{AuthState, Phase, Session, SessionOptions, Trigger, TriggerOutcome};
pub use signal::Profile;
