//! Deskline Core - Shared types library.
//!
//! This crate provides common types used across all Deskline components:
//! - `client` - Session reconciliation, mutation coordination and transport
//! - `cli` - Command-line front end over the client
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no storage access, no HTTP
//! clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, bearer credentials, identities and ticket mirrors

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
