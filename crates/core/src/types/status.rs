//! Role and ticket status mirrors.
//!
//! The helpdesk server owns the ticket lifecycle; these enums only mirror the
//! strings it sends. Values this client does not know about are kept verbatim
//! in an `Other` variant instead of failing deserialization.

use serde::{Deserialize, Serialize};

/// Turn a `snake_case` wire value into a label: `in_progress` -> `In Progress`.
#[must_use]
pub fn humanize(text: &str) -> String {
    text.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect::<String>()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Declares a string-mirrored enum with an `Other(String)` fallback.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
            /// A value this client does not recognise, kept verbatim.
            Other(String),
        }

        impl $name {
            /// Wire representation.
            #[must_use]
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $wire,)+
                    Self::Other(value) => value.as_str(),
                }
            }

            /// Human-readable label.
            #[must_use]
            pub fn label(&self) -> String {
                humanize(self.as_str())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                match value.as_str() {
                    $($wire => Self::$variant,)+
                    _ => Self::Other(value),
                }
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::from(value.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                match value {
                    $name::Other(value) => value,
                    known => known.as_str().to_owned(),
                }
            }
        }
    };
}

wire_enum! {
    /// Role of the current user.
    pub enum UserRole {
        Customer => "customer",
        Agent => "agent",
        Admin => "admin",
    }
}

wire_enum! {
    /// Ticket lifecycle status as reported by the server.
    pub enum TicketStatus {
        Open => "open",
        InProgress => "in_progress",
        WaitingOnCustomer => "waiting_on_customer",
        Resolved => "resolved",
        Closed => "closed",
        Reopened => "reopened",
    }
}

wire_enum! {
    /// Ticket priority.
    pub enum TicketPriority {
        Low => "low",
        Normal => "normal",
        High => "high",
        Urgent => "urgent",
    }
}

wire_enum! {
    /// Ticket category offered by the creation form.
    pub enum TicketCategory {
        TechnicalIssues => "technical_issues",
        Billing => "billing",
        Account => "account",
        FeatureRequest => "feature_request",
        Feedback => "feedback",
        OtherIssue => "other",
    }
}

impl UserRole {
    /// Agents and admins work tickets; customers open them.
    #[must_use]
    pub const fn is_staff(&self) -> bool {
        matches!(self, Self::Agent | Self::Admin)
    }
}
