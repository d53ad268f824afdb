//! Current-user identity and its cached snapshot.

use serde::{Deserialize, Serialize};

use super::id::UserId;
use super::status::UserRole;

/// Server-authoritative record describing the current user.
///
/// Field names follow the helpdesk API (`currentUser`, `login.user`,
/// `signup.user`), which serializes in camelCase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: UserId,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    pub role: UserRole,
    pub email: String,
}

impl Identity {
    /// Best display name: full name, then first + last, then email.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(full) = self.full_name.as_deref().filter(|s| !s.trim().is_empty()) {
            return full.to_owned();
        }

        let joined = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if joined.is_empty() {
            self.email.clone()
        } else {
            joined
        }
    }
}

/// Locally cached copy of the authenticated identity.
///
/// `persisted` is `true` when the snapshot was restored from durable storage
/// and has not been confirmed by the server since; a fresh fetch or login
/// produces a snapshot with `persisted == false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub identity: Identity,
    #[serde(skip)]
    pub persisted: bool,
}

impl SessionSnapshot {
    /// Snapshot of an identity the server just confirmed.
    #[must_use]
    pub const fn confirmed(identity: Identity) -> Self {
        Self {
            identity,
            persisted: false,
        }
    }

    /// Snapshot restored from durable storage.
    #[must_use]
    pub const fn restored(identity: Identity) -> Self {
        Self {
            identity,
            persisted: true,
        }
    }

    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.identity.id
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            id: UserId::new("1"),
            first_name: Some("Jane".to_string()),
            last_name: Some("Doe".to_string()),
            full_name: None,
            role: UserRole::Customer,
            email: "jane@example.com".to_string(),
        }
    }

    #[test]
    fn test_identity_decodes_api_payload() {
        let json = r#"{
            "id": "9",
            "firstName": "Jane",
            "lastName": "Doe",
            "fullName": "Jane Doe",
            "role": "agent",
            "email": "jane@example.com"
        }"#;

        let parsed: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.id.as_str(), "9");
        assert_eq!(parsed.role, UserRole::Agent);
        assert_eq!(parsed.display_name(), "Jane Doe");
    }

    #[test]
    fn test_display_name_falls_back() {
        assert_eq!(identity().display_name(), "Jane Doe");

        let bare = Identity {
            first_name: None,
            last_name: None,
            ..identity()
        };
        assert_eq!(bare.display_name(), "jane@example.com");
    }

    #[test]
    fn test_persisted_flag_is_not_serialized() {
        let snapshot = SessionSnapshot::restored(identity());
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("persisted"));

        let back: SessionSnapshot = serde_json::from_str(&json).unwrap();
        assert!(!back.persisted);
        assert_eq!(back.identity, snapshot.identity);
    }
}
