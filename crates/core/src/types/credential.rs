//! Bearer credential types.
//!
//! A [`Credential`] is the opaque token the helpdesk API hands out at login or
//! signup. It is never mutated in place: a new login produces a new value that
//! supersedes the old one.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Lifetime of a credential, in hours, from the moment it is written.
pub const CREDENTIAL_TTL_HOURS: i64 = 24;

/// Lifetime of a credential from the moment it is written.
#[must_use]
pub fn credential_ttl() -> Duration {
    Duration::hours(CREDENTIAL_TTL_HOURS)
}

/// Bearer credential proving an authenticated session to the remote API.
///
/// Two credentials are the same when they carry the same bearer value; the
/// timestamps are stamped by the store on write and do not take part in
/// equality.
#[derive(Clone)]
pub struct Credential {
    token: SecretString,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    secure: bool,
}

impl Credential {
    /// Create a credential issued now with the standard TTL.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self::issued_at(token, Utc::now())
    }

    /// Create a credential issued at `now` with the standard TTL.
    #[must_use]
    pub fn issued_at(token: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            issued_at: now,
            expires_at: now + credential_ttl(),
            secure: false,
        }
    }

    /// Re-stamp issuance, expiry and transport restriction.
    ///
    /// Used by the credential store on every write.
    #[must_use]
    pub fn stamped(mut self, now: DateTime<Utc>, secure: bool) -> Self {
        self.issued_at = now;
        self.expires_at = now + credential_ttl();
        self.secure = secure;
        self
    }

    /// Expose the bearer value for an `Authorization` header.
    #[must_use]
    pub fn expose_token(&self) -> &str {
        self.token.expose_secret()
    }

    #[must_use]
    pub const fn issued(&self) -> DateTime<Utc> {
        self.issued_at
    }

    #[must_use]
    pub const fn expires(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the credential may only be read over encrypted transport.
    #[must_use]
    pub const fn is_restricted(&self) -> bool {
        self.secure
    }

    /// Whether the credential has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Convert into the persisted record.
    #[must_use]
    pub fn to_record(&self) -> CredentialRecord {
        CredentialRecord {
            token: self.token.expose_secret().to_owned(),
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            secure: self.secure,
        }
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.token.expose_secret() == other.token.expose_secret()
    }
}

impl Eq for Credential {}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("secure", &self.secure)
            .finish()
    }
}

/// Persisted form of a [`Credential`].
///
/// Only the credential store should hold one of these; everything else works
/// with [`Credential`], which redacts the token in `Debug` output.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub secure: bool,
}

impl From<CredentialRecord> for Credential {
    fn from(record: CredentialRecord) -> Self {
        Self {
            token: SecretString::from(record.token),
            issued_at: record.issued_at,
            expires_at: record.expires_at,
            secure: record.secure,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_credential_expires_after_ttl() {
        let now = Utc::now();
        let credential = Credential::issued_at("tok", now);

        assert!(!credential.is_expired_at(now));
        assert!(!credential.is_expired_at(now + Duration::hours(23)));
        assert!(credential.is_expired_at(now + Duration::hours(24)));
    }

    #[test]
    fn test_equality_ignores_timestamps() {
        let now = Utc::now();
        let a = Credential::issued_at("tok", now);
        let b = Credential::issued_at("tok", now - Duration::hours(3)).stamped(now, true);

        assert_eq!(a, b);
        assert_ne!(a, Credential::issued_at("other", now));
    }

    #[test]
    fn test_debug_redacts_token() {
        let credential = Credential::new("super_secret_bearer");
        let debug_output = format!("{credential:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_bearer"));
    }

    #[test]
    fn test_record_preserves_restriction() {
        let credential = Credential::new("tok").stamped(Utc::now(), true);
        let json = serde_json::to_string(&credential.to_record()).unwrap();
        let restored: Credential = serde_json::from_str::<CredentialRecord>(&json)
            .unwrap()
            .into();

        assert!(restored.is_restricted());
        assert_eq!(restored.expose_token(), "tok");
    }
}
