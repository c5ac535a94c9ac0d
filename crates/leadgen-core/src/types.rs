//! Shared types used across the leadgen workspace.
//!
//! This module defines the newtypes that flow through the reveal pipeline:
//! the identifiers submitted for revelation, the provider-issued correlation
//! keys that link a submission to its webhook delivery, and timestamps.

use crate::error::LeadgenError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Opaque identifier naming a contact to reveal.
///
/// An identifier is an email address, a profile URL or a provider UID. It is
/// never interpreted beyond [`Identifier::kind`]; the provider echoes it back
/// in webhook deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

/// Coarse classification of an [`Identifier`], used for logging and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    /// Email address
    Email,
    /// Social/profile URL
    ProfileUrl,
    /// Provider-assigned UID or any other opaque token
    Uid,
}

impl Identifier {
    /// Create a new `Identifier`, trimming surrounding whitespace.
    ///
    /// # Errors
    /// Returns error if the identifier is empty after trimming.
    pub fn new(id: impl Into<String>) -> Result<Self, LeadgenError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(LeadgenError::Validation(
                "invalid identifier: must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classify the identifier.
    #[must_use]
    pub fn kind(&self) -> IdentifierKind {
        static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
        let email = EMAIL_REGEX
            .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));

        if email.is_match(&self.0) {
            IdentifierKind::Email
        } else if self.0.starts_with("http://") || self.0.starts_with("https://") {
            IdentifierKind::ProfileUrl
        } else {
            IdentifierKind::Uid
        }
    }

    /// Loose equality used when matching provider echoes.
    ///
    /// Providers may lowercase emails or strip whitespace when echoing.
    #[must_use]
    pub fn matches_echo(&self, echo: &str) -> bool {
        self.0.eq_ignore_ascii_case(echo.trim())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = LeadgenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

/// Provider-issued token linking an outbound submission to its webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Create a new `CorrelationKey`.
    ///
    /// # Errors
    /// Returns error if the key is empty after trimming.
    pub fn new(key: impl Into<String>) -> Result<Self, LeadgenError> {
        let key = key.into();
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(LeadgenError::Validation(
                "invalid correlation key: must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for CorrelationKey {
    type Error = LeadgenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CorrelationKey> for String {
    fn from(key: CorrelationKey) -> Self {
        key.0
    }
}

/// Wrapper around `chrono::DateTime<Utc>` for consistent timestamp handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp representing the current moment.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Get the inner `DateTime<Utc>`.
    #[must_use]
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Parse a timestamp from an RFC3339 string.
    pub fn from_rfc3339(s: &str) -> Result<Self, LeadgenError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|e| LeadgenError::Validation(format!("invalid timestamp: {e}")))
    }

    /// Format as RFC3339 string.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_trims_and_rejects_empty() {
        let id = Identifier::new("  jane@example.com \n").expect("valid identifier");
        assert_eq!(id.as_str(), "jane@example.com");

        assert!(Identifier::new("").is_err());
        assert!(Identifier::new("   ").is_err());
    }

    #[test]
    fn test_identifier_kind() {
        let cases = [
            ("jane@example.com", IdentifierKind::Email),
            ("https://www.linkedin.com/in/jane", IdentifierKind::ProfileUrl),
            ("http://example.com/p/1", IdentifierKind::ProfileUrl),
            ("148fcfb5a0e1453b93a1a5f5e4b1b7d0", IdentifierKind::Uid),
            ("not an email@", IdentifierKind::Uid),
        ];

        for (raw, expected) in cases {
            let id = Identifier::new(raw).expect("valid identifier");
            assert_eq!(id.kind(), expected, "kind mismatch for {raw}");
        }
    }

    #[test]
    fn test_identifier_matches_echo() {
        let id = Identifier::new("Jane.Doe@Example.com").expect("valid identifier");
        assert!(id.matches_echo("jane.doe@example.com"));
        assert!(id.matches_echo(" JANE.DOE@EXAMPLE.COM "));
        assert!(!id.matches_echo("john@example.com"));
    }

    #[test]
    fn test_identifier_serde_validates() {
        let id: Identifier = serde_json::from_str("\"jane@example.com\"").expect("deserialize");
        assert_eq!(id.as_str(), "jane@example.com");
        assert_eq!(serde_json::to_string(&id).expect("serialize"), "\"jane@example.com\"");

        assert!(serde_json::from_str::<Identifier>("\"  \"").is_err());
    }

    #[test]
    fn test_correlation_key() {
        let key = CorrelationKey::new("10452").expect("valid key");
        assert_eq!(key.as_str(), "10452");
        assert_eq!(key.to_string(), "10452");
        assert!(CorrelationKey::new("").is_err());
    }

    #[test]
    fn test_timestamp_rfc3339() {
        let ts = Timestamp::from_rfc3339("2026-02-17T12:00:00Z").expect("parse timestamp");
        let parsed = Timestamp::from_rfc3339(&ts.to_rfc3339()).expect("round trip");
        assert_eq!(ts, parsed);
        assert!(Timestamp::from_rfc3339("yesterday").is_err());
    }
}
