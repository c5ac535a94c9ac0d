//! Reveal pipeline data model.
//!
//! These types describe what flows between the receiver, the pending table,
//! the orchestrator and the aggregator. Wire formats of the provider live in
//! [`crate::receiver`] and [`crate::provider`].

use leadgen_core::{CorrelationKey, Identifier, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Contact fields returned for a successful reveal.
///
/// The provider's candidate object is kept as-is; accessors read the common
/// fields without forcing a schema on the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Contact(Map<String, Value>);

impl Contact {
    /// Wrap a candidate object.
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Raw candidate fields.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Provider UID of the candidate.
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        self.0.get("uid").and_then(Value::as_str)
    }

    /// Full name of the candidate.
    #[must_use]
    pub fn full_name(&self) -> Option<&str> {
        self.0.get("fullName").and_then(Value::as_str)
    }

    /// Email addresses listed in the candidate's contacts.
    #[must_use]
    pub fn emails(&self) -> Vec<&str> {
        self.contacts_of_type("email")
    }

    /// Phone numbers listed in the candidate's contacts.
    #[must_use]
    pub fn phones(&self) -> Vec<&str> {
        self.contacts_of_type("phone")
    }

    fn contacts_of_type(&self, kind: &str) -> Vec<&str> {
        self.0
            .get("contacts")
            .and_then(Value::as_array)
            .map(|contacts| {
                contacts
                    .iter()
                    .filter(|c| c.get("type").and_then(Value::as_str) == Some(kind))
                    .filter_map(|c| c.get("value").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Terminal outcome for one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RevealOutcome {
    /// Contact details were revealed
    Success {
        /// Revealed contact fields
        contact: Contact,
    },
    /// Provider could not reveal the identifier
    Failed,
    /// Provider ran out of credits for this identifier
    CreditsExhausted,
    /// Provider gave up waiting on its own sources
    Timeout,
    /// Provider flagged the identifier as a repeated query
    DuplicateQuery,
}

impl RevealOutcome {
    /// Check if the outcome carries revealed contact details.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Short label used in logs and reports.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failed => "failed",
            Self::CreditsExhausted => "credits_exhausted",
            Self::Timeout => "timeout",
            Self::DuplicateQuery => "duplicate_query",
        }
    }
}

/// One resolved identifier's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackItem {
    /// The identifier as submitted (or as echoed by the provider)
    pub identifier: Identifier,
    /// What happened to it
    pub outcome: RevealOutcome,
}

impl CallbackItem {
    /// Create a new callback item.
    #[must_use]
    pub fn new(identifier: Identifier, outcome: RevealOutcome) -> Self {
        Self {
            identifier,
            outcome,
        }
    }

    /// Contact details, when the reveal succeeded.
    #[must_use]
    pub fn contact(&self) -> Option<&Contact> {
        match &self.outcome {
            RevealOutcome::Success { contact } => Some(contact),
            _ => None,
        }
    }
}

/// Lifecycle status of a registered reveal batch.
///
/// Only accepted submissions are registered, so failures are carried by the
/// orchestrator's sub-batch status rather than here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Submitted, no results yet
    Pending,
    /// Some identifiers have terminal results
    Partial,
    /// Every identifier has a terminal result
    Resolved,
    /// Deadline elapsed before full resolution
    TimedOut,
}

impl BatchStatus {
    /// Whether the batch will not change any more.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::TimedOut)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Partial => write!(f, "Partial"),
            Self::Resolved => write!(f, "Resolved"),
            Self::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// Final state of a batch handed to its completion handler.
#[derive(Debug, Clone)]
pub struct CompletedBatch {
    /// Correlation key of the batch
    pub key: CorrelationKey,
    /// `Resolved` or `TimedOut`
    pub status: BatchStatus,
    /// Terminal items in submission order
    pub items: Vec<CallbackItem>,
    /// Identifiers that never received a terminal item
    pub missing: Vec<Identifier>,
    /// When the batch was registered
    pub submitted_at: Timestamp,
    /// When the batch completed
    pub completed_at: Timestamp,
}
