//! Error types for domain intelligence lookups
//!
//! Every external source reports failures through [`SourceError`]. These are
//! caught at the resolver chain boundary and turned into "try the next
//! alternate" or a degraded default; they never reach the caller of
//! `DomainAnalyzer::analyze`. Store failures are reported through
//! [`PersistenceError`] and are logged and swallowed by the cache manager.

use thiserror::Error;

/// Failure of a single external information source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Network failure or timeout
    #[error("{source_name} unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    /// Non-success status, rate limited or blocked
    #[error("{source_name} rejected the request: {reason}")]
    Rejected { source_name: String, reason: String },

    /// Response could not be parsed or had an unexpected shape
    #[error("{source_name} returned a malformed response: {reason}")]
    Malformed { source_name: String, reason: String },

    /// Structurally valid response carrying no real information
    #[error("{source_name} returned only default values")]
    DefaultOnly { source_name: String },
}

impl SourceError {
    pub fn unavailable(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn rejected(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Rejected {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Malformed {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn default_only(source_name: impl Into<String>) -> Self {
        Self::DefaultOnly {
            source_name: source_name.into(),
        }
    }

    /// Name of the source that produced this error
    pub fn source_name(&self) -> &str {
        match self {
            Self::Unavailable { source_name, .. }
            | Self::Rejected { source_name, .. }
            | Self::Malformed { source_name, .. }
            | Self::DefaultOnly { source_name } => source_name,
        }
    }

    /// True when the source answered but had nothing useful to say
    #[must_use]
    pub fn is_default_only(&self) -> bool {
        matches!(self, Self::DefaultOnly { .. })
    }
}

/// Durable store failure
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
