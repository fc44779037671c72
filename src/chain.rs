//! Ordered-alternates resolver chain
//!
//! Every resolution step obtains its data through a [`ResolverChain`]: an
//! ordered list of [`Alternate`] sources for the same kind of data. Each
//! alternate is attempted once, bounded by a per-attempt timeout, and the
//! first result that passes the caller's validity check wins. Failures and
//! timeouts never escape the chain; when every alternate is exhausted the
//! caller receives [`ChainOutcome::Exhausted`] carrying the last error, the
//! last structurally valid but rejected value, and the chain's synthetic
//! fallback if one was configured.
//!
//! Steps then normalise the chain outcome into an [`Outcome`] so the merge
//! step never looks at raw responses.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::SourceError;

/// One source of data in a resolver chain
///
/// `I` is the query the chain is resolving (a domain name, an address, a
/// record query) and `T` the normalised value the source produces.
#[async_trait]
pub trait Alternate<I: ?Sized + Sync, T>: Send + Sync {
    /// Name used in logs and in [`ChainOutcome::Resolved::source`]
    fn name(&self) -> &str;

    /// Query this source once
    async fn attempt(&self, input: &I) -> Result<T, SourceError>;
}

type Fallback<I, T> = Arc<dyn Fn(&I) -> T + Send + Sync>;

/// Result of running a chain to completion
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome<T> {
    /// An alternate produced a valid value
    Resolved { value: T, source: String },
    /// Every alternate failed or produced an invalid value
    Exhausted {
        last_error: SourceError,
        /// Last value that parsed but failed the validity check
        partial: Option<T>,
        /// Synthetic fallback, when the chain defines one
        fallback: Option<T>,
    },
}

impl<T> ChainOutcome<T> {
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, ChainOutcome::Resolved { .. })
    }

    /// Resolved value, or the last error when exhausted
    pub fn into_result(self) -> Result<T, SourceError> {
        match self {
            ChainOutcome::Resolved { value, .. } => Ok(value),
            ChainOutcome::Exhausted { last_error, .. } => Err(last_error),
        }
    }

    /// Normalise into a step outcome, using `default` when nothing else is left
    pub fn into_outcome<F>(self, default: F) -> Outcome<T>
    where
        F: FnOnce() -> T,
    {
        match self {
            ChainOutcome::Resolved { value, .. } => Outcome::Success(value),
            ChainOutcome::Exhausted {
                partial: Some(value),
                ..
            } => Outcome::DefaultOnly(value),
            ChainOutcome::Exhausted {
                last_error,
                fallback,
                ..
            } => Outcome::Degraded {
                value: fallback.unwrap_or_else(default),
                cause: last_error,
            },
        }
    }
}

/// Normalised result of one resolution step
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// Real data from a source
    Success(T),
    /// A source answered but only with default values
    DefaultOnly(T),
    /// All sources failed; the value is a default, snapshot or placeholder
    Degraded { value: T, cause: SourceError },
}

impl<T> Outcome<T> {
    pub fn value(&self) -> &T {
        match self {
            Outcome::Success(value) | Outcome::DefaultOnly(value) => value,
            Outcome::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Outcome::Success(value) | Outcome::DefaultOnly(value) => value,
            Outcome::Degraded { value, .. } => value,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Human-readable degradation note for `category`, if any
    pub fn degradation(&self, category: &str) -> Option<String> {
        match self {
            Outcome::Success(_) => None,
            Outcome::DefaultOnly(_) => Some(format!("{}: sources returned only default values", category)),
            Outcome::Degraded { cause, .. } => Some(format!("{}: {}", category, cause)),
        }
    }
}

/// Ordered list of alternates with a per-attempt timeout
pub struct ResolverChain<I: ?Sized + Sync, T> {
    label: String,
    alternates: Vec<Arc<dyn Alternate<I, T>>>,
    attempt_timeout: Duration,
    fallback: Option<Fallback<I, T>>,
}

impl<I: ?Sized + Sync, T> Clone for ResolverChain<I, T> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            alternates: self.alternates.clone(),
            attempt_timeout: self.attempt_timeout,
            fallback: self.fallback.clone(),
        }
    }
}

impl<I: ?Sized + Sync, T: Send> ResolverChain<I, T> {
    pub fn new(label: impl Into<String>, attempt_timeout: Duration) -> Self {
        Self {
            label: label.into(),
            alternates: Vec::new(),
            attempt_timeout,
            fallback: None,
        }
    }

    /// Appends an alternate; alternates are attempted in insertion order
    pub fn with_alternate(mut self, alternate: Arc<dyn Alternate<I, T>>) -> Self {
        self.alternates.push(alternate);
        self
    }

    /// Sets the synthetic value reported when every alternate is exhausted
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&I) -> T + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.alternates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alternates.is_empty()
    }

    /// Attempts each alternate in order until one yields a valid value
    pub async fn resolve<V>(&self, input: &I, is_valid: V) -> ChainOutcome<T>
    where
        V: Fn(&T) -> bool + Send,
    {
        let mut last_error = None;
        let mut partial = None;

        for alternate in &self.alternates {
            let name = alternate.name().to_string();
            debug!("{}: trying {}", self.label, name);

            match timeout(self.attempt_timeout, alternate.attempt(input)).await {
                Ok(Ok(value)) if is_valid(&value) => {
                    debug!("{}: resolved by {}", self.label, name);
                    return ChainOutcome::Resolved {
                        value,
                        source: name,
                    };
                }
                Ok(Ok(value)) => {
                    debug!("{}: {} returned only default values", self.label, name);
                    partial = Some(value);
                    last_error = Some(SourceError::default_only(name));
                }
                Ok(Err(err)) => {
                    warn!("{}: {}", self.label, err);
                    last_error = Some(err);
                }
                Err(_) => {
                    warn!(
                        "{}: {} timed out after {:?}",
                        self.label, name, self.attempt_timeout
                    );
                    last_error = Some(SourceError::unavailable(
                        name,
                        format!("timed out after {:?}", self.attempt_timeout),
                    ));
                }
            }
        }

        let last_error = last_error.unwrap_or_else(|| {
            SourceError::unavailable(self.label.clone(), "no alternates configured")
        });
        ChainOutcome::Exhausted {
            last_error,
            partial,
            fallback: self.fallback.as_ref().map(|fallback| fallback(input)),
        }
    }
}
