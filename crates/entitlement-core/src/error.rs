//! Error Types

use std::time::Duration;

use thiserror::Error;

/// Result type alias for entitlement operations
pub type Result<T> = std::result::Result<T, EntitlementError>;

/// Entitlement errors
///
/// `Clone` because a single shared refresh hands the same outcome to
/// every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntitlementError {
    /// Network, DNS or timeout failure talking to the platform
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid or expired platform credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Platform rate limit hit
    #[error("Rate limited: retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// The platform does not know this customer
    #[error("Customer not found: {0}")]
    NotFound(String),

    /// Last-known record is past the hard ceiling and refresh failed
    #[error(
        "Record for {customer_id} is {}s old and could not be refreshed: {source}",
        .age.as_secs()
    )]
    Stale {
        customer_id: String,
        age: Duration,
        #[source]
        source: Box<EntitlementError>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EntitlementError {
    /// Transient failures the caller may retry
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited { .. } => true,
            Self::Stale { source, .. } => source.is_retryable(),
            Self::Auth(_) | Self::NotFound(_) | Self::Config(_) => false,
        }
    }

    /// Failures that should halt retries until an operator intervenes
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Auth(_) | Self::Config(_) => true,
            Self::Stale { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// `NotFound` means "no entitlement", not a failure to retry
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Retry hint carried by a rate-limit error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            Self::Stale { source, .. } => source.retry_after(),
            _ => None,
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            Self::Transport(_) => "The billing service is unreachable. Please try again.",
            Self::Auth(_) => "Billing service credentials are invalid.",
            Self::RateLimited { .. } => "Too many billing lookups. Please wait a moment.",
            Self::NotFound(_) => "No subscription found for this account.",
            Self::Stale { .. } => "Subscription status could not be verified.",
            Self::Config(_) => "Service configuration error.",
        }
    }
}
