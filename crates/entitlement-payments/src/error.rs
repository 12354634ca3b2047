//! Payment Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Errors raised by the billing-platform adapters outside the cache path
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PaymentError {
    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            PaymentError::WebhookSignature(_) => "Invalid webhook signature.",
            PaymentError::WebhookParse(_) => "Malformed webhook payload.",
            PaymentError::Config(_) => "Service configuration error.",
        }
    }
}
