//! # entitlement-payments
//!
//! Billing platform adapters for the entitlement cache.
//!
//! ## Fetchers
//!
//! Two `SubscriptionFetcher` implementations are provided:
//!
//! - [`HttpFetcher`] talks to the hosted platform's REST API with a bearer token
//! - [`StripeFetcher`] lists subscriptions through the Stripe API
//!
//! ## Webhooks
//!
//! ```text
//! ┌──────────────┐  signed POST  ┌─────────────────┐  invalidate  ┌──────────────────┐
//! │   Billing    │──────────────▶│ PlatformWebhook │─────────────▶│ EntitlementCache │
//! │   platform   │               │  StripeWebhook  │              │                  │
//! └──────────────┘               └─────────────────┘              └──────────────────┘
//! ```
//!
//! Receivers verify the signature, pick out the customer and mark its
//! record stale. The next access check refetches.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entitlement_payments::{HttpFetcher, PlatformWebhook};
//!
//! let cache = EntitlementCache::new(Arc::new(HttpFetcher::from_env()?), CacheConfig::from_env()?)?;
//! let webhook = PlatformWebhook::from_env(cache.clone())?;
//!
//! // In the HTTP handler:
//! let outcome = webhook.receive(&body, &signature_header)?;
//! ```

mod error;
mod platform;
pub mod signature;
mod subscriptions;
mod webhook;

pub use error::{PaymentError, Result};
pub use platform::{classify_status, HttpFetcher, PlatformConfig, DEFAULT_RETRY_AFTER};
pub use subscriptions::StripeFetcher;
pub use webhook::{
    PlatformEvent, PlatformEventData, PlatformWebhook, StripeWebhook, WebhookOutcome, PLATFORM_SIGNATURE_HEADER,
    STRIPE_SIGNATURE_HEADER,
};
