//! Application State

use std::sync::Arc;

use entitlement_core::EntitlementCache;
use entitlement_payments::{PlatformWebhook, StripeWebhook};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Entitlement cache in front of the billing platform
    pub cache: EntitlementCache,

    /// Hosted platform webhook receiver (None if no secret configured)
    pub platform_webhook: Option<Arc<PlatformWebhook>>,

    /// Stripe webhook receiver (None if not configured)
    pub stripe_webhook: Option<Arc<StripeWebhook>>,
}

impl AppState {
    pub fn new(cache: EntitlementCache) -> Self {
        Self {
            cache,
            platform_webhook: None,
            stripe_webhook: None,
        }
    }
}
