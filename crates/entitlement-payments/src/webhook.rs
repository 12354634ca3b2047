//! Webhook Handling
//!
//! Turns billing-platform lifecycle notifications into cache invalidations.
//! Receivers never fetch; the next access check does.

use std::time::Duration;

use entitlement_core::EntitlementCache;
use serde::{Deserialize, Serialize};
use stripe::{Event, EventObject, EventType, Webhook};

use crate::error::{PaymentError, Result};
use crate::signature;

/// Header carrying the platform's HMAC signature
pub const PLATFORM_SIGNATURE_HEADER: &str = "x-platform-signature";

/// Header carrying Stripe's signature
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// What a delivered event did to the cache
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The customer's record was marked stale
    Invalidated {
        customer_id: String,
        event_type: String,
        /// Whether a record was cached at the time
        was_cached: bool,
    },

    /// Not a subscription lifecycle event, or no customer attached
    Ignored { event_type: String },
}

fn invalidate(cache: &EntitlementCache, customer_id: String, event_type: String) -> WebhookOutcome {
    let was_cached = cache.invalidate(&customer_id);

    tracing::info!(
        customer_id = %customer_id,
        event_type = %event_type,
        was_cached,
        "Webhook invalidated entitlements"
    );

    WebhookOutcome::Invalidated {
        customer_id,
        event_type,
        was_cached,
    }
}

fn ignore(event_type: String) -> WebhookOutcome {
    tracing::debug!(event_type = %event_type, "Ignoring webhook event");
    WebhookOutcome::Ignored { event_type }
}

// ============================================================================
// Hosted platform
// ============================================================================

/// Event envelope sent by the hosted platform
#[derive(Clone, Debug, Deserialize)]
pub struct PlatformEvent {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub data: PlatformEventData,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PlatformEventData {
    #[serde(default, alias = "customerId")]
    pub customer_id: Option<String>,
}

impl PlatformEvent {
    /// Events after which a customer's entitlements may differ
    pub fn affects_entitlements(&self) -> bool {
        self.event_type.starts_with("subscription.")
            || matches!(
                self.event_type.as_str(),
                "payment.failed" | "payment.succeeded" | "checkout.completed" | "customer.deleted"
            )
    }
}

/// Receiver for hosted platform webhooks
pub struct PlatformWebhook {
    cache: EntitlementCache,
    secret: String,
    tolerance: Duration,
}

impl PlatformWebhook {
    pub fn new(cache: EntitlementCache, secret: impl Into<String>) -> Self {
        Self {
            cache,
            secret: secret.into(),
            tolerance: signature::DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Create from environment variables
    pub fn from_env(cache: EntitlementCache) -> Result<Self> {
        let secret = std::env::var("PLATFORM_WEBHOOK_SECRET")
            .map_err(|_| PaymentError::Config("PLATFORM_WEBHOOK_SECRET not set".into()))?;

        Ok(Self::new(cache, secret))
    }

    /// Verify, parse and apply a delivery
    pub fn receive(&self, payload: &[u8], signature_header: &str) -> Result<WebhookOutcome> {
        self.receive_at(payload, signature_header, chrono::Utc::now().timestamp())
    }

    /// As [`receive`](Self::receive), with an explicit clock
    pub fn receive_at(&self, payload: &[u8], signature_header: &str, now: i64) -> Result<WebhookOutcome> {
        signature::verify(&self.secret, signature_header, payload, now, self.tolerance)?;

        let event: PlatformEvent =
            serde_json::from_slice(payload).map_err(|e| PaymentError::WebhookParse(e.to_string()))?;

        Ok(self.handle(event))
    }

    /// Apply an already-verified event
    pub fn handle(&self, event: PlatformEvent) -> WebhookOutcome {
        tracing::info!(event_type = %event.event_type, "Processing platform webhook");

        if !event.affects_entitlements() {
            return ignore(event.event_type);
        }

        match event.data.customer_id {
            Some(customer_id) if !customer_id.is_empty() => invalidate(&self.cache, customer_id, event.event_type),
            _ => {
                tracing::warn!(event_type = %event.event_type, "Lifecycle event without customer id");
                ignore(event.event_type)
            }
        }
    }
}

// ============================================================================
// Stripe
// ============================================================================

/// Receiver for Stripe webhooks
pub struct StripeWebhook {
    cache: EntitlementCache,
    secret: String,
}

impl StripeWebhook {
    pub fn new(cache: EntitlementCache, secret: impl Into<String>) -> Self {
        Self {
            cache,
            secret: secret.into(),
        }
    }

    /// Create from environment variables
    pub fn from_env(cache: EntitlementCache) -> Result<Self> {
        let secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| PaymentError::Config("STRIPE_WEBHOOK_SECRET not set".into()))?;

        Ok(Self::new(cache, secret))
    }

    /// Verify webhook signature and parse event
    pub fn parse_event(&self, payload: &str, signature: &str) -> Result<Event> {
        Webhook::construct_event(payload, signature, &self.secret)
            .map_err(|e| PaymentError::WebhookSignature(e.to_string()))
    }

    /// Verify, parse and apply a delivery
    pub fn receive(&self, payload: &str, signature: &str) -> Result<WebhookOutcome> {
        let event = self.parse_event(payload, signature)?;
        Ok(self.handle(&event))
    }

    /// Apply an already-verified event
    pub fn handle(&self, event: &Event) -> WebhookOutcome {
        let event_type = event.type_.to_string();
        tracing::info!(event_type = %event_type, "Processing Stripe webhook");

        if !affects_entitlements(&event.type_) {
            return ignore(event_type);
        }

        match customer_of(event) {
            Some(customer_id) => invalidate(&self.cache, customer_id, event_type),
            None => {
                tracing::warn!(event_type = %event_type, "Lifecycle event without customer");
                ignore(event_type)
            }
        }
    }
}

fn affects_entitlements(event_type: &EventType) -> bool {
    matches!(
        event_type,
        EventType::CustomerSubscriptionCreated
            | EventType::CustomerSubscriptionUpdated
            | EventType::CustomerSubscriptionDeleted
            | EventType::InvoicePaymentFailed
            | EventType::InvoicePaid
            | EventType::CheckoutSessionCompleted
    )
}

fn customer_of(event: &Event) -> Option<String> {
    match &event.data.object {
        EventObject::Subscription(sub) => Some(sub.customer.id().to_string()),
        EventObject::Invoice(invoice) => invoice.customer.as_ref().map(|c| c.id().to_string()),
        EventObject::CheckoutSession(session) => session.customer.as_ref().map(|c| c.id().to_string()),
        _ => None,
    }
}
