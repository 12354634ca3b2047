//! Stripe Subscription Fetcher
//!
//! Reads a customer's subscriptions straight from the Stripe API. Each
//! subscription item becomes one snapshot keyed by its price's product.

use async_trait::async_trait;
use entitlement_core::{EntitlementError, SubscriptionFetcher, SubscriptionSnapshot, SubscriptionStatus};
use stripe::{Client, CustomerId, ListSubscriptions, StripeError, Subscription, SubscriptionStatusFilter};

use crate::error::{PaymentError, Result};
use crate::platform::DEFAULT_RETRY_AFTER;

/// Stripe caps list pages at 100 objects
const PAGE_LIMIT: u64 = 100;

/// Subscription fetcher backed by the Stripe API
pub struct StripeFetcher {
    client: Client,
}

impl StripeFetcher {
    /// Create a new Stripe fetcher
    pub fn new(secret_key: &str) -> Self {
        Self {
            client: Client::new(secret_key),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| PaymentError::Config("STRIPE_SECRET_KEY not set".into()))?;

        Ok(Self::new(&secret_key))
    }
}

#[async_trait]
impl SubscriptionFetcher for StripeFetcher {
    async fn list_subscriptions(&self, customer_id: &str) -> entitlement_core::Result<Vec<SubscriptionSnapshot>> {
        let customer = customer_id
            .parse::<CustomerId>()
            .map_err(|_| EntitlementError::NotFound(customer_id.to_string()))?;

        let mut params = ListSubscriptions::new();
        params.customer = Some(customer);
        params.status = Some(SubscriptionStatusFilter::All);
        params.limit = Some(PAGE_LIMIT);

        let page = Subscription::list(&self.client, &params)
            .await
            .map_err(|e| map_stripe_error(e, customer_id))?;

        if page.has_more {
            tracing::warn!(
                customer_id = %customer_id,
                "Customer has more than {PAGE_LIMIT} subscriptions, extra pages ignored"
            );
        }

        Ok(page.data.iter().flat_map(snapshots_for).collect())
    }

    fn name(&self) -> &str {
        "stripe"
    }
}

fn snapshots_for(sub: &Subscription) -> Vec<SubscriptionSnapshot> {
    let status = SubscriptionStatus::from_remote(&sub.status.to_string());

    sub.items
        .data
        .iter()
        .filter_map(|item| item.price.as_ref()?.product.as_ref())
        .map(|product| SubscriptionSnapshot {
            subscription_id: sub.id.to_string(),
            product_id: product.id().to_string().into(),
            status: status.clone(),
            cancel_at_period_end: sub.cancel_at_period_end,
        })
        .collect()
}

fn map_stripe_error(err: StripeError, customer_id: &str) -> EntitlementError {
    match err {
        StripeError::Stripe(request) => {
            let message = request.message.unwrap_or_default();
            match request.http_status {
                401 | 403 => EntitlementError::Auth(format!("Stripe rejected API key: {message}")),
                404 => EntitlementError::NotFound(customer_id.to_string()),
                429 => EntitlementError::RateLimited {
                    retry_after: DEFAULT_RETRY_AFTER,
                },
                status => EntitlementError::Transport(format!("Stripe returned {status}: {message}")),
            }
        }
        StripeError::Timeout => EntitlementError::Transport("Stripe request timed out".into()),
        other => EntitlementError::Transport(other.to_string()),
    }
}
