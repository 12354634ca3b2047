//! Subscription Fetchers
//!
//! The cache never talks to the billing platform itself; it asks an
//! injected [`SubscriptionFetcher`].

mod fixed;

pub use fixed::StaticFetcher;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::SubscriptionSnapshot;

/// Remote subscription status source (Strategy pattern)
///
/// Implement this for each billing backend. Implementations report
/// failures as `Transport`, `Auth`, `RateLimited` or `NotFound`; retries,
/// pagination and token refresh are their own business.
#[async_trait]
pub trait SubscriptionFetcher: Send + Sync {
    /// List every subscription line the platform holds for a customer
    async fn list_subscriptions(&self, customer_id: &str) -> Result<Vec<SubscriptionSnapshot>>;

    /// Fetcher name, for logs and health output
    fn name(&self) -> &str;
}
