//! Static Fetcher
//!
//! In-process fetcher for demos and tests. Answers from a programmable
//! table and counts how often it was asked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::SubscriptionFetcher;
use crate::error::{EntitlementError, Result};
use crate::model::SubscriptionSnapshot;

/// Fetcher backed by an in-memory table
///
/// Customers without an entry answer `NotFound`.
pub struct StaticFetcher {
    responses: RwLock<HashMap<String, Result<Vec<SubscriptionSnapshot>>>>,
    calls: AtomicUsize,
    delay: RwLock<Option<Duration>>,
}

impl Default for StaticFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self {
            responses: RwLock::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            delay: RwLock::new(None),
        }
    }

    /// Simulate network latency on every call
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(Some(delay));
        self
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Answer `customer_id` with these subscriptions from now on
    pub fn set_subscriptions(&self, customer_id: impl Into<String>, subscriptions: Vec<SubscriptionSnapshot>) {
        self.responses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(customer_id.into(), Ok(subscriptions));
    }

    /// Fail every lookup of `customer_id` with `error` from now on
    pub fn set_error(&self, customer_id: impl Into<String>, error: EntitlementError) {
        self.responses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(customer_id.into(), Err(error));
    }

    /// Forget `customer_id`; later lookups answer `NotFound`
    pub fn remove(&self, customer_id: &str) {
        self.responses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(customer_id);
    }

    /// Total calls to `list_subscriptions` so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubscriptionFetcher for StaticFetcher {
    async fn list_subscriptions(&self, customer_id: &str) -> Result<Vec<SubscriptionSnapshot>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.responses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(customer_id)
            .cloned()
            .unwrap_or_else(|| Err(EntitlementError::NotFound(customer_id.to_string())))
    }

    fn name(&self) -> &str {
        "static"
    }
}
