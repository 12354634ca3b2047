//! Entitlement Cache
//!
//! Answers "may this customer use this product?" from a per-customer
//! record of their subscriptions, refreshing from the injected fetcher
//! when the record is missing, older than its TTL, or invalidated.
//!
//! ```text
//!  check_access ──▶ fresh? ──yes──▶ answer from record
//!                     │
//!                     no
//!                     ▼
//!              single-flight refresh ──ok──▶ swap record, answer
//!                     │
//!                    err
//!                     ▼
//!       last record younger than max_stale? ──yes──▶ answer from it
//!                     │
//!                     no ──▶ deny (fail closed)
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::error::{EntitlementError, Result};
use crate::fetcher::SubscriptionFetcher;
use crate::model::{CustomerId, EntitlementRecord};
use crate::singleflight::SingleFlight;

/// How an access decision was reached
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionBasis {
    /// Fresh cached record, no remote call
    Cached,
    /// Record refreshed from the platform for this decision
    Refreshed,
    /// Refresh failed; last-known record was young enough to use
    Fallback,
    /// Refresh failed and nothing usable was cached
    Denied,
}

impl DecisionBasis {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Refreshed => "refreshed",
            Self::Fallback => "fallback",
            Self::Denied => "denied",
        }
    }
}

/// Result of an access check
///
/// `error` carries the refresh failure behind a `Fallback` or `Denied`
/// decision so the caller can log it or schedule a retry.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct AccessDecision {
    pub granted: bool,
    pub basis: DecisionBasis,
    pub error: Option<EntitlementError>,
}

impl AccessDecision {
    fn cached(granted: bool) -> Self {
        Self { granted, basis: DecisionBasis::Cached, error: None }
    }

    fn refreshed(granted: bool) -> Self {
        Self { granted, basis: DecisionBasis::Refreshed, error: None }
    }

    fn fallback(granted: bool, error: EntitlementError) -> Self {
        Self { granted, basis: DecisionBasis::Fallback, error: Some(error) }
    }

    fn denied(error: EntitlementError) -> Self {
        Self { granted: false, basis: DecisionBasis::Denied, error: Some(error) }
    }

    pub fn is_granted(&self) -> bool {
        self.granted
    }

    pub fn error(&self) -> Option<&EntitlementError> {
        self.error.as_ref()
    }
}

/// Cached record plus bookkeeping
struct Entry {
    record: Arc<EntitlementRecord>,
    refreshed_at: Instant,
    invalidated: bool,
    /// Bumped on every invalidation; lets a refresh detect one that
    /// arrived while it was in flight
    generation: u64,
    last_access_ms: AtomicU64,
}

impl Entry {
    fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.refreshed_at)
    }

    fn is_fresh(&self, now: Instant) -> bool {
        !self.invalidated && self.age(now) <= self.record.ttl
    }
}

struct Inner {
    config: CacheConfig,
    fetcher: Arc<dyn SubscriptionFetcher>,
    entries: RwLock<HashMap<CustomerId, Entry>>,
    flights: SingleFlight<CustomerId, Result<Arc<EntitlementRecord>>>,
    /// Customers invalidated while their first refresh was in flight.
    /// Always locked after `entries`.
    pending: Mutex<HashSet<CustomerId>>,
    epoch: Instant,
}

/// Per-customer entitlement cache
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EntitlementCache {
    inner: Arc<Inner>,
}

impl EntitlementCache {
    /// Create a cache around `fetcher`
    pub fn new(fetcher: Arc<dyn SubscriptionFetcher>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                entries: RwLock::new(HashMap::new()),
                flights: SingleFlight::new(),
                pending: Mutex::new(HashSet::new()),
                epoch: Instant::now(),
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn fetcher_name(&self) -> &str {
        self.inner.fetcher.name()
    }

    /// Decide whether `customer_id` may use `product_id`.
    ///
    /// Never grants on error unless a record younger than `max_stale`
    /// is available to fall back on.
    pub async fn check_access(&self, customer_id: &str, product_id: &str) -> AccessDecision {
        if let Some(record) = self.inner.fresh_record(customer_id) {
            let granted = record.grants(product_id);
            tracing::debug!(
                customer_id = %customer_id,
                product_id = %product_id,
                granted,
                "Entitlement cache hit"
            );
            return AccessDecision::cached(granted);
        }

        match self.refresh(customer_id).await {
            Ok(record) => AccessDecision::refreshed(record.grants(product_id)),
            Err(error) if error.is_not_found() => {
                tracing::info!(customer_id = %customer_id, "Unknown customer - no entitlement");
                AccessDecision::denied(error)
            }
            Err(error) => self.inner.fall_back(customer_id, product_id, error),
        }
    }

    /// Fetch the customer's subscriptions and swap in a new record.
    ///
    /// Concurrent callers for the same customer share one fetch. On error
    /// the cached record, if any, is left untouched.
    pub async fn refresh(&self, customer_id: &str) -> Result<Arc<EntitlementRecord>> {
        let key = CustomerId::from(customer_id);
        let inner = Arc::clone(&self.inner);
        let (flight, led) = self
            .inner
            .flights
            .join_or_start(key.clone(), move || inner.fetch_and_store(key));

        if !led {
            tracing::debug!(customer_id = %customer_id, "Joined in-flight refresh");
        }

        flight
            .await
            .unwrap_or_else(|aborted| Err(EntitlementError::Transport(aborted.to_string())))
    }

    /// Mark the customer's record stale. The record is kept as a fallback.
    ///
    /// Returns whether a record was cached. For an uncached customer with a
    /// refresh in flight, the refreshed record is stored already stale;
    /// otherwise unknown customers are a no-op.
    pub fn invalidate(&self, customer_id: &str) -> bool {
        let mut entries = self.inner.write();
        if let Some(entry) = entries.get_mut(customer_id) {
            entry.invalidated = true;
            entry.generation += 1;
            tracing::info!(customer_id = %customer_id, "Invalidated entitlements");
            return true;
        }

        let key = CustomerId::from(customer_id);
        if self.inner.flights.is_in_flight(&key) {
            tracing::info!(customer_id = %customer_id, "Invalidated entitlements during first refresh");
            self.inner.pending().insert(key);
        } else {
            tracing::debug!(customer_id = %customer_id, "Invalidation for uncached customer ignored");
        }
        drop(entries);
        false
    }

    /// Cached record without touching the fetcher, fresh or not
    pub fn record(&self, customer_id: &str) -> Option<Arc<EntitlementRecord>> {
        self.inner.read().get(customer_id).map(|e| Arc::clone(&e.record))
    }

    /// Whether a record is cached, within TTL and not invalidated
    pub fn is_fresh(&self, customer_id: &str) -> bool {
        let now = Instant::now();
        self.inner.read().get(customer_id).is_some_and(|e| e.is_fresh(now))
    }

    /// Drop the customer's record entirely
    pub fn evict(&self, customer_id: &str) -> bool {
        self.inner.write().remove(customer_id).is_some()
    }

    /// Drop every record too old to serve even as a fallback
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Drop everything; used on shutdown
    pub fn clear(&self) {
        let mut entries = self.inner.write();
        let dropped = entries.len();
        entries.clear();
        tracing::info!(dropped, "Cleared entitlement cache");
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `purge_expired` every `housekeeping_interval`.
    ///
    /// The task holds only a weak reference and exits once every clone of
    /// the cache is dropped; abort the handle to stop it sooner.
    pub fn spawn_housekeeping(&self) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let every = self.inner.config.housekeeping_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let purged = inner.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired entitlement records");
                }
            }
        })
    }
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<CustomerId, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CustomerId, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<CustomerId>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn millis(&self, at: Instant) -> u64 {
        u64::try_from(at.saturating_duration_since(self.epoch).as_millis()).unwrap_or(u64::MAX)
    }

    fn fresh_record(&self, customer_id: &str) -> Option<Arc<EntitlementRecord>> {
        let now = Instant::now();
        let entries = self.read();
        let entry = entries.get(customer_id)?;
        entry.last_access_ms.store(self.millis(now), Ordering::Relaxed);
        entry.is_fresh(now).then(|| Arc::clone(&entry.record))
    }

    fn fall_back(&self, customer_id: &str, product_id: &str, error: EntitlementError) -> AccessDecision {
        let now = Instant::now();
        let entries = self.read();

        let Some(entry) = entries.get(customer_id) else {
            tracing::error!(
                customer_id = %customer_id,
                error = %error,
                "Entitlement refresh failed with nothing cached - denying"
            );
            return AccessDecision::denied(error);
        };

        let age = entry.age(now);
        if age <= self.config.max_stale {
            let granted = entry.record.grants(product_id);
            tracing::warn!(
                customer_id = %customer_id,
                product_id = %product_id,
                age_secs = age.as_secs(),
                granted,
                error = %error,
                "Serving last-known entitlements after failed refresh"
            );
            return AccessDecision::fallback(granted, error);
        }

        tracing::error!(
            customer_id = %customer_id,
            age_secs = age.as_secs(),
            error = %error,
            "Last-known entitlements past hard ceiling - denying"
        );
        AccessDecision::denied(EntitlementError::Stale {
            customer_id: customer_id.to_string(),
            age,
            source: Box::new(error),
        })
    }

    async fn fetch_and_store(self: Arc<Self>, customer_id: CustomerId) -> Result<Arc<EntitlementRecord>> {
        // Anything invalidated before this point is covered by the fetch below.
        let seen_generation = {
            let entries = self.read();
            self.pending().remove(&customer_id);
            entries.get(&customer_id).map(|e| e.generation)
        };
        let started = Instant::now();
        let timeout = self.config.fetch_timeout;

        let fetched = match tokio::time::timeout(timeout, self.fetcher.list_subscriptions(customer_id.as_str())).await {
            Ok(result) => result,
            Err(_) => Err(EntitlementError::Transport(format!("refresh timed out after {timeout:?}"))),
        };

        match fetched {
            Ok(subscriptions) => {
                let record = Arc::new(EntitlementRecord::new(customer_id.clone(), subscriptions, self.config.ttl));
                let superseded = self.store(&customer_id, Arc::clone(&record), seen_generation);
                tracing::info!(
                    customer_id = %customer_id,
                    fetcher = self.fetcher.name(),
                    subscriptions = record.subscriptions.len(),
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    superseded,
                    "Refreshed entitlements"
                );
                Ok(record)
            }
            Err(error) => {
                self.pending().remove(&customer_id);
                tracing::warn!(
                    customer_id = %customer_id,
                    fetcher = self.fetcher.name(),
                    error = %error,
                    retryable = error.is_retryable(),
                    "Entitlement refresh failed"
                );
                Err(error)
            }
        }
    }

    /// Swap in `record`. Returns `true` if an invalidation landed while the
    /// fetch was in flight, in which case the record is stored already stale.
    fn store(&self, customer_id: &CustomerId, record: Arc<EntitlementRecord>, seen_generation: Option<u64>) -> bool {
        let now = Instant::now();
        let mut entries = self.write();

        let invalidated_uncached = self.pending().remove(customer_id);
        let (generation, superseded) = match entries.get(customer_id) {
            Some(existing) => (existing.generation, seen_generation != Some(existing.generation)),
            None => (0, invalidated_uncached),
        };

        // Linear scan for the victim under the write lock; fine at the
        // default capacity, revisit with an access-ordered index if
        // `max_entries` grows by orders of magnitude.
        if !entries.contains_key(customer_id) && entries.len() >= self.config.max_entries {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access_ms.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                entries.remove(&victim);
                tracing::debug!(customer_id = %victim, "Evicted least recently used entitlements");
            }
        }

        entries.insert(
            customer_id.clone(),
            Entry {
                record,
                refreshed_at: now,
                invalidated: superseded,
                generation,
                last_access_ms: AtomicU64::new(self.millis(now)),
            },
        );

        superseded
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let max_stale = self.config.max_stale;
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, e| e.age(now) <= max_stale);
        before - entries.len()
    }
}
