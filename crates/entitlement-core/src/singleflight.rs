//! Single-Flight
//!
//! At most one in-flight task per key. Late arrivals receive a clone of the
//! pending handle and observe the same outcome as the caller that started it.
//!
//! The work runs on its own tokio task, so dropping any (or every) handle
//! never cancels it. The in-flight marker is removed by the task itself,
//! including when it panics or is aborted.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;

/// The task behind a flight ended without producing a value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("in-flight task ended without a result: {0}")]
pub struct FlightAborted(String);

/// Shared handle to an in-flight task
pub type Flight<T> = Shared<BoxFuture<'static, Result<T, FlightAborted>>>;

type Registry<K, T> = Arc<Mutex<HashMap<K, Flight<T>>>>;

fn lock<K, T>(registry: &Registry<K, T>) -> MutexGuard<'_, HashMap<K, Flight<T>>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-key in-flight marker registry
pub struct SingleFlight<K, T> {
    inflight: Registry<K, T>,
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attach to the flight for `key`, or start one with `start`.
    ///
    /// Returns the handle and `true` when this call started the work.
    /// `start` is only invoked when no flight exists. Must be called from
    /// within a tokio runtime.
    pub fn join_or_start<F, Fut>(&self, key: K, start: F) -> (Flight<T>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut inflight = lock(&self.inflight);
        if let Some(flight) = inflight.get(&key) {
            return (flight.clone(), false);
        }

        let work = start();
        let landing = Landing {
            key: key.clone(),
            registry: Arc::clone(&self.inflight),
        };

        // The registry lock is held until the marker is inserted, so the
        // task cannot remove it before it exists.
        let task = tokio::spawn(async move {
            let _landing = landing;
            work.await
        });

        let flight: Flight<T> = async move {
            task.await.map_err(|e| FlightAborted(e.to_string()))
        }
        .boxed()
        .shared();

        inflight.insert(key, flight.clone());
        (flight, true)
    }

    /// Whether a flight is currently running for `key`
    pub fn is_in_flight(&self, key: &K) -> bool {
        lock(&self.inflight).contains_key(key)
    }

    /// Number of running flights
    pub fn len(&self) -> usize {
        lock(&self.inflight).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes the marker when the task finishes, panics, or is aborted
struct Landing<K: Eq + Hash, T> {
    key: K,
    registry: Registry<K, T>,
}

impl<K: Eq + Hash, T> Drop for Landing<K, T> {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_late_arrivals_share_one_run() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let runs = Arc::clone(&runs);
            let (flight, _) = flights.join_or_start("cus_1", move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                42
            });
            handles.push(flight);
        }

        assert!(flights.is_in_flight(&"cus_1"));
        let results = futures::future::join_all(handles).await;
        assert!(results.iter().all(|r| *r == Ok(42)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(flights.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_first_caller_leads() {
        let flights: SingleFlight<String, ()> = SingleFlight::new();
        let (first, led) = flights.join_or_start("a".into(), || tokio::time::sleep(Duration::from_millis(10)));
        let (second, followed) = flights.join_or_start("a".into(), || async {});
        let (other, other_led) = flights.join_or_start("b".into(), || async {});

        assert!(led);
        assert!(!followed);
        assert!(other_led);
        assert_eq!(flights.len(), 2);

        let _ = futures::join!(first, second, other);
        assert!(flights.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handles_do_not_cancel_work() {
        let flights: SingleFlight<&'static str, ()> = SingleFlight::new();
        let done = Arc::new(AtomicUsize::new(0));

        let finished = Arc::clone(&done);
        let (flight, _) = flights.join_or_start("cus_1", move || async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            finished.fetch_add(1, Ordering::SeqCst);
        });
        drop(flight);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(!flights.is_in_flight(&"cus_1"));
    }

    #[tokio::test]
    async fn test_panicking_work_clears_marker() {
        let flights: SingleFlight<&'static str, u8> = SingleFlight::new();
        async fn explode() -> u8 {
            panic!("fetch exploded")
        }

        let (flight, _) = flights.join_or_start("boom", explode);

        assert!(flight.await.is_err());
        assert!(!flights.is_in_flight(&"boom"));

        let (retry, led) = flights.join_or_start("boom", || async { 7 });
        assert!(led);
        assert_eq!(retry.await, Ok(7));
    }
}
