//! Cache Configuration

use std::time::Duration;

use crate::error::{EntitlementError, Result};

/// Entitlement cache configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long a record is trusted without a refresh
    pub ttl: Duration,

    /// Oldest a record may be and still serve as a fallback when refresh fails
    pub max_stale: Duration,

    /// Upper bound on a single refresh call
    pub fetch_timeout: Duration,

    /// Maximum number of customers kept; least recently used goes first
    pub max_entries: usize,

    /// Period of the background purge of expired records
    pub housekeeping_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            max_stale: Duration::from_secs(24 * 60 * 60),
            fetch_timeout: Duration::from_secs(10),
            max_entries: 10_000,
            housekeeping_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| EntitlementError::Config(format!("{key} must be a whole number of seconds, got {raw:?}"))),
                None => Ok(default),
            }
        };

        let max_entries = match lookup("ENTITLEMENT_MAX_ENTRIES") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                EntitlementError::Config(format!("ENTITLEMENT_MAX_ENTRIES must be a positive integer, got {raw:?}"))
            })?,
            None => defaults.max_entries,
        };

        let config = Self {
            ttl: secs("ENTITLEMENT_TTL_SECS", defaults.ttl)?,
            max_stale: secs("ENTITLEMENT_MAX_STALE_SECS", defaults.max_stale)?,
            fetch_timeout: secs("ENTITLEMENT_FETCH_TIMEOUT_SECS", defaults.fetch_timeout)?,
            max_entries,
            housekeeping_interval: secs("ENTITLEMENT_HOUSEKEEPING_SECS", defaults.housekeeping_interval)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the cache cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(EntitlementError::Config("ttl must be greater than zero".into()));
        }
        if self.fetch_timeout.is_zero() {
            return Err(EntitlementError::Config("fetch timeout must be greater than zero".into()));
        }
        if self.max_entries == 0 {
            return Err(EntitlementError::Config("max_entries must be at least 1".into()));
        }
        if self.housekeeping_interval.is_zero() {
            return Err(EntitlementError::Config("housekeeping interval must be greater than zero".into()));
        }
        if self.ttl > self.max_stale {
            return Err(EntitlementError::Config(format!(
                "ttl ({}s) must not exceed max_stale ({}s)",
                self.ttl.as_secs(),
                self.max_stale.as_secs()
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_max_stale(mut self, max_stale: Duration) -> Self {
        self.max_stale = max_stale;
        self
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    #[must_use]
    pub fn with_housekeeping_interval(mut self, housekeeping_interval: Duration) -> Self {
        self.housekeeping_interval = housekeeping_interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.ttl, Duration::from_secs(300));
        assert_eq!(config.max_stale, Duration::from_secs(86_400));
    }

    #[test]
    fn test_overrides() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("ENTITLEMENT_TTL_SECS", "600"),
            ("ENTITLEMENT_FETCH_TIMEOUT_SECS", " 3 "),
            ("ENTITLEMENT_MAX_ENTRIES", "50"),
        ]))
        .unwrap();

        assert_eq!(config.ttl, Duration::from_secs(600));
        assert_eq!(config.fetch_timeout, Duration::from_secs(3));
        assert_eq!(config.max_entries, 50);
        assert_eq!(config.max_stale, Duration::from_secs(86_400));
    }

    #[test]
    fn test_rejects_garbage() {
        let err = CacheConfig::from_lookup(lookup_from(&[("ENTITLEMENT_TTL_SECS", "5m")])).unwrap_err();
        assert!(matches!(err, EntitlementError::Config(msg) if msg.contains("ENTITLEMENT_TTL_SECS")));
    }

    #[test]
    fn test_ttl_must_not_exceed_ceiling() {
        let err = CacheConfig::from_lookup(lookup_from(&[
            ("ENTITLEMENT_TTL_SECS", "7200"),
            ("ENTITLEMENT_MAX_STALE_SECS", "3600"),
        ]))
        .unwrap_err();
        assert!(matches!(err, EntitlementError::Config(_)));
    }

    #[test]
    fn test_builders_cover_every_field() {
        let config = CacheConfig::default()
            .with_ttl(Duration::from_secs(30))
            .with_max_stale(Duration::from_secs(60))
            .with_fetch_timeout(Duration::from_secs(2))
            .with_max_entries(5)
            .with_housekeeping_interval(Duration::from_secs(1));

        assert_eq!(config.housekeeping_interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());
        assert!(config.with_housekeeping_interval(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(CacheConfig::default().with_max_entries(0).validate().is_err());
        assert!(CacheConfig::default().with_ttl(Duration::ZERO).validate().is_err());
    }
}
