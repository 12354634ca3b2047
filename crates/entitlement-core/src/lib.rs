//! # entitlement-core
//!
//! Local entitlement cache that gates feature access on subscription state
//! held by a remote billing platform.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     EntitlementCache                          │
//! │  ┌───────────────┐  ┌───────────────┐  ┌──────────────────┐  │
//! │  │  per-customer │  │  SingleFlight │  │ SubscriptionFetcher│ │
//! │  │    records    │──│   (refresh)   │──│    (Strategy)     │  │
//! │  └───────────────┘  └───────────────┘  └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//!            ▲
//!            │ invalidate(customer_id)
//!     webhook receivers
//! ```
//!
//! The `SubscriptionFetcher` trait lets the cache sit in front of any
//! billing backend; webhooks push invalidations in, the cache never polls.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entitlement_core::{CacheConfig, EntitlementCache, StaticFetcher};
//!
//! let cache = EntitlementCache::new(Arc::new(StaticFetcher::new()), CacheConfig::default())?;
//!
//! let decision = cache.check_access("cus_123", "prod_pro").await;
//! if decision.granted {
//!     // serve the feature
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod model;
pub mod singleflight;

pub use cache::{AccessDecision, DecisionBasis, EntitlementCache};
pub use config::CacheConfig;
pub use error::{EntitlementError, Result};
pub use fetcher::{StaticFetcher, SubscriptionFetcher};
pub use model::{CustomerId, EntitlementRecord, ProductId, SubscriptionSnapshot, SubscriptionStatus};
pub use singleflight::{Flight, FlightAborted, SingleFlight};
