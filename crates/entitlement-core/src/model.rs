//! Entitlement Data Model
//!
//! Subscription snapshots as reported by the billing platform, and the
//! per-customer record the cache keeps.

use std::borrow::Borrow;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque platform customer identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(String);

impl CustomerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CustomerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CustomerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for CustomerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque platform product identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProductId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ProductId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscription lifecycle status
///
/// Values the platform adds later land in `Unknown` verbatim and never
/// grant access.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    Canceled,
    PastDue,
    Incomplete,
    IncompleteExpired,
    Unpaid,
    Paused,
    Unknown(String),
}

impl SubscriptionStatus {
    /// Parse a status string as sent by the platform
    pub fn from_remote(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "canceled" | "cancelled" => Self::Canceled,
            "past_due" | "pastdue" => Self::PastDue,
            "incomplete" => Self::Incomplete,
            "incomplete_expired" | "incompleteexpired" => Self::IncompleteExpired,
            "unpaid" => Self::Unpaid,
            "paused" => Self::Paused,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::Canceled => "canceled",
            Self::PastDue => "past_due",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Unpaid => "unpaid",
            Self::Paused => "paused",
            Self::Unknown(raw) => raw,
        }
    }

    /// Whether a subscription in this state entitles its customer.
    ///
    /// A canceled-at-period-end subscription is still reported `active`
    /// by the platform until the period closes, so no date math here.
    pub fn grants_access(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl From<&str> for SubscriptionStatus {
    fn from(raw: &str) -> Self {
        Self::from_remote(raw)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SubscriptionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SubscriptionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_remote(&raw))
    }
}

/// One subscription line as last seen on the platform
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub subscription_id: String,
    pub product_id: ProductId,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

impl SubscriptionSnapshot {
    pub fn new(
        subscription_id: impl Into<String>,
        product_id: impl Into<ProductId>,
        status: SubscriptionStatus,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            product_id: product_id.into(),
            status,
            cancel_at_period_end: false,
        }
    }

    /// Mark as scheduled to cancel when the current period ends
    #[must_use]
    pub fn cancelling_at_period_end(mut self) -> Self {
        self.cancel_at_period_end = true;
        self
    }

    /// Does this line entitle access to `product_id`?
    pub fn grants(&self, product_id: &str) -> bool {
        self.product_id.as_str() == product_id && self.status.grants_access()
    }
}

/// Everything the cache knows about one customer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRecord {
    pub customer_id: CustomerId,

    /// In the order the fetcher returned them
    pub subscriptions: Vec<SubscriptionSnapshot>,

    /// Wall-clock time of the successful refresh that produced this record
    pub fetched_at: DateTime<Utc>,

    /// Validity window this record was cached under
    #[serde(rename = "ttl_secs", with = "duration_secs")]
    pub ttl: Duration,
}

impl EntitlementRecord {
    pub fn new(
        customer_id: impl Into<CustomerId>,
        subscriptions: Vec<SubscriptionSnapshot>,
        ttl: Duration,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            subscriptions,
            fetched_at: Utc::now(),
            ttl,
        }
    }

    /// Grant decision for `product_id` based solely on this record
    pub fn grants(&self, product_id: &str) -> bool {
        self.subscriptions.iter().any(|s| s.grants(product_id))
    }

    /// Products this record currently entitles
    pub fn entitled_products(&self) -> Vec<&ProductId> {
        self.subscriptions
            .iter()
            .filter(|s| s.status.grants_access())
            .map(|s| &s.product_id)
            .collect()
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
