//! Hosted Platform REST Fetcher
//!
//! Lists a customer's subscriptions from the billing platform's REST API
//! using a bearer token.
//!
//! ```text
//! GET {base_url}/v1/subscriptions?customer_id=cus_123
//! Authorization: Bearer <token>
//!
//! 200 { "items": [ { "id", "product_id", "status", "cancel_at_period_end" } ] }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use entitlement_core::{EntitlementError, SubscriptionFetcher, SubscriptionSnapshot, SubscriptionStatus};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{PaymentError, Result};

/// Retry hint used when a 429 carries no usable `Retry-After`.
/// The platform allows 100 requests per rolling minute.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Platform API configuration
#[derive(Clone, Debug)]
pub struct PlatformConfig {
    /// API root, e.g. `https://api.example-billing.com`
    pub base_url: String,

    /// Bearer token
    pub api_token: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl PlatformConfig {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: api_token.into(),
            timeout_secs: 10,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("PLATFORM_API_URL")
            .map_err(|_| PaymentError::Config("PLATFORM_API_URL not set".into()))?;
        let api_token = std::env::var("PLATFORM_API_TOKEN")
            .map_err(|_| PaymentError::Config("PLATFORM_API_TOKEN not set".into()))?;

        Ok(Self::new(base_url, api_token))
    }
}

/// Subscription fetcher for the hosted platform REST API
pub struct HttpFetcher {
    client: reqwest::Client,
    config: PlatformConfig,
}

impl HttpFetcher {
    pub fn new(config: PlatformConfig) -> Result<Self> {
        if config.api_token.trim().is_empty() {
            return Err(PaymentError::Config("platform API token is empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaymentError::Config(format!("HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(PlatformConfig::from_env()?)
    }

    fn subscriptions_url(&self) -> String {
        format!("{}/v1/subscriptions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl SubscriptionFetcher for HttpFetcher {
    async fn list_subscriptions(&self, customer_id: &str) -> entitlement_core::Result<Vec<SubscriptionSnapshot>> {
        let response = self
            .client
            .get(self.subscriptions_url())
            .bearer_auth(&self.config.api_token)
            .query(&[("customer_id", customer_id)])
            .send()
            .await
            .map_err(|e| EntitlementError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            return Err(classify_status(status, retry_after.as_deref(), customer_id));
        }

        let page: SubscriptionPage = response
            .json()
            .await
            .map_err(|e| EntitlementError::Transport(format!("unreadable subscription list: {e}")))?;

        Ok(page.into_snapshots())
    }

    fn name(&self) -> &str {
        "platform-http"
    }
}

/// Map a non-success HTTP status onto the fetcher error taxonomy
pub fn classify_status(status: StatusCode, retry_after: Option<&str>, customer_id: &str) -> EntitlementError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            EntitlementError::Auth(format!("platform rejected credentials ({status})"))
        }
        StatusCode::NOT_FOUND => EntitlementError::NotFound(customer_id.to_string()),
        StatusCode::TOO_MANY_REQUESTS => EntitlementError::RateLimited {
            retry_after: parse_retry_after(retry_after),
        },
        _ => EntitlementError::Transport(format!("platform returned {status}")),
    }
}

/// `Retry-After` in delta-seconds; anything else falls back to the default
fn parse_retry_after(raw: Option<&str>) -> Duration {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs)
}

#[derive(Debug, Deserialize)]
struct SubscriptionPage {
    #[serde(default)]
    items: Vec<RemoteSubscription>,
}

#[derive(Debug, Deserialize)]
struct RemoteSubscription {
    id: String,
    #[serde(alias = "productId")]
    product_id: String,
    status: String,
    #[serde(default, alias = "cancelAtPeriodEnd")]
    cancel_at_period_end: bool,
}

impl SubscriptionPage {
    fn into_snapshots(self) -> Vec<SubscriptionSnapshot> {
        self.items
            .into_iter()
            .map(|s| SubscriptionSnapshot {
                subscription_id: s.id,
                product_id: s.product_id.into(),
                status: SubscriptionStatus::from_remote(&s.status),
                cancel_at_period_end: s.cancel_at_period_end,
            })
            .collect()
    }
}
