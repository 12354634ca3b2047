//! Entitlement HTTP Server
//!
//! Axum server answering "may this customer use this product" from a local
//! cache, kept honest by billing-platform webhooks.

mod handlers;
mod routes;
mod state;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use entitlement_core::{CacheConfig, EntitlementCache, StaticFetcher, SubscriptionFetcher};
use entitlement_payments::{HttpFetcher, PlatformWebhook, StripeFetcher, StripeWebhook};

use crate::state::AppState;

/// Pick the billing backend from whichever credentials are present
fn select_fetcher() -> anyhow::Result<Arc<dyn SubscriptionFetcher>> {
    if std::env::var("STRIPE_SECRET_KEY").is_ok() {
        tracing::info!("✓ Using Stripe subscription fetcher");
        return Ok(Arc::new(StripeFetcher::from_env()?));
    }

    if std::env::var("PLATFORM_API_URL").is_ok() {
        tracing::info!("✓ Using platform REST fetcher");
        return Ok(Arc::new(HttpFetcher::from_env()?));
    }

    tracing::warn!("⚠ No billing backend configured - every customer is unknown");
    tracing::warn!("  Set STRIPE_SECRET_KEY or PLATFORM_API_URL/PLATFORM_API_TOKEN in .env");
    Ok(Arc::new(StaticFetcher::new()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = CacheConfig::from_env()?;
    tracing::info!(
        ttl_secs = config.ttl.as_secs(),
        max_stale_secs = config.max_stale.as_secs(),
        max_entries = config.max_entries,
        "Cache configured"
    );

    let cache = EntitlementCache::new(select_fetcher()?, config)?;
    let housekeeping = cache.spawn_housekeeping();

    // Webhooks
    let mut state = AppState::new(cache.clone());

    match PlatformWebhook::from_env(cache.clone()) {
        Ok(webhook) => {
            tracing::info!("✓ Platform webhook enabled");
            state.platform_webhook = Some(Arc::new(webhook));
        }
        Err(_) => tracing::warn!("⚠ PLATFORM_WEBHOOK_SECRET not set - platform webhook disabled"),
    }

    match StripeWebhook::from_env(cache.clone()) {
        Ok(webhook) => {
            tracing::info!("✓ Stripe webhook enabled");
            state.stripe_webhook = Some(Arc::new(webhook));
        }
        Err(_) => tracing::warn!("⚠ STRIPE_WEBHOOK_SECRET not set - Stripe webhook disabled"),
    }

    if state.platform_webhook.is_none() && state.stripe_webhook.is_none() {
        tracing::warn!("  Without webhooks, changes surface only after the TTL lapses");
    }

    let app = routes::router(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 entitlement server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                               - Health check");
    tracing::info!("  GET  /api/access/{{customer}}/{{product}}      - Access decision");
    tracing::info!("  GET  /api/customers/{{customer}}             - Cached record");
    tracing::info!("  POST /api/customers/{{customer}}/invalidate  - Mark stale");
    tracing::info!("  POST /api/customers/{{customer}}/refresh     - Force refresh");
    tracing::info!("  POST /webhook/platform                     - Platform events");
    tracing::info!("  POST /webhook/stripe                       - Stripe events");
    tracing::info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    housekeeping.abort();
    cache.clear();

    Ok(())
}
