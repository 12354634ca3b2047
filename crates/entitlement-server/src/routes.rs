//! Router

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    check_access, get_customer, health_check, invalidate_customer, platform_webhook, refresh_customer,
    stripe_webhook,
};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_check))
        // Entitlements
        .route("/api/access/{customer_id}/{product_id}", get(check_access))
        .route("/api/customers/{customer_id}", get(get_customer))
        .route("/api/customers/{customer_id}/invalidate", post(invalidate_customer))
        .route("/api/customers/{customer_id}/refresh", post(refresh_customer))
        // Webhooks
        .route("/webhook/platform", post(platform_webhook))
        .route("/webhook/stripe", post(stripe_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use entitlement_core::{
        CacheConfig, EntitlementCache, EntitlementError, StaticFetcher, SubscriptionSnapshot, SubscriptionStatus,
    };
    use entitlement_payments::{signature, PlatformWebhook, PLATFORM_SIGNATURE_HEADER};

    const SECRET: &str = "whsec_platform";

    fn app() -> (Arc<StaticFetcher>, AppState) {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.set_subscriptions(
            "cus_1",
            vec![SubscriptionSnapshot::new("sub_1", "prod_pro", SubscriptionStatus::Active)],
        );
        let cache = EntitlementCache::new(fetcher.clone(), CacheConfig::default()).unwrap();
        let mut state = AppState::new(cache.clone());
        state.platform_webhook = Some(Arc::new(PlatformWebhook::new(cache, SECRET)));
        (fetcher, state)
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Option<Value>, Option<String>) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).ok(), retry_after)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str) -> Request<Body> {
        Request::post(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_, state) = app();

        let (status, body, _) = send(&state, get("/health")).await;

        assert_eq!(status, StatusCode::OK);
        let body = body.unwrap();
        assert_eq!(body["fetcher"], "static");
        assert_eq!(body["cached_customers"], 0);
        assert_eq!(body["platform_webhook"], true);
        assert_eq!(body["stripe_webhook"], false);
    }

    #[tokio::test]
    async fn test_access_granted_then_cached() {
        let (fetcher, state) = app();

        let (status, body, _) = send(&state, get("/api/access/cus_1/prod_pro")).await;
        assert_eq!(status, StatusCode::OK);
        let body = body.unwrap();
        assert_eq!(body["granted"], true);
        assert_eq!(body["basis"], "refreshed");
        assert!(body.get("error").is_none());

        let (_, body, _) = send(&state, get("/api/access/cus_1/prod_pro")).await;
        assert_eq!(body.unwrap()["basis"], "cached");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_access_denied_is_still_ok() {
        let (fetcher, state) = app();
        fetcher.set_error("cus_2", EntitlementError::RateLimited { retry_after: Duration::from_secs(30) });

        let (status, body, _) = send(&state, get("/api/access/cus_2/prod_pro")).await;

        assert_eq!(status, StatusCode::OK);
        let body = body.unwrap();
        assert_eq!(body["granted"], false);
        assert_eq!(body["basis"], "denied");
        assert_eq!(body["retry_after_secs"], 30);
    }

    #[tokio::test]
    async fn test_customer_inspection() {
        let (_, state) = app();

        let (status, _, _) = send(&state, get("/api/customers/cus_1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body, _) = send(&state, post("/api/customers/cus_1/refresh")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["fresh"], true);

        let (status, body, _) = send(&state, get("/api/customers/cus_1")).await;
        assert_eq!(status, StatusCode::OK);
        let body = body.unwrap();
        assert_eq!(body["record"]["customer_id"], "cus_1");
        assert_eq!(body["record"]["subscriptions"][0]["status"], "active");
    }

    #[tokio::test]
    async fn test_invalidate_endpoint() {
        let (_, state) = app();
        state.cache.refresh("cus_1").await.unwrap();

        let (status, _, _) = send(&state, post("/api/customers/cus_1/invalidate")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!state.cache.is_fresh("cus_1"));

        let (status, _, _) = send(&state, post("/api/customers/cus_unknown/invalidate")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(state.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_error_mapping() {
        let (fetcher, state) = app();
        fetcher.set_error("cus_busy", EntitlementError::RateLimited { retry_after: Duration::from_secs(9) });
        fetcher.set_error("cus_auth", EntitlementError::Auth("revoked".into()));

        let (status, _, retry_after) = send(&state, post("/api/customers/cus_busy/refresh")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(retry_after.as_deref(), Some("9"));

        let (status, body, _) = send(&state, post("/api/customers/cus_auth/refresh")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.unwrap()["code"], "UPSTREAM_AUTH");

        let (status, _, _) = send(&state, post("/api/customers/cus_missing/refresh")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_platform_webhook_invalidates() {
        let (_, state) = app();
        state.cache.refresh("cus_1").await.unwrap();
        let body = r#"{"type":"subscription.updated","data":{"customer_id":"cus_1"}}"#;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let signed = signature::header(SECRET, i64::try_from(now).unwrap(), body.as_bytes()).unwrap();

        let request = Request::post("/webhook/platform")
            .header(PLATFORM_SIGNATURE_HEADER, signed)
            .body(Body::from(body))
            .unwrap();
        let (status, response, _) = send(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.unwrap()["outcome"], "invalidated");
        assert!(!state.cache.is_fresh("cus_1"));
    }

    #[tokio::test]
    async fn test_webhook_rejections() {
        let (_, state) = app();

        let unsigned = Request::post("/webhook/platform").body(Body::from("{}")).unwrap();
        let (status, body, _) = send(&state, unsigned).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.unwrap()["code"], "MISSING_SIGNATURE");

        let forged = Request::post("/webhook/platform")
            .header(PLATFORM_SIGNATURE_HEADER, "t=1,v1=00")
            .body(Body::from("{}"))
            .unwrap();
        let (status, body, _) = send(&state, forged).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.unwrap()["code"], "INVALID_SIGNATURE");

        let (status, body, _) = send(&state, post("/webhook/stripe")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.unwrap()["code"], "WEBHOOK_DISABLED");
    }
}
