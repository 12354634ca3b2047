//! HTTP Handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use entitlement_core::{DecisionBasis, EntitlementError, EntitlementRecord};
use entitlement_payments::{PaymentError, WebhookOutcome, PLATFORM_SIGNATURE_HEADER, STRIPE_SIGNATURE_HEADER};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub fetcher: String,
    pub cached_customers: usize,
    pub platform_webhook: bool,
    pub stripe_webhook: bool,
}

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub customer_id: String,
    pub product_id: String,
    pub granted: bool,
    pub basis: DecisionBasis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CustomerResponse {
    pub fresh: bool,
    pub record: EntitlementRecord,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

fn error_body(status: StatusCode, error: impl Into<String>, code: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

// ============================================================================
// Entitlements
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        fetcher: state.cache.fetcher_name().to_string(),
        cached_customers: state.cache.len(),
        platform_webhook: state.platform_webhook.is_some(),
        stripe_webhook: state.stripe_webhook.is_some(),
    })
}

/// Decide whether a customer may use a product
///
/// Always 200: a denial is an answer, not an error.
pub async fn check_access(
    State(state): State<AppState>,
    Path((customer_id, product_id)): Path<(String, String)>,
) -> Json<AccessResponse> {
    let decision = state.cache.check_access(&customer_id, &product_id).await;

    if let Some(err) = decision.error() {
        tracing::warn!(
            customer_id = %customer_id,
            product_id = %product_id,
            basis = decision.basis.as_str(),
            error = %err,
            "Access decided without a fresh record"
        );
    }

    Json(AccessResponse {
        granted: decision.granted,
        basis: decision.basis,
        error: decision.error().map(|e| e.user_message().to_string()),
        retry_after_secs: decision.error().and_then(EntitlementError::retry_after).map(|d| d.as_secs()),
        customer_id,
        product_id,
    })
}

/// Inspect the cached record for a customer
pub async fn get_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
) -> Result<Json<CustomerResponse>, (StatusCode, Json<ErrorResponse>)> {
    let record = state
        .cache
        .record(&customer_id)
        .ok_or_else(|| error_body(StatusCode::NOT_FOUND, "Customer not cached", "NOT_CACHED"))?;

    Ok(Json(CustomerResponse {
        fresh: state.cache.is_fresh(&customer_id),
        record: (*record).clone(),
    }))
}

/// Mark a customer's record stale
pub async fn invalidate_customer(State(state): State<AppState>, Path(customer_id): Path<String>) -> StatusCode {
    let was_cached = state.cache.invalidate(&customer_id);
    tracing::info!(customer_id = %customer_id, was_cached, "Manual invalidation");
    StatusCode::NO_CONTENT
}

/// Force a refresh from the billing platform
pub async fn refresh_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
) -> Result<Json<CustomerResponse>, Response> {
    match state.cache.refresh(&customer_id).await {
        Ok(record) => Ok(Json(CustomerResponse {
            fresh: state.cache.is_fresh(&customer_id),
            record: (*record).clone(),
        })),
        Err(err) => Err(refresh_error(&err)),
    }
}

fn refresh_error(err: &EntitlementError) -> Response {
    let (status, code) = match err {
        EntitlementError::NotFound(_) => (StatusCode::NOT_FOUND, "CUSTOMER_NOT_FOUND"),
        EntitlementError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
        EntitlementError::Auth(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_AUTH"),
        EntitlementError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG"),
        EntitlementError::Transport(_) | EntitlementError::Stale { .. } => {
            (StatusCode::BAD_GATEWAY, "UPSTREAM_UNAVAILABLE")
        }
    };

    let mut response = error_body(status, err.user_message(), code).into_response();
    if let Some(retry_after) = err.retry_after() {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after.as_secs()));
    }
    response
}

// ============================================================================
// Webhooks
// ============================================================================

fn signature_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, (StatusCode, Json<ErrorResponse>)> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| error_body(StatusCode::BAD_REQUEST, "Missing webhook signature", "MISSING_SIGNATURE"))
}

fn webhook_error(err: &PaymentError) -> (StatusCode, Json<ErrorResponse>) {
    tracing::warn!("Webhook rejected: {}", err);
    let code = match err {
        PaymentError::WebhookSignature(_) => "INVALID_SIGNATURE",
        PaymentError::WebhookParse(_) => "INVALID_PAYLOAD",
        PaymentError::Config(_) => "WEBHOOK_ERROR",
    };
    error_body(StatusCode::BAD_REQUEST, err.user_message(), code)
}

/// Hosted platform webhook
pub async fn platform_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, (StatusCode, Json<ErrorResponse>)> {
    let webhook = state.platform_webhook.as_ref().ok_or_else(|| {
        error_body(StatusCode::SERVICE_UNAVAILABLE, "Platform webhook not configured", "WEBHOOK_DISABLED")
    })?;

    let signature = signature_header(&headers, PLATFORM_SIGNATURE_HEADER)?;

    webhook.receive(&body, signature).map(Json).map_err(|e| webhook_error(&e))
}

/// Stripe webhook
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookOutcome>, (StatusCode, Json<ErrorResponse>)> {
    let webhook = state.stripe_webhook.as_ref().ok_or_else(|| {
        error_body(StatusCode::SERVICE_UNAVAILABLE, "Stripe webhook not configured", "WEBHOOK_DISABLED")
    })?;

    let signature = signature_header(&headers, STRIPE_SIGNATURE_HEADER)?;

    webhook.receive(&body, signature).map(Json).map_err(|e| webhook_error(&e))
}
