//! Webhook endpoint handlers.
//!
//! The endpoint only verifies, decodes and hands the update off to the
//! handler tasks. It answers Crypto Pay before any handler has finished:
//! 1. Missing or wrong signature: 400 `wrong request signature`
//! 2. Body that is not a valid update: 400 with the decode error
//! 3. Anything else: 200 with an empty body

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use crate::webhook::{Webhook, SIGNATURE_HEADER};

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Crypto Pay Webhook
// =============================================================================

/// Server-independent result of handling one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: StatusCode,
    /// Plaintext diagnostic for rejected deliveries
    pub body: Option<String>,
}

impl IntoResponse for WebhookResponse {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (self.status, body).into_response(),
            None => self.status.into_response(),
        }
    }
}

/// Handle a delivery given its raw body and signature header value.
///
/// This is the whole HTTP contract; any server can call it once it has read
/// the complete body, from any thread, whether or not it runs on tokio.
pub fn respond(webhook: &Webhook, body: &[u8], signature: Option<&str>) -> WebhookResponse {
    match webhook.receive(body, signature) {
        Ok(_) => WebhookResponse {
            status: StatusCode::OK,
            body: None,
        },
        Err(e) => WebhookResponse {
            status: StatusCode::BAD_REQUEST,
            body: Some(e.to_string()),
        },
    }
}

/// Crypto Pay webhook endpoint.
///
/// The signature header is matched case-insensitively; a value that is not
/// visible ASCII counts as missing.
pub async fn receive_update(
    State(webhook): State<Arc<Webhook>>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    info!(
        body_length = body.len(),
        has_signature = signature.is_some(),
        "cryptopay_webhook_received"
    );

    respond(&webhook, &body, signature)
}

/// Router serving the webhook at `path` and a health check at `/health`.
pub fn router(path: &str, webhook: Arc<Webhook>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(path, post(receive_update))
        .with_state(webhook)
}
