//! HTTP endpoints implemented by the facilitator.
//!
//! Protocol-critical endpoints (`POST /verify`, `POST /settle`) plus
//! discovery (`GET /verify`, `GET /settle`, `GET /supported`, `GET /health`)
//! and operations (`GET /metrics`).
//!
//! Status discipline: verification and settlement outcomes — valid or not —
//! are HTTP 200 with machine-readable bodies; only malformed requests map to
//! 400 and only infrastructure trouble to 5xx.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::metrics::metrics_output;
use crate::settlement::SettlementEngine;
use crate::types::{ErrorResponse, SettleRequest, VerifyRequest};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SettlementEngine>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_root))
        .route("/verify", get(get_verify).post(post_verify))
        .route("/settle", get(get_settle).post(post_settle))
        .route("/supported", get(get_supported))
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

/// `GET /`: API information with links to all available endpoints.
#[instrument(skip_all)]
async fn get_root() -> impl IntoResponse {
    let pkg_version = env!("CARGO_PKG_VERSION");
    let pkg_description = env!("CARGO_PKG_DESCRIPTION");

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>router402 Facilitator</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; max-width: 900px; margin: 0 auto; padding: 20px; }}
        code {{ background: #f5f5f5; padding: 2px 5px; border-radius: 3px; }}
        li {{ margin: 8px 0; }}
    </style>
</head>
<body>
    <h1>router402 Facilitator</h1>
    <p>Version: {pkg_version}</p>
    <p>{pkg_description}</p>
    <h2>Endpoints</h2>
    <ul>
        <li><code>GET <a href="/supported">/supported</a></code> — supported (scheme, network) tuples</li>
        <li><code>GET <a href="/health">/health</a></code> — health check</li>
        <li><code>GET <a href="/verify">/verify</a></code> — verify request descriptor</li>
        <li><code>POST /verify</code> — verify a payment payload against requirements</li>
        <li><code>GET <a href="/settle">/settle</a></code> — settle request descriptor</li>
        <li><code>POST /settle</code> — settle an accepted payment on-chain</li>
        <li><code>GET <a href="/metrics">/metrics</a></code> — Prometheus metrics</li>
    </ul>
</body>
</html>"#
    );

    (StatusCode::OK, Html(html)).into_response()
}

/// `GET /verify`: descriptor of the verify request shape.
#[instrument(skip_all)]
async fn get_verify() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify x402 payments through a settlement router",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        },
    }))
}

/// `GET /settle`: descriptor of the settle request shape.
#[instrument(skip_all)]
async fn get_settle() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle x402 payments through a settlement router",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        },
    }))
}

/// `GET /supported`: the x402 payment kinds this facilitator accepts.
///
/// Resource servers may consult this to configure their payment
/// requirements dynamically.
#[instrument(skip_all)]
async fn get_supported(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(json!(state.engine.supported())))
}

#[instrument(skip_all)]
async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    get_supported(State(state)).await
}

/// `GET /metrics`: Prometheus text exposition.
#[instrument(skip_all)]
async fn get_metrics() -> impl IntoResponse {
    (StatusCode::OK, metrics_output())
}

/// `POST /verify`: facilitator-side verification of a proposed payment.
///
/// Checks whether the payload satisfies the declared requirements, including
/// signature validity, recipient, validity window, and fund sufficiency.
/// Responds 200 with `isValid` either way; 400 only for malformed bodies.
#[instrument(skip_all)]
async fn post_verify(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let request: VerifyRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse verify request");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!("Invalid request: {e}"),
                }),
            )
                .into_response();
        }
    };

    let response = state.engine.verify(&request).await;
    if !response.is_valid {
        tracing::debug!(reason = ?response.invalid_reason, "verification rejected");
    }
    (StatusCode::OK, Json(response)).into_response()
}

/// `POST /settle`: execute a payment on-chain through the settlement router.
///
/// Typically called after a successful `/verify`, but re-verifies in full
/// regardless. The response always carries the transaction hash once one
/// exists, revert or not.
#[instrument(skip_all)]
async fn post_settle(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let request: SettleRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse settle request");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!("Invalid request: {e}"),
                }),
            )
                .into_response();
        }
    };

    let response = state.engine.settle(&request).await;
    if !response.success {
        tracing::warn!(
            reason = ?response.error_reason,
            transaction = ?response.transaction,
            "settlement failed"
        );
    }
    (StatusCode::OK, Json(response)).into_response()
}
