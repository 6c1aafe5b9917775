// =============================================================================
// Inbound webhooks — TradingView alerts and external X alerts
// =============================================================================
//
// TradingView POSTs are authenticated with an HMAC-SHA256 signature of the
// raw body against `TRADINGVIEW_WEBHOOK_SECRET` (header
// `X-Signature`, hex). Comparison is constant-time via Mac::verify_slice.
// A verified alert lands in the notifier ring and fans straight out to
// WebSocket clients as `{type: "alert"}`.
// =============================================================================

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::types::canonical_ticker;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct TradingViewAlert {
    #[serde(default)]
    ticker: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    message: Option<String>,
}

/// Verify `signature_hex` over `body` with `secret`.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// POST /webhook/tradingview
pub async fn tradingview(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    // Fail closed: no configured secret means no accepted webhooks.
    let secret = std::env::var("TRADINGVIEW_WEBHOOK_SECRET").unwrap_or_default();
    if secret.is_empty() {
        warn!("tradingview webhook rejected — TRADINGVIEW_WEBHOOK_SECRET not configured");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "webhook secret not configured" })),
        );
    }

    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !verify_signature(&secret, &body, signature) {
        warn!("tradingview webhook rejected — bad signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "invalid signature" })),
        );
    }

    let parsed: TradingViewAlert = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("malformed payload: {e}") })),
            );
        }
    };

    let ticker = parsed.ticker.as_deref().and_then(canonical_ticker);
    let title = format!(
        "TradingView: {} {}",
        parsed.action.as_deref().unwrap_or("alert"),
        ticker.as_deref().unwrap_or("-")
    );
    let message = parsed
        .message
        .unwrap_or_else(|| format!("price {:.2}", parsed.price.unwrap_or(0.0)));

    info!(ticker = ticker.as_deref().unwrap_or("-"), "tradingview alert received");

    state.notifier.notify(
        &format!("tradingview:{}", ticker.as_deref().unwrap_or("any")),
        "tradingview",
        ticker.as_deref(),
        &title,
        &message,
    );
    broadcast_latest_alert(&state);
    state.increment_version();

    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
pub struct XAlert {
    #[serde(default)]
    ticker: Option<String>,
    #[serde(default)]
    author: Option<String>,
    text: String,
}

/// POST /webhook/x-alert — unauthenticated ingest from the feed bridge.
pub async fn x_alert(
    State(state): State<Arc<AppState>>,
    Json(alert): Json<XAlert>,
) -> impl IntoResponse {
    let ticker = alert.ticker.as_deref().and_then(canonical_ticker);
    state.notifier.notify(
        &format!(
            "x:{}:{}",
            alert.author.as_deref().unwrap_or("unknown"),
            ticker.as_deref().unwrap_or("any")
        ),
        "x-alert",
        ticker.as_deref(),
        &format!("X: {}", alert.author.as_deref().unwrap_or("feed")),
        &alert.text,
    );
    broadcast_latest_alert(&state);
    state.increment_version();

    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// Push the newest ring-buffer alert to connected WebSocket clients.
fn broadcast_latest_alert(state: &Arc<AppState>) {
    if let Some(alert) = state.notifier.recent().last().cloned() {
        let _ = state.alert_tx.send(alert);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verification() {
        let secret = "shhh";
        let body = br#"{"ticker":"NVDA","action":"buy"}"#;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let good = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature(secret, body, &good));
        assert!(!verify_signature(secret, body, "deadbeef"));
        assert!(!verify_signature(secret, body, "not-hex"));
        assert!(!verify_signature("wrong", body, &good));
    }
}
