//! Live delivery gateway.
//!
//! One persistent server-to-client event stream per authenticated
//! owner. Each connection registers a bus subscription, forwards every
//! payload as a discrete `reminder` event, emits keepalive comment
//! frames so intermediary hops do not time the connection out, and
//! surfaces bus-internal trouble as a `notify-error` event without
//! closing the stream. Disconnects drop the subscription, which
//! unregisters the channel — the release happens exactly once, in the
//! stream's drop.
//!
//! Connection lifecycle: Connecting (handshake + subscribe) →
//! Streaming → (Erroring ⇄ Streaming) → Closed (drop). Clients
//! reconnect with their own backoff; a fresh subscribe after a new
//! handshake is all the server needs.

use crate::bus::{BusMessage, NotificationBus};
use crate::config::GatewayConfig;
use crate::reminder::OwnerId;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
struct GatewayState {
    bus: Arc<dyn NotificationBus>,
    bearer_token: Option<String>,
    keepalive: Duration,
}

/// Build the gateway router. Split out from [`run_gateway`] so tests
/// can serve it on an ephemeral port.
pub fn router(config: &GatewayConfig, bus: Arc<dyn NotificationBus>) -> Router {
    let state = GatewayState {
        bus,
        bearer_token: config.bearer_token.clone(),
        keepalive: Duration::from_secs(config.keepalive_secs.max(1)),
    };
    Router::new()
        .route("/health", get(gateway_health))
        .route("/stream/{pegawai_id}", get(owner_stream))
        .with_state(state)
}

/// Bind and serve the gateway until the process stops.
pub async fn run_gateway(
    config: GatewayConfig,
    bus: Arc<dyn NotificationBus>,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    let app = router(&config, bus);
    tracing::info!("delivery gateway listening on http://{local_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn gateway_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok"
    }))
}

fn bearer_is_valid(headers: &HeaderMap, expected: &Option<String>) -> bool {
    let Some(expected_token) = expected else {
        return true;
    };
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let candidate = header_value
        .strip_prefix("Bearer ")
        .unwrap_or_default()
        .trim();
    !expected_token.is_empty() && candidate == expected_token
}

async fn owner_stream(
    State(state): State<GatewayState>,
    Path(pegawai_id): Path<i64>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !bearer_is_valid(&headers, &state.bearer_token) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "unauthorized"})),
        )
            .into_response();
    }

    let mut subscription = state.bus.subscribe(OwnerId(pegawai_id));
    tracing::debug!(
        owner = pegawai_id,
        connection = %subscription.connection_id(),
        "stream connected"
    );

    let stream = async_stream::stream! {
        loop {
            match subscription.next_message().await {
                BusMessage::Payload(payload) => {
                    match Event::default().event("reminder").json_data(&payload) {
                        Ok(event) => yield Ok::<Event, Infallible>(event),
                        Err(e) => {
                            tracing::warn!("cannot encode reminder payload: {e}");
                            yield Ok(notify_error_event("payload encoding failed"));
                        }
                    }
                }
                BusMessage::Lagged(skipped) => {
                    // Overflow is a metric, never a connection error.
                    tracing::debug!(skipped, "slow subscriber dropped oldest payloads");
                }
                BusMessage::Closed => {
                    // Bus-internal failure unrelated to this subscriber:
                    // tell the client and keep listening. Keepalive
                    // frames continue while the stream idles here.
                    yield Ok(notify_error_event("notification bus unavailable"));
                    futures_util::future::pending::<()>().await;
                }
            }
        }
    };

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(state.keepalive)
                .text("keep-alive"),
        )
        .into_response()
}

fn notify_error_event(message: &str) -> Event {
    Event::default()
        .event("notify-error")
        .data(serde_json::json!({ "message": message }).to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn bearer_validation_requires_exact_token_match() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            "Bearer abc123".parse().expect("header parse"),
        );

        assert!(bearer_is_valid(&headers, &Some("abc123".to_owned())));
        assert!(!bearer_is_valid(&headers, &Some("wrong".to_owned())));
        assert!(!bearer_is_valid(&HeaderMap::new(), &Some("abc123".to_owned())));
    }

    #[test]
    fn missing_expected_token_disables_the_check() {
        assert!(bearer_is_valid(&HeaderMap::new(), &None));
    }

    #[test]
    fn empty_expected_token_rejects_everything() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert!(!bearer_is_valid(&headers, &Some(String::new())));
    }
}
