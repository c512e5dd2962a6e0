//! WebSocket subscription endpoint and metrics exposition (C8/C9).
//!
//! `tide-disco`'s `Api` has no precedent in this codebase for raw
//! streaming routes, so both surfaces are served from small standalone
//! `tide::Server`s that share the same `Arc`-wrapped broadcaster, cache
//! and metrics the REST `App` uses, each run as a plain `tide::Server`
//! directly inside the async runtime.

use std::str::FromStr;
use std::sync::Arc;

use futures::StreamExt;
use relay_core::{BlockCache, Broadcaster, Dispatcher, RelayMetrics};
use relay_types::{Chain, RelayError};
use serde::Serialize;
use tide_websockets::{WebSocket, WebSocketConnection};

use crate::auth::{ApiKeyStore, RateLimiter};

/// State behind the WS/metrics servers; a deliberately narrower slice of
/// [`crate::state::RelayServerState`] than the full query surface needs.
#[derive(Clone)]
pub struct WsState {
    pub broadcaster: Arc<Broadcaster>,
    pub cache: Arc<BlockCache>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<RelayMetrics>,
    pub api_keys: Arc<ApiKeyStore>,
    pub rate_limiter: Arc<RateLimiter>,
}

#[derive(Serialize)]
struct WireEvent<'a> {
    chain: &'a str,
    hash: &'a str,
    height: u64,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
    detected_at: chrono::DateTime<chrono::Utc>,
    relay_time_ms: Option<u64>,
    source: &'a str,
}

#[derive(Serialize)]
struct WireError<'a> {
    error: &'a str,
}

fn query_param(req: &tide::Request<WsState>, name: &str) -> Option<String> {
    req.url()
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

fn api_key_from_ws_request(req: &tide::Request<WsState>) -> Option<String> {
    if let Some(header) = req.header("X-Api-Key") {
        return Some(header.as_str().to_string());
    }
    query_param(req, "api_key")
}

fn chain_filter_from_request(req: &tide::Request<WsState>) -> Result<Option<Chain>, RelayError> {
    match query_param(req, "chain") {
        None => Ok(None),
        Some(raw) => Chain::from_str(&raw).map(Some),
    }
}

/// Streams newly published block events to an authenticated subscriber
/// until the socket closes or the subscriber is dropped.
///
/// The handshake resolves the caller's API key to a tier before the
/// socket is accepted into the broadcaster, then enforces the per-subject
/// rate limit on the subscribe call itself (not on each delivered event).
async fn handle_socket(
    req: tide::Request<WsState>,
    mut stream: WebSocketConnection,
) -> Result<(), tide::Error> {
    let state = req.state().clone();

    let api_key = api_key_from_ws_request(&req);
    let (subject_id, tier) = match state.api_keys.resolve(api_key.as_deref()) {
        Ok(resolved) => resolved,
        Err(err) => {
            let _ = stream.send_json(&WireError { error: &err.to_string() }).await;
            return Ok(());
        }
    };

    let now_millis = chrono::Utc::now().timestamp_millis();
    if let Err(err) = state.rate_limiter.check(&subject_id, tier, now_millis) {
        let _ = stream.send_json(&WireError { error: &err.to_string() }).await;
        return Ok(());
    }

    let chain_filter = match chain_filter_from_request(&req) {
        Ok(filter) => filter,
        Err(err) => {
            let _ = stream.send_json(&WireError { error: &err.to_string() }).await;
            return Ok(());
        }
    };

    let (handle, mut rx) = state.broadcaster.subscribe(tier, chain_filter);
    tracing::info!(subject = %subject_id, tier = ?tier, subscriber_id = handle.id, "ws subscriber connected");

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let wire = WireEvent {
                    chain: event.chain.as_str(),
                    hash: &event.hash,
                    height: event.height,
                    timestamp: event.timestamp,
                    detected_at: event.detected_at,
                    relay_time_ms: event.relay_time_ms,
                    source: &event.source,
                };
                let send_failed = std::sync::atomic::AtomicBool::new(false);
                state
                    .dispatcher
                    .deliver(tier, &event, || async {
                        if stream.send_json(&wire).await.is_err() {
                            send_failed.store(true, std::sync::atomic::Ordering::SeqCst);
                        }
                    })
                    .await;
                if send_failed.load(std::sync::atomic::Ordering::SeqCst) {
                    break;
                }
            }
            incoming = stream.next() => {
                if incoming.is_none() {
                    break;
                }
            }
        }
    }

    state.broadcaster.unsubscribe(&handle);
    tracing::info!(subject = %subject_id, subscriber_id = handle.id, "ws subscriber disconnected");
    Ok(())
}

pub fn build_ws_server(state: WsState) -> tide::Server<WsState> {
    let mut server = tide::Server::with_state(state);
    server.at("/ws").get(WebSocket::new(handle_socket));
    server
}

async fn metrics_handler(req: tide::Request<WsState>) -> tide::Result {
    let body = req.state().metrics.render();
    Ok(tide::Response::builder(200)
        .body(body)
        .content_type("text/plain; version=0.0.4")
        .build())
}

pub fn build_metrics_server(state: WsState) -> tide::Server<WsState> {
    let mut server = tide::Server::with_state(state);
    server.at("/metrics").get(metrics_handler);
    server
}
