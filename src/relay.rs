// ─────────────────────────────────────────────────────────────────────────────
// relay.rs — RFQ relay bus session
//
// Replaces the teacher's Redis pub/sub bridge (publisher.rs) with a
// bidirectional JSON-RPC-shaped WebSocket session, since the relay here
// *is* the bus rather than an internal IPC channel. The reconnect loop
// (exponential backoff, stall-free since it's driven by the read loop
// itself) is the same shape as `venue.rs::connect_and_listen`.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(8);
const MAX_BACKOFF_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub enum RelayError {
    Timeout,
    ConnectionClosed,
    Relay(String),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::Timeout => write!(f, "publish acknowledgement timed out"),
            RelayError::ConnectionClosed => write!(f, "relay connection closed"),
            RelayError::Relay(s) => write!(f, "relay rejected publish: {}", s),
        }
    }
}

impl std::error::Error for RelayError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequestEvent {
    pub request_id: String,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Option<String>,
    pub amount_out: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub quote_hash: String,
    pub intent_hash: String,
}

pub enum RelayEvent {
    QuoteRequest(QuoteRequestEvent),
    Settlement(SettlementEvent),
}

/// Shared handle for publishing onto the relay session from other tasks.
#[derive(Clone)]
pub struct RelayHandle {
    next_id: Arc<AtomicU64>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

struct OutboundMessage {
    id: u64,
    payload: serde_json::Value,
    reply: oneshot::Sender<Result<(), RelayError>>,
}

impl RelayHandle {
    /// Publishes a signed quote response and awaits the relay's ack/nack,
    /// timing out after `PUBLISH_TIMEOUT`.
    pub async fn publish_quote_response(&self, body: serde_json::Value) -> Result<(), RelayError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "publish",
            "params": { "channel": "quote_response", "data": body },
        });

        self.outbound
            .send(OutboundMessage { id, payload, reply: tx })
            .map_err(|_| RelayError::ConnectionClosed)?;

        match tokio::time::timeout(PUBLISH_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RelayError::ConnectionClosed),
            Err(_) => Err(RelayError::Timeout),
        }
    }
}

/// Runs the relay session for the life of the process: subscribes to quote
/// requests and settlement notifications, routes inbound events to
/// `events_tx`, and reconnects with exponential backoff on disconnect.
/// Returns a `RelayHandle` immediately — callers don't wait for the first
/// connection before they can enqueue publishes (they'll simply queue
/// until a session is up, matching how the outbound channel buffers).
pub fn spawn(relay_url: String, events_tx: mpsc::UnboundedSender<RelayEvent>) -> RelayHandle {
    let next_id = Arc::new(AtomicU64::new(1));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    tokio::spawn(run_session(relay_url, events_tx, outbound_rx));

    RelayHandle {
        next_id,
        outbound: outbound_tx,
    }
}

async fn run_session(
    relay_url: String,
    events_tx: mpsc::UnboundedSender<RelayEvent>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
) {
    let outbound_rx = Arc::new(Mutex::new(outbound_rx));
    let mut retry_delay_secs: u64 = 5;

    loop {
        log::info!("[RELAY] connecting to {}", relay_url);
        let url = match Url::parse(&relay_url) {
            Ok(u) => u,
            Err(e) => {
                log::error!("[RELAY] invalid relay url: {}", e);
                return;
            }
        };

        match connect_async(url).await {
            Ok((ws_stream, _)) => {
                log::info!("[RELAY] connected");
                retry_delay_secs = 5;
                let (mut write, mut read) = ws_stream.split();

                for (sub_id, channel) in [(1u64, "quote_requests"), (2u64, "settlements")] {
                    let sub = serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": sub_id,
                        "method": "subscribe",
                        "params": { "channel": channel },
                    });
                    if let Err(e) = write.send(Message::Text(sub.to_string())).await {
                        log::error!("[RELAY] subscribe to {} failed: {}", channel, e);
                    }
                }

                let pending: std::sync::Mutex<HashMap<u64, oneshot::Sender<Result<(), RelayError>>>> =
                    std::sync::Mutex::new(HashMap::new());
                let subs: std::sync::Mutex<HashMap<u64, &'static str>> = std::sync::Mutex::new(HashMap::new());

                let outbound_rx = outbound_rx.clone();
                let drain_handle = {
                    let pending = &pending;
                    async {
                        loop {
                            let msg = {
                                let mut rx = outbound_rx.lock().await;
                                rx.recv().await
                            };
                            match msg {
                                Some(out) => {
                                    pending.lock().unwrap().insert(out.id, out.reply);
                                    if write.send(Message::Text(out.payload.to_string())).await.is_err() {
                                        if let Some(reply) = pending.lock().unwrap().remove(&out.id) {
                                            let _ = reply.send(Err(RelayError::ConnectionClosed));
                                        }
                                        break;
                                    }
                                }
                                None => break,
                            }
                        }
                    }
                };

                let read_handle = async {
                    while let Some(msg) = read.next().await {
                        match msg {
                            Ok(Message::Text(text)) => {
                                route_message(&text, &pending, &subs, &events_tx);
                            }
                            Ok(Message::Close(_)) => {
                                log::warn!("[RELAY] connection closed by server");
                                break;
                            }
                            Err(e) => {
                                log::error!("[RELAY] ws error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                };

                tokio::select! {
                    _ = drain_handle => {}
                    _ = read_handle => {}
                }

                for (_, reply) in pending.lock().unwrap().drain() {
                    let _ = reply.send(Err(RelayError::ConnectionClosed));
                }
            }
            Err(e) => {
                log::error!("[RELAY] connect failed: {}. retrying in {}s", e, retry_delay_secs);
            }
        }

        tokio::time::sleep(Duration::from_secs(retry_delay_secs)).await;
        retry_delay_secs = (retry_delay_secs * 2).min(MAX_BACKOFF_SECS);
    }
}

fn route_message(
    text: &str,
    pending: &std::sync::Mutex<HashMap<u64, oneshot::Sender<Result<(), RelayError>>>>,
    subs: &std::sync::Mutex<HashMap<u64, &'static str>>,
    events_tx: &mpsc::UnboundedSender<RelayEvent>,
) {
    let parsed: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return,
    };

    if let Some(id) = parsed.get("id").and_then(|v| v.as_u64()) {
        if let Some(result) = parsed.get("result") {
            if let Some(sub_id) = result.get("subscription_id").and_then(|v| v.as_u64()) {
                let channel = match id {
                    1 => "quote_requests",
                    2 => "settlements",
                    _ => "unknown",
                };
                subs.lock().unwrap().insert(sub_id, channel);
                return;
            }
            if let Some(reply) = pending.lock().unwrap().remove(&id) {
                let _ = reply.send(Ok(()));
            }
            return;
        }
        if let Some(err) = parsed.get("error") {
            if let Some(reply) = pending.lock().unwrap().remove(&id) {
                let _ = reply.send(Err(RelayError::Relay(err.to_string())));
            }
            return;
        }
    }

    if let Some(params) = parsed.get("params") {
        let sub_id = params.get("subscription").and_then(|v| v.as_u64());
        let channel = sub_id.and_then(|id| subs.lock().unwrap().get(&id).copied());
        match channel {
            Some("quote_requests") => {
                if let Ok(event) = serde_json::from_value::<QuoteRequestEvent>(params["data"].clone()) {
                    let _ = events_tx.send(RelayEvent::QuoteRequest(event));
                }
            }
            Some("settlements") => {
                if let Ok(event) = serde_json::from_value::<SettlementEvent>(params["data"].clone()) {
                    let _ = events_tx.send(RelayEvent::Settlement(event));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_message_ignores_malformed_json() {
        let pending = std::sync::Mutex::new(HashMap::new());
        let subs = std::sync::Mutex::new(HashMap::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        route_message("not json", &pending, &subs, &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_route_message_records_subscription_ack() {
        let pending = std::sync::Mutex::new(HashMap::new());
        let subs = std::sync::Mutex::new(HashMap::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let msg = serde_json::json!({
            "id": 1,
            "result": { "subscription_id": 42 },
        })
        .to_string();
        route_message(&msg, &pending, &subs, &tx);
        assert_eq!(subs.lock().unwrap().get(&42), Some(&"quote_requests"));
    }

    #[test]
    fn test_route_message_dispatches_quote_request_event() {
        let pending = std::sync::Mutex::new(HashMap::new());
        let subs = std::sync::Mutex::new(HashMap::new());
        subs.lock().unwrap().insert(42, "quote_requests");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let msg = serde_json::json!({
            "params": {
                "subscription": 42,
                "data": {
                    "request_id": "r1",
                    "token_in": "btc.omft.near",
                    "token_out": "usdt.omft.near",
                    "amount_in": "100000000",
                    "amount_out": null,
                }
            }
        })
        .to_string();
        route_message(&msg, &pending, &subs, &tx);
        match rx.try_recv().unwrap() {
            RelayEvent::QuoteRequest(event) => assert_eq!(event.request_id, "r1"),
            _ => panic!("expected quote request event"),
        }
    }

}
