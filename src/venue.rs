// ─────────────────────────────────────────────────────────────────────────────
// venue.rs — Perpetual venue client
//
// Streams L2 book updates into a shared OrderBook, serves cached account
// state (margin/position/funding), and submits IOC hedge orders. Generalizes
// the teacher's `ExchangeClient`/`LiveExchange`/`SimExchange` (exchange.rs)
// plus the L2 reconnect loop from ingestor.rs, narrowed to a single BTC
// perpetual instead of a multi-coin universe.
// ─────────────────────────────────────────────────────────────────────────────
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::orderbook::{Level, OrderBook};

const ACCOUNT_CACHE_TTL: Duration = Duration::from_secs(10);
const FUNDING_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub enum VenueError {
    NotInitialized,
    BookStale,
    Network(String),
    Rejected(String),
}

impl std::fmt::Display for VenueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VenueError::NotInitialized => write!(f, "venue client not initialized"),
            VenueError::BookStale => write!(f, "order book is stale"),
            VenueError::Network(s) => write!(f, "network error: {}", s),
            VenueError::Rejected(s) => write!(f, "order rejected: {}", s),
        }
    }
}

impl std::error::Error for VenueError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgeDirection {
    Short,
    Long,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub margin_usd: f64,
    pub perp_btc: f64,
}

#[derive(Debug, Clone)]
pub struct HedgeFill {
    pub price: f64,
    pub size: f64,
}

#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn account_state(&mut self) -> Result<AccountState, VenueError>;
    async fn funding_rate_hourly(&mut self) -> Result<f64, VenueError>;
    /// Submits an IOC limit order sized to close `size` BTC in `direction`,
    /// at a limit price the caller has already slippage-adjusted.
    async fn execute_hedge(
        &mut self,
        direction: HedgeDirection,
        size: f64,
        limit_price: f64,
    ) -> Result<HedgeFill, VenueError>;
}

// ─── Live venue client ──────────────────────────────────────────────────────

pub struct LiveVenueClient {
    base_url: String,
    account_id: String,
    client: reqwest::Client,
    cached_account: Option<(AccountState, Instant)>,
    cached_funding: Option<(f64, Instant)>,
}

impl LiveVenueClient {
    pub fn new(account_id: String, testnet: bool) -> Self {
        let base_url = if testnet {
            "https://api.testnet.hyperliquid.xyz".to_string()
        } else {
            "https://api.hyperliquid.xyz".to_string()
        };
        Self {
            base_url,
            account_id,
            client: reqwest::Client::new(),
            cached_account: None,
            cached_funding: None,
        }
    }

    async fn post_info(&self, payload: serde_json::Value) -> Result<serde_json::Value, VenueError> {
        let resp = self
            .client
            .post(format!("{}/info", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| VenueError::Network(e.to_string()))?;
        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| VenueError::Network(e.to_string()))
    }
}

#[async_trait]
impl VenueClient for LiveVenueClient {
    async fn account_state(&mut self) -> Result<AccountState, VenueError> {
        if let Some((state, ts)) = &self.cached_account {
            if ts.elapsed() < ACCOUNT_CACHE_TTL {
                return Ok(state.clone());
            }
        }

        let data = self
            .post_info(serde_json::json!({ "type": "clearinghouseState", "user": self.account_id }))
            .await?;

        let margin_usd = data["marginSummary"]["accountValue"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);

        let mut perp_btc = 0.0;
        if let Some(positions) = data["assetPositions"].as_array() {
            for p in positions {
                let pos = &p["position"];
                if pos["coin"].as_str() == Some("BTC") {
                    perp_btc = pos["szi"]
                        .as_str()
                        .and_then(|s| s.parse::<f64>().ok())
                        .unwrap_or(0.0);
                }
            }
        }

        let state = AccountState { margin_usd, perp_btc };
        self.cached_account = Some((state.clone(), Instant::now()));
        Ok(state)
    }

    async fn funding_rate_hourly(&mut self) -> Result<f64, VenueError> {
        if let Some((rate, ts)) = self.cached_funding {
            if ts.elapsed() < FUNDING_CACHE_TTL {
                return Ok(rate);
            }
        }

        let data = self
            .post_info(serde_json::json!({ "type": "metaAndAssetCtxs" }))
            .await?;

        let mut rate = 0.0;
        if let Some(arr) = data.as_array() {
            if let Some(universe) = arr.get(0).and_then(|v| v["universe"].as_array()) {
                if let Some(idx) = universe.iter().position(|a| a["name"].as_str() == Some("BTC")) {
                    if let Some(ctxs) = arr.get(1).and_then(|v| v.as_array()) {
                        if let Some(ctx) = ctxs.get(idx) {
                            rate = ctx["funding"]
                                .as_str()
                                .and_then(|s| s.parse::<f64>().ok())
                                .unwrap_or(0.0);
                        }
                    }
                }
            }
        }

        self.cached_funding = Some((rate, Instant::now()));
        Ok(rate)
    }

    async fn execute_hedge(
        &mut self,
        direction: HedgeDirection,
        size: f64,
        limit_price: f64,
    ) -> Result<HedgeFill, VenueError> {
        let is_buy = matches!(direction, HedgeDirection::Long);
        let payload = serde_json::json!({
            "account": self.account_id,
            "coin": "BTC",
            "is_buy": is_buy,
            "limit_px": round_tick(limit_price),
            "sz": size,
            "reduce_only": false,
            "tif": "Ioc",
        });

        let resp = self
            .client
            .post(format!("{}/exchange", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| VenueError::Network(e.to_string()))?;
        let data: serde_json::Value = resp.json().await.map_err(|e| VenueError::Network(e.to_string()))?;

        if data["status"].as_str() == Some("err") {
            return Err(VenueError::Rejected(data["response"].to_string()));
        }

        self.cached_account = None;
        Ok(HedgeFill {
            price: round_tick(limit_price),
            size,
        })
    }
}

fn round_tick(price: f64) -> f64 {
    (price * 10.0).round() / 10.0
}

// ─── Sim venue client (for tests / shadow runs) ────────────────────────────

pub struct SimVenueClient {
    pub margin_usd: f64,
    pub perp_btc: f64,
    pub funding_rate_hourly: f64,
    pub reject_next: bool,
}

impl SimVenueClient {
    pub fn new(margin_usd: f64, perp_btc: f64, funding_rate_hourly: f64) -> Self {
        Self {
            margin_usd,
            perp_btc,
            funding_rate_hourly,
            reject_next: false,
        }
    }
}

#[async_trait]
impl VenueClient for SimVenueClient {
    async fn account_state(&mut self) -> Result<AccountState, VenueError> {
        Ok(AccountState {
            margin_usd: self.margin_usd,
            perp_btc: self.perp_btc,
        })
    }

    async fn funding_rate_hourly(&mut self) -> Result<f64, VenueError> {
        Ok(self.funding_rate_hourly)
    }

    async fn execute_hedge(
        &mut self,
        direction: HedgeDirection,
        size: f64,
        limit_price: f64,
    ) -> Result<HedgeFill, VenueError> {
        if self.reject_next {
            self.reject_next = false;
            return Err(VenueError::Rejected("sim rejection".to_string()));
        }
        match direction {
            HedgeDirection::Short => self.perp_btc -= size,
            HedgeDirection::Long => self.perp_btc += size,
        }
        Ok(HedgeFill {
            price: limit_price,
            size,
        })
    }
}

// ─── L2 stream ingestion ────────────────────────────────────────────────────

const WS_URL: &str = "wss://api.hyperliquid.xyz/ws";
const TESTNET_WS_URL: &str = "wss://api.testnet.hyperliquid.xyz/ws";
const STALL_TIMEOUT_SECS: u64 = 30;

pub type StallFlag = Arc<AtomicBool>;

pub fn new_stall_flag() -> StallFlag {
    Arc::new(AtomicBool::new(false))
}

#[derive(Debug, Deserialize)]
struct WireLevel {
    px: String,
    sz: String,
}

/// Connects to the venue's `l2Book` channel for BTC and keeps `book` updated.
/// Reconnects with exponential backoff on any disconnect, matching the
/// teacher's `ingestor::connect_and_listen` loop, narrowed to one coin.
pub async fn connect_and_listen(
    book: Arc<Mutex<OrderBook>>,
    stall: StallFlag,
    testnet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = if testnet { TESTNET_WS_URL } else { WS_URL };
    let last_message_ms = Arc::new(std::sync::atomic::AtomicU64::new(now_ms()));

    // Resubscribes are serialized through this single loop: only one
    // connect/subscribe sequence is ever in flight, whether triggered by a
    // dropped socket or by the staleness watchdog below tearing it down.
    let mut retry_delay_secs: u64 = 1;
    loop {
        log::info!("[VENUE] connecting to {}", url);
        match connect_async(Url::parse(url)?).await {
            Ok((ws_stream, _)) => {
                log::info!("[VENUE] connected");
                retry_delay_secs = 1;
                stall.store(false, Ordering::SeqCst);
                let (mut write, mut read) = ws_stream.split();

                let sub = serde_json::json!({
                    "method": "subscribe",
                    "subscription": { "type": "l2Book", "coin": "BTC" }
                });
                if let Err(e) = write.send(Message::Text(sub.to_string())).await {
                    log::error!("[VENUE] subscribe failed: {}", e);
                }

                last_message_ms.store(now_ms(), Ordering::SeqCst);
                let mut watchdog = tokio::time::interval(Duration::from_secs(10));

                loop {
                    tokio::select! {
                        msg = read.next() => {
                            let msg = match msg {
                                Some(m) => m,
                                None => {
                                    log::warn!("[VENUE] stream ended. reconnecting...");
                                    break;
                                }
                            };
                            last_message_ms.store(now_ms(), Ordering::SeqCst);
                            match msg {
                                Ok(Message::Text(text)) => {
                                    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) {
                                        if parsed["channel"].as_str() == Some("l2Book") {
                                            if let Some(levels) = parsed["data"]["levels"].as_array() {
                                                let bids = parse_levels(levels.get(0));
                                                let asks = parse_levels(levels.get(1));
                                                book.lock().unwrap().apply_snapshot(bids, asks, now_ms());
                                            }
                                        }
                                    }
                                }
                                Ok(Message::Ping(data)) => {
                                    let _ = write.send(Message::Pong(data)).await;
                                }
                                Ok(Message::Close(_)) => {
                                    log::warn!("[VENUE] connection closed by server. reconnecting...");
                                    break;
                                }
                                Err(e) => {
                                    log::error!("[VENUE] ws error: {}. reconnecting...", e);
                                    break;
                                }
                                _ => {}
                            }
                        }
                        _ = watchdog.tick() => {
                            let age_ms = now_ms().saturating_sub(last_message_ms.load(Ordering::SeqCst));
                            let idle = age_ms > STALL_TIMEOUT_SECS * 1_000;
                            stall.store(idle, Ordering::SeqCst);
                            if idle {
                                log::warn!("[VENUE] book idle for {}ms, tearing down and resubscribing", age_ms);
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                log::error!("[VENUE] connect failed: {}. retrying in {}s", e, retry_delay_secs);
            }
        }
        tokio::time::sleep(Duration::from_secs(retry_delay_secs)).await;
        retry_delay_secs = (retry_delay_secs * 2).min(32);
    }
}

fn parse_levels(raw: Option<&serde_json::Value>) -> Vec<Level> {
    raw.and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| serde_json::from_value::<WireLevel>(v.clone()).ok())
                .filter_map(|l| {
                    Some(Level {
                        price: l.px.parse().ok()?,
                        size: l.sz.parse().ok()?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
