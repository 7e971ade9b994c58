// ─────────────────────────────────────────────────────────────────────────────
// hedger.rs — Settlement detector + hedge execution pipeline
//
// Dual settlement paths (event-driven via the relay, polling via the chain)
// converge on the same idempotent hedge routine, guarded by a bounded
// HedgedSet — the same "single-flight via shared guard" idiom risk.rs uses
// for its refresh, just keyed per-nonce instead of a single flag. The
// PendingQuote dual index (by_nonce / by_quote_hash) is an ownership-by-
// lookup pattern: one map owns the record, the other only points at its key.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::audit::{now_iso8601, AuditLog, QuoteTraceRecord, TradeRecord};
use crate::chain::ChainClient;
use crate::orderbook::{OrderBook, Side};
use crate::risk::InventoryManager;
use crate::venue::{HedgeDirection, VenueClient};

const POLL_INTERVAL: Duration = Duration::from_millis(1_500);
const POLL_BATCH_SIZE: usize = 5;
const POLL_BATCH_PAUSE: Duration = Duration::from_millis(50);
const EXPIRY_GRACE_MS: u64 = 30_000;
const HEDGED_SET_CAP: usize = 500;
const INTENT_DEDUP_CAP: usize = 200;
const MAX_CONSECUTIVE_POLL_FAILURES: u32 = 5;

#[derive(Debug, Clone)]
pub struct PendingQuote {
    pub nonce: String,
    pub quote_hash: String,
    pub hedge_direction: HedgeDirection,
    pub btc_size: f64,
    pub deadline_ms: u64,
    pub first_seen_ms: u64,
    pub quoted_price: Option<f64>,
    pub spread_bps: Option<f64>,
}

/// Dual index over the same set of records: `by_nonce` owns each
/// `PendingQuote`, `quote_hash_to_nonce` only points at its owning key. Every
/// insertion and removal touches both maps so they never drift apart.
#[derive(Default)]
struct PendingQuotes {
    by_nonce: HashMap<String, PendingQuote>,
    quote_hash_to_nonce: HashMap<String, String>,
}

impl PendingQuotes {
    fn insert(&mut self, quote: PendingQuote) {
        self.quote_hash_to_nonce
            .insert(quote.quote_hash.clone(), quote.nonce.clone());
        self.by_nonce.insert(quote.nonce.clone(), quote);
    }

    fn remove_by_nonce(&mut self, nonce: &str) -> Option<PendingQuote> {
        let quote = self.by_nonce.remove(nonce)?;
        self.quote_hash_to_nonce.remove(&quote.quote_hash);
        Some(quote)
    }

    fn remove_by_quote_hash(&mut self, quote_hash: &str) -> Option<PendingQuote> {
        let nonce = self.quote_hash_to_nonce.remove(quote_hash)?;
        self.by_nonce.remove(&nonce)
    }

    fn sweep_expired(&mut self, now_ms: u64) -> Vec<PendingQuote> {
        let expired_nonces: Vec<String> = self
            .by_nonce
            .values()
            .filter(|q| now_ms > q.deadline_ms + EXPIRY_GRACE_MS)
            .map(|q| q.nonce.clone())
            .collect();
        expired_nonces
            .into_iter()
            .filter_map(|n| self.remove_by_nonce(&n))
            .collect()
    }
}

/// Bounded idempotency guard. Insertion order is tracked so that once the cap
/// is hit the oldest fifth can be evicted, since it only matters for settling
/// competing observations of quotes that finished minutes ago.
#[derive(Default)]
struct HedgedSet {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl HedgedSet {
    fn contains(&self, nonce: &str) -> bool {
        self.members.contains(nonce)
    }

    fn insert(&mut self, nonce: String) {
        if self.members.insert(nonce.clone()) {
            self.order.push_back(nonce);
        }
        if self.order.len() > HEDGED_SET_CAP {
            let evict_count = HEDGED_SET_CAP / 5;
            for _ in 0..evict_count {
                if let Some(oldest) = self.order.pop_front() {
                    self.members.remove(&oldest);
                }
            }
        }
    }
}

pub struct Hedger {
    venue: Arc<AsyncMutex<Box<dyn VenueClient>>>,
    chain: Arc<dyn ChainClient>,
    book: Arc<Mutex<OrderBook>>,
    inventory: Arc<InventoryManager>,
    audit: Arc<AuditLog>,
    hedge_slippage_bps: f64,
    hedging_enabled: bool,
    pending: Mutex<PendingQuotes>,
    hedged: Mutex<HedgedSet>,
    seen_intent_hashes: Mutex<VecDeque<String>>,
    consecutive_poll_failures: AtomicU32,
}

impl Hedger {
    pub fn new(
        venue: Arc<AsyncMutex<Box<dyn VenueClient>>>,
        chain: Arc<dyn ChainClient>,
        book: Arc<Mutex<OrderBook>>,
        inventory: Arc<InventoryManager>,
        audit: Arc<AuditLog>,
        hedge_slippage_bps: f64,
        hedging_enabled: bool,
    ) -> Self {
        Self {
            venue,
            chain,
            book,
            inventory,
            audit,
            hedge_slippage_bps,
            hedging_enabled,
            pending: Mutex::new(PendingQuotes::default()),
            hedged: Mutex::new(HedgedSet::default()),
            seen_intent_hashes: Mutex::new(VecDeque::new()),
            consecutive_poll_failures: AtomicU32::new(0),
        }
    }

    /// Called strictly after a publish acknowledgement returns. A settlement
    /// notification that races ahead of this call simply finds no mapping
    /// and is treated as "other solver won" — not an error.
    #[allow(clippy::too_many_arguments)]
    pub fn track_quote(
        &self,
        nonce: String,
        quote_hash: String,
        hedge_direction: HedgeDirection,
        btc_size: f64,
        deadline_ms: u64,
        quoted_price: Option<f64>,
        spread_bps: Option<f64>,
        now_ms: u64,
    ) {
        self.pending.lock().unwrap().insert(PendingQuote {
            nonce,
            quote_hash,
            hedge_direction,
            btc_size,
            deadline_ms,
            first_seen_ms: now_ms,
            quoted_price,
            spread_bps,
        });
    }

    /// Event-driven settlement path: matches a relay settlement notice by
    /// `quote_hash`.
    pub async fn on_settlement_event(&self, quote_hash: &str, intent_hash: &str, now_ms: u64) {
        let quote = self.pending.lock().unwrap().remove_by_quote_hash(quote_hash);
        match quote {
            Some(q) => self.settle(q, "event", now_ms).await,
            None => self.log_other_solver_won(intent_hash),
        }
    }

    fn log_other_solver_won(&self, intent_hash: &str) {
        let mut seen = self.seen_intent_hashes.lock().unwrap();
        if seen.contains(&intent_hash.to_string()) {
            return;
        }
        seen.push_back(intent_hash.to_string());
        if seen.len() > INTENT_DEDUP_CAP {
            seen.pop_front();
        }
        drop(seen);
        log::info!("[HEDGE] settlement for unknown quote_hash, intent_hash={} (other solver won)", intent_hash);
    }

    /// Polling fallback: sweeps expired records, then walks the remaining
    /// pending nonces in batches of `POLL_BATCH_SIZE`, checking
    /// `was_nonce_used` with a pause between batches to respect the chain
    /// RPC's rate limit.
    pub async fn poll_once(&self, now_ms: u64) {
        let expired = self.pending.lock().unwrap().sweep_expired(now_ms);
        for quote in expired {
            self.audit.record_quote_trace(&QuoteTraceRecord {
                timestamp: now_iso8601(),
                kind: "QUOTE_EXPIRED",
                request_id: None,
                nonce: Some(quote.nonce.clone()),
                detail: format!("deadline_ms={} now_ms={}", quote.deadline_ms, now_ms),
            });
            log::info!("[HEDGE] quote expired nonce={}", quote.nonce);
        }

        let nonces: Vec<String> = self.pending.lock().unwrap().by_nonce.keys().cloned().collect();
        let mut batch_had_failure = false;

        for chunk in nonces.chunks(POLL_BATCH_SIZE) {
            for nonce in chunk {
                match self.chain.was_nonce_used(nonce).await {
                    Ok(true) => {
                        if let Some(q) = self.pending.lock().unwrap().remove_by_nonce(nonce) {
                            self.settle(q, "poll", now_ms).await;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        log::warn!("[HEDGE] was_nonce_used failed for {}: {}", nonce, e);
                        batch_had_failure = true;
                    }
                }
            }
            tokio::time::sleep(POLL_BATCH_PAUSE).await;
        }

        if batch_had_failure {
            let failures = self.consecutive_poll_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if failures >= MAX_CONSECUTIVE_POLL_FAILURES {
                self.inventory.set_emergency();
            }
        } else {
            self.consecutive_poll_failures.store(0, Ordering::SeqCst);
        }
    }

    /// Runs the polling loop for the life of the process.
    pub async fn run_polling_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            self.poll_once(now_ms()).await;
        }
    }

    /// Idempotent settlement handler shared by both paths: checks the
    /// HedgedSet, then either records a disabled-hedging detection or
    /// executes the hedge.
    async fn settle(&self, quote: PendingQuote, source: &str, now_ms: u64) {
        if self.hedged.lock().unwrap().contains(&quote.nonce) {
            return;
        }

        if !self.hedging_enabled {
            self.hedged.lock().unwrap().insert(quote.nonce.clone());
            self.audit.record_quote_trace(&QuoteTraceRecord {
                timestamp: now_iso8601(),
                kind: "SETTLEMENT_DETECTED",
                request_id: None,
                nonce: Some(quote.nonce.clone()),
                detail: "reason=hedging_disabled".to_string(),
            });
            log::info!("[HEDGE] settlement detected nonce={} source={} reason=hedging_disabled", quote.nonce, source);
            return;
        }

        self.hedged.lock().unwrap().insert(quote.nonce.clone());
        self.execute_hedge(quote, source, now_ms).await;
    }

    /// Walks the taker side of the book at the required size, applies
    /// `hedge_slippage_bps` in the hostile direction, and submits an IOC
    /// limit order. Tick rounding happens at the venue layer (it knows the
    /// instrument's precision).
    async fn execute_hedge(&self, quote: PendingQuote, source: &str, now_ms: u64) {
        let taker_side = match quote.hedge_direction {
            HedgeDirection::Short => Side::Bid,
            HedgeDirection::Long => Side::Ask,
        };

        let vwap = {
            let book = self.book.lock().unwrap();
            book.vwap(taker_side, quote.btc_size, now_ms)
        };

        let vwap = match vwap {
            Ok(p) => p,
            Err(e) => {
                log::error!("[HEDGE] cannot compute hedge limit price nonce={}: {:?}", quote.nonce, e);
                self.on_hedge_failed(&quote, "no reference price".to_string());
                return;
            }
        };

        let slippage = self.hedge_slippage_bps / 10_000.0;
        let limit_price = match quote.hedge_direction {
            HedgeDirection::Short => vwap * (1.0 - slippage),
            HedgeDirection::Long => vwap * (1.0 + slippage),
        };

        let mut venue = self.venue.lock().await;
        match venue.execute_hedge(quote.hedge_direction, quote.btc_size, limit_price).await {
            Ok(fill) => {
                drop(venue);
                self.inventory.clear_emergency();

                let realized_pnl_usd = quote.quoted_price.map(|quoted| {
                    let sign = match quote.hedge_direction {
                        HedgeDirection::Short => 1.0,
                        HedgeDirection::Long => -1.0,
                    };
                    sign * (fill.price - quoted) * quote.btc_size
                });

                self.audit.record_trade(&TradeRecord {
                    timestamp: now_iso8601(),
                    kind: "HEDGE_EXECUTED",
                    nonce: quote.nonce.clone(),
                    hedge_direction: direction_label(quote.hedge_direction).to_string(),
                    btc_size: quote.btc_size,
                    hedge_price: Some(fill.price),
                    quoted_price: quote.quoted_price,
                    realized_pnl_usd,
                });
                log::info!(
                    "[HEDGE] executed nonce={} source={} direction={} size={} price={} pnl_usd={:?}",
                    quote.nonce, source, direction_label(quote.hedge_direction), quote.btc_size, fill.price, realized_pnl_usd,
                );
            }
            Err(e) => {
                drop(venue);
                log::error!("[HEDGE] execute_hedge failed nonce={}: {}", quote.nonce, e);
                self.on_hedge_failed(&quote, e.to_string());
            }
        }
    }

    fn on_hedge_failed(&self, quote: &PendingQuote, reason: String) {
        self.inventory.set_emergency();
        self.audit.record_trade(&TradeRecord {
            timestamp: now_iso8601(),
            kind: "HEDGE_FAILED",
            nonce: quote.nonce.clone(),
            hedge_direction: direction_label(quote.hedge_direction).to_string(),
            btc_size: quote.btc_size,
            hedge_price: None,
            quoted_price: quote.quoted_price,
            realized_pnl_usd: None,
        });
        log::error!("[HEDGE] failed nonce={} reason={}", quote.nonce, reason);
    }
}

fn direction_label(direction: HedgeDirection) -> &'static str {
    match direction {
        HedgeDirection::Short => "short",
        HedgeDirection::Long => "long",
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SimChainClient;
    use crate::config::Config;
    use crate::orderbook::Level;
    use crate::venue::SimVenueClient;

    fn key() -> ed25519_dalek::SigningKey {
        ed25519_dalek::SigningKey::from_bytes(&[4u8; 32])
    }

    fn config() -> Config {
        Config {
            max_btc_inventory: 5.0,
            min_usd_reserve: 500.0,
            target_spread_bips: 30.0,
            base_spread_bips: 20.0,
            max_spread_bips: 50.0,
            min_trade_size_btc: 0.0005,
            max_trade_size_btc: 1.0,
            min_margin_threshold: 200.0,
            max_negative_funding_rate_hourly: -0.001,
            drift_threshold_btc: 0.01,
            hedge_slippage_bps: 15.0,
            max_orderbook_age_ms: 5_000,
            hedging_enabled: true,
            dynamic_spread_enabled: false,
            relay_url: "wss://example".into(),
            venue_testnet: true,
            solver_signing_key: "x".into(),
            chain_account_id: "solver.near".into(),
            chain_rpc_url: "https://rpc.mainnet.near.org".into(),
            btc_token_ids: vec!["btc.omft.near".into()],
            usd_token_ids: vec!["usdt.omft.near".into()],
            status_bind_addr: "127.0.0.1:0".into(),
        }
    }

    fn book() -> Arc<Mutex<OrderBook>> {
        let mut ob = OrderBook::new(5_000);
        ob.apply_snapshot(
            vec![Level { price: 100_000.0, size: 10.0 }],
            vec![Level { price: 100_100.0, size: 10.0 }],
            1_000,
        );
        Arc::new(Mutex::new(ob))
    }

    fn hedger() -> Arc<Hedger> {
        hedger_with(SimVenueClient::new(10_000.0, 0.0, 0.0001), Arc::new(SimChainClient::new(key())))
    }

    fn hedger_with(venue: SimVenueClient, chain: Arc<SimChainClient>) -> Arc<Hedger> {
        let cfg = config();
        let audit_dir = std::env::temp_dir().join(format!("mm-hedger-test-{:?}", std::thread::current().id()));
        Arc::new(Hedger::new(
            Arc::new(AsyncMutex::new(Box::new(venue) as Box<dyn VenueClient>)),
            chain,
            book(),
            Arc::new(InventoryManager::new(&cfg)),
            Arc::new(AuditLog::new(audit_dir.to_string_lossy().to_string())),
            cfg.hedge_slippage_bps,
            cfg.hedging_enabled,
        ))
    }

    #[tokio::test]
    async fn test_event_driven_settlement_executes_hedge_once() {
        let h = hedger();
        h.track_quote(
            "n1".to_string(),
            "h1".to_string(),
            HedgeDirection::Short,
            0.01,
            10_000,
            Some(100_050.0),
            Some(20.0),
            1_000,
        );
        h.on_settlement_event("h1", "i1", 1_500).await;
        assert!(h.hedged.lock().unwrap().contains("n1"));
        assert!(h.pending.lock().unwrap().by_nonce.is_empty());

        // A second delivery of the same settlement must not re-hedge.
        h.track_quote(
            "n1".to_string(),
            "h1".to_string(),
            HedgeDirection::Short,
            0.01,
            10_000,
            Some(100_050.0),
            Some(20.0),
            1_000,
        );
        h.on_settlement_event("h1", "i1", 1_600).await;
        assert!(h.pending.lock().unwrap().by_nonce.contains_key("n1"));
    }

    #[tokio::test]
    async fn test_settlement_for_unknown_hash_is_harmless() {
        let h = hedger();
        h.on_settlement_event("missing", "i2", 1_000).await;
        assert!(h.pending.lock().unwrap().by_nonce.is_empty());
    }

    #[tokio::test]
    async fn test_poll_leaves_unused_nonce_pending() {
        let h = hedger();
        h.track_quote(
            "n2".to_string(),
            "h2".to_string(),
            HedgeDirection::Long,
            0.02,
            10_000,
            None,
            None,
            1_000,
        );
        h.poll_once(2_000).await;
        assert!(h.pending.lock().unwrap().by_nonce.contains_key("n2"));
        assert!(!h.hedged.lock().unwrap().contains("n2"));
    }

    #[tokio::test]
    async fn test_poll_detects_used_nonce_and_hedges() {
        let chain = Arc::new(SimChainClient::new(key()));
        chain.mark_nonce_used("n5");
        let h = hedger_with(SimVenueClient::new(10_000.0, 0.0, 0.0001), chain);
        h.track_quote(
            "n5".to_string(),
            "h5".to_string(),
            HedgeDirection::Long,
            0.02,
            10_000,
            Some(100_050.0),
            Some(20.0),
            1_000,
        );
        h.poll_once(2_000).await;
        assert!(!h.pending.lock().unwrap().by_nonce.contains_key("n5"));
        assert!(h.hedged.lock().unwrap().contains("n5"));
    }

    #[tokio::test]
    async fn test_expiry_sweep_removes_stale_quote() {
        let h = hedger();
        h.track_quote(
            "n3".to_string(),
            "h3".to_string(),
            HedgeDirection::Short,
            0.01,
            1_000,
            None,
            None,
            1_000,
        );
        h.poll_once(1_000 + EXPIRY_GRACE_MS + 1).await;
        assert!(h.pending.lock().unwrap().by_nonce.is_empty());
        assert!(h.hedged.lock().unwrap().contains("n3") == false);
    }

    #[tokio::test]
    async fn test_hedge_failure_trips_emergency_mode() {
        let mut venue = SimVenueClient::new(10_000.0, 0.0, 0.0001);
        venue.reject_next = true;
        let h = hedger_with(venue, Arc::new(SimChainClient::new(key())));

        h.track_quote(
            "n4".to_string(),
            "h4".to_string(),
            HedgeDirection::Short,
            0.01,
            10_000,
            Some(100_000.0),
            Some(20.0),
            1_000,
        );
        h.on_settlement_event("h4", "i4", 1_500).await;

        assert!(h.inventory.is_emergency());
    }

    #[tokio::test]
    async fn test_successful_hedge_clears_emergency_mode() {
        let h = hedger();
        h.inventory.set_emergency();

        h.track_quote(
            "n6".to_string(),
            "h6".to_string(),
            HedgeDirection::Short,
            0.01,
            10_000,
            Some(100_000.0),
            Some(20.0),
            1_000,
        );
        h.on_settlement_event("h6", "i6", 1_500).await;

        assert!(!h.inventory.is_emergency());
    }

    #[test]
    fn test_hedged_set_evicts_oldest_fifth_over_cap() {
        let mut set = HedgedSet::default();
        for i in 0..(HEDGED_SET_CAP + 1) {
            set.insert(format!("n{}", i));
        }
        assert!(!set.contains("n0"));
        assert!(set.contains(&format!("n{}", HEDGED_SET_CAP)));
    }
}
