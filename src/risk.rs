// ─────────────────────────────────────────────────────────────────────────────
// risk.rs — RiskSnapshot + InventoryManager
//
// Generalizes the teacher's halt-flag/kill-switch idiom (RiskManager in the
// original risk.rs) into the spec's simpler emergency-mode coupling: a
// single process-wide flag set by the hedger on hedge failure and cleared on
// the next successful hedge, gating a synchronous, atomically-replaced
// RiskSnapshot instead of the teacher's day-reset/drawdown/consecutive-loss
// combination.
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Mutex as AsyncMutex;

use crate::chain::ChainClient;
use crate::config::Config;
use crate::token;
use crate::venue::VenueClient;

const SNAPSHOT_MAX_AGE_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteDirection {
    BuyOnly,
    SellOnly,
    Both,
    None,
}

#[derive(Debug, Clone)]
pub struct RiskSnapshot {
    pub updated_at_ms: u64,
    pub margin_usd: f64,
    pub perp_btc: f64,
    pub funding_rate_hourly: f64,
    pub btc_on_chain: f64,
    pub usd_on_chain: f64,
}

impl RiskSnapshot {
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        self.updated_at_ms > 0 && now_ms.saturating_sub(self.updated_at_ms) <= SNAPSHOT_MAX_AGE_MS
    }
}

/// Periodically refreshes the RiskSnapshot and holds the emergency flag.
/// The snapshot is replaced wholesale (never mutated field-by-field) so
/// readers always observe state from a single refresh cycle.
pub struct InventoryManager {
    snapshot: Mutex<Option<RiskSnapshot>>,
    emergency: AtomicBool,
    min_margin_threshold: f64,
    min_usd_reserve: f64,
    max_btc_inventory: f64,
    min_trade_size_btc: f64,
    refreshing: AtomicBool,
}

impl InventoryManager {
    pub fn new(config: &Config) -> Self {
        Self {
            snapshot: Mutex::new(None),
            emergency: AtomicBool::new(false),
            min_margin_threshold: config.min_margin_threshold,
            min_usd_reserve: config.min_usd_reserve,
            max_btc_inventory: config.max_btc_inventory,
            min_trade_size_btc: config.min_trade_size_btc,
            refreshing: AtomicBool::new(false),
        }
    }

    /// Fans out to VenueClient + ChainClient and atomically replaces the
    /// snapshot. A single-flight guard prevents overlapping refreshes.
    pub async fn refresh_snapshot(
        &self,
        venue: &AsyncMutex<Box<dyn VenueClient>>,
        chain: &dyn ChainClient,
        btc_token_ids: &[String],
        usd_token_ids: &[String],
        now_ms: u64,
    ) {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            return;
        }

        let account = {
            let mut v = venue.lock().await;
            v.account_state().await
        };

        let account = match account {
            Ok(a) => a,
            Err(e) => {
                log::warn!("[RISK] account_state refresh failed: {}", e);
                self.refreshing.store(false, Ordering::SeqCst);
                return;
            }
        };

        let funding_rate_hourly = {
            let mut v = venue.lock().await;
            v.funding_rate_hourly().await.unwrap_or(0.0)
        };

        let mut btc_on_chain = 0.0;
        for id in btc_token_ids {
            btc_on_chain += chain.get_balance(id, token::BTC_POW10).await.unwrap_or(0.0);
        }
        let mut usd_on_chain = 0.0;
        for id in usd_token_ids {
            usd_on_chain += chain.get_balance(id, token::USD_POW10).await.unwrap_or(0.0);
        }

        let new_snapshot = RiskSnapshot {
            updated_at_ms: now_ms,
            margin_usd: account.margin_usd,
            perp_btc: account.perp_btc,
            funding_rate_hourly,
            btc_on_chain,
            usd_on_chain,
        };

        *self.snapshot.lock().unwrap() = Some(new_snapshot);
        self.refreshing.store(false, Ordering::SeqCst);
    }

    pub fn current_snapshot(&self) -> Option<RiskSnapshot> {
        self.snapshot.lock().unwrap().clone()
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    pub fn set_emergency(&self) {
        self.emergency.store(true, Ordering::SeqCst);
        log::error!("[RISK] emergency mode engaged");
    }

    pub fn clear_emergency(&self) {
        self.emergency.store(false, Ordering::SeqCst);
        log::info!("[RISK] emergency mode cleared");
    }

    /// Synchronous: derives the quote direction from the cached snapshot.
    /// Never performs I/O — safe to call from the Quoter's hot path.
    pub fn get_quote_direction(&self, now_ms: u64) -> QuoteDirection {
        if self.is_emergency() {
            return QuoteDirection::SellOnly;
        }

        let snapshot = match self.snapshot.lock().unwrap().clone() {
            Some(s) if s.is_fresh(now_ms) => s,
            _ => return QuoteDirection::None,
        };

        if snapshot.margin_usd < self.min_margin_threshold {
            return QuoteDirection::None;
        }

        let can_buy = snapshot.usd_on_chain > self.min_usd_reserve
            && snapshot.btc_on_chain < self.max_btc_inventory;
        let can_sell = snapshot.btc_on_chain > self.min_trade_size_btc;

        match (can_buy, can_sell) {
            (true, true) => QuoteDirection::Both,
            (true, false) => QuoteDirection::BuyOnly,
            (false, true) => QuoteDirection::SellOnly,
            (false, false) => QuoteDirection::None,
        }
    }

    /// Synchronous capacity gate: true iff the projected perp position stays
    /// within `max_btc_inventory` in absolute value.
    pub fn check_position_capacity(&self, direction: crate::venue::HedgeDirection, size: f64) -> bool {
        let perp_btc = match self.snapshot.lock().unwrap().as_ref() {
            Some(s) => s.perp_btc,
            None => return false,
        };
        let projected = match direction {
            crate::venue::HedgeDirection::Short => perp_btc - size,
            crate::venue::HedgeDirection::Long => perp_btc + size,
        };
        projected.abs() <= self.max_btc_inventory
    }

    pub fn get_funding_rate(&self) -> f64 {
        self.snapshot
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.funding_rate_hourly)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn snapshot(margin: f64, perp: f64, btc: f64, usd: f64, now_ms: u64) -> RiskSnapshot {
        RiskSnapshot {
            updated_at_ms: now_ms,
            margin_usd: margin,
            perp_btc: perp,
            funding_rate_hourly: 0.0,
            btc_on_chain: btc,
            usd_on_chain: usd,
        }
    }

    #[test]
    fn test_direction_both_when_healthy() {
        let mgr = InventoryManager::new(&config());
        *mgr.snapshot.lock().unwrap() = Some(snapshot(1_000.0, 0.0, 1.0, 1_000.0, 10_000));
        assert_eq!(mgr.get_quote_direction(10_000), QuoteDirection::Both);
    }

    #[test]
    fn test_direction_none_when_stale() {
        let mgr = InventoryManager::new(&config());
        *mgr.snapshot.lock().unwrap() = Some(snapshot(1_000.0, 0.0, 1.0, 1_000.0, 0));
        assert_eq!(mgr.get_quote_direction(60_000), QuoteDirection::None);
    }

    #[test]
    fn test_direction_emergency_forces_sell_only() {
        let mgr = InventoryManager::new(&config());
        *mgr.snapshot.lock().unwrap() = Some(snapshot(1_000.0, 0.0, 1.0, 1_000.0, 10_000));
        mgr.set_emergency();
        assert_eq!(mgr.get_quote_direction(10_000), QuoteDirection::SellOnly);
        mgr.clear_emergency();
        assert_eq!(mgr.get_quote_direction(10_000), QuoteDirection::Both);
    }

    #[test]
    fn test_capacity_gate_rejects_over_limit() {
        let mgr = InventoryManager::new(&config());
        *mgr.snapshot.lock().unwrap() = Some(snapshot(1_000.0, 4.999, 1.0, 1_000.0, 10_000));
        assert!(!mgr.check_position_capacity(crate::venue::HedgeDirection::Short, 0.01));
    }
}
