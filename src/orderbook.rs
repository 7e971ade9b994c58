// ─────────────────────────────────────────────────────────────────────────────
// orderbook.rs — L2 order book + VWAP
//
// Single-asset counterpart of the teacher's multi-coin `L2BookSnapshot` /
// `MarketDataBuffer` (ingestor.rs). This solver only ever prices one BTC
// perpetual, so the per-coin HashMap collapses into one shared book.
// ─────────────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Side {
    Bid,
    Ask,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VwapError {
    InsufficientLiquidity,
    BookStale,
    BookEmpty,
}

/// Last-known L2 snapshot of the hedging venue's BTC perpetual, plus
/// freshness bookkeeping. Bids sorted descending, asks ascending.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: Vec<Level>,
    asks: Vec<Level>,
    last_update_ms: u64,
    max_age_ms: u64,
}

impl OrderBook {
    pub fn new(max_age_ms: u64) -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            last_update_ms: 0,
            max_age_ms,
        }
    }

    /// Replaces the book wholesale from a fresh L2 snapshot. Callers are
    /// responsible for pre-sorting `bids` descending / `asks` ascending.
    pub fn apply_snapshot(&mut self, bids: Vec<Level>, asks: Vec<Level>, now_ms: u64) {
        self.bids = bids;
        self.asks = asks;
        self.last_update_ms = now_ms;
    }

    pub fn is_fresh(&self, now_ms: u64) -> bool {
        self.last_update_ms > 0 && now_ms.saturating_sub(self.last_update_ms) <= self.max_age_ms
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid(&self) -> Option<f64> {
        Some((self.best_bid()? + self.best_ask()?) / 2.0)
    }

    pub fn spread_bps(&self) -> Option<f64> {
        let mid = self.mid()?;
        if mid <= 0.0 {
            return None;
        }
        Some((self.best_ask()? - self.best_bid()?) / mid * 10_000.0)
    }

    /// Volume-weighted average price for `size` walked across `side` in
    /// price order. Tolerates up to 1e-6 of residual unfilled size.
    pub fn vwap(&self, side: Side, size: f64, now_ms: u64) -> Result<f64, VwapError> {
        if !self.is_fresh(now_ms) {
            return Err(VwapError::BookStale);
        }
        let levels = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        if levels.is_empty() {
            return Err(VwapError::BookEmpty);
        }

        let mut remaining = size;
        let mut notional = 0.0;
        for level in levels {
            if remaining <= 0.0 {
                break;
            }
            let take = remaining.min(level.size);
            notional += take * level.price;
            remaining -= take;
        }

        if remaining > 1e-6 {
            return Err(VwapError::InsufficientLiquidity);
        }
        Ok(notional / size)
    }
}
