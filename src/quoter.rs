// ─────────────────────────────────────────────────────────────────────────────
// quoter.rs — Pure, synchronous pricing path
//
// No network or lock awaiting happens here: every input (book snapshot,
// risk snapshot, token table) is handed in by value/reference from callers
// who already hold the data. This mirrors the teacher's separation between
// I/O-bearing clients (exchange.rs) and pure decision logic (the spread
// arithmetic inside market_maker.rs's RegimeGovernor), just pushed further:
// here the whole decision sequence is one synchronous function.
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::config::Config;
use crate::orderbook::{OrderBook, Side, VwapError};
use crate::risk::QuoteDirection;
use crate::token::TokenTable;
use crate::venue::HedgeDirection;

const PROBE_SIZE_BTC: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    OrderbookStale,
    InvalidTokenPair,
    SizeOutOfBounds,
    InsufficientLiquidity,
    DirectionNotAllowed,
    PositionCapacityExceeded,
    FundingRateTooNegative,
    NoReferencePrice,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::OrderbookStale => "orderbook_stale",
            RejectionReason::InvalidTokenPair => "invalid_token_pair",
            RejectionReason::SizeOutOfBounds => "size_out_of_bounds",
            RejectionReason::InsufficientLiquidity => "insufficient_liquidity",
            RejectionReason::DirectionNotAllowed => "direction_not_allowed",
            RejectionReason::PositionCapacityExceeded => "position_capacity_exceeded",
            RejectionReason::FundingRateTooNegative => "funding_rate_too_negative",
            RejectionReason::NoReferencePrice => "no_reference_price",
        }
    }
}

impl From<VwapError> for RejectionReason {
    fn from(e: VwapError) -> Self {
        match e {
            VwapError::InsufficientLiquidity => RejectionReason::InsufficientLiquidity,
            VwapError::BookStale => RejectionReason::OrderbookStale,
            VwapError::BookEmpty => RejectionReason::NoReferencePrice,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Option<u128>,
    pub amount_out: Option<u128>,
}

#[derive(Debug, Clone)]
pub struct QuoteResult {
    pub amount_in: Option<u128>,
    pub amount_out: Option<u128>,
    pub btc_size: f64,
    pub we_are_buying_btc: bool,
    pub btc_token_id: String,
    pub usd_token_id: String,
    pub is_exact_out: bool,
    pub spread_bps: f64,
    pub reference_price: f64,
}

/// A snapshot of the fields the Quoter needs from InventoryManager, handed
/// in by the caller so the Quoter itself never touches I/O or locks.
#[derive(Debug, Clone, Copy)]
pub struct RiskInputs {
    pub direction: QuoteDirection,
    pub funding_rate_hourly: f64,
    pub perp_btc: f64,
    /// Precomputed `favorable_basis_bps` for this quote's direction (see
    /// `spot::favorable_basis_bps`), or `None` when the dynamic-spread feed
    /// is disabled or stale. Only ever tightens the spread, never widens it.
    pub favorable_basis_bps: Option<f64>,
}

#[derive(Debug, Default)]
pub struct QuoterStats {
    pub received: AtomicU64,
    pub generated: AtomicU64,
    rejections: Mutex<std::collections::HashMap<&'static str, u64>>,
}

impl QuoterStats {
    fn record_rejection(&self, reason: RejectionReason) {
        let mut map = self.rejections.lock().unwrap();
        *map.entry(reason.as_str()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> (u64, u64, std::collections::HashMap<&'static str, u64>) {
        (
            self.received.load(Ordering::Relaxed),
            self.generated.load(Ordering::Relaxed),
            self.rejections.lock().unwrap().clone(),
        )
    }

    pub fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.generated.store(0, Ordering::Relaxed);
        self.rejections.lock().unwrap().clear();
    }
}

pub struct Quoter<'a> {
    config: &'a Config,
    tokens: &'a TokenTable,
    pub stats: QuoterStats,
}

impl<'a> Quoter<'a> {
    pub fn new(config: &'a Config, tokens: &'a TokenTable) -> Self {
        Self {
            config,
            tokens,
            stats: QuoterStats::default(),
        }
    }

    pub fn get_quote(
        &self,
        request: &QuoteRequest,
        book: &OrderBook,
        risk: RiskInputs,
        now_ms: u64,
    ) -> Result<QuoteResult, RejectionReason> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        match self.get_quote_inner(request, book, risk, now_ms) {
            Ok(q) => {
                self.stats.generated.fetch_add(1, Ordering::Relaxed);
                Ok(q)
            }
            Err(reason) => {
                self.stats.record_rejection(reason);
                Err(reason)
            }
        }
    }

    fn get_quote_inner(
        &self,
        request: &QuoteRequest,
        book: &OrderBook,
        risk: RiskInputs,
        now_ms: u64,
    ) -> Result<QuoteResult, RejectionReason> {
        if !book.is_fresh(now_ms) {
            return Err(RejectionReason::OrderbookStale);
        }

        let token_in_is_btc = self.tokens.is_btc(&request.token_in);
        let token_out_is_btc = self.tokens.is_btc(&request.token_out);
        let token_in_is_usd = self.tokens.is_usd(&request.token_in);
        let token_out_is_usd = self.tokens.is_usd(&request.token_out);

        // we_are_buying_btc <=> BTC is token_in (the user is sending us BTC).
        let (btc_token_id, usd_token_id, we_are_buying_btc) =
            match (token_in_is_btc, token_in_is_usd, token_out_is_btc, token_out_is_usd) {
                (true, false, false, true) => (request.token_in.clone(), request.token_out.clone(), true),
                (false, true, true, false) => (request.token_out.clone(), request.token_in.clone(), false),
                _ => return Err(RejectionReason::InvalidTokenPair),
            };

        let btc_info = self
            .tokens
            .info(&btc_token_id)
            .ok_or(RejectionReason::InvalidTokenPair)?;

        let is_exact_out = request.amount_out.is_some();

        let (mut btc_size, reference_price, refine) = self.resolve_size_and_price(
            request,
            book,
            we_are_buying_btc,
            is_exact_out,
            btc_info.pow10,
            now_ms,
        )?;

        if btc_size < self.config.min_trade_size_btc || btc_size > self.config.max_trade_size_btc {
            return Err(RejectionReason::SizeOutOfBounds);
        }

        let allowed = match risk.direction {
            QuoteDirection::Both => true,
            QuoteDirection::BuyOnly => we_are_buying_btc,
            QuoteDirection::SellOnly => !we_are_buying_btc,
            QuoteDirection::None => false,
        };
        if !allowed {
            return Err(RejectionReason::DirectionNotAllowed);
        }

        let hedge_direction = if we_are_buying_btc {
            HedgeDirection::Short
        } else {
            HedgeDirection::Long
        };
        let projected = match hedge_direction {
            HedgeDirection::Short => risk.perp_btc - btc_size,
            HedgeDirection::Long => risk.perp_btc + btc_size,
        };
        if projected.abs() > self.config.max_btc_inventory {
            return Err(RejectionReason::PositionCapacityExceeded);
        }

        if we_are_buying_btc && risk.funding_rate_hourly < self.config.max_negative_funding_rate_hourly {
            return Err(RejectionReason::FundingRateTooNegative);
        }

        let spread_bps = self.effective_spread_bps(risk.favorable_basis_bps);
        let spread = spread_bps / 10_000.0;

        let final_price = if we_are_buying_btc {
            reference_price * (1.0 - spread)
        } else {
            reference_price * (1.0 + spread)
        };

        // The two "specified side is non-BTC" branches derived `btc_size` from
        // the pre-spread VWAP; re-derive it from the post-spread price so the
        // quoted amount and the hedge size agree with the spread actually
        // quoted (the direction/capacity/funding gates above intentionally
        // still use the pre-spread estimate).
        if let Some(usd_amount) = refine {
            btc_size = usd_amount / final_price;
        }

        let (amount_in, amount_out) =
            self.compute_amounts(request, btc_size, final_price, we_are_buying_btc, is_exact_out, btc_info.pow10);

        Ok(QuoteResult {
            amount_in,
            amount_out,
            btc_size,
            we_are_buying_btc,
            btc_token_id,
            usd_token_id,
            is_exact_out,
            spread_bps,
            reference_price: final_price,
        })
    }

    /// Step 3: computes `btc_size` and a VWAP reference price. The two
    /// "specified side is non-BTC" cases require a probe-then-refine pass
    /// because VWAP is nonlinear in size. Returns `(btc_size, reference_price,
    /// refine)`, where `refine` carries the USD amount (human units) behind a
    /// probe-then-refine estimate so the caller can re-derive `btc_size` from
    /// the post-spread price; it is `None` for the two branches where the
    /// BTC size is specified directly.
    fn resolve_size_and_price(
        &self,
        request: &QuoteRequest,
        book: &OrderBook,
        we_are_buying_btc: bool,
        is_exact_out: bool,
        btc_pow10: f64,
        now_ms: u64,
    ) -> Result<(f64, f64, Option<f64>), RejectionReason> {
        match (we_are_buying_btc, is_exact_out) {
            // exact-in, buying BTC: amount_in is BTC-denominated (token_in == BTC)
            (true, false) => {
                let amount_in = request.amount_in.ok_or(RejectionReason::InvalidTokenPair)?;
                let btc_size = amount_in as f64 / btc_pow10;
                let price = book.vwap(Side::Bid, btc_size, now_ms)?;
                Ok((btc_size, price, None))
            }
            // exact-out, buying BTC: amount_out is USD-denominated (token_out == USD), size unknown
            (true, true) => {
                let amount_out_usd = request.amount_out.ok_or(RejectionReason::InvalidTokenPair)?;
                let (size, price, usd_amount) = self.refine_from_usd_amount(book, amount_out_usd, Side::Bid, now_ms)?;
                Ok((size, price, Some(usd_amount)))
            }
            // exact-in, selling BTC: amount_in is USD-denominated, size unknown
            (false, false) => {
                let amount_in_usd = request.amount_in.ok_or(RejectionReason::InvalidTokenPair)?;
                let (size, price, usd_amount) = self.refine_from_usd_amount(book, amount_in_usd, Side::Ask, now_ms)?;
                Ok((size, price, Some(usd_amount)))
            }
            // exact-out, selling BTC: amount_out is BTC-denominated (token_out == BTC)
            (false, true) => {
                let amount_out = request.amount_out.ok_or(RejectionReason::InvalidTokenPair)?;
                let btc_size = amount_out as f64 / btc_pow10;
                let price = book.vwap(Side::Ask, btc_size, now_ms)?;
                Ok((btc_size, price, None))
            }
        }
    }

    /// Returns `(refined_size, refined_price, usd_amount)`; `usd_amount` is
    /// in human units so the caller can recompute size once the final,
    /// post-spread price is known.
    fn refine_from_usd_amount(
        &self,
        book: &OrderBook,
        usd_amount_base_units: u128,
        side: Side,
        now_ms: u64,
    ) -> Result<(f64, f64, f64), RejectionReason> {
        // USD tokens are treated as 6-decimal stablecoins; callers only ever
        // pass this path for USD legs so the constant is local to the refine.
        const USD_POW10: f64 = 1_000_000.0;
        let usd_amount = usd_amount_base_units as f64 / USD_POW10;

        let probe_price = book.vwap(side, PROBE_SIZE_BTC, now_ms)?;
        if probe_price <= 0.0 {
            return Err(RejectionReason::NoReferencePrice);
        }
        let estimated_size = usd_amount / probe_price;

        if estimated_size < self.config.min_trade_size_btc || estimated_size > self.config.max_trade_size_btc {
            return Err(RejectionReason::SizeOutOfBounds);
        }

        let refined_price = book.vwap(side, estimated_size, now_ms)?;
        let refined_size = usd_amount / refined_price;
        Ok((refined_size, refined_price, usd_amount))
    }

    /// Static mode returns the constant `TARGET_SPREAD_BIPS`. Dynamic mode
    /// (§4.8) tightens `BASE_SPREAD_BIPS` by the caller-supplied favorable
    /// basis: `clamp(BASE_SPREAD_BIPS - favorable_basis_bps, 0, BASE_SPREAD_BIPS)`
    /// — basis may only tighten the spread, never widen it past the base.
    fn effective_spread_bps(&self, favorable_basis_bps: Option<f64>) -> f64 {
        if !self.config.dynamic_spread_enabled {
            return self.config.target_spread_bips;
        }
        match favorable_basis_bps {
            Some(basis) => (self.config.base_spread_bips - basis)
                .clamp(0.0, self.config.base_spread_bips),
            None => self.config.target_spread_bips,
        }
    }

    fn compute_amounts(
        &self,
        request: &QuoteRequest,
        btc_size: f64,
        final_price: f64,
        we_are_buying_btc: bool,
        is_exact_out: bool,
        btc_pow10: f64,
    ) -> (Option<u128>, Option<u128>) {
        const USD_POW10: f64 = 1_000_000.0;

        // we_are_buying_btc: BTC is token_in (user sends BTC, receives USD).
        // !we_are_buying_btc: USD is token_in (user sends USD, receives BTC).
        if is_exact_out {
            // amount_out already specified by the caller; compute amount_in,
            // rounding up (solver favor: user pays slightly more).
            let amount_in = if we_are_buying_btc {
                // token_in is BTC
                (btc_size * btc_pow10).ceil() as u128
            } else {
                // token_in is USD
                (btc_size * final_price * USD_POW10).ceil() as u128
            };
            (Some(amount_in), request.amount_out)
        } else {
            // amount_in already specified; compute amount_out, rounding
            // down (solver favor: user receives slightly less).
            let amount_out = if we_are_buying_btc {
                // token_out is USD
                (btc_size * final_price * USD_POW10).floor() as u128
            } else {
                // token_out is BTC
                (btc_size * btc_pow10).floor() as u128
            };
            (request.amount_in, Some(amount_out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::Level;

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

    fn tokens() -> TokenTable {
        TokenTable::new(
            &["btc.omft.near".to_string()],
            &["usdt.omft.near".to_string()],
        )
    }

    fn book() -> OrderBook {
        let mut ob = OrderBook::new(5_000);
        ob.apply_snapshot(
            vec![Level { price: 100_000.0, size: 10.0 }],
            vec![Level { price: 100_100.0, size: 10.0 }],
            1_000,
        );
        ob
    }

    fn healthy_risk() -> RiskInputs {
        RiskInputs {
            direction: QuoteDirection::Both,
            funding_rate_hourly: 0.0,
            perp_btc: 0.0,
            favorable_basis_bps: None,
        }
    }

    #[test]
    fn test_exact_in_user_buys_btc_quote() {
        // User sends USDT (token_in), receives BTC (token_out): the solver
        // is selling BTC, so `we_are_buying_btc` is false.
        let cfg = config();
        let toks = tokens();
        let quoter = Quoter::new(&cfg, &toks);
        let request = QuoteRequest {
            token_in: "usdt.omft.near".to_string(),
            token_out: "btc.omft.near".to_string(),
            amount_in: Some(10_000_000_000), // 10,000 USDT (6 decimals)
            amount_out: None,
        };
        let result = quoter.get_quote(&request, &book(), healthy_risk(), 1_000).unwrap();
        assert!(!result.we_are_buying_btc);
        assert!(result.amount_out.is_some());
    }

    #[test]
    fn test_exact_in_user_sells_btc_quote() {
        // User sends BTC (token_in), receives USDT (token_out): the solver
        // is buying BTC, so `we_are_buying_btc` is true.
        let cfg = config();
        let toks = tokens();
        let quoter = Quoter::new(&cfg, &toks);
        let request = QuoteRequest {
            token_in: "btc.omft.near".to_string(),
            token_out: "usdt.omft.near".to_string(),
            amount_in: Some(10_000_000), // 0.1 BTC (8 decimals)
            amount_out: None,
        };
        let result = quoter.get_quote(&request, &book(), healthy_risk(), 1_000).unwrap();
        assert!(result.we_are_buying_btc);
        assert!(result.amount_out.is_some());
    }

    #[test]
    fn test_rejects_stale_book() {
        let cfg = config();
        let toks = tokens();
        let quoter = Quoter::new(&cfg, &toks);
        let request = QuoteRequest {
            token_in: "usdt.omft.near".to_string(),
            token_out: "btc.omft.near".to_string(),
            amount_in: Some(1_000_000),
            amount_out: None,
        };
        let err = quoter.get_quote(&request, &book(), healthy_risk(), 100_000).unwrap_err();
        assert_eq!(err, RejectionReason::OrderbookStale);
    }

    #[test]
    fn test_rejects_invalid_token_pair() {
        let cfg = config();
        let toks = tokens();
        let quoter = Quoter::new(&cfg, &toks);
        let request = QuoteRequest {
            token_in: "usdt.omft.near".to_string(),
            token_out: "usdc.omft.near".to_string(),
            amount_in: Some(1_000_000),
            amount_out: None,
        };
        let err = quoter.get_quote(&request, &book(), healthy_risk(), 1_000).unwrap_err();
        assert_eq!(err, RejectionReason::InvalidTokenPair);
    }

    #[test]
    fn test_rejects_direction_not_allowed() {
        // User sends USDT for BTC (solver selling BTC, we_are_buying_btc
        // false); BuyOnly direction only permits we_are_buying_btc quotes.
        let cfg = config();
        let toks = tokens();
        let quoter = Quoter::new(&cfg, &toks);
        let request = QuoteRequest {
            token_in: "usdt.omft.near".to_string(),
            token_out: "btc.omft.near".to_string(),
            amount_in: Some(10_000_000_000),
            amount_out: None,
        };
        let risk = RiskInputs {
            direction: QuoteDirection::BuyOnly,
            funding_rate_hourly: 0.0,
            perp_btc: 0.0,
            favorable_basis_bps: None,
        };
        let err = quoter.get_quote(&request, &book(), risk, 1_000).unwrap_err();
        assert_eq!(err, RejectionReason::DirectionNotAllowed);
    }

    #[test]
    fn test_rejects_funding_rate_too_negative_when_buying() {
        // User sends BTC for USDT: solver is buying BTC (we_are_buying_btc
        // true), which is exactly the case the funding gate applies to.
        let cfg = config();
        let toks = tokens();
        let quoter = Quoter::new(&cfg, &toks);
        let request = QuoteRequest {
            token_in: "btc.omft.near".to_string(),
            token_out: "usdt.omft.near".to_string(),
            amount_in: Some(10_000_000),
            amount_out: None,
        };
        let risk = RiskInputs {
            direction: QuoteDirection::Both,
            funding_rate_hourly: -0.01,
            perp_btc: 0.0,
            favorable_basis_bps: None,
        };
        let err = quoter.get_quote(&request, &book(), risk, 1_000).unwrap_err();
        assert_eq!(err, RejectionReason::FundingRateTooNegative);
    }

    #[test]
    fn test_rejects_size_out_of_bounds() {
        let cfg = config();
        let toks = tokens();
        let quoter = Quoter::new(&cfg, &toks);
        let request = QuoteRequest {
            token_in: "usdt.omft.near".to_string(),
            token_out: "btc.omft.near".to_string(),
            amount_in: Some(1_000), // tiny: far below MIN_TRADE_SIZE_BTC worth
            amount_out: None,
        };
        let err = quoter.get_quote(&request, &book(), healthy_risk(), 1_000).unwrap_err();
        assert_eq!(err, RejectionReason::SizeOutOfBounds);
    }

    #[test]
    fn test_exact_out_buying_btc_resolves_usd_leg() {
        // User sends BTC (token_in), wants an exact USDT amount out: the
        // specified side is USD, so size must come from the refine path on
        // the bid side, not a direct BTC/pow10 division.
        let cfg = config();
        let toks = tokens();
        let quoter = Quoter::new(&cfg, &toks);
        let request = QuoteRequest {
            token_in: "btc.omft.near".to_string(),
            token_out: "usdt.omft.near".to_string(),
            amount_in: None,
            amount_out: Some(2_000_000_000), // 2,000 USDT (6 decimals)
        };
        let result = quoter.get_quote(&request, &book(), healthy_risk(), 1_000).unwrap();
        assert!(result.we_are_buying_btc);
        assert!(result.is_exact_out);
        assert_eq!(result.amount_out, Some(2_000_000_000));
        assert!(result.amount_in.is_some());
        // Solver is buying BTC, so the quoted bid price must sit below the
        // raw bid (100_000) once the spread is applied.
        assert!(result.reference_price < 100_000.0);
    }

    #[test]
    fn test_exact_out_selling_btc_direct_btc_amount() {
        // User sends USDT (token_in), wants an exact BTC amount out: the
        // specified side is BTC itself, so size is a direct amount/pow10
        // division against the ask side, no refine needed.
        let cfg = config();
        let toks = tokens();
        let quoter = Quoter::new(&cfg, &toks);
        let request = QuoteRequest {
            token_in: "usdt.omft.near".to_string(),
            token_out: "btc.omft.near".to_string(),
            amount_in: None,
            amount_out: Some(10_000_000), // 0.1 BTC (8 decimals)
        };
        let result = quoter.get_quote(&request, &book(), healthy_risk(), 1_000).unwrap();
        assert!(!result.we_are_buying_btc);
        assert!(result.is_exact_out);
        assert_eq!(result.amount_out, Some(10_000_000));
        assert_eq!(result.btc_size, 0.1);
    }

    #[test]
    fn test_refined_size_reflects_post_spread_price() {
        // Exact-in, selling BTC: amount_in is USD-denominated, so btc_size
        // is only known after the probe-then-refine pass. The spread
        // computed later in get_quote_inner must still change the quoted
        // btc_size and amount_out, not just the recorded reference_price.
        let cfg = config();
        let toks = tokens();
        let quoter = Quoter::new(&cfg, &toks);
        let request = QuoteRequest {
            token_in: "usdt.omft.near".to_string(),
            token_out: "btc.omft.near".to_string(),
            amount_in: Some(2_000_000_000), // 2,000 USDT (6 decimals)
            amount_out: None,
        };
        let result = quoter.get_quote(&request, &book(), healthy_risk(), 1_000).unwrap();

        let spread = cfg.target_spread_bips / 10_000.0;
        let final_price = 100_100.0 * (1.0 + spread); // ask side, solver sells BTC
        let expected_btc_size = 2_000.0 / final_price;
        let expected_amount_out = (expected_btc_size * 100_000_000.0).floor() as u128;

        assert!((result.btc_size - expected_btc_size).abs() < 1e-9);
        assert_eq!(result.amount_out, Some(expected_amount_out));
        // Sanity: the pre-spread estimate (ignoring spread) would have been
        // a strictly larger size than what the spread-adjusted quote gives.
        let pre_spread_size = 2_000.0 / 100_100.0;
        assert!(expected_btc_size < pre_spread_size);
    }

    #[test]
    fn test_stats_track_received_generated_and_rejections() {
        let cfg = config();
        let toks = tokens();
        let quoter = Quoter::new(&cfg, &toks);
        let good = QuoteRequest {
            token_in: "usdt.omft.near".to_string(),
            token_out: "btc.omft.near".to_string(),
            amount_in: Some(10_000_000_000),
            amount_out: None,
        };
        let bad = QuoteRequest {
            token_in: "usdt.omft.near".to_string(),
            token_out: "usdc.omft.near".to_string(),
            amount_in: Some(1_000_000),
            amount_out: None,
        };
        quoter.get_quote(&good, &book(), healthy_risk(), 1_000).unwrap();
        quoter.get_quote(&bad, &book(), healthy_risk(), 1_000).unwrap_err();
        let (received, generated, rejections) = quoter.stats.snapshot();
        assert_eq!(received, 2);
        assert_eq!(generated, 1);
        assert_eq!(rejections.get("invalid_token_pair"), Some(&1));
    }
}
