// ─────────────────────────────────────────────────────────────────────────────
// intents-mm-solver: delta-neutral RFQ market-making solver
//
// Wires the typed collaborators together: a relay session delivers quote
// requests and settlement notices, the Quoter prices against the shared
// order book and the latest risk snapshot, signed responses go back out over
// the relay, and the Hedger closes the loop on whichever settlement signal
// (event or poll) arrives first. Every background concern — inventory
// refresh, drift checks, the optional spot feed, the status surface — runs
// as its own task over shared `Arc` state, the same fan-out shape as the
// teacher's original main.
// ─────────────────────────────────────────────────────────────────────────────
mod audit;
mod chain;
mod config;
mod drift;
mod error;
mod hedger;
mod intent;
mod orderbook;
mod quoter;
mod relay;
mod risk;
mod signing;
mod spot;
mod status;
mod token;
mod venue;

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Mutex as AsyncMutex};

use audit::AuditLog;
use chain::{ChainClient, LiveChainClient};
use config::Config;
use drift::DriftWatchdog;
use hedger::Hedger;
use intent::sign_quote_result;
use orderbook::OrderBook;
use quoter::{QuoteRequest, Quoter, QuoterStats, RiskInputs};
use relay::RelayEvent;
use risk::InventoryManager;
use status::StatusState;
use token::TokenTable;
use venue::{new_stall_flag, LiveVenueClient, VenueClient};

const INVENTORY_REFRESH_INTERVAL_MS: u64 = 5_000;

#[tokio::main]
async fn main() {
    env_logger::init();
    log::info!("intents-mm-solver starting");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            log::error!("config error: {}", e);
            std::process::exit(1);
        }
    };

    let signing_key = match signing::load_signing_key(&config.solver_signing_key) {
        Ok(k) => k,
        Err(e) => {
            log::error!("failed to load SOLVER_SIGNING_KEY: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("  account:   {}", config.chain_account_id);
    log::info!("  pubkey:    {}", signing::public_key_string(&signing_key));
    log::info!("  venue:     {}", if config.venue_testnet { "testnet" } else { "mainnet" });
    log::info!("  hedging:   {}", if config.hedging_enabled { "ENABLED" } else { "disabled" });

    let tokens = TokenTable::new(&config.btc_token_ids, &config.usd_token_ids);

    let book = Arc::new(Mutex::new(OrderBook::new(config.max_orderbook_age_ms)));
    let audit = Arc::new(AuditLog::new("audit_log"));

    let venue: Arc<AsyncMutex<Box<dyn VenueClient>>> = Arc::new(AsyncMutex::new(Box::new(
        LiveVenueClient::new(config.chain_account_id.clone(), config.venue_testnet),
    )));
    let chain: Arc<dyn ChainClient> = Arc::new(LiveChainClient::new(
        config.chain_rpc_url.clone(),
        config.chain_account_id.clone(),
        signing_key.clone(),
    ));

    let inventory = Arc::new(InventoryManager::new(&config));
    let quoter_stats = Arc::new(QuoterStats::default());
    let hedger = Arc::new(Hedger::new(
        venue.clone(),
        chain.clone(),
        book.clone(),
        inventory.clone(),
        audit.clone(),
        config.hedge_slippage_bps,
        config.hedging_enabled,
    ));

    // ─── L2 order book ingestion ────────────────────────────────────────────
    {
        let book = book.clone();
        let stall = new_stall_flag();
        let testnet = config.venue_testnet;
        tokio::spawn(async move {
            loop {
                if let Err(e) = venue::connect_and_listen(book.clone(), stall.clone(), testnet).await {
                    log::error!("[MAIN] venue stream ended: {}", e);
                }
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        });
    }

    // ─── Inventory snapshot refresh ─────────────────────────────────────────
    {
        let inventory = inventory.clone();
        let venue = venue.clone();
        let chain = chain.clone();
        let btc_token_ids = config.btc_token_ids.clone();
        let usd_token_ids = config.usd_token_ids.clone();
        tokio::spawn(async move {
            loop {
                inventory
                    .refresh_snapshot(&venue, chain.as_ref(), &btc_token_ids, &usd_token_ids, now_ms())
                    .await;
                tokio::time::sleep(std::time::Duration::from_millis(INVENTORY_REFRESH_INTERVAL_MS)).await;
            }
        });
    }

    // ─── Hedge settlement polling fallback ──────────────────────────────────
    tokio::spawn(hedger.clone().run_polling_loop());

    // ─── Drift watchdog ──────────────────────────────────────────────────────
    {
        let watchdog = Arc::new(DriftWatchdog::new(
            inventory.clone(),
            quoter_stats.clone(),
            audit.clone(),
            &config,
        ));
        tokio::spawn(watchdog.run());
    }

    // ─── Optional spot feed for dynamic spread (§4.8) ───────────────────────
    let spot_feed = if config.dynamic_spread_enabled {
        let primary = std::env::var("SPOT_PRICE_URL")
            .unwrap_or_else(|_| "https://api.coinbase.com/v2/prices/BTC-USD/spot".to_string());
        let fallback = std::env::var("SPOT_PRICE_FALLBACK_URL").ok();
        let feed = Arc::new(spot::SpotFeed::new(primary, fallback));
        tokio::spawn(feed.clone().run());
        Some(feed)
    } else {
        None
    };

    // ─── Status / metrics surface ───────────────────────────────────────────
    {
        let state = Arc::new(StatusState {
            book: book.clone(),
            inventory: inventory.clone(),
            quoter_stats: quoter_stats.clone(),
            max_orderbook_age_ms: config.max_orderbook_age_ms,
        });
        let bind_addr = config.status_bind_addr.clone();
        tokio::spawn(async move { status::serve(&bind_addr, state).await });
    }

    // ─── Relay session + request/settlement routing ─────────────────────────
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<RelayEvent>();
    let relay_handle = relay::spawn(config.relay_url.clone(), events_tx);

    let quoter = Quoter::new(&config, &tokens);
    let signer_id = config.chain_account_id.clone();

    log::info!("[MAIN] ready, awaiting relay events");

    while let Some(event) = events_rx.recv().await {
        match event {
            RelayEvent::QuoteRequest(req) => {
                handle_quote_request(
                    &quoter,
                    &tokens,
                    &book,
                    &inventory,
                    &hedger,
                    &relay_handle,
                    &audit,
                    &signing_key,
                    &signer_id,
                    spot_feed.as_deref(),
                    req,
                )
                .await;
            }
            RelayEvent::Settlement(ev) => {
                hedger
                    .on_settlement_event(&ev.quote_hash, &ev.intent_hash, now_ms())
                    .await;
            }
        }
    }

    log::error!("[MAIN] relay event channel closed, exiting");
}

#[allow(clippy::too_many_arguments)]
async fn handle_quote_request(
    quoter: &Quoter<'_>,
    tokens: &TokenTable,
    book: &Arc<Mutex<OrderBook>>,
    inventory: &Arc<InventoryManager>,
    hedger: &Arc<Hedger>,
    relay_handle: &relay::RelayHandle,
    audit: &Arc<AuditLog>,
    signing_key: &ed25519_dalek::SigningKey,
    signer_id: &str,
    spot_feed: Option<&spot::SpotFeed>,
    req: relay::QuoteRequestEvent,
) {
    let now = now_ms();

    let amount_in = req.amount_in.as_deref().and_then(|v| v.parse::<u128>().ok());
    let amount_out = req.amount_out.as_deref().and_then(|v| v.parse::<u128>().ok());

    let quote_request = QuoteRequest {
        token_in: req.token_in.clone(),
        token_out: req.token_out.clone(),
        amount_in,
        amount_out,
    };

    let direction = inventory.get_quote_direction(now);
    let funding_rate_hourly = inventory.get_funding_rate();
    let perp_btc = inventory
        .current_snapshot()
        .map(|s| s.perp_btc)
        .unwrap_or(0.0);

    let we_are_buying_btc = tokens.is_btc(&quote_request.token_in);
    let favorable_basis_bps = spot_feed.and_then(|feed| {
        let spot_price = feed.current_price()?;
        let mid = book.lock().unwrap().mid()?;
        let basis = spot::basis_bps(mid, spot_price)?;
        Some(spot::favorable_basis_bps(basis, we_are_buying_btc))
    });

    let risk = RiskInputs {
        direction,
        funding_rate_hourly,
        perp_btc,
        favorable_basis_bps,
    };

    let quote = {
        let book = book.lock().unwrap();
        quoter.get_quote(&quote_request, &book, risk, now)
    };

    let quote = match quote {
        Ok(q) => q,
        Err(reason) => {
            audit.record_quote_trace(&audit::QuoteTraceRecord {
                timestamp: audit::now_iso8601(),
                kind: "QUOTE_REJECTED",
                request_id: Some(req.request_id.clone()),
                nonce: None,
                detail: reason.as_str().to_string(),
            });
            log::info!(
                "[MAIN] quote rejected request_id={} reason={}",
                req.request_id,
                reason.as_str()
            );
            return;
        }
    };

    let deadline_ms = now + 30_000;
    let signature = match sign_quote_result(signing_key, signer_id, signer_id, deadline_ms, &quote) {
        Ok(sig) => sig,
        Err(e) => {
            log::error!("[MAIN] failed to sign quote request_id={}: {}", req.request_id, e);
            return;
        }
    };

    audit.record_quote_trace(&audit::QuoteTraceRecord {
        timestamp: audit::now_iso8601(),
        kind: "QUOTE_GENERATED",
        request_id: Some(req.request_id.clone()),
        nonce: Some(signature.payload.nonce.clone()),
        detail: format!("btc_size={} spread_bps={}", quote.btc_size, quote.spread_bps),
    });

    let hedge_direction = if quote.we_are_buying_btc {
        // We receive BTC: to stay delta-neutral we sell perp BTC (short).
        venue::HedgeDirection::Short
    } else {
        venue::HedgeDirection::Long
    };

    let quote_hash = signed_intent_digest(&signature);

    let body = serde_json::json!({
        "request_id": req.request_id,
        "signed_data": signature,
        "quote_hash": quote_hash,
    });

    // track_quote must run strictly after the publish ack returns: a
    // settlement notification racing ahead of an untracked quote is
    // harmless (treated as "other solver won"), but tracking a quote that
    // was never actually published would let us hedge against a quote the
    // relay never committed to.
    match relay_handle.publish_quote_response(body).await {
        Ok(()) => {
            hedger.track_quote(
                signature.payload.nonce.clone(),
                quote_hash,
                hedge_direction,
                quote.btc_size,
                deadline_ms,
                Some(quote.reference_price),
                Some(quote.spread_bps),
                now,
            );
        }
        Err(e) => {
            log::error!("[MAIN] publish_quote_response failed request_id={}: {}", req.request_id, e);
        }
    }
}

/// Deterministic digest of a signed intent, used as the `quote_hash` the
/// relay addresses settlement notifications by.
fn signed_intent_digest(signature: &signing::Signature) -> String {
    use sha2::{Digest, Sha256};
    let canonical = serde_json::to_string(signature).expect("Signature serialization cannot fail");
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
