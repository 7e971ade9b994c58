// ─────────────────────────────────────────────────────────────────────────────
// drift.rs — Delta drift watchdog
//
// Replaces the teacher's PnL/win-rate `PerformanceMonitor` (monitor.rs) with
// the much simpler check this solver actually needs: every 10 minutes,
// confirm spot and perp BTC still roughly cancel out. Reuses InventoryManager's
// already-fused RiskSnapshot (it already carries both `btc_on_chain` and
// `perp_btc` from the same refresh cycle) rather than re-querying the chain
// and venue separately, following risk.rs's "one snapshot, many readers"
// idiom instead of duplicating I/O.
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{now_iso8601, AuditLog, PositionRecord};
use crate::config::Config;
use crate::quoter::QuoterStats;
use crate::risk::InventoryManager;

const CHECK_INTERVAL: Duration = Duration::from_secs(600);

pub struct DriftWatchdog {
    inventory: Arc<InventoryManager>,
    stats: Arc<QuoterStats>,
    audit: Arc<AuditLog>,
    drift_threshold_btc: f64,
    min_margin_threshold: f64,
}

impl DriftWatchdog {
    pub fn new(
        inventory: Arc<InventoryManager>,
        stats: Arc<QuoterStats>,
        audit: Arc<AuditLog>,
        config: &Config,
    ) -> Self {
        Self {
            inventory,
            stats,
            audit,
            drift_threshold_btc: config.drift_threshold_btc,
            min_margin_threshold: config.min_margin_threshold,
        }
    }

    /// One check cycle: status summary, delta-drift alert, rejection
    /// histogram flush. Exposed separately from `run` so tests can drive it
    /// without waiting on the real interval.
    pub fn check_once(&self, now_ms: u64) {
        match self.inventory.current_snapshot() {
            Some(snapshot) if snapshot.is_fresh(now_ms) => {
                let net_delta = snapshot.btc_on_chain + snapshot.perp_btc;
                let status = if self.inventory.is_emergency() {
                    "EMERGENCY"
                } else if snapshot.margin_usd < self.min_margin_threshold {
                    "LOW-MARGIN"
                } else {
                    "READY"
                };
                log::info!(
                    "[DRIFT] status={} spot_btc={:.8} perp_btc={:.8} net_delta={:.8} margin_usd={:.2}",
                    status, snapshot.btc_on_chain, snapshot.perp_btc, net_delta, snapshot.margin_usd,
                );

                self.audit.record_position(&PositionRecord {
                    timestamp: now_iso8601(),
                    kind: "POSITION_SNAPSHOT",
                    perp_btc: snapshot.perp_btc,
                    spot_btc: snapshot.btc_on_chain,
                    net_delta,
                    margin_usd: snapshot.margin_usd,
                });

                if net_delta.abs() > self.drift_threshold_btc {
                    log::warn!(
                        "[DRIFT] net delta {:.8} BTC exceeds threshold {:.8} BTC",
                        net_delta, self.drift_threshold_btc,
                    );
                }
            }
            _ => {
                log::warn!("[DRIFT] status=IDLE (no fresh risk snapshot available)");
            }
        }

        let (received, generated, rejections) = self.stats.snapshot();
        log::info!(
            "[DRIFT] quoter stats received={} generated={} rejections={:?}",
            received, generated, rejections,
        );
        self.stats.reset();
    }

    /// Runs the watchdog for the life of the process.
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::time::sleep(CHECK_INTERVAL).await;
            self.check_once(now_ms());
        }
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
    use crate::risk::QuoteDirection;

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

    fn watchdog() -> DriftWatchdog {
        let cfg = config();
        let audit_dir = std::env::temp_dir().join(format!("mm-drift-test-{:?}", std::thread::current().id()));
        DriftWatchdog::new(
            Arc::new(InventoryManager::new(&cfg)),
            Arc::new(QuoterStats::default()),
            Arc::new(AuditLog::new(audit_dir.to_string_lossy().to_string())),
            &cfg,
        )
    }

    #[test]
    fn test_check_once_resets_quoter_stats() {
        let w = watchdog();
        w.stats.received.fetch_add(3, std::sync::atomic::Ordering::Relaxed);
        w.check_once(1_000);
        let (received, _, _) = w.stats.snapshot();
        assert_eq!(received, 0);
    }

    #[test]
    fn test_check_once_without_snapshot_does_not_panic() {
        let w = watchdog();
        w.check_once(1_000);
        assert_eq!(w.inventory.get_quote_direction(1_000), QuoteDirection::None);
    }
}
