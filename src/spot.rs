// ─────────────────────────────────────────────────────────────────────────────
// spot.rs — Spot-price feed for optional dynamic spread (§4.8)
//
// A thin, optional collaborator: primary + fallback HTTP endpoint polled
// every 10s, stale if older than 3x the refresh interval. Mirrors the
// cached-with-TTL idiom used throughout (venue.rs account cache, chain.rs
// balance cache) rather than introducing a new caching pattern.
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::Mutex;
use std::time::{Duration, Instant};

const REFRESH_INTERVAL: Duration = Duration::from_secs(10);
const STALE_AFTER: Duration = Duration::from_secs(30); // 3x refresh interval

#[derive(Debug, Clone, Copy)]
struct SpotSample {
    price: f64,
    fetched_at: Instant,
}

/// Holds the last-known BTC/USD spot price from an external reference feed,
/// refreshed by a background task. Used only to tighten (never widen) the
/// Quoter's spread via basis-adjustment; absence of a fresh sample simply
/// falls back to the static spread.
pub struct SpotFeed {
    primary_url: String,
    fallback_url: Option<String>,
    client: reqwest::Client,
    last: Mutex<Option<SpotSample>>,
}

impl SpotFeed {
    pub fn new(primary_url: String, fallback_url: Option<String>) -> Self {
        Self {
            primary_url,
            fallback_url,
            client: reqwest::Client::new(),
            last: Mutex::new(None),
        }
    }

    /// Returns the last sample's price if it is fresher than `STALE_AFTER`.
    pub fn current_price(&self) -> Option<f64> {
        let guard = self.last.lock().unwrap();
        guard.and_then(|s| {
            if s.fetched_at.elapsed() < STALE_AFTER {
                Some(s.price)
            } else {
                None
            }
        })
    }

    async fn fetch_one(&self, url: &str) -> Option<f64> {
        let resp = self.client.get(url).send().await.ok()?;
        let value: serde_json::Value = resp.json().await.ok()?;
        value
            .get("price")
            .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_f64()))
    }

    async fn refresh_once(&self) {
        let price = match self.fetch_one(&self.primary_url).await {
            Some(p) => Some(p),
            None => {
                log::warn!("[SPOT] primary feed unreachable, trying fallback");
                if let Some(url) = &self.fallback_url {
                    self.fetch_one(url).await
                } else {
                    None
                }
            }
        };

        match price {
            Some(p) => {
                *self.last.lock().unwrap() = Some(SpotSample {
                    price: p,
                    fetched_at: Instant::now(),
                });
            }
            None => log::warn!("[SPOT] both primary and fallback feeds failed"),
        }
    }

    /// Runs the refresh loop for the life of the process.
    pub async fn run(self: std::sync::Arc<Self>) {
        loop {
            self.refresh_once().await;
            tokio::time::sleep(REFRESH_INTERVAL).await;
        }
    }
}

/// `basis_bps = (perp_mid - spot) / spot * 10_000`.
pub fn basis_bps(perp_mid: f64, spot: f64) -> Option<f64> {
    if spot <= 0.0 {
        return None;
    }
    Some((perp_mid - spot) / spot * 10_000.0)
}

/// Favorable basis is one-sided per direction: shorting (buying BTC from the
/// user) benefits from a positive basis, longing benefits from a negative
/// one. Unfavorable basis never widens the spread — it's clamped to zero.
pub fn favorable_basis_bps(basis_bps: f64, we_are_buying_btc: bool) -> f64 {
    if we_are_buying_btc {
        basis_bps.max(0.0)
    } else {
        (-basis_bps).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basis_bps_positive_premium() {
        let b = basis_bps(100_100.0, 100_000.0).unwrap();
        assert!((b - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_favorable_basis_is_one_sided() {
        assert_eq!(favorable_basis_bps(10.0, true), 10.0);
        assert_eq!(favorable_basis_bps(10.0, false), 0.0);
        assert_eq!(favorable_basis_bps(-10.0, true), 0.0);
        assert_eq!(favorable_basis_bps(-10.0, false), 10.0);
    }

    #[test]
    fn test_basis_bps_rejects_nonpositive_spot() {
        assert!(basis_bps(100.0, 0.0).is_none());
    }
}
