// ─────────────────────────────────────────────────────────────────────────────
// audit.rs — Append-only JSONL audit trail
//
// Generalizes the teacher's tick harvester (`ingestor::harvest_tick_to_csv`,
// a daily `std::fs::OpenOptions::new().append(true)` file) from per-coin CSV
// rows to JSONL records with an ISO-8601 timestamp and a `type` tag, per the
// three streams this solver needs: trades, position snapshots, and a quote
// phase trace. A write failure here never affects quoting — it's a thin,
// out-of-core collaborator (see §1 of the spec this implements).
// ─────────────────────────────────────────────────────────────────────────────
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;

pub struct AuditLog {
    dir: String,
}

impl AuditLog {
    pub fn new(dir: impl Into<String>) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            log::warn!("[AUDIT] failed to create audit dir {}: {}", dir, e);
        }
        Self { dir }
    }

    pub fn record_trade(&self, record: &TradeRecord) {
        self.append("trades.jsonl", record);
    }

    pub fn record_position(&self, record: &PositionRecord) {
        self.append("positions.jsonl", record);
    }

    pub fn record_quote_trace(&self, record: &QuoteTraceRecord) {
        self.append("quote_trace.jsonl", record);
    }

    fn append<T: Serialize>(&self, file_name: &str, record: &T) {
        let path = Path::new(&self.dir).join(file_name);
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                log::warn!("[AUDIT] failed to serialize record for {}: {}", file_name, e);
                return;
            }
        };
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(mut f) => {
                if let Err(e) = writeln!(f, "{}", line) {
                    log::warn!("[AUDIT] failed to append to {:?}: {}", path, e);
                }
            }
            Err(e) => log::warn!("[AUDIT] failed to open {:?}: {}", path, e),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: &'static str, // "HEDGE_EXECUTED" | "HEDGE_FAILED"
    pub nonce: String,
    pub hedge_direction: String,
    pub btc_size: f64,
    pub hedge_price: Option<f64>,
    pub quoted_price: Option<f64>,
    pub realized_pnl_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionRecord {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: &'static str, // "POSITION_SNAPSHOT"
    pub perp_btc: f64,
    pub spot_btc: f64,
    pub net_delta: f64,
    pub margin_usd: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteTraceRecord {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: &'static str, // "QUOTE_GENERATED" | "QUOTE_REJECTED" | "QUOTE_EXPIRED" | "SETTLEMENT_DETECTED"
    pub request_id: Option<String>,
    pub nonce: Option<String>,
    pub detail: String,
}

pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_back() {
        let dir = std::env::temp_dir().join(format!("mm-audit-test-{:?}", std::thread::current().id()));
        let log = AuditLog::new(dir.to_string_lossy().to_string());
        log.record_quote_trace(&QuoteTraceRecord {
            timestamp: now_iso8601(),
            kind: "QUOTE_GENERATED",
            request_id: Some("r1".to_string()),
            nonce: None,
            detail: "ok".to_string(),
        });
        let contents = std::fs::read_to_string(dir.join("quote_trace.jsonl")).unwrap();
        assert!(contents.contains("QUOTE_GENERATED"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
