// ─────────────────────────────────────────────────────────────────────────────
// token.rs — Token identifier table
//
// The solver only ever quotes BTC against a USD-pegged token. Both sides are
// looked up by their `nepNNN:`-prefixed on-chain identifier; the table below
// is the single source of truth for decimals/pow10 conversion.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;

/// Decimals fixed per the solver's supported set: 8 for BTC-pegged tokens,
/// 6 for USD-pegged tokens (matches the common stablecoin set). Exposed so
/// other modules (e.g. `chain::get_balance`) can convert on-chain base
/// units to human units without re-deriving the table.
pub const BTC_DECIMALS: u32 = 8;
pub const USD_DECIMALS: u32 = 6;
pub const BTC_POW10: f64 = 100_000_000.0;
pub const USD_POW10: f64 = 1_000_000.0;

#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub symbol: String,
    pub decimals: u32,
    pub pow10: f64,
}

impl TokenInfo {
    fn new(symbol: &str, decimals: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            decimals,
            pow10: 10f64.powi(decimals as i32),
        }
    }
}

/// Strips the `nepNNN:` (or any `scheme:`) wire prefix, leaving the bare
/// contract/token identifier used as the table key.
pub fn strip_wire_prefix(token_id: &str) -> &str {
    match token_id.split_once(':') {
        Some((_, rest)) => rest,
        None => token_id,
    }
}

#[derive(Debug, Clone)]
pub struct TokenTable {
    btc: HashMap<String, TokenInfo>,
    usd: HashMap<String, TokenInfo>,
}

impl TokenTable {
    /// Builds the table from the configured BTC and USD token identifiers.
    pub fn new(btc_token_ids: &[String], usd_token_ids: &[String]) -> Self {
        let mut btc = HashMap::new();
        for id in btc_token_ids {
            btc.insert(strip_wire_prefix(id).to_string(), TokenInfo::new("BTC", BTC_DECIMALS));
        }
        let mut usd = HashMap::new();
        for id in usd_token_ids {
            usd.insert(strip_wire_prefix(id).to_string(), TokenInfo::new("USD", USD_DECIMALS));
        }
        Self { btc, usd }
    }

    pub fn is_btc(&self, token_id: &str) -> bool {
        self.btc.contains_key(strip_wire_prefix(token_id))
    }

    pub fn is_usd(&self, token_id: &str) -> bool {
        self.usd.contains_key(strip_wire_prefix(token_id))
    }

    pub fn info(&self, token_id: &str) -> Option<&TokenInfo> {
        let stripped = strip_wire_prefix(token_id);
        self.btc.get(stripped).or_else(|| self.usd.get(stripped))
    }

    pub fn btc_token_ids(&self) -> impl Iterator<Item = &String> {
        self.btc.keys()
    }

    pub fn usd_token_ids(&self) -> impl Iterator<Item = &String> {
        self.usd.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_wire_prefix() {
        assert_eq!(strip_wire_prefix("nep141:btc.omft.near"), "btc.omft.near");
        assert_eq!(strip_wire_prefix("no-prefix"), "no-prefix");
    }

    #[test]
    fn test_token_pair_classification() {
        let table = TokenTable::new(
            &["nep141:btc.omft.near".to_string()],
            &["nep141:usdt.omft.near".to_string()],
        );
        assert!(table.is_btc("nep141:btc.omft.near"));
        assert!(!table.is_usd("nep141:btc.omft.near"));
        assert!(table.is_usd("nep141:usdt.omft.near"));
        assert_eq!(table.info("nep141:btc.omft.near").unwrap().decimals, 8);
    }
}
