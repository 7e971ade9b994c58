// ─────────────────────────────────────────────────────────────────────────────
// config.rs — Typed configuration surface
//
// Centralizes the scattered `std::env::var(...).unwrap_or(...)` lookups the
// teacher's main.rs used directly, into one validated struct loaded once at
// startup. Missing required secrets are an unrecoverable startup error.
// ─────────────────────────────────────────────────────────────────────────────
use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub max_btc_inventory: f64,
    pub min_usd_reserve: f64,
    pub target_spread_bips: f64,
    pub base_spread_bips: f64,
    pub max_spread_bips: f64,
    pub min_trade_size_btc: f64,
    pub max_trade_size_btc: f64,
    pub min_margin_threshold: f64,
    pub max_negative_funding_rate_hourly: f64,
    pub drift_threshold_btc: f64,
    pub hedge_slippage_bps: f64,
    pub max_orderbook_age_ms: u64,
    pub hedging_enabled: bool,
    pub dynamic_spread_enabled: bool,

    pub relay_url: String,
    pub venue_testnet: bool,
    pub solver_signing_key: String,
    pub chain_account_id: String,
    pub chain_rpc_url: String,
    pub btc_token_ids: Vec<String>,
    pub usd_token_ids: Vec<String>,
    pub status_bind_addr: String,
}

impl Config {
    /// Loads `.env` (if present) then reads every option, failing fast on a
    /// missing required value or a malformed numeric/bool.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            max_btc_inventory: parse_env("MAX_BTC_INVENTORY", 5.0)?,
            min_usd_reserve: parse_env("MIN_USD_RESERVE", 500.0)?,
            target_spread_bips: parse_env("TARGET_SPREAD_BIPS", 30.0)?,
            base_spread_bips: parse_env("BASE_SPREAD_BIPS", 20.0)?,
            max_spread_bips: parse_env("MAX_SPREAD_BIPS", 50.0)?,
            min_trade_size_btc: parse_env("MIN_TRADE_SIZE_BTC", 0.0005)?,
            max_trade_size_btc: parse_env("MAX_TRADE_SIZE_BTC", 1.0)?,
            min_margin_threshold: parse_env("MIN_MARGIN_THRESHOLD", 200.0)?,
            max_negative_funding_rate_hourly: parse_env("MAX_NEGATIVE_FUNDING_RATE", -0.001)?,
            drift_threshold_btc: parse_env("DRIFT_THRESHOLD_BTC", 0.01)?,
            hedge_slippage_bps: parse_env("HEDGE_SLIPPAGE_BPS", 15.0)?,
            max_orderbook_age_ms: parse_env("MAX_ORDERBOOK_AGE_MS", 5_000.0)? as u64,
            hedging_enabled: parse_bool_env("HEDGING_ENABLED", true)?,
            dynamic_spread_enabled: parse_bool_env("DYNAMIC_SPREAD_ENABLED", false)?,

            relay_url: required_env("RELAY_URL")?,
            venue_testnet: parse_bool_env("VENUE_TESTNET", false)?,
            solver_signing_key: required_env("SOLVER_SIGNING_KEY")?,
            chain_account_id: required_env("CHAIN_ACCOUNT_ID")?,
            chain_rpc_url: std::env::var("CHAIN_RPC_URL")
                .unwrap_or_else(|_| "https://rpc.mainnet.near.org".to_string()),
            btc_token_ids: list_env("BTC_TOKEN_IDS", "nep141:btc.omft.near"),
            usd_token_ids: list_env("USD_TOKEN_IDS", "nep141:usdt.omft.near"),
            status_bind_addr: std::env::var("STATUS_BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8088".to_string()),
        })
    }
}

/// Comma-separated list config value (e.g. `BTC_TOKEN_IDS=nep141:btc.omft.near,nep141:xbtc.omft.near`).
fn list_env(key: &'static str, default: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn required_env(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingRequired(key))
}

fn parse_env(key: &'static str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<f64>()
            .map_err(|_| ConfigError::InvalidValue { key, value: v }),
        Err(_) => Ok(default),
    }
}

fn parse_bool_env(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(key) {
        Ok(v) => match v.as_str() {
            "1" | "true" | "TRUE" => Ok(true),
            "0" | "false" | "FALSE" => Ok(false),
            _ => Err(ConfigError::InvalidValue { key, value: v }),
        },
        Err(_) => Ok(default),
    }
}
