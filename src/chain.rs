// ─────────────────────────────────────────────────────────────────────────────
// chain.rs — ChainClient (settlement-chain view calls + signing passthrough)
//
// Balance reads follow the teacher's `LiveExchange` cache idiom in
// exchange.rs (`cached_balance: Option<(f64, Instant)>`, checked against a
// fixed `CACHE_DURATION`), generalized to stale-while-revalidate: a caller
// that hits a cache entry older than the refresh threshold spawns a
// background refresh and returns the stale value immediately rather than
// blocking, since balance reads gate the Quoter's hot path indirectly via
// InventoryManager and must never stall it.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::SigningKey;

use crate::signing;

const BALANCE_CACHE_TTL: Duration = Duration::from_secs(10);
const BALANCE_REFRESH_AFTER: Duration = Duration::from_secs(7);

#[derive(Debug, Clone)]
pub enum ChainError {
    Network(String),
    View(String),
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::Network(s) => write!(f, "chain network error: {}", s),
            ChainError::View(s) => write!(f, "chain view call failed: {}", s),
        }
    }
}

impl std::error::Error for ChainError {}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Returns the intents-contract multi-token balance for `token_id` in
    /// human units, dividing the on-chain base-unit integer by `pow10`.
    /// Failures are logged and surfaced as `Ok(0.0)` per the spec's "cannot
    /// quote" failure policy — the caller decides what to do with a zero
    /// balance, not this client.
    async fn get_balance(&self, token_id: &str, pow10: f64) -> Result<f64, ChainError>;
    async fn was_nonce_used(&self, nonce: &str) -> Result<bool, ChainError>;
    fn sign(&self, digest: &[u8; 32]) -> [u8; 64];
    fn public_key_string(&self) -> String;
}

struct CacheEntry {
    value: f64,
    fetched_at: Instant,
    refreshing: bool,
}

pub struct LiveChainClient {
    rpc_url: Arc<String>,
    account_id: Arc<String>,
    client: reqwest::Client,
    signing_key: SigningKey,
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl LiveChainClient {
    pub fn new(rpc_url: String, account_id: String, signing_key: SigningKey) -> Self {
        Self {
            rpc_url: Arc::new(rpc_url),
            account_id: Arc::new(account_id),
            client: reqwest::Client::new(),
            signing_key,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn fetch_balance(
        client: &reqwest::Client,
        rpc_url: &str,
        account_id: &str,
        token_id: &str,
        pow10: f64,
    ) -> Result<f64, ChainError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "dontcare",
            "method": "query",
            "params": {
                "request_type": "call_function",
                "finality": "final",
                "account_id": account_id,
                "method_name": "mt_balance_of",
                "args_base64": base64_args(&serde_json::json!({
                    "account_id": account_id,
                    "token_id": token_id,
                })),
            }
        });

        let resp = client
            .post(rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Network(e.to_string()))?;

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChainError::Network(e.to_string()))?;

        let raw = value
            .get("result")
            .and_then(|r| r.get("result"))
            .and_then(|r| r.as_array())
            .map(|bytes| {
                bytes
                    .iter()
                    .filter_map(|b| b.as_u64())
                    .map(|b| b as u8)
                    .collect::<Vec<u8>>()
            })
            .ok_or_else(|| ChainError::View("malformed mt_balance_of response".to_string()))?;

        let text = String::from_utf8(raw).map_err(|e| ChainError::View(e.to_string()))?;
        let parsed: String = serde_json::from_str(&text)
            .map_err(|e| ChainError::View(format!("non-numeric balance: {}", e)))?;
        let raw_units: f64 = parsed
            .parse::<f64>()
            .map_err(|e| ChainError::View(format!("unparseable balance: {}", e)))?;
        Ok(raw_units / pow10)
    }

    /// Spawns a detached refresh and returns without waiting on it; the
    /// next caller within `BALANCE_REFRESH_AFTER` observes the updated
    /// value, everyone else keeps reading the stale one until it lands.
    fn spawn_background_refresh(&self, token_id: String, pow10: f64) {
        let client = self.client.clone();
        let rpc_url = self.rpc_url.clone();
        let account_id = self.account_id.clone();
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let result = Self::fetch_balance(&client, &rpc_url, &account_id, &token_id, pow10).await;
            let mut cache = cache.lock().unwrap();
            match result {
                Ok(v) => {
                    cache.insert(
                        token_id,
                        CacheEntry {
                            value: v,
                            fetched_at: Instant::now(),
                            refreshing: false,
                        },
                    );
                }
                Err(e) => {
                    log::warn!("[CHAIN] background balance refresh failed for {}: {}", token_id, e);
                    if let Some(entry) = cache.get_mut(&token_id) {
                        entry.refreshing = false;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl ChainClient for LiveChainClient {
    async fn get_balance(&self, token_id: &str, pow10: f64) -> Result<f64, ChainError> {
        enum Plan {
            Fresh(f64),
            RefreshInBackground(f64),
            FetchBlocking,
        }

        let plan = {
            let mut cache = self.cache.lock().unwrap();
            match cache.get_mut(token_id) {
                Some(entry) if entry.fetched_at.elapsed() < BALANCE_REFRESH_AFTER => Plan::Fresh(entry.value),
                Some(entry) if entry.fetched_at.elapsed() < BALANCE_CACHE_TTL => {
                    if entry.refreshing {
                        Plan::Fresh(entry.value)
                    } else {
                        entry.refreshing = true;
                        Plan::RefreshInBackground(entry.value)
                    }
                }
                _ => Plan::FetchBlocking,
            }
        };

        match plan {
            Plan::Fresh(v) => Ok(v),
            Plan::RefreshInBackground(stale) => {
                self.spawn_background_refresh(token_id.to_string(), pow10);
                Ok(stale)
            }
            Plan::FetchBlocking => {
                match Self::fetch_balance(&self.client, &self.rpc_url, &self.account_id, token_id, pow10).await {
                    Ok(v) => {
                        self.cache.lock().unwrap().insert(
                            token_id.to_string(),
                            CacheEntry {
                                value: v,
                                fetched_at: Instant::now(),
                                refreshing: false,
                            },
                        );
                        Ok(v)
                    }
                    Err(e) => {
                        log::warn!("[CHAIN] balance fetch failed for {}: {}", token_id, e);
                        Ok(0.0)
                    }
                }
            }
        }
    }

    async fn was_nonce_used(&self, nonce: &str) -> Result<bool, ChainError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "dontcare",
            "method": "query",
            "params": {
                "request_type": "call_function",
                "finality": "final",
                "account_id": self.account_id,
                "method_name": "is_nonce_used",
                "args_base64": base64_args(&serde_json::json!({ "nonce": nonce })),
            }
        });
        let resp = self
            .client
            .post(self.rpc_url.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Network(e.to_string()))?;
        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChainError::Network(e.to_string()))?;
        value
            .get("result")
            .and_then(|r| r.get("result"))
            .and_then(|r| r.as_array())
            .map(|bytes| bytes.iter().any(|b| b.as_u64() == Some(b't' as u64)))
            .ok_or_else(|| ChainError::View("malformed is_nonce_used response".to_string()))
    }

    fn sign(&self, digest: &[u8; 32]) -> [u8; 64] {
        use ed25519_dalek::Signer;
        self.signing_key.sign(digest).to_bytes()
    }

    fn public_key_string(&self) -> String {
        signing::public_key_string(&self.signing_key)
    }
}

fn base64_args(value: &serde_json::Value) -> String {
    BASE64.encode(value.to_string().into_bytes())
}

/// In-memory ChainClient for tests and local development: fixed balances,
/// a settable nonce-used set, signing delegated to a real key.
pub struct SimChainClient {
    pub balances: Mutex<HashMap<String, f64>>,
    pub used_nonces: Mutex<std::collections::HashSet<String>>,
    signing_key: SigningKey,
}

impl SimChainClient {
    pub fn new(signing_key: SigningKey) -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            used_nonces: Mutex::new(std::collections::HashSet::new()),
            signing_key,
        }
    }

    pub fn set_balance(&self, token_id: &str, value: f64) {
        self.balances.lock().unwrap().insert(token_id.to_string(), value);
    }

    pub fn mark_nonce_used(&self, nonce: &str) {
        self.used_nonces.lock().unwrap().insert(nonce.to_string());
    }
}

#[async_trait]
impl ChainClient for SimChainClient {
    async fn get_balance(&self, token_id: &str, _pow10: f64) -> Result<f64, ChainError> {
        Ok(*self.balances.lock().unwrap().get(token_id).unwrap_or(&0.0))
    }

    async fn was_nonce_used(&self, nonce: &str) -> Result<bool, ChainError> {
        Ok(self.used_nonces.lock().unwrap().contains(nonce))
    }

    fn sign(&self, digest: &[u8; 32]) -> [u8; 64] {
        use ed25519_dalek::Signer;
        self.signing_key.sign(digest).to_bytes()
    }

    fn public_key_string(&self) -> String {
        signing::public_key_string(&self.signing_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SigningKey {
        SigningKey::from_bytes(&[3u8; 32])
    }

    #[tokio::test]
    async fn test_sim_chain_balance_roundtrip() {
        let chain = SimChainClient::new(key());
        chain.set_balance("btc.omft.near", 1.5);
        assert_eq!(chain.get_balance("btc.omft.near", crate::token::BTC_POW10).await.unwrap(), 1.5);
        assert_eq!(chain.get_balance("usdt.omft.near", crate::token::USD_POW10).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_sim_chain_nonce_tracking() {
        let chain = SimChainClient::new(key());
        assert!(!chain.was_nonce_used("abc").await.unwrap());
        chain.mark_nonce_used("abc");
        assert!(chain.was_nonce_used("abc").await.unwrap());
    }

    #[test]
    fn test_sim_chain_public_key_matches_signing_module() {
        let chain = SimChainClient::new(key());
        assert_eq!(chain.public_key_string(), signing::public_key_string(&key()));
    }

    #[test]
    fn test_base64_args_is_url_safe_length() {
        let encoded = base64_args(&serde_json::json!({"a": 1}));
        assert!(!encoded.is_empty());
    }
}
