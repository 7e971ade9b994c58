// ─────────────────────────────────────────────────────────────────────────────
// intent.rs — Token-diff intent message construction
//
// Builds the `message` JSON string that `signing::sign_intent` hashes and
// signs, plus the outer publish body the relay driver sends. Kept separate
// from signing.rs because signing.rs treats the digest/signature primitive as
// opaque (per the spec this implements); this module only ever produces
// plain data for that primitive to consume.
// ─────────────────────────────────────────────────────────────────────────────
use serde::Serialize;

use crate::quoter::QuoteResult;
use crate::signing::{self, Signature};

const WIRE_SCHEME: &str = "nep141";

/// Re-adds the `nepNNN:` wire prefix stripped by `token::strip_wire_prefix`
/// when building internal lookups; a no-op if the id already carries a
/// scheme.
pub fn with_wire_prefix(token_id: &str) -> String {
    if token_id.contains(':') {
        token_id.to_string()
    } else {
        format!("{}:{}", WIRE_SCHEME, token_id)
    }
}

#[derive(Debug, Serialize)]
struct TokenDiffIntent {
    intent: &'static str, // "token_diff"
    diff: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct IntentMessage {
    signer_id: String,
    deadline: String,
    intents: Vec<TokenDiffIntent>,
}

/// Builds the canonical `message` string for one token_diff intent: a
/// positive delta for the token the solver receives, negative for the one it
/// sends. Base-unit amounts are serialized as decimal strings (no float
/// precision loss crossing the wire).
pub fn build_token_diff_message(
    signer_id: &str,
    deadline_ms: u64,
    received_token_id: &str,
    received_amount: u128,
    sent_token_id: &str,
    sent_amount: u128,
) -> String {
    let mut diff = std::collections::BTreeMap::new();
    diff.insert(with_wire_prefix(received_token_id), received_amount.to_string());
    diff.insert(with_wire_prefix(sent_token_id), format!("-{}", sent_amount));

    let message = IntentMessage {
        signer_id: signer_id.to_string(),
        deadline: deadline_iso8601(deadline_ms),
        intents: vec![TokenDiffIntent { intent: "token_diff", diff }],
    };

    serde_json::to_string(&message).expect("IntentMessage serialization cannot fail")
}

fn deadline_iso8601(deadline_ms: u64) -> String {
    let secs = (deadline_ms / 1_000) as i64;
    let nanos = ((deadline_ms % 1_000) * 1_000_000) as u32;
    chrono::DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339())
}

/// Signs a `QuoteResult` as a token_diff intent and produces the
/// `signed_data` object the relay's quote_response wire shape carries.
pub fn sign_quote_result(
    key: &ed25519_dalek::SigningKey,
    signer_id: &str,
    recipient: &str,
    deadline_ms: u64,
    quote: &QuoteResult,
) -> Result<Signature, crate::signing::SigningError> {
    let (received_token, received_amount, sent_token, sent_amount) = if quote.we_are_buying_btc {
        // Solver receives BTC, sends USD.
        (
            quote.btc_token_id.as_str(),
            quote.amount_in.unwrap_or(0),
            quote.usd_token_id.as_str(),
            quote.amount_out.unwrap_or(0),
        )
    } else {
        // Solver receives USD, sends BTC.
        (
            quote.usd_token_id.as_str(),
            quote.amount_out.unwrap_or(0),
            quote.btc_token_id.as_str(),
            quote.amount_in.unwrap_or(0),
        )
    };

    let message = build_token_diff_message(
        signer_id,
        deadline_ms,
        received_token,
        received_amount,
        sent_token,
        sent_amount,
    );

    signing::sign_intent(key, &message, recipient)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_wire_prefix_adds_scheme_once() {
        assert_eq!(with_wire_prefix("btc.omft.near"), "nep141:btc.omft.near");
        assert_eq!(with_wire_prefix("nep141:btc.omft.near"), "nep141:btc.omft.near");
    }

    #[test]
    fn test_build_token_diff_message_signs_are_opposite() {
        let msg = build_token_diff_message(
            "solver.near",
            1_700_000_000_000,
            "btc.omft.near",
            100_000_000,
            "usdt.omft.near",
            50_000_000_000,
        );
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        let diff = &parsed["intents"][0]["diff"];
        assert_eq!(diff["nep141:btc.omft.near"], "100000000");
        assert_eq!(diff["nep141:usdt.omft.near"], "-50000000000");
    }

    #[test]
    fn test_sign_quote_result_roundtrip() {
        let key = ed25519_dalek::SigningKey::from_bytes(&[8u8; 32]);
        let quote = QuoteResult {
            amount_in: Some(100_000_000),
            amount_out: Some(50_000_000_000),
            btc_size: 1.0,
            we_are_buying_btc: true,
            btc_token_id: "btc.omft.near".to_string(),
            usd_token_id: "usdt.omft.near".to_string(),
            is_exact_out: false,
            spread_bps: 30.0,
            reference_price: 50_000.0,
        };
        let sig = sign_quote_result(&key, "solver.near", "solver.near", 1_700_000_000_000, &quote).unwrap();
        assert_eq!(sig.standard, "nep413");
        assert!(sig.public_key.starts_with("ed25519:"));
    }
}
