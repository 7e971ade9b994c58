// ─────────────────────────────────────────────────────────────────────────────
// signing.rs — Intent signing (NEP-413-style digest, Ed25519)
//
// Structurally mirrors the teacher's signing.rs: a dedicated digest-hashing
// function, a plain Signature struct, and exact-key-order JSON construction
// via serde_json::Map so the server's re-serialization matches what we
// signed. The primitive itself is swapped from EIP-712/keccak to a
// domain-separated SHA-256 digest signed with Ed25519, per the settlement
// chain's intent standard.
// ─────────────────────────────────────────────────────────────────────────────
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 4-byte prefix identifying the NEP-413 intent standard, prepended to the
/// canonical payload before hashing (domain separation).
const NEP413_PREFIX: [u8; 4] = [0x4e, 0x45, 0x50, 0x34]; // "NEP4"

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub standard: String,
    pub payload: SignedPayload,
    pub signature: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPayload {
    pub message: String,
    pub nonce: String, // base64
    pub recipient: String,
}

#[derive(Debug, Clone)]
pub enum SigningError {
    InvalidKey(String),
    InvalidNonce,
}

impl std::fmt::Display for SigningError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningError::InvalidKey(s) => write!(f, "invalid signing key: {}", s),
            SigningError::InvalidNonce => write!(f, "nonce must decode to exactly 32 bytes"),
        }
    }
}

impl std::error::Error for SigningError {}

/// Loads an Ed25519 signing key from a base58- or base64-encoded 32-byte
/// seed (NEAR-style `SOLVER_SIGNING_KEY` config value).
pub fn load_signing_key(raw: &str) -> Result<SigningKey, SigningError> {
    let bytes = bs58::decode(raw)
        .into_vec()
        .or_else(|_| BASE64.decode(raw))
        .map_err(|_| SigningError::InvalidKey("not valid base58 or base64".to_string()))?;

    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SigningError::InvalidKey("seed must be 32 bytes".to_string()))?;
    Ok(SigningKey::from_bytes(&seed))
}

pub fn public_key_string(key: &SigningKey) -> String {
    format!("ed25519:{}", bs58::encode(key.verifying_key().to_bytes()).into_string())
}

/// Computes the NEP-413 domain-separated digest: a fixed standard prefix
/// followed by the canonical serialization of `(message, nonce, recipient)`.
/// Mirrors the teacher's `compute_action_hash` in structure — fixed framing
/// bytes appended in a defined order, then hashed in one pass.
fn compute_digest(message: &str, nonce: &[u8; 32], recipient: &str) -> [u8; 32] {
    let mut payload = serde_json::Map::new();
    payload.insert("message".to_string(), serde_json::Value::from(message));
    payload.insert(
        "nonce".to_string(),
        serde_json::Value::from(BASE64.encode(nonce)),
    );
    payload.insert("recipient".to_string(), serde_json::Value::from(recipient));
    let canonical = serde_json::Value::Object(payload).to_string();

    let mut hasher = Sha256::new();
    hasher.update(NEP413_PREFIX);
    hasher.update(canonical.as_bytes());
    hasher.finalize().into()
}

/// Signs the intent `message` with a random 32-byte nonce, returning the
/// full signed-payload structure ready to publish on the relay.
pub fn sign_intent(
    key: &SigningKey,
    message: &str,
    recipient: &str,
) -> Result<Signature, SigningError> {
    let mut nonce = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut nonce);

    let digest = compute_digest(message, &nonce, recipient);
    let sig: DalekSignature = key.sign(&digest);

    Ok(Signature {
        standard: "nep413".to_string(),
        payload: SignedPayload {
            message: message.to_string(),
            nonce: BASE64.encode(nonce),
            recipient: recipient.to_string(),
        },
        signature: format!("ed25519:{}", bs58::encode(sig.to_bytes()).into_string()),
        public_key: public_key_string(key),
    })
}
