// ─────────────────────────────────────────────────────────────────────────────
// error.rs — Startup configuration error taxonomy
//
// Every other component (chain, venue, relay, signing) defines its own
// narrow error enum at its boundary, matching the teacher's per-module
// error style; this one covers only `Config::from_env`'s unrecoverable
// startup failures (§7: missing credentials, malformed values).
// ─────────────────────────────────────────────────────────────────────────────
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required config value: {0}")]
    MissingRequired(&'static str),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
