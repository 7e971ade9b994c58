// ─────────────────────────────────────────────────────────────────────────────
// status.rs — /healthz + /metrics HTTP surface
//
// Enriched from the axum + tower-http pairing seen in the pack's other
// `other_examples` REST bots (simple JSON handlers returning `Json<T>`,
// served behind a `TraceLayer`). This is a thin, read-only collaborator:
// no auth, no write endpoints, per §1's "interfaces only" framing — it
// exists so the solver is observable, not to host a dashboard.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::orderbook::OrderBook;
use crate::quoter::QuoterStats;
use crate::risk::InventoryManager;

pub struct StatusState {
    pub book: Arc<std::sync::Mutex<OrderBook>>,
    pub inventory: Arc<InventoryManager>,
    pub quoter_stats: Arc<QuoterStats>,
    pub max_orderbook_age_ms: u64,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    emergency_mode: bool,
    orderbook_fresh: bool,
    snapshot_fresh: bool,
}

#[derive(Debug, Serialize)]
struct MetricsResponse {
    received: u64,
    generated: u64,
    rejections_by_reason: HashMap<&'static str, u64>,
}

async fn healthz(
    axum::extract::State(state): axum::extract::State<Arc<StatusState>>,
) -> Json<HealthResponse> {
    let now_ms = now_ms();
    let orderbook_fresh = state.book.lock().unwrap().is_fresh(now_ms);
    let snapshot_fresh = state
        .inventory
        .current_snapshot()
        .map(|s| s.is_fresh(now_ms))
        .unwrap_or(false);
    let emergency_mode = state.inventory.is_emergency();

    Json(HealthResponse {
        status: if emergency_mode {
            "emergency"
        } else if orderbook_fresh && snapshot_fresh {
            "ready"
        } else {
            "idle"
        },
        emergency_mode,
        orderbook_fresh,
        snapshot_fresh,
    })
}

async fn metrics(
    axum::extract::State(state): axum::extract::State<Arc<StatusState>>,
) -> Json<MetricsResponse> {
    let (received, generated, rejections_by_reason) = state.quoter_stats.snapshot();
    Json(MetricsResponse {
        received,
        generated,
        rejections_by_reason,
    })
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Binds and serves the status surface for the life of the process. Errors
/// binding the socket are logged, not fatal — the solver can still quote
/// and hedge without a reachable dashboard, per §1's thin-collaborator note.
pub async fn serve(bind_addr: &str, state: Arc<StatusState>) {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = match bind_addr.parse() {
        Ok(a) => a,
        Err(e) => {
            log::error!("[STATUS] invalid STATUS_BIND_ADDR {}: {}", bind_addr, e);
            return;
        }
    };

    log::info!("[STATUS] listening on {}", addr);
    if let Err(e) = axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
    {
        log::error!("[STATUS] server error: {}", e);
    }
}
