//! Read-only snapshot API + manual trigger hook
//!
//! The orchestrator's outward surface for dashboards and operations:
//! current agents, positions, trade feed and market data, plus a
//! "run a decision pass now" endpoint. Everything except the trigger is
//! read-only.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::ledger::PositionLedger;
use crate::registry::AgentRegistry;
use crate::scheduler::SchedulerHandle;
use crate::store::Store;

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<AgentRegistry>,
    pub ledger: Arc<PositionLedger>,
    pub store: Arc<dyn Store>,
    pub scheduler: SchedulerHandle,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/agents", get(agents_handler))
        .route("/api/positions", get(positions_handler))
        .route("/api/trades", get(trades_handler))
        .route("/api/market", get(market_handler))
        .route("/api/trigger-cycle", post(trigger_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(
    state: ApiState,
    port: u16,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> crate::error::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn agents_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.registry.state_snapshots().await)
}

async fn positions_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.ledger.all_positions().await)
}

#[derive(Debug, Deserialize)]
struct TradesQuery {
    #[serde(default = "default_trades_limit")]
    limit: usize,
}

fn default_trades_limit() -> usize {
    50
}

async fn trades_handler(
    State(state): State<ApiState>,
    Query(query): Query<TradesQuery>,
) -> impl IntoResponse {
    match state.store.recent_trades(query.limit.min(500)).await {
        Ok(trades) => Json(trades).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn market_handler(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.get_market().await {
        Ok(market) => Json(market).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn trigger_handler(State(state): State<ApiState>) -> impl IntoResponse {
    if state.scheduler.trigger_cycle().await {
        info!("Decision pass triggered via API");
        Json(json!({"message": "decision pass queued"})).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "scheduler is shutting down"})),
        )
            .into_response()
    }
}

fn internal_error(e: crate::error::ArenaError) -> axum::response::Response {
    error!("API request failed: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": e.to_string()})),
    )
        .into_response()
}
