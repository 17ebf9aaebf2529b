use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::SNAPSHOT_RETENTION_SECS;
use crate::db::markets::MarketRepo;
use crate::db::snapshots::SnapshotStore;
use crate::db::trades::TradeLedger;
use crate::error::AppError;
use crate::indexer::Indexer;
use crate::types::{now_secs, MarketStatus};

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub indexer: Arc<Indexer>,
    /// Static bearer credential for the trigger endpoint.
    pub indexer_token: String,
}

pub fn router(state: ApiState) -> Router {
    let trigger = Router::new()
        .route("/indexer/run", post(run_indexer))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .merge(trigger)
        .route("/indexer/status", get(get_indexer_status))
        .route("/markets", get(get_markets))
        .route("/markets/:address/trades", get(get_market_trades))
        .route("/markets/:address/snapshots", get(get_market_snapshots))
        .route("/health", get(get_health))
        .with_state(state)
}

/// The scheduler authenticates with a static token; anything else is 401.
async fn require_bearer(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let authorized = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|token| token == state.indexer_token)
        .unwrap_or(false);

    if !authorized {
        return (StatusCode::UNAUTHORIZED, "invalid or missing bearer token").into_response();
    }
    next.run(req).await
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct MarketsQuery {
    pub min_heat: Option<f64>,
    pub status: Option<MarketStatus>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct TradesQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct SnapshotsQuery {
    pub since: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct MarketResponse {
    pub address: String,
    pub question: String,
    pub status: String,
    pub yes_price: f64,
    pub no_price: f64,
    pub total_collateral: f64,
    pub liquidity_param: f64,
    pub resolved: bool,
    pub yes_wins: Option<bool>,
    pub velocity_1m: f64,
    pub velocity_5m: f64,
    pub velocity_15m: f64,
    pub acceleration: f64,
    pub stress_score: f64,
    pub fragility: f64,
    pub heat_score: f64,
    pub volume_24h: f64,
    pub trades_24h: i64,
    pub fee_velocity_24h: f64,
}

#[derive(Serialize)]
pub struct TradeResponse {
    pub tx_hash: String,
    pub trade_type: String,
    pub outcome: String,
    pub shares: String,
    pub amount: String,
    pub creator_fee: String,
    pub price_at_trade: Option<f64>,
    pub block_number: i64,
    pub block_time: i64,
}

#[derive(Serialize)]
pub struct SnapshotResponse {
    pub time: i64,
    pub yes_price: f64,
    pub no_price: f64,
    pub total_collateral: f64,
    pub liquidity_param: f64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn run_indexer(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, AppError> {
    match state.indexer.run_cycle().await? {
        Some(summary) => Ok(Json(json!({ "skipped": false, "summary": summary }))),
        None => Ok(Json(json!({ "skipped": true }))),
    }
}

async fn get_indexer_status(
    State(state): State<ApiState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let row = state.indexer.sync_state().state().await?;
    Ok(Json(match row {
        Some(s) => json!({
            "chain_id": s.chain_id,
            "last_indexed_block": s.last_indexed_block,
            "is_syncing": s.is_syncing != 0,
            "last_indexed_at": s.last_indexed_at,
            "last_error": s.last_error,
            "consecutive_errors": s.consecutive_errors,
        }),
        None => json!({ "last_indexed_block": 0, "is_syncing": false }),
    }))
}

async fn get_markets(
    State(state): State<ApiState>,
    Query(params): Query<MarketsQuery>,
) -> Result<Json<Vec<MarketResponse>>, AppError> {
    let status = params.status.map(|s| s.to_string());
    let rows = MarketRepo::new(state.pool.clone())
        .list(
            params.min_heat.unwrap_or(0.0),
            status.as_deref(),
            params.limit.unwrap_or(100),
        )
        .await?;

    let markets = rows
        .into_iter()
        .map(|r| MarketResponse {
            address: r.address,
            question: r.question,
            status: r.status,
            yes_price: r.yes_price,
            no_price: r.no_price,
            total_collateral: r.total_collateral,
            liquidity_param: r.liquidity_param,
            resolved: r.resolved != 0,
            yes_wins: r.yes_wins.map(|w| w != 0),
            velocity_1m: r.velocity_1m,
            velocity_5m: r.velocity_5m,
            velocity_15m: r.velocity_15m,
            acceleration: r.acceleration,
            stress_score: r.stress_score,
            fragility: r.fragility,
            heat_score: r.heat_score,
            volume_24h: r.volume_24h,
            trades_24h: r.trades_24h,
            fee_velocity_24h: r.fee_velocity_24h,
        })
        .collect();

    Ok(Json(markets))
}

async fn get_market_trades(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Query(params): Query<TradesQuery>,
) -> Result<Json<Vec<TradeResponse>>, AppError> {
    let rows = TradeLedger::new(state.pool.clone())
        .recent_for_market(&address.to_lowercase(), params.limit.unwrap_or(100))
        .await?;

    let trades = rows
        .into_iter()
        .map(|r| TradeResponse {
            tx_hash: r.tx_hash,
            trade_type: r.trade_type,
            outcome: r.outcome,
            shares: r.shares,
            amount: r.amount,
            creator_fee: r.creator_fee,
            price_at_trade: r.price_at_trade,
            block_number: r.block_number,
            block_time: r.block_time,
        })
        .collect();

    Ok(Json(trades))
}

async fn get_market_snapshots(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Query(params): Query<SnapshotsQuery>,
) -> Result<Json<Vec<SnapshotResponse>>, AppError> {
    let since = params
        .since
        .unwrap_or_else(|| now_secs() - SNAPSHOT_RETENTION_SECS);
    let rows = SnapshotStore::new(state.pool.clone())
        .for_market_since(&address.to_lowercase(), since)
        .await?;

    let snapshots = rows
        .into_iter()
        .map(|r| SnapshotResponse {
            time: r.time,
            yes_price: r.yes_price,
            no_price: r.no_price,
            total_collateral: r.total_collateral,
            liquidity_param: r.liquidity_param,
        })
        .collect();

    Ok(Json(snapshots))
}

async fn get_health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let last_indexed_at = state
        .indexer
        .sync_state()
        .state()
        .await
        .ok()
        .flatten()
        .and_then(|s| s.last_indexed_at);
    Json(json!({ "status": "ok", "last_indexed_at": last_indexed_at }))
}
