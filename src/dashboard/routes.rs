//! Dashboard API route handlers.
//!
//! All endpoints return JSON. The engine publishes into `DashboardState`
//! after every cycle; handlers only read.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::error;

use crate::monitoring::latency::{LatencyLogger, LatencyReport};
use crate::monitoring::pnl::CurrentPnl;
use crate::storage::repository::{TradeRecord, TradeRepository};
use crate::strategy::risk::RiskSummary;
use crate::types::{ArbitrageOpportunity, BotState, CycleReport, Position};

const MAX_CYCLES: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct DashboardState {
    pub bot: RwLock<BotState>,
    pub opportunities: RwLock<Vec<ArbitrageOpportunity>>,
    pub pnl: RwLock<CurrentPnl>,
    pub risk: RwLock<Option<RiskSummary>>,
    pub cycles: RwLock<Vec<CycleReport>>,
    pub latency: Arc<LatencyLogger>,
    pub repository: Option<TradeRepository>,
}

impl DashboardState {
    pub fn new(bot: BotState, latency: Arc<LatencyLogger>, repository: Option<TradeRepository>) -> Self {
        Self {
            bot: RwLock::new(bot),
            opportunities: RwLock::new(Vec::new()),
            pnl: RwLock::new(CurrentPnl::default()),
            risk: RwLock::new(None),
            cycles: RwLock::new(Vec::new()),
            latency,
            repository,
        }
    }

    /// Publish the outcome of one engine cycle.
    pub async fn publish(
        &self,
        bot: BotState,
        report: CycleReport,
        opportunities: Vec<ArbitrageOpportunity>,
        pnl: CurrentPnl,
        risk: RiskSummary,
    ) {
        *self.bot.write().await = bot;
        *self.opportunities.write().await = opportunities;
        *self.pnl.write().await = pnl;
        *self.risk.write().await = Some(risk);

        let mut cycles = self.cycles.write().await;
        cycles.push(report);
        if cycles.len() > MAX_CYCLES {
            let excess = cycles.len() - MAX_CYCLES;
            cycles.drain(..excess);
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub halt_reason: Option<String>,
    pub paper_trading: bool,
    pub cycle_count: u64,
    pub opportunities_found: u64,
    pub trades_executed: u64,
    pub signals_generated: u64,
    pub realized_pnl: f64,
    pub daily_pnl: f64,
    pub open_positions: usize,
    pub total_exposure: f64,
    pub uptime_secs: i64,
    pub last_cycle: Option<CycleReport>,
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let bot = state.bot.read().await;
    let last_cycle = state.cycles.read().await.last().cloned();
    Json(StatusResponse {
        status: if bot.halted { "HALTED" } else { "RUNNING" }.to_string(),
        halt_reason: bot.halt_reason.clone(),
        paper_trading: bot.paper_trading,
        cycle_count: bot.cycle_count,
        opportunities_found: bot.opportunities_found,
        trades_executed: bot.trades_executed,
        signals_generated: bot.signals_generated,
        realized_pnl: bot.realized_pnl,
        daily_pnl: bot.daily_pnl,
        open_positions: bot.open_positions().count(),
        total_exposure: bot.total_exposure(),
        uptime_secs: bot.uptime().num_seconds(),
        last_cycle,
    })
}

/// GET /api/positions
pub async fn get_positions(State(state): State<AppState>) -> Json<Vec<Position>> {
    let bot = state.bot.read().await;
    Json(bot.open_positions().cloned().collect())
}

/// GET /api/opportunities
pub async fn get_opportunities(State(state): State<AppState>) -> Json<Vec<ArbitrageOpportunity>> {
    Json(state.opportunities.read().await.clone())
}

/// GET /api/pnl
pub async fn get_pnl(State(state): State<AppState>) -> Json<CurrentPnl> {
    Json(state.pnl.read().await.clone())
}

/// GET /api/risk
pub async fn get_risk(State(state): State<AppState>) -> Result<Json<RiskSummary>, StatusCode> {
    state
        .risk
        .read()
        .await
        .clone()
        .map(Json)
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

/// GET /api/trades?limit=N
pub async fn get_trades(
    State(state): State<AppState>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<Vec<TradeRecord>>, (StatusCode, String)> {
    let Some(repo) = &state.repository else {
        return Ok(Json(Vec::new()));
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    repo.recent_trades(limit).await.map(Json).map_err(|e| {
        error!(error = %e, "Failed to load trades for dashboard");
        (StatusCode::INTERNAL_SERVER_ERROR, "failed to load trades".to_string())
    })
}

/// GET /api/latency
pub async fn get_latency(State(state): State<AppState>) -> Json<LatencyReport> {
    Json(state.latency.generate_report())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
