//! Risk manager.
//!
//! Enforces exposure, size and position-count limits before a position is
//! opened, sizes positions, and halts trading once the daily loss limit is
//! hit. A daily-loss halt lifts itself on the next calendar day; every
//! other halt needs an explicit resume.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::types::{ArbitrageOpportunity, BotError, BotState, Position};

pub const HALT_DAILY_LOSS: &str = "daily_loss_limit";
pub const HALT_CREDENTIALS_EXPIRED: &str = "credentials_expired";

/// Profit per contract at which a position gets its full size.
const FULL_SIZE_PROFIT: f64 = 0.10;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RiskLimits {
    pub max_position_size: f64,
    pub max_total_exposure: f64,
    pub max_daily_loss: f64,
    pub max_positions_per_market: usize,
    pub max_total_positions: usize,
    pub min_profit_threshold: f64,
    pub position_timeout_secs: i64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: 1000.0,
            max_total_exposure: 5000.0,
            max_daily_loss: 500.0,
            max_positions_per_market: 1,
            max_total_positions: 10,
            min_profit_threshold: 0.04,
            position_timeout_secs: 900,
        }
    }
}

impl From<&RiskConfig> for RiskLimits {
    fn from(c: &RiskConfig) -> Self {
        Self {
            max_position_size: c.max_position_size_usdc,
            max_total_exposure: c.max_total_exposure_usdc,
            max_daily_loss: c.max_daily_loss_usdc,
            max_positions_per_market: c.max_positions_per_market,
            max_total_positions: c.max_total_positions,
            min_profit_threshold: c.min_profit_threshold,
            position_timeout_secs: c.position_timeout_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// Why a position was refused. Checked in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    Halted(String),
    ExposureLimit { would_be: f64, limit: f64 },
    PositionTooLarge { size: f64, limit: f64 },
    MarketPositionLimit { market_id: String, limit: usize },
    TotalPositionLimit { limit: usize },
    ProfitTooLow { profit: f64, threshold: f64 },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halted(reason) => write!(f, "Trading halted: {reason}"),
            Self::ExposureLimit { would_be, limit } => {
                write!(f, "Would exceed exposure limit: {would_be:.2} > {limit:.2}")
            }
            Self::PositionTooLarge { size, limit } => {
                write!(f, "Position size exceeds limit: {size:.2} > {limit:.2}")
            }
            Self::MarketPositionLimit { market_id, limit } => {
                write!(f, "Max positions ({limit}) reached for market {market_id}")
            }
            Self::TotalPositionLimit { limit } => write!(f, "Max total positions reached: {limit}"),
            Self::ProfitTooLow { profit, threshold } => {
                write!(f, "Profit below threshold: {profit:.4} < {threshold:.4}")
            }
        }
    }
}

impl From<RejectionReason> for BotError {
    fn from(reason: RejectionReason) -> Self {
        BotError::RiskLimit(reason.to_string())
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RiskSummary {
    pub trading_allowed: bool,
    pub halt_reason: Option<String>,
    pub total_exposure: f64,
    pub max_total_exposure: f64,
    /// Percent of the exposure cap in use.
    pub exposure_utilization: f64,
    pub daily_pnl: f64,
    pub daily_loss_limit: f64,
    pub open_positions: usize,
    pub max_positions: usize,
    pub daily_trades: u64,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RiskManager {
    limits: RiskLimits,
    total_exposure: f64,
    open_positions: usize,
    positions_per_market: HashMap<String, usize>,
    daily_pnl: f64,
    daily_trades: u64,
    day: NaiveDate,
    halt_reason: Option<String>,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            total_exposure: 0.0,
            open_positions: 0,
            positions_per_market: HashMap::new(),
            daily_pnl: 0.0,
            daily_trades: 0,
            day: Utc::now().date_naive(),
            halt_reason: None,
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Pick up the daily P&L and halt flag from a persisted state.
    pub fn restore(&mut self, state: &BotState) {
        self.day = state.daily_date;
        self.daily_pnl = state.daily_pnl;
        self.halt_reason = if state.halted {
            Some(state.halt_reason.clone().unwrap_or_else(|| "unknown".to_string()))
        } else {
            None
        };
        self.update_exposure(state.open_positions());
    }

    /// Write the daily P&L and halt flag back into the persisted state.
    pub fn persist(&self, state: &mut BotState) {
        state.daily_date = self.day;
        state.daily_pnl = self.daily_pnl;
        state.halted = self.halt_reason.is_some();
        state.halt_reason = self.halt_reason.clone();
    }

    pub fn is_trading_allowed(&self) -> bool {
        self.halt_reason.is_none()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.as_deref()
    }

    pub fn total_exposure(&self) -> f64 {
        self.total_exposure
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    pub fn exposure_at_cap(&self) -> bool {
        self.total_exposure >= self.limits.max_total_exposure
    }

    /// Recount exposure from the open positions.
    pub fn update_exposure<'a>(&mut self, positions: impl IntoIterator<Item = &'a Position>) {
        self.total_exposure = 0.0;
        self.open_positions = 0;
        self.positions_per_market.clear();
        for p in positions {
            self.total_exposure += p.total_cost;
            self.open_positions += 1;
            *self.positions_per_market.entry(p.market_id.clone()).or_default() += 1;
        }
    }

    /// Reset daily counters when the calendar day changes. Only a
    /// daily-loss halt is lifted.
    pub fn check_day_rollover(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today <= self.day {
            return false;
        }
        info!(previous = %self.day, daily_pnl = self.daily_pnl, "New trading day, resetting daily P&L");
        self.day = today;
        self.daily_pnl = 0.0;
        self.daily_trades = 0;
        if self.halt_reason.as_deref() == Some(HALT_DAILY_LOSS) {
            self.halt_reason = None;
            info!("Daily loss halt lifted");
        }
        true
    }

    /// Add a realized P&L to today's total, halting at the daily loss limit.
    pub fn record_trade_pnl(&mut self, pnl: f64) {
        self.daily_pnl += pnl;
        self.daily_trades += 1;
        if self.daily_pnl <= -self.limits.max_daily_loss && self.is_trading_allowed() {
            warn!(
                daily_pnl = self.daily_pnl,
                limit = self.limits.max_daily_loss,
                "Daily loss limit reached"
            );
            self.halt_trading(HALT_DAILY_LOSS);
        }
    }

    pub fn can_open_position(&self, market_id: &str, size: f64, profit_per_contract: f64) -> Result<(), RejectionReason> {
        if let Some(reason) = &self.halt_reason {
            return Err(RejectionReason::Halted(reason.clone()));
        }

        let would_be = self.total_exposure + size;
        if would_be > self.limits.max_total_exposure {
            return Err(RejectionReason::ExposureLimit {
                would_be,
                limit: self.limits.max_total_exposure,
            });
        }

        if size > self.limits.max_position_size {
            return Err(RejectionReason::PositionTooLarge {
                size,
                limit: self.limits.max_position_size,
            });
        }

        let in_market = self.positions_per_market.get(market_id).copied().unwrap_or(0);
        if in_market >= self.limits.max_positions_per_market {
            return Err(RejectionReason::MarketPositionLimit {
                market_id: market_id.to_string(),
                limit: self.limits.max_positions_per_market,
            });
        }

        if self.open_positions >= self.limits.max_total_positions {
            return Err(RejectionReason::TotalPositionLimit {
                limit: self.limits.max_total_positions,
            });
        }

        if profit_per_contract < self.limits.min_profit_threshold {
            return Err(RejectionReason::ProfitTooLow {
                profit: profit_per_contract,
                threshold: self.limits.min_profit_threshold,
            });
        }

        Ok(())
    }

    /// USD to commit: the tightest of remaining exposure, the position cap,
    /// book depth and balance, scaled down for thin margins.
    pub fn calculate_position_size(&self, opp: &ArbitrageOpportunity, balance: f64) -> f64 {
        let remaining = (self.limits.max_total_exposure - self.total_exposure).max(0.0);
        let by_liquidity = opp.max_contracts * opp.total_cost;
        let base = remaining
            .min(self.limits.max_position_size)
            .min(by_liquidity)
            .min(balance);
        let profit_factor = (opp.profit_per_contract / FULL_SIZE_PROFIT).min(1.0);
        (base * profit_factor).max(0.0)
    }

    pub fn halt_trading(&mut self, reason: &str) {
        warn!(reason, "Trading halted");
        self.halt_reason = Some(reason.to_string());
    }

    pub fn resume_trading(&mut self) {
        if let Some(reason) = self.halt_reason.take() {
            info!(previous_reason = %reason, "Trading resumed");
        }
    }

    /// Open positions older than the timeout.
    pub fn check_position_timeout<'a>(&self, positions: &'a [Position], now: DateTime<Utc>) -> Vec<&'a Position> {
        let timeout = Duration::seconds(self.limits.position_timeout_secs);
        positions
            .iter()
            .filter(|p| p.state.is_open() && now - p.created_at > timeout)
            .inspect(|p| {
                warn!(
                    position_id = %p.id,
                    age_secs = (now - p.created_at).num_seconds(),
                    "Position timed out"
                )
            })
            .collect()
    }

    pub fn get_risk_summary(&self) -> RiskSummary {
        let utilization = if self.limits.max_total_exposure > 0.0 {
            self.total_exposure / self.limits.max_total_exposure * 100.0
        } else {
            0.0
        };
        RiskSummary {
            trading_allowed: self.is_trading_allowed(),
            halt_reason: self.halt_reason.clone(),
            total_exposure: self.total_exposure,
            max_total_exposure: self.limits.max_total_exposure,
            exposure_utilization: utilization,
            daily_pnl: self.daily_pnl,
            daily_loss_limit: self.limits.max_daily_loss,
            open_positions: self.open_positions,
            max_positions: self.limits.max_total_positions,
            daily_trades: self.daily_trades,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
