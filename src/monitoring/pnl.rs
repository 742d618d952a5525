//! Real-time P&L tracking.
//!
//! Keeps one snapshot per minute for the last 24 hours, per-day trade
//! statistics and the realized P&L of every closed trade for the
//! performance summary.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

use crate::types::{PnLSnapshot, Position};

const SNAPSHOT_INTERVAL_SECS: i64 = 60;
const SNAPSHOT_RETENTION_HOURS: i64 = 24;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: Option<NaiveDate>,
    pub trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub realized_pnl: f64,
    pub volume: f64,
}

impl DailyStats {
    pub fn win_rate(&self) -> f64 {
        let n = self.winning_trades + self.losing_trades;
        if n == 0 {
            0.0
        } else {
            self.winning_trades as f64 / n as f64
        }
    }

    pub fn avg_profit_per_trade(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.realized_pnl / self.trades as f64
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentPnl {
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub total_pnl: f64,
    pub open_positions: usize,
    pub closed_positions: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub total_pnl: f64,
    pub avg_pnl_per_trade: f64,
    pub win_rate: f64,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub sharpe_ratio: f64,
}

#[derive(Debug)]
pub struct PnLTracker {
    snapshots: VecDeque<PnLSnapshot>,
    daily: BTreeMap<NaiveDate, DailyStats>,
    trade_pnl: Vec<f64>,
    last_snapshot: Option<DateTime<Utc>>,
}

impl Default for PnLTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PnLTracker {
    pub fn new() -> Self {
        Self {
            snapshots: VecDeque::new(),
            daily: BTreeMap::new(),
            trade_pnl: Vec::new(),
            last_snapshot: None,
        }
    }

    /// Record a snapshot unless one was taken less than a minute ago.
    pub fn record_snapshot(
        &mut self,
        positions: &[Position],
        daily_trades: u64,
        now: DateTime<Utc>,
    ) -> Option<PnLSnapshot> {
        if let Some(last) = self.last_snapshot {
            if now - last < Duration::seconds(SNAPSHOT_INTERVAL_SECS) {
                return None;
            }
        }

        let current = self.get_current_pnl(positions);
        let total_exposure = positions
            .iter()
            .filter(|p| p.state.is_open())
            .map(|p| p.total_cost)
            .sum();
        let snapshot = PnLSnapshot {
            timestamp: now,
            unrealized_pnl: current.unrealized_pnl,
            realized_pnl: current.realized_pnl,
            total_pnl: current.total_pnl,
            open_positions: current.open_positions,
            total_exposure,
            daily_trades,
        };

        self.snapshots.push_back(snapshot.clone());
        self.last_snapshot = Some(now);

        let cutoff = now - Duration::hours(SNAPSHOT_RETENTION_HOURS);
        while self.snapshots.front().map_or(false, |s| s.timestamp <= cutoff) {
            self.snapshots.pop_front();
        }

        debug!(
            total_pnl = snapshot.total_pnl,
            exposure = snapshot.total_exposure,
            open = snapshot.open_positions,
            "P&L snapshot recorded"
        );
        Some(snapshot)
    }

    /// Record the realized P&L of a closed trade.
    pub fn record_trade(&mut self, pnl: f64, volume: f64, now: DateTime<Utc>) {
        self.trade_pnl.push(pnl);

        let date = now.date_naive();
        let stats = self.daily.entry(date).or_insert_with(|| DailyStats {
            date: Some(date),
            ..Default::default()
        });
        stats.trades += 1;
        stats.realized_pnl += pnl;
        stats.volume += volume;
        if pnl >= 0.0 {
            stats.winning_trades += 1;
        } else {
            stats.losing_trades += 1;
        }
    }

    pub fn get_current_pnl(&self, positions: &[Position]) -> CurrentPnl {
        let (open, closed): (Vec<&Position>, Vec<&Position>) =
            positions.iter().partition(|p| p.state.is_open());
        let unrealized: f64 = open.iter().map(|p| p.unrealized_pnl()).sum();
        let realized: f64 = closed.iter().filter_map(|p| p.realized_pnl).sum();
        CurrentPnl {
            unrealized_pnl: unrealized,
            realized_pnl: realized,
            total_pnl: unrealized + realized,
            open_positions: open.len(),
            closed_positions: closed.len(),
        }
    }

    pub fn get_daily_stats(&self, date: NaiveDate) -> Option<&DailyStats> {
        self.daily.get(&date)
    }

    pub fn get_performance_summary(&self) -> PerformanceSummary {
        let n = self.trade_pnl.len();
        if n == 0 {
            return PerformanceSummary::default();
        }

        let total: f64 = self.trade_pnl.iter().sum();
        let mean = total / n as f64;
        let wins: Vec<f64> = self.trade_pnl.iter().copied().filter(|p| *p >= 0.0).collect();
        let losses: Vec<f64> = self.trade_pnl.iter().copied().filter(|p| *p < 0.0).collect();

        let sharpe = if n > 1 {
            let var = self.trade_pnl.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            let std = var.sqrt();
            if std > 0.0 {
                mean / std
            } else {
                0.0
            }
        } else {
            0.0
        };

        PerformanceSummary {
            total_trades: n,
            total_pnl: total,
            avg_pnl_per_trade: mean,
            win_rate: wins.len() as f64 / n as f64,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            best_trade: self.trade_pnl.iter().copied().fold(f64::MIN, f64::max),
            worst_trade: self.trade_pnl.iter().copied().fold(f64::MAX, f64::min),
            avg_win: average(&wins),
            avg_loss: average(&losses),
            sharpe_ratio: sharpe,
        }
    }

    /// Snapshots taken within `hours` of `now`, oldest first.
    pub fn recent_snapshots(&self, hours: i64, now: DateTime<Utc>) -> Vec<PnLSnapshot> {
        let cutoff = now - Duration::hours(hours);
        self.snapshots
            .iter()
            .filter(|s| s.timestamp > cutoff)
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<&PnLSnapshot> {
        self.snapshots.back()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
