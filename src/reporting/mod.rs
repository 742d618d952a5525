//! Post-trade validation reports.
//!
//! A report covers every position opened in the last N hours together
//! with its leg fills: how many hedged cleanly, what the money did, how far
//! fills slipped from the detected prices and how long orders took. The
//! `validate` and `dry-run` commands write it as JSON and Markdown and gate
//! going live on [`ValidationThresholds::check_passed`].

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::types::{Outcome, Position, Trade};

/// Profit factor reported when there are no losing positions.
pub const NO_LOSS_PROFIT_FACTOR: f64 = 999.99;

const LEG_BALANCE_TOLERANCE: f64 = 0.01;

fn round_to(v: f64, places: i32) -> f64 {
    let m = 10f64.powi(places);
    (v * m).round() / m
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeAnalysis {
    pub trade_id: String,
    pub position_id: String,
    pub market_id: String,
    pub outcome: Outcome,
    pub detected_price: f64,
    pub executed_price: f64,
    pub slippage: f64,
    pub slippage_pct: f64,
    pub latency_ms: f64,
    pub size: f64,
    pub fee: f64,
    pub net_cost: f64,
    pub had_slippage: bool,
    pub was_partial_fill: bool,
    pub exceeded_latency_threshold: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Settled,
    Open,
    PartialFill,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionAnalysis {
    pub position_id: String,
    pub market_id: String,
    pub asset: String,
    pub up_trade: Option<TradeAnalysis>,
    pub down_trade: Option<TradeAnalysis>,
    pub total_cost: f64,
    pub expected_profit: f64,
    pub actual_profit: Option<f64>,
    pub entry_duration_ms: f64,
    pub settled_at: Option<DateTime<Utc>>,
    pub entry_slippage_total: f64,
    pub was_successful: bool,
    pub exit_reason: ExitReason,
}

impl PositionAnalysis {
    fn fees(&self) -> f64 {
        self.up_trade.as_ref().map_or(0.0, |t| t.fee) + self.down_trade.as_ref().map_or(0.0, |t| t.fee)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportAlert {
    pub severity: Severity,
    pub kind: String,
    pub message: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub duration_hours: f64,

    pub total_positions: usize,
    pub successful_positions: usize,
    pub failed_positions: usize,
    pub partial_positions: usize,

    pub total_invested: f64,
    pub total_fees: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub net_pnl: f64,
    pub roi_pct: f64,

    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Percent of positions that closed with a profit.
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,

    pub total_slippage: f64,
    pub avg_slippage_pct: f64,
    pub max_slippage_pct: f64,
    pub trades_with_slippage: usize,

    pub avg_execution_latency_ms: f64,
    pub p95_execution_latency_ms: f64,
    pub max_execution_latency_ms: f64,
    pub latency_threshold_breaches: usize,

    pub positions: Vec<PositionAnalysis>,
    pub alerts: Vec<ReportAlert>,
    pub recommendations: Vec<String>,
}

impl ValidationReport {
    /// Percent of positions with both legs filled and balanced.
    pub fn success_rate(&self) -> f64 {
        if self.total_positions == 0 {
            0.0
        } else {
            self.successful_positions as f64 / self.total_positions as f64 * 100.0
        }
    }
}

/// Go-live gate applied to a dry-run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub min_success_rate: f64,
    pub min_win_rate: f64,
    pub max_avg_slippage_pct: f64,
    pub max_p95_latency_ms: f64,
    pub min_profit_factor: f64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            min_success_rate: 90.0,
            min_win_rate: 50.0,
            max_avg_slippage_pct: 0.5,
            max_p95_latency_ms: 500.0,
            min_profit_factor: 1.5,
        }
    }
}

impl ValidationThresholds {
    /// Every threshold the report misses, as readable lines.
    pub fn failures(&self, report: &ValidationReport) -> Vec<String> {
        let mut out = Vec::new();
        if report.success_rate() < self.min_success_rate {
            out.push(format!(
                "success rate {:.1}% < {:.1}%",
                report.success_rate(),
                self.min_success_rate
            ));
        }
        if report.win_rate < self.min_win_rate {
            out.push(format!("win rate {:.1}% < {:.1}%", report.win_rate, self.min_win_rate));
        }
        if report.avg_slippage_pct > self.max_avg_slippage_pct {
            out.push(format!(
                "avg slippage {:.3}% > {:.3}%",
                report.avg_slippage_pct, self.max_avg_slippage_pct
            ));
        }
        if report.p95_execution_latency_ms > self.max_p95_latency_ms {
            out.push(format!(
                "p95 latency {:.0}ms > {:.0}ms",
                report.p95_execution_latency_ms, self.max_p95_latency_ms
            ));
        }
        if report.profit_factor < self.min_profit_factor {
            out.push(format!(
                "profit factor {:.2} < {:.2}",
                report.profit_factor, self.min_profit_factor
            ));
        }
        out
    }

    pub fn check_passed(&self, report: &ValidationReport) -> bool {
        self.failures(report).is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PostTradeAnalyzer {
    /// Fills slipping more than this (percent) are logged.
    pub slippage_threshold_pct: f64,
    pub latency_threshold_ms: f64,
}

impl Default for PostTradeAnalyzer {
    fn default() -> Self {
        Self {
            slippage_threshold_pct: 1.0,
            latency_threshold_ms: 500.0,
        }
    }
}

impl PostTradeAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyze_trade(&self, trade: &Trade) -> TradeAnalysis {
        let slippage = trade.price - trade.detected_price;
        let slippage_pct = trade.slippage_pct();
        let exceeded = trade.latency_ms > self.latency_threshold_ms;

        if slippage_pct.abs() > self.slippage_threshold_pct {
            warn!(
                trade_id = %trade.id,
                slippage_pct = round_to(slippage_pct, 2),
                detected = trade.detected_price,
                executed = trade.price,
                "High slippage detected"
            );
        }
        if exceeded {
            warn!(trade_id = %trade.id, latency_ms = trade.latency_ms, "High execution latency");
        }

        TradeAnalysis {
            trade_id: trade.id.clone(),
            position_id: trade.position_id.clone(),
            market_id: trade.market_id.clone(),
            outcome: trade.outcome,
            detected_price: trade.detected_price,
            executed_price: trade.price,
            slippage,
            slippage_pct,
            latency_ms: trade.latency_ms,
            size: trade.size,
            fee: trade.fee,
            net_cost: trade.net_cost(),
            had_slippage: slippage_pct.abs() > 0.01,
            was_partial_fill: trade.partial,
            exceeded_latency_threshold: exceeded,
        }
    }

    pub fn analyze_position(&self, position: &Position, fills: &[TradeAnalysis]) -> PositionAnalysis {
        let leg = |outcome: Outcome| {
            fills
                .iter()
                .find(|t| t.position_id == position.id && t.outcome == outcome)
                .cloned()
        };
        let up_trade = leg(Outcome::Up);
        let down_trade = leg(Outcome::Down);

        let has_up = position.up_contracts > 0.0;
        let has_down = position.down_contracts > 0.0;
        let was_successful = has_up
            && has_down
            && (position.up_contracts - position.down_contracts).abs() < LEG_BALANCE_TOLERANCE;

        let exit_reason = if was_successful {
            if position.realized_pnl.is_some() {
                ExitReason::Settled
            } else {
                ExitReason::Open
            }
        } else if has_up || has_down {
            ExitReason::PartialFill
        } else {
            ExitReason::Failed
        };

        let entry_slippage_total = up_trade.as_ref().map_or(0.0, |t| t.slippage)
            + down_trade.as_ref().map_or(0.0, |t| t.slippage);

        PositionAnalysis {
            position_id: position.id.clone(),
            market_id: position.market_id.clone(),
            asset: position.asset().to_string(),
            up_trade,
            down_trade,
            total_cost: position.total_cost,
            expected_profit: position.unrealized_pnl(),
            actual_profit: position.realized_pnl,
            entry_duration_ms: (position.updated_at - position.created_at).num_milliseconds() as f64,
            settled_at: position.settled_at,
            entry_slippage_total,
            was_successful,
            exit_reason,
        }
    }

    pub fn generate_validation_report(&self, positions: &[Position], trades: &[Trade], hours: f64) -> ValidationReport {
        self.generate_validation_report_at(positions, trades, hours, Utc::now())
    }

    /// Report over the `hours` before `now`.
    pub fn generate_validation_report_at(
        &self,
        positions: &[Position],
        trades: &[Trade],
        hours: f64,
        now: DateTime<Utc>,
    ) -> ValidationReport {
        let period_start = now - Duration::milliseconds((hours * 3_600_000.0) as i64);

        let fills: Vec<TradeAnalysis> = trades
            .iter()
            .filter(|t| t.executed_at >= period_start)
            .map(|t| self.analyze_trade(t))
            .collect();
        let analyses: Vec<PositionAnalysis> = positions
            .iter()
            .filter(|p| p.created_at >= period_start)
            .map(|p| self.analyze_position(p, &fills))
            .collect();

        let total = analyses.len();
        let successful = analyses.iter().filter(|p| p.was_successful).count();
        let failed = analyses.iter().filter(|p| p.exit_reason == ExitReason::Failed).count();
        let partial = analyses.iter().filter(|p| p.exit_reason == ExitReason::PartialFill).count();

        // Money
        let invested: f64 = analyses.iter().map(|p| p.total_cost).sum();
        let fees: f64 = analyses.iter().map(PositionAnalysis::fees).sum();
        let realized: f64 = analyses.iter().filter_map(|p| p.actual_profit).sum();
        let unrealized: f64 = analyses
            .iter()
            .filter(|p| p.actual_profit.is_none())
            .map(|p| p.expected_profit)
            .sum();
        let net = realized + unrealized - fees;

        // Win / loss
        let wins: Vec<f64> = analyses.iter().filter_map(|p| p.actual_profit).filter(|v| *v > 0.0).collect();
        let losses: Vec<f64> = analyses.iter().filter_map(|p| p.actual_profit).filter(|v| *v < 0.0).collect();
        let total_wins: f64 = wins.iter().sum();
        let total_losses: f64 = losses.iter().sum::<f64>().abs();
        let win_rate = if total == 0 {
            0.0
        } else {
            wins.len() as f64 / total as f64 * 100.0
        };
        let profit_factor = if total_losses > 0.0 {
            round_to(total_wins / total_losses, 2)
        } else {
            NO_LOSS_PROFIT_FACTOR
        };

        // Slippage
        let slippage: Vec<f64> = fills.iter().map(|t| t.slippage_pct.abs()).collect();
        let slippage_sum: f64 = slippage.iter().sum();
        let max_slippage = slippage.iter().copied().fold(0.0, f64::max);

        // Latency
        let mut latencies: Vec<f64> = fills.iter().map(|t| t.latency_ms).collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let breaches = fills.iter().filter(|t| t.exceeded_latency_threshold).count();
        let (avg_latency, p95_latency, max_latency) = if latencies.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let n = latencies.len();
            let idx = ((n as f64 * 0.95) as usize).min(n - 1);
            (latencies.iter().sum::<f64>() / n as f64, latencies[idx], latencies[n - 1])
        };

        // Alerts
        let mut alerts = Vec::new();
        if failed as f64 > total as f64 * 0.1 {
            alerts.push(ReportAlert {
                severity: Severity::High,
                kind: "high_failure_rate".into(),
                message: format!("High position failure rate: {failed}/{total}"),
                recommendation: "Review order execution logic and API connectivity".into(),
            });
        }
        if max_slippage > 2.0 {
            alerts.push(ReportAlert {
                severity: Severity::Medium,
                kind: "high_slippage".into(),
                message: format!("Max slippage: {max_slippage:.2}%"),
                recommendation: "Consider using limit orders or reducing position size".into(),
            });
        }
        if breaches as f64 > fills.len() as f64 * 0.05 {
            alerts.push(ReportAlert {
                severity: Severity::Medium,
                kind: "latency_issues".into(),
                message: format!("Latency threshold breaches: {breaches}"),
                recommendation: "Deploy closer to the exchange to cut order latency".into(),
            });
        }
        if win_rate < 50.0 {
            alerts.push(ReportAlert {
                severity: Severity::High,
                kind: "low_win_rate".into(),
                message: format!("Win rate below 50%: {win_rate:.1}%"),
                recommendation: "Review opportunity detection thresholds".into(),
            });
        }
        let recommendations = alerts.iter().map(|a| a.recommendation.clone()).collect();

        let avg = |sum: f64, n: usize| if n == 0 { 0.0 } else { sum / n as f64 };

        let report = ValidationReport {
            report_id: format!("validation-{}", now.format("%Y%m%d-%H%M%S")),
            generated_at: now,
            period_start,
            period_end: now,
            duration_hours: hours,
            total_positions: total,
            successful_positions: successful,
            failed_positions: failed,
            partial_positions: partial,
            total_invested: round_to(invested, 2),
            total_fees: round_to(fees, 4),
            realized_pnl: round_to(realized, 4),
            unrealized_pnl: round_to(unrealized, 4),
            net_pnl: round_to(net, 4),
            roi_pct: if invested > 0.0 { round_to(net / invested * 100.0, 2) } else { 0.0 },
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: round_to(win_rate, 2),
            avg_win: round_to(avg(total_wins, wins.len()), 4),
            avg_loss: round_to(avg(total_losses, losses.len()), 4),
            profit_factor,
            total_slippage: round_to(slippage_sum, 4),
            avg_slippage_pct: round_to(avg(slippage_sum, slippage.len()), 4),
            max_slippage_pct: round_to(max_slippage, 4),
            trades_with_slippage: fills.iter().filter(|t| t.had_slippage).count(),
            avg_execution_latency_ms: round_to(avg_latency, 2),
            p95_execution_latency_ms: round_to(p95_latency, 2),
            max_execution_latency_ms: round_to(max_latency, 2),
            latency_threshold_breaches: breaches,
            positions: analyses,
            alerts,
            recommendations,
        };

        info!(
            report_id = %report.report_id,
            positions = report.total_positions,
            net_pnl = report.net_pnl,
            alerts = report.alerts.len(),
            "Validation report generated"
        );
        report
    }
}

fn report_path(report: &ValidationReport, dir: &Path, ext: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir.join(format!("{}.{ext}", report.report_id)))
}

pub fn export_json(report: &ValidationReport, dir: &Path) -> Result<PathBuf> {
    let path = report_path(report, dir, "json")?;
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Report exported");
    Ok(path)
}

pub fn export_markdown(report: &ValidationReport, dir: &Path) -> Result<PathBuf> {
    let path = report_path(report, dir, "md")?;
    std::fs::write(&path, render_markdown(report))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Report exported");
    Ok(path)
}

pub fn render_markdown(r: &ValidationReport) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Validation Report: {}\n", r.report_id);
    let _ = writeln!(md, "Generated: {}", r.generated_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(
        md,
        "Period: {} to {} ({}h)\n",
        r.period_start.format("%Y-%m-%d %H:%M"),
        r.period_end.format("%Y-%m-%d %H:%M"),
        r.duration_hours
    );

    let table = |md: &mut String, title: &str, rows: &[(&str, String)]| {
        let _ = writeln!(md, "## {title}\n\n| Metric | Value |\n|--------|-------|");
        for (k, v) in rows {
            let _ = writeln!(md, "| {k} | {v} |");
        }
        md.push('\n');
    };

    table(&mut md, "Summary", &[
        ("Total Positions", r.total_positions.to_string()),
        ("Successful", r.successful_positions.to_string()),
        ("Failed", r.failed_positions.to_string()),
        ("Partial", r.partial_positions.to_string()),
    ]);
    table(&mut md, "Financial Performance", &[
        ("Total Invested", format!("${:.2}", r.total_invested)),
        ("Total Fees", format!("${:.4}", r.total_fees)),
        ("Realized P&L", format!("${:.4}", r.realized_pnl)),
        ("Unrealized P&L", format!("${:.4}", r.unrealized_pnl)),
        ("**Net P&L**", format!("**${:.4}**", r.net_pnl)),
        ("**ROI**", format!("**{:.2}%**", r.roi_pct)),
    ]);
    table(&mut md, "Win/Loss Analysis", &[
        ("Winning Trades", r.winning_trades.to_string()),
        ("Losing Trades", r.losing_trades.to_string()),
        ("Win Rate", format!("{:.2}%", r.win_rate)),
        ("Avg Win", format!("${:.4}", r.avg_win)),
        ("Avg Loss", format!("${:.4}", r.avg_loss)),
        ("Profit Factor", format!("{:.2}", r.profit_factor)),
    ]);
    table(&mut md, "Slippage", &[
        ("Total Slippage", format!("{:.4}%", r.total_slippage)),
        ("Avg Slippage", format!("{:.4}%", r.avg_slippage_pct)),
        ("Max Slippage", format!("{:.4}%", r.max_slippage_pct)),
        ("Trades w/ Slippage", r.trades_with_slippage.to_string()),
    ]);
    table(&mut md, "Latency", &[
        ("Avg Latency", format!("{:.2}ms", r.avg_execution_latency_ms)),
        ("P95 Latency", format!("{:.2}ms", r.p95_execution_latency_ms)),
        ("Max Latency", format!("{:.2}ms", r.max_execution_latency_ms)),
        ("Threshold Breaches", r.latency_threshold_breaches.to_string()),
    ]);

    md.push_str("## Alerts\n\n");
    if r.alerts.is_empty() {
        md.push_str("No alerts\n");
    }
    for a in &r.alerts {
        let tag = match a.severity {
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
        };
        let _ = writeln!(md, "- [{tag}] **{}**: {}", a.kind, a.message);
    }

    md.push_str("\n## Recommendations\n\n");
    if r.recommendations.is_empty() {
        md.push_str("None\n");
    }
    for rec in &r.recommendations {
        let _ = writeln!(md, "- {rec}");
    }
    md
}
