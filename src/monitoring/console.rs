//! Text dashboard printed to the terminal each cycle and by `status`.

use chrono::Duration;
use colored::Colorize;
use std::fmt::Write;

use crate::monitoring::pnl::CurrentPnl;
use crate::strategy::risk::RiskSummary;
use crate::types::{ArbitrageOpportunity, Position};

const WIDTH: usize = 78;
const MAX_POSITIONS: usize = 10;
const MAX_OPPORTUNITIES: usize = 5;

/// Everything one frame needs.
pub struct ConsoleView<'a> {
    pub name: &'a str,
    pub paper_trading: bool,
    pub cycle: u64,
    pub uptime: Duration,
    pub positions: &'a [Position],
    pub opportunities: &'a [ArbitrageOpportunity],
    pub pnl: &'a CurrentPnl,
    pub risk: &'a RiskSummary,
}

fn rule(out: &mut String) {
    let _ = writeln!(out, "{}", "-".repeat(WIDTH));
}

fn money(v: f64) -> String {
    let s = format!("${v:+.2}");
    if v >= 0.0 {
        s.green().to_string()
    } else {
        s.red().to_string()
    }
}

fn format_uptime(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

pub fn render_header(out: &mut String, view: &ConsoleView<'_>) {
    let _ = writeln!(out, "{}", "=".repeat(WIDTH));
    let mode = if view.paper_trading {
        "PAPER".yellow().bold()
    } else {
        "LIVE".red().bold()
    };
    let _ = writeln!(
        out,
        " {}  [{}]  cycle #{}  uptime {}",
        view.name.bold(),
        mode,
        view.cycle,
        format_uptime(view.uptime)
    );
    let _ = writeln!(out, "{}", "=".repeat(WIDTH));
}

pub fn render_positions(out: &mut String, positions: &[Position]) {
    let open: Vec<&Position> = positions.iter().filter(|p| p.state.is_open()).collect();
    let _ = writeln!(out, " {} ({})", "OPEN POSITIONS".bold(), open.len());
    rule(out);
    if open.is_empty() {
        let _ = writeln!(out, " none");
        return;
    }
    let _ = writeln!(
        out,
        " {:<6} {:<13} {:>9} {:>9} {:>10} {:>10} {:>9}",
        "ASSET", "STATE", "UP", "DOWN", "COST", "PNL", "DELTA"
    );
    for p in open.iter().take(MAX_POSITIONS) {
        let _ = writeln!(
            out,
            " {:<6} {:<13} {:>9.2} {:>9.2} {:>10.2} {:>10} {:>+9.2}",
            p.asset(),
            p.state.to_string(),
            p.up_contracts,
            p.down_contracts,
            p.total_cost,
            money(p.unrealized_pnl()),
            p.delta(),
        );
    }
    if open.len() > MAX_POSITIONS {
        let _ = writeln!(out, " ... and {} more", open.len() - MAX_POSITIONS);
    }
}

pub fn render_opportunities(out: &mut String, opportunities: &[ArbitrageOpportunity]) {
    let _ = writeln!(out, " {} ({})", "OPPORTUNITIES".bold(), opportunities.len());
    rule(out);
    if opportunities.is_empty() {
        let _ = writeln!(out, " none");
        return;
    }
    let _ = writeln!(
        out,
        " {:<6} {:>8} {:>8} {:>8} {:>8} {:>9} {:>7}",
        "ASSET", "UP", "DOWN", "TOTAL", "PROFIT", "MAX", "SCORE"
    );
    for o in opportunities.iter().take(MAX_OPPORTUNITIES) {
        let _ = writeln!(
            out,
            " {:<6} {:>8.4} {:>8.4} {:>8.4} {:>8} {:>9.0} {:>7.1}",
            o.market.asset.as_deref().unwrap_or("?"),
            o.up_price,
            o.down_price,
            o.total_cost,
            format!("{:.2}%", o.profit_per_contract * 100.0).green(),
            o.max_contracts,
            o.score,
        );
    }
}

pub fn render_pnl(out: &mut String, pnl: &CurrentPnl) {
    let _ = writeln!(out, " {}", "P&L".bold());
    rule(out);
    let _ = writeln!(
        out,
        " unrealized {}   realized {}   total {}",
        money(pnl.unrealized_pnl),
        money(pnl.realized_pnl),
        money(pnl.total_pnl)
    );
    let _ = writeln!(
        out,
        " open {}   closed {}",
        pnl.open_positions, pnl.closed_positions
    );
}

pub fn render_risk(out: &mut String, risk: &RiskSummary) {
    let _ = writeln!(out, " {}", "RISK".bold());
    rule(out);
    let status = match &risk.halt_reason {
        Some(reason) => format!("HALTED ({reason})").red().bold().to_string(),
        None => "TRADING".green().to_string(),
    };
    let _ = writeln!(out, " status {status}");
    let _ = writeln!(
        out,
        " exposure ${:.2} / ${:.2} ({:.1}%)   positions {}/{}",
        risk.total_exposure,
        risk.max_total_exposure,
        risk.exposure_utilization,
        risk.open_positions,
        risk.max_positions
    );
    let _ = writeln!(
        out,
        " daily P&L {} (limit -${:.2})   trades today {}",
        money(risk.daily_pnl),
        risk.daily_loss_limit,
        risk.daily_trades
    );
}

pub fn render(view: &ConsoleView<'_>) -> String {
    let mut out = String::new();
    render_header(&mut out, view);
    render_positions(&mut out, view.positions);
    out.push('\n');
    render_opportunities(&mut out, view.opportunities);
    out.push('\n');
    render_pnl(&mut out, view.pnl);
    out.push('\n');
    render_risk(&mut out, view.risk);
    out
}

pub fn print(view: &ConsoleView<'_>) {
    println!("{}", render(view));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::flash_market;
    use crate::types::PositionState;

    fn risk(halt: Option<&str>) -> RiskSummary {
        RiskSummary {
            trading_allowed: halt.is_none(),
            halt_reason: halt.map(str::to_string),
            total_exposure: 97.0,
            max_total_exposure: 5000.0,
            exposure_utilization: 1.94,
            daily_pnl: -3.0,
            daily_loss_limit: 500.0,
            open_positions: 1,
            max_positions: 10,
            daily_trades: 2,
        }
    }

    #[test]
    fn test_render_full_frame() {
        let market = flash_market(0.48, 0.49, 10);
        let mut pos = Position::new(&market);
        pos.state = PositionState::Complete;
        pos.up_contracts = 100.0;
        pos.down_contracts = 100.0;
        pos.total_cost = 97.0;

        let pnl = CurrentPnl::default();
        let risk = risk(None);
        let view = ConsoleView {
            name: "POLYBOT-TEST",
            paper_trading: true,
            cycle: 7,
            uptime: Duration::seconds(3725),
            positions: std::slice::from_ref(&pos),
            opportunities: &[],
            pnl: &pnl,
            risk: &risk,
        };
        let frame = render(&view);
        assert!(frame.contains("POLYBOT-TEST"));
        assert!(frame.contains("PAPER"));
        assert!(frame.contains("cycle #7"));
        assert!(frame.contains("01:02:05"));
        assert!(frame.contains("BTC"));
        assert!(frame.contains("complete"));
        assert!(frame.contains("OPPORTUNITIES"));
        assert!(frame.contains(" none"));
        assert!(frame.contains("TRADING"));
    }

    #[test]
    fn test_positions_truncated() {
        let market = flash_market(0.48, 0.49, 10);
        let positions: Vec<Position> = (0..12)
            .map(|_| {
                let mut p = Position::new(&market);
                p.state = PositionState::Complete;
                p
            })
            .collect();
        let mut out = String::new();
        render_positions(&mut out, &positions);
        assert!(out.contains("OPEN POSITIONS"));
        assert!(out.contains("(12)"));
        assert!(out.contains("and 2 more"));
    }

    #[test]
    fn test_halted_risk_panel() {
        let mut out = String::new();
        render_risk(&mut out, &risk(Some("daily_loss_limit")));
        assert!(out.contains("HALTED (daily_loss_limit)"));
        assert!(out.contains("positions 1/10"));
    }
}
