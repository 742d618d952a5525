//! POLYBOT: Polymarket flash-market arbitrage bot.
//!
//! Entry point. Parses the command line, loads configuration and `.env`,
//! initialises structured logging, then dispatches to the subcommand.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use polybot::config::AppConfig;
use polybot::dashboard::{self, routes::DashboardState};
use polybot::engine::executor::{LiveExecutor, OrderExecutor, PaperExecutor};
use polybot::engine::runner::ArbitrageEngine;
use polybot::engine::scanner::MarketScanner;
use polybot::engine::simulator::{SimulatorConfig, SlippageSimulator};
use polybot::monitoring::alerts::AlertManager;
use polybot::monitoring::console::{self, ConsoleView};
use polybot::monitoring::latency::{LatencyLogger, LatencyReport};
use polybot::monitoring::pnl::PnLTracker;
use polybot::platforms::clob::ClobClient;
use polybot::platforms::polymarket::PolymarketClient;
use polybot::platforms::MarketDataSource;
use polybot::reporting::{self, PostTradeAnalyzer, Severity, ValidationReport, ValidationThresholds};
use polybot::storage::{self, repository::TradeRepository};
use polybot::strategy::risk::{RiskLimits, RiskManager};
use polybot::strategy::spread::{SpreadAnalyzer, SpreadConfig};
use polybot::types::BotState;

const BANNER: &str = r#"
 ____   ___  _  __   ______   ___ _____
|  _ \ / _ \| | \ \ / / __ ) / _ \_   _|
| |_) | | | | |  \ V /|  _ \| | | || |
|  __/| |_| | |___| | | |_) | |_| || |
|_|    \___/|_____|_| |____/ \___/ |_|

  Polymarket flash-market arbitrage
"#;

#[derive(Parser, Debug)]
#[command(name = "polybot", version, about = "Polymarket flash-market arbitrage bot")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config.toml")]
    config: String,

    /// Path to the JSON state file.
    #[arg(long, global = true, default_value = storage::DEFAULT_STATE_FILE)]
    state: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the trading loop until Ctrl+C.
    Run {
        /// Force paper trading regardless of config.
        #[arg(long)]
        paper: bool,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Scan once and print the flash markets.
    Scan,
    /// Show configuration and persisted state.
    Status,
    /// Build a validation report from recorded positions and fills.
    Validate {
        #[arg(long, default_value_t = 48.0)]
        hours: f64,
        #[arg(long, default_value = "./reports")]
        output: PathBuf,
    },
    /// Latency statistics from the last run.
    LatencyReport,
    /// Paper run for a fixed time, then write a validation report.
    DryRun {
        /// Minutes to run.
        #[arg(long, default_value_t = 60)]
        duration: u64,
        /// Maximum USDC per position.
        #[arg(long, default_value_t = 10.0)]
        size: f64,
        #[arg(long, default_value = "./reports")]
        output: PathBuf,
    },
    /// Slippage simulator statistics from the last paper run.
    SimulationStats,
    /// Recent strategy trades.
    History {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Print the version.
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    if let Command::Version = cli.command {
        println!("polybot {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut cfg = AppConfig::load(&cli.config)?;
    cfg.apply_env_overrides()?;
    cfg.validate()?;

    let verbose = matches!(cli.command, Command::Run { verbose: true, .. });
    init_logging(&cfg, verbose);

    match cli.command {
        Command::Run { paper, .. } => {
            if paper {
                cfg.bot.paper_trading = true;
            }
            run(cfg, &cli.state, None).await
        }
        Command::DryRun { duration, size, output } => {
            cfg.bot.paper_trading = true;
            cfg.risk.max_position_size_usdc = size;
            let minutes = Duration::from_secs(duration * 60);
            run(cfg.clone(), &cli.state, Some(minutes)).await?;
            validate(&cfg, duration as f64 / 60.0, &output).await
        }
        Command::Scan => scan(&cfg).await,
        Command::Status => status(&cfg, &cli.state),
        Command::Validate { hours, output } => validate(&cfg, hours, &output).await,
        Command::LatencyReport => latency_report(&cli.state),
        Command::SimulationStats => simulation_stats(&cli.state),
        Command::History { limit } => history(&cfg, limit).await,
        Command::Version => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// run / dry-run
// ---------------------------------------------------------------------------

async fn run(cfg: AppConfig, state_path: &str, deadline: Option<Duration>) -> Result<()> {
    println!("{BANNER}");
    info!(
        name = %cfg.bot.name,
        environment = %cfg.bot.environment,
        paper = cfg.bot.paper_trading,
        interval_secs = cfg.bot.scan_interval_secs,
        "POLYBOT starting up"
    );

    let state = match storage::load_state(Some(state_path))? {
        Some(mut s) => {
            s.paper_trading = cfg.bot.paper_trading;
            s
        }
        None => BotState::new(cfg.bot.paper_trading, cfg.bot.paper_balance),
    };

    let latency = Arc::new(LatencyLogger::default());
    let source: Arc<dyn MarketDataSource> =
        Arc::new(PolymarketClient::new(&cfg.polymarket.gamma_host, &cfg.polymarket.clob_host)?);
    let executor = build_executor(&cfg, &state, Arc::clone(&latency))?;

    let repository = match TradeRepository::connect(&cfg.database.url).await {
        Ok(r) => Some(r),
        Err(e) => {
            warn!(url = %cfg.database.url, error = %e, "Database unavailable, trade history disabled");
            None
        }
    };

    let creds = cfg.credentials();
    let alerts = AlertManager::spawn(creds.telegram_bot_token, creds.telegram_chat_id)?;

    let mut engine = ArbitrageEngine::new(cfg.clone(), source, executor, Arc::clone(&latency), state.clone())?
        .with_alerts(alerts)
        .with_state_path(state_path)
        .with_console(true);

    if let Some(repo) = &repository {
        engine = engine.with_repository(repo.clone());
    }
    if cfg.dashboard.enabled {
        let dash = Arc::new(DashboardState::new(state, latency, repository));
        match dashboard::spawn_dashboard(Arc::clone(&dash), cfg.dashboard.port).await {
            Ok(()) => engine = engine.with_dashboard(dash),
            Err(e) => warn!(port = cfg.dashboard.port, error = %e, "Dashboard failed to start"),
        }
    }

    engine
        .run(Duration::from_secs(cfg.bot.scan_interval_secs.max(1)), deadline)
        .await
}

fn build_executor(cfg: &AppConfig, state: &BotState, latency: Arc<LatencyLogger>) -> Result<Arc<dyn OrderExecutor>> {
    if cfg.bot.paper_trading {
        let mut sim = SlippageSimulator::new(SimulatorConfig::default());
        if let Some(stats) = state.simulation.clone() {
            sim.restore_stats(stats);
        }
        info!(balance = state.paper_balance, "Paper trading mode");
        return Ok(Arc::new(PaperExecutor::new(sim, state.paper_balance, latency)));
    }

    let creds = cfg.credentials();
    if !creds.can_trade_live() {
        anyhow::bail!("Live trading needs POLYMARKET_PRIVATE_KEY; set it or use --paper");
    }
    let clob = ClobClient::new(
        &cfg.polymarket.clob_host,
        cfg.polymarket.chain_id,
        cfg.polymarket.signature_type,
        &creds,
    )?;
    warn!(address = %clob.address(), "LIVE trading mode, real funds at risk");
    Ok(Arc::new(LiveExecutor::new(clob, latency)))
}

// ---------------------------------------------------------------------------
// scan
// ---------------------------------------------------------------------------

async fn scan(cfg: &AppConfig) -> Result<()> {
    let source: Arc<dyn MarketDataSource> =
        Arc::new(PolymarketClient::new(&cfg.polymarket.gamma_host, &cfg.polymarket.clob_host)?);
    let mut scanner = MarketScanner::new(source, cfg.polymarket.market_limit)?;
    let analyzer = SpreadAnalyzer::new(SpreadConfig::from(&cfg.risk));

    let result = scanner.scan().await?;
    println!(
        "Scanned {} markets, {} flash markets\n",
        result.total_fetched,
        result.flash.len()
    );
    println!(
        "{:<10} {:<44} {:>7} {:>7} {:>7} {:>8}  {}",
        "ASSET", "QUESTION", "UP", "DOWN", "TOTAL", "PROFIT", "STATUS"
    );

    let mut profitable = 0;
    for market in &result.flash {
        let prices = match scanner.get_market_prices(market).await {
            Ok(p) => p,
            Err(e) => {
                println!("{:<10} {:<44} {}", market.asset.as_deref().unwrap_or("?"), truncate(&market.question, 44), format!("error: {e}").red());
                continue;
            }
        };
        let spread = analyzer.analyze(market, prices.up_price, prices.down_price, f64::MAX, f64::MAX);
        let status = if spread.is_profitable {
            profitable += 1;
            "ARB".green().bold()
        } else if prices.is_profitable() {
            "THIN".yellow()
        } else {
            "-".normal()
        };
        println!(
            "{:<10} {:<44} {:>7.3} {:>7.3} {:>7.3} {:>+8.4}  {}",
            market.asset.as_deref().unwrap_or("?"),
            truncate(&market.question, 44),
            prices.up_price,
            prices.down_price,
            prices.total_cost(),
            prices.profit_per_contract(),
            status
        );
    }
    println!("\n{profitable} profitable opportunities");
    Ok(())
}

fn truncate(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        s.to_string()
    } else {
        let cut: String = s.chars().take(n.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

// ---------------------------------------------------------------------------
// status / latency-report / simulation-stats
// ---------------------------------------------------------------------------

fn load_saved_state(path: &str) -> Result<Option<BotState>> {
    let state = storage::load_state(Some(path))?;
    if state.is_none() {
        println!("No saved state at {path}. Run the bot first.");
    }
    Ok(state)
}

fn status(cfg: &AppConfig, state_path: &str) -> Result<()> {
    println!("{}", "Configuration".bold());
    println!("  name            {}", cfg.bot.name);
    println!("  environment     {}", cfg.bot.environment);
    println!("  paper trading   {}", cfg.bot.paper_trading);
    println!("  scan interval   {}s", cfg.bot.scan_interval_secs);
    println!("  max position    ${:.2}", cfg.risk.max_position_size_usdc);
    println!("  max exposure    ${:.2}", cfg.risk.max_total_exposure_usdc);
    println!("  max daily loss  ${:.2}", cfg.risk.max_daily_loss_usdc);
    println!("  min profit      ${:.4}", cfg.risk.min_profit_threshold);
    println!("  live creds      {}", cfg.credentials().can_trade_live());
    println!();

    let Some(state) = load_saved_state(state_path)? else {
        return Ok(());
    };

    let mut risk = RiskManager::new(RiskLimits::from(&cfg.risk));
    risk.restore(&state);
    risk.update_exposure(state.open_positions());
    let pnl = PnLTracker::new().get_current_pnl(&state.positions);

    console::print(&ConsoleView {
        name: &cfg.bot.name,
        paper_trading: state.paper_trading,
        cycle: state.cycle_count,
        uptime: state.uptime(),
        positions: &state.positions,
        opportunities: &[],
        pnl: &pnl,
        risk: &risk.get_risk_summary(),
    });
    println!("{state}");
    Ok(())
}

fn latency_report(state_path: &str) -> Result<()> {
    let Some(state) = load_saved_state(state_path)? else {
        return Ok(());
    };
    let report = LatencyReport::from_stats(state.latency);
    if report.operations.is_empty() {
        println!("No latency measurements recorded.");
        return Ok(());
    }

    println!(
        "{:<18} {:>7} {:>9} {:>9} {:>9} {:>9} {:>9} {:>8}",
        "OPERATION", "COUNT", "AVG", "MEDIAN", "P95", "P99", "MAX", "OK%"
    );
    for s in &report.operations {
        println!(
            "{:<18} {:>7} {:>9.1} {:>9.1} {:>9.1} {:>9.1} {:>9.1} {:>8.1}",
            s.operation, s.count, s.avg_ms, s.median_ms, s.p95_ms, s.p99_ms, s.max_ms, s.success_rate
        );
    }
    for a in &report.alerts {
        println!(
            "{} {} {}: {:.1} (threshold {:.1})",
            "ALERT".red().bold(),
            a.operation,
            a.issue,
            a.value,
            a.threshold
        );
    }
    Ok(())
}

fn simulation_stats(state_path: &str) -> Result<()> {
    let Some(state) = load_saved_state(state_path)? else {
        return Ok(());
    };
    let Some(stats) = state.simulation else {
        println!("No simulation statistics; the last run was not in paper mode.");
        return Ok(());
    };
    println!("{}", "Slippage simulator".bold());
    println!("  orders          {}", stats.total_orders);
    println!("  failed          {} ({:.1}%)", stats.failed_orders, stats.failure_rate());
    println!("  partial fills   {} ({:.1}%)", stats.partial_fills, stats.partial_fill_rate());
    println!("  avg slippage    {:.3}%", stats.avg_slippage_pct());
    println!("  paper balance   ${:.2}", state.paper_balance);
    Ok(())
}

// ---------------------------------------------------------------------------
// validate / history
// ---------------------------------------------------------------------------

async fn validate(cfg: &AppConfig, hours: f64, output: &Path) -> Result<()> {
    let repo = TradeRepository::connect(&cfg.database.url)
        .await
        .context("validate needs the trade database")?;
    let since = Utc::now() - chrono::Duration::milliseconds((hours * 3_600_000.0) as i64);
    let positions = repo.positions_since(since).await?;
    let fills = repo.fills_since(since).await?;

    let report = PostTradeAnalyzer::new().generate_validation_report(&positions, &fills, hours);
    let json = reporting::export_json(&report, output)?;
    let md = reporting::export_markdown(&report, output)?;

    print_report(&report);
    println!("\nReports written to {} and {}", json.display(), md.display());

    let thresholds = ValidationThresholds::default();
    let failures = thresholds.failures(&report);
    if failures.is_empty() {
        println!("\n{}", "VALIDATION PASSED".green().bold());
    } else {
        println!("\n{}", "VALIDATION FAILED".red().bold());
        for f in failures {
            println!("  - {f}");
        }
    }
    Ok(())
}

fn print_report(r: &ValidationReport) {
    println!("{}", format!("Validation report {}", r.report_id).bold());
    println!("  period          {:.1}h", r.duration_hours);
    println!(
        "  positions       {} ({} ok, {} partial, {} failed, {:.1}% success)",
        r.total_positions,
        r.successful_positions,
        r.partial_positions,
        r.failed_positions,
        r.success_rate()
    );
    println!("  invested        ${:.2}", r.total_invested);
    println!("  net P&L         ${:+.2} (ROI {:+.2}%)", r.net_pnl, r.roi_pct);
    println!("  win rate        {:.1}%  profit factor {:.2}", r.win_rate, r.profit_factor);
    println!("  avg slippage    {:.3}%  max {:.3}%", r.avg_slippage_pct, r.max_slippage_pct);
    println!(
        "  latency         avg {:.0}ms  p95 {:.0}ms  max {:.0}ms",
        r.avg_execution_latency_ms, r.p95_execution_latency_ms, r.max_execution_latency_ms
    );

    if !r.alerts.is_empty() {
        println!("\n{}", "Alerts".bold());
        for a in &r.alerts {
            let tag = match a.severity {
                Severity::High => "HIGH".red().bold(),
                Severity::Medium => "MEDIUM".yellow(),
            };
            println!("  [{tag}] {}", a.message);
        }
    }
    if !r.recommendations.is_empty() {
        println!("\n{}", "Recommendations".bold());
        for rec in &r.recommendations {
            println!("  - {rec}");
        }
    }
}

async fn history(cfg: &AppConfig, limit: i64) -> Result<()> {
    let repo = TradeRepository::connect(&cfg.database.url).await?;
    let trades = repo.recent_trades(limit.max(1)).await?;
    if trades.is_empty() {
        println!("No trades recorded.");
        return Ok(());
    }

    println!(
        "{:<20} {:<18} {:<4} {:>7} {:>8} {:<14} {:>9}  {}",
        "CREATED", "STRATEGY", "SIDE", "PRICE", "STAKE", "STATUS", "PNL", "QUESTION"
    );
    for t in trades {
        let pnl = t.realized_pnl.map_or_else(|| "-".to_string(), |p| format!("{p:+.2}"));
        println!(
            "{:<20} {:<18} {:<4} {:>7.3} {:>8.2} {:<14} {:>9}  {}",
            t.created_at.format("%Y-%m-%d %H:%M:%S"),
            t.strategy_id,
            t.side,
            t.entry_price,
            t.stake,
            t.status.as_str(),
            pnl,
            truncate(&t.question, 40)
        );
    }

    let stats = repo.strategy_stats().await?;
    if !stats.is_empty() {
        println!();
        for s in stats {
            println!(
                "{:<18} trades={} wins={} losses={} pending={} win_rate={:.1}% pnl=${:+.2}",
                s.strategy_id,
                s.total,
                s.wins,
                s.losses,
                s.pending,
                s.win_rate(),
                s.realized_pnl
            );
        }
    }
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &AppConfig, verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.log_directive(verbose)));

    if std::env::var("POLYBOT_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
