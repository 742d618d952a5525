//! The trading loop.
//!
//! [`ArbitrageEngine::run_cycle`] is one pass of scan → detect → validate →
//! execute → settle → rotate stink bids → signals → snapshot.
//! [`ArbitrageEngine::run`] drives it on a fixed interval until Ctrl+C or
//! an optional deadline.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::dashboard::routes::AppState;
use crate::engine::executor::{is_auth_error, OrderExecutor};
use crate::engine::positions::PositionManager;
use crate::engine::scanner::{log_market_error, MarketScanner};
use crate::monitoring::alerts::AlertManager;
use crate::monitoring::console::{self, ConsoleView};
use crate::monitoring::latency::{LatencyLogger, OP_FULL_EXECUTION, OP_MARKET_FETCH};
use crate::monitoring::pnl::PnLTracker;
use crate::platforms::MarketDataSource;
use crate::storage::{self, repository::TradeRepository};
use crate::strategy::dislocation::{DislocationConfig, DislocationDetector};
use crate::strategy::risk::{RiskLimits, RiskManager, HALT_CREDENTIALS_EXPIRED};
use crate::strategy::signals::{flash_sniper, StrategyRegistry};
use crate::strategy::spread::{SpreadAnalyzer, SpreadConfig};
use crate::strategy::stink_bid::StinkBidBook;
use crate::strategy::validators::TradeValidator;
use crate::types::{
    ArbitrageOpportunity, BotState, CycleReport, Market, OrderSide, Outcome, Position, TokenPair,
    TradeSignal, TradeStatus,
};

/// Settled positions are kept this long for the console and the state file.
const SETTLED_RETENTION_HOURS: i64 = 24;
/// In live mode a closed market resolves once one leg trades at or above this.
const RESOLVED_PRICE: f64 = 0.95;

pub struct ArbitrageEngine {
    config: AppConfig,
    scanner: MarketScanner,
    spread: SpreadAnalyzer,
    dislocation: DislocationDetector,
    validator: TradeValidator,
    risk: RiskManager,
    positions: PositionManager,
    stink_bids: StinkBidBook,
    strategies: StrategyRegistry,
    executor: Arc<dyn OrderExecutor>,
    pnl: PnLTracker,
    alerts: AlertManager,
    latency: Arc<LatencyLogger>,
    repository: Option<TradeRepository>,
    dashboard: Option<AppState>,
    state: BotState,
    state_path: Option<String>,
    console: bool,
    last_prices: HashMap<String, TokenPair>,
    last_opportunities: Vec<ArbitrageOpportunity>,
}

impl ArbitrageEngine {
    /// Build an engine and restore positions, stink bids and risk counters
    /// from `state`.
    pub fn new(
        config: AppConfig,
        source: Arc<dyn MarketDataSource>,
        executor: Arc<dyn OrderExecutor>,
        latency: Arc<LatencyLogger>,
        state: BotState,
    ) -> Result<Self> {
        let scanner = MarketScanner::new(source, config.polymarket.market_limit)?;
        let spread = SpreadAnalyzer::new(SpreadConfig::from(&config.risk));
        let validator = TradeValidator::new(config.risk.min_profit_threshold, config.risk.min_liquidity);

        let mut risk = RiskManager::new(RiskLimits::from(&config.risk));
        risk.restore(&state);

        let mut positions = PositionManager::new(Arc::clone(&executor));
        positions.restore(state.positions.clone());

        let mut stink_bids = StinkBidBook::new(config.stink_bids.clone());
        stink_bids.restore(state.stink_bids.clone());

        let mut strategies = StrategyRegistry::from_config(&config.strategies)?;
        if risk.halt_reason() == Some(HALT_CREDENTIALS_EXPIRED) {
            strategies.set_all_enabled(false);
        }

        Ok(Self {
            scanner,
            spread,
            dislocation: DislocationDetector::new(DislocationConfig::default()),
            validator,
            risk,
            positions,
            stink_bids,
            strategies,
            executor,
            pnl: PnLTracker::new(),
            alerts: AlertManager::disabled(),
            latency,
            repository: None,
            dashboard: None,
            state,
            state_path: None,
            console: false,
            last_prices: HashMap::new(),
            last_opportunities: Vec::new(),
            config,
        })
    }

    pub fn with_repository(mut self, repository: TradeRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_alerts(mut self, alerts: AlertManager) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_dashboard(mut self, dashboard: AppState) -> Self {
        self.dashboard = Some(dashboard);
        self
    }

    /// Save the state file after every cycle.
    pub fn with_state_path(mut self, path: impl Into<String>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Print the console dashboard after every cycle.
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    pub fn state(&self) -> &BotState {
        &self.state
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    pub fn stink_bids(&self) -> &StinkBidBook {
        &self.stink_bids
    }

    pub fn pnl(&self) -> &PnLTracker {
        &self.pnl
    }

    pub fn last_opportunities(&self) -> &[ArbitrageOpportunity] {
        &self.last_opportunities
    }

    // -----------------------------------------------------------------------
    // Cycle
    // -----------------------------------------------------------------------

    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let now = Utc::now();
        self.state.cycle_count += 1;
        let cycle = self.state.cycle_count;
        debug!(cycle, "Cycle starting");

        // 1. Day rollover
        let previous_day = self.risk.get_risk_summary();
        if self.risk.check_day_rollover(now) {
            let yesterday = (now - chrono::Duration::days(1)).date_naive();
            let win_rate = self.pnl.get_daily_stats(yesterday).map_or(0.0, |d| d.win_rate());
            self.alerts.daily_summary(
                previous_day.daily_trades,
                previous_day.daily_pnl,
                win_rate,
                previous_day.total_exposure,
            );
        }

        // 2. Scan
        let start = Instant::now();
        let scanned = self.scanner.scan().await;
        self.latency.record(OP_MARKET_FETCH, start, scanned.is_ok());
        let scan = scanned?;

        // 3-4. Detect
        let opportunities = self.detect(&scan.flash).await;
        self.state.opportunities_found += opportunities.len() as u64;
        for opp in &opportunities {
            self.alerts.opportunity_found(opp);
        }

        // 5. Execute
        let positions_opened = self.execute(&opportunities).await;
        self.last_opportunities = opportunities;

        // 6. Settle
        let positions_settled = self.settle_closed_markets(now).await;

        // 7. Timeouts
        self.close_timed_out(now).await;

        // 8. Stink bids
        match self.stink_bids.rotate(now, self.executor.as_ref(), &scan.markets).await {
            Ok(r) if r != Default::default() => info!(
                placed = r.placed,
                renewed = r.renewed,
                dropped = r.dropped,
                filled = r.filled,
                exits_filled = r.exits_filled,
                "Stink bids rotated"
            ),
            Ok(_) => {}
            Err(e) if is_auth_error(&e) => self.handle_auth_failure(&e),
            Err(e) => warn!(error = %e, "Stink bid rotation failed"),
        }

        // 9. Signals
        let signals_generated = self.run_signals(&scan.markets, now).await;

        // 10. Snapshot and persistence
        self.persist_fills().await;
        let snapshot_positions = self.positions.snapshot();
        if let Some(snap) = self.pnl.record_snapshot(&snapshot_positions, self.risk.get_risk_summary().daily_trades, now) {
            if let Some(repo) = &self.repository {
                if let Err(e) = repo.record_snapshot(&snap).await {
                    warn!(error = %e, "Failed to persist P&L snapshot");
                }
            }
        }
        self.positions.prune_settled(chrono::Duration::hours(SETTLED_RETENTION_HOURS));
        self.scanner.prune_cache();
        self.risk.update_exposure(self.positions.open_positions());

        // 11. Report
        let report = CycleReport {
            cycle_number: cycle,
            timestamp: now,
            markets_scanned: scan.total_fetched,
            flash_markets: scan.flash.len(),
            opportunities_found: self.last_opportunities.len(),
            positions_opened,
            positions_settled,
            signals_generated,
            stink_bids_active: self.stink_bids.len(),
            realized_pnl: self.state.realized_pnl,
            total_exposure: self.risk.total_exposure(),
        };
        self.sync_state().await;
        self.publish(&report).await;
        Ok(report)
    }

    /// Price every flash market without an open position and keep the
    /// profitable spreads, best score first.
    async fn detect(&mut self, flash: &[Market]) -> Vec<ArbitrageOpportunity> {
        let mut opportunities = Vec::new();
        for market in flash {
            if self.positions.has_open_position(&market.id) {
                continue;
            }
            if self.risk.exposure_at_cap() {
                debug!("Exposure at cap, skipping remaining markets");
                break;
            }

            let prices = match self.scanner.get_market_prices(market).await {
                Ok(p) => p,
                Err(e) => {
                    log_market_error(market, &e);
                    continue;
                }
            };
            self.last_prices.insert(market.id.clone(), prices.clone());
            self.dislocation.update_price(&market.id, prices.up_price, prices.down_price);

            if !prices.is_profitable() {
                continue;
            }
            let (up_book, down_book) = match self.scanner.get_orderbooks(market).await {
                Ok(books) => books,
                Err(e) => {
                    log_market_error(market, &e);
                    continue;
                }
            };

            let mut priced = market.clone();
            let mut tokens = prices;
            tokens.up_liquidity = up_book.ask_liquidity_near_best();
            tokens.down_liquidity = down_book.ask_liquidity_near_best();
            let result = self.spread.analyze(
                &priced,
                tokens.up_price,
                tokens.down_price,
                tokens.up_liquidity,
                tokens.down_liquidity,
            );
            priced.tokens = Some(tokens);

            match self.spread.create_opportunity(&priced, &result) {
                Some(opp) => opportunities.push(opp),
                None => debug!(market_id = %market.id, reason = %result.reason, "Spread rejected"),
            }
        }
        opportunities.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        opportunities
    }

    /// Open positions for the opportunities that pass every check.
    async fn execute(&mut self, opportunities: &[ArbitrageOpportunity]) -> usize {
        let mut opened = 0;
        for opp in opportunities {
            if !self.risk.is_trading_allowed() {
                debug!(reason = self.risk.halt_reason().unwrap_or("?"), "Trading halted, skipping execution");
                break;
            }
            if self.positions.has_open_position(&opp.market.id) {
                continue;
            }

            let balance = match self.executor.balance().await {
                Ok(b) => b,
                Err(e) if is_auth_error(&e) => {
                    self.handle_auth_failure(&e);
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Balance fetch failed, skipping execution");
                    break;
                }
            };

            let size = self.risk.calculate_position_size(opp, balance);
            if size < self.config.risk.min_trade_size_usdc {
                debug!(market_id = %opp.market.id, size, "Position size below minimum");
                continue;
            }

            let validation = self.validator.validate_all(opp, size, balance);
            if !validation.is_valid {
                info!(market_id = %opp.market.id, reason = %validation.reason(), "Validation failed");
                continue;
            }
            for w in &validation.warnings {
                debug!(market_id = %opp.market.id, warning = %w, "Validation warning");
            }

            if let Err(reason) = self.risk.can_open_position(&opp.market.id, size, opp.profit_per_contract) {
                info!(market_id = %opp.market.id, %reason, "Risk check failed");
                continue;
            }

            let start = Instant::now();
            let result = self.positions.open_position(opp, size).await;
            self.latency.record(OP_FULL_EXECUTION, start, matches!(result, Ok(Some(_))));

            match result {
                Ok(Some(position)) => {
                    if position.state == crate::types::PositionState::Complete {
                        opened += 1;
                        self.state.trades_executed += 1;
                        self.alerts.trade_executed(
                            &position.market_id,
                            position.asset(),
                            "UP+DOWN",
                            position.total_cost,
                            position.combined_avg_price(),
                            None,
                        );
                    } else {
                        self.alerts.warning(&format!(
                            "Partial position {} on {}: DOWN leg did not fill",
                            position.id, position.market_id
                        ));
                    }
                    self.save_position(&position).await;
                    self.risk.update_exposure(self.positions.open_positions());
                }
                Ok(None) => {}
                Err(e) if is_auth_error(&e) => {
                    self.handle_auth_failure(&e);
                    break;
                }
                Err(e) => {
                    error!(market_id = %opp.market.id, error = %e, "Execution failed");
                    self.alerts.error(&e.to_string(), Some(&opp.market.id));
                }
            }
        }
        opened
    }

    /// Settle open positions whose market has closed.
    async fn settle_closed_markets(&mut self, now: DateTime<Utc>) -> usize {
        let due: Vec<Position> = self
            .positions
            .open_positions()
            .into_iter()
            .filter(|p| p.market.as_ref().map_or(false, Market::is_closed))
            .cloned()
            .collect();

        let mut settled = 0;
        for position in due {
            let Some(winner) = self.resolve_winner(&position).await else {
                debug!(position_id = %position.id, "Market closed but not yet resolved");
                continue;
            };
            match self.positions.mark_settled(&position.id, winner) {
                Ok(pnl) => {
                    settled += 1;
                    self.record_realized(pnl, position.total_cost, now);
                    self.alerts.position_settled(position.asset(), winner, pnl);
                    if let Some(p) = self.positions.get(&position.id).cloned() {
                        let payout = p.settlement_value.unwrap_or(0.0);
                        if let Err(e) = self.executor.credit_settlement(payout) {
                            error!(position_id = %p.id, payout, error = %e, "Settlement credit failed");
                        }
                        self.save_position(&p).await;
                    }
                }
                Err(e) => error!(position_id = %position.id, error = %e, "Settlement failed"),
            }
        }
        settled
    }

    /// Paper mode takes the higher of the last-seen prices as the winner.
    /// Live mode waits until one leg's midpoint reaches the resolved price.
    async fn resolve_winner(&mut self, position: &Position) -> Option<Outcome> {
        if self.executor.is_paper() {
            let prices = self
                .last_prices
                .get(&position.market_id)
                .cloned()
                .or_else(|| position.market.as_ref().and_then(|m| m.tokens.clone()))?;
            return Some(if prices.up_price >= prices.down_price { Outcome::Up } else { Outcome::Down });
        }

        let market = position.market.as_ref()?;
        match self.scanner.get_midpoints(market).await {
            Ok((up, _)) if up >= RESOLVED_PRICE => Some(Outcome::Up),
            Ok((_, down)) if down >= RESOLVED_PRICE => Some(Outcome::Down),
            Ok(_) => None,
            Err(e) => {
                log_market_error(market, &e);
                None
            }
        }
    }

    /// Sell out of positions that have been open too long.
    async fn close_timed_out(&mut self, now: DateTime<Utc>) {
        let snapshot = self.positions.snapshot();
        let stale: Vec<(String, f64)> = self
            .risk
            .check_position_timeout(&snapshot, now)
            .into_iter()
            .filter(|p| !p.market.as_ref().map_or(false, Market::is_closed))
            .map(|p| (p.id.clone(), p.total_cost))
            .collect();

        for (id, cost) in stale {
            match self.positions.close_position(&id).await {
                Ok(pnl) => {
                    self.record_realized(pnl, cost, now);
                    if let Some(p) = self.positions.get(&id).cloned() {
                        self.alerts.trade_executed(&p.market_id, p.asset(), "EXIT", cost, 0.0, Some(pnl));
                        self.save_position(&p).await;
                    }
                }
                Err(e) if is_auth_error(&e) => {
                    self.handle_auth_failure(&e);
                    return;
                }
                Err(e) => warn!(position_id = %id, error = %e, "Timed-out position could not be closed"),
            }
        }
    }

    fn record_realized(&mut self, pnl: f64, volume: f64, now: DateTime<Utc>) {
        self.state.realized_pnl += pnl;
        self.risk.record_trade_pnl(pnl);
        self.pnl.record_trade(pnl, volume, now);
    }

    /// Run the signal strategies, persist what they emit and, when enabled,
    /// place the orders.
    async fn run_signals(&mut self, markets: &[Market], now: DateTime<Utc>) -> usize {
        let snapshots: Vec<_> = markets.iter().filter(|m| !m.is_closed()).map(Market::snapshot).collect();
        let signals = self.strategies.process_all(&snapshots, now);
        self.state.signals_generated += signals.len() as u64;

        for signal in &signals {
            let trade_id = match &self.repository {
                Some(repo) => match repo.insert_signal(signal, self.executor.is_paper()).await {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!(strategy = %signal.strategy_id, error = %e, "Failed to persist signal");
                        None
                    }
                },
                None => None,
            };

            if !self.config.strategies.execute_signals || !self.risk.is_trading_allowed() {
                continue;
            }
            match self.execute_signal(signal).await {
                Ok(Some(order_id)) => {
                    if let Some(runner) = self.strategies.get_mut(&signal.strategy_id) {
                        runner.record_execution();
                    }
                    self.update_trade(trade_id.as_deref(), TradeStatus::Filled, Some(&order_id)).await;
                }
                Ok(None) => self.update_trade(trade_id.as_deref(), TradeStatus::Cancelled, None).await,
                Err(e) if is_auth_error(&e) => {
                    self.handle_auth_failure(&e);
                    break;
                }
                Err(e) => {
                    warn!(strategy = %signal.strategy_id, error = %e, "Signal execution failed");
                    self.update_trade(trade_id.as_deref(), TradeStatus::Cancelled, None).await;
                }
            }
        }
        signals.len()
    }

    /// Buy the signal's token(s). The flash sniper buys the same number of
    /// contracts on both legs. Returns the first order id when everything filled.
    async fn execute_signal(&self, signal: &TradeSignal) -> Result<Option<String>> {
        let Some(token_id) = signal.token_id.clone() else {
            return Ok(None);
        };
        let mut legs = vec![(token_id, signal.entry_price)];
        if signal.strategy_id == flash_sniper::STRATEGY_ID {
            let no_token = signal.signal_data["no_token_id"].as_str().map(str::to_string);
            let no_price = signal.signal_data["no_price"].as_f64();
            let (Some(no_token), Some(no_price)) = (no_token, no_price) else {
                return Ok(None);
            };
            legs.push((no_token, no_price));
        }
        if legs.iter().any(|(_, price)| *price <= 0.0) {
            return Ok(None);
        }
        let per_contract: f64 = legs.iter().map(|(_, price)| price).sum();
        let contracts = (signal.stake / per_contract * 100.0).floor() / 100.0;
        if contracts <= 0.0 {
            return Ok(None);
        }

        let mut first_order = None;
        for (token, price) in legs {
            let fill = self
                .executor
                .place_market_order(&token, OrderSide::Buy, contracts, Some(price))
                .await?;
            if !fill.success || fill.filled_size <= 0.0 {
                info!(
                    strategy = %signal.strategy_id,
                    token_id = %token,
                    error = fill.error.as_deref().unwrap_or("no fill"),
                    "Signal order not filled"
                );
                return Ok(None);
            }
            first_order = first_order.or(fill.order_id);
        }
        info!(signal = %signal, "Signal executed");
        Ok(first_order.or_else(|| Some(String::new())))
    }

    async fn update_trade(&self, trade_id: Option<&str>, status: TradeStatus, order_id: Option<&str>) {
        let (Some(repo), Some(id)) = (&self.repository, trade_id) else {
            return;
        };
        if let Err(e) = repo.update_trade_status(id, status, order_id).await {
            warn!(trade_id = id, error = %e, "Failed to update trade status");
        }
    }

    async fn save_position(&self, position: &Position) {
        if let Some(repo) = &self.repository {
            if let Err(e) = repo.save_position(position).await {
                warn!(position_id = %position.id, error = %e, "Failed to persist position");
            }
        }
    }

    async fn persist_fills(&mut self) {
        let fills = self.positions.take_fills();
        let Some(repo) = &self.repository else { return };
        for fill in &fills {
            if let Err(e) = repo.save_fill(fill).await {
                warn!(fill_id = %fill.id, error = %e, "Failed to persist fill");
            }
        }
    }

    /// The exchange rejected our credentials: stop trading and pause every
    /// strategy until an operator intervenes.
    fn handle_auth_failure(&mut self, err: &anyhow::Error) {
        if self.risk.halt_reason() == Some(HALT_CREDENTIALS_EXPIRED) {
            return;
        }
        error!(error = %err, "Credentials rejected, pausing trading");
        self.risk.halt_trading(HALT_CREDENTIALS_EXPIRED);
        self.strategies.set_all_enabled(false);
        self.alerts.error("Exchange credentials expired or rejected", Some(&err.to_string()));
    }

    /// Copy live component state into the persisted `BotState` and save it.
    async fn sync_state(&mut self) {
        self.state.positions = self.positions.snapshot();
        self.state.stink_bids = self.stink_bids.snapshot();
        self.risk.persist(&mut self.state);
        self.state.latency = self.latency.all_stats();
        self.state.simulation = self.executor.simulation_stats();
        if self.executor.is_paper() {
            if let Ok(b) = self.executor.balance().await {
                self.state.paper_balance = b;
            }
        }

        if let Some(path) = &self.state_path {
            if let Err(e) = storage::save_state(&self.state, Some(path)) {
                warn!(error = %e, "Failed to save state");
            }
        }
    }

    async fn publish(&self, report: &CycleReport) {
        let positions = self.positions.snapshot();
        let current = self.pnl.get_current_pnl(&positions);
        let risk = self.risk.get_risk_summary();

        if self.console {
            console::print(&ConsoleView {
                name: &self.config.bot.name,
                paper_trading: self.executor.is_paper(),
                cycle: report.cycle_number,
                uptime: self.state.uptime(),
                positions: &positions,
                opportunities: &self.last_opportunities,
                pnl: &current,
                risk: &risk,
            });
        }

        if let Some(dashboard) = &self.dashboard {
            dashboard
                .publish(self.state.clone(), report.clone(), self.last_opportunities.clone(), current, risk)
                .await;
        }
    }

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------

    /// Cycle every `interval` until Ctrl+C or until `deadline` has elapsed.
    pub async fn run(&mut self, interval: Duration, deadline: Option<Duration>) -> Result<()> {
        info!(
            interval_secs = interval.as_secs(),
            paper = self.executor.is_paper(),
            deadline_secs = deadline.map(|d| d.as_secs()),
            "Engine started"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let stop_at = deadline.map(|d| tokio::time::Instant::now() + d);
        let expired = async move {
            match stop_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) => info!(
                            cycle = report.cycle_number,
                            scanned = report.markets_scanned,
                            flash = report.flash_markets,
                            opportunities = report.opportunities_found,
                            opened = report.positions_opened,
                            settled = report.positions_settled,
                            signals = report.signals_generated,
                            pnl = format!("${:+.2}", report.realized_pnl),
                            exposure = format!("${:.2}", report.total_exposure),
                            "Cycle complete"
                        ),
                        Err(e) => {
                            error!(cycle = self.state.cycle_count, error = %e, "Cycle failed");
                            self.alerts.error(&e.to_string(), Some("engine cycle"));
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = &mut expired => {
                    info!("Run duration elapsed");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    /// Cancel resting stink bids and write the final state.
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.stink_bids.cancel_all(self.executor.as_ref()).await {
            Ok(0) => {}
            Ok(n) => info!(cancelled = n, "Stink bids cancelled"),
            Err(e) => warn!(error = %e, "Failed to cancel stink bids"),
        }
        self.persist_fills().await;
        self.sync_state().await;

        let summary = self.positions.get_position_summary();
        info!(
            cycles = self.state.cycle_count,
            trades = self.state.trades_executed,
            open_positions = summary.open,
            realized_pnl = format!("${:+.2}", self.state.realized_pnl),
            "Engine stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::{MockOrderExecutor, PaperExecutor};
    use crate::engine::simulator::{SimulatorConfig, SlippageSimulator};
    use crate::platforms::polymarket::GammaMarket;
    use crate::platforms::MockMarketDataSource;
    use crate::types::{BotError, OrderBook, OrderResult, PriceLevel};

    fn config() -> AppConfig {
        let mut c = crate::config::tests::sample_config();
        c.strategies.flash_sniper = false;
        c.strategies.sniper = false;
        c.strategies.tail = false;
        c.strategies.contrarian = false;
        c.stink_bids.enabled = false;
        c
    }

    fn gamma(id: &str, minutes: i64) -> GammaMarket {
        let end = (Utc::now() + chrono::Duration::minutes(minutes)).to_rfc3339();
        serde_json::from_value(serde_json::json!({
            "id": id,
            "conditionId": format!("0x{id}"),
            "question": "Bitcoin Up or Down - 15 minute",
            "endDate": end,
            "active": true,
            "closed": false,
            "outcomes": "[\"Up\", \"Down\"]",
            "outcomePrices": "[\"0.45\", \"0.50\"]",
            "clobTokenIds": format!("[\"{id}-up\", \"{id}-down\"]"),
            "volumeNum": 20000.0
        }))
        .unwrap()
    }

    fn book(token: &str, ask: f64) -> OrderBook {
        OrderBook {
            token_id: token.to_string(),
            bids: vec![PriceLevel { price: ask - 0.01, size: 2000.0 }],
            asks: vec![PriceLevel { price: ask, size: 2000.0 }],
        }
    }

    fn source(up: f64, down: f64) -> MockMarketDataSource {
        let mut mock = MockMarketDataSource::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_fetch_markets().returning(|_| Ok(vec![gamma("m1", 10)]));
        mock.expect_get_price()
            .returning(move |token, _| Ok(if token.ends_with("-up") { up } else { down }));
        mock.expect_get_orderbook()
            .returning(move |token| Ok(book(token, if token.ends_with("-up") { up } else { down })));
        mock
    }

    fn paper() -> Arc<dyn OrderExecutor> {
        let sim = SlippageSimulator::with_seed(
            SimulatorConfig {
                failure_rate: 0.0,
                partial_fill_rate: 0.0,
                ..Default::default()
            },
            7,
        );
        Arc::new(PaperExecutor::new(sim, 10_000.0, Arc::new(LatencyLogger::default())))
    }

    #[tokio::test]
    async fn test_cycle_without_spread_opens_nothing() {
        let mut engine = ArbitrageEngine::new(
            config(),
            Arc::new(source(0.50, 0.51)),
            paper(),
            Arc::new(LatencyLogger::default()),
            BotState::new(true, 10_000.0),
        )
        .unwrap();

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.cycle_number, 1);
        assert_eq!(report.flash_markets, 1);
        assert_eq!(report.opportunities_found, 0);
        assert_eq!(report.positions_opened, 0);
        assert_eq!(engine.state().cycle_count, 1);
    }

    #[tokio::test]
    async fn test_cycle_opens_position_on_spread() {
        let mut engine = ArbitrageEngine::new(
            config(),
            Arc::new(source(0.45, 0.50)),
            paper(),
            Arc::new(LatencyLogger::default()),
            BotState::new(true, 10_000.0),
        )
        .unwrap();

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.opportunities_found, 1);
        assert_eq!(report.positions_opened, 1);
        assert!(engine.positions().has_open_position("m1"));
        assert!(report.total_exposure > 0.0);
        assert_eq!(engine.state().positions.len(), 1);

        // the open position keeps the market out of the next cycle
        let second = engine.run_cycle().await.unwrap();
        assert_eq!(second.opportunities_found, 0);
        assert_eq!(second.positions_opened, 0);
    }

    #[tokio::test]
    async fn test_auth_error_halts_and_pauses_strategies() {
        let mut exec = MockOrderExecutor::new();
        exec.expect_is_paper().return_const(false);
        exec.expect_balance().returning(|| Ok(10_000.0));
        exec.expect_simulation_stats().returning(|| None);
        exec.expect_open_orders().returning(|| Ok(vec![]));
        exec.expect_place_market_order().returning(|_, _, _, _| {
            Err(BotError::Auth {
                platform: "polymarket".into(),
                message: "401".into(),
            }
            .into())
        });

        let mut cfg = config();
        cfg.strategies.tail = true;
        let mut engine = ArbitrageEngine::new(
            cfg,
            Arc::new(source(0.45, 0.50)),
            Arc::new(exec),
            Arc::new(LatencyLogger::default()),
            BotState::new(false, 0.0),
        )
        .unwrap();

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.positions_opened, 0);
        assert_eq!(engine.risk().halt_reason(), Some(HALT_CREDENTIALS_EXPIRED));
        assert!(engine.strategies().stats().iter().all(|s| !s.enabled));
        assert!(engine.state().halted);
    }

    #[tokio::test]
    async fn test_paper_settlement_uses_last_prices() {
        let mut engine = ArbitrageEngine::new(
            config(),
            Arc::new(source(0.45, 0.50)),
            paper(),
            Arc::new(LatencyLogger::default()),
            BotState::new(true, 10_000.0),
        )
        .unwrap();
        engine.run_cycle().await.unwrap();

        // Close the market under the open position.
        let id = engine.positions().open_positions()[0].id.clone();
        let mut pos = engine.positions().get(&id).unwrap().clone();
        if let Some(m) = pos.market.as_mut() {
            m.end_time = Some(Utc::now() - chrono::Duration::minutes(1));
        }
        engine.positions.restore([pos]);

        let before = engine.executor.balance().await.unwrap();
        let settled = engine.settle_closed_markets(Utc::now()).await;
        assert_eq!(settled, 1);
        let p = engine.positions().get(&id).unwrap().clone();
        // DOWN traded higher, so the DOWN contracts pay out
        assert_eq!(p.settlement_value, Some(p.down_contracts));
        assert!(engine.state().realized_pnl != 0.0);

        let after = engine.executor.balance().await.unwrap();
        assert!((after - before - p.down_contracts).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_execute_signal_needs_fill() {
        let mut exec = MockOrderExecutor::new();
        exec.expect_place_market_order()
            .returning(|token, side, size, _| Ok(OrderResult::failed(token, side, size, "killed")));
        let engine = ArbitrageEngine::new(
            config(),
            Arc::new(source(0.50, 0.51)),
            Arc::new(exec),
            Arc::new(LatencyLogger::default()),
            BotState::new(true, 10_000.0),
        )
        .unwrap();

        let snap = crate::strategy::signals::tests::snapshot("Will it rain?", 0.30, 10_000.0);
        let signal = TradeSignal::buy("CONTRARIAN_NO", &snap, crate::types::Side::No, 0.70, 200.0, 0.6).unwrap();
        assert_eq!(engine.execute_signal(&signal).await.unwrap(), None);
    }
}
