//! End-to-end engine cycles against the mock exchange.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use polybot::config::AppConfig;
use polybot::dashboard::routes::DashboardState;
use polybot::engine::runner::ArbitrageEngine;
use polybot::monitoring::latency::{LatencyLogger, OP_MARKET_FETCH};
use polybot::reporting::PostTradeAnalyzer;
use polybot::storage::{self, repository::TradeRepository};
use polybot::strategy::risk::HALT_CREDENTIALS_EXPIRED;
use polybot::types::{BotState, Market, OrderSide, OrderType, Position, PositionState, TokenPair, TradeStatus};

use crate::mock_exchange::{Failure, MockExchange};

const CONFIG: &str = r#"
[bot]
name = "POLYBOT-IT"
environment = "development"
paper_trading = true
scan_interval_secs = 1

[polymarket]
gamma_host = "http://localhost"
clob_host = "http://localhost"
chain_id = 137
signature_type = 1
private_key_env = "POLYBOT_IT_PRIVATE_KEY"

[risk]
max_position_size_usdc = 100.0
max_total_exposure_usdc = 1000.0
max_daily_loss_usdc = 200.0
max_positions_per_market = 1
max_total_positions = 5
min_profit_threshold = 0.04
min_liquidity = 100.0
position_timeout_secs = 900

[strategies]
flash_sniper = false
sniper = false
tail = false
contrarian = false
execute_signals = false

[stink_bids]
enabled = false
min_volume = 50000.0
bid_price = 0.03
stake_usdc = 3.0
exit_multiplier = 3.0
ttl_secs = 3600
max_open_bids = 10

[dashboard]
enabled = false
port = 8080

[alerts]
"#;

fn config() -> AppConfig {
    AppConfig::from_toml(CONFIG).unwrap()
}

fn engine(cfg: AppConfig, ex: &MockExchange, state: BotState) -> ArbitrageEngine {
    ArbitrageEngine::new(
        cfg,
        Arc::new(ex.clone()),
        Arc::new(ex.clone()),
        Arc::new(LatencyLogger::default()),
        state,
    )
    .unwrap()
}

/// An open position on a market that has already closed.
fn expired_position(id: &str, up: f64, down: f64) -> Position {
    let mut tokens = TokenPair::new(format!("{id}-up"), format!("{id}-down"));
    tokens.up_price = up;
    tokens.down_price = down;
    let market = Market {
        id: id.to_string(),
        condition_id: format!("0x{id}"),
        question: "Bitcoin Up or Down - 15 minute".to_string(),
        description: String::new(),
        slug: String::new(),
        market_type: polybot::types::MarketType::Flash15m,
        asset: Some("BTC".to_string()),
        tokens: Some(tokens),
        end_time: Some(Utc::now() - ChronoDuration::minutes(2)),
        volume: 20_000.0,
        liquidity: 2_000.0,
        active: true,
        closed: false,
        tags: Vec::new(),
        category: polybot::types::MarketCategory::Crypto,
        best_bid: None,
        best_ask: None,
    };
    let mut p = Position::new(&market);
    p.up_contracts = 100.0;
    p.up_avg_price = 0.45;
    p.down_contracts = 100.0;
    p.down_avg_price = 0.50;
    p.recompute_cost();
    p.state = PositionState::Complete;
    p
}

#[tokio::test]
async fn test_arbitrage_cycle_opens_balanced_position() {
    let ex = MockExchange::new(10_000.0);
    ex.add_flash_market("btc-1", "Bitcoin", 0.45, 0.50, 10);
    let repo = TradeRepository::in_memory().await.unwrap();
    let latency = Arc::new(LatencyLogger::default());

    let mut engine = ArbitrageEngine::new(
        config(),
        Arc::new(ex.clone()),
        Arc::new(ex.clone()),
        Arc::clone(&latency),
        BotState::new(true, 10_000.0),
    )
    .unwrap()
    .with_repository(repo.clone());

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.flash_markets, 1);
    assert_eq!(report.opportunities_found, 1);
    assert_eq!(report.positions_opened, 1);

    // Both legs bought as fill-or-kill at the detected prices.
    let orders = ex.placed();
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|o| o.side == OrderSide::Buy && o.order_type == OrderType::Fok));
    assert_eq!(orders[0].token_id, "btc-1-up");
    assert_eq!(orders[1].token_id, "btc-1-down");

    let open = engine.positions().open_positions();
    assert_eq!(open.len(), 1);
    let p = open[0];
    assert_eq!(p.state, PositionState::Complete);
    assert_eq!(orders[0].size, orders[1].size, "same contracts on both legs");
    assert_eq!(p.up_contracts, p.down_contracts);
    assert!(p.total_cost <= 100.0 + 1e-9);
    assert!(p.unrealized_pnl() > 0.0);

    // Persisted: the position and both fills.
    let since = Utc::now() - ChronoDuration::hours(1);
    let positions = repo.positions_since(since).await.unwrap();
    let fills = repo.fills_since(since).await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(fills.len(), 2);

    // The post-trade report counts it as a clean two-leg entry.
    let report = PostTradeAnalyzer::new().generate_validation_report(&positions, &fills, 1.0);
    assert_eq!(report.total_positions, 1);
    assert_eq!(report.successful_positions, 1);
    assert_eq!(report.partial_positions, 0);

    assert!(latency.all_stats().iter().any(|s| s.operation == OP_MARKET_FETCH));
    assert_eq!(engine.state().trades_executed, 1);
}

#[tokio::test]
async fn test_thin_or_negative_spread_is_ignored() {
    let ex = MockExchange::new(10_000.0);
    ex.add_flash_market("btc-1", "Bitcoin", 0.49, 0.49, 10); // 0.02 profit, below threshold
    ex.add_flash_market("eth-1", "Ethereum", 0.52, 0.50, 10); // costs more than $1

    let mut engine = engine(config(), &ex, BotState::new(true, 10_000.0));
    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.flash_markets, 2);
    assert_eq!(report.opportunities_found, 0);
    assert!(ex.placed().is_empty());
}

#[tokio::test]
async fn test_market_near_close_is_skipped() {
    let ex = MockExchange::new(10_000.0);
    ex.add_flash_market("btc-1", "Bitcoin", 0.40, 0.40, 0);

    let mut engine = engine(config(), &ex, BotState::new(true, 10_000.0));
    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.flash_markets, 0);
    assert!(ex.placed().is_empty());
}

#[tokio::test]
async fn test_down_leg_failure_leaves_partial_position() {
    let ex = MockExchange::new(10_000.0);
    ex.add_flash_market("btc-1", "Bitcoin", 0.45, 0.50, 10);
    ex.reject_token("btc-1-down");

    let mut engine = engine(config(), &ex, BotState::new(true, 10_000.0));
    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.positions_opened, 0);

    let partial = engine.positions().partial_positions();
    assert_eq!(partial.len(), 1);
    assert!(partial[0].up_contracts > 0.0);
    assert_eq!(partial[0].down_contracts, 0.0);

    // The market is not traded again while the partial is open.
    let again = engine.run_cycle().await.unwrap();
    assert_eq!(again.opportunities_found, 0);
}

#[tokio::test]
async fn test_rejected_credentials_halt_trading() {
    let ex = MockExchange::new(10_000.0);
    ex.add_flash_market("btc-1", "Bitcoin", 0.45, 0.50, 10);
    ex.fail_orders_with(Failure::Auth);

    let mut cfg = config();
    cfg.strategies.flash_sniper = true;
    let mut engine = engine(cfg, &ex, BotState::new(true, 10_000.0));

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.positions_opened, 0);
    assert_eq!(engine.risk().halt_reason(), Some(HALT_CREDENTIALS_EXPIRED));
    assert!(engine.strategies().stats().iter().all(|s| !s.enabled));
    assert!(engine.state().halted);

    // Still halted after the exchange recovers.
    ex.clear_failure();
    let next = engine.run_cycle().await.unwrap();
    assert_eq!(next.positions_opened, 0);
    assert_eq!(next.signals_generated, 0);
}

#[tokio::test]
async fn test_scan_outage_fails_cycle_without_state_damage() {
    let ex = MockExchange::new(10_000.0);
    ex.add_flash_market("btc-1", "Bitcoin", 0.45, 0.50, 10);
    ex.fail_with(Failure::Network);

    let mut engine = engine(config(), &ex, BotState::new(true, 10_000.0));
    assert!(engine.run_cycle().await.is_err());
    assert!(engine.risk().is_trading_allowed());

    ex.clear_failure();
    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.positions_opened, 1);
}

#[tokio::test]
async fn test_paper_settlement_of_restored_position() {
    let ex = MockExchange::new(10_000.0);
    let mut state = BotState::new(true, 10_000.0);
    // DOWN was priced higher when last seen, so DOWN wins.
    state.positions.push(expired_position("old", 0.30, 0.65));

    let mut engine = engine(config(), &ex, state);
    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.positions_settled, 1);

    let settled = &engine.state().positions[0];
    assert_eq!(settled.state, PositionState::Settled);
    assert_eq!(settled.settlement_value, Some(100.0));
    let expected = 100.0 - settled.total_cost;
    assert!((engine.state().realized_pnl - expected).abs() < 1e-9);
    assert!((engine.risk().daily_pnl() - expected).abs() < 1e-9);

    // The payout lands in the paper balance.
    assert!((ex.current_balance() - 10_100.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_lopsided_entry_settles_at_a_profit() {
    let ex = MockExchange::new(10_000.0);
    ex.add_flash_market("btc-1", "Bitcoin", 0.30, 0.65, 10);

    let mut first = engine(config(), &ex, BotState::new(true, 10_000.0));
    let report = first.run_cycle().await.unwrap();
    assert_eq!(report.positions_opened, 1);

    // Restart with the position's market already closed.
    let mut state = first.state().clone();
    let opened = state.positions[0].clone();
    assert_eq!(opened.up_contracts, opened.down_contracts);
    if let Some(m) = state.positions[0].market.as_mut() {
        m.end_time = Some(Utc::now() - ChronoDuration::minutes(1));
    }
    let spent = 10_000.0 - ex.current_balance();
    assert!((spent - opened.total_cost).abs() < 1e-6);

    let mut second = engine(config(), &ex, state);
    let report = second.run_cycle().await.unwrap();
    assert_eq!(report.positions_settled, 1);

    // DOWN was dearer and wins; the pair still pays $1 each.
    let settled = second.state().positions.iter().find(|p| p.id == opened.id).unwrap();
    assert_eq!(settled.settlement_value, Some(opened.down_contracts));
    let pnl = settled.realized_pnl.unwrap();
    assert!(pnl > 0.0);
    assert!((pnl - (opened.down_contracts - opened.total_cost)).abs() < 1e-9);
    assert!((ex.current_balance() - (10_000.0 + pnl)).abs() < 1e-6);
}

#[tokio::test]
async fn test_live_settlement_waits_for_resolution() {
    let ex = MockExchange::new(10_000.0).live();
    ex.set_price("old-up", 0.60);
    ex.set_price("old-down", 0.40);
    let mut state = BotState::new(false, 0.0);
    state.positions.push(expired_position("old", 0.45, 0.50));

    let mut engine = engine(config(), &ex, state);
    let first = engine.run_cycle().await.unwrap();
    assert_eq!(first.positions_settled, 0);

    ex.set_price("old-up", 0.98);
    ex.set_price("old-down", 0.02);
    let second = engine.run_cycle().await.unwrap();
    assert_eq!(second.positions_settled, 1);
    assert_eq!(engine.state().positions[0].settlement_value, Some(100.0));
    // Live winnings are redeemed on-chain, not credited locally.
    assert_eq!(ex.current_balance(), 10_000.0);
}

#[tokio::test]
async fn test_stink_bids_rotate_and_exit_on_fill() {
    let ex = MockExchange::new(10_000.0);
    ex.add_market("big-1", "Will the Fed cut rates in December?", 0.45, 0.55, 60 * 24 * 30, 80_000.0);

    let mut cfg = config();
    cfg.stink_bids.enabled = true;
    let mut engine = engine(cfg, &ex, BotState::new(true, 10_000.0));

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.stink_bids_active, 2);
    let bids: Vec<_> = ex.placed().into_iter().filter(|o| o.order_type == OrderType::Gtc).collect();
    assert_eq!(bids.len(), 2);
    assert!(bids.iter().all(|o| o.side == OrderSide::Buy && (o.price - 0.03).abs() < 1e-9));

    // One bid gets hit; the next rotation posts its exit.
    let resting = ex.resting_ids();
    assert!(ex.fill_resting(&resting[0]));
    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.stink_bids_active, 1);
    let exits: Vec<_> = ex.placed().into_iter().filter(|o| o.side == OrderSide::Sell).collect();
    assert_eq!(exits.len(), 1);
    assert!((exits[0].price - 0.09).abs() < 1e-9);

    // The exit is hit too, which frees the token for a new bid.
    let exit_id = ex
        .resting_ids()
        .into_iter()
        .find(|id| !engine.stink_bids().bids().any(|b| b.order_id.as_deref() == Some(id.as_str())))
        .unwrap();
    assert!(ex.fill_resting(&exit_id));
    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.stink_bids_active, 2);
    assert!(engine.stink_bids().exits().is_empty());

    // Shutdown pulls the remaining bids.
    engine.shutdown().await.unwrap();
    assert!(engine.stink_bids().is_empty());
    assert!(ex.resting_ids().is_empty());
}

#[tokio::test]
async fn test_flash_sniper_signal_persisted_and_executed() {
    let ex = MockExchange::new(10_000.0);
    // Spread too thin for the arbitrage path but enough for the sniper.
    ex.add_flash_market("btc-1", "Bitcoin", 0.48, 0.50, 10);
    let repo = TradeRepository::in_memory().await.unwrap();

    let mut cfg = config();
    cfg.strategies.flash_sniper = true;
    cfg.strategies.execute_signals = true;
    let mut engine = engine(cfg, &ex, BotState::new(true, 10_000.0)).with_repository(repo.clone());

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.opportunities_found, 0);
    assert_eq!(report.signals_generated, 1);

    let trades = repo.recent_trades(10).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].strategy_id, "FLASH_SNIPER");
    assert_eq!(trades[0].status, TradeStatus::Filled);
    assert!(trades[0].order_id.is_some());

    // Both legs, same contracts, whole stake across the pair.
    let orders = ex.placed();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].token_id, "btc-1-up");
    assert_eq!(orders[1].token_id, "btc-1-down");
    assert_eq!(orders[0].size, orders[1].size);
    let spent: f64 = orders.iter().map(|o| o.size * o.price).sum();
    assert!(spent <= 200.0 && spent > 199.9, "spent {spent}");

    let stats = engine.strategies().stats();
    assert_eq!(stats[0].signals_executed, 1);

    // One signal per market per day.
    let again = engine.run_cycle().await.unwrap();
    assert_eq!(again.signals_generated, 0);
}

#[tokio::test]
async fn test_signals_recorded_but_not_executed_by_default() {
    let ex = MockExchange::new(10_000.0);
    ex.add_flash_market("btc-1", "Bitcoin", 0.48, 0.50, 10);
    let repo = TradeRepository::in_memory().await.unwrap();

    let mut cfg = config();
    cfg.strategies.flash_sniper = true;
    let mut engine = engine(cfg, &ex, BotState::new(true, 10_000.0)).with_repository(repo.clone());

    engine.run_cycle().await.unwrap();
    let trades = repo.recent_trades(10).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, TradeStatus::Signal);
    assert!(ex.placed().is_empty());
}

#[tokio::test]
async fn test_dashboard_and_state_file_updated_each_cycle() {
    let ex = MockExchange::new(10_000.0);
    ex.add_flash_market("btc-1", "Bitcoin", 0.45, 0.50, 10);
    let path = std::env::temp_dir().join(format!("polybot-it-{}.json", uuid::Uuid::new_v4()));
    let path_str = path.to_string_lossy().to_string();

    let latency = Arc::new(LatencyLogger::default());
    let dash = Arc::new(DashboardState::new(BotState::new(true, 10_000.0), Arc::clone(&latency), None));
    let mut engine = ArbitrageEngine::new(
        config(),
        Arc::new(ex.clone()),
        Arc::new(ex.clone()),
        latency,
        BotState::new(true, 10_000.0),
    )
    .unwrap()
    .with_dashboard(Arc::clone(&dash))
    .with_state_path(path_str.clone());

    engine.run_cycle().await.unwrap();

    assert_eq!(dash.bot.read().await.cycle_count, 1);
    assert_eq!(dash.cycles.read().await.len(), 1);
    assert_eq!(dash.opportunities.read().await.len(), 1);
    assert!(dash.risk.read().await.is_some());

    let saved = storage::load_state(Some(&path_str)).unwrap().unwrap();
    assert_eq!(saved.cycle_count, 1);
    assert_eq!(saved.open_positions().count(), 1);

    // A fresh engine restored from the file does not re-enter the market.
    let mut restored = engine_with_state(&ex, saved);
    let report = restored.run_cycle().await.unwrap();
    assert_eq!(report.opportunities_found, 0);
    assert_eq!(report.cycle_number, 2);

    storage::delete_state(Some(&path_str)).unwrap();
}

fn engine_with_state(ex: &MockExchange, state: BotState) -> ArbitrageEngine {
    engine(config(), ex, state)
}

#[tokio::test]
async fn test_run_stops_at_deadline() {
    let ex = MockExchange::new(10_000.0);
    ex.add_flash_market("btc-1", "Bitcoin", 0.45, 0.50, 10);
    let mut engine = engine(config(), &ex, BotState::new(true, 10_000.0));

    tokio::time::timeout(
        Duration::from_secs(5),
        engine.run(Duration::from_millis(20), Some(Duration::from_millis(150))),
    )
    .await
    .expect("run should stop at its deadline")
    .unwrap();

    assert!(engine.state().cycle_count >= 1);
    assert_eq!(engine.positions().open_positions().len(), 1);
}
