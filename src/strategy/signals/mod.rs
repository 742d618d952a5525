//! Directional signal strategies.
//!
//! Each strategy looks at one [`MarketSnapshot`] at a time and may propose a
//! [`TradeSignal`]. A [`StrategyRunner`] wraps every strategy with the
//! bookkeeping they all share (daily trade limit, one signal per market per
//! day, counters) and the [`StrategyRegistry`] fans the scanned markets out
//! to every enabled runner.

pub mod contrarian;
pub mod flash_sniper;
pub mod sniper;
pub mod tail;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::config::StrategiesConfig;
use crate::types::{MarketSnapshot, TradeSignal};

pub use contrarian::ContrarianNoStrategy;
pub use flash_sniper::FlashSniperStrategy;
pub use sniper::SniperStrategy;
pub use tail::TailStrategy;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

pub trait SignalStrategy: Send {
    fn strategy_id(&self) -> &str;

    /// Evaluate one market. Strategies that keep history use `now` as the
    /// observation time.
    fn evaluate(&mut self, market: &MarketSnapshot, now: DateTime<Utc>) -> Option<TradeSignal>;

    fn max_daily_trades(&self) -> u32;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Parameters for logs and the `status` command.
    fn describe(&self) -> serde_json::Value {
        serde_json::json!({ "strategy_id": self.strategy_id() })
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StrategyStats {
    pub strategy_id: String,
    pub enabled: bool,
    pub trades_today: u32,
    pub max_daily_trades: u32,
    pub signals_generated: u64,
    pub signals_executed: u64,
    pub markets_signalled_today: usize,
}

pub struct StrategyRunner {
    strategy: Box<dyn SignalStrategy>,
    enabled: bool,
    trades_today: u32,
    day: NaiveDate,
    signalled: HashSet<String>,
    signals_generated: u64,
    signals_executed: u64,
}

impl StrategyRunner {
    pub fn new(strategy: Box<dyn SignalStrategy>) -> Self {
        let enabled = strategy.is_enabled();
        Self {
            strategy,
            enabled,
            trades_today: 0,
            day: Utc::now().date_naive(),
            signalled: HashSet::new(),
            signals_generated: 0,
            signals_executed: 0,
        }
    }

    pub fn strategy_id(&self) -> &str {
        self.strategy.strategy_id()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Pause or resume, e.g. after the exchange rejects our credentials.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            info!(strategy = self.strategy_id(), enabled, "Strategy toggled");
        }
        self.enabled = enabled;
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            debug!(strategy = self.strategy_id(), "Daily strategy counters reset");
            self.day = today;
            self.trades_today = 0;
            self.signalled.clear();
        }
    }

    /// Run the strategy on one market, subject to the daily limit and the
    /// one-signal-per-market-per-day rule. Every emitted signal counts as a
    /// trade against the limit.
    pub fn process(&mut self, market: &MarketSnapshot, now: DateTime<Utc>) -> Option<TradeSignal> {
        if !self.enabled {
            return None;
        }
        self.roll_day(now);
        if self.trades_today >= self.strategy.max_daily_trades() {
            return None;
        }
        if self.signalled.contains(&market.condition_id) {
            return None;
        }

        let mut signal = self.strategy.evaluate(market, now)?;
        if signal.snapshot.is_none() {
            signal.snapshot = Some(market.clone());
        }
        self.signalled.insert(market.condition_id.clone());
        self.trades_today += 1;
        self.signals_generated += 1;
        info!(signal = %signal, "Signal generated");
        Some(signal)
    }

    pub fn record_execution(&mut self) {
        self.signals_executed += 1;
    }

    pub fn stats(&self) -> StrategyStats {
        StrategyStats {
            strategy_id: self.strategy_id().to_string(),
            enabled: self.enabled,
            trades_today: self.trades_today,
            max_daily_trades: self.strategy.max_daily_trades(),
            signals_generated: self.signals_generated,
            signals_executed: self.signals_executed,
            markets_signalled_today: self.signalled.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StrategyRegistry {
    runners: Vec<StrategyRunner>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the strategies switched on in `[strategies]`.
    pub fn from_config(config: &StrategiesConfig) -> Result<Self> {
        let mut registry = Self::new();
        if config.flash_sniper {
            registry.register(Box::new(FlashSniperStrategy::new()?));
        }
        if config.sniper {
            registry.register(Box::new(SniperStrategy::default()));
        }
        if config.tail {
            registry.register(Box::new(TailStrategy::new()?));
        }
        if config.contrarian {
            registry.register(Box::new(ContrarianNoStrategy::new()?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, strategy: Box<dyn SignalStrategy>) {
        info!(strategy = strategy.strategy_id(), config = %strategy.describe(), "Registered strategy");
        self.runners.retain(|r| r.strategy_id() != strategy.strategy_id());
        self.runners.push(StrategyRunner::new(strategy));
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    pub fn get_mut(&mut self, strategy_id: &str) -> Option<&mut StrategyRunner> {
        self.runners.iter_mut().find(|r| r.strategy_id() == strategy_id)
    }

    pub fn set_all_enabled(&mut self, enabled: bool) {
        for r in &mut self.runners {
            r.set_enabled(enabled);
        }
    }

    /// Every signal from every enabled strategy over `markets`.
    pub fn process_all(&mut self, markets: &[MarketSnapshot], now: DateTime<Utc>) -> Vec<TradeSignal> {
        let mut signals = Vec::new();
        for market in markets {
            for runner in &mut self.runners {
                if let Some(s) = runner.process(market, now) {
                    signals.push(s);
                }
            }
        }
        signals
    }

    pub fn stats(&self) -> Vec<StrategyStats> {
        self.runners.iter().map(StrategyRunner::stats).collect()
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Case-insensitive whole-word matcher over a keyword list.
pub(crate) fn keyword_regex(keywords: &[&str]) -> Result<regex::Regex> {
    let alternation = keywords
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Ok(regex::Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{MarketCategory, Side};

    pub(crate) fn snapshot(question: &str, yes: f64, volume: f64) -> MarketSnapshot {
        MarketSnapshot {
            condition_id: format!("cond-{}", question.len()),
            question: question.to_string(),
            category: MarketCategory::Other,
            yes_token_id: Some("yes-token".into()),
            no_token_id: Some("no-token".into()),
            yes_price: yes,
            no_price: 1.0 - yes,
            best_bid: None,
            best_ask: None,
            spread_bps: 0.0,
            volume_24h: volume,
            volume_1h: volume / 24.0,
            liquidity: 1000.0,
            hours_to_expiry: Some(48.0),
        }
    }

    /// Signals on every market it sees.
    struct Always {
        limit: u32,
    }

    impl SignalStrategy for Always {
        fn strategy_id(&self) -> &str {
            "ALWAYS"
        }

        fn evaluate(&mut self, market: &MarketSnapshot, _now: DateTime<Utc>) -> Option<TradeSignal> {
            TradeSignal::buy("ALWAYS", market, Side::Yes, market.yes_price, 1.0, 0.5).ok()
        }

        fn max_daily_trades(&self) -> u32 {
            self.limit
        }
    }

    fn with_id(mut s: MarketSnapshot, id: &str) -> MarketSnapshot {
        s.condition_id = id.to_string();
        s
    }

    #[test]
    fn test_runner_dedupes_per_day() {
        let mut runner = StrategyRunner::new(Box::new(Always { limit: 10 }));
        let m = snapshot("Will it rain?", 0.3, 1000.0);
        let now = Utc::now();
        let s = runner.process(&m, now).unwrap();
        assert!(s.snapshot.is_some());
        assert!(runner.process(&m, now).is_none());

        // A new day clears the dedupe set.
        assert!(runner.process(&m, now + chrono::Duration::days(1)).is_some());
        assert_eq!(runner.stats().signals_generated, 2);
        assert_eq!(runner.stats().trades_today, 1);
    }

    #[test]
    fn test_runner_daily_limit() {
        let mut runner = StrategyRunner::new(Box::new(Always { limit: 2 }));
        let now = Utc::now();
        let base = snapshot("q", 0.3, 1000.0);
        assert!(runner.process(&with_id(base.clone(), "a"), now).is_some());
        assert!(runner.process(&with_id(base.clone(), "b"), now).is_some());
        assert!(runner.process(&with_id(base, "c"), now).is_none());
    }

    #[test]
    fn test_registry_pause() {
        let mut reg = StrategyRegistry::new();
        reg.register(Box::new(Always { limit: 10 }));
        let markets = vec![snapshot("a", 0.3, 1.0), snapshot("bb", 0.3, 1.0)];
        assert_eq!(reg.process_all(&markets, Utc::now()).len(), 2);

        reg.set_all_enabled(false);
        let fresh = vec![snapshot("ccc", 0.3, 1.0)];
        assert!(reg.process_all(&fresh, Utc::now()).is_empty());
        assert!(!reg.stats()[0].enabled);
    }

    #[test]
    fn test_registry_from_config() {
        let reg = StrategyRegistry::from_config(&StrategiesConfig::default()).unwrap();
        assert_eq!(reg.len(), 4);
        let ids: Vec<String> = reg.stats().into_iter().map(|s| s.strategy_id).collect();
        assert!(ids.contains(&"FLASH_SNIPER".to_string()));
        assert!(ids.contains(&"SNIPER_MICRO_V1".to_string()));
        assert!(ids.contains(&"TAIL_BETTING_V1".to_string()));
        assert!(ids.contains(&"CONTRARIAN_NO".to_string()));
    }

    #[test]
    fn test_keyword_regex_word_boundary() {
        let re = keyword_regex(&["war", "bank run"]).unwrap();
        assert!(re.is_match("Will WAR break out?"));
        assert!(re.is_match("A bank run in 2025?"));
        assert!(!re.is_match("Will Warner Bros merge?"));
    }
}
