//! Dislocation detection.
//!
//! Tracks the combined UP + DOWN price per market and flags sudden moves
//! away from its recent average. A narrowing total is the moment to
//! complete a hedge cheaply.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::info;

const EVENT_LOG_CAPACITY: usize = 100;
const DEDUPE_SECONDS: i64 = 5;

#[derive(Debug, Clone)]
pub struct DislocationConfig {
    pub window_size: usize,
    /// Minimum relative move, in percent.
    pub threshold_pct: f64,
    /// Minimum absolute move, in dollars.
    pub min_spread_change: f64,
    pub lookback_secs: i64,
}

impl Default for DislocationConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            threshold_pct: 2.0,
            min_spread_change: 0.01,
            lookback_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Widening,
    Narrowing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Widening => write!(f, "widening"),
            Direction::Narrowing => write!(f, "narrowing"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PricePoint {
    at: DateTime<Utc>,
    spread: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DislocationEvent {
    pub market_id: String,
    pub direction: Direction,
    pub old_spread: f64,
    pub new_spread: f64,
    /// Signed change from the average.
    pub magnitude: f64,
    pub change_pct: f64,
    pub timestamp: DateTime<Utc>,
}

impl DislocationEvent {
    /// A narrowing total that is still under $1 lets the second leg be
    /// bought cheaper.
    pub fn is_favorable(&self) -> bool {
        self.direction == Direction::Narrowing && self.new_spread < 1.0
    }
}

/// Summary of one market's window.
#[derive(Debug, Clone, Serialize)]
pub struct SpreadStats {
    pub count: usize,
    pub current: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Default)]
pub struct DislocationDetector {
    config: DislocationConfig,
    history: HashMap<String, VecDeque<PricePoint>>,
    last_event: HashMap<String, DateTime<Utc>>,
    events: VecDeque<DislocationEvent>,
}

impl DislocationDetector {
    pub fn new(config: DislocationConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn update_price(&mut self, market_id: &str, up: f64, down: f64) -> Option<DislocationEvent> {
        self.update_price_at(market_id, up, down, Utc::now())
    }

    pub fn update_price_at(
        &mut self,
        market_id: &str,
        up: f64,
        down: f64,
        now: DateTime<Utc>,
    ) -> Option<DislocationEvent> {
        let window = self.config.window_size.max(2);
        let history = self.history.entry(market_id.to_string()).or_default();
        history.push_back(PricePoint { at: now, spread: up + down });
        while history.len() > window {
            history.pop_front();
        }

        let cutoff = now - Duration::seconds(self.config.lookback_secs);
        let recent: Vec<f64> = history.iter().filter(|p| p.at >= cutoff).map(|p| p.spread).collect();
        if recent.len() < 2 {
            return None;
        }

        // The newest point is what we compare against the average.
        let previous = &recent[..recent.len() - 1];
        let avg = previous.iter().sum::<f64>() / previous.len() as f64;
        let current = up + down;
        let change = current - avg;
        let change_pct = if avg > 0.0 { change / avg * 100.0 } else { 0.0 };

        if change_pct.abs() < self.config.threshold_pct || change.abs() < self.config.min_spread_change {
            return None;
        }

        if let Some(last) = self.last_event.get(market_id) {
            if now - *last < Duration::seconds(DEDUPE_SECONDS) {
                return None;
            }
        }
        self.last_event.insert(market_id.to_string(), now);

        let event = DislocationEvent {
            market_id: market_id.to_string(),
            direction: if change > 0.0 { Direction::Widening } else { Direction::Narrowing },
            old_spread: avg,
            new_spread: current,
            magnitude: change,
            change_pct,
            timestamp: now,
        };
        info!(
            market_id,
            direction = %event.direction,
            old_spread = format!("{avg:.4}"),
            new_spread = format!("{current:.4}"),
            change_pct = format!("{change_pct:.2}%"),
            "Dislocation detected"
        );

        self.events.push_back(event.clone());
        while self.events.len() > EVENT_LOG_CAPACITY {
            self.events.pop_front();
        }
        Some(event)
    }

    pub fn spread_stats(&self, market_id: &str) -> Option<SpreadStats> {
        let history = self.history.get(market_id)?;
        let current = history.back()?.spread;
        let spreads = history.iter().map(|p| p.spread);
        Some(SpreadStats {
            count: history.len(),
            current,
            average: spreads.clone().sum::<f64>() / history.len() as f64,
            min: spreads.clone().fold(f64::INFINITY, f64::min),
            max: spreads.fold(f64::NEG_INFINITY, f64::max),
        })
    }

    pub fn clear_market(&mut self, market_id: &str) {
        self.history.remove(market_id);
        self.last_event.remove(market_id);
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.last_event.clear();
    }

    /// Most recent events, newest first.
    pub fn recent_events(&self, limit: usize) -> Vec<DislocationEvent> {
        self.events.iter().rev().take(limit).cloned().collect()
    }

    pub fn tracked_markets(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_needs_two_points() {
        let mut d = DislocationDetector::default();
        assert!(d.update_price_at("m", 0.5, 0.5, t0()).is_none());
    }

    #[test]
    fn test_narrowing_event() {
        let mut d = DislocationDetector::new(DislocationConfig::default());
        let start = t0();
        for i in 0..5 {
            assert!(d.update_price_at("m", 0.50, 0.50, start + Duration::seconds(i)).is_none());
        }
        let ev = d.update_price_at("m", 0.47, 0.49, start + Duration::seconds(5)).unwrap();
        assert_eq!(ev.direction, Direction::Narrowing);
        assert!((ev.old_spread - 1.0).abs() < 1e-9);
        assert!((ev.magnitude + 0.04).abs() < 1e-9);
        assert!((ev.change_pct + 4.0).abs() < 1e-6);
        assert!(ev.is_favorable());
        assert_eq!(d.recent_events(10).len(), 1);
    }

    #[test]
    fn test_widening_not_favorable() {
        let mut d = DislocationDetector::new(DislocationConfig::default());
        let start = t0();
        d.update_price_at("m", 0.48, 0.48, start);
        let ev = d.update_price_at("m", 0.52, 0.50, start + Duration::seconds(1)).unwrap();
        assert_eq!(ev.direction, Direction::Widening);
        assert!(!ev.is_favorable());
    }

    #[test]
    fn test_small_moves_ignored() {
        let mut d = DislocationDetector::new(DislocationConfig::default());
        let start = t0();
        d.update_price_at("m", 0.50, 0.50, start);
        // 1.5% move: under the relative threshold.
        assert!(d.update_price_at("m", 0.49, 0.495, start + Duration::seconds(1)).is_none());

        // Large relative change on a tiny total, but under one cent absolute.
        let mut d = DislocationDetector::new(DislocationConfig::default());
        d.update_price_at("x", 0.05, 0.05, start);
        assert!(d.update_price_at("x", 0.05, 0.055, start + Duration::seconds(1)).is_none());
    }

    #[test]
    fn test_dedupe_within_five_seconds() {
        let mut d = DislocationDetector::new(DislocationConfig::default());
        let start = t0();
        d.update_price_at("m", 0.50, 0.50, start);
        assert!(d.update_price_at("m", 0.45, 0.50, start + Duration::seconds(1)).is_some());
        assert!(d.update_price_at("m", 0.40, 0.50, start + Duration::seconds(3)).is_none());
        assert!(d.update_price_at("m", 0.30, 0.50, start + Duration::seconds(7)).is_some());
    }

    #[test]
    fn test_lookback_excludes_stale_points() {
        let mut d = DislocationDetector::new(DislocationConfig::default());
        let start = t0();
        d.update_price_at("m", 0.30, 0.30, start);
        // The old point is outside the 60s lookback, so nothing to compare.
        assert!(d.update_price_at("m", 0.50, 0.50, start + Duration::seconds(120)).is_none());
    }

    #[test]
    fn test_window_capped_and_clear() {
        let mut d = DislocationDetector::new(DislocationConfig {
            window_size: 3,
            ..Default::default()
        });
        let start = t0();
        for i in 0..10 {
            d.update_price_at("m", 0.5, 0.5, start + Duration::seconds(i));
        }
        assert_eq!(d.spread_stats("m").unwrap().count, 3);
        assert_eq!(d.tracked_markets(), 1);
        d.clear_market("m");
        assert!(d.spread_stats("m").is_none());
        assert_eq!(d.tracked_markets(), 0);
    }
}
