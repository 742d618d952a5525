//! Microstructure sniper.
//!
//! Watches the YES price of short-dated liquid markets and buys the rebound
//! after a panic drop: price at least 15% under its rolling mean while
//! recent volume runs at twice the average.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use super::SignalStrategy;
use crate::types::{MarketSnapshot, Side, TradeSignal};

pub const STRATEGY_ID: &str = "SNIPER_MICRO_V1";

const BUFFER_LEN: usize = 60;
const MIN_POINTS: usize = 6;

#[derive(Debug, Clone, Copy)]
struct Tick {
    price: f64,
    volume: f64,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PriceBuffer {
    ticks: VecDeque<Tick>,
}

impl PriceBuffer {
    fn push(&mut self, tick: Tick) {
        self.ticks.push_back(tick);
        while self.ticks.len() > BUFFER_LEN {
            self.ticks.pop_front();
        }
    }

    fn mean_price(&self) -> f64 {
        if self.ticks.is_empty() {
            return 0.0;
        }
        self.ticks.iter().map(|t| t.price).sum::<f64>() / self.ticks.len() as f64
    }

    fn mean_volume(&self) -> f64 {
        if self.ticks.is_empty() {
            return 0.0;
        }
        self.ticks.iter().map(|t| t.volume).sum::<f64>() / self.ticks.len() as f64
    }

    /// Volume observed within `window` of `now`.
    fn recent_volume(&self, now: DateTime<Utc>, window: Duration) -> f64 {
        let cutoff = now - window;
        self.ticks
            .iter()
            .rev()
            .take_while(|t| t.at >= cutoff)
            .map(|t| t.volume)
            .sum()
    }

    fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.ticks.back().map(|t| t.at)
    }
}

pub struct SniperStrategy {
    pub stake: f64,
    pub price_drop_threshold: f64,
    pub volume_spike_multiplier: f64,
    pub min_hours_to_expiry: f64,
    pub max_hours_to_expiry: f64,
    pub min_volume_24h: f64,
    pub bid_offset_pct: f64,
    pub cooldown: Duration,
    pub volume_window: Duration,
    buffers: HashMap<String, PriceBuffer>,
    cooldowns: HashMap<String, DateTime<Utc>>,
}

impl Default for SniperStrategy {
    fn default() -> Self {
        Self {
            stake: 5.0,
            price_drop_threshold: 0.15,
            volume_spike_multiplier: 2.0,
            min_hours_to_expiry: 0.5,
            max_hours_to_expiry: 24.0,
            min_volume_24h: 10_000.0,
            bid_offset_pct: 0.01,
            cooldown: Duration::minutes(30),
            volume_window: Duration::minutes(2),
            buffers: HashMap::new(),
            cooldowns: HashMap::new(),
        }
    }
}

impl SniperStrategy {
    pub fn tracked_markets(&self) -> usize {
        self.buffers.len()
    }

    /// Forget markets not seen for `max_age`.
    pub fn cleanup(&mut self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let cutoff = now - max_age;
        let stale: Vec<String> = self
            .buffers
            .iter()
            .filter(|(_, b)| b.last_seen().map_or(true, |t| t < cutoff))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.buffers.remove(id);
            self.cooldowns.remove(id);
        }
        if !stale.is_empty() {
            debug!(removed = stale.len(), "Sniper buffers cleaned up");
        }
        stale.len()
    }
}

impl SignalStrategy for SniperStrategy {
    fn strategy_id(&self) -> &str {
        STRATEGY_ID
    }

    fn evaluate(&mut self, market: &MarketSnapshot, now: DateTime<Utc>) -> Option<TradeSignal> {
        if let Some(h) = market.hours_to_expiry {
            if h > self.max_hours_to_expiry || h < self.min_hours_to_expiry {
                return None;
            }
        }
        if market.volume_24h < self.min_volume_24h {
            return None;
        }
        if self.cooldowns.get(&market.condition_id).map_or(false, |until| now < *until) {
            return None;
        }

        let buffer = self.buffers.entry(market.condition_id.clone()).or_default();
        buffer.push(Tick {
            price: market.yes_price,
            volume: market.volume_1h,
            at: now,
        });
        if buffer.ticks.len() < MIN_POINTS {
            return None;
        }

        let mean = buffer.mean_price();
        if mean <= 0.0 {
            return None;
        }
        let current = market.yes_price;
        let drop = (mean - current) / mean;
        if drop < self.price_drop_threshold {
            return None;
        }

        let recent = buffer.recent_volume(now, self.volume_window);
        let avg = buffer.mean_volume();
        let spike = if avg > 0.0 { recent / avg } else { 0.0 };
        if spike < self.volume_spike_multiplier {
            return None;
        }

        let best_bid = market.best_bid.unwrap_or(current * 0.98);
        let entry = (best_bid * (1.0 + self.bid_offset_pct)).min(0.99);
        let expected_profit_pct = (mean - entry) / entry;
        let confidence = (drop * 2.0 + spike * 0.1).min(0.85);

        self.cooldowns.insert(market.condition_id.clone(), now + self.cooldown);

        TradeSignal::buy(STRATEGY_ID, market, Side::Yes, entry, self.stake, confidence)
            .ok()
            .map(|s| {
                s.with_expected_value(self.stake * expected_profit_pct).with_reason(
                    format!("panic_drop_{:.0}%_vol_{spike:.1}x", drop * 100.0),
                    serde_json::json!({
                        "price_drop_pct": drop,
                        "mean_price": mean,
                        "current_price": current,
                        "best_bid": best_bid,
                        "volume_spike": spike,
                        "recent_volume": recent,
                        "avg_volume": avg,
                        "expected_profit_pct": expected_profit_pct,
                        "order_type": "LIMIT",
                        "limit_price": entry,
                    }),
                )
            })
    }

    fn max_daily_trades(&self) -> u32 {
        30
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "strategy_id": STRATEGY_ID,
            "price_drop_threshold": self.price_drop_threshold,
            "volume_spike_multiplier": self.volume_spike_multiplier,
            "expiry_hours": [self.min_hours_to_expiry, self.max_hours_to_expiry],
            "min_volume_24h": self.min_volume_24h,
            "stake": self.stake,
        })
    }
}
