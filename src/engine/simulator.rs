//! Paper-trading fill simulator.
//!
//! Generates synthetic order books around a reference price and walks them
//! to fill market orders, so paper runs see slippage, fees, latency, partial
//! fills and the occasional rejected order.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::types::{OrderBook, OrderResult, OrderSide, PriceLevel};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub taker_fee_rate: f64,
    pub maker_fee_rate: f64,
    pub avg_latency_ms: f64,
    pub latency_std_ms: f64,
    pub failure_rate: f64,
    pub partial_fill_rate: f64,
    /// Chance a resting limit order is filled.
    pub limit_fill_probability: f64,
    pub book_spread: f64,
    pub book_levels: usize,
    pub avg_level_size: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            taker_fee_rate: 0.02,
            maker_fee_rate: 0.0,
            avg_latency_ms: 100.0,
            latency_std_ms: 50.0,
            failure_rate: 0.02,
            partial_fill_rate: 0.05,
            limit_fill_probability: 0.8,
            book_spread: 0.02,
            book_levels: 10,
            avg_level_size: 500.0,
        }
    }
}

const TICK: f64 = 0.01;
const MIN_LATENCY_MS: f64 = 10.0;
/// Fills below this fraction of the request count as partial.
const FULL_FILL_RATIO: f64 = 0.99;

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Running simulator counters, persisted with the bot state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationStats {
    pub total_orders: u64,
    pub failed_orders: u64,
    pub partial_fills: u64,
    /// Sum of absolute slippage percentages over filled market orders.
    pub total_slippage_pct: f64,
}

impl SimulationStats {
    fn rate(&self, count: u64) -> f64 {
        if self.total_orders == 0 {
            0.0
        } else {
            count as f64 / self.total_orders as f64 * 100.0
        }
    }

    pub fn failure_rate(&self) -> f64 {
        self.rate(self.failed_orders)
    }

    pub fn partial_fill_rate(&self) -> f64 {
        self.rate(self.partial_fills)
    }

    pub fn avg_slippage_pct(&self) -> f64 {
        if self.total_orders == 0 {
            0.0
        } else {
            self.total_slippage_pct / self.total_orders as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct SlippageSimulator {
    config: SimulatorConfig,
    rng: StdRng,
    books: HashMap<String, OrderBook>,
    stats: SimulationStats,
}

impl std::fmt::Debug for SlippageSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlippageSimulator")
            .field("books", &self.books.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Default for SlippageSimulator {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl SlippageSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
            books: HashMap::new(),
            stats: SimulationStats::default(),
        }
    }

    /// Deterministic simulator for tests and reproducible dry runs.
    pub fn with_seed(config: SimulatorConfig, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new(config)
        }
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn restore_stats(&mut self, stats: SimulationStats) {
        self.stats = stats;
    }

    pub fn reset_stats(&mut self) {
        self.stats = SimulationStats::default();
    }

    pub fn orderbook(&self, token_id: &str) -> Option<&OrderBook> {
        self.books.get(token_id)
    }

    fn latency(&mut self) -> f64 {
        let sampled = Normal::new(self.config.avg_latency_ms, self.config.latency_std_ms)
            .map(|n| n.sample(&mut self.rng))
            .unwrap_or(self.config.avg_latency_ms);
        sampled.max(MIN_LATENCY_MS)
    }

    /// Build and store a synthetic book around `mid`.
    ///
    /// Depth thins away from the touch; levels that would fall outside
    /// (0, 1) are dropped.
    pub fn generate_orderbook(&mut self, token_id: &str, mid: f64) -> OrderBook {
        let half_spread = self.config.book_spread / 2.0;
        let mut bids = Vec::with_capacity(self.config.book_levels);
        let mut asks = Vec::with_capacity(self.config.book_levels);

        for i in 0..self.config.book_levels {
            let depth = self.config.avg_level_size * (1.0 - i as f64 * 0.1);
            let bid_size = depth * self.rng.gen_range(0.5..1.5);
            let ask_size = depth * self.rng.gen_range(0.5..1.5);
            let bid = round4(mid - half_spread - i as f64 * TICK);
            let ask = round4(mid + half_spread + i as f64 * TICK);
            if bid > 0.0 && bid_size > 0.0 {
                bids.push(PriceLevel { price: bid, size: round2(bid_size) });
            }
            if ask < 1.0 && ask_size > 0.0 {
                asks.push(PriceLevel { price: ask, size: round2(ask_size) });
            }
        }

        let book = OrderBook {
            token_id: token_id.to_string(),
            bids,
            asks,
        };
        self.books.insert(token_id.to_string(), book.clone());
        book
    }

    /// Rebuild a token's book so its touch on `side` sits at `price`.
    pub fn anchor_orderbook(&mut self, token_id: &str, side: OrderSide, price: f64) -> OrderBook {
        let half_spread = self.config.book_spread / 2.0;
        let mid = match side {
            OrderSide::Buy => price - half_spread,
            OrderSide::Sell => price + half_spread,
        };
        self.generate_orderbook(token_id, mid.clamp(0.01, 0.99))
    }

    fn book_for(&mut self, token_id: &str) -> OrderBook {
        match self.books.get(token_id) {
            Some(book) => book.clone(),
            None => self.generate_orderbook(token_id, 0.5),
        }
    }

    /// Fill a market order worth `amount_usdc` against the stored book.
    pub fn simulate_market_order(&mut self, token_id: &str, side: OrderSide, amount_usdc: f64) -> OrderResult {
        self.stats.total_orders += 1;
        let latency_ms = self.latency();
        let book = self.book_for(token_id);
        self.fill_market(token_id, side, amount_usdc, &book, latency_ms)
    }

    fn fill_market(
        &mut self,
        token_id: &str,
        side: OrderSide,
        amount_usdc: f64,
        book: &OrderBook,
        latency_ms: f64,
    ) -> OrderResult {
        let fail = |error: &str| {
            let mut r = OrderResult::failed(token_id, side, amount_usdc, error);
            r.latency_ms = latency_ms;
            r
        };

        if self.rng.gen::<f64>() < self.config.failure_rate {
            self.stats.failed_orders += 1;
            debug!(token_id, "Simulated order failure");
            return fail("Simulated order failure (market conditions)");
        }

        let levels = match side {
            OrderSide::Buy => &book.asks,
            OrderSide::Sell => &book.bids,
        };
        let Some(best_price) = levels.first().map(|l| l.price) else {
            self.stats.failed_orders += 1;
            return fail("No liquidity available");
        };

        let mut remaining = amount_usdc;
        let mut contracts = 0.0;
        let mut cost = 0.0;
        for level in levels {
            if remaining <= 0.0 {
                break;
            }
            let value = remaining.min(level.size * level.price);
            contracts += value / level.price;
            cost += value;
            remaining -= value;
        }

        let filled_ratio = if amount_usdc > 0.0 { (amount_usdc - remaining) / amount_usdc } else { 0.0 };
        let partial = filled_ratio < FULL_FILL_RATIO || self.rng.gen::<f64>() < self.config.partial_fill_rate;
        if partial {
            self.stats.partial_fills += 1;
            let scale = self.rng.gen_range(0.7..0.95);
            contracts *= scale;
            cost *= scale;
        }

        if contracts <= 0.0 {
            self.stats.failed_orders += 1;
            return fail("Insufficient liquidity");
        }

        let avg_price = cost / contracts;
        let slippage = match side {
            OrderSide::Buy => avg_price - best_price,
            OrderSide::Sell => best_price - avg_price,
        };
        let slippage_pct = if best_price > 0.0 { slippage / best_price * 100.0 } else { 0.0 };
        let fee = cost * self.config.taker_fee_rate;
        self.stats.total_slippage_pct += slippage_pct.abs();

        debug!(
            token_id,
            side = %side,
            amount = amount_usdc,
            filled = contracts,
            avg_price = format!("{avg_price:.4}"),
            slippage_pct = format!("{slippage_pct:.4}"),
            "Simulated market order"
        );

        OrderResult {
            success: true,
            order_id: Some(format!("paper-{}", uuid::Uuid::new_v4())),
            token_id: token_id.to_string(),
            side,
            requested_size: amount_usdc / best_price,
            filled_size: round4(contracts),
            avg_price: round4(avg_price),
            fee: round4(fee),
            slippage_pct: round4(slippage_pct),
            latency_ms: round2(latency_ms),
            partial,
            error: None,
        }
    }

    /// A limit that crosses the touch executes as a market order; otherwise
    /// it rests and fills at the limit price with a fixed probability.
    pub fn simulate_limit_order(&mut self, token_id: &str, side: OrderSide, price: f64, size: f64) -> OrderResult {
        self.stats.total_orders += 1;
        let latency_ms = self.latency();
        let book = self.book_for(token_id);

        let crosses = match side {
            OrderSide::Buy => book.best_ask().map(|ask| price >= ask).unwrap_or(false),
            OrderSide::Sell => book.best_bid().map(|bid| price <= bid).unwrap_or(false),
        };
        if crosses {
            return self.fill_market(token_id, side, size * price, &book, latency_ms);
        }

        if self.rng.gen::<f64>() > self.config.limit_fill_probability {
            let mut r = OrderResult::failed(token_id, side, size, "Limit order not filled (simulated)");
            r.order_id = Some(format!("paper-{}", uuid::Uuid::new_v4()));
            r.latency_ms = latency_ms;
            return r;
        }

        OrderResult {
            success: true,
            order_id: Some(format!("paper-{}", uuid::Uuid::new_v4())),
            token_id: token_id.to_string(),
            side,
            requested_size: size,
            filled_size: size,
            avg_price: price,
            fee: round4(size * price * self.config.maker_fee_rate),
            slippage_pct: 0.0,
            latency_ms: round2(latency_ms),
            partial: false,
            error: None,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn no_noise() -> SimulatorConfig {
        SimulatorConfig {
            failure_rate: 0.0,
            partial_fill_rate: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_generated_book_shape() {
        let mut sim = SlippageSimulator::with_seed(SimulatorConfig::default(), 7);
        let book = sim.generate_orderbook("t", 0.50);
        assert_eq!(book.asks.len(), 10);
        assert_eq!(book.bids.len(), 10);
        assert!((book.best_ask().unwrap() - 0.51).abs() < 1e-9);
        assert!((book.best_bid().unwrap() - 0.49).abs() < 1e-9);
        assert!((book.asks[9].price - 0.60).abs() < 1e-9);
        // Level 0 size is 500 * U(0.5, 1.5).
        assert!(book.asks[0].size >= 250.0 && book.asks[0].size <= 750.0);
    }

    #[test]
    fn test_book_near_edges_drops_invalid_levels() {
        let mut sim = SlippageSimulator::with_seed(SimulatorConfig::default(), 7);
        let book = sim.generate_orderbook("t", 0.03);
        assert!(book.bids.iter().all(|l| l.price > 0.0));
        assert!(book.bids.len() < 10);
        assert_eq!(book.asks.len(), 10);
    }

    #[test]
    fn test_small_market_order_fills_at_touch() {
        let mut sim = SlippageSimulator::with_seed(no_noise(), 1);
        sim.generate_orderbook("t", 0.50);
        let r = sim.simulate_market_order("t", OrderSide::Buy, 10.0);
        assert!(r.success);
        assert!(!r.partial);
        assert!((r.avg_price - 0.51).abs() < 1e-9);
        assert!((r.filled_size - 10.0 / 0.51).abs() < 1e-3);
        assert!((r.fee - 0.2).abs() < 1e-4);
        assert!(r.latency_ms >= MIN_LATENCY_MS);
        assert!(r.order_id.unwrap().starts_with("paper-"));
    }

    #[test]
    fn test_large_order_walks_book_and_goes_partial() {
        let mut sim = SlippageSimulator::with_seed(no_noise(), 3);
        sim.generate_orderbook("t", 0.50);
        // Far more than the ten levels can absorb.
        let r = sim.simulate_market_order("t", OrderSide::Buy, 100_000.0);
        assert!(r.success);
        assert!(r.partial);
        assert!(r.avg_price > 0.51);
        assert!(r.slippage_pct > 0.0);
        assert_eq!(sim.stats().partial_fills, 1);
    }

    #[test]
    fn test_failure_rate_one_always_fails() {
        let mut sim = SlippageSimulator::with_seed(
            SimulatorConfig {
                failure_rate: 1.0,
                ..Default::default()
            },
            5,
        );
        let r = sim.simulate_market_order("t", OrderSide::Buy, 10.0);
        assert!(!r.success);
        assert_eq!(sim.stats().failed_orders, 1);
        assert!((sim.stats().failure_rate() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_crossing_limit_becomes_market() {
        let mut sim = SlippageSimulator::with_seed(no_noise(), 9);
        sim.generate_orderbook("t", 0.50);
        let r = sim.simulate_limit_order("t", OrderSide::Buy, 0.55, 10.0);
        assert!(r.success);
        // Taker fee applies on a crossing order.
        assert!(r.fee > 0.0);
        assert!((r.avg_price - 0.51).abs() < 1e-9);
    }

    #[test]
    fn test_resting_limit_fills_at_limit_without_fee() {
        let mut sim = SlippageSimulator::with_seed(
            SimulatorConfig {
                limit_fill_probability: 1.0,
                ..no_noise()
            },
            11,
        );
        sim.generate_orderbook("t", 0.50);
        let r = sim.simulate_limit_order("t", OrderSide::Buy, 0.40, 25.0);
        assert!(r.success);
        assert_eq!(r.avg_price, 0.40);
        assert_eq!(r.filled_size, 25.0);
        assert_eq!(r.fee, 0.0);

        let mut never = SlippageSimulator::with_seed(
            SimulatorConfig {
                limit_fill_probability: 0.0,
                ..no_noise()
            },
            11,
        );
        never.generate_orderbook("t", 0.50);
        assert!(!never.simulate_limit_order("t", OrderSide::Buy, 0.40, 25.0).success);
    }

    #[test]
    fn test_anchor_puts_touch_at_price() {
        let mut sim = SlippageSimulator::with_seed(no_noise(), 2);
        let book = sim.anchor_orderbook("t", OrderSide::Buy, 0.47);
        assert!((book.best_ask().unwrap() - 0.47).abs() < 1e-9);
        let book = sim.anchor_orderbook("t", OrderSide::Sell, 0.47);
        assert!((book.best_bid().unwrap() - 0.47).abs() < 1e-9);
    }

    #[test]
    fn test_stats_rates() {
        let stats = SimulationStats {
            total_orders: 20,
            failed_orders: 1,
            partial_fills: 2,
            total_slippage_pct: 4.0,
        };
        assert!((stats.failure_rate() - 5.0).abs() < 1e-9);
        assert!((stats.partial_fill_rate() - 10.0).abs() < 1e-9);
        assert!((stats.avg_slippage_pct() - 0.2).abs() < 1e-9);
        assert_eq!(SimulationStats::default().avg_slippage_pct(), 0.0);
    }
}
