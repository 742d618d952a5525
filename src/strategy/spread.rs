//! Spread analysis.
//!
//! Buying one UP and one DOWN contract costs `up_ask + down_ask` and always
//! settles at exactly $1, so any total below $1 is locked-in profit. The
//! analyzer decides whether that margin is worth taking given the time left,
//! the thinner leg's depth and the position cap.

use chrono::Utc;
use tracing::{debug, info};

use crate::config::{RiskConfig, MARKET_CLOSE_BUFFER_SECONDS};
use crate::types::{ArbitrageOpportunity, Market, OrderBook};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SpreadConfig {
    /// Minimum profit per contract, in dollars.
    pub min_profit_threshold: f64,
    /// Minimum USD depth on each leg.
    pub min_liquidity: f64,
    pub max_position_size: f64,
}

impl Default for SpreadConfig {
    fn default() -> Self {
        Self {
            min_profit_threshold: 0.04,
            min_liquidity: 100.0,
            max_position_size: 1000.0,
        }
    }
}

impl From<&RiskConfig> for SpreadConfig {
    fn from(risk: &RiskConfig) -> Self {
        Self {
            min_profit_threshold: risk.min_profit_threshold,
            min_liquidity: risk.min_liquidity,
            max_position_size: risk.max_position_size_usdc,
        }
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SpreadResult {
    pub is_profitable: bool,
    pub up_price: f64,
    pub down_price: f64,
    pub up_liquidity: f64,
    pub down_liquidity: f64,
    pub total_cost: f64,
    pub profit_per_contract: f64,
    pub max_contracts: f64,
    pub expected_profit: f64,
    pub reason: String,
}

impl SpreadResult {
    fn rejected(mut self, reason: impl Into<String>) -> Self {
        self.is_profitable = false;
        self.max_contracts = 0.0;
        self.expected_profit = 0.0;
        self.reason = reason.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SpreadAnalyzer {
    config: SpreadConfig,
}

impl SpreadAnalyzer {
    pub fn new(config: SpreadConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SpreadConfig {
        &self.config
    }

    pub fn analyze(
        &self,
        market: &Market,
        up_price: f64,
        down_price: f64,
        up_liquidity: f64,
        down_liquidity: f64,
    ) -> SpreadResult {
        let total_cost = up_price + down_price;
        let profit_per_contract = 1.0 - total_cost;
        let min_liquidity = up_liquidity.min(down_liquidity);

        let unit_cost = total_cost.max(0.01);
        let max_contracts = (min_liquidity / unit_cost).min(self.config.max_position_size / unit_cost);

        let result = SpreadResult {
            is_profitable: true,
            up_price,
            down_price,
            up_liquidity,
            down_liquidity,
            total_cost,
            profit_per_contract,
            max_contracts,
            expected_profit: profit_per_contract * max_contracts,
            reason: "Profitable arbitrage opportunity".to_string(),
        };

        if market.is_closed() {
            return result.rejected("Market closed");
        }
        if let Some(secs) = market.time_to_close_seconds() {
            if secs <= MARKET_CLOSE_BUFFER_SECONDS {
                return result.rejected(format!(
                    "Market closes in {secs:.0}s (buffer: {MARKET_CLOSE_BUFFER_SECONDS:.0}s)"
                ));
            }
        }
        if total_cost >= 1.0 {
            return result.rejected(format!("Total cost {total_cost:.4} >= $1.00"));
        }
        if profit_per_contract < self.config.min_profit_threshold {
            return result.rejected(format!(
                "Profit {profit_per_contract:.4} below threshold {:.4}",
                self.config.min_profit_threshold
            ));
        }
        if min_liquidity < self.config.min_liquidity {
            return result.rejected(format!(
                "Insufficient liquidity ({min_liquidity:.2} < {:.2})",
                self.config.min_liquidity
            ));
        }

        debug!(
            market_id = %market.id,
            total_cost,
            profit = profit_per_contract,
            max_contracts,
            "Spread passes all checks"
        );
        result
    }

    /// Analyze from the two books, buying at the best ask on each side.
    pub fn analyze_orderbook(&self, market: &Market, up_book: &OrderBook, down_book: &OrderBook) -> SpreadResult {
        match (up_book.best_ask(), down_book.best_ask()) {
            (Some(up), Some(down)) => self.analyze(
                market,
                up,
                down,
                up_book.ask_liquidity_near_best(),
                down_book.ask_liquidity_near_best(),
            ),
            _ => SpreadResult {
                is_profitable: false,
                up_price: 0.0,
                down_price: 0.0,
                up_liquidity: 0.0,
                down_liquidity: 0.0,
                total_cost: 0.0,
                profit_per_contract: 0.0,
                max_contracts: 0.0,
                expected_profit: 0.0,
                reason: "No asks available".to_string(),
            },
        }
    }

    /// Turn a profitable result into a scored opportunity.
    pub fn create_opportunity(&self, market: &Market, result: &SpreadResult) -> Option<ArbitrageOpportunity> {
        if !result.is_profitable {
            return None;
        }
        let mut opp = ArbitrageOpportunity {
            market: market.clone(),
            up_price: result.up_price,
            down_price: result.down_price,
            total_cost: result.total_cost,
            profit_per_contract: result.profit_per_contract,
            up_liquidity: result.up_liquidity,
            down_liquidity: result.down_liquidity,
            max_contracts: result.max_contracts,
            timestamp: Utc::now(),
            score: 0.0,
        };
        opp.calculate_score();

        info!(
            market_id = %market.id,
            asset = market.asset.as_deref().unwrap_or("?"),
            up_price = opp.up_price,
            down_price = opp.down_price,
            total_cost = opp.total_cost,
            profit = opp.profit_per_contract,
            max_contracts = opp.max_contracts,
            score = opp.score,
            "Arbitrage opportunity detected"
        );
        Some(opp)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::flash_market;
    use crate::types::PriceLevel;

    fn analyzer() -> SpreadAnalyzer {
        SpreadAnalyzer::default()
    }

    fn book(asks: &[(f64, f64)]) -> OrderBook {
        OrderBook {
            token_id: "t".into(),
            bids: vec![],
            asks: asks.iter().map(|&(price, size)| PriceLevel { price, size }).collect(),
        }
        .normalize()
    }

    #[test]
    fn test_profitable_spread() {
        let market = flash_market(0.45, 0.50, 10);
        let r = analyzer().analyze(&market, 0.45, 0.50, 500.0, 800.0);
        assert!(r.is_profitable, "{}", r.reason);
        assert!((r.total_cost - 0.95).abs() < 1e-9);
        assert!((r.profit_per_contract - 0.05).abs() < 1e-9);
        // Liquidity bound: 500 / 0.95
        assert!((r.max_contracts - 500.0 / 0.95).abs() < 1e-6);
        assert!((r.expected_profit - 0.05 * 500.0 / 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_position_cap_bounds_contracts() {
        let market = flash_market(0.45, 0.50, 10);
        let r = analyzer().analyze(&market, 0.45, 0.50, 50_000.0, 50_000.0);
        assert!((r.max_contracts - 1000.0 / 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_no_arbitrage_at_or_above_one_dollar() {
        let market = flash_market(0.50, 0.50, 10);
        let r = analyzer().analyze(&market, 0.50, 0.50, 1000.0, 1000.0);
        assert!(!r.is_profitable);
        assert_eq!(r.max_contracts, 0.0);
        assert!(r.reason.contains(">= $1.00"));
    }

    #[test]
    fn test_below_profit_threshold() {
        let market = flash_market(0.48, 0.49, 10);
        let r = analyzer().analyze(&market, 0.48, 0.49, 1000.0, 1000.0);
        assert!(!r.is_profitable);
        assert!(r.reason.contains("below threshold"));
    }

    #[test]
    fn test_thin_leg_rejected() {
        let market = flash_market(0.45, 0.50, 10);
        let r = analyzer().analyze(&market, 0.45, 0.50, 50.0, 1000.0);
        assert!(!r.is_profitable);
        assert!(r.reason.contains("liquidity"));
    }

    #[test]
    fn test_close_buffer() {
        let mut market = flash_market(0.45, 0.50, 10);
        market.end_time = Some(Utc::now() + chrono::Duration::seconds(20));
        let r = analyzer().analyze(&market, 0.45, 0.50, 1000.0, 1000.0);
        assert!(!r.is_profitable);
        assert!(r.reason.contains("closes in"));

        let closed = flash_market(0.45, 0.50, -1);
        let r = analyzer().analyze(&closed, 0.45, 0.50, 1000.0, 1000.0);
        assert_eq!(r.reason, "Market closed");
    }

    #[test]
    fn test_analyze_orderbook_uses_best_ask_depth() {
        let market = flash_market(0.45, 0.50, 10);
        let up = book(&[(0.46, 300.0), (0.45, 200.0), (0.50, 1000.0)]);
        let down = book(&[(0.50, 400.0)]);
        let r = analyzer().analyze_orderbook(&market, &up, &down);
        assert!((r.up_price - 0.45).abs() < 1e-9);
        // 0.45 and 0.4545.. are within 1%; 0.46 is not.
        assert!((r.up_liquidity - 200.0).abs() < 1e-9);
        assert!((r.down_liquidity - 400.0).abs() < 1e-9);
        assert!(r.is_profitable);
    }

    #[test]
    fn test_analyze_orderbook_empty_side() {
        let market = flash_market(0.45, 0.50, 10);
        let r = analyzer().analyze_orderbook(&market, &book(&[(0.45, 100.0)]), &book(&[]));
        assert!(!r.is_profitable);
        assert_eq!(r.reason, "No asks available");
    }

    #[test]
    fn test_create_opportunity_only_when_profitable() {
        let a = analyzer();
        let market = flash_market(0.45, 0.50, 10);
        let good = a.analyze(&market, 0.45, 0.50, 1000.0, 1000.0);
        let opp = a.create_opportunity(&market, &good).unwrap();
        assert!(opp.score > 0.0 && opp.score <= 100.0);

        let bad = a.analyze(&market, 0.55, 0.50, 1000.0, 1000.0);
        assert!(a.create_opportunity(&market, &bad).is_none());
    }
}
