//! Pre-trade validation.
//!
//! Last line of checks before an arbitrage is executed. Hard failures go
//! into `errors`; marginal conditions that still allow the trade go into
//! `warnings`.

use serde::Serialize;

use crate::config::MARKET_CLOSE_BUFFER_SECONDS;
use crate::types::{ArbitrageOpportunity, Market};

const SOON_CLOSE_SECS: f64 = 60.0;
const LOW_MARGIN: f64 = 0.05;
const LIMITED_LIQUIDITY: f64 = 500.0;
const MIN_POSITION_USDC: f64 = 1.0;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn merge(mut self, other: ValidationResult) -> Self {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.is_valid = self.errors.is_empty();
        self
    }

    /// All errors joined, for logging.
    pub fn reason(&self) -> String {
        self.errors.join("; ")
    }
}

#[derive(Debug, Clone)]
pub struct TradeValidator {
    pub min_profit_threshold: f64,
    pub min_liquidity: f64,
    pub min_time_to_close: f64,
}

impl Default for TradeValidator {
    fn default() -> Self {
        Self {
            min_profit_threshold: 0.04,
            min_liquidity: 100.0,
            min_time_to_close: MARKET_CLOSE_BUFFER_SECONDS,
        }
    }
}

impl TradeValidator {
    pub fn new(min_profit_threshold: f64, min_liquidity: f64) -> Self {
        Self {
            min_profit_threshold,
            min_liquidity,
            ..Default::default()
        }
    }

    pub fn validate_market(&self, market: &Market) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if !market.active {
            errors.push("Market is not active".to_string());
        }
        if market.is_closed() {
            errors.push("Market is closed".to_string());
        } else if let Some(secs) = market.time_to_close_seconds() {
            if secs < self.min_time_to_close {
                errors.push(format!(
                    "Market closes in {secs:.0}s (min: {:.0}s)",
                    self.min_time_to_close
                ));
            } else if secs < SOON_CLOSE_SECS {
                warnings.push(format!("Market closes soon: {secs:.0}s"));
            }
        }
        if market.tokens.is_none() {
            errors.push("Market has no tradeable tokens".to_string());
        }

        ValidationResult::from_parts(errors, warnings)
    }

    pub fn validate_opportunity(&self, opp: &ArbitrageOpportunity) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let min_liquidity = opp.min_liquidity();

        if opp.profit_per_contract < self.min_profit_threshold {
            errors.push(format!(
                "Profit {:.4} below threshold {:.4}",
                opp.profit_per_contract, self.min_profit_threshold
            ));
        }
        if opp.total_cost >= 1.0 {
            errors.push(format!("Total cost {:.4} >= $1.00 (no arbitrage)", opp.total_cost));
        } else if opp.total_cost <= 0.0 {
            errors.push("Invalid total cost".to_string());
        }
        if min_liquidity < self.min_liquidity {
            errors.push(format!(
                "Insufficient liquidity: {min_liquidity:.2} < {:.2}",
                self.min_liquidity
            ));
        }
        if opp.max_contracts <= 0.0 {
            errors.push("No contracts available".to_string());
        }

        if opp.profit_per_contract < LOW_MARGIN {
            warnings.push(format!("Low profit margin: {:.4}", opp.profit_per_contract));
        }
        if min_liquidity < LIMITED_LIQUIDITY {
            warnings.push(format!("Limited liquidity: {min_liquidity:.2}"));
        }

        ValidationResult::from_parts(errors, warnings)
    }

    pub fn validate_position_size(&self, opp: &ArbitrageOpportunity, size: f64, balance: f64) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if size < MIN_POSITION_USDC {
            errors.push(format!("Position size too small: ${size:.2} (min: ${MIN_POSITION_USDC:.2})"));
        }
        if size > balance {
            errors.push(format!("Insufficient balance: {balance:.2} < {size:.2}"));
        }
        let max_by_liquidity = opp.min_liquidity() * opp.total_cost;
        if size > max_by_liquidity {
            errors.push(format!("Size exceeds liquidity: {size:.2} > {max_by_liquidity:.2}"));
        }
        if balance > 0.0 && size > balance * 0.5 {
            warnings.push(format!("Position uses more than 50% of balance (${balance:.2})"));
        }

        ValidationResult::from_parts(errors, warnings)
    }

    pub fn validate_all(&self, opp: &ArbitrageOpportunity, size: f64, balance: f64) -> ValidationResult {
        self.validate_market(&opp.market)
            .merge(self.validate_opportunity(opp))
            .merge(self.validate_position_size(opp, size, balance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::flash_market;
    use chrono::Utc;

    fn opp(up: f64, down: f64, liq: f64, minutes: i64) -> ArbitrageOpportunity {
        ArbitrageOpportunity {
            market: flash_market(up, down, minutes),
            up_price: up,
            down_price: down,
            total_cost: up + down,
            profit_per_contract: 1.0 - (up + down),
            up_liquidity: liq,
            down_liquidity: liq,
            max_contracts: liq / (up + down),
            timestamp: Utc::now(),
            score: 0.0,
        }
    }

    #[test]
    fn test_valid_market() {
        let r = TradeValidator::default().validate_market(&flash_market(0.45, 0.5, 10));
        assert!(r.is_valid);
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_market_failures() {
        let v = TradeValidator::default();
        let mut m = flash_market(0.45, 0.5, 10);
        m.active = false;
        m.tokens = None;
        let r = v.validate_market(&m);
        assert!(!r.is_valid);
        assert_eq!(r.errors.len(), 2);

        let mut soon = flash_market(0.45, 0.5, 10);
        soon.end_time = Some(Utc::now() + chrono::Duration::seconds(20));
        assert!(!v.validate_market(&soon).is_valid);

        let mut warn = flash_market(0.45, 0.5, 10);
        warn.end_time = Some(Utc::now() + chrono::Duration::seconds(45));
        let r = v.validate_market(&warn);
        assert!(r.is_valid);
        assert_eq!(r.warnings.len(), 1);
    }

    #[test]
    fn test_opportunity_checks() {
        let v = TradeValidator::default();
        let good = v.validate_opportunity(&opp(0.40, 0.50, 1000.0, 10));
        assert!(good.is_valid);
        assert!(good.warnings.is_empty());

        let marginal = v.validate_opportunity(&opp(0.46, 0.495, 200.0, 10));
        assert!(marginal.is_valid, "{}", marginal.reason());
        assert_eq!(marginal.warnings.len(), 2);

        let thin = v.validate_opportunity(&opp(0.40, 0.50, 50.0, 10));
        assert!(!thin.is_valid);

        let none = v.validate_opportunity(&opp(0.50, 0.55, 1000.0, 10));
        assert!(!none.is_valid);
        assert!(none.reason().contains(">= $1.00"));
    }

    #[test]
    fn test_position_size_checks() {
        let v = TradeValidator::default();
        let o = opp(0.40, 0.50, 1000.0, 10);
        assert!(v.validate_position_size(&o, 100.0, 1000.0).is_valid);
        assert!(!v.validate_position_size(&o, 0.5, 1000.0).is_valid);
        assert!(!v.validate_position_size(&o, 100.0, 50.0).is_valid);
        // Depth allows 1000 * 0.90 = 900.
        assert!(!v.validate_position_size(&o, 950.0, 10_000.0).is_valid);

        let r = v.validate_position_size(&o, 600.0, 1000.0);
        assert!(r.is_valid);
        assert_eq!(r.warnings.len(), 1);
    }

    #[test]
    fn test_validate_all_merges() {
        let v = TradeValidator::default();
        let mut o = opp(0.46, 0.495, 200.0, 10);
        o.market.end_time = Some(Utc::now() + chrono::Duration::seconds(45));
        let r = v.validate_all(&o, 100.0, 150.0);
        assert!(r.is_valid, "{}", r.reason());
        // closes soon, low margin, limited liquidity, >50% of balance
        assert_eq!(r.warnings.len(), 4);

        let r = v.validate_all(&o, 500.0, 150.0);
        assert!(!r.is_valid);
        assert_eq!(r.errors.len(), 2);
    }
}
