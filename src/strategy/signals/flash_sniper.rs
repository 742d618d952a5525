//! Flash sniper: both legs of a short-dated crypto market for under $1.

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;

use super::{keyword_regex, SignalStrategy};
use crate::types::{MarketSnapshot, Side, TradeSignal};

pub const STRATEGY_ID: &str = "FLASH_SNIPER";

const FLASH_KEYWORDS: [&str; 5] = ["15-min", "15 min", "up or down", "flash", "minute"];
const CRYPTO_KEYWORDS: [&str; 7] = ["btc", "bitcoin", "eth", "ethereum", "sol", "solana", "xrp"];

pub struct FlashSniperStrategy {
    /// USD per leg.
    pub stake_per_leg: f64,
    pub min_spread: f64,
    pub max_combined_cost: f64,
    pub max_daily_trades: u32,
    pub max_hours_to_expiry: f64,
    crypto: Regex,
}

impl FlashSniperStrategy {
    pub fn new() -> Result<Self> {
        Ok(Self {
            stake_per_leg: 100.0,
            min_spread: 0.002,
            max_combined_cost: 0.998,
            max_daily_trades: 500,
            max_hours_to_expiry: 0.5,
            crypto: keyword_regex(&CRYPTO_KEYWORDS)?,
        })
    }

    fn is_flash(&self, market: &MarketSnapshot) -> bool {
        if !self.crypto.is_match(&market.question) {
            return false;
        }
        let q = market.question.to_lowercase();
        FLASH_KEYWORDS.iter().any(|k| q.contains(k))
            || market.hours_to_expiry.map_or(false, |h| h <= self.max_hours_to_expiry)
    }
}

impl SignalStrategy for FlashSniperStrategy {
    fn strategy_id(&self) -> &str {
        STRATEGY_ID
    }

    fn evaluate(&mut self, market: &MarketSnapshot, _now: DateTime<Utc>) -> Option<TradeSignal> {
        if !self.is_flash(market) {
            return None;
        }
        let combined = market.yes_price + market.no_price;
        let spread = 1.0 - combined;
        if combined >= self.max_combined_cost || spread < self.min_spread {
            return None;
        }

        let confidence = (0.5 + spread * 10.0).min(0.95);
        // Both legs are bought; the signal is recorded as the YES entry.
        TradeSignal::buy(
            STRATEGY_ID,
            market,
            Side::Yes,
            market.yes_price,
            self.stake_per_leg * 2.0,
            confidence,
        )
        .ok()
        .map(|s| {
            s.with_expected_value(spread * self.stake_per_leg).with_reason(
                format!("flash_arb: cost={combined:.4}, spread={spread:.4}"),
                serde_json::json!({
                    "combined_cost": combined,
                    "spread": spread,
                    "yes_price": market.yes_price,
                    "no_price": market.no_price,
                    "no_token_id": market.no_token_id,
                }),
            )
        })
    }

    fn max_daily_trades(&self) -> u32 {
        self.max_daily_trades
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "strategy_id": STRATEGY_ID,
            "min_spread": self.min_spread,
            "max_combined_cost": self.max_combined_cost,
            "stake_per_leg": self.stake_per_leg,
            "max_daily_trades": self.max_daily_trades,
        })
    }
}
