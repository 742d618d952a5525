//! Contrarian NO: fade sensational headlines.
//!
//! Most markets framed around a dramatic event resolve NO, so when a
//! sensational market's YES trades between 8% and 40% the NO side carries
//! positive expected value at a 78% base rate.

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeSet;

use super::{keyword_regex, SignalStrategy};
use crate::types::{MarketSnapshot, Side, TradeSignal};

pub const STRATEGY_ID: &str = "CONTRARIAN_NO";

const BASE_RATE_NO: f64 = 0.78;

const SENSATIONAL_KEYWORDS: [&str; 33] = [
    "nuclear", "war", "invasion", "attack", "bomb", "alien", "ufo", "disclosure", "extinction",
    "crash", "collapse", "depression", "bankrupt", "bank run", "default", "hyperinflation",
    "resign", "impeach", "indicted", "arrested", "assassin", "coup", "martial law",
    "new ath", "all-time high", "100k", "1 million", "agi", "singularity",
    "dies", "dead", "divorce", "scandal",
];

pub struct ContrarianNoStrategy {
    pub stake: f64,
    pub min_yes_price: f64,
    pub max_yes_price: f64,
    pub min_volume: f64,
    pub max_daily_trades: u32,
    keywords: Regex,
}

impl ContrarianNoStrategy {
    pub fn new() -> Result<Self> {
        Ok(Self {
            stake: 200.0,
            min_yes_price: 0.08,
            max_yes_price: 0.40,
            min_volume: 5_000.0,
            max_daily_trades: 10,
            keywords: keyword_regex(&SENSATIONAL_KEYWORDS)?,
        })
    }

    /// Distinct keywords found in `text`, lowercased.
    pub fn find_keywords(&self, text: &str) -> Vec<String> {
        self.keywords
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// EV per dollar of buying NO at `no_price` given the NO base rate.
pub fn no_expected_value(no_price: f64) -> f64 {
    BASE_RATE_NO * (1.0 - no_price) - (1.0 - BASE_RATE_NO) * no_price
}

impl SignalStrategy for ContrarianNoStrategy {
    fn strategy_id(&self) -> &str {
        STRATEGY_ID
    }

    fn evaluate(&mut self, market: &MarketSnapshot, _now: DateTime<Utc>) -> Option<TradeSignal> {
        let keywords = self.find_keywords(&market.question);
        if keywords.is_empty() || market.volume_24h < self.min_volume {
            return None;
        }
        let yes = market.yes_price;
        if yes < self.min_yes_price || yes > self.max_yes_price {
            return None;
        }

        let no = 1.0 - yes;
        let ev = no_expected_value(no);
        if ev <= 0.0 {
            return None;
        }
        let confidence = (0.5 + (0.4 - yes)).clamp(0.55, 0.85);

        TradeSignal::buy(STRATEGY_ID, market, Side::No, no, self.stake, confidence)
            .ok()
            .map(|s| {
                s.with_expected_value(ev * self.stake).with_reason(
                    format!("contrarian_no: keywords={}, yes={:.2}%", keywords.join(","), yes * 100.0),
                    serde_json::json!({
                        "keywords": keywords,
                        "yes_price": yes,
                        "no_price": no,
                        "expected_value": ev,
                        "base_rate_no": BASE_RATE_NO,
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
            "yes_range": [self.min_yes_price, self.max_yes_price],
            "min_volume": self.min_volume,
            "stake": self.stake,
            "max_daily_trades": self.max_daily_trades,
            "keyword_count": SENSATIONAL_KEYWORDS.len(),
        })
    }
}
