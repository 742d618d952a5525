//! Tail betting: small stakes on YES tokens priced under 4 cents.
//!
//! Markets are scored by a keyword and feature heuristic; the score is
//! mapped to a win probability to estimate EV.

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

use super::{keyword_regex, SignalStrategy};
use crate::types::{MarketCategory, MarketSnapshot, Side, TradeSignal};

pub const STRATEGY_ID: &str = "TAIL_BETTING_V1";

/// Keyword weights, checked in order; the first hit names the category.
const CATEGORY_WEIGHTS: [(&str, f64); 21] = [
    ("crypto", 0.12),
    ("bitcoin", 0.10),
    ("ethereum", 0.08),
    ("nvidia", 0.08),
    ("tesla", 0.10),
    ("apple", 0.05),
    ("ai", 0.08),
    ("openai", 0.06),
    ("gpt", 0.05),
    ("microsoft", 0.04),
    ("google", 0.04),
    ("amazon", 0.04),
    ("trump", 0.02),
    ("biden", 0.01),
    ("election", 0.00),
    ("sports", -0.05),
    ("nba", -0.06),
    ("nfl", -0.06),
    ("weather", -0.03),
    ("celebrity", -0.02),
    ("entertainment", -0.02),
];

const SPORTS_WORDS: [&str; 6] = ["sports", "nba", "nfl", "football", "basketball", "score"];

/// Weight used when no keyword matches.
fn category_fallback(category: MarketCategory) -> f64 {
    match category {
        MarketCategory::Crypto => 0.12,
        MarketCategory::Sports => -0.05,
        MarketCategory::Weather => -0.03,
        MarketCategory::Culture => -0.02,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TailFeatures {
    pub category: String,
    pub category_weight: f64,
    pub multiplier: f64,
    pub volume_24h: f64,
    pub hours_to_expiry: f64,
    pub word_count: usize,
    pub has_number: bool,
    pub has_sports: bool,
}

pub struct TailStrategy {
    pub stake: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub min_multiplier: f64,
    pub min_score: f64,
    keywords: Vec<(Regex, &'static str, f64)>,
    sports: Regex,
    number: Regex,
}

impl TailStrategy {
    pub fn new() -> Result<Self> {
        let keywords = CATEGORY_WEIGHTS
            .iter()
            .map(|(k, w)| Ok((keyword_regex(&[*k])?, *k, *w)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            stake: 2.0,
            min_price: 0.001,
            max_price: 0.04,
            min_multiplier: 25.0,
            min_score: 0.55,
            keywords,
            sports: keyword_regex(&SPORTS_WORDS)?,
            number: Regex::new(r"\d+")?,
        })
    }

    pub fn extract_features(&self, market: &MarketSnapshot) -> TailFeatures {
        let q = &market.question;
        let (category, category_weight) = self
            .keywords
            .iter()
            .find(|(re, _, _)| re.is_match(q))
            .map(|(_, k, w)| (k.to_string(), *w))
            .unwrap_or_else(|| (market.category.to_string().to_lowercase(), category_fallback(market.category)));
        TailFeatures {
            category,
            category_weight,
            multiplier: market.multiplier(),
            volume_24h: market.volume_24h,
            hours_to_expiry: market.hours_to_expiry.unwrap_or(0.0),
            word_count: q.split_whitespace().count(),
            has_number: self.number.is_match(q),
            has_sports: self.sports.is_match(q) || market.category == MarketCategory::Sports,
        }
    }

    /// Heuristic quality score in [0, 1].
    pub fn score(&self, f: &TailFeatures) -> f64 {
        let mut score = 0.50 + f.category_weight;

        score += match f.multiplier {
            m if m >= 500.0 => 0.05,
            m if m >= 200.0 => 0.03,
            m if m >= 100.0 => 0.01,
            _ => 0.0,
        };
        score += match f.volume_24h {
            v if v > 100_000.0 => 0.03,
            v if v > 50_000.0 => 0.02,
            v if v > 10_000.0 => 0.01,
            _ => 0.0,
        };
        if f.hours_to_expiry > 24.0 && f.hours_to_expiry < 168.0 {
            score += 0.02;
        } else if f.hours_to_expiry > 720.0 {
            score -= 0.02;
        }
        if f.word_count > 15 {
            score += 0.02;
        } else if f.word_count < 5 {
            score -= 0.02;
        }
        if f.has_number {
            score += 0.02;
        }
        if f.has_sports {
            score -= 0.05;
        }
        score.clamp(0.0, 1.0)
    }
}

/// Calibrated win probability for a heuristic score.
pub fn score_to_probability(score: f64) -> f64 {
    if score < 0.5 {
        0.003
    } else if score < 0.6 {
        0.005 + (score - 0.5) * 0.05
    } else if score < 0.7 {
        0.01 + (score - 0.6) * 0.1
    } else if score < 0.8 {
        0.02 + (score - 0.7) * 0.2
    } else {
        0.04 + (score - 0.8) * 0.3
    }
}

impl SignalStrategy for TailStrategy {
    fn strategy_id(&self) -> &str {
        STRATEGY_ID
    }

    fn evaluate(&mut self, market: &MarketSnapshot, _now: DateTime<Utc>) -> Option<TradeSignal> {
        let price = market.yes_price;
        if !(price > self.min_price && price < self.max_price) {
            return None;
        }
        let multiplier = 1.0 / price;
        if multiplier < self.min_multiplier {
            return None;
        }

        let features = self.extract_features(market);
        let score = self.score(&features);
        if score < self.min_score {
            return None;
        }
        let p = score_to_probability(score);
        let ev = p * self.stake * multiplier - self.stake;

        TradeSignal::buy(STRATEGY_ID, market, Side::Yes, price, self.stake, score)
            .ok()
            .map(|s| {
                s.with_expected_value(ev).with_reason(
                    format!("tail_score_{score:.2}"),
                    serde_json::json!({
                        "multiplier": multiplier,
                        "score": score,
                        "estimated_prob": p,
                        "required_hit_rate": 1.0 / multiplier,
                        "features": features,
                    }),
                )
            })
    }

    fn max_daily_trades(&self) -> u32 {
        50
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "strategy_id": STRATEGY_ID,
            "price_range": [self.min_price, self.max_price],
            "min_multiplier": self.min_multiplier,
            "min_score": self.min_score,
            "stake": self.stake,
        })
    }
}
