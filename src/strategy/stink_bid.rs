//! Stink-bid rotation.
//!
//! Keeps a handful of deep GTC bids (2-5 cents) resting on liquid markets,
//! waiting for a flash crash. Expired bids are cancelled and re-placed;
//! filled bids get a resting exit at `bid × exit_multiplier`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::config::StinkBidConfig;
use crate::engine::executor::{is_auth_error, OrderExecutor};
use crate::types::{Market, OrderSide, OrderType, Outcome, StinkBid};

pub const MIN_BID_PRICE: f64 = 0.02;
pub const MAX_BID_PRICE: f64 = 0.05;
/// A side must trade at least this far above the bid to be worth bidding.
const PRICE_CUSHION: f64 = 0.10;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RotationReport {
    pub placed: usize,
    pub renewed: usize,
    pub dropped: usize,
    pub filled: usize,
    pub exits_filled: usize,
}

/// A side of a market that qualifies for a stink bid.
#[derive(Debug, Clone)]
pub struct StinkCandidate {
    pub market_id: String,
    pub question: String,
    pub token_id: String,
    pub outcome: Outcome,
    pub price: f64,
    pub volume: f64,
}

#[derive(Debug)]
pub struct StinkBidBook {
    config: StinkBidConfig,
    bid_price: f64,
    bids: HashMap<String, StinkBid>,
    /// Exit orders for filled bids: token id to order id.
    exits: HashMap<String, String>,
}

impl StinkBidBook {
    pub fn new(config: StinkBidConfig) -> Self {
        let bid_price = config.bid_price.clamp(MIN_BID_PRICE, MAX_BID_PRICE);
        Self {
            config,
            bid_price,
            bids: HashMap::new(),
            exits: HashMap::new(),
        }
    }

    pub fn restore(&mut self, bids: impl IntoIterator<Item = StinkBid>) {
        for b in bids {
            self.bids.insert(b.token_id.clone(), b);
        }
    }

    pub fn len(&self) -> usize {
        self.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }

    pub fn bids(&self) -> impl Iterator<Item = &StinkBid> {
        self.bids.values()
    }

    pub fn snapshot(&self) -> Vec<StinkBid> {
        let mut out: Vec<StinkBid> = self.bids.values().cloned().collect();
        out.sort_by_key(|b| b.placed_at);
        out
    }

    pub fn exits(&self) -> &HashMap<String, String> {
        &self.exits
    }

    /// Sides of `markets` worth bidding on, most liquid first.
    pub fn candidates(&self, markets: &[Market]) -> Vec<StinkCandidate> {
        let mut out = Vec::new();
        for m in markets {
            if !m.active || m.is_closed() || m.volume < self.config.min_volume {
                continue;
            }
            let Some(tokens) = &m.tokens else { continue };
            for (outcome, price) in [(Outcome::Up, tokens.up_price), (Outcome::Down, tokens.down_price)] {
                if price >= self.bid_price + PRICE_CUSHION {
                    out.push(StinkCandidate {
                        market_id: m.id.clone(),
                        question: m.question.clone(),
                        token_id: tokens.token_for(outcome).to_string(),
                        outcome,
                        price,
                        volume: m.volume,
                    });
                }
            }
        }
        out.sort_by(|a, b| b.volume.partial_cmp(&a.volume).unwrap_or(std::cmp::Ordering::Equal));
        out
    }

    async fn place(&self, executor: &dyn OrderExecutor, bid: &mut StinkBid) -> Result<bool> {
        let result = executor
            .place_limit_order(&bid.token_id, OrderSide::Buy, bid.bid_price, bid.size, OrderType::Gtc)
            .await?;
        if !result.success {
            warn!(
                token_id = %bid.token_id,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Stink bid rejected"
            );
            return Ok(false);
        }
        bid.order_id = result.order_id;
        Ok(true)
    }

    /// Rotate the book.
    ///
    /// 1. Exits that are no longer resting are counted as filled and freed.
    /// 2. Bids whose order is no longer resting are treated as filled and
    ///    get a GTC exit at their target. A bid leaves the book only once its
    ///    exit is accepted.
    /// 3. Expired bids are cancelled, then re-placed with a fresh TTL while
    ///    their market is still among `markets`' candidates. A failed cancel
    ///    keeps the bid for the next rotation.
    /// 4. Free slots are filled from the candidates, up to `max_open_bids`.
    pub async fn rotate(
        &mut self,
        now: DateTime<Utc>,
        executor: &dyn OrderExecutor,
        markets: &[Market],
    ) -> Result<RotationReport> {
        let mut report = RotationReport::default();
        if !self.config.enabled {
            return Ok(report);
        }

        let resting: HashSet<String> = executor
            .open_orders()
            .await?
            .into_iter()
            .filter_map(|o| o.id)
            .collect();
        let candidates = self.candidates(markets);
        let eligible: HashSet<&str> = candidates.iter().map(|c| c.token_id.as_str()).collect();

        // -- Exits --
        let exits_before = self.exits.len();
        self.exits.retain(|token_id, order_id| {
            let open = resting.contains(order_id.as_str());
            if !open {
                info!(token_id = %token_id, order_id = %order_id, "Stink bid exit filled");
            }
            open
        });
        report.exits_filled = exits_before - self.exits.len();

        // -- Fills --
        let filled: Vec<StinkBid> = self
            .bids
            .values()
            .filter(|b| b.order_id.as_ref().map_or(false, |id| !resting.contains(id)))
            .cloned()
            .collect();
        for bid in filled {
            let exit = match executor
                .place_limit_order(&bid.token_id, OrderSide::Sell, bid.target_exit, bid.size, OrderType::Gtc)
                .await
            {
                Ok(r) => r,
                Err(e) if is_auth_error(&e) => return Err(e),
                Err(e) => {
                    warn!(token_id = %bid.token_id, error = %e, "Stink bid exit failed, retrying next rotation");
                    continue;
                }
            };
            let order_id = match exit.order_id {
                Some(id) if exit.success => id,
                _ => {
                    warn!(
                        token_id = %bid.token_id,
                        error = exit.error.as_deref().unwrap_or("unknown"),
                        "Stink bid exit rejected, retrying next rotation"
                    );
                    continue;
                }
            };
            info!(
                token_id = %bid.token_id,
                bid = bid.bid_price,
                exit = bid.target_exit,
                size = bid.size,
                "Stink bid filled"
            );
            self.bids.remove(&bid.token_id);
            self.exits.insert(bid.token_id, order_id);
            report.filled += 1;
        }

        // -- Expiry --
        let expired: Vec<StinkBid> = self.bids.values().filter(|b| b.is_expired(now)).cloned().collect();
        for mut bid in expired {
            if let Some(order_id) = &bid.order_id {
                match executor.cancel_order(order_id).await {
                    Ok(()) => {}
                    Err(e) if is_auth_error(&e) => return Err(e),
                    Err(e) => {
                        warn!(token_id = %bid.token_id, error = %e, "Stink bid cancel failed, retrying next rotation");
                        continue;
                    }
                }
            }
            let token_id = bid.token_id.clone();
            self.bids.remove(&token_id);
            if !eligible.contains(token_id.as_str()) {
                debug!(token_id = %token_id, "Stink bid expired, market no longer eligible");
                report.dropped += 1;
                continue;
            }
            bid.renew(now);
            if self.place(executor, &mut bid).await? {
                debug!(token_id = %token_id, rotations = bid.rotations, "Stink bid renewed");
                self.bids.insert(token_id, bid);
                report.renewed += 1;
            } else {
                report.dropped += 1;
            }
        }

        // -- New bids --
        for c in &candidates {
            if self.bids.len() >= self.config.max_open_bids {
                break;
            }
            if self.bids.contains_key(&c.token_id) || self.exits.contains_key(&c.token_id) {
                continue;
            }
            let size = (self.config.stake_usdc / self.bid_price * 100.0).floor() / 100.0;
            let target = (self.bid_price * self.config.exit_multiplier).min(1.0);
            let mut bid = match StinkBid::new(
                &c.market_id,
                &c.question,
                &c.token_id,
                self.bid_price,
                size,
                target,
                self.config.ttl_secs,
                now,
            ) {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "Invalid stink bid parameters");
                    break;
                }
            };
            if self.place(executor, &mut bid).await? {
                info!(
                    market_id = %c.market_id,
                    outcome = %c.outcome,
                    bid = bid.bid_price,
                    size = bid.size,
                    price = c.price,
                    "Stink bid placed"
                );
                self.bids.insert(c.token_id.clone(), bid);
                report.placed += 1;
            }
        }

        Ok(report)
    }

    /// Cancel every resting bid, e.g. on shutdown.
    pub async fn cancel_all(&mut self, executor: &dyn OrderExecutor) -> Result<usize> {
        let mut n = 0;
        for (_, bid) in self.bids.drain() {
            if let Some(order_id) = &bid.order_id {
                executor.cancel_order(order_id).await?;
                n += 1;
            }
        }
        Ok(n)
    }
}
