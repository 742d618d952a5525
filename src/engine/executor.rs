//! Order execution.
//!
//! [`OrderExecutor`] is the seam between the engine and the exchange.
//! [`LiveExecutor`] posts real CLOB orders through the SDK; [`PaperExecutor`]
//! fills them through the slippage simulator against a paper balance.
//! Both time every order into the shared latency logger.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::simulator::{SimulationStats, SlippageSimulator};
use crate::monitoring::latency::{LatencyLogger, OP_ORDER_PLACEMENT};
use crate::platforms::clob::{ClobClient, PlacedOrder, RestingOrder};
use crate::platforms::retry::{with_retry, RetryConfig};
use crate::types::{BotError, Order, OrderResult, OrderSide, OrderStatus, OrderType};

/// Starting paper balance in USDC.
pub const PAPER_INITIAL_BALANCE: f64 = 10_000.0;

/// Worst acceptable price for a market order without a reference price.
const MARKET_BUY_CAP: f64 = 0.99;
const MARKET_SELL_FLOOR: f64 = 0.01;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Places and manages orders. Sizes are in contracts, prices in USDC.
///
/// A fill failure comes back as `Ok` with `success == false`; `Err` is
/// reserved for failures the engine must react to, such as rejected
/// credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    /// Fill-or-kill at market. `price` is the reference (expected) price.
    async fn place_market_order(
        &self,
        token_id: &str,
        side: OrderSide,
        size: f64,
        price: Option<f64>,
    ) -> Result<OrderResult>;

    async fn place_limit_order(
        &self,
        token_id: &str,
        side: OrderSide,
        price: f64,
        size: f64,
        order_type: OrderType,
    ) -> Result<OrderResult>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    async fn cancel_all(&self) -> Result<()>;

    async fn open_orders(&self) -> Result<Vec<Order>>;

    /// Available USDC.
    async fn balance(&self) -> Result<f64>;

    fn is_paper(&self) -> bool;

    /// Pay out a resolved position. Live winnings are redeemed on-chain,
    /// so only the paper balance moves.
    fn credit_settlement(&self, _amount: f64) -> Result<()> {
        Ok(())
    }

    /// Simulator counters, paper mode only.
    fn simulation_stats(&self) -> Option<SimulationStats> {
        None
    }
}

// ---------------------------------------------------------------------------
// Live
// ---------------------------------------------------------------------------

pub struct LiveExecutor {
    clob: ClobClient,
    latency: Arc<LatencyLogger>,
    retry: RetryConfig,
}

impl LiveExecutor {
    pub fn new(clob: ClobClient, latency: Arc<LatencyLogger>) -> Self {
        Self {
            clob,
            latency,
            retry: RetryConfig::default(),
        }
    }

    async fn submit(
        &self,
        token_id: &str,
        side: OrderSide,
        price: f64,
        size: f64,
        order_type: OrderType,
    ) -> Result<OrderResult> {
        let start = Instant::now();
        let posted = with_retry(&self.retry, "clob_post_order", || {
            self.clob.post_order(token_id, side, price, size, order_type)
        })
        .await;
        let latency_ms = self.latency.record(OP_ORDER_PLACEMENT, start, posted.is_ok());

        match posted {
            Ok(placed) => {
                let mut result = fill_from_placed(&placed, token_id, side, price, size, order_type);
                result.latency_ms = latency_ms;
                info!(
                    token_id,
                    side = %side,
                    order_type = %order_type,
                    price,
                    size,
                    order_id = %placed.order_id,
                    filled = result.filled_size,
                    "Order placed"
                );
                debug!(detail = %placed.detail, "CLOB order response");
                Ok(result)
            }
            Err(err) if is_auth_error(&err) => Err(err),
            Err(err) => {
                warn!(token_id, side = %side, error = %err, "Order failed");
                let mut result = OrderResult::failed(token_id, side, size, err.to_string());
                result.latency_ms = latency_ms;
                Ok(result)
            }
        }
    }
}

/// Whether an error means the exchange rejected our credentials.
pub fn is_auth_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<BotError>().map(BotError::is_auth).unwrap_or(false)
}

/// An accepted fill-or-kill order filled in full at no worse than `price`;
/// resting order types start unfilled.
fn fill_from_placed(
    placed: &PlacedOrder,
    token_id: &str,
    side: OrderSide,
    price: f64,
    size: f64,
    order_type: OrderType,
) -> OrderResult {
    let filled_size = match order_type {
        OrderType::Fok | OrderType::Fak => size,
        OrderType::Gtc | OrderType::Gtd => 0.0,
    };
    OrderResult {
        success: true,
        order_id: Some(placed.order_id.clone()),
        token_id: token_id.to_string(),
        side,
        requested_size: size,
        filled_size,
        avg_price: price,
        fee: 0.0,
        slippage_pct: 0.0,
        latency_ms: 0.0,
        partial: false,
        error: None,
    }
}

fn order_from_resting(o: RestingOrder) -> Order {
    let now = Utc::now();
    Order {
        id: Some(o.id),
        market_id: o.market,
        token_id: o.token_id,
        side: o.side,
        price: o.price,
        size: o.original_size,
        filled_size: o.size_matched,
        status: if o.size_matched > 0.0 { OrderStatus::PartiallyFilled } else { OrderStatus::Open },
        order_type: OrderType::Gtc,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl OrderExecutor for LiveExecutor {
    async fn place_market_order(
        &self,
        token_id: &str,
        side: OrderSide,
        size: f64,
        price: Option<f64>,
    ) -> Result<OrderResult> {
        let limit = price.unwrap_or(match side {
            OrderSide::Buy => MARKET_BUY_CAP,
            OrderSide::Sell => MARKET_SELL_FLOOR,
        });
        self.submit(token_id, side, limit, size, OrderType::Fok).await
    }

    async fn place_limit_order(
        &self,
        token_id: &str,
        side: OrderSide,
        price: f64,
        size: f64,
        order_type: OrderType,
    ) -> Result<OrderResult> {
        self.submit(token_id, side, price, size, order_type).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.clob.cancel(order_id).await?;
        info!(order_id, "Order cancelled");
        Ok(())
    }

    async fn cancel_all(&self) -> Result<()> {
        self.clob.cancel_all().await?;
        info!("All orders cancelled");
        Ok(())
    }

    async fn open_orders(&self) -> Result<Vec<Order>> {
        Ok(self.clob.open_orders().await?.into_iter().map(order_from_resting).collect())
    }

    async fn balance(&self) -> Result<f64> {
        self.clob.balance().await
    }

    fn is_paper(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Paper
// ---------------------------------------------------------------------------

struct PaperBook {
    balance: f64,
    resting: HashMap<String, Order>,
}

pub struct PaperExecutor {
    simulator: Mutex<SlippageSimulator>,
    book: Mutex<PaperBook>,
    latency: Arc<LatencyLogger>,
}

impl PaperExecutor {
    pub fn new(simulator: SlippageSimulator, initial_balance: f64, latency: Arc<LatencyLogger>) -> Self {
        info!(balance = initial_balance, "Paper executor ready");
        Self {
            simulator: Mutex::new(simulator),
            book: Mutex::new(PaperBook {
                balance: initial_balance,
                resting: HashMap::new(),
            }),
            latency,
        }
    }

    fn sim(&self) -> Result<std::sync::MutexGuard<'_, SlippageSimulator>> {
        self.simulator.lock().map_err(|_| anyhow!("paper simulator lock poisoned"))
    }

    fn paper_book(&self) -> Result<std::sync::MutexGuard<'_, PaperBook>> {
        self.book.lock().map_err(|_| anyhow!("paper book lock poisoned"))
    }

    /// Move cash for a fill. BUYs that the balance cannot cover are refused.
    fn settle_fill(&self, result: &mut OrderResult) -> Result<()> {
        if !result.success || result.filled_size <= 0.0 {
            return Ok(());
        }
        let mut book = self.paper_book()?;
        let notional = result.notional();
        match result.side {
            OrderSide::Buy => {
                let needed = notional + result.fee;
                if needed > book.balance {
                    let err = BotError::InsufficientBalance {
                        needed,
                        available: book.balance,
                    };
                    *result = OrderResult::failed(&result.token_id, result.side, result.requested_size, err.to_string());
                    return Ok(());
                }
                book.balance -= needed;
            }
            OrderSide::Sell => book.balance += notional - result.fee,
        }
        Ok(())
    }

    fn record(&self, result: &OrderResult) {
        self.latency.record_direct(OP_ORDER_PLACEMENT, result.latency_ms, result.success);
    }
}

#[async_trait]
impl OrderExecutor for PaperExecutor {
    async fn place_market_order(
        &self,
        token_id: &str,
        side: OrderSide,
        size: f64,
        price: Option<f64>,
    ) -> Result<OrderResult> {
        let mut result = {
            let mut sim = self.sim()?;
            let reference = match price {
                Some(p) => {
                    sim.anchor_orderbook(token_id, side, p);
                    p
                }
                None => sim
                    .orderbook(token_id)
                    .and_then(|b| match side {
                        OrderSide::Buy => b.best_ask(),
                        OrderSide::Sell => b.best_bid(),
                    })
                    .unwrap_or(0.5),
            };
            let mut r = sim.simulate_market_order(token_id, side, size * reference);
            r.requested_size = size;
            r
        };
        self.settle_fill(&mut result)?;
        self.record(&result);
        debug!(token_id, side = %side, result = %result, "Paper market order");
        Ok(result)
    }

    async fn place_limit_order(
        &self,
        token_id: &str,
        side: OrderSide,
        price: f64,
        size: f64,
        order_type: OrderType,
    ) -> Result<OrderResult> {
        let crosses = {
            let sim = self.sim()?;
            match sim.orderbook(token_id) {
                Some(b) => match side {
                    OrderSide::Buy => b.best_ask().map_or(false, |a| price >= a),
                    OrderSide::Sell => b.best_bid().map_or(false, |bid| price <= bid),
                },
                None => false,
            }
        };

        // Resting GTC/GTD orders sit in the paper book until cancelled.
        if matches!(order_type, OrderType::Gtc | OrderType::Gtd) && !crosses {
            let order_id = format!("paper-{}", uuid::Uuid::new_v4());
            let now = Utc::now();
            self.paper_book()?.resting.insert(
                order_id.clone(),
                Order {
                    id: Some(order_id.clone()),
                    market_id: String::new(),
                    token_id: token_id.to_string(),
                    side,
                    price,
                    size,
                    filled_size: 0.0,
                    status: OrderStatus::Open,
                    order_type,
                    created_at: now,
                    updated_at: now,
                },
            );
            self.latency.record_direct(OP_ORDER_PLACEMENT, 0.0, true);
            info!(token_id, side = %side, price, size, order_id = %order_id, "Paper limit order resting");
            return Ok(OrderResult {
                success: true,
                order_id: Some(order_id),
                token_id: token_id.to_string(),
                side,
                requested_size: size,
                filled_size: 0.0,
                avg_price: price,
                fee: 0.0,
                slippage_pct: 0.0,
                latency_ms: 0.0,
                partial: false,
                error: None,
            });
        }

        let mut result = self.sim()?.simulate_limit_order(token_id, side, price, size);
        self.settle_fill(&mut result)?;
        self.record(&result);
        Ok(result)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        if self.paper_book()?.resting.remove(order_id).is_some() {
            info!(order_id, "Paper order cancelled");
        }
        Ok(())
    }

    async fn cancel_all(&self) -> Result<()> {
        let mut book = self.paper_book()?;
        let n = book.resting.len();
        book.resting.clear();
        info!(cancelled = n, "Paper orders cancelled");
        Ok(())
    }

    async fn open_orders(&self) -> Result<Vec<Order>> {
        Ok(self.paper_book()?.resting.values().cloned().collect())
    }

    async fn balance(&self) -> Result<f64> {
        Ok(self.paper_book()?.balance)
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn credit_settlement(&self, amount: f64) -> Result<()> {
        if amount > 0.0 {
            let mut book = self.paper_book()?;
            book.balance += amount;
            debug!(amount, balance = book.balance, "Paper settlement credited");
        }
        Ok(())
    }

    fn simulation_stats(&self) -> Option<SimulationStats> {
        self.simulator.lock().ok().map(|s| s.stats().clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
