//! In-memory Polymarket stand-in for integration tests.
//!
//! `MockExchange` serves Gamma markets, CLOB prices and books, and accepts
//! orders. All state sits behind `Arc<Mutex<..>>` so one exchange can be
//! handed to the engine as both its market data source and its executor
//! while the test keeps a handle to steer prices and inject failures.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use polybot::engine::executor::OrderExecutor;
use polybot::platforms::polymarket::GammaMarket;
use polybot::platforms::MarketDataSource;
use polybot::types::{
    BotError, Order, OrderBook, OrderResult, OrderSide, OrderStatus, OrderType, PriceLevel,
};

/// Failure injected into every exchange call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Transport-level outage.
    Network,
    /// Credentials rejected.
    Auth,
}

/// One order the exchange received.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub token_id: String,
    pub side: OrderSide,
    pub size: f64,
    pub price: f64,
    pub order_type: OrderType,
}

#[derive(Clone)]
pub struct MockExchange {
    paper: bool,
    depth: f64,
    markets: Arc<Mutex<Vec<GammaMarket>>>,
    prices: Arc<Mutex<HashMap<String, f64>>>,
    balance: Arc<Mutex<f64>>,
    placed: Arc<Mutex<Vec<PlacedOrder>>>,
    resting: Arc<Mutex<HashMap<String, Order>>>,
    rejected_tokens: Arc<Mutex<HashSet<String>>>,
    failure: Arc<Mutex<Option<Failure>>>,
    order_failure: Arc<Mutex<Option<Failure>>>,
    next_id: Arc<Mutex<u64>>,
}

impl MockExchange {
    pub fn new(balance: f64) -> Self {
        Self {
            paper: true,
            depth: 2_000.0,
            markets: Arc::new(Mutex::new(Vec::new())),
            prices: Arc::new(Mutex::new(HashMap::new())),
            balance: Arc::new(Mutex::new(balance)),
            placed: Arc::new(Mutex::new(Vec::new())),
            resting: Arc::new(Mutex::new(HashMap::new())),
            rejected_tokens: Arc::new(Mutex::new(HashSet::new())),
            failure: Arc::new(Mutex::new(None)),
            order_failure: Arc::new(Mutex::new(None)),
            next_id: Arc::new(Mutex::new(0)),
        }
    }

    /// Report itself as a live executor.
    pub fn live(mut self) -> Self {
        self.paper = false;
        self
    }

    /// Add a 15-minute "<asset> Up or Down" market closing in `minutes`.
    /// Tokens are `<id>-up` and `<id>-down`.
    pub fn add_flash_market(&self, id: &str, asset: &str, up: f64, down: f64, minutes: i64) {
        let question = format!("{asset} Up or Down - 15 minute");
        self.add_market(id, &question, up, down, minutes, 20_000.0);
    }

    /// Add a YES/NO style market. Tokens are `<id>-up` (YES) and `<id>-down` (NO).
    pub fn add_market(&self, id: &str, question: &str, up: f64, down: f64, minutes: i64, volume: f64) {
        let end = (Utc::now() + Duration::minutes(minutes)).to_rfc3339();
        let market = GammaMarket {
            id: Some(serde_json::json!(id)),
            question: question.to_string(),
            condition_id: format!("0x{id}"),
            end_date: Some(end),
            active: true,
            closed: false,
            outcomes: Some(serde_json::json!("[\"Up\", \"Down\"]")),
            outcome_prices: Some(serde_json::json!(format!("[\"{up}\", \"{down}\"]"))),
            clob_token_ids: Some(serde_json::json!(format!("[\"{id}-up\", \"{id}-down\"]"))),
            volume_num: Some(volume),
            liquidity: Some(self.depth),
            ..Default::default()
        };
        self.markets.lock().unwrap().push(market);
        self.set_price(&format!("{id}-up"), up);
        self.set_price(&format!("{id}-down"), down);
    }

    pub fn set_price(&self, token_id: &str, price: f64) {
        self.prices.lock().unwrap().insert(token_id.to_string(), price);
    }

    pub fn fail_with(&self, failure: Failure) {
        *self.failure.lock().unwrap() = Some(failure);
    }

    /// Fail order calls only; market data keeps working.
    pub fn fail_orders_with(&self, failure: Failure) {
        *self.order_failure.lock().unwrap() = Some(failure);
    }

    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap() = None;
        *self.order_failure.lock().unwrap() = None;
    }

    /// Orders on `token_id` come back unfilled.
    pub fn reject_token(&self, token_id: &str) {
        self.rejected_tokens.lock().unwrap().insert(token_id.to_string());
    }

    /// Fill a resting order: it disappears from the open-order list.
    pub fn fill_resting(&self, order_id: &str) -> bool {
        self.resting.lock().unwrap().remove(order_id).is_some()
    }

    pub fn placed(&self) -> Vec<PlacedOrder> {
        self.placed.lock().unwrap().clone()
    }

    pub fn resting_ids(&self) -> Vec<String> {
        self.resting.lock().unwrap().keys().cloned().collect()
    }

    pub fn current_balance(&self) -> f64 {
        *self.balance.lock().unwrap()
    }

    fn check_failure(&self) -> Result<()> {
        let failure = *self.failure.lock().unwrap();
        Self::raise(failure)
    }

    fn check_order_failure(&self) -> Result<()> {
        let failure = self.order_failure.lock().unwrap().or(*self.failure.lock().unwrap());
        Self::raise(failure)
    }

    fn raise(failure: Option<Failure>) -> Result<()> {
        match failure {
            None => Ok(()),
            Some(Failure::Network) => Err(BotError::Platform {
                platform: "mock".into(),
                status: None,
                message: "connection reset".into(),
            }
            .into()),
            Some(Failure::Auth) => Err(BotError::Auth {
                platform: "mock".into(),
                message: "401 Unauthorized".into(),
            }
            .into()),
        }
    }

    fn price_of(&self, token_id: &str) -> Result<f64> {
        self.prices
            .lock()
            .unwrap()
            .get(token_id)
            .copied()
            .ok_or_else(|| anyhow!(BotError::MarketNotFound(token_id.to_string())))
    }

    fn order_id(&self) -> String {
        let mut n = self.next_id.lock().unwrap();
        *n += 1;
        format!("mock-{n}")
    }

    fn record(&self, token_id: &str, side: OrderSide, size: f64, price: f64, order_type: OrderType) {
        self.placed.lock().unwrap().push(PlacedOrder {
            token_id: token_id.to_string(),
            side,
            size,
            price,
            order_type,
        });
    }
}

#[async_trait]
impl MarketDataSource for MockExchange {
    async fn fetch_markets(&self, max_markets: usize) -> Result<Vec<GammaMarket>> {
        self.check_failure()?;
        let markets = self.markets.lock().unwrap();
        Ok(markets.iter().take(max_markets).cloned().collect())
    }

    async fn get_price(&self, token_id: &str, _side: OrderSide) -> Result<f64> {
        self.check_failure()?;
        self.price_of(token_id)
    }

    async fn get_midpoint(&self, token_id: &str) -> Result<f64> {
        self.check_failure()?;
        self.price_of(token_id)
    }

    async fn get_orderbook(&self, token_id: &str) -> Result<OrderBook> {
        self.check_failure()?;
        let price = self.price_of(token_id)?;
        Ok(OrderBook {
            token_id: token_id.to_string(),
            bids: vec![PriceLevel {
                price: (price - 0.01).max(0.01),
                size: self.depth,
            }],
            asks: vec![PriceLevel {
                price,
                size: self.depth,
            }],
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[async_trait]
impl OrderExecutor for MockExchange {
    async fn place_market_order(
        &self,
        token_id: &str,
        side: OrderSide,
        size: f64,
        price: Option<f64>,
    ) -> Result<OrderResult> {
        self.check_order_failure()?;
        let price = match price {
            Some(p) => p,
            None => self.price_of(token_id)?,
        };
        self.record(token_id, side, size, price, OrderType::Fok);

        if self.rejected_tokens.lock().unwrap().contains(token_id) {
            return Ok(OrderResult::failed(token_id, side, size, "order couldn't be fully filled"));
        }

        let mut balance = self.balance.lock().unwrap();
        let notional = size * price;
        match side {
            OrderSide::Buy if notional > *balance => {
                return Ok(OrderResult::failed(token_id, side, size, "not enough balance"));
            }
            OrderSide::Buy => *balance -= notional,
            OrderSide::Sell => *balance += notional,
        }

        Ok(OrderResult {
            success: true,
            order_id: Some(self.order_id()),
            token_id: token_id.to_string(),
            side,
            requested_size: size,
            filled_size: size,
            avg_price: price,
            fee: 0.0,
            slippage_pct: 0.0,
            latency_ms: 25.0,
            partial: false,
            error: None,
        })
    }

    async fn place_limit_order(
        &self,
        token_id: &str,
        side: OrderSide,
        price: f64,
        size: f64,
        order_type: OrderType,
    ) -> Result<OrderResult> {
        self.check_order_failure()?;
        self.record(token_id, side, size, price, order_type);
        let id = self.order_id();
        let now = Utc::now();
        self.resting.lock().unwrap().insert(
            id.clone(),
            Order {
                id: Some(id.clone()),
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
        Ok(OrderResult {
            success: true,
            order_id: Some(id),
            token_id: token_id.to_string(),
            side,
            requested_size: size,
            filled_size: 0.0,
            avg_price: price,
            fee: 0.0,
            slippage_pct: 0.0,
            latency_ms: 25.0,
            partial: false,
            error: None,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.check_order_failure()?;
        self.resting.lock().unwrap().remove(order_id);
        Ok(())
    }

    async fn cancel_all(&self) -> Result<()> {
        self.check_order_failure()?;
        self.resting.lock().unwrap().clear();
        Ok(())
    }

    async fn open_orders(&self) -> Result<Vec<Order>> {
        self.check_order_failure()?;
        Ok(self.resting.lock().unwrap().values().cloned().collect())
    }

    async fn balance(&self) -> Result<f64> {
        self.check_order_failure()?;
        Ok(*self.balance.lock().unwrap())
    }

    fn is_paper(&self) -> bool {
        self.paper
    }

    fn credit_settlement(&self, amount: f64) -> Result<()> {
        if self.paper {
            *self.balance.lock().unwrap() += amount;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_mock_serves_markets_and_books() {
    let ex = MockExchange::new(1_000.0);
    ex.add_flash_market("m1", "Bitcoin", 0.45, 0.50, 10);

    let markets = ex.fetch_markets(10).await.unwrap();
    assert_eq!(markets.len(), 1);
    assert_eq!(ex.get_price("m1-up", OrderSide::Buy).await.unwrap(), 0.45);
    let book = ex.get_orderbook("m1-down").await.unwrap();
    assert_eq!(book.best_ask(), Some(0.50));
    assert!(ex.get_price("nope", OrderSide::Buy).await.is_err());
}

#[tokio::test]
async fn test_mock_failure_injection() {
    let ex = MockExchange::new(1_000.0);
    ex.fail_with(Failure::Auth);
    let err = ex.balance().await.unwrap_err();
    assert!(polybot::engine::executor::is_auth_error(&err));

    ex.clear_failure();
    assert_eq!(ex.balance().await.unwrap(), 1_000.0);
}

#[tokio::test]
async fn test_mock_fills_and_resting_orders() {
    let ex = MockExchange::new(100.0);
    ex.set_price("t", 0.40);

    let fill = ex.place_market_order("t", OrderSide::Buy, 50.0, None).await.unwrap();
    assert!(fill.success);
    assert!((ex.current_balance() - 80.0).abs() < 1e-9);

    let too_big = ex.place_market_order("t", OrderSide::Buy, 1_000.0, None).await.unwrap();
    assert!(!too_big.success);

    let bid = ex
        .place_limit_order("t", OrderSide::Buy, 0.03, 100.0, OrderType::Gtc)
        .await
        .unwrap();
    let id = bid.order_id.unwrap();
    assert_eq!(ex.open_orders().await.unwrap().len(), 1);
    assert!(ex.fill_resting(&id));
    assert!(ex.open_orders().await.unwrap().is_empty());
}
