//! Polymarket integrations.
//!
//! - `polymarket`: Gamma market discovery plus public CLOB prices and books
//! - `clob`: authenticated order placement through `polymarket-client-sdk`
//! - `retry`: backoff for transient exchange failures

pub mod clob;
pub mod polymarket;
pub mod retry;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{OrderBook, OrderSide};
use polymarket::GammaMarket;

/// Read-only market data the scanner and engine depend on.
///
/// Implemented by [`polymarket::PolymarketClient`] and by test doubles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Active, open markets, at most `max_markets`.
    async fn fetch_markets(&self, max_markets: usize) -> Result<Vec<GammaMarket>>;

    /// Best price for taking `side` on a token.
    async fn get_price(&self, token_id: &str, side: OrderSide) -> Result<f64>;

    /// Midpoint between best bid and ask. Settles at 0 or 1 once a market resolves.
    async fn get_midpoint(&self, token_id: &str) -> Result<f64>;

    async fn get_orderbook(&self, token_id: &str) -> Result<OrderBook>;

    /// Source name for logging.
    fn name(&self) -> &str;
}
