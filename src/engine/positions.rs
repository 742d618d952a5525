//! Position manager.
//!
//! Opens delta-neutral positions by buying both legs of an opportunity,
//! tracks them through settlement and keeps the fill records the
//! validation report is built from.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::engine::executor::OrderExecutor;
use crate::types::{
    ArbitrageOpportunity, BotError, OrderResult, OrderSide, Outcome, Position, PositionState, Trade,
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct PositionSummary {
    pub total: usize,
    pub open: usize,
    pub complete: usize,
    pub partial: usize,
    pub settled: usize,
    pub total_exposure: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

pub struct PositionManager {
    executor: Arc<dyn OrderExecutor>,
    positions: HashMap<String, Position>,
    fills: Vec<Trade>,
}

impl PositionManager {
    pub fn new(executor: Arc<dyn OrderExecutor>) -> Self {
        Self {
            executor,
            positions: HashMap::new(),
            fills: Vec::new(),
        }
    }

    /// Reload positions persisted by a previous run.
    pub fn restore(&mut self, positions: impl IntoIterator<Item = Position>) {
        for p in positions {
            self.positions.insert(p.id.clone(), p);
        }
        info!(count = self.positions.len(), "Positions restored");
    }

    pub fn executor(&self) -> &Arc<dyn OrderExecutor> {
        &self.executor
    }

    // -- Entry -------------------------------------------------------------

    /// Buy the same number of UP and DOWN contracts for about `size_usdc`.
    ///
    /// Equal contracts make the payout $1 per pair whichever side wins.
    /// UP is bought first and DOWN matches what UP actually filled. When it fails nothing is recorded and `None` is
    /// returned. When DOWN fails the position is kept as
    /// [`PositionState::Partial`] for manual handling. Credential errors are
    /// propagated after the partial position is stored.
    pub async fn open_position(&mut self, opp: &ArbitrageOpportunity, size_usdc: f64) -> Result<Option<Position>> {
        let Some(tokens) = opp.market.tokens.as_ref() else {
            return Err(BotError::Validation(format!("market {} has no tokens", opp.market.id)).into());
        };
        if opp.up_price <= 0.0 || opp.down_price <= 0.0 {
            return Err(BotError::Validation("leg price must be positive".into()).into());
        }

        let contracts = floor2(size_usdc / (opp.up_price + opp.down_price));
        if contracts <= 0.0 {
            return Err(BotError::Validation(format!("${size_usdc:.2} buys no contracts")).into());
        }

        info!(
            market_id = %opp.market.id,
            asset = opp.market.asset.as_deref().unwrap_or("?"),
            size = format!("${:.2}", size_usdc),
            contracts,
            "Opening position"
        );

        let mut position = Position::new(&opp.market);

        // -- UP leg --
        let up = self
            .executor
            .place_market_order(&tokens.up_token_id, OrderSide::Buy, contracts, Some(opp.up_price))
            .await?;
        if !filled(&up) {
            warn!(
                market_id = %opp.market.id,
                error = up.error.as_deref().unwrap_or("no fill"),
                "UP leg failed, no position opened"
            );
            return Ok(None);
        }
        self.apply_fill(&mut position, Outcome::Up, &up, opp.up_price);
        let down_contracts = floor2(up.filled_size);

        // -- DOWN leg --
        let down = match self
            .executor
            .place_market_order(&tokens.down_token_id, OrderSide::Buy, down_contracts, Some(opp.down_price))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                self.store_partial(position, &e.to_string());
                return Err(e);
            }
        };
        if !filled(&down) {
            let reason = down.error.clone().unwrap_or_else(|| "no fill".into());
            let position = self.store_partial(position, &reason);
            return Ok(Some(position));
        }
        self.apply_fill(&mut position, Outcome::Down, &down, opp.down_price);

        position.state = PositionState::Complete;
        position.updated_at = Utc::now();
        info!(
            position_id = %position.id,
            cost = format!("${:.2}", position.total_cost),
            expected = format!("${:.2}", position.unrealized_pnl()),
            delta = format!("{:+.2}", position.delta()),
            "Position opened"
        );
        self.positions.insert(position.id.clone(), position.clone());
        Ok(Some(position))
    }

    fn store_partial(&mut self, mut position: Position, reason: &str) -> Position {
        position.state = PositionState::Partial;
        position.updated_at = Utc::now();
        error!(
            position_id = %position.id,
            market_id = %position.market_id,
            up_contracts = position.up_contracts,
            reason,
            "DOWN leg failed, partial position needs manual handling"
        );
        self.positions.insert(position.id.clone(), position.clone());
        position
    }

    fn apply_fill(&mut self, position: &mut Position, outcome: Outcome, fill: &OrderResult, detected_price: f64) {
        match outcome {
            Outcome::Up => {
                position.up_contracts = fill.filled_size;
                position.up_avg_price = fill.avg_price;
                position.up_order_id = fill.order_id.clone();
            }
            Outcome::Down => {
                position.down_contracts = fill.filled_size;
                position.down_avg_price = fill.avg_price;
                position.down_order_id = fill.order_id.clone();
            }
        }
        position.total_fees += fill.fee;
        position.recompute_cost();
        position.updated_at = Utc::now();

        self.fills.push(Trade {
            id: uuid::Uuid::new_v4().to_string(),
            position_id: position.id.clone(),
            order_id: fill.order_id.clone().unwrap_or_default(),
            market_id: position.market_id.clone(),
            token_id: fill.token_id.clone(),
            outcome,
            side: fill.side,
            detected_price,
            price: fill.avg_price,
            size: fill.filled_size,
            fee: fill.fee,
            latency_ms: fill.latency_ms,
            partial: fill.partial,
            executed_at: Utc::now(),
        });
    }

    // -- Exit --------------------------------------------------------------

    /// Settle at resolution: each winning contract pays $1.
    pub fn mark_settled(&mut self, position_id: &str, winning: Outcome) -> Result<f64> {
        let position = self
            .positions
            .get_mut(position_id)
            .ok_or_else(|| BotError::Validation(format!("unknown position {position_id}")))?;
        if position.state == PositionState::Settled {
            return Ok(position.realized_pnl.unwrap_or(0.0));
        }

        let settlement = match winning {
            Outcome::Up => position.up_contracts,
            Outcome::Down => position.down_contracts,
        };
        let realized = settlement - position.total_cost;
        let now = Utc::now();
        position.settlement_value = Some(settlement);
        position.realized_pnl = Some(realized);
        position.state = PositionState::Settled;
        position.settled_at = Some(now);
        position.updated_at = now;

        info!(
            position_id,
            winner = %winning,
            settlement = format!("${:.2}", settlement),
            pnl = format!("${:+.2}", realized),
            "Position settled"
        );
        Ok(realized)
    }

    /// Sell both legs at market before resolution.
    pub async fn close_position(&mut self, position_id: &str) -> Result<f64> {
        let position = self
            .positions
            .get_mut(position_id)
            .ok_or_else(|| BotError::Validation(format!("unknown position {position_id}")))?;
        if position.state == PositionState::Settled {
            return Ok(position.realized_pnl.unwrap_or(0.0));
        }
        position.state = PositionState::PendingExit;
        position.updated_at = Utc::now();

        let legs = [
            (position.up_token_id.clone(), position.up_contracts),
            (position.down_token_id.clone(), position.down_contracts),
        ];
        let mut proceeds = 0.0;
        for (token_id, contracts) in legs {
            if contracts <= 0.0 {
                continue;
            }
            let sell = self
                .executor
                .place_market_order(&token_id, OrderSide::Sell, contracts, None)
                .await?;
            if !filled(&sell) {
                warn!(
                    position_id,
                    token_id = %token_id,
                    error = sell.error.as_deref().unwrap_or("no fill"),
                    "Exit leg failed, position left pending exit"
                );
                return Err(BotError::OrderRejected(format!("exit of {token_id} did not fill")).into());
            }
            proceeds += sell.notional() - sell.fee;
        }

        let position = self
            .positions
            .get_mut(position_id)
            .ok_or_else(|| BotError::Validation(format!("unknown position {position_id}")))?;
        let realized = proceeds - position.total_cost;
        let now = Utc::now();
        position.settlement_value = Some(proceeds);
        position.realized_pnl = Some(realized);
        position.state = PositionState::Settled;
        position.settled_at = Some(now);
        position.updated_at = now;
        info!(position_id, proceeds = format!("${:.2}", proceeds), pnl = format!("${:+.2}", realized), "Position closed");
        Ok(realized)
    }

    // -- Queries -----------------------------------------------------------

    pub fn get(&self, position_id: &str) -> Option<&Position> {
        self.positions.get(position_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn get_positions_for_market(&self, market_id: &str) -> Vec<&Position> {
        self.positions.values().filter(|p| p.market_id == market_id).collect()
    }

    pub fn has_open_position(&self, market_id: &str) -> bool {
        self.positions
            .values()
            .any(|p| p.market_id == market_id && p.state.is_open())
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        self.positions.values().filter(|p| p.state.is_open()).collect()
    }

    pub fn partial_positions(&self) -> Vec<&Position> {
        self.positions
            .values()
            .filter(|p| p.state == PositionState::Partial)
            .collect()
    }

    pub fn total_exposure(&self) -> f64 {
        self.open_positions().iter().map(|p| p.total_cost).sum()
    }

    pub fn total_unrealized_pnl(&self) -> f64 {
        self.open_positions().iter().map(|p| p.unrealized_pnl()).sum()
    }

    pub fn total_realized_pnl(&self) -> f64 {
        self.positions.values().filter_map(|p| p.realized_pnl).sum()
    }

    pub fn get_position_summary(&self) -> PositionSummary {
        let count = |s: PositionState| self.positions.values().filter(|p| p.state == s).count();
        PositionSummary {
            total: self.positions.len(),
            open: self.open_positions().len(),
            complete: count(PositionState::Complete),
            partial: count(PositionState::Partial),
            settled: count(PositionState::Settled),
            total_exposure: self.total_exposure(),
            unrealized_pnl: self.total_unrealized_pnl(),
            realized_pnl: self.total_realized_pnl(),
        }
    }

    /// Fill records accumulated since the last call.
    pub fn take_fills(&mut self) -> Vec<Trade> {
        std::mem::take(&mut self.fills)
    }

    /// Positions sorted oldest first, for persistence.
    pub fn snapshot(&self) -> Vec<Position> {
        let mut out: Vec<Position> = self.positions.values().cloned().collect();
        out.sort_by_key(|p| p.created_at);
        out
    }

    /// Drop settled positions older than `max_age`.
    pub fn prune_settled(&mut self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.positions.len();
        self.positions
            .retain(|_, p| p.state != PositionState::Settled || p.settled_at.map_or(true, |t| t >= cutoff));
        before - self.positions.len()
    }
}

fn filled(result: &OrderResult) -> bool {
    result.success && result.filled_size > 0.0
}

/// Round down to the CLOB's 2-decimal size precision.
fn floor2(v: f64) -> f64 {
    (v * 100.0 + 1e-9).floor() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::MockOrderExecutor;
    use crate::types::tests::flash_market;

    fn opp(up: f64, down: f64) -> ArbitrageOpportunity {
        ArbitrageOpportunity {
            market: flash_market(up, down, 10),
            up_price: up,
            down_price: down,
            total_cost: up + down,
            profit_per_contract: 1.0 - (up + down),
            up_liquidity: 1000.0,
            down_liquidity: 1000.0,
            max_contracts: 1000.0,
            timestamp: Utc::now(),
            score: 50.0,
        }
    }

    fn fill(token: &str, size: f64, price: f64) -> OrderResult {
        OrderResult {
            success: true,
            order_id: Some(format!("ord-{token}")),
            token_id: token.to_string(),
            side: OrderSide::Buy,
            requested_size: size,
            filled_size: size,
            avg_price: price,
            fee: 0.0,
            slippage_pct: 0.0,
            latency_ms: 5.0,
            partial: false,
            error: None,
        }
    }

    fn filling_executor() -> MockOrderExecutor {
        let mut exec = MockOrderExecutor::new();
        exec.expect_place_market_order()
            .returning(|token, _, size, price| Ok(fill(token, size, price.unwrap_or(0.5))));
        exec
    }

    #[tokio::test]
    async fn test_open_position_both_legs() {
        let mut pm = PositionManager::new(Arc::new(filling_executor()));
        let pos = pm.open_position(&opp(0.45, 0.50), 100.0).await.unwrap().unwrap();

        assert_eq!(pos.state, PositionState::Complete);
        // $100 / $0.95 per pair
        assert!((pos.up_contracts - 105.26).abs() < 1e-9);
        assert!((pos.down_contracts - 105.26).abs() < 1e-9);
        assert!(pos.is_delta_neutral());
        assert!((pos.total_cost - 105.26 * 0.95).abs() < 1e-6);
        assert_eq!(pm.open_positions().len(), 1);
        assert!(pm.has_open_position("mkt-btc-1"));
        assert_eq!(pm.take_fills().len(), 2);
        assert!(pm.take_fills().is_empty());
    }

    #[tokio::test]
    async fn test_lopsided_prices_profit_either_way() {
        for winner in [Outcome::Up, Outcome::Down] {
            let mut pm = PositionManager::new(Arc::new(filling_executor()));
            let pos = pm.open_position(&opp(0.30, 0.65), 100.0).await.unwrap().unwrap();
            assert_eq!(pos.up_contracts, pos.down_contracts);

            let pnl = pm.mark_settled(&pos.id, winner).unwrap();
            // 105.26 pairs, 5 cents each
            assert!((pnl - 105.26 * 0.05).abs() < 1e-6, "{winner}: {pnl}");
        }
    }

    #[tokio::test]
    async fn test_down_leg_matches_partial_up_fill() {
        let mut exec = MockOrderExecutor::new();
        exec.expect_place_market_order()
            .withf(|t, _, _, _| t == "up-token")
            .returning(|token, _, size, price| {
                let mut r = fill(token, 60.0, price.unwrap_or(0.5));
                r.requested_size = size;
                r.partial = true;
                Ok(r)
            });
        exec.expect_place_market_order()
            .withf(|t, _, size, _| t == "down-token" && (*size - 60.0).abs() < 1e-9)
            .times(1)
            .returning(|token, _, size, price| Ok(fill(token, size, price.unwrap_or(0.5))));
        let mut pm = PositionManager::new(Arc::new(exec));

        let pos = pm.open_position(&opp(0.45, 0.50), 100.0).await.unwrap().unwrap();
        assert_eq!(pos.state, PositionState::Complete);
        assert!(pos.is_delta_neutral());
    }

    #[tokio::test]
    async fn test_size_too_small_for_one_pair() {
        let mut pm = PositionManager::new(Arc::new(MockOrderExecutor::new()));
        assert!(pm.open_position(&opp(0.45, 0.50), 0.005).await.is_err());
    }

    #[tokio::test]
    async fn test_up_leg_failure_creates_nothing() {
        let mut exec = MockOrderExecutor::new();
        exec.expect_place_market_order()
            .withf(|t, _, _, _| t == "up-token")
            .times(1)
            .returning(|token, side, size, _| Ok(OrderResult::failed(token, side, size, "killed")));
        let mut pm = PositionManager::new(Arc::new(exec));

        assert!(pm.open_position(&opp(0.45, 0.50), 100.0).await.unwrap().is_none());
        assert_eq!(pm.get_position_summary().total, 0);
    }

    #[tokio::test]
    async fn test_down_leg_failure_leaves_partial() {
        let mut exec = MockOrderExecutor::new();
        exec.expect_place_market_order()
            .withf(|t, _, _, _| t == "up-token")
            .returning(|token, _, size, price| Ok(fill(token, size, price.unwrap_or(0.5))));
        exec.expect_place_market_order()
            .withf(|t, _, _, _| t == "down-token")
            .returning(|token, side, size, _| Ok(OrderResult::failed(token, side, size, "killed")));
        let mut pm = PositionManager::new(Arc::new(exec));

        let pos = pm.open_position(&opp(0.45, 0.50), 100.0).await.unwrap().unwrap();
        assert_eq!(pos.state, PositionState::Partial);
        assert_eq!(pos.down_contracts, 0.0);
        assert_eq!(pm.partial_positions().len(), 1);
        assert!(!pos.is_delta_neutral());
    }

    #[tokio::test]
    async fn test_auth_error_on_down_leg_keeps_partial() {
        let mut exec = MockOrderExecutor::new();
        exec.expect_place_market_order()
            .withf(|t, _, _, _| t == "up-token")
            .returning(|token, _, size, price| Ok(fill(token, size, price.unwrap_or(0.5))));
        exec.expect_place_market_order()
            .withf(|t, _, _, _| t == "down-token")
            .returning(|_, _, _, _| {
                Err(BotError::Auth {
                    platform: "clob".into(),
                    message: "expired".into(),
                }
                .into())
            });
        let mut pm = PositionManager::new(Arc::new(exec));

        let err = pm.open_position(&opp(0.45, 0.50), 100.0).await.unwrap_err();
        assert!(crate::engine::executor::is_auth_error(&err));
        assert_eq!(pm.partial_positions().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_settled_pays_winning_leg() {
        let mut pm = PositionManager::new(Arc::new(filling_executor()));
        let pos = pm.open_position(&opp(0.40, 0.50), 90.0).await.unwrap().unwrap();
        let pnl = pm.mark_settled(&pos.id, Outcome::Down).unwrap();
        assert!((pnl - (pos.down_contracts - pos.total_cost)).abs() < 1e-9);
        // 100 pairs at $0.90
        assert!((pnl - 10.0).abs() < 1e-6);

        let settled = pm.get(&pos.id).unwrap();
        assert_eq!(settled.state, PositionState::Settled);
        assert!(settled.settled_at.is_some());
        assert_eq!(pm.total_exposure(), 0.0);
        // Idempotent
        assert_eq!(pm.mark_settled(&pos.id, Outcome::Up).unwrap(), pnl);
        assert!(pm.mark_settled("nope", Outcome::Up).is_err());
    }

    #[tokio::test]
    async fn test_close_position_sells_both_legs() {
        let mut exec = MockOrderExecutor::new();
        exec.expect_place_market_order()
            .withf(|_, side, _, _| *side == OrderSide::Buy)
            .returning(|token, _, size, price| Ok(fill(token, size, price.unwrap_or(0.5))));
        exec.expect_place_market_order()
            .withf(|_, side, _, price| *side == OrderSide::Sell && price.is_none())
            .times(2)
            .returning(|token, side, size, _| {
                let mut r = fill(token, size, 0.5);
                r.side = side;
                Ok(r)
            });
        let mut pm = PositionManager::new(Arc::new(exec));
        let pos = pm.open_position(&opp(0.45, 0.50), 100.0).await.unwrap().unwrap();

        let pnl = pm.close_position(&pos.id).await.unwrap();
        let expected = (pos.up_contracts + pos.down_contracts) * 0.5 - pos.total_cost;
        assert!((pnl - expected).abs() < 1e-6);
        assert_eq!(pm.get(&pos.id).unwrap().state, PositionState::Settled);
    }

    #[tokio::test]
    async fn test_summary_and_prune() {
        let mut pm = PositionManager::new(Arc::new(filling_executor()));
        let a = pm.open_position(&opp(0.45, 0.50), 100.0).await.unwrap().unwrap();
        pm.open_position(&opp(0.46, 0.50), 100.0).await.unwrap().unwrap();
        pm.mark_settled(&a.id, Outcome::Up).unwrap();

        let s = pm.get_position_summary();
        assert_eq!(s.total, 2);
        assert_eq!(s.open, 1);
        assert_eq!(s.settled, 1);
        assert!(s.unrealized_pnl > 0.0);
        assert_eq!(pm.get_positions_for_market("mkt-btc-1").len(), 2);

        assert_eq!(pm.prune_settled(chrono::Duration::zero()), 1);
        assert_eq!(pm.snapshot().len(), 1);
    }
}
