//! Shared types for POLYBOT.
//!
//! These types form the data model used across all modules. Platform,
//! strategy and engine modules depend on them, never the other way round.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::simulator::SimulationStats;
use crate::monitoring::latency::LatencyStats;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// One leg of a binary UP/DOWN market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Up,
    Down,
}

impl Outcome {
    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Up => Outcome::Down,
            Outcome::Down => Outcome::Up,
        }
    }

    /// Map an outcome label from the market data API onto a leg.
    ///
    /// "Up", "Yes" and "Higher" are the UP leg; "Down", "No" and "Lower"
    /// are the DOWN leg.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "up" | "yes" | "higher" => Some(Outcome::Up),
            "down" | "no" | "lower" => Some(Outcome::Down),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Up => write!(f, "UP"),
            Outcome::Down => write!(f, "DOWN"),
        }
    }
}

/// Which token a directional signal buys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

/// Order direction on the CLOB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order time-in-force supported by the Polymarket CLOB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Good till cancelled.
    Gtc,
    /// Good till date.
    Gtd,
    /// Fill or kill.
    Fok,
    /// Fill and kill: partial fill allowed, remainder cancelled.
    Fak,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Gtc => "GTC",
            OrderType::Gtd => "GTD",
            OrderType::Fok => "FOK",
            OrderType::Fak => "FAK",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketType {
    Flash15m,
    Hourly,
    Daily,
    Other,
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketType::Flash15m => write!(f, "flash_15m"),
            MarketType::Hourly => write!(f, "hourly"),
            MarketType::Daily => write!(f, "daily"),
            MarketType::Other => write!(f, "other"),
        }
    }
}

/// Coarse market category, used by the signal strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketCategory {
    Crypto,
    Politics,
    Sports,
    Economics,
    Culture,
    Weather,
    Other,
}

impl fmt::Display for MarketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketCategory::Crypto => write!(f, "Crypto"),
            MarketCategory::Politics => write!(f, "Politics"),
            MarketCategory::Sports => write!(f, "Sports"),
            MarketCategory::Economics => write!(f, "Economics"),
            MarketCategory::Culture => write!(f, "Culture"),
            MarketCategory::Weather => write!(f, "Weather"),
            MarketCategory::Other => write!(f, "Other"),
        }
    }
}

impl std::str::FromStr for MarketCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crypto" | "cryptocurrency" => Ok(MarketCategory::Crypto),
            "politics" | "political" | "elections" => Ok(MarketCategory::Politics),
            "sports" | "sport" => Ok(MarketCategory::Sports),
            "economics" | "economy" | "finance" => Ok(MarketCategory::Economics),
            "culture" | "entertainment" | "pop-culture" => Ok(MarketCategory::Culture),
            "weather" | "climate" => Ok(MarketCategory::Weather),
            "other" => Ok(MarketCategory::Other),
            _ => Err(anyhow::anyhow!("Unknown market category: {s}")),
        }
    }
}

/// Arbitrage position lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionState {
    /// Waiting for the first leg.
    PendingEntry,
    /// One leg filled, the other missing.
    Partial,
    /// Both legs filled.
    Complete,
    /// Waiting for settlement or an exit fill.
    PendingExit,
    Settled,
}

impl PositionState {
    pub fn is_open(&self) -> bool {
        !matches!(self, PositionState::Settled)
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionState::PendingEntry => write!(f, "pending_entry"),
            PositionState::Partial => write!(f, "partial"),
            PositionState::Complete => write!(f, "complete"),
            PositionState::PendingExit => write!(f, "pending_exit"),
            PositionState::Settled => write!(f, "settled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Open,
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
}

/// Lifecycle of a persisted trade row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeStatus {
    Signal,
    Pending,
    Filled,
    Partial,
    Cancelled,
    ResolvedWin,
    ResolvedLoss,
    Expired,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Signal => "SIGNAL",
            TradeStatus::Pending => "PENDING",
            TradeStatus::Filled => "FILLED",
            TradeStatus::Partial => "PARTIAL",
            TradeStatus::Cancelled => "CANCELLED",
            TradeStatus::ResolvedWin => "RESOLVED_WIN",
            TradeStatus::ResolvedLoss => "RESOLVED_LOSS",
            TradeStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, TradeStatus::ResolvedWin | TradeStatus::ResolvedLoss)
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TradeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SIGNAL" => Ok(TradeStatus::Signal),
            "PENDING" => Ok(TradeStatus::Pending),
            "FILLED" => Ok(TradeStatus::Filled),
            "PARTIAL" => Ok(TradeStatus::Partial),
            "CANCELLED" => Ok(TradeStatus::Cancelled),
            "RESOLVED_WIN" => Ok(TradeStatus::ResolvedWin),
            "RESOLVED_LOSS" => Ok(TradeStatus::ResolvedLoss),
            "EXPIRED" => Ok(TradeStatus::Expired),
            _ => Err(anyhow::anyhow!("Unknown trade status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    Buy,
    Sell,
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// The UP/DOWN token pair of a binary market with the latest asks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenPair {
    pub up_token_id: String,
    pub down_token_id: String,
    pub up_price: f64,
    pub down_price: f64,
    pub up_liquidity: f64,
    pub down_liquidity: f64,
}

impl TokenPair {
    pub fn new(up_token_id: impl Into<String>, down_token_id: impl Into<String>) -> Self {
        Self {
            up_token_id: up_token_id.into(),
            down_token_id: down_token_id.into(),
            ..Default::default()
        }
    }

    /// Cost of buying one contract of each leg.
    pub fn total_cost(&self) -> f64 {
        self.up_price + self.down_price
    }

    pub fn profit_per_contract(&self) -> f64 {
        1.0 - self.total_cost()
    }

    pub fn is_profitable(&self) -> bool {
        self.total_cost() < 1.0
    }

    pub fn token_for(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Up => &self.up_token_id,
            Outcome::Down => &self.down_token_id,
        }
    }
}

/// A Polymarket binary market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub condition_id: String,
    pub question: String,
    #[serde(default)]
    pub description: String,
    pub slug: String,
    pub market_type: MarketType,
    /// BTC, ETH or SOL for crypto flash markets.
    pub asset: Option<String>,
    pub tokens: Option<TokenPair>,
    pub end_time: Option<DateTime<Utc>>,
    pub volume: f64,
    pub liquidity: f64,
    pub active: bool,
    pub closed: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category: MarketCategory,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tokens {
            Some(t) => write!(
                f,
                "[{}] {} (UP: {:.3} | DOWN: {:.3} | vol: ${:.0})",
                self.asset.as_deref().unwrap_or("?"),
                self.question,
                t.up_price,
                t.down_price,
                self.volume,
            ),
            None => write!(f, "[{}] {} (no tokens)", self.market_type, self.question),
        }
    }
}

impl Market {
    /// Seconds until close, clamped at zero. `None` when no end time is known.
    pub fn time_to_close_seconds(&self) -> Option<f64> {
        self.end_time.map(|end| {
            let secs = (end - Utc::now()).num_milliseconds() as f64 / 1000.0;
            secs.max(0.0)
        })
    }

    pub fn is_closed(&self) -> bool {
        if self.closed {
            return true;
        }
        match self.end_time {
            Some(end) => Utc::now() >= end,
            None => false,
        }
    }

    pub fn hours_to_expiry(&self) -> Option<f64> {
        self.time_to_close_seconds().map(|s| s / 3600.0)
    }

    pub fn is_flash(&self) -> bool {
        self.market_type == MarketType::Flash15m
    }

    /// Flatten into the view the signal strategies consume. UP is read as YES.
    pub fn snapshot(&self) -> MarketSnapshot {
        let (yes_token, no_token, yes_price, no_price) = match &self.tokens {
            Some(t) => (
                Some(t.up_token_id.clone()),
                Some(t.down_token_id.clone()),
                t.up_price,
                t.down_price,
            ),
            None => (None, None, 0.0, 0.0),
        };
        let spread_bps = match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) if ask > 0.0 => (ask - bid) / ask * 10_000.0,
            _ => 0.0,
        };
        MarketSnapshot {
            condition_id: self.condition_id.clone(),
            question: self.question.clone(),
            category: self.category,
            yes_token_id: yes_token,
            no_token_id: no_token,
            yes_price,
            no_price,
            best_bid: self.best_bid,
            best_ask: self.best_ask,
            spread_bps,
            volume_24h: self.volume,
            volume_1h: self.volume / 24.0,
            liquidity: self.liquidity,
            hours_to_expiry: self.hours_to_expiry(),
        }
    }
}

/// Standardised market view passed to every signal strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub condition_id: String,
    pub question: String,
    pub category: MarketCategory,
    pub yes_token_id: Option<String>,
    pub no_token_id: Option<String>,
    pub yes_price: f64,
    pub no_price: f64,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub spread_bps: f64,
    pub volume_24h: f64,
    pub volume_1h: f64,
    pub liquidity: f64,
    pub hours_to_expiry: Option<f64>,
}

impl MarketSnapshot {
    /// Payout multiple of the YES token.
    pub fn multiplier(&self) -> f64 {
        if self.yes_price > 0.0 {
            1.0 / self.yes_price
        } else {
            0.0
        }
    }

    pub fn token_for(&self, side: Side) -> Option<&str> {
        match side {
            Side::Yes => self.yes_token_id.as_deref(),
            Side::No => self.no_token_id.as_deref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Order book
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

/// CLOB book for one token. Bids descend, asks ascend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub token_id: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    /// Sort levels best-first.
    pub fn normalize(mut self) -> Self {
        self.bids
            .sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal));
        self.asks
            .sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
        self
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((a + b) / 2.0),
            _ => None,
        }
    }

    /// Ask size available within 1% of the best ask.
    pub fn ask_liquidity_near_best(&self) -> f64 {
        match self.best_ask() {
            Some(best) => self
                .asks
                .iter()
                .filter(|l| l.price <= best * 1.01)
                .map(|l| l.size)
                .sum(),
            None => 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Arbitrage opportunity
// ---------------------------------------------------------------------------

/// A detected UP + DOWN < $1 opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub market: Market,
    pub up_price: f64,
    pub down_price: f64,
    pub total_cost: f64,
    pub profit_per_contract: f64,
    pub up_liquidity: f64,
    pub down_liquidity: f64,
    /// Contract count bounded by the thinner leg.
    pub max_contracts: f64,
    pub timestamp: DateTime<Utc>,
    pub score: f64,
}

impl fmt::Display for ArbitrageOpportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} UP={:.4} DOWN={:.4} total={:.4} profit={:.4} max={:.0} score={:.1}",
            self.market.asset.as_deref().unwrap_or("?"),
            self.up_price,
            self.down_price,
            self.total_cost,
            self.profit_per_contract,
            self.max_contracts,
            self.score,
        )
    }
}

impl ArbitrageOpportunity {
    pub fn expected_profit(&self) -> f64 {
        self.profit_per_contract * self.max_contracts
    }

    pub fn min_liquidity(&self) -> f64 {
        self.up_liquidity.min(self.down_liquidity)
    }

    /// Quality score in [0, 100]: up to 40 points for margin, 30 for
    /// liquidity and 30 for time left (full marks at 15 minutes).
    pub fn calculate_score(&mut self) -> f64 {
        let profit_score = (self.profit_per_contract * 400.0).clamp(0.0, 40.0);
        let liquidity_score = (self.min_liquidity() / 100.0).clamp(0.0, 30.0);
        let time_to_close = self.market.time_to_close_seconds().unwrap_or(0.0);
        let time_score = (time_to_close / 30.0).clamp(0.0, 30.0);

        self.score = profit_score + liquidity_score + time_score;
        self.score
    }
}

// ---------------------------------------------------------------------------
// Orders & fills
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Option<String>,
    pub market_id: String,
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
    pub filled_size: f64,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a single order submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub token_id: String,
    pub side: OrderSide,
    pub requested_size: f64,
    pub filled_size: f64,
    pub avg_price: f64,
    pub fee: f64,
    pub slippage_pct: f64,
    pub latency_ms: f64,
    pub partial: bool,
    pub error: Option<String>,
}

impl OrderResult {
    pub fn failed(token_id: &str, side: OrderSide, size: f64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            token_id: token_id.to_string(),
            side,
            requested_size: size,
            filled_size: 0.0,
            avg_price: 0.0,
            fee: 0.0,
            slippage_pct: 0.0,
            latency_ms: 0.0,
            partial: false,
            error: Some(error.into()),
        }
    }

    pub fn notional(&self) -> f64 {
        self.filled_size * self.avg_price
    }
}

impl fmt::Display for OrderResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(
                f,
                "{} {:.2}/{:.2} @ {:.4} fee=${:.4} [{}]",
                self.side,
                self.filled_size,
                self.requested_size,
                self.avg_price,
                self.fee,
                self.order_id.as_deref().unwrap_or("-"),
            )
        } else {
            write!(
                f,
                "{} {:.2} FAILED: {}",
                self.side,
                self.requested_size,
                self.error.as_deref().unwrap_or("unknown"),
            )
        }
    }
}

/// A filled leg, as recorded for post-trade analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub position_id: String,
    pub order_id: String,
    pub market_id: String,
    pub token_id: String,
    pub outcome: Outcome,
    pub side: OrderSide,
    /// Price seen when the opportunity was detected.
    pub detected_price: f64,
    /// Volume-weighted fill price.
    pub price: f64,
    pub size: f64,
    pub fee: f64,
    pub latency_ms: f64,
    pub partial: bool,
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    pub fn slippage_pct(&self) -> f64 {
        if self.detected_price > 0.0 {
            (self.price - self.detected_price) / self.detected_price * 100.0
        } else {
            0.0
        }
    }

    pub fn net_cost(&self) -> f64 {
        self.size * self.price + self.fee
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// Both legs of a delta-neutral arbitrage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub market_id: String,
    pub market: Option<Market>,
    pub state: PositionState,

    pub up_token_id: String,
    pub up_contracts: f64,
    pub up_avg_price: f64,
    pub up_order_id: Option<String>,

    pub down_token_id: String,
    pub down_contracts: f64,
    pub down_avg_price: f64,
    pub down_order_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,

    pub total_cost: f64,
    pub total_fees: f64,
    pub settlement_value: Option<f64>,
    pub realized_pnl: Option<f64>,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} UP={:.2}@{:.4} DOWN={:.2}@{:.4} cost=${:.2} delta={:+.2}",
            self.state,
            self.market_id,
            self.up_contracts,
            self.up_avg_price,
            self.down_contracts,
            self.down_avg_price,
            self.total_cost,
            self.delta(),
        )
    }
}

impl Position {
    pub fn new(market: &Market) -> Self {
        let now = Utc::now();
        let (up_token_id, down_token_id) = market
            .tokens
            .as_ref()
            .map(|t| (t.up_token_id.clone(), t.down_token_id.clone()))
            .unwrap_or_default();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            market_id: market.id.clone(),
            market: Some(market.clone()),
            state: PositionState::PendingEntry,
            up_token_id,
            up_contracts: 0.0,
            up_avg_price: 0.0,
            up_order_id: None,
            down_token_id,
            down_contracts: 0.0,
            down_avg_price: 0.0,
            down_order_id: None,
            created_at: now,
            updated_at: now,
            settled_at: None,
            total_cost: 0.0,
            total_fees: 0.0,
            settlement_value: None,
            realized_pnl: None,
        }
    }

    /// UP contracts minus DOWN contracts.
    pub fn delta(&self) -> f64 {
        self.up_contracts - self.down_contracts
    }

    pub fn is_delta_neutral(&self) -> bool {
        let scale = self.up_contracts.max(self.down_contracts).max(1.0);
        self.delta().abs() < 0.01 * scale
    }

    pub fn combined_avg_price(&self) -> f64 {
        self.up_avg_price + self.down_avg_price
    }

    pub fn expected_profit_per_contract(&self) -> f64 {
        1.0 - self.combined_avg_price()
    }

    /// P&L locked in by the hedged contracts, assuming settlement at $1.
    pub fn unrealized_pnl(&self) -> f64 {
        self.up_contracts.min(self.down_contracts) * self.expected_profit_per_contract()
    }

    pub fn asset(&self) -> &str {
        self.market
            .as_ref()
            .and_then(|m| m.asset.as_deref())
            .unwrap_or("?")
    }

    pub fn recompute_cost(&mut self) {
        self.total_cost =
            self.up_contracts * self.up_avg_price + self.down_contracts * self.down_avg_price;
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// A directional trade proposed by one of the signal strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub strategy_id: String,
    pub signal_type: SignalType,
    pub condition_id: String,
    pub token_id: Option<String>,
    pub question: String,
    pub side: Side,
    pub entry_price: f64,
    /// USD committed.
    pub stake: f64,
    pub confidence: f64,
    pub expected_value: f64,
    pub trigger_reason: String,
    pub signal_data: serde_json::Value,
    pub snapshot: Option<MarketSnapshot>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for TradeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] BUY {}@{:.4} ${:.2} (conf={:.0}%, EV={:+.2}) {}",
            self.strategy_id,
            self.side,
            self.entry_price,
            self.stake,
            self.confidence * 100.0,
            self.expected_value,
            self.question,
        )
    }
}

impl TradeSignal {
    /// Build a BUY signal from a market snapshot.
    ///
    /// Rejects non-positive stakes and prices or confidences outside [0, 1].
    pub fn buy(
        strategy_id: &str,
        market: &MarketSnapshot,
        side: Side,
        entry_price: f64,
        stake: f64,
        confidence: f64,
    ) -> Result<Self, BotError> {
        if !(stake > 0.0) {
            return Err(BotError::Validation(format!("stake must be positive, got {stake}")));
        }
        if !(0.0..=1.0).contains(&entry_price) {
            return Err(BotError::Validation(format!(
                "entry price must be within [0, 1], got {entry_price}"
            )));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(BotError::Validation(format!(
                "confidence must be within [0, 1], got {confidence}"
            )));
        }
        Ok(Self {
            strategy_id: strategy_id.to_string(),
            signal_type: SignalType::Buy,
            condition_id: market.condition_id.clone(),
            token_id: market.token_for(side).map(str::to_string),
            question: market.question.clone(),
            side,
            entry_price,
            stake,
            confidence,
            expected_value: 0.0,
            trigger_reason: String::new(),
            signal_data: serde_json::Value::Null,
            snapshot: None,
            created_at: Utc::now(),
        })
    }

    pub fn with_expected_value(mut self, ev: f64) -> Self {
        self.expected_value = ev;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>, data: serde_json::Value) -> Self {
        self.trigger_reason = reason.into();
        self.signal_data = data;
        self
    }

    /// Shares received if the stake is fully filled at the entry price.
    pub fn potential_payout(&self) -> f64 {
        if self.entry_price > 0.0 {
            self.stake / self.entry_price
        } else {
            0.0
        }
    }

    pub fn potential_multiplier(&self) -> f64 {
        if self.entry_price > 0.0 {
            1.0 / self.entry_price
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Stink bids
// ---------------------------------------------------------------------------

/// A resting limit bid far below the market, waiting for a crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StinkBid {
    pub market_id: String,
    pub question: String,
    pub token_id: String,
    pub bid_price: f64,
    pub size: f64,
    pub target_exit: f64,
    pub ttl_secs: i64,
    pub placed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub order_id: Option<String>,
    /// Times this bid has been cancelled and re-placed.
    pub rotations: u32,
}

impl StinkBid {
    pub fn new(
        market_id: &str,
        question: &str,
        token_id: &str,
        bid_price: f64,
        size: f64,
        target_exit: f64,
        ttl_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, BotError> {
        if !(bid_price > 0.0 && bid_price < target_exit && target_exit <= 1.0) {
            return Err(BotError::Validation(format!(
                "stink bid needs 0 < bid < exit <= 1, got bid={bid_price} exit={target_exit}"
            )));
        }
        if !(size > 0.0) {
            return Err(BotError::Validation(format!("stink bid size must be positive, got {size}")));
        }
        if ttl_secs <= 0 {
            return Err(BotError::Validation(format!("stink bid TTL must be positive, got {ttl_secs}")));
        }
        Ok(Self {
            market_id: market_id.to_string(),
            question: question.to_string(),
            token_id: token_id.to_string(),
            bid_price,
            size,
            target_exit,
            ttl_secs,
            placed_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_secs),
            order_id: None,
            rotations: 0,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// USD tied up if the bid fills completely.
    pub fn notional(&self) -> f64 {
        self.bid_price * self.size
    }

    /// Reset the clock for a re-placed bid.
    pub fn renew(&mut self, now: DateTime<Utc>) {
        self.placed_at = now;
        self.expires_at = now + chrono::Duration::seconds(self.ttl_secs);
        self.order_id = None;
        self.rotations += 1;
    }
}

impl fmt::Display for StinkBid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2}@{:.3} -> {:.3} (expires {}) {}",
            self.size,
            self.bid_price,
            self.target_exit,
            self.expires_at.format("%H:%M:%S"),
            self.question,
        )
    }
}

// ---------------------------------------------------------------------------
// P&L
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnLSnapshot {
    pub timestamp: DateTime<Utc>,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub total_pnl: f64,
    pub open_positions: usize,
    pub total_exposure: f64,
    pub daily_trades: u64,
}

// ---------------------------------------------------------------------------
// Bot state
// ---------------------------------------------------------------------------

/// Persistent bot state, saved to disk after each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotState {
    pub start_time: DateTime<Utc>,
    pub paper_trading: bool,
    pub cycle_count: u64,
    pub opportunities_found: u64,
    pub trades_executed: u64,
    pub signals_generated: u64,
    pub realized_pnl: f64,
    pub daily_pnl: f64,
    pub daily_date: NaiveDate,
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub paper_balance: f64,
    pub positions: Vec<Position>,
    pub stink_bids: Vec<StinkBid>,
    #[serde(default)]
    pub latency: Vec<LatencyStats>,
    #[serde(default)]
    pub simulation: Option<SimulationStats>,
}

impl fmt::Display for BotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | cycles={} | opps={} | trades={} | realized=${:+.2} | daily=${:+.2} | open={}",
            if self.halted { "HALTED" } else { "ACTIVE" },
            self.cycle_count,
            self.opportunities_found,
            self.trades_executed,
            self.realized_pnl,
            self.daily_pnl,
            self.open_positions().count(),
        )
    }
}

impl BotState {
    pub fn new(paper_trading: bool, paper_balance: f64) -> Self {
        Self {
            start_time: Utc::now(),
            paper_trading,
            cycle_count: 0,
            opportunities_found: 0,
            trades_executed: 0,
            signals_generated: 0,
            realized_pnl: 0.0,
            daily_pnl: 0.0,
            daily_date: Utc::now().date_naive(),
            halted: false,
            halt_reason: None,
            paper_balance,
            positions: Vec::new(),
            stink_bids: Vec::new(),
            latency: Vec::new(),
            simulation: None,
        }
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|p| p.state.is_open())
    }

    pub fn total_exposure(&self) -> f64 {
        self.open_positions().map(|p| p.total_cost).sum()
    }

    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.start_time
    }
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// Summary of one scan → detect → execute cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub timestamp: DateTime<Utc>,
    pub markets_scanned: usize,
    pub flash_markets: usize,
    pub opportunities_found: usize,
    pub positions_opened: usize,
    pub positions_settled: usize,
    pub signals_generated: usize,
    pub stink_bids_active: usize,
    pub realized_pnl: f64,
    pub total_exposure: f64,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cycle #{}: scanned={} flash={} opps={} opened={} settled={} signals={} stink={} pnl=${:+.2} exposure=${:.2}",
            self.cycle_number,
            self.markets_scanned,
            self.flash_markets,
            self.opportunities_found,
            self.positions_opened,
            self.positions_settled,
            self.signals_generated,
            self.stink_bids_active,
            self.realized_pnl,
            self.total_exposure,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for POLYBOT.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Platform error ({platform}): {message}")]
    Platform {
        platform: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Rate limited by {platform}")]
    RateLimited { platform: String },

    #[error("Authentication rejected by {platform}: {message}")]
    Auth { platform: String, message: String },

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Risk limit exceeded: {0}")]
    RiskLimit(String),

    #[error("Insufficient balance: need ${needed:.2}, have ${available:.2}")]
    InsufficientBalance { needed: f64, available: f64 },

    #[error("Market not found: {0}")]
    MarketNotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl BotError {
    /// Whether a retry may succeed: rate limits, 5xx and transport errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            BotError::RateLimited { .. } => true,
            BotError::Platform { status, .. } => match status {
                Some(code) => *code >= 500,
                None => true,
            },
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, BotError::Auth { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
