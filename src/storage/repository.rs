//! SQLite trade history.
//!
//! Tables:
//! - `trades`: one row per strategy signal, carried from SIGNAL through
//!   resolution
//! - `positions`: arbitrage positions, upserted on every state change
//! - `fills`: individual leg fills with the detected price, for slippage
//!   analysis
//! - `pnl_snapshots`: periodic P&L snapshots
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings so they sort
//! and compare lexically.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use crate::types::{BotError, Outcome, OrderSide, PnLSnapshot, Position, Side, Trade, TradeSignal, TradeStatus};

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Bad timestamp in database: {s}"))?
        .with_timezone(&Utc))
}

fn parse_side(s: &str) -> Result<Side> {
    match s {
        "YES" => Ok(Side::Yes),
        "NO" => Ok(Side::No),
        _ => anyhow::bail!("Unknown side in database: {s}"),
    }
}

/// A persisted strategy trade.
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub id: String,
    pub strategy_id: String,
    pub condition_id: String,
    pub token_id: Option<String>,
    pub question: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    /// Shares bought at the entry price.
    pub size: f64,
    pub stake: f64,
    pub confidence: f64,
    pub expected_value: f64,
    pub realized_pnl: Option<f64>,
    pub status: TradeStatus,
    pub paper_mode: bool,
    pub order_id: Option<String>,
    pub trigger_reason: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TradeRecord {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: String = row.try_get("status")?;
        let side: String = row.try_get("side")?;
        let created_at: String = row.try_get("created_at")?;
        let resolved_at: Option<String> = row.try_get("resolved_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            strategy_id: row.try_get("strategy_id")?,
            condition_id: row.try_get("condition_id")?,
            token_id: row.try_get("token_id")?,
            question: row.try_get("question")?,
            side: parse_side(&side)?,
            entry_price: row.try_get("entry_price")?,
            exit_price: row.try_get("exit_price")?,
            size: row.try_get("size")?,
            stake: row.try_get("stake")?,
            confidence: row.try_get("confidence")?,
            expected_value: row.try_get("expected_value")?,
            realized_pnl: row.try_get("realized_pnl")?,
            status: status.parse()?,
            paper_mode: row.try_get::<i64, _>("paper_mode")? != 0,
            order_id: row.try_get("order_id")?,
            trigger_reason: row.try_get("trigger_reason")?,
            created_at: parse_ts(&created_at)?,
            resolved_at: resolved_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

/// Per-strategy aggregate over the `trades` table.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyTradeStats {
    pub strategy_id: String,
    pub total: i64,
    pub wins: i64,
    pub losses: i64,
    pub pending: i64,
    pub total_stake: f64,
    pub realized_pnl: f64,
    pub avg_confidence: f64,
}

impl StrategyTradeStats {
    pub fn win_rate(&self) -> f64 {
        let resolved = self.wins + self.losses;
        if resolved == 0 {
            0.0
        } else {
            self.wins as f64 / resolved as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradeRepository {
    pool: SqlitePool,
}

impl TradeRepository {
    /// Open (creating if needed) the database at `url` and create the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database url: {url}"))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let repo = Self { pool };
        repo.migrate().await?;
        info!(url, "Database ready");
        Ok(repo)
    }

    /// Private in-memory database. One connection, since every SQLite
    /// memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;
        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                strategy_id TEXT NOT NULL,
                condition_id TEXT NOT NULL,
                token_id TEXT,
                question TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL,
                size REAL NOT NULL,
                stake REAL NOT NULL,
                potential_multiplier REAL NOT NULL,
                confidence REAL NOT NULL,
                expected_value REAL NOT NULL,
                realized_pnl REAL,
                status TEXT NOT NULL,
                paper_mode INTEGER NOT NULL DEFAULT 1,
                order_id TEXT,
                trigger_reason TEXT NOT NULL DEFAULT '',
                signal_data TEXT,
                snapshot_data TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                resolved_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                market_id TEXT NOT NULL,
                state TEXT NOT NULL,
                total_cost REAL NOT NULL,
                realized_pnl REAL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                settled_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fills (
                id TEXT PRIMARY KEY,
                position_id TEXT NOT NULL,
                order_id TEXT NOT NULL,
                market_id TEXT NOT NULL,
                token_id TEXT NOT NULL,
                outcome TEXT NOT NULL,
                side TEXT NOT NULL,
                detected_price REAL NOT NULL,
                price REAL NOT NULL,
                size REAL NOT NULL,
                fee REAL NOT NULL,
                latency_ms REAL NOT NULL,
                partial INTEGER NOT NULL,
                executed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pnl_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                unrealized_pnl REAL NOT NULL,
                realized_pnl REAL NOT NULL,
                total_pnl REAL NOT NULL,
                open_positions INTEGER NOT NULL,
                total_exposure REAL NOT NULL,
                daily_trades INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_trades_strategy ON trades(strategy_id)",
            "CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status)",
            "CREATE INDEX IF NOT EXISTS idx_trades_created ON trades(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_positions_created ON positions(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_fills_executed ON fills(executed_at)",
            "CREATE INDEX IF NOT EXISTS idx_snapshots_ts ON pnl_snapshots(timestamp)",
        ] {
            sqlx::query(stmt).execute(&self.pool).await?;
        }

        debug!("Database schema up to date");
        Ok(())
    }

    // -- trades ------------------------------------------------------------

    /// Persist a new signal with status SIGNAL. Returns the trade id.
    pub async fn insert_signal(&self, signal: &TradeSignal, paper_mode: bool) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = ts(Utc::now());
        let snapshot = signal
            .snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO trades (
                id, strategy_id, condition_id, token_id, question, side,
                entry_price, size, stake, potential_multiplier, confidence,
                expected_value, status, paper_mode, trigger_reason,
                signal_data, snapshot_data, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&signal.strategy_id)
        .bind(&signal.condition_id)
        .bind(&signal.token_id)
        .bind(&signal.question)
        .bind(signal.side.to_string())
        .bind(signal.entry_price)
        .bind(signal.potential_payout())
        .bind(signal.stake)
        .bind(signal.potential_multiplier())
        .bind(signal.confidence)
        .bind(signal.expected_value)
        .bind(TradeStatus::Signal.as_str())
        .bind(paper_mode as i64)
        .bind(&signal.trigger_reason)
        .bind(signal.signal_data.to_string())
        .bind(snapshot)
        .bind(ts(signal.created_at))
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("Failed to insert signal")?;

        debug!(trade_id = %id, strategy = %signal.strategy_id, "Signal persisted");
        Ok(id)
    }

    pub async fn update_trade_status(&self, trade_id: &str, status: TradeStatus, order_id: Option<&str>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE trades SET status = ?, order_id = COALESCE(?, order_id), updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(order_id)
        .bind(ts(Utc::now()))
        .bind(trade_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BotError::Storage(format!("trade {trade_id} not found")).into());
        }
        Ok(())
    }

    /// Mark a trade resolved at `exit_price` (1.0 for a winning token, 0.0
    /// for a losing one). Returns the realized P&L.
    pub async fn resolve_trade(&self, trade_id: &str, exit_price: f64) -> Result<f64> {
        let row = sqlx::query("SELECT size, stake FROM trades WHERE id = ?")
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| BotError::Storage(format!("trade {trade_id} not found")))?;
        let size: f64 = row.try_get("size")?;
        let stake: f64 = row.try_get("stake")?;

        let pnl = size * exit_price - stake;
        let status = if pnl > 0.0 {
            TradeStatus::ResolvedWin
        } else {
            TradeStatus::ResolvedLoss
        };
        let now = ts(Utc::now());

        sqlx::query(
            "UPDATE trades SET status = ?, exit_price = ?, realized_pnl = ?, resolved_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(exit_price)
        .bind(pnl)
        .bind(&now)
        .bind(&now)
        .bind(trade_id)
        .execute(&self.pool)
        .await?;

        info!(trade_id, %status, pnl, "Trade resolved");
        Ok(pnl)
    }

    pub async fn get_trade(&self, trade_id: &str) -> Result<Option<TradeRecord>> {
        sqlx::query("SELECT * FROM trades WHERE id = ?")
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(TradeRecord::from_row)
            .transpose()
    }

    /// Most recent trades first.
    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query("SELECT * FROM trades ORDER BY created_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(TradeRecord::from_row).collect()
    }

    /// Trades created at or after `since`, oldest first.
    pub async fn trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE created_at >= ? ORDER BY created_at ASC")
            .bind(ts(since))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(TradeRecord::from_row).collect()
    }

    pub async fn strategy_stats(&self) -> Result<Vec<StrategyTradeStats>> {
        let rows = sqlx::query(
            r#"
            SELECT
                strategy_id,
                COUNT(*) AS total,
                SUM(CASE WHEN status = 'RESOLVED_WIN' THEN 1 ELSE 0 END) AS wins,
                SUM(CASE WHEN status = 'RESOLVED_LOSS' THEN 1 ELSE 0 END) AS losses,
                SUM(CASE WHEN status IN ('SIGNAL', 'PENDING', 'FILLED', 'PARTIAL') THEN 1 ELSE 0 END) AS pending,
                COALESCE(SUM(stake), 0.0) AS total_stake,
                COALESCE(SUM(realized_pnl), 0.0) AS realized_pnl,
                COALESCE(AVG(confidence), 0.0) AS avg_confidence
            FROM trades
            GROUP BY strategy_id
            ORDER BY strategy_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(StrategyTradeStats {
                    strategy_id: r.try_get("strategy_id")?,
                    total: r.try_get("total")?,
                    wins: r.try_get("wins")?,
                    losses: r.try_get("losses")?,
                    pending: r.try_get("pending")?,
                    total_stake: r.try_get("total_stake")?,
                    realized_pnl: r.try_get("realized_pnl")?,
                    avg_confidence: r.try_get("avg_confidence")?,
                })
            })
            .collect()
    }

    // -- positions -----------------------------------------------------------

    pub async fn save_position(&self, position: &Position) -> Result<()> {
        let data = serde_json::to_string(position).context("Failed to serialise position")?;
        sqlx::query(
            r#"
            INSERT INTO positions (id, market_id, state, total_cost, realized_pnl, data, created_at, updated_at, settled_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                total_cost = excluded.total_cost,
                realized_pnl = excluded.realized_pnl,
                data = excluded.data,
                updated_at = excluded.updated_at,
                settled_at = excluded.settled_at
            "#,
        )
        .bind(&position.id)
        .bind(&position.market_id)
        .bind(position.state.to_string())
        .bind(position.total_cost)
        .bind(position.realized_pnl)
        .bind(data)
        .bind(ts(position.created_at))
        .bind(ts(position.updated_at))
        .bind(position.settled_at.map(ts))
        .execute(&self.pool)
        .await
        .context("Failed to save position")?;
        Ok(())
    }

    /// Positions opened at or after `since`, oldest first.
    pub async fn positions_since(&self, since: DateTime<Utc>) -> Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT data FROM positions WHERE created_at >= ? ORDER BY created_at ASC",
        )
        .bind(ts(since))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(data,)| serde_json::from_str(&data).context("Corrupt position row"))
            .collect()
    }

    // -- fills ---------------------------------------------------------------

    pub async fn save_fill(&self, fill: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO fills (
                id, position_id, order_id, market_id, token_id, outcome, side,
                detected_price, price, size, fee, latency_ms, partial, executed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&fill.id)
        .bind(&fill.position_id)
        .bind(&fill.order_id)
        .bind(&fill.market_id)
        .bind(&fill.token_id)
        .bind(fill.outcome.to_string())
        .bind(fill.side.as_str())
        .bind(fill.detected_price)
        .bind(fill.price)
        .bind(fill.size)
        .bind(fill.fee)
        .bind(fill.latency_ms)
        .bind(fill.partial as i64)
        .bind(ts(fill.executed_at))
        .execute(&self.pool)
        .await
        .context("Failed to save fill")?;
        Ok(())
    }

    pub async fn fills_since(&self, since: DateTime<Utc>) -> Result<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM fills WHERE executed_at >= ? ORDER BY executed_at ASC")
            .bind(ts(since))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| {
                let outcome: String = r.try_get("outcome")?;
                let side: String = r.try_get("side")?;
                let executed_at: String = r.try_get("executed_at")?;
                Ok(Trade {
                    id: r.try_get("id")?,
                    position_id: r.try_get("position_id")?,
                    order_id: r.try_get("order_id")?,
                    market_id: r.try_get("market_id")?,
                    token_id: r.try_get("token_id")?,
                    outcome: Outcome::from_label(&outcome)
                        .ok_or_else(|| anyhow::anyhow!("Unknown outcome in database: {outcome}"))?,
                    side: if side == "SELL" { OrderSide::Sell } else { OrderSide::Buy },
                    detected_price: r.try_get("detected_price")?,
                    price: r.try_get("price")?,
                    size: r.try_get("size")?,
                    fee: r.try_get("fee")?,
                    latency_ms: r.try_get("latency_ms")?,
                    partial: r.try_get::<i64, _>("partial")? != 0,
                    executed_at: parse_ts(&executed_at)?,
                })
            })
            .collect()
    }

    // -- P&L snapshots -------------------------------------------------------

    pub async fn record_snapshot(&self, snapshot: &PnLSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pnl_snapshots (
                timestamp, unrealized_pnl, realized_pnl, total_pnl,
                open_positions, total_exposure, daily_trades
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ts(snapshot.timestamp))
        .bind(snapshot.unrealized_pnl)
        .bind(snapshot.realized_pnl)
        .bind(snapshot.total_pnl)
        .bind(snapshot.open_positions as i64)
        .bind(snapshot.total_exposure)
        .bind(snapshot.daily_trades as i64)
        .execute(&self.pool)
        .await
        .context("Failed to record P&L snapshot")?;
        Ok(())
    }

    pub async fn snapshots_since(&self, since: DateTime<Utc>) -> Result<Vec<PnLSnapshot>> {
        let rows = sqlx::query("SELECT * FROM pnl_snapshots WHERE timestamp >= ? ORDER BY timestamp ASC")
            .bind(ts(since))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| {
                let timestamp: String = r.try_get("timestamp")?;
                Ok(PnLSnapshot {
                    timestamp: parse_ts(&timestamp)?,
                    unrealized_pnl: r.try_get("unrealized_pnl")?,
                    realized_pnl: r.try_get("realized_pnl")?,
                    total_pnl: r.try_get("total_pnl")?,
                    open_positions: r.try_get::<i64, _>("open_positions")?.max(0) as usize,
                    total_exposure: r.try_get("total_exposure")?,
                    daily_trades: r.try_get::<i64, _>("daily_trades")?.max(0) as u64,
                })
            })
            .collect()
    }
}
