//! Telegram alerts.
//!
//! Alerts are queued on an mpsc channel and posted to the Telegram Bot API
//! by a background task, so the trading loop never waits on the network.
//! Without a bot token and chat id the manager only logs.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::types::{ArbitrageOpportunity, Outcome};

const TELEGRAM_API: &str = "https://api.telegram.org";
const HISTORY_LEN: usize = 100;
const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertType {
    TradeExecuted,
    OpportunityFound,
    PositionSettled,
    Error,
    Warning,
    DailySummary,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertType::TradeExecuted => "trade_executed",
            AlertType::OpportunityFound => "opportunity_found",
            AlertType::PositionSettled => "position_settled",
            AlertType::Error => "error",
            AlertType::Warning => "warning",
            AlertType::DailySummary => "daily_summary",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(alert_type: AlertType, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            alert_type,
            title: title.into(),
            message: message.into(),
            data: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Message body for Telegram's HTML parse mode.
    pub fn to_html(&self) -> String {
        format!("<b>{}</b>\n\n{}", escape_html(&self.title), escape_html(&self.message))
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

type History = Arc<Mutex<VecDeque<Alert>>>;

fn push_history(history: &History, alert: Alert) {
    let mut h = history.lock().unwrap_or_else(|e| e.into_inner());
    h.push_back(alert);
    while h.len() > HISTORY_LEN {
        h.pop_front();
    }
}

#[derive(Debug, Clone)]
pub struct AlertManager {
    tx: Option<mpsc::Sender<Alert>>,
    history: History,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::disabled()
    }
}

impl AlertManager {
    /// Log-only manager.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            history: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Start the Telegram sender when both credentials are present.
    /// Must be called inside a tokio runtime.
    pub fn spawn(token: Option<Secret<String>>, chat_id: Option<String>) -> anyhow::Result<Self> {
        let (token, chat_id) = match (token, chat_id) {
            (Some(t), Some(c)) => (t, c),
            _ => {
                info!("Alerts disabled (no Telegram credentials)");
                return Ok(Self::disabled());
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let history: History = Arc::new(Mutex::new(VecDeque::new()));

        let url = format!("{TELEGRAM_API}/bot{}/sendMessage", token.expose_secret());
        tokio::spawn(run_sender(rx, client, Secret::new(url), chat_id, Arc::clone(&history)));
        info!("Alert manager started");

        Ok(Self { tx: Some(tx), history })
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an alert. Never blocks; a full queue drops the alert.
    pub fn send(&self, alert: Alert) {
        match &self.tx {
            Some(tx) => {
                if let Err(e) = tx.try_send(alert) {
                    warn!(error = %e, "Alert queue full, dropping alert");
                }
            }
            None => {
                info!(
                    alert_type = %alert.alert_type,
                    title = %alert.title,
                    message = %alert.message.chars().take(100).collect::<String>(),
                    "Alert (Telegram disabled)"
                );
                push_history(&self.history, alert);
            }
        }
    }

    pub fn trade_executed(&self, market_id: &str, asset: &str, side: &str, size_usdc: f64, price: f64, pnl: Option<f64>) {
        let pnl_text = pnl.map(|p| format!(" | P&L: ${p:.2}")).unwrap_or_default();
        self.send(
            Alert::new(
                AlertType::TradeExecuted,
                "Trade Executed",
                format!("{asset} {side}\nSize: ${size_usdc:.2} @ {price:.4}{pnl_text}"),
            )
            .with_data(serde_json::json!({
                "market_id": market_id,
                "asset": asset,
                "side": side,
                "size": size_usdc,
            })),
        );
    }

    pub fn opportunity_found(&self, opp: &ArbitrageOpportunity) {
        let asset = opp.market.asset.as_deref().unwrap_or("?");
        self.send(
            Alert::new(
                AlertType::OpportunityFound,
                "Opportunity Found",
                format!(
                    "{asset} flash market\nProfit: {:.2}% (${:.4}/contract)\nCost: ${:.4} | Max: {:.0} contracts",
                    opp.profit_per_contract * 100.0,
                    opp.profit_per_contract,
                    opp.total_cost,
                    opp.max_contracts,
                ),
            )
            .with_data(serde_json::json!({
                "market_id": opp.market.id,
                "profit": opp.profit_per_contract,
                "total_cost": opp.total_cost,
            })),
        );
    }

    pub fn position_settled(&self, asset: &str, winning: Outcome, realized_pnl: f64) {
        self.send(Alert::new(
            AlertType::PositionSettled,
            if realized_pnl >= 0.0 { "Position Settled (profit)" } else { "Position Settled (loss)" },
            format!("{asset} | Winner: {winning}\nRealized P&L: ${realized_pnl:.2}"),
        ));
    }

    pub fn error(&self, error: &str, context: Option<&str>) {
        let message = match context {
            Some(c) => format!("{error}\n\nContext: {c}"),
            None => error.to_string(),
        };
        self.send(Alert::new(AlertType::Error, "Error", message));
    }

    pub fn warning(&self, message: &str) {
        self.send(Alert::new(AlertType::Warning, "Warning", message));
    }

    pub fn daily_summary(&self, trades: u64, realized_pnl: f64, win_rate: f64, exposure: f64) {
        self.send(Alert::new(
            AlertType::DailySummary,
            "Daily Summary",
            format!(
                "Trades: {trades}\nP&L: ${realized_pnl:.2}\nWin Rate: {:.1}%\nExposure: ${exposure:.2}",
                win_rate * 100.0
            ),
        ));
    }

    /// The last `count` alerts delivered (or logged), oldest first.
    pub fn recent(&self, count: usize) -> Vec<Alert> {
        let h = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let start = h.len().saturating_sub(count);
        h.iter().skip(start).cloned().collect()
    }
}

async fn run_sender(
    mut rx: mpsc::Receiver<Alert>,
    client: reqwest::Client,
    url: Secret<String>,
    chat_id: String,
    history: History,
) {
    while let Some(alert) = rx.recv().await {
        let payload = serde_json::json!({
            "chat_id": chat_id,
            "text": alert.to_html(),
            "parse_mode": "HTML",
        });
        let result = client
            .post(url.expose_secret())
            .json(&payload)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => {
                debug!(alert_type = %alert.alert_type, "Telegram alert sent");
                push_history(&history, alert);
            }
            // The error text can contain the token-bearing URL.
            Err(e) => error!(status = ?e.status(), "Telegram send failed"),
        }
    }
    debug!("Alert sender stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::flash_market;

    #[test]
    fn test_html_escaping() {
        let alert = Alert::new(AlertType::Error, "Bad <tag>", "a & b > c");
        assert_eq!(alert.to_html(), "<b>Bad &lt;tag&gt;</b>\n\na &amp; b &gt; c");
    }

    #[test]
    fn test_disabled_manager_keeps_history() {
        let alerts = AlertManager::disabled();
        assert!(!alerts.is_enabled());
        alerts.error("boom", Some("cycle 3"));
        alerts.position_settled("BTC", Outcome::Up, 1.25);

        let recent = alerts.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].alert_type, AlertType::Error);
        assert!(recent[0].message.contains("Context: cycle 3"));
        assert!(recent[1].message.contains("Winner: UP"));
    }

    #[test]
    fn test_history_capped() {
        let alerts = AlertManager::disabled();
        for i in 0..150 {
            alerts.warning(&format!("w{i}"));
        }
        let recent = alerts.recent(500);
        assert_eq!(recent.len(), HISTORY_LEN);
        assert_eq!(recent[0].message, "w50");
        assert_eq!(alerts.recent(1)[0].message, "w149");
    }

    #[test]
    fn test_opportunity_message() {
        let alerts = AlertManager::disabled();
        let market = flash_market(0.45, 0.50, 10);
        let opp = ArbitrageOpportunity {
            market,
            up_price: 0.45,
            down_price: 0.50,
            total_cost: 0.95,
            profit_per_contract: 0.05,
            up_liquidity: 500.0,
            down_liquidity: 500.0,
            max_contracts: 500.0,
            timestamp: Utc::now(),
            score: 50.0,
        };
        alerts.opportunity_found(&opp);
        let a = &alerts.recent(1)[0];
        assert_eq!(a.alert_type, AlertType::OpportunityFound);
        assert!(a.message.starts_with("BTC"));
        assert!(a.message.contains("5.00%"));
        assert_eq!(a.data["market_id"], "mkt-btc-1");
    }

    #[tokio::test]
    async fn test_spawn_without_credentials_is_disabled() {
        let alerts = AlertManager::spawn(None, Some("123".into())).unwrap();
        assert!(!alerts.is_enabled());
    }
}
