//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (wallet key, CLOB API credentials, Telegram token) are
//! referenced by env-var name in the config and resolved at runtime.
//! A handful of risk knobs can be overridden directly from the
//! environment for quick paper/live switches.

use anyhow::{Context, Result};
use secrecy::Secret;
use serde::Deserialize;
use std::fs;

use crate::types::BotError;

/// Polygon mainnet.
pub const CHAIN_ID: u64 = 137;
pub const CLOB_HOST: &str = "https://clob.polymarket.com";
pub const GAMMA_API_HOST: &str = "https://gamma-api.polymarket.com";
/// Markets closer than this to resolution are never traded.
pub const MARKET_CLOSE_BUFFER_SECONDS: f64 = 30.0;
pub const MAX_RETRIES: u32 = 3;
pub const RETRY_DELAY_SECONDS: f64 = 1.0;
pub const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub polymarket: PolymarketConfig,
    pub risk: RiskConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
    #[serde(default)]
    pub stink_bids: StinkBidConfig,
    pub dashboard: DashboardConfig,
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    pub name: String,
    /// "development" or "production".
    pub environment: String,
    pub paper_trading: bool,
    pub scan_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Starting USDC balance for the paper executor.
    #[serde(default = "default_paper_balance")]
    pub paper_balance: f64,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_paper_balance() -> f64 {
    10_000.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolymarketConfig {
    pub gamma_host: String,
    pub clob_host: String,
    pub chain_id: u64,
    /// 0 = EOA, 1 = email/magic proxy, 2 = Gnosis Safe.
    /// For 1 and 2 the order maker is the proxy wallet derived from the key.
    pub signature_type: u8,
    pub private_key_env: String,
    /// Upper bound on markets pulled per scan.
    #[serde(default = "default_market_limit")]
    pub market_limit: usize,
}

fn default_market_limit() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    pub max_position_size_usdc: f64,
    pub max_total_exposure_usdc: f64,
    pub max_daily_loss_usdc: f64,
    pub max_positions_per_market: usize,
    pub max_total_positions: usize,
    pub min_profit_threshold: f64,
    pub min_liquidity: f64,
    pub position_timeout_secs: i64,
    /// Opportunities sized below this are skipped.
    #[serde(default = "default_min_trade_size")]
    pub min_trade_size_usdc: f64,
}

fn default_min_trade_size() -> f64 {
    10.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategiesConfig {
    pub flash_sniper: bool,
    pub sniper: bool,
    pub tail: bool,
    pub contrarian: bool,
    /// Place orders for generated signals instead of only persisting them.
    pub execute_signals: bool,
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            flash_sniper: true,
            sniper: true,
            tail: true,
            contrarian: true,
            execute_signals: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StinkBidConfig {
    pub enabled: bool,
    pub min_volume: f64,
    pub bid_price: f64,
    pub stake_usdc: f64,
    pub exit_multiplier: f64,
    pub ttl_secs: i64,
    pub max_open_bids: usize,
}

impl Default for StinkBidConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_volume: 50_000.0,
            bid_price: 0.03,
            stake_usdc: 3.0,
            exit_multiplier: 3.0,
            ttl_secs: 3600,
            max_open_bids: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://polybot.db".to_string(),
        }
    }
}

/// Secrets resolved from the environment.
///
/// Every field is optional: paper trading runs without any of them.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub private_key: Option<Secret<String>>,
    pub telegram_bot_token: Option<Secret<String>>,
    pub telegram_chat_id: Option<String>,
}

impl Credentials {
    /// Live trading only needs the wallet key; CLOB API keys are derived from it.
    pub fn can_trade_live(&self) -> bool {
        self.private_key.is_some()
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply env overrides.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    fn optional_env(env_name: &str) -> Option<String> {
        std::env::var(env_name).ok().filter(|v| !v.trim().is_empty())
    }

    /// Gather every secret named in the config.
    pub fn credentials(&self) -> Credentials {
        let pm = &self.polymarket;
        Credentials {
            private_key: Self::optional_env(&pm.private_key_env).map(Secret::new),
            telegram_bot_token: self
                .alerts
                .telegram_bot_token_env
                .as_deref()
                .and_then(Self::optional_env)
                .map(Secret::new),
            telegram_chat_id: self
                .alerts
                .telegram_chat_id_env
                .as_deref()
                .and_then(Self::optional_env),
        }
    }

    /// Override selected settings from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = Self::optional_env("PAPER_TRADING") {
            self.bot.paper_trading = parse_bool(&v)
                .with_context(|| format!("PAPER_TRADING must be true/false, got {v}"))?;
        }
        if let Some(v) = Self::optional_env("MAX_POSITION_SIZE_USDC") {
            self.risk.max_position_size_usdc = parse_f64("MAX_POSITION_SIZE_USDC", &v)?;
        }
        if let Some(v) = Self::optional_env("MIN_PROFIT_THRESHOLD") {
            self.risk.min_profit_threshold = parse_f64("MIN_PROFIT_THRESHOLD", &v)?;
        }
        if let Some(v) = Self::optional_env("MAX_DAILY_LOSS_USDC") {
            self.risk.max_daily_loss_usdc = parse_f64("MAX_DAILY_LOSS_USDC", &v)?;
        }
        if let Some(v) = Self::optional_env("MAX_TOTAL_EXPOSURE_USDC") {
            self.risk.max_total_exposure_usdc = parse_f64("MAX_TOTAL_EXPOSURE_USDC", &v)?;
        }
        Ok(())
    }

    /// Reject settings the bot cannot run with.
    pub fn validate(&self) -> Result<(), BotError> {
        if !matches!(self.bot.environment.as_str(), "development" | "production") {
            return Err(BotError::Config(format!(
                "environment must be development or production, got {}",
                self.bot.environment
            )));
        }
        if self.polymarket.signature_type > 2 {
            return Err(BotError::Config(format!(
                "signature_type must be 0, 1 or 2, got {}",
                self.polymarket.signature_type
            )));
        }
        let r = &self.risk;
        if !(r.min_profit_threshold > 0.0 && r.min_profit_threshold < 1.0) {
            return Err(BotError::Config(format!(
                "min_profit_threshold must be within (0, 1), got {}",
                r.min_profit_threshold
            )));
        }
        for (name, value) in [
            ("max_position_size_usdc", r.max_position_size_usdc),
            ("max_total_exposure_usdc", r.max_total_exposure_usdc),
            ("max_daily_loss_usdc", r.max_daily_loss_usdc),
        ] {
            if !(value > 0.0) {
                return Err(BotError::Config(format!("{name} must be positive, got {value}")));
            }
        }
        if self.bot.scan_interval_secs == 0 {
            return Err(BotError::Config("scan_interval_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.bot.environment == "production"
    }

    /// `tracing` directive derived from `log_level`.
    pub fn log_directive(&self, verbose: bool) -> String {
        if verbose || self.bot.log_level.eq_ignore_ascii_case("debug") {
            "polybot=debug".to_string()
        } else {
            format!("polybot={}", self.bot.log_level.to_lowercase())
        }
    }
}

fn parse_bool(v: &str) -> Result<bool> {
    match v.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => anyhow::bail!("not a boolean: {v}"),
    }
}

fn parse_f64(name: &str, v: &str) -> Result<f64> {
    v.trim()
        .parse::<f64>()
        .with_context(|| format!("{name} must be a number, got {v}"))
}
