//! Polymarket market data.
//!
//! Uses the Gamma API for market discovery and the public CLOB endpoints
//! for prices and order books. None of these calls need authentication;
//! order placement lives in [`crate::platforms::clob`].
//!
//! Gamma API: https://gamma-api.polymarket.com
//! CLOB API: https://clob.polymarket.com

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use crate::platforms::retry::{with_retry, RetryConfig};
use crate::platforms::MarketDataSource;
use crate::types::{BotError, MarketCategory, OrderBook, OrderSide, PriceLevel};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const PLATFORM: &str = "polymarket";
const PAGE_SIZE: usize = 100;
const HTTP_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Gamma API response types
// ---------------------------------------------------------------------------

/// Raw market as returned by Gamma `/markets`.
///
/// Several fields arrive either as JSON-encoded strings or as native
/// values depending on the endpoint version, so they are kept loose here
/// and parsed by the scanner.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GammaMarket {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "conditionId", alias = "condition_id")]
    pub condition_id: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default, rename = "endDate", alias = "end_date_iso")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub closed: bool,
    /// `"[\"Up\",\"Down\"]"` or `["Up","Down"]`.
    #[serde(default)]
    pub outcomes: Option<serde_json::Value>,
    #[serde(default, rename = "outcomePrices")]
    pub outcome_prices: Option<serde_json::Value>,
    #[serde(default, rename = "clobTokenIds")]
    pub clob_token_ids: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub volume: Option<f64>,
    #[serde(default, rename = "volumeNum", deserialize_with = "flexible_f64")]
    pub volume_num: Option<f64>,
    #[serde(default, rename = "volume24hr", deserialize_with = "flexible_f64")]
    pub volume_24hr: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub liquidity: Option<f64>,
    #[serde(default)]
    pub tags: Option<Vec<GammaTag>>,
    #[serde(default, rename = "bestBid", deserialize_with = "flexible_f64")]
    pub best_bid: Option<f64>,
    #[serde(default, rename = "bestAsk", deserialize_with = "flexible_f64")]
    pub best_ask: Option<f64>,
    #[serde(default, rename = "lastTradePrice", deserialize_with = "flexible_f64")]
    pub last_trade_price: Option<f64>,
}

/// Tags come back as objects from `/markets` and as bare strings elsewhere.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum GammaTag {
    Named {
        #[serde(default)]
        label: String,
        #[serde(default)]
        slug: String,
    },
    Plain(String),
}

impl GammaTag {
    pub fn label(&self) -> &str {
        match self {
            GammaTag::Named { label, slug } => {
                if label.is_empty() {
                    slug
                } else {
                    label
                }
            }
            GammaTag::Plain(s) => s,
        }
    }

    pub fn slug(&self) -> &str {
        match self {
            GammaTag::Named { slug, .. } => slug,
            GammaTag::Plain(s) => s,
        }
    }
}

impl GammaMarket {
    /// Market id as a string, falling back to the condition id.
    pub fn market_id(&self) -> String {
        match &self.id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => self.condition_id.clone(),
        }
    }

    pub fn outcome_labels(&self) -> Vec<String> {
        self.outcomes.as_ref().map(parse_string_list).unwrap_or_default()
    }

    pub fn token_ids(&self) -> Vec<String> {
        self.clob_token_ids.as_ref().map(parse_string_list).unwrap_or_default()
    }

    /// Lowercased tag labels and slugs.
    pub fn tag_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for tag in self.tags.iter().flatten() {
            for name in [tag.label(), tag.slug()] {
                let name = name.to_lowercase();
                if !name.is_empty() && !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    pub fn total_volume(&self) -> f64 {
        self.volume_num.or(self.volume).unwrap_or(0.0)
    }
}

fn flexible_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

/// Parse a list that may be a native array or a JSON-encoded string.
pub fn parse_string_list(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        serde_json::Value::String(s) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(inner @ serde_json::Value::Array(_)) => parse_string_list(&inner),
            _ => s
                .replace(['[', ']', '"', '\\'], "")
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        },
        _ => Vec::new(),
    }
}

/// Parse outcome prices from Gamma's string format.
/// Handles `"[\"0.65\",\"0.35\"]"`, `"0.65, 0.35"` and native arrays.
pub fn parse_outcome_prices(value: &serde_json::Value) -> Option<(f64, f64)> {
    let parts = parse_string_list(value);
    if parts.len() >= 2 {
        let first = parts[0].parse::<f64>().ok()?;
        let second = parts[1].parse::<f64>().ok()?;
        Some((first, second))
    } else {
        None
    }
}

/// Categorize from Gamma tags, falling back to the question text.
pub fn categorize(tags: &[String], question: &str) -> MarketCategory {
    let has = |names: &[&str]| tags.iter().any(|t| names.contains(&t.as_str()));

    if has(&["crypto", "bitcoin", "ethereum", "solana", "crypto-prices"]) {
        return MarketCategory::Crypto;
    }
    if has(&["politics", "elections", "us-politics", "government"])
        || tags.iter().any(|t| t.contains("politic") || t.contains("election"))
    {
        return MarketCategory::Politics;
    }
    if has(&["sports", "nba", "nfl", "soccer", "football", "mlb", "nhl", "tennis", "mma", "f1"]) {
        return MarketCategory::Sports;
    }
    if has(&["finance", "economics", "business", "fed", "inflation", "stocks"]) {
        return MarketCategory::Economics;
    }
    if has(&["weather", "climate"]) {
        return MarketCategory::Weather;
    }
    if has(&["entertainment", "culture", "pop-culture", "movies", "music"]) {
        return MarketCategory::Culture;
    }
    categorize_from_question(question)
}

/// Categorize from question text.
pub fn categorize_from_question(question: &str) -> MarketCategory {
    let q = question.to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| q.contains(w));

    if any(&["bitcoin", "btc", "ethereum", "eth ", "solana", "crypto", "xrp", "dogecoin"]) {
        MarketCategory::Crypto
    } else if any(&[
        "election", "president", "congress", "senate", "trump", "biden", "governor",
        "democrat", "republican", "parliament",
    ]) {
        MarketCategory::Politics
    } else if any(&[
        "nba", "nfl", "mlb", "soccer", "tennis", "championship", "super bowl", "world cup",
        "playoff", "premier league",
    ]) {
        MarketCategory::Sports
    } else if any(&["fed ", "rate cut", "inflation", "gdp", "stock", "s&p", "recession", "interest rate"]) {
        MarketCategory::Economics
    } else if any(&["temperature", "hurricane", "rainfall", "weather", "climate"]) {
        MarketCategory::Weather
    } else if any(&["oscar", "grammy", "box office", "movie", "album", "netflix", "celebrity"]) {
        MarketCategory::Culture
    } else {
        MarketCategory::Other
    }
}

// ---------------------------------------------------------------------------
// CLOB response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(default, deserialize_with = "flexible_f64")]
    price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MidpointResponse {
    #[serde(default, deserialize_with = "flexible_f64")]
    mid: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawLevel {
    #[serde(default, deserialize_with = "flexible_f64")]
    price: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64")]
    size: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BookResponse {
    #[serde(default)]
    bids: Vec<RawLevel>,
    #[serde(default)]
    asks: Vec<RawLevel>,
}

fn to_levels(raw: Vec<RawLevel>) -> Vec<PriceLevel> {
    raw.into_iter()
        .filter_map(|l| match (l.price, l.size) {
            (Some(price), Some(size)) if size > 0.0 => Some(PriceLevel { price, size }),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct PolymarketClient {
    http: Client,
    gamma_host: String,
    clob_host: String,
    retry: RetryConfig,
}

impl PolymarketClient {
    pub fn new(gamma_host: &str, clob_host: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .context("Failed to build Polymarket HTTP client")?;

        Ok(Self {
            http,
            gamma_host: gamma_host.trim_end_matches('/').to_string(),
            clob_host: clob_host.trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        op: &str,
    ) -> Result<T> {
        with_retry(&self.retry, op, || async move {
            let resp = self.http.get(url).query(query).send().await?;
            let resp = check_status(resp, PLATFORM).await?;
            let body = resp
                .json::<T>()
                .await
                .with_context(|| format!("Failed to parse {op} response"))?;
            Ok(body)
        })
        .await
    }

    /// One page of active, open markets.
    pub async fn fetch_gamma_page(&self, limit: usize, offset: usize) -> Result<Vec<GammaMarket>> {
        let url = format!("{}/markets", self.gamma_host);
        debug!(limit, offset, "Fetching Gamma markets page");
        self.get_json(
            &url,
            &[
                ("active", "true".to_string()),
                ("closed", "false".to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ],
            "gamma_markets",
        )
        .await
    }
}

#[async_trait]
impl MarketDataSource for PolymarketClient {
    async fn fetch_markets(&self, max_markets: usize) -> Result<Vec<GammaMarket>> {
        let mut markets = Vec::new();
        let mut offset = 0;
        while markets.len() < max_markets {
            let page_size = PAGE_SIZE.min(max_markets - markets.len());
            let page = self.fetch_gamma_page(page_size, offset).await?;
            let got = page.len();
            markets.extend(page);
            if got < page_size {
                break;
            }
            offset += got;
        }
        info!(count = markets.len(), "Fetched Gamma markets");
        Ok(markets)
    }

    async fn get_price(&self, token_id: &str, side: OrderSide) -> Result<f64> {
        let url = format!("{}/price", self.clob_host);
        let resp: PriceResponse = self
            .get_json(
                &url,
                &[("token_id", token_id.to_string()), ("side", side.as_str().to_string())],
                "clob_price",
            )
            .await?;
        resp.price
            .ok_or_else(|| BotError::MarketNotFound(format!("no price for token {token_id}")).into())
    }

    async fn get_midpoint(&self, token_id: &str) -> Result<f64> {
        let url = format!("{}/midpoint", self.clob_host);
        let resp: MidpointResponse = self
            .get_json(&url, &[("token_id", token_id.to_string())], "clob_midpoint")
            .await?;
        resp.mid
            .ok_or_else(|| BotError::MarketNotFound(format!("no midpoint for token {token_id}")).into())
    }

    async fn get_orderbook(&self, token_id: &str) -> Result<OrderBook> {
        let url = format!("{}/book", self.clob_host);
        let resp: BookResponse = self
            .get_json(&url, &[("token_id", token_id.to_string())], "clob_book")
            .await?;
        Ok(OrderBook {
            token_id: token_id.to_string(),
            bids: to_levels(resp.bids),
            asks: to_levels(resp.asks),
        }
        .normalize())
    }

    fn name(&self) -> &str {
        PLATFORM
    }
}

/// Map non-success HTTP statuses onto [`BotError`].
pub(crate) async fn check_status(resp: Response, platform: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(status_error(status, platform, body).into())
}

pub(crate) fn status_error(status: StatusCode, platform: &str, body: String) -> BotError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => BotError::RateLimited {
            platform: platform.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BotError::Auth {
            platform: platform.to_string(),
            message: body,
        },
        _ => BotError::Platform {
            platform: platform.to_string(),
            status: Some(status.as_u16()),
            message: body,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
