//! Market scanner.
//!
//! Pulls active markets from the data source, parses them into [`Market`]
//! values with an UP/DOWN token pair, and picks out the 15-minute crypto
//! flash markets the arbitrage engine trades. The full parsed list is kept
//! too, since the signal strategies look at every market.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::MARKET_CLOSE_BUFFER_SECONDS;
use crate::platforms::polymarket::{self, GammaMarket};
use crate::platforms::MarketDataSource;
use crate::types::{Market, MarketType, OrderBook, OrderSide, Outcome, TokenPair};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const FLASH_MARKET_KEYWORDS: [&str; 6] = [
    "15 minute",
    "15-minute",
    "15min",
    "flash",
    "up or down",
    "higher or lower",
];

const FLASH_TAGS: [&str; 4] = ["flash", "15min", "15-minute", "crypto"];

/// Ticker and long name of each tracked asset.
pub const TARGET_ASSETS: [(&str, &str); 3] = [
    ("BTC", "BITCOIN"),
    ("ETH", "ETHEREUM"),
    ("SOL", "SOLANA"),
];

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Flash markets are recognised by keyword in the question or description,
/// or by tag.
pub fn is_flash_market(gm: &GammaMarket) -> bool {
    let text = format!("{} {}", gm.question, gm.description).to_lowercase();
    if FLASH_MARKET_KEYWORDS.iter().any(|k| text.contains(k)) {
        return true;
    }
    gm.tag_names().iter().any(|t| FLASH_TAGS.contains(&t.as_str()))
}

fn parse_end_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|dt| dt.and_utc())
}

fn classify_market_type(gm: &GammaMarket, flash: bool) -> MarketType {
    if flash {
        return MarketType::Flash15m;
    }
    let q = gm.question.to_lowercase();
    if q.contains("hourly") || q.contains("1 hour") || q.contains("this hour") {
        MarketType::Hourly
    } else if q.contains("daily") || q.contains("today") || q.contains("on ") && q.contains("close") {
        MarketType::Daily
    } else {
        MarketType::Other
    }
}

/// Index of the UP and DOWN legs. Unknown labels fall back to `[UP, DOWN]`.
fn leg_indices(labels: &[String]) -> (usize, usize) {
    for (i, label) in labels.iter().enumerate().take(2) {
        match Outcome::from_label(label) {
            Some(Outcome::Up) => return (i, 1 - i),
            Some(Outcome::Down) => return (1 - i, i),
            None => {}
        }
    }
    (0, 1)
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Markets from one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Every market that parsed with a token pair.
    pub markets: Vec<Market>,
    /// Tradeable flash markets (subset of `markets`).
    pub flash: Vec<Market>,
    pub total_fetched: usize,
}

pub struct MarketScanner {
    source: Arc<dyn MarketDataSource>,
    max_markets: usize,
    asset_patterns: Vec<(&'static str, Regex)>,
    cache: HashMap<String, Market>,
    last_scan: Option<DateTime<Utc>>,
}

impl MarketScanner {
    pub fn new(source: Arc<dyn MarketDataSource>, max_markets: usize) -> Result<Self> {
        let asset_patterns = TARGET_ASSETS
            .iter()
            .map(|(ticker, name)| {
                Regex::new(&format!(r"\b(?:{ticker}|{name})\b"))
                    .map(|re| (*ticker, re))
                    .with_context(|| format!("Invalid asset pattern for {ticker}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source,
            max_markets,
            asset_patterns,
            cache: HashMap::new(),
            last_scan: None,
        })
    }

    /// Tracked asset named in the question, matched on word boundaries.
    pub fn extract_asset(&self, question: &str) -> Option<String> {
        let upper = question.to_uppercase();
        self.asset_patterns
            .iter()
            .find(|(_, re)| re.is_match(&upper))
            .map(|(ticker, _)| ticker.to_string())
    }

    /// Build a [`Market`] from a raw Gamma record.
    ///
    /// Returns `None` when the record has no id or does not carry exactly two
    /// CLOB token ids.
    pub fn parse_market(&self, gm: &GammaMarket) -> Option<Market> {
        let id = gm.market_id();
        if id.is_empty() {
            return None;
        }

        let token_ids = gm.token_ids();
        if token_ids.len() != 2 {
            debug!(market_id = %id, tokens = token_ids.len(), "Skipping market without a token pair");
            return None;
        }
        let (up_idx, down_idx) = leg_indices(&gm.outcome_labels());

        let mut tokens = TokenPair::new(token_ids[up_idx].clone(), token_ids[down_idx].clone());
        if let Some(prices) = gm.outcome_prices.as_ref().and_then(polymarket::parse_outcome_prices) {
            let by_index = [prices.0, prices.1];
            tokens.up_price = by_index[up_idx];
            tokens.down_price = by_index[down_idx];
        }

        let flash = is_flash_market(gm);
        let tags = gm.tag_names();
        let category = polymarket::categorize(&tags, &gm.question);

        Some(Market {
            condition_id: if gm.condition_id.is_empty() { id.clone() } else { gm.condition_id.clone() },
            id,
            question: gm.question.clone(),
            description: gm.description.clone(),
            slug: gm.slug.clone(),
            market_type: classify_market_type(gm, flash),
            asset: self.extract_asset(&gm.question),
            tokens: Some(tokens),
            end_time: parse_end_time(gm.end_date.as_deref()),
            volume: gm.total_volume(),
            liquidity: gm.liquidity.unwrap_or(0.0),
            active: gm.active,
            closed: gm.closed,
            tags,
            category,
            best_bid: gm.best_bid,
            best_ask: gm.best_ask,
        })
    }

    /// Fetch and parse every active market, then select the flash subset.
    ///
    /// Flash markets must name a tracked asset, be open, and have more
    /// than the close buffer left on the clock.
    pub async fn scan(&mut self) -> Result<ScanResult> {
        let raw = self.source.fetch_markets(self.max_markets).await?;
        let total_fetched = raw.len();

        let mut markets = Vec::with_capacity(raw.len());
        let mut flash = Vec::new();
        for gm in &raw {
            let Some(market) = self.parse_market(gm) else {
                continue;
            };
            if market.is_flash() && self.is_tradeable_flash(&market) {
                self.cache.insert(market.id.clone(), market.clone());
                flash.push(market.clone());
            }
            markets.push(market);
        }

        self.last_scan = Some(Utc::now());
        info!(
            source = self.source.name(),
            total_scanned = total_fetched,
            parsed = markets.len(),
            flash_markets = flash.len(),
            "Market scan complete"
        );
        Ok(ScanResult {
            markets,
            flash,
            total_fetched,
        })
    }

    pub async fn scan_flash_markets(&mut self) -> Result<Vec<Market>> {
        Ok(self.scan().await?.flash)
    }

    fn is_tradeable_flash(&self, market: &Market) -> bool {
        market.asset.is_some()
            && !market.is_closed()
            && market
                .time_to_close_seconds()
                .map(|s| s > MARKET_CLOSE_BUFFER_SECONDS)
                .unwrap_or(true)
    }

    /// Refresh both legs with the current CLOB BUY price.
    pub async fn get_market_prices(&self, market: &Market) -> Result<TokenPair> {
        let tokens = market
            .tokens
            .as_ref()
            .with_context(|| format!("Market {} has no tokens", market.id))?;

        let (up, down) = futures::join!(
            self.source.get_price(&tokens.up_token_id, OrderSide::Buy),
            self.source.get_price(&tokens.down_token_id, OrderSide::Buy),
        );
        let mut refreshed = tokens.clone();
        refreshed.up_price = up.with_context(|| format!("UP price fetch failed for {}", market.id))?;
        refreshed.down_price = down.with_context(|| format!("DOWN price fetch failed for {}", market.id))?;
        Ok(refreshed)
    }

    /// UP and DOWN midpoints. After resolution the winner sits near 1.
    pub async fn get_midpoints(&self, market: &Market) -> Result<(f64, f64)> {
        let tokens = market
            .tokens
            .as_ref()
            .with_context(|| format!("Market {} has no tokens", market.id))?;
        let (up, down) = futures::try_join!(
            self.source.get_midpoint(&tokens.up_token_id),
            self.source.get_midpoint(&tokens.down_token_id),
        )
        .with_context(|| format!("Midpoint fetch failed for {}", market.id))?;
        Ok((up, down))
    }

    /// Both order books, UP first.
    pub async fn get_orderbooks(&self, market: &Market) -> Result<(OrderBook, OrderBook)> {
        let tokens = market
            .tokens
            .as_ref()
            .with_context(|| format!("Market {} has no tokens", market.id))?;
        let (up, down) = futures::try_join!(
            self.source.get_orderbook(&tokens.up_token_id),
            self.source.get_orderbook(&tokens.down_token_id),
        )?;
        Ok((up, down))
    }

    pub fn get_cached_market(&self, market_id: &str) -> Option<&Market> {
        self.cache.get(market_id)
    }

    /// Drop cached markets that have closed.
    pub fn prune_cache(&mut self) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, m| !m.is_closed());
        let removed = before - self.cache.len();
        if removed > 0 {
            debug!(removed, "Pruned closed markets from cache");
        }
        removed
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn last_scan(&self) -> Option<DateTime<Utc>> {
        self.last_scan
    }

    pub fn source(&self) -> &Arc<dyn MarketDataSource> {
        &self.source
    }
}

impl std::fmt::Debug for MarketScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketScanner")
            .field("source", &self.source.name())
            .field("cached", &self.cache.len())
            .finish()
    }
}

/// Log and discard a per-market failure so one bad market never aborts a scan.
pub fn log_market_error(market: &Market, err: &anyhow::Error) {
    warn!(market_id = %market.id, error = %err, "Market skipped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
