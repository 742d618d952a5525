//! Authenticated CLOB trading through `polymarket-client-sdk`.
//!
//! The SDK builds and signs orders (EIP-712) and derives the L2 API key
//! from the wallet. This module converts our order model into SDK calls
//! and maps SDK failures onto [`BotError`] so retry and auth handling
//! work the same as for the public endpoints.

use alloy::primitives::U256;
use alloy::signers::{local::PrivateKeySigner, Signer};
use anyhow::{Context, Result};
use polymarket_client_sdk::clob::types::request::{BalanceAllowanceRequest, OrdersRequest};
use polymarket_client_sdk::clob::types::{
    Amount, AssetType, OrderType as ClobOrderType, Side as ClobSide, SignatureType,
};
use polymarket_client_sdk::clob::{Client as SdkClient, Config as SdkConfig};
use regex::Regex;
use reqwest::StatusCode;
use rust_decimal::prelude::*;
use secrecy::ExposeSecret;
use std::future::Future;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::config::Credentials;
use crate::platforms::polymarket::status_error;
use crate::platforms::retry::{with_retry, RetryConfig};
use crate::types::{BotError, OrderSide, OrderType};

const PLATFORM: &str = "clob";

/// Cursor the CLOB hands back on the last page of a listing.
pub const END_CURSOR: &str = "LTE=";
/// Listings longer than this are treated as an error, never truncated.
const MAX_PAGES: usize = 100;

/// Authenticated SDK session. Built per request, as the L2 key derivation
/// is idempotent for a given wallet.
macro_rules! session {
    ($clob:expr) => {
        SdkClient::new(
            $clob.host.as_str(),
            SdkConfig::builder().use_server_time(true).build(),
        )
        .map_err(sdk_error)?
        .authentication_builder(&$clob.signer)
        .signature_type($clob.signature_type)
        .authenticate()
        .await
        .map_err(sdk_error)?
    };
}

/// An order accepted by the CLOB.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: String,
    /// SDK response, kept for logs.
    pub detail: String,
}

/// Resting order as listed by the CLOB.
#[derive(Debug, Clone, PartialEq)]
pub struct RestingOrder {
    pub id: String,
    pub market: String,
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub original_size: f64,
    pub size_matched: f64,
}

pub struct ClobClient {
    host: String,
    signer: PrivateKeySigner,
    signature_type: SignatureType,
    retry: RetryConfig,
}

impl ClobClient {
    /// Fails with [`BotError::Auth`] when no wallet key is configured.
    pub fn new(host: &str, chain_id: u64, signature_type: u8, creds: &Credentials) -> Result<Self> {
        let key = creds.private_key.as_ref().ok_or_else(|| BotError::Auth {
            platform: PLATFORM.to_string(),
            message: "private key not configured".to_string(),
        })?;
        let signer: PrivateKeySigner = key
            .expose_secret()
            .trim()
            .parse()
            .map_err(|_| BotError::Config("private key is not a valid secp256k1 key".into()))?;
        let signer = signer.with_chain_id(Some(chain_id));

        let client = Self {
            host: host.trim_end_matches('/').to_string(),
            signer,
            signature_type: signature_type_from(signature_type)?,
            retry: RetryConfig::default(),
        };
        info!(signer = %client.address(), signature_type, "CLOB client ready");
        Ok(client)
    }

    /// Wallet (EOA) address that signs orders.
    pub fn address(&self) -> String {
        self.signer.address().to_string()
    }

    /// Build, sign and post one order. Single attempt; callers own retries.
    ///
    /// FOK/FAK orders are market orders: BUYs spend `size × price` USDC,
    /// SELLs give `size` shares, with `price` as the worst acceptable price.
    pub async fn post_order(
        &self,
        token_id: &str,
        side: OrderSide,
        price: f64,
        size: f64,
        order_type: OrderType,
    ) -> Result<PlacedOrder> {
        let token = U256::from_str_radix(token_id, 10)
            .map_err(|_| BotError::Validation(format!("token id is not a uint256: {token_id}")))?;
        let price_dec = to_tick(price)?;
        let shares = to_size(size)?;
        let client = session!(self);

        let order = match order_type {
            OrderType::Fok | OrderType::Fak => {
                let amount = match side {
                    OrderSide::Buy => Amount::usdc(to_size(size * price)?),
                    OrderSide::Sell => Amount::shares(shares),
                }
                .context("Invalid order amount")?;
                client
                    .market_order()
                    .token_id(token)
                    .amount(amount)
                    .side(clob_side(side))
                    .price(price_dec)
                    .order_type(clob_order_type(order_type))
                    .build()
                    .await
                    .map_err(sdk_error)?
            }
            OrderType::Gtc | OrderType::Gtd => client
                .limit_order()
                .token_id(token)
                .size(shares)
                .side(clob_side(side))
                .price(price_dec)
                .order_type(clob_order_type(order_type))
                .build()
                .await
                .map_err(sdk_error)?,
        };

        let signed = client.sign(&self.signer, order).await.map_err(sdk_error)?;
        let response = client.post_order(signed).await.map_err(sdk_error)?;
        let detail = format!("{response:?}");
        if response.order_id.is_empty() {
            warn!(token_id, side = %side, detail = %detail, "Order rejected");
            return Err(BotError::OrderRejected(detail).into());
        }
        debug!(order_id = %response.order_id, "Order accepted");
        Ok(PlacedOrder {
            order_id: response.order_id,
            detail,
        })
    }

    pub async fn cancel(&self, order_id: &str) -> Result<()> {
        with_retry(&self.retry, "clob_cancel", || async move {
            let client = session!(self);
            client.cancel_order(order_id).await.map_err(sdk_error)?;
            Ok(())
        })
        .await
    }

    pub async fn cancel_all(&self) -> Result<()> {
        with_retry(&self.retry, "clob_cancel_all", || async move {
            let client = session!(self);
            client.cancel_all_orders().await.map_err(sdk_error)?;
            Ok(())
        })
        .await
    }

    /// Every resting order, following the listing cursor to the end.
    pub async fn open_orders(&self) -> Result<Vec<RestingOrder>> {
        with_retry(&self.retry, "clob_open_orders", || async move {
            let client = session!(self);
            let request = OrdersRequest::builder().build();
            collect_pages(|cursor| {
                let (client, request) = (&client, &request);
                async move {
                    let page = client.orders(request, cursor).await.map_err(sdk_error)?;
                    let orders = page
                        .data
                        .into_iter()
                        .map(|o| RestingOrder {
                            id: o.id.to_string(),
                            market: o.market.to_string(),
                            token_id: o.asset_id.to_string(),
                            side: if matches!(o.side, ClobSide::Sell) { OrderSide::Sell } else { OrderSide::Buy },
                            price: o.price.to_f64().unwrap_or(0.0),
                            original_size: o.original_size.to_f64().unwrap_or(0.0),
                            size_matched: o.size_matched.to_f64().unwrap_or(0.0),
                        })
                        .collect();
                    Ok((orders, page.next_cursor))
                }
            })
            .await
        })
        .await
    }

    /// Collateral balance in USDC.
    pub async fn balance(&self) -> Result<f64> {
        with_retry(&self.retry, "clob_balance", || async move {
            let client = session!(self);
            let request = BalanceAllowanceRequest::builder()
                .asset_type(AssetType::Collateral)
                .build();
            let resp = client.balance_allowance(request).await.map_err(sdk_error)?;
            Ok(usdc_from_units(resp.balance))
        })
        .await
    }
}

/// Drain a cursor-paginated listing. `fetch` gets the cursor to resume
/// from (`None` for the first page) and returns one page plus the next cursor.
pub async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, String)>>,
{
    let mut items = Vec::new();
    let mut cursor = None;
    for _ in 0..MAX_PAGES {
        let (page, next) = fetch(cursor.take()).await?;
        items.extend(page);
        if next.is_empty() || next == END_CURSOR {
            return Ok(items);
        }
        cursor = Some(next);
    }
    anyhow::bail!("listing did not end within {MAX_PAGES} pages")
}

fn signature_type_from(value: u8) -> Result<SignatureType, BotError> {
    match value {
        0 => Ok(SignatureType::Eoa),
        1 => Ok(SignatureType::Proxy),
        2 => Ok(SignatureType::GnosisSafe),
        other => Err(BotError::Config(format!("signature_type must be 0, 1 or 2, got {other}"))),
    }
}

fn clob_side(side: OrderSide) -> ClobSide {
    match side {
        OrderSide::Buy => ClobSide::Buy,
        OrderSide::Sell => ClobSide::Sell,
    }
}

fn clob_order_type(order_type: OrderType) -> ClobOrderType {
    match order_type {
        OrderType::Gtc => ClobOrderType::GTC,
        OrderType::Gtd => ClobOrderType::GTD,
        OrderType::Fok => ClobOrderType::FOK,
        OrderType::Fak => ClobOrderType::FAK,
    }
}

/// Price on the 0.01 tick.
fn to_tick(price: f64) -> Result<Decimal, BotError> {
    Decimal::from_f64(price)
        .filter(|p| *p > Decimal::ZERO && *p < Decimal::ONE)
        .map(|p| p.round_dp(2))
        .ok_or_else(|| BotError::Validation(format!("price out of range: {price}")))
}

/// Sizes go down to 2 decimals so we never ask for more than intended.
fn to_size(size: f64) -> Result<Decimal, BotError> {
    Decimal::from_f64(size)
        .map(|s| s.round_dp_with_strategy(2, RoundingStrategy::ToZero))
        .filter(|s| *s > Decimal::ZERO)
        .ok_or_else(|| BotError::Validation(format!("size too small: {size}")))
}

/// 6-decimal collateral units to USDC.
pub fn usdc_from_units(units: Decimal) -> f64 {
    (units / Decimal::from(1_000_000u32)).to_f64().unwrap_or(0.0)
}

/// Map an SDK error onto [`BotError`] using the HTTP status in its message.
/// Errors without a status are transport failures.
fn sdk_error(err: impl std::fmt::Display) -> anyhow::Error {
    classify_sdk_message(err.to_string()).into()
}

fn classify_sdk_message(message: String) -> BotError {
    static STATUS: OnceLock<Option<Regex>> = OnceLock::new();
    let status = STATUS
        .get_or_init(|| Regex::new(r"\b([1-5]\d\d)\b").ok())
        .as_ref()
        .and_then(|re| re.captures(&message))
        .and_then(|c| c[1].parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok());

    match status {
        Some(code) => status_error(code, PLATFORM, message),
        None if message.to_lowercase().contains("unauthorized") => BotError::Auth {
            platform: PLATFORM.to_string(),
            message,
        },
        None => BotError::Platform {
            platform: PLATFORM.to_string(),
            status: None,
            message,
        },
    }
}
