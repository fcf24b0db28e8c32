//! Bitget REST Price Source
//!
//! Bitget's public socket is not used; the ticker endpoints return every
//! symbol of a market in one call, which the poller turns into a batch.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::client::{RestClient, RestClientConfig};
use crate::domain::market::Market;
use crate::ports::price_source::PriceMapSource;

pub const BASE_URL: &str = "https://api.bitget.com";

const SPOT_TICKERS: &str = "/api/v2/spot/market/tickers";
const FUTURES_TICKERS: &str = "/api/v2/mix/market/tickers?productType=USDT-FUTURES";

/// Success code in the response envelope.
const OK_CODE: &str = "00000";

#[derive(Debug, Deserialize)]
struct TickersResponse {
  code: String,
  #[serde(default)]
  msg: String,
  #[serde(default)]
  data: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
  symbol: String,
  /// Last traded price as string.
  #[serde(rename = "lastPr")]
  last_pr: Option<String>,
}

/// `PriceMapSource` backed by Bitget's v2 public ticker endpoints.
pub struct BitgetPriceSource {
  client: RestClient,
}

impl BitgetPriceSource {
  pub fn new() -> Result<Self> {
    Self::with_config(RestClientConfig::new(BASE_URL))
  }

  pub fn with_config(config: RestClientConfig) -> Result<Self> {
    Ok(Self {
      client: RestClient::new(config)?,
    })
  }

  const fn path(market: Market) -> &'static str {
    match market {
      Market::Spot => SPOT_TICKERS,
      Market::Futures => FUTURES_TICKERS,
    }
  }
}

/// Turn a ticker envelope into `symbol -> price`, skipping unusable rows.
fn price_map(body: TickersResponse) -> Result<HashMap<String, f64>> {
  if body.code != OK_CODE {
    anyhow::bail!("Bitget error {}: {}", body.code, body.msg);
  }
  Ok(
    body
      .data
      .into_iter()
      .filter_map(|t| {
        let price = t.last_pr?.parse::<f64>().ok()?;
        (price.is_finite() && price > 0.0).then_some((t.symbol, price))
      })
      .collect(),
  )
}

#[async_trait]
impl PriceMapSource for BitgetPriceSource {
  #[instrument(skip(self))]
  async fn fetch_prices(&self, market: Market) -> Result<HashMap<String, f64>> {
    let body: TickersResponse = self
      .client
      .get_json(Self::path(market))
      .await
      .with_context(|| format!("Bitget {market} tickers request failed"))?;
    let prices = price_map(body)?;
    debug!(count = prices.len(), "Bitget tickers fetched");
    Ok(prices)
  }
}
