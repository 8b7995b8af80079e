//! Public market data REST client (Binance-compatible spot API).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::analysis::PriceSource;
use crate::models::{Candle, Granularity};

use super::types::TickerPriceResponse;

pub const MARKET_API_BASE: &str = "https://api.binance.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_BUDGET: Duration = Duration::from_secs(8);
const MAX_KLINES: usize = 1000;
const DEFAULT_QUOTE: &str = "USDT";

/// Client for the public market data endpoints (read-only).
pub struct MarketClient {
    client: Client,
    base_url: String,
}

impl MarketClient {
    /// Create with custom base URL (for testing or mirrors).
    pub fn with_base_url(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Map a bare asset ("BTC", "btc-usd") onto an exchange pair ("BTCUSDT").
    pub fn pair_for(symbol: &str) -> String {
        let cleaned: String = symbol
            .to_uppercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        if let Some(base) = cleaned.strip_suffix("USD") {
            return format!("{base}{DEFAULT_QUOTE}");
        }
        if cleaned.ends_with(DEFAULT_QUOTE) || cleaned.ends_with("USDC") || cleaned.ends_with("BUSD") {
            return cleaned;
        }
        format!("{cleaned}{DEFAULT_QUOTE}")
    }

    /// GET with exponential-backoff retries. Client errors are permanent.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let policy = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(RETRY_BUDGET))
            .build();

        backoff::future::retry(policy, || async {
            debug!(url = %url, "Fetching market data");

            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(anyhow!(e).context("Market request failed")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let err = anyhow!("Market request failed: {} - {}", status, body);
                return if status.is_client_error() {
                    Err(backoff::Error::permanent(err))
                } else {
                    warn!(status = %status, "Transient market API error, retrying");
                    Err(backoff::Error::transient(err))
                };
            }

            response
                .json::<T>()
                .await
                .map_err(|e| backoff::Error::permanent(anyhow!(e).context("Failed to parse market response")))
        })
        .await
    }
}

#[async_trait]
impl PriceSource for MarketClient {
    async fn current_price(&self, symbol: &str) -> Result<Decimal> {
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}",
            self.base_url,
            Self::pair_for(symbol)
        );

        let ticker: TickerPriceResponse = self.get_json(&url).await?;
        ticker
            .price
            .parse::<Decimal>()
            .with_context(|| format!("Invalid price for {}: {}", ticker.symbol, ticker.price))
    }

    async fn history(
        &self,
        symbol: &str,
        lookback: usize,
        granularity: Granularity,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            Self::pair_for(symbol),
            granularity.as_str(),
            lookback.clamp(1, MAX_KLINES)
        );

        let rows: Vec<Vec<Value>> = self.get_json(&url).await?;
        let candles: Vec<Candle> = rows.iter().filter_map(|row| parse_kline(row)).collect();

        if candles.len() < rows.len() {
            warn!(
                symbol = %symbol,
                dropped = rows.len() - candles.len(),
                "Dropped malformed kline rows"
            );
        }

        Ok(candles)
    }
}

/// Parse one kline row: `[open_time_ms, "open", "high", "low", "close", "volume", ...]`.
fn parse_kline(row: &[Value]) -> Option<Candle> {
    let number = |idx: usize| -> Option<f64> {
        match row.get(idx)? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    };

    let open_time = Utc.timestamp_millis_opt(row.first()?.as_i64()?).single()?;

    Some(Candle {
        open_time,
        open: number(1)?,
        high: number(2)?,
        low: number(3)?,
        close: number(4)?,
        volume: number(5)?,
    })
}
