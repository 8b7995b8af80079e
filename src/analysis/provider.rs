//! Market data provider: bounded, cancellable access to the price collaborator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::models::{Candle, Granularity, IndicatorSnapshot};

use super::indicators::calculate_indicators;

/// Source of prices and bar history.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Latest traded price for `symbol`.
    async fn current_price(&self, symbol: &str) -> anyhow::Result<Decimal>;

    /// Up to `lookback` most recent bars, oldest first.
    async fn history(
        &self,
        symbol: &str,
        lookback: usize,
        granularity: Granularity,
    ) -> anyhow::Result<Vec<Candle>>;
}

/// Wraps a [`PriceSource`] with per-call timeouts and cancellation.
///
/// Every call is a suspension point: a fired token returns
/// [`EngineError::Cancelled`], a timeout or source failure returns
/// [`EngineError::DataUnavailable`].
#[derive(Clone)]
pub struct MarketDataProvider {
    source: Arc<dyn PriceSource>,
    timeout: Duration,
    lookback: usize,
    granularity: Granularity,
}

impl MarketDataProvider {
    pub fn new(
        source: Arc<dyn PriceSource>,
        timeout: Duration,
        lookback: usize,
        granularity: Granularity,
    ) -> Self {
        Self {
            source,
            timeout,
            lookback,
            granularity,
        }
    }

    /// Current price, bounded by the provider timeout.
    pub async fn current_price(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<Decimal> {
        let price = self
            .bounded(symbol, cancel, self.source.current_price(symbol))
            .await?;

        if price <= Decimal::ZERO {
            return Err(EngineError::data_unavailable(
                symbol,
                format!("non-positive price {price}"),
            ));
        }
        Ok(price)
    }

    /// Bar history using the configured lookback and granularity.
    pub async fn history(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<Candle>> {
        self.bounded(
            symbol,
            cancel,
            self.source.history(symbol, self.lookback, self.granularity),
        )
        .await
    }

    /// Fetch history and compute indicators.
    ///
    /// Insufficient history is `Ok(None)`. When a fresh quote is available
    /// it replaces the last close as the snapshot price; a failed quote
    /// lookup keeps the last close.
    pub async fn calculate_indicators(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<Option<IndicatorSnapshot>> {
        let candles = self.history(symbol, cancel).await?;

        let Some(mut snapshot) = calculate_indicators(&candles) else {
            debug!(symbol = %symbol, bars = candles.len(), "Indicators unavailable");
            return Ok(None);
        };

        match self.current_price(symbol, cancel).await {
            Ok(price) => snapshot.price = price,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                debug!(symbol = %symbol, error = %e, "Quote lookup failed, using last close");
            }
        }

        Ok(Some(snapshot))
    }

    async fn bounded<T>(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
        call: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> EngineResult<T> {
        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = timeout(self.timeout, call) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => {
                    warn!(symbol = %symbol, error = %e, "Price lookup failed");
                    Err(EngineError::data_unavailable(symbol, e.to_string()))
                }
                Err(_) => {
                    warn!(symbol = %symbol, timeout_ms = self.timeout.as_millis() as u64, "Price lookup timed out");
                    Err(EngineError::data_unavailable(symbol, "timed out"))
                }
            },
        }
    }
}
