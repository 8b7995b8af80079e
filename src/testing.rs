//! In-memory collaborators and builders shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::analysis::{PriceSource, TextGenerator};
use crate::models::{Candle, Granularity, IndicatorSnapshot};

/// Bars with the given closes, one hour apart.
pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            open_time: start + Duration::hours(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        })
        .collect()
}

/// A neutral indicator snapshot at `price` (MACD == signal, RSI 50: HOLD).
pub fn indicator_snapshot(price: f64) -> IndicatorSnapshot {
    IndicatorSnapshot {
        price: Decimal::try_from(price).unwrap(),
        bars: 200,
        ema_12: Some(price),
        ema_26: Some(price),
        ema_50: Some(price),
        macd: Some(0.0),
        macd_signal: Some(0.0),
        macd_histogram: Some(0.0),
        rsi_14: Some(50.0),
        bb_upper: Some(price * 1.02),
        bb_middle: Some(price),
        bb_lower: Some(price * 0.98),
        computed_at: Utc::now(),
    }
}

/// Closes that produce a BUY LONG (bullish MACD cross while oversold): a
/// long decline followed by a sharp short bounce.
pub fn buy_long_closes() -> Vec<f64> {
    let mut closes: Vec<f64> = (0..100).map(|i| 1000.0 - i as f64 * 5.0).collect();
    let last = *closes.last().unwrap();
    closes.extend([last + 3.0, last + 1.0]);
    closes
}

/// Price source with scripted per-symbol behavior.
#[derive(Default)]
pub struct ScriptedPriceSource {
    prices: Mutex<HashMap<String, Decimal>>,
    closes: Mutex<HashMap<String, Vec<f64>>>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
}

impl ScriptedPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, symbol: &str, price: Decimal) -> Self {
        self.set_price(symbol, price);
        self
    }

    pub fn with_closes(self, symbol: &str, closes: &[f64]) -> Self {
        self.closes
            .lock()
            .unwrap()
            .insert(symbol.to_string(), closes.to_vec());
        self
    }

    pub fn failing(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_string());
        self
    }

    pub fn hanging(mut self, symbol: &str) -> Self {
        self.hanging.insert(symbol.to_string());
        self
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices
            .lock()
            .unwrap()
            .insert(symbol.to_string(), price);
    }

    async fn gate(&self, symbol: &str) -> anyhow::Result<()> {
        if self.hanging.contains(symbol) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(symbol) {
            anyhow::bail!("scripted failure for {symbol}");
        }
        Ok(())
    }
}

#[async_trait]
impl PriceSource for ScriptedPriceSource {
    async fn current_price(&self, symbol: &str) -> anyhow::Result<Decimal> {
        self.gate(symbol).await?;
        let price = self.prices.lock().unwrap().get(symbol).copied();
        price.ok_or_else(|| anyhow::anyhow!("no price for {symbol}"))
    }

    async fn history(
        &self,
        symbol: &str,
        lookback: usize,
        _granularity: Granularity,
    ) -> anyhow::Result<Vec<Candle>> {
        self.gate(symbol).await?;
        let closes = self.closes.lock().unwrap().get(symbol).cloned();
        let closes = closes.ok_or_else(|| anyhow::anyhow!("no history for {symbol}"))?;
        let skip = closes.len().saturating_sub(lookback);
        Ok(candles_from_closes(&closes[skip..]))
    }
}

enum GeneratorMode {
    Reply(String),
    Fail,
    Hang,
}

/// Text generator with one scripted behavior for every call.
pub struct ScriptedGenerator {
    mode: GeneratorMode,
    calls: Mutex<usize>,
}

impl ScriptedGenerator {
    pub fn replying(text: &str) -> Self {
        Self::with_mode(GeneratorMode::Reply(text.to_string()))
    }

    pub fn failing() -> Self {
        Self::with_mode(GeneratorMode::Fail)
    }

    pub fn hanging() -> Self {
        Self::with_mode(GeneratorMode::Hang)
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    fn with_mode(mode: GeneratorMode) -> Self {
        Self {
            mode,
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, _model: &str, _system: &str, _prompt: &str) -> anyhow::Result<String> {
        *self.calls.lock().unwrap() += 1;
        match &self.mode {
            GeneratorMode::Reply(text) => Ok(text.clone()),
            GeneratorMode::Fail => anyhow::bail!("scripted generator failure"),
            GeneratorMode::Hang => std::future::pending().await,
        }
    }
}
