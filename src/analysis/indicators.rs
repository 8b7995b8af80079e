//! Technical indicator calculations: EMA, MACD, RSI and Bollinger bands.

use chrono::Utc;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;
use tracing::debug;

use crate::models::{Candle, IndicatorSnapshot};

/// Fewer bars than this and indicators are reported unavailable.
pub const MIN_BARS: usize = 50;

const RSI_PERIOD: usize = 14;
const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_WIDTH: f64 = 2.0;

/// Compute the full indicator set from a bar series, oldest first.
///
/// Returns `None` ("unavailable") when fewer than [`MIN_BARS`] bars exist.
/// Never panics on short or degenerate input.
pub fn calculate_indicators(candles: &[Candle]) -> Option<IndicatorSnapshot> {
    if candles.len() < MIN_BARS {
        debug!(bars = candles.len(), required = MIN_BARS, "Not enough bars for indicators");
        return None;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let last_close = *closes.last()?;
    let price = Decimal::try_from(last_close).ok()?;

    let ema_12 = ema_series(&closes, 12);
    let ema_26 = ema_series(&closes, 26);
    let ema_50 = ema_series(&closes, 50);

    let macd_line: Vec<f64> = ema_12.iter().zip(&ema_26).map(|(a, b)| a - b).collect();
    let signal_line = ema_series(&macd_line, 9);

    let macd = finite(macd_line.last().copied());
    let macd_signal = finite(signal_line.last().copied());
    let macd_histogram = match (macd, macd_signal) {
        (Some(m), Some(s)) => finite(Some(m - s)),
        _ => None,
    };

    let (bb_upper, bb_middle, bb_lower) = match bollinger(&closes, BOLLINGER_PERIOD, BOLLINGER_WIDTH) {
        Some((upper, middle, lower)) => (finite(Some(upper)), finite(Some(middle)), finite(Some(lower))),
        None => (None, None, None),
    };

    Some(IndicatorSnapshot {
        price,
        bars: candles.len(),
        ema_12: finite(ema_12.last().copied()),
        ema_26: finite(ema_26.last().copied()),
        ema_50: finite(ema_50.last().copied()),
        macd,
        macd_signal,
        macd_histogram,
        rsi_14: finite(rsi(&closes, RSI_PERIOD)),
        bb_upper,
        bb_middle,
        bb_lower,
        computed_at: Utc::now(),
    })
}

/// Exponential moving average over the whole series, seeded with the first
/// value. `alpha = 2 / (period + 1)`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let Some(&first) = values.first() else {
        return out;
    };

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = first;
    out.push(prev);

    for &value in &values[1..] {
        prev = alpha * value + (1.0 - alpha) * prev;
        out.push(prev);
    }

    out
}

/// Relative strength index using Wilder smoothing.
///
/// The first averages are simple means over `period` changes; afterwards
/// `avg = (avg * (period - 1) + current) / period`.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() <= period {
        return None;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let (seed, rest) = changes.split_at(period);

    let mut avg_gain = seed.iter().map(|c| c.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss = seed.iter().map(|c| (-c).max(0.0)).sum::<f64>() / period as f64;

    let n = period as f64;
    for &change in rest {
        avg_gain = (avg_gain * (n - 1.0) + change.max(0.0)) / n;
        avg_loss = (avg_loss * (n - 1.0) + (-change).max(0.0)) / n;
    }

    if avg_loss == 0.0 {
        // No losses in the window: flat series is neutral, otherwise maximal
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Bollinger bands over the last `period` closes: `SMA ± width * stddev`.
///
/// Uses the sample standard deviation. Returns `(upper, middle, lower)`.
pub fn bollinger(closes: &[f64], period: usize, width: f64) -> Option<(f64, f64, f64)> {
    if period < 2 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.mean();
    let std_dev = window.std_dev();

    Some((middle + width * std_dev, middle, middle - width * std_dev))
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::candles_from_closes;

    #[test]
    fn test_unavailable_below_min_bars() {
        let candles = candles_from_closes(&vec![100.0; MIN_BARS - 1]);
        assert!(calculate_indicators(&candles).is_none());
        assert!(calculate_indicators(&[]).is_none());
    }

    #[test]
    fn test_available_at_min_bars() {
        let closes: Vec<f64> = (0..MIN_BARS).map(|i| 100.0 + i as f64).collect();
        let snapshot = calculate_indicators(&candles_from_closes(&closes)).unwrap();

        assert_eq!(snapshot.bars, MIN_BARS);
        assert_eq!(snapshot.price, Decimal::from(149));
        assert!(snapshot.macd.is_some());
        assert!(snapshot.macd_signal.is_some());
        assert!(snapshot.bb_upper.unwrap() > snapshot.bb_lower.unwrap());
    }

    #[test]
    fn test_ema_seeded_with_first_value() {
        let ema = ema_series(&[10.0, 10.0, 10.0], 5);
        assert_eq!(ema, vec![10.0, 10.0, 10.0]);

        let ema = ema_series(&[10.0, 20.0], 3);
        // alpha = 0.5
        assert!((ema[1] - 15.0).abs() < 1e-9);
        assert!(ema_series(&[], 3).is_empty());
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<f64> = (0..30).map(|i| i as f64).collect();
        assert_eq!(rsi(&rising, 14), Some(100.0));

        let falling: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        assert!(rsi(&falling, 14).unwrap() < 1e-9);

        let flat = vec![5.0; 30];
        assert_eq!(rsi(&flat, 14), Some(50.0));

        assert_eq!(rsi(&[1.0, 2.0], 14), None);
    }

    #[test]
    fn test_rsi_balanced_moves_near_fifty() {
        let zigzag: Vec<f64> = (0..60).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        let value = rsi(&zigzag, 14).unwrap();
        assert!((value - 50.0).abs() < 5.0, "rsi = {value}");
    }

    #[test]
    fn test_macd_positive_in_uptrend() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let snapshot = calculate_indicators(&candles_from_closes(&closes)).unwrap();
        assert!(snapshot.macd.unwrap() > 0.0);
        assert!(snapshot.ema_12.unwrap() > snapshot.ema_26.unwrap());
    }

    #[test]
    fn test_bollinger_flat_series_collapses() {
        let (upper, middle, lower) = bollinger(&vec![42.0; 25], 20, 2.0).unwrap();
        assert_eq!(upper, 42.0);
        assert_eq!(middle, 42.0);
        assert_eq!(lower, 42.0);
        assert!(bollinger(&[1.0; 5], 20, 2.0).is_none());
    }
}
