//! Rule table turning indicators into a technical (action, direction) signal.

use crate::models::{Direction, IndicatorSnapshot, TradeSignal};

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;

/// Deterministic priority table; the first matching row wins.
///
/// 1. MACD > signal and RSI < 30: BUY LONG
/// 2. MACD < signal and RSI > 70: BUY SHORT
/// 3. MACD < signal or RSI > 70: SELL LONG
/// 4. MACD > signal or RSI < 30: SELL SHORT
/// 5. otherwise HOLD
///
/// A missing MACD, MACD signal or RSI yields HOLD.
pub fn generate_signal(indicators: &IndicatorSnapshot) -> TradeSignal {
    let (Some(macd), Some(signal), Some(rsi)) =
        (indicators.macd, indicators.macd_signal, indicators.rsi_14)
    else {
        return TradeSignal::hold();
    };

    let bullish_cross = macd > signal;
    let bearish_cross = macd < signal;
    let oversold = rsi < RSI_OVERSOLD;
    let overbought = rsi > RSI_OVERBOUGHT;

    if bullish_cross && oversold {
        TradeSignal::buy(Direction::Long)
    } else if bearish_cross && overbought {
        TradeSignal::buy(Direction::Short)
    } else if bearish_cross || overbought {
        TradeSignal::sell(Direction::Long)
    } else if bullish_cross || oversold {
        TradeSignal::sell(Direction::Short)
    } else {
        TradeSignal::hold()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;
    use crate::testing::indicator_snapshot;

    fn signal_for(macd: Option<f64>, macd_signal: Option<f64>, rsi: Option<f64>) -> TradeSignal {
        let mut snapshot = indicator_snapshot(100.0);
        snapshot.macd = macd;
        snapshot.macd_signal = macd_signal;
        snapshot.rsi_14 = rsi;
        generate_signal(&snapshot)
    }

    #[test]
    fn test_priority_table() {
        assert_eq!(signal_for(Some(1.0), Some(0.5), Some(25.0)), TradeSignal::buy(Direction::Long));
        assert_eq!(signal_for(Some(0.5), Some(1.0), Some(75.0)), TradeSignal::buy(Direction::Short));
        assert_eq!(signal_for(Some(0.5), Some(1.0), Some(50.0)), TradeSignal::sell(Direction::Long));
        assert_eq!(signal_for(Some(1.0), Some(1.0), Some(75.0)), TradeSignal::sell(Direction::Long));
        assert_eq!(signal_for(Some(1.0), Some(0.5), Some(50.0)), TradeSignal::sell(Direction::Short));
        assert_eq!(signal_for(Some(1.0), Some(1.0), Some(25.0)), TradeSignal::sell(Direction::Short));
        assert_eq!(signal_for(Some(1.0), Some(1.0), Some(50.0)), TradeSignal::hold());
    }

    #[test]
    fn test_overbought_with_bullish_cross_is_sell_long() {
        // Row 3 (RSI > 70) outranks row 4 (MACD > signal)
        let signal = signal_for(Some(2.0), Some(1.0), Some(80.0));
        assert_eq!(signal, TradeSignal::sell(Direction::Long));
    }

    #[test]
    fn test_missing_indicator_is_hold() {
        assert_eq!(signal_for(None, Some(1.0), Some(20.0)).action, Action::Hold);
        assert_eq!(signal_for(Some(1.0), None, Some(20.0)).action, Action::Hold);
        assert_eq!(signal_for(Some(2.0), Some(1.0), None).action, Action::Hold);
    }
}
