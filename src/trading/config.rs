//! Engine and per-instance trading configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::api::MARKET_API_BASE;
use crate::error::{EngineError, EngineResult};
use crate::models::Granularity;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Process-wide tunables shared by every session.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Bound on each price or history lookup
    pub price_timeout: Duration,

    /// Bound on each advisor call
    pub advisor_timeout: Duration,

    /// Bars requested per history lookup
    pub history_lookback: usize,

    /// Bar size for history lookups
    pub granularity: Granularity,

    /// Market data REST base URL
    pub market_base_url: String,

    /// Text-generation base URL; no AI features without it
    pub llm_base_url: Option<String>,

    pub llm_api_key: Option<String>,

    /// Model used when a request does not name one
    pub default_model: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            price_timeout: Duration::from_secs(10),
            advisor_timeout: Duration::from_secs(30),
            history_lookback: 200,
            granularity: Granularity::OneHour,
            market_base_url: MARKET_API_BASE.to_string(),
            llm_base_url: None,
            llm_api_key: None,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }
}

/// Configuration of one trading instance.
#[derive(Debug, Clone, PartialEq)]
pub struct TradingInstanceConfig {
    /// Starting cash
    pub initial_capital: Decimal,

    /// Symbols analyzed every cycle
    pub symbols: Vec<String>,

    /// Pause between cycles
    pub check_interval: Duration,

    /// Fraction of available cash committed per new position (0.0 to 1.0]
    pub risk_per_trade: Decimal,

    /// Maximum concurrently open positions
    pub max_positions: usize,

    /// Model identifier; also the instance's label in charts and notifications
    pub model: String,

    /// Ask the advisor for per-symbol signals and portfolio decisions
    pub use_ai_signals: bool,
}

impl Default for TradingInstanceConfig {
    fn default() -> Self {
        Self {
            initial_capital: dec!(10000),
            symbols: Vec::new(),
            check_interval: Duration::from_secs(60),
            risk_per_trade: dec!(0.02),  // 2% of available cash
            max_positions: 3,
            model: DEFAULT_MODEL.to_string(),
            use_ai_signals: false,
        }
    }
}

impl TradingInstanceConfig {
    /// Normalize symbols (uppercase, trimmed, de-duplicated in order) and
    /// check every constraint.
    pub fn validated(mut self) -> EngineResult<Self> {
        let mut symbols: Vec<String> = Vec::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            let symbol = symbol.trim().to_uppercase();
            if !symbol.is_empty() && !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        self.symbols = symbols;

        if self.symbols.is_empty() {
            return Err(EngineError::Configuration("no symbols to trade".into()));
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(EngineError::Configuration(format!(
                "initial capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if self.risk_per_trade <= Decimal::ZERO || self.risk_per_trade > Decimal::ONE {
            return Err(EngineError::Configuration(format!(
                "risk per trade must be in (0, 1], got {}",
                self.risk_per_trade
            )));
        }
        if self.max_positions == 0 {
            return Err(EngineError::Configuration("max positions must be at least 1".into()));
        }
        if self.check_interval.is_zero() {
            return Err(EngineError::Configuration("check interval must be positive".into()));
        }
        if self.model.trim().is_empty() {
            self.model = DEFAULT_MODEL.to_string();
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(symbols: &[&str]) -> TradingInstanceConfig {
        TradingInstanceConfig {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            ..TradingInstanceConfig::default()
        }
    }

    #[test]
    fn test_symbols_normalized() {
        let cfg = config(&[" btc", "ETH", "BTC", ""]).validated().unwrap();
        assert_eq!(cfg.symbols, vec!["BTC", "ETH"]);
    }

    #[test]
    fn test_rejects_invalid_configs() {
        assert!(matches!(config(&[]).validated(), Err(EngineError::Configuration(_))));

        let mut cfg = config(&["BTC"]);
        cfg.initial_capital = Decimal::ZERO;
        assert!(cfg.validated().is_err());

        let mut cfg = config(&["BTC"]);
        cfg.risk_per_trade = dec!(1.5);
        assert!(cfg.validated().is_err());

        let mut cfg = config(&["BTC"]);
        cfg.max_positions = 0;
        assert!(cfg.validated().is_err());

        let mut cfg = config(&["BTC"]);
        cfg.check_interval = Duration::ZERO;
        assert!(cfg.validated().is_err());
    }
}
