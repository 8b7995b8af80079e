//! Turning a free-text creation request into a [`TradingInstanceConfig`].

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analysis::{Advice, AiSignalAdviser};
use crate::error::{EngineError, EngineResult};
use crate::trading::TradingInstanceConfig;

/// Parses creation requests into validated configs.
#[async_trait]
pub trait RequestParser: Send + Sync {
    async fn parse(&self, request: &str, cancel: &CancellationToken) -> EngineResult<TradingInstanceConfig>;
}

/// Lowercase names accepted as symbols without being written in uppercase.
const KNOWN_ASSETS: [(&str, &str); 18] = [
    ("btc", "BTC"),
    ("bitcoin", "BTC"),
    ("eth", "ETH"),
    ("ethereum", "ETH"),
    ("ether", "ETH"),
    ("sol", "SOL"),
    ("solana", "SOL"),
    ("bnb", "BNB"),
    ("xrp", "XRP"),
    ("ripple", "XRP"),
    ("ada", "ADA"),
    ("cardano", "ADA"),
    ("doge", "DOGE"),
    ("dogecoin", "DOGE"),
    ("avax", "AVAX"),
    ("link", "LINK"),
    ("ltc", "LTC"),
    ("dot", "DOT"),
];

/// Uppercase words never taken as symbols.
const NOT_SYMBOLS: [&str; 8] = ["AI", "USD", "USDT", "MAX", "RISK", "EVERY", "WITH", "AND"];

/// Rule-based parser for requests like
/// `trade BTC ETH with $50000 every 30s risk 2% max 2 positions model gpt-4o use ai`.
#[derive(Debug, Clone)]
pub struct KeywordRequestParser {
    defaults: TradingInstanceConfig,
}

impl KeywordRequestParser {
    pub fn new(defaults: TradingInstanceConfig) -> Self {
        Self { defaults }
    }

    /// Parse without validating.
    pub fn parse_fields(&self, request: &str) -> EngineResult<TradingInstanceConfig> {
        let mut config = self.defaults.clone();
        config.symbols.clear();

        let tokens: Vec<&str> = request
            .split(|c: char| c.is_whitespace() || c == ',' || c == '/' || c == ';')
            .filter(|t| !t.is_empty())
            .collect();

        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            let word = token.to_lowercase();
            let next = tokens.get(i + 1).copied();

            match word.as_str() {
                "with" | "capital" | "budget" if next.is_some_and(is_amount) => {
                    config.initial_capital = parse_amount(next.unwrap_or_default())?;
                    i += 2;
                    continue;
                }
                "every" | "interval" => {
                    if let Some((seconds, used)) = parse_interval(&tokens[i + 1..]) {
                        config.check_interval = Duration::try_from_secs_f64(seconds).map_err(|_| {
                            EngineError::Configuration(format!("check interval out of range: {seconds}s"))
                        })?;
                        i += 1 + used;
                        continue;
                    }
                }
                "risk" => {
                    if let Some(risk) = next.and_then(parse_fraction) {
                        config.risk_per_trade = risk;
                        i += 2;
                        continue;
                    }
                }
                "max" | "max-positions" => {
                    if let Some(n) = next.and_then(|t| t.parse::<usize>().ok()) {
                        config.max_positions = n;
                        i += 2;
                        if tokens
                            .get(i)
                            .is_some_and(|t| t.to_lowercase().starts_with("position"))
                        {
                            i += 1;
                        }
                        continue;
                    }
                }
                "model" => {
                    if let Some(model) = next {
                        config.model = model.to_string();
                        i += 2;
                        continue;
                    }
                }
                "ai" => {
                    let negated = i > 0 && matches!(tokens[i - 1].to_lowercase().as_str(), "no" | "without");
                    config.use_ai_signals = !negated;
                    i += 1;
                    continue;
                }
                _ => {}
            }

            if token.starts_with('$') {
                config.initial_capital = parse_amount(token)?;
            } else if let Some(symbol) = as_symbol(token) {
                if !config.symbols.contains(&symbol) {
                    config.symbols.push(symbol);
                }
            }
            i += 1;
        }

        Ok(config)
    }
}

#[async_trait]
impl RequestParser for KeywordRequestParser {
    async fn parse(&self, request: &str, _cancel: &CancellationToken) -> EngineResult<TradingInstanceConfig> {
        let config = self.parse_fields(request)?.validated()?;
        debug!(symbols = ?config.symbols, capital = %config.initial_capital, "Request parsed");
        Ok(config)
    }
}

fn is_amount(token: &str) -> bool {
    parse_amount(token).is_ok()
}

/// `$50,000`, `50000`, `50k`, `1.5m`.
fn parse_amount(token: &str) -> EngineResult<Decimal> {
    let cleaned: String = token
        .trim_start_matches('$')
        .trim_end_matches(|c: char| c == '.' || c == '!')
        .chars()
        .filter(|c| *c != ',' && *c != '_')
        .collect::<String>()
        .to_lowercase();

    let (digits, multiplier) = match cleaned.chars().last() {
        Some('k') => (&cleaned[..cleaned.len() - 1], Decimal::from(1_000)),
        Some('m') => (&cleaned[..cleaned.len() - 1], Decimal::from(1_000_000)),
        _ => (cleaned.as_str(), Decimal::ONE),
    };

    digits
        .parse::<Decimal>()
        .ok()
        .and_then(|value| value.checked_mul(multiplier))
        .ok_or_else(|| EngineError::Configuration(format!("invalid amount: {token}")))
}

/// `30s`, `5m`, `1h`, or a number followed by a unit word. Returns the
/// interval in seconds and the number of tokens consumed.
fn parse_interval(tokens: &[&str]) -> Option<(f64, usize)> {
    let first = tokens.first()?.to_lowercase();
    let split = first.find(|c: char| !c.is_ascii_digit() && c != '.').unwrap_or(first.len());
    let (number, unit) = first.split_at(split);

    let (value, unit, used) = if number.is_empty() {
        // "every minute"
        (1.0, first.clone(), 1)
    } else if unit.is_empty() {
        (number.parse::<f64>().ok()?, tokens.get(1)?.to_lowercase(), 2)
    } else {
        (number.parse::<f64>().ok()?, unit.to_string(), 1)
    };

    let seconds = match unit.trim_end_matches('.') {
        "s" | "sec" | "secs" | "second" | "seconds" => value,
        "m" | "min" | "mins" | "minute" | "minutes" => value * 60.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => value * 3600.0,
        _ => return None,
    };

    (seconds > 0.0).then_some((seconds, used))
}

/// `2%` is 0.02; a bare number above 1 is a percentage too.
fn parse_fraction(token: &str) -> Option<Decimal> {
    let (digits, percent) = match token.strip_suffix('%') {
        Some(digits) => (digits, true),
        None => (token, false),
    };
    let value: Decimal = digits.parse().ok()?;
    if percent || value > Decimal::ONE {
        Some(value / Decimal::ONE_HUNDRED)
    } else {
        Some(value)
    }
}

fn as_symbol(token: &str) -> Option<String> {
    let trimmed = token.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    let lower = trimmed.to_lowercase();

    if let Some((_, symbol)) = KNOWN_ASSETS.iter().find(|(name, _)| *name == lower) {
        return Some(symbol.to_string());
    }

    let is_ticker = (2..=10).contains(&trimmed.len())
        && trimmed.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        && trimmed.chars().next().is_some_and(|c| c.is_ascii_uppercase());
    (is_ticker && !NOT_SYMBOLS.contains(&trimmed)).then(|| trimmed.to_string())
}

const PARSE_SYSTEM_PROMPT: &str = r#"You convert trading requests into configuration.
Answer with ONLY a JSON object with these optional fields:
{"symbols": ["BTC"], "initial_capital": 10000, "check_interval_secs": 60, "risk_per_trade": 0.02, "max_positions": 3, "model": "gpt-4o-mini", "use_ai_signals": false}
risk_per_trade is a fraction between 0 and 1. Symbols are bare tickers."#;

#[derive(Debug, Deserialize)]
struct AdvisedConfig {
    #[serde(default)]
    symbols: Vec<String>,
    initial_capital: Option<f64>,
    check_interval_secs: Option<u64>,
    risk_per_trade: Option<f64>,
    max_positions: Option<usize>,
    model: Option<String>,
    use_ai_signals: Option<bool>,
}

/// Asks the advisor to extract a config, falling back to keyword parsing
/// when it has no opinion or proposes an invalid config.
pub struct AdvisorRequestParser {
    adviser: AiSignalAdviser,
    fallback: KeywordRequestParser,
}

impl AdvisorRequestParser {
    pub fn new(adviser: AiSignalAdviser, fallback: KeywordRequestParser) -> Self {
        Self { adviser, fallback }
    }

    fn apply(&self, advised: AdvisedConfig) -> EngineResult<TradingInstanceConfig> {
        let mut config = self.fallback.defaults.clone();
        config.symbols = advised.symbols;

        if let Some(capital) = advised.initial_capital {
            config.initial_capital = Decimal::try_from(capital)
                .map_err(|e| EngineError::Configuration(format!("invalid capital: {e}")))?;
        }
        if let Some(secs) = advised.check_interval_secs {
            config.check_interval = Duration::from_secs(secs);
        }
        if let Some(risk) = advised.risk_per_trade {
            config.risk_per_trade = Decimal::try_from(risk)
                .map_err(|e| EngineError::Configuration(format!("invalid risk: {e}")))?;
        }
        if let Some(max) = advised.max_positions {
            config.max_positions = max;
        }
        if let Some(model) = advised.model {
            config.model = model;
        }
        if let Some(ai) = advised.use_ai_signals {
            config.use_ai_signals = ai;
        }

        config.validated()
    }
}

#[async_trait]
impl RequestParser for AdvisorRequestParser {
    async fn parse(&self, request: &str, cancel: &CancellationToken) -> EngineResult<TradingInstanceConfig> {
        let prompt = format!("Request: {request}\nRespond with the JSON object only.");

        match self
            .adviser
            .request_json::<AdvisedConfig>(PARSE_SYSTEM_PROMPT, &prompt, cancel)
            .await
        {
            Advice::Opinion(advised) => match self.apply(advised) {
                Ok(config) => {
                    info!(symbols = ?config.symbols, model = %config.model, "Request parsed by advisor");
                    return Ok(config);
                }
                Err(e) => warn!(error = %e, "Advisor proposed an invalid config, parsing keywords"),
            },
            Advice::NoOpinion { reason } => {
                debug!(reason = %reason, "Advisor could not parse request, parsing keywords");
            }
        }

        self.fallback.parse(request, cancel).await
    }
}
