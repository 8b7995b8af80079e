//! AI signal adviser backed by an external text-generation service.
//!
//! The adviser never fails into caller code: transport errors, timeouts,
//! cancellation and malformed replies all come back as
//! [`Advice::NoOpinion`], which callers treat as "defer to the technical
//! signal".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::models::{Action, AiOpinion, Direction, IndicatorSnapshot, TradeSignal};

/// External text-generation service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Complete `prompt` under `system` instructions using `model`.
    async fn generate(&self, model: &str, system: &str, prompt: &str) -> anyhow::Result<String>;
}

/// Outcome of an advisory request.
#[derive(Debug, Clone, PartialEq)]
pub enum Advice<T> {
    Opinion(T),
    NoOpinion { reason: String },
}

impl<T> Advice<T> {
    pub fn no_opinion(reason: impl Into<String>) -> Self {
        Advice::NoOpinion {
            reason: reason.into(),
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Advice::Opinion(value) => Some(value),
            Advice::NoOpinion { .. } => None,
        }
    }
}

const SIGNAL_SYSTEM_PROMPT: &str = r#"You are a trading signal analyst for a simulated portfolio.
Given technical indicators for one asset, answer with ONLY a JSON object:
{"action": "BUY" | "SELL" | "HOLD", "direction": "LONG" | "SHORT", "confidence": 0-100, "reasoning": "short explanation"}
BUY opens a position in the given direction. SELL closes a held position in the given direction."#;

/// Raw advisor reply before validation.
#[derive(Debug, Deserialize)]
struct RawSignalReply {
    action: String,
    #[serde(default)]
    direction: Option<String>,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

/// Asks the text-generation service for signal and portfolio opinions.
#[derive(Clone)]
pub struct AiSignalAdviser {
    generator: Arc<dyn TextGenerator>,
    model: String,
    timeout: Duration,
}

impl AiSignalAdviser {
    pub fn new(generator: Arc<dyn TextGenerator>, model: String, timeout: Duration) -> Self {
        Self {
            generator,
            model,
            timeout,
        }
    }

    /// Ask for a per-symbol signal opinion.
    pub async fn signal_opinion(
        &self,
        symbol: &str,
        indicators: &IndicatorSnapshot,
        technical: TradeSignal,
        cancel: &CancellationToken,
    ) -> Advice<AiOpinion> {
        let prompt = build_signal_prompt(symbol, indicators, technical);

        let reply = match self.complete(SIGNAL_SYSTEM_PROMPT, &prompt, cancel).await {
            Ok(reply) => reply,
            Err(e) => return Advice::no_opinion(e.to_string()),
        };

        match decode_signal_reply(&reply) {
            Ok(opinion) => {
                debug!(
                    symbol = %symbol,
                    signal = %opinion.signal,
                    confidence = opinion.confidence,
                    "AI signal opinion"
                );
                Advice::Opinion(opinion)
            }
            Err(reason) => {
                warn!(symbol = %symbol, reason = %reason, "Discarding malformed AI signal");
                Advice::no_opinion(reason)
            }
        }
    }

    /// Ask for an arbitrary JSON document and decode it into `T`.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        system: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Advice<T> {
        let reply = match self.complete(system, prompt, cancel).await {
            Ok(reply) => reply,
            Err(e) => return Advice::no_opinion(e.to_string()),
        };

        match serde_json::from_str::<T>(extract_json(&reply)) {
            Ok(value) => Advice::Opinion(value),
            Err(e) => {
                warn!(error = %e, "Discarding malformed AI reply");
                Advice::no_opinion(format!("malformed reply: {e}"))
            }
        }
    }

    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, EngineError> {
        let call = self.generator.generate(&self.model, system, prompt);

        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = timeout(self.timeout, call) => match result {
                Ok(Ok(text)) => Ok(text),
                Ok(Err(e)) => {
                    warn!(model = %self.model, error = %e, "Advisor request failed");
                    Err(EngineError::AdvisorUnavailable(e.to_string()))
                }
                Err(_) => {
                    warn!(model = %self.model, "Advisor request timed out");
                    Err(EngineError::AdvisorTimeout)
                }
            },
        }
    }
}

fn build_signal_prompt(symbol: &str, ind: &IndicatorSnapshot, technical: TradeSignal) -> String {
    let fmt = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"));

    format!(
        "Asset: {symbol}\n\
         Price: {price}\n\
         EMA12: {ema12}\nEMA26: {ema26}\nEMA50: {ema50}\n\
         MACD: {macd}\nMACD signal: {signal}\nMACD histogram: {hist}\n\
         RSI(14): {rsi}\n\
         Bollinger: upper {upper}, middle {middle}, lower {lower}\n\
         Technical rule signal: {technical}\n\
         Respond with the JSON object only.",
        price = ind.price,
        ema12 = fmt(ind.ema_12),
        ema26 = fmt(ind.ema_26),
        ema50 = fmt(ind.ema_50),
        macd = fmt(ind.macd),
        signal = fmt(ind.macd_signal),
        hist = fmt(ind.macd_histogram),
        rsi = fmt(ind.rsi_14),
        upper = fmt(ind.bb_upper),
        middle = fmt(ind.bb_middle),
        lower = fmt(ind.bb_lower),
    )
}

/// Decode and validate a signal reply.
pub fn decode_signal_reply(reply: &str) -> Result<AiOpinion, String> {
    let raw: RawSignalReply = serde_json::from_str(extract_json(reply))
        .map_err(|e| format!("malformed reply: {e}"))?;

    let action: Action = raw.action.parse()?;

    let signal = match action {
        Action::Hold => TradeSignal::hold(),
        _ => {
            let direction: Direction = raw
                .direction
                .as_deref()
                .ok_or_else(|| format!("{action} without direction"))?
                .parse()?;
            TradeSignal::new(action, direction)
        }
    };

    if !raw.confidence.is_finite() || !(0.0..=100.0).contains(&raw.confidence) {
        return Err(format!("confidence out of range: {}", raw.confidence));
    }

    Ok(AiOpinion {
        signal,
        confidence: raw.confidence.round() as u8,
        reasoning: raw.reasoning,
    })
}

/// Slice out the outermost `{ ... }` block; models sometimes wrap JSON in
/// prose or code fences.
pub fn extract_json(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    }
}
