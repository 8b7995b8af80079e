//! Trading signals: technical, AI-advised, and the per-symbol analysis that
//! carries both.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::market::IndicatorSnapshot;
use super::position::Direction;

/// What to do with a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    /// Open a position in the signal's direction
    Buy,
    /// Close a held position in the signal's direction
    Sell,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(Action::Buy),
            "SELL" => Ok(Action::Sell),
            "HOLD" => Ok(Action::Hold),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// An (action, direction) pair. HOLD carries no direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub action: Action,
    pub direction: Option<Direction>,
}

impl TradeSignal {
    pub fn new(action: Action, direction: Direction) -> Self {
        if action == Action::Hold {
            return Self::hold();
        }
        Self {
            action,
            direction: Some(direction),
        }
    }

    pub fn hold() -> Self {
        Self {
            action: Action::Hold,
            direction: None,
        }
    }

    pub fn buy(direction: Direction) -> Self {
        Self::new(Action::Buy, direction)
    }

    pub fn sell(direction: Direction) -> Self {
        Self::new(Action::Sell, direction)
    }

    pub fn is_hold(&self) -> bool {
        self.action == Action::Hold
    }
}

impl fmt::Display for TradeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Some(direction) => write!(f, "{} {}", self.action, direction),
            None => write!(f, "{}", self.action),
        }
    }
}

/// A validated opinion from the advisory service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiOpinion {
    pub signal: TradeSignal,
    /// 0 to 100
    pub confidence: u8,
    pub reasoning: String,
}

/// The signal a decision is based on, tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Technical(TradeSignal),
    AiAdvised(AiOpinion),
}

impl Signal {
    pub fn trade_signal(&self) -> TradeSignal {
        match self {
            Signal::Technical(signal) => *signal,
            Signal::AiAdvised(opinion) => opinion.signal,
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            Signal::Technical(_) => "technical",
            Signal::AiAdvised(_) => "ai",
        }
    }
}

/// Everything known about one symbol in one cycle.
#[derive(Debug, Clone)]
pub struct AssetAnalysis {
    pub symbol: String,
    pub price: Decimal,
    pub indicators: IndicatorSnapshot,
    pub technical: TradeSignal,
    pub ai: Option<AiOpinion>,
}

impl AssetAnalysis {
    /// The AI opinion when present, else the technical signal.
    pub fn recommended(&self) -> Signal {
        match &self.ai {
            Some(opinion) => Signal::AiAdvised(opinion.clone()),
            None => Signal::Technical(self.technical),
        }
    }

    /// Confidence used to rank candidates; technical signals rank lowest.
    pub fn confidence(&self) -> u8 {
        self.ai.as_ref().map_or(0, |opinion| opinion.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_drops_direction() {
        let signal = TradeSignal::new(Action::Hold, Direction::Short);
        assert_eq!(signal, TradeSignal::hold());
        assert_eq!(signal.to_string(), "HOLD");
        assert_eq!(TradeSignal::buy(Direction::Short).to_string(), "BUY SHORT");
    }

    #[test]
    fn test_signal_source() {
        let technical = Signal::Technical(TradeSignal::sell(Direction::Long));
        assert_eq!(technical.source(), "technical");
        assert_eq!(technical.trade_signal().action, Action::Sell);

        let advised = Signal::AiAdvised(AiOpinion {
            signal: TradeSignal::buy(Direction::Long),
            confidence: 80,
            reasoning: "momentum".into(),
        });
        assert_eq!(advised.source(), "ai");
        assert_eq!(advised.trade_signal().direction, Some(Direction::Long));
    }

    #[test]
    fn test_recommended_prefers_ai() {
        let mut analysis = AssetAnalysis {
            symbol: "BTC".into(),
            price: Decimal::from(100),
            indicators: crate::testing::indicator_snapshot(100.0),
            technical: TradeSignal::sell(Direction::Long),
            ai: None,
        };
        assert_eq!(analysis.recommended().source(), "technical");
        assert_eq!(analysis.confidence(), 0);

        analysis.ai = Some(AiOpinion {
            signal: TradeSignal::hold(),
            confidence: 65,
            reasoning: "range bound".into(),
        });
        assert_eq!(analysis.recommended().trade_signal(), TradeSignal::hold());
        assert_eq!(analysis.confidence(), 65);
    }
}
