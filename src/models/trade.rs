//! Trade record model: one row per executed open or close.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::position::Direction;

/// What happened to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Opened,
    Closed,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Opened => "opened",
            TradeAction::Closed => "closed",
        }
    }
}

/// Immutable trade history row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,

    pub symbol: String,

    pub action: TradeAction,

    pub direction: Direction,

    /// Execution price
    pub price: Decimal,

    /// Quantity magnitude
    pub quantity: Decimal,

    /// price * quantity at execution
    pub notional: Decimal,

    /// Realized P&L; `None` on opens
    pub pnl: Option<Decimal>,

    /// Portfolio value right after this trade
    pub portfolio_value_after: Decimal,

    /// Available cash right after this trade
    pub cash_after: Decimal,

    /// Seconds between entry and exit; closes only
    #[serde(default)]
    pub holding_secs: Option<i64>,
}

impl TradeRecord {
    pub fn is_close(&self) -> bool {
        self.action == TradeAction::Closed
    }

    /// True for a closed trade with strictly positive P&L.
    pub fn is_win(&self) -> bool {
        self.pnl.is_some_and(|p| p > Decimal::ZERO)
    }

    /// True for a closed trade with strictly negative P&L.
    pub fn is_loss(&self) -> bool {
        self.pnl.is_some_and(|p| p < Decimal::ZERO)
    }
}
