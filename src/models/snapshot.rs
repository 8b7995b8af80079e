//! Point-in-time valuation rows. Append-only, owned by one instance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::position::Direction;

/// Valuation of one open position at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub direction: Direction,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    /// `None` when the price lookup failed and the row degraded to notional
    pub current_price: Option<Decimal>,
    pub value: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Valuation of the whole instance portfolio at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_value: Decimal,
    pub available_cash: Decimal,
    pub positions_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub open_positions: usize,
}
