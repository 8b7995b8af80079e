//! Position model representing one open simulated holding.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which way a position profits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Profits as price rises
    Long,
    /// Profits as price falls
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// An open position. At most one exists per symbol per instance, and it is
/// never amended in place: it is created on open and destroyed on close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Traded symbol (e.g. "BTC")
    pub symbol: String,

    /// Price paid (or received, for shorts) at entry
    pub entry_price: Decimal,

    /// Quantity magnitude; always positive
    pub quantity: Decimal,

    pub direction: Direction,

    pub entry_time: DateTime<Utc>,

    /// entry_price * quantity, the cash committed to this position
    pub notional: Decimal,
}

impl Position {
    /// Create a position entered now.
    pub fn new(symbol: String, direction: Direction, entry_price: Decimal, quantity: Decimal) -> Self {
        Self::opened_at(symbol, direction, entry_price, quantity, Utc::now())
    }

    pub fn opened_at(
        symbol: String,
        direction: Direction,
        entry_price: Decimal,
        quantity: Decimal,
        entry_time: DateTime<Utc>,
    ) -> Self {
        let quantity = quantity.abs();
        Self {
            symbol,
            entry_price,
            quantity,
            direction,
            entry_time,
            notional: entry_price * quantity,
        }
    }

    /// Unrealized P&L at `current_price`.
    ///
    /// LONG: `(current - entry) * |qty|`, SHORT: `(entry - current) * |qty|`.
    pub fn pnl_at(&self, current_price: Decimal) -> Decimal {
        let qty = self.quantity.abs();
        match self.direction {
            Direction::Long => (current_price - self.entry_price) * qty,
            Direction::Short => (self.entry_price - current_price) * qty,
        }
    }

    /// Value of the position at `current_price`: committed notional plus
    /// unrealized P&L.
    pub fn value_at(&self, current_price: Decimal) -> Decimal {
        self.notional + self.pnl_at(current_price)
    }

    /// Return relative to the committed notional.
    pub fn return_pct(&self, current_price: Decimal) -> Decimal {
        if self.notional.is_zero() {
            return Decimal::ZERO;
        }
        self.pnl_at(current_price) / self.notional
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_pnl_sign_by_direction() {
        let long = Position::new("BTC".into(), Direction::Long, dec!(100), dec!(1));
        let short = Position::new("BTC".into(), Direction::Short, dec!(100), dec!(1));

        assert_eq!(long.pnl_at(dec!(110)), dec!(10));
        assert_eq!(short.pnl_at(dec!(110)), dec!(-10));
        assert_eq!(short.pnl_at(dec!(90)), dec!(10));
    }

    #[test]
    fn test_quantity_is_magnitude() {
        let pos = Position::new("ETH".into(), Direction::Short, dec!(2000), dec!(-0.5));
        assert_eq!(pos.quantity, dec!(0.5));
        assert_eq!(pos.notional, dec!(1000));
    }

    #[test]
    fn test_value_includes_pnl() {
        let short = Position::new("ETH".into(), Direction::Short, dec!(2000), dec!(1));
        assert_eq!(short.value_at(dec!(1800)), dec!(2200));
        assert_eq!(short.return_pct(dec!(1800)), dec!(0.1));
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("long".parse::<Direction>(), Ok(Direction::Long));
        assert_eq!(" SHORT ".parse::<Direction>(), Ok(Direction::Short));
        assert!("sideways".parse::<Direction>().is_err());
    }
}
