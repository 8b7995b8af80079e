//! Trading executor: opens and closes simulated positions.
//!
//! Combines the [`PositionManager`] and [`TradeRecorder`] of one instance.
//! Every successful open or close mutates the ledger and appends exactly
//! one trade record; a rejected attempt leaves no trace.

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info};

use super::config::TradingInstanceConfig;
use super::position_manager::PositionManager;
use super::trade_recorder::TradeRecorder;
use crate::models::{Action, Direction, IndicatorSnapshot, Position, TradeRecord};

/// Decimal places kept on sized quantities (rounded toward zero).
const QUANTITY_DP: u32 = 8;

/// Why a trade was not executed.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// HOLD is never executed
    Hold,
    /// BUY on a symbol that already has an open position
    AlreadyHeld,
    /// BUY while `max_positions` positions are open
    MaxPositions { open: usize, max: usize },
    /// Sized notional is zero or exceeds available cash
    InsufficientCash { required: Decimal, available: Decimal },
    /// SELL on a symbol with no open position
    NoPosition,
    /// SELL whose direction differs from the held position
    DirectionMismatch { held: Direction, requested: Direction },
    /// Execution price is not positive
    InvalidPrice(Decimal),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Hold => write!(f, "hold"),
            Rejection::AlreadyHeld => write!(f, "position already open"),
            Rejection::MaxPositions { open, max } => {
                write!(f, "max positions reached ({open}/{max})")
            }
            Rejection::InsufficientCash {
                required,
                available,
            } => write!(f, "insufficient cash: need {required}, have {available}"),
            Rejection::NoPosition => write!(f, "no open position"),
            Rejection::DirectionMismatch { held, requested } => {
                write!(f, "direction mismatch: held {held}, requested {requested}")
            }
            Rejection::InvalidPrice(price) => write!(f, "invalid price {price}"),
        }
    }
}

/// Result of one `execute_trade` call.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Opened(TradeRecord),
    Closed(TradeRecord),
    Rejected(Rejection),
}

impl ExecutionOutcome {
    pub fn is_executed(&self) -> bool {
        !matches!(self, ExecutionOutcome::Rejected(_))
    }

    pub fn record(&self) -> Option<&TradeRecord> {
        match self {
            ExecutionOutcome::Opened(record) | ExecutionOutcome::Closed(record) => Some(record),
            ExecutionOutcome::Rejected(_) => None,
        }
    }
}

/// Facade over one instance's ledger and trade history.
#[derive(Debug)]
pub struct TradingExecutor {
    risk_per_trade: Decimal,
    max_positions: usize,
    positions: PositionManager,
    recorder: TradeRecorder,
}

impl TradingExecutor {
    pub fn new(config: &TradingInstanceConfig) -> Self {
        Self {
            risk_per_trade: config.risk_per_trade,
            max_positions: config.max_positions,
            positions: PositionManager::new(config.initial_capital),
            recorder: TradeRecorder::new(),
        }
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut PositionManager {
        &mut self.positions
    }

    pub fn recorder(&self) -> &TradeRecorder {
        &self.recorder
    }

    /// Quantity a new position would get at `price`:
    /// `available_cash * risk_per_trade / price`.
    pub fn position_size(&self, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.positions.available_cash() * self.risk_per_trade / price)
            .round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::ToZero)
    }

    /// Execute one trade at the indicator snapshot's price.
    pub fn execute_trade(
        &mut self,
        symbol: &str,
        action: Action,
        direction: Direction,
        indicators: &IndicatorSnapshot,
    ) -> ExecutionOutcome {
        let price = indicators.price;
        if price <= Decimal::ZERO {
            return self.reject(symbol, Rejection::InvalidPrice(price));
        }

        match action {
            Action::Buy => self.open(symbol, direction, price),
            Action::Sell => self.close(symbol, direction, price),
            Action::Hold => self.reject(symbol, Rejection::Hold),
        }
    }

    fn open(&mut self, symbol: &str, direction: Direction, price: Decimal) -> ExecutionOutcome {
        if self.positions.has_position(symbol) {
            return self.reject(symbol, Rejection::AlreadyHeld);
        }

        let open = self.positions.open_count();
        if open >= self.max_positions {
            return self.reject(
                symbol,
                Rejection::MaxPositions {
                    open,
                    max: self.max_positions,
                },
            );
        }

        let quantity = self.position_size(price);
        let notional = price * quantity;
        let available = self.positions.available_cash();
        if quantity.is_zero() || notional > available {
            return self.reject(
                symbol,
                Rejection::InsufficientCash {
                    required: notional,
                    available,
                },
            );
        }

        let position = Position::new(symbol.to_string(), direction, price, quantity);
        if !self.positions.open_position(position.clone()) {
            return self.reject(
                symbol,
                Rejection::InsufficientCash {
                    required: notional,
                    available,
                },
            );
        }
        self.positions.mark_price(symbol, price);

        let value = self.positions.valuation_at_marks().total_value;
        let cash = self.positions.available_cash();
        let record = self.recorder.record_open(&position, value, cash).clone();

        info!(
            symbol = %symbol,
            direction = %direction,
            price = %price,
            quantity = %quantity,
            notional = %notional,
            cash = %cash,
            "Position opened"
        );

        ExecutionOutcome::Opened(record)
    }

    fn close(&mut self, symbol: &str, direction: Direction, price: Decimal) -> ExecutionOutcome {
        let Some(held) = self.positions.get_position(symbol).map(|p| p.direction) else {
            return self.reject(symbol, Rejection::NoPosition);
        };
        if held != direction {
            return self.reject(
                symbol,
                Rejection::DirectionMismatch {
                    held,
                    requested: direction,
                },
            );
        }

        let Some(settled) = self.positions.settle_position(symbol, price) else {
            return self.reject(symbol, Rejection::NoPosition);
        };
        self.positions.mark_price(symbol, price);

        let value = self.positions.valuation_at_marks().total_value;
        let cash = self.positions.available_cash();
        let record = self
            .recorder
            .record_close(&settled.position, price, settled.pnl, value, cash)
            .clone();

        info!(
            symbol = %symbol,
            direction = %direction,
            entry = %settled.position.entry_price,
            exit = %price,
            pnl = %settled.pnl,
            cash = %cash,
            "Position closed"
        );

        ExecutionOutcome::Closed(record)
    }

    fn reject(&self, symbol: &str, rejection: Rejection) -> ExecutionOutcome {
        debug!(symbol = %symbol, reason = %rejection, "Trade rejected");
        ExecutionOutcome::Rejected(rejection)
    }
}
