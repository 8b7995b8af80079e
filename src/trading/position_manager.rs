//! Cash ledger and open positions for one instance.
//!
//! Single-writer: the owning instance loop holds the only `&mut`, so every
//! mutation below is atomic with respect to snapshots and status reads.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::analysis::MarketDataProvider;
use crate::error::EngineError;
use crate::models::{PortfolioSnapshot, Position, PositionSnapshot};

/// Cash split between idle and committed funds.
///
/// `available_cash + cash_in_trades == total_cash` holds after every
/// operation; mutations check their preconditions before touching state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CashLedger {
    pub total_cash: Decimal,
    pub available_cash: Decimal,
    pub cash_in_trades: Decimal,
}

impl CashLedger {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            total_cash: initial_capital,
            available_cash: initial_capital,
            cash_in_trades: Decimal::ZERO,
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.available_cash + self.cash_in_trades == self.total_cash
    }
}

/// Valuation of one held symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionValuation {
    /// `None` when no price was available and the value fell back to notional
    pub price: Option<Decimal>,
    pub value: Decimal,
    pub pnl: Decimal,
}

/// Portfolio valuation at one moment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioValuation {
    /// Available cash plus position values
    pub total_value: Decimal,
    pub positions_value: Decimal,
    /// Total unrealized P&L
    pub total_pnl: Decimal,
    pub available_cash: Decimal,
    pub per_symbol: BTreeMap<String, PositionValuation>,
}

/// A position removed from the book with its realized P&L.
#[derive(Debug, Clone)]
pub struct SettledPosition {
    pub position: Position,
    pub exit_price: Decimal,
    pub pnl: Decimal,
}

/// Cash ledger plus open positions, valuation marks and snapshot series.
#[derive(Debug)]
pub struct PositionManager {
    ledger: CashLedger,
    positions: BTreeMap<String, Position>,
    marks: HashMap<String, Decimal>,
    position_snapshots: Vec<PositionSnapshot>,
    portfolio_snapshots: Vec<PortfolioSnapshot>,
}

impl PositionManager {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            ledger: CashLedger::new(initial_capital),
            positions: BTreeMap::new(),
            marks: HashMap::new(),
            position_snapshots: Vec::new(),
            portfolio_snapshots: Vec::new(),
        }
    }

    // ==================== Ledger ====================

    pub fn ledger(&self) -> CashLedger {
        self.ledger
    }

    pub fn total_cash(&self) -> Decimal {
        self.ledger.total_cash
    }

    pub fn available_cash(&self) -> Decimal {
        self.ledger.available_cash
    }

    pub fn cash_in_trades(&self) -> Decimal {
        self.ledger.cash_in_trades
    }

    /// Move `amount` from available to in-trades. Fails without side effects
    /// when `amount` is negative or exceeds available cash.
    pub fn allocate_cash(&mut self, amount: Decimal) -> bool {
        if amount < Decimal::ZERO || amount > self.ledger.available_cash {
            debug!(
                amount = %amount,
                available = %self.ledger.available_cash,
                "Cash allocation refused"
            );
            return false;
        }

        self.ledger.available_cash -= amount;
        self.ledger.cash_in_trades += amount;
        debug_assert!(self.ledger.is_balanced());
        true
    }

    /// Return `notional` from in-trades to available and credit `pnl` to
    /// total cash. Fails without side effects when `notional` is negative or
    /// exceeds cash in trades.
    pub fn release_cash(&mut self, notional: Decimal, pnl: Decimal) -> bool {
        if notional < Decimal::ZERO || notional > self.ledger.cash_in_trades {
            warn!(
                notional = %notional,
                in_trades = %self.ledger.cash_in_trades,
                "Cash release refused"
            );
            return false;
        }

        self.ledger.cash_in_trades -= notional;
        self.ledger.available_cash += notional + pnl;
        self.ledger.total_cash += pnl;
        debug_assert!(self.ledger.is_balanced());
        true
    }

    // ==================== Positions ====================

    pub fn get_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    /// Book a new position and commit its notional. Fails without side
    /// effects when the symbol is already held or cash is insufficient.
    pub fn open_position(&mut self, position: Position) -> bool {
        if self.positions.contains_key(&position.symbol) {
            debug!(symbol = %position.symbol, "Position already open");
            return false;
        }
        if !self.allocate_cash(position.notional) {
            return false;
        }

        self.marks.insert(position.symbol.clone(), position.entry_price);
        self.positions.insert(position.symbol.clone(), position);
        true
    }

    /// Remove a position from the book without touching cash.
    pub fn close_position(&mut self, symbol: &str) -> Option<Position> {
        self.positions.remove(symbol)
    }

    /// Close `symbol` at `exit_price` as one ledger transaction: remove the
    /// position, release its notional and credit realized P&L.
    pub fn settle_position(&mut self, symbol: &str, exit_price: Decimal) -> Option<SettledPosition> {
        let position = self.positions.get(symbol)?;
        let pnl = Self::calculate_position_pnl(position, exit_price);

        if !self.release_cash(position.notional, pnl) {
            return None;
        }

        let position = self.positions.remove(symbol)?;
        self.marks.insert(symbol.to_string(), exit_price);

        Some(SettledPosition {
            position,
            exit_price,
            pnl,
        })
    }

    /// LONG: `(current - entry) * |qty|`; SHORT: `(entry - current) * |qty|`.
    pub fn calculate_position_pnl(position: &Position, current_price: Decimal) -> Decimal {
        position.pnl_at(current_price)
    }

    // ==================== Valuation ====================

    /// Remember the latest price seen for `symbol`.
    pub fn mark_price(&mut self, symbol: &str, price: Decimal) {
        self.marks.insert(symbol.to_string(), price);
    }

    pub fn mark(&self, symbol: &str) -> Option<Decimal> {
        self.marks.get(symbol).copied()
    }

    /// Value the book at the given prices. A symbol without a price is
    /// valued at its notional with zero P&L.
    pub fn valuation_at(&self, prices: &HashMap<String, Decimal>) -> PortfolioValuation {
        let mut per_symbol = BTreeMap::new();
        let mut positions_value = Decimal::ZERO;
        let mut total_pnl = Decimal::ZERO;

        for (symbol, position) in &self.positions {
            let valuation = match prices.get(symbol) {
                Some(&price) => PositionValuation {
                    price: Some(price),
                    value: position.value_at(price),
                    pnl: position.pnl_at(price),
                },
                None => PositionValuation {
                    price: None,
                    value: position.notional,
                    pnl: Decimal::ZERO,
                },
            };

            positions_value += valuation.value;
            total_pnl += valuation.pnl;
            per_symbol.insert(symbol.clone(), valuation);
        }

        PortfolioValuation {
            total_value: self.ledger.available_cash + positions_value,
            positions_value,
            total_pnl,
            available_cash: self.ledger.available_cash,
            per_symbol,
        }
    }

    /// Value the book at the last marked prices.
    pub fn valuation_at_marks(&self) -> PortfolioValuation {
        self.valuation_at(&self.marks)
    }

    /// Value the book at fresh prices from the market.
    ///
    /// A failed lookup degrades that symbol to notional-only valuation and
    /// is logged; it never aborts the whole computation.
    pub async fn calculate_portfolio_value(
        &mut self,
        market: &MarketDataProvider,
        cancel: &CancellationToken,
    ) -> PortfolioValuation {
        let symbols: Vec<String> = self.positions.keys().cloned().collect();
        let mut prices = HashMap::with_capacity(symbols.len());

        for symbol in symbols {
            match market.current_price(&symbol, cancel).await {
                Ok(price) => {
                    self.marks.insert(symbol.clone(), price);
                    prices.insert(symbol, price);
                }
                Err(EngineError::Cancelled) => {
                    debug!(symbol = %symbol, "Valuation interrupted, using notional");
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Valuing position at notional");
                }
            }
        }

        self.valuation_at(&prices)
    }

    // ==================== Snapshots ====================

    /// Value the book at fresh prices and append one row per position plus a
    /// portfolio row, with the same degrade-per-symbol policy.
    pub async fn record_snapshots(
        &mut self,
        market: &MarketDataProvider,
        cancel: &CancellationToken,
    ) -> PortfolioSnapshot {
        let valuation = self.calculate_portfolio_value(market, cancel).await;
        self.record_snapshots_at(&valuation)
    }

    /// Append snapshot rows for an already computed valuation.
    pub fn record_snapshots_at(&mut self, valuation: &PortfolioValuation) -> PortfolioSnapshot {
        let timestamp = Utc::now();

        for (symbol, position) in &self.positions {
            let Some(v) = valuation.per_symbol.get(symbol) else {
                continue;
            };
            self.position_snapshots.push(PositionSnapshot {
                timestamp,
                symbol: symbol.clone(),
                direction: position.direction,
                quantity: position.quantity,
                entry_price: position.entry_price,
                current_price: v.price,
                value: v.value,
                unrealized_pnl: v.pnl,
            });
        }

        let snapshot = PortfolioSnapshot {
            timestamp,
            total_value: valuation.total_value,
            available_cash: valuation.available_cash,
            positions_value: valuation.positions_value,
            unrealized_pnl: valuation.total_pnl,
            open_positions: self.positions.len(),
        };
        self.portfolio_snapshots.push(snapshot.clone());
        snapshot
    }

    pub fn position_snapshots(&self) -> &[PositionSnapshot] {
        &self.position_snapshots
    }

    pub fn portfolio_snapshots(&self) -> &[PortfolioSnapshot] {
        &self.portfolio_snapshots
    }
}
