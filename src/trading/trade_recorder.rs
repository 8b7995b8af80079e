//! Append-only trade history for one instance.

use chrono::Utc;
use rust_decimal::Decimal;

use crate::metrics::MetricsCalculator;
use crate::models::{PortfolioSnapshot, Position, TradeAction, TradeRecord, TradeStatistics};

/// Append-only trade history. Records are never amended or removed.
#[derive(Debug, Default)]
pub struct TradeRecorder {
    records: Vec<TradeRecord>,
}

impl TradeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an `opened` row for a freshly booked position.
    pub fn record_open(
        &mut self,
        position: &Position,
        portfolio_value_after: Decimal,
        cash_after: Decimal,
    ) -> &TradeRecord {
        self.push(TradeRecord {
            timestamp: position.entry_time,
            symbol: position.symbol.clone(),
            action: TradeAction::Opened,
            direction: position.direction,
            price: position.entry_price,
            quantity: position.quantity,
            notional: position.notional,
            pnl: None,
            portfolio_value_after,
            cash_after,
            holding_secs: None,
        })
    }

    /// Append a `closed` row for a position settled at `exit_price`.
    pub fn record_close(
        &mut self,
        position: &Position,
        exit_price: Decimal,
        pnl: Decimal,
        portfolio_value_after: Decimal,
        cash_after: Decimal,
    ) -> &TradeRecord {
        let now = Utc::now();
        let holding = now.signed_duration_since(position.entry_time).num_seconds().max(0);

        self.push(TradeRecord {
            timestamp: now,
            symbol: position.symbol.clone(),
            action: TradeAction::Closed,
            direction: position.direction,
            price: exit_price,
            quantity: position.quantity,
            notional: exit_price * position.quantity,
            pnl: Some(pnl),
            portfolio_value_after,
            cash_after,
            holding_secs: Some(holding),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Derived statistics over the history and the given snapshot series.
    pub fn statistics(&self, snapshots: &[PortfolioSnapshot]) -> TradeStatistics {
        MetricsCalculator::calculate(&self.records, snapshots)
    }

    fn push(&mut self, record: TradeRecord) -> &TradeRecord {
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }
}
