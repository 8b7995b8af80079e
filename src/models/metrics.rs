//! Derived trade statistics for one instance.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Aggregates over an instance's trade history and snapshot series.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeStatistics {
    // === Counts ===
    /// Number of opened records
    pub opened_trades: u32,

    /// Number of closed (round-trip) trades
    pub total_trades: u32,

    pub winning_trades: u32,

    pub losing_trades: u32,

    /// winning / closed (0.0 to 1.0)
    pub win_rate: f64,

    // === P&L ===
    /// Sum of realized P&L
    pub total_pnl: Decimal,

    /// Average profit on winning trades
    pub avg_win: Decimal,

    /// Average loss on losing trades (absolute value)
    pub avg_loss: Decimal,

    pub largest_win: Decimal,

    /// Most negative realized P&L (zero when there are no losses)
    pub largest_loss: Decimal,

    /// sum(wins) / |sum(losses)|; 1.0 with wins and no losses; else 0
    pub profit_factor: f64,

    /// Mean realized P&L per closed trade
    pub expectancy: Decimal,

    // === Breakdowns ===
    pub per_symbol: BTreeMap<String, SymbolStats>,

    /// Realized P&L bucketed by UTC close date
    pub daily_pnl: BTreeMap<NaiveDate, Decimal>,

    pub holding: HoldingTimeStats,

    // === Risk (from portfolio snapshots) ===
    /// Maximum peak-to-trough decline of total value (0.0 to 1.0)
    pub max_drawdown: f64,

    /// Annualized Sharpe ratio of snapshot-to-snapshot returns
    pub sharpe_ratio: f64,
}

/// Per-symbol closed-trade summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolStats {
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: Decimal,
}

impl SymbolStats {
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            return 0.0;
        }
        self.wins as f64 / self.trades as f64
    }
}

/// Holding durations of paired open/close records, in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoldingTimeStats {
    pub count: u32,
    pub avg_secs: f64,
    pub min_secs: i64,
    pub max_secs: i64,
}

impl std::fmt::Display for TradeStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "--- Trades ---")?;
        writeln!(f, "Opened:      {}", self.opened_trades)?;
        writeln!(f, "Closed:      {}", self.total_trades)?;
        writeln!(f, "Winners:     {} ({:.1}%)", self.winning_trades, self.win_rate * 100.0)?;
        writeln!(f, "Losers:      {}", self.losing_trades)?;
        writeln!(f, "Total P&L:   ${:.2}", self.total_pnl)?;
        writeln!(f, "Avg Win:     ${:.2}", self.avg_win)?;
        writeln!(f, "Avg Loss:    ${:.2}", self.avg_loss)?;
        writeln!(f, "Profit Factor: {:.2}", self.profit_factor)?;
        writeln!(f, "Expectancy:  ${:.2}", self.expectancy)?;
        if self.holding.count > 0 {
            writeln!(f, "Avg Hold:    {:.1} minutes", self.holding.avg_secs / 60.0)?;
        }
        for (symbol, stats) in &self.per_symbol {
            writeln!(
                f,
                "  {:<8} {} trades, {:.1}% wins, ${:.2}",
                symbol,
                stats.trades,
                stats.win_rate() * 100.0,
                stats.total_pnl
            )?;
        }
        writeln!(f, "--- Risk ---")?;
        writeln!(f, "Max Drawdown: {:.2}%", self.max_drawdown * 100.0)?;
        write!(f, "Sharpe Ratio: {:.2}", self.sharpe_ratio)
    }
}
