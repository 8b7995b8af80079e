//! Calculator for instance trade statistics: win rate, profit factor,
//! holding times, drawdown and Sharpe ratio.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::models::{
    HoldingTimeStats, PortfolioSnapshot, SymbolStats, TradeAction, TradeRecord, TradeStatistics,
};

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// Computes [`TradeStatistics`]. Every aggregation tolerates empty input and
/// unmatched opens.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Calculate statistics from trade history and the portfolio snapshot series.
    pub fn calculate(records: &[TradeRecord], snapshots: &[PortfolioSnapshot]) -> TradeStatistics {
        let mut stats = TradeStatistics {
            opened_trades: records
                .iter()
                .filter(|r| r.action == TradeAction::Opened)
                .count() as u32,
            ..TradeStatistics::default()
        };

        let pnls: Vec<Decimal> = records.iter().filter_map(|r| r.pnl).collect();
        Self::calculate_pnl_metrics(&mut stats, &pnls);

        stats.per_symbol = Self::per_symbol(records);
        stats.daily_pnl = Self::daily_pnl(records);
        stats.holding = Self::holding_times(records);

        Self::calculate_drawdown(&mut stats, snapshots);
        Self::calculate_sharpe(&mut stats, snapshots);

        stats
    }

    /// Win/loss counts, averages, extremes and profit factor.
    fn calculate_pnl_metrics(stats: &mut TradeStatistics, pnls: &[Decimal]) {
        if pnls.is_empty() {
            return;
        }

        let wins: Vec<Decimal> = pnls.iter().copied().filter(|p| *p > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = pnls.iter().copied().filter(|p| *p < Decimal::ZERO).collect();

        stats.total_trades = pnls.len() as u32;
        stats.winning_trades = wins.len() as u32;
        stats.losing_trades = losses.len() as u32;
        stats.total_pnl = pnls.iter().copied().sum();
        stats.win_rate = wins.len() as f64 / pnls.len() as f64;
        stats.expectancy = stats.total_pnl / Decimal::from(pnls.len() as u32);

        let gross_profit: Decimal = wins.iter().copied().sum();
        let gross_loss: Decimal = losses.iter().map(|l| l.abs()).sum();

        if !wins.is_empty() {
            stats.avg_win = gross_profit / Decimal::from(wins.len() as u32);
            stats.largest_win = wins.iter().copied().max().unwrap_or(Decimal::ZERO);
        }
        if !losses.is_empty() {
            stats.avg_loss = gross_loss / Decimal::from(losses.len() as u32);
            stats.largest_loss = losses.iter().copied().min().unwrap_or(Decimal::ZERO);
        }

        stats.profit_factor = Self::profit_factor(gross_profit, gross_loss, !wins.is_empty());
    }

    /// `sum(wins) / |sum(losses)|`, 1.0 when there are wins but no losses,
    /// otherwise 0.
    pub fn profit_factor(gross_profit: Decimal, gross_loss: Decimal, has_wins: bool) -> f64 {
        if gross_loss > Decimal::ZERO {
            return (gross_profit / gross_loss).to_f64().unwrap_or(0.0);
        }
        if has_wins {
            1.0
        } else {
            0.0
        }
    }

    fn per_symbol(records: &[TradeRecord]) -> BTreeMap<String, SymbolStats> {
        let mut out: BTreeMap<String, SymbolStats> = BTreeMap::new();

        for record in records {
            let Some(pnl) = record.pnl else { continue };
            let entry = out.entry(record.symbol.clone()).or_default();
            entry.trades += 1;
            entry.total_pnl += pnl;
            if pnl > Decimal::ZERO {
                entry.wins += 1;
            } else if pnl < Decimal::ZERO {
                entry.losses += 1;
            }
        }

        out
    }

    fn daily_pnl(records: &[TradeRecord]) -> BTreeMap<chrono::NaiveDate, Decimal> {
        let mut out = BTreeMap::new();
        for record in records {
            if let Some(pnl) = record.pnl {
                *out.entry(record.timestamp.date_naive()).or_insert(Decimal::ZERO) += pnl;
            }
        }
        out
    }

    /// Pair opened/closed records per symbol in chronological order.
    /// Closes without a preceding open are ignored; trailing opens are
    /// still-held positions.
    fn holding_times(records: &[TradeRecord]) -> HoldingTimeStats {
        let mut ordered: Vec<&TradeRecord> = records.iter().collect();
        ordered.sort_by_key(|r| r.timestamp);

        let mut open_times: HashMap<&str, VecDeque<DateTime<Utc>>> = HashMap::new();
        let mut durations: Vec<i64> = Vec::new();

        for record in ordered {
            match record.action {
                TradeAction::Opened => {
                    open_times
                        .entry(record.symbol.as_str())
                        .or_default()
                        .push_back(record.timestamp);
                }
                TradeAction::Closed => {
                    let opened = open_times
                        .get_mut(record.symbol.as_str())
                        .and_then(|q| q.pop_front());
                    if let Some(opened) = opened {
                        durations.push((record.timestamp - opened).num_seconds().max(0));
                    }
                }
            }
        }

        if durations.is_empty() {
            return HoldingTimeStats::default();
        }

        HoldingTimeStats {
            count: durations.len() as u32,
            avg_secs: durations.iter().sum::<i64>() as f64 / durations.len() as f64,
            min_secs: durations.iter().copied().min().unwrap_or(0),
            max_secs: durations.iter().copied().max().unwrap_or(0),
        }
    }

    /// Maximum drawdown over the total-value series.
    fn calculate_drawdown(stats: &mut TradeStatistics, snapshots: &[PortfolioSnapshot]) {
        let mut peak = Decimal::ZERO;
        let mut max_dd = 0.0f64;

        for snapshot in snapshots {
            let equity = snapshot.total_value;
            if equity > peak {
                peak = equity;
            }
            if peak > Decimal::ZERO {
                let dd = ((peak - equity) / peak).to_f64().unwrap_or(0.0);
                if dd > max_dd {
                    max_dd = dd;
                }
            }
        }

        stats.max_drawdown = max_dd;
    }

    /// Sharpe ratio (0% risk-free) of snapshot returns, annualized by the
    /// mean snapshot spacing.
    fn calculate_sharpe(stats: &mut TradeStatistics, snapshots: &[PortfolioSnapshot]) {
        if snapshots.len() < 3 {
            return;
        }

        let returns: Vec<f64> = snapshots
            .windows(2)
            .filter_map(|w| {
                let prev = w[0].total_value.to_f64()?;
                let next = w[1].total_value.to_f64()?;
                (prev > 0.0).then(|| next / prev - 1.0)
            })
            .collect();

        if returns.len() < 2 {
            return;
        }

        let mean = returns.iter().mean();
        let std_dev = returns.iter().std_dev();
        if !(std_dev > 0.0) {
            return;
        }

        let (first, last) = (&snapshots[0], &snapshots[snapshots.len() - 1]);
        let span_secs = (last.timestamp - first.timestamp).num_seconds() as f64;
        let spacing = span_secs / (snapshots.len() - 1) as f64;
        let periods_per_year = if spacing > 0.0 { SECONDS_PER_YEAR / spacing } else { 1.0 };

        stats.sharpe_ratio = mean / std_dev * periods_per_year.sqrt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn record(symbol: &str, action: TradeAction, pnl: Option<Decimal>, hours: i64) -> TradeRecord {
        TradeRecord {
            timestamp: at(hours),
            symbol: symbol.to_string(),
            action,
            direction: Direction::Long,
            price: dec!(100),
            quantity: dec!(1),
            notional: dec!(100),
            pnl,
            portfolio_value_after: dec!(10000),
            cash_after: dec!(9900),
            holding_secs: None,
        }
    }

    fn snapshot(hours: i64, total: Decimal) -> PortfolioSnapshot {
        PortfolioSnapshot {
            timestamp: at(hours),
            total_value: total,
            available_cash: total,
            positions_value: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            open_positions: 0,
        }
    }

    #[test]
    fn test_empty_history() {
        let stats = MetricsCalculator::calculate(&[], &[]);
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.profit_factor, 0.0);
        assert_eq!(stats.holding, HoldingTimeStats::default());
        assert!(stats.daily_pnl.is_empty());
    }

    #[test]
    fn test_pnl_metrics() {
        let records = vec![
            record("BTC", TradeAction::Opened, None, 0),
            record("BTC", TradeAction::Closed, Some(dec!(100)), 2),
            record("ETH", TradeAction::Opened, None, 1),
            record("ETH", TradeAction::Closed, Some(dec!(-50)), 5),
            record("BTC", TradeAction::Opened, None, 6),
            record("BTC", TradeAction::Closed, Some(dec!(200)), 30),
        ];

        let stats = MetricsCalculator::calculate(&records, &[]);

        assert_eq!(stats.opened_trades, 3);
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.winning_trades, 2);
        assert_eq!(stats.losing_trades, 1);
        assert!((stats.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.total_pnl, dec!(250));
        assert_eq!(stats.avg_win, dec!(150));
        assert_eq!(stats.avg_loss, dec!(50));
        assert_eq!(stats.largest_win, dec!(200));
        assert_eq!(stats.largest_loss, dec!(-50));
        assert!((stats.profit_factor - 6.0).abs() < 1e-9);

        let btc = &stats.per_symbol["BTC"];
        assert_eq!(btc.trades, 2);
        assert_eq!(btc.total_pnl, dec!(300));
        assert_eq!(btc.win_rate(), 1.0);

        // Closes on Mar 1 (hours 2 and 5) and Mar 2 (hour 30)
        assert_eq!(stats.daily_pnl.len(), 2);
        assert_eq!(stats.daily_pnl.values().next(), Some(&dec!(50)));

        assert_eq!(stats.holding.count, 3);
        assert_eq!(stats.holding.min_secs, 2 * 3600);
        assert_eq!(stats.holding.max_secs, 24 * 3600);
    }

    #[test]
    fn test_profit_factor_edge_cases() {
        assert_eq!(MetricsCalculator::profit_factor(dec!(10), Decimal::ZERO, true), 1.0);
        assert_eq!(MetricsCalculator::profit_factor(Decimal::ZERO, Decimal::ZERO, false), 0.0);
        assert_eq!(MetricsCalculator::profit_factor(Decimal::ZERO, dec!(10), false), 0.0);
    }

    #[test]
    fn test_unmatched_records_are_tolerated() {
        let records = vec![
            record("SOL", TradeAction::Closed, Some(dec!(5)), 1),
            record("SOL", TradeAction::Opened, None, 2),
            record("ADA", TradeAction::Opened, None, 3),
        ];

        let stats = MetricsCalculator::calculate(&records, &[]);
        assert_eq!(stats.holding.count, 0);
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.opened_trades, 2);
    }

    #[test]
    fn test_drawdown_from_snapshots() {
        let snapshots = vec![
            snapshot(0, dec!(100)),
            snapshot(1, dec!(150)),
            snapshot(2, dec!(75)),
            snapshot(3, dec!(200)),
        ];

        let stats = MetricsCalculator::calculate(&[], &snapshots);
        assert!((stats.max_drawdown - 0.5).abs() < 1e-9);
        assert!(stats.sharpe_ratio.is_finite());
    }

    #[test]
    fn test_flat_snapshots_have_zero_sharpe() {
        let snapshots: Vec<_> = (0..5).map(|h| snapshot(h, dec!(1000))).collect();
        let stats = MetricsCalculator::calculate(&[], &snapshots);
        assert_eq!(stats.sharpe_ratio, 0.0);
        assert_eq!(stats.max_drawdown, 0.0);
    }
}
