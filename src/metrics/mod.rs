//! Performance metrics over an instance's trades and snapshots.

mod calculator;

pub use calculator::MetricsCalculator;
