//! Data models for positions, trades, snapshots, market data, signals and
//! statistics.

mod market;
mod metrics;
mod position;
mod signal;
mod snapshot;
mod trade;

pub use market::{Candle, Granularity, IndicatorSnapshot};
pub use metrics::{HoldingTimeStats, SymbolStats, TradeStatistics};
pub use position::{Direction, Position};
pub use signal::{Action, AiOpinion, AssetAnalysis, Signal, TradeSignal};
pub use snapshot::{PortfolioSnapshot, PositionSnapshot};
pub use trade::{TradeAction, TradeRecord};
