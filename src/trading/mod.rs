//! Trading logic: cash ledger, trade history, execution and portfolio decisions.

mod config;
mod decision;
mod executor;
mod position_manager;
mod trade_recorder;

pub use config::{EngineSettings, TradingInstanceConfig, DEFAULT_MODEL};
pub use decision::{
    risk_score, DecisionStrategy, PlannedTrade, PortfolioDecision, PortfolioDecisionManager,
    PortfolioMetrics, RiskLevel, MAX_TRADES_PER_CYCLE, MIN_CASH_RESERVE,
};
pub use executor::{ExecutionOutcome, Rejection, TradingExecutor};
pub use position_manager::{
    CashLedger, PortfolioValuation, PositionManager, PositionValuation, SettledPosition,
};
pub use trade_recorder::TradeRecorder;
