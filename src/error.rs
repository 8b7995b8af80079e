//! Engine error taxonomy.
//!
//! Only `Configuration` ever reaches the caller as a terminal failure of a
//! creation attempt. Every other variant is recovered locally by the cycle
//! that produced it.

use thiserror::Error;

/// Errors raised inside the trading engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Insufficient history or a failed price lookup. The symbol is skipped
    /// for the current cycle.
    #[error("market data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    /// The advisory service failed or produced nothing usable.
    #[error("advisor unavailable: {0}")]
    AdvisorUnavailable(String),

    /// The advisory service did not answer within its time budget.
    #[error("advisor timed out")]
    AdvisorTimeout,

    /// The creation request could not be turned into a valid instance config.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A stop request was observed at a suspension point.
    #[error("cancelled")]
    Cancelled,

    /// Anything else that went wrong inside one cycle.
    #[error("cycle failed: {0}")]
    Cycle(String),
}

impl EngineError {
    pub fn data_unavailable(symbol: &str, reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
