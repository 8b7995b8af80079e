//! Trading instance: one configured, independently cancellable trading loop.
//!
//! Each cycle:
//! - Analyzes every configured symbol, skipping those without data
//! - Obtains a portfolio decision (AI-advised or rule-based)
//! - Executes the approved trades one by one
//! - Snapshots positions and portfolio value
//! - Publishes progress to the session
//!
//! The loop owns its executor exclusively. The only state shared with the
//! outside is the published [`InstanceSummary`] and the cancellation token.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analysis::{generate_signal, AiSignalAdviser, MarketDataProvider};
use crate::error::{EngineError, EngineResult};
use crate::models::{AssetAnalysis, PortfolioSnapshot, PositionSnapshot, TradeRecord, TradeStatistics};
use crate::session::{EventSender, Notification, ProgressUpdate, SessionEvent};
use crate::trading::{
    ExecutionOutcome, PortfolioDecisionManager, TradingExecutor, TradingInstanceConfig,
};

/// Lifecycle of an instance. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Created,
    Active,
    Stopped,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Created => "created",
            InstanceStatus::Active => "active",
            InstanceStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published view of an instance, refreshed after every cycle.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub id: Uuid,
    pub model: String,
    pub status: InstanceStatus,
    pub symbols: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub initial_capital: Decimal,
    pub total_value: Decimal,
    pub available_cash: Decimal,
    pub cash_in_trades: Decimal,
    /// Open positions as of the last snapshot
    pub positions: Vec<PositionSnapshot>,
    pub statistics: TradeStatistics,
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Portfolio snapshot series, for charts
    #[serde(skip)]
    pub value_history: Vec<PortfolioSnapshot>,
}

impl InstanceSummary {
    fn new(id: Uuid, config: &TradingInstanceConfig) -> Self {
        Self {
            id,
            model: config.model.clone(),
            status: InstanceStatus::Created,
            symbols: config.symbols.clone(),
            created_at: Utc::now(),
            initial_capital: config.initial_capital,
            total_value: config.initial_capital,
            available_cash: config.initial_capital,
            cash_in_trades: Decimal::ZERO,
            positions: Vec::new(),
            statistics: TradeStatistics::default(),
            cycles: 0,
            last_cycle_at: None,
            value_history: Vec::new(),
        }
    }

    pub fn return_pct(&self) -> Decimal {
        if self.initial_capital.is_zero() {
            return Decimal::ZERO;
        }
        (self.total_value - self.initial_capital) / self.initial_capital * Decimal::ONE_HUNDRED
    }
}

impl fmt::Display for InstanceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}] {} ({})", self.model, self.id, self.status)?;
        writeln!(f, "Symbols:     {}", self.symbols.join(", "))?;
        writeln!(f, "Cycles:      {}", self.cycles)?;
        writeln!(
            f,
            "Value:       ${:.2} ({:.2}% from ${:.2})",
            self.total_value,
            self.return_pct(),
            self.initial_capital
        )?;
        writeln!(
            f,
            "Cash:        ${:.2} available, ${:.2} in trades",
            self.available_cash, self.cash_in_trades
        )?;
        for p in &self.positions {
            writeln!(
                f,
                "  {:<8} {} {} @ {} (pnl ${:.2})",
                p.symbol, p.direction, p.quantity, p.entry_price, p.unrealized_pnl
            )?;
        }
        write!(f, "{}", self.statistics)
    }
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The instance was already stopped; nothing changed
    AlreadyStopped,
}

/// What one cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub analyzed: usize,
    pub skipped: Vec<String>,
    pub executed: usize,
    pub rejected: usize,
    pub total_value: Decimal,
}

/// Handle to a spawned instance, held by the session registry.
pub struct InstanceHandle {
    id: Uuid,
    model: String,
    summary: Arc<RwLock<InstanceSummary>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InstanceHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn status(&self) -> InstanceStatus {
        self.summary.read().await.status
    }

    pub async fn summary(&self) -> InstanceSummary {
        self.summary.read().await.clone()
    }

    /// Request a stop and wait for the loop to exit. A cycle in progress
    /// finishes its trades first. Stopping a stopped instance is a no-op.
    pub async fn stop(&self) -> StopOutcome {
        let mut task = self.task.lock().await;

        if self.status().await == InstanceStatus::Stopped {
            return StopOutcome::AlreadyStopped;
        }

        self.cancel.cancel();
        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                warn!(instance = %self.id, error = %e, "Instance supervisor failed");
            }
        }

        self.summary.write().await.status = InstanceStatus::Stopped;
        StopOutcome::Stopped
    }
}

/// One trading loop and everything it owns.
pub struct TradingInstance {
    id: Uuid,
    config: TradingInstanceConfig,
    executor: TradingExecutor,
    decisions: PortfolioDecisionManager,
    market: MarketDataProvider,
    adviser: Option<AiSignalAdviser>,
    cancel: CancellationToken,
    summary: Arc<RwLock<InstanceSummary>>,
    events: EventSender,
    cycle: u64,
}

impl TradingInstance {
    /// Wire an instance for a validated config. `adviser` enables per-symbol
    /// AI opinions and AI-advised portfolio decisions.
    pub fn new(
        config: TradingInstanceConfig,
        market: MarketDataProvider,
        adviser: Option<AiSignalAdviser>,
        events: EventSender,
    ) -> Self {
        let id = Uuid::new_v4();
        let executor = TradingExecutor::new(&config);
        let decisions =
            PortfolioDecisionManager::new(config.max_positions, config.risk_per_trade, adviser.clone());
        let summary = Arc::new(RwLock::new(InstanceSummary::new(id, &config)));

        Self {
            id,
            config,
            executor,
            decisions,
            market,
            adviser,
            cancel: CancellationToken::new(),
            summary,
            events,
            cycle: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Start the loop on the runtime. Any error escaping the loop (a panic)
    /// stops the instance and is reported as a terminal failure.
    pub fn spawn(self) -> InstanceHandle {
        let id = self.id;
        let model = self.config.model.clone();
        let summary = self.summary.clone();
        let cancel = self.cancel.clone();
        let events = self.events.clone();

        let supervised = summary.clone();
        let task = tokio::spawn({
            let model = model.clone();
            async move {
                let outcome = tokio::spawn(self.run()).await;

                supervised.write().await.status = InstanceStatus::Stopped;

                if let Err(e) = outcome {
                    let message = if e.is_panic() {
                        "trading loop panicked".to_string()
                    } else {
                        e.to_string()
                    };
                    error!(instance = %id, model = %model, error = %message, "Trading instance failed");
                    let _ = events.send(SessionEvent::Failure {
                        instance_id: Some(id),
                        message: format!("{model}: {message}"),
                    });
                }
            }
        });

        InstanceHandle {
            id,
            model,
            summary,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Run cycles until cancelled. Cycle errors are reported and retried
    /// next interval.
    async fn run(mut self) {
        self.summary.write().await.status = InstanceStatus::Active;
        info!(
            instance = %self.id,
            model = %self.config.model,
            symbols = ?self.config.symbols,
            capital = %self.config.initial_capital,
            interval_secs = self.config.check_interval.as_secs(),
            ai = self.decisions.has_adviser(),
            "Trading instance started"
        );

        loop {
            match self.run_cycle().await {
                Ok(report) => debug!(
                    instance = %self.id,
                    cycle = report.cycle,
                    analyzed = report.analyzed,
                    executed = report.executed,
                    rejected = report.rejected,
                    value = %report.total_value,
                    "Cycle complete"
                ),
                Err(EngineError::Cancelled) => break,
                Err(e) => {
                    warn!(instance = %self.id, error = %e, "Cycle failed, retrying next interval");
                    self.emit(SessionEvent::Warning {
                        instance_id: Some(self.id),
                        message: format!("{}: {e}", self.config.model),
                    });
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.check_interval) => {}
            }
        }

        info!(instance = %self.id, cycles = self.cycle, "Trading instance stopped");
    }

    /// One analyze, decide, execute, snapshot, publish iteration.
    async fn run_cycle(&mut self) -> EngineResult<CycleReport> {
        self.cycle += 1;
        let cycle = self.cycle;
        debug!(instance = %self.id, cycle, "Cycle started");

        // Analyze
        let results = join_all(self.config.symbols.iter().map(|s| self.analyze_symbol(s))).await;

        let mut analyses = Vec::with_capacity(results.len());
        let mut skipped = Vec::new();
        for (symbol, result) in self.config.symbols.iter().zip(results) {
            match result {
                Ok(Some(analysis)) => analyses.push(analysis),
                Ok(None) => skipped.push(symbol.clone()),
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    warn!(instance = %self.id, symbol = %symbol, error = %e, "Skipping symbol this cycle");
                    skipped.push(symbol.clone());
                }
            }
        }

        for analysis in &analyses {
            self.executor
                .positions_mut()
                .mark_price(&analysis.symbol, analysis.price);
        }

        // Decide
        let decision = self
            .decisions
            .decide(&analyses, self.executor.positions(), &self.cancel)
            .await;
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        for warning in &decision.warnings {
            self.emit(SessionEvent::Warning {
                instance_id: Some(self.id),
                message: format!("{}: {warning}", self.config.model),
            });
        }

        // Execute
        let mut executed = 0;
        let mut rejected = 0;
        for trade in &decision.trades {
            let Some(analysis) = analyses.iter().find(|a| a.symbol == trade.symbol) else {
                continue;
            };

            match self.executor.execute_trade(
                &trade.symbol,
                trade.action,
                trade.direction,
                &analysis.indicators,
            ) {
                ExecutionOutcome::Opened(record) | ExecutionOutcome::Closed(record) => {
                    executed += 1;
                    self.publish_trade(record);
                }
                ExecutionOutcome::Rejected(reason) => {
                    rejected += 1;
                    debug!(instance = %self.id, trade = %trade, reason = %reason, "Planned trade not executed");
                }
            }
        }

        if !self.executor.positions().ledger().is_balanced() {
            return Err(EngineError::Cycle("cash ledger out of balance".into()));
        }

        // Snapshot
        let snapshot = self
            .executor
            .positions_mut()
            .record_snapshots(&self.market, &self.cancel)
            .await;

        self.publish_summary(&snapshot).await;

        let report = CycleReport {
            cycle,
            analyzed: analyses.len(),
            skipped,
            executed,
            rejected,
            total_value: snapshot.total_value,
        };

        self.emit(SessionEvent::Progress(ProgressUpdate {
            instance_id: self.id,
            model: self.config.model.clone(),
            cycle,
            total_value: snapshot.total_value,
            available_cash: snapshot.available_cash,
            open_positions: snapshot.open_positions,
            trades_executed: executed,
            trades_rejected: rejected,
            skipped: report.skipped.clone(),
            strategy: decision.strategy,
            reasoning: decision.reasoning,
        }));

        Ok(report)
    }

    /// Indicators, technical signal and (optionally) an AI opinion for one
    /// symbol. `Ok(None)` when there is not enough history.
    async fn analyze_symbol(&self, symbol: &str) -> EngineResult<Option<AssetAnalysis>> {
        let Some(indicators) = self.market.calculate_indicators(symbol, &self.cancel).await? else {
            return Ok(None);
        };

        let technical = generate_signal(&indicators);

        let ai = match &self.adviser {
            Some(adviser) => adviser
                .signal_opinion(symbol, &indicators, technical, &self.cancel)
                .await
                .into_option(),
            None => None,
        };
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        debug!(
            instance = %self.id,
            symbol = %symbol,
            price = %indicators.price,
            technical = %technical,
            ai = ai.is_some(),
            "Symbol analyzed"
        );

        Ok(Some(AssetAnalysis {
            symbol: symbol.to_string(),
            price: indicators.price,
            indicators,
            technical,
            ai,
        }))
    }

    fn publish_trade(&self, record: TradeRecord) {
        let model = &self.config.model;
        let (title, body) = match record.pnl {
            Some(pnl) => (
                "Position closed",
                format!(
                    "{} {} {} @ {} (pnl ${:.2})",
                    record.symbol, record.direction, record.quantity, record.price, pnl
                ),
            ),
            None => (
                "Position opened",
                format!(
                    "{} {} {} @ {} (${:.2})",
                    record.symbol, record.direction, record.quantity, record.price, record.notional
                ),
            ),
        };

        self.emit(SessionEvent::Notification(Notification::new(title, body, model)));
        self.emit(SessionEvent::Trade {
            instance_id: self.id,
            model: model.clone(),
            record,
        });
    }

    async fn publish_summary(&self, snapshot: &PortfolioSnapshot) {
        let positions = self.executor.positions();
        let statistics = self
            .executor
            .recorder()
            .statistics(positions.portfolio_snapshots());
        let rows: Vec<PositionSnapshot> = positions
            .position_snapshots()
            .iter()
            .rev()
            .take_while(|row| row.timestamp == snapshot.timestamp)
            .cloned()
            .collect();

        let mut summary = self.summary.write().await;
        summary.total_value = snapshot.total_value;
        summary.available_cash = positions.available_cash();
        summary.cash_in_trades = positions.cash_in_trades();
        summary.positions = rows.into_iter().rev().collect();
        summary.statistics = statistics;
        summary.cycles = self.cycle;
        summary.last_cycle_at = Some(snapshot.timestamp);
        summary.value_history.push(snapshot.clone());
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!(instance = %self.id, "Event receiver dropped");
        }
    }
}
