//! Portfolio decision manager.
//!
//! Turns one cycle's per-symbol analyses plus the instance's portfolio
//! metrics into a bounded batch of trades. With an advisor configured the
//! batch is proposed by the AI and every proposal is validated against live
//! positions; otherwise, or whenever the advisor has no opinion, a
//! rule-based policy decides. Both paths go through the same validator, so
//! a batch never exceeds [`MAX_TRADES_PER_CYCLE`] trades.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::position_manager::PositionManager;
use crate::analysis::{Advice, AiSignalAdviser};
use crate::models::{Action, AssetAnalysis, Direction};

/// Trade budget per cycle, under either policy.
pub const MAX_TRADES_PER_CYCLE: usize = 3;

/// Minimum fraction of portfolio value kept as cash after new entries.
pub const MIN_CASH_RESERVE: f64 = 0.10;

const DECISION_SYSTEM_PROMPT: &str = r#"You are the portfolio manager of a simulated trading account.
Given per-asset analyses and the portfolio state, choose which trades to make this cycle.
Answer with ONLY a JSON object:
{"trades": [{"symbol": "BTC", "action": "BUY" | "SELL", "direction": "LONG" | "SHORT"}], "reasoning": "short explanation"}
An empty trades list means hold everything."#;

// ==================== Risk ====================

/// Coarse label of the composite risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 0.33 {
            RiskLevel::Low
        } else if score < 0.66 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `0.4 * max_concentration + 0.3 * (1 - cash_ratio) + 0.3 * (open / max)`,
/// clamped to `[0, 1]`.
pub fn risk_score(max_concentration: f64, cash_ratio: f64, open_positions: usize, max_positions: usize) -> f64 {
    let load = if max_positions == 0 {
        1.0
    } else {
        open_positions as f64 / max_positions as f64
    };
    (0.4 * max_concentration + 0.3 * (1.0 - cash_ratio) + 0.3 * load).clamp(0.0, 1.0)
}

/// Portfolio state the decision is made against.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioMetrics {
    pub total_value: Decimal,
    pub available_cash: Decimal,

    /// available_cash / total_value
    pub cash_ratio: f64,

    /// position_value / total_value per held symbol
    pub concentrations: BTreeMap<String, f64>,
    pub max_concentration: f64,

    pub open_positions: usize,
    pub max_positions: usize,

    /// Held direction per symbol
    pub held: BTreeMap<String, Direction>,
    pub position_values: BTreeMap<String, Decimal>,
    /// Unrealized P&L per symbol at the last marks
    pub position_pnl: BTreeMap<String, Decimal>,

    pub risk_score: f64,
    pub risk_level: RiskLevel,
}

impl PortfolioMetrics {
    /// Metrics at the position manager's last marked prices.
    pub fn from_positions(positions: &PositionManager, max_positions: usize) -> Self {
        let valuation = positions.valuation_at_marks();
        let total = valuation.total_value;
        let ratio = |part: Decimal| -> f64 {
            if total > Decimal::ZERO {
                (part / total).to_f64().unwrap_or(0.0)
            } else {
                0.0
            }
        };

        let mut concentrations = BTreeMap::new();
        let mut position_values = BTreeMap::new();
        let mut position_pnl = BTreeMap::new();
        for (symbol, v) in &valuation.per_symbol {
            concentrations.insert(symbol.clone(), ratio(v.value));
            position_values.insert(symbol.clone(), v.value);
            position_pnl.insert(symbol.clone(), v.pnl);
        }

        let held: BTreeMap<String, Direction> = positions
            .positions()
            .map(|p| (p.symbol.clone(), p.direction))
            .collect();

        let cash_ratio = ratio(valuation.available_cash);
        let max_concentration = concentrations.values().copied().fold(0.0, f64::max);
        let open_positions = held.len();
        let score = risk_score(max_concentration, cash_ratio, open_positions, max_positions);

        Self {
            total_value: total,
            available_cash: valuation.available_cash,
            cash_ratio,
            concentrations,
            max_concentration,
            open_positions,
            max_positions,
            held,
            position_values,
            position_pnl,
            risk_score: score,
            risk_level: RiskLevel::from_score(score),
        }
    }

    fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.risk_level == RiskLevel::High {
            warnings.push(format!("Portfolio risk is high ({:.2})", self.risk_score));
        }
        if self.cash_ratio < MIN_CASH_RESERVE {
            warnings.push(format!(
                "Cash reserve {:.1}% is below the {:.0}% minimum",
                self.cash_ratio * 100.0,
                MIN_CASH_RESERVE * 100.0
            ));
        }
        warnings
    }
}

// ==================== Decision ====================

/// One trade in a decision batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedTrade {
    pub symbol: String,
    pub action: Action,
    pub direction: Direction,
}

impl fmt::Display for PlannedTrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.action, self.direction, self.symbol)
    }
}

/// Which policy produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStrategy {
    AiAdvised,
    RuleBased,
}

impl DecisionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStrategy::AiAdvised => "ai_advised",
            DecisionStrategy::RuleBased => "rule_based",
        }
    }
}

/// A validated batch of trades for one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioDecision {
    /// At most [`MAX_TRADES_PER_CYCLE`] trades, sells before buys
    pub trades: Vec<PlannedTrade>,
    pub reasoning: String,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub strategy: DecisionStrategy,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AiDecisionReply {
    #[serde(default)]
    trades: Vec<AiTradeProposal>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct AiTradeProposal {
    symbol: String,
    action: String,
    #[serde(default)]
    direction: Option<String>,
}

/// Checks proposed trades against live positions and the trades already
/// accepted into the batch.
struct TradeValidator<'a> {
    metrics: &'a PortfolioMetrics,
    analyzed: BTreeSet<&'a str>,
    risk_per_trade: f64,
    held: BTreeMap<String, Direction>,
    projected_cash: f64,
    accepted: Vec<PlannedTrade>,
}

impl<'a> TradeValidator<'a> {
    fn new(metrics: &'a PortfolioMetrics, analyses: &'a [AssetAnalysis], risk_per_trade: f64) -> Self {
        Self {
            metrics,
            analyzed: analyses.iter().map(|a| a.symbol.as_str()).collect(),
            risk_per_trade,
            held: metrics.held.clone(),
            projected_cash: metrics.available_cash.to_f64().unwrap_or(0.0),
            accepted: Vec::new(),
        }
    }

    fn accept(&mut self, trade: PlannedTrade) -> Result<(), String> {
        if self.accepted.len() >= MAX_TRADES_PER_CYCLE {
            return Err(format!("trade budget of {MAX_TRADES_PER_CYCLE} exhausted"));
        }
        if !self.analyzed.contains(trade.symbol.as_str()) {
            return Err("symbol was not analyzed this cycle".into());
        }
        if self.accepted.iter().any(|t| t.symbol == trade.symbol) {
            return Err("symbol already has a trade in this batch".into());
        }

        match trade.action {
            Action::Hold => return Err("hold is not a trade".into()),
            Action::Buy => self.check_buy(&trade)?,
            Action::Sell => self.check_sell(&trade)?,
        }

        match trade.action {
            Action::Buy => {
                self.projected_cash -= self.projected_cash * self.risk_per_trade;
                self.held.insert(trade.symbol.clone(), trade.direction);
            }
            Action::Sell => {
                self.held.remove(&trade.symbol);
                let value = self
                    .metrics
                    .position_values
                    .get(&trade.symbol)
                    .and_then(|v| v.to_f64())
                    .unwrap_or(0.0);
                self.projected_cash += value;
            }
            Action::Hold => {}
        }

        self.accepted.push(trade);
        Ok(())
    }

    fn check_buy(&self, trade: &PlannedTrade) -> Result<(), String> {
        if self.held.contains_key(&trade.symbol) {
            return Err("symbol is already held".into());
        }
        if self.held.len() >= self.metrics.max_positions {
            return Err(format!("max positions ({}) reached", self.metrics.max_positions));
        }

        let total = self.metrics.total_value.to_f64().unwrap_or(0.0);
        if total <= 0.0 {
            return Err("portfolio has no value".into());
        }
        let after = self.projected_cash * (1.0 - self.risk_per_trade);
        if after / total < MIN_CASH_RESERVE {
            return Err("would breach the cash reserve".into());
        }
        Ok(())
    }

    fn check_sell(&self, trade: &PlannedTrade) -> Result<(), String> {
        match self.held.get(&trade.symbol) {
            Some(direction) if *direction == trade.direction => Ok(()),
            Some(direction) => Err(format!("held {direction}, not {}", trade.direction)),
            None => Err("no open position".into()),
        }
    }

    fn into_trades(self) -> Vec<PlannedTrade> {
        // Sells first so freed slots and cash are available to buys.
        let (mut sells, buys): (Vec<_>, Vec<_>) =
            self.accepted.into_iter().partition(|t| t.action == Action::Sell);
        sells.extend(buys);
        sells
    }
}

/// Chooses each cycle's trades for one instance.
#[derive(Clone)]
pub struct PortfolioDecisionManager {
    max_positions: usize,
    risk_per_trade: f64,
    adviser: Option<AiSignalAdviser>,
}

impl PortfolioDecisionManager {
    pub fn new(max_positions: usize, risk_per_trade: Decimal, adviser: Option<AiSignalAdviser>) -> Self {
        Self {
            max_positions,
            risk_per_trade: risk_per_trade.to_f64().unwrap_or(0.0),
            adviser,
        }
    }

    pub fn has_adviser(&self) -> bool {
        self.adviser.is_some()
    }

    /// Decide this cycle's trades. Never fails: any advisor problem falls
    /// back to the rule-based policy.
    pub async fn decide(
        &self,
        analyses: &[AssetAnalysis],
        positions: &PositionManager,
        cancel: &CancellationToken,
    ) -> PortfolioDecision {
        let metrics = PortfolioMetrics::from_positions(positions, self.max_positions);
        let mut warnings = metrics.warnings();

        if let Some(adviser) = &self.adviser {
            if !analyses.is_empty() {
                match self.ai_decision(adviser, analyses, &metrics, cancel).await {
                    Advice::Opinion(mut decision) => {
                        warnings.append(&mut decision.warnings);
                        decision.warnings = warnings;
                        return decision;
                    }
                    Advice::NoOpinion { reason } => {
                        warn!(reason = %reason, "AI decision unavailable, using rule-based policy");
                        warnings.push(format!("AI decision unavailable: {reason}"));
                    }
                }
            }
        }

        self.rule_based(analyses, &metrics, warnings)
    }

    async fn ai_decision(
        &self,
        adviser: &AiSignalAdviser,
        analyses: &[AssetAnalysis],
        metrics: &PortfolioMetrics,
        cancel: &CancellationToken,
    ) -> Advice<PortfolioDecision> {
        let prompt = build_decision_prompt(analyses, metrics);

        let reply = match adviser
            .request_json::<AiDecisionReply>(DECISION_SYSTEM_PROMPT, &prompt, cancel)
            .await
        {
            Advice::Opinion(reply) => reply,
            Advice::NoOpinion { reason } => return Advice::NoOpinion { reason },
        };

        let mut validator = TradeValidator::new(metrics, analyses, self.risk_per_trade);
        let mut warnings = Vec::new();

        for proposal in reply.trades {
            let label = format!(
                "{} {} {}",
                proposal.action,
                proposal.direction.as_deref().unwrap_or("-"),
                proposal.symbol
            );
            let result = parse_proposal(proposal).and_then(|trade| validator.accept(trade));
            if let Err(reason) = result {
                debug!(trade = %label, reason = %reason, "Dropping AI trade");
                warnings.push(format!("Dropped AI trade {label}: {reason}"));
            }
        }

        let trades = validator.into_trades();
        info!(trades = trades.len(), dropped = warnings.len(), "AI decision accepted");

        Advice::Opinion(PortfolioDecision {
            trades,
            reasoning: reply.reasoning,
            risk_level: metrics.risk_level,
            risk_score: metrics.risk_score,
            strategy: DecisionStrategy::AiAdvised,
            warnings,
        })
    }

    /// Close losing positions flagged SELL, then open BUY-flagged symbols
    /// (highest confidence first) while slots, budget and cash allow.
    fn rule_based(
        &self,
        analyses: &[AssetAnalysis],
        metrics: &PortfolioMetrics,
        warnings: Vec<String>,
    ) -> PortfolioDecision {
        let mut validator = TradeValidator::new(metrics, analyses, self.risk_per_trade);
        let mut notes = Vec::new();

        for analysis in analyses {
            let signal = analysis.recommended().trade_signal();
            let (Action::Sell, Some(direction)) = (signal.action, signal.direction) else {
                continue;
            };
            let losing = metrics
                .position_pnl
                .get(&analysis.symbol)
                .is_some_and(|pnl| *pnl < Decimal::ZERO);
            if !losing {
                continue;
            }

            let trade = PlannedTrade {
                symbol: analysis.symbol.clone(),
                action: Action::Sell,
                direction,
            };
            match validator.accept(trade) {
                Ok(()) => notes.push(format!("close losing {} {}", analysis.symbol, direction)),
                Err(reason) => debug!(symbol = %analysis.symbol, reason = %reason, "Skipping close"),
            }
        }

        let mut candidates: Vec<&AssetAnalysis> = analyses
            .iter()
            .filter(|a| a.recommended().trade_signal().action == Action::Buy)
            .collect();
        candidates.sort_by(|a, b| b.confidence().cmp(&a.confidence()));

        for analysis in candidates {
            let Some(direction) = analysis.recommended().trade_signal().direction else {
                continue;
            };
            let trade = PlannedTrade {
                symbol: analysis.symbol.clone(),
                action: Action::Buy,
                direction,
            };
            match validator.accept(trade) {
                Ok(()) => notes.push(format!("open {} {}", analysis.symbol, direction)),
                Err(reason) => debug!(symbol = %analysis.symbol, reason = %reason, "Skipping entry"),
            }
        }

        let reasoning = if notes.is_empty() {
            "No actionable signals".to_string()
        } else {
            format!("Rule-based: {}", notes.join("; "))
        };

        PortfolioDecision {
            trades: validator.into_trades(),
            reasoning,
            risk_level: metrics.risk_level,
            risk_score: metrics.risk_score,
            strategy: DecisionStrategy::RuleBased,
            warnings,
        }
    }
}

fn parse_proposal(proposal: AiTradeProposal) -> Result<PlannedTrade, String> {
    let action: Action = proposal.action.parse()?;
    let direction: Direction = proposal
        .direction
        .as_deref()
        .ok_or_else(|| "missing direction".to_string())?
        .parse()?;

    Ok(PlannedTrade {
        symbol: proposal.symbol.trim().to_uppercase(),
        action,
        direction,
    })
}

fn build_decision_prompt(analyses: &[AssetAnalysis], metrics: &PortfolioMetrics) -> String {
    let assets: Vec<serde_json::Value> = analyses
        .iter()
        .map(|a| {
            json!({
                "symbol": a.symbol,
                "price": a.price,
                "technical": a.technical.to_string(),
                "ai": a.ai.as_ref().map(|o| json!({
                    "signal": o.signal.to_string(),
                    "confidence": o.confidence,
                    "reasoning": o.reasoning,
                })),
                "rsi_14": a.indicators.rsi_14,
                "macd": a.indicators.macd,
                "macd_signal": a.indicators.macd_signal,
                "ema_50": a.indicators.ema_50,
            })
        })
        .collect();

    let portfolio = json!({
        "total_value": metrics.total_value,
        "available_cash": metrics.available_cash,
        "cash_ratio": metrics.cash_ratio,
        "held": metrics.held,
        "unrealized_pnl": metrics.position_pnl,
        "concentrations": metrics.concentrations,
        "risk_score": metrics.risk_score,
    });

    format!(
        "Assets:\n{assets:#}\n\n\
         Portfolio:\n{portfolio:#}\n\n\
         Constraints:\n\
         - at most {max_trades} trades\n\
         - at most {max_positions} open positions (currently {open})\n\
         - keep at least {reserve:.0}% of value in cash\n\
         - never BUY a symbol that is already held\n\
         - only SELL a held symbol, in its held direction\n\
         Respond with the JSON object only.",
        assets = serde_json::Value::Array(assets),
        max_trades = MAX_TRADES_PER_CYCLE,
        max_positions = metrics.max_positions,
        open = metrics.open_positions,
        reserve = MIN_CASH_RESERVE * 100.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AiOpinion, Position, TradeSignal};
    use crate::testing::{indicator_snapshot, ScriptedGenerator};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    fn make_analysis(symbol: &str, price: f64, technical: TradeSignal) -> AssetAnalysis {
        let indicators = indicator_snapshot(price);
        AssetAnalysis {
            symbol: symbol.to_string(),
            price: indicators.price,
            indicators,
            technical,
            ai: None,
        }
    }

    fn make_manager(adviser: Option<AiSignalAdviser>) -> PortfolioDecisionManager {
        PortfolioDecisionManager::new(3, dec!(0.02), adviser)
    }

    fn adviser(generator: ScriptedGenerator) -> AiSignalAdviser {
        AiSignalAdviser::new(Arc::new(generator), "test-model".into(), Duration::from_millis(50))
    }

    /// 10000 cash with a losing BTC long (entry 100, marked 90).
    fn losing_book() -> PositionManager {
        let mut pm = PositionManager::new(dec!(10000));
        assert!(pm.open_position(Position::new("BTC".into(), Direction::Long, dec!(100), dec!(10))));
        pm.mark_price("BTC", dec!(90));
        pm
    }

    #[test]
    fn test_risk_score_and_level() {
        assert!((risk_score(0.0, 1.0, 0, 3) - 0.0).abs() < 1e-12);
        assert!((risk_score(0.5, 0.5, 3, 3) - 0.65).abs() < 1e-12);
        assert_eq!(RiskLevel::from_score(0.1), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.5), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.7), RiskLevel::High);
    }

    #[test]
    fn test_metrics_from_positions() {
        let pm = losing_book();
        let metrics = PortfolioMetrics::from_positions(&pm, 3);

        assert_eq!(metrics.total_value, dec!(9900));
        assert_eq!(metrics.position_pnl["BTC"], dec!(-100));
        assert_eq!(metrics.held["BTC"], Direction::Long);
        assert_eq!(metrics.open_positions, 1);
        assert!((metrics.max_concentration - 900.0 / 9900.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rule_based_closes_losers_then_buys() {
        let pm = losing_book();
        let analyses = vec![
            make_analysis("BTC", 90.0, TradeSignal::sell(Direction::Long)),
            make_analysis("ETH", 2000.0, TradeSignal::buy(Direction::Short)),
            make_analysis("SOL", 100.0, TradeSignal::hold()),
        ];

        let decision = make_manager(None)
            .decide(&analyses, &pm, &CancellationToken::new())
            .await;

        assert_eq!(decision.strategy, DecisionStrategy::RuleBased);
        assert_eq!(
            decision.trades,
            vec![
                PlannedTrade { symbol: "BTC".into(), action: Action::Sell, direction: Direction::Long },
                PlannedTrade { symbol: "ETH".into(), action: Action::Buy, direction: Direction::Short },
            ]
        );
    }

    #[tokio::test]
    async fn test_rule_based_keeps_winners_and_rejects_duplicate_buy() {
        let mut pm = PositionManager::new(dec!(10000));
        assert!(pm.open_position(Position::new("BTC".into(), Direction::Long, dec!(100), dec!(10))));
        pm.mark_price("BTC", dec!(120));

        let analyses = vec![
            make_analysis("BTC", 120.0, TradeSignal::sell(Direction::Long)),
            make_analysis("ETH", 2000.0, TradeSignal::buy(Direction::Long)),
        ];
        let decision = make_manager(None)
            .decide(&analyses, &pm, &CancellationToken::new())
            .await;
        assert_eq!(decision.trades.len(), 1);
        assert_eq!(decision.trades[0].symbol, "ETH");

        let analyses = vec![make_analysis("BTC", 120.0, TradeSignal::buy(Direction::Long))];
        let decision = make_manager(None)
            .decide(&analyses, &pm, &CancellationToken::new())
            .await;
        assert!(decision.trades.is_empty());
        assert_eq!(decision.reasoning, "No actionable signals");
    }

    #[tokio::test]
    async fn test_batch_never_exceeds_budget() {
        let pm = PositionManager::new(dec!(100000));
        let analyses: Vec<AssetAnalysis> = (0..12)
            .map(|i| make_analysis(&format!("SYM{i}"), 10.0, TradeSignal::buy(Direction::Long)))
            .collect();

        let manager = PortfolioDecisionManager::new(10, dec!(0.02), None);
        let decision = manager.decide(&analyses, &pm, &CancellationToken::new()).await;

        assert_eq!(decision.trades.len(), MAX_TRADES_PER_CYCLE);
    }

    #[tokio::test]
    async fn test_buys_ranked_by_ai_confidence_and_capped_by_slots() {
        let pm = losing_book();
        let mut low = make_analysis("ETH", 2000.0, TradeSignal::hold());
        low.ai = Some(AiOpinion {
            signal: TradeSignal::buy(Direction::Long),
            confidence: 40,
            reasoning: String::new(),
        });
        let mut high = make_analysis("SOL", 100.0, TradeSignal::hold());
        high.ai = Some(AiOpinion {
            signal: TradeSignal::buy(Direction::Short),
            confidence: 90,
            reasoning: String::new(),
        });

        let manager = PortfolioDecisionManager::new(2, dec!(0.02), None);
        let decision = manager
            .decide(&[low, high], &pm, &CancellationToken::new())
            .await;

        assert_eq!(decision.trades.len(), 1);
        assert_eq!(decision.trades[0].symbol, "SOL");
        assert_eq!(decision.trades[0].direction, Direction::Short);
    }

    #[tokio::test]
    async fn test_advisor_failure_falls_back() {
        let pm = losing_book();
        let analyses = vec![make_analysis("ETH", 2000.0, TradeSignal::buy(Direction::Long))];

        for generator in [ScriptedGenerator::failing(), ScriptedGenerator::hanging()] {
            let manager = make_manager(Some(adviser(generator)));
            let decision = manager.decide(&analyses, &pm, &CancellationToken::new()).await;

            assert_eq!(decision.strategy, DecisionStrategy::RuleBased);
            assert_eq!(decision.trades.len(), 1);
            assert!(decision
                .warnings
                .iter()
                .any(|w| w.starts_with("AI decision unavailable")));
        }
    }

    #[tokio::test]
    async fn test_malformed_ai_reply_falls_back() {
        let pm = PositionManager::new(dec!(10000));
        let analyses = vec![make_analysis("ETH", 2000.0, TradeSignal::hold())];
        let manager = make_manager(Some(adviser(ScriptedGenerator::replying("I would buy ETH"))));

        let decision = manager.decide(&analyses, &pm, &CancellationToken::new()).await;

        assert_eq!(decision.strategy, DecisionStrategy::RuleBased);
        assert!(decision.trades.is_empty());
    }

    #[tokio::test]
    async fn test_ai_proposals_are_validated() {
        let pm = losing_book();
        let analyses = vec![
            make_analysis("BTC", 90.0, TradeSignal::hold()),
            make_analysis("ETH", 2000.0, TradeSignal::hold()),
            make_analysis("SOL", 100.0, TradeSignal::hold()),
            make_analysis("ADA", 1.0, TradeSignal::hold()),
            make_analysis("XRP", 1.0, TradeSignal::hold()),
        ];
        let reply = r#"```json
        {"trades": [
            {"symbol": "BTC", "action": "BUY", "direction": "LONG"},
            {"symbol": "BTC", "action": "SELL", "direction": "SHORT"},
            {"symbol": "DOGE", "action": "BUY", "direction": "LONG"},
            {"symbol": "eth", "action": "BUY", "direction": "LONG"},
            {"symbol": "SOL", "action": "BUY"},
            {"symbol": "SOL", "action": "BUY", "direction": "SHORT"},
            {"symbol": "BTC", "action": "SELL", "direction": "LONG"},
            {"symbol": "ADA", "action": "BUY", "direction": "LONG"}
        ], "reasoning": "rotate"}
        ```"#;
        let manager = make_manager(Some(adviser(ScriptedGenerator::replying(reply))));

        let decision = manager.decide(&analyses, &pm, &CancellationToken::new()).await;

        assert_eq!(decision.strategy, DecisionStrategy::AiAdvised);
        assert_eq!(decision.reasoning, "rotate");
        let trades: Vec<String> = decision.trades.iter().map(|t| t.to_string()).collect();
        assert_eq!(trades, vec!["SELL LONG BTC", "BUY LONG ETH", "BUY SHORT SOL"]);
        assert_eq!(
            decision.warnings.iter().filter(|w| w.starts_with("Dropped AI trade")).count(),
            5
        );
    }

    #[test]
    fn test_validator_refuses_buy_on_held_symbol() {
        let pm = losing_book();
        let metrics = PortfolioMetrics::from_positions(&pm, 3);
        let analyses = vec![
            make_analysis("BTC", 90.0, TradeSignal::hold()),
            make_analysis("ETH", 2000.0, TradeSignal::hold()),
        ];
        let mut validator = TradeValidator::new(&metrics, &analyses, 0.02);

        for direction in [Direction::Long, Direction::Short] {
            let held = validator.accept(PlannedTrade {
                symbol: "BTC".into(),
                action: Action::Buy,
                direction,
            });
            assert_eq!(held, Err("symbol is already held".to_string()));
        }

        let fresh = PlannedTrade { symbol: "ETH".into(), action: Action::Buy, direction: Direction::Long };
        assert!(validator.accept(fresh.clone()).is_ok());
        assert!(validator.accept(fresh).is_err());
        assert_eq!(validator.into_trades().len(), 1);
    }

    #[tokio::test]
    async fn test_held_symbol_buy_dropped_under_both_policies() {
        let pm = losing_book();
        let analyses = vec![make_analysis("BTC", 90.0, TradeSignal::buy(Direction::Long))];

        let decision = make_manager(None)
            .decide(&analyses, &pm, &CancellationToken::new())
            .await;
        assert_eq!(decision.strategy, DecisionStrategy::RuleBased);
        assert!(decision.trades.is_empty());

        let reply = r#"{"trades": [{"symbol": "BTC", "action": "BUY", "direction": "LONG"}], "reasoning": "add"}"#;
        let manager = make_manager(Some(adviser(ScriptedGenerator::replying(reply))));
        let decision = manager.decide(&analyses, &pm, &CancellationToken::new()).await;
        assert_eq!(decision.strategy, DecisionStrategy::AiAdvised);
        assert!(decision.trades.is_empty());
        assert!(decision
            .warnings
            .iter()
            .any(|w| w == "Dropped AI trade BUY LONG BTC: symbol is already held"));
    }

    #[tokio::test]
    async fn test_buy_refused_below_cash_reserve() {
        let mut pm = PositionManager::new(dec!(1000));
        assert!(pm.open_position(Position::new("BTC".into(), Direction::Long, dec!(950), dec!(1))));
        let analyses = vec![make_analysis("ETH", 10.0, TradeSignal::buy(Direction::Long))];

        let decision = make_manager(None)
            .decide(&analyses, &pm, &CancellationToken::new())
            .await;

        assert!(decision.trades.is_empty());
        assert!(decision.warnings.iter().any(|w| w.contains("Cash reserve")));
    }
}
