//! Events streamed to the session's caller: progress, trades, notifications,
//! charts, warnings and terminal failures.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::instance::InstanceSummary;
use crate::models::{PortfolioSnapshot, TradeRecord};
use crate::trading::DecisionStrategy;

/// Sending half of a session's event stream.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiving half of a session's event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Chart rows share a bucket when their timestamps fall in the same minute.
const CHART_BUCKET_FORMAT: &str = "%Y-%m-%d %H:%M";

/// User-facing notification scoped to one model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Model identifiers this notification concerns
    pub filters: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>, model_id: &str) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            filters: vec![model_id.to_string()],
            timestamp: Utc::now(),
        }
    }
}

/// Value-over-time chart: one column per model.
///
/// Serialized as a table whose header row is `["Time", model_id...]`
/// followed by `[timestamp, value...]` rows. A model with no value in a
/// time bucket is recorded as 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartPayload {
    pub models: Vec<String>,
    pub rows: Vec<(String, Vec<Decimal>)>,
}

impl ChartPayload {
    /// Merge per-model snapshot series into one chart. Within a bucket the
    /// latest value of each model wins.
    pub fn aggregate<'a>(series: impl IntoIterator<Item = (String, &'a [PortfolioSnapshot])>) -> Self {
        let mut models = Vec::new();
        let mut buckets: BTreeMap<String, BTreeMap<usize, Decimal>> = BTreeMap::new();

        for (column, (model, snapshots)) in series.into_iter().enumerate() {
            models.push(model);
            for snapshot in snapshots {
                let time = snapshot.timestamp.format(CHART_BUCKET_FORMAT).to_string();
                buckets
                    .entry(time)
                    .or_default()
                    .insert(column, snapshot.total_value);
            }
        }

        let rows = buckets
            .into_iter()
            .map(|(time, values)| {
                let row = (0..models.len())
                    .map(|column| values.get(&column).copied().unwrap_or(Decimal::ZERO))
                    .collect();
                (time, row)
            })
            .collect();

        Self { models, rows }
    }

    pub fn header(&self) -> Vec<String> {
        std::iter::once("Time".to_string())
            .chain(self.models.iter().cloned())
            .collect()
    }

    /// Header row followed by data rows.
    pub fn to_table(&self) -> Vec<Vec<serde_json::Value>> {
        let mut table = vec![self.header().into_iter().map(serde_json::Value::from).collect()];
        for (time, values) in &self.rows {
            let mut row = vec![json!(time)];
            row.extend(values.iter().map(|v| json!(v)));
            table.push(row);
        }
        table
    }
}

impl Serialize for ChartPayload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_table().serialize(serializer)
    }
}

/// End-of-cycle progress of one instance.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub instance_id: Uuid,
    pub model: String,
    pub cycle: u64,
    pub total_value: Decimal,
    pub available_cash: Decimal,
    pub open_positions: usize,
    pub trades_executed: usize,
    pub trades_rejected: usize,
    /// Symbols skipped this cycle for lack of data
    pub skipped: Vec<String>,
    pub strategy: DecisionStrategy,
    pub reasoning: String,
}

/// Every instance of a session plus the aggregated value chart.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub instances: Vec<InstanceSummary>,
    pub chart: ChartPayload,
}

/// Ordered message to the session's caller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    Progress(ProgressUpdate),
    Status(StatusReport),
    Trade {
        instance_id: Uuid,
        model: String,
        record: TradeRecord,
    },
    Notification(Notification),
    Chart(ChartPayload),
    Warning {
        instance_id: Option<Uuid>,
        message: String,
    },
    /// Terminal failure of an instance or of a creation attempt
    Failure {
        instance_id: Option<Uuid>,
        message: String,
    },
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::Progress(p) => write!(
                f,
                "[{}] cycle {}: value ${:.2}, cash ${:.2}, {} open, {} executed ({})",
                p.model,
                p.cycle,
                p.total_value,
                p.available_cash,
                p.open_positions,
                p.trades_executed,
                p.strategy.as_str()
            ),
            SessionEvent::Status(report) => write!(f, "{report}"),
            SessionEvent::Trade { model, record, .. } => write!(
                f,
                "[{}] {} {} {} {} @ {}{}",
                model,
                record.action.as_str(),
                record.direction,
                record.quantity,
                record.symbol,
                record.price,
                record
                    .pnl
                    .map(|pnl| format!(" (pnl ${pnl:.2})"))
                    .unwrap_or_default()
            ),
            SessionEvent::Notification(n) => write!(f, "{}: {}", n.title, n.body),
            SessionEvent::Chart(chart) => write!(f, "chart: {} rows", chart.rows.len()),
            SessionEvent::Warning { message, .. } => write!(f, "warning: {message}"),
            SessionEvent::Failure { message, .. } => write!(f, "failure: {message}"),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{:=^60}", " SESSION STATUS ")?;
        if self.instances.is_empty() {
            writeln!(f, "No trading instances")?;
        }
        for summary in &self.instances {
            writeln!(f)?;
            writeln!(f, "{summary}")?;
        }
        if !self.chart.rows.is_empty() {
            writeln!(f)?;
            writeln!(f, "--- Value ---")?;
            writeln!(f, "{}", self.chart.header().join(" | "))?;
            for (time, values) in &self.chart.rows {
                let values: Vec<String> = values.iter().map(|v| format!("{v:.2}")).collect();
                writeln!(f, "{} | {}", time, values.join(" | "))?;
            }
        }
        write!(f, "{:=^60}", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn snapshot(minute: u32, value: Decimal) -> PortfolioSnapshot {
        PortfolioSnapshot {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap(),
            total_value: value,
            available_cash: value,
            positions_value: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            open_positions: 0,
        }
    }

    #[test]
    fn test_chart_fills_missing_values_with_zero() {
        let a = vec![snapshot(0, dec!(100)), snapshot(1, dec!(101))];
        let b = vec![snapshot(1, dec!(200)), snapshot(2, dec!(202))];

        let chart = ChartPayload::aggregate([
            ("gpt-4o".to_string(), a.as_slice()),
            ("claude".to_string(), b.as_slice()),
        ]);

        assert_eq!(chart.header(), vec!["Time", "gpt-4o", "claude"]);
        assert_eq!(
            chart.rows,
            vec![
                ("2024-03-01 12:00".to_string(), vec![dec!(100), Decimal::ZERO]),
                ("2024-03-01 12:01".to_string(), vec![dec!(101), dec!(200)]),
                ("2024-03-01 12:02".to_string(), vec![Decimal::ZERO, dec!(202)]),
            ]
        );

        let table = serde_json::to_value(&chart).unwrap();
        assert_eq!(table[0], json!(["Time", "gpt-4o", "claude"]));
        assert_eq!(table[1][0], json!("2024-03-01 12:00"));
    }

    #[test]
    fn test_notification_shape() {
        let n = Notification::new("Position opened", "BUY LONG BTC", "gpt-4o");
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["filters"], json!(["gpt-4o"]));
        assert!(value.get("timestamp").is_some());
    }
}
