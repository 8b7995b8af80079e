//! User session: routes free-text messages to instance creation, stop and
//! status, and streams [`SessionEvent`]s to the caller.

mod commands;
mod events;
mod parser;
mod registry;

pub use commands::{parse_command, SessionCommand};
pub use events::{
    ChartPayload, EventReceiver, EventSender, Notification, ProgressUpdate, SessionEvent,
    StatusReport,
};
pub use parser::{AdvisorRequestParser, KeywordRequestParser, RequestParser};
pub use registry::SessionInstanceRegistry;

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::{AiSignalAdviser, MarketDataProvider, TextGenerator};
use crate::error::EngineResult;
use crate::instance::{StopOutcome, TradingInstance};
use crate::trading::EngineSettings;

/// One user session hosting any number of concurrent instances.
pub struct TradingSession {
    id: String,
    settings: EngineSettings,
    registry: Arc<SessionInstanceRegistry>,
    parser: Arc<dyn RequestParser>,
    market: MarketDataProvider,
    generator: Option<Arc<dyn TextGenerator>>,
    events: EventSender,
}

impl TradingSession {
    pub fn new(
        id: impl Into<String>,
        settings: EngineSettings,
        registry: Arc<SessionInstanceRegistry>,
        parser: Arc<dyn RequestParser>,
        market: MarketDataProvider,
        generator: Option<Arc<dyn TextGenerator>>,
        events: EventSender,
    ) -> Self {
        Self {
            id: id.into(),
            settings,
            registry,
            parser,
            market,
            generator,
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Route one free-text message. Outcomes are reported as events.
    pub async fn handle_message(&self, message: &str) {
        match parse_command(message) {
            SessionCommand::Stop { target } => {
                self.stop(target.as_deref()).await;
            }
            SessionCommand::Status => {
                self.status().await;
            }
            SessionCommand::Create(request) => {
                // Failures are already reported as events.
                let _ = self.create_instance(&request).await;
            }
        }
    }

    /// Parse a request and start an instance for it. A configuration error
    /// is reported as a terminal failure and no instance is created.
    pub async fn create_instance(&self, request: &str) -> EngineResult<Uuid> {
        let config = match self.parser.parse(request, &CancellationToken::new()).await {
            Ok(config) => config,
            Err(e) => {
                warn!(session = %self.id, error = %e, "Instance creation failed");
                self.emit(SessionEvent::Failure {
                    instance_id: None,
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let adviser = match (&self.generator, config.use_ai_signals) {
            (Some(generator), true) => Some(AiSignalAdviser::new(
                generator.clone(),
                config.model.clone(),
                self.settings.advisor_timeout,
            )),
            (None, true) => {
                warn!(model = %config.model, "AI signals requested but no advisor is configured");
                self.emit(SessionEvent::Warning {
                    instance_id: None,
                    message: format!(
                        "{}: no advisor configured, trading on technical signals",
                        config.model
                    ),
                });
                None
            }
            (_, false) => None,
        };

        let title = format!("Trading started: {}", config.symbols.join(", "));
        let body = format!(
            "${} capital, {}% risk per trade, up to {} positions, every {}s",
            config.initial_capital,
            config.risk_per_trade * Decimal::ONE_HUNDRED,
            config.max_positions,
            config.check_interval.as_secs()
        );
        let model = config.model.clone();

        let instance = TradingInstance::new(config, self.market.clone(), adviser, self.events.clone());
        let id = instance.id();
        self.registry.register(&self.id, instance.spawn()).await;

        info!(session = %self.id, instance = %id, model = %model, "Trading instance created");
        self.emit(SessionEvent::Notification(Notification::new(title, body, &model)));

        Ok(id)
    }

    /// Stop one instance (by id or id prefix) or all of them.
    pub async fn stop(&self, target: Option<&str>) -> Vec<(Uuid, StopOutcome)> {
        let outcomes = self.registry.stop(&self.id, target).await;

        if outcomes.is_empty() {
            self.emit(SessionEvent::Warning {
                instance_id: None,
                message: match target {
                    Some(id) => format!("No instance matches {id}"),
                    None => "No instances to stop".to_string(),
                },
            });
        }

        for (id, outcome) in &outcomes {
            let model = match self.registry.get(&self.id, &id.to_string()).await {
                Some(handle) => handle.model().to_string(),
                None => continue,
            };
            let body = match outcome {
                StopOutcome::Stopped => format!("Instance {id} stopped"),
                StopOutcome::AlreadyStopped => format!("Instance {id} was already stopped"),
            };
            self.emit(SessionEvent::Notification(Notification::new("Trading stopped", body, &model)));
        }

        outcomes
    }

    /// Report every instance plus the aggregated value chart.
    pub async fn status(&self) -> StatusReport {
        let instances = self.registry.status(&self.id).await;

        let labels = chart_labels(instances.iter().map(|s| (s.id, s.model.as_str())));
        let chart = ChartPayload::aggregate(
            instances
                .iter()
                .zip(labels)
                .map(|(summary, label)| (label, summary.value_history.as_slice())),
        );

        let report = StatusReport { instances, chart };
        self.emit(SessionEvent::Status(report.clone()));
        self.emit(SessionEvent::Chart(report.chart.clone()));
        report
    }

    /// Stop everything this session started.
    pub async fn shutdown(&self) {
        self.registry.close_session(&self.id).await;
        info!(session = %self.id, "Session closed");
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

/// Chart column per instance: the model id, suffixed with a short instance
/// id when several instances share a model.
fn chart_labels<'a>(instances: impl Iterator<Item = (Uuid, &'a str)> + Clone) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (_, model) in instances.clone() {
        *counts.entry(model).or_default() += 1;
    }

    instances
        .map(|(id, model)| {
            if counts.get(model).copied().unwrap_or(0) > 1 {
                let short: String = id.to_string().chars().take(8).collect();
                format!("{model}#{short}")
            } else {
                model.to_string()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceStatus;
    use crate::models::Granularity;
    use crate::testing::{buy_long_closes, ScriptedPriceSource};
    use crate::trading::TradingInstanceConfig;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn make_session(registry: Arc<SessionInstanceRegistry>, id: &str) -> (TradingSession, EventReceiver) {
        let source = ScriptedPriceSource::new()
            .with_closes("BTC", &buy_long_closes())
            .with_price("BTC", dec!(506))
            .with_closes("ETH", &buy_long_closes())
            .with_price("ETH", dec!(506));
        let market = MarketDataProvider::new(
            Arc::new(source),
            Duration::from_millis(100),
            200,
            Granularity::OneHour,
        );
        let parser = Arc::new(KeywordRequestParser::new(TradingInstanceConfig {
            check_interval: Duration::from_millis(20),
            ..TradingInstanceConfig::default()
        }));
        let (tx, rx) = mpsc::unbounded_channel();
        let session = TradingSession::new(id, EngineSettings::default(), registry, parser, market, None, tx);
        (session, rx)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_concurrent_instances_and_status() {
        let registry = Arc::new(SessionInstanceRegistry::new());
        let (session, mut rx) = make_session(registry.clone(), "s1");

        let a = session.create_instance("trade BTC model alpha").await.unwrap();
        let b = session.create_instance("trade ETH with $5000 model beta").await.unwrap();
        assert_ne!(a, b);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.active_count("s1").await, 2);

        let report = session.status().await;
        assert_eq!(report.instances.len(), 2);
        assert_eq!(report.chart.header(), vec!["Time", "alpha", "beta"]);
        assert!(!report.chart.rows.is_empty());
        assert!(report.instances.iter().all(|s| s.positions.len() == 1));

        session.shutdown().await;
        assert!(registry.instances("s1").await.is_empty());

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Progress(_))));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Trade { .. })));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Status(_))));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_scoped() {
        let registry = Arc::new(SessionInstanceRegistry::new());
        let (session, _rx) = make_session(registry.clone(), "s1");
        let (other, _other_rx) = make_session(registry.clone(), "s2");

        let a = session.create_instance("trade BTC").await.unwrap();
        let b = session.create_instance("trade ETH").await.unwrap();
        let c = other.create_instance("trade BTC").await.unwrap();

        let prefix: String = a.to_string().chars().take(8).collect();
        assert_eq!(registry.get("s1", &prefix).await.map(|h| h.id()), Some(a));
        assert!(registry.get("s2", &prefix).await.is_none());

        session.handle_message(&format!("stop {a}")).await;

        let handle_a = registry.get("s1", &a.to_string()).await.unwrap();
        let handle_b = registry.get("s1", &b.to_string()).await.unwrap();
        let handle_c = registry.get("s2", &c.to_string()).await.unwrap();
        assert_eq!(handle_a.status().await, InstanceStatus::Stopped);
        assert_ne!(handle_b.status().await, InstanceStatus::Stopped);

        let outcomes = session.stop(Some(&a.to_string())).await;
        assert_eq!(outcomes, vec![(a, StopOutcome::AlreadyStopped)]);
        assert_eq!(handle_a.status().await, InstanceStatus::Stopped);

        session.handle_message("halt").await;
        assert_eq!(handle_b.status().await, InstanceStatus::Stopped);
        assert_ne!(handle_c.status().await, InstanceStatus::Stopped);

        other.shutdown().await;
        assert_eq!(handle_c.status().await, InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_request_reports_failure() {
        let registry = Arc::new(SessionInstanceRegistry::new());
        let (session, mut rx) = make_session(registry.clone(), "s1");

        session.handle_message("make me rich").await;

        assert!(registry.instances("s1").await.is_empty());
        let events = drain(&mut rx);
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Failure { instance_id: None, .. }]
        ));
    }

    #[tokio::test]
    async fn test_ai_request_without_advisor_warns() {
        let registry = Arc::new(SessionInstanceRegistry::new());
        let (session, mut rx) = make_session(registry, "s1");

        session.create_instance("trade BTC use ai").await.unwrap();
        session.shutdown().await;

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Warning { message, .. } if message.contains("no advisor"))));
    }

    #[test]
    fn test_chart_labels_disambiguate_shared_models() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let labels = chart_labels([(a, "gpt"), (b, "gpt"), (Uuid::new_v4(), "claude")].into_iter());
        assert!(labels[0].starts_with("gpt#"));
        assert_ne!(labels[0], labels[1]);
        assert_eq!(labels[2], "claude");
    }
}
