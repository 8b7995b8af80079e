//! Multi-Instance Trading Engine
//!
//! Runs several independently configured simulated-trading instances side
//! by side, each trading on technical indicators and, optionally, an AI
//! advisor's opinions.

mod analysis;
mod api;
mod error;
mod instance;
mod metrics;
mod models;
mod session;
mod trading;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::analysis::{generate_signal, AiSignalAdviser, MarketDataProvider, TextGenerator};
use crate::api::{LlmClient, MarketClient, MARKET_API_BASE};
use crate::models::Granularity;
use crate::session::{
    AdvisorRequestParser, KeywordRequestParser, RequestParser, SessionEvent,
    SessionInstanceRegistry, TradingSession,
};
use crate::trading::{EngineSettings, TradingInstanceConfig, DEFAULT_MODEL};

/// Multi-instance autonomous trading engine CLI.
#[derive(Parser)]
#[command(name = "multitrade")]
#[command(about = "Run concurrent simulated trading instances", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Market data REST base URL
    #[arg(long, env = "MARKET_API_URL", default_value = MARKET_API_BASE)]
    market_url: String,

    /// OpenAI-compatible text-generation base URL; AI features are off without it
    #[arg(long, env = "LLM_BASE_URL")]
    llm_url: Option<String>,

    /// API key for the text-generation service
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// Model used when a request does not name one
    #[arg(short, long, env = "DEFAULT_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Timeout for each price lookup (seconds)
    #[arg(long, default_value = "10")]
    price_timeout: u64,

    /// Timeout for each advisor call (seconds)
    #[arg(long, default_value = "30")]
    advisor_timeout: u64,

    /// Bars fetched per history lookup
    #[arg(long, default_value = "200")]
    lookback: usize,

    /// Bar size (1m, 5m, 15m, 1h, 4h, 1d)
    #[arg(short, long, default_value = "1h")]
    granularity: Granularity,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn settings(&self) -> EngineSettings {
        EngineSettings {
            price_timeout: Duration::from_secs(self.price_timeout),
            advisor_timeout: Duration::from_secs(self.advisor_timeout),
            history_lookback: self.lookback,
            granularity: self.granularity,
            market_base_url: self.market_url.clone(),
            llm_base_url: self.llm_url.clone(),
            llm_api_key: self.llm_api_key.clone(),
            default_model: self.model.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start trading instances, then read commands from stdin
    Run {
        /// Requests to start with, e.g. "trade BTC ETH with $50000 every 5m"
        requests: Vec<String>,

        /// Session name
        #[arg(short, long, default_value = "cli")]
        session: String,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Show indicators and the technical signal for symbols
    Analyze {
        /// Symbols to analyze (e.g. BTC ETH)
        #[arg(required = true)]
        symbols: Vec<String>,
    },

    /// Show the configuration a request would produce
    Parse {
        /// Free-text request
        #[arg(required = true)]
        request: Vec<String>,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = cli.settings();

    match cli.command {
        Commands::Run {
            requests,
            session,
            json,
        } => {
            run_session(settings, session, requests, json).await?;
        }

        Commands::Analyze { symbols } => {
            let market = market_provider(&settings)?;
            let cancel = CancellationToken::new();

            println!(
                "\n{:<8} {:>14} {:>8} {:>12} {:>12} {:<12}",
                "SYMBOL", "PRICE", "RSI", "MACD", "SIGNAL", "ACTION"
            );
            println!("{}", "-".repeat(72));

            for symbol in symbols {
                let symbol = symbol.to_uppercase();
                match market.calculate_indicators(&symbol, &cancel).await {
                    Ok(Some(ind)) => {
                        let signal = generate_signal(&ind);
                        println!(
                            "{:<8} {:>14} {:>8.1} {:>12.4} {:>12.4} {:<12}",
                            symbol,
                            ind.price.round_dp(4),
                            ind.rsi_14.unwrap_or(f64::NAN),
                            ind.macd.unwrap_or(f64::NAN),
                            ind.macd_signal.unwrap_or(f64::NAN),
                            signal.to_string()
                        );
                    }
                    Ok(None) => println!("{:<8} insufficient history", symbol),
                    Err(e) => println!("{:<8} {}", symbol, e),
                }
            }
        }

        Commands::Parse { request } => {
            let request = request.join(" ");
            let generator = text_generator(&settings)?;
            let parser = request_parser(&settings, generator);
            let config = parser.parse(&request, &CancellationToken::new()).await?;

            println!("\n=== Instance Configuration ===\n");
            print_instance_config(&config);
        }

        Commands::Config => {
            println!("\n=== Engine Settings ===\n");
            println!("  Market API:           {}", settings.market_base_url);
            println!(
                "  Advisor:              {}",
                settings.llm_base_url.as_deref().unwrap_or("not configured")
            );
            println!("  Default Model:        {}", settings.default_model);
            println!("  Price Timeout:        {}s", settings.price_timeout.as_secs());
            println!("  Advisor Timeout:      {}s", settings.advisor_timeout.as_secs());
            println!("  History Lookback:     {} bars", settings.history_lookback);
            println!("  Granularity:          {}", settings.granularity.as_str());

            println!("\n=== Instance Defaults ===\n");
            print_instance_config(&TradingInstanceConfig {
                model: settings.default_model.clone(),
                ..TradingInstanceConfig::default()
            });
        }
    }

    Ok(())
}

/// Start the requested instances and serve stdin commands until EOF or Ctrl+C.
async fn run_session(
    settings: EngineSettings,
    session_id: String,
    requests: Vec<String>,
    json: bool,
) -> Result<()> {
    let market = market_provider(&settings)?;
    let generator = text_generator(&settings)?;
    let parser = request_parser(&settings, generator.clone());
    let registry = Arc::new(SessionInstanceRegistry::new());
    let (tx, mut rx) = mpsc::unbounded_channel::<SessionEvent>();

    let session = TradingSession::new(session_id, settings, registry, parser, market, generator, tx);

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!(error = %e, "Failed to encode event"),
                }
            } else {
                println!("{event}");
            }
        }
    });

    info!(session = %session.id(), requests = requests.len(), "Starting session");
    for request in &requests {
        session.handle_message(request).await;
    }

    println!("\n=== Multi-Instance Trading Engine ===");
    println!("Type a request to start an instance, 'status' for a report,");
    println!("'stop [id]' to stop instances. Ctrl+C or EOF exits.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => session.handle_message(&line).await,
                None => break,
            },
        }
    }

    session.status().await;
    session.shutdown().await;
    drop(session);

    if tokio::time::timeout(Duration::from_secs(5), printer).await.is_err() {
        warn!("Event printer did not drain in time");
    }
    Ok(())
}

fn market_provider(settings: &EngineSettings) -> Result<MarketDataProvider> {
    let client = MarketClient::with_base_url(settings.market_base_url.clone())
        .context("Failed to build market client")?;
    Ok(MarketDataProvider::new(
        Arc::new(client),
        settings.price_timeout,
        settings.history_lookback,
        settings.granularity,
    ))
}

fn text_generator(settings: &EngineSettings) -> Result<Option<Arc<dyn TextGenerator>>> {
    let Some(base_url) = &settings.llm_base_url else {
        return Ok(None);
    };
    let client = LlmClient::new(base_url.clone(), settings.llm_api_key.clone())
        .context("Failed to build LLM client")?;
    Ok(Some(Arc::new(client)))
}

fn request_parser(
    settings: &EngineSettings,
    generator: Option<Arc<dyn TextGenerator>>,
) -> Arc<dyn RequestParser> {
    let keyword = KeywordRequestParser::new(TradingInstanceConfig {
        model: settings.default_model.clone(),
        ..TradingInstanceConfig::default()
    });

    match generator {
        Some(generator) => Arc::new(AdvisorRequestParser::new(
            AiSignalAdviser::new(generator, settings.default_model.clone(), settings.advisor_timeout),
            keyword,
        )),
        None => Arc::new(keyword),
    }
}

fn print_instance_config(config: &TradingInstanceConfig) {
    let symbols = if config.symbols.is_empty() {
        "-".to_string()
    } else {
        config.symbols.join(", ")
    };
    println!("  Symbols:              {}", symbols);
    println!("  Initial Capital:      ${}", config.initial_capital);
    println!("  Check Interval:       {}s", config.check_interval.as_secs());
    println!("  Risk Per Trade:       {}%", config.risk_per_trade * Decimal::ONE_HUNDRED);
    println!("  Max Positions:        {}", config.max_positions);
    println!("  Model:                {}", config.model);
    println!("  AI Signals:           {}", if config.use_ai_signals { "Yes" } else { "No" });
}
