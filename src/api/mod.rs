//! HTTP clients for the market data and text-generation collaborators.

mod llm_client;
mod market_client;
mod types;

pub use llm_client::LlmClient;
pub use market_client::{MarketClient, MARKET_API_BASE};
