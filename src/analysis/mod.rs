//! Market analysis: data access, indicators, technical and AI signals.

mod adviser;
mod indicators;
mod provider;
mod signal_generator;

pub use adviser::{decode_signal_reply, extract_json, Advice, AiSignalAdviser, TextGenerator};
pub use indicators::{bollinger, calculate_indicators, ema_series, rsi, MIN_BARS};
pub use provider::{MarketDataProvider, PriceSource};
pub use signal_generator::generate_signal;
