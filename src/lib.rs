pub mod config;
pub mod engine;
pub mod error;
pub mod feeds;
pub mod market_data;
pub mod telemetry;

pub use error::{MarketDataError, MarketResult};
