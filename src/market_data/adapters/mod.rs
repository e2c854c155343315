// Shared traits for upstream market-data providers.
// Feeds only ever talk to these; the concrete venues live in the submodules.

use ahash::AHashSet;

use crate::engine::page_cache::PageKey;
use crate::engine::types::{AssetInfo, Lookback, MarketRow, TickerSnapshot};
use crate::error::MarketResult;

pub const NORMAL_CLOSURE: u16 = 1000;
pub const ABNORMAL_CLOSURE: u16 = 1006;

// Historical samples as returned by the chart endpoint, (ts_ms, value)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketChart {
    pub prices: Vec<(u64, f64)>,
    pub market_caps: Vec<(u64, f64)>,
    pub total_volumes: Vec<(u64, f64)>,
}

#[async_trait::async_trait]
pub trait AssetInfoProvider: Send + Sync {
    async fn asset_info(&self, id: &str) -> MarketResult<AssetInfo>;

    async fn market_chart(
        &self,
        id: &str,
        vs_currency: &str,
        lookback: Lookback,
    ) -> MarketResult<MarketChart>;
}

#[async_trait::async_trait]
pub trait MarketListProvider: Send + Sync {
    async fn markets_page(&self, page: u32, key: &PageKey) -> MarketResult<Vec<MarketRow>>;

    // Number of assets in the full listing (drives total pages)
    async fn listed_count(&self) -> MarketResult<u64>;
}

#[async_trait::async_trait]
pub trait ExchangeProvider: Send + Sync {
    /// Uppercased symbols currently trading, e.g. "BTCUSDT".
    async fn exchange_symbols(&self) -> MarketResult<AHashSet<String>>;

    async fn ticker_24h(&self, symbols: &[String]) -> MarketResult<Vec<TickerSnapshot>>;

    // Where to connect for the given stream names ("btcusdt@ticker", ...)
    fn stream_url(&self, streams: &[String]) -> String;
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text(String),
    Error(String),
    Closed { code: u16 },
}

#[async_trait::async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self, url: &str) -> MarketResult<Box<dyn StreamSession>>;
}

#[async_trait::async_trait]
pub trait StreamSession: Send {
    /// `None` once the transport is gone without a close frame.
    async fn next_event(&mut self) -> Option<StreamEvent>;

    async fn close(&mut self, code: u16);
}

pub mod binance;
pub mod binance_types;
pub mod coingecko;
pub mod coingecko_types;
pub mod ws;

#[cfg(test)]
pub(crate) mod fake;
