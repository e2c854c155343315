//! One-shot REST datasets: candle history, ticker stats, asset info and
//! screener pages. Failures are returned as-is; callers keep whatever data
//! they already hold.

use std::collections::HashMap;
use std::sync::Arc;

use itertools::Itertools;
use tracing::{debug, instrument, warn};

use crate::engine::page_cache::{total_pages, PageKey};
use crate::engine::types::{AssetInfo, Candle, MarketRow, RangeToken, TickerSnapshot, TradingPair};
use crate::error::{MarketDataError, MarketResult};
use crate::market_data::adapters::{
    AssetInfoProvider, ExchangeProvider, MarketChart, MarketListProvider,
};

pub struct SnapshotFetcher {
    assets: Arc<dyn AssetInfoProvider>,
    exchange: Arc<dyn ExchangeProvider>,
    markets: Arc<dyn MarketListProvider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingSize {
    pub total_listed: u64,
    pub total_pages: u32,
}

/// One candle per close sample (`open = high = low = close`), with volume
/// and market cap attached where a sample shares the timestamp.
pub fn candles_from_chart(chart: &MarketChart) -> Vec<Candle> {
    let volumes: HashMap<u64, f64> = chart.total_volumes.iter().copied().collect();
    let caps: HashMap<u64, f64> = chart.market_caps.iter().copied().collect();
    chart
        .prices
        .iter()
        .map(|&(ts, close)| Candle {
            volume: volumes.get(&ts).copied(),
            market_cap: caps.get(&ts).copied(),
            ..Candle::from_close(ts, close)
        })
        .collect()
}

impl SnapshotFetcher {
    pub fn new(
        assets: Arc<dyn AssetInfoProvider>,
        exchange: Arc<dyn ExchangeProvider>,
        markets: Arc<dyn MarketListProvider>,
    ) -> Self {
        Self { assets, exchange, markets }
    }

    #[instrument(skip(self))]
    pub async fn fetch_klines(
        &self,
        asset_id: &str,
        vs_currency: &str,
        range: RangeToken,
    ) -> MarketResult<Vec<Candle>> {
        let chart = self.assets.market_chart(asset_id, vs_currency, range.lookback()).await?;
        if chart.prices.is_empty() {
            return Err(MarketDataError::InsufficientData(format!(
                "no price history for {} in {} over {}",
                asset_id, vs_currency, range
            )));
        }
        let candles = candles_from_chart(&chart);
        debug!(points = candles.len(), "Fetched candle snapshot");
        Ok(candles)
    }

    #[instrument(skip(self))]
    pub async fn fetch_asset_info(&self, asset_id: &str) -> MarketResult<AssetInfo> {
        self.assets.asset_info(asset_id).await
    }

    /// Keyed by lowercased base symbol. Pairs the exchange did not answer
    /// for are missing from the map.
    #[instrument(skip(self, pairs), fields(pair_count = pairs.len()))]
    pub async fn fetch_tickers(
        &self,
        pairs: &[(String, TradingPair)],
    ) -> MarketResult<HashMap<String, TickerSnapshot>> {
        let symbols: Vec<String> = pairs.iter().map(|(_, p)| p.exchange_symbol.clone()).unique().collect();
        let snapshots = self.exchange.ticker_24h(&symbols).await?;

        let mut by_symbol: HashMap<String, TickerSnapshot> =
            snapshots.into_iter().map(|s| (s.symbol.clone(), s)).collect();
        let mut out = HashMap::with_capacity(pairs.len());
        for (base, pair) in pairs {
            match by_symbol.remove(&pair.exchange_symbol) {
                Some(snap) => {
                    out.insert(base.to_lowercase(), snap);
                }
                None => warn!(symbol = %pair.exchange_symbol, "No ticker returned"),
            }
        }
        Ok(out)
    }

    #[instrument(skip(self, key), fields(page_size = key.page_size, vs = %key.vs_currency, filter = %key.filter))]
    pub async fn fetch_market_page(&self, page: u32, key: &PageKey) -> MarketResult<Vec<MarketRow>> {
        let rows = self.markets.markets_page(page, key).await?;
        debug!(rows = rows.len(), "Fetched market page");
        Ok(rows)
    }

    #[instrument(skip(self))]
    pub async fn fetch_listing_size(&self, page_size: u32) -> MarketResult<ListingSize> {
        if page_size == 0 {
            return Err(MarketDataError::InvalidArgument("page size must be positive".into()));
        }
        let total_listed = self.markets.listed_count().await?;
        Ok(ListingSize { total_listed, total_pages: total_pages(total_listed, page_size) })
    }
}
