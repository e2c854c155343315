// Router wires the providers into feed contexts and hands out feeds
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::AppConfig;
use crate::engine::page_cache::PageKey;
use crate::engine::types::{RangeToken, SortFilter};
use crate::error::MarketResult;
use crate::feeds::info::InfoFeed;
use crate::feeds::kline::KlineFeed;
use crate::feeds::screener::Screener;
use crate::feeds::ticker::TickerFeed;
use crate::feeds::FeedContext;
use crate::market_data::adapters::binance::BinanceClient;
use crate::market_data::adapters::coingecko::CoinGeckoClient;
use crate::market_data::adapters::ws::TungsteniteTransport;
use crate::market_data::adapters::{
    AssetInfoProvider, ExchangeProvider, MarketListProvider, StreamTransport,
};
use crate::market_data::resolver::SymbolResolver;
use crate::market_data::snapshot::SnapshotFetcher;

pub struct MarketDataRouter {
    ctx: Arc<FeedContext>,
    vs_currency: String,
    page_size: u32,
}

impl MarketDataRouter {
    /// Real upstreams: CoinGecko for asset data, Binance for pairs and streams.
    pub fn from_config(cfg: &AppConfig) -> MarketResult<Self> {
        let timeout = Duration::from_millis(cfg.feeds.request_timeout_ms);
        let coingecko = Arc::new(CoinGeckoClient::new(&cfg.coingecko, timeout)?);
        let binance = Arc::new(BinanceClient::new(&cfg.binance, timeout)?);
        info!(
            coingecko = %coingecko.base_url,
            binance = %binance.rest_url,
            ws = %binance.ws_url,
            "Market data router configured"
        );
        Ok(Self::with_providers(
            coingecko.clone(),
            coingecko,
            binance,
            Arc::new(TungsteniteTransport),
            cfg,
        ))
    }

    pub fn with_providers(
        assets: Arc<dyn AssetInfoProvider>,
        markets: Arc<dyn MarketListProvider>,
        exchange: Arc<dyn ExchangeProvider>,
        transport: Arc<dyn StreamTransport>,
        cfg: &AppConfig,
    ) -> Self {
        let ctx = FeedContext {
            resolver: SymbolResolver::new(assets.clone(), exchange.clone()),
            fetcher: SnapshotFetcher::new(assets, exchange.clone(), markets),
            exchange,
            transport,
            max_candles: cfg.feeds.max_candles,
        };
        Self {
            ctx: Arc::new(ctx),
            vs_currency: cfg.feeds.vs_currency.to_lowercase(),
            page_size: cfg.feeds.page_size,
        }
    }

    pub fn context(&self) -> Arc<FeedContext> {
        Arc::clone(&self.ctx)
    }

    pub fn default_vs_currency(&self) -> &str {
        &self.vs_currency
    }

    pub fn kline_feed(&self, asset_id: &str, vs_currency: Option<&str>, range: RangeToken) -> KlineFeed {
        KlineFeed::new(self.context(), asset_id, vs_currency.unwrap_or(&self.vs_currency), range)
    }

    pub fn info_feed(&self, asset_id: &str, vs_currency: Option<&str>) -> InfoFeed {
        InfoFeed::new(self.context(), asset_id, vs_currency.unwrap_or(&self.vs_currency))
    }

    pub fn ticker_feed(&self, symbols: Vec<String>, vs_currency: Option<&str>) -> TickerFeed {
        TickerFeed::new(self.context(), symbols, vs_currency.unwrap_or(&self.vs_currency))
    }

    pub fn screener(&self, page_size: Option<u32>, vs_currency: Option<&str>, filter: SortFilter) -> Screener {
        let key = PageKey {
            page_size: page_size.unwrap_or(self.page_size),
            vs_currency: vs_currency.unwrap_or(&self.vs_currency).to_lowercase(),
            filter,
        };
        Screener::new(self.context(), key)
    }
}
