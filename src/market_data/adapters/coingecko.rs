// CoinGecko adapter: asset info, market charts and the paginated market listing

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, instrument};

use super::coingecko_types::{CoinList, CoinResponse, MarketChartResponse, MarketsItem};
use super::{AssetInfoProvider, MarketChart, MarketListProvider};
use crate::config::CoinGeckoConfig;
use crate::engine::page_cache::PageKey;
use crate::engine::types::{AssetInfo, AssetMarketData, Lookback, MarketRow};
use crate::error::MarketResult;
use crate::market_data::http::{build_client, get_json};

pub struct CoinGeckoClient {
    http: reqwest::Client,
    pub base_url: String, // "https://api.coingecko.com/api/v3"
    api_key: String,
    api_key_header: String,
}

impl CoinGeckoClient {
    pub fn new(cfg: &CoinGeckoConfig, timeout: Duration) -> MarketResult<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            api_key_header: cfg.api_key_header.clone(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.http.get(format!("{}{}", self.base_url, path));
        if self.api_key.is_empty() {
            req
        } else {
            req.header(self.api_key_header.as_str(), self.api_key.as_str())
        }
    }
}

fn flatten(map: HashMap<String, Option<f64>>) -> HashMap<String, f64> {
    map.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))).collect()
}

fn samples(raw: Vec<(f64, Option<f64>)>) -> Vec<(u64, f64)> {
    raw.into_iter()
        .filter_map(|(ts, v)| match v {
            Some(v) if ts >= 0.0 && v.is_finite() => Some((ts as u64, v)),
            _ => None,
        })
        .collect()
}

pub(crate) fn asset_info_from_coin(coin: CoinResponse) -> AssetInfo {
    let market = coin.market_data.unwrap_or_default();
    let links = coin.links.unwrap_or_default();
    let homepage = links.homepage.iter().find(|u| !u.is_empty()).cloned();
    let mut all_links: Vec<String> = links
        .homepage
        .into_iter()
        .chain(links.blockchain_site)
        .chain(links.official_forum_url)
        .chain(links.subreddit_url)
        .filter(|u| !u.is_empty())
        .collect();
    all_links.dedup();

    AssetInfo {
        id: coin.id,
        symbol: coin.symbol,
        name: coin.name,
        image: coin.image.and_then(|i| i.large.or(i.small).or(i.thumb)),
        market_data: AssetMarketData {
            current_price: flatten(market.current_price),
            market_cap: flatten(market.market_cap),
            total_volume: flatten(market.total_volume),
            high_24h: flatten(market.high_24h),
            low_24h: flatten(market.low_24h),
            price_change_24h: market.price_change_24h,
            price_change_percentage_24h: market.price_change_percentage_24h,
        },
        description: coin
            .description
            .get("en")
            .cloned()
            .flatten()
            .filter(|d| !d.is_empty()),
        homepage,
        links: all_links,
        developer_data: coin.developer_data,
        community_data: coin.community_data,
    }
}

pub(crate) fn row_from_market(item: MarketsItem) -> MarketRow {
    MarketRow {
        id: item.id,
        symbol: item.symbol,
        name: item.name,
        image: item.image,
        current_price: item.current_price,
        market_cap: item.market_cap,
        market_cap_rank: item.market_cap_rank,
        total_volume: item.total_volume,
        high_24h: item.high_24h,
        low_24h: item.low_24h,
        price_change_percentage_24h: item.price_change_percentage_24h,
        sparkline_7d: item
            .sparkline_in_7d
            .map(|s| s.price.into_iter().flatten().collect()),
    }
}

#[async_trait::async_trait]
impl AssetInfoProvider for CoinGeckoClient {
    #[instrument(skip(self))]
    async fn asset_info(&self, id: &str) -> MarketResult<AssetInfo> {
        let req = self.get(&format!("/coins/{}", id)).query(&[
            ("localization", "false"),
            ("tickers", "false"),
            ("market_data", "true"),
            ("community_data", "true"),
            ("developer_data", "true"),
            ("sparkline", "false"),
        ]);
        let coin: CoinResponse = get_json(req, "coin_info").await?;
        Ok(asset_info_from_coin(coin))
    }

    #[instrument(skip(self))]
    async fn market_chart(
        &self,
        id: &str,
        vs_currency: &str,
        lookback: Lookback,
    ) -> MarketResult<MarketChart> {
        let req = self
            .get(&format!("/coins/{}/market_chart", id))
            .query(&[("vs_currency", vs_currency.to_string()), ("days", lookback.to_string())]);
        let raw: MarketChartResponse = get_json(req, "market_chart").await?;
        let chart = MarketChart {
            prices: samples(raw.prices),
            market_caps: samples(raw.market_caps),
            total_volumes: samples(raw.total_volumes),
        };
        debug!(points = chart.prices.len(), "Fetched market chart");
        Ok(chart)
    }
}

#[async_trait::async_trait]
impl MarketListProvider for CoinGeckoClient {
    #[instrument(skip(self, key), fields(page_size = key.page_size, vs = %key.vs_currency))]
    async fn markets_page(&self, page: u32, key: &PageKey) -> MarketResult<Vec<MarketRow>> {
        let req = self.get("/coins/markets").query(&[
            ("vs_currency", key.vs_currency.clone()),
            ("order", key.filter.as_str().to_string()),
            ("per_page", key.page_size.to_string()),
            ("page", page.to_string()),
            ("sparkline", "true".to_string()),
            ("price_change_percentage", "24h".to_string()),
        ]);
        let items: Vec<MarketsItem> = get_json(req, "markets").await?;
        Ok(items.into_iter().map(row_from_market).collect())
    }

    #[instrument(skip(self))]
    async fn listed_count(&self) -> MarketResult<u64> {
        let list: CoinList = get_json(self.get("/coins/list"), "coins_list").await?;
        Ok(list.len() as u64)
    }
}
