// Source: https://docs.coingecko.com/reference (v3)
// Numbers can be null anywhere, so most fields are optional.
use std::collections::HashMap;

use serde::Deserialize;

// GET /coins/{id}
#[derive(Debug, Deserialize)]
pub struct CoinResponse {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<CoinImage>,
    #[serde(default)]
    pub market_data: Option<CoinMarketData>,
    #[serde(default)]
    pub description: HashMap<String, Option<String>>,
    #[serde(default)]
    pub links: Option<CoinLinks>,
    #[serde(default)]
    pub developer_data: Option<serde_json::Value>,
    #[serde(default)]
    pub community_data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct CoinImage {
    pub thumb: Option<String>,
    pub small: Option<String>,
    pub large: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CoinMarketData {
    #[serde(default)]
    pub current_price: HashMap<String, Option<f64>>,
    #[serde(default)]
    pub market_cap: HashMap<String, Option<f64>>,
    #[serde(default)]
    pub total_volume: HashMap<String, Option<f64>>,
    #[serde(default)]
    pub high_24h: HashMap<String, Option<f64>>,
    #[serde(default)]
    pub low_24h: HashMap<String, Option<f64>>,
    pub price_change_24h: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CoinLinks {
    #[serde(default)]
    pub homepage: Vec<String>,
    #[serde(default)]
    pub blockchain_site: Vec<String>,
    #[serde(default)]
    pub official_forum_url: Vec<String>,
    #[serde(default)]
    pub subreddit_url: Option<String>,
}

// GET /coins/{id}/market_chart -> [[ts_ms, value], ...]
#[derive(Debug, Deserialize)]
pub struct MarketChartResponse {
    #[serde(default)]
    pub prices: Vec<(f64, Option<f64>)>,
    #[serde(default)]
    pub market_caps: Vec<(f64, Option<f64>)>,
    #[serde(default)]
    pub total_volumes: Vec<(f64, Option<f64>)>,
}

// GET /coins/markets
#[derive(Debug, Deserialize)]
pub struct MarketsItem {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub image: Option<String>,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub market_cap_rank: Option<u32>,
    pub total_volume: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    pub sparkline_in_7d: Option<Sparkline>,
}

#[derive(Debug, Deserialize)]
pub struct Sparkline {
    #[serde(default)]
    pub price: Vec<Option<f64>>,
}

// GET /coins/list, only counted, so entries are skipped unparsed
pub type CoinList = Vec<serde::de::IgnoredAny>;
