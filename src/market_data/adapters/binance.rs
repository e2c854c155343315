// Binance spot adapter: exchangeInfo + 24h tickers over REST, stream URLs for WS

use std::time::Duration;

use ahash::AHashSet;
use tracing::{debug, instrument, warn};

use super::binance_types::{ExchangeInfo, Ticker24h};
use super::ExchangeProvider;
use crate::config::BinanceConfig;
use crate::engine::types::TickerSnapshot;
use crate::error::MarketResult;
use crate::market_data::http::{build_client, get_json};
use crate::market_data::normaliser::ticker_from_rest;

pub struct BinanceClient {
    http: reqwest::Client,
    pub rest_url: String, // "https://api.binance.com"
    pub ws_url: String,   // "wss://stream.binance.com:9443"
}

impl BinanceClient {
    pub fn new(cfg: &BinanceConfig, timeout: Duration) -> MarketResult<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            rest_url: cfg.rest_url.trim_end_matches('/').to_string(),
            ws_url: cfg.ws_url.trim_end_matches('/').to_string(),
        })
    }
}

pub fn build_stream_url(ws_url: &str, streams: &[String]) -> String {
    match streams {
        [single] => format!("{}/ws/{}", ws_url, single),
        many => format!("{}/stream?streams={}", ws_url, many.join("/")),
    }
}

#[async_trait::async_trait]
impl ExchangeProvider for BinanceClient {
    #[instrument(skip(self))]
    async fn exchange_symbols(&self) -> MarketResult<AHashSet<String>> {
        let url = format!("{}/api/v3/exchangeInfo", self.rest_url);
        let info: ExchangeInfo = get_json(self.http.get(&url), "exchange_info").await?;
        let symbols: AHashSet<String> = info
            .symbols
            .into_iter()
            .filter(|s| s.status.as_deref().unwrap_or("TRADING") == "TRADING")
            .map(|s| s.symbol.to_uppercase())
            .collect();
        debug!(count = symbols.len(), "Fetched tradable symbols");
        Ok(symbols)
    }

    #[instrument(skip(self), fields(count = symbols.len()))]
    async fn ticker_24h(&self, symbols: &[String]) -> MarketResult<Vec<TickerSnapshot>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/v3/ticker/24hr", self.rest_url);
        let encoded = serde_json::to_string(symbols)?;
        let raw: Vec<Ticker24h> =
            get_json(self.http.get(&url).query(&[("symbols", encoded)]), "ticker_24h").await?;

        let mut out = Vec::with_capacity(raw.len());
        for t in &raw {
            match ticker_from_rest(t) {
                Ok(snap) => out.push(snap),
                Err(e) => warn!(symbol = %t.symbol, error = %e, "Skipping malformed ticker"),
            }
        }
        Ok(out)
    }

    fn stream_url(&self, streams: &[String]) -> String {
        build_stream_url(&self.ws_url, streams)
    }
}
