//! Runtime configuration.
//!
//! Layering (later wins): built-in defaults, optional `cryptodash.toml`
//! (or the file passed on the command line), then `CRYPTODASH__*`
//! environment variables, e.g. `CRYPTODASH__COINGECKO__API_KEY`.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::MarketResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub coingecko: CoinGeckoConfig,
    pub binance: BinanceConfig,
    pub feeds: FeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinGeckoConfig {
    pub base_url: String,
    /// Empty => requests go out without the key header.
    pub api_key: String,
    pub api_key_header: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    pub rest_url: String,
    pub ws_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub vs_currency: String,
    pub max_candles: usize,
    pub page_size: u32,
    pub request_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            coingecko: CoinGeckoConfig {
                base_url: "https://api.coingecko.com/api/v3".into(),
                api_key: String::new(),
                api_key_header: "x-cg-demo-api-key".into(),
            },
            binance: BinanceConfig {
                rest_url: "https://api.binance.com".into(),
                ws_url: "wss://stream.binance.com:9443".into(),
            },
            feeds: FeedConfig {
                vs_currency: "usd".into(),
                max_candles: 1500,
                page_size: 20,
                request_timeout_ms: 10_000,
            },
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&str>) -> MarketResult<Self> {
        let file = path.unwrap_or("cryptodash");
        let settings = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name(file).required(path.is_some()))
            .add_source(
                Environment::with_prefix("CRYPTODASH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
