use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MarketDataError;

pub const MS_IN_MIN: u64 = 60_000;
pub const MS_IN_H: u64 = 60 * MS_IN_MIN;
pub const MS_IN_D: u64 = 24 * MS_IN_H;

// Canonical asset as known by the asset-info provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetIdentity {
    pub id: String,     // e.g. "bitcoin"
    pub symbol: String, // e.g. "btc"
    pub name: String,   // e.g. "Bitcoin"
}

// Base/quote combination the exchange actually lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingPair {
    pub base: String,            // "BTC"
    pub quote: String,           // "USDT"
    pub exchange_symbol: String, // "BTCUSDT"
}

impl TradingPair {
    pub fn stream_name(&self) -> String {
        self.exchange_symbol.to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: u64, // open time, ms
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
    pub market_cap: Option<f64>,
}

impl Candle {
    // Close-only sample: the chart endpoint gives one price per point
    pub fn from_close(timestamp: u64, close: f64) -> Self {
        Self {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            volume: None,
            market_cap: None,
        }
    }
}

// One parsed kline message from the stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KlineTick {
    pub open_time: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
}

impl From<KlineTick> for Candle {
    fn from(t: KlineTick) -> Self {
        Candle {
            timestamp: t.open_time,
            open: t.open,
            high: t.high,
            low: t.low,
            close: t.close,
            volume: t.volume,
            market_cap: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub symbol: String,
    pub price: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub prev_close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub timestamp: u64,
}

// The subset of ticker fields a stream tick carries
#[derive(Debug, Clone, PartialEq)]
pub struct TickerPatch {
    pub symbol: String, // exchange symbol, e.g. "BTCUSDT"
    pub price: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
}

impl TickerSnapshot {
    pub fn apply_patch(&mut self, patch: &TickerPatch) {
        self.price = patch.price;
        self.price_change = patch.price_change;
        self.price_change_percent = patch.price_change_percent;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Live,
    Degraded, // REST-only
    Closed,   // terminal
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketRow {
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
    pub sparkline_7d: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssetMarketData {
    pub current_price: HashMap<String, f64>,
    pub market_cap: HashMap<String, f64>,
    pub total_volume: HashMap<String, f64>,
    pub high_24h: HashMap<String, f64>,
    pub low_24h: HashMap<String, f64>,
    pub price_change_24h: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssetInfo {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub image: Option<String>,
    pub market_data: AssetMarketData,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub links: Vec<String>,
    pub developer_data: Option<serde_json::Value>,
    pub community_data: Option<serde_json::Value>,
}

impl AssetInfo {
    pub fn identity(&self) -> AssetIdentity {
        AssetIdentity {
            id: self.id.clone(),
            symbol: self.symbol.clone(),
            name: self.name.clone(),
        }
    }
}

/// Display range for the pair chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RangeToken {
    #[default]
    OneDay,
    OneWeek,
    OneMonth,
    ThreeMonths,
    OneYear,
    FiveYears,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookback {
    Days(u32),
    Max,
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookback::Days(d) => write!(f, "{}", d),
            Lookback::Max => write!(f, "max"),
        }
    }
}

impl RangeToken {
    pub const ALL: [RangeToken; 7] = [
        RangeToken::OneDay,
        RangeToken::OneWeek,
        RangeToken::OneMonth,
        RangeToken::ThreeMonths,
        RangeToken::OneYear,
        RangeToken::FiveYears,
        RangeToken::Max,
    ];

    pub fn lookback(&self) -> Lookback {
        match self {
            RangeToken::OneDay => Lookback::Days(1),
            RangeToken::OneWeek => Lookback::Days(7),
            RangeToken::OneMonth => Lookback::Days(30),
            RangeToken::ThreeMonths => Lookback::Days(90),
            RangeToken::OneYear => Lookback::Days(365),
            RangeToken::FiveYears => Lookback::Days(1825),
            RangeToken::Max => Lookback::Max,
        }
    }

    /// Period covered by one candle, in ms.
    pub fn granularity_ms(&self) -> u64 {
        match self {
            RangeToken::OneDay => MS_IN_MIN,
            RangeToken::OneWeek => 15 * MS_IN_MIN,
            RangeToken::OneMonth => MS_IN_H,
            RangeToken::ThreeMonths => 4 * MS_IN_H,
            RangeToken::OneYear => MS_IN_D,
            RangeToken::FiveYears => 7 * MS_IN_D,
            // Monthly klines open on the 1st, so the boundary is the shortest month
            RangeToken::Max => 28 * MS_IN_D,
        }
    }

    // Exchange kline interval matching the granularity
    pub fn stream_interval(&self) -> &'static str {
        match self {
            RangeToken::OneDay => "1m",
            RangeToken::OneWeek => "15m",
            RangeToken::OneMonth => "1h",
            RangeToken::ThreeMonths => "4h",
            RangeToken::OneYear => "1d",
            RangeToken::FiveYears => "1w",
            RangeToken::Max => "1M",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RangeToken::OneDay => "1D",
            RangeToken::OneWeek => "1W",
            RangeToken::OneMonth => "1M",
            RangeToken::ThreeMonths => "3M",
            RangeToken::OneYear => "1Y",
            RangeToken::FiveYears => "5Y",
            RangeToken::Max => "Max",
        }
    }
}

impl fmt::Display for RangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RangeToken {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "1M" is a month, so matching stays case-sensitive apart from "max"
        match s {
            "1D" | "1d" => Ok(RangeToken::OneDay),
            "1W" | "1w" => Ok(RangeToken::OneWeek),
            "1M" => Ok(RangeToken::OneMonth),
            "3M" => Ok(RangeToken::ThreeMonths),
            "1Y" | "1y" => Ok(RangeToken::OneYear),
            "5Y" | "5y" => Ok(RangeToken::FiveYears),
            other if other.eq_ignore_ascii_case("max") => Ok(RangeToken::Max),
            other => Err(MarketDataError::InvalidArgument(format!(
                "unknown range '{}', expected one of 1D, 1W, 1M, 3M, 1Y, 5Y, Max",
                other
            ))),
        }
    }
}

/// Sort key for the screener listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortFilter {
    #[default]
    MarketCapDesc,
    MarketCapAsc,
    VolumeDesc,
    VolumeAsc,
    IdAsc,
    IdDesc,
}

impl SortFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortFilter::MarketCapDesc => "market_cap_desc",
            SortFilter::MarketCapAsc => "market_cap_asc",
            SortFilter::VolumeDesc => "volume_desc",
            SortFilter::VolumeAsc => "volume_asc",
            SortFilter::IdAsc => "id_asc",
            SortFilter::IdDesc => "id_desc",
        }
    }
}

impl fmt::Display for SortFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortFilter {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "market_cap_desc" => Ok(SortFilter::MarketCapDesc),
            "market_cap_asc" => Ok(SortFilter::MarketCapAsc),
            "volume_desc" => Ok(SortFilter::VolumeDesc),
            "volume_asc" => Ok(SortFilter::VolumeAsc),
            "id_asc" => Ok(SortFilter::IdAsc),
            "id_desc" => Ok(SortFilter::IdDesc),
            other => Err(MarketDataError::InvalidArgument(format!(
                "unknown sort filter '{}'",
                other
            ))),
        }
    }
}
