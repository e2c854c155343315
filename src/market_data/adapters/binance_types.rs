// Source: https://developers.binance.com/docs/binance-spot-api-docs
// Prices and sizes arrive as decimal strings; the normaliser turns them into f64.
use serde::Deserialize;

// REST GET /api/v3/exchangeInfo
#[derive(Debug, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: Option<String>,
}

// REST GET /api/v3/ticker/24hr?symbols=[...]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    pub price_change: String,
    pub price_change_percent: String,
    pub last_price: String,
    pub high_price: String,
    pub low_price: String,
    pub open_price: String,
    pub prev_close_price: String,
    pub volume: String,
    pub quote_volume: String,
    pub close_time: u64,
}

// WS <symbol>@kline_<interval> (only the fields a tick needs)
#[derive(Debug, Deserialize)]
pub struct WsKlineEvent {
    #[serde(rename = "e")]
    pub event_type: String, // "kline"
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: WsKline,
}

#[derive(Debug, Deserialize)]
pub struct WsKline {
    #[serde(rename = "t")]
    pub open_time: u64,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "v")]
    pub volume: String,
}

// WS <symbol>@ticker (only the fields we patch)
#[derive(Debug, Deserialize)]
pub struct WsTickerEvent {
    #[serde(rename = "e")]
    pub event_type: String, // "24hrTicker"
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price_change: String,
    #[serde(rename = "P")]
    pub price_change_percent: String,
    #[serde(rename = "c")]
    pub last_price: String,
}

// Combined streams wrap every payload: {"stream": "...", "data": {...}}
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WsFrame<T> {
    Combined { data: T },
    Raw(T),
}

impl<T> WsFrame<T> {
    pub fn into_inner(self) -> T {
        match self {
            WsFrame::Combined { data } => data,
            WsFrame::Raw(data) => data,
        }
    }
}
