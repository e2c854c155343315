// Convert wire payloads (decimal strings, wrapped frames) into domain values.

use crate::engine::types::{KlineTick, TickerPatch, TickerSnapshot};
use crate::error::{MarketDataError, MarketResult};
use crate::market_data::adapters::binance_types::{Ticker24h, WsFrame, WsKlineEvent, WsTickerEvent};

pub fn parse_decimal(field: &str, raw: &str) -> MarketResult<f64> {
    let value: f64 = raw.trim().parse().map_err(|_| {
        MarketDataError::InsufficientData(format!("{} is not a number: '{}'", field, raw))
    })?;
    if !value.is_finite() {
        return Err(MarketDataError::InsufficientData(format!(
            "{} is not finite: '{}'",
            field, raw
        )));
    }
    Ok(value)
}

pub fn parse_kline_message(text: &str) -> MarketResult<KlineTick> {
    let event = serde_json::from_str::<WsFrame<WsKlineEvent>>(text)?.into_inner();
    if event.event_type != "kline" {
        return Err(MarketDataError::Stream(format!(
            "expected kline event, got '{}'",
            event.event_type
        )));
    }
    let k = event.kline;
    Ok(KlineTick {
        open_time: k.open_time,
        open: parse_decimal("open", &k.open)?,
        high: parse_decimal("high", &k.high)?,
        low: parse_decimal("low", &k.low)?,
        close: parse_decimal("close", &k.close)?,
        volume: Some(parse_decimal("volume", &k.volume)?),
    })
}

pub fn parse_ticker_message(text: &str) -> MarketResult<TickerPatch> {
    let event = serde_json::from_str::<WsFrame<WsTickerEvent>>(text)?.into_inner();
    if event.event_type != "24hrTicker" {
        return Err(MarketDataError::Stream(format!(
            "expected 24hrTicker event, got '{}'",
            event.event_type
        )));
    }
    Ok(TickerPatch {
        symbol: event.symbol,
        price: parse_decimal("c", &event.last_price)?,
        price_change: parse_decimal("p", &event.price_change)?,
        price_change_percent: parse_decimal("P", &event.price_change_percent)?,
    })
}

pub fn ticker_from_rest(raw: &Ticker24h) -> MarketResult<TickerSnapshot> {
    Ok(TickerSnapshot {
        symbol: raw.symbol.clone(),
        price: parse_decimal("lastPrice", &raw.last_price)?,
        price_change: parse_decimal("priceChange", &raw.price_change)?,
        price_change_percent: parse_decimal("priceChangePercent", &raw.price_change_percent)?,
        high: parse_decimal("highPrice", &raw.high_price)?,
        low: parse_decimal("lowPrice", &raw.low_price)?,
        open: parse_decimal("openPrice", &raw.open_price)?,
        prev_close: parse_decimal("prevClosePrice", &raw.prev_close_price)?,
        volume: parse_decimal("volume", &raw.volume)?,
        quote_volume: parse_decimal("quoteVolume", &raw.quote_volume)?,
        timestamp: raw.close_time,
    })
}
