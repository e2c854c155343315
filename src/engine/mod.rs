// Pure in-memory state: no I/O in here
pub mod types;      // candles, tickers, ranges, market rows
pub mod candles;    // candle series + tick folding
pub mod tickers;    // ticker snapshots keyed by base symbol
pub mod page_cache; // screener page cache
