// Market data module entrypoint
pub mod adapters;   // upstream providers (CoinGecko REST, Binance REST + ws)
pub mod http;       // shared reqwest plumbing
pub mod normaliser; // converts wire strings -> ticks/snapshots
pub mod resolver;   // asset id -> exchange trading pair
pub mod router;     // wires providers into feeds
pub mod snapshot;   // one-shot REST datasets
