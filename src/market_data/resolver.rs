use std::sync::Arc;

use ahash::AHashSet;
use smallvec::{smallvec, SmallVec};
use tracing::{debug, info, instrument};

use crate::engine::types::{AssetIdentity, TradingPair};
use crate::error::{MarketDataError, MarketResult};
use crate::market_data::adapters::{AssetInfoProvider, ExchangeProvider};

pub const FALLBACK_QUOTE: &str = "USDT";

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub identity: AssetIdentity,
    pub pair: Option<TradingPair>, // None => REST-only
}

/// Maps canonical asset ids to exchange trading pairs.
pub struct SymbolResolver {
    assets: Arc<dyn AssetInfoProvider>,
    exchange: Arc<dyn ExchangeProvider>,
}

/// `BASE+QUOTE` first, then `BASE+USDT`; first listed candidate wins.
pub fn match_pair(base: &str, quote: &str, symbols: &AHashSet<String>) -> Option<TradingPair> {
    let base = base.trim().to_uppercase();
    if base.is_empty() {
        return None;
    }
    let quotes: SmallVec<[String; 2]> = smallvec![quote.trim().to_uppercase(), FALLBACK_QUOTE.to_string()];
    quotes.into_iter().find_map(|q| {
        let candidate = format!("{}{}", base, q);
        symbols.contains(&candidate).then(|| TradingPair {
            base: base.clone(),
            quote: q,
            exchange_symbol: candidate,
        })
    })
}

/// `BASE+USDT` for every base, used unchecked when the symbol list is
/// unavailable.
pub fn assumed_pairs(bases: &[String]) -> Vec<(String, TradingPair)> {
    bases
        .iter()
        .map(|b| b.trim())
        .filter(|b| !b.is_empty())
        .map(|b| {
            let base = b.to_uppercase();
            let pair = TradingPair {
                exchange_symbol: format!("{}{}", base, FALLBACK_QUOTE),
                base,
                quote: FALLBACK_QUOTE.to_string(),
            };
            (b.to_lowercase(), pair)
        })
        .collect()
}

impl SymbolResolver {
    pub fn new(assets: Arc<dyn AssetInfoProvider>, exchange: Arc<dyn ExchangeProvider>) -> Self {
        Self { assets, exchange }
    }

    pub async fn exchange_symbols(&self) -> MarketResult<AHashSet<String>> {
        self.exchange.exchange_symbols().await
    }

    /// Asset metadata and the exchange symbol set are fetched concurrently;
    /// either failing fails the whole resolution. No retry.
    #[instrument(skip(self))]
    pub async fn resolve(&self, asset_id: &str, quote: &str) -> MarketResult<Resolution> {
        if asset_id.trim().is_empty() {
            return Err(MarketDataError::InvalidArgument("asset id is empty".into()));
        }
        let (info, symbols) = tokio::try_join!(
            self.assets.asset_info(asset_id),
            self.exchange.exchange_symbols()
        )?;
        let identity = info.identity();
        let pair = match_pair(&identity.symbol, quote, &symbols);
        match &pair {
            Some(p) => info!(asset = %identity.id, pair = %p.exchange_symbol, "Resolved trading pair"),
            None => info!(asset = %identity.id, "No exchange pair, REST-only"),
        }
        Ok(Resolution { identity, pair })
    }

    /// Resolve a batch of base symbols with a single symbol-set fetch.
    /// Bases without a listed pair are left out.
    #[instrument(skip(self))]
    pub async fn pairs_for(&self, bases: &[String], quote: &str) -> MarketResult<Vec<(String, TradingPair)>> {
        let symbols = self.exchange.exchange_symbols().await?;
        let pairs: Vec<(String, TradingPair)> = bases
            .iter()
            .filter_map(|b| match_pair(b, quote, &symbols).map(|p| (b.to_lowercase(), p)))
            .collect();
        debug!(requested = bases.len(), resolved = pairs.len(), "Resolved ticker pairs");
        Ok(pairs)
    }
}
