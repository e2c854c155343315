use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::engine::types::{AssetInfo, ConnectionState, TickerPatch, TradingPair};
use crate::error::MarketResult;
use crate::feeds::stream::{enter_degraded, run_subscription, until_shutdown, SubscriptionExit};
use crate::feeds::{mark_closed, state_channel, FeedContext, FeedState, FeedTask, StateTx};
use crate::market_data::normaliser::parse_ticker_message;
use crate::market_data::resolver::{match_pair, FALLBACK_QUOTE};

/// Full asset info, with the headline price kept live from the ticker stream.
pub struct InfoFeed {
    ctx: Arc<FeedContext>,
    asset_id: String,
    vs_currency: String,
    state: StateTx<Option<AssetInfo>>,
    task: Option<FeedTask>,
}

/// Which `current_price` entry a pair's ticks belong to. A USDT pair stands
/// in for USD.
fn price_key(pair: &TradingPair, vs_currency: &str) -> String {
    let quote = pair.quote.to_uppercase();
    if quote == vs_currency.to_uppercase() || (quote == FALLBACK_QUOTE && vs_currency.eq_ignore_ascii_case("usd")) {
        vs_currency.to_lowercase()
    } else {
        quote.to_lowercase()
    }
}

fn patch_info(info: &mut AssetInfo, key: &str, patch: &TickerPatch) {
    info.market_data.current_price.insert(key.to_string(), patch.price);
    info.market_data.price_change_24h = Some(patch.price_change);
    info.market_data.price_change_percentage_24h = Some(patch.price_change_percent);
}

impl InfoFeed {
    pub fn new(ctx: Arc<FeedContext>, asset_id: impl Into<String>, vs_currency: impl Into<String>) -> Self {
        Self {
            ctx,
            asset_id: asset_id.into(),
            vs_currency: vs_currency.into().to_lowercase(),
            state: state_channel(None),
            task: None,
        }
    }

    pub fn state(&self) -> FeedState<Option<AssetInfo>> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState<Option<AssetInfo>>> {
        self.state.subscribe()
    }

    pub fn start(&mut self) {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
            s.connection = ConnectionState::Connecting;
        });
        let run = InfoRun {
            ctx: Arc::clone(&self.ctx),
            asset_id: self.asset_id.clone(),
            vs_currency: self.vs_currency.clone(),
            state: Arc::clone(&self.state),
        };
        self.task = Some(FeedTask::spawn(move |shutdown| run.run(shutdown)));
    }

    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop().await;
        }
        mark_closed(&self.state);
    }
}

struct InfoRun {
    ctx: Arc<FeedContext>,
    asset_id: String,
    vs_currency: String,
    state: StateTx<Option<AssetInfo>>,
}

impl InfoRun {
    #[instrument(name = "info_feed", skip_all, fields(asset = %self.asset_id))]
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.asset_id.trim().is_empty() {
            self.state.send_modify(|s| {
                s.loading = false;
                s.error = Some("asset id is empty".into());
                s.connection = ConnectionState::Closed;
            });
            return;
        }

        // The info response doubles as the resolver's identity lookup.
        let initial = until_shutdown(&mut shutdown, async {
            tokio::join!(
                self.ctx.fetcher.fetch_asset_info(&self.asset_id),
                self.ctx.resolver.exchange_symbols()
            )
        })
        .await;
        let Some((info, symbols)) = initial else {
            return;
        };

        let symbol = info.as_ref().ok().map(|i| i.symbol.clone());
        self.apply_snapshot(info, true);

        let pair = match (symbol, symbols) {
            (Some(symbol), Ok(symbols)) => match_pair(&symbol, &self.vs_currency, &symbols),
            (_, Err(e)) => {
                warn!(error = %e, "Exchange symbol list unavailable, staying on REST data");
                None
            }
            (None, Ok(_)) => None,
        };
        let Some(pair) = pair else {
            info!("No live pair for asset");
            self.state.send_modify(|s| s.connection = ConnectionState::Degraded);
            return;
        };

        let key = price_key(&pair, &self.vs_currency);
        let url = self.ctx.exchange.stream_url(&[format!("{}@ticker", pair.stream_name())]);
        let exit = run_subscription(
            self.ctx.transport.as_ref(),
            &url,
            &self.state,
            &mut shutdown,
            |info: &mut Option<AssetInfo>, text: &str| {
                let patch = parse_ticker_message(text)?;
                match info.as_mut() {
                    Some(info) => {
                        patch_info(info, &key, &patch);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            },
        )
        .await;

        if let SubscriptionExit::Recover(recovery) = exit {
            enter_degraded(&self.state, &recovery);
            if let Some(info) = until_shutdown(&mut shutdown, self.ctx.fetcher.fetch_asset_info(&self.asset_id)).await {
                self.apply_snapshot(info, false);
            }
        }
    }

    fn apply_snapshot(&self, info: MarketResult<AssetInfo>, initial: bool) {
        match info {
            Ok(info) => self.state.send_modify(|s| {
                s.data = Some(info);
                s.loading = false;
                if initial {
                    s.error = None;
                }
            }),
            Err(e) => {
                warn!(error = %e, initial, "Asset info fetch failed");
                self.state.send_modify(|s| {
                    s.loading = false;
                    if initial {
                        s.error = Some(e.to_string());
                    }
                });
            }
        }
    }
}
