use std::collections::HashMap;
use std::sync::Arc;

use itertools::Itertools;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::engine::tickers::TickerBoard;
use crate::engine::types::{ConnectionState, TickerSnapshot};
use crate::error::MarketResult;
use crate::feeds::stream::{enter_degraded, run_subscription, until_shutdown, SubscriptionExit};
use crate::feeds::{mark_closed, state_channel, FeedContext, FeedState, FeedTask, StateTx};
use crate::market_data::normaliser::parse_ticker_message;
use crate::market_data::resolver::assumed_pairs;

/// 24h ticker stats for a set of base symbols, kept live through one
/// combined ticker stream.
pub struct TickerFeed {
    ctx: Arc<FeedContext>,
    symbols: Vec<String>,
    vs_currency: String,
    state: StateTx<TickerBoard>,
    task: Option<FeedTask>,
}

impl TickerFeed {
    pub fn new(ctx: Arc<FeedContext>, symbols: Vec<String>, vs_currency: impl Into<String>) -> Self {
        let symbols = symbols
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unique()
            .collect();
        Self {
            ctx,
            symbols,
            vs_currency: vs_currency.into().to_lowercase(),
            state: state_channel(TickerBoard::new()),
            task: None,
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn state(&self) -> FeedState<TickerBoard> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState<TickerBoard>> {
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
        let run = TickerRun {
            ctx: Arc::clone(&self.ctx),
            symbols: self.symbols.clone(),
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

struct TickerRun {
    ctx: Arc<FeedContext>,
    symbols: Vec<String>,
    vs_currency: String,
    state: StateTx<TickerBoard>,
}

impl TickerRun {
    #[instrument(name = "ticker_feed", skip_all, fields(symbols = self.symbols.len()))]
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.symbols.is_empty() {
            self.state.send_modify(|s| {
                s.loading = false;
                s.connection = ConnectionState::Closed;
            });
            return;
        }

        let resolved = until_shutdown(
            &mut shutdown,
            self.ctx.resolver.pairs_for(&self.symbols, &self.vs_currency),
        )
        .await;
        let pairs = match resolved {
            None => return,
            Some(Ok(pairs)) => pairs,
            Some(Err(e)) => {
                // Without the symbol list there is nothing to stream; guess USDT pairs for the REST board
                warn!(error = %e, "Could not resolve ticker pairs, fetching assumed USDT pairs");
                let pairs = assumed_pairs(&self.symbols);
                if let Some(snapshot) = until_shutdown(&mut shutdown, self.ctx.fetcher.fetch_tickers(&pairs)).await {
                    self.apply_snapshot(snapshot, true);
                    self.state.send_modify(|s| s.connection = ConnectionState::Degraded);
                }
                return;
            }
        };
        if pairs.is_empty() {
            info!("None of the requested symbols trade on the exchange");
            self.state.send_modify(|s| {
                s.loading = false;
                s.connection = ConnectionState::Degraded;
            });
            return;
        }

        let Some(snapshot) = until_shutdown(&mut shutdown, self.ctx.fetcher.fetch_tickers(&pairs)).await else {
            return;
        };
        self.apply_snapshot(snapshot, true);

        let streams: Vec<String> = pairs
            .iter()
            .map(|(_, p)| format!("{}@ticker", p.stream_name()))
            .unique()
            .collect();
        let url = self.ctx.exchange.stream_url(&streams);
        let exit = run_subscription(
            self.ctx.transport.as_ref(),
            &url,
            &self.state,
            &mut shutdown,
            |board: &mut TickerBoard, text: &str| {
                let patch = parse_ticker_message(text)?;
                Ok(board.apply_patch(&patch))
            },
        )
        .await;

        if let SubscriptionExit::Recover(recovery) = exit {
            enter_degraded(&self.state, &recovery);
            if let Some(snapshot) = until_shutdown(&mut shutdown, self.ctx.fetcher.fetch_tickers(&pairs)).await {
                self.apply_snapshot(snapshot, false);
            }
        }
    }

    fn apply_snapshot(&self, snapshot: MarketResult<HashMap<String, TickerSnapshot>>, initial: bool) {
        match snapshot {
            Ok(map) => self.state.send_modify(|s| {
                s.data.replace_all(map);
                s.loading = false;
                if initial {
                    s.error = None;
                }
            }),
            Err(e) => {
                warn!(error = %e, initial, "Ticker snapshot failed");
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
