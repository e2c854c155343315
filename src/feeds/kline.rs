use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::engine::candles::CandleSeries;
use crate::engine::types::{Candle, ConnectionState, RangeToken};
use crate::error::MarketResult;
use crate::feeds::stream::{enter_degraded, run_subscription, until_shutdown, SubscriptionExit};
use crate::feeds::{mark_closed, state_channel, FeedContext, FeedState, FeedTask, StateTx};
use crate::market_data::normaliser::parse_kline_message;

/// Candle chart for one asset over one display range.
///
/// The REST snapshot fills the series first; the kline stream for the
/// resolved pair then extends the last candle or appends new ones.
pub struct KlineFeed {
    ctx: Arc<FeedContext>,
    asset_id: String,
    vs_currency: String,
    range: RangeToken,
    state: StateTx<CandleSeries>,
    task: Option<FeedTask>,
}

impl KlineFeed {
    pub fn new(
        ctx: Arc<FeedContext>,
        asset_id: impl Into<String>,
        vs_currency: impl Into<String>,
        range: RangeToken,
    ) -> Self {
        let state = state_channel(CandleSeries::new(range.granularity_ms(), ctx.max_candles));
        Self {
            ctx,
            asset_id: asset_id.into(),
            vs_currency: vs_currency.into().to_lowercase(),
            range,
            state,
            task: None,
        }
    }

    pub fn range(&self) -> RangeToken {
        self.range
    }

    pub fn state(&self) -> FeedState<CandleSeries> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState<CandleSeries>> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Spawn the feed task. A no-op while the previous task is still running.
    pub fn start(&mut self) {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let granularity = self.range.granularity_ms();
        let max_len = self.ctx.max_candles;
        self.state.send_modify(|s| {
            if s.data.granularity_ms() != granularity {
                s.data = CandleSeries::new(granularity, max_len);
            }
            s.loading = true;
            s.error = None;
            s.connection = ConnectionState::Connecting;
        });

        let run = KlineRun {
            ctx: Arc::clone(&self.ctx),
            asset_id: self.asset_id.clone(),
            vs_currency: self.vs_currency.clone(),
            range: self.range,
            state: Arc::clone(&self.state),
        };
        self.task = Some(FeedTask::spawn(move |shutdown| run.run(shutdown)));
    }

    /// Close the subscription with a normal close and wait for the task.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop().await;
        }
        mark_closed(&self.state);
    }

    /// Tear down the current subscription, then start over for `range`.
    pub async fn set_range(&mut self, range: RangeToken) {
        if range == self.range && self.task.is_some() {
            return;
        }
        self.stop().await;
        info!(asset = %self.asset_id, range = %range, "Switching chart range");
        self.range = range;
        self.start();
    }
}

struct KlineRun {
    ctx: Arc<FeedContext>,
    asset_id: String,
    vs_currency: String,
    range: RangeToken,
    state: StateTx<CandleSeries>,
}

impl KlineRun {
    #[instrument(name = "kline_feed", skip_all, fields(asset = %self.asset_id, range = %self.range))]
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let initial = until_shutdown(&mut shutdown, async {
            tokio::join!(
                self.ctx.resolver.resolve(&self.asset_id, &self.vs_currency),
                self.ctx.fetcher.fetch_klines(&self.asset_id, &self.vs_currency, self.range)
            )
        })
        .await;
        let Some((resolution, snapshot)) = initial else {
            return;
        };
        self.apply_snapshot(snapshot, true);

        let pair = match resolution {
            Ok(r) => r.pair,
            Err(e) => {
                warn!(error = %e, "Pair resolution failed, staying on REST data");
                None
            }
        };
        let Some(pair) = pair else {
            self.state.send_modify(|s| s.connection = ConnectionState::Degraded);
            return;
        };

        let stream = format!("{}@kline_{}", pair.stream_name(), self.range.stream_interval());
        let url = self.ctx.exchange.stream_url(&[stream]);
        let exit = run_subscription(
            self.ctx.transport.as_ref(),
            &url,
            &self.state,
            &mut shutdown,
            |series: &mut CandleSeries, text: &str| {
                let tick = parse_kline_message(text)?;
                series.apply_tick(&tick);
                Ok(true)
            },
        )
        .await;

        if let SubscriptionExit::Recover(recovery) = exit {
            enter_degraded(&self.state, &recovery);
            let refetch = self.ctx.fetcher.fetch_klines(&self.asset_id, &self.vs_currency, self.range);
            if let Some(snapshot) = until_shutdown(&mut shutdown, refetch).await {
                self.apply_snapshot(snapshot, false);
            }
        }
    }

    // A failed initial fill surfaces its error; a failed re-fetch keeps the
    // fallback message and the candles already held.
    fn apply_snapshot(&self, snapshot: MarketResult<Vec<Candle>>, initial: bool) {
        match snapshot {
            Ok(candles) => self.state.send_modify(|s| {
                s.data.replace_all(candles);
                s.loading = false;
                if initial {
                    s.error = None;
                }
            }),
            Err(e) => {
                warn!(error = %e, initial, "Candle snapshot failed");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::testing::{context, wait_for};
    use crate::market_data::adapters::fake::{FakeMarket, FakeTransport};
    use crate::market_data::adapters::{StreamEvent, NORMAL_CLOSURE};
    use std::sync::atomic::Ordering;

    fn kline(open_time: u64, close: f64) -> StreamEvent {
        StreamEvent::Text(format!(
            r#"{{"e":"kline","E":{t},"s":"BTCUSDT","k":{{"t":{t},"T":{end},"i":"1m","o":"{c}","h":"{c}","l":"{c}","c":"{c}","v":"1.0","x":false}}}}"#,
            t = open_time,
            end = open_time + 59_999,
            c = close
        ))
    }

    fn listed_bitcoin() -> Arc<FakeMarket> {
        FakeMarket::new().with_asset("bitcoin", "btc").with_symbols(&["BTCUSDT"])
    }

    fn with_history(market: &Arc<FakeMarket>) {
        market.chart.lock().prices = vec![(0, 100.0), (60_000, 101.0), (120_000, 102.0)];
    }

    #[tokio::test]
    async fn test_ticks_fold_into_minute_candles() {
        let market = listed_bitcoin();
        let transport = FakeTransport::new();
        let tx = transport.script();
        let mut feed = KlineFeed::new(context(&market, &transport, 100), "bitcoin", "usd", RangeToken::OneDay);
        let mut rx = feed.subscribe();
        feed.start();

        wait_for(&mut rx, |s| s.connection == ConnectionState::Live).await;
        for (t, c) in [(0, 100.0), (30_000, 101.0), (70_000, 102.0)] {
            tx.send(kline(t, c)).unwrap();
        }
        let state = wait_for(&mut rx, |s| s.data.last().is_some_and(|c| c.timestamp == 70_000)).await;

        let candles = state.data.to_vec();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, 0);
        assert_eq!(candles[0].close, 101.0);
        assert!(candles[0].high >= 101.0);
        assert_eq!(candles[1].close, 102.0);
        assert_eq!(transport.urls.lock()[0], "fake://btcusdt@kline_1m");
        feed.stop().await;
    }

    #[tokio::test]
    async fn test_abnormal_close_refetches_once() {
        let market = listed_bitcoin();
        with_history(&market);
        let transport = FakeTransport::new();
        let tx = transport.script();
        let mut feed = KlineFeed::new(context(&market, &transport, 100), "bitcoin", "usd", RangeToken::OneDay);
        let mut rx = feed.subscribe();
        feed.start();

        wait_for(&mut rx, |s| s.connection == ConnectionState::Live).await;
        tx.send(StreamEvent::Closed { code: 1006 }).unwrap();
        let _ = tx.send(StreamEvent::Closed { code: 1006 });

        let state = wait_for(&mut rx, |s| s.connection == ConnectionState::Degraded && !s.loading).await;
        assert!(state
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("Live stream unavailable, falling back to REST data")));
        assert_eq!(state.data.len(), 3);

        feed.stop().await;
        assert_eq!(market.chart_calls.load(Ordering::SeqCst), 2);
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_degrades() {
        let market = listed_bitcoin();
        with_history(&market);
        let transport = FakeTransport::new();
        let mut feed = KlineFeed::new(context(&market, &transport, 100), "bitcoin", "usd", RangeToken::OneDay);
        let mut rx = feed.subscribe();
        feed.start();

        wait_for(&mut rx, |s| s.connection == ConnectionState::Degraded && !s.loading).await;
        feed.stop().await;
        assert_eq!(market.chart_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_closes_normally_without_refetch() {
        let market = listed_bitcoin();
        with_history(&market);
        let transport = FakeTransport::new();
        let _tx = transport.script();
        let mut feed = KlineFeed::new(context(&market, &transport, 100), "bitcoin", "usd", RangeToken::OneDay);
        let mut rx = feed.subscribe();
        feed.start();

        wait_for(&mut rx, |s| s.connection == ConnectionState::Live).await;
        feed.stop().await;

        assert_eq!(*transport.closed_with.lock(), vec![NORMAL_CLOSURE]);
        assert_eq!(market.chart_calls.load(Ordering::SeqCst), 1);
        let state = feed.state();
        assert_eq!(state.connection, ConnectionState::Closed);
        assert!(state.error.is_none());
        assert!(!feed.is_running());
    }

    #[tokio::test]
    async fn test_stop_during_snapshot_drops_the_response() {
        let market = listed_bitcoin();
        with_history(&market);
        let gate = market.gate_chart();
        let transport = FakeTransport::new();
        let _tx = transport.script();
        let mut feed = KlineFeed::new(context(&market, &transport, 100), "bitcoin", "usd", RangeToken::OneDay);
        feed.start();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while market.chart_calls.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("chart request never issued");
        feed.stop().await;
        gate.notify_one();
        tokio::task::yield_now().await;

        let state = feed.state();
        assert!(state.data.is_empty());
        assert_eq!(state.connection, ConnectionState::Closed);
        assert!(!state.loading);
        assert!(!feed.is_running());
        assert_eq!(transport.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_server_normal_close_does_not_recover() {
        let market = listed_bitcoin();
        with_history(&market);
        let transport = FakeTransport::new();
        let tx = transport.script();
        let mut feed = KlineFeed::new(context(&market, &transport, 100), "bitcoin", "usd", RangeToken::OneDay);
        let mut rx = feed.subscribe();
        feed.start();

        wait_for(&mut rx, |s| s.connection == ConnectionState::Live).await;
        tx.send(StreamEvent::Closed { code: NORMAL_CLOSURE }).unwrap();
        let state = wait_for(&mut rx, |s| s.connection == ConnectionState::Closed).await;

        assert!(state.error.is_none());
        assert_eq!(market.chart_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unlisted_asset_stays_rest_only() {
        let market = FakeMarket::new().with_asset("obscure", "obs");
        with_history(&market);
        let transport = FakeTransport::new();
        let mut feed = KlineFeed::new(context(&market, &transport, 100), "obscure", "usd", RangeToken::OneDay);
        let mut rx = feed.subscribe();
        feed.start();

        let state = wait_for(&mut rx, |s| s.connection == ConnectionState::Degraded).await;
        assert!(state.error.is_none());
        assert_eq!(state.data.len(), 3);
        assert_eq!(transport.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolution_failure_still_fills_from_rest() {
        let market = listed_bitcoin();
        with_history(&market);
        market.fail_info.store(true, Ordering::SeqCst);
        let transport = FakeTransport::new();
        let mut feed = KlineFeed::new(context(&market, &transport, 100), "bitcoin", "usd", RangeToken::OneDay);
        let mut rx = feed.subscribe();
        feed.start();

        let state = wait_for(&mut rx, |s| s.connection == ConnectionState::Degraded).await;
        assert_eq!(state.data.len(), 3);
        assert!(state.error.is_none());
        assert_eq!(transport.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_snapshot_failure_sets_error() {
        let market = listed_bitcoin();
        market.fail_chart.store(true, Ordering::SeqCst);
        let transport = FakeTransport::new();
        let _tx = transport.script();
        let mut feed = KlineFeed::new(context(&market, &transport, 100), "bitcoin", "usd", RangeToken::OneDay);
        let mut rx = feed.subscribe();
        feed.start();

        let state = wait_for(&mut rx, |s| s.connection == ConnectionState::Live).await;
        assert!(state.error.as_deref().is_some_and(|e| e.contains("503")));
        assert!(state.data.is_empty());
        feed.stop().await;
    }

    #[tokio::test]
    async fn test_range_change_replaces_subscription() {
        let market = listed_bitcoin();
        with_history(&market);
        let transport = FakeTransport::new();
        let _first = transport.script();
        let _second = transport.script();
        let mut feed = KlineFeed::new(context(&market, &transport, 100), "bitcoin", "usd", RangeToken::OneDay);
        let mut rx = feed.subscribe();
        feed.start();
        wait_for(&mut rx, |s| s.connection == ConnectionState::Live).await;

        feed.set_range(RangeToken::OneWeek).await;
        assert_eq!(*transport.closed_with.lock(), vec![NORMAL_CLOSURE]);
        let state = wait_for(&mut rx, |s| s.connection == ConnectionState::Live).await;

        assert_eq!(feed.range(), RangeToken::OneWeek);
        assert_eq!(state.data.granularity_ms(), RangeToken::OneWeek.granularity_ms());
        assert_eq!(transport.urls.lock()[1], "fake://btcusdt@kline_15m");
        feed.stop().await;
    }
}
