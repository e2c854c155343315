//! Live data feeds.
//!
//! Each feed is a small state machine (`Connecting -> Live -> Degraded`,
//! `Closed` after `stop()`) driven by one tokio task. Consumers read the
//! current [`FeedState`] with `state()` or watch it through `subscribe()`.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

use crate::engine::types::ConnectionState;
use crate::market_data::adapters::{ExchangeProvider, StreamTransport};
use crate::market_data::resolver::SymbolResolver;
use crate::market_data::snapshot::SnapshotFetcher;

pub mod failover;
pub mod info;
pub mod kline;
pub mod screener;
pub mod stream;
pub mod ticker;

/// What every feed hands to its consumers.
#[derive(Debug, Clone, Default)]
pub struct FeedState<T> {
    pub data: T,
    pub loading: bool,
    pub error: Option<String>,
    pub connection: ConnectionState,
}

pub type StateTx<T> = Arc<watch::Sender<FeedState<T>>>;

pub(crate) fn state_channel<T>(data: T) -> StateTx<T> {
    let (tx, _rx) = watch::channel(FeedState {
        data,
        loading: false,
        error: None,
        connection: ConnectionState::Connecting,
    });
    Arc::new(tx)
}

/// Everything a feed needs from the outside world.
pub struct FeedContext {
    pub resolver: SymbolResolver,
    pub fetcher: SnapshotFetcher,
    pub exchange: Arc<dyn ExchangeProvider>,
    pub transport: Arc<dyn StreamTransport>,
    pub max_candles: usize,
}

/// A running feed task plus the switch that stops it.
pub(crate) struct FeedTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl FeedTask {
    pub fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(run(rx));
        Self { shutdown, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task and wait for it, so no update lands after this returns.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!(error = %e, "Feed task panicked");
            }
        }
    }
}

/// Mark a feed stopped; shared by every feed's `stop()`.
pub(crate) fn mark_closed<T>(state: &StateTx<T>) {
    state.send_modify(|s| {
        s.loading = false;
        s.connection = ConnectionState::Closed;
    });
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{FeedContext, FeedState};
    use crate::market_data::adapters::fake::{FakeMarket, FakeTransport};
    use crate::market_data::resolver::SymbolResolver;
    use crate::market_data::snapshot::SnapshotFetcher;
    use tokio::sync::watch;

    pub fn context(market: &Arc<FakeMarket>, transport: &Arc<FakeTransport>, max_candles: usize) -> Arc<FeedContext> {
        Arc::new(FeedContext {
            resolver: SymbolResolver::new(market.clone(), market.clone()),
            fetcher: SnapshotFetcher::new(market.clone(), market.clone(), market.clone()),
            exchange: market.clone(),
            transport: transport.clone(),
            max_candles,
        })
    }

    /// Wait (bounded) until the feed state satisfies `pred`.
    pub async fn wait_for<T, F>(rx: &mut watch::Receiver<FeedState<T>>, mut pred: F) -> FeedState<T>
    where
        T: Clone,
        F: FnMut(&FeedState<T>) -> bool,
    {
        let fut = async {
            loop {
                {
                    let current = rx.borrow_and_update();
                    if pred(&current) {
                        return current.clone();
                    }
                }
                if rx.changed().await.is_err() {
                    let current = rx.borrow();
                    assert!(pred(&current), "feed state channel closed before condition held");
                    return current.clone();
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), fut)
            .await
            .expect("timed out waiting for feed state")
    }
}
