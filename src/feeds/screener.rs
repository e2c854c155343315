use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::engine::page_cache::{total_pages, PageCache, PageKey};
use crate::engine::types::{ConnectionState, MarketRow};
use crate::error::{MarketDataError, MarketResult};
use crate::feeds::{mark_closed, state_channel, FeedContext, FeedState, StateTx};
use crate::telemetry::{PAGE_CACHE_HITS, PAGE_CACHE_MISSES};

/// The page currently on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenerView {
    pub rows: Vec<MarketRow>,
    pub page: u32, // 1-based, 0 before the first load
    pub total_pages: u32,
    pub key: PageKey,
}

/// Paginated market list. REST only, so there is no background task:
/// every navigation call does its own (cached) fetch.
///
/// The listing count is fetched once per screener. Pages are cached under
/// the current [`PageKey`]; changing the key drops every cached page.
///
/// Every `start()` and `stop()` begins a new generation. A response from an
/// older generation is dropped when it lands.
pub struct Screener {
    ctx: Arc<FeedContext>,
    cache: Mutex<PageCache>,
    total_listed: Mutex<Option<u64>>,
    generation: AtomicU64,
    closed: AtomicBool,
    state: StateTx<ScreenerView>,
}

impl Screener {
    pub fn new(ctx: Arc<FeedContext>, key: PageKey) -> Self {
        let view = ScreenerView { rows: Vec::new(), page: 0, total_pages: 0, key: key.clone() };
        Self {
            ctx,
            cache: Mutex::new(PageCache::new(key)),
            total_listed: Mutex::new(None),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            state: state_channel(view),
        }
    }

    pub fn state(&self) -> FeedState<ScreenerView> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState<ScreenerView>> {
        self.state.subscribe()
    }

    pub fn cached_pages(&self) -> usize {
        self.cache.lock().len()
    }

    /// Learn the listing size (first call only) and show page 1.
    #[instrument(skip(self))]
    pub async fn start(&self) -> MarketResult<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.closed.store(false, Ordering::SeqCst);
        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
            s.connection = ConnectionState::Connecting;
        });
        let key = self.cache.lock().key().clone();
        if key.page_size == 0 {
            return Err(self.fail(MarketDataError::InvalidArgument("page size must be positive".into())));
        }

        let known = *self.total_listed.lock();
        let total_listed = match known {
            Some(n) => n,
            None => match self.ctx.fetcher.fetch_listing_size(key.page_size).await {
                Ok(size) => {
                    *self.total_listed.lock() = Some(size.total_listed);
                    size.total_listed
                }
                Err(e) if self.is_current(generation) => return Err(self.fail(e)),
                Err(e) => return Err(e),
            },
        };
        if !self.is_current(generation) {
            return Ok(());
        }
        self.show_first_page(key, total_listed).await
    }

    /// Jump to page `n` (1-based). Out-of-range pages are rejected without a request.
    #[instrument(skip(self))]
    pub async fn go_to_page(&self, n: u32) -> MarketResult<()> {
        let total = self.state.borrow().data.total_pages;
        if n < 1 || n > total {
            return Err(self.fail(MarketDataError::PageOutOfRange { page: n, total_pages: total }));
        }
        self.load_page(n).await
    }

    pub async fn next_page(&self) -> MarketResult<()> {
        let page = self.state.borrow().data.page;
        self.go_to_page(page.saturating_add(1)).await
    }

    pub async fn prev_page(&self) -> MarketResult<()> {
        let page = self.state.borrow().data.page;
        self.go_to_page(page.saturating_sub(1)).await
    }

    /// New page size, currency or ordering: drop the cache and start again
    /// from page 1 using the listing count already known.
    #[instrument(skip(self, key), fields(page_size = key.page_size, vs = %key.vs_currency, filter = %key.filter))]
    pub async fn reconfigure(&self, key: PageKey) -> MarketResult<()> {
        if key.page_size == 0 {
            return Err(self.fail(MarketDataError::InvalidArgument("page size must be positive".into())));
        }
        if self.cache.lock().rekey(key.clone()) {
            info!("Screener parameters changed, page cache dropped");
        }
        let known = *self.total_listed.lock();
        match known {
            Some(total_listed) => self.show_first_page(key, total_listed).await,
            None => self.start().await,
        }
    }

    /// Clear the cache and mark the screener closed. A fetch still in
    /// flight is discarded when it lands.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        {
            let mut cache = self.cache.lock();
            let key = cache.key().clone();
            *cache = PageCache::new(key);
        }
        mark_closed(&self.state);
    }

    async fn show_first_page(&self, key: PageKey, total_listed: u64) -> MarketResult<()> {
        let pages = total_pages(total_listed, key.page_size);
        debug!(total_listed, pages, "Listing size known");
        self.state.send_modify(|s| {
            s.data.key = key;
            s.data.total_pages = pages;
            if pages == 0 {
                s.data.rows.clear();
                s.data.page = 0;
                s.loading = false;
                s.connection = ConnectionState::Degraded;
            }
        });
        if pages == 0 {
            return Ok(());
        }
        self.load_page(1).await
    }

    async fn load_page(&self, page: u32) -> MarketResult<()> {
        let cached = self.cache.lock().get(page).cloned();
        if let Some(rows) = cached {
            metrics::counter!(PAGE_CACHE_HITS).increment(1);
            debug!(page, "Page served from cache");
            self.show(page, rows);
            return Ok(());
        }

        metrics::counter!(PAGE_CACHE_MISSES).increment(1);
        let generation = self.generation.load(Ordering::SeqCst);
        let key = self.cache.lock().key().clone();
        self.state.send_modify(|s| s.loading = true);
        let fetched = self.ctx.fetcher.fetch_market_page(page, &key).await;
        if !self.is_current(generation) {
            debug!(page, "Dropping page from a stopped session");
            return fetched.map(|_| ());
        }
        match fetched {
            Ok(rows) => {
                {
                    let mut cache = self.cache.lock();
                    // The key may have moved on while we were waiting
                    if cache.key() != &key {
                        return Ok(());
                    }
                    cache.insert(page, rows.clone());
                }
                self.show(page, rows);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn show(&self, page: u32, rows: Vec<MarketRow>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.state.send_modify(|s| {
            s.data.rows = rows;
            s.data.page = page;
            s.loading = false;
            s.error = None;
            s.connection = ConnectionState::Degraded;
        });
    }

    // Record the error on the view; the active page and rows stay as they were.
    fn fail(&self, e: MarketDataError) -> MarketDataError {
        warn!(error = %e, "Screener request failed");
        if !self.closed.load(Ordering::SeqCst) {
            let message = e.to_string();
            self.state.send_modify(|s| {
                s.loading = false;
                s.error = Some(message);
            });
        }
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::SortFilter;
    use crate::feeds::testing::context;
    use crate::market_data::adapters::fake::{FakeMarket, FakeTransport};

    fn key(page_size: u32) -> PageKey {
        PageKey { page_size, vs_currency: "usd".into(), filter: SortFilter::MarketCapDesc }
    }

    fn screener(listed: u64, page_size: u32) -> (Arc<FakeMarket>, Screener) {
        let market = FakeMarket::new();
        *market.listed.lock() = listed;
        let ctx = context(&market, &FakeTransport::new(), 10);
        (market, Screener::new(ctx, key(page_size)))
    }

    #[tokio::test]
    async fn test_start_counts_pages_and_loads_first() {
        let (market, screener) = screener(237, 20);
        screener.start().await.unwrap();

        let state = screener.state();
        assert_eq!(state.data.total_pages, 12);
        assert_eq!(state.data.page, 1);
        assert_eq!(state.data.rows.len(), 20);
        assert_eq!(state.connection, ConnectionState::Degraded);
        assert!(!state.loading);
        assert_eq!(market.page_fetches(1), 1);
    }

    #[tokio::test]
    async fn test_last_page_fetched_once_and_beyond_rejected() {
        let (market, screener) = screener(237, 20);
        screener.start().await.unwrap();

        screener.go_to_page(12).await.unwrap();
        screener.go_to_page(12).await.unwrap();
        assert_eq!(market.page_fetches(12), 1);
        assert_eq!(screener.state().data.rows.len(), 17);

        let err = screener.go_to_page(13).await.unwrap_err();
        assert!(matches!(err, MarketDataError::PageOutOfRange { page: 13, total_pages: 12 }));
        assert_eq!(market.total_page_fetches(), 2);
        let state = screener.state();
        assert!(state.error.is_some());
        assert_eq!(state.data.page, 12);
    }

    #[tokio::test]
    async fn test_page_zero_rejected_without_request() {
        let (market, screener) = screener(237, 20);
        screener.start().await.unwrap();
        let before = market.total_page_fetches();

        assert!(screener.go_to_page(0).await.is_err());
        assert!(screener.prev_page().await.is_err());
        assert_eq!(market.total_page_fetches(), before);
        assert!(screener.state().error.is_some());
    }

    #[tokio::test]
    async fn test_cached_page_served_without_fetch() {
        let (market, screener) = screener(100, 10);
        screener.start().await.unwrap();
        screener.next_page().await.unwrap();
        screener.prev_page().await.unwrap();
        screener.go_to_page(2).await.unwrap();

        assert_eq!(market.page_fetches(1), 1);
        assert_eq!(market.page_fetches(2), 1);
        assert_eq!(screener.cached_pages(), 2);
        assert!(screener.state().error.is_none());
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_current_page() {
        let (market, screener) = screener(100, 10);
        screener.start().await.unwrap();
        screener.go_to_page(2).await.unwrap();
        let rows = screener.state().data.rows;

        market.fail_pages.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(screener.go_to_page(3).await.is_err());

        let state = screener.state();
        assert_eq!(state.data.page, 2);
        assert_eq!(state.data.rows, rows);
        assert!(state.error.as_deref().is_some_and(|e| e.contains("503")));
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_reconfigure_drops_cache_and_reuses_count() {
        let (market, screener) = screener(237, 20);
        screener.start().await.unwrap();
        screener.go_to_page(3).await.unwrap();

        screener.reconfigure(key(50)).await.unwrap();
        let state = screener.state();
        assert_eq!(state.data.total_pages, 5);
        assert_eq!(state.data.page, 1);
        assert_eq!(state.data.rows.len(), 50);
        assert_eq!(state.data.key.page_size, 50);
        assert_eq!(screener.cached_pages(), 1);
        assert_eq!(market.page_fetches(1), 2);
        assert_eq!(market.count_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let eur = PageKey { vs_currency: "eur".into(), ..key(50) };
        screener.reconfigure(eur).await.unwrap();
        assert!(screener.state().data.rows[0].name.contains("eur"));
        assert_eq!(market.page_fetches(1), 3);
    }

    #[tokio::test]
    async fn test_empty_listing_has_no_pages() {
        let (market, screener) = screener(0, 20);
        screener.start().await.unwrap();
        let state = screener.state();
        assert_eq!(state.data.total_pages, 0);
        assert_eq!(state.data.page, 0);
        assert_eq!(market.total_page_fetches(), 0);
        assert!(screener.next_page().await.is_err());
    }

    #[tokio::test]
    async fn test_stop_clears_cache() {
        let (_market, screener) = screener(100, 10);
        screener.start().await.unwrap();
        screener.stop();
        assert_eq!(screener.cached_pages(), 0);
        assert_eq!(screener.state().connection, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_page_landing_after_stop_is_dropped() {
        let (market, screener) = screener(100, 10);
        screener.start().await.unwrap();
        let gate = market.gate_pages();

        let (res, _) = tokio::join!(screener.go_to_page(2), async {
            while market.page_fetches(2) == 0 {
                tokio::task::yield_now().await;
            }
            screener.stop();
            gate.notify_one();
        });

        assert!(res.is_ok());
        assert_eq!(screener.cached_pages(), 0);
        let state = screener.state();
        assert_eq!(state.connection, ConnectionState::Closed);
        assert_eq!(state.data.page, 1);
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_page_from_before_restart_is_dropped() {
        let (market, screener) = screener(100, 10);
        screener.start().await.unwrap();
        let gate = market.gate_pages();

        let (res, restarted) = tokio::join!(screener.go_to_page(2), async {
            while market.page_fetches(2) == 0 {
                tokio::task::yield_now().await;
            }
            screener.stop();
            market.open_pages();
            let restarted = screener.start().await;
            gate.notify_one();
            restarted
        });

        assert!(res.is_ok());
        assert!(restarted.is_ok());
        let state = screener.state();
        assert_eq!(state.data.page, 1);
        assert_eq!(state.data.rows[0].id, "coin-0");
        assert_eq!(state.connection, ConnectionState::Degraded);
        assert_eq!(screener.cached_pages(), 1);
        assert_eq!(market.page_fetches(1), 2);
    }
}
