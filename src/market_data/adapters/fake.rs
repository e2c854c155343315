// In-memory providers with call counters, plus a scripted stream transport.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::AHashSet;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use super::{
    AssetInfoProvider, ExchangeProvider, MarketChart, MarketListProvider, StreamEvent,
    StreamSession, StreamTransport,
};
use crate::engine::page_cache::PageKey;
use crate::engine::types::{AssetInfo, Lookback, MarketRow, TickerSnapshot};
use crate::error::{MarketDataError, MarketResult};

#[derive(Default)]
pub(crate) struct FakeMarket {
    pub assets: Mutex<HashMap<String, AssetInfo>>,
    pub chart: Mutex<MarketChart>,
    pub symbols: Mutex<AHashSet<String>>,
    pub tickers: Mutex<Vec<TickerSnapshot>>,
    pub listed: Mutex<u64>,

    pub fail_info: AtomicBool,
    pub fail_chart: AtomicBool,
    pub fail_symbols: AtomicBool,
    pub fail_pages: AtomicBool,

    // While set, requests block until the gate is notified
    pub chart_gate: Mutex<Option<Arc<Notify>>>,
    pub page_gate: Mutex<Option<Arc<Notify>>>,

    pub info_calls: AtomicUsize,
    pub chart_calls: AtomicUsize,
    pub symbol_calls: AtomicUsize,
    pub ticker_calls: AtomicUsize,
    pub count_calls: AtomicUsize,
    pub pages_requested: Mutex<Vec<u32>>,
}

fn unavailable(what: &str) -> MarketDataError {
    MarketDataError::Http { status: 503, url: format!("fake://{}", what) }
}

fn install_gate(slot: &Mutex<Option<Arc<Notify>>>) -> Arc<Notify> {
    let gate = Arc::new(Notify::new());
    *slot.lock() = Some(Arc::clone(&gate));
    gate
}

async fn pass_gate(slot: &Mutex<Option<Arc<Notify>>>) {
    let gate = slot.lock().clone();
    if let Some(gate) = gate {
        gate.notified().await;
    }
}

impl FakeMarket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_asset(self: &Arc<Self>, id: &str, symbol: &str) -> Arc<Self> {
        let info = AssetInfo {
            id: id.into(),
            symbol: symbol.into(),
            name: id.to_uppercase(),
            ..Default::default()
        };
        self.assets.lock().insert(id.into(), info);
        Arc::clone(self)
    }

    pub fn with_symbols(self: &Arc<Self>, symbols: &[&str]) -> Arc<Self> {
        self.symbols.lock().extend(symbols.iter().map(|s| s.to_string()));
        Arc::clone(self)
    }

    /// Hold chart requests (already counted) until the handle is notified.
    pub fn gate_chart(&self) -> Arc<Notify> {
        install_gate(&self.chart_gate)
    }

    pub fn gate_pages(&self) -> Arc<Notify> {
        install_gate(&self.page_gate)
    }

    /// Later requests go straight through; ones already waiting stay gated.
    pub fn open_pages(&self) {
        *self.page_gate.lock() = None;
    }

    pub fn page_fetches(&self, page: u32) -> usize {
        self.pages_requested.lock().iter().filter(|p| **p == page).count()
    }

    pub fn total_page_fetches(&self) -> usize {
        self.pages_requested.lock().len()
    }
}

#[async_trait::async_trait]
impl AssetInfoProvider for FakeMarket {
    async fn asset_info(&self, id: &str) -> MarketResult<AssetInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_info.load(Ordering::SeqCst) {
            return Err(unavailable("asset_info"));
        }
        self.assets
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| MarketDataError::Http { status: 404, url: format!("fake://coins/{}", id) })
    }

    async fn market_chart(&self, _id: &str, _vs: &str, _lookback: Lookback) -> MarketResult<MarketChart> {
        self.chart_calls.fetch_add(1, Ordering::SeqCst);
        pass_gate(&self.chart_gate).await;
        if self.fail_chart.load(Ordering::SeqCst) {
            return Err(unavailable("market_chart"));
        }
        Ok(self.chart.lock().clone())
    }
}

#[async_trait::async_trait]
impl MarketListProvider for FakeMarket {
    async fn markets_page(&self, page: u32, key: &PageKey) -> MarketResult<Vec<MarketRow>> {
        self.pages_requested.lock().push(page);
        pass_gate(&self.page_gate).await;
        if self.fail_pages.load(Ordering::SeqCst) {
            return Err(unavailable("markets"));
        }
        let listed = *self.listed.lock();
        let start = (page as u64 - 1) * key.page_size as u64;
        let end = (start + key.page_size as u64).min(listed);
        Ok((start..end)
            .map(|i| MarketRow {
                id: format!("coin-{}", i),
                symbol: format!("c{}", i),
                name: format!("Coin {} ({})", i, key.vs_currency),
                market_cap_rank: Some(i as u32 + 1),
                ..Default::default()
            })
            .collect())
    }

    async fn listed_count(&self) -> MarketResult<u64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.listed.lock())
    }
}

#[async_trait::async_trait]
impl ExchangeProvider for FakeMarket {
    async fn exchange_symbols(&self) -> MarketResult<AHashSet<String>> {
        self.symbol_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_symbols.load(Ordering::SeqCst) {
            return Err(unavailable("exchange_info"));
        }
        Ok(self.symbols.lock().clone())
    }

    async fn ticker_24h(&self, symbols: &[String]) -> MarketResult<Vec<TickerSnapshot>> {
        self.ticker_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .tickers
            .lock()
            .iter()
            .filter(|t| symbols.contains(&t.symbol))
            .cloned()
            .collect())
    }

    fn stream_url(&self, streams: &[String]) -> String {
        format!("fake://{}", streams.join("/"))
    }
}

/// Hands out pre-scripted sessions in order; connecting with none left fails.
#[derive(Default)]
pub(crate) struct FakeTransport {
    sessions: Mutex<VecDeque<FakeSession>>,
    pub connects: AtomicUsize,
    pub urls: Mutex<Vec<String>>,
    pub closed_with: Arc<Mutex<Vec<u16>>>,
}

pub(crate) struct FakeSession {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    closed_with: Arc<Mutex<Vec<u16>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a session; events sent on the returned channel are delivered in order.
    pub fn script(&self) -> mpsc::UnboundedSender<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.lock().push_back(FakeSession {
            rx,
            closed_with: Arc::clone(&self.closed_with),
        });
        tx
    }
}

#[async_trait::async_trait]
impl StreamTransport for FakeTransport {
    async fn connect(&self, url: &str) -> MarketResult<Box<dyn StreamSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());
        let session = self.sessions.lock().pop_front();
        match session {
            Some(s) => Ok(Box::new(s)),
            None => Err(MarketDataError::Stream(format!("connection refused: {}", url))),
        }
    }
}

#[async_trait::async_trait]
impl StreamSession for FakeSession {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    async fn close(&mut self, code: u16) {
        self.closed_with.lock().push(code);
    }
}
