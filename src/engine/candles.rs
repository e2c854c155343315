use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::engine::types::{Candle, KlineTick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Seeded,
    Extended,
    Appended { evicted: bool },
}

/// Ordered candle sequence for one display range.
///
/// Timestamps are strictly increasing. Only the last candle is ever mutated;
/// a tick at or past `last.timestamp + granularity` opens a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleSeries {
    candles: VecDeque<Candle>,
    granularity_ms: u64,
    max_len: usize,
}

impl CandleSeries {
    pub fn new(granularity_ms: u64, max_len: usize) -> Self {
        Self {
            candles: VecDeque::new(),
            granularity_ms,
            max_len: max_len.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn granularity_ms(&self) -> u64 {
        self.granularity_ms
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().copied().collect()
    }

    /// Replace everything with a REST snapshot.
    /// Samples that do not move time forward are skipped; the newest
    /// `max_len` survive.
    pub fn replace_all(&mut self, snapshot: impl IntoIterator<Item = Candle>) {
        self.candles.clear();
        let mut skipped = 0usize;
        for candle in snapshot {
            if let Some(last) = self.candles.back() {
                if candle.timestamp <= last.timestamp {
                    skipped += 1;
                    continue;
                }
            }
            self.candles.push_back(candle);
            if self.candles.len() > self.max_len {
                self.candles.pop_front();
            }
        }
        if skipped > 0 {
            debug!(skipped, "Dropped non-increasing samples from snapshot");
        }
        debug!(len = self.candles.len(), "Candle series replaced from snapshot");
    }

    /// Fold one stream tick into the series.
    pub fn apply_tick(&mut self, tick: &KlineTick) -> TickOutcome {
        let Some(last) = self.candles.back_mut() else {
            self.candles.push_back(Candle::from(*tick));
            trace!(ts = tick.open_time, "Seeded empty series");
            return TickOutcome::Seeded;
        };

        if tick.open_time.saturating_sub(last.timestamp) >= self.granularity_ms {
            self.candles.push_back(Candle::from(*tick));
            let evicted = if self.candles.len() > self.max_len {
                self.candles.pop_front();
                true
            } else {
                false
            };
            trace!(ts = tick.open_time, evicted, "Appended candle");
            return TickOutcome::Appended { evicted };
        }

        last.high = last.high.max(tick.high);
        last.low = last.low.min(tick.low);
        last.close = tick.close;
        if tick.volume.is_some() {
            last.volume = tick.volume;
        }
        trace!(ts = last.timestamp, close = last.close, "Extended last candle");
        TickOutcome::Extended
    }
}
