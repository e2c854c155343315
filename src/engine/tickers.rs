use std::collections::HashMap;

use tracing::trace;

use crate::engine::types::{TickerPatch, TickerSnapshot};

/// Ticker snapshots keyed by lowercased base symbol ("btc").
///
/// Stream patches arrive keyed by exchange symbol ("BTCUSDT"), so a reverse
/// index is rebuilt on every REST replace.
#[derive(Debug, Clone, Default)]
pub struct TickerBoard {
    by_base: HashMap<String, TickerSnapshot>,
    base_by_symbol: HashMap<String, String>,
}

impl TickerBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_all(&mut self, snapshots: HashMap<String, TickerSnapshot>) {
        self.base_by_symbol = snapshots
            .iter()
            .map(|(base, snap)| (snap.symbol.to_uppercase(), base.clone()))
            .collect();
        self.by_base = snapshots;
    }

    /// Returns false when the patch is for a symbol we never fetched.
    pub fn apply_patch(&mut self, patch: &TickerPatch) -> bool {
        let Some(base) = self.base_by_symbol.get(&patch.symbol.to_uppercase()) else {
            trace!(symbol = %patch.symbol, "Patch for untracked symbol");
            return false;
        };
        match self.by_base.get_mut(base) {
            Some(snap) => {
                snap.apply_patch(patch);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, base: &str) -> Option<&TickerSnapshot> {
        self.by_base.get(&base.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.by_base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_base.is_empty()
    }

    pub fn to_map(&self) -> HashMap<String, TickerSnapshot> {
        self.by_base.clone()
    }
}
