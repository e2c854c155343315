use std::collections::HashMap;

use crate::engine::types::{MarketRow, SortFilter};

// Everything a cached page depends on; any change drops the whole cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub page_size: u32,
    pub vs_currency: String,
    pub filter: SortFilter,
}

#[derive(Debug, Clone)]
pub struct PageCache {
    key: PageKey,
    pages: HashMap<u32, Vec<MarketRow>>,
}

impl PageCache {
    pub fn new(key: PageKey) -> Self {
        Self { key, pages: HashMap::new() }
    }

    pub fn key(&self) -> &PageKey {
        &self.key
    }

    pub fn get(&self, page: u32) -> Option<&Vec<MarketRow>> {
        self.pages.get(&page)
    }

    pub fn contains(&self, page: u32) -> bool {
        self.pages.contains_key(&page)
    }

    pub fn insert(&mut self, page: u32, rows: Vec<MarketRow>) {
        self.pages.insert(page, rows);
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Swap to a new key. Returns true if the cache was dropped.
    pub fn rekey(&mut self, key: PageKey) -> bool {
        if key == self.key {
            return false;
        }
        self.key = key;
        self.pages = HashMap::new();
        true
    }
}

/// `ceil(total / page_size)`; a zero page size yields zero pages.
pub fn total_pages(total_listed: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    let pages = total_listed.div_ceil(page_size as u64);
    u32::try_from(pages).unwrap_or(u32::MAX)
}
