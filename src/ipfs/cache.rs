use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::core::ContentAddress;

/// Payloads above this size bypass the cache
pub const MAX_CACHED_ENTRY: usize = 4 * 1024 * 1024;

/// Bounded LRU of retrieved content.
///
/// Content behind an address never changes, so entries only leave by
/// eviction.
#[derive(Debug)]
pub struct ContentCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<ContentAddress, Bytes>,
    // least recently used at the front
    order: VecDeque<ContentAddress>,
}

impl CacheInner {
    fn touch(&mut self, address: &ContentAddress) {
        if let Some(pos) = self.order.iter().position(|a| a == address) {
            if let Some(addr) = self.order.remove(pos) {
                self.order.push_back(addr);
            }
        }
    }
}

impl ContentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn get(&self, address: &ContentAddress) -> Option<Bytes> {
        if self.capacity == 0 {
            return None;
        }
        let mut inner = self.inner.lock();
        let data = inner.entries.get(address).cloned()?;
        inner.touch(address);
        Some(data)
    }

    pub fn insert(&self, address: ContentAddress, data: Bytes) {
        if self.capacity == 0 || data.len() > MAX_CACHED_ENTRY {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.entries.insert(address.clone(), data).is_some() {
            inner.touch(&address);
            return;
        }
        inner.order.push_back(address);
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}
