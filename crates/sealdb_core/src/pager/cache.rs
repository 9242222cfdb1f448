//! Bounded cache of decrypted page payloads.

use crate::types::PageNumber;
use std::collections::{HashMap, VecDeque};

/// Bounded cache of decrypted page payloads.
///
/// Eviction is second-chance: a page read since it was last passed over
/// by the eviction cursor is requeued once before being dropped.
#[derive(Debug)]
pub(crate) struct PageCache {
    capacity: usize,
    entries: HashMap<PageNumber, (Vec<u8>, bool)>,
    queue: VecDeque<PageNumber>,
}

impl PageCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get(&mut self, page: PageNumber) -> Option<Vec<u8>> {
        let (payload, referenced) = self.entries.get_mut(&page)?;
        *referenced = true;
        Some(payload.clone())
    }

    pub(crate) fn insert(&mut self, page: PageNumber, payload: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(page, (payload, false)).is_none() {
            self.queue.push_back(page);
        }
        while self.entries.len() > self.capacity {
            self.evict_one();
        }
    }

    pub(crate) fn remove(&mut self, page: PageNumber) {
        if self.entries.remove(&page).is_some() && self.queue.len() > 2 * self.entries.len() + 1 {
            self.queue.retain(|p| self.entries.contains_key(p));
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.queue.clear();
    }

    fn evict_one(&mut self) {
        while let Some(page) = self.queue.pop_front() {
            match self.entries.get_mut(&page) {
                Some((_, referenced)) if *referenced => {
                    *referenced = false;
                    self.queue.push_back(page);
                }
                Some(_) => {
                    self.entries.remove(&page);
                    return;
                }
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(n: u64) -> PageNumber {
        PageNumber::new(n)
    }

    #[test]
    fn bounded_by_capacity() {
        let mut cache = PageCache::new(2);
        cache.insert(p(1), vec![1]);
        cache.insert(p(2), vec![2]);
        cache.insert(p(3), vec![3]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(p(1)).is_none());
    }

    #[test]
    fn recently_read_page_survives_eviction() {
        let mut cache = PageCache::new(2);
        cache.insert(p(1), vec![1]);
        cache.insert(p(2), vec![2]);
        assert_eq!(cache.get(p(1)), Some(vec![1]));

        cache.insert(p(3), vec![3]);
        assert_eq!(cache.get(p(1)), Some(vec![1]));
        assert!(cache.get(p(2)).is_none());
    }

    #[test]
    fn zero_capacity_disables() {
        let mut cache = PageCache::new(0);
        cache.insert(p(1), vec![1]);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn remove_and_clear() {
        let mut cache = PageCache::new(4);
        cache.insert(p(1), vec![1]);
        cache.insert(p(2), vec![2]);
        cache.remove(p(1));
        assert!(cache.get(p(1)).is_none());
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
