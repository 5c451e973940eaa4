//! Committed page images, keyed by device offset.

use std::collections::VecDeque;

use hashbrown::HashMap;

/// Bounded first-in first-out cache of committed page images.
#[derive(Debug)]
pub struct PageCache {
    pages: HashMap<u64, Vec<u8>>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl PageCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            pages: HashMap::with_capacity(capacity.min(4096)),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Cached image of `len` bytes at `offset`.
    #[must_use]
    pub fn get(&self, offset: u64, len: usize) -> Option<&[u8]> {
        self.pages
            .get(&offset)
            .filter(|image| image.len() == len)
            .map(Vec::as_slice)
    }

    pub fn insert(&mut self, offset: u64, image: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        if self.pages.insert(offset, image).is_none() {
            self.order.push_back(offset);
        }
        while self.pages.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.pages.remove(&oldest);
        }
    }

    pub fn invalidate(&mut self, offset: u64) {
        if self.pages.remove(&offset).is_some() {
            self.order.retain(|cached| *cached != offset);
        }
    }

    /// Drop every image overlapping `start..start + len`.
    pub fn invalidate_range(&mut self, start: u64, len: u64) {
        let end = start.saturating_add(len);
        let overlapping: Vec<u64> = self
            .pages
            .iter()
            .filter(|(offset, image)| **offset < end && **offset + image.len() as u64 > start)
            .map(|(offset, _)| *offset)
            .collect();
        for offset in overlapping {
            self.invalidate(offset);
        }
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.order.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::PageCache;

    #[test]
    fn test_cache_evicts_oldest_and_checks_length() {
        let mut cache = PageCache::new(2);
        cache.insert(0, vec![1; 4]);
        cache.insert(4096, vec![2; 4]);
        cache.insert(0, vec![3; 4]);
        cache.insert(8192, vec![4; 4]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(0, 4).is_none(), "case=oldest_evicted");
        assert_eq!(cache.get(8192, 4), Some([4_u8; 4].as_slice()));
        assert!(cache.get(8192, 8).is_none(), "case=length_mismatch");
        cache.invalidate(4096);
        assert_eq!(cache.len(), 1);
        cache.insert(16384, vec![5; 1024]);
        cache.invalidate_range(16000, 400);
        assert!(cache.get(16384, 1024).is_none(), "case=overlap_dropped");
        assert!(cache.get(8192, 4).is_some(), "case=disjoint_kept");
    }
}
