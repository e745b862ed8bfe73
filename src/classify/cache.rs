//! Bounded most-recently-used cache for per-length inference plans.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

/// Plans kept per model unless configured otherwise.
pub const DEFAULT_PLAN_CAPACITY: usize = 8;

/// Keeps at most `capacity` values keyed by sequence length, evicting the
/// least recently used one. Values are built outside the lock, so a slow build
/// never blocks lookups of other lengths.
pub struct PlanCache<V> {
    capacity: usize,
    entries: Mutex<VecDeque<(usize, Arc<V>)>>,
}

impl<V> PlanCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached value for `key`, or the result of `build`. Build errors are not
    /// cached.
    pub fn get_or_build<F>(&self, key: usize, build: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(value) = self.touch(key)? {
            return Ok(value);
        }

        let built = Arc::new(build()?);

        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("plan cache poisoned"))?;
        // another request may have built the same length meanwhile
        if let Some(pos) = entries.iter().position(|(k, _)| *k == key) {
            if let Some(entry) = entries.remove(pos) {
                let value = entry.1.clone();
                entries.push_back(entry);
                return Ok(value);
            }
        }
        entries.push_back((key, built.clone()));
        while entries.len() > self.capacity {
            if let Some((evicted, _)) = entries.pop_front() {
                log::debug!("plan cache: evicted length {}", evicted);
            }
        }
        Ok(built)
    }

    fn touch(&self, key: usize) -> Result<Option<Arc<V>>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("plan cache poisoned"))?;
        let Some(pos) = entries.iter().position(|(k, _)| *k == key) else {
            return Ok(None);
        };
        let Some(entry) = entries.remove(pos) else {
            return Ok(None);
        };
        let value = entry.1.clone();
        entries.push_back(entry);
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn builds_once_per_length() {
        let cache = PlanCache::new(4);
        let builds = Cell::new(0);
        for _ in 0..3 {
            let v = cache
                .get_or_build(7, || {
                    builds.set(builds.get() + 1);
                    Ok(70)
                })
                .unwrap();
            assert_eq!(*v, 70);
        }
        assert_eq!(builds.get(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = PlanCache::new(2);
        cache.get_or_build(1, || Ok("one")).unwrap();
        cache.get_or_build(2, || Ok("two")).unwrap();
        // refresh 1 so 2 is the oldest
        cache.get_or_build(1, || panic!("1 is cached")).unwrap();
        cache.get_or_build(3, || Ok("three")).unwrap();
        assert_eq!(cache.len(), 2);

        cache.get_or_build(1, || panic!("1 was evicted")).unwrap();
        let rebuilt = Cell::new(false);
        cache
            .get_or_build(2, || {
                rebuilt.set(true);
                Ok("two")
            })
            .unwrap();
        assert!(rebuilt.get());
    }

    #[test]
    fn many_lengths_stay_bounded() {
        let cache = PlanCache::new(DEFAULT_PLAN_CAPACITY);
        for frames in 1..=100 {
            cache.get_or_build(frames, || Ok(frames)).unwrap();
        }
        assert_eq!(cache.len(), DEFAULT_PLAN_CAPACITY);
    }

    #[test]
    fn build_runs_without_holding_the_lock() {
        let cache = PlanCache::new(2);
        cache.get_or_build(1, || Ok(1)).unwrap();
        // would deadlock if the lock were held across the build
        let v = cache.get_or_build(2, || Ok(cache.len() + 10)).unwrap();
        assert_eq!(*v, 11);
    }

    #[test]
    fn failed_build_is_not_cached() {
        let cache: PlanCache<u8> = PlanCache::new(2);
        assert!(cache.get_or_build(4, || Err(anyhow!("bad shape"))).is_err());
        assert!(cache.is_empty());
        assert_eq!(*cache.get_or_build(4, || Ok(4)).unwrap(), 4);
    }
}
