//! In-memory picture tables with viewer reference counting.
//!
//! Entries shown by at least one view are "live". When the last viewer goes
//! away an entry moves to the retained list, which keeps at most
//! `max_beyond_lifetime` entries and drops the one unreferenced longest ago
//! first.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use lru::LruCache;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, PictureSource, ProfilePicture};

/// Identifies one registration of interest in a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(pub u64);

impl std::fmt::Display for ViewerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct LiveEntry {
    picture: ProfilePicture,
    viewers: HashSet<ViewerId>,
    last_access: Instant,
}

/// Memory tier of the picture cache. Not synchronized on its own; the owning
/// cache keeps it behind its lock.
#[derive(Debug)]
pub struct MemoryPictureCache {
    live: HashMap<CacheKey, LiveEntry>,
    retained: LruCache<CacheKey, ProfilePicture>,
    max_beyond_lifetime: usize,
    hits: u64,
    misses: u64,
}

impl MemoryPictureCache {
    /// Creates empty tables keeping up to `max_beyond_lifetime` unreferenced entries.
    #[must_use]
    pub fn new(max_beyond_lifetime: usize) -> Self {
        Self {
            live: HashMap::new(),
            retained: LruCache::unbounded(),
            max_beyond_lifetime,
            hits: 0,
            misses: 0,
        }
    }

    /// Current retention budget.
    #[must_use]
    pub const fn max_beyond_lifetime(&self) -> usize {
        self.max_beyond_lifetime
    }

    /// Changes the retention budget, evicting immediately if it shrank.
    pub fn set_max_beyond_lifetime(&mut self, max: usize) {
        self.max_beyond_lifetime = max;
        self.evict_overflow();
    }

    /// Registers `viewer` on a cached entry and returns its picture.
    /// A retained entry becomes live again.
    pub fn acquire(&mut self, key: &CacheKey, viewer: ViewerId) -> Option<ProfilePicture> {
        if let Some(entry) = self.live.get_mut(key) {
            entry.viewers.insert(viewer);
            entry.last_access = Instant::now();
            self.hits += 1;
            trace!(key = %key, viewer = %viewer, "Memory hit (live)");
            return Some(entry.picture.served_from(PictureSource::Memory));
        }

        if let Some(picture) = self.retained.pop(key) {
            self.hits += 1;
            trace!(key = %key, viewer = %viewer, "Memory hit (retained)");
            let served = picture.served_from(PictureSource::Memory);
            self.live.insert(
                key.clone(),
                LiveEntry {
                    picture,
                    viewers: HashSet::from([viewer]),
                    last_access: Instant::now(),
                },
            );
            return Some(served);
        }

        self.misses += 1;
        trace!(key = %key, "Memory miss");
        None
    }

    /// Stores a freshly loaded picture with the viewers waiting for it.
    /// Without viewers it goes straight to the retained list.
    pub fn insert(
        &mut self,
        picture: ProfilePicture,
        viewers: impl IntoIterator<Item = ViewerId>,
    ) {
        let key = picture.key.clone();
        let viewers: HashSet<ViewerId> = viewers.into_iter().collect();

        if viewers.is_empty() {
            self.live.remove(&key);
            self.retain(key, picture);
            return;
        }

        debug!(key = %key, viewers = viewers.len(), "Storing picture in memory");
        self.retained.pop(&key);
        match self.live.get_mut(&key) {
            Some(entry) => {
                entry.picture = picture;
                entry.viewers.extend(viewers);
                entry.last_access = Instant::now();
            }
            None => {
                self.live.insert(
                    key,
                    LiveEntry {
                        picture,
                        viewers,
                        last_access: Instant::now(),
                    },
                );
            }
        }
    }

    /// Drops `viewer`'s interest in `key`. Returns false if it held none.
    pub fn release(&mut self, key: &CacheKey, viewer: ViewerId) -> bool {
        let Some(entry) = self.live.get_mut(key) else {
            return false;
        };
        if !entry.viewers.remove(&viewer) {
            return false;
        }
        trace!(key = %key, viewer = %viewer, remaining = entry.viewers.len(), "Released viewer");

        if entry.viewers.is_empty()
            && let Some(entry) = self.live.remove(key)
        {
            self.retain(key.clone(), entry.picture);
        }
        true
    }

    fn retain(&mut self, key: CacheKey, picture: ProfilePicture) {
        trace!(key = %key, "Entry unreferenced");
        self.retained.push(key, picture);
        self.evict_overflow();
    }

    fn evict_overflow(&mut self) {
        while self.retained.len() > self.max_beyond_lifetime {
            if let Some((key, _)) = self.retained.pop_lru() {
                debug!(key = %key, budget = self.max_beyond_lifetime, "Evicted unreferenced picture");
            }
        }
    }

    /// Looks at an entry without registering a viewer or touching recency.
    #[must_use]
    pub fn peek(&self, key: &CacheKey) -> Option<&ProfilePicture> {
        self.live
            .get(key)
            .map(|entry| &entry.picture)
            .or_else(|| self.retained.peek(key))
    }

    /// Returns true if `key` is live or retained.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.peek(key).is_some()
    }

    /// Number of viewers registered on a live entry.
    #[must_use]
    pub fn viewer_count(&self, key: &CacheKey) -> usize {
        self.live.get(key).map_or(0, |entry| entry.viewers.len())
    }

    /// When a live entry was last handed out.
    #[must_use]
    pub fn last_access(&self, key: &CacheKey) -> Option<Instant> {
        self.live.get(key).map(|entry| entry.last_access)
    }

    /// Entries with at least one viewer.
    #[must_use]
    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    /// Unreferenced entries still held.
    #[must_use]
    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }

    /// Drops every unreferenced entry. Live entries stay while viewed.
    pub fn clear_retained(&mut self) {
        let count = self.retained.len();
        self.retained.clear();
        debug!(count = count, "Cleared retained pictures");
    }

    /// Requests answered from memory.
    #[must_use]
    pub const fn hits(&self) -> u64 {
        self.hits
    }

    /// Requests that missed memory.
    #[must_use]
    pub const fn misses(&self) -> u64 {
        self.misses
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Requests answered from memory.
    pub hits: u64,
    /// Requests that had to wait for a load.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Calls made to the fetcher.
    pub fetches: u64,
    /// Entries with at least one viewer.
    pub live: usize,
    /// Unreferenced entries kept by the retention budget.
    pub retained: usize,
    /// Loads currently in flight.
    pub pending: usize,
}

impl CacheStats {
    /// Builds a snapshot from the memory tier and load counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(memory: &MemoryPictureCache, fetches: u64, pending: usize) -> Self {
        let hits = memory.hits();
        let misses = memory.misses();
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        Self {
            hits,
            misses,
            hit_rate,
            fetches,
            live: memory.live_len(),
            retained: memory.retained_len(),
            pending,
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} live, {} retained, {} pending, {:.1}% hit rate ({} hits, {} misses, {} fetches)",
            self.live,
            self.retained,
            self.pending,
            self.hit_rate,
            self.hits,
            self.misses,
            self.fetches
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::PictureCropping;
    use std::sync::Arc;

    fn key(id: &str) -> CacheKey {
        CacheKey::new(id, PictureCropping::Square).unwrap()
    }

    fn picture(id: &str) -> ProfilePicture {
        ProfilePicture::new(
            key(id),
            Arc::new(image::DynamicImage::new_rgb8(2, 2)),
            PictureSource::Network,
        )
    }

    #[test]
    fn test_zero_budget_drops_unreferenced_entries() {
        let mut cache = MemoryPictureCache::new(0);
        cache.insert(picture("1"), [ViewerId(1)]);
        assert_eq!(cache.live_len(), 1);

        assert!(cache.release(&key("1"), ViewerId(1)));
        assert!(!cache.contains(&key("1")));
        assert_eq!(cache.retained_len(), 0);
    }

    #[test]
    fn test_entry_lives_until_last_viewer_leaves() {
        let mut cache = MemoryPictureCache::new(0);
        cache.insert(picture("1"), [ViewerId(1)]);
        assert!(cache.acquire(&key("1"), ViewerId(2)).is_some());
        assert_eq!(cache.viewer_count(&key("1")), 2);

        cache.release(&key("1"), ViewerId(1));
        assert!(cache.contains(&key("1")));

        cache.release(&key("1"), ViewerId(2));
        assert!(!cache.contains(&key("1")));
    }

    #[test]
    fn test_budget_evicts_least_recently_unreferenced() {
        let mut cache = MemoryPictureCache::new(2);
        for (n, id) in ["a", "b", "c"].into_iter().enumerate() {
            cache.insert(picture(id), [ViewerId(n as u64)]);
        }

        cache.release(&key("b"), ViewerId(1));
        cache.release(&key("a"), ViewerId(0));
        cache.release(&key("c"), ViewerId(2));

        assert_eq!(cache.retained_len(), 2);
        assert!(!cache.contains(&key("b")));
        assert!(cache.contains(&key("a")));
        assert!(cache.contains(&key("c")));
    }

    #[test]
    fn test_acquire_revives_retained_entry() {
        let mut cache = MemoryPictureCache::new(1);
        cache.insert(picture("1"), []);
        assert_eq!(cache.retained_len(), 1);

        let served = cache.acquire(&key("1"), ViewerId(9)).unwrap();
        assert_eq!(served.source, PictureSource::Memory);
        assert_eq!(cache.retained_len(), 0);
        assert_eq!(cache.viewer_count(&key("1")), 1);
        assert!(cache.last_access(&key("1")).is_some());
    }

    #[test]
    fn test_shrinking_budget_evicts_now() {
        let mut cache = MemoryPictureCache::new(3);
        cache.insert(picture("1"), []);
        cache.insert(picture("2"), []);
        cache.insert(picture("3"), []);

        cache.set_max_beyond_lifetime(1);
        assert_eq!(cache.retained_len(), 1);
        assert!(cache.contains(&key("3")));
    }

    #[test]
    fn test_release_unknown_viewer_is_noop() {
        let mut cache = MemoryPictureCache::new(0);
        cache.insert(picture("1"), [ViewerId(1)]);

        assert!(!cache.release(&key("1"), ViewerId(2)));
        assert!(!cache.release(&key("2"), ViewerId(1)));
        assert_eq!(cache.viewer_count(&key("1")), 1);
    }

    #[test]
    fn test_stats() {
        let mut cache = MemoryPictureCache::new(0);
        cache.insert(picture("1"), [ViewerId(1)]);
        let _ = cache.acquire(&key("1"), ViewerId(2));
        let _ = cache.acquire(&key("missing"), ViewerId(3));

        let stats = CacheStats::new(&cache, 1, 0);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.live, 1);
        assert!((stats.hit_rate - 50.0).abs() < f64::EPSILON);
    }
}
