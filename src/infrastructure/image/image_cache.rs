//! Shared picture cache: memory -> disk -> network, one load per key.
//!
//! Every request registers a viewer. Requests for a key that is not in
//! memory join the pending load for that key, so N concurrent requesters
//! cause one fetch. The tables sit behind a single mutex that is never held
//! across an await or while callbacks run.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, trace, warn};

use crate::domain::entities::{CacheKey, PictureSource, ProfilePicture};
use crate::domain::errors::FetchError;
use crate::domain::ports::PictureFetcherPort;
use crate::infrastructure::graph::GraphPictureFetcher;

use super::disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskPictureCache, default_cache_dir};
use super::memory_cache::{CacheStats, MemoryPictureCache, ViewerId};

/// Default age after which disk entries are refetched.
pub const DEFAULT_DISK_CACHE_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome delivered to every waiter of a load.
pub type PictureResult = Result<ProfilePicture, FetchError>;

type StartCallback = Box<dyn FnOnce() + Send>;
type CompletionCallback = Box<dyn FnOnce(PictureResult) + Send>;

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Unreferenced entries kept in memory. 0 keeps only what is on screen.
    pub max_images_cached_beyond_lifetime: usize,
    /// Whether the disk tier is read and written.
    pub disk_cache_enabled: bool,
    /// Disk entries at least this old are treated as absent.
    pub disk_cache_lifetime: Duration,
    /// Directory for the disk tier.
    pub disk_cache_dir: PathBuf,
    /// Byte cap for the disk tier.
    pub disk_cache_max_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_images_cached_beyond_lifetime: 0,
            disk_cache_enabled: false,
            disk_cache_lifetime: DEFAULT_DISK_CACHE_LIFETIME,
            disk_cache_dir: default_cache_dir(),
            disk_cache_max_size: DEFAULT_MAX_CACHE_SIZE,
        }
    }
}

/// Proof of interest in a key, returned by [`ImageCache::request_image`].
/// Pass it to [`ImageCache::cancel`] to deregister.
#[must_use]
pub struct RequestHandle {
    key: CacheKey,
    viewer: ViewerId,
    slot: Arc<WaiterSlot>,
}

impl RequestHandle {
    /// Key this request registered interest in.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("key", &self.key)
            .field("viewer", &self.viewer)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Callbacks {
    on_start: Option<StartCallback>,
    on_complete: Option<CompletionCallback>,
}

/// Callbacks of one request.
///
/// Every delivery and the cancellation happen under the slot's lock, so a
/// start is never delivered after the completion and nothing is delivered
/// once `cancel` has returned. The lock is reentrant so a callback may
/// cancel its own request.
struct WaiterSlot {
    callbacks: ReentrantMutex<RefCell<Callbacks>>,
}

impl WaiterSlot {
    fn new(on_start: StartCallback, on_complete: CompletionCallback) -> Self {
        Self {
            callbacks: ReentrantMutex::new(RefCell::new(Callbacks {
                on_start: Some(on_start),
                on_complete: Some(on_complete),
            })),
        }
    }

    fn start(&self) {
        let guard = self.callbacks.lock();
        let on_start = guard.borrow_mut().on_start.take();
        if let Some(on_start) = on_start {
            on_start();
        }
    }

    fn complete(&self, result: PictureResult) {
        let guard = self.callbacks.lock();
        let on_complete = {
            let mut callbacks = guard.borrow_mut();
            callbacks.on_start = None;
            callbacks.on_complete.take()
        };
        if let Some(on_complete) = on_complete {
            on_complete(result);
        }
    }

    fn cancel(&self) {
        let guard = self.callbacks.lock();
        let dropped = std::mem::take(&mut *guard.borrow_mut());
        drop(guard);
        drop(dropped);
    }
}

struct Waiter {
    viewer: ViewerId,
    slot: Arc<WaiterSlot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadPhase {
    /// Checking the disk tier.
    Resolving,
    /// The fetcher has been called.
    Fetching,
}

struct PendingLoad {
    phase: LoadPhase,
    waiters: Vec<Waiter>,
}

struct CacheState {
    memory: MemoryPictureCache,
    pending: HashMap<CacheKey, PendingLoad>,
    disk_enabled: bool,
    disk_lifetime: Duration,
}

/// Process-wide picture cache coordinating every view's requests.
pub struct ImageCache {
    state: Mutex<CacheState>,
    fetcher: Arc<dyn PictureFetcherPort>,
    disk: OnceCell<Option<Arc<DiskPictureCache>>>,
    disk_dir: PathBuf,
    disk_max_size: u64,
    next_viewer: AtomicU64,
    fetches: AtomicU64,
}

static GLOBAL: OnceLock<Arc<ImageCache>> = OnceLock::new();

impl ImageCache {
    /// Creates a cache backed by `fetcher`.
    #[must_use]
    pub fn new(fetcher: Arc<dyn PictureFetcherPort>, config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState {
                memory: MemoryPictureCache::new(config.max_images_cached_beyond_lifetime),
                pending: HashMap::new(),
                disk_enabled: config.disk_cache_enabled,
                disk_lifetime: config.disk_cache_lifetime,
            }),
            fetcher,
            disk: OnceCell::new(),
            disk_dir: config.disk_cache_dir,
            disk_max_size: config.disk_cache_max_size,
            next_viewer: AtomicU64::new(1),
            fetches: AtomicU64::new(0),
        }
    }

    /// Returns the process-wide cache, creating it with the graph fetcher
    /// and default configuration on first use.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| {
            debug!("Initializing process-wide picture cache");
            Arc::new(Self::new(
                Arc::new(GraphPictureFetcher::default()),
                CacheConfig::default(),
            ))
        }))
    }

    /// Installs `cache` as the process-wide instance.
    ///
    /// # Errors
    /// Returns the argument back if the global cache was already initialized.
    pub fn install_global(cache: Arc<Self>) -> Result<(), Arc<Self>> {
        GLOBAL.set(cache)
    }

    /// Registers interest in `key` and delivers its picture.
    ///
    /// A memory hit calls `on_complete` before returning and never calls
    /// `on_start`. Otherwise the caller joins the load for `key`;
    /// `on_start` runs when the network fetch begins (or right away when the
    /// fetch is already running) and `on_complete` runs once with the shared
    /// result. Loads are spawned on the current Tokio runtime.
    pub fn request_image(
        self: &Arc<Self>,
        key: CacheKey,
        on_start: impl FnOnce() + Send + 'static,
        on_complete: impl FnOnce(PictureResult) + Send + 'static,
    ) -> RequestHandle {
        let viewer = ViewerId(self.next_viewer.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(WaiterSlot::new(Box::new(on_start), Box::new(on_complete)));
        let handle = RequestHandle {
            key: key.clone(),
            viewer,
            slot: Arc::clone(&slot),
        };

        let mut state = self.state.lock();
        if let Some(picture) = state.memory.acquire(&key, viewer) {
            drop(state);
            slot.complete(Ok(picture));
            return handle;
        }

        let waiter = Waiter {
            viewer,
            slot: Arc::clone(&slot),
        };

        if let Some(pending) = state.pending.get_mut(&key) {
            trace!(key = %key, viewer = %viewer, waiters = pending.waiters.len(), "Joined pending load");
            let fetching = pending.phase == LoadPhase::Fetching;
            pending.waiters.push(waiter);
            if fetching {
                // The slot is new, so nobody else holds its lock yet.
                let guard = slot.callbacks.lock();
                drop(state);
                let on_start = guard.borrow_mut().on_start.take();
                if let Some(on_start) = on_start {
                    on_start();
                }
            }
            return handle;
        }

        let disk_lifetime = state.disk_enabled.then_some(state.disk_lifetime);
        state.pending.insert(
            key.clone(),
            PendingLoad {
                phase: LoadPhase::Resolving,
                waiters: vec![waiter],
            },
        );
        drop(state);

        debug!(key = %key, viewer = %viewer, "Starting picture load");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(Arc::clone(self).run_load(key, disk_lifetime));
            }
            Err(e) => {
                error!(key = %key, error = %e, "No async runtime to load picture on");
                self.complete(&key, Err(FetchError::network("no async runtime available")));
            }
        }

        handle
    }

    /// Withdraws the interest registered by `handle`.
    ///
    /// A cancelled waiter receives no further callbacks once this returns.
    /// A load whose last waiter cancels still runs to completion and its
    /// result is cached under the usual retention rules.
    pub fn cancel(&self, handle: &RequestHandle) {
        handle.slot.cancel();

        let mut state = self.state.lock();

        if let Some(pending) = state.pending.get_mut(&handle.key) {
            let (cancelled, kept): (Vec<Waiter>, Vec<Waiter>) =
                std::mem::take(&mut pending.waiters)
                    .into_iter()
                    .partition(|w| w.viewer == handle.viewer);
            pending.waiters = kept;
            if !cancelled.is_empty() {
                let remaining = pending.waiters.len();
                drop(state);
                drop(cancelled);
                debug!(key = %handle.key, viewer = %handle.viewer, remaining, "Cancelled pending request");
                return;
            }
        }

        if state.memory.release(&handle.key, handle.viewer) {
            trace!(key = %handle.key, viewer = %handle.viewer, "Released cached picture");
        }
    }

    /// Sets how many unreferenced pictures stay in memory.
    /// 0 restores eager eviction of anything no view displays.
    pub fn set_max_images_cached_beyond_lifetime(&self, max: usize) {
        self.state.lock().memory.set_max_beyond_lifetime(max);
        info!(max = max, "Updated beyond-lifetime cache budget");
    }

    /// Current beyond-lifetime budget.
    #[must_use]
    pub fn max_images_cached_beyond_lifetime(&self) -> usize {
        self.state.lock().memory.max_beyond_lifetime()
    }

    /// Raises the budget to at least `max`; never lowers it.
    pub fn raise_max_images_cached_beyond_lifetime(&self, max: usize) {
        let mut state = self.state.lock();
        if state.memory.max_beyond_lifetime() < max {
            state.memory.set_max_beyond_lifetime(max);
            drop(state);
            info!(max = max, "Raised beyond-lifetime cache budget");
        }
    }

    /// Turns the disk tier on or off and sets its lifetime.
    ///
    /// Disabling leaves files where they are; they are neither read nor
    /// written until the tier is enabled again, at which point files older
    /// than the lifetime are discarded on read.
    pub fn enable_disk_cache(&self, enabled: bool, lifetime: Duration) {
        {
            let mut state = self.state.lock();
            state.disk_enabled = enabled;
            state.disk_lifetime = lifetime;
        }
        info!(
            enabled = enabled,
            lifetime_secs = lifetime.as_secs(),
            "Updated disk cache settings"
        );
    }

    /// Returns true if the disk tier is read and written.
    #[must_use]
    pub fn is_disk_cache_enabled(&self) -> bool {
        self.state.lock().disk_enabled
    }

    /// Age at which disk entries expire.
    #[must_use]
    pub fn disk_cache_lifetime(&self) -> Duration {
        self.state.lock().disk_lifetime
    }

    /// Returns true while a load for `key` is in flight.
    #[must_use]
    pub fn is_loading(&self, key: &CacheKey) -> bool {
        self.state.lock().pending.contains_key(key)
    }

    /// Returns true if `key` is held in memory, live or retained.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().memory.contains(key)
    }

    /// Number of viewers currently registered on a cached picture.
    #[must_use]
    pub fn viewer_count(&self, key: &CacheKey) -> usize {
        self.state.lock().memory.viewer_count(key)
    }

    /// Snapshot of hit, fetch and table counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats::new(
            &state.memory,
            self.fetches.load(Ordering::Relaxed),
            state.pending.len(),
        )
    }

    /// Drops every unreferenced picture from memory.
    pub fn clear_memory(&self) {
        self.state.lock().memory.clear_retained();
    }

    /// Removes every file of the disk tier.
    pub async fn clear_disk(&self) {
        if let Some(disk) = self.disk_cache().await
            && let Err(e) = disk.clear().await
        {
            warn!(error = %e, "Failed to clear disk cache");
        }
    }

    async fn disk_cache(&self) -> Option<Arc<DiskPictureCache>> {
        self.disk
            .get_or_init(|| async {
                match DiskPictureCache::new(self.disk_dir.clone(), self.disk_max_size).await {
                    Ok(cache) => Some(Arc::new(cache)),
                    Err(e) => {
                        warn!(dir = %self.disk_dir.display(), error = %e, "Disk cache unavailable");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    async fn run_load(self: Arc<Self>, key: CacheKey, disk_lifetime: Option<Duration>) {
        if let Some(lifetime) = disk_lifetime
            && let Some(disk) = self.disk_cache().await
        {
            match disk.get(&key, lifetime).await {
                Ok(Some(image)) => {
                    let picture = ProfilePicture::new(key.clone(), image, PictureSource::Disk);
                    self.complete(&key, Ok(picture));
                    return;
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Disk cache read failed, fetching"),
            }
        }

        self.enter_fetch_phase(&key);
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let result = match self.fetch_and_decode(&key).await {
            Ok((bytes, image)) => {
                self.persist(&key, &bytes).await;
                Ok(ProfilePicture::new(key.clone(), image, PictureSource::Network))
            }
            Err(e) => Err(e),
        };

        self.complete(&key, result);
    }

    fn enter_fetch_phase(&self, key: &CacheKey) {
        let slots: Vec<Arc<WaiterSlot>> = {
            let mut state = self.state.lock();
            let Some(pending) = state.pending.get_mut(key) else {
                return;
            };
            pending.phase = LoadPhase::Fetching;
            pending.waiters.iter().map(|w| Arc::clone(&w.slot)).collect()
        };

        for slot in slots {
            slot.start();
        }
    }

    async fn fetch_and_decode(
        &self,
        key: &CacheKey,
    ) -> Result<(Bytes, Arc<image::DynamicImage>), FetchError> {
        debug!(key = %key, "Fetching picture from network");
        let bytes = self.fetcher.fetch(key).await?;

        let bytes_for_decode = bytes.clone();
        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes_for_decode))
            .await
            .map_err(|e| FetchError::decode(format!("Decode task panicked: {e}")))?
            .map_err(|e| FetchError::decode(e.to_string()))?;

        Ok((bytes, Arc::new(decoded)))
    }

    async fn persist(&self, key: &CacheKey, bytes: &[u8]) {
        if !self.is_disk_cache_enabled() {
            return;
        }
        if let Some(disk) = self.disk_cache().await
            && let Err(e) = disk.put_bytes(key, bytes).await
        {
            warn!(key = %key, error = %e, "Failed to write picture to disk cache");
        }
    }

    fn complete(&self, key: &CacheKey, result: PictureResult) {
        let waiters = {
            let mut state = self.state.lock();
            let Some(pending) = state.pending.remove(key) else {
                return;
            };
            if let Ok(picture) = &result {
                state
                    .memory
                    .insert(picture.clone(), pending.waiters.iter().map(|w| w.viewer));
            }
            pending.waiters
        };

        match &result {
            Ok(picture) => {
                debug!(key = %key, source = %picture.source, waiters = waiters.len(), "Picture loaded");
            }
            Err(e) => {
                warn!(key = %key, error = %e, waiters = waiters.len(), "Picture load failed");
            }
        }

        for waiter in waiters {
            waiter.slot.complete(result.clone());
        }
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("disk_dir", &self.disk_dir)
            .field("disk_max_size", &self.disk_max_size)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Sets the beyond-lifetime budget of the process-wide cache.
pub fn set_max_images_cached_beyond_lifetime(max: usize) {
    ImageCache::global().set_max_images_cached_beyond_lifetime(max);
}

/// Returns the beyond-lifetime budget of the process-wide cache.
#[must_use]
pub fn max_images_cached_beyond_lifetime() -> usize {
    ImageCache::global().max_images_cached_beyond_lifetime()
}

/// Configures the disk tier of the process-wide cache.
pub fn enable_disk_cache(enabled: bool, lifetime: Duration) {
    ImageCache::global().enable_disk_cache(enabled, lifetime);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::PictureCropping;
    use crate::domain::ports::mock::MockPictureFetcher;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    const HOUR: Duration = Duration::from_secs(3600);

    #[derive(Debug)]
    enum Event {
        Started,
        Completed(PictureResult),
    }

    struct Harness {
        cache: Arc<ImageCache>,
        fetcher: Arc<MockPictureFetcher>,
        dir: TempDir,
    }

    fn harness(fetcher: MockPictureFetcher, max: usize, disk: bool) -> Harness {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(fetcher);
        let config = CacheConfig {
            max_images_cached_beyond_lifetime: max,
            disk_cache_enabled: disk,
            disk_cache_lifetime: HOUR,
            disk_cache_dir: dir.path().to_path_buf(),
            disk_cache_max_size: 1024 * 1024,
        };
        Harness {
            cache: Arc::new(ImageCache::new(fetcher.clone(), config)),
            fetcher,
            dir,
        }
    }

    fn key(id: &str) -> CacheKey {
        CacheKey::new(id, PictureCropping::Square).unwrap()
    }

    fn request(
        cache: &Arc<ImageCache>,
        key: CacheKey,
    ) -> (RequestHandle, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let start_tx = tx.clone();
        let handle = cache.request_image(
            key,
            move || {
                let _ = start_tx.send(Event::Started);
            },
            move |result| {
                let _ = tx.send(Event::Completed(result));
            },
        );
        (handle, rx)
    }

    async fn completion(rx: &mut mpsc::UnboundedReceiver<Event>) -> (bool, PictureResult) {
        let mut started = false;
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for completion")
                .expect("callbacks dropped without completing");
            match event {
                Event::Started => started = true,
                Event::Completed(result) => return (started, result),
            }
        }
    }

    #[tokio::test]
    async fn test_repeat_request_served_from_memory() {
        let h = harness(MockPictureFetcher::new(), 0, false);

        let (_first, mut rx) = request(&h.cache, key("1"));
        let (started, result) = completion(&mut rx).await;
        assert!(started);
        assert_eq!(result.unwrap().source, PictureSource::Network);

        let (_second, mut rx) = request(&h.cache, key("1"));
        let event = rx.try_recv().expect("memory hit completes synchronously");
        match event {
            Event::Completed(Ok(picture)) => assert_eq!(picture.source, PictureSource::Memory),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let h = harness(MockPictureFetcher::gated(), 0, false);

        let mut receivers = Vec::new();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let (handle, rx) = request(&h.cache, key("123"));
            handles.push(handle);
            receivers.push(rx);
        }
        h.fetcher.wait_for_calls(1).await;
        assert!(h.cache.is_loading(&key("123")));
        h.fetcher.release();

        let mut pictures = Vec::new();
        for rx in &mut receivers {
            let (started, result) = completion(rx).await;
            assert!(started);
            pictures.push(result.unwrap());
        }

        assert_eq!(h.fetcher.calls(), 1);
        assert!(pictures.iter().all(|p| p.same_image(&pictures[0])));
        assert_eq!(h.cache.viewer_count(&key("123")), 5);
        assert!(!h.cache.is_loading(&key("123")));
    }

    #[tokio::test]
    async fn test_joining_running_fetch_starts_immediately() {
        let h = harness(MockPictureFetcher::gated(), 0, false);

        let (_a, mut rx_a) = request(&h.cache, key("9"));
        h.fetcher.wait_for_calls(1).await;

        let (_b, mut rx_b) = request(&h.cache, key("9"));
        assert!(matches!(rx_b.try_recv(), Ok(Event::Started)));

        h.fetcher.release();
        assert!(completion(&mut rx_a).await.1.is_ok());
        assert!(completion(&mut rx_b).await.1.is_ok());
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_gets_no_callbacks() {
        let h = harness(MockPictureFetcher::gated(), 0, false);

        let (a, mut rx_a) = request(&h.cache, key("5"));
        let (_b, mut rx_b) = request(&h.cache, key("5"));
        h.fetcher.wait_for_calls(1).await;
        h.cache.cancel(&a);
        h.fetcher.release();

        assert!(completion(&mut rx_b).await.1.is_ok());
        while let Ok(event) = rx_a.try_recv() {
            assert!(matches!(event, Event::Started), "cancelled waiter completed");
        }
        assert!(rx_a.recv().await.is_none());
        assert_eq!(h.cache.viewer_count(&key("5")), 1);
    }

    #[tokio::test]
    async fn test_abandoned_load_still_caches_result() {
        let h = harness(MockPictureFetcher::gated(), 1, false);

        let (handle, _rx) = request(&h.cache, key("7"));
        h.fetcher.wait_for_calls(1).await;
        h.cache.cancel(&handle);
        h.fetcher.release();

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.cache.is_loading(&key("7")) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        assert!(h.cache.contains(&key("7")));
        assert_eq!(h.cache.stats().retained, 1);
    }

    #[tokio::test]
    async fn test_budget_keeps_most_recently_unreferenced() {
        let h = harness(MockPictureFetcher::new(), 2, false);

        let mut handles = Vec::new();
        for id in ["a", "b", "c"] {
            let (handle, mut rx) = request(&h.cache, key(id));
            assert!(completion(&mut rx).await.1.is_ok());
            handles.push(handle);
        }
        for handle in &handles {
            h.cache.cancel(handle);
        }

        assert!(!h.cache.contains(&key("a")));
        assert!(h.cache.contains(&key("b")));
        assert!(h.cache.contains(&key("c")));
        assert_eq!(h.cache.stats().retained, 2);

        h.cache.set_max_images_cached_beyond_lifetime(0);
        assert_eq!(h.cache.stats().retained, 0);
    }

    #[tokio::test]
    async fn test_disk_hit_skips_fetch_and_start() {
        let h = harness(MockPictureFetcher::new(), 0, true);

        let (handle, mut rx) = request(&h.cache, key("disk"));
        assert!(completion(&mut rx).await.1.is_ok());
        h.cache.cancel(&handle);
        assert!(!h.cache.contains(&key("disk")));

        let (_again, mut rx) = request(&h.cache, key("disk"));
        let (started, result) = completion(&mut rx).await;
        assert!(!started);
        assert_eq!(result.unwrap().source, PictureSource::Disk);
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_disk_entry_is_refetched() {
        let h = harness(MockPictureFetcher::new(), 0, true);

        let (handle, mut rx) = request(&h.cache, key("old"));
        assert!(completion(&mut rx).await.1.is_ok());
        h.cache.cancel(&handle);

        h.cache.enable_disk_cache(true, Duration::ZERO);
        let (_again, mut rx) = request(&h.cache, key("old"));
        let (started, result) = completion(&mut rx).await;

        assert!(started);
        assert_eq!(result.unwrap().source, PictureSource::Network);
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_disabled_disk_cache_writes_nothing() {
        let h = harness(MockPictureFetcher::new(), 0, false);

        let (_handle, mut rx) = request(&h.cache, key("mem"));
        assert!(completion(&mut rx).await.1.is_ok());

        let files = std::fs::read_dir(h.dir.path()).map_or(0, Iterator::count);
        assert_eq!(files, 0);
    }

    #[tokio::test]
    async fn test_failure_is_broadcast_and_not_cached() {
        let fetcher = MockPictureFetcher::gated();
        fetcher.fail_with(FetchError::Http { status: 404 });
        let h = harness(fetcher, 4, true);

        let (_a, mut rx_a) = request(&h.cache, key("gone"));
        let (_b, mut rx_b) = request(&h.cache, key("gone"));
        h.fetcher.wait_for_calls(1).await;
        h.fetcher.release();

        for rx in [&mut rx_a, &mut rx_b] {
            let (_, result) = completion(rx).await;
            assert_eq!(result.unwrap_err(), FetchError::Http { status: 404 });
        }
        assert!(!h.cache.contains(&key("gone")));
        assert!(!h.cache.is_loading(&key("gone")));

        h.fetcher.succeed();
        let (_c, mut rx_c) = request(&h.cache, key("gone"));
        assert!(completion(&mut rx_c).await.1.is_ok());
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_raise_budget_never_lowers() {
        let h = harness(MockPictureFetcher::new(), 5, false);

        h.cache.raise_max_images_cached_beyond_lifetime(3);
        assert_eq!(h.cache.max_images_cached_beyond_lifetime(), 5);

        h.cache.raise_max_images_cached_beyond_lifetime(8);
        assert_eq!(h.cache.max_images_cached_beyond_lifetime(), 8);
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("callbacks never released")
        {
            events.push(event);
        }
        events
    }

    fn disk_path(dir: &TempDir, key: &CacheKey) -> std::path::PathBuf {
        dir.path().join(format!("{}.img", key.file_stem()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_late_joiner_never_starts_after_completing() {
        for _ in 0..200 {
            let h = harness(MockPictureFetcher::gated(), 0, false);
            let (_a, mut rx_a) = request(&h.cache, key("race"));
            h.fetcher.wait_for_calls(1).await;

            let fetcher = Arc::clone(&h.fetcher);
            let release = tokio::spawn(async move { fetcher.release() });
            let (_b, mut rx_b) = request(&h.cache, key("race"));
            release.await.unwrap();

            assert!(completion(&mut rx_a).await.1.is_ok());
            let events = drain(&mut rx_b).await;
            match events.as_slice() {
                [Event::Completed(Ok(_))] | [Event::Started, Event::Completed(Ok(_))] => {}
                other => panic!("unexpected callback order: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_from_start_callback_suppresses_completion() {
        let h = harness(MockPictureFetcher::gated(), 0, false);
        let own_handle: Arc<Mutex<Option<RequestHandle>>> = Arc::new(Mutex::new(None));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let start_tx = tx.clone();
        let cache = Arc::clone(&h.cache);
        let cell = Arc::clone(&own_handle);
        let handle = h.cache.request_image(
            key("self"),
            move || {
                let _ = start_tx.send(Event::Started);
                if let Some(handle) = cell.lock().as_ref() {
                    cache.cancel(handle);
                }
            },
            move |result| {
                let _ = tx.send(Event::Completed(result));
            },
        );
        *own_handle.lock() = Some(handle);

        h.fetcher.wait_for_calls(1).await;
        h.fetcher.release();

        let events = drain(&mut rx).await;
        assert!(matches!(events.as_slice(), [Event::Started]));
        assert_eq!(h.cache.viewer_count(&key("self")), 0);
    }

    #[tokio::test]
    async fn test_corrupt_disk_file_falls_back_to_network() {
        let h = harness(MockPictureFetcher::new(), 0, true);
        let k = key("corrupt");
        std::fs::write(disk_path(&h.dir, &k), b"not an image").unwrap();

        let (_handle, mut rx) = request(&h.cache, k);
        let (started, result) = completion(&mut rx).await;

        assert!(started);
        assert_eq!(result.unwrap().source, PictureSource::Network);
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_unusable_disk_dir_falls_back_to_network() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"a file, not a directory").unwrap();
        let fetcher = Arc::new(MockPictureFetcher::new());
        let cache = Arc::new(ImageCache::new(
            fetcher.clone(),
            CacheConfig {
                disk_cache_enabled: true,
                disk_cache_dir: blocker.clone(),
                ..CacheConfig::default()
            },
        ));

        let (_handle, mut rx) = request(&cache, key("nodisk"));
        let (_, result) = completion(&mut rx).await;

        assert_eq!(result.unwrap().source, PictureSource::Network);
        assert_eq!(fetcher.calls(), 1);
        assert!(blocker.is_file());
    }

    #[tokio::test]
    async fn test_reenabled_disk_cache_deletes_stale_file() {
        let h = harness(MockPictureFetcher::new(), 0, true);
        let k = key("toggle");
        let path = disk_path(&h.dir, &k);

        let (first, mut rx) = request(&h.cache, k.clone());
        assert!(completion(&mut rx).await.1.is_ok());
        h.cache.cancel(&first);
        assert!(path.exists());

        h.cache.enable_disk_cache(false, HOUR);
        let (second, mut rx) = request(&h.cache, k.clone());
        assert_eq!(
            completion(&mut rx).await.1.unwrap().source,
            PictureSource::Network
        );
        h.cache.cancel(&second);
        assert!(path.exists());

        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(std::time::SystemTime::now() - 2 * HOUR)
            .unwrap();
        h.cache.enable_disk_cache(true, HOUR);
        h.fetcher.fail_with(FetchError::Http { status: 500 });

        let (_third, mut rx) = request(&h.cache, k);
        assert!(completion(&mut rx).await.1.is_err());
        assert!(!path.exists());
        assert_eq!(h.fetcher.calls(), 3);
    }

    // The only test touching the process-wide cache.
    #[test]
    fn test_free_functions_drive_installed_global() {
        let h = harness(MockPictureFetcher::new(), 0, false);
        assert!(ImageCache::install_global(Arc::clone(&h.cache)).is_ok());
        assert!(Arc::ptr_eq(&ImageCache::global(), &h.cache));

        set_max_images_cached_beyond_lifetime(6);
        assert_eq!(max_images_cached_beyond_lifetime(), 6);
        assert_eq!(h.cache.max_images_cached_beyond_lifetime(), 6);

        enable_disk_cache(true, Duration::from_secs(90));
        assert!(h.cache.is_disk_cache_enabled());
        assert_eq!(h.cache.disk_cache_lifetime(), Duration::from_secs(90));
    }

    #[test]
    fn test_request_outside_runtime_fails_cleanly() {
        let h = harness(MockPictureFetcher::new(), 0, false);
        let (_handle, mut rx) = request(&h.cache, key("1"));

        match rx.try_recv() {
            Ok(Event::Completed(Err(FetchError::Network { .. }))) => {}
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!h.cache.is_loading(&key("1")));
    }
}
