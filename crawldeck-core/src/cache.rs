//! Keyed result cache with request de-duplication, invalidation and polling.
//!
//! Each key owns at most one in-flight fetch. Every fetch carries a generation
//! drawn from a cache-wide counter and its response is only written back if
//! that generation is still the key's current one. Invalidating a key moves it
//! to a fresh generation, and a key that is removed and re-created never gets
//! an old one back, so a response that raced either is dropped.

use crawldeck_api::{ApiError, Result};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_IDLE_EVICTION: Duration = Duration::from_secs(300);

type Fetcher<K, V> = Arc<dyn Fn(K) -> BoxFuture<'static, Result<V>> + Send + Sync>;
type SharedFetch<V> = Shared<BoxFuture<'static, Result<V>>>;

/// What a consumer sees for one key.
#[derive(Debug, Clone)]
pub struct QueryState<V> {
    pub data: Option<V>,
    pub error: Option<ApiError>,
    pub is_loading: bool,
    pub is_stale: bool,
    pub updated_at: Option<Instant>,
}

impl<V> QueryState<V> {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl<V> Default for QueryState<V> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: false,
            is_stale: false,
            updated_at: None,
        }
    }
}

struct Entry<V> {
    data: Option<V>,
    error: Option<ApiError>,
    stale: bool,
    generation: u64,
    in_flight: Option<SharedFetch<V>>,
    subscribers: usize,
    idle_since: Option<Instant>,
    updated_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn new() -> Self {
        Self {
            data: None,
            error: None,
            stale: false,
            generation: 0,
            in_flight: None,
            subscribers: 0,
            idle_since: Some(Instant::now()),
            updated_at: None,
        }
    }

    fn is_fresh(&self) -> bool {
        self.data.is_some() && !self.stale
    }
}

struct Inner<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    fetcher: Fetcher<K, V>,
    version: watch::Sender<u64>,
    generations: AtomicU64,
    idle_window: Duration,
}

/// Cache of the last known server response per key.
pub struct QueryCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for QueryCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> QueryCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(fetcher: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        Self::with_idle_window(fetcher, DEFAULT_IDLE_EVICTION)
    }

    pub fn with_idle_window<F, Fut>(fetcher: F, idle_window: Duration) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let fetcher: Fetcher<K, V> = Arc::new(move |key| fetcher(key).boxed());
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                fetcher,
                version,
                generations: AtomicU64::new(0),
                idle_window,
            }),
        }
    }

    /// Current state for `key`; an unknown key reads as empty and idle.
    pub fn get(&self, key: &K) -> QueryState<V> {
        let entries = self.lock();
        match entries.get(key) {
            Some(entry) => QueryState {
                data: entry.data.clone(),
                error: entry.error.clone(),
                is_loading: entry.in_flight.is_some(),
                is_stale: entry.stale,
                updated_at: entry.updated_at,
            },
            None => QueryState::default(),
        }
    }

    /// Starts a fetch for `key`, or joins the one already in flight.
    ///
    /// The request is issued when this is called, not when the returned
    /// future is first polled, and it runs to completion on the runtime even
    /// if the returned future is dropped.
    pub fn fetch(&self, key: &K) -> impl Future<Output = Result<V>> + Send + use<K, V> {
        let mut entries = self.lock();
        let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
        let (shared, started) = self.join_or_start(key, entry);
        drop(entries);

        if started {
            self.spawn_driver(&shared);
            self.notify();
        }
        shared
    }

    /// Returns cached data when it is present and not stale, else fetches.
    pub async fn ensure(&self, key: &K) -> Result<V> {
        let cached = {
            let entries = self.lock();
            entries
                .get(key)
                .filter(|entry| entry.is_fresh() && entry.in_flight.is_none())
                .and_then(|entry| entry.data.clone())
        };
        match cached {
            Some(data) => Ok(data),
            None => self.fetch(key).await,
        }
    }

    /// Marks `key` stale and discards any response still in flight for it.
    /// A key with subscribers is re-fetched straight away.
    pub fn invalidate(&self, key: &K) {
        self.invalidate_where(|k| k == key);
    }

    pub fn invalidate_all(&self) {
        self.invalidate_where(|_| true);
    }

    pub fn invalidate_where<P>(&self, predicate: P)
    where
        P: Fn(&K) -> bool,
    {
        let mut refetch = Vec::new();
        let mut touched = 0usize;
        {
            let mut entries = self.lock();
            for (key, entry) in entries.iter_mut() {
                if !predicate(key) {
                    continue;
                }
                touched += 1;
                entry.stale = true;
                if entry.in_flight.take().is_some() {
                    entry.generation = self.next_generation();
                    debug!(key = ?key, "detached in-flight fetch on invalidation");
                }
                if entry.subscribers > 0 {
                    let (shared, _) = self.join_or_start(key, entry);
                    refetch.push(shared);
                }
            }
        }

        debug!(touched, refetching = refetch.len(), "invalidated cache entries");
        for shared in &refetch {
            self.spawn_driver(shared);
        }
        if touched > 0 {
            self.notify();
        }
    }

    /// Drops `key` outright when nobody is watching it, otherwise behaves like
    /// [`QueryCache::invalidate`].
    pub fn forget(&self, key: &K) {
        let removed = {
            let mut entries = self.lock();
            let Some(subscribers) = entries.get(key).map(|entry| entry.subscribers) else {
                return;
            };
            subscribers == 0 && entries.remove(key).is_some()
        };

        if removed {
            debug!(key = ?key, "forgot cache entry");
            self.notify();
        } else {
            self.invalidate(key);
        }
    }

    /// Registers interest in `key` until the returned guard is dropped.
    ///
    /// Inside a runtime, a key with no data yet or only stale data is fetched
    /// straight away.
    pub fn subscribe(&self, key: &K) -> Subscription {
        self.evict_idle();

        let started = {
            let mut entries = self.lock();
            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
            entry.subscribers += 1;
            entry.idle_since = None;

            let wanted = !entry.is_fresh()
                && entry.in_flight.is_none()
                && Handle::try_current().is_ok();
            wanted.then(|| self.join_or_start(key, entry).0)
        };
        if let Some(shared) = &started {
            self.spawn_driver(shared);
            self.notify();
        }

        let weak = Arc::downgrade(&self.inner);
        let key = key.clone();
        Subscription {
            release: Some(Box::new(move || release(&weak, &key))),
        }
    }

    pub fn subscribers(&self, key: &K) -> usize {
        self.lock().get(key).map_or(0, |entry| entry.subscribers)
    }

    /// Re-fetches `key` every `interval` while it has subscribers.
    ///
    /// A tick that finds a fetch still in flight is skipped rather than
    /// queued, so slow responses never stack.
    pub fn poll(&self, key: &K, interval: Duration) -> PollHandle {
        let closed = Arc::new(AtomicBool::new(false));
        let weak = Arc::downgrade(&self.inner);
        let key = key.clone();
        let task_closed = closed.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; the initial load is the
            // caller's job.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if task_closed.load(Ordering::Acquire) {
                    break;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let cache = QueryCache { inner };
                let pending = cache.poll_tick(&key);
                drop(cache);

                if let Some(pending) = pending {
                    // Outcome lands in the cache; nothing to do with it here.
                    let _ = pending.await;
                }
            }
            debug!(key = ?key, "poller stopped");
        });

        PollHandle {
            closed,
            task: Some(task),
        }
    }

    /// Receiver that changes whenever any entry changes.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    /// Removes entries that have had no subscribers and no fetch in flight
    /// for longer than the idle window.
    pub fn evict_idle(&self) -> usize {
        let window = self.inner.idle_window;
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| {
            entry.subscribers > 0
                || entry.in_flight.is_some()
                || entry
                    .idle_since
                    .is_none_or(|since| since.elapsed() < window)
        });
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "evicted idle cache entries");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn poll_tick(&self, key: &K) -> Option<SharedFetch<V>> {
        let shared = {
            let mut entries = self.lock();
            let entry = entries.get_mut(key)?;
            if entry.subscribers == 0 {
                debug!(key = ?key, "poll tick skipped, no subscribers");
                return None;
            }
            if entry.in_flight.is_some() {
                debug!(key = ?key, "poll tick skipped, fetch in flight");
                return None;
            }
            let (shared, _) = self.join_or_start(key, entry);
            shared
        };

        self.spawn_driver(&shared);
        self.notify();
        Some(shared)
    }

    /// Must be called with the entry lock held.
    fn join_or_start(&self, key: &K, entry: &mut Entry<V>) -> (SharedFetch<V>, bool) {
        if let Some(in_flight) = &entry.in_flight {
            debug!(key = ?key, "joining in-flight fetch");
            return (in_flight.clone(), false);
        }

        let generation = self.next_generation();
        entry.generation = generation;
        let request = (self.inner.fetcher)(key.clone());
        let weak = Arc::downgrade(&self.inner);
        let key = key.clone();

        debug!(key = ?key, generation, "starting fetch");
        let shared = async move {
            let result = request.await;
            if let Some(inner) = weak.upgrade() {
                QueryCache { inner }.apply(&key, generation, &result);
            }
            result
        }
        .boxed()
        .shared();

        entry.in_flight = Some(shared.clone());
        (shared, true)
    }

    fn apply(&self, key: &K, generation: u64, result: &Result<V>) {
        {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(key) else {
                debug!(key = ?key, "discarding response for evicted entry");
                return;
            };
            if entry.generation != generation {
                debug!(
                    key = ?key,
                    generation,
                    current = entry.generation,
                    "discarding superseded response"
                );
                return;
            }

            entry.in_flight = None;
            match result {
                Ok(data) => {
                    // Whole-value replacement; nothing survives from the
                    // previous payload.
                    entry.data = Some(data.clone());
                    entry.error = None;
                    entry.stale = false;
                    entry.updated_at = Some(Instant::now());
                }
                Err(e) => {
                    debug!(key = ?key, "fetch failed, keeping last good data: {}", e);
                    entry.error = Some(e.clone());
                }
            }
        }
        self.notify();
    }

    fn spawn_driver(&self, shared: &SharedFetch<V>) {
        // Outside a runtime the caller's own await drives the request.
        if let Ok(handle) = Handle::try_current() {
            let shared = shared.clone();
            handle.spawn(async move {
                let _ = shared.await;
            });
        }
    }

    fn next_generation(&self) -> u64 {
        self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn notify(&self) {
        self.inner.version.send_modify(|v| *v += 1);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn release<K, V>(weak: &Weak<Inner<K, V>>, key: &K)
where
    K: Eq + Hash,
{
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let mut entries = inner.entries.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(entry) = entries.get_mut(key) {
        entry.subscribers = entry.subscribers.saturating_sub(1);
        if entry.subscribers == 0 {
            entry.idle_since = Some(Instant::now());
        }
    }
}

/// Interest in one cache key. Dropping it releases the interest.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Handle on a polling task. Closing it (explicitly or by drop) stops the
/// task before its next tick.
#[derive(Debug)]
pub struct PollHandle {
    closed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn close(mut self) {
        self.shutdown();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn shutdown(&mut self) {
        self.closed.store(true, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    type Payload = BTreeMap<String, String>;

    fn payload(pairs: &[(&str, &str)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Cache whose fetcher counts calls and sleeps `delay` before answering.
    fn counting_cache(delay: Duration) -> (QueryCache<u32, u32>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache = QueryCache::new(move |key: u32| {
            let n = counter.fetch_add(1, Ordering::SeqCst) as u32;
            async move {
                tokio::time::sleep(delay).await;
                Ok(key * 100 + n)
            }
        });
        (cache, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetches_share_one_request() {
        let (cache, calls) = counting_cache(Duration::from_millis(50));

        let first = cache.fetch(&1);
        let second = cache.fetch(&1);
        assert!(cache.get(&1).is_loading);

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.unwrap(), 100);
        assert_eq!(b.unwrap(), 100);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.get(&1).is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_fetch_separately() {
        let (cache, calls) = counting_cache(Duration::from_millis(10));

        let (a, b) = tokio::join!(cache.fetch(&1), cache.fetch(&2));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refetch_replaces_whole_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache: QueryCache<u32, Payload> = QueryCache::new(move |_key| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(payload(&[("status", "running"), ("title", "Partial")]))
                } else {
                    Ok(payload(&[("status", "completed")]))
                }
            }
        });

        cache.fetch(&7).await.unwrap();
        cache.fetch(&7).await.unwrap();

        let data = cache.get(&7).data.unwrap();
        assert_eq!(data, payload(&[("status", "completed")]));
        assert!(!data.contains_key("title"));
    }

    #[tokio::test]
    async fn test_failure_keeps_last_good_data() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache: QueryCache<u32, u32> = QueryCache::new(move |_key| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(1)
                } else {
                    Err(ApiError::TransportUnavailable("connection refused".to_string()))
                }
            }
        });

        cache.fetch(&1).await.unwrap();
        assert!(cache.fetch(&1).await.is_err());

        let state = cache.get(&1);
        assert_eq!(state.data, Some(1));
        assert!(state.is_error());
        assert!(!state.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_discards_late_response() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache: QueryCache<u32, &'static str> = QueryCache::new(move |_key| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok("before mutation")
                } else {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok("after mutation")
                }
            }
        });

        let old = cache.fetch(&1);
        cache.invalidate(&1);
        let new = cache.fetch(&1);

        assert_eq!(new.await.unwrap(), "after mutation");
        // The detached request still resolves for whoever awaited it ...
        assert_eq!(old.await.unwrap(), "before mutation");
        // ... but never overwrites the newer result.
        assert_eq!(cache.get(&1).data, Some("after mutation"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ensure_uses_fresh_data() {
        let (cache, calls) = counting_cache(Duration::ZERO);

        assert_eq!(cache.ensure(&3).await.unwrap(), 300);
        assert_eq!(cache.ensure(&3).await.unwrap(), 300);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate(&3);
        assert!(cache.get(&3).is_stale);
        assert_eq!(cache.ensure(&3).await.unwrap(), 301);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.get(&3).is_stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_refetches_subscribed_keys_only() {
        let (cache, calls) = counting_cache(Duration::from_millis(1));
        cache.fetch(&1).await.unwrap();
        cache.fetch(&2).await.unwrap();

        let _watching = cache.subscribe(&1);
        cache.invalidate_all();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!cache.get(&1).is_stale);
        assert!(cache.get(&2).is_stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_refetches_on_interval() {
        let (cache, calls) = counting_cache(Duration::from_millis(10));
        // Subscribing loads the key; the poller then fires at 5s and 10s.
        let _sub = cache.subscribe(&1);
        let _poll = cache.poll(&1, DEFAULT_POLL_INTERVAL);

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_without_subscribers_is_idle() {
        let (cache, calls) = counting_cache(Duration::from_millis(10));
        cache.fetch(&1).await.unwrap();
        let _poll = cache.poll(&1, DEFAULT_POLL_INTERVAL);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_responses_do_not_stack() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let (a, p, c) = (active.clone(), peak.clone(), calls.clone());

        let cache: QueryCache<u32, u32> = QueryCache::new(move |_key| {
            let (a, p) = (a.clone(), p.clone());
            c.fetch_add(1, Ordering::SeqCst);
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(12)).await;
                a.fetch_sub(1, Ordering::SeqCst);
                Ok(0)
            }
        });

        // Loads at 0s (until 12s) and 15s (until 27s); every other tick
        // finds a fetch in flight.
        let _sub = cache.subscribe(&1);
        let _poll = cache.poll(&1, Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(29)).await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_poller_never_fires() {
        let (cache, calls) = counting_cache(Duration::from_millis(10));
        let _sub = cache.subscribe(&1);
        let poll = cache.poll(&1, Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        poll.close();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_counts_and_idle_eviction() {
        let (cache, _calls) = counting_cache(Duration::ZERO);

        let sub = cache.subscribe(&1);
        cache.fetch(&1).await.unwrap();
        assert_eq!(cache.subscribers(&1), 1);

        drop(sub);
        assert_eq!(cache.subscribers(&1), 0);
        assert_eq!(cache.evict_idle(), 0);

        tokio::time::sleep(DEFAULT_IDLE_EVICTION + Duration::from_secs(1)).await;
        assert_eq!(cache.evict_idle(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_forget_respects_subscribers() {
        let (cache, _calls) = counting_cache(Duration::ZERO);
        cache.fetch(&1).await.unwrap();
        cache.fetch(&2).await.unwrap();

        let _watching = cache.subscribe(&2);
        cache.forget(&1);
        cache.forget(&2);

        assert!(cache.get(&1).data.is_none());
        assert!(cache.get(&2).data.is_some());
        assert!(cache.get(&2).is_stale);
    }

    /// Fetcher whose first call answers "before delete" after `first`, and
    /// every later call "after delete" after `later`.
    fn before_after_cache(
        first: Duration,
        later: Duration,
    ) -> (QueryCache<u32, &'static str>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache = QueryCache::new(move |_key| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(first).await;
                    Ok("before delete")
                } else {
                    tokio::time::sleep(later).await;
                    Ok("after delete")
                }
            }
        });
        (cache, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_forgotten_key_ignores_earlier_response() {
        let (cache, calls) =
            before_after_cache(Duration::from_millis(100), Duration::from_millis(10));

        let old = cache.fetch(&1);
        cache.forget(&1);
        let new = cache.fetch(&1);

        assert_eq!(new.await.unwrap(), "after delete");
        assert_eq!(old.await.unwrap(), "before delete");
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(cache.get(&1).data, Some("after delete"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_response_keeps_new_fetch_in_flight() {
        let (cache, calls) =
            before_after_cache(Duration::from_millis(50), Duration::from_millis(100));

        let _old = cache.fetch(&1);
        cache.forget(&1);
        let _new = cache.fetch(&1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let state = cache.get(&1);
        assert!(state.is_loading);
        assert_eq!(state.data, None);

        // Still one request per key.
        let joined = cache.fetch(&1);
        assert_eq!(joined.await.unwrap(), "after delete");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get(&1).data, Some("after delete"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_key_ignores_earlier_response() {
        let (cache, calls) = before_after_cache(
            DEFAULT_IDLE_EVICTION + Duration::from_secs(10),
            Duration::from_millis(10),
        );

        let old = cache.fetch(&1);
        cache.invalidate(&1);
        tokio::time::sleep(DEFAULT_IDLE_EVICTION + Duration::from_secs(1)).await;
        assert_eq!(cache.evict_idle(), 1);

        assert_eq!(cache.fetch(&1).await.unwrap(), "after delete");
        assert_eq!(old.await.unwrap(), "before delete");

        let state = cache.get(&1);
        assert_eq!(state.data, Some("after delete"));
        assert!(!state.is_loading);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_loads_missing_or_stale_keys() {
        let (cache, calls) = counting_cache(Duration::from_millis(10));

        let _first = cache.subscribe(&1);
        assert!(cache.get(&1).is_loading);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get(&1).data, Some(100));

        // Fresh data is reused.
        let _second = cache.subscribe(&1);
        assert!(!cache.get(&1).is_loading);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.fetch(&2).await.unwrap();
        cache.invalidate(&2);
        let _third = cache.subscribe(&2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get(&2).data, Some(202));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_subscribe_outside_runtime_does_not_fetch() {
        let (cache, calls) = counting_cache(Duration::ZERO);
        let _sub = cache.subscribe(&1);

        assert!(!cache.get(&1).is_loading);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_changes_are_published() {
        let (cache, _calls) = counting_cache(Duration::ZERO);
        let mut changes = cache.changes();
        let before = *changes.borrow_and_update();

        cache.fetch(&1).await.unwrap();
        assert!(changes.has_changed().unwrap());
        assert!(*changes.borrow_and_update() > before);
    }
}
