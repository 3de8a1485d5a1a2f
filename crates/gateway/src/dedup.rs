use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Dedup key: a visitor is collapsed onto the entity it viewed when the
/// route carries one, otherwise onto the request path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    visitor_signature: String,
    target: String,
}

impl DedupKey {
    pub fn for_target(visitor_signature: &str, target_id: ulid::Ulid) -> Self {
        Self {
            visitor_signature: visitor_signature.to_string(),
            target: target_id.to_string(),
        }
    }

    pub fn for_path(visitor_signature: &str, path: &str) -> Self {
        Self {
            visitor_signature: visitor_signature.to_string(),
            target: path.to_string(),
        }
    }
}

/// In-process, time-windowed record of recently counted views.
///
/// Correct for a single process only: the map does not survive restarts and
/// is not shared across instances. Scaling out requires replacing this with
/// an atomically-updatable shared store.
#[derive(Clone)]
pub struct DedupCache {
    seen: Arc<Mutex<HashMap<DedupKey, Instant>>>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
    window: Duration,
    sweep_interval: Duration,
}

impl DedupCache {
    pub fn new(window: Duration, sweep_interval: Duration) -> Self {
        Self {
            seen: Arc::new(Mutex::new(HashMap::new())),
            sweeper: Arc::new(Mutex::new(None)),
            window,
            sweep_interval,
        }
    }

    /// Check-and-set: returns true and stamps `now` when the key has not
    /// been accepted within the window. A suppressed hit does not refresh
    /// the stamp, so a burst of requests cannot extend its own suppression.
    ///
    /// The stamp lands before this returns, which closes the race between
    /// two near-simultaneous requests for the same key — the decision and
    /// the mark happen under one lock acquisition.
    pub fn should_record(&self, key: DedupKey, now: Instant) -> bool {
        let mut seen = lock(&self.seen);
        match seen.get(&key) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                seen.insert(key, now);
                true
            }
        }
    }

    /// Spawns the periodic sweep. Idempotent; the sweep only bounds memory,
    /// `should_record` re-checks entry age on every call regardless.
    pub fn start(&self) {
        let mut sweeper = lock(&self.sweeper);
        if sweeper.is_some() {
            return;
        }

        let seen = Arc::clone(&self.seen);
        let window = self.window;
        let sweep_interval = self.sweep_interval;

        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let now = Instant::now();
                lock(&seen).retain(|_, last| now.duration_since(*last) <= window);
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = lock(&self.sweeper).take() {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.seen).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);
    const SWEEP: Duration = Duration::from_secs(300);

    fn cache() -> DedupCache {
        DedupCache::new(WINDOW, SWEEP)
    }

    fn key(signature: &str, path: &str) -> DedupKey {
        DedupKey::for_path(signature, path)
    }

    #[tokio::test]
    async fn repeat_within_window_is_suppressed() {
        let cache = cache();
        let t0 = Instant::now();

        assert!(cache.should_record(key("1.2.3.4", "/archive"), t0));
        assert!(!cache.should_record(key("1.2.3.4", "/archive"), t0 + Duration::from_secs(30)));
        assert!(cache.should_record(key("1.2.3.4", "/archive"), t0 + Duration::from_secs(61)));
    }

    #[tokio::test]
    async fn suppressed_hits_do_not_extend_the_window() {
        let cache = cache();
        let t0 = Instant::now();

        assert!(cache.should_record(key("1.2.3.4", "/archive"), t0));
        assert!(!cache.should_record(key("1.2.3.4", "/archive"), t0 + Duration::from_secs(50)));
        // The window is anchored at the accepted hit, not the suppressed one.
        assert!(cache.should_record(key("1.2.3.4", "/archive"), t0 + Duration::from_secs(70)));
    }

    #[tokio::test]
    async fn distinct_visitors_and_targets_are_independent() {
        let cache = cache();
        let t0 = Instant::now();

        assert!(cache.should_record(key("1.2.3.4", "/archive"), t0));
        assert!(cache.should_record(key("5.6.7.8", "/archive"), t0));
        assert!(cache.should_record(key("1.2.3.4", "/about"), t0));

        let id = ulid::Ulid::from_string("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();
        assert!(cache.should_record(DedupKey::for_target("1.2.3.4", id), t0));
        assert!(!cache.should_record(DedupKey::for_target("1.2.3.4", id), t0));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_only_expired_entries() {
        let cache = cache();
        cache.start();
        // Let the sweeper task register its interval before the clock moves.
        tokio::task::yield_now().await;

        let t0 = Instant::now();
        assert!(cache.should_record(key("1.2.3.4", "/archive"), t0));
        assert_eq!(cache.len(), 1);

        // Re-stamp a second key shortly before the sweep fires so it is
        // still inside the window when the sweeper runs.
        tokio::time::advance(SWEEP - Duration::from_secs(10)).await;
        assert!(cache.should_record(key("5.6.7.8", "/archive"), Instant::now()));
        assert_eq!(cache.len(), 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(cache.len(), 1);
        // The swept key is immediately eligible again.
        assert!(cache.should_record(key("1.2.3.4", "/archive"), Instant::now()));

        cache.stop();
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_aborts() {
        let cache = cache();
        cache.start();
        cache.start();
        cache.stop();
        // Stopping twice is a no-op.
        cache.stop();
    }
}
