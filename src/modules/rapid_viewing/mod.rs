//! Rapid-viewing detection.
//!
//! Flags bursts of view events using a durable timestamp log, so the verdict
//! survives restarts of the hosting process. Storage trouble of any kind
//! degrades to "not flagged".

use std::sync::Mutex;
use std::time::Duration;

use super::clock::{Clock, SystemClock, duration_millis, within_window};
use super::rate_limit::PolicyError;
use crate::external_deps::storage::{KeyValueStore, StorageError};

pub const DEFAULT_MAX_VIEWS: usize = 20;
pub const DEFAULT_VIEW_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_VIEW_STORAGE_KEY: &str = "property_views";

/// Burst threshold and the store key holding the view log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RapidViewPolicy {
    max_views: usize,
    window: Duration,
    storage_key: String,
}

impl RapidViewPolicy {
    pub fn new(
        max_views: usize,
        window: Duration,
        storage_key: impl Into<String>,
    ) -> Result<Self, PolicyError> {
        if max_views == 0 {
            return Err(PolicyError::ZeroRequests);
        }
        if duration_millis(window) == 0 {
            return Err(PolicyError::ZeroWindow(window));
        }
        Ok(Self {
            max_views,
            window,
            storage_key: storage_key.into(),
        })
    }

    pub fn max_views(&self) -> usize {
        self.max_views
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }
}

impl Default for RapidViewPolicy {
    fn default() -> Self {
        Self {
            max_views: DEFAULT_MAX_VIEWS,
            window: DEFAULT_VIEW_WINDOW,
            storage_key: DEFAULT_VIEW_STORAGE_KEY.to_string(),
        }
    }
}

pub struct RapidViewDetector<S: KeyValueStore, C: Clock = SystemClock> {
    store: S,
    policy: RapidViewPolicy,
    clock: C,
    guard: Mutex<()>,
}

impl<S: KeyValueStore> RapidViewDetector<S, SystemClock> {
    pub fn new(store: S, policy: RapidViewPolicy) -> Self {
        Self::with_clock(store, policy, SystemClock)
    }
}

impl<S: KeyValueStore, C: Clock> RapidViewDetector<S, C> {
    pub fn with_clock(store: S, policy: RapidViewPolicy, clock: C) -> Self {
        Self {
            store,
            policy,
            clock,
            guard: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &RapidViewPolicy {
        &self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records one view and returns `true` when the burst threshold was
    /// already reached. Flagged views are not recorded.
    pub fn record_view(&self) -> bool {
        let _serialised = self.guard.lock().unwrap_or_else(|p| p.into_inner());
        match self.try_record_view() {
            Ok(flagged) => flagged,
            Err(err) => {
                log::warn!(
                    "rapid-view log '{}' unavailable, not flagging: {}",
                    self.policy.storage_key,
                    err
                );
                false
            }
        }
    }

    /// Entries of the persisted log still inside the window.
    pub fn recent_views(&self) -> Vec<u64> {
        let now = self.clock.now_millis();
        match self.load(now) {
            Ok(views) => views,
            Err(err) => {
                log::warn!("rapid-view log '{}' unreadable: {}", self.policy.storage_key, err);
                Vec::new()
            }
        }
    }

    fn try_record_view(&self) -> Result<bool, StorageError> {
        let now = self.clock.now_millis();
        let mut views = self.load(now)?;

        if views.len() >= self.policy.max_views {
            log::debug!(
                "rapid viewing flagged: {} views within {:?}",
                views.len(),
                self.policy.window
            );
            return Ok(true);
        }

        views.push(now);
        let encoded =
            serde_json::to_string(&views).map_err(|err| StorageError::Backend(err.to_string()))?;
        self.store.set(&self.policy.storage_key, &encoded)?;
        Ok(false)
    }

    fn load(&self, now: u64) -> Result<Vec<u64>, StorageError> {
        let Some(raw) = self.store.get(&self.policy.storage_key)? else {
            return Ok(Vec::new());
        };

        let views: Vec<u64> = match serde_json::from_str(&raw) {
            Ok(views) => views,
            Err(err) => {
                log::debug!(
                    "discarding corrupt rapid-view log '{}': {}",
                    self.policy.storage_key,
                    err
                );
                Vec::new()
            }
        };

        let window = duration_millis(self.policy.window);
        Ok(views
            .into_iter()
            .filter(|ts| within_window(*ts, now, window))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_deps::storage::MemoryStore;
    use crate::modules::clock::ManualClock;
    use std::sync::Arc;

    type TestDetector = RapidViewDetector<Arc<MemoryStore>, ManualClock>;

    fn detector() -> (TestDetector, Arc<MemoryStore>, ManualClock) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(1_000_000);
        let detector =
            RapidViewDetector::with_clock(store.clone(), RapidViewPolicy::default(), clock.clone());
        (detector, store, clock)
    }

    fn persisted(store: &MemoryStore) -> Vec<u64> {
        serde_json::from_str(&store.get(DEFAULT_VIEW_STORAGE_KEY).unwrap().unwrap()).unwrap()
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("storage disabled".into()))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("storage disabled".into()))
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn flags_flood_without_recording_it() {
        let (detector, store, clock) = detector();
        for _ in 0..20 {
            assert!(!detector.record_view());
            clock.advance(Duration::from_millis(100));
        }

        assert!(detector.record_view());
        assert_eq!(persisted(&store).len(), 20);
        assert_eq!(detector.recent_views().len(), 20);
    }

    #[test]
    fn old_views_age_out_of_the_window() {
        let (detector, store, clock) = detector();
        for _ in 0..20 {
            detector.record_view();
        }
        assert!(detector.record_view());

        clock.advance(Duration::from_secs(61));
        assert!(!detector.record_view());
        // The rewrite keeps only the filtered log plus the new entry.
        assert_eq!(persisted(&store), vec![1_061_000]);
    }

    #[test]
    fn corrupt_log_is_treated_as_empty() {
        let (detector, store, clock) = detector();
        store.set(DEFAULT_VIEW_STORAGE_KEY, "{not json").unwrap();

        assert!(!detector.record_view());
        assert_eq!(persisted(&store), vec![clock.now_millis()]);
    }

    #[test]
    fn storage_failures_never_flag() {
        let detector = RapidViewDetector::new(BrokenStore, RapidViewPolicy::default());
        for _ in 0..30 {
            assert!(!detector.record_view());
        }
        assert!(detector.recent_views().is_empty());
    }

    #[test]
    fn write_quota_failure_degrades_to_not_flagged() {
        let store = MemoryStore::with_quota(8);
        let clock = ManualClock::new(1_000_000);
        let detector =
            RapidViewDetector::with_clock(store, RapidViewPolicy::default(), clock.clone());
        // "[1000000]" is nine bytes.
        assert!(!detector.record_view());
        assert!(detector.store().get(DEFAULT_VIEW_STORAGE_KEY).unwrap().is_none());
    }

    #[test]
    fn custom_policy_uses_its_own_key() {
        let store = MemoryStore::new();
        let policy = RapidViewPolicy::new(2, Duration::from_secs(5), "tour_views").unwrap();
        let detector = RapidViewDetector::with_clock(store, policy, ManualClock::new(0));
        assert!(!detector.record_view());
        assert!(!detector.record_view());
        assert!(detector.record_view());
        assert!(detector.store().get("tour_views").unwrap().is_some());
        assert!(detector.store().get(DEFAULT_VIEW_STORAGE_KEY).unwrap().is_none());
    }

    #[test]
    fn concurrent_views_persist_exactly_the_threshold() {
        let (detector, store, _clock) = detector();
        let flagged = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        if detector.record_view() {
                            flagged.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(persisted(&store).len(), DEFAULT_MAX_VIEWS);
        assert_eq!(flagged.into_inner(), 80 - DEFAULT_MAX_VIEWS);
    }

    #[test]
    fn rejects_zero_threshold() {
        assert_eq!(
            RapidViewPolicy::new(0, Duration::from_secs(1), "k"),
            Err(PolicyError::ZeroRequests)
        );
    }
}
