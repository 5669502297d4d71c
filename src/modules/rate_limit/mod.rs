//! Sliding-window admission control.
//!
//! Bounds each request identity to at most `max_requests` admitted calls in
//! any trailing window. Denied attempts are never recorded, so they neither
//! consume quota nor extend the window.

use http::Method;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::clock::{Clock, SystemClock, duration_millis, within_window};

const DEFAULT_MAX_REQUESTS: u32 = 30;
const DEFAULT_WINDOW_SECS: u64 = 60;

/// Rejected policy values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("policy must admit at least one request per window")]
    ZeroRequests,
    #[error("policy window must be at least one millisecond (got {0:?})")]
    ZeroWindow(Duration),
}

/// Immutable `(max_requests, window)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    max_requests: u32,
    window: Duration,
}

impl RateLimitPolicy {
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, PolicyError> {
        if max_requests == 0 {
            return Err(PolicyError::ZeroRequests);
        }
        if duration_millis(window) == 0 {
            return Err(PolicyError::ZeroWindow(window));
        }
        Ok(Self {
            max_requests,
            window,
        })
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn window_millis(&self) -> u64 {
        duration_millis(self.window)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
        }
    }
}

/// Builds the `METHOD:PATH` key shared by a class of requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestIdentity(String);

impl RequestIdentity {
    pub fn from_request(method: &Method, url: &Url) -> Self {
        Self::from_parts(method.as_str(), url.path())
    }

    pub fn from_parts(method: &str, path: &str) -> Self {
        Self(format!("{}:{}", method.to_ascii_uppercase(), path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub admitted: bool,
    /// Quota left after this call.
    pub remaining: u32,
    /// Only set on denial.
    pub retry_after: Option<Duration>,
}

/// Sliding-window log limiter keyed by request identity.
#[derive(Debug)]
pub struct SlidingWindowLimiter<C: Clock = SystemClock> {
    policy: RateLimitPolicy,
    clock: C,
    logs: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl SlidingWindowLimiter<SystemClock> {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self::with_clock(policy, SystemClock)
    }
}

impl<C: Clock> SlidingWindowLimiter<C> {
    pub fn with_clock(policy: RateLimitPolicy, clock: C) -> Self {
        Self {
            policy,
            clock,
            logs: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Admits and records the call when the identity still has quota.
    pub fn can_make_request(&self, identity: &str) -> bool {
        self.check(identity).admitted
    }

    pub fn remaining_requests(&self, identity: &str) -> u32 {
        let (mut logs, now) = self.lock();
        let len = self.pruned_len(&mut logs, identity, now);
        self.policy.max_requests.saturating_sub(len as u32)
    }

    /// Time until the oldest entry leaves the window, or `None` when a call
    /// would be admitted right now.
    pub fn retry_after(&self, identity: &str) -> Option<Duration> {
        let (mut logs, now) = self.lock();
        let len = self.pruned_len(&mut logs, identity, now);
        if len < self.policy.max_requests as usize {
            return None;
        }
        let oldest = logs.get(identity).and_then(|log| log.front().copied())?;
        Some(self.wait_for(oldest, now))
    }

    /// Prune, check, and record in one locked pass.
    pub fn check(&self, identity: &str) -> RateLimitDecision {
        let max = self.policy.max_requests as usize;
        let (mut logs, now) = self.lock();
        let len = self.pruned_len(&mut logs, identity, now);

        if len >= max {
            let retry_after = logs
                .get(identity)
                .and_then(|log| log.front().copied())
                .map(|oldest| self.wait_for(oldest, now));
            return RateLimitDecision {
                admitted: false,
                remaining: 0,
                retry_after,
            };
        }

        let log = logs
            .entry(identity.to_string())
            .or_insert_with(|| VecDeque::with_capacity(max.min(64)));
        // Wall time can step backwards; keep the log chronological.
        let at = log.partition_point(|ts| *ts <= now);
        log.insert(at, now);

        RateLimitDecision {
            admitted: true,
            remaining: (max - len - 1) as u32,
            retry_after: None,
        }
    }

    pub fn reset(&self, identity: &str) {
        self.lock().0.remove(identity);
    }

    /// Identities currently holding at least one entry (unpruned view).
    pub fn tracked_identities(&self) -> usize {
        self.lock().0.values().filter(|log| !log.is_empty()).count()
    }

    /// Takes the lock, then reads the clock, so entries are stamped in lock
    /// order.
    fn lock(&self) -> (MutexGuard<'_, HashMap<String, VecDeque<u64>>>, u64) {
        // Each mutation is a single insert or pop, so a poisoned log is still
        // well formed.
        let guard = self
            .logs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (guard, self.clock.now_millis())
    }

    fn pruned_len(
        &self,
        logs: &mut HashMap<String, VecDeque<u64>>,
        identity: &str,
        now: u64,
    ) -> usize {
        let window = self.policy.window_millis();
        let Some(log) = logs.get_mut(identity) else {
            return 0;
        };
        while matches!(log.front(), Some(ts) if !within_window(*ts, now, window)) {
            log.pop_front();
        }
        let len = log.len();
        if len == 0 {
            logs.remove(identity);
        }
        len
    }

    fn wait_for(&self, oldest: u64, now: u64) -> Duration {
        let age = now.saturating_sub(oldest);
        Duration::from_millis(self.policy.window_millis().saturating_sub(age))
    }
}
