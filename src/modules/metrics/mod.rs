//! Verdict counters.
//!
//! Aggregates admission outcomes per identity plus global automation and
//! rapid-viewing tallies for observability. The per-identity table is bounded;
//! once full, the least recently updated identity makes room for a new one.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Identities tracked before the least recently updated one is evicted.
pub const DEFAULT_MAX_IDENTITIES: usize = 1024;

/// Per-identity admission counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityStats {
    pub identity: String,
    pub admitted: u64,
    pub denied: u64,
    pub last_denied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub admitted: u64,
    pub denied: u64,
    pub automation_checks: u64,
    pub automation_flags: u64,
    pub views: u64,
    pub rapid_view_flags: u64,
    /// Identities evicted to keep the table within its capacity.
    pub evicted_identities: u64,
    pub identities: Vec<IdentityStats>,
}

#[derive(Debug)]
struct IdentityEntry {
    stats: IdentityStats,
    touched: u64,
}

#[derive(Debug)]
struct MetricsState {
    started_at: DateTime<Utc>,
    automation_checks: u64,
    automation_flags: u64,
    views: u64,
    rapid_view_flags: u64,
    // Admitted and denied totals survive eviction of their identity.
    admitted: u64,
    denied: u64,
    evicted_identities: u64,
    max_identities: usize,
    tick: u64,
    identities: HashMap<String, IdentityEntry>,
}

impl MetricsState {
    fn new(max_identities: usize) -> Self {
        Self {
            started_at: Utc::now(),
            automation_checks: 0,
            automation_flags: 0,
            views: 0,
            rapid_view_flags: 0,
            admitted: 0,
            denied: 0,
            evicted_identities: 0,
            max_identities: max_identities.max(1),
            tick: 0,
            identities: HashMap::new(),
        }
    }

    fn identity_mut(&mut self, identity: &str) -> &mut IdentityStats {
        self.tick += 1;
        let tick = self.tick;

        if !self.identities.contains_key(identity)
            && self.identities.len() >= self.max_identities
        {
            self.evict_stalest();
        }

        let entry = self
            .identities
            .entry(identity.to_string())
            .or_insert_with(|| IdentityEntry {
                stats: IdentityStats {
                    identity: identity.to_string(),
                    ..Default::default()
                },
                touched: tick,
            });
        entry.touched = tick;
        &mut entry.stats
    }

    fn evict_stalest(&mut self) {
        let stalest = self
            .identities
            .iter()
            .min_by_key(|(_, entry)| entry.touched)
            .map(|(key, _)| key.clone());
        if let Some(key) = stalest {
            self.identities.remove(&key);
            self.evicted_identities += 1;
            log::debug!("metrics evicted identity {}", key);
        }
    }
}

/// Thread-safe metrics shared between handlers and the shield.
#[derive(Clone, Debug)]
pub struct ShieldMetrics {
    inner: Arc<Mutex<MetricsState>>,
}

impl ShieldMetrics {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_IDENTITIES)
    }

    /// Bounds the per-identity table. A capacity of zero is treated as one.
    pub fn with_capacity(max_identities: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(max_identities))),
        }
    }

    fn state(&self) -> MutexGuard<'_, MetricsState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_admission(&self, identity: &str) {
        let mut guard = self.state();
        guard.admitted += 1;
        guard.identity_mut(identity).admitted += 1;
    }

    pub fn record_denial(&self, identity: &str, at: DateTime<Utc>) {
        let mut guard = self.state();
        guard.denied += 1;
        let stats = guard.identity_mut(identity);
        stats.denied += 1;
        stats.last_denied_at = Some(at);
    }

    pub fn record_automation(&self, automated: bool) {
        let mut guard = self.state();
        guard.automation_checks += 1;
        if automated {
            guard.automation_flags += 1;
        }
    }

    pub fn record_view(&self, flagged: bool) {
        let mut guard = self.state();
        guard.views += 1;
        if flagged {
            guard.rapid_view_flags += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.state();
        let mut identities: Vec<_> = guard
            .identities
            .values()
            .map(|entry| entry.stats.clone())
            .collect();
        identities.sort_by(|a, b| a.identity.cmp(&b.identity));
        MetricsSnapshot {
            started_at: guard.started_at,
            admitted: guard.admitted,
            denied: guard.denied,
            automation_checks: guard.automation_checks,
            automation_flags: guard.automation_flags,
            views: guard.views,
            rapid_view_flags: guard.rapid_view_flags,
            evicted_identities: guard.evicted_identities,
            identities,
        }
    }
}

impl Default for ShieldMetrics {
    fn default() -> Self {
        Self::new()
    }
}
