//! Cross-scan dedup filter
//!
//! The chat transcript is rescanned over and over; unchanged lines must not be applied
//! twice. Update lines bypass the filter entirely because their version number is the
//! dedup key and the reconciler handles it.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::classify::is_update_line;
use crate::fingerprint::Fingerprint;

/// How long and how many fingerprints are retained.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub max_age_secs: u64,
    pub max_entries: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_secs: 30 * 60,
            max_entries: 4096,
        }
    }
}

/// Persisted form of one seen fingerprint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenEntry {
    pub fingerprint: Fingerprint,
    pub seen_at: DateTime<Utc>,
}

/// Bounded set of fingerprints, evicting by age and then by least recent sighting.
///
/// `order` runs from least to most recently seen, so age eviction stops at the first
/// live entry.
#[derive(Clone, Debug)]
pub struct SeenFingerprintSet {
    policy: RetentionPolicy,
    seen: HashMap<Fingerprint, DateTime<Utc>>,
    order: VecDeque<Fingerprint>,
}

impl SeenFingerprintSet {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn from_entries(policy: RetentionPolicy, entries: Vec<SeenEntry>) -> Self {
        let mut set = Self::new(policy);
        for entry in entries {
            set.insert(entry.fingerprint, entry.seen_at);
        }
        set
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains_key(fingerprint)
    }

    /// Record a sighting of `fingerprint`; returns `false` when it was already present.
    ///
    /// A repeat sighting restarts the retention window, so a line that stays on the page
    /// is never evicted while it keeps being rescanned.
    pub fn insert(&mut self, fingerprint: Fingerprint, now: DateTime<Utc>) -> bool {
        if let Some(seen_at) = self.seen.get_mut(&fingerprint) {
            *seen_at = (*seen_at).max(now);
            if let Some(pos) = self.order.iter().position(|f| f == &fingerprint) {
                if let Some(moved) = self.order.remove(pos) {
                    self.order.push_back(moved);
                }
            }
            return false;
        }
        self.seen.insert(fingerprint.clone(), now);
        self.order.push_back(fingerprint);
        self.enforce_capacity();
        true
    }

    /// Drop fingerprints older than the retention window.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let max_age = Duration::seconds(self.policy.max_age_secs.min(i64::MAX as u64) as i64);
        let mut evicted = 0;
        while let Some(front) = self.order.front() {
            let expired = self
                .seen
                .get(front)
                .map(|seen_at| now.signed_duration_since(*seen_at) > max_age)
                .unwrap_or(true);
            if !expired {
                break;
            }
            if let Some(fingerprint) = self.order.pop_front() {
                self.seen.remove(&fingerprint);
                evicted += 1;
            }
        }
        if evicted > 0 {
            trace!(evicted, remaining = self.seen.len(), "evicted expired fingerprints");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }

    pub fn entries(&self) -> Vec<SeenEntry> {
        self.order
            .iter()
            .filter_map(|fingerprint| {
                self.seen.get(fingerprint).map(|seen_at| SeenEntry {
                    fingerprint: fingerprint.clone(),
                    seen_at: *seen_at,
                })
            })
            .collect()
    }

    fn enforce_capacity(&mut self) {
        let cap = self.policy.max_entries.max(1);
        while self.order.len() > cap {
            if let Some(fingerprint) = self.order.pop_front() {
                self.seen.remove(&fingerprint);
            }
        }
    }
}

impl Default for SeenFingerprintSet {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

/// Verdict for one line passing through the filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// First sighting within the retention window
    Fresh,
    /// Update line, always re-evaluated
    Update,
    /// Already processed
    Suppressed,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        !matches!(self, Admission::Suppressed)
    }
}

/// Applies the seen-set to raw lines ahead of classification.
#[derive(Clone, Debug, Default)]
pub struct DedupFilter {
    seen: SeenFingerprintSet,
}

impl DedupFilter {
    pub fn new(seen: SeenFingerprintSet) -> Self {
        Self { seen }
    }

    pub fn admit(&mut self, line: &str, now: DateTime<Utc>) -> Admission {
        if is_update_line(line) {
            return Admission::Update;
        }
        if self.seen.insert(Fingerprint::of(line), now) {
            Admission::Fresh
        } else {
            Admission::Suppressed
        }
    }

    /// Evict stale fingerprints; call once per scan before admitting lines.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        self.seen.evict_expired(now)
    }

    pub fn seen(&self) -> &SeenFingerprintSet {
        &self.seen
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn same_line_admitted_once() {
        let mut filter = DedupFilter::default();
        assert_eq!(filter.admit("!baiact000001 {}", at(0)), Admission::Fresh);
        assert_eq!(filter.admit("!baiact000001 {}", at(5)), Admission::Suppressed);
        assert_eq!(filter.admit("!baiact000002 {}", at(5)), Admission::Fresh);
    }

    #[test]
    fn updates_bypass_fingerprinting() {
        let mut filter = DedupFilter::default();
        let line = "!baiact000001upd001 {}";
        assert_eq!(filter.admit(line, at(0)), Admission::Update);
        assert_eq!(filter.admit(line, at(1)), Admission::Update);
        assert!(filter.seen().is_empty());
    }

    #[test]
    fn expired_fingerprints_are_readmitted() {
        let policy = RetentionPolicy {
            max_age_secs: 60,
            max_entries: 16,
        };
        let mut filter = DedupFilter::new(SeenFingerprintSet::new(policy));
        filter.admit("!baiact000001del", at(0));
        filter.admit("!baiact000002del", at(50));
        assert_eq!(filter.sweep(at(90)), 1);
        assert_eq!(filter.admit("!baiact000001del", at(90)), Admission::Fresh);
        assert_eq!(filter.admit("!baiact000002del", at(90)), Admission::Suppressed);
    }

    #[test]
    fn visible_line_outlives_the_retention_window() {
        let policy = RetentionPolicy {
            max_age_secs: 60,
            max_entries: 16,
        };
        let mut filter = DedupFilter::new(SeenFingerprintSet::new(policy));
        assert_eq!(filter.admit("!baiact000001del", at(0)), Admission::Fresh);
        assert_eq!(filter.admit("!baiact000002del", at(0)), Admission::Fresh);

        // 000001 stays on the page and is rescanned every 40s; 000002 scrolls away.
        for tick in 1..=5 {
            let now = at(tick * 40);
            filter.sweep(now);
            assert_eq!(filter.admit("!baiact000001del", now), Admission::Suppressed);
        }
        assert_eq!(filter.seen().len(), 1);
        assert_eq!(filter.admit("!baiact000002del", at(200)), Admission::Fresh);

        let order: Vec<_> = filter.seen().entries().into_iter().map(|e| e.seen_at).collect();
        assert_eq!(order, vec![at(200), at(200)]);
    }

    #[test]
    fn repeat_sighting_protects_from_capacity_eviction() {
        let policy = RetentionPolicy {
            max_age_secs: 3600,
            max_entries: 2,
        };
        let mut set = SeenFingerprintSet::new(policy);
        set.insert(Fingerprint::of("a"), at(0));
        set.insert(Fingerprint::of("b"), at(1));
        assert!(!set.insert(Fingerprint::of("a"), at(2)));
        set.insert(Fingerprint::of("c"), at(3));
        assert!(set.contains(&Fingerprint::of("a")));
        assert!(!set.contains(&Fingerprint::of("b")));
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let policy = RetentionPolicy {
            max_age_secs: 3600,
            max_entries: 2,
        };
        let mut set = SeenFingerprintSet::new(policy.clone());
        set.insert(Fingerprint::of("a"), at(0));
        set.insert(Fingerprint::of("b"), at(1));
        set.insert(Fingerprint::of("c"), at(2));
        assert_eq!(set.len(), 2);
        assert!(!set.contains(&Fingerprint::of("a")));

        let restored = SeenFingerprintSet::from_entries(policy, set.entries());
        assert!(restored.contains(&Fingerprint::of("b")));
        assert!(restored.contains(&Fingerprint::of("c")));
    }
}
