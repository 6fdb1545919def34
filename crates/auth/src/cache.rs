//! Decision cache port and its in-process implementation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use keystone_core::PolicyId;
use keystone_events::PolicyCacheEvictor;

use crate::Privilege;

/// Cache key of a single access decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionKey {
    pub policy_id: PolicyId,
    /// See [`credential_fingerprint`](crate::credential_fingerprint).
    pub credential_set: u64,
    pub privilege: Privilege,
}

impl DecisionKey {
    pub fn new(policy_id: PolicyId, credential_set: u64, privilege: Privilege) -> Self {
        Self {
            policy_id,
            credential_set,
            privilege,
        }
    }
}

/// Storage for access decisions.
///
/// `dependencies` lists every policy the decision was derived from; evicting
/// any of them must drop the entry.
///
/// Evictions advance [`epoch`](Self::epoch). Callers read it before evaluating
/// and hand it back to [`insert`](Self::insert); a decision computed across an
/// eviction is not stored.
pub trait DecisionCache: Send + Sync {
    fn get(&self, key: &DecisionKey) -> Option<bool>;
    fn epoch(&self) -> u64;
    fn insert(&self, key: DecisionKey, granted: bool, dependencies: &[PolicyId], epoch: u64);
    /// Returns the number of entries removed.
    fn evict_policy(&self, policy_id: &PolicyId) -> usize;
    fn clear(&self);
}

impl<T> DecisionCache for Arc<T>
where
    T: DecisionCache + ?Sized,
{
    fn get(&self, key: &DecisionKey) -> Option<bool> {
        (**self).get(key)
    }

    fn epoch(&self) -> u64 {
        (**self).epoch()
    }

    fn insert(&self, key: DecisionKey, granted: bool, dependencies: &[PolicyId], epoch: u64) {
        (**self).insert(key, granted, dependencies, epoch)
    }

    fn evict_policy(&self, policy_id: &PolicyId) -> usize {
        (**self).evict_policy(policy_id)
    }

    fn clear(&self) {
        (**self).clear()
    }
}

/// Caching disabled: every lookup misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDecisionCache;

impl DecisionCache for NoDecisionCache {
    fn get(&self, _key: &DecisionKey) -> Option<bool> {
        None
    }

    fn epoch(&self) -> u64 {
        0
    }

    fn insert(&self, _key: DecisionKey, _granted: bool, _dependencies: &[PolicyId], _epoch: u64) {}

    fn evict_policy(&self, _policy_id: &PolicyId) -> usize {
        0
    }

    fn clear(&self) {}
}

#[derive(Debug)]
struct Entry {
    granted: bool,
    inserted_at: Instant,
    seq: u64,
    dependencies: Vec<PolicyId>,
}

enum Head {
    Fresh,
    Expired,
    Stale,
}

/// `order` holds `(seq, key)` in insertion order. Records whose entry was
/// removed or replaced are stale and skipped lazily.
#[derive(Debug, Default)]
struct State {
    entries: HashMap<DecisionKey, Entry>,
    by_policy: HashMap<PolicyId, HashSet<DecisionKey>>,
    order: VecDeque<(u64, DecisionKey)>,
    next_seq: u64,
    epoch: u64,
}

impl State {
    fn remove(&mut self, key: &DecisionKey) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        for dependency in &entry.dependencies {
            if let Some(keys) = self.by_policy.get_mut(dependency) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_policy.remove(dependency);
                }
            }
        }
        true
    }

    fn head(&self, ttl: Duration, now: Instant) -> Option<Head> {
        let (seq, key) = self.order.front()?;
        Some(match self.entries.get(key) {
            Some(entry) if entry.seq == *seq && now.duration_since(entry.inserted_at) >= ttl => Head::Expired,
            Some(entry) if entry.seq == *seq => Head::Fresh,
            _ => Head::Stale,
        })
    }

    /// Entries expire in insertion order, so only the head needs checking.
    fn purge_expired(&mut self, ttl: Duration, now: Instant) {
        while let Some(head) = self.head(ttl, now) {
            match head {
                Head::Fresh => break,
                Head::Stale => {
                    self.order.pop_front();
                }
                Head::Expired => {
                    if let Some((_, key)) = self.order.pop_front() {
                        self.remove(&key);
                    }
                }
            }
        }
    }

    fn evict_oldest(&mut self) {
        while let Some((seq, key)) = self.order.pop_front() {
            if self.entries.get(&key).is_some_and(|e| e.seq == seq) {
                self.remove(&key);
                return;
            }
        }
    }

    fn compact_order(&mut self) {
        if self.order.len() <= self.entries.len() * 2 + 64 {
            return;
        }
        let entries = &self.entries;
        self.order
            .retain(|(seq, key)| entries.get(key).is_some_and(|e| e.seq == *seq));
    }
}

/// Bounded, TTL-limited decision cache shared by every request in the process.
#[derive(Debug)]
pub struct InMemoryDecisionCache {
    ttl: Duration,
    capacity: usize,
    state: Mutex<State>,
}

impl InMemoryDecisionCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            state: Mutex::new(State::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DecisionCache for InMemoryDecisionCache {
    fn get(&self, key: &DecisionKey) -> Option<bool> {
        let mut state = self.lock();
        let entry = state.entries.get(key)?;
        if entry.inserted_at.elapsed() < self.ttl {
            return Some(entry.granted);
        }
        state.remove(key);
        None
    }

    fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    fn insert(&self, key: DecisionKey, granted: bool, dependencies: &[PolicyId], epoch: u64) {
        let mut state = self.lock();
        if state.epoch != epoch {
            debug!(policy_id = %key.policy_id, "policy evicted during evaluation; decision not cached");
            return;
        }
        state.remove(&key);

        let now = Instant::now();
        state.purge_expired(self.ttl, now);
        while state.entries.len() >= self.capacity {
            state.evict_oldest();
        }

        let mut dependencies = dependencies.to_vec();
        if !dependencies.contains(&key.policy_id) {
            dependencies.push(key.policy_id);
        }
        for dependency in &dependencies {
            state.by_policy.entry(*dependency).or_default().insert(key.clone());
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.order.push_back((seq, key.clone()));
        state.entries.insert(
            key,
            Entry {
                granted,
                inserted_at: now,
                seq,
                dependencies,
            },
        );
        state.compact_order();
    }

    fn evict_policy(&self, policy_id: &PolicyId) -> usize {
        let mut state = self.lock();
        state.epoch += 1;
        let Some(keys) = state.by_policy.remove(policy_id) else {
            return 0;
        };
        keys.iter().filter(|key| state.remove(key)).count()
    }

    fn clear(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        state.entries.clear();
        state.by_policy.clear();
        state.order.clear();
    }
}

impl PolicyCacheEvictor for InMemoryDecisionCache {
    fn evict_policies(&self, policy_ids: &[String]) -> usize {
        let mut evicted = 0;
        for raw in policy_ids {
            match PolicyId::from_str(raw) {
                Ok(id) => evicted += self.evict_policy(&id),
                Err(err) => warn!(policy_id = %raw, error = %err, "ignoring unparsable invalidated policy id"),
            }
        }
        debug!(policies = policy_ids.len(), evicted, "evicted cached decisions");
        evicted
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn key(policy_id: PolicyId, privilege: Privilege) -> DecisionKey {
        DecisionKey::new(policy_id, 42, privilege)
    }

    #[test]
    fn hit_until_ttl_expires() {
        let cache = InMemoryDecisionCache::new(Duration::from_millis(50), 10);
        let policy = PolicyId::new();
        cache.insert(key(policy, Privilege::READ), true, &[], cache.epoch());

        assert_eq!(cache.get(&key(policy, Privilege::READ)), Some(true));
        assert_eq!(cache.get(&key(policy, Privilege::UPDATE)), None);

        thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get(&key(policy, Privilege::READ)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn evicting_an_ancestor_drops_dependent_decisions() {
        let cache = InMemoryDecisionCache::new(Duration::from_secs(60), 10);
        let parent = PolicyId::new();
        let child = PolicyId::new();
        let unrelated = PolicyId::new();

        cache.insert(key(child, Privilege::READ), true, &[child, parent], cache.epoch());
        cache.insert(key(unrelated, Privilege::READ), false, &[unrelated], cache.epoch());

        assert_eq!(cache.evict_policy(&parent), 1);
        assert_eq!(cache.get(&key(child, Privilege::READ)), None);
        assert_eq!(cache.get(&key(unrelated, Privilege::READ)), Some(false));
        assert_eq!(cache.evict_policy(&parent), 0);
    }

    #[test]
    fn capacity_evicts_oldest_entry() {
        let cache = InMemoryDecisionCache::new(Duration::from_secs(60), 2);
        let (a, b, c) = (PolicyId::new(), PolicyId::new(), PolicyId::new());

        cache.insert(key(a, Privilege::READ), true, &[], cache.epoch());
        cache.insert(key(b, Privilege::READ), true, &[], cache.epoch());
        cache.insert(key(c, Privilege::READ), true, &[], cache.epoch());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key(a, Privilege::READ)), None);
        assert_eq!(cache.get(&key(c, Privilege::READ)), Some(true));
    }

    #[test]
    fn reinserting_refreshes_eviction_order() {
        let cache = InMemoryDecisionCache::new(Duration::from_secs(60), 2);
        let (a, b, c) = (PolicyId::new(), PolicyId::new(), PolicyId::new());

        cache.insert(key(a, Privilege::READ), true, &[], cache.epoch());
        cache.insert(key(b, Privilege::READ), true, &[], cache.epoch());
        cache.insert(key(a, Privilege::READ), false, &[], cache.epoch());
        cache.insert(key(c, Privilege::READ), true, &[], cache.epoch());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key(b, Privilege::READ)), None);
        assert_eq!(cache.get(&key(a, Privilege::READ)), Some(false));
        assert_eq!(cache.get(&key(c, Privilege::READ)), Some(true));
    }

    #[test]
    fn churn_keeps_order_queue_bounded() {
        let cache = InMemoryDecisionCache::new(Duration::from_secs(60), 4);
        let policy = PolicyId::new();

        for _ in 0..1_000 {
            cache.insert(key(policy, Privilege::READ), true, &[], cache.epoch());
            cache.insert(key(policy, Privilege::UPDATE), true, &[], cache.epoch());
        }

        assert_eq!(cache.len(), 2);
        assert!(cache.lock().order.len() <= 2 * 2 + 64 + 1);
    }

    #[test]
    fn insert_with_stale_epoch_is_dropped() {
        let cache = InMemoryDecisionCache::new(Duration::from_secs(60), 10);
        let policy = PolicyId::new();

        let epoch = cache.epoch();
        cache.evict_policy(&policy);
        cache.insert(key(policy, Privilege::READ), true, &[], epoch);
        assert!(cache.is_empty());

        cache.insert(key(policy, Privilege::READ), true, &[], cache.epoch());
        assert_eq!(cache.get(&key(policy, Privilege::READ)), Some(true));

        let epoch = cache.epoch();
        cache.clear();
        cache.insert(key(policy, Privilege::UPDATE), true, &[], epoch);
        assert!(cache.is_empty());
    }

    #[test]
    fn evictor_parses_ids_and_skips_garbage() {
        let cache = InMemoryDecisionCache::new(Duration::from_secs(60), 10);
        let policy = PolicyId::new();
        cache.insert(key(policy, Privilege::READ), true, &[], cache.epoch());
        cache.insert(key(policy, Privilege::UPDATE), false, &[], cache.epoch());

        let evicted = cache.evict_policies(&["not-a-uuid".to_string(), policy.to_string()]);

        assert_eq!(evicted, 2);
        assert!(cache.is_empty());
        assert_eq!(cache.evict_policies(&[policy.to_string()]), 0);
    }
}
