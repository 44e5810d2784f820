//! # Score Cache Registry
//!
//! Holds the score caches registered per [`NetworkType`]. Registrations live
//! in a slot arena; each network type keeps the ordered slot indices of its
//! caches plus the lock that serializes broadcasts to that type.
//!
//! Readers never iterate the arena directly. [`CacheRegistry::snapshot_all`]
//! copies the registrations out under the lock, so a broadcast in flight is
//! unaffected by concurrent register/unregister calls.
//!
//! A network type with no registrations has no entry at all.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use netscore_common::models::{CacheFilter, NetworkType, ScoredNetwork};

/// An in-process consumer of network scores.
///
/// Implementations may be backed by anything (a local map, an IPC proxy),
/// so every call is fallible and the dispatcher treats failures as isolated
/// to this cache.
pub trait ScoreCache: Send + Sync {
    /// Stable identity of this cache. At most one registration exists per
    /// `(network type, id)` pair.
    fn id(&self) -> &str;
    /// Replace or merge the given scores, all of a single network type.
    fn update_scores(&self, networks: &[ScoredNetwork]) -> anyhow::Result<()>;
    /// Drop every cached score.
    fn clear_scores(&self) -> anyhow::Result<()>;
    /// Write a human-readable description of the cache contents.
    fn dump(&self, _out: &mut dyn std::io::Write) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A single `(network type, cache, filter)` registration.
#[derive(Clone)]
pub struct Registration {
    pub network_type: NetworkType,
    pub cache: Arc<dyn ScoreCache>,
    pub filter: CacheFilter,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("network_type", &self.network_type)
            .field("cache", &self.cache.id())
            .field("filter", &self.filter)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    AlreadyRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    Unregistered,
    NotFound,
}

/// Immutable copy of one network type's registrations.
///
/// Carries the type's broadcast lock so the dispatcher can serialize
/// broadcasts per type without touching the registry lock.
#[derive(Clone)]
pub struct ListenerSet {
    network_type: NetworkType,
    registrations: Vec<Registration>,
    broadcast_lock: Arc<Mutex<()>>,
}

impl ListenerSet {
    pub fn network_type(&self) -> NetworkType {
        self.network_type
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter()
    }

    /// Hold this while invoking the set's caches. One broadcast per type.
    pub(crate) fn lock_broadcast(&self) -> MutexGuard<'_, ()> {
        self.broadcast_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("network_type", &self.network_type)
            .field("registrations", &self.registrations)
            .finish()
    }
}

struct TypeEntry {
    /// Arena slots in registration order. Never empty.
    slots: Vec<usize>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Option<Registration>>,
    free: Vec<usize>,
    by_type: BTreeMap<NetworkType, TypeEntry>,
    /// One lock per type ever registered. Outlives the type's entry so a
    /// broadcast on an old snapshot still excludes one on a re-created set.
    broadcast_locks: BTreeMap<NetworkType, Arc<Mutex<()>>>,
}

impl Arena {
    fn insert(&mut self, registration: Registration) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(registration);
                idx
            }
            None => {
                self.slots.push(Some(registration));
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        self.slots[idx] = None;
        self.free.push(idx);
    }

    fn cache_id(&self, idx: usize) -> Option<&str> {
        self.slots[idx].as_ref().map(|r| r.cache.id())
    }

    fn set_for(&self, network_type: NetworkType, entry: &TypeEntry) -> ListenerSet {
        ListenerSet {
            network_type,
            registrations: entry
                .slots
                .iter()
                .filter_map(|&idx| self.slots[idx].clone())
                .collect(),
            broadcast_lock: self
                .broadcast_locks
                .get(&network_type)
                .cloned()
                .unwrap_or_default(),
        }
    }
}

/// Thread-safe registry of score caches keyed by network type.
#[derive(Default)]
pub struct CacheRegistry {
    arena: Mutex<Arena>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `cache` for `network_type`. Idempotent per cache id.
    pub fn register(
        &self,
        network_type: NetworkType,
        cache: Arc<dyn ScoreCache>,
        filter: CacheFilter,
    ) -> RegisterOutcome {
        let mut arena = self.lock();

        if let Some(entry) = arena.by_type.get(&network_type)
            && entry
                .slots
                .iter()
                .any(|&idx| arena.cache_id(idx) == Some(cache.id()))
        {
            return RegisterOutcome::AlreadyRegistered;
        }

        let idx = arena.insert(Registration {
            network_type,
            cache,
            filter,
        });
        arena.broadcast_locks.entry(network_type).or_default();
        arena
            .by_type
            .entry(network_type)
            .or_insert_with(|| TypeEntry { slots: Vec::new() })
            .slots
            .push(idx);
        RegisterOutcome::Registered
    }

    /// Remove the registration of `cache_id` for `network_type`.
    pub fn unregister(&self, network_type: NetworkType, cache_id: &str) -> UnregisterOutcome {
        let mut arena = self.lock();

        let Some(entry) = arena.by_type.get(&network_type) else {
            return UnregisterOutcome::NotFound;
        };
        let Some(pos) = entry
            .slots
            .iter()
            .position(|&idx| arena.cache_id(idx) == Some(cache_id))
        else {
            return UnregisterOutcome::NotFound;
        };

        let mut emptied = false;
        if let Some(entry) = arena.by_type.get_mut(&network_type) {
            let idx = entry.slots.remove(pos);
            emptied = entry.slots.is_empty();
            arena.release(idx);
        }
        if emptied {
            arena.by_type.remove(&network_type);
        }
        UnregisterOutcome::Unregistered
    }

    /// Copy of every non-empty listener set, ordered by network type.
    pub fn snapshot_all(&self) -> Vec<ListenerSet> {
        let arena = self.lock();
        arena
            .by_type
            .iter()
            .map(|(&network_type, entry)| arena.set_for(network_type, entry))
            .collect()
    }

    /// Copy of one network type's listener set, if any cache is registered.
    pub fn snapshot(&self, network_type: NetworkType) -> Option<ListenerSet> {
        let arena = self.lock();
        arena
            .by_type
            .get(&network_type)
            .map(|entry| arena.set_for(network_type, entry))
    }

    pub fn listener_count(&self, network_type: NetworkType) -> usize {
        self.lock()
            .by_type
            .get(&network_type)
            .map_or(0, |entry| entry.slots.len())
    }

    pub fn network_types(&self) -> Vec<NetworkType> {
        self.lock().by_type.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().by_type.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullCache(String);

    impl ScoreCache for NullCache {
        fn id(&self) -> &str {
            &self.0
        }
        fn update_scores(&self, _networks: &[ScoredNetwork]) -> anyhow::Result<()> {
            Ok(())
        }
        fn clear_scores(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn cache(id: &str) -> Arc<dyn ScoreCache> {
        Arc::new(NullCache(id.to_string()))
    }

    // ─── Registration ───────────────────────────────────────────────────

    #[test]
    fn register_is_idempotent_per_type() {
        let reg = CacheRegistry::new();
        let c = cache("a");
        assert_eq!(
            reg.register(NetworkType::Wifi, c.clone(), CacheFilter::None),
            RegisterOutcome::Registered
        );
        assert_eq!(
            reg.register(NetworkType::Wifi, c.clone(), CacheFilter::ScanResults),
            RegisterOutcome::AlreadyRegistered
        );
        assert_eq!(reg.listener_count(NetworkType::Wifi), 1);

        // Same cache under another type is a separate registration.
        assert_eq!(
            reg.register(NetworkType::Cellular, c, CacheFilter::None),
            RegisterOutcome::Registered
        );
        assert_eq!(reg.listener_count(NetworkType::Cellular), 1);
    }

    #[test]
    fn unregister_unknown_is_not_found() {
        let reg = CacheRegistry::new();
        assert_eq!(
            reg.unregister(NetworkType::Wifi, "nope"),
            UnregisterOutcome::NotFound
        );
        reg.register(NetworkType::Wifi, cache("a"), CacheFilter::None);
        assert_eq!(
            reg.unregister(NetworkType::Wifi, "b"),
            UnregisterOutcome::NotFound
        );
        assert_eq!(
            reg.unregister(NetworkType::Cellular, "a"),
            UnregisterOutcome::NotFound
        );
    }

    // ─── Empty sets ─────────────────────────────────────────────────────

    #[test]
    fn last_unregister_removes_type() {
        let reg = CacheRegistry::new();
        reg.register(NetworkType::Wifi, cache("a"), CacheFilter::None);
        reg.register(NetworkType::Wifi, cache("b"), CacheFilter::None);

        assert_eq!(
            reg.unregister(NetworkType::Wifi, "a"),
            UnregisterOutcome::Unregistered
        );
        assert_eq!(reg.network_types(), vec![NetworkType::Wifi]);

        assert_eq!(
            reg.unregister(NetworkType::Wifi, "b"),
            UnregisterOutcome::Unregistered
        );
        assert!(reg.is_empty());
        assert!(reg.snapshot(NetworkType::Wifi).is_none());
    }

    #[test]
    fn snapshots_never_contain_empty_sets() {
        let reg = CacheRegistry::new();
        let types = [NetworkType::Wifi, NetworkType::Cellular, NetworkType::Ethernet];
        // Deterministic interleaving of registers and unregisters.
        for round in 0..50usize {
            let t = types[round % 3];
            let id = format!("c{}", round % 4);
            if round % 5 < 3 {
                reg.register(t, cache(&id), CacheFilter::None);
            } else {
                reg.unregister(t, &id);
            }
            for set in reg.snapshot_all() {
                assert!(!set.is_empty(), "empty set for {}", set.network_type());
            }
        }
    }

    // ─── Snapshots ──────────────────────────────────────────────────────

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let reg = CacheRegistry::new();
        reg.register(NetworkType::Wifi, cache("a"), CacheFilter::None);
        reg.register(NetworkType::Wifi, cache("b"), CacheFilter::CurrentNetwork);

        let snap = reg.snapshot_all();
        reg.unregister(NetworkType::Wifi, "a");
        reg.register(NetworkType::Wifi, cache("c"), CacheFilter::None);

        assert_eq!(snap.len(), 1);
        let ids: Vec<&str> = snap[0].iter().map(|r| r.cache.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn freed_slots_are_reused_in_order() {
        let reg = CacheRegistry::new();
        reg.register(NetworkType::Wifi, cache("a"), CacheFilter::None);
        reg.register(NetworkType::Wifi, cache("b"), CacheFilter::None);
        reg.unregister(NetworkType::Wifi, "a");
        reg.register(NetworkType::Wifi, cache("c"), CacheFilter::None);

        let set = reg.snapshot(NetworkType::Wifi).unwrap();
        let ids: Vec<&str> = set.iter().map(|r| r.cache.id()).collect();
        // Registration order, not slot order.
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn broadcast_lock_survives_emptied_type() {
        let reg = CacheRegistry::new();
        reg.register(NetworkType::Wifi, cache("a"), CacheFilter::None);
        let old = reg.snapshot(NetworkType::Wifi).unwrap();

        reg.unregister(NetworkType::Wifi, "a");
        reg.register(NetworkType::Wifi, cache("b"), CacheFilter::None);
        let new = reg.snapshot(NetworkType::Wifi).unwrap();

        assert!(Arc::ptr_eq(&old.broadcast_lock, &new.broadcast_lock));
        let _held = old.lock_broadcast();
        assert!(new.broadcast_lock.try_lock().is_err());
    }

    #[test]
    fn snapshot_all_orders_by_network_type() {
        let reg = CacheRegistry::new();
        reg.register(NetworkType::Ethernet, cache("e"), CacheFilter::None);
        reg.register(NetworkType::Wifi, cache("w"), CacheFilter::None);
        let types: Vec<NetworkType> = reg.snapshot_all().iter().map(|s| s.network_type()).collect();
        assert_eq!(types, vec![NetworkType::Wifi, NetworkType::Ethernet]);
    }
}
