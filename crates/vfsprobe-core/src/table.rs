//! Fixed-capacity context table keyed by execution context
//!
//! A sharded hash map with one lock per shard and a table-wide slot budget.
//! Every operation touches a single key and holds one shard lock for a
//! bounded, allocation-free critical section. The table never grows past its
//! configured capacity: inserting a new key into a full table fails, while
//! overwriting an existing key always succeeds.

use crate::events::ExecutionContextId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Context table errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("Context table full ({capacity} slots)")]
    Full { capacity: usize },
}

/// Outcome of a successful upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// Key was absent and took a free slot
    Inserted,
    /// Key was live; its previous value was overwritten
    Replaced,
}

/// Sharded, fixed-capacity map from execution context to per-operation state
pub struct ContextTable<V> {
    shards: Box<[Mutex<HashMap<ExecutionContextId, V>>]>,
    shard_mask: usize,
    capacity: usize,
    len: AtomicUsize,
}

impl<V> ContextTable<V> {
    /// Create a table with `capacity` slots spread over `shards` shards.
    ///
    /// `shards` is rounded up to a power of two and clamped to `[1, capacity]`.
    /// Shard maps are pre-sized so steady-state upserts do not allocate.
    pub fn new(capacity: usize, shards: usize) -> Self {
        let capacity = capacity.max(1);
        let shards = shards.clamp(1, capacity).next_power_of_two();
        let per_shard = capacity.div_ceil(shards);
        let shards: Vec<_> = (0..shards)
            .map(|_| Mutex::new(HashMap::with_capacity(per_shard)))
            .collect();

        Self {
            shard_mask: shards.len() - 1,
            shards: shards.into_boxed_slice(),
            capacity,
            len: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Number of live contexts
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard(&self, key: &ExecutionContextId) -> &Mutex<HashMap<ExecutionContextId, V>> {
        // Fibonacci hashing spreads sequential thread ids across shards
        let hash = key.as_u64().wrapping_mul(0x9E37_79B9_7F4A_7C15);
        &self.shards[(hash >> 32) as usize & self.shard_mask]
    }

    /// Reserve one slot from the table-wide budget
    fn reserve_slot(&self) -> bool {
        self.len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                (len < self.capacity).then_some(len + 1)
            })
            .is_ok()
    }

    /// Insert or overwrite the context for `key`.
    pub fn upsert(&self, key: ExecutionContextId, value: V) -> Result<Upsert, TableError> {
        let mut shard = self.shard(&key).lock();
        if let Some(slot) = shard.get_mut(&key) {
            *slot = value;
            return Ok(Upsert::Replaced);
        }
        if !self.reserve_slot() {
            return Err(TableError::Full {
                capacity: self.capacity,
            });
        }
        shard.insert(key, value);
        Ok(Upsert::Inserted)
    }

    /// Run `f` against the live context for `key`, if any.
    ///
    /// The shard lock is held for the duration of `f`; keep it short.
    pub fn with_mut<R>(&self, key: ExecutionContextId, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.shard(&key).lock().get_mut(&key).map(f)
    }

    /// Copy of the live context for `key`
    pub fn lookup(&self, key: ExecutionContextId) -> Option<V>
    where
        V: Clone,
    {
        self.shard(&key).lock().get(&key).cloned()
    }

    pub fn contains(&self, key: ExecutionContextId) -> bool {
        self.shard(&key).lock().contains_key(&key)
    }

    /// Delete the context for `key`, returning it.
    pub fn remove(&self, key: ExecutionContextId) -> Option<V> {
        let mut shard = self.shard(&key).lock();
        let removed = shard.remove(&key);
        // Release the slot before the shard lock, as `clear` does
        if removed.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Drop every live context. Returns how many were released.
    pub fn clear(&self) -> usize {
        let mut released = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            let n = shard.len();
            // `clear` keeps the allocation, unlike replacing the map
            shard.clear();
            self.len.fetch_sub(n, Ordering::AcqRel);
            released += n;
        }
        released
    }
}

impl<V> std::fmt::Debug for ContextTable<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextTable")
            .field("capacity", &self.capacity)
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(tid: u32) -> ExecutionContextId {
        ExecutionContextId::new(1000, tid)
    }

    #[test]
    fn test_upsert_lookup_remove() {
        let table = ContextTable::new(8, 4);
        assert_eq!(table.upsert(key(1), 10u64), Ok(Upsert::Inserted));
        assert_eq!(table.lookup(key(1)), Some(10));
        assert_eq!(table.len(), 1);

        assert_eq!(table.remove(key(1)), Some(10));
        assert_eq!(table.lookup(key(1)), None);
        assert!(table.is_empty());
        assert_eq!(table.remove(key(1)), None);
    }

    #[test]
    fn test_upsert_overwrites_existing_key() {
        let table = ContextTable::new(1, 1);
        table.upsert(key(1), 1u64).unwrap();
        // Full, but the key is already live so the overwrite succeeds
        assert_eq!(table.upsert(key(1), 2), Ok(Upsert::Replaced));
        assert_eq!(table.lookup(key(1)), Some(2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_new_key_rejected_when_full() {
        let table = ContextTable::new(2, 2);
        table.upsert(key(1), 1u64).unwrap();
        table.upsert(key(2), 2).unwrap();
        assert_eq!(table.upsert(key(3), 3), Err(TableError::Full { capacity: 2 }));
        assert!(!table.contains(key(3)));

        // Freeing a slot makes room again
        table.remove(key(1));
        assert_eq!(table.upsert(key(3), 3), Ok(Upsert::Inserted));
    }

    #[test]
    fn test_capacity_is_table_wide_not_per_shard() {
        // Every key may land in one shard; the budget still admits all of them
        let table = ContextTable::new(64, 64);
        for tid in 0..64 {
            assert!(table.upsert(key(tid), tid).is_ok());
        }
        assert_eq!(table.len(), 64);
        assert!(table.upsert(key(64), 64).is_err());
    }

    #[test]
    fn test_with_mut_absent_key_is_none() {
        let table: ContextTable<u64> = ContextTable::new(4, 1);
        assert_eq!(table.with_mut(key(9), |v| *v += 1), None);

        table.upsert(key(9), 1).unwrap();
        assert_eq!(table.with_mut(key(9), |v| {
            *v += 1;
            *v
        }), Some(2));
    }

    #[test]
    fn test_shards_rounded_and_clamped() {
        let table: ContextTable<u8> = ContextTable::new(10, 3);
        assert_eq!(table.shard_count(), 4);
        let table: ContextTable<u8> = ContextTable::new(2, 64);
        assert_eq!(table.shard_count(), 2);
        let table: ContextTable<u8> = ContextTable::new(0, 0);
        assert_eq!(table.capacity(), 1);
        assert_eq!(table.shard_count(), 1);
    }

    #[test]
    fn test_clear_releases_all_slots() {
        let table = ContextTable::new(4, 2);
        for tid in 0..4 {
            table.upsert(key(tid), tid).unwrap();
        }
        assert_eq!(table.clear(), 4);
        assert!(table.is_empty());
        assert!(table.upsert(key(7), 7).is_ok());
    }

    #[test]
    fn test_remove_then_upsert_never_full_under_contention() {
        // One slot, one key: whoever locks the shard after a remove must
        // see the slot already returned to the budget
        let table = Arc::new(ContextTable::new(1, 1));
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for i in 0..5_000u32 {
                        table.remove(key(1));
                        assert!(table.upsert(key(1), t * 10_000 + i).is_ok());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(table.len(), 1);
        assert!(table.contains(key(1)));
    }

    #[test]
    fn test_concurrent_disjoint_keys() {
        let table = Arc::new(ContextTable::new(1024, 16));
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for i in 0..500u32 {
                        let k = key(t * 1000 + i % 50);
                        table.upsert(k, i).unwrap();
                        table.with_mut(k, |v| *v += 1);
                        assert_eq!(table.remove(k), Some(i + 1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(table.is_empty());
    }
}
