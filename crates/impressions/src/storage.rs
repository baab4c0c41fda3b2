//! Storage abstractions for queued records and the observer cache.
//!
//! Records move through three states: active (eligible for delivery), in flight
//! (popped by a recorder) and deleted. A failed delivery makes in-flight records
//! active again with [`RecordStorage::set_active`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError, RwLock};

use crate::error::ImpressionsResult;
use crate::lock;

/// Identifier assigned by the storage to every inserted record.
pub type RecordId = u64;

/// A record together with its storage identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord<T> {
    pub id: RecordId,
    pub record: T,
}

/// Durable queue of records awaiting delivery.
pub trait RecordStorage<T>: Send + Sync {
    /// Append a record.
    fn insert(&self, record: T) -> ImpressionsResult<()>;

    /// Append several records.
    fn insert_all(&self, records: Vec<T>) -> ImpressionsResult<()> {
        for record in records {
            self.insert(record)?;
        }
        Ok(())
    }

    /// Take up to `count` active records and mark them in flight.
    fn pop(&self, count: usize) -> ImpressionsResult<Vec<StoredRecord<T>>>;

    /// Remove delivered records.
    fn delete(&self, ids: &[RecordId]) -> ImpressionsResult<()>;

    /// Return in-flight records to the active set.
    fn set_active(&self, ids: &[RecordId]) -> ImpressionsResult<()>;

    /// Number of stored records, active or in flight.
    fn count(&self) -> ImpressionsResult<usize>;
}

/// Durable map from impression fingerprint to the last time it was seen.
pub trait ObserverCacheStorage: Send + Sync {
    fn get(&self, hash: u64) -> ImpressionsResult<Option<i64>>;

    /// Insert or overwrite an entry, stamping it with `created_at`.
    fn insert(&self, hash: u64, time: i64, created_at: i64) -> ImpressionsResult<()>;

    fn insert_all(&self, entries: &[(u64, i64)], created_at: i64) -> ImpressionsResult<()> {
        for (hash, time) in entries {
            self.insert(*hash, *time, created_at)?;
        }
        Ok(())
    }

    /// Remove entries created before `created_before`. Returns the number removed.
    fn delete_outdated(&self, created_before: i64) -> ImpressionsResult<usize>;
}

#[derive(Debug)]
struct Slot<T> {
    record: T,
    active: bool,
}

#[derive(Debug)]
struct Records<T> {
    next_id: RecordId,
    slots: BTreeMap<RecordId, Slot<T>>,
}

/// In-memory [`RecordStorage`]. Records are popped in insertion order.
#[derive(Debug)]
pub struct InMemoryRecordStorage<T> {
    records: Mutex<Records<T>>,
}

impl<T> Default for InMemoryRecordStorage<T> {
    fn default() -> Self {
        Self {
            records: Mutex::new(Records {
                next_id: 1,
                slots: BTreeMap::new(),
            }),
        }
    }
}

impl<T: Clone> InMemoryRecordStorage<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record in insertion order.
    pub fn records(&self) -> Vec<T> {
        lock(&self.records)
            .slots
            .values()
            .map(|slot| slot.record.clone())
            .collect()
    }

    /// Number of records eligible for the next pop.
    pub fn active_count(&self) -> usize {
        lock(&self.records)
            .slots
            .values()
            .filter(|slot| slot.active)
            .count()
    }
}

impl<T: Clone + Send> RecordStorage<T> for InMemoryRecordStorage<T> {
    fn insert(&self, record: T) -> ImpressionsResult<()> {
        let mut records = lock(&self.records);
        let id = records.next_id;
        records.next_id += 1;
        records.slots.insert(id, Slot { record, active: true });
        Ok(())
    }

    fn pop(&self, count: usize) -> ImpressionsResult<Vec<StoredRecord<T>>> {
        let mut records = lock(&self.records);
        let popped: Vec<StoredRecord<T>> = records
            .slots
            .iter_mut()
            .filter(|(_, slot)| slot.active)
            .take(count)
            .map(|(id, slot)| {
                slot.active = false;
                StoredRecord {
                    id: *id,
                    record: slot.record.clone(),
                }
            })
            .collect();
        Ok(popped)
    }

    fn delete(&self, ids: &[RecordId]) -> ImpressionsResult<()> {
        let mut records = lock(&self.records);
        for id in ids {
            records.slots.remove(id);
        }
        Ok(())
    }

    fn set_active(&self, ids: &[RecordId]) -> ImpressionsResult<()> {
        let mut records = lock(&self.records);
        for id in ids {
            if let Some(slot) = records.slots.get_mut(id) {
                slot.active = true;
            }
        }
        Ok(())
    }

    fn count(&self) -> ImpressionsResult<usize> {
        Ok(lock(&self.records).slots.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ObserverEntry {
    time: i64,
    created_at: i64,
}

/// In-memory [`ObserverCacheStorage`].
#[derive(Debug, Default)]
pub struct InMemoryObserverCacheStorage {
    entries: RwLock<HashMap<u64, ObserverEntry>>,
}

impl InMemoryObserverCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted fingerprints.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObserverCacheStorage for InMemoryObserverCacheStorage {
    fn get(&self, hash: u64) -> ImpressionsResult<Option<i64>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(&hash).map(|entry| entry.time))
    }

    fn insert(&self, hash: u64, time: i64, created_at: i64) -> ImpressionsResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(hash, ObserverEntry { time, created_at });
        Ok(())
    }

    fn delete_outdated(&self, created_before: i64) -> ImpressionsResult<usize> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at >= created_before);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_marks_records_in_flight() {
        let storage = InMemoryRecordStorage::new();
        for i in 0..5 {
            storage.insert(i).unwrap();
        }

        let first = storage.pop(3).unwrap();
        assert_eq!(first.iter().map(|r| r.record).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(storage.active_count(), 2);

        let second = storage.pop(3).unwrap();
        assert_eq!(second.iter().map(|r| r.record).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(storage.count().unwrap(), 5);
    }

    #[test]
    fn test_delete_and_set_active() {
        let storage = InMemoryRecordStorage::new();
        storage.insert_all(vec!["a", "b", "c"]).unwrap();

        let popped = storage.pop(3).unwrap();
        let ids: Vec<RecordId> = popped.iter().map(|r| r.id).collect();
        storage.delete(&ids[..1]).unwrap();
        storage.set_active(&ids[1..]).unwrap();

        assert_eq!(storage.count().unwrap(), 2);
        assert_eq!(storage.active_count(), 2);
        assert_eq!(storage.records(), vec!["b", "c"]);
    }

    #[test]
    fn test_observer_storage_roundtrip() {
        let storage = InMemoryObserverCacheStorage::new();
        assert_eq!(storage.get(1).unwrap(), None);

        storage.insert(1, 100, 10).unwrap();
        storage.insert(1, 200, 20).unwrap();
        assert_eq!(storage.get(1).unwrap(), Some(200));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_observer_delete_outdated() {
        let storage = InMemoryObserverCacheStorage::new();
        storage.insert_all(&[(1, 100), (2, 200)], 10).unwrap();
        storage.insert(3, 300, 50).unwrap();

        assert_eq!(storage.delete_outdated(30).unwrap(), 2);
        assert_eq!(storage.get(1).unwrap(), None);
        assert_eq!(storage.get(3).unwrap(), Some(300));
    }
}
