//! The host backend: a sequential table over a conventional hash index.
//!
//! Records live in a [`SlotMap`], whose generational keys give every record a versioned handle
//! for free. A [`HashTable`] indexes those keys by the stored hash of each record's key, so the
//! caller's hasher runs once per record and equality goes through [`KeyHasher::key_eq`]. The
//! backend enforces no capacity ceiling.

use crate::config::{HashmapConfig, KeyHasher};
use crate::error::{Error, Result};
use crate::handle::{next_table_id, Batch, Handle, InsertStatus};
use hashbrown::hash_table::Entry as IndexEntry;
use hashbrown::HashTable;
use slotmap::{DefaultKey, Key, KeyData, SlotMap};
use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
struct Entry {
    key: Box<[u8]>,
    value: Box<[u8]>,
    hash: u64,
}

/// Hash table whose batches run on the calling thread.
pub struct HostHashmap {
    index: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Entry>,
    hasher: Arc<dyn KeyHasher>,
    buckets: usize,
    id: u64,
    epoch: u32,
}

impl fmt::Debug for HostHashmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHashmap")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("len", &self.len())
            .field("buckets", &self.buckets)
            .finish()
    }
}

impl HostHashmap {
    /// Builds an empty table. `max_keys` only sizes the initial allocation.
    pub fn new(config: &HashmapConfig) -> Result<Self> {
        config.validate()?;
        let buckets = config.bucket_count();
        let id = next_table_id();
        tracing::debug!(id, max_keys = config.max_keys, buckets, "created host hash table");
        Ok(Self {
            index: HashTable::with_capacity(config.max_keys),
            slots: SlotMap::with_capacity_and_key(config.max_keys),
            hasher: Arc::clone(config.key_hasher()),
            buckets,
            id,
            epoch: 0,
        })
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The bucket count that `bucket_sizes` reports against.
    pub fn bucket_count(&self) -> usize {
        self.buckets
    }

    fn handle(&self, k: DefaultKey) -> Handle {
        Handle::new(self.id, self.epoch, k.data().as_ffi())
    }

    fn resolve(&self, handle: &Handle) -> Option<DefaultKey> {
        if !handle.issued_by(self.id, self.epoch) {
            return None;
        }
        let k = DefaultKey::from(KeyData::from_ffi(handle.slot()));
        self.slots.contains_key(k).then_some(k)
    }

    fn lookup(&self, key: &[u8]) -> Option<DefaultKey> {
        let hash = self.hasher.hash_key(key);
        self.index
            .find(hash, |&k| {
                self.slots
                    .get(k)
                    .map(|e| e.hash == hash && self.hasher.key_eq(&e.key, key))
                    .unwrap_or(false)
            })
            .copied()
    }

    /// Inserts each key/value pair in input order. A key that is already present, or that an
    /// earlier element of the same batch inserted, reports [`InsertStatus::Duplicate`].
    pub fn insert(&mut self, keys: &[&[u8]], values: &[&[u8]]) -> Batch<InsertStatus> {
        tracing::trace!(n = keys.len(), epoch = self.epoch, "insert batch");
        let mut batch = Batch::with_len(keys.len(), InsertStatus::Duplicate);
        for (i, (key, value)) in keys.iter().zip(values).enumerate() {
            let hash = self.hasher.hash_key(key);
            let slots = &mut self.slots;
            let hasher = &self.hasher;
            match self.index.entry(
                hash,
                |&k| {
                    slots
                        .get(k)
                        .map(|e| e.hash == hash && hasher.key_eq(&e.key, key))
                        .unwrap_or(false)
                },
                |&k| slots.get(k).map(|e| e.hash).unwrap_or(0),
            ) {
                IndexEntry::Occupied(_) => {}
                IndexEntry::Vacant(v) => {
                    let k = slots.insert(Entry {
                        key: (*key).into(),
                        value: (*value).into(),
                        hash,
                    });
                    v.insert(k);
                    batch.masks[i] = InsertStatus::Inserted;
                    batch.handles[i] = Handle::new(self.id, self.epoch, k.data().as_ffi());
                }
            }
        }
        batch
    }

    /// Looks up each key, returning a handle for every hit.
    pub fn find(&self, keys: &[&[u8]]) -> Batch<bool> {
        tracing::trace!(n = keys.len(), epoch = self.epoch, "find batch");
        let mut batch = Batch::with_len(keys.len(), false);
        for (i, key) in keys.iter().enumerate() {
            if let Some(k) = self.lookup(key) {
                batch.handles[i] = self.handle(k);
                batch.masks[i] = true;
            }
        }
        batch
    }

    /// Removes each key. Only the first of several equal keys reports `true`.
    pub fn erase(&mut self, keys: &[&[u8]]) -> Vec<bool> {
        tracing::trace!(n = keys.len(), epoch = self.epoch, "erase batch");
        keys.iter()
            .map(|key| {
                let hash = self.hasher.hash_key(key);
                let slots = &self.slots;
                let hasher = &self.hasher;
                let removed = match self.index.entry(
                    hash,
                    |&k| {
                        slots
                            .get(k)
                            .map(|e| e.hash == hash && hasher.key_eq(&e.key, key))
                            .unwrap_or(false)
                    },
                    |&k| slots.get(k).map(|e| e.hash).unwrap_or(0),
                ) {
                    IndexEntry::Occupied(o) => Some(o.remove().0),
                    IndexEntry::Vacant(_) => None,
                };
                match removed {
                    Some(k) => self.slots.remove(k).is_some(),
                    None => false,
                }
            })
            .collect()
    }

    /// Copies out the key and value of every live, selected handle into the matching output.
    pub fn unpack(
        &self,
        handles: &[Handle],
        masks: Option<&[bool]>,
        keys: Option<Vec<&mut [u8]>>,
        values: Option<Vec<&mut [u8]>>,
    ) -> Vec<bool> {
        let mut keys = keys.map(Vec::into_iter);
        let mut values = values.map(Vec::into_iter);
        handles
            .iter()
            .enumerate()
            .map(|(i, handle)| {
                // keep the output iterators in step with the handles
                let key_out = keys.as_mut().and_then(Iterator::next);
                let value_out = values.as_mut().and_then(Iterator::next);
                if !masks.map_or(true, |m| m[i]) {
                    return false;
                }
                let Some(entry) = self.resolve(handle).and_then(|k| self.slots.get(k)) else {
                    return false;
                };
                if let Some(out) = key_out {
                    out.copy_from_slice(&entry.key);
                }
                if let Some(out) = value_out {
                    out.copy_from_slice(&entry.value);
                }
                true
            })
            .collect()
    }

    /// Overwrites the value of every live, selected handle.
    pub fn assign(
        &mut self,
        handles: &[Handle],
        masks: Option<&[bool]>,
        values: &[&[u8]],
    ) -> Vec<bool> {
        handles
            .iter()
            .zip(values)
            .enumerate()
            .map(|(i, (handle, value))| {
                if !masks.map_or(true, |m| m[i]) {
                    return false;
                }
                match self.resolve(handle) {
                    Some(k) => {
                        self.slots[k].value.copy_from_slice(value);
                        true
                    }
                    None => false,
                }
            })
            .collect()
    }

    /// Live records per bucket, where a record's bucket is its hash modulo the bucket count.
    pub fn bucket_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.buckets];
        for entry in self.slots.values() {
            sizes[(entry.hash % self.buckets as u64) as usize] += 1;
        }
        sizes
    }

    /// Records per bucket.
    pub fn load_factor(&self) -> f32 {
        self.len() as f32 / self.buckets as f32
    }

    /// Handles to every stored record.
    pub fn handles(&self) -> Vec<Handle> {
        self.slots.keys().map(|k| self.handle(k)).collect()
    }

    /// Switches to `buckets` buckets and rebuilds the index. Outstanding handles go stale.
    pub fn rehash(&mut self, buckets: usize) -> Result<()> {
        if buckets == 0 {
            return Err(Error::ZeroBuckets);
        }
        let slots = &self.slots;
        let mut index = HashTable::with_capacity(buckets.max(slots.len()));
        for (k, entry) in slots.iter() {
            index.insert_unique(entry.hash, k, |&k| slots[k].hash);
        }
        tracing::debug!(
            from = self.buckets,
            to = buckets,
            records = slots.len(),
            "rehashed host hash table"
        );
        self.index = index;
        self.buckets = buckets;
        self.epoch = self.epoch.wrapping_add(1);
        Ok(())
    }
}
