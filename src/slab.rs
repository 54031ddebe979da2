//! The accelerator backend: a bucket table driven by a pool of parallel workers.
//!
//! Every element of a batch becomes its own task on the table's worker pool. Workers only
//! coordinate through the two arenas and through compare-and-swap on slots and slab links.
//!
//! # Insertion
//!
//! A worker first scans its home bucket for the key and reports a duplicate if it finds it.
//! Otherwise it allocates a record, fills it, and claims the _first_ empty slot of the chain in
//! chain order, linking a new overflow slab when the chain is full. Two workers holding the same
//! key can both get this far, since neither saw the other during its scan. To settle that, each
//! worker re-scans every slot that precedes the one it claimed. Within an insert batch slots
//! only ever go from empty to occupied, and a worker only moves past a slot that it saw
//! occupied, so every slot ahead of a claimed one is occupied and stays so for the rest of the
//! batch. The worker holding the earliest slot for a key therefore sees no equal key ahead of
//! it, and every other worker for that key sees the earliest one. Exactly one of them wins.
//!
//! Losing slots, records that never got published and overflow slabs that lost their link race
//! are handed back only after every worker is done. That keeps allocation and release in
//! separate phases, which the arena needs.
//!
//! # Compaction
//!
//! Erase and the losers of an insert leave holes in their chains. Once a batch is done, every
//! bucket it emptied a slot in is packed again and its spare overflow slabs go back to the node
//! arena, so churn never strands slabs.

use crate::arena::{Exhausted, HeapSnapshot};
use crate::config::{HashmapConfig, KeyHasher};
use crate::error::{Error, Result};
use crate::handle::{next_table_id, Batch, Handle, InsertStatus};
use crate::node::{Slab, EMPTY, SLAB_WIDTH};
use crate::raw::{Located, Table};
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;

#[inline]
fn pack_slot(record: u32, generation: u32) -> u64 {
    (u64::from(generation) << 32) | u64::from(record)
}

#[inline]
fn split_slot(slot: u64) -> (u32, u32) {
    (slot as u32, (slot >> 32) as u32)
}

/// What an insert worker leaves behind for the release phase.
struct Pending<'t> {
    status: InsertStatus,
    /// The record that was published, if this worker won.
    inserted: Option<u32>,
    /// A claimed slot that must be emptied again, with the bucket it belongs to.
    vacate: Option<(usize, &'t Slab, usize)>,
    /// A record that must go back to the record arena.
    record: Option<u32>,
}

impl Pending<'_> {
    fn done(status: InsertStatus) -> Self {
        Self {
            status,
            inserted: None,
            vacate: None,
            record: None,
        }
    }
}

/// Hash table whose batches are executed by a dedicated worker pool.
pub struct SlabHashmap {
    table: Table,
    id: u64,
    epoch: u32,
    max_keys: usize,
    key_size: usize,
    value_size: usize,
    hasher: Arc<dyn KeyHasher>,
    pool: rayon::ThreadPool,
}

impl fmt::Debug for SlabHashmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabHashmap")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("len", &self.len())
            .field("buckets", &self.table.bucket_count())
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl SlabHashmap {
    /// Builds an empty table and starts `workers` worker threads (one per CPU if zero).
    pub fn new(config: &HashmapConfig, workers: usize) -> Result<Self> {
        config.validate()?;
        let workers = if workers == 0 {
            num_cpus::get()
        } else {
            workers
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("slabhash-worker-{}", i))
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;
        let buckets = config.bucket_count();
        let id = next_table_id();
        tracing::debug!(
            id,
            max_keys = config.max_keys,
            buckets,
            workers,
            "created accelerator hash table"
        );
        Ok(Self {
            table: Table::new(
                buckets,
                config.max_keys,
                workers,
                config.key_size,
                config.value_size,
            ),
            id,
            epoch: 0,
            max_keys: config.max_keys,
            key_size: config.key_size,
            value_size: config.value_size,
            hasher: Arc::clone(config.key_hasher()),
            pool,
        })
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most records the table can hold at once.
    pub fn capacity(&self) -> usize {
        self.max_keys
    }

    /// Number of buckets, each an inline slab plus its overflow chain.
    pub fn bucket_count(&self) -> usize {
        self.table.bucket_count()
    }

    /// Number of record slots still available.
    pub fn free_count(&self) -> usize {
        self.table.records().free_count()
    }

    /// The raw state of the record allocator.
    pub fn record_snapshot(&self) -> HeapSnapshot {
        self.table.records().snapshot()
    }

    /// The raw state of the overflow slab allocator.
    pub fn node_snapshot(&self) -> HeapSnapshot {
        self.table.nodes().snapshot()
    }

    fn handle(&self, record: u32) -> Handle {
        Handle::new(
            self.id,
            self.epoch,
            pack_slot(record, self.table.record(record).generation()),
        )
    }

    /// Resolves a handle to its record index if it is still live.
    fn resolve(&self, handle: &Handle) -> Option<u32> {
        if !handle.issued_by(self.id, self.epoch) {
            return None;
        }
        let (record, generation) = split_slot(handle.slot());
        if record as usize >= self.table.records().capacity() {
            return None;
        }
        (self.table.record(record).generation() == generation).then_some(record)
    }

    /// Inserts each key/value pair on the worker pool. Of several equal keys at most one is
    /// inserted; the others report [`InsertStatus::Duplicate`].
    pub fn insert(&mut self, keys: &[&[u8]], values: &[&[u8]]) -> Batch<InsertStatus> {
        let n = keys.len();
        tracing::trace!(n, epoch = self.epoch, "insert batch");
        let this = &*self;
        let pending: Vec<Pending<'_>> = this.pool.install(|| {
            keys.par_iter()
                .zip(values.par_iter())
                .map(|(key, value)| insert_one(&this.table, &*this.hasher, key, value))
                .collect()
        });

        // release phase
        this.pool.install(|| {
            pending.par_iter().for_each(|p| {
                if let (Some((_, slab, index)), Some(record)) = (p.vacate, p.record) {
                    slab.vacate(index, record);
                }
                if let Some(record) = p.record {
                    this.table.records().free(record);
                }
            })
        });
        let spares = this.table.release_spares();
        let touched: Vec<usize> = pending
            .iter()
            .filter_map(|p| p.vacate.map(|(bini, _, _)| bini))
            .collect();
        let freed = this.compact(touched);
        tracing::trace!(spares, freed, "released overflow slabs");

        let mut batch = Batch::with_len(n, InsertStatus::Duplicate);
        for (i, p) in pending.into_iter().enumerate() {
            batch.masks[i] = p.status;
            if let Some(record) = p.inserted {
                batch.handles[i] = self.handle(record);
            }
        }
        let exhausted = batch.count(InsertStatus::CapacityExhausted);
        if exhausted > 0 {
            tracing::warn!(
                exhausted,
                capacity = self.max_keys,
                "insert batch ran out of slots"
            );
        }
        batch
    }

    /// Looks up each key on the worker pool, returning a handle for every hit.
    pub fn find(&self, keys: &[&[u8]]) -> Batch<bool> {
        tracing::trace!(n = keys.len(), epoch = self.epoch, "find batch");
        let found: Vec<Option<u32>> = self.pool.install(|| {
            keys.par_iter()
                .map(|key| {
                    let hash = self.hasher.hash_key(key);
                    self.table
                        .find(self.table.bini(hash), hash, key, &*self.hasher)
                        .map(|l| l.record)
                })
                .collect()
        });
        let mut batch = Batch::with_len(found.len(), false);
        for (i, record) in found.into_iter().enumerate() {
            if let Some(record) = record {
                batch.handles[i] = self.handle(record);
                batch.masks[i] = true;
            }
        }
        batch
    }

    /// Removes each key on the worker pool, then packs the buckets it removed from. Only one
    /// of several equal keys reports `true`.
    pub fn erase(&mut self, keys: &[&[u8]]) -> Vec<bool> {
        tracing::trace!(n = keys.len(), epoch = self.epoch, "erase batch");
        let table = &self.table;
        let hasher = &*self.hasher;
        let erased: Vec<Option<usize>> = self.pool.install(|| {
            keys.par_iter()
                .map(|key| {
                    let hash = hasher.hash_key(key);
                    let bini = table.bini(hash);
                    match table.find(bini, hash, key, hasher) {
                        // only one worker can empty the slot if the key appears twice
                        Some(Located {
                            slab,
                            index,
                            record,
                        }) if slab.vacate(index, record) => {
                            table.record(record).retire();
                            table.records().free(record);
                            Some(bini)
                        }
                        _ => None,
                    }
                })
                .collect()
        });
        let freed = self.compact(erased.iter().flatten().copied().collect());
        tracing::trace!(freed, "released overflow slabs");
        erased.iter().map(Option::is_some).collect()
    }

    /// Packs every bucket in `touched` and returns how many overflow slabs were freed.
    fn compact(&self, mut touched: Vec<usize>) -> usize {
        touched.sort_unstable();
        touched.dedup();
        let table = &self.table;
        // distinct buckets share no slabs, so each worker owns the chain it packs
        self.pool
            .install(|| touched.par_iter().map(|&b| table.compact(b)).sum::<usize>())
    }

    /// Copies out the key and value of every live, selected handle into the matching output.
    pub fn unpack(
        &self,
        handles: &[Handle],
        masks: Option<&[bool]>,
        keys: Option<Vec<&mut [u8]>>,
        values: Option<Vec<&mut [u8]>>,
    ) -> Vec<bool> {
        let key_size = self.key_size;
        let n = handles.len();
        let mut key_slots: Vec<Option<&mut [u8]>> = match keys {
            Some(k) => k.into_iter().map(Some).collect(),
            None => (0..n).map(|_| None).collect(),
        };
        let mut value_slots: Vec<Option<&mut [u8]>> = match values {
            Some(v) => v.into_iter().map(Some).collect(),
            None => (0..n).map(|_| None).collect(),
        };
        self.pool.install(|| {
            handles
                .par_iter()
                .enumerate()
                .zip(key_slots.par_iter_mut())
                .zip(value_slots.par_iter_mut())
                .map(|(((i, handle), key), value)| {
                    if !masks.map_or(true, |m| m[i]) {
                        return false;
                    }
                    match self.resolve(handle) {
                        Some(record) => {
                            self.table.record(record).read_into(
                                key_size,
                                key.as_deref_mut(),
                                value.as_deref_mut(),
                            );
                            true
                        }
                        None => false,
                    }
                })
                .collect()
        })
    }

    /// Overwrites the value of every live, selected handle.
    pub fn assign(
        &mut self,
        handles: &[Handle],
        masks: Option<&[bool]>,
        values: &[&[u8]],
    ) -> Vec<bool> {
        let key_size = self.key_size;
        let this = &*self;
        this.pool.install(|| {
            handles
                .par_iter()
                .zip(values.par_iter())
                .enumerate()
                .map(|(i, (handle, value))| {
                    if !masks.map_or(true, |m| m[i]) {
                        return false;
                    }
                    match this.resolve(handle) {
                        Some(record) => {
                            this.table.record(record).write_value(key_size, value);
                            true
                        }
                        None => false,
                    }
                })
                .collect()
        })
    }

    /// Live records per bucket.
    pub fn bucket_sizes(&self) -> Vec<usize> {
        let table = &self.table;
        self.pool.install(|| {
            (0..table.bucket_count())
                .into_par_iter()
                .map(|b| table.bucket_len(b))
                .collect()
        })
    }

    /// Live records per bucket, on average.
    pub fn load_factor(&self) -> f32 {
        let live: usize = self.bucket_sizes().iter().sum();
        live as f32 / self.table.bucket_count() as f32
    }

    /// Handles to every live record.
    pub fn handles(&self) -> Vec<Handle> {
        let table = &self.table;
        self.pool.install(|| {
            (0..table.bucket_count())
                .into_par_iter()
                .flat_map_iter(|b| table.occupied(b).map(|l| self.handle(l.record)))
                .collect()
        })
    }

    /// Rebuilds the table with `buckets` buckets.
    ///
    /// Every live record is re-inserted into a fresh bucket array with fresh arenas, which also
    /// reclaims overflow slabs. The table epoch advances, so all outstanding handles go stale.
    pub fn rehash(&mut self, buckets: usize) -> Result<()> {
        if buckets == 0 {
            return Err(Error::ZeroBuckets);
        }
        let key_size = self.key_size;
        let live: Vec<(Box<[u8]>, Box<[u8]>)> = {
            let table = &self.table;
            self.pool.install(|| {
                (0..table.bucket_count())
                    .into_par_iter()
                    .flat_map_iter(|b| {
                        table.occupied(b).map(|l| {
                            let record = table.record(l.record);
                            (record.key(key_size), record.value(key_size))
                        })
                    })
                    .collect()
            })
        };

        let next = Table::new(
            buckets,
            self.max_keys,
            self.pool.current_num_threads(),
            self.key_size,
            self.value_size,
        );
        // replayed one at a time: no link races, so every chain comes out packed
        for (key, value) in &live {
            let p = insert_one(&next, &*self.hasher, key, value);
            debug_assert_eq!(p.status, InsertStatus::Inserted);
        }
        tracing::debug!(
            from = self.table.bucket_count(),
            to = buckets,
            records = live.len(),
            "rehashed accelerator hash table"
        );
        self.table = next;
        self.epoch = self.epoch.wrapping_add(1);
        Ok(())
    }
}

/// One insert worker. See the module documentation for the protocol.
fn insert_one<'t>(
    table: &'t Table,
    hasher: &dyn KeyHasher,
    key: &[u8],
    value: &[u8],
) -> Pending<'t> {
    let hash = hasher.hash_key(key);
    let bini = table.bini(hash);

    if table.find(bini, hash, key, hasher).is_some() {
        return Pending::done(InsertStatus::Duplicate);
    }

    let record = match table.records().allocate() {
        Ok(record) => record,
        Err(Exhausted) => return Pending::done(InsertStatus::CapacityExhausted),
    };
    table.record(record).fill(hash, key, value);

    let mut spare = None;
    let mut slab = table.bucket(bini);
    let (claimed, index) = 'claim: loop {
        for i in 0..SLAB_WIDTH {
            if slab.slot(i) == EMPTY && slab.claim(i, record) {
                break 'claim (slab, i);
            }
        }
        slab = match slab.next() {
            Some(node) => table.node(node),
            None => {
                let node = match spare.take().map_or_else(|| table.take_node(), Ok) {
                    Ok(node) => node,
                    Err(Exhausted) => {
                        return Pending {
                            record: Some(record),
                            ..Pending::done(InsertStatus::CapacityExhausted)
                        }
                    }
                };
                match slab.link(node) {
                    Ok(()) => table.node(node),
                    Err(winner) => {
                        spare = Some(node);
                        table.node(winner)
                    }
                }
            }
        };
    };

    if let Some(node) = spare {
        table.park_node(node);
    }

    // everything ahead of our slot is occupied for the rest of the batch
    let lost = table
        .occupied(bini)
        .take_while(|l| !(std::ptr::eq(l.slab, claimed) && l.index == index))
        .any(|l| table.record(l.record).matches(hash, key, hasher));

    if lost {
        Pending {
            status: InsertStatus::Duplicate,
            inserted: None,
            vacate: Some((bini, claimed, index)),
            record: Some(record),
        }
    } else {
        Pending {
            status: InsertStatus::Inserted,
            inserted: Some(record),
            vacate: None,
            record: None,
        }
    }
}
