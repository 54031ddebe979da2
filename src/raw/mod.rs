use crate::arena::{Arena, Exhausted};
use crate::config::KeyHasher;
use crate::node::*;
use parking_lot::Mutex;

/// The bucket array of the accelerator backend together with the two arenas it draws from.
///
/// `records` holds one slot per key the table may store, so it is what enforces the capacity.
/// `nodes` supplies the overflow slabs that get linked behind a bucket whose inline slab is
/// full.
///
/// Between batches every chain is packed: its records fill the leading slots and it carries no
/// more slabs than they need (see [`Table::compact`]). A slab is only linked once every slot
/// ahead of it is taken, so a bucket holding `n` claimed slots has at most `(n - 1) / 8`
/// overflow slabs even in the middle of a batch. On top of that each worker holds at most one
/// node that is not linked yet, either in hand or parked in `spares`. The node arena is sized
/// for exactly that, so it never runs dry before the record arena does.
#[derive(Debug)]
pub(crate) struct Table {
    buckets: Box<[Slab]>,
    nodes: Arena<Slab>,
    records: Arena<Record>,
    /// Nodes that lost a link race, kept for the next link of the same batch.
    spares: Mutex<Vec<u32>>,
}

/// The location of one occupied slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Located<'t> {
    pub(crate) slab: &'t Slab,
    pub(crate) index: usize,
    pub(crate) record: u32,
}

impl Table {
    /// Builds an empty table for `capacity` records, filled by at most `workers` threads at once.
    pub(crate) fn new(
        buckets: usize,
        capacity: usize,
        workers: usize,
        key_size: usize,
        value_size: usize,
    ) -> Self {
        assert_ne!(buckets, 0);
        Self {
            buckets: (0..buckets).map(|_| Slab::default()).collect(),
            nodes: Arena::with_capacity(capacity / SLAB_WIDTH + workers.max(1)),
            records: Arena::from_fn(capacity, |_| Record::new(key_size + value_size)),
            spares: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    pub(crate) fn bini(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub(crate) fn bucket(&self, i: usize) -> &Slab {
        &self.buckets[i]
    }

    #[inline]
    pub(crate) fn node(&self, i: u32) -> &Slab {
        self.nodes.get(i)
    }

    #[inline]
    pub(crate) fn record(&self, i: u32) -> &Record {
        self.records.get(i)
    }

    pub(crate) fn nodes(&self) -> &Arena<Slab> {
        &self.nodes
    }

    pub(crate) fn records(&self) -> &Arena<Record> {
        &self.records
    }

    /// A node for the next link: a parked spare if there is one, else a fresh allocation.
    pub(crate) fn take_node(&self) -> Result<u32, Exhausted> {
        match self.spares.lock().pop() {
            Some(node) => Ok(node),
            None => self.nodes.allocate(),
        }
    }

    /// Parks a node that was allocated but never linked.
    pub(crate) fn park_node(&self, node: u32) {
        self.spares.lock().push(node);
    }

    /// Hands every parked node back to the node arena. Release phase only.
    pub(crate) fn release_spares(&self) -> usize {
        let spares = std::mem::take(&mut *self.spares.lock());
        for &node in &spares {
            self.nodes.free(node);
        }
        spares.len()
    }

    /// Packs the records of bucket `i` into the leading slots of its chain, preserving their
    /// order, and frees the overflow slabs that are left without records. Returns how many
    /// slabs were freed.
    ///
    /// The caller must be the only one touching the bucket, and the node arena must be in its
    /// release phase.
    pub(crate) fn compact(&self, i: usize) -> usize {
        let mut links = Vec::new();
        let mut next = self.bucket(i).next();
        while let Some(node) = next {
            links.push(node);
            next = self.node(node).next();
        }
        let live: Vec<u32> = self.occupied(i).map(|l| l.record).collect();
        let keep = ((live.len() + SLAB_WIDTH - 1) / SLAB_WIDTH).max(1);
        if keep == links.len() + 1 && self.packed(i) {
            return 0;
        }

        let mut records = live.into_iter();
        for slab in std::iter::once(self.bucket(i)).chain(links.iter().map(|&n| self.node(n))) {
            for index in 0..SLAB_WIDTH {
                slab.store(index, records.next().unwrap_or(EMPTY));
            }
        }

        let last = if keep == 1 {
            self.bucket(i)
        } else {
            self.node(links[keep - 2])
        };
        last.unlink();
        let unused = &links[keep - 1..];
        for &node in unused {
            self.node(node).unlink();
            self.nodes.free(node);
        }
        unused.len()
    }

    /// Whether no slot of bucket `i` is empty ahead of an occupied one.
    fn packed(&self, i: usize) -> bool {
        let mut seen_empty = false;
        for slab in self.chain(i) {
            for index in 0..SLAB_WIDTH {
                match slab.slot(index) {
                    EMPTY => seen_empty = true,
                    _ if seen_empty => return false,
                    _ => {}
                }
            }
        }
        true
    }

    /// The inline slab of bucket `i` followed by its overflow slabs.
    pub(crate) fn chain(&self, i: usize) -> Chain<'_> {
        Chain {
            table: self,
            next: Some(self.bucket(i)),
        }
    }

    /// Every slot of bucket `i`'s chain that currently holds a record, in chain order.
    pub(crate) fn occupied(&self, i: usize) -> impl Iterator<Item = Located<'_>> + '_ {
        self.chain(i).flat_map(|slab| {
            (0..SLAB_WIDTH).filter_map(move |index| match slab.slot(index) {
                EMPTY => None,
                record => Some(Located {
                    slab,
                    index,
                    record,
                }),
            })
        })
    }

    /// Finds the first slot in bucket `bini` whose record has the given key.
    pub(crate) fn find(
        &self,
        bini: usize,
        hash: u64,
        key: &[u8],
        hasher: &dyn KeyHasher,
    ) -> Option<Located<'_>> {
        self.occupied(bini)
            .find(|l| self.record(l.record).matches(hash, key, hasher))
    }

    /// Number of records stored in bucket `i`.
    pub(crate) fn bucket_len(&self, i: usize) -> usize {
        self.chain(i).map(Slab::occupied).sum()
    }

    /// Number of live records. Only exact between batches.
    pub(crate) fn len(&self) -> usize {
        self.records.allocated()
    }
}

/// Walks one bucket's slabs, inline slab first.
pub(crate) struct Chain<'t> {
    table: &'t Table,
    next: Option<&'t Slab>,
}

impl<'t> Iterator for Chain<'t> {
    type Item = &'t Slab;

    fn next(&mut self) -> Option<Self::Item> {
        let slab = self.next?;
        self.next = slab.next().map(|n| self.table.node(n));
        Some(slab)
    }
}
