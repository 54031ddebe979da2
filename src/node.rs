use crate::config::KeyHasher;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// The number of record slots in one slab.
pub(crate) const SLAB_WIDTH: usize = 8;

/// Marks a slot that holds no record.
pub(crate) const EMPTY: u32 = u32::MAX;

/// Marks the end of a slab chain.
pub(crate) const NIL: u32 = u32::MAX;

/// A fixed group of record slots plus a link to the next slab of the chain.
///
/// Every bucket owns one slab inline. When it fills up, further slabs are drawn from the node
/// arena and linked behind it. A slot goes from `EMPTY` to a record index by compare-and-swap,
/// so two workers can never claim the same slot; a link goes from `NIL` to a node index the same
/// way.
#[derive(Debug)]
pub(crate) struct Slab {
    slots: [AtomicU32; SLAB_WIDTH],
    next: AtomicU32,
}

impl Default for Slab {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU32::new(EMPTY)),
            next: AtomicU32::new(NIL),
        }
    }
}

impl Slab {
    #[inline]
    pub(crate) fn slot(&self, i: usize) -> u32 {
        self.slots[i].load(Ordering::Acquire)
    }

    /// Tries to place `record` into the empty slot `i`.
    #[inline]
    pub(crate) fn claim(&self, i: usize, record: u32) -> bool {
        self.slots[i]
            .compare_exchange(EMPTY, record, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Empties slot `i` if it still holds `record`.
    #[inline]
    pub(crate) fn vacate(&self, i: usize, record: u32) -> bool {
        self.slots[i]
            .compare_exchange(record, EMPTY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub(crate) fn next(&self) -> Option<u32> {
        match self.next.load(Ordering::Acquire) {
            NIL => None,
            node => Some(node),
        }
    }

    /// Links `node` behind this slab unless another worker already linked one, in which case
    /// that node is returned.
    pub(crate) fn link(&self, node: u32) -> Result<(), u32> {
        self.next
            .compare_exchange(NIL, node, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }

    /// Overwrites slot `i`. Only for a caller with exclusive use of the slab.
    #[inline]
    pub(crate) fn store(&self, i: usize, record: u32) {
        self.slots[i].store(record, Ordering::Release);
    }

    /// Cuts the chain after this slab. Only for a caller with exclusive use of the slab.
    pub(crate) fn unlink(&self) {
        self.next.store(NIL, Ordering::Release);
    }

    pub(crate) fn occupied(&self) -> usize {
        (0..SLAB_WIDTH).filter(|&i| self.slot(i) != EMPTY).count()
    }
}

/// Storage for one key/value record, laid out as the key bytes followed by the value bytes.
///
/// The generation is bumped every time the record is erased, which invalidates outstanding
/// handles to it. The bytes sit behind a lock so that a batch holding the same handle twice
/// cannot race on the value.
#[derive(Debug)]
pub(crate) struct Record {
    generation: AtomicU32,
    hash: AtomicU64,
    bytes: RwLock<Box<[u8]>>,
}

impl Record {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            generation: AtomicU32::new(0),
            hash: AtomicU64::new(0),
            bytes: RwLock::new(vec![0; len].into_boxed_slice()),
        }
    }

    #[inline]
    pub(crate) fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn retire(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn hash(&self) -> u64 {
        self.hash.load(Ordering::Acquire)
    }

    /// Fills a freshly allocated record. Must happen before the record is published in a slot.
    pub(crate) fn fill(&self, hash: u64, key: &[u8], value: &[u8]) {
        let mut bytes = self.bytes.write();
        let (k, v) = bytes.split_at_mut(key.len());
        k.copy_from_slice(key);
        v.copy_from_slice(value);
        self.hash.store(hash, Ordering::Release);
    }

    pub(crate) fn matches(&self, hash: u64, key: &[u8], hasher: &dyn KeyHasher) -> bool {
        self.hash() == hash && hasher.key_eq(&self.bytes.read()[..key.len()], key)
    }

    pub(crate) fn read_into(&self, key_size: usize, key: Option<&mut [u8]>, value: Option<&mut [u8]>) {
        let bytes = self.bytes.read();
        let (k, v) = bytes.split_at(key_size);
        if let Some(key) = key {
            key.copy_from_slice(k);
        }
        if let Some(value) = value {
            value.copy_from_slice(v);
        }
    }

    pub(crate) fn key(&self, key_size: usize) -> Box<[u8]> {
        self.bytes.read()[..key_size].into()
    }

    pub(crate) fn value(&self, key_size: usize) -> Box<[u8]> {
        self.bytes.read()[key_size..].into()
    }

    pub(crate) fn write_value(&self, key_size: usize, value: &[u8]) {
        self.bytes.write()[key_size..].copy_from_slice(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_claims_are_exclusive() {
        let slab = Slab::default();
        assert!(slab.claim(0, 7));
        assert!(!slab.claim(0, 8));
        assert_eq!(slab.slot(0), 7);
        assert_eq!(slab.occupied(), 1);
        assert!(!slab.vacate(0, 8));
        assert!(slab.vacate(0, 7));
        assert_eq!(slab.slot(0), EMPTY);
    }

    #[test]
    fn first_link_wins() {
        let slab = Slab::default();
        assert_eq!(slab.next(), None);
        assert_eq!(slab.link(3), Ok(()));
        assert_eq!(slab.link(4), Err(3));
        assert_eq!(slab.next(), Some(3));
    }

    #[test]
    fn record_layout() {
        let record = Record::new(6);
        let hasher = |_: &[u8]| 0u64;
        record.fill(42, b"abcd", b"xy");
        assert!(record.matches(42, b"abcd", &hasher));
        assert!(!record.matches(41, b"abcd", &hasher));
        assert!(!record.matches(42, b"abce", &hasher));

        record.write_value(4, b"zz");
        assert_eq!(&*record.key(4), b"abcd");
        assert_eq!(&*record.value(4), b"zz");

        let mut key = [0; 4];
        record.read_into(4, Some(&mut key), None);
        assert_eq!(&key, b"abcd");

        let generation = record.generation();
        record.retire();
        assert_eq!(record.generation(), generation.wrapping_add(1));
    }
}
