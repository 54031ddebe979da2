//! Handles to stored records and the per-element results of batch operations.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out the id that ties every handle to the table instance that issued it.
pub(crate) fn next_table_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// An opaque reference to one stored record.
///
/// Handles are returned by [`Hashmap::insert`](crate::Hashmap::insert) and
/// [`Hashmap::find`](crate::Hashmap::find) and resolved by
/// [`Hashmap::unpack`](crate::Hashmap::unpack) and
/// [`Hashmap::assign`](crate::Hashmap::assign). A handle carries the id of the table instance
/// that produced it, so it never resolves against any other table. It is also versioned twice:
/// by the epoch of that table, which changes on every rehash, and by the generation of its
/// slot, which changes whenever the record is erased. A handle that no longer matches simply
/// fails to resolve.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    table: u64,
    epoch: u32,
    slot: u64,
}

impl Handle {
    /// A handle that never resolves. Batch outputs hold it wherever the mask is false.
    pub const NULL: Handle = Handle {
        table: u64::MAX,
        epoch: u32::MAX,
        slot: u64::MAX,
    };

    pub(crate) const fn new(table: u64, epoch: u32, slot: u64) -> Self {
        Handle { table, epoch, slot }
    }

    pub(crate) fn table(&self) -> u64 {
        self.table
    }

    pub(crate) fn epoch(&self) -> u32 {
        self.epoch
    }

    pub(crate) fn slot(&self) -> u64 {
        self.slot
    }

    /// Whether this is [`Handle::NULL`].
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Whether this handle was issued by table `table` during epoch `epoch`.
    #[inline]
    pub(crate) fn issued_by(&self, table: u64, epoch: u32) -> bool {
        !self.is_null() && self.table == table && self.epoch == epoch
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("Handle(null)")
        } else {
            write!(f, "Handle({}.{}@{:#x})", self.table(), self.epoch(), self.slot())
        }
    }
}

/// Per-element outcome of an insert.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum InsertStatus {
    /// The record was stored.
    Inserted = 1,
    /// The key was already present (or inserted by another element of the same batch). The
    /// stored record is unchanged.
    Duplicate = 2,
    /// No free slot was left for the record.
    CapacityExhausted = 3,
}

impl InsertStatus {
    /// Whether the element was stored.
    #[inline]
    pub fn is_inserted(self) -> bool {
        self == InsertStatus::Inserted
    }
}

/// Handles and masks produced by one batch operation, one entry per input element.
///
/// `handles[i]` is [`Handle::NULL`] unless element `i` succeeded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch<M> {
    pub handles: Vec<Handle>,
    pub masks: Vec<M>,
}

impl<M> Batch<M> {
    pub(crate) fn with_len(len: usize, mask: M) -> Self
    where
        M: Clone,
    {
        Batch {
            handles: vec![Handle::NULL; len],
            masks: vec![mask; len],
        }
    }

    /// Number of elements in the batch.
    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    /// Pairs of handle and mask, in input order.
    pub fn iter(&self) -> impl Iterator<Item = (&Handle, &M)> + '_ {
        self.handles.iter().zip(self.masks.iter())
    }
}

impl Batch<InsertStatus> {
    /// A boolean mask that is true for the elements that were inserted.
    pub fn mask(&self) -> Vec<bool> {
        self.masks.iter().map(|m| m.is_inserted()).collect()
    }

    /// How many elements ended with `status`.
    pub fn count(&self, status: InsertStatus) -> usize {
        self.masks.iter().filter(|&&m| m == status).count()
    }
}

impl Batch<bool> {
    /// The boolean mask, for passing on to `unpack` or `assign`.
    pub fn mask(&self) -> Vec<bool> {
        self.masks.clone()
    }

    /// How many elements were found.
    pub fn hits(&self) -> usize {
        self.masks.iter().filter(|&&m| m).count()
    }
}
