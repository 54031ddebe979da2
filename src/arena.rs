//! A fixed-capacity pool of slots with a lock-free free-list stack.
//!
//! Allocating from a hash table worker has to be cheap, so every slot is created up front and
//! handed out by index. Which slots are free is tracked by a stack of indices (`heap`) and a
//! single atomic top-of-stack counter:
//!
//! ```text
//!  heap  --allocate-->  heap  --allocate-->  heap  --free(0)-->  heap
//!  N-1                  N-1                  N-1                 N-1
//!   .                    .                    .                   .
//!   3                    3                    3                   3
//!   2                    2                    2 <-                2
//!   1                    1 <-                 1                   0 <-
//!   0 <- counter         0                    0                   0
//! ```
//!
//! The entries at positions `[counter, capacity)` are the free slots; whatever lies below the
//! counter is stale. The free entries together with the allocated slots always form a
//! permutation of `[0, capacity)`, so once everything is freed `heap` is one as well.
//!
//! Each `allocate` or `free` is one counter update and one heap access. Any number of threads
//! may allocate at the same time, and any number may free at the same time, but the two must
//! not overlap: a `free` that lands between another thread's counter increment and its heap
//! read would hand that thread the freed index and lose the one it should have received. The
//! hash table runs its allocation and its release work in separate phases for this reason.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use thiserror::Error;

/// The largest number of slots an arena can hold.
///
/// Slot indices are `u32`, and `u32::MAX` is kept free as a sentinel for users of the arena.
pub const MAX_CAPACITY: usize = u32::MAX as usize;

/// Returned by [`Arena::allocate`] when every slot is in use.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("all arena slots are allocated")]
pub struct Exhausted;

/// Raw allocator state, exported for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeapSnapshot {
    /// Number of allocated slots.
    pub counter: usize,
    /// The free-list stack. Only `heap[counter..]` is meaningful.
    pub heap: Vec<u32>,
}

impl HeapSnapshot {
    /// The indices that are currently free.
    pub fn free_slots(&self) -> &[u32] {
        &self.heap[self.counter.min(self.heap.len())..]
    }
}

/// A fixed-capacity pool of `T`s addressed by `u32` slot index.
pub struct Arena<T> {
    data: Box<[T]>,
    heap: Box<[AtomicU32]>,
    counter: AtomicUsize,
}

impl<T> fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity())
            .field("allocated", &self.allocated())
            .finish()
    }
}

impl<T: Default> Arena<T> {
    /// Creates an arena of `capacity` default-initialized slots, all of them free.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds [`MAX_CAPACITY`].
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_fn(capacity, |_| T::default())
    }
}

impl<T> Arena<T> {
    /// Creates an arena whose slot `i` is initialized to `init(i)`, all of them free.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds [`MAX_CAPACITY`].
    pub fn from_fn<F>(capacity: usize, mut init: F) -> Self
    where
        F: FnMut(u32) -> T,
    {
        assert!(
            capacity <= MAX_CAPACITY,
            "arena capacity {} exceeds {}",
            capacity,
            MAX_CAPACITY
        );
        let mut arena = Self {
            data: (0..capacity as u32).map(&mut init).collect(),
            heap: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            counter: AtomicUsize::new(0),
        };
        arena.reset();
        arena
    }

    /// Takes one slot off the free list.
    ///
    /// The counter is never advanced past the capacity, so a full arena stays consistent no
    /// matter how many workers keep asking.
    pub fn allocate(&self) -> Result<u32, Exhausted> {
        let capacity = self.heap.len();
        let index = self
            .counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                if c < capacity {
                    Some(c + 1)
                } else {
                    None
                }
            })
            .map_err(|_| Exhausted)?;
        Ok(self.heap[index].load(Ordering::Acquire))
    }

    /// Returns `slot` to the free list.
    ///
    /// Each slot must be freed at most once per allocation. Violating that puts a slot on the
    /// free list twice, which is a logic error but never memory-unsafe.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range or if no slot is currently allocated.
    pub fn free(&self, slot: u32) {
        assert!(
            (slot as usize) < self.heap.len(),
            "slot {} out of range for arena of {}",
            slot,
            self.heap.len()
        );
        let index = self
            .counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .expect("freed a slot while none were allocated");
        self.heap[index - 1].store(slot, Ordering::Release);
    }

    /// Marks every slot as free again.
    pub fn reset(&mut self) {
        for (i, entry) in self.heap.iter_mut().enumerate() {
            *entry.get_mut() = i as u32;
        }
        *self.counter.get_mut() = 0;
    }

    /// Resolves a slot index to its element.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    #[inline]
    pub fn get(&self, slot: u32) -> &T {
        &self.data[slot as usize]
    }

    /// All slots, allocated or not.
    pub fn slots(&self) -> &[T] {
        &self.data
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.heap.len()
    }

    /// Number of slots currently handed out.
    pub fn allocated(&self) -> usize {
        self.counter.load(Ordering::Acquire)
    }

    /// Number of slots still on the free list.
    pub fn free_count(&self) -> usize {
        self.capacity() - self.allocated()
    }

    /// Copies out the counter and the free-list stack.
    pub fn snapshot(&self) -> HeapSnapshot {
        HeapSnapshot {
            counter: self.allocated(),
            heap: self.heap.iter().map(|e| e.load(Ordering::Acquire)).collect(),
        }
    }
}
