//! A fixed-capacity hash table over byte records, with batch operations that run either on the
//! calling thread or on a pool of parallel workers.
//!
//! Keys and values are opaque byte strings of a size fixed at construction. Every operation
//! takes a whole batch of records as a flat buffer and reports, per element, whether it
//! succeeded. The table is sized once, for a maximum number of keys, and only changes shape
//! when it is explicitly [rehashed](Hashmap::rehash).
//!
//! # Devices
//!
//! A [`Hashmap`] runs on the [`Device`] named in its [`HashmapConfig`]:
//!
//!  - [`Device::Host`] executes batches sequentially, on top of a conventional hash index. It
//!    is the reference behavior and has no capacity ceiling beyond memory.
//!  - [`Device::Accelerator`] hands every element of a batch to its own task on a worker pool
//!    owned by the table. Records live in a fixed arena, so an accelerator table never holds
//!    more than `max_keys` records; elements that find no room report
//!    [`InsertStatus::CapacityExhausted`].
//!
//! Both devices give the same answers for the same sequence of batches, except for which
//! slots records end up in.
//!
//! # Handles
//!
//! [`insert`](Hashmap::insert) and [`find`](Hashmap::find) return a [`Handle`] for each
//! element, which [`unpack`](Hashmap::unpack) and [`assign`](Hashmap::assign) resolve back to
//! the record. Handles are cheap to copy and never dangle: a handle whose record was erased,
//! that was produced before a rehash, or that came from a different table simply fails to
//! resolve and is reported as such in the returned mask.
//!
//! # Concurrency
//!
//! On the accelerator, the workers of one batch coordinate only through atomic operations: a
//! lock-free [arena](arena::Arena) hands out record slots, and buckets are claimed by
//! compare-and-swap. Operations that modify the table take `&mut self`, and lookups take
//! `&self`, so a rehash can never overlap another operation.
//!
//! # Hashing
//!
//! Keys are hashed with [`DefaultKeyHasher`] unless another [`KeyHasher`] is configured. Any
//! `Fn(&[u8]) -> u64` can be used as a hasher, and implementing the trait directly allows a
//! custom notion of key equality.
//!
//! # Logging
//!
//! The crate emits [`tracing`] events: table construction and rehashes at `debug` level, each
//! batch at `trace` level, and batches that ran out of capacity at `warn` level. Installing a
//! subscriber is left to the application.
//!
//! # Examples
//!
//! ```
//! use slabhash::{Device, Hashmap, HashmapConfig};
//!
//! let config = HashmapConfig::new(1024, 8, 4).device(Device::accelerator());
//! let mut map = Hashmap::new(config).unwrap();
//!
//! let keys: Vec<u8> = (0u64..100).flat_map(u64::to_le_bytes).collect();
//! let values: Vec<u8> = (0u32..100).flat_map(u32::to_le_bytes).collect();
//! let inserted = map.insert(&keys, &values).unwrap();
//! assert!(inserted.mask().iter().all(|&m| m));
//! assert_eq!(map.len(), 100);
//!
//! // double every value in place
//! let mut stored = vec![0u8; values.len()];
//! map.unpack(&inserted.handles, None, None, Some(&mut stored[..])).unwrap();
//! let doubled: Vec<u8> = stored
//!     .chunks_exact(4)
//!     .flat_map(|v| (u32::from_le_bytes([v[0], v[1], v[2], v[3]]) * 2).to_le_bytes())
//!     .collect();
//! map.assign(&inserted.handles, None, &doubled).unwrap();
//!
//! let erased = map.erase(&keys[..8]).unwrap();
//! assert_eq!(erased, vec![true]);
//! assert_eq!(map.len(), 99);
//! ```
#![deny(missing_debug_implementations, rust_2018_idioms)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod arena;
mod config;
mod error;
mod handle;
mod host;
mod map;
mod node;
mod raw;
mod slab;

#[cfg(feature = "serde")]
mod serde_impls;

pub use config::{DefaultKeyHasher, Device, HashmapConfig, HashmapOptions, KeyHasher};
pub use error::{Error, Result};
pub use handle::{Batch, Handle, InsertStatus};
pub use host::HostHashmap;
pub use map::Hashmap;
pub use slab::SlabHashmap;
