use crate::config::{Device, HashmapConfig};
use crate::error::{Error, Result};
use crate::handle::{Batch, Handle, InsertStatus};
use crate::host::HostHashmap;
use crate::slab::SlabHashmap;
use std::fmt;

enum Backend {
    Host(HostHashmap),
    Accelerator(SlabHashmap),
}

/// A fixed-layout hash table over byte records, executed on the device it was configured for.
///
/// Every operation works on a batch. Keys and values are passed as flat buffers holding one
/// record after another, so a batch of `n` keys is a buffer of `n * key_size` bytes. Each
/// operation reports per element whether it succeeded; a batch is never all-or-nothing.
/// Only misuse of the call itself, such as a buffer whose length does not match the batch,
/// is reported as an [`Error`].
///
/// Operations that change the table take `&mut self`, so no lookup can ever observe a
/// half-finished insert, erase or rehash.
///
/// ```
/// use slabhash::{Hashmap, HashmapConfig, InsertStatus};
///
/// let mut map = Hashmap::new(HashmapConfig::new(16, 4, 2)).unwrap();
///
/// let keys = [1u32, 2, 1].map(u32::to_le_bytes).concat();
/// let values = b"aabbcc";
/// let inserted = map.insert(&keys, values).unwrap();
/// assert_eq!(
///     inserted.masks,
///     [InsertStatus::Inserted, InsertStatus::Inserted, InsertStatus::Duplicate]
/// );
///
/// let found = map.find(&2u32.to_le_bytes()).unwrap();
/// let mut value = [0u8; 2];
/// map.unpack(&found.handles, Some(&found.masks[..]), None, Some(&mut value[..]))
///     .unwrap();
/// assert_eq!(&value, b"bb");
/// ```
pub struct Hashmap {
    config: HashmapConfig,
    backend: Backend,
}

impl fmt::Debug for Hashmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.backend {
            Backend::Host(host) => fmt::Debug::fmt(host, f),
            Backend::Accelerator(slab) => fmt::Debug::fmt(slab, f),
        }
    }
}

/// Dispatches a call to whichever backend the table runs on.
macro_rules! dispatch {
    ($self:expr, $backend:ident => $call:expr) => {
        match $self {
            Backend::Host($backend) => $call,
            Backend::Accelerator($backend) => $call,
        }
    };
}

impl Hashmap {
    /// Creates an empty table for `config`.
    ///
    /// Fails if the configuration is unusable, or if the worker pool of an accelerator device
    /// cannot be started.
    pub fn new(config: HashmapConfig) -> Result<Self> {
        config.validate()?;
        let backend = match config.device {
            Device::Host => Backend::Host(HostHashmap::new(&config)?),
            Device::Accelerator { workers } => {
                Backend::Accelerator(SlabHashmap::new(&config, workers)?)
            }
        };
        Ok(Self { config, backend })
    }

    pub fn config(&self) -> &HashmapConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.config.device
    }

    /// The maximum number of records the table is sized for.
    ///
    /// The accelerator backend never stores more than this. The host backend uses it only to
    /// size its storage up front.
    pub fn capacity(&self) -> usize {
        self.config.max_keys
    }

    /// Returns the number of records in the table.
    pub fn len(&self) -> usize {
        dispatch!(&self.backend, b => b.len())
    }

    /// Returns `true` if the table holds no records.
    pub fn is_empty(&self) -> bool {
        dispatch!(&self.backend, b => b.is_empty())
    }

    pub fn bucket_count(&self) -> usize {
        dispatch!(&self.backend, b => b.bucket_count())
    }

    /// The host backend, if the table runs on the host.
    pub fn as_host(&self) -> Option<&HostHashmap> {
        match &self.backend {
            Backend::Host(host) => Some(host),
            Backend::Accelerator(_) => None,
        }
    }

    /// The accelerator backend, if the table runs on an accelerator.
    pub fn as_accelerator(&self) -> Option<&SlabHashmap> {
        match &self.backend {
            Backend::Host(_) => None,
            Backend::Accelerator(slab) => Some(slab),
        }
    }

    /// Inserts every key of `keys` that is not yet present, paired with the value at the same
    /// position in `values`.
    ///
    /// A key that is already stored, or that appears more than once in the batch, is inserted
    /// at most once; the other elements report [`InsertStatus::Duplicate`] and leave the stored
    /// value untouched. Elements that find no free slot report
    /// [`InsertStatus::CapacityExhausted`]. The returned handles refer to the inserted records.
    pub fn insert(&mut self, keys: &[u8], values: &[u8]) -> Result<Batch<InsertStatus>> {
        let n = count("keys", keys.len(), self.config.key_size)?;
        let keys = split("keys", keys, self.config.key_size, n)?;
        let values = split("values", values, self.config.value_size, n)?;
        Ok(dispatch!(&mut self.backend, b => b.insert(&keys, &values)))
    }

    /// Looks up every key of `keys`. The mask is `true` for keys that are present, and the
    /// handle of such a key refers to its record.
    pub fn find(&self, keys: &[u8]) -> Result<Batch<bool>> {
        let n = count("keys", keys.len(), self.config.key_size)?;
        let keys = split("keys", keys, self.config.key_size, n)?;
        Ok(dispatch!(&self.backend, b => b.find(&keys)))
    }

    /// Removes every key of `keys`. The mask is `true` for keys that were removed.
    ///
    /// Handles to removed records stop resolving.
    pub fn erase(&mut self, keys: &[u8]) -> Result<Vec<bool>> {
        let n = count("keys", keys.len(), self.config.key_size)?;
        let keys = split("keys", keys, self.config.key_size, n)?;
        Ok(dispatch!(&mut self.backend, b => b.erase(&keys)))
    }

    /// Copies the key and value of every record in `handles` into `keys` and `values`.
    ///
    /// Elements whose mask is `false` are skipped, as are handles that no longer resolve. The
    /// output records of skipped elements are left untouched, and the returned mask tells
    /// which elements were copied. Either output may be omitted.
    pub fn unpack(
        &self,
        handles: &[Handle],
        masks: Option<&[bool]>,
        keys: Option<&mut [u8]>,
        values: Option<&mut [u8]>,
    ) -> Result<Vec<bool>> {
        let n = handles.len();
        check_masks(masks, n)?;
        let keys = keys
            .map(|keys| split_mut("keys", keys, self.config.key_size, n))
            .transpose()?;
        let values = values
            .map(|values| split_mut("values", values, self.config.value_size, n))
            .transpose()?;
        Ok(dispatch!(&self.backend, b => b.unpack(handles, masks, keys, values)))
    }

    /// Overwrites the value of every record in `handles` with the matching record of `values`.
    ///
    /// Keys cannot be changed this way. Elements whose mask is `false` and handles that no
    /// longer resolve are skipped, and the returned mask tells which values were written. If a
    /// handle appears more than once, one of its values ends up stored.
    pub fn assign(
        &mut self,
        handles: &[Handle],
        masks: Option<&[bool]>,
        values: &[u8],
    ) -> Result<Vec<bool>> {
        let n = handles.len();
        check_masks(masks, n)?;
        let values = split("values", values, self.config.value_size, n)?;
        Ok(dispatch!(&mut self.backend, b => b.assign(handles, masks, &values)))
    }

    /// The number of records in each bucket.
    pub fn bucket_sizes(&self) -> Vec<usize> {
        dispatch!(&self.backend, b => b.bucket_sizes())
    }

    /// Records per bucket.
    pub fn load_factor(&self) -> f32 {
        dispatch!(&self.backend, b => b.load_factor())
    }

    /// Handles to every record in the table, in no particular order.
    pub fn handles(&self) -> Vec<Handle> {
        dispatch!(&self.backend, b => b.handles())
    }

    /// Redistributes the records over `buckets` buckets.
    ///
    /// All records are kept, but every handle obtained before the call stops resolving.
    pub fn rehash(&mut self, buckets: usize) -> Result<()> {
        dispatch!(&mut self.backend, b => b.rehash(buckets))
    }
}

fn count(buffer: &'static str, len: usize, size: usize) -> Result<usize> {
    debug_assert_ne!(size, 0);
    if len % size != 0 {
        return Err(Error::BufferLength {
            buffer,
            len,
            expected: len + (size - len % size),
        });
    }
    Ok(len / size)
}

fn check_masks(masks: Option<&[bool]>, n: usize) -> Result<()> {
    match masks {
        Some(masks) if masks.len() != n => Err(Error::BufferLength {
            buffer: "masks",
            len: masks.len(),
            expected: n,
        }),
        _ => Ok(()),
    }
}

/// Splits `bytes` into `n` records of `size` bytes each.
fn split<'b>(buffer: &'static str, bytes: &'b [u8], size: usize, n: usize) -> Result<Vec<&'b [u8]>> {
    if bytes.len() != n * size {
        return Err(Error::BufferLength {
            buffer,
            len: bytes.len(),
            expected: n * size,
        });
    }
    if size == 0 {
        return Ok(vec![&[][..]; n]);
    }
    Ok(bytes.chunks_exact(size).collect())
}

fn split_mut<'b>(
    buffer: &'static str,
    bytes: &'b mut [u8],
    size: usize,
    n: usize,
) -> Result<Vec<&'b mut [u8]>> {
    if bytes.len() != n * size {
        return Err(Error::BufferLength {
            buffer,
            len: bytes.len(),
            expected: n * size,
        });
    }
    if size == 0 {
        return Ok((0..n).map(|_| <&mut [u8]>::default()).collect());
    }
    Ok(bytes.chunks_exact_mut(size).collect())
}
