use crate::error::{Error, Result};
use std::fmt;
use std::hash::BuildHasher;
use std::str::FromStr;
use std::sync::Arc;

/// Where a table lives and how its batches are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Device {
    /// Sequential execution on the calling thread.
    #[default]
    Host,
    /// Every element of a batch is processed by its own task on a dedicated worker pool.
    ///
    /// `workers == 0` sizes the pool to the number of CPUs.
    Accelerator {
        /// Number of worker threads.
        workers: usize,
    },
}

impl Device {
    /// An accelerator device with one worker per CPU.
    pub const fn accelerator() -> Self {
        Device::Accelerator { workers: 0 }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Device::Host)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Device::Host => f.write_str("host"),
            Device::Accelerator { workers: 0 } => f.write_str("accelerator"),
            Device::Accelerator { workers } => write!(f, "accelerator:{}", workers),
        }
    }
}

/// Parses `host`, `cpu`, `cpu:N`, `accelerator`, `accelerator:N`, `gpu` and `gpu:N`
/// (case-insensitive). For host devices the ordinal is accepted and ignored; for accelerator
/// devices it is the worker count.
impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let (kind, ordinal) = match lower.split_once(':') {
            Some((kind, n)) => {
                let n = n
                    .parse::<usize>()
                    .map_err(|_| Error::InvalidDevice(s.to_owned()))?;
                (kind, Some(n))
            }
            None => (lower.as_str(), None),
        };
        match kind {
            "host" | "cpu" => Ok(Device::Host),
            "accelerator" | "gpu" => Ok(Device::Accelerator {
                workers: ordinal.unwrap_or(0),
            }),
            _ => Err(Error::InvalidDevice(s.to_owned())),
        }
    }
}

/// Hashing and equality over raw key bytes.
///
/// Any `Fn(&[u8]) -> u64` is a `KeyHasher` that compares keys byte by byte.
pub trait KeyHasher: Send + Sync {
    fn hash_key(&self, key: &[u8]) -> u64;

    /// Whether two keys are the same key. Keys that are equal must hash equally.
    fn key_eq(&self, a: &[u8], b: &[u8]) -> bool {
        a == b
    }
}

impl<F> KeyHasher for F
where
    F: Fn(&[u8]) -> u64 + Send + Sync,
{
    fn hash_key(&self, key: &[u8]) -> u64 {
        self(key)
    }
}

/// The hasher used when none is configured, backed by [`ahash`].
#[derive(Clone, Default)]
pub struct DefaultKeyHasher(ahash::RandomState);

impl DefaultKeyHasher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for DefaultKeyHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DefaultKeyHasher")
    }
}

impl KeyHasher for DefaultKeyHasher {
    fn hash_key(&self, key: &[u8]) -> u64 {
        BuildHasher::hash_one(&self.0, key)
    }
}

/// Immutable description of a table: capacity, record layout, device and hashing.
#[derive(Clone)]
pub struct HashmapConfig {
    pub(crate) max_keys: usize,
    pub(crate) key_size: usize,
    pub(crate) value_size: usize,
    pub(crate) device: Device,
    pub(crate) buckets: Option<usize>,
    pub(crate) hasher: Arc<dyn KeyHasher>,
}

impl fmt::Debug for HashmapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashmapConfig")
            .field("max_keys", &self.max_keys)
            .field("key_size", &self.key_size)
            .field("value_size", &self.value_size)
            .field("device", &self.device)
            .field("buckets", &self.buckets)
            .finish_non_exhaustive()
    }
}

impl HashmapConfig {
    /// A host table holding up to `max_keys` records of `key_size` + `value_size` bytes,
    /// hashed with [`DefaultKeyHasher`].
    ///
    /// A `value_size` of zero is allowed and turns the table into a set.
    pub fn new(max_keys: usize, key_size: usize, value_size: usize) -> Self {
        Self {
            max_keys,
            key_size,
            value_size,
            device: Device::Host,
            buckets: None,
            hasher: Arc::new(DefaultKeyHasher::new()),
        }
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Use `hasher` for hashing and comparing keys.
    pub fn hasher<H>(mut self, hasher: H) -> Self
    where
        H: KeyHasher + 'static,
    {
        self.hasher = Arc::new(hasher);
        self
    }

    /// Sets the initial bucket count. By default it is derived from `max_keys`.
    pub fn buckets(mut self, buckets: usize) -> Self {
        self.buckets = Some(buckets);
        self
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn value_size(&self) -> usize {
        self.value_size
    }

    pub fn target_device(&self) -> Device {
        self.device
    }

    pub(crate) fn key_hasher(&self) -> &Arc<dyn KeyHasher> {
        &self.hasher
    }

    /// The bucket count a new table starts with.
    pub fn bucket_count(&self) -> usize {
        self.buckets.unwrap_or_else(|| {
            // aim for half-full inline slabs
            let per_bucket = (crate::node::SLAB_WIDTH / 2).max(1);
            ((self.max_keys + per_bucket - 1) / per_bucket).max(1)
        })
    }

    /// Checks everything that would make construction impossible.
    pub fn validate(&self) -> Result<()> {
        if self.max_keys == 0 {
            return Err(Error::ZeroCapacity);
        }
        if self.max_keys > crate::arena::MAX_CAPACITY {
            return Err(Error::CapacityTooLarge(self.max_keys));
        }
        if self.key_size == 0 {
            return Err(Error::ZeroKeySize);
        }
        if self.buckets == Some(0) {
            return Err(Error::ZeroBuckets);
        }
        Ok(())
    }

    /// A serializable description of this configuration. The hasher is not included.
    pub fn options(&self) -> HashmapOptions {
        HashmapOptions {
            max_keys: self.max_keys,
            key_size: self.key_size,
            value_size: self.value_size,
            device: self.device,
            buckets: self.buckets,
        }
    }
}

/// The plain-data part of a [`HashmapConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HashmapOptions {
    pub max_keys: usize,
    pub key_size: usize,
    pub value_size: usize,
    #[cfg_attr(feature = "serde", serde(default))]
    pub device: Device,
    #[cfg_attr(feature = "serde", serde(default))]
    pub buckets: Option<usize>,
}

impl From<HashmapOptions> for HashmapConfig {
    fn from(options: HashmapOptions) -> Self {
        let config = HashmapConfig::new(options.max_keys, options.key_size, options.value_size)
            .device(options.device);
        match options.buckets {
            Some(buckets) => config.buckets(buckets),
            None => config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_devices() {
        assert_eq!("host".parse::<Device>(), Ok(Device::Host));
        assert_eq!("CPU:0".parse::<Device>(), Ok(Device::Host));
        assert_eq!("accelerator".parse::<Device>(), Ok(Device::accelerator()));
        assert_eq!(
            "gpu:4".parse::<Device>(),
            Ok(Device::Accelerator { workers: 4 })
        );
        assert!(matches!(
            "tpu:1".parse::<Device>(),
            Err(Error::InvalidDevice(_))
        ));
        assert!(matches!(
            "gpu:x".parse::<Device>(),
            Err(Error::InvalidDevice(_))
        ));
    }

    #[test]
    fn device_display_parses_back() {
        for device in [
            Device::Host,
            Device::accelerator(),
            Device::Accelerator { workers: 3 },
        ] {
            assert_eq!(device.to_string().parse::<Device>(), Ok(device));
        }
    }

    #[test]
    fn validation() {
        assert_eq!(HashmapConfig::new(0, 4, 4).validate(), Err(Error::ZeroCapacity));
        assert_eq!(HashmapConfig::new(4, 0, 4).validate(), Err(Error::ZeroKeySize));
        assert_eq!(
            HashmapConfig::new(4, 4, 4).buckets(0).validate(),
            Err(Error::ZeroBuckets)
        );
        assert_eq!(HashmapConfig::new(4, 4, 0).validate(), Ok(()));
    }

    #[test]
    fn default_bucket_count() {
        assert_eq!(HashmapConfig::new(1, 4, 4).bucket_count(), 1);
        let per_bucket = crate::node::SLAB_WIDTH / 2;
        assert_eq!(
            HashmapConfig::new(per_bucket * 10, 4, 4).bucket_count(),
            10
        );
        assert_eq!(HashmapConfig::new(100, 4, 4).buckets(7).bucket_count(), 7);
    }

    #[test]
    fn closures_are_hashers() {
        let config = HashmapConfig::new(4, 4, 4).hasher(|_: &[u8]| 7u64);
        assert_eq!(config.key_hasher().hash_key(b"abcd"), 7);
        assert!(config.key_hasher().key_eq(b"abcd", b"abcd"));
        assert!(!config.key_hasher().key_eq(b"abcd", b"abce"));
    }

    #[test]
    fn default_hasher_is_deterministic_per_instance() {
        let hasher = DefaultKeyHasher::new();
        assert_eq!(hasher.hash_key(b"key"), hasher.hash_key(b"key"));
    }
}
