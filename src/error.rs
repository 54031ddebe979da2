use thiserror::Error;

/// Errors that reject a whole call.
///
/// Per-element outcomes (duplicate keys, misses, exhausted capacity, stale handles) are never
/// reported through this type; they are returned in the masks of each batch operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The table was configured to hold no keys.
    #[error("hash table capacity must be non-zero")]
    ZeroCapacity,

    /// Keys must be at least one byte long.
    #[error("key size must be non-zero")]
    ZeroKeySize,

    /// Slot indices are 32 bits wide.
    #[error("capacity {0} exceeds the maximum of {max}", max = crate::arena::MAX_CAPACITY)]
    CapacityTooLarge(usize),

    /// A table needs at least one bucket.
    #[error("bucket count must be non-zero")]
    ZeroBuckets,

    /// The device string could not be parsed.
    #[error("invalid device {0:?}")]
    InvalidDevice(String),

    /// The worker pool of an accelerator device could not be started.
    #[error("failed to start accelerator workers: {0}")]
    WorkerPool(String),

    /// A flat buffer does not hold a whole number of records, or buffers of one batch disagree
    /// on the element count.
    #[error("{buffer} buffer holds {len} bytes, expected {expected}")]
    BufferLength {
        /// Which argument was malformed.
        buffer: &'static str,
        /// Actual byte length.
        len: usize,
        /// Byte length implied by the batch.
        expected: usize,
    },
}

/// Result type for fallible hash table calls.
pub type Result<T> = std::result::Result<T, Error>;
