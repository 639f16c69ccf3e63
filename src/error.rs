use std::io;

/// Error type for Cuckoo Filter insert operations
///
/// None of these are fatal: the filter is left exactly as it was before the
/// failed call and stays fully usable.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// Returned when the key is empty
    #[error("Cannot insert an empty key.")]
    EmptyKey,
    /// Returned when the load factor has reached the admission ceiling for the bucket size
    #[error("Load factor {load_factor:.4} is at or above the admission ceiling.")]
    LoadCeiling { load_factor: f64 },
    /// Returned when the kick chain ran out of relocation attempts
    #[error("Not enough space to store this item.")]
    NotEnoughSpace,
}

/// Error returned when a persisted filter cannot be decoded
///
/// No partial filter is ever produced alongside one of these.
#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("Input is truncated or has trailing bytes.")]
    InvalidLength,
    #[error("Input does not start with a cuckoo filter header.")]
    InvalidHeader,
    #[error("Unsupported format version {0}.")]
    UnsupportedVersion(u8),
    #[error("Invalid bucket size {0}.")]
    InvalidBucketSize(u64),
    #[error("Invalid bucket count {0}, must be a non-zero power of two.")]
    InvalidTotalBuckets(u64),
    #[error("Occupancy bitmap of bucket {bucket} marks slots past the bucket size.")]
    InvalidOccupancy { bucket: usize },
    #[error("I/O error while reading filter: {0}")]
    Io(#[from] io::Error),
}

impl PartialEq for DeserializeError {
    fn eq(&self, other: &Self) -> bool {
        use DeserializeError::*;
        match (self, other) {
            (InvalidLength, InvalidLength) | (InvalidHeader, InvalidHeader) => true,
            (UnsupportedVersion(a), UnsupportedVersion(b)) => a == b,
            (InvalidBucketSize(a), InvalidBucketSize(b)) => a == b,
            (InvalidTotalBuckets(a), InvalidTotalBuckets(b)) => a == b,
            (InvalidOccupancy { bucket: a }, InvalidOccupancy { bucket: b }) => a == b,
            (Io(a), Io(b)) => a.kind() == b.kind(),
            _ => false,
        }
    }
}
