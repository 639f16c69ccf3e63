// Reader-Writer Locked Cuckoo Filter
// A compact probabilistic data structure answering approximate set membership
// queries over byte keys, with insertion, lookup and deletion in fixed memory,
// shared between threads behind a single reader-writer lock.

//! # Cuckoo Filter
//!
//! ```
//! use sync_cuckoo_filter::CuckooFilter;
//!
//! let filter = CuckooFilter::builder()
//!     .capacity(1024)
//!     .bucket_size(4)
//!     .max_kicks(500)
//!     .build()
//!     .unwrap();
//!
//! filter.insert("apple").unwrap();
//! assert!(filter.contains("apple"));
//! assert!(filter.remove("apple"));
//! assert!(filter.is_empty());
//!
//! let restored: CuckooFilter = CuckooFilter::from_bytes(&filter.to_bytes()).unwrap();
//! assert_eq!(restored.total_buckets(), filter.total_buckets());
//! ```

mod bucket;
mod codec;
mod error;
mod filter;
mod fingerprint;
mod hash;

pub use bucket::{IndexChooser, MAX_BUCKET_SIZE, RandomChooser};
pub use error::{DeserializeError, Error};
pub use filter::{CuckooFilter, CuckooFilterBuilder, CuckooFilterBuilderError, load_ceiling};
pub use fingerprint::{
    FINGERPRINT_BYTES, Fingerprint, alternate_index, fingerprint_hash, fingerprint_of,
    fingerprint_size_in_bytes, primary_index,
};
pub use hash::{HASH_SEED, Murmur3Hasher, hash_bytes};
