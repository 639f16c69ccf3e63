use crate::bucket::{Buckets, IndexChooser, MAX_BUCKET_SIZE, RandomChooser};
use crate::error::Error;
use crate::fingerprint::{
    FINGERPRINT_BYTES, Fingerprint, alternate_index, fingerprint_from_digest, fingerprint_hash,
    fingerprint_size_in_bytes, pad_key, primary_index,
};
use crate::hash::{Murmur3Hasher, hash_bytes};
use derive_builder::Builder;
use parking_lot::{RwLock, RwLockReadGuard};
use std::fmt;
use std::hash::Hasher;
use std::marker::PhantomData;
use tracing::{debug, trace};

/// Admission ceiling for a bucket size.
///
/// Inserts are refused once the load factor reaches this value; past it kick
/// chains get long and mostly fail. The thresholds are empirical.
pub fn load_ceiling(bucket_size: usize) -> f64 {
    if bucket_size < 8 {
        0.955
    } else if bucket_size < 16 {
        0.985
    } else {
        0.994
    }
}

/// Candidate slots of a key: its fingerprint and both bucket indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    fingerprint: Fingerprint,
    primary: usize,
    alternate: usize,
}

/// Mutable state of a filter, guarded by a single lock
pub(crate) struct Table {
    pub(crate) buckets: Buckets,
    pub(crate) count: usize,
    pub(crate) max_kicks: usize,
    chooser: Box<dyn IndexChooser>,
}

impl Default for Table {
    fn default() -> Self {
        Self::new(Buckets::default(), 0, 0)
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("total_buckets", &self.buckets.total_buckets())
            .field("bucket_size", &self.buckets.bucket_size())
            .field("count", &self.count)
            .field("max_kicks", &self.max_kicks)
            .finish_non_exhaustive()
    }
}

impl Table {
    pub(crate) fn new(buckets: Buckets, count: usize, max_kicks: usize) -> Self {
        Self {
            buckets,
            count,
            max_kicks,
            chooser: Box::new(RandomChooser::default()),
        }
    }

    fn locate<H: Hasher + Default>(&self, key: &[u8]) -> Location {
        let key = pad_key(key);
        let total_buckets = self.buckets.total_buckets();
        let digest = hash_bytes::<H>(key.as_ref());
        let fingerprint = fingerprint_from_digest(digest);
        let primary = primary_index(digest, total_buckets);
        let alternate = alternate_index(
            primary,
            fingerprint_hash::<H>(fingerprint),
            total_buckets,
        );
        Location {
            fingerprint,
            primary,
            alternate,
        }
    }

    pub(crate) fn load_factor(&self) -> f64 {
        let slots = self.buckets.total_buckets() * self.buckets.bucket_size();
        if slots == 0 {
            return 0.0;
        }
        self.count as f64 / slots as f64
    }

    fn insert<H: Hasher + Default>(&mut self, key: &[u8]) -> Result<(), Error> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let load_factor = self.load_factor();
        if load_factor >= load_ceiling(self.buckets.bucket_size()) {
            trace!(load_factor, "insert refused by admission ceiling");
            return Err(Error::LoadCeiling { load_factor });
        }
        let location = self.locate::<H>(key);
        if self.buckets.get_mut(location.primary).try_add(location.fingerprint)
            || self.buckets.get_mut(location.alternate).try_add(location.fingerprint)
            || self.insert_with_kicks::<H>(location)
        {
            self.count += 1;
            Ok(())
        } else {
            Err(Error::NotEnoughSpace)
        }
    }

    /// Make room for a fingerprint whose two buckets are both full.
    ///
    /// Starting from one of the two buckets picked at random, a random
    /// resident is swapped out for the fingerprint being placed and moved to
    /// its own alternate bucket, until some bucket has a free slot or
    /// `max_kicks` swaps were made. Every swap is recorded so that a failed
    /// chain can be undone in reverse, leaving the buckets exactly as they
    /// were before the call.
    fn insert_with_kicks<H: Hasher + Default>(&mut self, location: Location) -> bool {
        let total_buckets = self.buckets.total_buckets();
        let candidates = [location.primary, location.alternate];
        let mut index = candidates[self.chooser.choose(candidates.len()) % candidates.len()];
        let mut fingerprint = location.fingerprint;
        let mut evictions = Vec::with_capacity(self.max_kicks.min(32));

        for _ in 0..self.max_kicks {
            let (slot, evicted) = self
                .buckets
                .get_mut(index)
                .swap_random(fingerprint, self.chooser.as_mut());
            evictions.push((index, slot, evicted));
            index = alternate_index(index, fingerprint_hash::<H>(evicted), total_buckets);
            fingerprint = evicted;
            if self.buckets.get_mut(index).try_add(fingerprint) {
                return true;
            }
        }

        while let Some((index, slot, evicted)) = evictions.pop() {
            self.buckets.get_mut(index).restore(slot, evicted);
        }
        debug!(
            max_kicks = self.max_kicks,
            load_factor = self.load_factor(),
            "kick chain exhausted, displaced fingerprints restored"
        );
        false
    }

    fn insert_unique<H: Hasher + Default>(&mut self, key: &[u8]) -> Result<bool, Error> {
        if self.contains::<H>(key) {
            return Ok(false);
        }
        self.insert::<H>(key).map(|_| true)
    }

    fn contains<H: Hasher + Default>(&self, key: &[u8]) -> bool {
        if key.is_empty() {
            return false;
        }
        let location = self.locate::<H>(key);
        self.buckets.get(location.primary).contains(location.fingerprint)
            || self.buckets.get(location.alternate).contains(location.fingerprint)
    }

    fn count_of<H: Hasher + Default>(&self, key: &[u8]) -> usize {
        if key.is_empty() {
            return 0;
        }
        let location = self.locate::<H>(key);
        let primary = self.buckets.get(location.primary).count(location.fingerprint);
        if location.alternate == location.primary {
            return primary;
        }
        primary + self.buckets.get(location.alternate).count(location.fingerprint)
    }

    fn remove<H: Hasher + Default>(&mut self, key: &[u8]) -> bool {
        if key.is_empty() {
            return false;
        }
        let location = self.locate::<H>(key);
        let removed = self.buckets.get_mut(location.primary).try_remove(location.fingerprint)
            || self.buckets.get_mut(location.alternate).try_remove(location.fingerprint);
        if removed {
            self.count = self.count.saturating_sub(1);
        }
        removed
    }

    fn clear(&mut self) {
        self.buckets.clear();
        self.count = 0;
    }
}

/// A cuckoo filter over byte keys, shared between threads behind a
/// reader-writer lock.
///
/// ## What Makes It "Cuckoo"
///
/// Each key is reduced to a 16-bit fingerprint that may live in one of two
/// buckets. When both are full, a resident fingerprint is evicted (like a
/// cuckoo chick pushing out an egg) and moved to its own alternate bucket,
/// possibly displacing another one in turn. The alternate bucket is computed
/// from the fingerprint alone, so the original key is never needed again.
///
/// ## Guarantees
///
/// - **No false negatives**: a key whose insert succeeded is found by
///   [`contains`](Self::contains) until it is removed. A failed insert
///   restores every fingerprint it displaced, unlike the classic algorithm,
///   which leaves the last evicted fingerprint homeless.
/// - **Bounded false positives**: an absent key is reported present only
///   when an unrelated key has the same fingerprint in one of its buckets.
/// - **Deletions**: [`remove`](Self::remove) clears one matching fingerprint.
///   Removing a key that was never inserted may remove a colliding key.
///
/// ## Concurrency Model
///
/// The bucket array and item count sit behind one [`parking_lot::RwLock`]:
///
/// - **Reads** (`contains`, `count`, `len`, `load_factor`, encoding) take the
///   lock in shared mode and run in parallel.
/// - **Writes** (`insert`, `insert_unique`, `remove`, `clear`) take it
///   exclusively for the whole operation, including any kick chain.
/// - **Unlocked variants** (`*_unlocked`) take `&mut self` and skip the lock
///   entirely, for callers that already own the filter exclusively.
///
/// ## Time Complexity
///
/// - **Lookup**: O(1), at most two buckets
/// - **Deletion**: O(1)
/// - **Insertion**: amortized O(1), at most `max_kicks` relocations
#[derive(Debug, Builder)]
#[builder(
    pattern = "owned",
    build_fn(private, name = "base_build", validate = "Self::validate")
)]
pub struct CuckooFilter<H = Murmur3Hasher>
where
    H: Hasher + Default,
{
    // Configuration parameters
    /// Expected number of elements, used to derive the bucket count
    #[builder(default = "1048576")]
    capacity: usize,

    /// Explicit number of buckets (must be a power of 2), overriding `capacity`
    #[builder(default, setter(strip_option))]
    total_buckets: Option<usize>,

    /// Number of fingerprints per bucket
    #[builder(default = "4")]
    bucket_size: usize,

    /// Maximum number of relocations to try before giving up
    #[builder(default = "500")]
    max_kicks: usize,

    /// Target false positive rate in percent
    #[builder(default = "3.0")]
    false_positive_rate: f64,

    // Internal values - automatically derived from the configuration
    /// Number of buckets in the filter (power of 2)
    #[builder(setter(skip))]
    num_buckets: usize,

    /// Buckets, item counter and eviction randomness
    #[builder(setter(skip))]
    table: RwLock<Table>,

    /// Phantom data for the hasher type
    #[builder(setter(skip))]
    _hasher: PhantomData<H>,
}

impl<H: Hasher + Default> CuckooFilter<H> {
    /// Insert a key into the filter
    ///
    /// Inserting the same key twice stores two fingerprints; use
    /// [`insert_unique`](Self::insert_unique) to avoid duplicates.
    ///
    /// Returns `Ok(())` if the key was stored, or the reason it was not:
    /// - [`Error::EmptyKey`] for an empty key
    /// - [`Error::LoadCeiling`] when the filter is too full to try
    /// - [`Error::NotEnoughSpace`] when `max_kicks` relocations did not free a slot
    pub fn insert<K: ?Sized + AsRef<[u8]>>(&self, key: &K) -> Result<(), Error> {
        self.table.write().insert::<H>(key.as_ref())
    }

    /// Insert a key unless it is already present, as a single locked operation
    ///
    /// Returns `Ok(true)` if the key was inserted, `Ok(false)` if it (or a
    /// colliding key) was already present, or the insert error otherwise.
    pub fn insert_unique<K: ?Sized + AsRef<[u8]>>(&self, key: &K) -> Result<bool, Error> {
        self.table.write().insert_unique::<H>(key.as_ref())
    }

    /// Check if a key is in the filter
    ///
    /// Returns `true` if the key is possibly in the filter (may have false positives),
    /// `false` if it is definitely not in the filter
    pub fn contains<K: ?Sized + AsRef<[u8]>>(&self, key: &K) -> bool {
        self.table.read().contains::<H>(key.as_ref())
    }

    /// Counts the fingerprints matching a key in its two buckets.
    ///
    /// This is not a counting filter: duplicates inserted with
    /// [`insert`](Self::insert) are counted, and so are colliding keys.
    pub fn count<K: ?Sized + AsRef<[u8]>>(&self, key: &K) -> usize {
        self.table.read().count_of::<H>(key.as_ref())
    }

    /// Remove one fingerprint matching the key.
    ///
    /// Returns `true` if a fingerprint was removed, `false` if none was found.
    ///
    /// Note: only remove keys that were inserted. Removing an absent key may
    /// remove a different key with the same fingerprint.
    pub fn remove<K: ?Sized + AsRef<[u8]>>(&self, key: &K) -> bool {
        self.table.write().remove::<H>(key.as_ref())
    }

    /// [`insert`](Self::insert) without taking the lock
    pub fn insert_unlocked<K: ?Sized + AsRef<[u8]>>(&mut self, key: &K) -> Result<(), Error> {
        self.table.get_mut().insert::<H>(key.as_ref())
    }

    /// [`insert_unique`](Self::insert_unique) without taking the lock
    pub fn insert_unique_unlocked<K: ?Sized + AsRef<[u8]>>(
        &mut self,
        key: &K,
    ) -> Result<bool, Error> {
        self.table.get_mut().insert_unique::<H>(key.as_ref())
    }

    /// [`contains`](Self::contains) without taking the lock
    pub fn contains_unlocked<K: ?Sized + AsRef<[u8]>>(&mut self, key: &K) -> bool {
        self.table.get_mut().contains::<H>(key.as_ref())
    }

    /// [`remove`](Self::remove) without taking the lock
    pub fn remove_unlocked<K: ?Sized + AsRef<[u8]>>(&mut self, key: &K) -> bool {
        self.table.get_mut().remove::<H>(key.as_ref())
    }

    /// Number of fingerprints stored in the filter
    pub fn len(&self) -> usize {
        self.table.read().count
    }

    /// Check if the filter is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of slots (`total_buckets * bucket_size`)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fraction of slots currently occupied
    pub fn load_factor(&self) -> f64 {
        self.table.read().load_factor()
    }

    /// Load factor at which inserts start being refused
    pub fn load_ceiling(&self) -> f64 {
        load_ceiling(self.bucket_size)
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    pub fn total_buckets(&self) -> usize {
        self.num_buckets
    }

    pub fn max_kicks(&self) -> usize {
        self.max_kicks
    }

    /// Target false positive rate in percent, as configured at build time
    ///
    /// The rate is not part of the persisted layout, so a filter rebuilt with
    /// [`from_bytes`](Self::from_bytes) or serde reports the default of 3.0.
    pub fn false_positive_rate(&self) -> f64 {
        self.false_positive_rate
    }

    /// Probability that a lookup of an absent key reports it present at the
    /// current load, as a fraction
    ///
    /// A lookup probes `2 * bucket_size` slots, of which `load_factor` are
    /// occupied on average; each matches with probability `2^-16`.
    pub fn estimated_false_positive_rate(&self) -> f64 {
        let probed = 2.0 * self.bucket_size as f64 * self.load_factor();
        1.0 - (1.0 - 1.0 / (1u64 << Fingerprint::BITS) as f64).powf(probed)
    }

    /// Clear the filter, removing all elements
    pub fn clear(&self) {
        self.table.write().clear();
    }

    /// Replace the source of randomness used by kick chains
    pub fn with_chooser(mut self, chooser: impl IndexChooser + 'static) -> Self {
        self.table.get_mut().chooser = Box::new(chooser);
        self
    }

    pub(crate) fn read_table(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read()
    }

    /// Assemble a filter around a decoded table
    pub(crate) fn from_table(table: Table) -> Self {
        let bucket_size = table.buckets.bucket_size();
        let num_buckets = table.buckets.total_buckets();
        Self {
            capacity: num_buckets * bucket_size,
            total_buckets: Some(num_buckets),
            bucket_size,
            max_kicks: table.max_kicks,
            false_positive_rate: DEFAULT_FALSE_POSITIVE_RATE,
            num_buckets,
            table: RwLock::new(table),
            _hasher: PhantomData,
        }
    }
}

const DEFAULT_FALSE_POSITIVE_RATE: f64 = 3.0;

impl CuckooFilter<Murmur3Hasher> {
    /// Create a new CuckooFilterBuilder with default settings
    pub fn builder() -> CuckooFilterBuilder<Murmur3Hasher> {
        CuckooFilterBuilder::default()
    }

    /// Create a new CuckooFilter with default settings
    pub fn new() -> CuckooFilter<Murmur3Hasher> {
        Self::builder()
            .build()
            .expect("default configuration is valid")
    }

    /// Create a new CuckooFilter with the specified capacity
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> CuckooFilter<Murmur3Hasher> {
        Self::builder()
            .capacity(capacity)
            .build()
            .expect("capacity must be greater than zero")
    }
}

impl Default for CuckooFilter<Murmur3Hasher> {
    /// Create a new CuckooFilter with default settings
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Hasher + Default> CuckooFilterBuilder<H> {
    /// Validate the builder configuration
    fn validate(&self) -> Result<(), String> {
        if let Some(bucket_size) = self.bucket_size
            && !(1..=MAX_BUCKET_SIZE).contains(&bucket_size)
        {
            return Err(format!(
                "bucket_size must be between 1 and {MAX_BUCKET_SIZE}"
            ));
        }
        if self.capacity == Some(0) {
            return Err("capacity must be greater than zero".into());
        }
        if let Some(Some(total_buckets)) = self.total_buckets
            && !total_buckets.is_power_of_two()
        {
            return Err("total_buckets must be a non-zero power of two".into());
        }
        if let Some(rate) = self.false_positive_rate {
            if !(rate > 0.0 && rate <= 100.0) {
                return Err("false_positive_rate must be in (0, 100]".into());
            }
            let bucket_size = self.bucket_size.unwrap_or(4);
            if fingerprint_size_in_bytes(rate, bucket_size) > FINGERPRINT_BYTES {
                return Err(format!(
                    "false_positive_rate {rate} needs more than {FINGERPRINT_BYTES} fingerprint bytes"
                ));
            }
        }
        Ok(())
    }

    /// Build a CuckooFilter with the specified configuration
    pub fn build(self) -> Result<CuckooFilter<H>, CuckooFilterBuilderError> {
        let mut filter = self.base_build()?;
        // Either the explicit bucket count or enough power-of-2 buckets for the capacity
        filter.num_buckets = filter.total_buckets.unwrap_or_else(|| {
            filter
                .capacity
                .div_ceil(filter.bucket_size)
                .next_power_of_two()
        });
        filter.total_buckets = Some(filter.num_buckets);
        // Adjust the capacity to match the actual number of slots
        filter.capacity = filter.num_buckets * filter.bucket_size;
        filter.table = RwLock::new(Table::new(
            Buckets::new(filter.num_buckets, filter.bucket_size),
            0,
            filter.max_kicks,
        ));
        debug!(
            total_buckets = filter.num_buckets,
            bucket_size = filter.bucket_size,
            max_kicks = filter.max_kicks,
            "cuckoo filter built"
        );
        Ok(filter)
    }
}
