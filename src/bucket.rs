//! Bucket storage
//!
//! All buckets live in one flat arena: a slot array of `total_buckets *
//! bucket_size` fingerprints plus one occupancy bitmap per bucket. Bit `i` of
//! a bitmap is set when slot `i` of that bucket holds a fingerprint. Zero is a
//! legal fingerprint, so the bitmap is the only source of truth for occupancy.

use crate::fingerprint::Fingerprint;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Occupancy bitmap of a single bucket
pub(crate) type Occupancy = u16;

/// Largest supported bucket size, bounded by the bitmap width
pub const MAX_BUCKET_SIZE: usize = Occupancy::BITS as usize;

/// Source of the random choices made during a kick chain.
///
/// `choose(len)` should return a value in `0..len`; `len` is never zero.
/// Larger answers are reduced modulo `len`.
/// Replacing the default with a scripted implementation makes kick chains
/// reproducible.
pub trait IndexChooser: Send + Sync {
    fn choose(&mut self, len: usize) -> usize;
}

/// Default [`IndexChooser`] backed by a [`StdRng`]
#[derive(Debug, Clone)]
pub struct RandomChooser {
    rng: StdRng,
}

impl RandomChooser {
    /// Chooser with a fixed seed, for reproducible kick chains
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomChooser {
    fn default() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }
}

impl IndexChooser for RandomChooser {
    fn choose(&mut self, len: usize) -> usize {
        self.rng.random_range(0..len)
    }
}

/// Fixed-size arena of buckets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Buckets {
    bucket_size: usize,
    occupancy: Vec<Occupancy>,
    slots: Vec<Fingerprint>,
}

impl Buckets {
    pub(crate) fn new(total_buckets: usize, bucket_size: usize) -> Self {
        Self {
            bucket_size,
            occupancy: vec![0; total_buckets],
            slots: vec![0; total_buckets * bucket_size],
        }
    }

    /// Rebuild an arena from raw parts, as read back by the codec.
    ///
    /// Callers guarantee `slots.len() == occupancy.len() * bucket_size` and
    /// that no bitmap marks a slot at or past `bucket_size`.
    pub(crate) fn from_parts(
        bucket_size: usize,
        occupancy: Vec<Occupancy>,
        slots: Vec<Fingerprint>,
    ) -> Self {
        debug_assert_eq!(slots.len(), occupancy.len() * bucket_size);
        Self {
            bucket_size,
            occupancy,
            slots,
        }
    }

    pub(crate) fn total_buckets(&self) -> usize {
        self.occupancy.len()
    }

    pub(crate) fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    pub(crate) fn occupancy(&self) -> &[Occupancy] {
        &self.occupancy
    }

    pub(crate) fn slots(&self) -> &[Fingerprint] {
        &self.slots
    }

    pub(crate) fn get(&self, index: usize) -> Bucket<'_> {
        let start = index * self.bucket_size;
        Bucket {
            occupancy: self.occupancy[index],
            slots: &self.slots[start..start + self.bucket_size],
        }
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> BucketMut<'_> {
        let start = index * self.bucket_size;
        BucketMut {
            occupancy: &mut self.occupancy[index],
            slots: &mut self.slots[start..start + self.bucket_size],
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = Bucket<'_>> {
        self.occupancy
            .iter()
            .zip(self.slots.chunks_exact(self.bucket_size))
            .map(|(&occupancy, slots)| Bucket { occupancy, slots })
    }

    /// Total number of occupied slots across every bucket
    #[cfg(test)]
    pub(crate) fn occupied(&self) -> usize {
        self.occupancy
            .iter()
            .map(|bitmap| bitmap.count_ones() as usize)
            .sum()
    }

    pub(crate) fn clear(&mut self) {
        self.occupancy.fill(0);
        self.slots.fill(0);
    }
}

/// Read-only view of one bucket
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bucket<'a> {
    occupancy: Occupancy,
    slots: &'a [Fingerprint],
}

impl<'a> Bucket<'a> {
    pub(crate) fn occupancy(&self) -> Occupancy {
        self.occupancy
    }

    /// Raw slot values, including stale values of unoccupied slots
    pub(crate) fn slots(&self) -> &'a [Fingerprint] {
        self.slots
    }

    pub(crate) fn contains(&self, fingerprint: Fingerprint) -> bool {
        self.position(fingerprint).is_some()
    }

    /// Number of occupied slots holding `fingerprint`
    pub(crate) fn count(&self, fingerprint: Fingerprint) -> usize {
        self.fingerprints().filter(|&f| f == fingerprint).count()
    }

    /// Occupied fingerprints in slot order
    pub(crate) fn fingerprints(&self) -> impl Iterator<Item = Fingerprint> + 'a {
        let occupancy = self.occupancy;
        self.slots
            .iter()
            .enumerate()
            .filter(move |(slot, _)| occupancy >> slot & 1 == 1)
            .map(|(_, &fingerprint)| fingerprint)
    }

    fn position(&self, fingerprint: Fingerprint) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .position(|(slot, &f)| self.occupancy >> slot & 1 == 1 && f == fingerprint)
    }
}

/// Mutable view of one bucket
#[derive(Debug)]
pub(crate) struct BucketMut<'a> {
    occupancy: &'a mut Occupancy,
    slots: &'a mut [Fingerprint],
}

impl BucketMut<'_> {
    fn view(&self) -> Bucket<'_> {
        Bucket {
            occupancy: *self.occupancy,
            slots: &*self.slots,
        }
    }

    /// Store `fingerprint` in the first free slot.
    ///
    /// Returns false if the bucket is full.
    pub(crate) fn try_add(&mut self, fingerprint: Fingerprint) -> bool {
        let free = !*self.occupancy;
        let slot = free.trailing_zeros() as usize;
        if slot >= self.slots.len() {
            return false;
        }
        self.slots[slot] = fingerprint;
        *self.occupancy |= 1 << slot;
        true
    }

    /// Clear the first occupied slot holding `fingerprint`.
    ///
    /// Returns false if the fingerprint is absent.
    pub(crate) fn try_remove(&mut self, fingerprint: Fingerprint) -> bool {
        match self.view().position(fingerprint) {
            Some(slot) => {
                self.slots[slot] = 0;
                *self.occupancy &= !(1 << slot);
                true
            }
            None => false,
        }
    }

    /// Replace a uniformly chosen slot of a full bucket with `fingerprint`.
    ///
    /// Returns the slot index and the evicted fingerprint. Only called once
    /// `try_add` has failed, so every slot is occupied. A choice outside
    /// `0..bucket_size` wraps around instead of skipping the swap.
    pub(crate) fn swap_random(
        &mut self,
        fingerprint: Fingerprint,
        chooser: &mut dyn IndexChooser,
    ) -> (usize, Fingerprint) {
        let len = self.slots.len();
        debug_assert_eq!(self.occupancy.count_ones() as usize, len);
        let slot = chooser.choose(len) % len;
        let evicted = std::mem::replace(&mut self.slots[slot], fingerprint);
        (slot, evicted)
    }

    /// Put back a fingerprint displaced by [`BucketMut::swap_random`]
    pub(crate) fn restore(&mut self, slot: usize, fingerprint: Fingerprint) {
        self.slots[slot] = fingerprint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Chooser that replays a fixed sequence of choices
    struct Scripted(Vec<usize>);

    impl IndexChooser for Scripted {
        fn choose(&mut self, len: usize) -> usize {
            self.0.remove(0) % len
        }
    }

    #[test]
    fn add_until_full() {
        let mut buckets = Buckets::new(4, 4);
        let mut bucket = buckets.get_mut(2);
        for fingerprint in 1..=4 {
            assert!(bucket.try_add(fingerprint));
        }
        assert!(!bucket.try_add(5));
        assert_eq!(buckets.get(2).occupancy(), 0b1111);
        assert_eq!(buckets.get(1).occupancy(), 0);
        assert_eq!(buckets.occupied(), 4);
    }

    #[test]
    fn zero_fingerprint_is_stored() {
        let mut buckets = Buckets::new(1, 2);
        assert!(!buckets.get(0).contains(0));
        assert!(buckets.get_mut(0).try_add(0));
        assert!(buckets.get(0).contains(0));
        assert!(buckets.get_mut(0).try_remove(0));
        assert!(!buckets.get(0).contains(0));
    }

    #[test]
    fn remove_clears_first_match_only() {
        let mut buckets = Buckets::new(1, 4);
        let mut bucket = buckets.get_mut(0);
        assert!(bucket.try_add(7));
        assert!(bucket.try_add(9));
        assert!(bucket.try_add(7));
        assert!(bucket.try_remove(7));
        assert_eq!(buckets.get(0).occupancy(), 0b110);
        assert_eq!(buckets.get(0).count(7), 1);
        assert!(!buckets.get_mut(0).try_remove(8));
    }

    #[test]
    fn freed_slot_is_reused() {
        let mut buckets = Buckets::new(1, 2);
        let mut bucket = buckets.get_mut(0);
        assert!(bucket.try_add(1));
        assert!(bucket.try_add(2));
        assert!(bucket.try_remove(1));
        assert!(bucket.try_add(3));
        assert_eq!(buckets.get(0).fingerprints().collect::<Vec<_>>(), vec![3, 2]);
    }

    #[test]
    fn swap_random_evicts_chosen_slot() {
        let mut buckets = Buckets::new(1, 4);
        let mut bucket = buckets.get_mut(0);
        for fingerprint in [10, 11, 12, 13] {
            assert!(bucket.try_add(fingerprint));
        }
        let mut chooser = Scripted(vec![2]);
        assert_eq!(bucket.swap_random(99, &mut chooser), (2, 12));
        bucket.restore(2, 12);
        assert_eq!(
            buckets.get(0).fingerprints().collect::<Vec<_>>(),
            vec![10, 11, 12, 13]
        );
    }

    #[test]
    fn swap_random_wraps_out_of_range_choice() {
        let mut buckets = Buckets::new(1, 4);
        let mut bucket = buckets.get_mut(0);
        for fingerprint in [10, 11, 12, 13] {
            assert!(bucket.try_add(fingerprint));
        }
        let mut chooser = Scripted(vec![4, 6]);
        assert_eq!(bucket.swap_random(20, &mut chooser), (0, 10));
        assert_eq!(bucket.swap_random(21, &mut chooser), (2, 12));
        assert_eq!(buckets.get(0).occupancy(), 0b1111);
        assert_eq!(
            buckets.get(0).fingerprints().collect::<Vec<_>>(),
            vec![20, 11, 21, 13]
        );
    }

    #[test]
    fn max_bucket_size_fills_bitmap() {
        let mut buckets = Buckets::new(1, MAX_BUCKET_SIZE);
        let mut bucket = buckets.get_mut(0);
        for fingerprint in 0..MAX_BUCKET_SIZE as Fingerprint {
            assert!(bucket.try_add(fingerprint));
        }
        assert!(!bucket.try_add(0));
        assert_eq!(buckets.get(0).occupancy(), Occupancy::MAX);
    }

    #[test]
    fn seeded_chooser_is_reproducible() {
        let mut a = RandomChooser::seeded(7);
        let mut b = RandomChooser::seeded(7);
        for len in 1..50 {
            let choice = a.choose(len);
            assert!(choice < len);
            assert_eq!(choice, b.choose(len));
        }
    }
}
