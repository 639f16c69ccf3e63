//! Fingerprint derivation and the two-bucket index scheme
//!
//! Each key maps to a primary bucket taken from its digest and to an
//! alternate bucket computed as `primary ^ hash(fingerprint)`. Because the
//! alternate only depends on the fingerprint, a fingerprint that gets kicked
//! out of a bucket can be moved to its other bucket without the original key.

use crate::hash::hash_bytes;
use std::hash::Hasher;

/// A fingerprint as stored in a bucket slot
///
/// Zero is a legal fingerprint; slot occupancy is tracked separately.
pub type Fingerprint = u16;

/// Width of a [`Fingerprint`] in bytes
pub const FINGERPRINT_BYTES: usize = size_of::<Fingerprint>();

/// Derive the fingerprint of a key and the hash of that fingerprint.
///
/// The fingerprint is the top 16 bits of the key digest, so it stays
/// independent of the low bits used for the primary index.
pub fn fingerprint_of<H: Hasher + Default>(key: &[u8]) -> (Fingerprint, u64) {
    let fingerprint = fingerprint_from_digest(hash_bytes::<H>(key));
    (fingerprint, fingerprint_hash::<H>(fingerprint))
}

/// Hash of a fingerprint, used to compute its alternate bucket.
pub fn fingerprint_hash<H: Hasher + Default>(fingerprint: Fingerprint) -> u64 {
    hash_bytes::<H>(&fingerprint.to_le_bytes())
}

pub(crate) fn fingerprint_from_digest(digest: u64) -> Fingerprint {
    (digest >> (u64::BITS as usize - Fingerprint::BITS as usize)) as Fingerprint
}

/// Primary bucket index of a key digest.
///
/// `total_buckets` must be a power of two.
pub fn primary_index(digest: u64, total_buckets: usize) -> usize {
    digest as usize & (total_buckets - 1)
}

/// Alternate bucket index for a fingerprint currently addressed by `index`.
///
/// Properties (for a power-of-two `total_buckets`):
/// 1. Symmetry: `alternate_index(alternate_index(i, h, n), h, n) == i`.
/// 2. The result is always in `0..n`.
pub fn alternate_index(index: usize, fingerprint_hash: u64, total_buckets: usize) -> usize {
    (index ^ fingerprint_hash as usize) & (total_buckets - 1)
}

/// Number of fingerprint bytes needed for a false positive rate given in
/// percent and a bucket size: `ceil((ln(100/e) + ln(2b)) / ln(256))`.
pub fn fingerprint_size_in_bytes(false_positive_rate: f64, bucket_size: usize) -> usize {
    let bits = (100.0 / false_positive_rate).ln() + (2.0 * bucket_size as f64).ln();
    (bits / 256f64.ln()).ceil().max(1.0) as usize
}

/// Pad single byte keys to the two bytes a fingerprint spans.
///
/// Applied identically by every operation, so `[b]` and `[b, 0]` are the same key.
pub(crate) fn pad_key(key: &[u8]) -> PaddedKey<'_> {
    match key {
        [byte] => PaddedKey::Padded([*byte, 0]),
        _ => PaddedKey::Borrowed(key),
    }
}

pub(crate) enum PaddedKey<'a> {
    Borrowed(&'a [u8]),
    Padded([u8; FINGERPRINT_BYTES]),
}

impl AsRef<[u8]> for PaddedKey<'_> {
    fn as_ref(&self) -> &[u8] {
        match self {
            PaddedKey::Borrowed(key) => key,
            PaddedKey::Padded(key) => key,
        }
    }
}
