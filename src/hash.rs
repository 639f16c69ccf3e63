//! Hash provider used for bucket indices and fingerprints

use murmur3::murmur3_x64_128;
use std::hash::Hasher;
use std::io::Cursor;

/// Seed baked into every digest.
///
/// Persisted filters only reload correctly while this value and the hash
/// algorithm stay the same, so it is not configurable.
pub const HASH_SEED: u32 = 59053;

/// MurmurHash3 (x64, 128-bit) behind the [`Hasher`] interface.
///
/// Written bytes are buffered and digested on [`Hasher::finish`], which
/// returns the low 64 bits of the 128-bit result. A fresh hasher is built
/// from [`Default`] for every digest, so no state leaks between keys.
#[derive(Debug, Default, Clone)]
pub struct Murmur3Hasher {
    buffer: Vec<u8>,
}

impl Hasher for Murmur3Hasher {
    fn write(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn finish(&self) -> u64 {
        // Reading from an in-memory cursor cannot fail
        murmur3_x64_128(&mut Cursor::new(&self.buffer), HASH_SEED)
            .map(|digest| digest as u64)
            .unwrap_or_default()
    }
}

/// Digest raw bytes with a freshly reset hasher of type `H`
///
/// Bytes are written directly rather than through [`std::hash::Hash`], which
/// would prepend a length and tie the digest to the std slice encoding.
pub fn hash_bytes<H: Hasher + Default>(bytes: &[u8]) -> u64 {
    let mut hasher = H::default();
    hasher.write(bytes);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(
            hash_bytes::<Murmur3Hasher>(b"hello"),
            hash_bytes::<Murmur3Hasher>(b"hello")
        );
        assert_ne!(
            hash_bytes::<Murmur3Hasher>(b"hello"),
            hash_bytes::<Murmur3Hasher>(b"hellp")
        );
    }

    #[test]
    fn split_writes_match_single_write() {
        let mut hasher = Murmur3Hasher::default();
        hasher.write(b"hel");
        hasher.write(b"lo");
        assert_eq!(hasher.finish(), hash_bytes::<Murmur3Hasher>(b"hello"));
    }

    #[test]
    fn pinned_digests() {
        assert_eq!(hash_bytes::<Murmur3Hasher>(b"hello"), HELLO_DIGEST);
        assert_eq!(hash_bytes::<Murmur3Hasher>(b"12345"), DIGITS_DIGEST);
        assert_eq!(hash_bytes::<Murmur3Hasher>(b""), EMPTY_DIGEST);
    }

    const HELLO_DIGEST: u64 = 0xd319_595d_0965_ef10;
    const DIGITS_DIGEST: u64 = 0x72eb_d3f5_57d4_8a7f;
    const EMPTY_DIGEST: u64 = 0xaa0b_449e_a003_dc24;
}
