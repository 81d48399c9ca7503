//! 64-bit seeded MurmurHash (variant 64A)
//!
//! Cache file names are derived from this hash, so the output must stay
//! stable across versions and platforms.

use crate::gpu::constants::CACHE_HASH_SEED;

const M: u64 = 0xc6a4_a793_5bd1_e995;
const R: u32 = 47;

/// Hash `key` with `seed`
pub fn hash64(key: &[u8], seed: u64) -> u64 {
    let mut h = seed ^ (key.len() as u64).wrapping_mul(M);

    let blocks = key.chunks_exact(8);
    let tail = blocks.remainder();

    for block in blocks {
        let mut word = [0u8; 8];
        word.copy_from_slice(block);
        let mut k = u64::from_le_bytes(word);

        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h ^= k;
        h = h.wrapping_mul(M);
    }

    if !tail.is_empty() {
        for (i, byte) in tail.iter().enumerate() {
            h ^= (*byte as u64) << (8 * i);
        }
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h
}

/// Hash a source path the way the on-disk caches name their files
pub fn path_hash(path: &str) -> u64 {
    hash64(path.as_bytes(), CACHE_HASH_SEED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_with_zero_seed_is_zero() {
        assert_eq!(hash64(b"", 0), 0);
    }

    #[test]
    fn hash_is_deterministic() {
        let a = hash64(b"shaders/composite/composite.wgsl", 1000);
        let b = hash64(b"shaders/composite/composite.wgsl", 1000);
        assert_eq!(a, b);
    }

    #[test]
    fn seed_and_tail_bytes_change_the_hash() {
        let key = b"shaders/forward/forward_vs.wgsl";
        assert_ne!(hash64(key, 0), hash64(key, 1000));
        // Keys that only differ in the unaligned tail must not collide
        assert_ne!(hash64(b"abcdefgh1", 7), hash64(b"abcdefgh2", 7));
        assert_eq!(path_hash("a/b.wgsl"), hash64(b"a/b.wgsl", CACHE_HASH_SEED));
    }
}
