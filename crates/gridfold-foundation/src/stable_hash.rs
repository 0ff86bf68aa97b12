//! Stable hashing for structural fingerprints.
//!
//! Expression nodes are identified by a 64-bit structural fingerprint:
//! a deterministic consequence of the node's tag, payload, and the
//! fingerprints of its children. Two runs of the compiler on the same
//! input must produce identical fingerprints, so the hash must not depend
//! on process state, pointer values, or `std` hasher seeding. These
//! helpers provide a stable FNV-1a 64-bit implementation.
//!
//! NOTE: FNV-1a is **not** cryptographically secure. It is used strictly
//! for structural identity and deterministic ordering.

/// 64-bit FNV-1a offset basis.
pub const FNV1A_OFFSET_BASIS_64: u64 = 0xcbf29ce484222325;
/// 64-bit FNV-1a prime.
pub const FNV1A_PRIME_64: u64 = 0x0000_0100_0000_01B3;

/// Mix bytes into an existing FNV-1a 64-bit hash state.
#[inline]
pub const fn mix_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    let mut i = 0usize;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV1A_PRIME_64);
        i += 1;
    }
    hash
}

/// Mix a `u64` (little-endian bytes) into the hash state.
///
/// Child fingerprints and integer payloads go through this so that the
/// byte width is fixed regardless of value.
#[inline]
pub const fn mix_u64(hash: u64, value: u64) -> u64 {
    mix_bytes(hash, &value.to_le_bytes())
}

/// Mix an `i64` (two's-complement little-endian) into the hash state.
#[inline]
pub const fn mix_i64(hash: u64, value: i64) -> u64 {
    mix_u64(hash, value as u64)
}

/// Mix a UTF-8 string into the hash state, length-prefixed so that
/// adjacent strings cannot alias (`"ab","c"` vs `"a","bc"`).
#[inline]
pub fn mix_str(hash: u64, s: &str) -> u64 {
    let hash = mix_u64(hash, s.len() as u64);
    mix_bytes(hash, s.as_bytes())
}

/// Hash an arbitrary byte slice with FNV-1a 64-bit.
#[inline]
pub const fn fnv1a64(bytes: &[u8]) -> u64 {
    mix_bytes(FNV1A_OFFSET_BASIS_64, bytes)
}

/// Hash a UTF-8 string with FNV-1a 64-bit.
#[inline]
pub const fn fnv1a64_str(s: &str) -> u64 {
    fnv1a64(s.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_values() {
        // FNV-1a: hash = (hash XOR byte) * prime, starting from the basis.
        assert_eq!(fnv1a64(b""), FNV1A_OFFSET_BASIS_64);

        let a_hash = fnv1a64(b"a");
        let expected_a = (FNV1A_OFFSET_BASIS_64 ^ 0x61).wrapping_mul(FNV1A_PRIME_64);
        assert_eq!(a_hash, expected_a);
    }

    #[test]
    fn regression_values() {
        // Fixed values; any change here is a determinism break.
        assert_eq!(fnv1a64(b"hello"), 11831194018420276491);
        assert_eq!(fnv1a64(b"hello world"), 8618312879776256743);
    }

    #[test]
    fn incremental_mixing_matches_whole() {
        let full = fnv1a64(b"helloworld");
        let mut h = FNV1A_OFFSET_BASIS_64;
        h = mix_bytes(h, b"hello");
        h = mix_bytes(h, b"world");
        assert_eq!(full, h);
    }

    #[test]
    fn u64_mixing_is_fixed_width() {
        // 1u64 and 256u64 differ only in byte position; both must mix all
        // eight bytes so small values cannot alias concatenations.
        let h1 = mix_u64(FNV1A_OFFSET_BASIS_64, 1);
        let h256 = mix_u64(FNV1A_OFFSET_BASIS_64, 256);
        assert_ne!(h1, h256);
        assert_eq!(h1, mix_bytes(FNV1A_OFFSET_BASIS_64, &1u64.to_le_bytes()));
    }

    #[test]
    fn str_mixing_is_length_prefixed() {
        let ab_c = mix_str(mix_str(FNV1A_OFFSET_BASIS_64, "ab"), "c");
        let a_bc = mix_str(mix_str(FNV1A_OFFSET_BASIS_64, "a"), "bc");
        assert_ne!(ab_c, a_bc);
    }

    #[test]
    fn negative_offsets_hash_stably() {
        let h_neg = mix_i64(FNV1A_OFFSET_BASIS_64, -1);
        let h_pos = mix_i64(FNV1A_OFFSET_BASIS_64, 1);
        assert_ne!(h_neg, h_pos);
        assert_eq!(h_neg, mix_i64(FNV1A_OFFSET_BASIS_64, -1));
    }
}
