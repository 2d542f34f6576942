//! Name hashing for the perfect-hash index.
//!
//! A 32-bit multiplicative hash over the modified UTF-8 bytes of a name:
//! `seed = seed * 0x01000193 ^ byte`, masked to a nonnegative 31-bit value.
//! The same function with an arbitrary starting seed drives the secondary
//! probe of the redirect table.

use crate::mutf8;

/// Multiplier, and default seed, of the name hash.
pub const HASH_MULTIPLIER: u32 = 0x0100_0193;

/// Mask applied to every finished hash.
pub const POSITIVE_MASK: u32 = 0x7FFF_FFFF;

/// Continue a running hash over `text` without masking.
#[inline]
pub fn unmasked_hash(text: &str, seed: u32) -> u32 {
    let mut seed = seed;
    mutf8::for_each_byte(text, |b| {
        seed = seed.wrapping_mul(HASH_MULTIPLIER) ^ b as u32;
    });
    seed
}

/// Hash a name with the default seed.
#[inline]
pub fn hash(name: &str) -> u32 {
    hash_with_seed(name, HASH_MULTIPLIER)
}

/// Hash a name starting from `seed`.
#[inline]
pub fn hash_with_seed(name: &str, seed: u32) -> u32 {
    unmasked_hash(name, seed) & POSITIVE_MASK
}

/// Hash the pair as if it were the single name `/module/name`.
pub fn hash_module_name(module: &str, name: &str, seed: u32) -> u32 {
    let mut seed = unmasked_hash("/", seed);
    seed = unmasked_hash(module, seed);
    seed = unmasked_hash("/", seed);
    seed = unmasked_hash(name, seed);
    seed & POSITIVE_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_hash_is_seed() {
        assert_eq!(hash(""), HASH_MULTIPLIER);
        assert_eq!(hash_with_seed("", 42), 42);
    }

    #[test]
    fn test_single_byte() {
        let expected = HASH_MULTIPLIER.wrapping_mul(HASH_MULTIPLIER) ^ b'a' as u32;
        assert_eq!(hash("a"), expected & POSITIVE_MASK);
    }

    #[test]
    fn test_module_pair_matches_full_name() {
        assert_eq!(
            hash_module_name("java.base", "java/lang/Object.class", HASH_MULTIPLIER),
            hash("/java.base/java/lang/Object.class")
        );
    }

    #[test]
    fn test_hash_is_nonnegative() {
        for name in ["a", "zz", "/modules/java.base", "\u{1F600}"] {
            assert_eq!(hash(name) & !POSITIVE_MASK, 0);
        }
    }

    #[test]
    fn test_hash_uses_modified_utf8() {
        let mut seed = HASH_MULTIPLIER;
        for b in [0xC0u8, 0x80] {
            seed = seed.wrapping_mul(HASH_MULTIPLIER) ^ b as u32;
        }
        assert_eq!(hash("\0"), seed & POSITIVE_MASK);
    }
}
