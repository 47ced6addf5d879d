//! Stable string hashing used to key shader variants and vertex layouts.
//!
//! The values must not depend on the process or the toolchain, so this uses FNV-1a instead of
//! the randomly seeded std hasher.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a over the UTF-8 bytes of `s`.
pub const fn str_hash(s: &str) -> u64 {
    let bytes = s.as_bytes();
    let mut hash = FNV_OFFSET;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Folds the hashes of all `parts` with XOR, which makes the result independent of their order.
///
/// Callers are expected to pass a duplicate-free set: equal parts cancel each other out.
pub fn xor_hash<I, S>(parts: I) -> u64
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts
        .into_iter()
        .fold(0, |acc, part| acc ^ str_hash(part.as_ref()))
}

/// Mixes an integer into a running hash.
pub const fn mix(hash: u64, value: u64) -> u64 {
    let mut hash = hash ^ value;
    hash = hash.wrapping_mul(FNV_PRIME);
    hash ^ (hash >> 29)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_hash_matches_reference_values() {
        assert_eq!(str_hash(""), FNV_OFFSET);
        assert_eq!(str_hash("a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn xor_hash_ignores_order() {
        let a = xor_hash(["SKINNED", "VERTEX_COLOR", "FOG"]);
        let b = xor_hash(["FOG", "SKINNED", "VERTEX_COLOR"]);
        assert_eq!(a, b);
        assert_ne!(a, xor_hash(["FOG", "SKINNED"]));
    }

    #[test]
    fn mix_depends_on_value() {
        assert_ne!(mix(1, 2), mix(1, 3));
    }
}
