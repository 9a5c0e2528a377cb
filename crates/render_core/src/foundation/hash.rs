//! Stable string hashing for resource identifiers

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a hash of a string.
///
/// Used for asset type identifiers and resource names; the value is persisted
/// in asset files, so it must never change.
pub const fn hash_string(value: &str) -> u64 {
    let bytes = value.as_bytes();
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}
