//! Thin wrapper around the `xxhash-rust` crate providing the XXH64 API used
//! for frame integrity trailers.
//!
//! Only XXH64 is needed: the frame format closes with an 8-byte little-endian
//! XXH64 digest (seed 0) when hashing is enabled.

pub use xxhash_rust::xxh64::Xxh64 as Xxh64State;

/// One-shot XXH64 hash over a byte slice.
///
/// # Parity vectors
/// * `xxh64_oneshot(b"", 0)` == `0xEF46_DB37_51D8_E999`
#[inline]
pub fn xxh64_oneshot(data: &[u8], seed: u64) -> u64 {
    xxhash_rust::xxh64::xxh64(data, seed)
}

/// Creates a fresh streaming hash state with the frame seed.
#[inline]
pub fn frame_hasher() -> Xxh64State {
    Xxh64State::new(0)
}
