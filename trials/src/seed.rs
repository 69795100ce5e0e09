//! Addressable random streams
//!
//! A job that needs randomness seeds its own generator from
//! `stream_seed(base, stream, index)`, so the draws seen by job `i` depend only
//! on the base seed, the stream id and `i`. Separate stream ids keep unrelated
//! consumers (demand sampling, randomised policies) from perturbing each other.

/// Finalizer from SplitMix64
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed for item `index` of stream `stream` under `base`
pub fn stream_seed(base: u64, stream: u64, index: u64) -> u64 {
    mix(mix(mix(base) ^ stream) ^ index)
}

/// Stable stream id for a name (FNV-1a)
///
/// Unlike `std`'s `DefaultHasher`, the value never changes between builds.
pub fn label_stream(label: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    label
        .bytes()
        .fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
}
