//! Seed derivation. Every random decision in the harness is a pure function of
//! the run seed and a stable label, so results never depend on thread
//! scheduling or iteration order.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// A child seed for the named stream. Distinct streams give unrelated seeds;
/// the same `(seed, stream)` always gives the same value.
pub fn derive_seed(seed: u64, stream: &str) -> u64 {
    splitmix64(seed ^ splitmix64(fnv1a(stream.as_bytes())))
}

/// The ordering priority of one sample under `seed`. It depends on nothing but
/// the pair, so dropping other samples never reorders the survivors.
pub fn sample_priority(seed: u64, sample_id: &str) -> u64 {
    ChaCha8Rng::seed_from_u64(derive_seed(seed, sample_id)).next_u64()
}

pub fn rng_for(seed: u64, stream: &str) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(derive_seed(seed, stream))
}
