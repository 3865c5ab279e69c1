use rand::rngs::StdRng;
use rand::SeedableRng;

/// Derive the RNG for one draw batch from the room seed and the number of
/// batches consumed so far.
///
/// Every nondeterministic decision (role shuffle, red herring, drunk's
/// believed role) happens inside a numbered batch; the batch count is folded
/// into state by `apply`, so a reducer running after snapshot recovery draws
/// exactly what the original run would have drawn.
pub fn draw_rng(seed: u64, draws: u64) -> StdRng {
    // SplitMix64-style mix keeps sequential batch numbers uncorrelated.
    let mut z = seed ^ draws.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    StdRng::seed_from_u64(z ^ (z >> 31))
}
