//! Deterministic Random Number Generator
//!
//! Uses Xorshift128+ algorithm for fast, high-quality, deterministic randomness.
//! Both peers install the same seeds during the handshake, so every draw that
//! never crosses the wire still comes out identical on both simulations.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// # Determinism Guarantee
///
/// Given the same seed, this RNG will produce the exact same sequence
/// of random numbers on any platform (x86, ARM, WASM).
///
/// # Example
///
/// ```
/// use peer_lockstep::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(42);
/// let mut b = DeterministicRng::new(42);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

// =============================================================================
// SEED BUNDLE
// =============================================================================

/// Seeds shared by both peers during the handshake.
///
/// `seed` drives the main simulation RNG; `seeds` feed independent
/// streams (particles, level generation, AI jitter) so that consuming
/// one stream never shifts another.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedBundle {
    /// Primary seed.
    pub seed: u64,
    /// Per-stream seeds.
    pub seeds: Vec<u64>,
}

impl SeedBundle {
    /// Build a bundle from explicit values.
    pub fn new(seed: u64, seeds: Vec<u64>) -> Self {
        Self { seed, seeds }
    }

    /// Derive `streams` stream seeds from a master seed.
    pub fn derive(master: u64, streams: usize) -> Self {
        let seeds = (0..streams)
            .map(|index| derive_stream_seed(master, index as u32))
            .collect();
        Self { seed: master, seeds }
    }

    /// Main simulation RNG.
    pub fn main_rng(&self) -> DeterministicRng {
        DeterministicRng::new(self.seed)
    }

    /// RNGs for every stream, in order.
    pub fn stream_rngs(&self) -> Vec<DeterministicRng> {
        self.seeds.iter().map(|s| DeterministicRng::new(*s)).collect()
    }
}

/// Derive a stream seed from the master seed.
///
/// Hashing keeps neighbouring stream indices uncorrelated, which plain
/// `master + index` would not.
pub fn derive_stream_seed(master: u64, index: u32) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"PEER_LOCKSTEP_STREAM_V1");
    hasher.update(master.to_le_bytes());
    hasher.update(index.to_le_bytes());

    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

// =============================================================================
// TESTS
// =============================================================================
