//! Seeded random streams.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};

/// A stream of pseudo-random numbers.
///
/// Reseeding with [`manual_seed`](Generator::manual_seed) restarts the stream, so the
/// same seed always yields the same values. A generator created with
/// [`from_entropy`](Generator::from_entropy) draws its seed from the operating system:
/// two such generators in different processes produce different streams.
///
/// Hold one generator per logical stream; a generator is never shared between ranks.
#[derive(Clone, Debug)]
pub struct Generator {
    rng: StdRng,
    seed: u64,
    manual: bool,
}

impl Generator {
    /// Creates a generator seeded with `seed`. It counts as manually seeded.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
            manual: true,
        }
    }

    /// Creates a generator seeded from operating system entropy.
    pub fn from_entropy() -> Self {
        let seed = StdRng::from_os_rng().next_u64();
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
            manual: false,
        }
    }

    /// Restarts the stream from `seed`.
    pub fn manual_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        self.seed = seed;
        self.manual = true;
    }

    /// The seed the current stream started from.
    pub fn initial_seed(&self) -> u64 {
        self.seed
    }

    /// Whether the stream was seeded explicitly rather than from entropy.
    pub fn is_manually_seeded(&self) -> bool {
        self.manual
    }

    /// Draws a seed for a derived stream, advancing this one.
    pub fn next_seed(&mut self) -> u64 {
        self.rng.next_u64()
    }

    /// A uniformly random permutation of `0..n`.
    pub fn permutation(&mut self, n: usize) -> Vec<usize> {
        permutation(n, &mut self.rng)
    }
}

impl Default for Generator {
    fn default() -> Self {
        Self::from_entropy()
    }
}

/// A uniformly random permutation of `0..n` drawn from the stream started at `seed`.
pub fn seeded_permutation(n: usize, seed: u64) -> Vec<usize> {
    permutation(n, &mut StdRng::seed_from_u64(seed))
}

fn permutation(n: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut values: Vec<usize> = (0..n).collect();
    values.shuffle(rng);
    values
}
