use rand::{Rng as _, SeedableRng, rngs::StdRng};

/// Seedable random number generator.
///
/// Both peers of a benchmark run derive the same pseudo-random bit sequence
/// from the seed, so the sender log can be regenerated offline.
#[derive(Debug)]
pub struct Rng {
    rng: StdRng,
}

impl Rng {
    /// Creates a new RNG from a seed value.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draws `n` uniformly distributed bits.
    pub fn bits(&mut self, n: usize) -> Vec<bool> {
        (0..n).map(|_| self.rng.random()).collect()
    }
}
