use rand::{RngCore, SeedableRng, rngs::StdRng};
use serde::Serialize;

/// Seedable random number generator used for address sampling.
///
/// Remembers its seed so experiment runs can be logged and repeated.
#[derive(Debug, Serialize)]
pub struct Rng {
    seed: u64,
    #[serde(skip_serializing)]
    rng: StdRng,
}

impl Rng {
    /// Creates a new RNG from a seed value.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Creates a new RNG with a seed drawn from the thread-local generator.
    pub fn from_entropy() -> Self {
        Self::from_seed(rand::random())
    }

    /// The seed this generator was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RngCore for Rng {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest);
    }
}

impl Clone for Rng {
    /// Restarts the sequence from the original seed.
    fn clone(&self) -> Self {
        Self::from_seed(self.seed)
    }
}

#[cfg(test)]
mod tests {
    use crate::util::Rng;
    use rand::RngCore;

    #[test]
    fn test_rng_clone_restarts_sequence() {
        let mut rng = Rng::from_seed(0x42);
        let a = rng.next_u64();
        let _ = rng.next_u64();
        let mut cloned = rng.clone();
        assert_eq!(cloned.next_u64(), a);
        assert_eq!(cloned.seed(), 0x42);
    }
}
