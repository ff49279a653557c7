//! Deterministic seed hierarchy for parameter resets.
//!
//! A master seed is expanded into one sub-seed per `(stage, generation)` pair,
//! where `generation` counts how many times that stage has been reset. Sub-seeds
//! are BLAKE3-derived, so they do not depend on the order in which stages are
//! activated.

use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone)]
pub struct SeedHierarchy {
    master_seed: u64,
}

impl SeedHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Derive the sub-seed for the `generation`-th reset of `stage_index`.
    pub fn sub_seed(&self, stage_index: usize, generation: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(&(stage_index as u64).to_le_bytes());
        hasher.update(&generation.to_le_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    pub fn rng_for(&self, stage_index: usize, generation: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(stage_index, generation))
    }
}
