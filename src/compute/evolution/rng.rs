//! Seeded random source for the evolutionary operators.
//!
//! The engine owns one `EvoRng` for the sequential stages. Parallel tasks
//! never share it: each one derives its own substream from the run seed and
//! a task key, so a parallel stage gives the same result whatever the thread
//! schedule.

use std::collections::BTreeMap;

use rand::distributions::{Distribution, WeightedIndex};
use rand::prelude::*;
use rand_distr::{Beta, StandardNormal};

/// Random number generator wrapper for evolutionary operators.
#[derive(Debug, Clone)]
pub struct EvoRng {
    rng: StdRng,
    seed: u64,
}

impl EvoRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Create with random seed.
    pub fn random() -> Self {
        Self::new(rand::random())
    }

    /// Seed this generator was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Independent generator for one parallel task.
    ///
    /// Depends only on the creation seed and `key`, never on how much of
    /// this generator has been consumed.
    pub fn substream(&self, key: &[u64]) -> EvoRng {
        let seed = key
            .iter()
            .fold(splitmix64(self.seed), |acc, k| splitmix64(acc ^ splitmix64(*k)));
        EvoRng::new(seed)
    }

    pub fn next_seed(&mut self) -> u64 {
        self.rng.r#gen()
    }

    /// Uniform in [0, 1).
    pub fn uniform(&mut self) -> f32 {
        self.rng.r#gen::<f32>()
    }

    /// `true` with probability `p`.
    pub fn flip(&mut self, p: f32) -> bool {
        if p <= 0.0 {
            false
        } else if p >= 1.0 {
            true
        } else {
            self.uniform() < p
        }
    }

    /// Uniform index below `n`.
    pub fn below(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n)
    }

    /// Uniform integer in `lo..=hi`.
    pub fn rnd_int(&mut self, lo: usize, hi: usize) -> usize {
        self.rng.gen_range(lo..=hi)
    }

    /// Uniform pick from a slice.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    /// Index drawn proportionally to `weights`.
    ///
    /// Returns `None` when no weight is positive.
    pub fn weighted_index(&mut self, weights: &[f32]) -> Option<usize> {
        let clean: Vec<f32> = weights
            .iter()
            .map(|w| if w.is_finite() && *w > 0.0 { *w } else { 0.0 })
            .collect();
        if clean.iter().all(|w| *w <= 0.0) {
            return None;
        }
        let dist = WeightedIndex::new(&clean).ok()?;
        Some(dist.sample(&mut self.rng))
    }

    /// Key drawn proportionally to its weight.
    pub fn random_choice<K: Clone + Ord>(&mut self, weights: &BTreeMap<K, f32>) -> Option<K> {
        let values: Vec<f32> = weights.values().copied().collect();
        let idx = self.weighted_index(&values)?;
        weights.keys().nth(idx).cloned()
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }

    /// Indices `0..weights.len()` in a weighted random order, drawn
    /// without replacement. Zero weights go last.
    pub fn weighted_order(&mut self, weights: &[f32]) -> Vec<usize> {
        let mut keyed: Vec<(f32, usize)> = weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let u = self.uniform().max(f32::MIN_POSITIVE);
                let key = if *w > 0.0 { u.powf(1.0 / *w) } else { -1.0 + u };
                (key, i)
            })
            .collect();
        keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
        keyed.into_iter().map(|(_, i)| i).collect()
    }

    /// Standard normal sample.
    pub fn normal(&mut self) -> f32 {
        StandardNormal.sample(&mut self.rng)
    }

    /// Beta(alpha, beta) sample; the mean if the shape is invalid.
    pub fn beta(&mut self, alpha: f32, beta: f32) -> f32 {
        match Beta::new(alpha, beta) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => alpha / (alpha + beta),
        }
    }
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
