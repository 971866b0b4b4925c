//! Multi-armed bandits adapting sampling probabilities.
//!
//! One bandit picks the variation operator, others pick terminals per
//! return type. Arms are rewarded 1 when the child they produced is no
//! worse than its parent on every objective.

use std::collections::BTreeMap;

use super::rng::EvoRng;
use crate::schema::BanditKind;

const PRIOR: f32 = 2.0;
const MIN_PROB: f32 = 0.001;
/// Memory of the discounted bandit, in pulls.
const DISCOUNT_WINDOW: f32 = 250.0;

/// Bandit over the keys of a probability map.
///
/// Arms configured with zero probability stay disabled. Rewards and draws
/// carry no context: each arm keeps one posterior for the whole run, and
/// callers pick arms themselves from `probs` or `sample_probs`.
#[derive(Debug, Clone)]
pub struct Bandit<K: Ord + Clone> {
    kind: BanditKind,
    probs: BTreeMap<K, f32>,
    alphas: BTreeMap<K, f32>,
    betas: BTreeMap<K, f32>,
}

impl<K: Ord + Clone> Bandit<K> {
    pub fn new(kind: BanditKind, probs: BTreeMap<K, f32>) -> Self {
        let alphas = probs.keys().map(|k| (k.clone(), PRIOR)).collect();
        let betas = probs.keys().map(|k| (k.clone(), PRIOR)).collect();
        Self {
            kind,
            probs,
            alphas,
            betas,
        }
    }

    pub fn kind(&self) -> BanditKind {
        self.kind
    }

    /// Current probabilities, without sampling.
    pub fn probs(&self) -> &BTreeMap<K, f32> {
        &self.probs
    }

    /// Arm probabilities. With `update`, Thompson bandits draw fresh
    /// probabilities from their posteriors and keep them.
    pub fn sample_probs(&mut self, update: bool, rng: &mut EvoRng) -> BTreeMap<K, f32> {
        if update && self.kind != BanditKind::Dummy {
            for (arm, prob) in self.probs.iter_mut() {
                if *prob <= 0.0 {
                    continue;
                }
                let alpha = self.alphas.get(arm).copied().unwrap_or(PRIOR);
                let beta = self.betas.get(arm).copied().unwrap_or(PRIOR);
                *prob = rng.beta(alpha, beta).clamp(MIN_PROB, 1.0);
            }
        }
        self.probs.clone()
    }

    /// Record a reward in [0, 1] for `arm`.
    pub fn update(&mut self, arm: &K, reward: f32) {
        if self.kind == BanditKind::Dummy {
            return;
        }
        let (Some(alpha), Some(beta)) = (self.alphas.get_mut(arm), self.betas.get_mut(arm)) else {
            return;
        };
        if self.kind == BanditKind::DynamicThompson && *alpha + *beta >= DISCOUNT_WINDOW {
            let discount = DISCOUNT_WINDOW / (DISCOUNT_WINDOW + 1.0);
            *alpha *= discount;
            *beta *= discount;
        }
        *alpha += reward;
        *beta += 1.0 - reward;
    }

    /// Posterior parameters of `arm`.
    pub fn posterior(&self, arm: &K) -> Option<(f32, f32)> {
        Some((*self.alphas.get(arm)?, *self.betas.get(arm)?))
    }
}
