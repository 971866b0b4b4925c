//! Multi-objective fitness values and Pareto bookkeeping.
//!
//! Raw objective `values` are multiplied by their signs into `wvalues`, so
//! every comparison treats all objectives as maximized. Two orders coexist
//! and must not be mixed up:
//!
//! - `dominates` is the Pareto partial order used by NSGA-II.
//! - `Ord` is a total lexicographic order over `wvalues`, for sorting and
//!   best-individual tracking.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Outcome of a Pareto comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dominance {
    /// This fitness is at least as good everywhere and better somewhere.
    Dominates,
    /// The other fitness dominates this one.
    Dominated,
    /// Neither dominates (includes equality).
    NonDominated,
}

impl Dominance {
    /// The comparison seen from the other side.
    pub fn reverse(self) -> Self {
        match self {
            Self::Dominates => Self::Dominated,
            Self::Dominated => Self::Dominates,
            Self::NonDominated => Self::NonDominated,
        }
    }

    /// `1`, `-1` or `0`.
    pub fn as_i8(self) -> i8 {
        match self {
            Self::Dominates => 1,
            Self::Dominated => -1,
            Self::NonDominated => 0,
        }
    }
}

/// Objective scores of one individual plus NSGA-II bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fitness {
    /// Raw objective values, in objective order.
    pub values: Vec<f32>,
    /// Sign per objective: +1 maximize, -1 minimize.
    pub weights: Vec<f32>,
    /// `values * weights`.
    pub wvalues: Vec<f32>,

    pub loss: f32,
    /// Loss on the validation data.
    pub loss_v: f32,
    pub complexity: usize,
    pub linear_complexity: usize,
    pub size: usize,
    pub depth: usize,

    // Parent's values, kept to reward the variation that produced this one.
    pub prev_loss: f32,
    pub prev_loss_v: f32,
    pub prev_complexity: usize,
    pub prev_linear_complexity: usize,
    pub prev_size: usize,
    pub prev_depth: usize,

    /// Pareto front index, 1 is the best front.
    pub rank: usize,
    pub crowding_dist: f32,
    /// Number of individuals dominating this one.
    pub dcounter: usize,
    /// Indices of the individuals this one dominates.
    pub dominated: Vec<usize>,
}

impl Fitness {
    /// Empty fitness for the given objective signs.
    pub fn new(weights: Vec<f32>) -> Self {
        Self {
            weights,
            ..Default::default()
        }
    }

    /// A fitness is valid once values have been set.
    pub fn valid(&self) -> bool {
        !self.wvalues.is_empty()
    }

    /// Set raw values and recompute `wvalues`.
    pub fn set_values(&mut self, values: Vec<f32>) -> Result<(), FitnessError> {
        if values.len() != self.weights.len() {
            return Err(FitnessError::LengthMismatch {
                values: values.len(),
                weights: self.weights.len(),
            });
        }
        self.wvalues = values
            .iter()
            .zip(&self.weights)
            .map(|(v, w)| v * w)
            .collect();
        self.values = values;
        Ok(())
    }

    /// Drop the values so the fitness must be recomputed.
    pub fn clear_values(&mut self) {
        self.values.clear();
        self.wvalues.clear();
    }

    /// Remember `parent`'s measurements as this fitness's previous values.
    pub fn set_previous(&mut self, parent: &Fitness) {
        self.prev_loss = parent.loss;
        self.prev_loss_v = parent.loss_v;
        self.prev_complexity = parent.complexity;
        self.prev_linear_complexity = parent.linear_complexity;
        self.prev_size = parent.size;
        self.prev_depth = parent.depth;
    }

    /// Pareto comparison in maximize-all space.
    ///
    /// A NaN in `other` counts as a win for `self` on that objective and a
    /// NaN in `self` as a loss, so the result stays antisymmetric.
    pub fn dominates(&self, other: &Fitness) -> Dominance {
        let mut better = false;
        let mut worse = false;
        for (a, b) in self.wvalues.iter().zip(&other.wvalues) {
            if a > b || b.is_nan() {
                better = true;
            }
            if a < b || a.is_nan() {
                worse = true;
            }
        }
        match (better, worse) {
            (true, false) => Dominance::Dominates,
            (false, true) => Dominance::Dominated,
            _ => Dominance::NonDominated,
        }
    }
}

impl PartialEq for Fitness {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Fitness {}

impl PartialOrd for Fitness {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fitness {
    /// Lexicographic over `wvalues`; larger is better.
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.wvalues.iter().zip(&other.wvalues) {
            match a.total_cmp(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.wvalues.len().cmp(&other.wvalues.len())
    }
}

impl Hash for Fitness {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for w in &self.wvalues {
            w.to_bits().hash(state);
        }
    }
}

/// Fitness errors.
#[derive(Debug, thiserror::Error)]
pub enum FitnessError {
    #[error("Got {values} objective values for {weights} weights")]
    LengthMismatch { values: usize, weights: usize },
}
