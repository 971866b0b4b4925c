//! Pareto archive of the best trade-offs found so far.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::individual::Individual;
use super::population::Population;
use super::selection::fast_nds;
use crate::schema::{ModelSnapshot, Parameters};

/// First-front individuals of every island, deduplicated.
///
/// Sorted by ascending complexity when complexity is an objective, otherwise
/// by the first objective, best first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Archive {
    pub individuals: Vec<Individual>,
    pub sort_complexity: bool,
    pub linear_complexity: bool,
}

impl Archive {
    pub fn new(params: &Parameters) -> Self {
        Self {
            individuals: Vec::new(),
            sort_complexity: params.objectives.iter().any(|o| o == "complexity"),
            linear_complexity: params.linear_complexity,
        }
    }

    /// Build from the initial population.
    pub fn init(&mut self, pop: &mut Population) {
        self.individuals.clear();
        self.update(pop);
        log::debug!("archive initialized with {} individuals", self.individuals.len());
    }

    /// Rank every island and collect its first front.
    ///
    /// Ranks are written into the population.
    pub fn update(&mut self, pop: &mut Population) {
        let mut front: Vec<Individual> = Vec::new();
        for island in 0..pop.num_islands {
            let sort = fast_nds(pop, pop.island(island));
            sort.apply(pop);
            if let Some(first) = sort.fronts.first() {
                front.extend(first.iter().filter_map(|&slot| pop.get(slot)).cloned());
            }
        }

        self.sort(&mut front);
        let mut unique: Vec<Individual> = Vec::with_capacity(front.len());
        for ind in front {
            if !unique.iter().any(|kept| kept.fitness == ind.fitness) {
                unique.push(ind);
            }
        }
        self.individuals = unique;
    }

    fn complexity_of(&self, ind: &Individual) -> usize {
        if self.linear_complexity {
            ind.fitness.linear_complexity
        } else {
            ind.fitness.complexity
        }
    }

    fn sort(&self, individuals: &mut [Individual]) {
        if self.sort_complexity {
            individuals.sort_by_key(|ind| self.complexity_of(ind));
        } else {
            individuals.sort_by(|a, b| {
                let first = |ind: &Individual| ind.fitness.wvalues.first().copied();
                match (first(a), first(b)) {
                    (Some(x), Some(y)) => y.total_cmp(&x),
                    _ => Ordering::Equal,
                }
            });
        }
    }

    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Individual> {
        self.individuals.iter()
    }

    /// Archived individual with `id`.
    pub fn get(&self, id: u64) -> Option<&Individual> {
        self.individuals.iter().find(|ind| ind.id == id)
    }

    pub fn snapshots(&self) -> Vec<ModelSnapshot> {
        self.individuals.iter().map(Individual::snapshot).collect()
    }
}
