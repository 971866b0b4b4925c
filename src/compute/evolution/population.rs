//! Island population.
//!
//! The population is an arena of `2 * pop_size` slots. The first half holds
//! the current individuals, the second half is filled with offspring each
//! generation. Islands own disjoint lists of slot indices: contiguous ranges
//! at the start of a generation, then extended with their offspring range.
//!
//! `update` and `migrate` rebuild the arena by cloning the chosen
//! individuals into fresh slots, so no slot is ever shared between
//! generations.

use std::fs;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::individual::{Individual, IndividualError};
use super::rng::EvoRng;
use crate::compute::search_space::SearchSpace;
use crate::schema::{ObjectiveWeights, Parameters};

/// Individuals of all islands plus the island partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Population {
    pub individuals: Vec<Option<Individual>>,
    pub island_indexes: Vec<Vec<usize>>,
    pub pop_size: usize,
    pub num_islands: usize,
    pub mig_prob: f32,
    #[serde(default)]
    pub linear_complexity: bool,
}

impl Population {
    /// Random population; offspring slots start empty.
    pub fn init(
        search_space: &SearchSpace,
        params: &Parameters,
        table: &ObjectiveWeights,
        rng: &mut EvoRng,
    ) -> Result<Self, PopulationError> {
        let mut pop = Self::empty(params);
        for i in 0..params.pop_size {
            let mut ind = Individual::init(search_space, params, table, rng)?;
            ind.id = i as u64;
            pop.individuals[i] = Some(ind);
        }
        Ok(pop)
    }

    /// Population from existing individuals.
    ///
    /// Accepts `pop_size` individuals, or `2 * pop_size` when restarting
    /// with the offspring of the last generation; the islands then also
    /// claim their offspring ranges.
    pub fn init_from(individuals: Vec<Individual>, params: &Parameters) -> Result<Self, PopulationError> {
        let n = individuals.len();
        if n != params.pop_size && n != 2 * params.pop_size {
            return Err(PopulationError::WrongCount {
                got: n,
                pop_size: params.pop_size,
            });
        }
        let mut pop = Self::empty(params);
        for (slot, ind) in individuals.into_iter().enumerate() {
            pop.individuals[slot] = Some(ind);
        }
        if n == 2 * params.pop_size {
            for island in 0..pop.num_islands {
                pop.add_offspring_indexes(island);
            }
        }
        Ok(pop)
    }

    fn empty(params: &Parameters) -> Self {
        let mut pop = Self {
            individuals: vec![None; 2 * params.pop_size],
            island_indexes: Vec::new(),
            pop_size: params.pop_size,
            num_islands: params.num_islands,
            mig_prob: params.mig_prob,
            linear_complexity: params.linear_complexity,
        };
        pop.reset_islands();
        pop
    }

    /// Contiguous bounds of an island within the current half:
    /// `floor(i * p / n) .. floor((i + 1) * p / n)`.
    pub fn island_bounds(&self, island: usize) -> (usize, usize) {
        let p = self.pop_size;
        let n = self.num_islands;
        (island * p / n, (island + 1) * p / n)
    }

    fn reset_islands(&mut self) {
        self.island_indexes = (0..self.num_islands)
            .map(|island| {
                let (start, end) = self.island_bounds(island);
                (start..end).collect()
            })
            .collect();
    }

    /// Number of slots (current plus offspring).
    pub fn size(&self) -> usize {
        self.individuals.len()
    }

    pub fn island(&self, island: usize) -> &[usize] {
        &self.island_indexes[island]
    }

    pub fn get(&self, idx: usize) -> Option<&Individual> {
        self.individuals.get(idx).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Individual> {
        self.individuals.get_mut(idx).and_then(Option::as_mut)
    }

    /// Individual in slot `idx`.
    ///
    /// # Panics
    ///
    /// Panics if the slot is empty.
    pub fn ind(&self, idx: usize) -> &Individual {
        match self.get(idx) {
            Some(ind) => ind,
            None => panic!("slot {idx} is empty"),
        }
    }

    /// All individuals currently assigned to islands.
    pub fn members(&self) -> impl Iterator<Item = &Individual> {
        self.island_indexes
            .iter()
            .flatten()
            .filter_map(|&idx| self.get(idx))
    }

    /// Give an island its offspring slots `pop_size + start .. pop_size + end`.
    pub fn add_offspring_indexes(&mut self, island: usize) {
        let (start, end) = self.island_bounds(island);
        assert_eq!(
            self.island_indexes[island].len(),
            end - start,
            "offspring slots already added to island {island}"
        );
        let p = self.pop_size;
        self.island_indexes[island].extend(p + start..p + end);
    }

    /// Empty the offspring slots and give every island back its original
    /// contiguous range.
    pub fn drop_offspring(&mut self) {
        for slot in self.individuals.iter_mut().skip(self.pop_size) {
            *slot = None;
        }
        self.reset_islands();
    }

    /// Keep the survivors of each island.
    ///
    /// `survivors[j]` lists the slots island `j` keeps and must have exactly
    /// the island's original size.
    pub fn update(&mut self, survivors: &[Vec<usize>]) {
        assert_eq!(survivors.len(), self.num_islands, "one survivor list per island");
        let total: usize = survivors.iter().map(Vec::len).sum();
        assert_eq!(total, self.pop_size, "survivors must fill the population");
        for (island, kept) in survivors.iter().enumerate() {
            let (start, end) = self.island_bounds(island);
            assert_eq!(kept.len(), end - start, "wrong survivor count for island {island}");
        }
        self.rebuild(survivors);
    }

    /// Replace members with individuals from other islands.
    ///
    /// Each member is swapped, with probability `mig_prob`, for a uniform
    /// pick from a uniformly chosen other island. Draws read the
    /// pre-migration population.
    pub fn migrate(&mut self, rng: &mut EvoRng) {
        if self.num_islands == 1 {
            return;
        }
        let mut migrated = 0usize;
        let next: Vec<Vec<usize>> = (0..self.num_islands)
            .map(|island| {
                self.island_indexes[island]
                    .iter()
                    .map(|&idx| {
                        if !rng.flip(self.mig_prob) {
                            return idx;
                        }
                        let mut other = rng.below(self.num_islands - 1);
                        if other >= island {
                            other += 1;
                        }
                        migrated += 1;
                        let donors = &self.island_indexes[other];
                        donors[rng.below(donors.len())]
                    })
                    .collect()
            })
            .collect();
        log::debug!("migrated {migrated} individuals");
        self.rebuild(&next);
        let total: usize = self.island_indexes.iter().map(Vec::len).sum();
        assert_eq!(total, self.pop_size, "migration changed the population size");
    }

    /// Clone the listed slots into a fresh arena, island by island.
    fn rebuild(&mut self, kept: &[Vec<usize>]) {
        let mut fresh: Vec<Option<Individual>> = vec![None; 2 * self.pop_size];
        for (island, slots) in kept.iter().enumerate() {
            let (start, _) = self.island_bounds(island);
            for (k, &idx) in slots.iter().enumerate() {
                fresh[start + k] = self.individuals[idx].clone();
            }
        }
        self.individuals = fresh;
        self.reset_islands();
    }

    /// Slots of front `rank` over all islands, by ascending complexity,
    /// without duplicate fitness and complexity pairs.
    pub fn hall_of_fame(&self, rank: usize) -> Vec<usize> {
        let all: Vec<usize> = self.island_indexes.iter().flatten().copied().collect();
        self.sorted_unique(&all, rank)
    }

    /// Per-island `hall_of_fame`.
    pub fn sorted_front(&self, rank: usize) -> Vec<Vec<usize>> {
        self.island_indexes
            .iter()
            .map(|slots| self.sorted_unique(slots, rank))
            .collect()
    }

    fn complexity_of(&self, ind: &Individual) -> usize {
        if self.linear_complexity {
            ind.fitness.linear_complexity
        } else {
            ind.fitness.complexity
        }
    }

    fn sorted_unique(&self, slots: &[usize], rank: usize) -> Vec<usize> {
        let mut front: Vec<usize> = slots
            .iter()
            .copied()
            .filter(|&idx| self.get(idx).is_some_and(|ind| ind.fitness.rank == rank))
            .collect();
        front.sort_by_key(|&idx| self.complexity_of(self.ind(idx)));

        let mut unique: Vec<usize> = Vec::with_capacity(front.len());
        for idx in front {
            let ind = self.ind(idx);
            let duplicate = unique.iter().any(|&kept| {
                let other = self.ind(kept);
                other.fitness == ind.fitness && self.complexity_of(other) == self.complexity_of(ind)
            });
            if !duplicate {
                unique.push(idx);
            }
        }
        unique
    }

    /// Run `f` on every island in parallel with mutable access to the
    /// island's filled slots.
    ///
    /// # Panics
    ///
    /// Panics if two islands claim the same slot.
    pub fn par_for_each_island<R, F>(&mut self, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize, Vec<(usize, &mut Individual)>) -> R + Sync,
    {
        let mut owner: Vec<Option<usize>> = vec![None; self.individuals.len()];
        for (island, slots) in self.island_indexes.iter().enumerate() {
            for &idx in slots {
                assert!(
                    owner[idx].replace(island).is_none(),
                    "slot {idx} claimed by two islands"
                );
            }
        }

        let mut buckets: Vec<Vec<(usize, &mut Individual)>> =
            (0..self.num_islands).map(|_| Vec::new()).collect();
        for (idx, slot) in self.individuals.iter_mut().enumerate() {
            if let (Some(island), Some(ind)) = (owner[idx], slot.as_mut()) {
                buckets[island].push((idx, ind));
            }
        }

        buckets
            .into_par_iter()
            .enumerate()
            .map(|(island, members)| f(island, members))
            .collect()
    }

    /// One line per individual: island, id, fitness and model.
    pub fn print_models(&self) -> String {
        let mut out = String::new();
        for (island, slots) in self.island_indexes.iter().enumerate() {
            for &idx in slots {
                if let Some(ind) = self.get(idx) {
                    out.push_str(&format!(
                        "island {island} id {} values {:?} {}\n",
                        ind.id,
                        ind.fitness.values,
                        ind.get_model()
                    ));
                }
            }
        }
        out
    }

    /// Write the population as JSON.
    pub fn save(&self, path: &Path) -> Result<(), PopulationError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Read a population written by `save`.
    pub fn load(path: &Path) -> Result<Self, PopulationError> {
        let json = fs::read_to_string(path)?;
        let pop: Self = serde_json::from_str(&json)?;
        if pop.individuals.len() != 2 * pop.pop_size || pop.island_indexes.len() != pop.num_islands {
            return Err(PopulationError::Corrupt);
        }
        // Island slots must be distinct and occupied.
        let mut seen = vec![false; pop.individuals.len()];
        for &idx in pop.island_indexes.iter().flatten() {
            if idx >= seen.len() || seen[idx] || pop.individuals[idx].is_none() {
                return Err(PopulationError::Corrupt);
            }
            seen[idx] = true;
        }
        Ok(pop)
    }
}

/// Population errors.
#[derive(Debug, thiserror::Error)]
pub enum PopulationError {
    #[error("Expected {pop_size} or {} individuals, got {got}", 2 * pop_size)]
    WrongCount { got: usize, pop_size: usize },
    #[error(transparent)]
    Individual(#[from] IndividualError),
    #[error("Population file does not match its own sizes")]
    Corrupt,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::compute::dataset::{Column, Dataset};
    use crate::schema::ProgramType;

    pub(crate) fn test_data() -> Dataset {
        let x: Vec<f32> = (0..10).map(|i| i as f32 / 2.0).collect();
        let y: Vec<f32> = x.iter().map(|v| v * v + 1.0).collect();
        let mut features = BTreeMap::new();
        features.insert("x0".to_string(), Column::Float(x));
        Dataset::new(features, y, false).unwrap()
    }

    pub(crate) fn test_population(pop_size: usize, num_islands: usize, seed: u64) -> Population {
        let data = test_data();
        let ss = SearchSpace::new(&data, &BTreeMap::new()).unwrap();
        let params = Parameters {
            pop_size,
            num_islands,
            max_size: 20,
            max_depth: 5,
            ..Default::default()
        };
        let table = ObjectiveWeights::for_program_type(ProgramType::Regressor);
        let mut rng = EvoRng::new(seed);
        Population::init(&ss, &params, &table, &mut rng).unwrap()
    }

    #[test]
    fn test_partition_uneven() {
        let pop = test_population(10, 3, 0);
        let sizes: Vec<usize> = pop.island_indexes.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 4]);
        let mut all: Vec<usize> = pop.island_indexes.iter().flatten().copied().collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
        for island in 0..3 {
            let (start, end) = pop.island_bounds(island);
            assert_eq!(start, island * 10 / 3);
            assert_eq!(end, (island + 1) * 10 / 3);
        }
        assert_eq!(pop.size(), 20);
        assert!(pop.individuals[10..].iter().all(Option::is_none));
    }

    #[test]
    fn test_print_models_one_line_per_member() {
        let pop = test_population(6, 2, 0);
        let listing = pop.print_models();
        assert_eq!(listing.lines().count(), 6);
        assert!(listing.lines().all(|line| line.starts_with("island ")));
    }

    #[test]
    fn test_add_offspring_indexes() {
        let mut pop = test_population(10, 3, 1);
        pop.add_offspring_indexes(1);
        assert_eq!(pop.island(1), &[3, 4, 5, 13, 14, 15]);
    }

    #[test]
    #[should_panic(expected = "already added")]
    fn test_add_offspring_twice_panics() {
        let mut pop = test_population(10, 2, 1);
        pop.add_offspring_indexes(0);
        pop.add_offspring_indexes(0);
    }

    #[test]
    fn test_update_restores_contiguous_islands() {
        let mut pop = test_population(6, 2, 2);
        for island in 0..2 {
            pop.add_offspring_indexes(island);
        }
        for slot in 6..12 {
            let mut ind = pop.ind(slot - 6).clone();
            ind.id = 100 + slot as u64;
            pop.individuals[slot] = Some(ind);
        }
        pop.update(&[vec![6, 7, 0], vec![11, 4, 4]]);

        assert_eq!(pop.island_indexes, vec![vec![0, 1, 2], vec![3, 4, 5]]);
        let ids: Vec<u64> = (0..6).map(|i| pop.ind(i).id).collect();
        assert_eq!(ids, vec![106, 107, 0, 111, 4, 4]);
        assert!(pop.individuals[6..].iter().all(Option::is_none));
    }

    #[test]
    #[should_panic(expected = "wrong survivor count")]
    fn test_update_size_mismatch_panics() {
        let mut pop = test_population(6, 2, 3);
        pop.update(&[vec![0, 1], vec![2, 3, 4, 5]]);
    }

    #[test]
    fn test_migration_preserves_count() {
        for mig_prob in [0.0, 0.5, 1.0] {
            let mut pop = test_population(12, 3, 4);
            pop.mig_prob = mig_prob;
            let before: Vec<u64> = pop.members().map(|ind| ind.id).collect();
            let mut rng = EvoRng::new(9);
            pop.migrate(&mut rng);

            let total: usize = pop.island_indexes.iter().map(Vec::len).sum();
            assert_eq!(total, 12);
            assert!(pop.individuals[..12].iter().all(Option::is_some));
            let after: Vec<u64> = pop.members().map(|ind| ind.id).collect();
            if mig_prob == 0.0 {
                assert_eq!(before, after);
            }
            if mig_prob == 1.0 {
                // Every member now comes from another island.
                for island in 0..3 {
                    let (start, end) = pop.island_bounds(island);
                    for slot in start..end {
                        let id = pop.ind(slot).id as usize;
                        assert!(!(start..end).contains(&id));
                    }
                }
            }
        }
    }

    #[test]
    fn test_single_island_migration_is_noop() {
        let mut pop = test_population(5, 1, 5);
        pop.mig_prob = 1.0;
        let before: Vec<u64> = pop.members().map(|ind| ind.id).collect();
        pop.migrate(&mut EvoRng::new(0));
        let after: Vec<u64> = pop.members().map(|ind| ind.id).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_hall_of_fame_sorted_and_unique() {
        let mut pop = test_population(6, 2, 6);
        let values = [[1.0, 5.0], [1.0, 5.0], [2.0, 3.0], [0.5, 9.0], [3.0, 1.0], [2.0, 3.0]];
        let complexity = [5, 5, 3, 9, 1, 4];
        for slot in 0..6 {
            let ind = pop.get_mut(slot).unwrap();
            ind.fitness.set_values(values[slot].to_vec()).unwrap();
            ind.fitness.complexity = complexity[slot];
            ind.fitness.rank = if slot == 3 { 2 } else { 1 };
        }
        assert_eq!(pop.hall_of_fame(1), vec![4, 2, 5, 0]);
        assert_eq!(pop.hall_of_fame(2), vec![3]);
        assert_eq!(pop.sorted_front(1), vec![vec![2, 0], vec![4, 5]]);
    }

    #[test]
    fn test_par_for_each_island_disjoint() {
        let mut pop = test_population(9, 3, 7);
        let seen = pop.par_for_each_island(|island, members| {
            let mut slots = Vec::new();
            for (idx, ind) in members {
                ind.id = 1000 + island as u64;
                slots.push(idx);
            }
            slots
        });
        assert_eq!(seen, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8]]);
        assert_eq!(pop.ind(4).id, 1001);
    }

    #[test]
    #[should_panic(expected = "claimed by two islands")]
    fn test_par_for_each_island_overlap_panics() {
        let mut pop = test_population(4, 2, 8);
        pop.island_indexes[1].push(0);
        pop.par_for_each_island(|_, _| ());
    }

    #[test]
    fn test_init_from_with_offspring() {
        let pop = test_population(4, 2, 9);
        let inds: Vec<Individual> = pop.members().cloned().collect();
        let params = Parameters {
            pop_size: 4,
            num_islands: 2,
            ..Default::default()
        };
        let mut doubled = inds.clone();
        doubled.extend(inds.clone());
        let restarted = Population::init_from(doubled, &params).unwrap();
        assert_eq!(restarted.island_indexes, vec![vec![0, 1, 4, 5], vec![2, 3, 6, 7]]);

        assert!(matches!(
            Population::init_from(inds[..3].to_vec(), &params),
            Err(PopulationError::WrongCount { got: 3, .. })
        ));
    }

    #[test]
    fn test_drop_offspring() {
        let mut pop = test_population(4, 2, 11);
        for island in 0..2 {
            pop.add_offspring_indexes(island);
        }
        pop.individuals[5] = pop.individuals[0].clone();
        pop.drop_offspring();
        assert_eq!(pop.island_indexes, vec![vec![0, 1], vec![2, 3]]);
        assert!(pop.individuals[4..].iter().all(Option::is_none));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pop.json");
        let mut pop = test_population(6, 3, 10);
        pop.mig_prob = 0.25;
        pop.save(&path).unwrap();

        let loaded = Population::load(&path).unwrap();
        assert_eq!(loaded.pop_size, 6);
        assert_eq!(loaded.num_islands, 3);
        assert_eq!(loaded.mig_prob, 0.25);
        assert_eq!(loaded.island_indexes, pop.island_indexes);
        for slot in 0..6 {
            assert_eq!(loaded.ind(slot).program, pop.ind(slot).program);
        }
    }

    #[test]
    fn test_load_rejects_bad_island_slots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pop.json");
        let pop = test_population(6, 2, 11);

        for bad in [vec![0, 1, 12], vec![0, 1, 1], vec![0, 1, 7]] {
            let mut edited = pop.clone();
            edited.island_indexes[0] = bad;
            edited.save(&path).unwrap();
            assert!(matches!(Population::load(&path), Err(PopulationError::Corrupt)));
        }
    }
}
