//! NSGA-II: Pareto ranks, crowding distance and tournaments.

use std::collections::HashMap;

use crate::compute::evolution::fitness::{Dominance, Fitness};
use crate::compute::evolution::population::Population;
use crate::compute::evolution::rng::EvoRng;
use crate::schema::Parameters;

/// Result of a fast non-dominated sort over a pool of slots.
///
/// Nothing is written to the population until `apply` is called, so the
/// sort itself only needs shared access.
#[derive(Debug, Clone, Default)]
pub struct NonDominatedSort {
    /// Slot indices per front, best front first, each in ascending order.
    pub fronts: Vec<Vec<usize>>,
    /// `(slot, dcounter, dominated slots)` for every slot of the pool.
    counts: Vec<(usize, usize, Vec<usize>)>,
}

impl NonDominatedSort {
    /// Rank of the front holding `slot`, starting at 1.
    pub fn rank_of(&self, slot: usize) -> Option<usize> {
        self.fronts
            .iter()
            .position(|front| front.contains(&slot))
            .map(|i| i + 1)
    }

    /// Write ranks and domination bookkeeping into the individuals.
    pub fn apply(&self, pop: &mut Population) {
        for (rank, front) in self.fronts.iter().enumerate() {
            for &slot in front {
                if let Some(ind) = pop.get_mut(slot) {
                    ind.fitness.rank = rank + 1;
                }
            }
        }
        for (slot, dcounter, dominated) in &self.counts {
            if let Some(ind) = pop.get_mut(*slot) {
                ind.fitness.dcounter = *dcounter;
                ind.fitness.dominated = dominated.clone();
            }
        }
    }
}

/// Sort the filled slots of `pool` into Pareto fronts.
pub fn fast_nds(pop: &Population, pool: &[usize]) -> NonDominatedSort {
    let pool: Vec<usize> = pool.iter().copied().filter(|&s| pop.get(s).is_some()).collect();
    let n = pool.len();
    let mut dominated: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut dcounter = vec![0usize; n];

    for i in 0..n {
        let fi = &pop.ind(pool[i]).fitness;
        for j in (i + 1)..n {
            match fi.dominates(&pop.ind(pool[j]).fitness) {
                Dominance::Dominates => {
                    dominated[i].push(j);
                    dcounter[j] += 1;
                }
                Dominance::Dominated => {
                    dominated[j].push(i);
                    dcounter[i] += 1;
                }
                Dominance::NonDominated => {}
            }
        }
    }

    let counts: Vec<(usize, usize, Vec<usize>)> = (0..n)
        .map(|i| {
            let mut slots: Vec<usize> = dominated[i].iter().map(|&j| pool[j]).collect();
            slots.sort_unstable();
            (pool[i], dcounter[i], slots)
        })
        .collect();

    let mut remaining = dcounter;
    let mut current: Vec<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
    let mut fronts = Vec::new();
    while !current.is_empty() {
        let mut next = Vec::new();
        for &i in &current {
            for &j in &dominated[i] {
                remaining[j] -= 1;
                if remaining[j] == 0 {
                    next.push(j);
                }
            }
        }
        let mut front: Vec<usize> = current.iter().map(|&i| pool[i]).collect();
        front.sort_unstable();
        fronts.push(front);
        current = next;
    }

    NonDominatedSort { fronts, counts }
}

/// Crowding distance of every slot in `front`, in front order.
///
/// Boundary individuals of each objective get `f32::MAX`; interior ones
/// accumulate the gap between their neighbours, normalised by the
/// objective's range over the front.
pub fn crowding_values(pop: &Population, front: &[usize]) -> Vec<f32> {
    let n = front.len();
    if n == 0 {
        return Vec::new();
    }
    let mut crowd = vec![0.0f32; n];
    let n_obj = pop.ind(front[0]).fitness.wvalues.len();
    let value = |k: usize, m: usize| pop.ind(front[k]).fitness.wvalues[m];

    for m in 0..n_obj {
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| value(a, m).total_cmp(&value(b, m)));

        crowd[order[0]] = f32::MAX;
        crowd[order[n - 1]] = f32::MAX;

        let range = value(order[n - 1], m) - value(order[0], m);
        if !(range > 0.0) {
            continue;
        }
        for k in 1..n.saturating_sub(1) {
            let i = order[k];
            if crowd[i] != f32::MAX {
                crowd[i] += (value(order[k + 1], m) - value(order[k - 1], m)) / range;
            }
        }
    }
    crowd
}

/// Write the crowding distance of every slot in `front`.
pub fn crowding_distance(pop: &mut Population, front: &[usize]) {
    let crowd = crowding_values(pop, front);
    for (&slot, dist) in front.iter().zip(crowd) {
        if let Some(ind) = pop.get_mut(slot) {
            ind.fitness.crowding_dist = dist;
        }
    }
}

/// Dominance first, then the larger crowding distance; a full tie keeps
/// the first contestant. Returns `true` when the first one wins.
fn first_wins(fi: &Fitness, fj: &Fitness, crowd_i: f32, crowd_j: f32) -> bool {
    match fi.dominates(fj) {
        Dominance::Dominates => true,
        Dominance::Dominated => false,
        Dominance::NonDominated => crowd_j <= crowd_i,
    }
}

/// Winner of a binary tournament on the stored crowding distances.
pub fn tournament(pop: &Population, i: usize, j: usize) -> usize {
    let fi = &pop.ind(i).fitness;
    let fj = &pop.ind(j).fitness;
    if first_wins(fi, fj, fi.crowding_dist, fj.crowding_dist) {
        i
    } else {
        j
    }
}

/// Parents for one island.
///
/// The first generation keeps the island as is. Afterwards the island is
/// ranked on its own and every parent wins a tournament between two
/// uniform picks. The ranking is local to the call; the population is not
/// written.
pub fn select(pop: &Population, island: usize, params: &Parameters, rng: &mut EvoRng) -> Vec<usize> {
    let pool = pop.island(island);
    if params.current_gen == 0 {
        return pool.to_vec();
    }

    let sort = fast_nds(pop, pool);
    let mut crowd: HashMap<usize, f32> = HashMap::with_capacity(pool.len());
    for front in &sort.fronts {
        crowd.extend(front.iter().copied().zip(crowding_values(pop, front)));
    }
    let crowd_of = |slot: usize| crowd.get(&slot).copied().unwrap_or(0.0);

    (0..pool.len())
        .map(|_| {
            let a = pool[rng.below(pool.len())];
            let b = pool[rng.below(pool.len())];
            if first_wins(&pop.ind(a).fitness, &pop.ind(b).fitness, crowd_of(a), crowd_of(b)) {
                a
            } else {
                b
            }
        })
        .collect()
}

/// `pop_size` survivors from the union of all islands, front by front.
///
/// The first front that does not fit whole is cut by crowding distance.
pub fn survive(pop: &mut Population, pop_size: usize) -> Vec<usize> {
    let pool: Vec<usize> = pop.island_indexes.iter().flatten().copied().collect();
    let sort = fast_nds(pop, &pool);
    sort.apply(pop);

    let mut survivors: Vec<usize> = Vec::with_capacity(pop_size);
    for front in &sort.fronts {
        crowding_distance(pop, front);
        if survivors.len() + front.len() <= pop_size {
            survivors.extend_from_slice(front);
            if survivors.len() == pop_size {
                break;
            }
            continue;
        }

        let mut overflow = front.clone();
        overflow.sort_by(|&a, &b| {
            let fa = &pop.ind(a).fitness;
            let fb = &pop.ind(b).fitness;
            fa.rank
                .cmp(&fb.rank)
                .then(fb.crowding_dist.total_cmp(&fa.crowding_dist))
        });
        overflow.truncate(pop_size - survivors.len());
        survivors.extend(overflow);
        break;
    }
    survivors
}
