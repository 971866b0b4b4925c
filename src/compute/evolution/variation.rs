//! Offspring production: six tree mutations and subtree crossover.
//!
//! Every operator works on a copy of the parent program and is retried up to
//! `ATTEMPTS` times; a child is only accepted within `max_size` and
//! `max_depth`. When all attempts fail the offspring slot gets a fresh random
//! individual instead, so variation never leaves a slot empty.

use std::collections::BTreeMap;

use super::bandit::Bandit;
use super::fitness::Fitness;
use super::individual::{Individual, VariationOp};
use super::population::Population;
use super::rng::EvoRng;
use crate::compute::node::{DataType, Node};
use crate::compute::program::Program;
use crate::compute::search_space::{SearchSpace, SearchSpaceError};
use crate::compute::tree::Tree;
use crate::schema::{MutationKind, Parameters};

const ATTEMPTS: usize = 3;

/// A tree mutation.
pub trait MutationOp: Sync {
    fn kind(&self) -> MutationKind;

    /// Weight of every node as mutation spot. All zero means the mutation
    /// does not apply to this program.
    fn find_spots(&self, program: &Program, ss: &SearchSpace, params: &Parameters) -> Vec<f32>;

    /// Mutate in place at `spot`. Nodes drawn from the search space are
    /// pushed to `sampled`. Returns `false` when nothing could be drawn.
    fn apply(
        &self,
        program: &mut Program,
        spot: usize,
        ss: &SearchSpace,
        params: &Parameters,
        rng: &mut EvoRng,
        sampled: &mut Vec<Node>,
    ) -> bool;
}

/// Spot weights with every node allowed, or none once the program is full.
fn spots_below_max_size(program: &Program, params: &Parameters, viable: impl Fn(usize, &Node) -> bool) -> Vec<f32> {
    let full = program.size() >= params.max_size;
    program
        .tree
        .nodes()
        .iter()
        .enumerate()
        .map(|(i, node)| if !full && viable(i, node) { node.prob_change } else { 0.0 })
        .collect()
}

fn any_terminal(ss: &SearchSpace, ty: DataType, rng: &mut EvoRng) -> Option<Node> {
    ss.sample_terminal(ty, false, rng)
        .or_else(|| ss.sample_terminal(ty, true, rng))
}

/// Replace a node with another of the same signature.
pub struct PointMutation;

impl MutationOp for PointMutation {
    fn kind(&self) -> MutationKind {
        MutationKind::Point
    }

    fn find_spots(&self, program: &Program, ss: &SearchSpace, _params: &Parameters) -> Vec<f32> {
        program
            .tree
            .nodes()
            .iter()
            .map(|node| if ss.has_node_like(node) { node.prob_change } else { 0.0 })
            .collect()
    }

    fn apply(
        &self,
        program: &mut Program,
        spot: usize,
        ss: &SearchSpace,
        _params: &Parameters,
        rng: &mut EvoRng,
        sampled: &mut Vec<Node>,
    ) -> bool {
        let Some(node) = ss.get_node_like(program.tree.node(spot), rng) else {
            return false;
        };
        sampled.push(node.clone());
        program.tree.replace_node(spot, node);
        true
    }
}

/// Put a new operator above a node; its other arguments are terminals.
pub struct InsertMutation;

impl MutationOp for InsertMutation {
    fn kind(&self) -> MutationKind {
        MutationKind::Insert
    }

    fn find_spots(&self, program: &Program, ss: &SearchSpace, params: &Parameters) -> Vec<f32> {
        let tree = &program.tree;
        spots_below_max_size(program, params, |i, node| {
            ss.has_op(node.ret_type) && tree.depth_to_reach(i) + tree.depth_at(i) < params.max_depth
        })
    }

    fn apply(
        &self,
        program: &mut Program,
        spot: usize,
        ss: &SearchSpace,
        params: &Parameters,
        rng: &mut EvoRng,
        sampled: &mut Vec<Node>,
    ) -> bool {
        let max_args = params.max_size.saturating_sub(program.size() + 1);
        if max_args == 0 {
            return false;
        }
        let ty = program.tree.node(spot).ret_type;
        let Some(op) = ss.sample_op_with_arg(ty, ty, true, max_args, rng) else {
            return false;
        };
        let slots: Vec<usize> = op
            .arg_types()
            .iter()
            .enumerate()
            .filter(|(_, arg)| **arg == ty)
            .map(|(k, _)| k)
            .collect();
        let Some(&slot) = rng.choose(&slots) else {
            return false;
        };

        let mut others = Vec::with_capacity(op.arity().saturating_sub(1));
        for (k, arg) in op.arg_types().iter().enumerate() {
            if k == slot {
                continue;
            }
            let Some(terminal) = any_terminal(ss, *arg, rng) else {
                return false;
            };
            sampled.push(terminal.clone());
            others.push(Tree::leaf(terminal));
        }
        sampled.push(op.clone());
        program.tree.wrap(spot, op, slot, others);
        true
    }
}

/// Replace a subtree with a single terminal.
pub struct DeleteMutation;

impl MutationOp for DeleteMutation {
    fn kind(&self) -> MutationKind {
        MutationKind::Delete
    }

    fn find_spots(&self, program: &Program, ss: &SearchSpace, _params: &Parameters) -> Vec<f32> {
        program
            .tree
            .nodes()
            .iter()
            .map(|node| if ss.has_terminal(node.ret_type) { node.prob_change } else { 0.0 })
            .collect()
    }

    fn apply(
        &self,
        program: &mut Program,
        spot: usize,
        ss: &SearchSpace,
        _params: &Parameters,
        rng: &mut EvoRng,
        sampled: &mut Vec<Node>,
    ) -> bool {
        let ty = program.tree.node(spot).ret_type;
        let Some(terminal) = any_terminal(ss, ty, rng) else {
            return false;
        };
        sampled.push(terminal.clone());
        program
            .tree
            .replace_subtree(spot, Tree::leaf(terminal));
        true
    }
}

/// Regrow the subtree below a node.
pub struct SubtreeMutation;

impl MutationOp for SubtreeMutation {
    fn kind(&self) -> MutationKind {
        MutationKind::Subtree
    }

    fn find_spots(&self, program: &Program, _ss: &SearchSpace, params: &Parameters) -> Vec<f32> {
        spots_below_max_size(program, params, |_, _| true)
    }

    fn apply(
        &self,
        program: &mut Program,
        spot: usize,
        ss: &SearchSpace,
        params: &Parameters,
        rng: &mut EvoRng,
        sampled: &mut Vec<Node>,
    ) -> bool {
        let tree = &program.tree;
        let rest = tree.size() - tree.size_at(spot);
        let reach = tree.depth_to_reach(spot);
        if params.max_size <= rest || params.max_depth <= reach {
            return false;
        }
        let max_d = params.max_depth - reach;
        let max_size = rng.rnd_int(1, params.max_size - rest);
        let Some(subtree) = ss.sample_subtree(tree.node(spot), max_d, max_size, rng) else {
            return false;
        };
        sampled.extend(subtree.nodes().iter().cloned());
        program.tree.replace_subtree(spot, subtree);
        true
    }
}

/// Switch on the weight of an unweighted node.
pub struct ToggleWeightOnMutation;

impl MutationOp for ToggleWeightOnMutation {
    fn kind(&self) -> MutationKind {
        MutationKind::ToggleWeightOn
    }

    fn find_spots(&self, program: &Program, _ss: &SearchSpace, params: &Parameters) -> Vec<f32> {
        spots_below_max_size(program, params, |_, node| {
            node.can_toggle_weight() && !node.is_weighted
        })
    }

    fn apply(
        &self,
        program: &mut Program,
        spot: usize,
        _ss: &SearchSpace,
        _params: &Parameters,
        _rng: &mut EvoRng,
        _sampled: &mut Vec<Node>,
    ) -> bool {
        let node = program.tree.node_mut(spot);
        node.is_weighted = true;
        node.weight = 1.0;
        true
    }
}

/// Switch off the weight of a weighted node.
pub struct ToggleWeightOffMutation;

impl MutationOp for ToggleWeightOffMutation {
    fn kind(&self) -> MutationKind {
        MutationKind::ToggleWeightOff
    }

    fn find_spots(&self, program: &Program, _ss: &SearchSpace, _params: &Parameters) -> Vec<f32> {
        program
            .tree
            .nodes()
            .iter()
            .map(|node| {
                if node.can_toggle_weight() && node.is_weighted {
                    node.prob_change
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn apply(
        &self,
        program: &mut Program,
        spot: usize,
        _ss: &SearchSpace,
        _params: &Parameters,
        _rng: &mut EvoRng,
        _sampled: &mut Vec<Node>,
    ) -> bool {
        let node = program.tree.node_mut(spot);
        node.is_weighted = false;
        node.weight = 1.0;
        true
    }
}

pub fn mutation_op(kind: MutationKind) -> &'static dyn MutationOp {
    match kind {
        MutationKind::Point => &PointMutation,
        MutationKind::Insert => &InsertMutation,
        MutationKind::Delete => &DeleteMutation,
        MutationKind::Subtree => &SubtreeMutation,
        MutationKind::ToggleWeightOn => &ToggleWeightOnMutation,
        MutationKind::ToggleWeightOff => &ToggleWeightOffMutation,
    }
}

fn within_limits(program: &Program, params: &Parameters) -> bool {
    program.size() <= params.max_size && program.depth() <= params.max_depth
}

/// Unevaluated child carrying the objectives of `mom`.
fn offspring(mom: &Individual, program: Program, variation: Option<VariationOp>) -> Individual {
    let mut child = Individual::from_program(program);
    child.variation = variation;
    child.objectives = mom.objectives.clone();
    child.fitness = Fitness::new(mom.fitness.weights.clone());
    child
}

/// 1 when the child is at least as good as its parent on every objective.
pub fn reward(child: &Individual, linear_complexity: bool) -> f32 {
    let f = &child.fitness;
    let improved = child.objectives.iter().enumerate().all(|(i, name)| {
        let (Some(value), Some(weight)) = (f.values.get(i), f.weights.get(i)) else {
            return false;
        };
        let previous = match name.as_str() {
            "complexity" if linear_complexity => f.prev_linear_complexity as f32,
            "complexity" => f.prev_complexity as f32,
            "linear_complexity" => f.prev_linear_complexity as f32,
            "size" => f.prev_size as f32,
            "depth" => f.prev_depth as f32,
            _ => f.prev_loss,
        };
        (value - previous) * weight >= 0.0
    });
    if improved { 1.0 } else { 0.0 }
}

/// Rewards of the offspring of one island, as `(slot, reward)`.
pub fn calculate_rewards(pop: &Population, island: usize, linear_complexity: bool) -> Vec<(usize, f32)> {
    pop.island(island)
        .iter()
        .filter(|&&slot| slot >= pop.pop_size)
        .filter_map(|&slot| pop.get(slot).map(|ind| (slot, ind)))
        .filter(|(_, ind)| ind.variation.is_some() && ind.fitness.valid())
        .map(|(slot, ind)| (slot, reward(ind, linear_complexity)))
        .collect()
}

/// Variation operators with their search space and bandits.
#[derive(Debug, Clone)]
pub struct Variation {
    search_space: SearchSpace,
    variation_bandit: Bandit<VariationOp>,
    terminal_bandits: BTreeMap<DataType, Bandit<String>>,
}

impl Variation {
    pub fn new(params: &Parameters, search_space: SearchSpace) -> Self {
        let mut arms: BTreeMap<VariationOp, f32> = BTreeMap::new();
        arms.insert(VariationOp::Crossover, params.cx_prob);
        for kind in MutationKind::ALL {
            arms.insert(VariationOp::Mutation(kind), params.mutation_prob(kind));
        }
        let variation_bandit = Bandit::new(params.bandit, arms);

        let terminal_bandits = search_space
            .terminal_types()
            .into_iter()
            .map(|ty| {
                let arms = search_space
                    .terminal_labels(ty)
                    .into_iter()
                    .map(|label| {
                        let weight = search_space.terminal_weight(ty, &label).unwrap_or(0.0);
                        (label, weight)
                    })
                    .collect();
                (ty, Bandit::new(params.bandit, arms))
            })
            .collect();

        Self {
            search_space,
            variation_bandit,
            terminal_bandits,
        }
    }

    pub fn search_space(&self) -> &SearchSpace {
        &self.search_space
    }

    /// Current crossover probability.
    pub fn cx_prob(&self) -> f32 {
        self.variation_bandit
            .probs()
            .get(&VariationOp::Crossover)
            .copied()
            .unwrap_or(0.0)
    }

    /// Current relative weight of each mutation.
    pub fn mutation_probs(&self) -> BTreeMap<MutationKind, f32> {
        self.variation_bandit
            .probs()
            .iter()
            .filter_map(|(op, p)| match op {
                VariationOp::Mutation(kind) => Some((*kind, *p)),
                VariationOp::Crossover => None,
            })
            .collect()
    }

    /// Mutated copy of `parent`, or `None` after `ATTEMPTS` failures.
    pub fn mutate(&self, parent: &Individual, params: &Parameters, rng: &mut EvoRng) -> Option<Individual> {
        let probs = self.mutation_probs();
        if probs.values().all(|p| *p <= 0.0) {
            return None;
        }

        for _ in 0..ATTEMPTS {
            let kind = rng.random_choice(&probs)?;
            let op = mutation_op(kind);
            let weights = op.find_spots(&parent.program, &self.search_space, params);
            let Some(spot) = rng.weighted_index(&weights) else {
                continue;
            };

            let mut program = parent.program.clone();
            let mut sampled = Vec::new();
            if !op.apply(&mut program, spot, &self.search_space, params, rng, &mut sampled) {
                continue;
            }
            if within_limits(&program, params) {
                let mut child = offspring(parent, program, Some(VariationOp::Mutation(op.kind())));
                child.sampled_nodes = sampled;
                return Some(child);
            }
        }
        None
    }

    /// Child of `mom` with one subtree replaced by a compatible subtree of
    /// `dad`. Neither parent is modified.
    pub fn cross(
        &self,
        mom: &Individual,
        dad: &Individual,
        params: &Parameters,
        rng: &mut EvoRng,
    ) -> Option<Individual> {
        let tree = &mom.program.tree;
        let size = tree.size();
        let depths = tree.depths();
        let weights: Vec<f32> = tree
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, node)| {
                if tree.size_at(i) < params.max_size && depths[i] < params.max_depth {
                    node.prob_change
                } else {
                    0.0
                }
            })
            .collect();
        if weights.iter().all(|w| *w <= 0.0) {
            return None;
        }

        let other = &dad.program.tree;
        for _ in 0..ATTEMPTS {
            let spot = rng.weighted_index(&weights)?;
            let ty = tree.node(spot).ret_type;
            let allowed_size = params.max_size.saturating_sub(size - tree.size_at(spot));
            let allowed_depth = params.max_depth - depths[spot];

            let dad_weights: Vec<f32> = other
                .nodes()
                .iter()
                .enumerate()
                .map(|(j, node)| {
                    if node.ret_type == ty
                        && other.size_at(j) <= allowed_size
                        && other.depth_at(j) <= allowed_depth
                    {
                        node.prob_change
                    } else {
                        0.0
                    }
                })
                .collect();
            let Some(graft) = rng.weighted_index(&dad_weights) else {
                continue;
            };

            let mut program = mom.program.clone();
            program.tree.replace_subtree(spot, other.subtree(graft));
            if within_limits(&program, params) {
                let mut child = offspring(mom, program, Some(VariationOp::Crossover));
                child.parent_id = vec![mom.id, dad.id];
                return Some(child);
            }
        }
        None
    }

    /// Offspring for the empty offspring slots of one island.
    ///
    /// Returns `(slot, child)` pairs; children are unfitted and remember
    /// their mother's measurements for reward computation.
    pub fn vary(
        &self,
        pop: &Population,
        island: usize,
        parents: &[usize],
        params: &Parameters,
        rng: &mut EvoRng,
    ) -> Result<Vec<(usize, Individual)>, VariationError> {
        if parents.is_empty() {
            return Err(VariationError::NoParents(island));
        }
        let cx_prob = self.cx_prob();
        let slots: Vec<usize> = pop
            .island(island)
            .iter()
            .copied()
            .filter(|&slot| slot >= pop.pop_size && pop.get(slot).is_none())
            .collect();

        let mut children = Vec::with_capacity(slots.len());
        for slot in slots {
            let mom = pop.ind(parents[rng.below(parents.len())]);
            let child = if rng.flip(cx_prob) {
                let dad = pop.ind(parents[rng.below(parents.len())]);
                self.cross(mom, dad, params, rng)
            } else {
                self.mutate(mom, params, rng)
            };

            let mut child = match child {
                Some(child) => child,
                None => {
                    let program = self.search_space.make_program(params, 0, 0, rng)?;
                    offspring(mom, program, None)
                }
            };
            child.unfit();
            child.fitness.set_previous(&mom.fitness);
            if child.parent_id.is_empty() {
                child.parent_id = vec![mom.id];
            }
            child.id = (params.current_gen * params.pop_size + slot) as u64;
            children.push((slot, child));
        }
        Ok(children)
    }

    /// Feed offspring rewards to the bandits and push the new terminal
    /// probabilities into the search space.
    pub fn update_ss(&mut self, pop: &Population, linear_complexity: bool, rng: &mut EvoRng) {
        let mut pulls = 0usize;
        let mut total = 0.0f32;
        for island in 0..pop.num_islands {
            for (slot, r) in calculate_rewards(pop, island, linear_complexity) {
                let ind = pop.ind(slot);
                let Some(op) = ind.variation else { continue };
                self.variation_bandit.update(&op, r);
                for node in ind.sampled_nodes.iter().filter(|n| n.is_terminal()) {
                    if let Some(bandit) = self.terminal_bandits.get_mut(&node.ret_type) {
                        bandit.update(&node.label().to_string(), r);
                    }
                }
                pulls += 1;
                total += r;
            }
        }
        if pulls > 0 {
            log::debug!("variation rewards: {total}/{pulls}");
        }

        self.variation_bandit.sample_probs(true, rng);
        for (ty, bandit) in self.terminal_bandits.iter_mut() {
            for (label, weight) in bandit.sample_probs(true, rng) {
                self.search_space.set_terminal_weight(*ty, &label, weight);
            }
        }
    }
}

/// Variation errors.
#[derive(Debug, thiserror::Error)]
pub enum VariationError {
    #[error("Island {0} has no parents")]
    NoParents(usize),
    #[error(transparent)]
    SearchSpace(#[from] SearchSpaceError),
}
