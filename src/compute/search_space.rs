//! Catalog of operators and terminals, and random tree construction.
//!
//! Operators and terminals are grouped by return type, each with a parallel
//! vector of sampling weights. All sampling methods return `None` when the
//! candidate set for a request is empty or has no positive weight; callers
//! decide how to fall back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::dataset::Dataset;
use super::evolution::EvoRng;
use super::node::{DataType, Node, NodeKind};
use super::program::Program;
use super::tree::Tree;
use crate::schema::{Parameters, ProgramType};

/// Operators and terminals available to programs, with sampling weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSpace {
    node_map: BTreeMap<DataType, Vec<Node>>,
    node_map_weights: BTreeMap<DataType, Vec<f32>>,
    terminal_map: BTreeMap<DataType, Vec<Node>>,
    terminal_weights: BTreeMap<DataType, Vec<f32>>,
}

impl SearchSpace {
    /// Build the space for a dataset.
    ///
    /// `functions` maps operator names to sampling weights; an empty map
    /// enables every operator with unit weight. Operators needing an argument
    /// type with no terminal are left out.
    pub fn new(data: &Dataset, functions: &BTreeMap<String, f32>) -> Result<Self, SearchSpaceError> {
        let mut terminal_map: BTreeMap<DataType, Vec<Node>> = BTreeMap::new();
        for (name, ty) in data.feature_types() {
            terminal_map
                .entry(ty)
                .or_default()
                .push(Node::feature(name, ty));
        }
        if !terminal_map.contains_key(&DataType::Float) {
            return Err(SearchSpaceError::NoTerminal(DataType::Float));
        }
        terminal_map
            .entry(DataType::Float)
            .or_default()
            .push(Node::constant(1.0));

        let mut ops: Vec<(NodeKind, f32)> = if functions.is_empty() {
            NodeKind::OPERATORS.iter().map(|kind| (*kind, 1.0)).collect()
        } else {
            functions
                .iter()
                .map(|(name, weight)| {
                    NodeKind::from_name(name)
                        .map(|kind| (kind, *weight))
                        .ok_or_else(|| SearchSpaceError::UnknownFunction(name.clone()))
                })
                .collect::<Result<_, _>>()?
        };
        // Classifier roots are offset sums, so the operator must exist even
        // when it is never sampled.
        if data.is_classification() && !ops.iter().any(|(k, _)| *k == NodeKind::OffsetSum) {
            ops.push((NodeKind::OffsetSum, 0.0));
        }

        let mut node_map: BTreeMap<DataType, Vec<Node>> = BTreeMap::new();
        let mut node_map_weights: BTreeMap<DataType, Vec<f32>> = BTreeMap::new();
        for (kind, weight) in ops {
            if !kind.arg_types().iter().all(|ty| terminal_map.contains_key(ty)) {
                log::debug!("dropping {}: no terminal for its arguments", kind.name());
                continue;
            }
            let node = Node::op(kind);
            node_map_weights
                .entry(node.ret_type)
                .or_default()
                .push(weight.max(0.0));
            node_map.entry(node.ret_type).or_default().push(node);
        }

        let terminal_weights = terminal_map
            .iter()
            .map(|(ty, nodes)| (*ty, nodes.iter().map(|n| n.prob_change).collect()))
            .collect();

        Ok(Self {
            node_map,
            node_map_weights,
            terminal_map,
            terminal_weights,
        })
    }

    /// Whether any terminal of type `ty` exists.
    pub fn has_terminal(&self, ty: DataType) -> bool {
        self.terminal_map.get(&ty).is_some_and(|t| !t.is_empty())
    }

    /// Whether some operator returning `ty` has positive weight.
    pub fn has_op(&self, ty: DataType) -> bool {
        self.node_map_weights
            .get(&ty)
            .is_some_and(|w| w.iter().any(|w| *w > 0.0))
    }

    /// Terminal labels of one type, in weight order.
    pub fn terminal_labels(&self, ty: DataType) -> Vec<String> {
        self.terminal_map
            .get(&ty)
            .map(|nodes| nodes.iter().map(|n| n.label().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn terminal_types(&self) -> Vec<DataType> {
        self.terminal_map.keys().copied().collect()
    }

    /// Set the sampling weight of the terminal labelled `label`.
    pub fn set_terminal_weight(&mut self, ty: DataType, label: &str, weight: f32) {
        let (Some(nodes), Some(weights)) =
            (self.terminal_map.get(&ty), self.terminal_weights.get_mut(&ty))
        else {
            return;
        };
        if let Some(i) = nodes.iter().position(|n| n.label() == label) {
            weights[i] = weight;
        }
    }

    pub fn terminal_weight(&self, ty: DataType, label: &str) -> Option<f32> {
        let nodes = self.terminal_map.get(&ty)?;
        let i = nodes.iter().position(|n| n.label() == label)?;
        self.terminal_weights.get(&ty).map(|w| w[i])
    }

    /// Draw a terminal of type `ty`.
    ///
    /// With `force` the draw ignores the weights and is uniform, so it only
    /// fails when no terminal of that type exists.
    pub fn sample_terminal(&self, ty: DataType, force: bool, rng: &mut EvoRng) -> Option<Node> {
        let nodes = self.terminal_map.get(&ty)?;
        let idx = if force {
            (!nodes.is_empty()).then(|| rng.below(nodes.len()))?
        } else {
            rng.weighted_index(self.terminal_weights.get(&ty)?)?
        };
        let mut node = nodes[idx].clone();
        if node.kind == NodeKind::Constant {
            node.weight = rng.normal();
        }
        Some(node)
    }

    /// Draw any operator returning `ty`.
    pub fn sample_op(&self, ty: DataType, rng: &mut EvoRng) -> Option<Node> {
        let nodes = self.node_map.get(&ty)?;
        let idx = rng.weighted_index(self.node_map_weights.get(&ty)?)?;
        Some(nodes[idx].clone())
    }

    /// Draw an operator returning `ret` that takes at least one `arg`.
    ///
    /// With `terminal_compatible`, every other argument type must have a
    /// terminal. A non-zero `max_args` bounds the operator arity.
    pub fn sample_op_with_arg(
        &self,
        ret: DataType,
        arg: DataType,
        terminal_compatible: bool,
        max_args: usize,
        rng: &mut EvoRng,
    ) -> Option<Node> {
        let nodes = self.node_map.get(&ret)?;
        let weights = self.node_map_weights.get(&ret)?;
        let masked: Vec<f32> = nodes
            .iter()
            .zip(weights)
            .map(|(node, w)| {
                let args = node.arg_types();
                let fits = args.contains(&arg)
                    && (max_args == 0 || args.len() <= max_args)
                    && (!terminal_compatible
                        || args
                            .iter()
                            .all(|ty| *ty == arg || self.has_terminal(*ty)));
                if fits { *w } else { 0.0 }
            })
            .collect();
        let idx = rng.weighted_index(&masked)?;
        Some(nodes[idx].clone())
    }

    /// Candidates sharing the signature of `node`, with their weights.
    fn like_weights(&self, node: &Node) -> Vec<f32> {
        let (Some(nodes), Some(weights)) = (
            self.node_map.get(&node.ret_type),
            self.node_map_weights.get(&node.ret_type),
        ) else {
            return Vec::new();
        };
        nodes
            .iter()
            .zip(weights)
            .map(|(n, w)| if n.same_signature(node) { *w } else { 0.0 })
            .collect()
    }

    /// Whether `get_node_like` can succeed for `node`.
    pub fn has_node_like(&self, node: &Node) -> bool {
        if node.is_terminal() {
            return self
                .terminal_weights
                .get(&node.ret_type)
                .is_some_and(|w| w.iter().any(|w| *w > 0.0));
        }
        self.like_weights(node).iter().any(|w| *w > 0.0)
    }

    /// Draw a node with the same return and argument types as `node`.
    pub fn get_node_like(&self, node: &Node, rng: &mut EvoRng) -> Option<Node> {
        if node.is_terminal() {
            return self.sample_terminal(node.ret_type, false, rng);
        }
        let idx = rng.weighted_index(&self.like_weights(node))?;
        self.node_map
            .get(&node.ret_type)
            .map(|nodes| nodes[idx].clone())
    }

    /// Grow a fresh subtree returning the same type as `root`.
    ///
    /// The new root is an operator when the limits allow one, otherwise a
    /// terminal. Returns `None` when no terminal of that type has weight.
    pub fn sample_subtree(
        &self,
        root: &Node,
        max_d: usize,
        max_size: usize,
        rng: &mut EvoRng,
    ) -> Option<Tree> {
        let ty = root.ret_type;
        let has_terminals = self
            .terminal_weights
            .get(&ty)
            .is_some_and(|w| w.iter().any(|w| *w > 0.0));
        if !has_terminals {
            return None;
        }
        let new_root = if max_d > 1 && max_size > 1 {
            self.sample_op(ty, rng)
        } else {
            None
        };
        match new_root {
            Some(op) => self.ptc2(op, max_d, max_size, rng),
            None => self.sample_terminal(ty, false, rng).map(Tree::leaf),
        }
    }

    /// Probabilistic tree creation (PTC2) below a fixed root.
    ///
    /// Open argument slots are filled in random order. A slot gets an
    /// operator while both the depth and size budgets allow it, otherwise a
    /// terminal. Size counts weights, so the result may overshoot
    /// `max_size` by the arity of the last operator placed.
    fn ptc2(&self, root: Node, max_d: usize, max_size: usize, rng: &mut EvoRng) -> Option<Tree> {
        struct Slot {
            node: Option<Node>,
            children: Vec<usize>,
        }

        let mut size = root.size();
        let mut arena = vec![Slot {
            node: None,
            children: Vec::new(),
        }];
        let mut queue: Vec<(usize, DataType, usize)> = Vec::new();

        let place = |arena: &mut Vec<Slot>,
                         queue: &mut Vec<(usize, DataType, usize)>,
                         slot: usize,
                         node: Node,
                         depth: usize| {
            for ty in node.arg_types() {
                let child = arena.len();
                arena.push(Slot {
                    node: None,
                    children: Vec::new(),
                });
                arena[slot].children.push(child);
                queue.push((child, *ty, depth + 1));
            }
            arena[slot].node = Some(node);
        };
        place(&mut arena, &mut queue, 0, root, 0);

        while !queue.is_empty() && queue.len() + size < max_size {
            let (slot, ty, depth) = queue.swap_remove(rng.below(queue.len()));
            let node = if depth + 1 >= max_d || size >= max_size {
                self.any_terminal(ty, rng)?
            } else {
                match self.sample_op(ty, rng) {
                    Some(op) => op,
                    None => self.any_terminal(ty, rng)?,
                }
            };
            size += node.size();
            place(&mut arena, &mut queue, slot, node, depth);
        }

        while !queue.is_empty() {
            let (slot, ty, depth) = queue.swap_remove(rng.below(queue.len()));
            let node = self.any_terminal(ty, rng)?;
            place(&mut arena, &mut queue, slot, node, depth);
        }

        fn flatten(arena: &mut [Slot], i: usize, out: &mut Vec<Node>) {
            if let Some(node) = arena[i].node.take() {
                out.push(node);
            }
            for child in std::mem::take(&mut arena[i].children) {
                flatten(arena, child, out);
            }
        }
        let mut nodes = Vec::with_capacity(arena.len());
        flatten(&mut arena, 0, &mut nodes);
        Some(Tree::new(nodes))
    }

    /// Weighted terminal, falling back to a uniform draw.
    fn any_terminal(&self, ty: DataType, rng: &mut EvoRng) -> Option<Node> {
        self.sample_terminal(ty, false, rng)
            .or_else(|| self.sample_terminal(ty, true, rng))
    }

    /// Random program within the parameter limits.
    ///
    /// A zero `max_d` or `max_size` is replaced by a uniform draw in
    /// `1..=params.max_depth` or `1..=params.max_size`. Classifier programs
    /// are rooted at a fixed offset sum feeding the logistic link.
    pub fn make_program(
        &self,
        params: &Parameters,
        max_d: usize,
        max_size: usize,
        rng: &mut EvoRng,
    ) -> Result<Program, SearchSpaceError> {
        let max_d = if max_d == 0 {
            rng.rnd_int(1, params.max_depth.max(1))
        } else {
            max_d
        };
        let max_size = if max_size == 0 {
            rng.rnd_int(1, params.max_size.max(1))
        } else {
            max_size
        };

        let root = match params.program_type {
            ProgramType::BinaryClassifier => {
                let mut offset = Node::op(NodeKind::OffsetSum);
                offset.prob_change = 0.0;
                Some(offset)
            }
            ProgramType::Regressor if max_size > 1 && max_d > 1 => {
                self.sample_op(DataType::Float, rng)
            }
            ProgramType::Regressor => None,
        };

        let tree = match root {
            Some(root) => self.ptc2(root, max_d.max(2), max_size, rng),
            None => self.any_terminal(DataType::Float, rng).map(Tree::leaf),
        }
        .ok_or(SearchSpaceError::NoTerminal(DataType::Float))?;

        Ok(Program::new(params.program_type, tree))
    }
}

/// Search space construction errors.
#[derive(Debug, thiserror::Error)]
pub enum SearchSpaceError {
    #[error("No terminal returns {0:?}")]
    NoTerminal(DataType),
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::dataset::Column;

    fn data(with_bool: bool) -> Dataset {
        let mut features = BTreeMap::new();
        features.insert("x0".to_string(), Column::Float(vec![0.0, 1.0, 2.0]));
        features.insert("x1".to_string(), Column::Float(vec![1.0, 0.0, 1.0]));
        if with_bool {
            features.insert("b".to_string(), Column::Bool(vec![true, false, true]));
        }
        Dataset::new(features, vec![1.0, 2.0, 3.0], false).unwrap()
    }

    #[test]
    fn test_drops_ops_without_terminals() {
        let ss = SearchSpace::new(&data(false), &BTreeMap::new()).unwrap();
        assert!(!ss.has_terminal(DataType::Bool));
        let mut rng = EvoRng::new(0);
        for _ in 0..100 {
            let op = ss.sample_op(DataType::Float, &mut rng).unwrap();
            assert!(!op.arg_types().contains(&DataType::Bool), "{:?}", op.kind);
        }
        // Comparisons return Bool but take Float, so they stay.
        assert!(ss.has_op(DataType::Bool));
    }

    #[test]
    fn test_user_functions() {
        let mut functions = BTreeMap::new();
        functions.insert("Add".to_string(), 1.0);
        functions.insert("Mul".to_string(), 0.0);
        let ss = SearchSpace::new(&data(false), &functions).unwrap();
        let mut rng = EvoRng::new(1);
        for _ in 0..20 {
            assert_eq!(ss.sample_op(DataType::Float, &mut rng).unwrap().kind, NodeKind::Add);
        }

        functions.insert("Frobnicate".to_string(), 1.0);
        assert!(matches!(
            SearchSpace::new(&data(false), &functions),
            Err(SearchSpaceError::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_sample_terminal_respects_weights() {
        let mut ss = SearchSpace::new(&data(false), &BTreeMap::new()).unwrap();
        for label in ss.terminal_labels(DataType::Float) {
            ss.set_terminal_weight(DataType::Float, &label, 0.0);
        }
        let mut rng = EvoRng::new(2);
        assert!(ss.sample_terminal(DataType::Float, false, &mut rng).is_none());
        assert!(ss.sample_terminal(DataType::Float, true, &mut rng).is_some());

        ss.set_terminal_weight(DataType::Float, "x1", 1.0);
        let node = ss.sample_terminal(DataType::Float, false, &mut rng).unwrap();
        assert_eq!(node.label(), "x1");
        assert_eq!(ss.terminal_weight(DataType::Float, "x1"), Some(1.0));
    }

    #[test]
    fn test_sample_op_with_arg() {
        let ss = SearchSpace::new(&data(true), &BTreeMap::new()).unwrap();
        let mut rng = EvoRng::new(3);
        for _ in 0..50 {
            let op = ss
                .sample_op_with_arg(DataType::Float, DataType::Bool, true, 0, &mut rng)
                .unwrap();
            assert_eq!(op.kind, NodeKind::IfThenElse);
        }
        assert!(
            ss.sample_op_with_arg(DataType::Float, DataType::Bool, true, 2, &mut rng)
                .is_none()
        );
    }

    #[test]
    fn test_get_node_like_keeps_signature() {
        let ss = SearchSpace::new(&data(true), &BTreeMap::new()).unwrap();
        let mut rng = EvoRng::new(4);
        let add = Node::op(NodeKind::Add);
        for _ in 0..50 {
            let like = ss.get_node_like(&add, &mut rng).unwrap();
            assert!(like.same_signature(&add));
        }
        let x = Node::feature("x0", DataType::Float);
        assert!(ss.get_node_like(&x, &mut rng).unwrap().is_terminal());
    }

    #[test]
    fn test_make_program_within_depth() {
        let ss = SearchSpace::new(&data(true), &BTreeMap::new()).unwrap();
        let params = Parameters {
            max_depth: 5,
            max_size: 30,
            ..Default::default()
        };
        let mut rng = EvoRng::new(5);
        for _ in 0..200 {
            let program = ss.make_program(&params, 0, 0, &mut rng).unwrap();
            assert!(program.tree.is_well_formed());
            assert!(program.depth() <= 5, "depth {}", program.depth());
            assert_eq!(program.tree.ret_type(), DataType::Float);
        }
    }

    #[test]
    fn test_make_program_single_node() {
        let ss = SearchSpace::new(&data(false), &BTreeMap::new()).unwrap();
        let params = Parameters::default();
        let mut rng = EvoRng::new(6);
        let program = ss.make_program(&params, 1, 1, &mut rng).unwrap();
        assert_eq!(program.tree.len(), 1);
    }

    #[test]
    fn test_classifier_root_is_fixed_offset() {
        let mut features = BTreeMap::new();
        features.insert("x0".to_string(), Column::Float(vec![0.0, 1.0]));
        let data = Dataset::new(features, vec![0.0, 1.0], true).unwrap();
        let ss = SearchSpace::new(&data, &BTreeMap::new()).unwrap();
        let params = Parameters {
            program_type: ProgramType::BinaryClassifier,
            ..Default::default()
        };
        let mut rng = EvoRng::new(7);
        let program = ss.make_program(&params, 0, 0, &mut rng).unwrap();
        assert_eq!(program.tree.node(0).kind, NodeKind::OffsetSum);
        assert_eq!(program.tree.node(0).prob_change, 0.0);
    }

    #[test]
    fn test_sample_subtree_fails_without_terminals() {
        let mut ss = SearchSpace::new(&data(false), &BTreeMap::new()).unwrap();
        let mut rng = EvoRng::new(8);
        let spot = Node::op(NodeKind::Add);
        let tree = ss.sample_subtree(&spot, 3, 10, &mut rng).unwrap();
        assert!(tree.depth() <= 3);

        for label in ss.terminal_labels(DataType::Float) {
            ss.set_terminal_weight(DataType::Float, &label, 0.0);
        }
        assert!(ss.sample_subtree(&spot, 3, 10, &mut rng).is_none());
    }
}
