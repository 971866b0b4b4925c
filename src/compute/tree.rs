//! Pre-order program trees.
//!
//! A tree is a flat vector of nodes in pre-order. The subtree rooted at
//! index `i` is the contiguous range `i..subtree_end(i)`, recovered from the
//! node arities, so subtree replacement is a single splice and cloning a tree
//! never aliases nodes.

use serde::{Deserialize, Serialize};

use super::node::{DataType, Node};

/// Expression tree stored in pre-order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Build a tree from pre-order nodes.
    ///
    /// # Panics
    ///
    /// Panics if the arities do not describe exactly one complete tree.
    pub fn new(nodes: Vec<Node>) -> Self {
        let tree = Self { nodes };
        assert!(tree.is_well_formed(), "malformed pre-order tree");
        tree
    }

    /// Single-node tree.
    pub fn leaf(node: Node) -> Self {
        assert!(node.is_terminal(), "leaf must be a terminal");
        Self { nodes: vec![node] }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, i: usize) -> &Node {
        &self.nodes[i]
    }

    pub fn node_mut(&mut self, i: usize) -> &mut Node {
        &mut self.nodes[i]
    }

    /// Number of nodes, ignoring weights.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ret_type(&self) -> DataType {
        self.nodes[0].ret_type
    }

    /// One past the last index of the subtree rooted at `i`.
    pub fn subtree_end(&self, i: usize) -> usize {
        let mut open = 1usize;
        let mut j = i;
        while open > 0 {
            open = open - 1 + self.nodes[j].arity();
            j += 1;
        }
        j
    }

    /// Indices of the direct children of `i`.
    pub fn children(&self, i: usize) -> Vec<usize> {
        let mut children = Vec::with_capacity(self.nodes[i].arity());
        let mut j = i + 1;
        for _ in 0..self.nodes[i].arity() {
            children.push(j);
            j = self.subtree_end(j);
        }
        children
    }

    /// Copy of the subtree rooted at `i`.
    pub fn subtree(&self, i: usize) -> Tree {
        Tree {
            nodes: self.nodes[i..self.subtree_end(i)].to_vec(),
        }
    }

    /// Program size: weighted nodes count their weight and multiplication.
    pub fn size(&self) -> usize {
        self.nodes.iter().map(Node::size).sum()
    }

    /// Program size of the subtree rooted at `i`.
    pub fn size_at(&self, i: usize) -> usize {
        self.nodes[i..self.subtree_end(i)]
            .iter()
            .map(Node::size)
            .sum()
    }

    /// Number of nodes on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        self.depths().into_iter().max().map_or(0, |d| d + 1)
    }

    /// Height of the subtree rooted at `i`, counted in nodes.
    pub fn depth_at(&self, i: usize) -> usize {
        let depths = self.depths();
        let end = self.subtree_end(i);
        depths[i..end].iter().max().map_or(0, |d| d - depths[i] + 1)
    }

    /// Edges between the root and `i`.
    pub fn depth_to_reach(&self, i: usize) -> usize {
        self.depths()[i]
    }

    /// Edges between the root and every node, in pre-order.
    pub fn depths(&self) -> Vec<usize> {
        let mut depths = Vec::with_capacity(self.nodes.len());
        let mut open: Vec<usize> = Vec::new();
        for node in &self.nodes {
            depths.push(open.len());
            if node.arity() > 0 {
                open.push(node.arity());
                continue;
            }
            while let Some(remaining) = open.last_mut() {
                *remaining -= 1;
                if *remaining > 0 {
                    break;
                }
                open.pop();
            }
        }
        depths
    }

    /// Swap one node for another with the same signature.
    pub fn replace_node(&mut self, i: usize, node: Node) {
        assert!(
            self.nodes[i].same_signature(&node),
            "replacement node must keep the signature"
        );
        self.nodes[i] = node;
    }

    /// Replace the subtree rooted at `i` with `subtree`.
    pub fn replace_subtree(&mut self, i: usize, subtree: Tree) {
        debug_assert_eq!(self.nodes[i].ret_type, subtree.ret_type());
        let end = self.subtree_end(i);
        self.nodes.splice(i..end, subtree.nodes);
    }

    /// Make `parent` the new parent of the subtree at `i`.
    ///
    /// The subtree becomes argument `slot` of `parent`; the remaining
    /// arguments are taken from `others` in order.
    pub fn wrap(&mut self, i: usize, parent: Node, slot: usize, others: Vec<Tree>) {
        assert_eq!(others.len() + 1, parent.arity(), "wrong number of arguments");
        assert_eq!(parent.arg_types()[slot], self.nodes[i].ret_type);

        let end = self.subtree_end(i);
        let wrapped: Vec<Node> = self.nodes[i..end].to_vec();
        let mut others = others.into_iter();
        let mut nodes = vec![parent];
        for arg in 0..nodes[0].arity() {
            if arg == slot {
                nodes.extend(wrapped.iter().cloned());
            } else if let Some(other) = others.next() {
                nodes.extend(other.nodes);
            }
        }
        self.nodes.splice(i..end, nodes);
    }

    /// Whether the arities and argument types describe one complete tree.
    pub fn is_well_formed(&self) -> bool {
        if self.nodes.is_empty() {
            return false;
        }
        // Expected types of the argument slots still to be filled, innermost last.
        let mut expected: Vec<DataType> = vec![self.nodes[0].ret_type];
        for node in &self.nodes {
            match expected.pop() {
                Some(ty) if ty == node.ret_type => {
                    expected.extend(node.arg_types().iter().rev());
                }
                _ => return false,
            }
        }
        expected.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::node::NodeKind;

    fn x(name: &str) -> Node {
        let mut node = Node::feature(name, DataType::Float);
        node.is_weighted = false;
        node
    }

    /// Add(Sin(x0), Mul(x1, 2.0))
    fn sample_tree() -> Tree {
        Tree::new(vec![
            Node::op(NodeKind::Add),
            Node::op(NodeKind::Sin),
            x("x0"),
            Node::op(NodeKind::Mul),
            x("x1"),
            Node::constant(2.0),
        ])
    }

    #[test]
    fn test_subtree_ranges() {
        let tree = sample_tree();
        assert_eq!(tree.subtree_end(0), 6);
        assert_eq!(tree.subtree_end(1), 3);
        assert_eq!(tree.subtree_end(3), 6);
        assert_eq!(tree.subtree_end(5), 6);
        assert_eq!(tree.children(0), vec![1, 3]);
        assert_eq!(tree.children(3), vec![4, 5]);
    }

    #[test]
    fn test_depths_and_sizes() {
        let tree = sample_tree();
        assert_eq!(tree.depths(), vec![0, 1, 2, 1, 2, 2]);
        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.depth_at(3), 2);
        assert_eq!(tree.depth_at(2), 1);
        assert_eq!(tree.depth_to_reach(4), 2);
        assert_eq!(tree.size(), 6);
        assert_eq!(tree.size_at(3), 3);

        let mut weighted = tree.clone();
        weighted.node_mut(2).is_weighted = true;
        assert_eq!(weighted.size(), 8);
        assert_eq!(weighted.size_at(1), 4);
    }

    #[test]
    fn test_replace_subtree() {
        let mut tree = sample_tree();
        tree.replace_subtree(3, Tree::leaf(Node::constant(1.0)));
        assert_eq!(tree.len(), 4);
        assert!(tree.is_well_formed());
        assert_eq!(tree.node(3).kind, NodeKind::Constant);
    }

    #[test]
    fn test_wrap() {
        let mut tree = sample_tree();
        tree.wrap(
            1,
            Node::op(NodeKind::Sub),
            1,
            vec![Tree::leaf(Node::constant(3.0))],
        );
        assert!(tree.is_well_formed());
        assert_eq!(tree.node(1).kind, NodeKind::Sub);
        assert_eq!(tree.node(2).kind, NodeKind::Constant);
        assert_eq!(tree.node(3).kind, NodeKind::Sin);
        assert_eq!(tree.depth(), 4);
    }

    #[test]
    fn test_well_formed_checks_types() {
        let bad = Tree {
            nodes: vec![Node::op(NodeKind::And), x("x0"), x("x1")],
        };
        assert!(!bad.is_well_formed());

        let short = Tree {
            nodes: vec![Node::op(NodeKind::Add), x("x0")],
        };
        assert!(!short.is_well_formed());
    }

    #[test]
    #[should_panic(expected = "signature")]
    fn test_replace_node_rejects_other_signature() {
        let mut tree = sample_tree();
        tree.replace_node(1, Node::op(NodeKind::Add));
    }
}
