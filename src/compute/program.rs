//! Executable programs: a typed tree plus the model kind it is scored as.

use serde::{Deserialize, Serialize};

use super::dataset::{Column, Dataset};
use super::node::{Node, NodeKind};
use super::tree::Tree;
use crate::schema::ProgramType;

/// Intermediate values during evaluation.
enum Values {
    Float(Vec<f32>),
    Bool(Vec<bool>),
}

impl Values {
    fn into_float(self) -> Vec<f32> {
        match self {
            Self::Float(v) => v,
            Self::Bool(v) => v.into_iter().map(|b| if b { 1.0 } else { 0.0 }).collect(),
        }
    }

    fn into_bool(self) -> Vec<bool> {
        match self {
            Self::Float(v) => v.into_iter().map(|x| x > 0.0).collect(),
            Self::Bool(v) => v,
        }
    }
}

/// A program tree that can be fitted and evaluated on a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub program_type: ProgramType,
    pub tree: Tree,
}

impl Program {
    pub fn new(program_type: ProgramType, tree: Tree) -> Self {
        Self { program_type, tree }
    }

    /// Fit the program to the data.
    ///
    /// For regressors a weighted root gets its least-squares scale (or, for
    /// an offset root, the mean residual). Classifier trees are kept as is.
    pub fn fit(&mut self, data: &Dataset) -> Result<(), ProgramError> {
        if self.program_type == ProgramType::Regressor {
            let root = self.tree.node(0).clone();
            if root.is_weighted && root.kind != NodeKind::Constant {
                let y = data.y();
                if root.kind == NodeKind::OffsetSum {
                    let arg = self.eval_at(1, data)?.0.into_float();
                    let residual = mean(y.iter().zip(&arg).map(|(t, a)| t - a));
                    if residual.is_finite() {
                        self.tree.node_mut(0).weight = residual;
                    }
                } else {
                    self.tree.node_mut(0).weight = 1.0;
                    let raw = self.eval_at(0, data)?.0.into_float();
                    let num: f32 = raw.iter().zip(y).map(|(o, t)| o * t).sum();
                    let den: f32 = raw.iter().map(|o| o * o).sum();
                    let scale = num / den;
                    self.tree.node_mut(0).weight = if den > 0.0 && scale.is_finite() {
                        scale
                    } else {
                        root.weight
                    };
                }
            }
        }
        Ok(())
    }

    /// Raw output of the tree.
    pub fn evaluate(&self, data: &Dataset) -> Result<Vec<f32>, ProgramError> {
        Ok(self.eval_at(0, data)?.0.into_float())
    }

    /// Predictions: raw output for regressors, 0/1 labels for classifiers.
    pub fn predict(&self, data: &Dataset) -> Result<Vec<f32>, ProgramError> {
        match self.program_type {
            ProgramType::Regressor => self.evaluate(data),
            ProgramType::BinaryClassifier => Ok(self
                .predict_proba(data)?
                .into_iter()
                .map(|p| if p > 0.5 { 1.0 } else { 0.0 })
                .collect()),
        }
    }

    /// Probability of the positive class. Regressors return raw output.
    pub fn predict_proba(&self, data: &Dataset) -> Result<Vec<f32>, ProgramError> {
        let raw = self.evaluate(data)?;
        Ok(match self.program_type {
            ProgramType::Regressor => raw,
            ProgramType::BinaryClassifier => raw.into_iter().map(sigmoid).collect(),
        })
    }

    pub fn size(&self) -> usize {
        self.tree.size()
    }

    pub fn depth(&self) -> usize {
        self.tree.depth()
    }

    /// Multiplicative complexity: nested expensive operators cost more.
    pub fn complexity(&self) -> usize {
        self.complexity_at(0).0
    }

    /// Additive complexity: the sum of node costs.
    pub fn linear_complexity(&self) -> usize {
        self.tree
            .nodes()
            .iter()
            .map(|node| node.kind.complexity() + weight_cost(node).unwrap_or(0))
            .sum()
    }

    /// Functional string form, e.g. `Add(1.50*x0,Sin(x1))`.
    pub fn get_model(&self) -> String {
        self.render(0).0
    }

    fn complexity_at(&self, i: usize) -> (usize, usize) {
        let node = self.tree.node(i);
        let mut next = i + 1;
        let mut children = 0usize;
        for _ in 0..node.arity() {
            let (c, after) = self.complexity_at(next);
            children = children.saturating_add(c);
            next = after;
        }
        let mut c = node.kind.complexity().saturating_mul(1 + children);
        if let Some(cost) = weight_cost(node) {
            c = NodeKind::Mul.complexity().saturating_mul(cost.saturating_add(c));
        }
        (c, next)
    }

    fn render(&self, i: usize) -> (String, usize) {
        let node = self.tree.node(i);
        let mut next = i + 1;
        let mut args = Vec::with_capacity(node.arity());
        for _ in 0..node.arity() {
            let (s, after) = self.render(next);
            args.push(s);
            next = after;
        }
        let text = match node.kind {
            NodeKind::Feature | NodeKind::Constant => node.to_string(),
            NodeKind::OffsetSum => format!("({:.2}+{})", node.weight, args.join(",")),
            kind if node.is_weighted => {
                format!("{:.2}*{}({})", node.weight, kind.name(), args.join(","))
            }
            kind => format!("{}({})", kind.name(), args.join(",")),
        };
        (text, next)
    }

    fn eval_at(&self, i: usize, data: &Dataset) -> Result<(Values, usize), ProgramError> {
        let node = self.tree.node(i);
        let n = data.n_samples();
        let mut next = i + 1;
        let mut args = Vec::with_capacity(node.arity());
        for _ in 0..node.arity() {
            let (v, after) = self.eval_at(next, data)?;
            args.push(v);
            next = after;
        }

        let values = match node.kind {
            NodeKind::Feature => {
                let name = node.label();
                match data.feature(name) {
                    Some(Column::Float(v)) => Values::Float(v.clone()),
                    Some(Column::Bool(v)) => Values::Bool(v.clone()),
                    None => return Err(ProgramError::MissingFeature(name.to_string())),
                }
            }
            NodeKind::Constant => Values::Float(vec![node.weight; n]),
            NodeKind::Greater | NodeKind::Less => {
                let mut args = args.into_iter();
                let a = take_float(&mut args);
                let b = take_float(&mut args);
                let greater = node.kind == NodeKind::Greater;
                Values::Bool(
                    a.iter()
                        .zip(&b)
                        .map(|(x, y)| if greater { x > y } else { x < y })
                        .collect(),
                )
            }
            NodeKind::And | NodeKind::Or => {
                let mut args = args.into_iter();
                let a = take_bool(&mut args);
                let b = take_bool(&mut args);
                let and = node.kind == NodeKind::And;
                Values::Bool(
                    a.iter()
                        .zip(&b)
                        .map(|(x, y)| if and { *x && *y } else { *x || *y })
                        .collect(),
                )
            }
            NodeKind::Not => {
                let mut args = args.into_iter();
                Values::Bool(take_bool(&mut args).into_iter().map(|b| !b).collect())
            }
            NodeKind::IfThenElse => {
                let mut args = args.into_iter();
                let cond = take_bool(&mut args);
                let then = take_float(&mut args);
                let other = take_float(&mut args);
                Values::Float(
                    cond.iter()
                        .zip(then.iter().zip(&other))
                        .map(|(c, (t, o))| if *c { *t } else { *o })
                        .collect(),
                )
            }
            kind => {
                let mut args = args.into_iter();
                let a = take_float(&mut args);
                let out: Vec<f32> = match kind {
                    NodeKind::Add | NodeKind::Sub | NodeKind::Mul | NodeKind::Div => {
                        let b = take_float(&mut args);
                        a.iter()
                            .zip(&b)
                            .map(|(x, y)| binary(kind, *x, *y))
                            .collect()
                    }
                    _ => a.into_iter().map(|x| unary(kind, x)).collect(),
                };
                Values::Float(out)
            }
        };

        let values = match (node.kind, values) {
            (NodeKind::Constant, v) => v,
            (NodeKind::OffsetSum, Values::Float(v)) => {
                Values::Float(v.into_iter().map(|x| x + node.weight).collect())
            }
            (_, Values::Float(v)) if node.is_weighted => {
                Values::Float(v.into_iter().map(|x| x * node.weight).collect())
            }
            (_, v) => v,
        };
        Ok((values, next))
    }
}

/// Extra complexity of a node's weight, if it carries one.
fn weight_cost(node: &Node) -> Option<usize> {
    (node.size() > 1).then(|| NodeKind::Constant.complexity() + NodeKind::Mul.complexity())
}

fn take_float(args: &mut impl Iterator<Item = Values>) -> Vec<f32> {
    args.next().map(Values::into_float).unwrap_or_default()
}

fn take_bool(args: &mut impl Iterator<Item = Values>) -> Vec<bool> {
    args.next().map(Values::into_bool).unwrap_or_default()
}

fn binary(kind: NodeKind, x: f32, y: f32) -> f32 {
    match kind {
        NodeKind::Add => x + y,
        NodeKind::Sub => x - y,
        NodeKind::Mul => x * y,
        NodeKind::Div if y.abs() > 1e-10 => x / y,
        NodeKind::Div => 1.0,
        _ => f32::NAN,
    }
}

fn unary(kind: NodeKind, x: f32) -> f32 {
    match kind {
        NodeKind::Sin => x.sin(),
        NodeKind::Cos => x.cos(),
        NodeKind::Exp => x.exp(),
        NodeKind::Log if x.abs() > 1e-10 => x.abs().ln(),
        NodeKind::Log => 0.0,
        NodeKind::Sqrt => x.abs().sqrt(),
        NodeKind::Square => x * x,
        NodeKind::Tanh => x.tanh(),
        NodeKind::OffsetSum => x,
        _ => f32::NAN,
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn mean(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, count) = values.fold((0.0f32, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f32 }
}

/// Program evaluation errors.
#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    #[error("Dataset has no feature named '{0}'")]
    MissingFeature(String),
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::compute::node::DataType;

    fn data() -> Dataset {
        let mut features = BTreeMap::new();
        features.insert("x0".to_string(), Column::Float(vec![1.0, 2.0, 3.0, 4.0]));
        features.insert(
            "b".to_string(),
            Column::Bool(vec![true, false, true, false]),
        );
        Dataset::new(features, vec![3.0, 6.0, 9.0, 12.0], false).unwrap()
    }

    fn plain(name: &str) -> Node {
        let mut node = Node::feature(name, DataType::Float);
        node.is_weighted = false;
        node
    }

    #[test]
    fn test_evaluate_arithmetic() {
        let tree = Tree::new(vec![
            Node::op(NodeKind::Add),
            plain("x0"),
            Node::op(NodeKind::Square),
            plain("x0"),
        ]);
        let program = Program::new(ProgramType::Regressor, tree);
        assert_eq!(program.evaluate(&data()).unwrap(), vec![2.0, 6.0, 12.0, 20.0]);
    }

    #[test]
    fn test_evaluate_logic() {
        let tree = Tree::new(vec![
            Node::op(NodeKind::IfThenElse),
            Node::feature("b", DataType::Bool),
            plain("x0"),
            Node::constant(-1.0),
        ]);
        let program = Program::new(ProgramType::Regressor, tree);
        assert_eq!(program.evaluate(&data()).unwrap(), vec![1.0, -1.0, 3.0, -1.0]);
    }

    #[test]
    fn test_protected_division() {
        let tree = Tree::new(vec![
            Node::op(NodeKind::Div),
            plain("x0"),
            Node::constant(0.0),
        ]);
        let program = Program::new(ProgramType::Regressor, tree);
        assert_eq!(program.evaluate(&data()).unwrap(), vec![1.0; 4]);
    }

    #[test]
    fn test_fit_scales_weighted_root() {
        let tree = Tree::leaf(Node::feature("x0", DataType::Float));
        let mut program = Program::new(ProgramType::Regressor, tree);
        program.fit(&data()).unwrap();
        assert!((program.tree.node(0).weight - 3.0).abs() < 1e-5);
        let pred = program.predict(&data()).unwrap();
        assert!((pred[3] - 12.0).abs() < 1e-4);
    }

    #[test]
    fn test_classifier_predicts_labels() {
        let tree = Tree::new(vec![
            Node::op(NodeKind::Sub),
            plain("x0"),
            Node::constant(2.5),
        ]);
        let program = Program::new(ProgramType::BinaryClassifier, tree);
        assert_eq!(program.predict(&data()).unwrap(), vec![0.0, 0.0, 1.0, 1.0]);
        let proba = program.predict_proba(&data()).unwrap();
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_missing_feature() {
        let program = Program::new(ProgramType::Regressor, Tree::leaf(plain("nope")));
        assert!(matches!(
            program.evaluate(&data()),
            Err(ProgramError::MissingFeature(_))
        ));
    }

    #[test]
    fn test_complexity_and_model() {
        let tree = Tree::new(vec![
            Node::op(NodeKind::Add),
            Node::feature("x0", DataType::Float),
            Node::op(NodeKind::Sin),
            plain("x0"),
        ]);
        let program = Program::new(ProgramType::Regressor, tree);
        assert_eq!(program.get_model(), "Add(1.00*x0,Sin(x0))");
        assert_eq!(program.size(), 6);
        assert_eq!(program.depth(), 3);
        // weighted x0: 3 * (4 + 1) = 15; Sin(x0): 5 * 2 = 10; Add: 2 * 26
        assert_eq!(program.complexity(), 52);
        assert_eq!(program.linear_complexity(), 2 + 1 + 4 + 5 + 1);
    }
}
