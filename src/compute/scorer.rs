//! Scoring functions.
//!
//! A scorer turns predictions into an aggregate score plus a per-sample loss
//! vector. Aggregate scores keep the orientation of their objective sign
//! (mse is a loss, log is a log-likelihood). Per-sample losses are always
//! lower-is-better, which is what lexicase filters on.

use super::dataset::Dataset;
use super::program::{Program, ProgramError};
use crate::schema::ProgramType;

const PROBA_EPS: f32 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Metric {
    Mse,
    Log,
    Accuracy,
    AveragePrecision,
}

/// Named metric bound to a program type.
#[derive(Debug, Clone)]
pub struct Scorer {
    name: String,
    metric: Metric,
}

impl Scorer {
    /// Look up a scorer valid for `program_type`.
    pub fn new(name: &str, program_type: ProgramType) -> Result<Self, ScorerError> {
        let metric = match (name, program_type) {
            ("mse", ProgramType::Regressor) => Metric::Mse,
            ("log" | "multi_log", ProgramType::BinaryClassifier) => Metric::Log,
            ("accuracy", ProgramType::BinaryClassifier) => Metric::Accuracy,
            ("average_precision_score", ProgramType::BinaryClassifier) => {
                Metric::AveragePrecision
            }
            _ => {
                return Err(ScorerError::Unknown {
                    name: name.to_string(),
                    program_type,
                });
            }
        };
        Ok(Self {
            name: name.to_string(),
            metric,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether larger aggregate scores are better.
    pub fn higher_is_better(&self) -> bool {
        self.metric != Metric::Mse
    }

    /// Worst possible aggregate score, used for non-finite results.
    pub fn worst(&self) -> f32 {
        if self.higher_is_better() {
            -f32::MAX
        } else {
            f32::MAX
        }
    }

    /// Aggregate score and per-sample losses of `program` on `data`.
    pub fn score(&self, program: &Program, data: &Dataset) -> Result<(f32, Vec<f32>), ProgramError> {
        let y = data.y();
        let (score, errors) = match self.metric {
            Metric::Mse => {
                let pred = program.predict(data)?;
                let errors: Vec<f32> = y.iter().zip(&pred).map(|(t, p)| (t - p).powi(2)).collect();
                (mean(&errors), errors)
            }
            Metric::Log => {
                let errors = log_losses(y, &program.predict_proba(data)?);
                (-mean(&errors), errors)
            }
            Metric::Accuracy => {
                let pred = program.predict(data)?;
                let errors: Vec<f32> = y
                    .iter()
                    .zip(&pred)
                    .map(|(t, p)| if t == p { 0.0 } else { 1.0 })
                    .collect();
                (1.0 - mean(&errors), errors)
            }
            Metric::AveragePrecision => {
                let proba = program.predict_proba(data)?;
                (average_precision(y, &proba), log_losses(y, &proba))
            }
        };

        let score = if score.is_finite() { score } else { self.worst() };
        let errors = errors
            .into_iter()
            .map(|e| if e.is_finite() { e } else { f32::MAX })
            .collect();
        Ok((score, errors))
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

fn log_losses(y: &[f32], proba: &[f32]) -> Vec<f32> {
    y.iter()
        .zip(proba)
        .map(|(t, p)| {
            let p = if p.is_nan() { 0.5 } else { p.clamp(PROBA_EPS, 1.0 - PROBA_EPS) };
            -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
        })
        .collect()
}

/// Mean precision at each positive, ranking by descending probability.
fn average_precision(y: &[f32], proba: &[f32]) -> f32 {
    let mut order: Vec<usize> = (0..y.len()).collect();
    order.sort_by(|a, b| proba[*b].total_cmp(&proba[*a]));

    let mut hits = 0usize;
    let mut sum = 0.0f32;
    for (rank, &i) in order.iter().enumerate() {
        if y[i] == 1.0 {
            hits += 1;
            sum += hits as f32 / (rank + 1) as f32;
        }
    }
    if hits == 0 { 0.0 } else { sum / hits as f32 }
}

/// Scorer lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum ScorerError {
    #[error("Unknown scorer '{name}' for {program_type} programs")]
    Unknown {
        name: String,
        program_type: ProgramType,
    },
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::compute::dataset::Column;
    use crate::compute::node::{DataType, Node, NodeKind};
    use crate::compute::tree::Tree;

    fn data(y: Vec<f32>, classification: bool) -> Dataset {
        let mut features = BTreeMap::new();
        features.insert(
            "x0".to_string(),
            Column::Float((0..y.len()).map(|i| i as f32).collect()),
        );
        Dataset::new(features, y, classification).unwrap()
    }

    fn identity(program_type: ProgramType) -> Program {
        let mut node = Node::feature("x0", DataType::Float);
        node.is_weighted = false;
        Program::new(program_type, Tree::leaf(node))
    }

    #[test]
    fn test_mse() {
        let scorer = Scorer::new("mse", ProgramType::Regressor).unwrap();
        let (score, errors) = scorer
            .score(&identity(ProgramType::Regressor), &data(vec![0.0, 2.0, 2.0], false))
            .unwrap();
        assert_eq!(errors, vec![0.0, 1.0, 0.0]);
        assert!((score - 1.0 / 3.0).abs() < 1e-6);
        assert!(!scorer.higher_is_better());
    }

    #[test]
    fn test_log_is_likelihood() {
        let scorer = Scorer::new("log", ProgramType::BinaryClassifier).unwrap();
        let program = Program::new(
            ProgramType::BinaryClassifier,
            Tree::new(vec![
                Node::op(NodeKind::Sub),
                {
                    let mut x = Node::feature("x0", DataType::Float);
                    x.is_weighted = false;
                    x
                },
                Node::constant(1.5),
            ]),
        );
        let (score, errors) = scorer
            .score(&program, &data(vec![0.0, 0.0, 1.0, 1.0], true))
            .unwrap();
        assert!(score < 0.0);
        assert!(errors.iter().all(|e| *e >= 0.0));
        assert!((score + mean(&errors)).abs() < 1e-6);
    }

    #[test]
    fn test_accuracy() {
        let scorer = Scorer::new("accuracy", ProgramType::BinaryClassifier).unwrap();
        let (score, errors) = scorer
            .score(
                &identity(ProgramType::BinaryClassifier),
                &data(vec![0.0, 1.0, 1.0, 0.0], true),
            )
            .unwrap();
        // x0 = 0 gives p = 0.5 -> label 0; the rest are positive
        assert_eq!(errors, vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(score, 0.75);
    }

    #[test]
    fn test_average_precision() {
        assert_eq!(average_precision(&[1.0, 0.0, 1.0], &[0.9, 0.8, 0.7]), (1.0 + 2.0 / 3.0) / 2.0);
        assert_eq!(average_precision(&[0.0, 0.0], &[0.9, 0.8]), 0.0);
    }

    #[test]
    fn test_unknown_or_mismatched_scorer() {
        assert!(Scorer::new("log", ProgramType::Regressor).is_err());
        assert!(Scorer::new("mse", ProgramType::BinaryClassifier).is_err());
        assert!(Scorer::new("r2", ProgramType::Regressor).is_err());
        assert!(Scorer::new("multi_log", ProgramType::BinaryClassifier).is_ok());
    }

    #[test]
    fn test_non_finite_sanitized() {
        let scorer = Scorer::new("mse", ProgramType::Regressor).unwrap();
        let program = Program::new(
            ProgramType::Regressor,
            Tree::new(vec![Node::op(NodeKind::Exp), Node::constant(1000.0)]),
        );
        let (score, errors) = scorer.score(&program, &data(vec![1.0, 2.0], false)).unwrap();
        assert_eq!(score, f32::MAX);
        assert!(errors.iter().all(|e| *e == f32::MAX));
    }
}
