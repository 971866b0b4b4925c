//! Fitting and scoring individuals.

use std::collections::BTreeMap;

use super::fitness::FitnessError;
use super::individual::Individual;
use crate::compute::dataset::Dataset;
use crate::compute::program::ProgramError;
use crate::compute::scorer::{Scorer, ScorerError};
use crate::schema::Parameters;

const STRUCTURAL: [&str; 5] = ["error", "complexity", "linear_complexity", "size", "depth"];

/// Scores individuals against their objective list.
#[derive(Debug, Clone)]
pub struct Evaluation {
    scorer: Scorer,
    /// Scorers for objectives named after a metric.
    metrics: BTreeMap<String, Scorer>,
    linear_complexity: bool,
}

impl Evaluation {
    pub fn new(params: &Parameters) -> Result<Self, EvaluationError> {
        let scorer = Scorer::new(params.scorer_name(), params.program_type)?;
        let mut metrics = BTreeMap::new();
        for name in &params.objectives {
            if !STRUCTURAL.contains(&name.as_str()) {
                metrics.insert(name.clone(), Scorer::new(name, params.program_type)?);
            }
        }
        Ok(Self {
            scorer,
            metrics,
            linear_complexity: params.linear_complexity,
        })
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    /// Fit `ind` on `train` if needed, then score it on `scored`.
    ///
    /// `scored` is the training data itself or a batch drawn from it; weights
    /// are always fitted on the full training data.
    pub fn assign_fit(
        &self,
        ind: &mut Individual,
        train: &Dataset,
        scored: &Dataset,
        validation: &Dataset,
    ) -> Result<(), EvaluationError> {
        if !ind.is_fitted {
            ind.fit(train)?;
        }
        self.update_fitness(ind, scored, validation)
    }

    /// Recompute losses, measurements and objective values.
    pub fn update_fitness(
        &self,
        ind: &mut Individual,
        train: &Dataset,
        validation: &Dataset,
    ) -> Result<(), EvaluationError> {
        let (loss, errors) = self.scorer.score(&ind.program, train)?;
        let (loss_v, _) = if validation.n_samples() > 0 {
            self.scorer.score(&ind.program, validation)?
        } else {
            (loss, Vec::new())
        };

        ind.error = errors;
        let f = &mut ind.fitness;
        f.loss = loss;
        f.loss_v = loss_v;
        f.size = ind.program.size();
        f.depth = ind.program.depth();
        f.complexity = ind.program.complexity();
        f.linear_complexity = ind.program.linear_complexity();

        let mut values = Vec::with_capacity(ind.objectives.len());
        for (i, name) in ind.objectives.iter().enumerate() {
            let value = match name.as_str() {
                "error" => ind.fitness.loss,
                "complexity" if self.linear_complexity => ind.fitness.linear_complexity as f32,
                "complexity" => ind.fitness.complexity as f32,
                "linear_complexity" => ind.fitness.linear_complexity as f32,
                "size" => ind.fitness.size as f32,
                "depth" => ind.fitness.depth as f32,
                other => {
                    let scorer = self
                        .metrics
                        .get(other)
                        .ok_or_else(|| EvaluationError::UnknownObjective(other.to_string()))?;
                    scorer.score(&ind.program, train)?.0
                }
            };
            let value = if value.is_finite() {
                value
            } else {
                log::warn!("individual {} has non-finite {name}", ind.id);
                match ind.fitness.weights.get(i) {
                    Some(w) if *w > 0.0 => -f32::MAX,
                    _ => f32::MAX,
                }
            };
            values.push(value);
        }
        ind.fitness.set_values(values)?;
        Ok(())
    }
}

/// Evaluation errors.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error(transparent)]
    Scorer(#[from] ScorerError),
    #[error(transparent)]
    Fitness(#[from] FitnessError),
    #[error("Unknown objective '{0}'")]
    UnknownObjective(String),
}
