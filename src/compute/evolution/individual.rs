//! Individuals: one program with its fitness, errors and lineage.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::fitness::Fitness;
use super::rng::EvoRng;
use crate::compute::dataset::Dataset;
use crate::compute::node::Node;
use crate::compute::program::{Program, ProgramError};
use crate::compute::search_space::{SearchSpace, SearchSpaceError};
use crate::schema::{ModelSnapshot, MutationKind, ObjectiveError, ObjectiveWeights, Parameters};

/// Variation that produced an individual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariationOp {
    Crossover,
    Mutation(MutationKind),
}

impl fmt::Display for VariationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crossover => f.write_str("cx"),
            Self::Mutation(kind) => f.write_str(kind.name()),
        }
    }
}

/// One member of the population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Individual {
    pub id: u64,
    #[serde(default)]
    pub parent_id: Vec<u64>,
    /// `None` for randomly initialized individuals.
    #[serde(default)]
    pub variation: Option<VariationOp>,
    pub program: Program,
    /// Per-sample losses on the training data.
    #[serde(default)]
    pub error: Vec<f32>,
    pub fitness: Fitness,
    pub objectives: Vec<String>,
    #[serde(default)]
    pub is_fitted: bool,
    /// Nodes drawn from the search space by the last mutation.
    #[serde(skip)]
    pub sampled_nodes: Vec<Node>,
}

impl Individual {
    /// Wrap a program. Objectives must be set before evaluation.
    pub fn from_program(program: Program) -> Self {
        Self {
            id: 0,
            parent_id: Vec::new(),
            variation: None,
            program,
            error: Vec::new(),
            fitness: Fitness::default(),
            objectives: Vec::new(),
            is_fitted: false,
            sampled_nodes: Vec::new(),
        }
    }

    /// Random individual with depth and size drawn within the parameter
    /// limits, using the objectives of `params`.
    pub fn init(
        search_space: &SearchSpace,
        params: &Parameters,
        table: &ObjectiveWeights,
        rng: &mut EvoRng,
    ) -> Result<Self, IndividualError> {
        let program = search_space.make_program(params, 0, 0, rng)?;
        let mut ind = Self::from_program(program);
        ind.set_objectives(&params.objectives, table)?;
        Ok(ind)
    }

    /// Set the objective list. The order fixes the layout of
    /// `fitness.values` for the life of the individual.
    pub fn set_objectives(
        &mut self,
        names: &[String],
        table: &ObjectiveWeights,
    ) -> Result<(), ObjectiveError> {
        let weights = table.weights_for(names)?;
        self.objectives = names.to_vec();
        self.fitness.weights = weights;
        self.fitness.clear_values();
        Ok(())
    }

    pub fn fit(&mut self, data: &Dataset) -> Result<(), ProgramError> {
        self.program.fit(data)?;
        self.is_fitted = true;
        Ok(())
    }

    /// Mark as needing a new fit and evaluation.
    pub fn unfit(&mut self) {
        self.is_fitted = false;
        self.fitness.clear_values();
    }

    pub fn predict(&self, data: &Dataset) -> Result<Vec<f32>, ProgramError> {
        self.program.predict(data)
    }

    pub fn predict_proba(&self, data: &Dataset) -> Result<Vec<f32>, ProgramError> {
        self.program.predict_proba(data)
    }

    pub fn size(&self) -> usize {
        self.program.size()
    }

    pub fn depth(&self) -> usize {
        self.program.depth()
    }

    pub fn complexity(&self) -> usize {
        self.program.complexity()
    }

    pub fn get_model(&self) -> String {
        self.program.get_model()
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            id: self.id,
            model: self.get_model(),
            values: self.fitness.values.clone(),
            loss: self.fitness.loss,
            loss_v: self.fitness.loss_v,
            complexity: self.fitness.complexity,
            size: self.fitness.size,
            depth: self.fitness.depth,
        }
    }
}

/// Errors creating an individual.
#[derive(Debug, thiserror::Error)]
pub enum IndividualError {
    #[error(transparent)]
    SearchSpace(#[from] SearchSpaceError),
    #[error(transparent)]
    Objective(#[from] ObjectiveError),
}
