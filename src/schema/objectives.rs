//! Objective sign table.
//!
//! Every objective is stored in a maximize-all space: a raw value is
//! multiplied by the sign registered here. The table is built once per
//! program type and handed to whatever needs it, so there is no global
//! weight map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::params::ProgramType;

/// Objective name to sign (+1 maximize, -1 minimize).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveWeights {
    program_type: ProgramType,
    weights: BTreeMap<String, f32>,
}

impl ObjectiveWeights {
    /// Build the table for one kind of program.
    ///
    /// Structural objectives are always minimized. The "error" objective
    /// follows the default scorer: a loss for regressors, a likelihood or
    /// accuracy style score for classifiers.
    pub fn for_program_type(program_type: ProgramType) -> Self {
        let mut weights: BTreeMap<String, f32> = [
            ("complexity", -1.0),
            ("linear_complexity", -1.0),
            ("size", -1.0),
            ("depth", -1.0),
        ]
        .into_iter()
        .map(|(name, w)| (name.to_string(), w))
        .collect();

        let scores: &[(&str, f32)] = match program_type {
            ProgramType::Regressor => &[("mse", -1.0), ("error", -1.0)],
            ProgramType::BinaryClassifier => &[
                ("log", 1.0),
                ("multi_log", 1.0),
                ("accuracy", 1.0),
                ("average_precision_score", 1.0),
                ("error", 1.0),
            ],
        };
        weights.extend(scores.iter().map(|(name, w)| (name.to_string(), *w)));

        Self {
            program_type,
            weights,
        }
    }

    pub fn program_type(&self) -> ProgramType {
        self.program_type
    }

    /// Sign of one objective.
    pub fn weight(&self, name: &str) -> Result<f32, ObjectiveError> {
        self.weights
            .get(name)
            .copied()
            .ok_or_else(|| ObjectiveError::UnknownMetric {
                name: name.to_string(),
                program_type: self.program_type,
            })
    }

    /// Signs for an ordered objective list. The order is kept.
    pub fn weights_for(&self, names: &[String]) -> Result<Vec<f32>, ObjectiveError> {
        names.iter().map(|name| self.weight(name)).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.weights.contains_key(name)
    }
}

/// Objective lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum ObjectiveError {
    #[error("Unknown metric '{name}' for {program_type} programs")]
    UnknownMetric {
        name: String,
        program_type: ProgramType,
    },
}
