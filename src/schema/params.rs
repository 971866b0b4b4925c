//! Run parameters for the island engine.
//!
//! `Parameters` is the configuration bag read by every stage of a run. It is
//! deserialized from JSON with per-field defaults, so a parameters file only
//! needs to name the settings it changes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::objectives::{ObjectiveError, ObjectiveWeights};

/// Kind of model being evolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramType {
    /// Real-valued output scored against a continuous target.
    #[default]
    Regressor,
    /// Logistic output scored against a 0/1 target.
    BinaryClassifier,
}

impl ProgramType {
    pub fn is_classification(self) -> bool {
        matches!(self, Self::BinaryClassifier)
    }

    /// Scorer used when the parameters do not name one.
    pub fn default_scorer(self) -> &'static str {
        match self {
            Self::Regressor => "mse",
            Self::BinaryClassifier => "log",
        }
    }
}

impl fmt::Display for ProgramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regressor => write!(f, "regressor"),
            Self::BinaryClassifier => write!(f, "binary_classifier"),
        }
    }
}

/// Parent selection or survival strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    /// Non-dominated sorting with crowding distance.
    Nsga2,
    /// Epsilon-lexicase over per-sample errors.
    Lexicase,
}

impl FromStr for SelectionKind {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nsga2" => Ok(Self::Nsga2),
            "lexicase" => Ok(Self::Lexicase),
            other => Err(ParamsError::UnknownSelection(other.to_string())),
        }
    }
}

impl fmt::Display for SelectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nsga2 => write!(f, "nsga2"),
            Self::Lexicase => write!(f, "lexicase"),
        }
    }
}

/// Policy that adapts variation probabilities during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanditKind {
    /// Keep the configured probabilities.
    #[default]
    Dummy,
    /// Beta-Bernoulli Thompson sampling.
    Thompson,
    /// Thompson sampling with discounting of old rewards.
    DynamicThompson,
}

impl FromStr for BanditKind {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dummy" => Ok(Self::Dummy),
            "thompson" => Ok(Self::Thompson),
            "dynamic_thompson" => Ok(Self::DynamicThompson),
            other => Err(ParamsError::UnknownBandit(other.to_string())),
        }
    }
}

/// The six tree mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Point,
    Insert,
    Delete,
    Subtree,
    ToggleWeightOn,
    ToggleWeightOff,
}

impl MutationKind {
    pub const ALL: [MutationKind; 6] = [
        Self::Point,
        Self::Insert,
        Self::Delete,
        Self::Subtree,
        Self::ToggleWeightOn,
        Self::ToggleWeightOff,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Insert => "insert",
            Self::Delete => "delete",
            Self::Subtree => "subtree",
            Self::ToggleWeightOn => "toggle_weight_on",
            Self::ToggleWeightOff => "toggle_weight_off",
        }
    }
}

impl FromStr for MutationKind {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ParamsError::UnknownMutation(s.to_string()))
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Case weighting used by lexicase on classification data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassWeights {
    /// Cases are shuffled uniformly.
    #[default]
    Unbalanced,
    /// Cases of rare classes are drawn first more often.
    Balanced,
}

/// Configuration for one evolutionary run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameters {
    #[serde(default)]
    pub program_type: ProgramType,
    /// Number of current individuals (the buffer holds twice this).
    #[serde(default = "default_pop_size")]
    pub pop_size: usize,
    #[serde(default = "default_num_islands")]
    pub num_islands: usize,
    /// Per-individual probability of being replaced by a migrant.
    #[serde(default = "default_mig_prob")]
    pub mig_prob: f32,
    /// Probability that an offspring comes from crossover instead of mutation.
    #[serde(default = "default_cx_prob")]
    pub cx_prob: f32,
    /// Relative weight of each mutation kind.
    #[serde(default = "default_mutation_probs")]
    pub mutation_probs: BTreeMap<MutationKind, f32>,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_gens")]
    pub max_gens: usize,
    /// Generations without improvement before stopping; 0 disables.
    #[serde(default)]
    pub max_stall: usize,
    /// Wall-clock limit in seconds.
    #[serde(default)]
    pub max_time: Option<f64>,
    /// Generation being produced. Written by the engine.
    #[serde(default)]
    pub current_gen: usize,
    /// Loss used for the "error" objective. Defaults per program type.
    #[serde(default)]
    pub scorer: Option<String>,
    #[serde(default = "default_objectives")]
    pub objectives: Vec<String>,
    #[serde(default = "default_sel")]
    pub sel: SelectionKind,
    #[serde(default = "default_surv")]
    pub surv: SelectionKind,
    #[serde(default)]
    pub bandit: BanditKind,
    /// Operator name to sampling weight. Empty enables every operator.
    #[serde(default)]
    pub functions: BTreeMap<String, f32>,
    /// Worker threads: -1 uses every core, 0 one per island.
    #[serde(default = "default_n_jobs")]
    pub n_jobs: i32,
    #[serde(default)]
    pub random_state: Option<u64>,
    /// Fraction of training samples used per generation.
    #[serde(default = "default_batch_size")]
    pub batch_size: f32,
    /// Fraction of samples held out for validation.
    #[serde(default)]
    pub validation_size: f32,
    #[serde(default)]
    pub class_weights: ClassWeights,
    /// Per-sample case weights for lexicase. Filled from the dataset.
    #[serde(skip)]
    pub sample_weights: Vec<f32>,
    /// Keep the merged Pareto archive up to date every generation.
    #[serde(default = "default_use_arch")]
    pub use_arch: bool,
    /// Use the additive complexity measure for the "complexity" objective.
    #[serde(default)]
    pub linear_complexity: bool,
    /// CSV file receiving one stats row per generation.
    #[serde(default)]
    pub logfile: Option<PathBuf>,
    /// Where to write the final population.
    #[serde(default)]
    pub save_population: Option<PathBuf>,
    /// Population to restart from instead of random initialization.
    #[serde(default)]
    pub load_population: Option<PathBuf>,
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            program_type: ProgramType::default(),
            pop_size: default_pop_size(),
            num_islands: default_num_islands(),
            mig_prob: default_mig_prob(),
            cx_prob: default_cx_prob(),
            mutation_probs: default_mutation_probs(),
            max_size: default_max_size(),
            max_depth: default_max_depth(),
            max_gens: default_max_gens(),
            max_stall: 0,
            max_time: None,
            current_gen: 0,
            scorer: None,
            objectives: default_objectives(),
            sel: default_sel(),
            surv: default_surv(),
            bandit: BanditKind::default(),
            functions: BTreeMap::new(),
            n_jobs: default_n_jobs(),
            random_state: None,
            batch_size: default_batch_size(),
            validation_size: 0.0,
            class_weights: ClassWeights::default(),
            sample_weights: Vec::new(),
            use_arch: default_use_arch(),
            linear_complexity: false,
            logfile: None,
            save_population: None,
            load_population: None,
            verbosity: default_verbosity(),
        }
    }
}

fn default_pop_size() -> usize {
    100
}
fn default_num_islands() -> usize {
    5
}
fn default_mig_prob() -> f32 {
    0.05
}
fn default_cx_prob() -> f32 {
    1.0 / 7.0
}
fn default_mutation_probs() -> BTreeMap<MutationKind, f32> {
    MutationKind::ALL
        .into_iter()
        .map(|kind| (kind, 1.0 / 6.0))
        .collect()
}
fn default_max_size() -> usize {
    50
}
fn default_max_depth() -> usize {
    10
}
fn default_max_gens() -> usize {
    100
}
fn default_objectives() -> Vec<String> {
    vec!["error".to_string(), "complexity".to_string()]
}
fn default_sel() -> SelectionKind {
    SelectionKind::Lexicase
}
fn default_surv() -> SelectionKind {
    SelectionKind::Nsga2
}
fn default_n_jobs() -> i32 {
    1
}
fn default_batch_size() -> f32 {
    1.0
}
fn default_use_arch() -> bool {
    true
}
fn default_verbosity() -> u8 {
    1
}

impl Parameters {
    /// Name of the scorer behind the "error" objective.
    pub fn scorer_name(&self) -> &str {
        self.scorer
            .as_deref()
            .unwrap_or_else(|| self.program_type.default_scorer())
    }

    pub fn mutation_prob(&self, kind: MutationKind) -> f32 {
        self.mutation_probs.get(&kind).copied().unwrap_or(0.0)
    }

    /// Whether generations are scored on a random subsample.
    pub fn use_batch(&self) -> bool {
        self.batch_size < 1.0
    }

    /// Number of worker threads requested by `n_jobs`.
    pub fn num_threads(&self) -> usize {
        match self.n_jobs {
            n if n < 0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            0 => self.num_islands.max(1),
            n => n as usize,
        }
    }

    /// Check the parameters for consistency.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.pop_size == 0 {
            return Err(ParamsError::EmptyPopulation);
        }
        if self.num_islands == 0 || self.num_islands > self.pop_size {
            return Err(ParamsError::InvalidIslands {
                pop_size: self.pop_size,
                num_islands: self.num_islands,
            });
        }
        for (name, value) in [("mig_prob", self.mig_prob), ("cx_prob", self.cx_prob)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ParamsError::InvalidProbability { name, value });
            }
        }
        if let Some((kind, value)) = self
            .mutation_probs
            .iter()
            .find(|(_, value)| !value.is_finite() || **value < 0.0)
        {
            return Err(ParamsError::InvalidMutationWeight {
                kind: *kind,
                value: *value,
            });
        }
        if self.max_size == 0 || self.max_depth == 0 || self.max_gens == 0 {
            return Err(ParamsError::InvalidLimits);
        }
        if self.objectives.is_empty() {
            return Err(ParamsError::EmptyObjectives);
        }
        ObjectiveWeights::for_program_type(self.program_type).weights_for(&self.objectives)?;
        if !(self.batch_size > 0.0 && self.batch_size <= 1.0) {
            return Err(ParamsError::InvalidBatchSize(self.batch_size));
        }
        if !(0.0..1.0).contains(&self.validation_size) {
            return Err(ParamsError::InvalidValidationSize(self.validation_size));
        }
        if matches!(self.max_time, Some(t) if !(t > 0.0)) {
            return Err(ParamsError::InvalidMaxTime);
        }
        Ok(())
    }
}

/// Parameter validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("Population size must be non-zero")]
    EmptyPopulation,
    #[error("Cannot split {pop_size} individuals into {num_islands} islands")]
    InvalidIslands { pop_size: usize, num_islands: usize },
    #[error("Probability {name} = {value} is outside [0, 1]")]
    InvalidProbability { name: &'static str, value: f32 },
    #[error("Mutation weight for {kind} must be finite and non-negative, got {value}")]
    InvalidMutationWeight { kind: MutationKind, value: f32 },
    #[error("max_size, max_depth and max_gens must be non-zero")]
    InvalidLimits,
    #[error("At least one objective is required")]
    EmptyObjectives,
    #[error(transparent)]
    Objective(#[from] ObjectiveError),
    #[error("Batch size {0} is outside (0, 1]")]
    InvalidBatchSize(f32),
    #[error("Validation size {0} is outside [0, 1)")]
    InvalidValidationSize(f32),
    #[error("max_time must be positive")]
    InvalidMaxTime,
    #[error("Unknown selection type '{0}'")]
    UnknownSelection(String),
    #[error("Unknown bandit type '{0}'")]
    UnknownBandit(String),
    #[error("Unknown mutation type '{0}'")]
    UnknownMutation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_valid() {
        let params = Parameters::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.scorer_name(), "mse");
        assert_eq!(params.mutation_probs.len(), 6);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"pop_size": 20, "num_islands": 2, "mutation_probs": {"point": 1.0}}"#;
        let params: Parameters = serde_json::from_str(json).unwrap();

        assert_eq!(params.pop_size, 20);
        assert_eq!(params.num_islands, 2);
        assert_eq!(params.max_depth, 10);
        assert_eq!(params.mutation_prob(MutationKind::Point), 1.0);
        assert_eq!(params.mutation_prob(MutationKind::Insert), 0.0);
        assert_eq!(params.sel, SelectionKind::Lexicase);
    }

    #[test]
    fn test_unknown_type_strings_rejected() {
        assert!(matches!(
            "tournament".parse::<SelectionKind>(),
            Err(ParamsError::UnknownSelection(_))
        ));
        assert!(matches!(
            "ucb".parse::<BanditKind>(),
            Err(ParamsError::UnknownBandit(_))
        ));
        assert_eq!(
            "toggle_weight_on".parse::<MutationKind>().unwrap(),
            MutationKind::ToggleWeightOn
        );
        assert!(serde_json::from_str::<Parameters>(r#"{"sel": "roulette"}"#).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let params = Parameters {
            num_islands: 0,
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(ParamsError::InvalidIslands { .. })));

        let params = Parameters {
            cx_prob: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ParamsError::InvalidProbability { name: "cx_prob", .. })
        ));

        let params = Parameters {
            objectives: vec!["error".into(), "beauty".into()],
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(ParamsError::Objective(_))));

        let params = Parameters {
            batch_size: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_num_threads() {
        let mut params = Parameters {
            num_islands: 3,
            n_jobs: 0,
            ..Default::default()
        };
        assert_eq!(params.num_threads(), 3);
        params.n_jobs = 2;
        assert_eq!(params.num_threads(), 2);
        params.n_jobs = -1;
        assert!(params.num_threads() >= 1);
    }
}
