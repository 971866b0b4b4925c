//! Multi-island, multi-objective evolution of expression programs.
//!
//! # Overview
//!
//! The evolutionary core consists of:
//!
//! - **Fitness** (`fitness`): weighted objective values, Pareto dominance and
//!   a lexicographic total order
//! - **Individuals** (`individual`): a program with its fitness, per-sample
//!   errors and lineage
//! - **Population** (`population`): an arena of `2 * pop_size` slots split
//!   into islands, with survivor compaction and migration
//! - **Selection** (`selection`): NSGA-II and epsilon-lexicase
//! - **Variation** (`variation`): six mutations and subtree crossover,
//!   with adaptive operator probabilities (`bandit`)
//! - **Archive** (`archive`): the merged first fronts of every island
//! - **Engine** (`engine`): the generation loop
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//!
//! use archipelago::compute::{Column, Dataset};
//! use archipelago::compute::evolution::Engine;
//! use archipelago::schema::Parameters;
//!
//! let x: Vec<f32> = (0..50).map(|i| i as f32 / 10.0).collect();
//! let y: Vec<f32> = x.iter().map(|x| x * x + 1.0).collect();
//! let features = BTreeMap::from([("x".to_string(), Column::Float(x))]);
//! let data = Dataset::new(features, y, false).unwrap();
//!
//! let mut engine = Engine::new(Parameters::default()).unwrap();
//! let report = engine
//!     .run_with_callback(&data, |progress| {
//!         println!("Generation {}: best loss = {:.4}",
//!             progress.generation, progress.stats.best_score);
//!     })
//!     .unwrap();
//!
//! println!("Best model: {}", report.best.model);
//! println!("Archive size: {}", report.archive.len());
//! ```
//!
//! # Selection
//!
//! - `Nsga2`: binary tournaments on front rank and crowding distance for
//!   parents, front-by-front filling for survivors
//! - `Lexicase`: epsilon-lexicase over per-sample errors, parents only

mod archive;
mod bandit;
mod engine;
mod evaluation;
mod fitness;
mod individual;
mod population;
mod rng;
pub mod selection;
mod variation;

pub use archive::Archive;
pub use bandit::Bandit;
pub use engine::{Engine, EngineError};
pub use evaluation::{Evaluation, EvaluationError};
pub use fitness::{Dominance, Fitness, FitnessError};
pub use individual::{Individual, IndividualError, VariationOp};
pub use population::{Population, PopulationError};
pub use rng::EvoRng;
pub use selection::{Selection, SelectionError};
pub use variation::{MutationOp, Variation, VariationError, calculate_rewards, mutation_op, reward};
