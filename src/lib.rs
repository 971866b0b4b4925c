//! Archipelago - multi-island, multi-objective genetic programming.
//!
//! This crate evolves expression trees for symbolic regression and binary
//! classification. Several islands evolve side by side, exchange migrants,
//! and rank their individuals on a set of objectives (error and complexity
//! by default) so that a run ends with a Pareto archive of accuracy versus
//! simplicity trade-offs.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Run parameters, objective sign tables and report types
//! - `compute`: Programs, datasets, the search space and the evolutionary
//!   engine (`compute::evolution`)
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//!
//! use archipelago::{Column, Dataset, Engine, Parameters};
//!
//! let x: Vec<f32> = (0..20).map(|i| i as f32).collect();
//! let y: Vec<f32> = x.iter().map(|x| 3.0 * x + 2.0).collect();
//! let features = BTreeMap::from([("x".to_string(), Column::Float(x))]);
//! let data = Dataset::new(features, y, false).unwrap();
//!
//! let params = Parameters {
//!     pop_size: 50,
//!     num_islands: 2,
//!     max_gens: 20,
//!     random_state: Some(0),
//!     ..Default::default()
//! };
//! let mut engine = Engine::new(params).unwrap();
//! let report = engine.fit(&data).unwrap();
//!
//! println!("{} (loss {:.4})", report.best.model, report.best.loss);
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::evolution::{Engine, EngineError};
pub use compute::{Column, Dataset, DatasetFile};
pub use schema::{EvolutionReport, Parameters, ProgramType};
