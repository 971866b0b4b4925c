//! Compute module - Programs, datasets and the evolutionary engine.

mod dataset;
mod node;
mod program;
mod scorer;
mod search_space;
mod tree;

pub mod evolution;

pub use dataset::*;
pub use node::*;
pub use program::*;
pub use scorer::*;
pub use search_space::*;
pub use tree::*;
