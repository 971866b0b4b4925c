//! Schema module - Parameters, objective tables and run reports.

mod objectives;
mod params;
mod report;

pub use objectives::*;
pub use params::*;
pub use report::*;
