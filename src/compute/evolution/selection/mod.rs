//! Parent selection and survival.
//!
//! Selection runs per island and returns one parent slot per island member.
//! Survival runs once over the union of all islands and returns `pop_size`
//! slots; the engine splits them back into islands.

pub mod lexicase;
pub mod nsga2;

pub use nsga2::{NonDominatedSort, crowding_distance, fast_nds, tournament};

use super::population::Population;
use super::rng::EvoRng;
use crate::schema::{Parameters, SelectionKind};

/// Selection strategy, dispatched by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    kind: SelectionKind,
}

impl Selection {
    pub fn new(kind: SelectionKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> SelectionKind {
        self.kind
    }

    /// Parent slots for one island, one per island member.
    pub fn select(
        &self,
        pop: &Population,
        island: usize,
        params: &Parameters,
        rng: &mut EvoRng,
    ) -> Result<Vec<usize>, SelectionError> {
        if pop.island(island).is_empty() {
            return Err(SelectionError::EmptyIsland(island));
        }
        Ok(match self.kind {
            SelectionKind::Nsga2 => nsga2::select(pop, island, params, rng),
            SelectionKind::Lexicase => lexicase::select(pop, island, params, rng),
        })
    }

    /// `params.pop_size` survivor slots from all islands.
    pub fn survive(&self, pop: &mut Population, params: &Parameters) -> Result<Vec<usize>, SelectionError> {
        match self.kind {
            SelectionKind::Nsga2 => Ok(nsga2::survive(pop, params.pop_size)),
            SelectionKind::Lexicase => Err(SelectionError::SurvivalNotSupported(self.kind)),
        }
    }
}

/// Selection errors.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("{0} cannot be used for survival")]
    SurvivalNotSupported(SelectionKind),
    #[error("Island {0} has no members")]
    EmptyIsland(usize),
}
