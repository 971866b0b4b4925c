//! Progress and result types reported by the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stage of a generation, in execution order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionStage {
    /// Building the initial population.
    #[default]
    Initializing,
    /// Setting the generation counter and drawing the batch.
    Prepare,
    /// Fitting and scoring the current individuals.
    Evaluate,
    /// Choosing parents per island.
    Select,
    /// Producing offspring per island.
    Vary,
    /// Scoring the offspring and updating operator probabilities.
    EvaluateOffspring,
    /// Choosing survivors over all islands.
    Survive,
    /// Compacting survivors and exchanging migrants.
    Migrate,
    /// Refreshing the archive, best individual and stats.
    Archive,
    /// Run finished.
    Complete,
}

impl fmt::Display for EvolutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Prepare => "prepare",
            Self::Evaluate => "evaluate",
            Self::Select => "select",
            Self::Vary => "vary",
            Self::EvaluateOffspring => "evaluate offspring",
            Self::Survive => "survive",
            Self::Migrate => "update/migrate",
            Self::Archive => "archive",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// One row of per-generation statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogStats {
    pub generation: usize,
    /// Seconds since the run started.
    pub time: f64,
    /// Training loss of the best individual found so far.
    pub best_score: f32,
    /// Validation loss of the best individual found so far.
    pub best_score_v: f32,
    /// Median training loss over the population.
    pub med_score: f32,
    /// Median validation loss over the population.
    pub med_score_v: f32,
    pub med_size: f32,
    pub med_complexity: f32,
    pub max_size: usize,
    pub max_complexity: usize,
}

impl LogStats {
    /// Header matching `to_csv_row`.
    pub const CSV_HEADER: &'static str = "generation,time,best_score,best_score_val,med_score,\
med_score_val,med_size,med_complexity,max_size,max_complexity";

    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{:.3},{},{},{},{},{},{},{},{}",
            self.generation,
            self.time,
            self.best_score,
            self.best_score_v,
            self.med_score,
            self.med_score_v,
            self.med_size,
            self.med_complexity,
            self.max_size,
            self.max_complexity
        )
    }
}

/// Serializable view of one evolved model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub id: u64,
    /// Human readable model.
    pub model: String,
    /// Raw objective values, in objective order.
    pub values: Vec<f32>,
    pub loss: f32,
    pub loss_v: f32,
    pub complexity: usize,
    pub size: usize,
    pub depth: usize,
}

/// Progress update emitted after each generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvolutionProgress {
    /// Generations completed.
    pub generation: usize,
    /// Generation limit.
    pub total_generations: usize,
    /// Latest statistics row.
    pub stats: LogStats,
    /// Generations since the best individual last improved.
    pub stall_count: usize,
    pub archive_size: usize,
    pub stage: EvolutionStage,
}

/// Reason the run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Reached the generation limit.
    MaxGenerations,
    /// Best individual stopped improving.
    Stagnation,
    /// Wall-clock limit hit.
    TimeLimit,
    /// Cancelled through the cancel handle.
    Cancelled,
}

/// Final result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionReport {
    /// Best individual found.
    pub best: ModelSnapshot,
    /// Final Pareto archive.
    pub archive: Vec<ModelSnapshot>,
    /// Statistics, one row per generation.
    pub history: Vec<LogStats>,
    pub generations: usize,
    pub elapsed_seconds: f64,
    pub stop_reason: StopReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_row_matches_header() {
        let row = LogStats {
            generation: 3,
            time: 1.5,
            best_score: 0.25,
            max_size: 12,
            ..Default::default()
        }
        .to_csv_row();

        let header_cols = LogStats::CSV_HEADER.split(',').count();
        assert_eq!(row.split(',').count(), header_cols);
        assert!(row.starts_with("3,1.500,0.25,"));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(EvolutionStage::EvaluateOffspring.to_string(), "evaluate offspring");
        assert_eq!(EvolutionStage::default(), EvolutionStage::Initializing);
    }
}
