//! Island engine driving a full evolutionary run.
//!
//! Every generation walks the stages of `EvolutionStage` in order. Islands
//! are evaluated and select parents in parallel; variation, survival,
//! migration and the archive run as sequential barriers on the engine's own
//! random stream.

use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use super::archive::Archive;
use super::evaluation::{Evaluation, EvaluationError};
use super::individual::Individual;
use super::population::{Population, PopulationError};
use super::rng::EvoRng;
use super::selection::Selection;
use super::selection::lexicase::median;
use super::variation::Variation;
use crate::compute::dataset::Dataset;
use crate::compute::program::ProgramError;
use crate::compute::search_space::{SearchSpace, SearchSpaceError};
use crate::schema::{
    ClassWeights, EvolutionProgress, EvolutionReport, EvolutionStage, LogStats, ObjectiveWeights,
    Parameters, ParamsError, StopReason,
};

/// Runs the island model over a dataset and keeps the results for
/// prediction.
pub struct Engine {
    params: Parameters,
    table: ObjectiveWeights,
    rng: EvoRng,
    pool: rayon::ThreadPool,
    evaluation: Evaluation,
    selector: Selection,
    survivor: Selection,
    variation: Option<Variation>,
    population: Option<Population>,
    archive: Archive,
    best_ind: Option<Individual>,
    history: Vec<LogStats>,
    generation: usize,
    stall_count: usize,
    stage: EvolutionStage,
    started: Instant,
    logfile: Option<BufWriter<File>>,
    cancelled: Arc<AtomicBool>,
}

fn at<E>(stage: EvolutionStage) -> impl FnOnce(E) -> EngineError
where
    E: Error + Send + Sync + 'static,
{
    move |source| EngineError::Stage {
        stage,
        source: Box::new(source),
    }
}

impl Engine {
    /// Create an engine. Fails on invalid parameters or unknown scorers.
    pub fn new(params: Parameters) -> Result<Self, EngineError> {
        params.validate()?;
        let table = ObjectiveWeights::for_program_type(params.program_type);
        let rng = params.random_state.map_or_else(EvoRng::random, EvoRng::new);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.num_threads())
            .build()?;
        let evaluation = Evaluation::new(&params)?;

        Ok(Self {
            selector: Selection::new(params.sel),
            survivor: Selection::new(params.surv),
            archive: Archive::new(&params),
            params,
            table,
            rng,
            pool,
            evaluation,
            variation: None,
            population: None,
            best_ind: None,
            history: Vec::new(),
            generation: 0,
            stall_count: 0,
            stage: EvolutionStage::Initializing,
            started: Instant::now(),
            logfile: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag checked between generations; setting it stops the run after
    /// the current generation.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Run to completion.
    pub fn fit(&mut self, data: &Dataset) -> Result<EvolutionReport, EngineError> {
        self.run_with_callback(data, |_| {})
    }

    /// Run, reporting progress after every generation.
    pub fn run_with_callback<F>(&mut self, data: &Dataset, callback: F) -> Result<EvolutionReport, EngineError>
    where
        F: Fn(&EvolutionProgress),
    {
        self.started = Instant::now();
        self.stage = EvolutionStage::Initializing;
        self.generation = 0;
        self.stall_count = 0;
        self.history.clear();
        self.best_ind = None;

        if data.is_classification() != self.params.program_type.is_classification() {
            return Err(EngineError::ProgramTypeMismatch);
        }
        let data = data
            .clone()
            .with_validation(self.params.validation_size, &mut self.rng)
            .with_batch_size(self.params.batch_size);
        let train = data.get_training_data();
        let validation = data.get_validation_data();

        if self.params.class_weights == ClassWeights::Balanced {
            self.params.sample_weights = train.balanced_sample_weights();
        }

        let search_space = SearchSpace::new(&data, &self.params.functions)?;
        let population = match &self.params.load_population {
            Some(path) => {
                let mut pop = Population::load(path)?;
                if pop.pop_size != self.params.pop_size || pop.num_islands != self.params.num_islands {
                    return Err(EngineError::PopulationMismatch {
                        pop_size: pop.pop_size,
                        num_islands: pop.num_islands,
                    });
                }
                pop.drop_offspring();
                pop.mig_prob = self.params.mig_prob;
                log::info!("restarting from {}", path.display());
                pop
            }
            None => Population::init(&search_space, &self.params, &self.table, &mut self.rng)?,
        };
        self.variation = Some(Variation::new(&self.params, search_space));
        self.population = Some(population);
        self.archive = Archive::new(&self.params);

        self.logfile = match &self.params.logfile {
            Some(path) => {
                let mut writer = BufWriter::new(File::create(path)?);
                writeln!(writer, "{}", LogStats::CSV_HEADER)?;
                Some(writer)
            }
            None => None,
        };

        let stop_reason = loop {
            self.run_generation(self.generation, &data, &train, &validation)?;
            self.generation += 1;
            callback(&self.progress());

            if let Some(reason) = self.should_stop() {
                break reason;
            }
        };
        self.stage = EvolutionStage::Complete;
        log::info!("stopped after {} generations: {:?}", self.generation, stop_reason);

        let pop = self.population.as_mut().ok_or(EngineError::NotFitted)?;
        if !self.params.use_arch {
            self.archive.init(pop);
        }
        if let Some(path) = &self.params.save_population {
            pop.save(path)?;
        }
        if let Some(writer) = self.logfile.as_mut() {
            writer.flush()?;
        }

        let best = self.best_ind.as_ref().ok_or(EngineError::NotFitted)?;
        Ok(EvolutionReport {
            best: best.snapshot(),
            archive: self.archive.snapshots(),
            history: self.history.clone(),
            generations: self.generation,
            elapsed_seconds: self.started.elapsed().as_secs_f64(),
            stop_reason,
        })
    }

    fn run_generation(
        &mut self,
        generation: usize,
        data: &Dataset,
        train: &Dataset,
        validation: &Dataset,
    ) -> Result<(), EngineError> {
        let pop = self.population.as_mut().ok_or(EngineError::NotFitted)?;
        let variation = self.variation.as_mut().ok_or(EngineError::NotFitted)?;
        let pop_size = self.params.pop_size;
        let gen_key = generation as u64;

        self.stage = EvolutionStage::Prepare;
        self.params.current_gen = generation;
        let use_batch = data.use_batch();
        let batch = use_batch.then(|| data.get_batch(&mut self.rng));

        self.stage = EvolutionStage::Evaluate;
        let evaluation = &self.evaluation;
        let scored = batch.as_ref().unwrap_or(train);
        let results = self.pool.install(|| {
            pop.par_for_each_island(|_, members| {
                for (_, ind) in members.into_iter().filter(|(idx, _)| *idx < pop_size) {
                    if !ind.is_fitted || !ind.fitness.valid() || use_batch {
                        evaluation.assign_fit(ind, train, scored, validation)?;
                    }
                }
                Ok::<(), EvaluationError>(())
            })
        });
        results
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(at(EvolutionStage::Evaluate))?;

        self.stage = EvolutionStage::Select;
        let selector = &self.selector;
        let params = &self.params;
        let rng = &self.rng;
        let pop_ref: &Population = pop;
        let parents = self
            .pool
            .install(|| {
                (0..pop_ref.num_islands)
                    .into_par_iter()
                    .map(|island| {
                        let mut stream = rng.substream(&[gen_key, island as u64, 0]);
                        selector.select(pop_ref, island, params, &mut stream)
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .map_err(at(EvolutionStage::Select))?;

        // Offspring share the engine stream and the bandit, one island at a time.
        self.stage = EvolutionStage::Vary;
        for (island, island_parents) in parents.iter().enumerate() {
            pop.add_offspring_indexes(island);
            let children = variation
                .vary(pop, island, island_parents, &self.params, &mut self.rng)
                .map_err(at(EvolutionStage::Vary))?;
            for (slot, child) in children {
                pop.individuals[slot] = Some(child);
            }
        }
        assert!(
            pop.individuals.iter().all(Option::is_some),
            "variation left an offspring slot empty"
        );

        self.stage = EvolutionStage::EvaluateOffspring;
        let results = self.pool.install(|| {
            pop.par_for_each_island(|_, members| {
                for (_, ind) in members.into_iter().filter(|(idx, _)| *idx >= pop_size) {
                    evaluation.assign_fit(ind, train, scored, validation)?;
                }
                Ok::<(), EvaluationError>(())
            })
        });
        results
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(at(EvolutionStage::EvaluateOffspring))?;
        variation.update_ss(pop, self.params.linear_complexity, &mut self.rng);

        self.stage = EvolutionStage::Survive;
        let survivors = self
            .survivor
            .survive(pop, &self.params)
            .map_err(at(EvolutionStage::Survive))?;
        let per_island: Vec<Vec<usize>> = (0..pop.num_islands)
            .map(|island| {
                let (start, end) = pop.island_bounds(island);
                survivors[start..end].to_vec()
            })
            .collect();

        self.stage = EvolutionStage::Migrate;
        pop.update(&per_island);
        pop.migrate(&mut self.rng);

        self.stage = EvolutionStage::Archive;
        if self.params.use_arch {
            self.archive.update(pop);
        }
        let improved = self.update_best();
        if generation == 0 || improved {
            self.stall_count = 0;
        } else {
            self.stall_count += 1;
        }

        let stats = self.calculate_stats(generation);
        if let Some(writer) = self.logfile.as_mut() {
            writeln!(writer, "{}", stats.to_csv_row())?;
        }
        if self.params.verbosity > 0 {
            log::info!(
                "gen {} best {:.6} val {:.6} med {:.6} size {} stall {}",
                generation,
                stats.best_score,
                stats.best_score_v,
                stats.med_score,
                stats.med_size,
                self.stall_count
            );
        }
        if self.params.verbosity > 1
            && let Some(pop) = &self.population
        {
            log::debug!("population after generation {generation}:\n{}", pop.print_models());
        }
        self.history.push(stats);
        Ok(())
    }

    /// Replace the tracked best with a strictly better current individual.
    fn update_best(&mut self) -> bool {
        let Some(pop) = &self.population else {
            return false;
        };
        let Some(candidate) = pop
            .members()
            .filter(|ind| ind.fitness.valid())
            .max_by(|a, b| a.fitness.cmp(&b.fitness))
        else {
            return false;
        };
        let better = match &self.best_ind {
            Some(best) => candidate.fitness > best.fitness,
            None => true,
        };
        if better {
            log::debug!("new best individual {}", candidate.id);
            self.best_ind = Some(candidate.clone());
        }
        better
    }

    fn calculate_stats(&self, generation: usize) -> LogStats {
        let Some(pop) = &self.population else {
            return LogStats::default();
        };
        let mut losses: Vec<f32> = pop.members().map(|ind| ind.fitness.loss).collect();
        let mut losses_v: Vec<f32> = pop.members().map(|ind| ind.fitness.loss_v).collect();
        let mut sizes: Vec<f32> = pop.members().map(|ind| ind.fitness.size as f32).collect();
        let mut complexities: Vec<f32> = pop
            .members()
            .map(|ind| ind.fitness.complexity as f32)
            .collect();
        let (best_score, best_score_v) = self
            .best_ind
            .as_ref()
            .map_or((0.0, 0.0), |best| (best.fitness.loss, best.fitness.loss_v));

        LogStats {
            generation,
            time: self.started.elapsed().as_secs_f64(),
            best_score,
            best_score_v,
            med_score: median(&mut losses),
            med_score_v: median(&mut losses_v),
            med_size: median(&mut sizes),
            med_complexity: median(&mut complexities),
            max_size: pop.members().map(|ind| ind.fitness.size).max().unwrap_or(0),
            max_complexity: pop
                .members()
                .map(|ind| ind.fitness.complexity)
                .max()
                .unwrap_or(0),
        }
    }

    /// Checked after each generation only.
    fn should_stop(&self) -> Option<StopReason> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Some(StopReason::Cancelled);
        }
        if self.generation >= self.params.max_gens {
            return Some(StopReason::MaxGenerations);
        }
        if self.params.max_stall != 0 && self.stall_count > self.params.max_stall {
            return Some(StopReason::Stagnation);
        }
        if let Some(limit) = self.params.max_time
            && self.started.elapsed().as_secs_f64() >= limit
        {
            return Some(StopReason::TimeLimit);
        }
        None
    }

    /// Get current progress.
    pub fn progress(&self) -> EvolutionProgress {
        EvolutionProgress {
            generation: self.generation,
            total_generations: self.params.max_gens,
            stats: self.history.last().cloned().unwrap_or_default(),
            stall_count: self.stall_count,
            archive_size: self.archive.len(),
            stage: self.stage,
        }
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn best_individual(&self) -> Option<&Individual> {
        self.best_ind.as_ref()
    }

    pub fn population(&self) -> Option<&Population> {
        self.population.as_ref()
    }

    /// Statistics, one row per generation.
    pub fn stats(&self) -> &[LogStats] {
        &self.history
    }

    pub fn predict(&self, data: &Dataset) -> Result<Vec<f32>, EngineError> {
        let best = self.best_ind.as_ref().ok_or(EngineError::NotFitted)?;
        Ok(best.predict(data)?)
    }

    pub fn predict_proba(&self, data: &Dataset) -> Result<Vec<f32>, EngineError> {
        let best = self.best_ind.as_ref().ok_or(EngineError::NotFitted)?;
        Ok(best.predict_proba(data)?)
    }

    /// Predict with the individual `id`.
    pub fn predict_archive(&self, id: u64, data: &Dataset) -> Result<Vec<f32>, EngineError> {
        Ok(self.find_individual(id)?.predict(data)?)
    }

    pub fn predict_proba_archive(&self, id: u64, data: &Dataset) -> Result<Vec<f32>, EngineError> {
        Ok(self.find_individual(id)?.predict_proba(data)?)
    }

    /// Look `id` up in the best individual, the archive, then the
    /// population.
    pub fn find_individual(&self, id: u64) -> Result<&Individual, EngineError> {
        self.best_ind
            .as_ref()
            .filter(|ind| ind.id == id)
            .or_else(|| self.archive.get(id))
            .or_else(|| {
                self.population
                    .as_ref()
                    .and_then(|pop| pop.members().find(|ind| ind.id == id))
            })
            .ok_or(EngineError::IdNotFound(id))
    }
}

/// Engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error(transparent)]
    SearchSpace(#[from] SearchSpaceError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Population(#[from] PopulationError),
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: EvolutionStage,
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("No individual with id {0} in the best individual, archive or population")]
    IdNotFound(u64),
    #[error("Engine has not been fitted")]
    NotFitted,
    #[error("Saved population has {pop_size} individuals on {num_islands} islands, which does not match the parameters")]
    PopulationMismatch { pop_size: usize, num_islands: usize },
    #[error("Dataset and program type disagree on classification")]
    ProgramTypeMismatch,
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::BTreeMap;

    use super::*;
    use crate::compute::evolution::population::tests::{test_data, test_population};
    use crate::compute::{Column, DataType, Node, Program, Tree};
    use crate::schema::{ProgramType, SelectionKind};

    fn params() -> Parameters {
        Parameters {
            pop_size: 20,
            num_islands: 1,
            max_gens: 5,
            cx_prob: 0.0,
            max_size: 20,
            max_depth: 5,
            random_state: Some(42),
            ..Default::default()
        }
    }

    #[test]
    fn test_best_score_never_increases() {
        let mut engine = Engine::new(params()).unwrap();
        let report = engine.fit(&test_data()).unwrap();

        assert_eq!(report.generations, 5);
        assert_eq!(report.stop_reason, StopReason::MaxGenerations);
        assert_eq!(report.history.len(), 5);
        for pair in report.history.windows(2) {
            assert!(pair[1].best_score <= pair[0].best_score);
        }
        let best = engine.best_individual().unwrap();
        assert_eq!(report.best.loss, best.fitness.loss);
    }

    #[test]
    fn test_callback_per_generation() {
        let calls = Cell::new(0);
        let mut engine = Engine::new(Parameters { max_gens: 3, ..params() }).unwrap();
        engine
            .run_with_callback(&test_data(), |progress| {
                calls.set(calls.get() + 1);
                assert_eq!(progress.generation, calls.get());
                assert_eq!(progress.total_generations, 3);
            })
            .unwrap();
        assert_eq!(calls.get(), 3);
        assert_eq!(engine.progress().stage, EvolutionStage::Complete);
    }

    #[test]
    fn test_cancellation() {
        let mut engine = Engine::new(Parameters { max_gens: 100, ..params() }).unwrap();
        engine.cancel_handle().store(true, Ordering::Relaxed);
        let report = engine.fit(&test_data()).unwrap();
        // Checked at the generation boundary only.
        assert_eq!(report.generations, 1);
        assert_eq!(report.stop_reason, StopReason::Cancelled);
    }

    #[test]
    fn test_lexicase_survival_fails_at_survive_stage() {
        let mut engine = Engine::new(Parameters {
            surv: SelectionKind::Lexicase,
            ..params()
        })
        .unwrap();
        let err = engine.fit(&test_data()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Stage {
                stage: EvolutionStage::Survive,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_id_is_an_error() {
        let mut engine = Engine::new(params()).unwrap();
        let data = test_data();
        assert!(matches!(engine.predict(&data), Err(EngineError::NotFitted)));
        engine.fit(&data).unwrap();
        assert!(matches!(
            engine.predict_archive(u64::MAX, &data),
            Err(EngineError::IdNotFound(u64::MAX))
        ));
    }

    #[test]
    fn test_predict_by_archive_id() {
        let mut engine = Engine::new(params()).unwrap();
        let data = test_data();
        engine.fit(&data).unwrap();

        assert!(!engine.archive().is_empty());
        for ind in engine.archive().iter() {
            let found = engine.find_individual(ind.id).unwrap();
            assert_eq!(found.id, ind.id);
            assert_eq!(engine.predict_archive(ind.id, &data).unwrap().len(), data.n_samples());
        }
        assert_eq!(engine.predict(&data).unwrap().len(), data.n_samples());
    }

    #[test]
    fn test_multi_island_run_keeps_partition() {
        let mut engine = Engine::new(Parameters {
            pop_size: 21,
            num_islands: 4,
            mig_prob: 0.5,
            cx_prob: 0.3,
            max_gens: 3,
            n_jobs: 2,
            ..params()
        })
        .unwrap();
        engine.fit(&test_data()).unwrap();

        let pop = engine.population().unwrap();
        let mut total = 0;
        for island in 0..4 {
            let (start, end) = pop.island_bounds(island);
            assert_eq!(pop.island(island), (start..end).collect::<Vec<_>>().as_slice());
            total += pop.island(island).len();
        }
        assert_eq!(total, 21);
        assert_eq!(pop.members().count(), 21);
    }

    #[test]
    fn test_logfile_and_restart() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("stats.csv");
        let pop_path = dir.path().join("pop.json");

        let mut engine = Engine::new(Parameters {
            max_gens: 3,
            logfile: Some(log_path.clone()),
            save_population: Some(pop_path.clone()),
            ..params()
        })
        .unwrap();
        engine.fit(&test_data()).unwrap();

        let log = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], LogStats::CSV_HEADER);

        let mut restarted = Engine::new(Parameters {
            max_gens: 2,
            load_population: Some(pop_path),
            ..params()
        })
        .unwrap();
        let report = restarted.fit(&test_data()).unwrap();
        assert_eq!(report.generations, 2);
    }

    #[test]
    fn test_restart_rejects_mismatched_population() {
        let dir = tempfile::tempdir().unwrap();
        let pop_path = dir.path().join("pop.json");
        let mut engine = Engine::new(Parameters {
            max_gens: 1,
            save_population: Some(pop_path.clone()),
            ..params()
        })
        .unwrap();
        engine.fit(&test_data()).unwrap();

        let mut other = Engine::new(Parameters {
            pop_size: 10,
            load_population: Some(pop_path),
            ..params()
        })
        .unwrap();
        assert!(matches!(
            other.fit(&test_data()),
            Err(EngineError::PopulationMismatch { pop_size: 20, .. })
        ));
    }

    #[test]
    fn test_stagnation_stops_run() {
        // Every member is the weighted feature and y = 3 * x0, so the first
        // generation already holds a perfect fit that nothing can beat.
        let x: Vec<f32> = (0..10).map(|i| i as f32 / 2.0).collect();
        let y: Vec<f32> = x.iter().map(|v| 3.0 * v).collect();
        let data = Dataset::new(
            BTreeMap::from([("x0".to_string(), Column::Float(x))]),
            y,
            false,
        )
        .unwrap();

        let objectives = vec!["error".to_string()];
        let table = ObjectiveWeights::for_program_type(ProgramType::Regressor);
        let mut pop = test_population(20, 1, 0);
        for ind in pop.individuals.iter_mut().flatten() {
            ind.program = Program::new(ProgramType::Regressor, Tree::leaf(Node::feature("x0", DataType::Float)));
            ind.set_objectives(&objectives, &table).unwrap();
            ind.unfit();
        }
        let dir = tempfile::tempdir().unwrap();
        let pop_path = dir.path().join("pop.json");
        pop.save(&pop_path).unwrap();

        let mut engine = Engine::new(Parameters {
            max_gens: 200,
            max_stall: 2,
            objectives,
            load_population: Some(pop_path),
            ..params()
        })
        .unwrap();
        let report = engine.fit(&data).unwrap();

        assert_eq!(report.stop_reason, StopReason::Stagnation);
        assert_eq!(report.generations, 4);
        assert_eq!(engine.progress().stall_count, 3);
        assert_eq!(report.best.loss, 0.0);
    }

    #[test]
    fn test_batches_score_but_training_data_fits() {
        let data = test_data();
        let mut engine = Engine::new(Parameters {
            max_gens: 3,
            batch_size: 0.3,
            ..params()
        })
        .unwrap();
        engine.fit(&data).unwrap();

        let pop = engine.population().unwrap();
        for ind in pop.members() {
            assert_eq!(ind.error.len(), 3, "scored on a batch");
            let mut refit = ind.program.clone();
            refit.fit(&data).unwrap();
            assert_eq!(refit, ind.program, "weights of {} come from a batch", ind.id);
        }
    }
}
