//! Symbolic regression on a noisy quadratic, at several island counts.

use std::collections::BTreeMap;
use std::time::Instant;

use archipelago::{Column, Dataset, Engine, Parameters, compute::evolution::EvoRng};

fn main() {
    env_logger::init();

    println!("=== Symbolic Regression ===\n");

    let mut rng = EvoRng::new(1);
    let x: Vec<f32> = (0..100).map(|i| i as f32 / 20.0 - 2.5).collect();
    let y: Vec<f32> = x
        .iter()
        .map(|x| 0.5 * x * x - x + 2.0 + 0.05 * rng.normal())
        .collect();
    let features = BTreeMap::from([("x".to_string(), Column::Float(x))]);
    let data = Dataset::new(features, y, false).expect("valid dataset");

    for num_islands in [1, 2, 4, 8] {
        let params = Parameters {
            pop_size: 200,
            num_islands,
            max_gens: 30,
            n_jobs: 0,
            validation_size: 0.25,
            random_state: Some(42),
            ..Default::default()
        };

        let start = Instant::now();
        let mut engine = Engine::new(params).expect("valid parameters");
        let report = engine.fit(&data).expect("run");
        let elapsed = start.elapsed();

        println!("Islands: {}", num_islands);
        println!("  Generations:    {}", report.generations);
        println!("  Elapsed:        {:.2}s", elapsed.as_secs_f64());
        println!("  Best loss:      {:.5} (val {:.5})", report.best.loss, report.best.loss_v);
        println!("  Best model:     {}", report.best.model);
        println!("  Archive size:   {}", report.archive.len());
        println!();
    }
}
