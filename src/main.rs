//! Archipelago CLI - Run an evolutionary search from JSON files.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use archipelago::{Column, Dataset, DatasetFile, Engine, Parameters};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "--example" {
        print_example_files();
        return;
    }

    if args.len() < 3 {
        eprintln!("Usage: {} <params.json> <dataset.json>", args[0]);
        eprintln!();
        eprintln!("Evolve models for a dataset with the given run parameters.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  params.json   Path to run parameters (missing fields use defaults)");
        eprintln!("  dataset.json  Path to dataset: {{\"features\": {{...}}, \"y\": [...]}}");
        eprintln!();
        eprintln!("Example files are printed with the --example flag.");
        std::process::exit(1);
    }

    let params_path = PathBuf::from(&args[1]);
    let data_path = PathBuf::from(&args[2]);

    let params_str = fs::read_to_string(&params_path).unwrap_or_else(|e| {
        eprintln!("Error reading parameters file: {}", e);
        std::process::exit(1);
    });
    let params: Parameters = serde_json::from_str(&params_str).unwrap_or_else(|e| {
        eprintln!("Error parsing parameters: {}", e);
        std::process::exit(1);
    });

    let data_str = fs::read_to_string(&data_path).unwrap_or_else(|e| {
        eprintln!("Error reading dataset file: {}", e);
        std::process::exit(1);
    });
    let data: Dataset = serde_json::from_str(&data_str).unwrap_or_else(|e| {
        eprintln!("Error parsing dataset: {}", e);
        std::process::exit(1);
    });

    println!("Archipelago");
    println!("===========");
    println!("Program type: {}", params.program_type);
    println!(
        "Population: {} on {} islands",
        params.pop_size, params.num_islands
    );
    println!("Objectives: {}", params.objectives.join(", "));
    println!("Samples: {}", data.n_samples());
    println!();

    let mut engine = Engine::new(params).unwrap_or_else(|e| {
        eprintln!("Invalid parameters: {}", e);
        std::process::exit(1);
    });

    let report = engine.fit(&data).unwrap_or_else(|e| {
        eprintln!("Run failed: {}", e);
        std::process::exit(1);
    });

    println!(
        "Stopped after {} generations ({:?}) in {:.2}s",
        report.generations, report.stop_reason, report.elapsed_seconds
    );
    println!();
    println!("Best model (id {}):", report.best.id);
    println!("  {}", report.best.model);
    println!(
        "  loss {:.6}, validation loss {:.6}, complexity {}, size {}",
        report.best.loss, report.best.loss_v, report.best.complexity, report.best.size
    );
    println!();
    println!("Archive ({} models):", report.archive.len());
    for model in &report.archive {
        println!(
            "  [{}] loss {:.6} complexity {:>6}  {}",
            model.id, model.loss, model.complexity, model.model
        );
    }
}

fn print_example_files() {
    let params = Parameters {
        pop_size: 200,
        num_islands: 4,
        max_gens: 50,
        random_state: Some(0),
        ..Default::default()
    };

    let x: Vec<f32> = (0..20).map(|i| i as f32 / 4.0).collect();
    let y: Vec<f32> = x.iter().map(|x| x * x - 2.0 * x + 1.0).collect();
    let data = DatasetFile {
        features: BTreeMap::from([("x".to_string(), Column::Float(x))]),
        y,
        classification: false,
    };

    println!("params.json:");
    println!(
        "{}",
        serde_json::to_string_pretty(&params).unwrap_or_default()
    );
    println!();
    println!("dataset.json:");
    println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
}
