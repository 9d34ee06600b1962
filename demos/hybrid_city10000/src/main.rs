use argh::FromArgs;
use std::path::PathBuf;

use kornia_hybrid::SmootherConfig;

mod dataset;
mod experiment;
mod factors;
mod pose2;

use experiment::{write_poses, write_times, Experiment, ExperimentParams};

#[derive(FromArgs)]
/// Hybrid smoothing of the City10000 dataset with ambiguous odometry and loop closures
struct Args {
    /// path to the multi-hypothesis edge file, e.g. T1_city10000_04.txt
    #[argh(option)]
    data_path: PathBuf,

    /// maximum number of dataset lines to process
    #[argh(option, default = "3000")]
    max_loop_count: usize,

    /// number of hybrid factors between two smoother updates
    #[argh(option, default = "3")]
    update_frequency: usize,

    /// maximum number of discrete hypotheses kept after each update
    #[argh(option, default = "10")]
    max_nr_hypotheses: usize,

    /// optional JSON file with the smoother configuration
    #[argh(option)]
    config: Option<PathBuf>,

    /// where to write the estimated poses
    #[argh(option, default = "PathBuf::from(\"Hybrid_City10000.txt\")")]
    output: PathBuf,

    /// where to write the accumulated odometry times
    #[argh(option, default = "PathBuf::from(\"Hybrid_City10000_time.txt\")")]
    time_output: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let config: SmootherConfig = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => SmootherConfig::default(),
    };
    config.validate()?;

    let measurements = dataset::read_dataset(&args.data_path, args.max_loop_count)?;
    println!(
        "Read {} measurements from {}",
        measurements.len(),
        args.data_path.display()
    );

    let params = ExperimentParams {
        max_loop_count: args.max_loop_count,
        update_frequency: args.update_frequency,
        max_nr_hypotheses: args.max_nr_hypotheses,
        ..Default::default()
    };
    let outcome = Experiment::new(params, config)?.run(&measurements)?;

    let total: f64 = outcome.update_times.iter().map(|t| t.as_secs_f64()).sum();
    println!(
        "{} smoother updates in {:.3} s, final error {}",
        outcome.update_times.len(),
        total,
        outcome.final_error
    );

    write_poses(&args.output, &outcome.poses)?;
    println!("Output written to {}", args.output.display());
    write_times(&args.time_output, &outcome.odometry_times)?;
    println!("Output {} file.", args.time_output.display());

    Ok(())
}
