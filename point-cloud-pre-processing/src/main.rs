/// Point cloud pre-processing command line entry point
mod bounds;
mod config;
mod loader;
mod output;
mod processor;
mod report;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use config::{Overrides, load_settings, parse_input, parse_vec3};
use constants::processing::DEFAULT_PICK_DISTANCE;
use glam::Vec3;
use point_cloud_engine::ViewerSettings;
use point_cloud_engine::settings::FileSource;
use processor::{Operation, PointCloudProcessor};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "point-cloud-pre-processing", version, about = "Voxel filtering and densification for scanned point clouds")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Where points come from and the settings they are processed with.
#[derive(Args)]
struct InputArgs {
    /// JSON settings file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// Point file, optionally with a default colour: `path[:r,g,b]`. Replaces the configured files.
    #[arg(long = "input", value_parser = parse_input)]
    inputs: Vec<FileSource>,
    #[arg(long)]
    voxel_size: Option<f32>,
    /// Run every operation on the compute device
    #[arg(long)]
    gpu: bool,
    /// Compute device worker threads
    #[arg(long)]
    threads: Option<usize>,
    /// Seed for random point placement
    #[arg(long)]
    seed: Option<u64>,
}

impl InputArgs {
    fn settings(self) -> Result<ViewerSettings> {
        let mut settings = load_settings(self.config.as_deref())?;
        Overrides {
            inputs: self.inputs,
            voxel_size: self.voxel_size,
            gpu: self.gpu,
            threads: self.threads,
            seed: self.seed,
        }
        .apply(&mut settings);
        Ok(settings)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Load points, run operations in order and write the result
    Process {
        #[command(flatten)]
        input: InputArgs,
        /// Comma separated operations, e.g. `noise,density,morphology,complement`
        #[arg(long, value_enum, value_delimiter = ',', required = true)]
        ops: Vec<Operation>,
        /// Output point file (`x,y,z,r,g,b`)
        #[arg(long)]
        output: PathBuf,
        /// Voxel census CSV of the processed points
        #[arg(long)]
        census: Option<PathBuf>,
        /// JSON run report
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Write the voxel census of the loaded points
    Census {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long)]
        output: PathBuf,
    },
    /// Pick the point nearest a ray and count its neighbours
    Query {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long, value_parser = parse_vec3, allow_hyphen_values = true)]
        origin: Vec3,
        #[arg(long, value_parser = parse_vec3, allow_hyphen_values = true)]
        direction: Vec3,
        #[arg(long, default_value_t = DEFAULT_PICK_DISTANCE)]
        max_distance: f32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match Cli::parse().command {
        Command::Process {
            input,
            ops,
            output,
            census,
            report,
        } => {
            let mut processor = PointCloudProcessor::new(input.settings()?)?;
            if processor.load() == 0 {
                bail!("no points loaded from the configured files");
            }

            let operations = processor.run(&ops);
            output::write_points(&output, processor.pipeline().snapshot())?;
            if let Some(census_path) = &census {
                let entries = processor.pipeline().voxel_census();
                output::write_census(census_path, &entries)?;
            }

            let run_report = processor.report(operations, Some(output), census);
            run_report.print_summary();
            if let Some(report_path) = report {
                run_report.write(&report_path)?;
            }
        }
        Command::Census { input, output } => {
            let mut processor = PointCloudProcessor::new(input.settings()?)?;
            processor.load();
            let entries = processor.pipeline().voxel_census();
            output::write_census(&output, &entries)?;
        }
        Command::Query {
            input,
            origin,
            direction,
            max_distance,
        } => {
            let mut processor = PointCloudProcessor::new(input.settings()?)?;
            processor.load();
            let pipeline = processor.pipeline();
            match pipeline.pick_point(origin, direction, max_distance) {
                Some(index) => {
                    let position = pipeline.snapshot().positions()[index];
                    let neighbors = pipeline.find_neighbors(index).len();
                    println!(
                        "Picked point {index} at ({:.4}, {:.4}, {:.4}): {neighbors} neighbours within {}",
                        position.x,
                        position.y,
                        position.z,
                        pipeline.settings().processing.search_radius
                    );
                }
                None => println!("No point within {max_distance} of the ray"),
            }
        }
    }

    Ok(())
}
