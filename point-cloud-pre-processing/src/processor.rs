/// Point cloud processor orchestrating loading, operations and outputs.
use crate::bounds::PointCloudBounds;
use crate::loader::{FileLoadStats, load_sources};
use crate::report::RunReport;
use anyhow::{Context, Result};
use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};
use point_cloud_engine::compute::DeviceDescriptor;
use point_cloud_engine::{Backend, OperationReport, PointCloudPipeline, ViewerSettings};
use std::path::PathBuf;
use tracing::error;

/// One processing step requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Operation {
    /// Keep points in voxels with enough points.
    Density,
    /// Keep points with enough neighbours within the search radius.
    Noise,
    /// Erode then dilate the voxel occupancy.
    Morphology,
    /// Add synthesised points to dense voxels.
    Complement,
}

/// Loads the configured sources and runs operations on them in order.
/// Owns the pipeline and the load statistics for the run report.
pub struct PointCloudProcessor {
    pipeline: PointCloudPipeline,
    inputs: Vec<FileLoadStats>,
    loaded_points: usize,
    input_bounds: Option<PointCloudBounds>,
}

impl PointCloudProcessor {
    /// Create processor and attach a compute device when any operation requests one.
    /// An unavailable device leaves every operation on the CPU.
    pub fn new(settings: ViewerSettings) -> Result<Self> {
        let threads = settings.acceleration.threads;
        let wants_device = settings.acceleration.any_requested();
        let mut pipeline = PointCloudPipeline::new(settings).context("invalid settings")?;
        if wants_device {
            pipeline.try_attach_device(DeviceDescriptor {
                threads,
                ..Default::default()
            });
        }

        Ok(Self {
            pipeline,
            inputs: Vec::new(),
            loaded_points: 0,
            input_bounds: None,
        })
    }

    pub fn pipeline(&mut self) -> &mut PointCloudPipeline {
        &mut self.pipeline
    }

    /// Load every enabled file source into the pipeline.
    /// Returns the number of points loaded.
    pub fn load(&mut self) -> usize {
        let (snapshot, inputs) = load_sources(self.pipeline.settings().enabled_files());
        self.input_bounds = PointCloudBounds::from_positions(snapshot.positions());
        self.loaded_points = snapshot.len();
        self.inputs = inputs;

        println!("Loaded {} points from {} files", self.loaded_points, self.inputs.len());
        if let Some(bounds) = &self.input_bounds {
            print_bounds(bounds);
        }
        self.pipeline.set_data(snapshot);
        self.loaded_points
    }

    /// Run `operations` in order. A failed operation is logged and the next one runs on the
    /// snapshot it left untouched.
    pub fn run(&mut self, operations: &[Operation]) -> Vec<OperationReport> {
        let mut reports = Vec::with_capacity(operations.len());
        for &operation in operations {
            let result = match operation {
                Operation::Density => self.pipeline.apply_density_filter(),
                Operation::Noise => self.run_noise_filter(),
                Operation::Morphology => self.pipeline.apply_morphology(),
                Operation::Complement => self.pipeline.apply_density_complementation(),
            };
            match result {
                Ok(report) => reports.push(report),
                Err(err) => error!(?operation, error = %err, "operation failed, keeping previous points"),
            }
        }
        reports
    }

    /// Runs the noise filter in batches with a progress bar on the CPU path.
    fn run_noise_filter(&mut self) -> Result<OperationReport, point_cloud_engine::PipelineError> {
        if self.pipeline.noise_filter_backend() == Backend::Device {
            return self.pipeline.apply_noise_filter();
        }

        let mut task = self.pipeline.start_noise_filter();
        let pb = ProgressBar::new(task.total() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40.green/blue}] {pos}/{len} points ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("▉▊▋▌▍▎▏ "),
        );
        pb.set_message("Filtering noise");
        while !task.is_complete() {
            task.step();
            pb.set_position(task.processed() as u64);
        }
        pb.finish_with_message("Noise filtered");

        self.pipeline.commit_noise_filter(task)
    }

    pub fn report(
        &self,
        operations: Vec<OperationReport>,
        output: Option<PathBuf>,
        census: Option<PathBuf>,
    ) -> RunReport {
        let snapshot = self.pipeline.snapshot();
        RunReport {
            inputs: self.inputs.clone(),
            loaded_points: self.loaded_points,
            input_bounds: self.input_bounds,
            operations,
            final_points: snapshot.len(),
            final_bounds: PointCloudBounds::from_positions(snapshot.positions()),
            output,
            census,
            device: self.pipeline.device().map(|device| device.label().to_string()),
        }
    }
}

/// Print coordinate bounds information for validation.
fn print_bounds(bounds: &PointCloudBounds) {
    let size = bounds.dimensions();
    println!("Bounds:");
    println!("  X: {:.3} to {:.3}", bounds.min.x, bounds.max.x);
    println!("  Y: {:.3} to {:.3}", bounds.min.y, bounds.max.y);
    println!("  Z: {:.3} to {:.3}", bounds.min.z, bounds.max.z);
    println!("  Size: {:.3} x {:.3} x {:.3}", size.x, size.y, size.z);
}
