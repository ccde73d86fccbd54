/// Run report linking inputs, operation results and outputs.
use crate::bounds::PointCloudBounds;
use crate::loader::FileLoadStats;
use anyhow::{Context, Result};
use point_cloud_engine::{Backend, OperationReport, Outcome};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Everything one `process` run did, written as JSON.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// Per-file load statistics in load order.
    pub inputs: Vec<FileLoadStats>,
    pub loaded_points: usize,
    pub input_bounds: Option<PointCloudBounds>,
    /// Operations in the order they ran.
    pub operations: Vec<OperationReport>,
    pub final_points: usize,
    pub final_bounds: Option<PointCloudBounds>,
    pub output: Option<PathBuf>,
    pub census: Option<PathBuf>,
    /// Name of the compute device, if one was attached.
    pub device: Option<String>,
}

impl RunReport {
    /// Writes the report as pretty printed JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        let report_json = serde_json::to_string_pretty(self)?;
        fs::write(path, report_json).with_context(|| format!("failed to write {}", path.display()))?;
        println!("Generated run report: {}", path.display());
        Ok(())
    }

    /// Prints report summary for verification and debugging.
    pub fn print_summary(&self) {
        println!("Run Summary:");
        println!("  Inputs: {} files, {} points", self.inputs.len(), self.loaded_points);
        if let Some(bounds) = &self.input_bounds {
            println!(
                "  Input bounds: ({:.3}, {:.3}, {:.3}) to ({:.3}, {:.3}, {:.3})",
                bounds.min.x, bounds.min.y, bounds.min.z, bounds.max.x, bounds.max.y, bounds.max.z
            );
        }
        match &self.device {
            Some(device) => println!("  Compute device: {device}"),
            None => println!("  Compute device: none (CPU only)"),
        }

        for report in &self.operations {
            let backend = match report.backend {
                Backend::Cpu => "CPU",
                Backend::Device => "device",
            };
            let status = match report.outcome {
                Outcome::Applied => format!("{} -> {} points", report.before, report.after),
                Outcome::Emptied => format!("{} -> 0 points (emptied)", report.before),
                Outcome::Skipped(reason) => format!("skipped ({reason:?})"),
            };
            println!(
                "  {:<24} [{backend}] {status} in {:.1} ms",
                report.operation.to_string(),
                report.elapsed.as_secs_f64() * 1000.0
            );
        }
        println!("  Final points: {}", self.final_points);
    }
}
