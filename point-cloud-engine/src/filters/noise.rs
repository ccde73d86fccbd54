/// Neighbour-count noise filter, including the cooperative batched variant.
use super::AppendBuffer;
use crate::compute::point::snapshot_from_gpu_points;
use crate::compute::{ComputeDevice, DevicePointCloud, workgroup_count};
use crate::error::ComputeError;
use crate::grid::{GpuVoxelGrid, VoxelHashGrid, VoxelIndex};
use crate::snapshot::PointCloudSnapshot;
use constants::compute::{NOISE_FILTER_BATCH_SIZE, POINT_WORKGROUP_SIZE};
use std::sync::Arc;

/// Keeps the points with at least `threshold` neighbours within `radius`, in snapshot order.
pub fn noise_filter_cpu(
    snapshot: &PointCloudSnapshot,
    grid: &VoxelHashGrid,
    radius: f32,
    threshold: u32,
) -> PointCloudSnapshot {
    let keep: Vec<u32> = (0..snapshot.len())
        .filter(|&i| passes(grid, snapshot, i, radius, threshold))
        .map(|i| i as u32)
        .collect();
    snapshot.select(&keep)
}

fn passes(grid: &VoxelHashGrid, snapshot: &PointCloudSnapshot, index: usize, radius: f32, threshold: u32) -> bool {
    threshold == 0 || grid.count_neighbors(snapshot.positions(), index, radius) >= threshold as usize
}

/// Progress of a [`NoiseFilterJob`] after one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobProgress {
    InProgress { processed: usize, total: usize },
    Complete { kept: usize, total: usize },
}

/// Noise filter that processes a bounded batch of points per [`NoiseFilterJob::step`].
///
/// The caller decides when to step, so a single-threaded host loop never blocks for more than
/// one batch. The result is identical to [`noise_filter_cpu`].
#[derive(Debug, Clone)]
pub struct NoiseFilterJob {
    snapshot: Arc<PointCloudSnapshot>,
    grid: Arc<VoxelHashGrid>,
    radius: f32,
    threshold: u32,
    batch_size: usize,
    next: usize,
    kept: Vec<u32>,
}

impl NoiseFilterJob {
    pub fn new(snapshot: Arc<PointCloudSnapshot>, grid: Arc<VoxelHashGrid>, radius: f32, threshold: u32) -> Self {
        Self {
            snapshot,
            grid,
            radius,
            threshold,
            batch_size: NOISE_FILTER_BATCH_SIZE,
            next: 0,
            kept: Vec::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn total(&self) -> usize {
        self.snapshot.len()
    }

    pub fn processed(&self) -> usize {
        self.next
    }

    pub fn is_complete(&self) -> bool {
        self.next >= self.total()
    }

    /// Filters the next batch.
    pub fn step(&mut self) -> JobProgress {
        let end = (self.next + self.batch_size).min(self.total());
        for index in self.next..end {
            if passes(&self.grid, &self.snapshot, index, self.radius, self.threshold) {
                self.kept.push(index as u32);
            }
        }
        self.next = end;

        if self.is_complete() {
            JobProgress::Complete {
                kept: self.kept.len(),
                total: self.total(),
            }
        } else {
            JobProgress::InProgress {
                processed: self.next,
                total: self.total(),
            }
        }
    }

    /// Runs any remaining batches and returns the filtered snapshot.
    pub fn finish(mut self) -> PointCloudSnapshot {
        while !self.is_complete() {
            self.step();
        }
        self.snapshot.select(&self.kept)
    }
}

/// Device variant: one invocation per point counts its neighbours and appends itself.
pub fn noise_filter_gpu(
    device: &ComputeDevice,
    cloud: &DevicePointCloud,
    grid: &GpuVoxelGrid,
    radius: f32,
    threshold: u32,
) -> Result<PointCloudSnapshot, ComputeError> {
    let view = grid.view()?;
    let point_count = cloud.len();
    let points = cloud.buffer();
    let output = AppendBuffer::new(device, "noise_filter_output", point_count)?;

    device.dispatch(
        "noise_filter",
        workgroup_count(point_count, POINT_WORKGROUP_SIZE),
        POINT_WORKGROUP_SIZE,
        |id| {
            let index = id as usize;
            if index >= point_count {
                return;
            }
            if threshold > 0 && view.count_neighbors(points, index, radius) < threshold as usize {
                return;
            }
            let slot = output.reserve(1);
            output.put(slot, points.load(index));
        },
    );

    Ok(snapshot_from_gpu_points(&output.read_appended("noise filter output")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec4};

    fn blob_with_outlier() -> PointCloudSnapshot {
        let mut positions: Vec<Vec3> = (0..27)
            .map(|i| Vec3::new((i % 3) as f32, ((i / 3) % 3) as f32, (i / 9) as f32) * 0.01)
            .collect();
        positions.push(Vec3::splat(5.0));
        PointCloudSnapshot::with_uniform_colour(positions, Vec4::ONE)
    }

    #[test]
    fn isolated_point_is_removed() {
        let snapshot = blob_with_outlier();
        let grid = VoxelHashGrid::build(snapshot.positions(), 0.05);
        let filtered = noise_filter_cpu(&snapshot, &grid, 0.01, 1);

        assert_eq!(filtered.len(), 27);
        assert!(filtered.positions().iter().all(|p| p.x < 1.0));
    }

    #[test]
    fn zero_threshold_keeps_everything() {
        let snapshot = blob_with_outlier();
        let grid = VoxelHashGrid::build(snapshot.positions(), 0.05);
        assert_eq!(noise_filter_cpu(&snapshot, &grid, 0.0, 0), snapshot);
    }

    #[test]
    fn batched_job_matches_direct_filter() {
        let snapshot = Arc::new(blob_with_outlier());
        let grid = Arc::new(VoxelHashGrid::build(snapshot.positions(), 0.05));
        let expected = noise_filter_cpu(&snapshot, &grid, 0.015, 4);

        let mut job = NoiseFilterJob::new(Arc::clone(&snapshot), Arc::clone(&grid), 0.015, 4).with_batch_size(5);
        let mut steps = 0;
        loop {
            steps += 1;
            match job.step() {
                JobProgress::InProgress { processed, total } => {
                    assert_eq!(processed, steps * 5);
                    assert_eq!(total, 28);
                }
                JobProgress::Complete { kept, .. } => {
                    assert_eq!(kept, expected.len());
                    break;
                }
            }
        }
        assert_eq!(steps, 6);
        assert_eq!(job.finish(), expected);
    }

    #[test]
    fn empty_snapshot_completes_immediately() {
        let snapshot = Arc::new(PointCloudSnapshot::empty());
        let grid = Arc::new(VoxelHashGrid::build(snapshot.positions(), 0.05));
        let mut job = NoiseFilterJob::new(snapshot, grid, 0.1, 1);
        assert!(job.is_complete());
        assert_eq!(job.step(), JobProgress::Complete { kept: 0, total: 0 });
        assert!(job.finish().is_empty());
    }
}
