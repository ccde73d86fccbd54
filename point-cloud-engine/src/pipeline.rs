//! Single-operation-at-a-time processing pipeline.
//!
//! [`PointCloudPipeline`] owns the current snapshot and the grids built over it. Grids are built
//! lazily before the first operation that needs them and dropped whenever the snapshot is
//! replaced. Device buffers are released explicitly at that point.
//!
//! Every `apply_*` call either commits a new snapshot and returns an [`OperationReport`], or
//! returns an error and leaves the current snapshot untouched.

use crate::compute::{ComputeDevice, DeviceDescriptor, DevicePointCloud};
use crate::error::{ComputeError, PipelineError, SettingsError};
use crate::filters::placement::wall_clock_seed;
use crate::filters::{
    Complementation, JobProgress, NoiseFilterJob, complement_cpu, complement_gpu, density_filter_cpu,
    density_filter_gpu, morphology_cpu, morphology_gpu, noise_filter_cpu, noise_filter_gpu,
};
use crate::grid::{GpuVoxelGrid, VoxelCensusEntry, VoxelHashGrid, VoxelIndex};
use crate::query;
use crate::settings::{SettingsChange, ViewerSettings};
use crate::snapshot::PointCloudSnapshot;
use glam::Vec3;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    DensityFilter,
    NoiseFilter,
    Morphology,
    DensityComplementation,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DensityFilter => "density filter",
            Self::NoiseFilter => "noise filter",
            Self::Morphology => "morphology",
            Self::DensityComplementation => "density complementation",
        })
    }
}

/// Execution path an operation ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Cpu,
    Device,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cpu => "cpu",
            Self::Device => "device",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EmptyInput,
    ZeroPointsPerAxis,
    NoQualifyingVoxels,
    NoIterations,
}

/// How an operation ended. `Emptied` is a successful run that removed every point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum Outcome {
    Applied,
    Emptied,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationReport {
    pub operation: OperationKind,
    pub backend: Backend,
    pub before: usize,
    pub after: usize,
    pub elapsed: Duration,
    pub outcome: Outcome,
}

impl OperationReport {
    pub fn removed(&self) -> usize {
        self.before.saturating_sub(self.after)
    }

    pub fn added(&self) -> usize {
        self.after.saturating_sub(self.before)
    }
}

/// Device-resident copy of the current snapshot and the grid built over it.
struct DeviceState {
    cloud: DevicePointCloud,
    grid: GpuVoxelGrid,
}

impl DeviceState {
    fn prepare(device: &ComputeDevice, snapshot: &PointCloudSnapshot, voxel_size: f32) -> Result<Self, ComputeError> {
        let cloud = DevicePointCloud::upload(device, snapshot)?;
        let mut grid = GpuVoxelGrid::new(voxel_size);
        grid.build(device, cloud.buffer(), cloud.len())?;
        Ok(Self { cloud, grid })
    }

    fn release(mut self) {
        self.grid.release_buffers();
    }
}

/// A cooperative noise filter run started from the pipeline.
///
/// Step it from the host loop, then hand it back with
/// [`PointCloudPipeline::commit_noise_filter`]. A task is rejected if the pipeline's data
/// changed after it was started.
pub struct NoiseFilterTask {
    job: NoiseFilterJob,
    generation: u64,
    before: usize,
    started: Instant,
}

impl NoiseFilterTask {
    pub fn step(&mut self) -> JobProgress {
        self.job.step()
    }

    pub fn is_complete(&self) -> bool {
        self.job.is_complete()
    }

    pub fn processed(&self) -> usize {
        self.job.processed()
    }

    pub fn total(&self) -> usize {
        self.job.total()
    }
}

pub struct PointCloudPipeline {
    settings: ViewerSettings,
    snapshot: Arc<PointCloudSnapshot>,
    generation: u64,
    grid: Option<Arc<VoxelHashGrid>>,
    device: Option<ComputeDevice>,
    device_state: Option<DeviceState>,
    /// Random placement seed used whenever the settings leave it unset.
    run_seed: u64,
}

impl PointCloudPipeline {
    pub fn new(mut settings: ViewerSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        let run_seed = wall_clock_seed();
        if settings.processing.complementation.pin_seed(run_seed) && settings.processing.complementation.random_placement
        {
            info!(seed = run_seed, "random placement seeded from the wall clock");
        }
        Ok(Self {
            run_seed,
            settings,
            snapshot: Arc::new(PointCloudSnapshot::empty()),
            generation: 0,
            grid: None,
            device: None,
            device_state: None,
        })
    }

    pub fn with_device(mut self, device: ComputeDevice) -> Self {
        self.attach_device(device);
        self
    }

    pub fn attach_device(&mut self, device: ComputeDevice) {
        self.release_device_state();
        self.device = Some(device);
    }

    /// Creates a compute device from `descriptor`. An unavailable device is logged and the
    /// pipeline keeps running on the CPU.
    pub fn try_attach_device(&mut self, descriptor: DeviceDescriptor) -> bool {
        match ComputeDevice::new(descriptor) {
            Ok(device) => {
                self.attach_device(device);
                true
            }
            Err(err) => {
                warn!(%err, "compute device unavailable, operations will run on the CPU");
                false
            }
        }
    }

    pub fn device(&self) -> Option<&ComputeDevice> {
        self.device.as_ref()
    }

    pub fn settings(&self) -> &ViewerSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> &Arc<PointCloudSnapshot> {
        &self.snapshot
    }

    /// Increments whenever the snapshot is replaced.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replaces the current snapshot, invalidating both grids and releasing device buffers.
    pub fn set_data(&mut self, snapshot: PointCloudSnapshot) {
        self.release_device_state();
        self.grid = None;
        self.snapshot = Arc::new(snapshot);
        self.generation += 1;
        debug!(points = self.snapshot.len(), generation = self.generation, "snapshot replaced");
    }

    /// Applies new settings and returns what changed. Invalid settings are rejected and the old
    /// ones kept.
    pub fn update_settings(&mut self, mut settings: ViewerSettings) -> Result<SettingsChange, SettingsError> {
        settings.validate()?;
        settings.processing.complementation.pin_seed(self.run_seed);
        let change = SettingsChange::between(&self.settings, &settings);
        self.settings = settings;
        if change.voxel_size {
            self.grid = None;
            self.release_device_state();
            debug!(voxel_size = self.settings.processing.voxel_size, "voxel size changed, grids invalidated");
        }
        Ok(change)
    }

    /// Grid over the current snapshot, built on first use.
    pub fn grid(&mut self) -> Arc<VoxelHashGrid> {
        let voxel_size = self.settings.processing.voxel_size;
        let snapshot = &self.snapshot;
        Arc::clone(self.grid.get_or_insert_with(|| {
            let started = Instant::now();
            let grid = VoxelHashGrid::build(snapshot.positions(), voxel_size);
            debug!(
                voxels = grid.voxel_count(),
                points = grid.point_count(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "voxel grid built"
            );
            Arc::new(grid)
        }))
    }

    pub fn voxel_census(&mut self) -> Vec<VoxelCensusEntry> {
        self.grid().census()
    }

    /// Points within the search radius of point `index`.
    pub fn find_neighbors(&mut self, index: usize) -> Vec<u32> {
        let radius = self.settings.processing.search_radius;
        let grid = self.grid();
        grid.find_neighbors(self.snapshot.positions(), index, radius)
    }

    pub fn pick_point(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<usize> {
        query::pick_point(&self.snapshot, origin, direction, max_distance)
    }

    pub fn apply_density_filter(&mut self) -> Result<OperationReport, PipelineError> {
        let kind = OperationKind::DensityFilter;
        let backend = self.backend_for(kind, self.settings.acceleration.use_gpu_density_filter);
        let started = Instant::now();
        if self.snapshot.is_empty() {
            return Ok(self.skip(kind, backend, started, SkipReason::EmptyInput));
        }
        let threshold = self.settings.processing.voxel_density_threshold;

        let filtered = match backend {
            Backend::Cpu => {
                let grid = self.grid();
                density_filter_cpu(&self.snapshot, &grid, threshold)
            }
            Backend::Device => self.run_on_device(kind, |device, state| {
                density_filter_gpu(device, &state.cloud, &state.grid, threshold)
            })?,
        };
        Ok(self.commit(kind, backend, started, filtered))
    }

    pub fn apply_noise_filter(&mut self) -> Result<OperationReport, PipelineError> {
        let kind = OperationKind::NoiseFilter;
        let backend = self.noise_filter_backend();
        let started = Instant::now();
        if self.snapshot.is_empty() {
            return Ok(self.skip(kind, backend, started, SkipReason::EmptyInput));
        }
        let radius = self.settings.processing.search_radius;
        let threshold = self.settings.processing.neighbor_threshold;

        let filtered = match backend {
            Backend::Cpu => {
                let grid = self.grid();
                noise_filter_cpu(&self.snapshot, &grid, radius, threshold)
            }
            Backend::Device => self.run_on_device(kind, |device, state| {
                noise_filter_gpu(device, &state.cloud, &state.grid, radius, threshold)
            })?,
        };
        Ok(self.commit(kind, backend, started, filtered))
    }

    /// Starts a batched CPU noise filter over the current snapshot.
    pub fn start_noise_filter(&mut self) -> NoiseFilterTask {
        let processing = &self.settings.processing;
        let (radius, threshold) = (processing.search_radius, processing.neighbor_threshold);
        let grid = self.grid();
        info!(points = self.snapshot.len(), radius, threshold, "noise filter started (batched)");
        NoiseFilterTask {
            job: NoiseFilterJob::new(Arc::clone(&self.snapshot), grid, radius, threshold),
            generation: self.generation,
            before: self.snapshot.len(),
            started: Instant::now(),
        }
    }

    /// Completes `task` (running any remaining batches) and commits its result.
    pub fn commit_noise_filter(&mut self, task: NoiseFilterTask) -> Result<OperationReport, PipelineError> {
        if task.generation != self.generation {
            warn!(job = task.generation, current = self.generation, "discarding stale noise filter job");
            return Err(PipelineError::StaleJob {
                job: task.generation,
                current: self.generation,
            });
        }
        let kind = OperationKind::NoiseFilter;
        if task.before == 0 {
            return Ok(self.skip(kind, Backend::Cpu, task.started, SkipReason::EmptyInput));
        }
        let started = task.started;
        let filtered = task.job.finish();
        Ok(self.commit(kind, Backend::Cpu, started, filtered))
    }

    pub fn apply_morphology(&mut self) -> Result<OperationReport, PipelineError> {
        let kind = OperationKind::Morphology;
        let backend = self.backend_for(kind, self.settings.acceleration.use_gpu_morphology);
        let started = Instant::now();
        let params = self.settings.processing.morphology_params();
        if self.snapshot.is_empty() {
            return Ok(self.skip(kind, backend, started, SkipReason::EmptyInput));
        }
        if params.total_iterations() == 0 {
            return Ok(self.skip(kind, backend, started, SkipReason::NoIterations));
        }

        let outcome = match (backend, self.device.as_ref()) {
            (Backend::Device, Some(device)) => {
                morphology_gpu(device, &self.snapshot, &params).inspect_err(|err| {
                    error!(%err, operation = %kind, "device operation failed, snapshot kept");
                })?
            }
            _ => morphology_cpu(&self.snapshot, &params),
        };
        if outcome.stopped_early {
            info!(iterations = outcome.iterations_run, "morphology yielded no points");
        }
        Ok(self.commit(kind, backend, started, outcome.snapshot))
    }

    pub fn apply_density_complementation(&mut self) -> Result<OperationReport, PipelineError> {
        let kind = OperationKind::DensityComplementation;
        let backend = self.backend_for(kind, self.settings.acceleration.use_gpu_complementation);
        let started = Instant::now();
        if self.snapshot.is_empty() {
            return Ok(self.skip(kind, backend, started, SkipReason::EmptyInput));
        }
        let params = self.settings.processing.complementation_params();

        let result = match backend {
            Backend::Cpu => {
                let grid = self.grid();
                complement_cpu(&self.snapshot, grid.as_ref(), &params)
            }
            Backend::Device => self.run_on_device(kind, |device, state| {
                complement_gpu(device, &state.cloud, &state.grid, &params)
            })?,
        };

        match result {
            Complementation::Added { snapshot, added } => {
                debug!(added, "complementation synthesised points");
                Ok(self.commit(kind, backend, started, snapshot))
            }
            Complementation::ZeroPointsPerAxis => {
                warn!("points per axis is 0, complementation skipped");
                Ok(self.skip(kind, backend, started, SkipReason::ZeroPointsPerAxis))
            }
            Complementation::NoQualifyingVoxels => {
                warn!(
                    threshold = params.density_threshold,
                    "no voxel reached the complementation threshold, no points added"
                );
                Ok(self.skip(kind, backend, started, SkipReason::NoQualifyingVoxels))
            }
        }
    }

    /// Path the noise filter will take: the device when requested and attached.
    pub fn noise_filter_backend(&self) -> Backend {
        self.backend_for(OperationKind::NoiseFilter, self.settings.acceleration.use_gpu_noise_filter)
    }

    fn backend_for(&self, kind: OperationKind, requested: bool) -> Backend {
        match (requested, self.device.is_some()) {
            (true, true) => Backend::Device,
            (true, false) => {
                warn!(operation = %kind, "device execution requested but no compute device is attached, using CPU");
                Backend::Cpu
            }
            (false, _) => Backend::Cpu,
        }
    }

    /// Runs `op` against the device copy of the current snapshot, uploading it first if needed.
    /// Device state is dropped after a failure so the next call starts clean.
    fn run_on_device<R>(
        &mut self,
        kind: OperationKind,
        op: impl FnOnce(&ComputeDevice, &DeviceState) -> Result<R, ComputeError>,
    ) -> Result<R, ComputeError> {
        let Some(device) = self.device.as_ref() else {
            return Err(ComputeError::DeviceUnavailable("no compute device attached".to_string()));
        };

        if self.device_state.is_none() {
            let voxel_size = self.settings.processing.voxel_size;
            match DeviceState::prepare(device, &self.snapshot, voxel_size) {
                Ok(state) => self.device_state = Some(state),
                Err(err) => {
                    error!(%err, operation = %kind, "device upload failed, snapshot kept");
                    return Err(err);
                }
            }
        }
        let Some(state) = self.device_state.as_ref() else {
            return Err(ComputeError::GridNotBuilt);
        };

        let result = op(device, state);
        if let Err(err) = &result {
            error!(%err, operation = %kind, "device operation failed, snapshot kept");
            self.release_device_state();
        }
        result
    }

    fn release_device_state(&mut self) {
        if let Some(state) = self.device_state.take() {
            state.release();
        }
    }

    fn commit(
        &mut self,
        kind: OperationKind,
        backend: Backend,
        started: Instant,
        result: PointCloudSnapshot,
    ) -> OperationReport {
        let before = self.snapshot.len();
        let after = result.len();
        let elapsed = started.elapsed();
        let outcome = if after == 0 { Outcome::Emptied } else { Outcome::Applied };

        info!(
            operation = %kind,
            %backend,
            before,
            after,
            elapsed_ms = elapsed.as_millis() as u64,
            "operation complete"
        );
        if outcome == Outcome::Emptied {
            warn!(operation = %kind, "all points were removed");
        }

        self.set_data(result);
        OperationReport {
            operation: kind,
            backend,
            before,
            after,
            elapsed,
            outcome,
        }
    }

    fn skip(&self, kind: OperationKind, backend: Backend, started: Instant, reason: SkipReason) -> OperationReport {
        debug!(operation = %kind, ?reason, "operation skipped");
        let count = self.snapshot.len();
        OperationReport {
            operation: kind,
            backend,
            before: count,
            after: count,
            elapsed: started.elapsed(),
            outcome: Outcome::Skipped(reason),
        }
    }
}

impl fmt::Debug for PointCloudPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointCloudPipeline")
            .field("points", &self.snapshot.len())
            .field("generation", &self.generation)
            .field("grid_built", &self.grid.is_some())
            .field("device", &self.device)
            .field("device_state", &self.device_state.is_some())
            .finish()
    }
}
