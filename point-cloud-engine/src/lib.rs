//! Voxel-indexed point cloud processing.
//!
//! Cleans and densifies hand-tracking scan data with spatial filters built on a voxel hash grid.
//! Every operation exists twice: a sequential CPU algorithm and a data-parallel algorithm that
//! runs on flat storage buffers of a [`compute::ComputeDevice`].
//!
//! ## Data flow
//!
//! 1. A [`PointCloudSnapshot`] is loaded (positions + RGBA colours, immutable).
//! 2. A grid is built over it lazily ([`grid::VoxelHashGrid`] or [`grid::GpuVoxelGrid`]).
//! 3. An operation consumes `(snapshot, grid, parameters)` and produces a new snapshot.
//! 4. The new snapshot invalidates both grids.
//!
//! [`pipeline::PointCloudPipeline`] sequences these steps and keeps the last good snapshot
//! whenever an operation fails.

pub mod compute;
pub mod error;
pub mod filters;
pub mod grid;
pub mod pipeline;
pub mod query;
pub mod settings;
pub mod snapshot;
pub mod voxel;

pub use error::{ComputeError, PipelineError, SettingsError, SnapshotError};
pub use pipeline::{Backend, OperationKind, OperationReport, Outcome, PointCloudPipeline, SkipReason};
pub use settings::{SettingsChange, ViewerSettings};
pub use snapshot::PointCloudSnapshot;
pub use voxel::VoxelCoord;
