/// Density complementation: synthesises extra points inside dense voxels.
use super::AppendBuffer;
use super::placement::{Placement, place_points, points_per_voxel};
use crate::compute::point::snapshot_from_gpu_points;
use crate::compute::{ComputeDevice, DevicePointCloud, GpuPoint, workgroup_count};
use crate::error::ComputeError;
use crate::grid::{GpuVoxelGrid, VoxelIndex};
use crate::snapshot::PointCloudSnapshot;
use crate::voxel::VoxelCoord;
use constants::compute::{POINT_WORKGROUP_SIZE, VOXEL_WORKGROUP_SIZE};
use glam::Vec4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplementationParams {
    pub density_threshold: u32,
    pub points_per_axis: u32,
    pub placement: Placement,
    pub fill_colour: Vec4,
}

/// Result of a complementation run.
#[derive(Debug, Clone, PartialEq)]
pub enum Complementation {
    /// Original points followed by `added` synthesised points.
    Added { snapshot: PointCloudSnapshot, added: usize },
    /// `points_per_axis == 0`: nothing to synthesise.
    ZeroPointsPerAxis,
    /// No voxel reached the density threshold.
    NoQualifyingVoxels,
}

/// Appends synthesised points for every voxel with at least `density_threshold` points.
pub fn complement_cpu(
    snapshot: &PointCloudSnapshot,
    grid: &impl VoxelIndex,
    params: &ComplementationParams,
) -> Complementation {
    if params.points_per_axis == 0 {
        return Complementation::ZeroPointsPerAxis;
    }

    let mut positions = Vec::new();
    for slot in 0..grid.voxel_count() {
        let Some((coord, count)) = grid.voxel(slot) else {
            continue;
        };
        if count >= params.density_threshold {
            place_points(
                coord,
                grid.voxel_size(),
                params.points_per_axis,
                params.placement,
                |_, p| positions.push(p),
            );
        }
    }

    if positions.is_empty() {
        return Complementation::NoQualifyingVoxels;
    }
    let added = positions.len();
    let synthesised = PointCloudSnapshot::with_uniform_colour(positions, params.fill_colour);
    Complementation::Added {
        snapshot: snapshot.concat(&synthesised),
        added,
    }
}

/// Device variant: one invocation per voxel appends its synthesised points, then a merge kernel
/// writes originals and synthesised points into one buffer.
pub fn complement_gpu(
    device: &ComputeDevice,
    cloud: &DevicePointCloud,
    grid: &GpuVoxelGrid,
    params: &ComplementationParams,
) -> Result<Complementation, ComputeError> {
    if params.points_per_axis == 0 {
        return Ok(Complementation::ZeroPointsPerAxis);
    }
    let view = grid.view()?;
    let voxel_count = view.voxel_count();
    let per_voxel = points_per_voxel(params.points_per_axis);
    let voxel_size = view.voxel_size();
    let colour = params.fill_colour;

    let capacity = voxel_count.saturating_mul(per_voxel as usize);
    let synthesised = AppendBuffer::new(device, "complementation_points", capacity)?;

    device.dispatch(
        "density_complementation",
        workgroup_count(voxel_count, VOXEL_WORKGROUP_SIZE),
        VOXEL_WORKGROUP_SIZE,
        |id| {
            if id as usize >= voxel_count {
                return;
            }
            let record = view.record(id as usize);
            if record.count < params.density_threshold {
                return;
            }
            let base = synthesised.reserve(per_voxel);
            let coord = VoxelCoord::from_array(record.coord);
            place_points(coord, voxel_size, params.points_per_axis, params.placement, |k, p| {
                synthesised.put(base + k, GpuPoint::new(p, colour));
            });
        },
    );

    let added = synthesised.len();
    if added > synthesised.capacity() {
        return Err(ComputeError::CapacityExceeded {
            resource: "complementation points",
            required: added,
            capacity: synthesised.capacity(),
        });
    }
    if added == 0 {
        return Ok(Complementation::NoQualifyingVoxels);
    }

    let original = cloud.len();
    let total = original + added;
    let merged = device.create_buffer::<GpuPoint>("complementation_merged", total)?;
    let points = cloud.buffer();
    device.dispatch(
        "merge",
        workgroup_count(total, POINT_WORKGROUP_SIZE),
        POINT_WORKGROUP_SIZE,
        |id| {
            let index = id as usize;
            if index < original {
                merged.store(index, points.load(index));
            } else if index < total {
                merged.store(index, synthesised.items.load(index - original));
            }
        },
    );

    Ok(Complementation::Added {
        snapshot: snapshot_from_gpu_points(&merged.read_back(0..total)?),
        added,
    })
}
