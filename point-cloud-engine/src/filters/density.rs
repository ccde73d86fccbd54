/// Voxel occupancy filter.
use super::AppendBuffer;
use crate::compute::point::snapshot_from_gpu_points;
use crate::compute::{ComputeDevice, DevicePointCloud, workgroup_count};
use crate::error::ComputeError;
use crate::grid::{GpuVoxelGrid, VoxelHashGrid, VoxelIndex};
use crate::snapshot::PointCloudSnapshot;
use constants::compute::VOXEL_WORKGROUP_SIZE;

/// Keeps the points whose voxel holds at least `threshold` points.
///
/// Output is voxel-major: voxels in first-seen order, members in snapshot order.
pub fn density_filter_cpu(snapshot: &PointCloudSnapshot, grid: &VoxelHashGrid, threshold: u32) -> PointCloudSnapshot {
    let keep: Vec<u32> = grid
        .iter()
        .filter(|(_, members)| members.len() as u64 >= u64::from(threshold))
        .flat_map(|(_, members)| members.iter().copied())
        .collect();
    snapshot.select(&keep)
}

/// Device variant: one invocation per voxel appends all members of a qualifying voxel.
pub fn density_filter_gpu(
    device: &ComputeDevice,
    cloud: &DevicePointCloud,
    grid: &GpuVoxelGrid,
    threshold: u32,
) -> Result<PointCloudSnapshot, ComputeError> {
    let view = grid.view()?;
    let voxel_count = view.voxel_count();
    let points = cloud.buffer();
    let output = AppendBuffer::new(device, "density_filter_output", cloud.len())?;

    device.dispatch(
        "density_filter",
        workgroup_count(voxel_count, VOXEL_WORKGROUP_SIZE),
        VOXEL_WORKGROUP_SIZE,
        |id| {
            if id as usize >= voxel_count {
                return;
            }
            let record = view.record(id as usize);
            if record.count < threshold {
                return;
            }
            let base = output.reserve(record.count);
            for k in 0..record.count {
                let index = view.point_index((record.offset + k) as usize);
                output.put(base + k, points.load(index as usize));
            }
        },
    );

    Ok(snapshot_from_gpu_points(&output.read_appended("density filter output")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec4};

    fn clustered() -> PointCloudSnapshot {
        // Voxel (0,0,0) holds 3 points, voxel (5,0,0) holds 1.
        PointCloudSnapshot::from_points([
            (Vec3::new(0.01, 0.01, 0.01), Vec4::ONE),
            (Vec3::new(0.55, 0.0, 0.0), Vec4::ZERO),
            (Vec3::new(0.02, 0.03, 0.04), Vec4::ONE),
            (Vec3::new(0.05, 0.05, 0.05), Vec4::ONE),
        ])
    }

    #[test]
    fn drops_sparse_voxels() {
        let snapshot = clustered();
        let grid = VoxelHashGrid::build(snapshot.positions(), 0.1);
        let filtered = density_filter_cpu(&snapshot, &grid, 2);

        assert_eq!(filtered.len(), 3);
        assert!(filtered.colours().iter().all(|&c| c == Vec4::ONE));
    }

    #[test]
    fn output_is_voxel_major() {
        let snapshot = clustered();
        let grid = VoxelHashGrid::build(snapshot.positions(), 0.1);
        let filtered = density_filter_cpu(&snapshot, &grid, 0);

        let order: Vec<Vec3> = [0, 2, 3, 1].iter().map(|&i| snapshot.positions()[i]).collect();
        assert_eq!(filtered.positions(), order.as_slice());
    }

    #[test]
    fn threshold_above_max_occupancy_empties() {
        let snapshot = clustered();
        let grid = VoxelHashGrid::build(snapshot.positions(), 0.1);
        assert!(density_filter_cpu(&snapshot, &grid, 4).is_empty());
    }
}
