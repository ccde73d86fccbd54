mod common;

use common::point_set;
use glam::{Vec3, Vec4};
use point_cloud_engine::PointCloudSnapshot;
use point_cloud_engine::filters::{
    Complementation, ComplementationParams, MorphologyParams, Placement, complement_cpu, density_filter_cpu,
    morphology_cpu, noise_filter_cpu,
};
use point_cloud_engine::grid::{VoxelHashGrid, VoxelIndex};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

fn cloud_strategy() -> impl Strategy<Value = Vec<Vec3>> {
    prop::collection::vec((-1.0f32..1.0f32, -1.0f32..1.0f32, -1.0f32..1.0f32), 0..400)
        .prop_map(|points| points.into_iter().map(|(x, y, z)| Vec3::new(x, y, z)).collect())
}

/// Each point gets its own colour so filters that mix up attributes are caught.
fn snapshot_of(positions: Vec<Vec3>) -> PointCloudSnapshot {
    PointCloudSnapshot::from_points(positions.into_iter().enumerate().map(|(index, position)| {
        let shade = index as f32 / 512.0;
        (position, Vec4::new(shade, 1.0 - shade, 0.5, 1.0))
    }))
}

/// Every point of `inner` appears in `outer` at least as many times.
fn contained_in(inner: &PointCloudSnapshot, outer: &PointCloudSnapshot) -> bool {
    let mut available: HashMap<[u32; 7], usize> = HashMap::new();
    for point in point_set(outer) {
        *available.entry(point).or_default() += 1;
    }
    point_set(inner).into_iter().all(|point| match available.get_mut(&point) {
        Some(count) if *count > 0 => {
            *count -= 1;
            true
        }
        _ => false,
    })
}

proptest! {
    #[test]
    fn grid_places_every_point_exactly_once(positions in cloud_strategy(), voxel_size in 0.01f32..0.5f32) {
        let grid = VoxelHashGrid::build(&positions, voxel_size);
        let mut seen = vec![0u32; positions.len()];
        for (_, members) in grid.iter() {
            for &index in members {
                seen[index as usize] += 1;
            }
        }
        prop_assert!(seen.iter().all(|&count| count == 1));
        let total: u32 = grid.census().iter().map(|entry| entry.point_count).sum();
        prop_assert_eq!(total as usize, positions.len());
    }

    #[test]
    fn density_filter_is_idempotent(positions in cloud_strategy(), threshold in 0u32..6) {
        let snapshot = snapshot_of(positions);
        let once = density_filter_cpu(&snapshot, &VoxelHashGrid::build(snapshot.positions(), 0.2), threshold);
        let twice = density_filter_cpu(&once, &VoxelHashGrid::build(once.positions(), 0.2), threshold);
        prop_assert_eq!(point_set(&once), point_set(&twice));
    }

    #[test]
    fn density_filter_is_monotonic_in_threshold(positions in cloud_strategy(), low in 0u32..5, extra in 0u32..5) {
        let snapshot = snapshot_of(positions);
        let grid = VoxelHashGrid::build(snapshot.positions(), 0.2);
        let loose = density_filter_cpu(&snapshot, &grid, low);
        let strict = density_filter_cpu(&snapshot, &grid, low + extra);
        prop_assert!(contained_in(&strict, &loose));
        prop_assert!(contained_in(&loose, &snapshot));
    }

    #[test]
    fn noise_filter_is_monotonic_in_threshold(
        positions in cloud_strategy(),
        radius in 0.01f32..0.5f32,
        low in 0u32..5,
        extra in 0u32..5,
    ) {
        let snapshot = snapshot_of(positions);
        let grid = VoxelHashGrid::build(snapshot.positions(), 0.1);
        let loose = noise_filter_cpu(&snapshot, &grid, radius, low);
        let strict = noise_filter_cpu(&snapshot, &grid, radius, low + extra);
        prop_assert!(contained_in(&strict, &loose));
        prop_assert!(contained_in(&loose, &snapshot));
    }

    #[test]
    fn complementation_keeps_every_original(positions in cloud_strategy(), points_per_axis in 1u32..4) {
        let snapshot = snapshot_of(positions);
        let grid = VoxelHashGrid::build(snapshot.positions(), 0.25);
        let params = ComplementationParams {
            density_threshold: 2,
            points_per_axis,
            placement: Placement::Random { seed: 5 },
            fill_colour: Vec4::new(0.0, 1.0, 0.0, 1.0),
        };
        if let Complementation::Added { snapshot: result, added } = complement_cpu(&snapshot, &grid, &params) {
            prop_assert_eq!(result.len(), snapshot.len() + added);
            prop_assert_eq!(&result.positions()[..snapshot.len()], snapshot.positions());
            prop_assert_eq!(&result.colours()[..snapshot.len()], snapshot.colours());
            prop_assert!(result.colours()[snapshot.len()..].iter().all(|&colour| colour == params.fill_colour));
        }
    }

    #[test]
    fn erosion_never_adds_voxels(positions in cloud_strategy(), threshold in 0u32..7) {
        let snapshot = snapshot_of(positions);
        let params = MorphologyParams {
            voxel_size: 0.2,
            erosion_iterations: 1,
            dilation_iterations: 0,
            erosion_neighbor_threshold: threshold,
            points_per_axis: 1,
            placement: Placement::Grid,
        };
        let before: HashSet<_> = VoxelHashGrid::build(snapshot.positions(), 0.2).iter().map(|(c, _)| c).collect();
        let eroded = morphology_cpu(&snapshot, &params).snapshot;
        let after: HashSet<_> = VoxelHashGrid::build(eroded.positions(), 0.2).iter().map(|(c, _)| c).collect();
        prop_assert!(after.is_subset(&before));
    }
}
