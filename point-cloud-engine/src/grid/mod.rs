//! Voxel grids over a snapshot.
//!
//! [`VoxelHashGrid`] is built sequentially on the host. [`GpuVoxelGrid`] is built on a
//! [`crate::compute::ComputeDevice`] with atomics and chained hash buckets. Both expose the same
//! logical index through [`VoxelIndex`], and the neighbour search lives once in that trait so the
//! two execution paths answer every query identically.

pub mod cpu;
pub mod gpu;

pub use cpu::VoxelHashGrid;
pub use gpu::{DeviceGridView, GpuGridLayout, GpuVoxelGrid, GpuVoxelRecord};

use crate::compute::{GpuPoint, StorageBuffer};
use crate::voxel::{VoxelCoord, cube_cell_count, search_span};
use glam::Vec3;
use serde::Serialize;

/// Point count of one occupied voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoxelCensusEntry {
    pub coord: VoxelCoord,
    pub point_count: u32,
}

/// Random access to point positions, on the host or in a device buffer.
pub trait PositionSource {
    fn position_at(&self, index: usize) -> Option<Vec3>;
}

impl PositionSource for [Vec3] {
    fn position_at(&self, index: usize) -> Option<Vec3> {
        self.get(index).copied()
    }
}

impl PositionSource for Vec<Vec3> {
    fn position_at(&self, index: usize) -> Option<Vec3> {
        self.get(index).copied()
    }
}

impl PositionSource for StorageBuffer<GpuPoint> {
    fn position_at(&self, index: usize) -> Option<Vec3> {
        (index < self.len()).then(|| self.load(index).position())
    }
}

/// Map from occupied voxel to member point indices.
///
/// Slots `0..voxel_count()` enumerate the occupied voxels. Member order inside a voxel is not
/// meaningful.
pub trait VoxelIndex {
    fn voxel_size(&self) -> f32;

    fn voxel_count(&self) -> usize;

    /// Number of points the grid was built over.
    fn point_count(&self) -> usize;

    /// Coordinate and member count of the voxel in `slot`.
    fn voxel(&self, slot: usize) -> Option<(VoxelCoord, u32)>;

    fn slot_of(&self, coord: VoxelCoord) -> Option<usize>;

    fn for_each_member(&self, slot: usize, visit: impl FnMut(u32));

    fn contains(&self, coord: VoxelCoord) -> bool {
        self.slot_of(coord).is_some()
    }

    fn members(&self, coord: VoxelCoord) -> Vec<u32> {
        let mut members = Vec::new();
        if let Some(slot) = self.slot_of(coord) {
            self.for_each_member(slot, |index| members.push(index));
        }
        members
    }

    /// Visits every point within `radius` of point `query`, excluding the query itself.
    ///
    /// Scans the cube of `max(1, ceil(radius / s))` cells around the query voxel, or the occupied
    /// voxels inside that cube when the cube holds more cells than the grid has voxels.
    fn visit_neighbors<P>(&self, positions: &P, query: usize, radius: f32, mut visit: impl FnMut(u32))
    where
        P: PositionSource + ?Sized,
    {
        let Some(origin) = positions.position_at(query) else {
            return;
        };
        if !(radius >= 0.0) {
            return;
        }
        let radius_sq = radius * radius;
        let centre = VoxelCoord::from_position(origin, self.voxel_size());
        let span = search_span(radius, self.voxel_size());

        let mut test_slot = |slot: usize| {
            self.for_each_member(slot, |index| {
                if index as usize == query {
                    return;
                }
                if let Some(p) = positions.position_at(index as usize) {
                    if p.distance_squared(origin) <= radius_sq {
                        visit(index);
                    }
                }
            });
        };

        if cube_cell_count(span) > self.voxel_count() as u64 {
            for slot in 0..self.voxel_count() {
                if let Some((coord, _)) = self.voxel(slot) {
                    if coord.chebyshev_distance(centre) <= span as i64 {
                        test_slot(slot);
                    }
                }
            }
            return;
        }

        for dx in -span..=span {
            for dy in -span..=span {
                for dz in -span..=span {
                    if let Some(slot) = self.slot_of(centre.offset(dx, dy, dz)) {
                        test_slot(slot);
                    }
                }
            }
        }
    }

    /// Indices of all points within `radius` of point `query`. Out-of-range queries yield nothing.
    fn find_neighbors<P>(&self, positions: &P, query: usize, radius: f32) -> Vec<u32>
    where
        P: PositionSource + ?Sized,
    {
        let mut neighbors = Vec::new();
        self.visit_neighbors(positions, query, radius, |index| neighbors.push(index));
        neighbors
    }

    fn count_neighbors<P>(&self, positions: &P, query: usize, radius: f32) -> usize
    where
        P: PositionSource + ?Sized,
    {
        let mut count = 0;
        self.visit_neighbors(positions, query, radius, |_| count += 1);
        count
    }

    /// Occupied face neighbours of `coord` (6-connectivity).
    fn occupied_face_neighbors(&self, coord: VoxelCoord) -> u32 {
        constants::processing::FACE_OFFSETS
            .iter()
            .filter(|&&delta| self.contains(coord.offset_by(delta)))
            .count() as u32
    }

    /// One entry per occupied voxel, in slot order.
    fn census(&self) -> Vec<VoxelCensusEntry> {
        (0..self.voxel_count())
            .filter_map(|slot| self.voxel(slot))
            .map(|(coord, point_count)| VoxelCensusEntry { coord, point_count })
            .collect()
    }
}
