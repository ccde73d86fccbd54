use super::VoxelIndex;
use crate::voxel::VoxelCoord;
use glam::Vec3;
use std::collections::HashMap;

/// Host-built voxel grid.
///
/// Voxels are kept in first-seen order and members in insertion order, which makes iteration
/// deterministic for a given snapshot.
#[derive(Debug, Clone, Default)]
pub struct VoxelHashGrid {
    voxel_size: f32,
    coords: Vec<VoxelCoord>,
    buckets: Vec<Vec<u32>>,
    lookup: HashMap<VoxelCoord, usize>,
    point_count: usize,
}

impl VoxelHashGrid {
    /// Buckets every position by its voxel coordinate in one O(n) pass.
    pub fn build(positions: &[Vec3], voxel_size: f32) -> Self {
        let mut grid = Self {
            voxel_size,
            point_count: positions.len(),
            ..Default::default()
        };

        for (index, &position) in positions.iter().enumerate() {
            let coord = VoxelCoord::from_position(position, voxel_size);
            let slot = *grid.lookup.entry(coord).or_insert_with(|| {
                grid.coords.push(coord);
                grid.buckets.push(Vec::new());
                grid.coords.len() - 1
            });
            grid.buckets[slot].push(index as u32);
        }

        grid
    }

    pub fn members_of(&self, slot: usize) -> &[u32] {
        self.buckets.get(slot).map_or(&[], Vec::as_slice)
    }

    /// Occupied voxels with their members, in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (VoxelCoord, &[u32])> + '_ {
        self.coords
            .iter()
            .copied()
            .zip(self.buckets.iter().map(Vec::as_slice))
    }
}

impl VoxelIndex for VoxelHashGrid {
    fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    fn voxel_count(&self) -> usize {
        self.coords.len()
    }

    fn point_count(&self) -> usize {
        self.point_count
    }

    fn voxel(&self, slot: usize) -> Option<(VoxelCoord, u32)> {
        Some((*self.coords.get(slot)?, self.buckets.get(slot)?.len() as u32))
    }

    fn slot_of(&self, coord: VoxelCoord) -> Option<usize> {
        self.lookup.get(&coord).copied()
    }

    fn for_each_member(&self, slot: usize, visit: impl FnMut(u32)) {
        self.members_of(slot).iter().copied().for_each(visit);
    }
}
