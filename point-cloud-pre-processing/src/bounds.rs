/// Axis-aligned bounds of a loaded point cloud
use glam::Vec3;
use rayon::prelude::*;
use serde::Serialize;

/// Chunk size for the parallel bounds reduction.
const BOUNDS_CHUNK_SIZE: usize = 25_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PointCloudBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl PointCloudBounds {
    /// Create empty bounds initialised to infinity values
    pub fn new() -> Self {
        Self {
            min: Vec3::INFINITY,
            max: Vec3::NEG_INFINITY,
        }
    }

    /// Calculate bounds of all positions with parallel chunked processing.
    /// Returns `None` for an empty cloud.
    pub fn from_positions(positions: &[Vec3]) -> Option<Self> {
        positions
            .par_chunks(BOUNDS_CHUNK_SIZE)
            .map(|chunk| {
                let mut local_bounds = Self::new();
                for &position in chunk {
                    local_bounds.update(position);
                }
                local_bounds
            })
            .reduce_with(Self::merge)
    }

    /// Update bounds with a new point
    pub fn update(&mut self, position: Vec3) {
        self.min = self.min.min(position);
        self.max = self.max.max(position);
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// World space extent along each axis
    pub fn dimensions(&self) -> Vec3 {
        self.max - self.min
    }
}

impl Default for PointCloudBounds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_cover_every_chunk() {
        let positions: Vec<Vec3> = (0..60_000)
            .map(|i| Vec3::new(i as f32, -(i as f32), (i % 7) as f32))
            .collect();
        let bounds = PointCloudBounds::from_positions(&positions).unwrap();
        assert_eq!(bounds.min, Vec3::new(0.0, -59_999.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(59_999.0, 0.0, 6.0));
        assert_eq!(bounds.dimensions(), Vec3::new(59_999.0, 59_999.0, 6.0));
    }

    #[test]
    fn empty_cloud_has_no_bounds() {
        assert!(PointCloudBounds::from_positions(&[]).is_none());
    }
}
