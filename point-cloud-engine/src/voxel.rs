/// Integer voxel coordinates and the spatial hash used by the device grid.
use constants::compute::HASH_PRIMES;
use glam::Vec3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct VoxelCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelCoord {
    pub const ORIGIN: Self = Self { x: 0, y: 0, z: 0 };

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// `floor(p / s)` per axis. A non-positive or non-finite voxel size maps every point to the
    /// origin voxel.
    pub fn from_position(position: Vec3, voxel_size: f32) -> Self {
        if !voxel_size_is_valid(voxel_size) {
            return Self::ORIGIN;
        }
        let scaled = (position / voxel_size).floor();
        // `as` saturates out-of-range floats and maps NaN to zero.
        Self::new(scaled.x as i32, scaled.y as i32, scaled.z as i32)
    }

    pub const fn from_array(coord: [i32; 3]) -> Self {
        Self::new(coord[0], coord[1], coord[2])
    }

    pub const fn to_array(self) -> [i32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(
            self.x.wrapping_add(dx),
            self.y.wrapping_add(dy),
            self.z.wrapping_add(dz),
        )
    }

    pub fn offset_by(self, delta: [i32; 3]) -> Self {
        self.offset(delta[0], delta[1], delta[2])
    }

    /// Largest per-axis distance in cells.
    pub fn chebyshev_distance(self, other: Self) -> i64 {
        let dx = (self.x as i64 - other.x as i64).abs();
        let dy = (self.y as i64 - other.y as i64).abs();
        let dz = (self.z as i64 - other.z as i64).abs();
        dx.max(dy).max(dz)
    }

    pub fn min_corner(self, voxel_size: f32) -> Vec3 {
        Vec3::new(self.x as f32, self.y as f32, self.z as f32) * voxel_size
    }

    pub fn centre(self, voxel_size: f32) -> Vec3 {
        self.min_corner(voxel_size) + Vec3::splat(voxel_size * 0.5)
    }

    /// `x*73856093 ^ y*19349663 ^ z*83492791` on wrapping 32-bit arithmetic.
    pub fn spatial_hash(self) -> u32 {
        (self.x as u32).wrapping_mul(HASH_PRIMES[0])
            ^ (self.y as u32).wrapping_mul(HASH_PRIMES[1])
            ^ (self.z as u32).wrapping_mul(HASH_PRIMES[2])
    }
}

pub fn voxel_size_is_valid(voxel_size: f32) -> bool {
    voxel_size.is_finite() && voxel_size > 0.0
}

/// Cells scanned per axis on each side of the query voxel: `max(1, ceil(radius / s))`.
pub fn search_span(radius: f32, voxel_size: f32) -> i32 {
    if !voxel_size_is_valid(voxel_size) {
        return 1;
    }
    let cells = (radius / voxel_size).ceil();
    if cells.is_nan() {
        return 1;
    }
    (cells as i32).max(1)
}

/// Number of cells in the cube scanned for `span`.
pub fn cube_cell_count(span: i32) -> u64 {
    let side = 2 * span.max(0) as u64 + 1;
    side.saturating_mul(side).saturating_mul(side)
}

/// Smallest prime `>= n`.
pub fn next_prime(n: usize) -> usize {
    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut divisor = 3;
    while divisor * divisor <= n {
        if n % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floors_negative_coordinates() {
        let coord = VoxelCoord::from_position(Vec3::new(-0.01, 0.0, 0.19), 0.1);
        assert_eq!(coord, VoxelCoord::new(-1, 0, 1));
    }

    #[test]
    fn degenerate_voxel_size_collapses_to_origin() {
        let p = Vec3::new(12.0, -4.0, 3.5);
        assert_eq!(VoxelCoord::from_position(p, 0.0), VoxelCoord::ORIGIN);
        assert_eq!(VoxelCoord::from_position(p, -1.0), VoxelCoord::ORIGIN);
        assert_eq!(VoxelCoord::from_position(p, f32::NAN), VoxelCoord::ORIGIN);
    }

    #[test]
    fn span_grows_with_radius() {
        assert_eq!(search_span(0.01, 0.1), 1);
        assert_eq!(search_span(0.1, 0.1), 1);
        assert_eq!(search_span(0.25, 0.1), 3);
        assert_eq!(search_span(0.0, 0.1), 1);
        assert_eq!(search_span(1.0, 0.0), 1);
    }

    #[test]
    fn primes() {
        assert_eq!(next_prime(0), 2);
        assert_eq!(next_prime(2), 2);
        assert_eq!(next_prime(20), 23);
        assert_eq!(next_prime(97), 97);
        assert_eq!(next_prime(2000), 2003);
    }

    #[test]
    fn spatial_hash_wraps() {
        let coord = VoxelCoord::new(-1, 2, i32::MAX);
        let expected = u32::MAX.wrapping_mul(73_856_093)
            ^ 2u32.wrapping_mul(19_349_663)
            ^ (i32::MAX as u32).wrapping_mul(83_492_791);
        assert_eq!(coord.spatial_hash(), expected);
    }

    #[test]
    fn centre_is_half_a_cell_past_min_corner() {
        let coord = VoxelCoord::new(2, -1, 0);
        let centre = coord.centre(0.5);
        assert_eq!(centre, Vec3::new(1.25, -0.25, 0.25));
    }
}
