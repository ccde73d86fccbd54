/// Where synthesised points go inside a voxel.
use crate::voxel::VoxelCoord;
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Placement {
    /// Regular grid over the voxel's Y/Z extent.
    Grid,
    /// Uniform samples over the voxel's Y/Z extent, one random stream per voxel.
    Random { seed: u64 },
}

impl Placement {
    /// Same placement with a seed derived for iteration `round`.
    pub fn for_round(self, round: u32) -> Self {
        match self {
            Self::Grid => Self::Grid,
            Self::Random { seed } => Self::Random {
                seed: splitmix64(seed ^ u64::from(round).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
            },
        }
    }
}

/// Points synthesised per voxel: 0, 1 or `n * n`.
pub fn points_per_voxel(points_per_axis: u32) -> u32 {
    match points_per_axis {
        0 | 1 => points_per_axis,
        n => n.saturating_mul(n),
    }
}

/// Emits the synthesised points of voxel `coord` as `(k, position)` for `k in 0..points_per_voxel`.
///
/// One point per axis puts a single point at the voxel centre. Otherwise points lie on the
/// plane through the voxel's X centre, either on a grid with step `s / n` offset by half a step,
/// or at random Y/Z positions.
pub fn place_points(
    coord: VoxelCoord,
    voxel_size: f32,
    points_per_axis: u32,
    placement: Placement,
    mut emit: impl FnMut(u32, Vec3),
) {
    if points_per_axis == 0 {
        return;
    }
    let min = coord.min_corner(voxel_size);
    let centre_x = min.x + voxel_size / 2.0;

    if points_per_axis == 1 {
        emit(0, coord.centre(voxel_size));
        return;
    }

    match placement {
        Placement::Grid => {
            let step = voxel_size / points_per_axis as f32;
            let first = step / 2.0;
            let mut k = 0;
            for y in 0..points_per_axis {
                let py = min.y + first + step * y as f32;
                for z in 0..points_per_axis {
                    let pz = min.z + first + step * z as f32;
                    emit(k, Vec3::new(centre_x, py, pz));
                    k += 1;
                }
            }
        }
        Placement::Random { seed } => {
            let mut rng = StdRng::seed_from_u64(voxel_stream_seed(seed, coord));
            for k in 0..points_per_voxel(points_per_axis) {
                let py = min.y + rng.gen_range(0.0f32..1.0) * voxel_size;
                let pz = min.z + rng.gen_range(0.0f32..1.0) * voxel_size;
                emit(k, Vec3::new(centre_x, py, pz));
            }
        }
    }
}

fn voxel_stream_seed(seed: u64, coord: VoxelCoord) -> u64 {
    let xy = u64::from(coord.x as u32) | (u64::from(coord.y as u32) << 32);
    splitmix64(seed ^ splitmix64(xy ^ splitmix64(u64::from(coord.z as u32))))
}

fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed taken from the wall clock, used when no seed is configured.
pub fn wall_clock_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn collect(coord: VoxelCoord, s: f32, n: u32, placement: Placement) -> Vec<Vec3> {
        let mut points = Vec::new();
        place_points(coord, s, n, placement, |_, p| points.push(p));
        points
    }

    #[test]
    fn one_point_per_axis_is_the_centre() {
        let coord = VoxelCoord::new(1, 2, 3);
        for placement in [Placement::Grid, Placement::Random { seed: 7 }] {
            let points = collect(coord, 0.1, 1, placement);
            assert_eq!(points, vec![coord.centre(0.1)]);
        }
    }

    #[test]
    fn grid_placement_spans_yz_at_x_centre() {
        let points = collect(VoxelCoord::ORIGIN, 1.0, 2, Placement::Grid);
        assert_eq!(
            points,
            vec![
                Vec3::new(0.5, 0.25, 0.25),
                Vec3::new(0.5, 0.25, 0.75),
                Vec3::new(0.5, 0.75, 0.25),
                Vec3::new(0.5, 0.75, 0.75),
            ]
        );
    }

    #[test]
    fn random_placement_is_reproducible_and_inside_voxel() {
        let coord = VoxelCoord::new(-2, 5, 0);
        let a = collect(coord, 0.2, 3, Placement::Random { seed: 42 });
        let b = collect(coord, 0.2, 3, Placement::Random { seed: 42 });
        let c = collect(coord, 0.2, 3, Placement::Random { seed: 43 });

        assert_eq!(a.len(), 9);
        assert_eq!(a, b);
        assert_ne!(a, c);
        let min = coord.min_corner(0.2);
        for p in a {
            assert_relative_eq!(p.x, min.x + 0.1);
            assert!(p.y >= min.y && p.y <= min.y + 0.2);
            assert!(p.z >= min.z && p.z <= min.z + 0.2);
        }
    }

    #[test]
    fn zero_points_per_axis_emits_nothing() {
        assert!(collect(VoxelCoord::ORIGIN, 1.0, 0, Placement::Grid).is_empty());
        assert_eq!(points_per_voxel(0), 0);
        assert_eq!(points_per_voxel(1), 1);
        assert_eq!(points_per_voxel(4), 16);
    }

    #[test]
    fn rounds_derive_distinct_seeds() {
        let base = Placement::Random { seed: 1 };
        assert_ne!(base.for_round(0), base.for_round(1));
        assert_eq!(Placement::Grid.for_round(3), Placement::Grid);
    }
}
