/// Ray picking against a snapshot.
use crate::snapshot::PointCloudSnapshot;
use glam::Vec3;

/// Picks the point closest to the ray `origin + t * direction`.
///
/// Distance is measured perpendicular to the (infinite) ray line as `|d x (p - o)|` with `d`
/// normalised. Only points strictly closer than `max_distance` qualify. A zero-length direction
/// picks nothing.
pub fn pick_point(snapshot: &PointCloudSnapshot, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<usize> {
    let direction = direction.try_normalize()?;
    let limit_sq = max_distance * max_distance;

    snapshot
        .positions()
        .iter()
        .enumerate()
        .map(|(index, &p)| (index, direction.cross(p - origin).length_squared()))
        .filter(|&(_, distance_sq)| distance_sq < limit_sq)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn snapshot() -> PointCloudSnapshot {
        PointCloudSnapshot::with_uniform_colour(
            vec![
                Vec3::new(0.0, 0.2, 5.0),
                Vec3::new(0.01, 0.0, 3.0),
                Vec3::new(0.0, -0.03, 1.0),
            ],
            Vec4::ONE,
        )
    }

    #[test]
    fn picks_point_nearest_the_ray() {
        assert_eq!(pick_point(&snapshot(), Vec3::ZERO, Vec3::new(0.0, 0.0, 2.0), 0.05), Some(1));
    }

    #[test]
    fn nothing_within_distance() {
        assert_eq!(pick_point(&snapshot(), Vec3::new(1.0, 1.0, 0.0), Vec3::Z, 0.05), None);
    }

    #[test]
    fn zero_direction_picks_nothing() {
        assert_eq!(pick_point(&snapshot(), Vec3::ZERO, Vec3::ZERO, 10.0), None);
    }
}
