/// Immutable point cloud data shared between pipeline stages.
use crate::error::SnapshotError;
use glam::{Vec3, Vec4};

/// Parallel arrays of positions and RGBA colours (0-1 range).
///
/// A snapshot is never edited in place. Filters allocate a new one, so a grid built over a
/// snapshot stays valid for as long as that snapshot is alive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloudSnapshot {
    positions: Vec<Vec3>,
    colours: Vec<Vec4>,
}

impl PointCloudSnapshot {
    pub fn new(positions: Vec<Vec3>, colours: Vec<Vec4>) -> Result<Self, SnapshotError> {
        if positions.len() != colours.len() {
            return Err(SnapshotError::LengthMismatch {
                positions: positions.len(),
                colours: colours.len(),
            });
        }
        Ok(Self { positions, colours })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a snapshot from `(position, colour)` pairs.
    pub fn from_points(points: impl IntoIterator<Item = (Vec3, Vec4)>) -> Self {
        let (positions, colours) = points.into_iter().unzip();
        Self { positions, colours }
    }

    /// Every point gets the same colour.
    pub fn with_uniform_colour(positions: Vec<Vec3>, colour: Vec4) -> Self {
        let colours = vec![colour; positions.len()];
        Self { positions, colours }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn colours(&self) -> &[Vec4] {
        &self.colours
    }

    pub fn point(&self, index: usize) -> Option<(Vec3, Vec4)> {
        Some((*self.positions.get(index)?, *self.colours.get(index)?))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Vec3, Vec4)> + '_ {
        self.positions.iter().copied().zip(self.colours.iter().copied())
    }

    /// Gathers the points at `indices`, in the order given. Indices past the end are ignored.
    pub fn select(&self, indices: &[u32]) -> Self {
        Self::from_points(indices.iter().filter_map(|&i| self.point(i as usize)))
    }

    /// Concatenates `other` after `self`. No deduplication is performed.
    pub fn concat(&self, other: &Self) -> Self {
        let mut positions = Vec::with_capacity(self.len() + other.len());
        positions.extend_from_slice(&self.positions);
        positions.extend_from_slice(&other.positions);

        let mut colours = Vec::with_capacity(self.len() + other.len());
        colours.extend_from_slice(&self.colours);
        colours.extend_from_slice(&other.colours);

        Self { positions, colours }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_lengths() {
        let err = PointCloudSnapshot::new(vec![Vec3::ZERO; 2], vec![Vec4::ONE]).unwrap_err();
        assert_eq!(
            err,
            SnapshotError::LengthMismatch {
                positions: 2,
                colours: 1
            }
        );
    }

    #[test]
    fn select_preserves_requested_order() {
        let snapshot = PointCloudSnapshot::from_points((0..4).map(|i| {
            let f = i as f32;
            (Vec3::splat(f), Vec4::new(f, 0.0, 0.0, 1.0))
        }));

        let picked = snapshot.select(&[3, 1, 9]);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked.positions()[0], Vec3::splat(3.0));
        assert_eq!(picked.colours()[1].x, 1.0);
    }

    #[test]
    fn concat_appends_after_original() {
        let a = PointCloudSnapshot::with_uniform_colour(vec![Vec3::X], Vec4::ONE);
        let b = PointCloudSnapshot::with_uniform_colour(vec![Vec3::Y, Vec3::Z], Vec4::ZERO);
        let joined = a.concat(&b);

        assert_eq!(joined.positions(), &[Vec3::X, Vec3::Y, Vec3::Z]);
        assert_eq!(joined.colours()[0], Vec4::ONE);
        assert_eq!(joined.colours()[2], Vec4::ZERO);
    }
}
