/// Point cloud and voxel census writers
use anyhow::{Context, Result};
use constants::io::{CENSUS_HEADER, COLOUR_CHANNEL_MAX};
use csv::WriterBuilder;
use point_cloud_engine::PointCloudSnapshot;
use point_cloud_engine::grid::VoxelCensusEntry;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Writes one `x,y,z,r,g,b` line per point with 8-bit colour channels.
pub fn write_points(path: &Path, snapshot: &PointCloudSnapshot) -> Result<()> {
    let file = create(path)?;
    write_points_to(file, snapshot).with_context(|| format!("failed to write {}", path.display()))?;
    println!("Saved {} ({} points)", path.display(), snapshot.len());
    Ok(())
}

pub fn write_points_to(sink: impl Write, snapshot: &PointCloudSnapshot) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(sink);
    for (position, colour) in snapshot.iter() {
        writer.serialize((
            position.x,
            position.y,
            position.z,
            to_channel(colour.x),
            to_channel(colour.y),
            to_channel(colour.z),
        ))?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the voxel census with its header row.
pub fn write_census(path: &Path, census: &[VoxelCensusEntry]) -> Result<()> {
    let file = create(path)?;
    write_census_to(file, census).with_context(|| format!("failed to write {}", path.display()))?;
    println!("Saved {} ({} voxels)", path.display(), census.len());
    Ok(())
}

pub fn write_census_to(sink: impl Write, census: &[VoxelCensusEntry]) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(sink);
    writer.write_record(CENSUS_HEADER)?;
    for entry in census {
        writer.serialize((entry.coord.x, entry.coord.y, entry.coord.z, entry.point_count))?;
    }
    writer.flush()?;
    Ok(())
}

fn create(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    File::create(path).with_context(|| format!("failed to create {}", path.display()))
}

fn to_channel(value: f32) -> u8 {
    (value * COLOUR_CHANNEL_MAX).round().clamp(0.0, COLOUR_CHANNEL_MAX) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec4};
    use point_cloud_engine::VoxelCoord;

    #[test]
    fn points_are_written_with_byte_colours() {
        let snapshot = PointCloudSnapshot::from_points([
            (Vec3::new(1.0, 2.5, -3.0), Vec4::new(1.0, 0.0, 0.2, 1.0)),
            (Vec3::ZERO, Vec4::new(2.0, -1.0, 0.5, 1.0)),
        ]);
        let mut buffer = Vec::new();
        write_points_to(&mut buffer, &snapshot).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "1.0,2.5,-3.0,255,0,51\n0.0,0.0,0.0,255,0,128\n");
    }

    #[test]
    fn census_starts_with_header() {
        let census = [VoxelCensusEntry {
            coord: VoxelCoord::new(-1, 0, 4),
            point_count: 12,
        }];
        let mut buffer = Vec::new();
        write_census_to(&mut buffer, &census).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "VoxelIndex_X,VoxelIndex_Y,VoxelIndex_Z,PointCount\n-1,0,4,12\n"
        );
    }

    #[test]
    fn written_files_create_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.txt");
        write_points(&path, &PointCloudSnapshot::empty()).unwrap();
        assert!(path.exists());
    }
}
