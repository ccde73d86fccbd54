/// Header row of the voxel census export
pub const CENSUS_HEADER: [&str; 4] = ["VoxelIndex_X", "VoxelIndex_Y", "VoxelIndex_Z", "PointCount"];

/// Scale of 8-bit colour channels in point files
pub const COLOUR_CHANNEL_MAX: f32 = 255.0;

/// Field count of a point line that carries its own colour
pub const COLOURED_FIELD_COUNT: usize = 6;

/// Minimum field count of a usable point line
pub const MIN_FIELD_COUNT: usize = 3;

/// Default point sources, only the first enabled
pub const DEFAULT_FILE_SOURCES: [(&str, [f32; 4], bool); 4] = [
    ("data/currentGlobalVerticesRight.txt", [1.0, 0.0, 0.0, 1.0], true),
    ("data/currentGlobalVerticesLeft.txt", [0.0, 1.0, 0.0, 1.0], false),
    ("data/currentGlobalVerticesBottom.txt", [0.0, 0.0, 1.0, 1.0], false),
    ("data/currentGlobalVerticesTop.txt", [1.0, 0.92, 0.016, 1.0], false),
];

/// Progress bar refresh interval while loading points
pub const PROGRESS_UPDATE_INTERVAL: usize = 50_000;
