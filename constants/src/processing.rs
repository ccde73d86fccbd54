/// Default edge length of a voxel in world units
pub const DEFAULT_VOXEL_SIZE: f32 = 0.05;

/// Default radius used by neighbour queries and the noise filter
pub const DEFAULT_SEARCH_RADIUS: f32 = 0.1;

/// Minimum neighbour count a point needs to survive the noise filter
pub const DEFAULT_NEIGHBOR_THRESHOLD: u32 = 100;

/// Minimum voxel occupancy a point's voxel needs to survive the density filter
pub const DEFAULT_VOXEL_DENSITY_THRESHOLD: u32 = 5;

pub const DEFAULT_EROSION_ITERATIONS: u32 = 1;
pub const DEFAULT_DILATION_ITERATIONS: u32 = 1;

/// Occupied face neighbours a voxel needs to survive one erosion step
pub const DEFAULT_EROSION_NEIGHBOR_THRESHOLD: u32 = 6;

pub const DEFAULT_COMPLEMENTATION_DENSITY_THRESHOLD: u32 = 10;
pub const DEFAULT_COMPLEMENTATION_POINTS_PER_AXIS: u32 = 2;

/// RGBA colour given to synthesised points
pub const DEFAULT_FILL_COLOUR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Maximum perpendicular distance accepted by ray picking
pub const DEFAULT_PICK_DISTANCE: f32 = 0.05;

/// Face-adjacent voxel offsets in canonical order (-X, +X, -Y, +Y, -Z, +Z)
pub const FACE_OFFSETS: [[i32; 3]; 6] = [
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
];
