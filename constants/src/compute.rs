/// Invocations per workgroup for per-point kernels
pub const POINT_WORKGROUP_SIZE: u32 = 256;

/// Invocations per workgroup for per-voxel kernels
pub const VOXEL_WORKGROUP_SIZE: u32 = 64;

/// Points processed between yields of the cooperative noise filter
pub const NOISE_FILTER_BATCH_SIZE: usize = 5000;

/// Initial morphology buffer capacity as a multiple of the input point count
pub const MORPHOLOGY_INITIAL_CAPACITY_FACTOR: usize = 10;

/// Minimum growth multiple applied when a morphology buffer overflows
pub const MORPHOLOGY_GROWTH_FACTOR: usize = 2;

/// Empty slot marker in the voxel hash table (bit pattern of -1)
pub const HASH_EMPTY: u32 = u32::MAX;

/// Spatial hash multipliers for the x, y and z voxel indices
pub const HASH_PRIMES: [u32; 3] = [73_856_093, 19_349_663, 83_492_791];

/// Upper bound on a single device allocation (1 GiB)
pub const DEFAULT_MAX_BUFFER_BYTES: u64 = 1 << 30;
