/// Error types shared across the engine.
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("snapshot has {positions} positions but {colours} colours")]
    LengthMismatch { positions: usize, colours: usize },
}

/// Failures raised by the compute device and the kernels running on it.
///
/// `DeviceUnavailable` is recoverable (callers fall back to the CPU path). Every other variant
/// aborts the operation that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeError {
    #[error("compute device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("buffer `{label}` needs {requested} bytes, device limit is {limit} bytes")]
    OutOfDeviceMemory {
        label: String,
        requested: u64,
        limit: u64,
    },

    #[error("buffer `{label}` element must be 4-byte aligned with a size that is a multiple of 4 (size {size}, align {align})")]
    UnsupportedElement {
        label: String,
        size: usize,
        align: usize,
    },

    #[error("access to `{label}` range {start}..{end} is outside its {len} elements")]
    ReadbackOutOfBounds {
        label: String,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("{resource}: {required} elements required but capacity is {capacity}")]
    CapacityExceeded {
        resource: &'static str,
        required: usize,
        capacity: usize,
    },

    #[error("{resource}: expected {expected}, found {actual}")]
    CountMismatch {
        resource: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("voxel grid has not been built")]
    GridNotBuilt,
}

impl ComputeError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("voxel size must be finite, got {0}")]
    NonFiniteVoxelSize(f32),

    #[error("search radius must be finite and non-negative, got {0}")]
    InvalidSearchRadius(f32),

    #[error("colour channel {channel} of `{field}` must be finite, got {value}")]
    InvalidColour {
        field: &'static str,
        channel: usize,
        value: f32,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("noise filter job belongs to generation {job}, pipeline is at generation {current}")]
    StaleJob { job: u64, current: u64 },
}
