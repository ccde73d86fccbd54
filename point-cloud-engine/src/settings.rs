//! Viewer settings and change detection.
//!
//! Settings are plain serde structs read from JSON. Instead of polling for changes every
//! frame, callers compute [`SettingsChange::between`] before a processing cycle and rebuild
//! only what the diff requires.

use crate::error::SettingsError;
use crate::filters::{ComplementationParams, MorphologyParams, Placement};
use crate::filters::placement::wall_clock_seed;
use constants::io::DEFAULT_FILE_SOURCES;
use constants::processing::*;
use glam::Vec4;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One input point file and the colour its points get when the file carries none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSource {
    pub enabled: bool,
    pub path: PathBuf,
    pub colour: [f32; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    pub files: Vec<FileSource>,
    pub processing: ProcessingSettings,
    pub acceleration: AccelerationSettings,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            files: DEFAULT_FILE_SOURCES
                .iter()
                .map(|&(path, colour, enabled)| FileSource {
                    enabled,
                    path: PathBuf::from(path),
                    colour,
                })
                .collect(),
            processing: ProcessingSettings::default(),
            acceleration: AccelerationSettings::default(),
        }
    }
}

impl ViewerSettings {
    pub fn enabled_files(&self) -> impl Iterator<Item = &FileSource> {
        self.files.iter().filter(|file| file.enabled)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        for file in &self.files {
            check_colour("files.colour", file.colour)?;
        }
        self.processing.validate()
    }
}

/// Parameters consumed by the grid and every operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub voxel_size: f32,
    pub search_radius: f32,
    pub neighbor_threshold: u32,
    pub voxel_density_threshold: u32,
    pub erosion_iterations: u32,
    pub dilation_iterations: u32,
    pub erosion_neighbor_threshold: u32,
    pub complementation: ComplementationSettings,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            voxel_size: DEFAULT_VOXEL_SIZE,
            search_radius: DEFAULT_SEARCH_RADIUS,
            neighbor_threshold: DEFAULT_NEIGHBOR_THRESHOLD,
            voxel_density_threshold: DEFAULT_VOXEL_DENSITY_THRESHOLD,
            erosion_iterations: DEFAULT_EROSION_ITERATIONS,
            dilation_iterations: DEFAULT_DILATION_ITERATIONS,
            erosion_neighbor_threshold: DEFAULT_EROSION_NEIGHBOR_THRESHOLD,
            complementation: ComplementationSettings::default(),
        }
    }
}

impl ProcessingSettings {
    /// Rejects values no operation can interpret. A voxel size `<= 0` is accepted and degrades
    /// to a single voxel.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.voxel_size.is_finite() {
            return Err(SettingsError::NonFiniteVoxelSize(self.voxel_size));
        }
        if !(self.search_radius.is_finite() && self.search_radius >= 0.0) {
            return Err(SettingsError::InvalidSearchRadius(self.search_radius));
        }
        check_colour("complementation.fill_colour", self.complementation.fill_colour)
    }

    pub fn morphology_params(&self) -> MorphologyParams {
        MorphologyParams {
            voxel_size: self.voxel_size,
            erosion_iterations: self.erosion_iterations,
            dilation_iterations: self.dilation_iterations,
            erosion_neighbor_threshold: self.erosion_neighbor_threshold,
            points_per_axis: self.complementation.points_per_axis,
            placement: self.complementation.placement(),
        }
    }

    pub fn complementation_params(&self) -> ComplementationParams {
        ComplementationParams {
            density_threshold: self.complementation.density_threshold,
            points_per_axis: self.complementation.points_per_axis,
            placement: self.complementation.placement(),
            fill_colour: Vec4::from_array(self.complementation.fill_colour),
        }
    }

    fn morphology_differs(&self, other: &Self) -> bool {
        self.erosion_iterations != other.erosion_iterations
            || self.dilation_iterations != other.dilation_iterations
            || self.erosion_neighbor_threshold != other.erosion_neighbor_threshold
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplementationSettings {
    pub density_threshold: u32,
    pub points_per_axis: u32,
    pub random_placement: bool,
    pub fill_colour: [f32; 4],
    /// Seed for random placement; the wall clock is used when unset.
    pub random_seed: Option<u64>,
}

impl Default for ComplementationSettings {
    fn default() -> Self {
        Self {
            density_threshold: DEFAULT_COMPLEMENTATION_DENSITY_THRESHOLD,
            points_per_axis: DEFAULT_COMPLEMENTATION_POINTS_PER_AXIS,
            random_placement: false,
            fill_colour: DEFAULT_FILL_COLOUR,
            random_seed: None,
        }
    }
}

impl ComplementationSettings {
    /// Fills an unset seed with `seed`. Returns true when the seed was filled.
    pub fn pin_seed(&mut self, seed: u64) -> bool {
        if self.random_seed.is_some() {
            return false;
        }
        self.random_seed = Some(seed);
        true
    }

    /// Settings that were never pinned draw a new seed from the wall clock on every call.
    pub fn placement(&self) -> Placement {
        if self.random_placement {
            Placement::Random {
                seed: self.random_seed.unwrap_or_else(wall_clock_seed),
            }
        } else {
            Placement::Grid
        }
    }
}

/// Per-operation requests for the data-parallel path. Unset flags or a missing device run the
/// CPU path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccelerationSettings {
    pub use_gpu_density_filter: bool,
    pub use_gpu_noise_filter: bool,
    pub use_gpu_morphology: bool,
    pub use_gpu_complementation: bool,
    /// Compute device worker threads, one per core when unset.
    pub threads: Option<usize>,
}

impl AccelerationSettings {
    pub fn any_requested(&self) -> bool {
        self.use_gpu_density_filter
            || self.use_gpu_noise_filter
            || self.use_gpu_morphology
            || self.use_gpu_complementation
    }

    pub fn all(threads: Option<usize>) -> Self {
        Self {
            use_gpu_density_filter: true,
            use_gpu_noise_filter: true,
            use_gpu_morphology: true,
            use_gpu_complementation: true,
            threads,
        }
    }
}

/// What differs between two settings values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsChange {
    pub files: bool,
    pub processing: bool,
    pub morphology: bool,
    pub acceleration: bool,
    /// Voxel size changed, so every built grid is stale.
    pub voxel_size: bool,
}

impl SettingsChange {
    pub fn between(old: &ViewerSettings, new: &ViewerSettings) -> Self {
        let morphology = old.processing.morphology_differs(&new.processing);
        Self {
            files: old.files != new.files,
            processing: old.processing != new.processing,
            morphology,
            acceleration: old.acceleration != new.acceleration,
            voxel_size: old.processing.voxel_size.to_bits() != new.processing.voxel_size.to_bits(),
        }
    }

    pub fn any(&self) -> bool {
        self.files || self.processing || self.morphology || self.acceleration
    }

    /// Data must be reloaded and reprocessed.
    pub fn requires_rebuild(&self) -> bool {
        self.files || self.processing
    }
}

fn check_colour(field: &'static str, colour: [f32; 4]) -> Result<(), SettingsError> {
    match colour.iter().position(|c| !c.is_finite()) {
        Some(channel) => Err(SettingsError::InvalidColour {
            field,
            channel,
            value: colour[channel],
        }),
        None => Ok(()),
    }
}
