/// Settings file loading and command line overrides.
use anyhow::{Context, Result};
use glam::Vec3;
use point_cloud_engine::ViewerSettings;
use point_cloud_engine::settings::{AccelerationSettings, FileSource};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Reads settings from a JSON file, or the defaults when no file is given.
pub fn load_settings(path: Option<&Path>) -> Result<ViewerSettings> {
    let Some(path) = path else {
        info!("no settings file given, using defaults");
        return Ok(ViewerSettings::default());
    };
    let content = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let settings: ViewerSettings =
        serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    settings
        .validate()
        .with_context(|| format!("invalid settings in {}", path.display()))?;
    info!(path = %path.display(), "settings loaded");
    Ok(settings)
}

/// Values given on the command line that replace settings file values.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub inputs: Vec<FileSource>,
    pub voxel_size: Option<f32>,
    pub gpu: bool,
    pub threads: Option<usize>,
    pub seed: Option<u64>,
}

impl Overrides {
    pub fn apply(self, settings: &mut ViewerSettings) {
        if !self.inputs.is_empty() {
            settings.files = self.inputs;
        }
        if let Some(voxel_size) = self.voxel_size {
            settings.processing.voxel_size = voxel_size;
        }
        if self.gpu {
            settings.acceleration = AccelerationSettings::all(self.threads);
        } else if self.threads.is_some() {
            settings.acceleration.threads = self.threads;
        }
        if let Some(seed) = self.seed {
            settings.processing.complementation.random_seed = Some(seed);
        }
    }
}

/// Parses `path` or `path:r,g,b` with colour channels in `0..=1`.
pub fn parse_input(value: &str) -> Result<FileSource, String> {
    let white = [1.0, 1.0, 1.0, 1.0];
    if let Some((path, colour)) = value.rsplit_once(':') {
        if let Ok(rgb) = parse_vec3(colour) {
            return Ok(FileSource {
                enabled: true,
                path: PathBuf::from(path),
                colour: [rgb.x, rgb.y, rgb.z, 1.0],
            });
        }
    }
    if value.is_empty() {
        return Err("empty input path".to_string());
    }
    Ok(FileSource {
        enabled: true,
        path: PathBuf::from(value),
        colour: white,
    })
}

/// Parses `x,y,z`.
pub fn parse_vec3(value: &str) -> Result<Vec3, String> {
    let components = value
        .split(',')
        .map(|part| part.trim().parse::<f32>().map_err(|err| format!("`{part}`: {err}")))
        .collect::<Result<Vec<_>, _>>()?;
    match components.as_slice() {
        &[x, y, z] => Ok(Vec3::new(x, y, z)),
        _ => Err(format!("expected three comma separated values, got `{value}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_with_colour_suffix() {
        let source = parse_input("scans/right.txt:1,0,0.5").unwrap();
        assert_eq!(source.path, PathBuf::from("scans/right.txt"));
        assert_eq!(source.colour, [1.0, 0.0, 0.5, 1.0]);

        let plain = parse_input("C:/scans/left.txt").unwrap();
        assert_eq!(plain.path, PathBuf::from("C:/scans/left.txt"));
        assert_eq!(plain.colour, [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn vectors_need_three_components() {
        assert_eq!(parse_vec3("1, -2, 3.5").unwrap(), Vec3::new(1.0, -2.0, 3.5));
        assert!(parse_vec3("1,2").is_err());
        assert!(parse_vec3("1,2,z").is_err());
    }

    #[test]
    fn partial_settings_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "processing": { "voxel_size": 0.1 } }"#).unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.processing.voxel_size, 0.1);
        assert_eq!(settings.files.len(), 4);
    }

    #[test]
    fn invalid_settings_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "processing": { "search_radius": -1.0 } }"#).unwrap();
        assert!(load_settings(Some(&path)).is_err());
    }

    #[test]
    fn gpu_flag_requests_every_operation() {
        let mut settings = ViewerSettings::default();
        Overrides {
            gpu: true,
            threads: Some(3),
            seed: Some(7),
            ..Default::default()
        }
        .apply(&mut settings);
        assert!(settings.acceleration.use_gpu_morphology);
        assert_eq!(settings.acceleration.threads, Some(3));
        assert_eq!(settings.processing.complementation.random_seed, Some(7));
    }
}
