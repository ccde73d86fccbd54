/// Point file loading for comma separated `x,y,z[,r,g,b]` lines.
use constants::io::{COLOUR_CHANNEL_MAX, COLOURED_FIELD_COUNT, MIN_FIELD_COUNT, PROGRESS_UPDATE_INTERVAL};
use csv::{ReaderBuilder, StringRecord, Trim};
use glam::{Vec3, Vec4};
use indicatif::{ProgressBar, ProgressStyle};
use point_cloud_engine::PointCloudSnapshot;
use point_cloud_engine::settings::FileSource;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("point file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to open {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Line counts of one loaded file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileLoadStats {
    pub path: PathBuf,
    pub lines: usize,
    pub loaded: usize,
    pub skipped: usize,
    pub coloured: usize,
}

/// Loads every enabled source in order and concatenates the points.
/// A file that cannot be read is logged and skipped.
pub fn load_sources<'a>(
    sources: impl IntoIterator<Item = &'a FileSource>,
) -> (PointCloudSnapshot, Vec<FileLoadStats>) {
    let mut points = Vec::new();
    let mut stats = Vec::new();

    for source in sources {
        let colour = Vec4::from_array(source.colour);
        match load_file(&source.path, colour, &mut points) {
            Ok(file_stats) => stats.push(file_stats),
            Err(err) => error!(path = %source.path.display(), error = %err, "point file skipped"),
        }
    }

    info!(points = points.len(), files = stats.len(), "point sources loaded");
    (PointCloudSnapshot::from_points(points), stats)
}

/// Appends the points of one file to `points`.
/// Points without their own colour get `default_colour`.
pub fn load_file(
    path: &Path,
    default_colour: Vec4,
    points: &mut Vec<(Vec3, Vec4)>,
) -> Result<FileLoadStats, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let file_bytes = file.metadata().map(|meta| meta.len()).unwrap_or(0);

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(BufReader::new(file));

    let pb = ProgressBar::new(file_bytes);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("▉▊▋▌▍▎▏ "),
    );
    pb.set_message(format!("Loading {}", path.display()));

    let mut stats = FileLoadStats {
        path: path.to_path_buf(),
        ..Default::default()
    };
    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) if err.is_io_error() => {
                pb.abandon();
                return Err(LoadError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
            Err(err) => {
                debug!(%err, "unreadable line skipped");
                stats.lines += 1;
                stats.skipped += 1;
                continue;
            }
        }

        stats.lines += 1;
        match parse_record(&record, default_colour) {
            Some((point, has_colour)) => {
                points.push(point);
                stats.loaded += 1;
                stats.coloured += usize::from(has_colour);
            }
            None => stats.skipped += 1,
        }

        if stats.lines % PROGRESS_UPDATE_INTERVAL == 0 {
            pb.set_position(reader.position().byte());
        }
    }
    pb.finish_with_message("Points loaded");

    if stats.skipped > 0 {
        warn!(path = %path.display(), skipped = stats.skipped, "malformed lines skipped");
    }
    debug!(path = %path.display(), loaded = stats.loaded, coloured = stats.coloured, "point file loaded");
    Ok(stats)
}

/// Parses one line into a point. Returns `None` for lines without three numeric coordinates.
/// The flag is set when the line carried its own colour.
pub fn parse_record(record: &StringRecord, default_colour: Vec4) -> Option<((Vec3, Vec4), bool)> {
    if record.len() < MIN_FIELD_COUNT {
        return None;
    }
    let x = record[0].parse::<f32>().ok()?;
    let y = record[1].parse::<f32>().ok()?;
    let z = record[2].parse::<f32>().ok()?;
    let position = Vec3::new(x, y, z);

    if record.len() == COLOURED_FIELD_COUNT {
        if let Some(colour) = parse_colour(&record[3], &record[4], &record[5]) {
            return Some(((position, colour), true));
        }
    }
    Some(((position, default_colour), false))
}

fn parse_colour(r: &str, g: &str, b: &str) -> Option<Vec4> {
    let channel = |value: &str| value.parse::<f32>().ok().map(|c| c / COLOUR_CHANNEL_MAX);
    Some(Vec4::new(channel(r)?, channel(g)?, channel(b)?, 1.0))
}
