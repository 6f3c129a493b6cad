/// Grid import: decodes a gridded file into raw observations and upserts
/// them into the unassigned pool.
///
/// Supports `[time, lat, lon]` and `[time, depth, lat, lon]` layouts. The
/// lat/lon grid is subsampled so each time slice contributes roughly
/// `target_points_per_slice` points. Only the first depth level of a 4-D
/// variable is read; the observation key has no depth component.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::grid::{
    read_axis, resolve_axis, GridError, GriddedDataset, DEPTH_AXIS, LAT_AXIS, LON_AXIS, TIME_AXIS,
};
use super::time_units::TimeUnits;
use crate::config::IngestConfig;
use crate::datasets::{canonical_variable, DATASET_REGISTRY};
use crate::logging::{self, Component};
use crate::model::{GeoPoint, GloriaError, Observation, Provenance, VAR_TEMPERATURE};
use crate::store::{upsert_chunked, GeoStore, ImportLogEntry, ImportStatus, UpsertReport};

/// Temperatures above this are taken to be Kelvin.
pub const KELVIN_THRESHOLD: f64 = 200.0;
const KELVIN_OFFSET: f64 = 273.15;

/// Rows decoded from one file, before writing.
#[derive(Debug, Clone, Default)]
pub struct DecodedGrid {
    pub rows: Vec<Observation>,
    /// Canonical names of the variables that were read.
    pub variables: Vec<String>,
    /// Grid cells dropped as missing or out of range.
    pub skipped: usize,
}

/// Result of importing one file.
#[derive(Debug, Clone)]
pub struct FileImport {
    pub file_name: String,
    pub dataset_id: Option<i32>,
    pub status: ImportStatus,
    pub variables: Vec<String>,
    pub report: UpsertReport,
    pub skipped: usize,
    /// Set when the file was rejected for its structure.
    pub error: Option<GridError>,
}

impl FileImport {
    pub fn rejected(&self) -> bool {
        self.error.is_some()
    }
}

/// Grid points per axis step so that `nlat * nlon / step^2` is close to
/// `target`.
pub fn subsample_step(nlat: usize, nlon: usize, target: usize) -> usize {
    if target == 0 {
        return 1;
    }
    let ratio = (nlat * nlon) as f64 / target as f64;
    (ratio.sqrt().floor() as usize).max(1)
}

/// Canonical value for a raw grid value, or `None` if it must be skipped.
pub fn normalize_value(variable: &str, raw: f64) -> Option<f64> {
    if !raw.is_finite() {
        return None;
    }
    let value = if variable == VAR_TEMPERATURE && raw > KELVIN_THRESHOLD {
        raw - KELVIN_OFFSET
    } else {
        raw
    };
    let spec = crate::datasets::variable_spec(variable)?;
    (spec.valid_min..=spec.valid_max).contains(&value).then_some(value)
}

/// External dataset id for a downloaded file: the registry id the file name
/// starts with, else the file stem.
pub fn dataset_external_id(file_name: &str) -> String {
    DATASET_REGISTRY
        .iter()
        .find(|d| file_name.starts_with(d.id))
        .map(|d| d.id.to_string())
        .unwrap_or_else(|| {
            Path::new(file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| file_name.to_string())
        })
}

fn wrap_longitude(lon: f64) -> f64 {
    if lon > 180.0 { lon - 360.0 } else { lon }
}

/// Decodes every importable variable of `grid` into raw-pool observations.
pub fn decode_grid<D: GriddedDataset + ?Sized>(
    grid: &D,
    dataset_id: i32,
    config: &IngestConfig,
) -> Result<DecodedGrid, GridError> {
    let time = read_axis(grid, TIME_AXIS, "time")?;
    let lats = read_axis(grid, LAT_AXIS, "latitude")?;
    let lons = read_axis(grid, LON_AXIS, "longitude")?;
    let depths = match resolve_axis(grid, DEPTH_AXIS) {
        Some(_) => Some(read_axis(grid, DEPTH_AXIS, "depth")?),
        None => None,
    };

    let units = grid
        .attribute(Some(&time.name), "units")
        .ok_or_else(|| GridError::BadTimeUnits(format!("{} has no units", time.name)))?;
    let units = TimeUnits::parse(&units)?;
    let times: Vec<Option<DateTime<Utc>>> =
        time.values.iter().map(|t| units.to_datetime(*t)).collect();

    let axis_names = [Some(&time.name), Some(&lats.name), Some(&lons.name), depths.as_ref().map(|d| &d.name)];
    let (nt, nlat, nlon) = (time.values.len(), lats.values.len(), lons.values.len());
    let step = subsample_step(nlat, nlon, config.target_points_per_slice);

    let mut decoded = DecodedGrid::default();
    for name in grid.variable_names() {
        if axis_names.iter().flatten().any(|a| **a == name) {
            continue;
        }
        let Some(spec) = canonical_variable(&name) else {
            continue;
        };
        let var = grid.read_variable(&name)?;
        var.check_shape()?;

        let (depth_len, depth) = match var.shape.len() {
            3 => (1, None),
            4 => {
                let d = depths
                    .as_ref()
                    .ok_or(GridError::MissingAxis("depth"))?;
                (var.shape[1], d.values.first().copied())
            }
            _ => {
                return Err(GridError::ShapeMismatch(format!(
                    "{}: expected 3 or 4 dimensions, got {:?}",
                    name, var.dimensions
                )));
            }
        };
        let expected = match var.shape.len() {
            3 => vec![nt, nlat, nlon],
            _ => vec![nt, depth_len, nlat, nlon],
        };
        if var.shape != expected {
            return Err(GridError::ShapeMismatch(format!(
                "{}: shape {:?} does not match axes {:?}",
                name, var.shape, expected
            )));
        }

        let before = decoded.rows.len();
        for (t, timestamp) in times.iter().enumerate() {
            let Some(timestamp) = *timestamp else {
                decoded.skipped += nlat * nlon;
                continue;
            };
            // first depth level only
            let slice = t * depth_len * nlat * nlon;
            for i in (0..nlat).step_by(step) {
                for j in (0..nlon).step_by(step) {
                    let raw = var.values[slice + i * nlon + j];
                    let Some(value) = normalize_value(spec.name, raw) else {
                        decoded.skipped += 1;
                        continue;
                    };
                    decoded.rows.push(Observation {
                        dataset_id,
                        variable: spec.name.to_string(),
                        timestamp,
                        value,
                        site_id: None,
                        location: GeoPoint::new(wrap_longitude(lons.values[j]), lats.values[i]),
                        depth,
                        quality: config.default_quality,
                        provenance: Provenance::Measured,
                    });
                }
            }
        }
        logging::debug(
            Component::Ingest,
            None,
            &format!("{} -> {}: {} rows (step {})", name, spec.name, decoded.rows.len() - before, step),
        );
        if !decoded.variables.iter().any(|v| v == spec.name) {
            decoded.variables.push(spec.name.to_string());
        }
    }

    if decoded.variables.is_empty() {
        return Err(GridError::NoImportableVariable);
    }
    Ok(decoded)
}

/// Tags each row with the site whose area contains it or the nearest site
/// within `max_distance_km`. Lookups are cached per grid point.
fn tag_sites<S: GeoStore + ?Sized>(
    store: &mut S,
    rows: &mut [Observation],
    max_distance_km: f64,
) -> Result<usize, GloriaError> {
    let mut cache: HashMap<(u64, u64), Option<i32>> = HashMap::new();
    let mut tagged = 0;
    for row in rows.iter_mut() {
        let key = (row.location.lon.to_bits(), row.location.lat.to_bits());
        let site = match cache.get(&key) {
            Some(site) => *site,
            None => {
                let site = store.locate_site(row.location, max_distance_km)?;
                cache.insert(key, site);
                site
            }
        };
        if site.is_some() {
            tagged += 1;
        }
        row.site_id = site;
    }
    Ok(tagged)
}

fn import_status(report: &UpsertReport) -> ImportStatus {
    if report.failed_rows == 0 {
        ImportStatus::Completed
    } else if report.written > 0 {
        ImportStatus::Partial
    } else {
        ImportStatus::Failed
    }
}

/// Imports one opened grid and writes its import-log row.
///
/// Structural problems with the file are reported in the returned
/// [`FileImport`]; only store failures are returned as errors.
pub fn import_grid<S, D>(
    store: &mut S,
    grid: &D,
    file_name: &str,
    config: &IngestConfig,
) -> Result<FileImport, GloriaError>
where
    S: GeoStore + ?Sized,
    D: GriddedDataset + ?Sized,
{
    let started_at = Utc::now();
    let dataset_id = store.dataset_ref(&dataset_external_id(file_name))?;

    let mut result = FileImport {
        file_name: file_name.to_string(),
        dataset_id: Some(dataset_id),
        status: ImportStatus::Failed,
        variables: Vec::new(),
        report: UpsertReport::default(),
        skipped: 0,
        error: None,
    };

    match decode_grid(grid, dataset_id, config) {
        Ok(mut decoded) => {
            if let Some(km) = config.tag_nearest_site_km {
                let tagged = tag_sites(store, &mut decoded.rows, km)?;
                logging::debug(
                    Component::Ingest,
                    None,
                    &format!("{}: {} of {} rows tagged with a site", file_name, tagged, decoded.rows.len()),
                );
            }
            result.report =
                upsert_chunked(store, &decoded.rows, config.chunk_size, Component::Ingest);
            result.status = import_status(&result.report);
            result.variables = decoded.variables;
            result.skipped = decoded.skipped;
        }
        Err(e) => {
            logging::log_ingest_failure(file_name, "decode", &e);
            result.error = Some(e);
        }
    }

    store.record_import(&ImportLogEntry {
        file_name: file_name.to_string(),
        dataset_id: result.dataset_id,
        status: result.status,
        rows_written: result.report.written,
        rows_failed: result.report.failed_rows,
        message: result.error.as_ref().map(|e| e.to_string()),
        started_at,
        finished_at: Utc::now(),
    })?;

    logging::info(
        Component::Ingest,
        None,
        &format!(
            "{}: {} ({} written, {} failed, {} skipped)",
            file_name,
            result.status.as_str(),
            result.report.written,
            result.report.failed_rows,
            result.skipped
        ),
    );
    Ok(result)
}

// ---------------------------------------------------------------------------
// Directory bookkeeping
// ---------------------------------------------------------------------------

/// `.nc` files directly inside `dir`, sorted by name.
pub fn pending_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "nc"))
        .collect();
    files.sort();
    Ok(files)
}

/// Moves `file` into `dir`, creating it if needed. Returns the new path.
pub fn move_into(file: &Path, dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let name = file
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let target = dir.join(name);
    fs::rename(file, &target)?;
    Ok(target)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySummary {
    pub files: usize,
    pub imported: usize,
    pub rejected: usize,
    /// Files whose rows all failed to write; left in place for the next run.
    pub retained: usize,
    pub rows_written: usize,
}

/// Imports every pending file of the download directory.
///
/// `open` turns a path into a readable grid. Imported files move to the
/// processed directory, structurally broken ones to the failed directory.
pub fn import_directory<S, F>(
    store: &mut S,
    config: &IngestConfig,
    mut open: F,
) -> Result<DirectorySummary, GloriaError>
where
    S: GeoStore + ?Sized,
    F: FnMut(&Path) -> Result<Box<dyn GriddedDataset>, GridError>,
{
    let files = pending_files(&config.download_dir).map_err(|e| {
        GloriaError::InvalidConfig(format!("{}: {}", config.download_dir.display(), e))
    })?;
    let mut summary = DirectorySummary { files: files.len(), ..Default::default() };
    logging::info(
        Component::Ingest,
        None,
        &format!("{} file(s) pending in {}", files.len(), config.download_dir.display()),
    );

    for path in &files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let outcome = match open(path) {
            Ok(grid) => import_grid(store, grid.as_ref(), &file_name, config)?,
            Err(e) => {
                logging::log_ingest_failure(&file_name, "open", &e);
                let now = Utc::now();
                store.record_import(&ImportLogEntry {
                    file_name: file_name.clone(),
                    dataset_id: None,
                    status: ImportStatus::Failed,
                    rows_written: 0,
                    rows_failed: 0,
                    message: Some(e.to_string()),
                    started_at: now,
                    finished_at: now,
                })?;
                FileImport {
                    file_name: file_name.clone(),
                    dataset_id: None,
                    status: ImportStatus::Failed,
                    variables: Vec::new(),
                    report: UpsertReport::default(),
                    skipped: 0,
                    error: Some(e),
                }
            }
        };

        summary.rows_written += outcome.report.written;
        let destination = if outcome.rejected() {
            summary.rejected += 1;
            Some(config.failed_dir())
        } else if outcome.status == ImportStatus::Failed {
            summary.retained += 1;
            None
        } else {
            summary.imported += 1;
            Some(config.processed_dir())
        };

        if let Some(dir) = destination
            && let Err(e) = move_into(path, &dir)
        {
            logging::warn(
                Component::Ingest,
                None,
                &format!("Could not move {} to {}: {}", file_name, dir.display(), e),
            );
        }
    }

    logging::log_batch_summary(
        Component::Ingest,
        "files",
        summary.files,
        summary.imported,
        summary.rejected + summary.retained,
    );
    Ok(summary)
}
