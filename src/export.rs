/// JSON export of one gridded file for map display.
///
/// Reads the first time step of a wave, temperature or current grid inside
/// a bounding box, colours each point by value band, and attaches summary
/// statistics. Currents are exported as speed from the `uo`/`vo` pair.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::datasets::canonical_variable;
use crate::geodesy::BoundingBox;
use crate::ingest::grid::{read_axis, GridError, GridVariable, GriddedDataset, LAT_AXIS, LON_AXIS, TIME_AXIS};
use crate::ingest::time_units::TimeUnits;
use crate::model::{GeoPoint, VAR_CURRENT_U, VAR_CURRENT_V, VAR_TEMPERATURE, VAR_WAVE_HEIGHT};
use crate::risk::round_to;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    WaveHeight,
    Temperature,
    CurrentSpeed,
}

impl ExportKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "wave" | "waves" | "wave_height" => Some(ExportKind::WaveHeight),
            "temperature" | "temp" => Some(ExportKind::Temperature),
            "current" | "currents" | "current_speed" => Some(ExportKind::CurrentSpeed),
            _ => None,
        }
    }

    pub fn variable(&self) -> &'static str {
        match self {
            ExportKind::WaveHeight => VAR_WAVE_HEIGHT,
            ExportKind::Temperature => VAR_TEMPERATURE,
            ExportKind::CurrentSpeed => "current_speed",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            ExportKind::WaveHeight => "m",
            ExportKind::Temperature => "degC",
            ExportKind::CurrentSpeed => "m/s",
        }
    }

    fn valid_range(&self) -> (f64, f64) {
        match self {
            ExportKind::WaveHeight => (0.0, 20.0),
            ExportKind::Temperature => (-5.0, 40.0),
            ExportKind::CurrentSpeed => (0.0, 5.0),
        }
    }

    /// Upper bounds (exclusive) of each colour band, last band open-ended.
    fn bands(&self) -> &'static [(f64, &'static str, &'static str)] {
        match self {
            ExportKind::WaveHeight => &[
                (1.0, "green", "low"),
                (2.2, "yellow", "moderate"),
                (4.0, "orange", "high"),
                (6.0, "red", "very_high"),
                (f64::INFINITY, "black", "extreme"),
            ],
            ExportKind::Temperature => &[
                (12.0, "blue", "very_cold"),
                (15.0, "cyan", "cold"),
                (18.0, "green", "mild"),
                (22.0, "yellow", "warm"),
                (26.0, "orange", "very_warm"),
                (f64::INFINITY, "red", "hot"),
            ],
            ExportKind::CurrentSpeed => &[
                (0.1, "blue", "very_slow"),
                (0.3, "cyan", "slow"),
                (0.5, "green", "moderate"),
                (0.8, "yellow", "fast"),
                (1.2, "orange", "very_fast"),
                (f64::INFINITY, "red", "extreme"),
            ],
        }
    }

    /// Colour and level label for a value.
    pub fn classify(&self, value: f64) -> (&'static str, &'static str) {
        let bands = self.bands();
        bands
            .iter()
            .find(|(upper, _, _)| value < *upper)
            .or(bands.last())
            .map(|(_, color, level)| (*color, *level))
            .unwrap_or(("black", "extreme"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportPoint {
    pub lon: f64,
    pub lat: f64,
    pub value: f64,
    pub timestamp: String,
    pub color: &'static str,
    pub level: &'static str,
    pub variable: &'static str,
    pub unit: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub percentile_25: f64,
    pub percentile_75: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportMetadata {
    pub total_points: usize,
    pub variable: &'static str,
    pub unit: &'static str,
    pub source: String,
    pub extracted_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridExport {
    pub data: Vec<ExportPoint>,
    /// `null` when no point survived filtering.
    pub statistics: Option<Statistics>,
    pub metadata: ExportMetadata,
}

/// Linear-interpolated percentile of sorted values, `q` in [0, 100].
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Summary statistics, rounded to 2 decimals. Standard deviation is the
/// population one.
pub fn statistics(values: &[f64]) -> Option<Statistics> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(Statistics {
        count: sorted.len(),
        min: round_to(sorted[0], 2),
        max: round_to(sorted[sorted.len() - 1], 2),
        mean: round_to(mean, 2),
        median: round_to(percentile(&sorted, 50.0), 2),
        std: round_to(variance.sqrt(), 2),
        percentile_25: round_to(percentile(&sorted, 25.0), 2),
        percentile_75: round_to(percentile(&sorted, 75.0), 2),
    })
}

/// Finds the first variable whose canonical name is `canonical`.
fn find_variable<D: GriddedDataset + ?Sized>(grid: &D, canonical: &str) -> Result<GridVariable, GridError> {
    let name = grid
        .variable_names()
        .into_iter()
        .find(|n| canonical_variable(n).is_some_and(|spec| spec.name == canonical))
        .ok_or(GridError::NoImportableVariable)?;
    let var = grid.read_variable(&name)?;
    var.check_shape()?;
    Ok(var)
}

/// Value at (i, j) of the first (time, depth) plane of a variable whose
/// last two dimensions are lat and lon.
fn surface_value(var: &GridVariable, nlat: usize, nlon: usize, i: usize, j: usize) -> Result<f64, GridError> {
    let n = var.shape.len();
    if n < 2 || var.shape[n - 2..] != [nlat, nlon] {
        return Err(GridError::ShapeMismatch(format!(
            "{}: shape {:?} does not end in [{}, {}]",
            var.name, var.shape, nlat, nlon
        )));
    }
    Ok(var.values[i * nlon + j])
}

/// Extracts the first time step of `kind` inside `bbox`.
pub fn extract_points<D: GriddedDataset + ?Sized>(
    grid: &D,
    kind: ExportKind,
    bbox: &BoundingBox,
) -> Result<Vec<ExportPoint>, GridError> {
    let time = read_axis(grid, TIME_AXIS, "time")?;
    let lats = read_axis(grid, LAT_AXIS, "latitude")?;
    let lons = read_axis(grid, LON_AXIS, "longitude")?;
    let units = grid
        .attribute(Some(&time.name), "units")
        .ok_or_else(|| GridError::BadTimeUnits(format!("{} has no units", time.name)))?;
    let timestamp = time
        .values
        .first()
        .and_then(|t| TimeUnits::parse(&units).ok()?.to_datetime(*t))
        .ok_or_else(|| GridError::BadTimeUnits(units.clone()))?
        .to_rfc3339();

    let (nlat, nlon) = (lats.values.len(), lons.values.len());
    let primary = match kind {
        ExportKind::CurrentSpeed => find_variable(grid, VAR_CURRENT_U)?,
        _ => find_variable(grid, kind.variable())?,
    };
    let secondary = match kind {
        ExportKind::CurrentSpeed => Some(find_variable(grid, VAR_CURRENT_V)?),
        _ => None,
    };
    let (min, max) = kind.valid_range();

    let mut points = Vec::new();
    for (i, lat) in lats.values.iter().enumerate() {
        for (j, lon) in lons.values.iter().enumerate() {
            if !bbox.contains(GeoPoint::new(*lon, *lat)) {
                continue;
            }
            let mut value = surface_value(&primary, nlat, nlon, i, j)?;
            if let Some(v) = &secondary {
                value = value.hypot(surface_value(v, nlat, nlon, i, j)?);
            }
            if kind == ExportKind::Temperature && value > 200.0 {
                value -= 273.15;
            }
            if !value.is_finite() || value < min || value > max {
                continue;
            }
            let (color, level) = kind.classify(value);
            points.push(ExportPoint {
                lon: *lon,
                lat: *lat,
                value: round_to(value, 2),
                timestamp: timestamp.clone(),
                color,
                level,
                variable: kind.variable(),
                unit: kind.unit(),
            });
        }
    }
    Ok(points)
}

/// Assembles the export document.
pub fn build_export(points: Vec<ExportPoint>, kind: ExportKind, source: &str, now: DateTime<Utc>) -> GridExport {
    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    GridExport {
        statistics: statistics(&values),
        metadata: ExportMetadata {
            total_points: points.len(),
            variable: kind.variable(),
            unit: kind.unit(),
            source: source.to_string(),
            extracted_at: now.to_rfc3339(),
        },
        data: points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::grid::MemoryGrid;
    use chrono::TimeZone;

    fn bbox() -> BoundingBox {
        BoundingBox { min_lon: -1.5, max_lon: 0.7, min_lat: 37.5, max_lat: 40.5 }
    }

    fn grid_with(name: &str, values: Vec<f64>) -> MemoryGrid {
        let mut grid = MemoryGrid::new();
        grid.add_variable(
            GridVariable::new("time", &["time"], &[2], vec![0.0, 1.0]).with_units("hours since 2025-05-01"),
        )
        .unwrap();
        grid.add_variable(GridVariable::new("lat", &["lat"], &[2], vec![38.0, 41.0])).unwrap();
        grid.add_variable(GridVariable::new("lon", &["lon"], &[2], vec![-0.5, 0.0])).unwrap();
        grid.add_variable(GridVariable::new(name, &["time", "lat", "lon"], &[2, 2, 2], values))
            .unwrap();
        grid
    }

    #[test]
    fn test_wave_bands() {
        let k = ExportKind::WaveHeight;
        assert_eq!(k.classify(0.5), ("green", "low"));
        assert_eq!(k.classify(1.0), ("yellow", "moderate"));
        assert_eq!(k.classify(3.9), ("orange", "high"));
        assert_eq!(k.classify(5.0), ("red", "very_high"));
        assert_eq!(k.classify(6.0), ("black", "extreme"));
    }

    #[test]
    fn test_other_bands() {
        assert_eq!(ExportKind::Temperature.classify(19.0), ("yellow", "warm"));
        assert_eq!(ExportKind::CurrentSpeed.classify(0.05), ("blue", "very_slow"));
        assert_eq!(ExportKind::CurrentSpeed.classify(2.0), ("red", "extreme"));
        assert_eq!(ExportKind::parse("Waves"), Some(ExportKind::WaveHeight));
        assert_eq!(ExportKind::parse("chlorophyll"), None);
    }

    #[test]
    fn test_statistics() {
        let stats = statistics(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.mean, 2.5);
        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.std, 1.12);
        assert_eq!(stats.percentile_25, 1.75);
        assert_eq!(stats.percentile_75, 3.25);
        assert!(statistics(&[]).is_none());
        assert_eq!(statistics(&[2.0]).unwrap().percentile_75, 2.0);
    }

    #[test]
    fn test_extract_first_step_inside_box() {
        // second latitude row lies outside the box, second time step is ignored
        let grid = grid_with("VHM0", vec![0.8, f64::NAN, 3.0, 3.0, 9.0, 9.0, 9.0, 9.0]);
        let points = extract_points(&grid, ExportKind::WaveHeight, &bbox()).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 0.8);
        assert_eq!(points[0].color, "green");
        assert_eq!(points[0].timestamp, "2025-05-01T00:00:00+00:00");
    }

    #[test]
    fn test_extract_current_speed() {
        let mut grid = grid_with("uo", vec![0.3, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        grid.add_variable(GridVariable::new(
            "vo",
            &["time", "lat", "lon"],
            &[2, 2, 2],
            vec![0.4, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        ))
        .unwrap();
        let points = extract_points(&grid, ExportKind::CurrentSpeed, &bbox()).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, 0.5);
        assert_eq!(points[0].level, "fast");
        assert_eq!(points[1].value, 0.0);
    }

    #[test]
    fn test_build_export_document() {
        let grid = grid_with("VHM0", vec![0.8, 2.5, 3.0, 3.0, 9.0, 9.0, 9.0, 9.0]);
        let points = extract_points(&grid, ExportKind::WaveHeight, &bbox()).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 5, 2, 12, 0, 0).unwrap();
        let export = build_export(points, ExportKind::WaveHeight, "MEDSEA waves", now);

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["metadata"]["total_points"], 2);
        assert_eq!(json["metadata"]["variable"], VAR_WAVE_HEIGHT);
        assert_eq!(json["statistics"]["count"], 2);
        assert_eq!(json["data"][1]["color"], "orange");
        assert_eq!(json["data"][1]["unit"], "m");
    }
}
