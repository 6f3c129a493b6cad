//! Geospatial store abstraction.
//!
//! The matching, import and scoring engines talk to storage only through
//! [`GeoStore`]. `PgGeoStore` is the production PostGIS backend;
//! `MemoryGeoStore` keeps everything in process and backs the tests and
//! dry runs.

pub mod memory;
pub mod pg;

use chrono::{DateTime, Utc};

use crate::logging::{self, Component};
use crate::model::{Alert, GeoPoint, GloriaError, Observation, RiskRecord, Site};

pub use self::memory::MemoryGeoStore;
pub use self::pg::PgGeoStore;

// ---------------------------------------------------------------------------
// Query and result types
// ---------------------------------------------------------------------------

/// Parameters of a raw-pool candidate search around a point.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub origin: GeoPoint,
    /// Restrict to one variable; `None` searches all of them.
    pub variable: Option<String>,
    pub max_distance_km: f64,
    /// Ignore observations older than this.
    pub since: Option<DateTime<Utc>>,
    /// Return at most this many rows, newest first then nearest.
    pub limit: Option<usize>,
}

/// An unassigned observation found near a site.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub variable: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub dataset_id: i32,
    pub depth: Option<f64>,
    pub quality: i16,
    pub distance_km: f64,
}

/// A site holding enough history to seed sites that have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Donor {
    pub site_id: i32,
    pub observation_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    Completed,
    /// Some chunks failed; the rest were written.
    Partial,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Completed => "completed",
            ImportStatus::Partial => "partial",
            ImportStatus::Failed => "failed",
        }
    }
}

/// One row of the per-file import log.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportLogEntry {
    pub file_name: String,
    pub dataset_id: Option<i32>,
    pub status: ImportStatus,
    pub rows_written: usize,
    pub rows_failed: usize,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

pub trait GeoStore {
    /// All registered sites, ordered by id.
    fn sites(&mut self) -> Result<Vec<Site>, GloriaError>;

    fn site(&mut self, id: i32) -> Result<Site, GloriaError>;

    /// Sites that no observation row references yet.
    fn sites_without_observations(&mut self) -> Result<Vec<Site>, GloriaError>;

    /// Distinct variable names present in the unassigned pool.
    fn raw_variables(&mut self) -> Result<Vec<String>, GloriaError>;

    /// Unassigned observations within `query.max_distance_km` of
    /// `query.origin`, newest first then nearest.
    fn candidates(&mut self, query: &CandidateQuery) -> Result<Vec<Candidate>, GloriaError>;

    /// The site whose area contains `point`, else the nearest site within
    /// `max_distance_km`.
    fn locate_site(&mut self, point: GeoPoint, max_distance_km: f64)
        -> Result<Option<i32>, GloriaError>;

    /// Upserts `rows` in a single transaction keyed on
    /// (variable, timestamp, location). Either every row is written or none.
    fn upsert_chunk(&mut self, rows: &[Observation]) -> Result<usize, GloriaError>;

    /// The site, other than `exclude`, with the most non-synthetic
    /// observations, provided it has more than `min_observations`.
    fn donor_site(&mut self, exclude: i32, min_observations: i64)
        -> Result<Option<Donor>, GloriaError>;

    /// Observations tagged with `site_id` for the given variables, oldest
    /// first. An empty `variables` slice returns every variable.
    fn site_observations(
        &mut self,
        site_id: i32,
        variables: &[&str],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Observation>, GloriaError>;

    /// Writes the record for (site, day), replacing any earlier one.
    fn upsert_risk_record(&mut self, record: &RiskRecord) -> Result<(), GloriaError>;

    /// Writes the alert for (site, type, calendar day of `opened_at`),
    /// replacing severity and description of an existing one.
    fn upsert_alert(&mut self, alert: &Alert) -> Result<(), GloriaError>;

    fn record_import(&mut self, entry: &ImportLogEntry) -> Result<(), GloriaError>;

    /// Internal id of a dataset, registering it on first use.
    fn dataset_ref(&mut self, external_id: &str) -> Result<i32, GloriaError>;
}

// ---------------------------------------------------------------------------
// Chunked writes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub written: usize,
    pub failed_rows: usize,
    pub failed_chunks: usize,
}

impl UpsertReport {
    pub fn merge(&mut self, other: UpsertReport) {
        self.written += other.written;
        self.failed_rows += other.failed_rows;
        self.failed_chunks += other.failed_chunks;
    }
}

/// Upserts `rows` in chunks of `chunk_size`. A failing chunk is rolled back,
/// logged, and skipped; the remaining chunks are still written.
pub fn upsert_chunked<S: GeoStore + ?Sized>(
    store: &mut S,
    rows: &[Observation],
    chunk_size: usize,
    component: Component,
) -> UpsertReport {
    let mut report = UpsertReport::default();
    for (i, chunk) in rows.chunks(chunk_size.max(1)).enumerate() {
        match store.upsert_chunk(chunk) {
            Ok(n) => report.written += n,
            Err(e) => {
                logging::warn(
                    component.clone(),
                    None,
                    &format!("Chunk {} ({} rows) skipped: {}", i + 1, chunk.len(), e),
                );
                report.failed_rows += chunk.len();
                report.failed_chunks += 1;
            }
        }
    }
    report
}

/// Rejects rows the store must never hold.
pub fn validate_observation(row: &Observation) -> Result<(), GloriaError> {
    if !row.value.is_finite() {
        return Err(GloriaError::InvalidRow(format!(
            "{} at {}: non-finite value",
            row.variable, row.timestamp
        )));
    }
    if !(0..=100).contains(&row.quality) {
        return Err(GloriaError::InvalidRow(format!(
            "{} at {}: quality {} outside 0-100",
            row.variable, row.timestamp, row.quality
        )));
    }
    let GeoPoint { lon, lat } = row.location;
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(GloriaError::InvalidRow(format!(
            "{} at {}: location ({}, {}) out of range",
            row.variable, row.timestamp, lon, lat
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Provenance, VAR_WAVE_HEIGHT};
    use chrono::{Duration, TimeZone};

    fn row(hour: i64, value: f64) -> Observation {
        Observation {
            dataset_id: 1,
            variable: VAR_WAVE_HEIGHT.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hour),
            value,
            site_id: None,
            location: GeoPoint::new(-0.4, 38.3),
            depth: None,
            quality: 90,
            provenance: Provenance::Measured,
        }
    }

    #[test]
    fn test_validate_rejects_nan_and_bad_quality() {
        assert!(validate_observation(&row(0, 1.2)).is_ok());
        assert!(validate_observation(&row(0, f64::NAN)).is_err());
        let mut bad = row(0, 1.0);
        bad.quality = 120;
        assert!(validate_observation(&bad).is_err());
        let mut far = row(0, 1.0);
        far.location = GeoPoint::new(200.0, 0.0);
        assert!(validate_observation(&far).is_err());
    }

    #[test]
    fn test_failed_chunk_is_skipped_and_rest_written() {
        let mut store = MemoryGeoStore::new();
        // second chunk carries a NaN and is rolled back as a whole
        let rows = vec![row(0, 1.0), row(1, 1.1), row(2, f64::NAN), row(3, 1.3), row(4, 1.4)];
        let report = upsert_chunked(&mut store, &rows, 2, Component::Ingest);
        assert_eq!(report.written, 3);
        assert_eq!(report.failed_rows, 2);
        assert_eq!(report.failed_chunks, 1);
        assert_eq!(store.observation_count(), 3);
    }

    #[test]
    fn test_report_merge() {
        let mut a = UpsertReport { written: 2, failed_rows: 1, failed_chunks: 1 };
        a.merge(UpsertReport { written: 5, failed_rows: 0, failed_chunks: 0 });
        assert_eq!(a, UpsertReport { written: 7, failed_rows: 1, failed_chunks: 1 });
    }
}
