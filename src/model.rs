/// Core data types for the GlorIA aquaculture monitoring service.
///
/// This module defines the shared domain model imported by all other modules:
/// sites, observations, daily risk records and alerts, plus the service-wide
/// error type. It contains no I/O.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Canonical variable names
// ---------------------------------------------------------------------------

/// Sea water potential temperature, degrees Celsius.
pub const VAR_TEMPERATURE: &str = "temperature";

/// Sea water salinity, PSU.
pub const VAR_SALINITY: &str = "salinity";

/// Eastward sea water velocity, m/s.
pub const VAR_CURRENT_U: &str = "current_u";

/// Northward sea water velocity, m/s.
pub const VAR_CURRENT_V: &str = "current_v";

/// Significant wave height, metres.
pub const VAR_WAVE_HEIGHT: &str = "wave_height";

/// Wind speed at 10 m, m/s. Only used as a wave-height proxy.
pub const VAR_WIND_SPEED: &str = "wind_speed";

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// A WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

// ---------------------------------------------------------------------------
// Sites
// ---------------------------------------------------------------------------

/// Broad classification of an aquaculture installation.
///
/// Only marine sites are exposed to wave- and current-driven escape events,
/// so only they are scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteKind {
    Marine,
    Other,
}

impl SiteKind {
    /// Maps the free-text type column of the site table onto a kind.
    pub fn from_type_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "marina" | "mar" | "maricultura" | "offshore" | "marine" => SiteKind::Marine,
            _ => SiteKind::Other,
        }
    }
}

/// A registered aquaculture installation. Created by an administrative
/// process outside this service; read-only here.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub id: i32,
    pub name: String,
    pub kind: SiteKind,
    pub location: GeoPoint,
    /// Exterior ring of the lease area, if one was surveyed.
    pub area: Option<Vec<GeoPoint>>,
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// Where an observation row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    /// Decoded from a downloaded grid; part of the raw pool.
    Measured,
    /// A site's copy of a nearby raw point.
    Assigned,
    /// Copied from a donor site with jitter because nothing real was nearby.
    Synthetic,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Measured => "measured",
            Provenance::Assigned => "assigned",
            Provenance::Synthetic => "synthetic",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "measured" => Some(Provenance::Measured),
            "assigned" => Some(Provenance::Assigned),
            "synthetic" => Some(Provenance::Synthetic),
            _ => None,
        }
    }
}

/// A single timestamped scalar environmental reading at a point.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub dataset_id: i32,
    pub variable: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// `None` for raw pool data that no site has claimed.
    pub site_id: Option<i32>,
    pub location: GeoPoint,
    pub depth: Option<f64>,
    /// 0-100.
    pub quality: i16,
    pub provenance: Provenance,
}

impl Observation {
    pub fn key(&self) -> ObservationKey {
        ObservationKey::new(&self.variable, self.timestamp, self.location, self.site_id)
    }
}

/// Uniqueness key of the observation table: (variable, timestamp, location,
/// site). The raw pool (`site_id = None`) is its own key space, so a site
/// copy sitting on a grid point never resolves onto the raw row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObservationKey {
    pub variable: String,
    pub timestamp: DateTime<Utc>,
    lon_bits: u64,
    lat_bits: u64,
    pub site_id: Option<i32>,
}

impl ObservationKey {
    pub fn new(
        variable: &str,
        timestamp: DateTime<Utc>,
        location: GeoPoint,
        site_id: Option<i32>,
    ) -> Self {
        Self {
            variable: variable.to_string(),
            timestamp,
            lon_bits: location.lon.to_bits(),
            lat_bits: location.lat.to_bits(),
            site_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Risk records and alerts
// ---------------------------------------------------------------------------

/// Escape risk tier, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    /// `index >= 7` is high, `3.5 <= index < 7` medium, anything else low.
    pub fn from_index(index: f64) -> Self {
        if index >= 7.0 {
            RiskTier::High
        } else if index >= 3.5 {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "low" => Some(RiskTier::Low),
            "medium" => Some(RiskTier::Medium),
            "high" => Some(RiskTier::High),
            _ => None,
        }
    }
}

/// The daily escape-risk assessment for one site. One row per
/// (site, calendar day); recomputing the same day overwrites it.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskRecord {
    pub site_id: i32,
    pub day: NaiveDate,
    pub wave_today_m: f64,
    pub wave_yesterday_m: f64,
    pub current_magnitude_ms: f64,
    /// 0.0-10.0, one decimal.
    pub index: f64,
    pub tier: RiskTier,
    /// 0.0-1.0.
    pub probability: f64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// A warning/critical record raised by a high-risk day.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub site_id: i32,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub description: String,
    pub opened_at: DateTime<Utc>,
    pub active: bool,
    pub recommended_action: String,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise while reading or writing the geospatial store or
/// loading service configuration.
#[derive(Debug, PartialEq)]
pub enum GloriaError {
    /// The store rejected a query.
    Database(String),
    /// The connection to the store is gone; nothing further can be written.
    ConnectionLost(String),
    /// A required environment variable or config file entry is absent.
    MissingConfig(String),
    /// The config file exists but could not be parsed or is inconsistent.
    InvalidConfig(String),
    /// The requested site id does not exist.
    SiteNotFound(i32),
    /// A row failed validation before it reached the store.
    InvalidRow(String),
}

impl std::fmt::Display for GloriaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GloriaError::Database(msg) => write!(f, "Database error: {}", msg),
            GloriaError::ConnectionLost(msg) => write!(f, "Database connection lost: {}", msg),
            GloriaError::MissingConfig(key) => write!(f, "Missing configuration: {}", key),
            GloriaError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            GloriaError::SiteNotFound(id) => write!(f, "Site not found: {}", id),
            GloriaError::InvalidRow(msg) => write!(f, "Invalid row: {}", msg),
        }
    }
}

impl std::error::Error for GloriaError {}

impl GloriaError {
    /// True when the whole batch must stop, not just the current unit of work.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GloriaError::ConnectionLost(_))
    }
}

impl From<postgres::Error> for GloriaError {
    fn from(err: postgres::Error) -> Self {
        if err.is_closed() {
            GloriaError::ConnectionLost(err.to_string())
        } else {
            GloriaError::Database(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_site_kind_recognises_marine_labels() {
        for label in ["marina", "Mar", " maricultura ", "OFFSHORE"] {
            assert_eq!(SiteKind::from_type_label(label), SiteKind::Marine, "label '{}'", label);
        }
        assert_eq!(SiteKind::from_type_label("continental"), SiteKind::Other);
        assert_eq!(SiteKind::from_type_label(""), SiteKind::Other);
    }

    #[test]
    fn test_risk_tier_boundaries() {
        assert_eq!(RiskTier::from_index(0.0), RiskTier::Low);
        assert_eq!(RiskTier::from_index(3.49), RiskTier::Low);
        assert_eq!(RiskTier::from_index(3.5), RiskTier::Medium);
        assert_eq!(RiskTier::from_index(6.99), RiskTier::Medium);
        assert_eq!(RiskTier::from_index(7.0), RiskTier::High);
        assert_eq!(RiskTier::from_index(10.0), RiskTier::High);
    }

    #[test]
    fn test_observation_key_ignores_value_and_quality() {
        let ts = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
        let a = Observation {
            dataset_id: 1,
            variable: VAR_TEMPERATURE.to_string(),
            timestamp: ts,
            value: 17.2,
            site_id: None,
            location: GeoPoint::new(-0.45, 38.2),
            depth: None,
            quality: 90,
            provenance: Provenance::Measured,
        };
        let mut b = a.clone();
        b.value = 18.0;
        b.quality = 50;
        assert_eq!(a.key(), b.key());

        b.location = GeoPoint::new(-0.46, 38.2);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_labels_round_trip() {
        for p in [Provenance::Measured, Provenance::Assigned, Provenance::Synthetic] {
            assert_eq!(Provenance::parse(p.as_str()), Some(p));
        }
        for t in [RiskTier::Low, RiskTier::Medium, RiskTier::High] {
            assert_eq!(RiskTier::parse(t.as_str()), Some(t));
        }
        assert_eq!(RiskTier::parse("alto"), None);
    }
}
