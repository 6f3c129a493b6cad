/// Service configuration.
///
/// Tunables live in `gloria.toml` (every section optional, every field
/// defaulted); secrets come from the environment, loaded from `.env` with
/// `dotenv`. A `ServiceConfig` is built once per process and passed into the
/// engines explicitly.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::logging::LogLevel;
use crate::model::GloriaError;

pub const DEFAULT_CONFIG_PATH: &str = "./gloria.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub matching: MatchingConfig,
    pub scoring: ScoringConfig,
    pub ingest: IngestConfig,
    pub download: DownloadConfig,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Search and fallback parameters for one assignment mode.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatchPolicy {
    pub max_distance_km: f64,
    /// Candidates older than this are ignored. `None` means no limit.
    pub time_window_days: Option<u32>,
    /// Cap on raw candidates fetched per query. `None` means no cap.
    pub candidate_limit: Option<usize>,
    /// Fewer matches than this triggers radius back-off.
    pub min_matches: usize,
    /// Radius multipliers tried in order after the base radius.
    pub radius_backoff: Vec<f64>,
    /// Copy a donor site's history when back-off still finds too little.
    pub donor_fallback: bool,
    /// A donor must hold more than this many assigned observations.
    pub donor_min_observations: i64,
    /// Relative jitter applied to donor copies, e.g. 0.1 for ±10 %.
    pub jitter_fraction: f64,
    /// Rows per transaction when writing assignments.
    pub chunk_size: usize,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            max_distance_km: 50.0,
            time_window_days: None,
            candidate_limit: None,
            min_matches: 30,
            radius_backoff: vec![2.0],
            donor_fallback: false,
            donor_min_observations: 100,
            jitter_fraction: 0.1,
            chunk_size: 100,
        }
    }
}

impl MatchPolicy {
    /// Policy for sites that have never received data: all variables at
    /// once, tighter radius, recent data only, donor fallback on.
    pub fn unassigned_sites() -> Self {
        Self {
            max_distance_km: 30.0,
            time_window_days: Some(90),
            candidate_limit: Some(1000),
            min_matches: 50,
            radius_backoff: vec![2.0],
            donor_fallback: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), GloriaError> {
        if !(self.max_distance_km > 0.0) {
            return Err(GloriaError::InvalidConfig(format!(
                "max_distance_km must be positive, got {}",
                self.max_distance_km
            )));
        }
        if let Some(bad) = self.radius_backoff.iter().find(|m| !(**m > 1.0)) {
            return Err(GloriaError::InvalidConfig(format!(
                "radius_backoff multipliers must be greater than 1, got {}",
                bad
            )));
        }
        if !(0.0..1.0).contains(&self.jitter_fraction) {
            return Err(GloriaError::InvalidConfig(format!(
                "jitter_fraction must be in [0, 1), got {}",
                self.jitter_fraction
            )));
        }
        if self.chunk_size == 0 {
            return Err(GloriaError::InvalidConfig("chunk_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Every site, one variable at a time.
    pub per_variable: MatchPolicy,
    /// Sites without any assigned observation, all variables together.
    pub unassigned_sites: MatchPolicy,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            per_variable: MatchPolicy::default(),
            unassigned_sites: MatchPolicy::unassigned_sites(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// History window read for each site.
    pub days_back: u32,
    /// Estimate wave height from wind speed when a site has no wave data.
    pub wind_proxy: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self { days_back: 30, wind_proxy: true }
    }
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Where downloaded grids land and are picked up for import.
    pub download_dir: PathBuf,
    /// Imported files are moved here. Defaults to `<download_dir>/processed`.
    pub processed_dir: Option<PathBuf>,
    /// Rejected files are moved here. Defaults to `<download_dir>/failed`.
    pub failed_dir: Option<PathBuf>,
    /// Rows per upsert transaction.
    pub chunk_size: usize,
    /// Spatial subsampling aims for roughly this many points per time slice.
    pub target_points_per_slice: usize,
    pub default_quality: i16,
    /// Tag raw rows with the containing or nearest site within this radius.
    pub tag_nearest_site_km: Option<f64>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("databases/copernicus_marine"),
            processed_dir: None,
            failed_dir: None,
            chunk_size: 1000,
            target_points_per_slice: 500,
            default_quality: 90,
            tag_nearest_site_km: None,
        }
    }
}

impl IngestConfig {
    pub fn processed_dir(&self) -> PathBuf {
        self.processed_dir
            .clone()
            .unwrap_or_else(|| self.download_dir.join("processed"))
    }

    pub fn failed_dir(&self) -> PathBuf {
        self.failed_dir
            .clone()
            .unwrap_or_else(|| self.download_dir.join("failed"))
    }
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Subset endpoint. `{dataset}` is replaced with the dataset id.
    pub endpoint: String,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    /// Window used on the first download of a dataset.
    pub initial_lookback_days: i64,
    /// JSON ledger of the last successful download per dataset.
    pub ledger_file: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://nrt.cmems-du.eu/motu-web/Motu/{dataset}".to_string(),
            max_attempts: 5,
            retry_delay_secs: 180,
            initial_lookback_days: 7,
            ledger_file: PathBuf::from("databases/copernicus_marine/metadata.json"),
            request_timeout_secs: 600,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for per-binary log files. `None` logs to the console only.
    pub dir: Option<PathBuf>,
    pub console_timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: Some(PathBuf::from("logs")),
            console_timestamps: true,
        }
    }
}

impl LoggingConfig {
    pub fn min_level(&self) -> LogLevel {
        LogLevel::parse(&self.level)
    }

    /// Log file path for the named binary, if file logging is enabled.
    pub fn file_for(&self, binary: &str) -> Option<String> {
        self.dir
            .as_ref()
            .map(|d| d.join(format!("{}.log", binary)).to_string_lossy().to_string())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl ServiceConfig {
    /// Parses configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, GloriaError> {
        let config: ServiceConfig =
            toml::from_str(text).map_err(|e| GloriaError::InvalidConfig(e.to_string()))?;
        config.matching.per_variable.validate()?;
        config.matching.unassigned_sites.validate()?;
        if config.ingest.chunk_size == 0 {
            return Err(GloriaError::InvalidConfig("ingest.chunk_size must be at least 1".to_string()));
        }
        Ok(config)
    }

    /// Loads configuration from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, GloriaError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| GloriaError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Sets up the global logger for the named binary.
    pub fn init_logging(&self, binary: &str) {
        let file = self.logging.file_for(binary);
        crate::logging::init_logger(
            self.logging.min_level(),
            file.as_deref(),
            self.logging.console_timestamps,
        );
    }
}

/// Value following `flag` in a binary's arguments, e.g. `--site 12`.
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Config file named by `--config`, else `./gloria.toml`.
pub fn config_path(args: &[String]) -> PathBuf {
    PathBuf::from(flag_value(args, "--config").unwrap_or(DEFAULT_CONFIG_PATH))
}

/// Reads a required environment variable after loading `.env`.
pub fn require_env(key: &str) -> Result<String, GloriaError> {
    dotenv::dotenv().ok();
    std::env::var(key).map_err(|_| GloriaError::MissingConfig(key.to_string()))
}

/// PostgreSQL connection string from `DATABASE_URL`.
pub fn database_url() -> Result<String, GloriaError> {
    require_env("DATABASE_URL")
}

/// Marine data provider credentials.
pub fn provider_credentials() -> Result<(String, String), GloriaError> {
    Ok((require_env("COPERNICUS_USERNAME")?, require_env("COPERNICUS_PASSWORD")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServiceConfig::from_toml_str("").expect("empty config should parse");
        assert_eq!(config.matching.per_variable.max_distance_km, 50.0);
        assert_eq!(config.matching.per_variable.min_matches, 30);
        assert!(!config.matching.per_variable.donor_fallback);
        assert_eq!(config.matching.unassigned_sites.max_distance_km, 30.0);
        assert_eq!(config.matching.unassigned_sites.min_matches, 50);
        assert!(config.matching.unassigned_sites.donor_fallback);
        assert_eq!(config.scoring.days_back, 30);
        assert_eq!(config.ingest.chunk_size, 1000);
        assert_eq!(config.download.max_attempts, 5);
        assert_eq!(config.download.retry_delay_secs, 180);
    }

    #[test]
    fn test_partial_sections_override_only_given_fields() {
        let text = r#"
            [matching.per_variable]
            max_distance_km = 25.0
            radius_backoff = [2.0, 3.0]

            [scoring]
            days_back = 14

            [logging]
            level = "debug"
        "#;
        let config = ServiceConfig::from_toml_str(text).expect("config should parse");
        assert_eq!(config.matching.per_variable.max_distance_km, 25.0);
        assert_eq!(config.matching.per_variable.radius_backoff, vec![2.0, 3.0]);
        assert_eq!(config.matching.per_variable.min_matches, 30);
        assert_eq!(config.scoring.days_back, 14);
        assert!(config.scoring.wind_proxy);
        assert_eq!(config.logging.min_level(), LogLevel::Debug);
    }

    #[test]
    fn test_backoff_multiplier_must_widen_radius() {
        let text = "[matching.per_variable]\nradius_backoff = [0.5]\n";
        let result = ServiceConfig::from_toml_str(text);
        assert!(matches!(result, Err(GloriaError::InvalidConfig(_))), "got {:?}", result);
    }

    #[test]
    fn test_malformed_toml_is_rejected() {
        let result = ServiceConfig::from_toml_str("[matching\nmax = ");
        assert!(matches!(result, Err(GloriaError::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = ServiceConfig::load(Path::new("/definitely/not/here/gloria.toml"))
            .expect("missing file should not be an error");
        assert_eq!(config.ingest.default_quality, 90);
    }

    #[test]
    fn test_failed_dir_defaults_under_download_dir() {
        let ingest = IngestConfig::default();
        assert_eq!(ingest.failed_dir(), ingest.download_dir.join("failed"));
        assert_eq!(ingest.processed_dir(), ingest.download_dir.join("processed"));
    }

    #[test]
    fn test_flag_values() {
        let args: Vec<String> = ["assign_sites", "--site", "12", "--config", "/etc/gloria.toml"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(flag_value(&args, "--site"), Some("12"));
        assert_eq!(config_path(&args), PathBuf::from("/etc/gloria.toml"));
        assert_eq!(config_path(&args[..3]), PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(flag_value(&args[..2], "--site"), None);
    }

    #[test]
    fn test_log_file_per_binary() {
        let logging = LoggingConfig::default();
        let file = logging.file_for("assign_sites").expect("file logging on by default");
        assert!(file.ends_with("assign_sites.log"));
        let console_only = LoggingConfig { dir: None, ..LoggingConfig::default() };
        assert!(console_only.file_for("assign_sites").is_none());
    }
}
