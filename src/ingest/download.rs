/// Incremental subset downloads from the marine data provider.
///
/// Each registry dataset is fetched for the window since its last successful
/// download, retried on transient failures, checked against earlier
/// downloads by checksum, and written into the download directory for
/// `import_grids` to pick up. The ledger of past downloads is a JSON file.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use crate::config::DownloadConfig;
use crate::datasets::DatasetSpec;
use crate::geodesy::BoundingBox;
use crate::logging::{self, Component, FailureType};

pub const WINDOW_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadError {
    /// Non-success HTTP status.
    Status(u16),
    /// The request completed but returned no content.
    NoData,
    Timeout,
    Transport(String),
    Io(String),
    Ledger(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::Status(code) => write!(f, "HTTP {}", code),
            DownloadError::NoData => write!(f, "No data returned for the requested window"),
            DownloadError::Timeout => write!(f, "Request timed out"),
            DownloadError::Transport(msg) => write!(f, "Transport error: {}", msg),
            DownloadError::Io(msg) => write!(f, "I/O error: {}", msg),
            DownloadError::Ledger(msg) => write!(f, "Ledger error: {}", msg),
        }
    }
}

impl std::error::Error for DownloadError {}

impl DownloadError {
    pub fn failure_type(&self) -> FailureType {
        match self {
            // The provider publishes forecasts once a day; asking for a
            // window that is not out yet is routine.
            DownloadError::NoData | DownloadError::Status(404) => FailureType::Expected,
            DownloadError::Status(_) | DownloadError::Timeout => FailureType::Unexpected,
            _ => FailureType::Unknown,
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DownloadError::Timeout
        } else if let Some(status) = err.status() {
            DownloadError::Status(status.as_u16())
        } else {
            DownloadError::Transport(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One subset request: dataset, variables, region and time window.
#[derive(Debug, Clone, PartialEq)]
pub struct SubsetRequest {
    pub dataset_id: String,
    pub variables: Vec<String>,
    pub bbox: BoundingBox,
    pub depth_range: Option<(f64, f64)>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl SubsetRequest {
    pub fn for_dataset(dataset: &DatasetSpec, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            dataset_id: dataset.id.to_string(),
            variables: dataset.variables.iter().map(|v| v.to_string()).collect(),
            bbox: dataset.bbox,
            depth_range: dataset.depth_range,
            start,
            end,
        }
    }

    /// Query string for the subset endpoint.
    pub fn query(&self) -> String {
        let mut params = vec![
            "action=productdownload".to_string(),
            format!("x_lo={}", self.bbox.min_lon),
            format!("x_hi={}", self.bbox.max_lon),
            format!("y_lo={}", self.bbox.min_lat),
            format!("y_hi={}", self.bbox.max_lat),
            format!("t_lo={}", self.start.format(WINDOW_FORMAT)),
            format!("t_hi={}", self.end.format(WINDOW_FORMAT)),
        ];
        if let Some((lo, hi)) = self.depth_range {
            params.push(format!("z_lo={}", lo));
            params.push(format!("z_hi={}", hi));
        }
        for var in &self.variables {
            params.push(format!("variable={}", var));
        }
        params.join("&")
    }
}

/// Fetches one subset as raw file bytes.
pub trait SubsetDownloader {
    fn fetch(&self, request: &SubsetRequest) -> Result<Vec<u8>, DownloadError>;
}

/// Downloader for the provider's HTTP subset service.
pub struct HttpSubsetDownloader {
    client: reqwest::blocking::Client,
    endpoint: String,
    username: String,
    password: String,
}

impl HttpSubsetDownloader {
    pub fn new(config: &DownloadConfig, username: String, password: String) -> Result<Self, DownloadError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(StdDuration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, endpoint: config.endpoint.clone(), username, password })
    }

    pub fn url_for(&self, request: &SubsetRequest) -> String {
        format!("{}?{}", self.endpoint.replace("{dataset}", &request.dataset_id), request.query())
    }
}

impl SubsetDownloader for HttpSubsetDownloader {
    fn fetch(&self, request: &SubsetRequest) -> Result<Vec<u8>, DownloadError> {
        let response = self
            .client
            .get(self.url_for(request))
            .basic_auth(&self.username, Some(&self.password))
            .send()?;

        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status().as_u16()));
        }

        let bytes = response.bytes()?;
        if bytes.is_empty() {
            return Err(DownloadError::NoData);
        }
        Ok(bytes.to_vec())
    }
}

/// Fetches `request`, retrying transient failures up to `max_attempts`
/// times with `delay` between attempts. Failures classified as expected
/// (no data yet, 404) are returned without retrying.
pub fn download_with_retry<D, F>(
    downloader: &D,
    request: &SubsetRequest,
    max_attempts: u32,
    delay: StdDuration,
    mut sleep: F,
) -> Result<Vec<u8>, DownloadError>
where
    D: SubsetDownloader + ?Sized,
    F: FnMut(StdDuration),
{
    let attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        logging::debug(
            Component::Download,
            None,
            &format!("{} attempt {}/{}", request.dataset_id, attempt, attempts),
        );
        match downloader.fetch(request) {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                if e.failure_type() == FailureType::Expected || attempt >= attempts {
                    return Err(e);
                }
                logging::warn(
                    Component::Download,
                    None,
                    &format!(
                        "{} attempt {} failed: {}; retrying in {}s",
                        request.dataset_id,
                        attempt,
                        e,
                        delay.as_secs()
                    ),
                );
                sleep(delay);
                attempt += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(default)]
    pub checksums: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    /// End of the last downloaded window, `YYYY-MM-DDTHH:MM:SS`.
    #[serde(default)]
    pub last_download_date: Option<String>,
}

/// Past downloads per dataset id, persisted as `metadata.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadLedger {
    pub datasets: BTreeMap<String, LedgerEntry>,
}

impl DownloadLedger {
    /// Reads the ledger; a missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self, DownloadError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|e| DownloadError::Io(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| DownloadError::Ledger(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), DownloadError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| DownloadError::Io(e.to_string()))?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|e| DownloadError::Ledger(e.to_string()))?;
        fs::write(path, text).map_err(|e| DownloadError::Io(e.to_string()))
    }

    /// Start and end of the next window for `dataset_id`: the day after the
    /// last download, or `lookback_days` before `now` on first use or when
    /// the recorded date is unreadable.
    pub fn window(&self, dataset_id: &str, now: DateTime<Utc>, lookback_days: i64) -> (NaiveDateTime, NaiveDateTime) {
        let end = now.naive_utc();
        let default_start = end - Duration::days(lookback_days);
        let start = self
            .datasets
            .get(dataset_id)
            .and_then(|entry| entry.last_download_date.as_deref())
            .and_then(|last| match NaiveDateTime::parse_from_str(last, WINDOW_FORMAT) {
                Ok(dt) => Some(dt + Duration::days(1)),
                Err(e) => {
                    logging::warn(
                        Component::Download,
                        None,
                        &format!("{}: unreadable last download date '{}': {}", dataset_id, last, e),
                    );
                    None
                }
            })
            .unwrap_or(default_start);
        (start, end)
    }

    pub fn is_duplicate(&self, dataset_id: &str, checksum: &str) -> bool {
        self.datasets
            .get(dataset_id)
            .is_some_and(|entry| entry.checksums.iter().any(|c| c == checksum))
    }

    pub fn record(&mut self, dataset_id: &str, checksum: String, file: &Path, end: NaiveDateTime) {
        let entry = self.datasets.entry(dataset_id.to_string()).or_default();
        entry.checksums.push(checksum);
        entry.files.push(file.to_string_lossy().to_string());
        entry.last_download_date = Some(end.format(WINDOW_FORMAT).to_string());
    }
}

/// Hex SHA-256 of a downloaded file's content.
pub fn checksum(bytes: &[u8]) -> String {
    Sha256::digest(bytes).iter().map(|b| format!("{:02x}", b)).collect()
}

// ---------------------------------------------------------------------------
// Dataset download
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Saved(PathBuf),
    /// Identical content was already downloaded; nothing written.
    Duplicate,
}

/// Downloads the next window of `dataset` into `download_dir` and updates
/// the ledger. The ledger is not saved here.
pub fn download_dataset<D: SubsetDownloader + ?Sized, F: FnMut(StdDuration)>(
    downloader: &D,
    dataset: &DatasetSpec,
    ledger: &mut DownloadLedger,
    config: &DownloadConfig,
    download_dir: &Path,
    now: DateTime<Utc>,
    sleep: F,
) -> Result<DownloadOutcome, DownloadError> {
    let (start, end) = ledger.window(dataset.id, now, config.initial_lookback_days);
    logging::info(
        Component::Download,
        None,
        &format!(
            "{}: requesting {} to {}",
            dataset.id,
            start.format(WINDOW_FORMAT),
            end.format(WINDOW_FORMAT)
        ),
    );

    let request = SubsetRequest::for_dataset(dataset, start, end);
    let bytes = download_with_retry(
        downloader,
        &request,
        config.max_attempts,
        StdDuration::from_secs(config.retry_delay_secs),
        sleep,
    )?;

    let sum = checksum(&bytes);
    if ledger.is_duplicate(dataset.id, &sum) {
        logging::info(Component::Download, None, &format!("{}: duplicate content, skipped", dataset.id));
        return Ok(DownloadOutcome::Duplicate);
    }

    fs::create_dir_all(download_dir).map_err(|e| DownloadError::Io(e.to_string()))?;
    let path = download_dir.join(format!("{}_{}.nc", dataset.id, now.format("%Y%m%d_%H%M%S")));
    fs::write(&path, &bytes).map_err(|e| DownloadError::Io(e.to_string()))?;
    ledger.record(dataset.id, sum, &path, end);

    logging::info(
        Component::Download,
        None,
        &format!("{}: saved {} bytes to {}", dataset.id, bytes.len(), path.display()),
    );
    Ok(DownloadOutcome::Saved(path))
}
