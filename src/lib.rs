//! GlorIA service: oceanographic data ingest, site assignment and daily
//! fish-escape risk scoring for aquaculture sites.
//!
//! Binaries under `src/bin/` each run one batch job: `download_datasets`,
//! `import_grids`, `assign_sites`, `score_escape_risk` and
//! `export_grid_json`.

pub mod alert;
pub mod config;
pub mod datasets;
pub mod db;
pub mod export;
pub mod geodesy;
pub mod ingest;
pub mod logging;
pub mod matching;
pub mod model;
pub mod risk;
pub mod store;
