/// Gridded data acquisition: provider downloads, file access and import
/// into the unassigned observation pool.

pub mod download;
pub mod grid;
pub mod import;
#[cfg(feature = "netcdf")]
pub mod netcdf_reader;
pub mod time_units;
