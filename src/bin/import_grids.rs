/// Imports every downloaded `.nc` file into the unassigned observation pool.
///
/// Imported files move to `processed/`, structurally broken ones to
/// `failed/`. A database failure stops the run with a non-zero exit.
///
/// Usage: import_grids [--config path/to/gloria.toml] [--dir path/to/grids]

use gloria_service::config::{self, ServiceConfig};
use gloria_service::ingest::import::import_directory;
use gloria_service::ingest::netcdf_reader;
use gloria_service::logging::{self, Component};
use gloria_service::store::PgGeoStore;
use std::path::PathBuf;

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut cfg = ServiceConfig::load(&config::config_path(&args))?;
    cfg.init_logging("import_grids");
    if let Some(dir) = config::flag_value(&args, "--dir") {
        cfg.ingest.download_dir = PathBuf::from(dir);
    }

    println!("📦 Importing grids from {}", cfg.ingest.download_dir.display());
    let mut store = PgGeoStore::connect()?;
    let summary = import_directory(&mut store, &cfg.ingest, netcdf_reader::open_boxed)?;

    println!("\n📊 Import summary");
    println!("   Files found:    {}", summary.files);
    println!("   ✅ Imported:    {}", summary.imported);
    println!("   ❌ Rejected:    {}", summary.rejected);
    if summary.retained > 0 {
        println!("   ⚠️  Kept for retry: {}", summary.retained);
    }
    println!("   Rows written:   {}", summary.rows_written);
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        logging::error(Component::System, None, &format!("import_grids failed: {}", e));
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}
