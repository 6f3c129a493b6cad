/// Exports the first time step of one gridded file as map-ready JSON.
///
/// Usage:
///   export_grid_json <file.nc> <wave|temperature|current> [output.json]
///
/// Without an output path the document is printed to stdout.

use chrono::Utc;
use gloria_service::config::{self, ServiceConfig};
use gloria_service::datasets::find_dataset;
use gloria_service::export::{build_export, extract_points, ExportKind};
use gloria_service::geodesy::BoundingBox;
use gloria_service::ingest::import::dataset_external_id;
use gloria_service::ingest::netcdf_reader::NetcdfGrid;
use gloria_service::logging::{self, Component};
use std::path::Path;

const WHOLE_GLOBE: BoundingBox = BoundingBox { min_lon: -180.0, max_lon: 180.0, min_lat: -90.0, max_lat: 90.0 };

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let cfg = ServiceConfig::load(&config::config_path(&args))?;
    cfg.init_logging("export_grid_json");

    let positional: Vec<&String> = args
        .iter()
        .skip(1)
        .enumerate()
        .filter(|(i, a)| !a.starts_with("--") && args[*i] != "--config")
        .map(|(_, a)| a)
        .collect();
    let (file, kind) = match positional.as_slice() {
        [file, kind, ..] => (Path::new(file.as_str()), kind.as_str()),
        _ => return Err("usage: export_grid_json <file.nc> <wave|temperature|current> [output.json]".into()),
    };
    let kind = ExportKind::parse(kind).ok_or_else(|| format!("unknown export kind '{}'", kind))?;

    let grid = NetcdfGrid::open(file)?;
    let source = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let region = find_dataset(&dataset_external_id(&source))
        .map(|d| d.bbox)
        .unwrap_or(WHOLE_GLOBE);
    let points = extract_points(&grid, kind, &region)?;
    let export = build_export(points, kind, &source, Utc::now());
    let json = serde_json::to_string_pretty(&export)?;

    match positional.get(2) {
        Some(out) => {
            if let Some(dir) = Path::new(out.as_str()).parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(out.as_str(), json)?;
            eprintln!("✅ {} points written to {}", export.metadata.total_points, out);
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        logging::error(Component::System, None, &format!("export_grid_json failed: {}", e));
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}
