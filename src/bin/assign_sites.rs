/// Assigns raw-pool observations to aquaculture sites.
///
/// Usage:
///   assign_sites                    every site, per variable, then sites without data
///   assign_sites --unassigned-only  only sites that hold no observations yet
///   assign_sites --site 12          one site, per variable
///   ... --config path/to/gloria.toml

use chrono::Utc;
use gloria_service::config::{self, ServiceConfig};
use gloria_service::logging::{self, Component};
use gloria_service::matching::assign::{run_per_variable, run_unassigned_sites, AssignmentSummary};
use gloria_service::store::{GeoStore, PgGeoStore};

fn print_summary(title: &str, summary: &AssignmentSummary) {
    println!("\n📊 {}", title);
    println!("   Sites processed:   {}", summary.sites);
    println!("   Matched:           {}", summary.matched);
    println!("   Synthesized:       {}", summary.synthesized);
    println!("   No data:           {}", summary.insufficient);
    println!("   Rows written:      {}", summary.rows_written);
    if summary.rows_failed > 0 {
        println!("   ⚠️  Rows failed:    {}", summary.rows_failed);
    }
}

fn log_summary(what: &str, summary: &AssignmentSummary) {
    let ok = summary.matched + summary.synthesized;
    logging::log_batch_summary(Component::Matching, what, ok + summary.insufficient, ok, summary.insufficient);
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let cfg = ServiceConfig::load(&config::config_path(&args))?;
    cfg.init_logging("assign_sites");

    let unassigned_only = args.iter().any(|a| a == "--unassigned-only");
    let site_id = match config::flag_value(&args, "--site") {
        Some(raw) => Some(raw.parse::<i32>().map_err(|_| format!("invalid site id '{}'", raw))?),
        None => None,
    };

    println!("🐟 GlorIA site assignment");
    let mut store = PgGeoStore::connect()?;
    let mut rng = rand::rng();
    let now = Utc::now();

    if let Some(id) = site_id {
        let site = store.site(id)?;
        println!("📍 Site {} ({})", site.id, site.name);
        let summary = run_per_variable(&mut store, &[site], &cfg.matching.per_variable, now, &mut rng)?;
        print_summary("Per-variable assignment", &summary);
        return Ok(());
    }

    if !unassigned_only {
        let sites = store.sites()?;
        println!("📍 {} sites, per-variable pass", sites.len());
        let summary = run_per_variable(&mut store, &sites, &cfg.matching.per_variable, now, &mut rng)?;
        print_summary("Per-variable assignment", &summary);
        log_summary("Per-variable assignment", &summary);
    }

    let summary = run_unassigned_sites(&mut store, &cfg.matching.unassigned_sites, now, &mut rng)?;
    print_summary("Sites without data", &summary);
    log_summary("Unassigned-site assignment", &summary);
    println!("\n✅ Assignment complete");
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        logging::error(Component::System, None, &format!("assign_sites failed: {}", e));
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}
