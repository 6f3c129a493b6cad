/// Daily fish-escape risk scoring for every active marine site.
///
/// Writes one risk record per site for today, raises `escape_risk` alerts
/// for high-risk sites, and prints the ranking.
///
/// Usage: score_escape_risk [--config path/to/gloria.toml]

use chrono::Utc;
use gloria_service::config::{self, ServiceConfig};
use gloria_service::logging::{self, Component};
use gloria_service::model::RiskTier;
use gloria_service::risk::pipeline::run_scoring;
use gloria_service::store::PgGeoStore;

fn tier_icon(tier: RiskTier) -> &'static str {
    match tier {
        RiskTier::Low => "🟢",
        RiskTier::Medium => "🟡",
        RiskTier::High => "🔴",
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let cfg = ServiceConfig::load(&config::config_path(&args))?;
    cfg.init_logging("score_escape_risk");

    println!("🌊 GlorIA escape-risk scoring");
    let mut store = PgGeoStore::connect()?;
    let results = run_scoring(&mut store, &cfg.scoring, Utc::now())?;

    println!("\n{:<6} {:<32} {:>6} {:>7}  {}", "Site", "Name", "Index", "Prob.", "Main factor");
    println!("═══════════════════════════════════════════════════════════════════════");
    for r in &results {
        let main_factor = if r.inputs.is_some() {
            r.assessment
                .factors
                .first()
                .map(|f| format!("{} {:.2} {}", f.kind.label(), f.value, f.kind.unit()))
                .unwrap_or_default()
        } else {
            "no data (default)".to_string()
        };
        println!(
            "{} {:<4} {:<32} {:>6.1} {:>6.0}%  {}",
            tier_icon(r.record.tier),
            r.site.id,
            r.site.name,
            r.record.index,
            r.record.probability * 100.0,
            main_factor
        );
    }

    let alerts = results.iter().filter(|r| r.alert.is_some()).count();
    let no_data = results.iter().filter(|r| r.inputs.is_none()).count();
    println!("\n📊 {} sites scored, {} without data, {} alert(s)", results.len(), no_data, alerts);
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        logging::error(Component::System, None, &format!("score_escape_risk failed: {}", e));
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}
