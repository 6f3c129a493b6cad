/// Incremental download of every registry dataset.
///
/// Each dataset is fetched for the window since its last download. A
/// dataset that still fails after the retry cap is skipped; the others
/// continue. Exits non-zero only when credentials or the ledger are
/// unusable.
///
/// Usage: download_datasets [--config path/to/gloria.toml]

use chrono::Utc;
use gloria_service::config::{self, ServiceConfig};
use gloria_service::datasets::DATASET_REGISTRY;
use gloria_service::ingest::download::{download_dataset, DownloadLedger, DownloadOutcome, HttpSubsetDownloader};
use gloria_service::logging::{self, Component};

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let cfg = ServiceConfig::load(&config::config_path(&args))?;
    cfg.init_logging("download_datasets");

    let (username, password) = config::provider_credentials()?;
    let downloader = HttpSubsetDownloader::new(&cfg.download, username, password)?;
    let mut ledger = DownloadLedger::load(&cfg.download.ledger_file)?;

    println!("📥 Downloading {} datasets into {}", DATASET_REGISTRY.len(), cfg.ingest.download_dir.display());
    let mut saved = 0;
    let mut failed = 0;
    for dataset in DATASET_REGISTRY {
        let result = download_dataset(
            &downloader,
            dataset,
            &mut ledger,
            &cfg.download,
            &cfg.ingest.download_dir,
            Utc::now(),
            std::thread::sleep,
        );
        match result {
            Ok(DownloadOutcome::Saved(path)) => {
                saved += 1;
                println!("  ✅ {} → {}", dataset.name, path.display());
            }
            Ok(DownloadOutcome::Duplicate) => {
                println!("  ⏭️  {}: already downloaded", dataset.name);
            }
            Err(e) => {
                failed += 1;
                logging::log_download_failure(dataset.id, "download", e.failure_type(), &e);
                println!("  ❌ {}: {}", dataset.name, e);
            }
        }
        // persist after each dataset so a later crash keeps earlier windows
        ledger.save(&cfg.download.ledger_file)?;
    }

    logging::log_batch_summary(Component::Download, "Download", DATASET_REGISTRY.len(), DATASET_REGISTRY.len() - failed, failed);
    println!("\n📊 {} saved, {} failed", saved, failed);
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        logging::error(Component::System, None, &format!("download_datasets failed: {}", e));
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}
