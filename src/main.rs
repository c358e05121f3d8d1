//! flipstore - summarize locally stored flips
//!
//! Usage: flipstore [--json]
//!
//! Loads every flip CSV in the configured data directory, applies the
//! configured view and prints the interval stats and the first page.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use flipstore::config::{AppConfig, LoggingConfig};
use flipstore::loader::{CsvRecordSource, FlipLoader, LoadOutcome, RecordSource};
use flipstore::persistence::CsvFlipFiles;
use flipstore::{AccountFilter, FlipStore};

fn init_logging(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));
    if cfg.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging);
    info!(config = %config, "flipstore starting");

    let as_json = std::env::args().skip(1).any(|arg| arg == "--json");

    let store = Arc::new(FlipStore::with_window_secs(config.store.window_secs));
    let files = CsvFlipFiles::new(&config.persistence.data_dir)?;
    let sources = CsvRecordSource::discover(&files)?;
    info!(
        data_dir = %files.data_dir().display(),
        sources = sources.len(),
        "Discovered flip files"
    );
    let loader = FlipLoader::new(store.clone());

    let outcomes = loader.load_all(&sources).await;
    for (source, outcome) in sources.iter().zip(outcomes) {
        let name = source.display_name().unwrap_or("-");
        match outcome {
            Ok(LoadOutcome::Applied { records }) => info!(display_name = name, records, "Loaded"),
            Ok(LoadOutcome::Stale { .. }) => {}
            Err(e) => error!(display_name = name, error = %e, "Failed to load flips"),
        }
    }

    let accounts = AccountFilter::from_display_name(config.view.display_name.as_deref());
    let start_time = config.view_start_time(Utc::now().timestamp());
    store.set_filter(accounts.clone(), start_time);

    let stats = store.get_stats();
    let page = store.get_page(1, config.view.page_size);

    if as_json {
        let output = json!({
            "accounts": accounts.to_string(),
            "start_time": start_time,
            "known_display_names": store.get_known_display_names(),
            "stats": stats,
            "flips": page,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "{} flips across {} windows of {}s ({} accounts: {})",
            store.record_count(),
            store.bucket_count(),
            store.window_secs(),
            store.get_known_display_names().len(),
            accounts
        );
        println!("{}", stats);
        for flip in &page {
            println!("  {}", flip);
        }
    }

    Ok(())
}
