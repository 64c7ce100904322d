use std::sync::Arc;

use tracing::info;

use wicket::clock::SystemClock;
use wicket::coaching::InMemoryCoaching;
use wicket::config::Config;
use wicket::engine::Engine;
use wicket::model::GroundQuery;

const USAGE: &str = "usage: wicket [summary|grounds|audit|compact|maintain]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    wicket::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::new(
        config.wal_path(),
        config.rules,
        Arc::new(SystemClock),
        Arc::new(InMemoryCoaching::new()),
    )?);
    info!("opened {}", config.wal_path().display());

    let command = std::env::args().nth(1).unwrap_or_else(|| "summary".into());
    match command.as_str() {
        "summary" => {
            println!("{}", serde_json::to_string_pretty(&engine.summary().await)?);
        }
        "grounds" => {
            let page = engine
                .list_grounds(GroundQuery {
                    include_inactive: true,
                    limit: wicket::limits::MAX_PAGE_SIZE,
                    ..Default::default()
                })
                .await;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        "audit" => {
            let overlaps = engine.audit_overlaps().await;
            println!("{}", serde_json::to_string_pretty(&overlaps)?);
            if !overlaps.is_empty() {
                std::process::exit(1);
            }
        }
        "compact" => {
            let appends = engine.wal_appends_since_compact().await;
            engine.compact_wal().await?;
            info!("compacted WAL ({appends} appends since last compaction)");
        }
        "maintain" => {
            info!("compaction threshold: {}", config.compact_threshold);
            let compactor = tokio::spawn(wicket::compactor::run_compactor(
                engine.clone(),
                config.compact_threshold,
            ));
            tokio::signal::ctrl_c().await?;
            info!("shutdown signal received");
            compactor.abort();
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}
