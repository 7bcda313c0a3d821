use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use epilog_core::config::LedgerConfig;
use epilog_core::grouper::{spawn_sweeper, TraceGrouper};
use epilog_core::query::LedgerEngine;
use epilog_core::storage::duckdb::DuckDbStorage;

#[derive(Parser)]
#[command(name = "epilog", about = "Episode ledger server for AI agents")]
struct Cli {
    /// Path to the database file
    #[arg(long, default_value = "epilog.db", env = "EPILOG_DB_PATH")]
    db_path: PathBuf,

    /// Address for the REST API
    #[arg(long, default_value = "0.0.0.0:8420", env = "EPILOG_REST_ADDR")]
    rest_addr: String,

    /// Trace accumulations idle longer than this many seconds are flushed
    #[arg(long, default_value = "30", env = "EPILOG_IDLE_WINDOW")]
    idle_window_seconds: u64,

    /// How often the background sweep runs, in seconds
    #[arg(long, default_value = "5", env = "EPILOG_SWEEP_INTERVAL")]
    sweep_interval_seconds: u64,

    /// Write deadline in milliseconds
    #[arg(long, default_value = "10000", env = "EPILOG_WRITE_DEADLINE_MS")]
    write_deadline_ms: u64,

    /// Hard cap on list page sizes
    #[arg(long, default_value = "500", env = "EPILOG_MAX_PAGE_SIZE")]
    max_page_size: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = LedgerConfig {
        db_path: cli.db_path.clone(),
        max_page_size: cli.max_page_size,
        write_deadline: Duration::from_millis(cli.write_deadline_ms),
        idle_window: Duration::from_secs(cli.idle_window_seconds),
        sweep_interval: Duration::from_secs(cli.sweep_interval_seconds),
        ..Default::default()
    };

    let storage = Arc::new(DuckDbStorage::open(&cli.db_path)?);
    tracing::info!("Ledger opened at {:?}", cli.db_path);

    let sweep_interval = config.sweep_interval;
    let engine = Arc::new(LedgerEngine::new(storage, config));
    let grouper = Arc::new(TraceGrouper::new(engine.clone()));

    let sweeper = spawn_sweeper(grouper.clone(), sweep_interval);
    tracing::info!(
        "Grouper sweep running every {}s, idle window {}s",
        cli.sweep_interval_seconds,
        cli.idle_window_seconds
    );

    let app = epilog_rest::router(engine, grouper.clone());
    let listener = tokio::net::TcpListener::bind(&cli.rest_addr).await?;
    tracing::info!("REST API listening on {}", cli.rest_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the sweep, then drain whatever it was still accumulating so a
    // restart never resurrects half-built episodes.
    tracing::info!("Shutdown initiated, flushing pending accumulations...");
    sweeper.shutdown().await;
    let flushed = grouper.flush_all().await;
    tracing::info!("Flushed {flushed} pending accumulations");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {e}");
    } else {
        tracing::info!("Received shutdown signal");
    }
}
