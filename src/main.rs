use anyhow::Result;
use chronicle::api::{AppState, RestApi};
use chronicle::capture::{FfmpegFrameSource, FrameSource};
use chronicle::clock::{Clock, SystemClock};
use chronicle::config;
use chronicle::db::repositories::SettingsRepository;
use chronicle::db::store::{PgStore, Store};
use chronicle::db::DatabaseService;
use chronicle::export::ExportController;
use chronicle::recorder::{CaptureExecutor, CaptureScheduler, RetentionService};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "chronicle", about = "Timelapse capture and export server", version)]
struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

async fn run_app() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.api.log_level.as_str()),
    )
    .init();
    info!("Starting chronicle {}", env!("CARGO_PKG_VERSION"));

    let database = DatabaseService::new(&config.database).await?;
    let db_pool = Arc::clone(&database.pool);

    let settings = SettingsRepository::new(Arc::clone(&db_pool))
        .get_or_create()
        .await?;
    info!("Storage root: {}", settings.storage_path.display());

    let store: Arc<dyn Store> = Arc::new(PgStore::new(Arc::clone(&db_pool)));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let frame_source: Arc<dyn FrameSource> = Arc::new(FfmpegFrameSource::new(
        config.capture.ffmpeg_path.clone(),
        Duration::from_secs(config.capture.hardware_timeout_seconds),
    ));

    let executor = Arc::new(CaptureExecutor::new(
        Arc::clone(&store),
        Arc::clone(&frame_source),
        Arc::clone(&clock),
        config.capture.min_free_bytes,
    ));
    let scheduler = CaptureScheduler::new(Arc::clone(&store), executor, Arc::clone(&clock));
    let exports = ExportController::new(Arc::clone(&store), Arc::clone(&clock), &config.export);

    // Both run before the listener is bound, so no request sees stale state
    exports.recover().await?;
    let report = scheduler.recover().await?;
    info!(
        "Recovered {} running and {} scheduled timelapse(s)",
        report.started, report.scheduled
    );

    let cancel = CancellationToken::new();
    let retention = Arc::new(RetentionService::new(
        config.retention.clone(),
        Arc::clone(&store),
        Arc::clone(&clock),
    ));
    let retention_handle = retention.start(cancel.clone());

    let state = AppState {
        db_pool,
        store,
        scheduler: scheduler.clone(),
        exports,
        frame_source,
        clock,
    };
    let api = RestApi::new(&config.api, state);

    api.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    })
    .await?;

    cancel.cancel();
    if let Some(handle) = retention_handle {
        if let Err(e) = handle.await {
            error!("Retention task ended abnormally: {}", e);
        }
    }
    scheduler.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_app()) {
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
