//! shorts-dl server: scheduler, yt-dlp fetcher and REST API in one process.
//!
//! Configuration comes from `CONFIG_FILE` (JSON, optional) overlaid with
//! environment variables; a `.env` file in the working directory is loaded first.

use std::path::Path;
use std::sync::Arc;

use shorts_dl::{
    Config, Delivery, DirectoryDelivery, DiscardDelivery, Result, Scheduler, YtDlpFetcher,
    run_with_shutdown,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine
    dotenvy::dotenv().ok();

    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info,tower_http=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    config.validate()?;

    let fetcher = YtDlpFetcher::from_config(&config.tools)?;
    tracing::info!(binary = %fetcher.binary_path().display(), "Using yt-dlp");

    let delivery: Arc<dyn Delivery> = match &config.delivery.output_dir {
        Some(dir) => Arc::new(DirectoryDelivery::new(dir)),
        None => {
            tracing::warn!("OUTPUT_DIR not set, completed files will be discarded");
            Arc::new(DiscardDelivery)
        }
    };

    let scheduler = Scheduler::new(config, Arc::new(fetcher), delivery).await?;
    scheduler.start().await;

    let mut api = scheduler.spawn_api_server();

    tokio::select! {
        result = run_with_shutdown(scheduler.clone()) => {
            api.abort();
            result
        }
        joined = &mut api => {
            match joined {
                Ok(Ok(())) => tracing::warn!("API server stopped unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "API server failed"),
                Err(e) => tracing::error!(error = %e, "API server task panicked"),
            }
            scheduler.shutdown().await
        }
    }
}

fn load_config() -> Result<Config> {
    let base = match std::env::var("CONFIG_FILE") {
        Ok(path) => {
            tracing::info!(path = %path, "Loading configuration file");
            Config::from_file(Path::new(&path))?
        }
        Err(_) => Config::default(),
    };
    base.with_env(|key| std::env::var(key).ok())
}
