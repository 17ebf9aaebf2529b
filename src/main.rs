mod analytics;
mod api;
mod chain;
mod config;
mod db;
mod error;
mod indexer;
mod refresher;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::error::Result;
use crate::indexer::Indexer;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    let indexer = Arc::new(Indexer::new(cfg.clone(), pool.clone())?);

    // Optional built-in scheduler. Off by default — production triggers
    // POST /indexer/run from an external scheduler instead.
    if cfg.sync_interval_secs > 0 {
        let loop_indexer = Arc::clone(&indexer);
        let interval_secs = cfg.sync_interval_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.tick().await; // consume immediate first tick
            loop {
                ticker.tick().await;
                if let Err(e) = loop_indexer.run_cycle().await {
                    error!("Scheduled cycle failed: {e}");
                }
            }
        });
        info!("Built-in scheduler running every {interval_secs}s");
    }

    let api_state = ApiState {
        pool,
        indexer,
        indexer_token: cfg.indexer_token.clone(),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
